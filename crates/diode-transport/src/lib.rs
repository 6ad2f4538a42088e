//! # diode-transport
//!
//! Reliable one-way transfer of arbitrary byte streams over UDP, for
//! links with no return channel (data diodes, strict one-way network
//! taps). There is no acknowledgement and no retransmission: the sender
//! fountain-codes each chunk of the input and emits more packets than
//! strictly necessary, and the receiver reconstructs every chunk from
//! whichever subset arrives, as long as the loss stays below the
//! configured redundancy budget.
//!
//! ## Crate structure
//!
//! - [`wire`] — 24-byte packet header, beacons, classification
//! - [`channel`] — bounded SPSC ring connecting the pipeline stages
//! - [`codec`] — chunk-level fountain encoding and decoding (RaptorQ)
//! - [`limiter`] — averaging byte-rate limiter
//! - [`sink`] — rate-limited UDP sink with keep-alive beacons
//! - [`sender`] — reader → encoder → emitter pipeline
//! - [`receiver`] — network → decoder → writer pipeline
//! - [`config`] — shared parameters and validation
//! - [`error`] — flat error taxonomy, ordered by severity

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod limiter;
pub mod receiver;
pub mod sender;
pub mod sink;
pub mod wire;

pub use config::Config;
pub use error::{Error, Result};
pub use receiver::{receive, OutputStream};
pub use sender::send;
