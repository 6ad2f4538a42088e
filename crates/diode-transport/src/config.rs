//! # Configuration
//!
//! One `Config` drives both peers: the address is the destination on
//! the sending side and the bind address on the receiving side. The
//! validators return the same error kinds the CLI front-ends exit with.

use std::net::ToSocketAddrs;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::Error;
use crate::wire::{DEFAULT_PORT, HEADER_LEN, MAX_N_PKT, MAX_PKT_SIZE};

pub const DEFAULT_N_PKT: u32 = 1000;
pub const DEFAULT_PKT_SIZE: usize = 1400;
pub const DEFAULT_REDUND: f64 = 1.2;
pub const DEFAULT_KEEPALIVE_MS: u64 = 500;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_MEM_LIMIT: usize = 100 * 1024 * 1024;

/// Transfer parameters shared by sender and receiver.
#[derive(Debug, Clone)]
pub struct Config {
    /// Destination host when sending, bind address when receiving.
    pub addr: String,
    pub port: u16,
    /// Packets per error-correction chunk.
    pub n_pkt: u32,
    /// On-wire packet size, header included. Should fit the path MTU.
    pub pkt_size: usize,
    /// Redundancy target; 1.2 emits 1.2 times the original data.
    pub redund: f64,
    /// Byte-rate cap in bytes/second; 0 disables shaping.
    pub byterate: f64,
    /// Keep-alive period in milliseconds; 0 disables the beacon.
    pub keepalive_ms: u64,
    /// Receive timeout, armed once a transfer has started. Zero
    /// disables it (not recommended).
    pub timeout: Duration,
    /// Approximate cap on receiver-side buffering.
    pub mem_limit: usize,
}

impl Config {
    /// Defaults with the given peer address.
    pub fn new(addr: impl Into<String>) -> Self {
        Config {
            addr: addr.into(),
            port: DEFAULT_PORT,
            n_pkt: DEFAULT_N_PKT,
            pkt_size: DEFAULT_PKT_SIZE,
            redund: DEFAULT_REDUND,
            byterate: 0.0,
            keepalive_ms: DEFAULT_KEEPALIVE_MS,
            timeout: DEFAULT_TIMEOUT,
            mem_limit: DEFAULT_MEM_LIMIT,
        }
    }

    /// Validate the sending-side parameters.
    pub fn check_sender(&self) -> Result<(), Error> {
        if self.pkt_size <= HEADER_LEN {
            warn!(pkt_size = self.pkt_size, "MTU too small");
            return Err(Error::MtuTooSmall);
        }
        if self.pkt_size > MAX_PKT_SIZE {
            warn!(pkt_size = self.pkt_size, "MTU too big");
            return Err(Error::MtuTooBig);
        }
        self.check_addr()?;
        if self.n_pkt < 1 || self.n_pkt > MAX_N_PKT {
            warn!(n_pkt = self.n_pkt, "packets per chunk out of range");
            return Err(Error::BadNPkt);
        }
        if self.redund < 1.0 {
            warn!(redund = self.redund, "redundancy below 1.0");
            return Err(Error::BadRedund);
        }
        Ok(())
    }

    /// Validate the receiving-side parameters.
    pub fn check_receiver(&self) -> Result<(), Error> {
        self.check_addr()
    }

    fn check_addr(&self) -> Result<(), Error> {
        match (self.addr.as_str(), self.port).to_socket_addrs() {
            Ok(mut addrs) => {
                if addrs.next().is_some() {
                    Ok(())
                } else {
                    warn!(addr = %self.addr, "invalid network address");
                    Err(Error::InvalidAddr)
                }
            }
            _ => {
                warn!(addr = %self.addr, "invalid network address");
                Err(Error::InvalidAddr)
            }
        }
    }

    /// Log the effective configuration at startup.
    pub fn dump(&self) {
        info!(
            addr = %self.addr,
            port = self.port,
            n_pkt = self.n_pkt,
            pkt_size = self.pkt_size,
            redund = self.redund,
            byterate = self.byterate,
            keepalive_ms = self.keepalive_ms,
            timeout_ms = self.timeout.as_millis() as u64,
            mem_limit_mb = self.mem_limit / (1024 * 1024),
            "configuration"
        );
    }
}
