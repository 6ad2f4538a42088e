//! # Receiver Pipeline
//!
//! Three stages linked by bounded SPSC channels:
//!
//! ```text
//!   UDP ──net──▶ raw datagrams ──decode──▶ chunks ──writer──▶ output
//! ```
//!
//! The net stage is patient before a transfer starts (the socket blocks
//! indefinitely) and intolerant during one: the first BEGIN beacon arms
//! the receive timeout. The decode stage drives the protocol state
//! machine and reassembles chunks; the writer streams them out, syncing
//! periodically to bound the dirty-page backlog. Both channels together
//! respect the configured memory limit: half for raw datagrams, half
//! for decoded chunks (with a floor of 256 slots).

use std::io::Write;
use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::channel::{self, Consumer, Producer};
use crate::codec::{Decoder, Progress};
use crate::config::Config;
use crate::error::{self, Error};
use crate::wire::{self, PacketKind, HEADER_LEN, MAX_CHUNK_SIZE};

/// Sync the output stream every this many written bytes.
const WRITE_SYNC_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Floor for the decoded-chunk channel capacity.
const MIN_CHUNK_SLOTS: usize = 256;

type RawSlot = Option<Vec<u8>>;
type ChunkSlot = Option<Vec<u8>>;

// ─── Output stream ───────────────────────────────────────────────────────────

/// Destination for reconstructed chunks.
///
/// The hints are best effort: file-backed outputs get real fadvise and
/// fsync calls, anything else falls back to no-ops or plain flush.
pub trait OutputStream: Write + Send {
    /// Tell the OS the output will be written sequentially, once.
    fn advise_sequential(&self) {}
    /// Push written data towards stable storage.
    fn sync(&mut self) {}
}

impl OutputStream for std::fs::File {
    fn advise_sequential(&self) {
        use std::os::fd::AsRawFd;
        unsafe {
            libc::posix_fadvise(self.as_raw_fd(), 0, 0, libc::POSIX_FADV_SEQUENTIAL);
            libc::posix_fadvise(self.as_raw_fd(), 0, 0, libc::POSIX_FADV_NOREUSE);
        }
    }

    fn sync(&mut self) {
        let _ = self.sync_data();
    }
}

impl OutputStream for std::io::Stdout {
    fn sync(&mut self) {
        // Often a pipe or terminal; fsync failure is expected there.
        use std::os::fd::AsRawFd;
        let _ = self.flush();
        unsafe {
            libc::fsync(self.as_raw_fd());
        }
    }
}

impl OutputStream for Vec<u8> {}

// ─── Driver ──────────────────────────────────────────────────────────────────

/// Receive one transfer into `out`. Returns once the transfer ends;
/// the result is the most severe outcome across all stages.
pub fn receive<W: OutputStream>(config: &Config, out: &mut W) -> Result<(), Error> {
    config.check_receiver()?;

    let slot_size = HEADER_LEN + config.pkt_size;
    let pkt_slots = ((config.mem_limit / 2) / slot_size).max(1);
    let chunk_slots = ((config.mem_limit / 2) / MAX_CHUNK_SIZE as usize).max(MIN_CHUNK_SLOTS);

    let (raw_tx, raw_rx) =
        channel::bounded_with::<RawSlot>(pkt_slots, || Some(Vec::with_capacity(slot_size)));
    let (chunk_tx, chunk_rx) = channel::bounded::<ChunkSlot>(chunk_slots);

    let decoder = Decoder::new();

    thread::scope(|s| {
        let writer = s.spawn(move || write_loop(out, chunk_rx));
        let dec = s.spawn(move || decode_loop(decoder, raw_rx, chunk_tx));

        let net = net_loop(config, raw_tx);

        let result = error::merge(net, dec.join().unwrap_or(Err(Error::Internal)));
        error::merge(result, writer.join().unwrap_or(Err(Error::Internal)))
    })
}

/// Read datagrams into channel slots until END, timeout or error.
fn net_loop(config: &Config, mut tx: Producer<RawSlot>) -> Result<(), Error> {
    let socket = match UdpSocket::bind((config.addr.as_str(), config.port)) {
        Ok(s) => s,
        Err(err) => {
            error!(%err, addr = %config.addr, port = config.port, "could not open socket");
            // The pill still has to flow so the other stages exit.
            if let Ok(slot) = tx.reserve() {
                *slot = None;
                let _ = tx.commit();
            }
            return Err(Error::Network);
        }
    };
    info!(addr = %config.addr, port = config.port, "listening");

    let mtu = HEADER_LEN + config.pkt_size;
    let mut started = false;
    let mut result = Ok(());

    loop {
        let Ok(slot) = tx.reserve() else {
            result = Err(Error::Ipc);
            break;
        };
        let buf = slot.get_or_insert_with(|| Vec::with_capacity(mtu));
        buf.resize(mtu, 0);

        let len = match socket.recv_from(buf) {
            Ok((len, _)) => len,
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                error!("end of reception, socket timed out");
                result = Err(Error::Timeout);
                break;
            }
            Err(err) => {
                error!(%err, "receive failed");
                result = Err(Error::Network);
                break;
            }
        };
        buf.truncate(len);

        let kind = wire::classify(buf);
        if kind == PacketKind::Begin && !started {
            // Patient until the transfer starts, intolerant during it.
            started = true;
            if config.timeout > Duration::ZERO
                && socket.set_read_timeout(Some(config.timeout)).is_err()
            {
                result = Err(Error::Network);
                break;
            }
        }

        // Everything is forwarded; the decoder owns the protocol.
        if tx.commit().is_err() {
            result = Err(Error::Ipc);
            break;
        }
        if kind == PacketKind::End {
            break;
        }
    }

    if let Ok(slot) = tx.reserve() {
        *slot = None;
        if tx.commit().is_err() && result.is_ok() {
            result = Err(Error::Ipc);
        }
    }
    result
}

/// Drive the decoder; emit reconstructed chunks downstream.
fn decode_loop(
    mut decoder: Decoder,
    mut rx: Consumer<RawSlot>,
    mut tx: Producer<ChunkSlot>,
) -> Result<(), Error> {
    let mut result = Ok(());

    loop {
        let progress = match rx.peek() {
            Err(_) => {
                result = Err(Error::Ipc);
                break;
            }
            Ok(slot) => match slot.as_deref() {
                None => break,
                Some(datagram) => decoder.read(datagram),
            },
        };
        if rx.ack().is_err() {
            result = Err(Error::Ipc);
            break;
        }

        match progress {
            Ok(Progress::Pending) => {}
            Ok(Progress::End) => break,
            Ok(Progress::Ready(len)) => {
                let mut chunk = vec![0u8; len];
                match decoder.emit(&mut chunk) {
                    Ok(_) => {
                        debug!(len, "chunk reassembled");
                        if tx.send(Some(chunk)).is_err() {
                            result = Err(Error::Ipc);
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "fatal error while reassembling");
                        rx.poison();
                        result = Err(e);
                        break;
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "error while decoding");
                rx.poison();
                result = Err(e);
                break;
            }
        }
    }

    info!("no more data");
    if tx.send(None).is_err() && result.is_ok() {
        result = Err(Error::Ipc);
    }
    result
}

/// Stream chunks to the output, syncing periodically.
fn write_loop<W: OutputStream>(out: &mut W, mut rx: Consumer<ChunkSlot>) -> Result<(), Error> {
    out.advise_sequential();

    let mut since_sync: u64 = 0;
    let mut total: u64 = 0;
    let mut result = Ok(());

    loop {
        let Ok(slot) = rx.recv() else {
            break;
        };
        let Some(chunk) = slot else {
            break;
        };

        if out.write_all(&chunk).is_err() {
            result = Err(Error::BadOutputFd);
            break;
        }
        since_sync += chunk.len() as u64;
        total += chunk.len() as u64;

        if since_sync >= WRITE_SYNC_THRESHOLD {
            since_sync = 0;
            out.sync();
        }
    }

    out.sync();
    info!(bytes = total, "output flushed");
    result
}
