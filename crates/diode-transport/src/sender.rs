//! # Sender Pipeline
//!
//! Three stages linked by bounded SPSC channels:
//!
//! ```text
//!   input ──reader──▶ raw buffers ──encoder──▶ chunks ──emit──▶ UDP
//! ```
//!
//! The reader blocks on the input stream and fills fixed-size buffers;
//! the encoder turns each buffer into an [`EncodedChunk`] (the
//! expensive fountain setup); the emit loop, on the caller's thread,
//! produces redundancy-many packets per chunk through the rate-limited
//! [`UdpSink`]. Clean shutdown flows as a `None` pill through both
//! channels; error paths poison the channels instead.

use std::io::Read;
use std::thread;

use tracing::{debug, info};

use crate::channel::{self, Consumer, Producer};
use crate::codec::{EncodedChunk, Encoder};
use crate::config::Config;
use crate::error::{self, Error};
use crate::sink::UdpSink;
use crate::wire::HEADER_LEN;

/// Raw buffers / chunks in flight per channel.
const PIPELINE_DEPTH: usize = 16;

type RawSlot = Option<Vec<u8>>;
type ChunkSlot = Option<Box<EncodedChunk>>;

/// Send `input` to the configured peer. Returns once the transfer is
/// complete; the result is the most severe outcome across all stages.
pub fn send<R: Read + Send>(config: &Config, input: R) -> Result<(), Error> {
    config.check_sender()?;

    let buf_size = config.n_pkt as usize * (config.pkt_size - HEADER_LEN);
    let (raw_tx, raw_rx) =
        channel::bounded_with::<RawSlot>(PIPELINE_DEPTH, || Some(Vec::with_capacity(buf_size)));
    let (chunk_tx, chunk_rx) = channel::bounded::<ChunkSlot>(PIPELINE_DEPTH);
    let raw_poison = raw_tx.poison_handle();
    let chunk_poison = chunk_tx.poison_handle();

    let mut sink = UdpSink::open(&config.addr, config.port, config.byterate, config.keepalive_ms)?;
    let encoder = Encoder::new(config.pkt_size);

    thread::scope(|s| {
        let reader = s.spawn(move || read_loop(input, raw_tx, buf_size));
        let enc = s.spawn(move || encode_loop(encoder, raw_rx, chunk_tx));

        let emit = emit_loop(config, &mut sink, chunk_rx);
        if emit.is_err() {
            // Unblock upstream stages that may be parked on a full
            // channel with nobody left to drain it.
            raw_poison.poison();
            chunk_poison.poison();
        }

        let result = error::merge(emit, reader.join().unwrap_or(Err(Error::Internal)));
        error::merge(result, enc.join().unwrap_or(Err(Error::Internal)))
    })
}

/// Fill channel slots from the input stream until EOF.
///
/// Short reads accumulate until the buffer is full; the final buffer
/// carries whatever remained (possibly zero bytes). A `None` pill
/// always follows, even after a read error.
fn read_loop<R: Read>(mut input: R, mut tx: Producer<RawSlot>, buf_size: usize) -> Result<(), Error> {
    let mut result = Ok(());

    'read: loop {
        let Ok(slot) = tx.reserve() else {
            result = Err(Error::Ipc);
            break;
        };
        let buf = slot.get_or_insert_with(|| Vec::with_capacity(buf_size));
        buf.resize(buf_size, 0);

        let mut filled = 0;
        let mut eof = false;
        while filled < buf_size {
            match input.read(&mut buf[filled..]) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    result = Err(Error::FileRead);
                    break 'read;
                }
            }
        }
        buf.truncate(filled);

        if tx.commit().is_err() {
            result = Err(Error::Ipc);
            break;
        }
        if eof {
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

/// Turn raw buffers into encoded chunks, propagating the pill.
fn encode_loop(
    mut encoder: Encoder,
    mut rx: Consumer<RawSlot>,
    mut tx: Producer<ChunkSlot>,
) -> Result<(), Error> {
    let mut result = Ok(());

    loop {
        let chunk = match rx.peek() {
            Err(_) => {
                result = Err(Error::Ipc);
                break;
            }
            Ok(slot) => match slot.as_deref() {
                None => break,
                Some(raw) => encoder.chunk(raw),
            },
        };

        match chunk {
            Err(e) => {
                result = Err(e);
                break;
            }
            Ok(chunk) => {
                if tx.send(Some(Box::new(chunk))).is_err() {
                    result = Err(Error::Ipc);
                    break;
                }
            }
        }

        // The chunk owns its copy now; hand the buffer back to the reader.
        if rx.ack().is_err() {
            result = Err(Error::Ipc);
            break;
        }
    }

    if tx.send(None).is_err() && result.is_ok() {
        result = Err(Error::Ipc);
    }
    result
}

/// Drain chunks, emitting each until the redundancy target is reached.
fn emit_loop(
    config: &Config,
    sink: &mut UdpSink,
    mut rx: Consumer<ChunkSlot>,
) -> Result<(), Error> {
    let mut pkt = vec![0u8; config.pkt_size];
    let mut result = Ok(());
    let mut more_data = true;

    // Announce the transfer. An unreachable socket at this point is the
    // only sender-side network failure worth aborting on.
    let n = Encoder::handwave(&mut pkt)?;
    sink.control(&pkt[..n])?;

    while more_data {
        let Ok(slot) = rx.recv() else {
            return Err(Error::Ipc);
        };
        let Some(mut chunk) = slot else {
            more_data = false;
            break;
        };

        debug!(chunk = chunk.num(), len = chunk.len(), "emitting chunk");
        loop {
            match chunk.emit(&mut pkt) {
                Err(e) => {
                    result = Err(e);
                    more_data = false;
                    break;
                }
                Ok((ratio, len)) => {
                    // Individual datagram errors are not actionable on a
                    // one-way link; the redundancy budget covers them.
                    let _ = sink.send(&pkt[..len]);
                    if !(ratio < config.redund) {
                        break;
                    }
                }
            }
        }
    }

    info!(bytes = sink.total_bytes(), "sent all chunks");

    // Teardown only on the guarded exit path.
    if !more_data {
        let n = Encoder::teardown(&mut pkt)?;
        let _ = sink.control(&pkt[..n]);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{self, PacketKind};
    use std::io::Cursor;
    use std::net::UdpSocket;
    use std::time::Duration;

    fn capture_config(port: u16) -> Config {
        let mut cfg = Config::new("127.0.0.1");
        cfg.port = port;
        cfg.n_pkt = 8;
        cfg.keepalive_ms = 0;
        cfg
    }

    fn listener() -> (UdpSocket, u16) {
        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let port = sock.local_addr().unwrap().port();
        (sock, port)
    }

    #[test]
    fn send_rejects_invalid_config() {
        let mut cfg = Config::new("impossibru !");
        cfg.keepalive_ms = 0;
        assert_eq!(
            send(&cfg, Cursor::new(vec![0u8; 10])).unwrap_err(),
            Error::InvalidAddr
        );
    }

    #[test]
    fn transfer_is_framed_by_begin_and_end_salvos() {
        let (sock, port) = listener();
        let cfg = capture_config(port);
        send(&cfg, Cursor::new(b"hello diode".to_vec())).unwrap();

        let mut kinds = Vec::new();
        let mut buf = vec![0u8; 2048];
        sock.set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        while let Ok((n, _)) = sock.recv_from(&mut buf) {
            kinds.push(wire::classify(&buf[..n]));
        }

        assert_eq!(kinds.iter().filter(|k| **k == PacketKind::Begin).count(), wire::SALVO_LEN);
        assert_eq!(kinds.iter().filter(|k| **k == PacketKind::End).count(), wire::SALVO_LEN);
        assert!(kinds.contains(&PacketKind::Data));
        // BEGIN strictly precedes data, END strictly follows it.
        let first_data = kinds.iter().position(|k| *k == PacketKind::Data).unwrap();
        let last_begin = kinds.iter().rposition(|k| *k == PacketKind::Begin).unwrap();
        let first_end = kinds.iter().position(|k| *k == PacketKind::End).unwrap();
        assert!(last_begin < first_data);
        assert!(first_data < first_end);
    }

    #[test]
    fn empty_input_still_sends_one_empty_chunk() {
        let (sock, port) = listener();
        let cfg = capture_config(port);
        send(&cfg, Cursor::new(Vec::new())).unwrap();

        let mut buf = vec![0u8; 2048];
        sock.set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let mut saw_empty_chunk = false;
        while let Ok((n, _)) = sock.recv_from(&mut buf) {
            if wire::classify(&buf[..n]) == PacketKind::Data {
                let pkt = wire::parse(&buf[..n]).unwrap();
                assert_eq!(pkt.header.chunk_size, 0);
                saw_empty_chunk = true;
            }
        }
        assert!(saw_empty_chunk);
    }

    #[test]
    fn read_errors_surface_as_file_read() {
        struct FailingReader;
        impl Read for FailingReader {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("injected"))
            }
        }

        let (_sock, port) = listener();
        let cfg = capture_config(port);
        assert_eq!(send(&cfg, FailingReader).unwrap_err(), Error::FileRead);
    }
}
