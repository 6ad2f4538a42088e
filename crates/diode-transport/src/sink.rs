//! # UDP Sink
//!
//! Rate-limited packet sink with an optional keep-alive thread. The
//! socket is shared between the emit thread and the keep-alive thread;
//! datagram sends are atomic at the kernel level, so no user-level lock
//! is needed. Keep-alives deliberately bypass the limiter: they are
//! cheap and must not be throttled behind a saturated data path.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Error;
use crate::limiter::RateLimiter;
use crate::wire::{Header, HEADER_LEN, SALVO_LEN};

/// Outbound side of the wire: socket + limiter + keep-alive.
pub struct UdpSink {
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    limiter: RateLimiter,
    keepalive: Option<Keepalive>,
}

impl std::fmt::Debug for UdpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpSink")
            .field("socket", &self.socket)
            .field("dest", &self.dest)
            .field("keepalive_active", &self.keepalive.is_some())
            .finish()
    }
}

impl UdpSink {
    /// Open a socket towards `addr:port`.
    ///
    /// A non-zero `keepalive_ms` starts the beacon thread immediately.
    pub fn open(addr: &str, port: u16, byterate: f64, keepalive_ms: u64) -> Result<Self, Error> {
        let dest = (addr, port)
            .to_socket_addrs()
            .map_err(|_| Error::InvalidAddr)?
            .next()
            .ok_or(Error::InvalidAddr)?;
        let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(|_| Error::Network)?;
        let socket = Arc::new(socket);

        let keepalive =
            (keepalive_ms > 0).then(|| Keepalive::start(socket.clone(), dest, keepalive_ms));

        Ok(UdpSink {
            socket,
            dest,
            limiter: RateLimiter::new(byterate),
            keepalive,
        })
    }

    /// Send one packet through the limiter.
    pub fn send(&mut self, pkt: &[u8]) -> Result<usize, Error> {
        let sent = self
            .socket
            .send_to(pkt, self.dest)
            .map_err(|_| Error::Network)?;
        self.limiter.limit(sent);
        Ok(sent)
    }

    /// Send a control salvo: [`SALVO_LEN`] copies of the same packet.
    ///
    /// Control packets receive no acknowledgement on a one-way link;
    /// repetition makes delivery overwhelmingly likely even under heavy
    /// loss, and the receiver's state machine absorbs the duplicates.
    pub fn control(&mut self, pkt: &[u8]) -> Result<(), Error> {
        for _ in 0..SALVO_LEN {
            self.send(pkt)?;
        }
        Ok(())
    }

    /// Total payload bytes pushed through the limiter.
    pub fn total_bytes(&self) -> u64 {
        self.limiter.total_bytes()
    }
}

impl Drop for UdpSink {
    fn drop(&mut self) {
        // Stop and join the keep-alive before the socket goes away.
        if let Some(ka) = self.keepalive.take() {
            ka.stop.store(true, Ordering::Relaxed);
            let _ = ka.thread.join();
        }
        debug!(bytes = self.limiter.total_bytes(), "sink closed");
    }
}

// ─── Keep-alive ──────────────────────────────────────────────────────────────

struct Keepalive {
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

impl Keepalive {
    fn start(socket: Arc<UdpSocket>, dest: SocketAddr, period_ms: u64) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let thread = thread::spawn(move || {
            let mut pkt = [0u8; HEADER_LEN];
            Header::keepalive().encode(&mut pkt);
            let period = Duration::from_millis(period_ms);
            while !flag.load(Ordering::Relaxed) {
                thread::sleep(period);
                if flag.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(err) = socket.send_to(&pkt, dest) {
                    warn!(%err, "keep-alive send failed");
                    break;
                }
            }
        });
        Keepalive { stop, thread }
    }
}
