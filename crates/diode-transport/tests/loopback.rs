//! End-to-end loopback transfers: a real receiver bound on localhost,
//! a real sender streaming into it, byte-for-byte output comparison.

use std::io::Cursor;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::Duration;

use rand::RngCore;

use diode_transport::{receive, send, Config, Error};

/// Each test gets its own port so they can run in parallel.
static NEXT_PORT: AtomicU16 = AtomicU16::new(17311);

fn next_port() -> u16 {
    NEXT_PORT.fetch_add(1, Ordering::Relaxed)
}

fn random_payload(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    buf
}

struct Transfer {
    redund: f64,
    n_pkt: u32,
    pkt_size: usize,
    byterate: f64,
    mem_limit: usize,
}

impl Default for Transfer {
    fn default() -> Self {
        Transfer {
            redund: 1.2,
            n_pkt: 64,
            pkt_size: 1400,
            // Pace the sender so the loopback receive queue never
            // overflows; losses here would eat the redundancy budget.
            byterate: 40.0 * 1024.0 * 1024.0,
            mem_limit: 8 * 1024 * 1024,
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Transfer {
    fn run(&self, payload: &[u8]) -> Vec<u8> {
        init_tracing();
        let port = next_port();
        let mut cfg = Config::new("127.0.0.1");
        cfg.port = port;
        cfg.redund = self.redund;
        cfg.n_pkt = self.n_pkt;
        cfg.pkt_size = self.pkt_size;
        cfg.byterate = self.byterate;
        cfg.keepalive_ms = 25;
        cfg.timeout = Duration::from_secs(5);
        cfg.mem_limit = self.mem_limit;

        thread::scope(|s| {
            let receiver_cfg = cfg.clone();
            let receiver = s.spawn(move || {
                let mut out = Vec::new();
                receive(&receiver_cfg, &mut out).map(|_| out)
            });

            // Let the receiver bind before the BEGIN salvo flies.
            thread::sleep(Duration::from_millis(200));
            send(&cfg, Cursor::new(payload.to_vec())).expect("send failed");

            receiver.join().unwrap().expect("receive failed")
        })
    }
}

#[test]
fn loopback_single_byte() {
    // Exercises the small-chunk path: one packet, no fountain state.
    let payload = vec![0x5a];
    assert_eq!(Transfer::default().run(&payload), payload);
}

#[test]
fn loopback_hundred_bytes() {
    let payload = random_payload(100);
    assert_eq!(Transfer::default().run(&payload), payload);
}

#[test]
fn loopback_no_redundancy_sub_packet_payload() {
    // One chunk shorter than a single packet payload, at the minimum
    // legal redundancy.
    let payload = vec![0x0c; 1376 - 500];
    let transfer = Transfer {
        redund: 1.0,
        n_pkt: 1000,
        ..Transfer::default()
    };
    assert_eq!(transfer.run(&payload), payload);
}

#[test]
fn loopback_empty_input() {
    assert_eq!(Transfer::default().run(&[]), Vec::<u8>::new());
}

#[test]
fn loopback_multi_chunk_stream() {
    // ~3 MiB across dozens of chunks: steady-state pipeline, buffer
    // reuse, chunk ordering.
    let payload = random_payload(3 * 1024 * 1024);
    assert_eq!(Transfer::default().run(&payload), payload);
}

#[test]
fn loopback_exact_buffer_multiple() {
    // Input length an exact multiple of the read-buffer size; the
    // trailing zero-length chunk must not corrupt the output.
    let transfer = Transfer::default();
    let buf_size = transfer.n_pkt as usize * (transfer.pkt_size - 24);
    let payload = random_payload(buf_size * 2);
    assert_eq!(transfer.run(&payload), payload);
}

#[test]
fn loopback_rejects_invalid_sender_address() {
    let mut cfg = Config::new("impossibru !");
    cfg.keepalive_ms = 0;
    assert_eq!(
        send(&cfg, Cursor::new(vec![1, 2, 3])).unwrap_err(),
        Error::InvalidAddr
    );
}

#[test]
#[ignore = "moves 300 MiB through loopback; run explicitly"]
fn loopback_three_hundred_mebibytes() {
    let payload = random_payload(300 * 1024 * 1024);
    let transfer = Transfer {
        n_pkt: 1000,
        byterate: 80.0 * 1024.0 * 1024.0,
        mem_limit: 32 * 1024 * 1024,
        ..Transfer::default()
    };
    assert_eq!(transfer.run(&payload), payload);
}
