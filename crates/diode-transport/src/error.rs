//! # Error Taxonomy
//!
//! One flat enumeration shared by both ends of the transfer. Codes are
//! ordered so that a numerically smaller code is more severe; `0` is
//! reserved for success and has no variant. Worker threads each return
//! an `Error` to the join point, which keeps the most severe one, and
//! the CLI front-ends exit with the numeric code.

use thiserror::Error;

/// Transfer error kinds, ordered by severity (smaller code = worse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(i32)]
pub enum Error {
    /// End of transfer. Not a failure — bounds the receive loops.
    #[error("end of transfer")]
    Eot = 1,
    #[error("no configuration provided")]
    NoConfig = 2,
    #[error("MTU too small (must exceed the 24-byte header)")]
    MtuTooSmall = 3,
    #[error("MTU too big (> 1500)")]
    MtuTooBig = 4,
    #[error("invalid address or host")]
    InvalidAddr = 5,
    #[error("bad file descriptor")]
    BadFd = 6,
    #[error("bad input file descriptor")]
    BadInputFd = 7,
    #[error("bad output file descriptor")]
    BadOutputFd = 8,
    #[error("error while reading input")]
    FileRead = 9,
    #[error("bad number of packets per chunk (must be 1..=64000)")]
    BadNPkt = 10,
    #[error("bad redundancy, must be >= 1.0")]
    BadRedund = 11,
    #[error("error correction engine failure")]
    Fec = 12,
    #[error("buffer too small")]
    BufferTooSmall = 13,
    #[error("chunk could not be reassembled (too many lost packets)")]
    IncompleteChunk = 14,
    #[error("invalid chunk (too big)")]
    BadChunk = 15,
    #[error("invalid packet (too small)")]
    BadPacket = 16,
    #[error("receive socket timed out")]
    Timeout = 17,
    #[error("network error")]
    Network = 18,
    #[error("internal channel error")]
    Ipc = 19,
    #[error("internal error")]
    Internal = 20,
}

impl Error {
    /// Numeric code, used as the process exit status.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// The more severe of two errors (smallest code).
    pub fn select(self, other: Error) -> Error {
        if other.code() < self.code() {
            other
        } else {
            self
        }
    }
}

/// Fold two stage results into the most severe outcome.
pub fn merge(a: Result<(), Error>, b: Result<(), Error>) -> Result<(), Error> {
    match (a, b) {
        (Ok(()), r) => r,
        (r, Ok(())) => r,
        (Err(e1), Err(e2)) => Err(e1.select(e2)),
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_order_matches_codes() {
        assert!(Error::Fec.code() < Error::Timeout.code());
        assert_eq!(Error::Network.select(Error::IncompleteChunk), Error::IncompleteChunk);
        assert_eq!(Error::IncompleteChunk.select(Error::Network), Error::IncompleteChunk);
    }

    #[test]
    fn merge_keeps_most_severe() {
        assert_eq!(merge(Ok(()), Ok(())), Ok(()));
        assert_eq!(merge(Ok(()), Err(Error::Timeout)), Err(Error::Timeout));
        assert_eq!(merge(Err(Error::Ipc), Ok(())), Err(Error::Ipc));
        assert_eq!(
            merge(Err(Error::Ipc), Err(Error::BadPacket)),
            Err(Error::BadPacket)
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::Eot.code(), 1);
        assert_eq!(Error::Internal.code(), 20);
    }
}
