//! # Wire Format
//!
//! Every datagram starts with a fixed 24-byte big-endian header:
//!
//! ```text
//!  0                   1                   2
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Chunk Number (64)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Chunk Size (64)                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Data Id (32)         |  Data Size (32)       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The top of the `chunk_num` space is reserved for control beacons.
//! Control packets carry no payload; the protocol is strictly one-way,
//! so BEGIN and END are repeated in salvos rather than acknowledged.

use bytes::{Buf, BufMut};

use crate::error::Error;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 24;

/// Largest accepted packet, header included.
pub const MAX_PKT_SIZE: usize = 1500;

/// Largest number of payload packets a single chunk may span.
pub const MAX_N_PKT: u32 = 64_000;

/// Upper bound on a declared chunk size.
pub const MAX_CHUNK_SIZE: u64 = MAX_PKT_SIZE as u64 * MAX_N_PKT as u64;

/// How many copies of each control packet are sent.
pub const SALVO_LEN: usize = 32;

/// Default UDP port.
pub const DEFAULT_PORT: u16 = 11011;

/// `chunk_num` sentinel announcing the end of the transfer.
pub const END_BEACON: u64 = 0xFFFF_FFFF_FFFF_FFFF;
/// `chunk_num` sentinel announcing the start of the transfer.
pub const BEGIN_BEACON: u64 = 0xFFFF_FFFF_FFFF_FFFE;
/// `chunk_num` sentinel for liveness beacons.
pub const KEEPALIVE_BEACON: u64 = 0xFFFF_FFFF_FFFF_FFFD;
/// Everything at or above this value is reserved for control use.
pub const FIRST_RESERVED: u64 = 0xFFFF_FFFF_FFFF_FFF0;

// ─── Header ──────────────────────────────────────────────────────────────────

/// Decoded packet header — present on every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Chunk of encoded data this packet is part of, or a control beacon.
    pub chunk_num: u64,
    /// Byte length of the source chunk.
    pub chunk_size: u64,
    /// FEC symbol id within the chunk.
    pub data_id: u32,
    /// Byte length of the payload that follows the header.
    pub data_size: u32,
}

impl Header {
    /// Header announcing the start of a transfer.
    pub fn begin() -> Self {
        Header {
            chunk_num: BEGIN_BEACON,
            chunk_size: 0,
            data_id: 0,
            data_size: 0,
        }
    }

    /// Header announcing the end of a transfer.
    pub fn end() -> Self {
        Header {
            chunk_num: END_BEACON,
            chunk_size: 0,
            data_id: 0,
            data_size: 0,
        }
    }

    /// Liveness beacon header.
    pub fn keepalive() -> Self {
        Header {
            chunk_num: KEEPALIVE_BEACON,
            chunk_size: 0,
            data_id: 0,
            data_size: 0,
        }
    }

    /// Serialize into the first [`HEADER_LEN`] bytes of `buf`.
    ///
    /// Panics if `buf` is shorter than a header; packet buffers are
    /// sized by the caller before any emission starts.
    pub fn encode(&self, buf: &mut [u8]) {
        let mut b = &mut buf[..HEADER_LEN];
        b.put_u64(self.chunk_num);
        b.put_u64(self.chunk_size);
        b.put_u32(self.data_id);
        b.put_u32(self.data_size);
    }

    fn decode(mut buf: &[u8]) -> Header {
        Header {
            chunk_num: buf.get_u64(),
            chunk_size: buf.get_u64(),
            data_id: buf.get_u32(),
            data_size: buf.get_u32(),
        }
    }
}

// ─── Classification ──────────────────────────────────────────────────────────

/// What a raw datagram is, judged from `chunk_num` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Reserved but undefined, or too short to classify. Ignored.
    Unknown,
    Begin,
    End,
    Keepalive,
    Data,
}

/// Classify a raw datagram without fully parsing it.
pub fn classify(datagram: &[u8]) -> PacketKind {
    if datagram.len() < HEADER_LEN {
        return PacketKind::Unknown;
    }
    let chunk_num = (&datagram[..8]).get_u64();
    match chunk_num {
        BEGIN_BEACON => PacketKind::Begin,
        END_BEACON => PacketKind::End,
        KEEPALIVE_BEACON => PacketKind::Keepalive,
        n if n >= FIRST_RESERVED => PacketKind::Unknown,
        _ => PacketKind::Data,
    }
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

/// A parsed datagram: header fields plus a view of the payload.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub header: Header,
    pub payload: &'a [u8],
}

/// Parse a received datagram.
///
/// Rejects datagrams shorter than a header, or whose declared payload
/// length exceeds what was actually received.
pub fn parse(datagram: &[u8]) -> Result<Packet<'_>, Error> {
    if datagram.len() < HEADER_LEN {
        return Err(Error::BadPacket);
    }
    let header = Header::decode(datagram);
    let end = HEADER_LEN + header.data_size as usize;
    if datagram.len() < end {
        return Err(Error::BadPacket);
    }
    Ok(Packet {
        header,
        payload: &datagram[HEADER_LEN..end],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode_to_vec(hdr: &Header, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + payload.len()];
        hdr.encode(&mut buf);
        buf[HEADER_LEN..].copy_from_slice(payload);
        buf
    }

    proptest! {
        #[test]
        fn proptest_header_roundtrip(
            chunk_num in any::<u64>(),
            chunk_size in any::<u64>(),
            data_id in any::<u32>(),
            data_size in 0u32..1476,
        ) {
            let hdr = Header { chunk_num, chunk_size, data_id, data_size };
            let raw = encode_to_vec(&hdr, &vec![0xAB; data_size as usize]);
            let pkt = parse(&raw).unwrap();
            prop_assert_eq!(pkt.header, hdr);
            prop_assert_eq!(pkt.payload.len(), data_size as usize);
        }

        #[test]
        fn proptest_reserved_range_is_never_data(low_bits in 0u64..16) {
            let chunk_num = FIRST_RESERVED | low_bits;
            let hdr = Header { chunk_num, chunk_size: 0, data_id: 0, data_size: 0 };
            let raw = encode_to_vec(&hdr, &[]);
            prop_assert_ne!(classify(&raw), PacketKind::Data);
        }
    }

    #[test]
    fn classify_beacons() {
        assert_eq!(classify(&encode_to_vec(&Header::begin(), &[])), PacketKind::Begin);
        assert_eq!(classify(&encode_to_vec(&Header::end(), &[])), PacketKind::End);
        assert_eq!(
            classify(&encode_to_vec(&Header::keepalive(), &[])),
            PacketKind::Keepalive
        );
    }

    #[test]
    fn classify_reserved_but_undefined_is_unknown() {
        for low in [0u64, 1, 2, 0xC] {
            let hdr = Header {
                chunk_num: FIRST_RESERVED | low,
                chunk_size: 0,
                data_id: 0,
                data_size: 0,
            };
            assert_eq!(classify(&encode_to_vec(&hdr, &[])), PacketKind::Unknown);
        }
    }

    #[test]
    fn classify_ordinary_chunk_numbers_are_data() {
        for num in [0u64, 1, 42, FIRST_RESERVED - 1] {
            let hdr = Header {
                chunk_num: num,
                chunk_size: 10,
                data_id: 0,
                data_size: 0,
            };
            assert_eq!(classify(&encode_to_vec(&hdr, &[])), PacketKind::Data);
        }
    }

    #[test]
    fn classify_short_datagram_is_unknown() {
        assert_eq!(classify(&[0u8; 7]), PacketKind::Unknown);
        assert_eq!(classify(&[0u8; 23]), PacketKind::Unknown);
    }

    #[test]
    fn parse_rejects_short_datagram() {
        assert_eq!(parse(&[0u8; 23]).unwrap_err(), Error::BadPacket);
    }

    #[test]
    fn parse_rejects_truncated_payload() {
        let hdr = Header {
            chunk_num: 0,
            chunk_size: 100,
            data_id: 0,
            data_size: 100,
        };
        let mut raw = vec![0u8; HEADER_LEN + 50];
        hdr.encode(&mut raw);
        assert_eq!(parse(&raw).unwrap_err(), Error::BadPacket);
    }

    #[test]
    fn parse_tolerates_trailing_slack() {
        // A receive buffer may be larger than the datagram's declared payload.
        let hdr = Header {
            chunk_num: 3,
            chunk_size: 8,
            data_id: 1,
            data_size: 4,
        };
        let mut raw = vec![0u8; HEADER_LEN + 32];
        hdr.encode(&mut raw);
        raw[HEADER_LEN..HEADER_LEN + 4].copy_from_slice(b"abcd");
        let pkt = parse(&raw).unwrap();
        assert_eq!(pkt.payload, b"abcd");
    }
}
