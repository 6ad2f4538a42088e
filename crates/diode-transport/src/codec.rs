//! # FEC Chunk Codec
//!
//! The unit of error correction is the *chunk*: a fixed-size region of
//! the input stream encoded as one RaptorQ source block. The sender
//! keeps emitting encoded packets for a chunk until the configured
//! redundancy ratio is reached; the receiver reconstructs the chunk as
//! soon as any sufficiently large subset of distinct packets arrives,
//! regardless of ordering.
//!
//! Two regimes exist per chunk:
//!
//! - **Small** (`len <= pkt_size - 24`): the payload is a literal copy
//!   of the source. Every emitted packet is identical, so redundancy is
//!   plain repetition and the chunk is ready on its first packet.
//! - **Large**: payloads are fountain symbols keyed by the wire
//!   `data_id` (ids below `k` are the systematic source symbols, ids at
//!   or above `k` are repair symbols).
//!
//! Chunk initialisation is expensive next to per-packet work, so chunks
//! are first-class objects: the pipeline initialises them on one thread
//! while another does packet I/O.

use raptorq::{
    EncodingPacket, ObjectTransmissionInformation, PayloadId, SourceBlockDecoder,
    SourceBlockEncoder,
};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::wire::{self, Header, PacketKind, HEADER_LEN, MAX_CHUNK_SIZE};

/// Every chunk is a single RaptorQ source block.
const SOURCE_BLOCK_ID: u8 = 0;

/// Block geometry both ends derive from the header alone.
///
/// The source copy is padded to a whole number of symbols so encoder
/// and decoder agree on the transfer length.
fn block_config(padded_len: usize, symbol_size: usize) -> ObjectTransmissionInformation {
    ObjectTransmissionInformation::new(padded_len as u64, symbol_size as u16, 1, 1, 1)
}

// ─── Encoder ─────────────────────────────────────────────────────────────────

/// Encoding session: hands out numbered [`EncodedChunk`]s.
pub struct Encoder {
    pkt_size: usize,
    next_chunk_num: u64,
}

impl Encoder {
    /// `pkt_size` is the full on-wire packet size, header included.
    pub fn new(pkt_size: usize) -> Self {
        Encoder {
            pkt_size,
            next_chunk_num: 0,
        }
    }

    /// Start a new chunk over a copy of `src`.
    ///
    /// The source region is not referenced afterwards. For large chunks
    /// this builds the fountain state, which is the expensive step.
    pub fn chunk(&mut self, src: &[u8]) -> Result<EncodedChunk, Error> {
        let num = self.next_chunk_num;
        self.next_chunk_num += 1;

        let len = src.len();
        let pkt_size = self.pkt_size.min(len + HEADER_LEN);
        let payload_size = pkt_size - HEADER_LEN;

        if len <= payload_size {
            return Ok(EncodedChunk {
                num,
                len,
                pkt_size,
                k: 1,
                next_data_id: 0,
                emitted: 0,
                data: src.to_vec(),
                fec: None,
            });
        }

        let k = len.div_ceil(payload_size);
        let mut data = vec![0u8; k * payload_size];
        data[..len].copy_from_slice(src);
        let config = block_config(data.len(), payload_size);
        let fec = SourceBlockEncoder::new(SOURCE_BLOCK_ID, &config, &data);
        debug!(chunk = num, len, k, "fountain state built");

        Ok(EncodedChunk {
            num,
            len,
            pkt_size,
            k: k as u32,
            next_data_id: 0,
            emitted: 0,
            data,
            fec: Some(fec),
        })
    }

    /// Write a BEGIN beacon into `pkt`; returns the wire length.
    pub fn handwave(pkt: &mut [u8]) -> Result<usize, Error> {
        if pkt.len() < HEADER_LEN {
            return Err(Error::BufferTooSmall);
        }
        Header::begin().encode(pkt);
        Ok(HEADER_LEN)
    }

    /// Write an END beacon into `pkt`; returns the wire length.
    pub fn teardown(pkt: &mut [u8]) -> Result<usize, Error> {
        if pkt.len() < HEADER_LEN {
            return Err(Error::BufferTooSmall);
        }
        Header::end().encode(pkt);
        Ok(HEADER_LEN)
    }
}

// ─── Encoded chunk ───────────────────────────────────────────────────────────

/// One chunk mid-emission on the sender side.
pub struct EncodedChunk {
    num: u64,
    len: usize,
    /// `min(pkt_size, len + HEADER_LEN)` — small chunks shrink the packet.
    pkt_size: usize,
    /// Number of source symbols (1 for small chunks).
    k: u32,
    next_data_id: u32,
    /// Payload bytes generated so far.
    emitted: u64,
    /// Owned source copy, padded to `k * payload_size` for large chunks.
    data: Vec<u8>,
    fec: Option<SourceBlockEncoder>,
}

impl EncodedChunk {
    pub fn num(&self) -> u64 {
        self.num
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn pkt_size(&self) -> usize {
        self.pkt_size
    }

    fn payload_size(&self) -> usize {
        self.pkt_size - HEADER_LEN
    }

    fn is_small(&self) -> bool {
        self.fec.is_none()
    }

    /// Emitted-bytes over source-bytes so far.
    pub fn redundancy(&self) -> f64 {
        self.emitted as f64 / self.len as f64
    }

    /// Write the next packet for this chunk into `pkt`.
    ///
    /// Returns the updated redundancy ratio and the wire length. Callers
    /// emit repeatedly until the ratio reaches their target; data ids
    /// start at 0 and increase by one per call.
    pub fn emit(&mut self, pkt: &mut [u8]) -> Result<(f64, usize), Error> {
        if pkt.len() < self.pkt_size {
            return Err(Error::BufferTooSmall);
        }
        let id = self.next_data_id;
        self.next_data_id += 1;
        let payload_size = self.payload_size();

        if self.is_small() {
            debug_assert_eq!(self.len + HEADER_LEN, self.pkt_size);
            pkt[..self.pkt_size].fill(0);
            pkt[HEADER_LEN..HEADER_LEN + self.len].copy_from_slice(&self.data);
        } else if (id as usize) < self.k as usize {
            // Systematic symbol: a straight slice of the padded source.
            let start = id as usize * payload_size;
            pkt[HEADER_LEN..HEADER_LEN + payload_size]
                .copy_from_slice(&self.data[start..start + payload_size]);
        } else {
            let fec = self.fec.as_ref().expect("large chunk has fountain state");
            let repair_id = id - self.k;
            let symbol = fec
                .repair_packets(repair_id, 1)
                .into_iter()
                .next()
                .ok_or(Error::Fec)?;
            debug_assert_eq!(symbol.payload_id().encoding_symbol_id(), id);
            let sym = symbol.data();
            if sym.len() != payload_size {
                return Err(Error::Fec);
            }
            pkt[HEADER_LEN..HEADER_LEN + payload_size].copy_from_slice(sym);
        }

        Header {
            chunk_num: self.num,
            chunk_size: self.len as u64,
            data_id: id,
            data_size: payload_size as u32,
        }
        .encode(pkt);

        self.emitted += payload_size as u64;
        Ok((self.redundancy(), self.pkt_size))
    }
}

// ─── Decoder ─────────────────────────────────────────────────────────────────

/// Transfer phase observed on the wire. Transitions are forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    New,
    Started,
    Data,
    Stopped,
}

/// Outcome of feeding one datagram to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Nothing to do yet; keep feeding packets.
    Pending,
    /// The current chunk is reconstructable; emit it (length in bytes).
    Ready(usize),
    /// An END beacon was absorbed; the transfer is over.
    End,
}

/// One chunk mid-reassembly on the receiver side.
struct DecodeChunk {
    num: u64,
    len: usize,
    /// Symbol size fixed by the chunk's first packet; every later
    /// packet of the chunk must agree.
    payload_size: usize,
    /// Reconstructed bytes once enough symbols arrived (padded for
    /// large chunks; truncated on emission).
    data: Option<Vec<u8>>,
    fec: Option<SourceBlockDecoder>,
}

impl DecodeChunk {
    /// Geometry comes entirely from the first packet's header.
    fn from_packet(pkt: &wire::Packet<'_>) -> Result<Self, Error> {
        let len = pkt.header.chunk_size as usize;
        let payload_size = pkt.header.data_size as usize;

        if len <= payload_size {
            return Ok(DecodeChunk {
                num: pkt.header.chunk_num,
                len,
                payload_size,
                data: None,
                fec: None,
            });
        }
        if payload_size == 0 {
            // A non-empty chunk cannot be carried by empty symbols.
            return Err(Error::Fec);
        }

        let k = len.div_ceil(payload_size);
        let padded = k * payload_size;
        let config = block_config(padded, payload_size);
        let fec = SourceBlockDecoder::new(SOURCE_BLOCK_ID, &config, padded as u64);
        Ok(DecodeChunk {
            num: pkt.header.chunk_num,
            len,
            payload_size,
            data: None,
            fec: Some(fec),
        })
    }

    /// Feed one payload. Returns true once the chunk is reconstructable.
    fn read(&mut self, pkt: &wire::Packet<'_>) -> Result<bool, Error> {
        if self.data.is_some() {
            return Ok(true);
        }

        match self.fec.as_mut() {
            None => {
                // Small chunk: the payload is the chunk.
                if pkt.payload.len() < self.len {
                    return Err(Error::BadPacket);
                }
                self.data = Some(pkt.payload[..self.len].to_vec());
                Ok(true)
            }
            Some(fec) => {
                // Symbol geometry is fixed per chunk; a mismatch means
                // corruption, not loss.
                if pkt.payload.len() != self.payload_size {
                    return Err(Error::BadPacket);
                }
                let symbol = EncodingPacket::new(
                    PayloadId::new(SOURCE_BLOCK_ID, pkt.header.data_id),
                    pkt.payload.to_vec(),
                );
                if let Some(data) = fec.decode(std::iter::once(symbol)) {
                    self.data = Some(data);
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }
}

/// Decoding session: protocol state machine plus one reusable chunk.
pub struct Decoder {
    phase: Phase,
    chunk: Option<DecodeChunk>,
    complete: bool,
    emitted: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Decoder {
            phase: Phase::New,
            chunk: None,
            // Both start true so the first DATA packet opens a fresh chunk.
            complete: true,
            emitted: true,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Advance the state machine. Returns whether the packet carries
    /// payload that must be handled.
    fn update_phase(&mut self, kind: PacketKind) -> bool {
        match kind {
            PacketKind::Begin => {
                if self.phase == Phase::New {
                    info!("begin of transfer");
                    self.phase = Phase::Started;
                }
                false
            }
            PacketKind::Data => {
                if self.phase == Phase::Started {
                    info!("incoming data");
                    self.phase = Phase::Data;
                }
                true
            }
            PacketKind::End => {
                if self.phase >= Phase::Started {
                    info!("end of transfer");
                    self.phase = Phase::Stopped;
                }
                false
            }
            PacketKind::Keepalive | PacketKind::Unknown => false,
        }
    }

    /// Feed one raw datagram.
    ///
    /// Drives the transfer state machine, opens a fresh chunk whenever
    /// the wire `chunk_num` changes, and feeds payload symbols to the
    /// fountain decoder. A `chunk_num` change while the previous chunk
    /// is still incomplete means the loss rate exceeded the redundancy
    /// budget, which is fatal.
    pub fn read(&mut self, datagram: &[u8]) -> Result<Progress, Error> {
        let pkt = wire::parse(datagram)?;
        let handle = self.update_phase(wire::classify(datagram));

        if self.phase < Phase::Data {
            return Ok(Progress::Pending);
        }
        if self.phase == Phase::Stopped {
            return Ok(Progress::End);
        }
        if !handle {
            return Ok(Progress::Pending);
        }

        if self.chunk.as_ref().map(|c| c.num) != Some(pkt.header.chunk_num) {
            if !self.complete {
                warn!(
                    new_chunk = pkt.header.chunk_num,
                    "previous chunk incomplete, too many packets lost"
                );
                return Err(Error::IncompleteChunk);
            }
            if pkt.header.chunk_size > MAX_CHUNK_SIZE {
                return Err(Error::BadChunk);
            }
            // Purge the old chunk and rebuild from this packet's header.
            self.chunk = Some(DecodeChunk::from_packet(&pkt)?);
            self.complete = false;
            self.emitted = false;
        } else if self.complete {
            let len = self.chunk.as_ref().map(|c| c.len).unwrap_or(0);
            return Ok(if self.emitted {
                Progress::Pending
            } else {
                Progress::Ready(len)
            });
        }

        let chunk = self.chunk.as_mut().expect("chunk initialised above");
        if chunk.read(&pkt)? {
            self.complete = true;
            Ok(Progress::Ready(chunk.len))
        } else {
            Ok(Progress::Pending)
        }
    }

    /// Copy the reconstructed chunk into `out`; returns the length.
    pub fn emit(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        if !self.complete {
            return Err(Error::IncompleteChunk);
        }
        let chunk = self.chunk.as_ref().ok_or(Error::IncompleteChunk)?;
        if out.len() < chunk.len {
            return Err(Error::BufferTooSmall);
        }
        let data = chunk.data.as_ref().ok_or(Error::IncompleteChunk)?;
        out[..chunk.len].copy_from_slice(&data[..chunk.len]);
        self.emitted = true;
        Ok(chunk.len)
    }
}
