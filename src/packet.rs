//! Wire-format definitions for STCP segments.
//!
//! Every datagram exchanged with the receiver is a [`Packet`].  This module
//! only transforms data: it builds segments, serialises them with a checksum
//! and parses raw bytes back, rejecting anything malformed.  No I/O happens
//! here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Source Port          |       Destination Port        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Flags     |            Window Size        |  Payload Len  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   (cont.)     |           Checksum            |  Payload ...  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 19 bytes.

use thiserror::Error;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u8 = 0b0000_0001;
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 0b0000_0010;
    /// Finish: sender has no more data to send.
    pub const FIN: u8 = 0b0000_0100;
    /// Reset the connection.
    pub const RST: u8 = 0b0000_1000;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 19;

/// Largest payload a single segment may carry.
pub const MAX_MSS: usize = 1400;

/// Default maximum segment size used when nothing else is configured.
pub const DEFAULT_MSS: usize = 1000;

/// Largest receive window advertised by the sender; also bounds the ISN.
pub const MAX_WINDOW: u16 = 5000;

const OFF_SRC_PORT: usize = 0;
const OFF_DST_PORT: usize = 2;
const OFF_SEQ: usize = 4;
const OFF_ACK: usize = 8;
const OFF_FLAGS: usize = 12;
const OFF_WINDOW: usize = 13;
const OFF_PAYLOAD_LEN: usize = 15;
const OFF_CHECKSUM: usize = 17;

/// Fixed-size segment header, fields in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub src_port: u16,
    pub dst_port: u16,
    /// Sequence number of the first payload byte (or of the SYN/FIN).
    pub seq: u32,
    /// Next sequence number expected from the peer; valid when ACK is set.
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Advertised receive-window size in bytes.
    pub window: u16,
    /// Internet checksum (RFC 1071) over the serialised segment.
    ///
    /// Computed by [`Packet::encode`]; verified by [`Packet::decode`].
    pub checksum: u16,
}

impl Header {
    pub fn is_syn(&self) -> bool {
        self.flags & flags::SYN != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }

    pub fn is_rst(&self) -> bool {
        self.flags & flags::RST != 0
    }
}

/// A complete segment: header plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a segment from its flags, window, sequence/ack numbers and payload.
    ///
    /// Ports are left at zero; the connection stamps them before sending.
    pub fn new(flags: u8, window: u16, seq: u32, ack: u32, payload: Vec<u8>) -> Self {
        Self {
            header: Header {
                seq,
                ack,
                flags,
                window,
                ..Header::default()
            },
            payload,
        }
    }

    /// Stamp the connection identity onto the header.
    pub fn with_ports(mut self, src_port: u16, dst_port: u16) -> Self {
        self.header.src_port = src_port;
        self.header.dst_port = dst_port;
        self
    }

    /// Amount of sequence space this segment occupies.
    ///
    /// Payload bytes count one each; SYN and FIN each consume one number.
    pub fn seq_len(&self) -> u32 {
        let mut len = self.payload.len() as u32;
        if self.header.is_syn() {
            len += 1;
        }
        if self.header.is_fin() {
            len += 1;
        }
        len
    }

    /// First sequence number after this segment.
    pub fn seq_end(&self) -> u32 {
        self.header.seq.wrapping_add(self.seq_len())
    }

    /// Serialise into a newly allocated buffer in network byte order.
    ///
    /// The payload length and checksum are computed here; whatever is stored
    /// in `header.checksum` is ignored.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let payload_len = self.payload.len();
        if payload_len > MAX_MSS {
            return Err(PacketError::PayloadTooLarge(payload_len));
        }
        let mut buf = vec![0u8; HEADER_LEN + payload_len];

        buf[OFF_SRC_PORT..OFF_SRC_PORT + 2].copy_from_slice(&self.header.src_port.to_be_bytes());
        buf[OFF_DST_PORT..OFF_DST_PORT + 2].copy_from_slice(&self.header.dst_port.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.header.ack.to_be_bytes());
        buf[OFF_FLAGS] = self.header.flags;
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.header.window.to_be_bytes());
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
            .copy_from_slice(&(payload_len as u16).to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        // Checksum field is still zero here.
        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw datagram.
    ///
    /// Returns [`Err`] if `buf` is shorter than [`HEADER_LEN`], if the
    /// `payload_len` field disagrees with `buf.len()`, or if the checksum does
    /// not verify.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort(buf.len()));
        }

        let payload_len = read_u16(buf, OFF_PAYLOAD_LEN) as usize;
        if buf.len() != HEADER_LEN + payload_len {
            return Err(PacketError::LengthMismatch {
                declared: payload_len,
                actual: buf.len() - HEADER_LEN,
            });
        }

        let checksum = read_u16(buf, OFF_CHECKSUM);
        let mut scratch = buf.to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].fill(0);
        if internet_checksum(&scratch) != checksum {
            return Err(PacketError::ChecksumFailed);
        }

        Ok(Packet {
            header: Header {
                src_port: read_u16(buf, OFF_SRC_PORT),
                dst_port: read_u16(buf, OFF_DST_PORT),
                seq: read_u32(buf, OFF_SEQ),
                ack: read_u32(buf, OFF_ACK),
                flags: buf[OFF_FLAGS],
                window: read_u16(buf, OFF_WINDOW),
                checksum,
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let h = &self.header;
        let names = [
            (flags::SYN, "SYN"),
            (flags::ACK, "ACK"),
            (flags::FIN, "FIN"),
            (flags::RST, "RST"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(bit, _)| h.flags & bit != 0)
            .map(|(_, name)| *name)
            .collect();
        write!(
            f,
            "[{}] seq={} ack={} win={} len={}",
            set.join("|"),
            h.seq,
            h.ack,
            h.window,
            self.payload.len()
        )
    }
}

/// Errors that can arise when building or parsing a segment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer of {0} bytes too short to contain a header")]
    BufferTooShort(usize),
    #[error("payload_len field says {declared} bytes but {actual} remain")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("checksum verification failed")]
    ChecksumFailed,
    #[error("payload of {0} bytes exceeds the maximum segment size")]
    PayloadTooLarge(usize),
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// Sum consecutive 16-bit big-endian words, fold the carry, return the
/// one's-complement.  Any checksum field within `data` must be zeroed first.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    // Odd trailing byte, padded with zero on the right.
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}
