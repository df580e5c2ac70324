//! Packet framing codec.
//!
//! Wire format:
//! ```text
//! $<payload>#<cc>      packet; cc = two lowercase hex digits, sum of the
//!                      transmitted payload bytes modulo 256
//! +                    acknowledgement
//! -                    negative acknowledgement (please resend)
//! 0x03                 interrupt request
//! ```
//!
//! Inside a payload the bytes `#`, `$`, `}` and `*` are escaped as `}`
//! followed by the byte XOR `0x20`.  The checksum covers the escaped bytes.

use std::io::{self, Read};

use thiserror::Error;

pub const PACKET_START: u8 = b'$';
pub const CHECKSUM_MARK: u8 = b'#';
pub const ACK: u8 = b'+';
pub const NACK: u8 = b'-';
pub const INTERRUPT: u8 = 0x03;
const ESCAPE: u8 = b'}';
const ESCAPE_XOR: u8 = 0x20;

/// Upper bound on a single packet body.  Larger frames are rejected rather
/// than buffered without limit.
pub const MAX_PACKET_SIZE: usize = 64 * 1024;

/// Errors that can occur while framing or unframing a packet.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("stream ended inside a packet")]
    UnexpectedEof,

    #[error("frame does not start with '$'")]
    MissingStart,

    #[error("frame has no '#' checksum marker")]
    MissingChecksum,

    #[error("checksum digits {0:?} are not hexadecimal")]
    InvalidChecksumDigits(String),

    /// Recoverable: the peer should be asked to resend.
    #[error("checksum mismatch: frame says 0x{declared:02x}, payload sums to 0x{computed:02x}")]
    ChecksumMismatch { declared: u8, computed: u8 },

    #[error("packet exceeds {MAX_PACKET_SIZE} bytes")]
    TooLarge,

    #[error("dangling escape byte at end of payload")]
    DanglingEscape,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ack,
    Nack,
    Interrupt,
    /// Unescaped payload of a checksum-verified packet.
    Packet(Vec<u8>),
}

/// Modulo-256 sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Frames `payload` as `$…#cc`, escaping reserved bytes.
///
/// # Examples
///
/// ```rust
/// use debug_platform_core::protocol::encode_packet;
///
/// assert_eq!(encode_packet(b"OK"), b"$OK#9a".to_vec());
/// ```
pub fn encode_packet(payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + 4);
    for &b in payload {
        if matches!(b, b'#' | b'$' | ESCAPE | b'*') {
            body.push(ESCAPE);
            body.push(b ^ ESCAPE_XOR);
        } else {
            body.push(b);
        }
    }

    let mut frame = Vec::with_capacity(body.len() + 4);
    frame.push(PACKET_START);
    frame.extend_from_slice(&body);
    frame.push(CHECKSUM_MARK);
    frame.extend_from_slice(format!("{:02x}", checksum(&body)).as_bytes());
    frame
}

/// Verifies and unescapes one complete `$…#cc` frame.
///
/// # Errors
///
/// Returns [`PacketError`] when the frame is malformed or its checksum does
/// not match.
pub fn decode_packet(frame: &[u8]) -> Result<Vec<u8>, PacketError> {
    let rest = frame
        .strip_prefix(&[PACKET_START])
        .ok_or(PacketError::MissingStart)?;
    let mark = rest
        .iter()
        .position(|&b| b == CHECKSUM_MARK)
        .ok_or(PacketError::MissingChecksum)?;
    let (body, tail) = rest.split_at(mark);
    let digits = &tail[1..];
    if digits.len() != 2 {
        return Err(PacketError::MissingChecksum);
    }

    let digits_text = String::from_utf8_lossy(digits).into_owned();
    let declared = u8::from_str_radix(&digits_text, 16)
        .map_err(|_| PacketError::InvalidChecksumDigits(digits_text.clone()))?;
    let computed = checksum(body);
    if declared != computed {
        return Err(PacketError::ChecksumMismatch { declared, computed });
    }

    unescape(body)
}

fn unescape(body: &[u8]) -> Result<Vec<u8>, PacketError> {
    let mut payload = Vec::with_capacity(body.len());
    let mut bytes = body.iter();
    while let Some(&b) = bytes.next() {
        if b == ESCAPE {
            let &next = bytes.next().ok_or(PacketError::DanglingEscape)?;
            payload.push(next ^ ESCAPE_XOR);
        } else {
            payload.push(b);
        }
    }
    Ok(payload)
}

/// Reads the next [`Frame`] from `reader`, skipping noise between frames.
///
/// Blocks until a whole frame has arrived.  A clean end of stream before a
/// frame starts is reported as [`PacketError::UnexpectedEof`] too; the caller
/// treats both as the peer going away.
///
/// # Errors
///
/// Returns [`PacketError`] for I/O failures, end of stream, oversized frames
/// and anything [`decode_packet`] rejects.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame, PacketError> {
    loop {
        match read_byte(reader)? {
            ACK => return Ok(Frame::Ack),
            NACK => return Ok(Frame::Nack),
            INTERRUPT => return Ok(Frame::Interrupt),
            PACKET_START => break,
            other => tracing::trace!("skipping stray byte 0x{other:02x} between packets"),
        }
    }

    let mut raw = vec![PACKET_START];
    loop {
        let b = read_byte(reader)?;
        raw.push(b);
        if b == CHECKSUM_MARK {
            break;
        }
        if raw.len() > MAX_PACKET_SIZE {
            return Err(PacketError::TooLarge);
        }
    }
    raw.push(read_byte(reader)?);
    raw.push(read_byte(reader)?);

    decode_packet(&raw).map(Frame::Packet)
}

fn read_byte<R: Read>(reader: &mut R) -> Result<u8, PacketError> {
    let mut buf = [0u8; 1];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Err(PacketError::UnexpectedEof),
            Ok(_) => return Ok(buf[0]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PacketError::Io(e)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
