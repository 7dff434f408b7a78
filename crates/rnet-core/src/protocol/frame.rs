//! Byte-level RNET frame envelope.
//!
//! Wire format:
//! ```text
//! START | target(3) | source(3) | type(1) | body(N) | checksum(1) | END
//! ```
//! Every byte between the markers is escaped individually: a byte equal to
//! [`START`], [`END`] or [`ESCAPE`] is sent as `ESCAPE, !byte`.
//!
//! # Checksum
//!
//! The checksum is computed over the *unescaped* bytes.  It is the sum of the
//! start marker and every logical byte from `target` through the end of `body`,
//! plus the number of bytes summed (start marker included), masked to seven
//! bits.  Because the result is always below `0x80` it can never collide with
//! a marker, but it still goes through the escape rule like any other byte.
//!
//! # Incremental decoding
//!
//! Bytes arrive from the transport in arbitrary chunks.  [`FrameDecoder`]
//! buffers them and hands out one result per call to
//! [`FrameDecoder::next_frame`]:
//!
//! - `Ok(Some(frame))` – a complete, checksum-valid frame.
//! - `Ok(None)` – more bytes are needed; nothing is lost.
//! - `Err(e)` – exactly one frame was dropped.  The decoder has already
//!   resynchronised and the caller simply keeps calling `next_frame`.

use std::collections::VecDeque;

use crate::protocol::address::{DeviceAddress, ADDRESS_LEN};
use crate::protocol::codec::ProtocolError;

/// Marks the start of a frame.
pub const START: u8 = 0xF0;

/// Marks the end of a frame.
pub const END: u8 = 0xF7;

/// Introduces an escaped (complemented) byte.
pub const ESCAPE: u8 = 0xF1;

/// Smallest logical frame: two addresses, a type byte and the checksum.
pub const MIN_LOGICAL_LEN: usize = 2 * ADDRESS_LEN + 2;

/// Largest logical frame, checksum included, that the decoder buffers and
/// the encoder produces.
pub const MAX_LOGICAL_LEN: usize = 2048;

/// A frame before escaping and checksumming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub target: DeviceAddress,
    pub source: DeviceAddress,
    pub message_type: u8,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(
        target: DeviceAddress,
        source: DeviceAddress,
        message_type: u8,
        body: Vec<u8>,
    ) -> Self {
        Self {
            target,
            source,
            message_type,
            body,
        }
    }

    /// The logical byte sequence `target..body` that the checksum covers.
    pub fn logical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 * ADDRESS_LEN + 1 + self.body.len());
        self.target.encode_into(&mut buf);
        self.source.encode_into(&mut buf);
        buf.push(self.message_type);
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Escapes, checksums and delimits the frame for transmission.
    pub fn encode(&self) -> Vec<u8> {
        let logical = self.logical_bytes();
        let sum = checksum(&logical);

        // Worst case every byte is escaped.
        let mut out = Vec::with_capacity(2 * (logical.len() + 1) + 2);
        out.push(START);
        for &byte in logical.iter().chain(std::iter::once(&sum)) {
            push_escaped(&mut out, byte);
        }
        out.push(END);
        out
    }
}

/// Computes the checksum over an unescaped `target..body` sequence.
pub fn checksum(logical: &[u8]) -> u8 {
    let sum = logical
        .iter()
        .fold(u32::from(START), |acc, &b| acc.wrapping_add(u32::from(b)));
    // The start marker counts towards the byte count.
    let count = logical.len() as u32 + 1;
    (sum.wrapping_add(count) & 0x7F) as u8
}

/// Returns `true` for the three reserved marker values.
pub fn is_reserved(byte: u8) -> bool {
    matches!(byte, START | END | ESCAPE)
}

fn push_escaped(out: &mut Vec<u8>, byte: u8) {
    if is_reserved(byte) {
        out.push(ESCAPE);
        out.push(!byte);
    } else {
        out.push(byte);
    }
}

/// Decodes a single complete frame from `bytes`.
///
/// Leading noise before the start marker is ignored; bytes after the end
/// marker are ignored.
///
/// # Errors
///
/// Returns the decoder's error for a corrupt frame, or
/// [`ProtocolError::MalformedFrame`] if `bytes` holds no complete frame.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    let mut decoder = FrameDecoder::new();
    decoder.extend(bytes);
    decoder
        .next_frame()?
        .ok_or_else(|| ProtocolError::MalformedFrame("incomplete frame".to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Discarding bytes until a start marker.
    Scanning,
    /// Collecting logical bytes; `escaped` is set right after an escape marker.
    InFrame { escaped: bool },
}

/// Incremental, resynchronising frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    raw: VecDeque<u8>,
    logical: Vec<u8>,
    state: DecodeState,
    skipped: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            raw: VecDeque::with_capacity(256),
            logical: Vec::with_capacity(64),
            state: DecodeState::Scanning,
            skipped: 0,
        }
    }

    /// Queues freshly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.raw.extend(bytes.iter().copied());
    }

    /// Number of raw bytes queued but not yet examined.
    pub fn buffered(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` while a frame has been started but not finished.
    pub fn in_frame(&self) -> bool {
        matches!(self.state, DecodeState::InFrame { .. })
    }

    /// Total bytes discarded while scanning for a start marker.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Produces the next frame, `Ok(None)` if more data is needed, or the error
    /// for one dropped frame.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::ChecksumError`] when the transmitted checksum is wrong.
    /// - [`ProtocolError::MalformedFrame`] for truncated, oversized, or badly
    ///   escaped frames.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        while let Some(byte) = self.raw.pop_front() {
            match self.state {
                DecodeState::Scanning => {
                    if byte == START {
                        self.begin_frame();
                    } else {
                        self.skipped += 1;
                    }
                }
                DecodeState::InFrame { escaped } => {
                    if byte == START {
                        let dropped = self.logical.len();
                        tracing::trace!(dropped, "start marker inside frame, resynchronising");
                        self.begin_frame();
                        return Err(ProtocolError::MalformedFrame(format!(
                            "start marker inside frame after {dropped} bytes"
                        )));
                    }
                    if byte == END {
                        self.state = DecodeState::Scanning;
                        let logical = std::mem::take(&mut self.logical);
                        if escaped {
                            return Err(ProtocolError::MalformedFrame(
                                "frame ended inside an escape sequence".to_string(),
                            ));
                        }
                        return parse_logical(&logical).map(Some);
                    }

                    if escaped {
                        self.logical.push(!byte);
                        self.state = DecodeState::InFrame { escaped: false };
                    } else if byte == ESCAPE {
                        self.state = DecodeState::InFrame { escaped: true };
                    } else {
                        self.logical.push(byte);
                    }

                    if self.logical.len() > MAX_LOGICAL_LEN {
                        tracing::trace!(limit = MAX_LOGICAL_LEN, "oversized frame dropped");
                        self.logical.clear();
                        self.state = DecodeState::Scanning;
                        return Err(ProtocolError::MalformedFrame(format!(
                            "frame exceeds {MAX_LOGICAL_LEN} bytes"
                        )));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Drops all buffered state, e.g. after the transport reconnects.
    pub fn reset(&mut self) {
        self.raw.clear();
        self.logical.clear();
        self.state = DecodeState::Scanning;
    }

    fn begin_frame(&mut self) {
        self.logical.clear();
        self.state = DecodeState::InFrame { escaped: false };
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_logical(logical: &[u8]) -> Result<Frame, ProtocolError> {
    if logical.len() < MIN_LOGICAL_LEN {
        return Err(ProtocolError::MalformedFrame(format!(
            "frame of {} bytes is shorter than the {MIN_LOGICAL_LEN}-byte minimum",
            logical.len()
        )));
    }
    let (covered, transmitted) = logical.split_at(logical.len() - 1);
    let expected = checksum(covered);
    if transmitted[0] != expected {
        return Err(ProtocolError::ChecksumError {
            expected,
            actual: transmitted[0],
        });
    }

    let target = DeviceAddress::decode(&covered[..ADDRESS_LEN])?;
    let source = DeviceAddress::decode(&covered[ADDRESS_LEN..2 * ADDRESS_LEN])?;
    let message_type = covered[2 * ADDRESS_LEN];
    let body = covered[2 * ADDRESS_LEN + 1..].to_vec();
    Ok(Frame {
        target,
        source,
        message_type,
        body,
    })
}
