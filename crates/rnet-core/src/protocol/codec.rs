//! Message codec: typed [`Envelope`]s to frames and back.
//!
//! Body layouts (all words little-endian):
//! ```text
//! SetData      [target_path][source_path][packet_number:2][packet_count:2][len:2][data:len]
//! RequestData  [target_path][source_path][request_type:1]
//! Handshake    [kind:1]
//! Event        [target_path][source_path][event_id:2][data1:2][data2:2][data3:1]
//! ```
//! Paths are length-prefixed (see [`crate::protocol::path`]).  Escaping and the
//! checksum are applied by [`crate::protocol::frame`] around the whole logical
//! sequence, so a data word that happens to equal a marker byte is escaped at
//! the byte level and needs no special handling here.

use thiserror::Error;

use crate::protocol::address::ADDRESS_LEN;
use crate::protocol::frame::{decode_frame, Frame, MAX_LOGICAL_LEN};
use crate::protocol::messages::{
    Envelope, EventId, EventMessage, HandshakeKind, HandshakeMessage, Message, MessageType,
    RequestDataMessage, SetDataMessage,
};
use crate::protocol::path::Path;

/// Errors that can occur while encoding or decoding RNET data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer than three bytes were available for a device address.
    #[error("malformed address: need {needed} bytes, got {available}")]
    MalformedAddress { needed: usize, available: usize },

    /// A path's length prefix promised more elements than were present.
    #[error("malformed path: declared {declared} elements, {available} available")]
    MalformedPath { declared: usize, available: usize },

    /// A path has more elements than its one-byte prefix can describe.
    #[error("path of {0} elements exceeds the 255-element maximum")]
    PathTooLong(usize),

    /// The transmitted checksum does not match the recomputed one.
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumError { expected: u8, actual: u8 },

    /// The frame envelope is structurally invalid (truncated, oversized, bad escape).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The body could not be parsed for its message type.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Builds the unescaped [`Frame`] for an envelope.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if a SetData packet is internally
/// inconsistent or carries more than `u16::MAX` bytes, and
/// [`ProtocolError::MalformedFrame`] if the frame would be longer than a
/// [`FrameDecoder`](crate::protocol::frame::FrameDecoder) accepts.
pub fn encode_frame(envelope: &Envelope) -> Result<Frame, ProtocolError> {
    let body = encode_body(&envelope.message)?;
    // Addresses, type byte, body and checksum.
    let logical_len = 2 * ADDRESS_LEN + 1 + body.len() + 1;
    if logical_len > MAX_LOGICAL_LEN {
        return Err(ProtocolError::MalformedFrame(format!(
            "{} frame of {logical_len} bytes exceeds {MAX_LOGICAL_LEN} bytes",
            envelope.message.name()
        )));
    }
    Ok(Frame::new(
        envelope.target,
        envelope.source,
        envelope.message.message_type_byte(),
        body,
    ))
}

/// Encodes an envelope into transmittable bytes (markers, escaping and checksum included).
///
/// # Errors
///
/// See [`encode_frame`].
///
/// # Examples
///
/// ```rust
/// use rnet_core::protocol::{decode_bytes, encode_message};
/// use rnet_core::{DeviceAddress, Envelope, HandshakeKind, HandshakeMessage, Message};
///
/// let envelope = Envelope::new(
///     DeviceAddress::root_controller(),
///     DeviceAddress::external(),
///     Message::Handshake(HandshakeMessage { kind: HandshakeKind::Data }),
/// );
/// let bytes = encode_message(&envelope).unwrap();
/// assert_eq!(decode_bytes(&bytes).unwrap(), envelope);
/// ```
pub fn encode_message(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    Ok(encode_frame(envelope)?.encode())
}

/// Interprets a decoded frame as a typed envelope.
///
/// Unknown message types are returned as [`Message::Unknown`] rather than
/// rejected.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPath`] or [`ProtocolError::MalformedPayload`]
/// if the body does not match its type's layout.
pub fn decode_message(frame: &Frame) -> Result<Envelope, ProtocolError> {
    let message = match MessageType::try_from(frame.message_type) {
        Ok(MessageType::SetData) => decode_set_data(&frame.body).map(Message::SetData)?,
        Ok(MessageType::RequestData) => {
            decode_request_data(&frame.body).map(Message::RequestData)?
        }
        Ok(MessageType::Handshake) => decode_handshake(&frame.body).map(Message::Handshake)?,
        Ok(MessageType::Event) => decode_event(&frame.body).map(Message::Event)?,
        Err(()) => Message::Unknown {
            message_type: frame.message_type,
            body: frame.body.clone(),
        },
    };
    Ok(Envelope::new(frame.target, frame.source, message))
}

/// Decodes one complete wire frame straight into an envelope.
///
/// # Errors
///
/// Any frame-level or body-level [`ProtocolError`].
pub fn decode_bytes(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    decode_message(&decode_frame(bytes)?)
}

// ── Body encoding ─────────────────────────────────────────────────────────────

fn encode_body(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    match msg {
        Message::SetData(m) => encode_set_data(&mut buf, m)?,
        Message::RequestData(m) => encode_request_data(&mut buf, m),
        Message::Handshake(m) => buf.push(m.kind.as_byte()),
        Message::Event(m) => encode_event(&mut buf, m),
        Message::Unknown { body, .. } => buf.extend_from_slice(body),
    }
    Ok(buf)
}

fn encode_set_data(buf: &mut Vec<u8>, m: &SetDataMessage) -> Result<(), ProtocolError> {
    validate_packet_numbers(m.packet_number, m.packet_count)?;
    let len = u16::try_from(m.data.len()).map_err(|_| {
        ProtocolError::MalformedPayload(format!(
            "SetData: {} data bytes exceed the 16-bit length field",
            m.data.len()
        ))
    })?;
    m.target_path.encode_into(buf);
    m.source_path.encode_into(buf);
    buf.extend_from_slice(&m.packet_number.to_le_bytes());
    buf.extend_from_slice(&m.packet_count.to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&m.data);
    Ok(())
}

fn encode_request_data(buf: &mut Vec<u8>, m: &RequestDataMessage) {
    m.target_path.encode_into(buf);
    m.source_path.encode_into(buf);
    buf.push(m.request_type);
}

fn encode_event(buf: &mut Vec<u8>, m: &EventMessage) {
    m.target_path.encode_into(buf);
    m.source_path.encode_into(buf);
    buf.extend_from_slice(&m.event_id.0.to_le_bytes());
    buf.extend_from_slice(&m.data1.to_le_bytes());
    buf.extend_from_slice(&m.data2.to_le_bytes());
    buf.push(m.data3);
}

// ── Body decoding ─────────────────────────────────────────────────────────────

fn decode_set_data(p: &[u8]) -> Result<SetDataMessage, ProtocolError> {
    let mut r = BodyReader::new(p, "SetData");
    let target_path = r.path()?;
    let source_path = r.path()?;
    let packet_number = r.u16_le()?;
    let packet_count = r.u16_le()?;
    let len = r.u16_le()? as usize;
    let data = r.bytes(len)?.to_vec();
    r.finish()?;
    validate_packet_numbers(packet_number, packet_count)?;
    Ok(SetDataMessage {
        target_path,
        source_path,
        packet_number,
        packet_count,
        data,
    })
}

fn decode_request_data(p: &[u8]) -> Result<RequestDataMessage, ProtocolError> {
    let mut r = BodyReader::new(p, "RequestData");
    let target_path = r.path()?;
    let source_path = r.path()?;
    let request_type = r.u8()?;
    r.finish()?;
    Ok(RequestDataMessage {
        target_path,
        source_path,
        request_type,
    })
}

fn decode_handshake(p: &[u8]) -> Result<HandshakeMessage, ProtocolError> {
    let mut r = BodyReader::new(p, "Handshake");
    let kind = HandshakeKind::from_byte(r.u8()?);
    r.finish()?;
    Ok(HandshakeMessage { kind })
}

fn decode_event(p: &[u8]) -> Result<EventMessage, ProtocolError> {
    let mut r = BodyReader::new(p, "Event");
    let target_path = r.path()?;
    let source_path = r.path()?;
    let event_id = EventId(r.u16_le()?);
    let data1 = r.u16_le()?;
    let data2 = r.u16_le()?;
    let data3 = r.u8()?;
    r.finish()?;
    Ok(EventMessage {
        target_path,
        source_path,
        event_id,
        data1,
        data2,
        data3,
    })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn validate_packet_numbers(number: u16, count: u16) -> Result<(), ProtocolError> {
    if count == 0 || number >= count {
        return Err(ProtocolError::MalformedPayload(format!(
            "SetData: packet {number} of {count} is out of range"
        )));
    }
    Ok(())
}

/// Forward-only cursor over a frame body.
struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> BodyReader<'a> {
    fn new(buf: &'a [u8], context: &'static str) -> Self {
        Self {
            buf,
            pos: 0,
            context,
        }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let rest = self.remaining();
        if rest.len() < n {
            return Err(ProtocolError::MalformedPayload(format!(
                "{}: need {n} bytes at offset {}, got {}",
                self.context,
                self.pos,
                rest.len()
            )));
        }
        self.pos += n;
        Ok(&rest[..n])
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16, ProtocolError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn path(&mut self) -> Result<Path, ProtocolError> {
        let (path, consumed) = Path::decode(self.remaining())?;
        self.pos += consumed;
        Ok(path)
    }

    fn finish(self) -> Result<(), ProtocolError> {
        let extra = self.buf.len() - self.pos;
        if extra != 0 {
            return Err(ProtocolError::MalformedPayload(format!(
                "{}: {extra} unexpected trailing bytes",
                self.context
            )));
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
