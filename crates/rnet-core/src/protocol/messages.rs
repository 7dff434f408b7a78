//! RNET message types.
//!
//! A [`Message`] is the typed view of a frame body.  Field order and widths
//! live in [`crate::protocol::codec`]; this module only defines the shapes.
//! All 16-bit words travel little-endian.

use serde::{Deserialize, Serialize};

use crate::protocol::address::DeviceAddress;
use crate::protocol::codec::ProtocolError;
use crate::protocol::path::Path;

// ── Message type codes ────────────────────────────────────────────────────────

/// Message type byte that follows the two addresses in every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    SetData = 0x00,
    RequestData = 0x01,
    Handshake = 0x02,
    Event = 0x05,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(MessageType::SetData),
            0x01 => Ok(MessageType::RequestData),
            0x02 => Ok(MessageType::Handshake),
            0x05 => Ok(MessageType::Event),
            _ => Err(()),
        }
    }
}

// ── Priority ──────────────────────────────────────────────────────────────────

/// Send priority.  Higher variants are serviced first.
///
/// The discriminant doubles as the event priority byte on the wire.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Priority {
    #[default]
    Low = 0x00,
    High = 0x01,
}

impl Priority {
    /// All priorities from most to least urgent.
    pub const DESCENDING: [Priority; 2] = [Priority::High, Priority::Low];

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(Priority::Low),
            0x01 => Ok(Priority::High),
            _ => Err(()),
        }
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// What a handshake acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandshakeKind {
    /// Acknowledges an event or command.
    Command,
    /// Acknowledges a data packet (RequestData / SetData traffic).
    Data,
    /// A kind byte this library does not name; preserved verbatim.
    Other(u8),
}

impl HandshakeKind {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => HandshakeKind::Command,
            0x02 => HandshakeKind::Data,
            other => HandshakeKind::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            HandshakeKind::Command => 0x01,
            HandshakeKind::Data => 0x02,
            HandshakeKind::Other(b) => b,
        }
    }
}

/// HANDSHAKE (0x02): acknowledgement only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    pub kind: HandshakeKind,
}

// ── RequestData ───────────────────────────────────────────────────────────────

/// REQUEST_DATA (0x01): asks a device for the value stored at `target_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDataMessage {
    pub target_path: Path,
    pub source_path: Path,
    /// Request discriminator; `0x00` asks for the stored value.
    pub request_type: u8,
}

impl RequestDataMessage {
    /// Request for the value at `target_path`, answered to the root of the requester.
    pub fn value(target_path: Path) -> Self {
        Self {
            target_path,
            source_path: Path::root(),
            request_type: 0x00,
        }
    }
}

// ── SetData ───────────────────────────────────────────────────────────────────

/// Most data bytes placed in a single SetData packet by [`SetDataMessage::split`].
pub const MAX_SET_DATA_CHUNK: usize = 64;

/// SET_DATA (0x00): one packet of a (possibly multi-packet) value written to
/// `target_path`.
///
/// Devices also use SetData to answer a [`RequestDataMessage`]; in that case
/// `source_path` is the path that was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDataMessage {
    pub target_path: Path,
    pub source_path: Path,
    /// Zero-based index of this packet.
    pub packet_number: u16,
    /// Total packets in the transfer (at least 1).
    pub packet_count: u16,
    pub data: Vec<u8>,
}

impl SetDataMessage {
    /// Splits `data` into packets of at most [`MAX_SET_DATA_CHUNK`] bytes.
    ///
    /// An empty value still produces one (empty) packet.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MalformedPayload`] if `data` needs more packets than
    /// the 16-bit packet count can number.
    pub fn split(
        target_path: &Path,
        source_path: &Path,
        data: &[u8],
    ) -> Result<Vec<SetDataMessage>, ProtocolError> {
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&[][..]]
        } else {
            data.chunks(MAX_SET_DATA_CHUNK).collect()
        };
        let count = u16::try_from(chunks.len()).map_err(|_| {
            ProtocolError::MalformedPayload(format!(
                "SetData: {} bytes need {} packets, more than {}",
                data.len(),
                chunks.len(),
                u16::MAX
            ))
        })?;
        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| SetDataMessage {
                target_path: target_path.clone(),
                source_path: source_path.clone(),
                packet_number: i as u16,
                packet_count: count,
                data: chunk.to_vec(),
            })
            .collect())
    }

    pub fn is_first(&self) -> bool {
        self.packet_number == 0
    }

    pub fn is_last(&self) -> bool {
        self.packet_number.saturating_add(1) == self.packet_count
    }
}

// ── Event ─────────────────────────────────────────────────────────────────────

/// Sixteen-bit event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub u16);

impl EventId {
    pub const SETUP_BUTTON: EventId = EventId(0x0064);
    pub const PREVIOUS: EventId = EventId(0x0067);
    pub const NEXT: EventId = EventId(0x0068);
    pub const PLAY: EventId = EventId(0x0073);
    pub const VOLUME_UP: EventId = EventId(0x007F);
    pub const VOLUME_DOWN: EventId = EventId(0x0080);
    pub const POWER_TOGGLE: EventId = EventId(0x0089);
    pub const ZONE_ON_OFF: EventId = EventId(0x00DC);
    pub const ALL_ON_OFF: EventId = EventId(0x00DD);
    pub const SOURCE_SELECT: EventId = EventId(0x00F1);
}

/// EVENT (0x05): a key press or command delivered to a device path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    pub target_path: Path,
    pub source_path: Path,
    pub event_id: EventId,
    /// First data word (event timestamp on keypad-originated events).
    pub data1: u16,
    /// Second data word (event argument, e.g. a source or volume level).
    pub data2: u16,
    /// Event priority byte.
    pub data3: u8,
}

impl EventMessage {
    /// An event with zeroed data words and the given priority byte.
    pub fn new(target_path: Path, event_id: EventId, priority: Priority) -> Self {
        Self {
            target_path,
            source_path: Path::root(),
            event_id,
            data1: 0,
            data2: 0,
            data3: priority.as_byte(),
        }
    }
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// Any RNET message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    SetData(SetDataMessage),
    RequestData(RequestDataMessage),
    Handshake(HandshakeMessage),
    Event(EventMessage),
    /// A message type this library does not interpret; the body is kept raw.
    Unknown { message_type: u8, body: Vec<u8> },
}

impl Message {
    /// Returns the wire message type byte.
    pub fn message_type_byte(&self) -> u8 {
        match self {
            Message::SetData(_) => MessageType::SetData as u8,
            Message::RequestData(_) => MessageType::RequestData as u8,
            Message::Handshake(_) => MessageType::Handshake as u8,
            Message::Event(_) => MessageType::Event as u8,
            Message::Unknown { message_type, .. } => *message_type,
        }
    }

    /// Path the message is addressed to inside the target device, if any.
    pub fn target_path(&self) -> Option<&Path> {
        match self {
            Message::SetData(m) => Some(&m.target_path),
            Message::RequestData(m) => Some(&m.target_path),
            Message::Event(m) => Some(&m.target_path),
            Message::Handshake(_) | Message::Unknown { .. } => None,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Message::SetData(_) => "SetData",
            Message::RequestData(_) => "RequestData",
            Message::Handshake(_) => "Handshake",
            Message::Event(_) => "Event",
            Message::Unknown { .. } => "Unknown",
        }
    }
}

/// A message together with the addresses it travels between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub target: DeviceAddress,
    pub source: DeviceAddress,
    pub message: Message,
}

impl Envelope {
    pub fn new(target: DeviceAddress, source: DeviceAddress, message: Message) -> Self {
        Self {
            target,
            source,
            message,
        }
    }
}
