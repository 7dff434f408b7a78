//! # rnet-core
//!
//! Codec and device-state primitives for the Russound RNET bus.
//!
//! This crate knows nothing about sockets or serial ports.  It turns typed
//! messages into framed bytes and back, and keeps the reassembled values that
//! devices publish in multi-packet transfers.
//!
//! - **`protocol`** – device addresses, in-device paths, the escaped and
//!   checksummed frame format, and the typed [`Message`] model.  The
//!   [`FrameDecoder`] pulls frames out of an arbitrary byte stream and
//!   resynchronises on garbage.
//!
//! - **`domain`** – [`BufferStore`], the per-device, per-path buffers that
//!   turn a run of SetData packets into one complete value.

pub mod domain;
pub mod protocol;

pub use domain::path_buffer::{BufferError, BufferState, BufferStore, DeviceBuffers, PathBuffer};
pub use protocol::address::DeviceAddress;
pub use protocol::codec::{decode_bytes, decode_message, encode_message, ProtocolError};
pub use protocol::frame::{Frame, FrameDecoder};
pub use protocol::messages::{
    EventId, EventMessage, Envelope, HandshakeKind, HandshakeMessage, Message, MessageType,
    Priority, RequestDataMessage, SetDataMessage,
};
pub use protocol::path::Path;
