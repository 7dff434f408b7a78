//! RNET wire protocol: addresses, paths, framing and the message codec.

pub mod address;
pub mod codec;
pub mod frame;
pub mod messages;
pub mod path;
pub mod sequence;

pub use address::DeviceAddress;
pub use codec::{decode_bytes, decode_message, encode_frame, encode_message, ProtocolError};
pub use frame::{Frame, FrameDecoder};
pub use messages::*;
pub use path::{Path, MAX_PATH_LEN};
pub use sequence::SequenceCounter;
