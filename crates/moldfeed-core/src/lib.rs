//! moldfeed-core: MoldUDP64 wire format, message layouts, field decoding
//! and sequence tracking. No I/O beyond loading config and layout files.
//! All other moldfeed crates depend on this one.

pub mod config;
pub mod decode;
pub mod layout;
pub mod sequence;
pub mod wire;

pub use decode::{decode_message, DecodeStatus, DecodedMessage, FieldValue};
pub use layout::{FieldKind, FieldSpec, MessageSpec, MessageTable};
pub use sequence::{SequenceTracker, Sequencing};
pub use wire::{FramedMessage, Frames, PacketHeader, SessionId, WireError};
