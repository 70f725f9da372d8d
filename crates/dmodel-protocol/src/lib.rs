//! Wire protocol for dmodel.
//!
//! Defines the request/reply message pairs exchanged with a remote debugging
//! engine, the envelope that correlates a reply with its request, and the
//! frame codec used when envelopes travel over a byte stream.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::FrameCodec;
pub use error::{ProtocolError, ProtocolResult};
pub use message::{
    error_codes, DbgMessage, Envelope, ObjectDescriptor, MAX_MESSAGE_SIZE, NOTIFICATION_ID,
};
