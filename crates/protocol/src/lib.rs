//! Wire protocol for the channel-organized file server.
//!
//! Two interleaved framings share one TCP socket: newline-delimited JSON
//! control frames ([`Message`]) and raw binary chunk regions delimited by the
//! sizes negotiated in the surrounding frames. [`MessageReader`] and
//! [`MessageWriter`] implement both under per-operation deadlines.

#![deny(unsafe_code)]

mod error;
mod io;
mod message;
mod payload;
mod state;

pub use error::ProtocolError;
pub use io::{MessageReader, MessageWriter, DEFAULT_BUFFER_SIZE};
pub use message::{Message, Response};
pub use payload::{
    Action, Channel, ErrorPayload, StartPayload, StreamPayload, UpdatePayload, DEF_CHANNEL,
};
pub use state::State;
