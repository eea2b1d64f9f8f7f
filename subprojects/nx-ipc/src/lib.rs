//! HIPC message marshalling for Nintendo Switch
//!
//! This crate encodes IPC requests into the fixed word layout consumed by the
//! Horizon kernel's synchronous request call, and decodes the reply the kernel
//! writes back into the same buffer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────┐
//! │  Service call               │  IpcRequest + ResponseShape
//! ├─────────────────────────────┤
//! │  Encoder / Decoder          │  request::marshal, response::unmarshal
//! ├─────────────────────────────┤
//! │  Transport                  │  session::Transport (SendSyncRequest)
//! └─────────────────────────────┘
//! ```
//!
//! - [`buffer`] classifies memory buffers into the four descriptor kinds.
//! - [`layout`] holds the bit-exact wire structures and the word cursors.
//! - [`request`] and [`response`] encode and decode messages.
//! - [`session`] sequences one call over a [`Transport`](session::Transport).
//!
//! A request carries at most 16 buffers of each kind and fewer than 16 copy
//! and move handles. The data section always starts on a 16-byte boundary and
//! begins with the `"SFCI"` (request) or `"SFCO"` (reply) tag.

#![no_std]

pub mod buffer;
pub mod error;
pub mod layout;
pub mod request;
pub mod response;
pub mod result;
pub mod session;

#[cfg(feature = "ffi")]
pub mod ffi;

/// A raw kernel object handle.
pub type Handle = u32;

pub use self::{
    buffer::{BufferKind, MemoryBuffer},
    error::Error,
    request::{IpcRequest, marshal},
    response::{Response, ResponseShape, unmarshal},
    result::{ResultCode, ToRawResultCode},
    session::{Session, Transport},
};
