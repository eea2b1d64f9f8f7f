//! Synchronous request/response calls on a session.
//!
//! A call is a single-shot pipeline: the request is encoded into the message
//! buffer, the [`Transport`] hands the buffer to the kernel and blocks until
//! the reply has been written back in place, and the reply is decoded against
//! the caller's [`ResponseShape`]. Nothing is retried or batched.

use log::{debug, trace};

use crate::{
    Handle,
    error::Error,
    layout::MAX_MESSAGE_WORDS,
    request::{self, IpcRequest},
    response::{self, Response, ResponseShape},
    result::ResultCode,
};

#[cfg(target_os = "horizon")]
mod kernel;

#[cfg(target_os = "horizon")]
pub use kernel::{IPC_BUFFER_WORDS, Kernel, ipc_buffer};

/// The kernel's synchronous request primitive.
pub trait Transport {
    /// Sends the request in `message` on `session` and blocks until the reply
    /// has been written back into `message`.
    fn send_sync_request(&mut self, session: Handle, message: &mut [u32])
    -> Result<(), ResultCode>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send_sync_request(
        &mut self,
        session: Handle,
        message: &mut [u32],
    ) -> Result<(), ResultCode> {
        (**self).send_sync_request(session, message)
    }
}

/// Sends `request` on `session` and decodes the reply.
///
/// Nothing is sent if encoding fails or the encoded message exceeds
/// [`MAX_MESSAGE_WORDS`]. A transport failure is returned as
/// [`Error::Kernel`], a non-zero reply status as [`Error::Service`].
pub fn send<'m, T>(
    transport: &mut T,
    session: Handle,
    message: &'m mut [u32],
    request: &IpcRequest<'_>,
    shape: &ResponseShape,
) -> Result<Response<'m>, Error>
where
    T: Transport + ?Sized,
{
    let len = request::marshal(message, request)?;
    if len > MAX_MESSAGE_WORDS {
        debug!("message of {} words exceeds the IPC buffer", len);
        return Err(Error::MessageTooLarge);
    }
    trace!("sending {} words on session {:#x}", len, session);

    transport
        .send_sync_request(session, message)
        .map_err(Error::Kernel)?;

    let reply: &'m [u32] = message;
    response::unmarshal(reply, shape)
}

/// A client session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Session(Handle);

impl Session {
    /// Wraps a raw session handle.
    #[inline]
    pub const fn from_raw(handle: Handle) -> Self {
        Self(handle)
    }

    /// Returns the raw session handle.
    #[inline]
    pub const fn to_raw(self) -> Handle {
        self.0
    }

    /// Performs one call on this session. See [`send`].
    pub fn send<'m, T>(
        self,
        transport: &mut T,
        message: &'m mut [u32],
        request: &IpcRequest<'_>,
        shape: &ResponseShape,
    ) -> Result<Response<'m>, Error>
    where
        T: Transport + ?Sized,
    {
        send(transport, self.0, message, request, shape)
    }
}
