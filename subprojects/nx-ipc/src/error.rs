//! Errors raised by the IPC codec.

use crate::result::{MODULE, ResultCode, ToRawResultCode};

/// Error returned by the IPC codec and the call driver.
///
/// Every check is fail-fast: the first violated invariant aborts the whole
/// operation. After an encoding error the message buffer is in an undefined,
/// partially written state and must not be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A buffer uses the extended layout or an invalid direction/family pair.
    #[error("unsupported buffer kind")]
    UnsupportedBufferKind,
    /// More buffers of one kind than the header can describe.
    #[error("too many buffers")]
    TooManyBuffers,
    /// The request type does not fit the 16-bit message type field.
    #[error("invalid request type")]
    InvalidRequestType,
    /// Sixteen or more copy or move handles.
    #[error("too many handles")]
    TooManyHandles,
    /// A buffer address is out of range for its descriptor.
    #[error("invalid buffer address")]
    InvalidBufferAddress,
    /// A buffer size is out of range for its descriptor.
    #[error("invalid buffer size")]
    InvalidBufferSize,
    /// The protection bits of a buffer kind do not fit the mode field.
    #[error("invalid buffer protection")]
    InvalidProtection,
    /// The payload does not fit the 10-bit raw data size field.
    #[error("raw data too large")]
    RawDataTooLarge,
    /// The message buffer is too small for the encoded message.
    #[error("message too large for buffer")]
    MessageTooLarge,
    /// The reply is a request, not a plain response.
    #[error("invalid IPC response type")]
    InvalidResponseType,
    /// The reply data section does not start with `"SFCO"`.
    #[error("invalid IPC response magic")]
    InvalidResponseMagic,
    /// The reply describes more words than the buffer holds.
    #[error("truncated IPC response")]
    Truncated,
    /// The reply payload length differs from the expected shape.
    #[error("unexpected raw data size")]
    UnexpectedRawDataSize,
    /// The reply pid presence differs from the expected shape.
    #[error("unexpected pid")]
    UnexpectedPid,
    /// The reply copy handle count differs from the expected shape.
    #[error("unexpected copy handles")]
    UnexpectedCopyHandles,
    /// The reply move handle count differs from the expected shape.
    #[error("unexpected move handles")]
    UnexpectedMoveHandles,
    /// The service replied with a non-zero status.
    #[error("service error: {0}")]
    Service(ResultCode),
    /// The synchronous request itself failed.
    #[error("kernel error: {0}")]
    Kernel(ResultCode),
}

impl Error {
    /// Returns the description value used for this error in [`MODULE`].
    ///
    /// Passthrough variants have no description of their own and return
    /// `None`.
    pub const fn description(&self) -> Option<u32> {
        let desc = match self {
            Self::UnsupportedBufferKind => 1,
            Self::TooManyBuffers => 2,
            Self::InvalidRequestType => 3,
            Self::TooManyHandles => 4,
            Self::InvalidBufferAddress => 5,
            Self::InvalidBufferSize => 6,
            Self::InvalidProtection => 7,
            Self::RawDataTooLarge => 8,
            Self::MessageTooLarge => 9,
            Self::InvalidResponseType => 10,
            Self::InvalidResponseMagic => 11,
            Self::Truncated => 12,
            Self::UnexpectedRawDataSize => 13,
            Self::UnexpectedPid => 14,
            Self::UnexpectedCopyHandles => 15,
            Self::UnexpectedMoveHandles => 16,
            Self::Service(_) | Self::Kernel(_) => return None,
        };
        Some(desc)
    }
}

impl ToRawResultCode for Error {
    fn to_rc(self) -> ResultCode {
        match self {
            Self::Service(rc) | Self::Kernel(rc) => rc,
            other => ResultCode::from_parts(MODULE, other.description().unwrap_or_default()),
        }
    }
}
