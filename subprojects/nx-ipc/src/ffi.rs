//! FFI bindings for the IPC codec.
//!
//! Exposes the encoder and decoder to C callers that own the message buffer
//! and the kernel call themselves.
//!
//! # Naming Convention
//!
//! FFI exports follow the pattern: `__nx_ipc__<fn_name>`

use core::{ptr, slice};

use crate::{
    Handle,
    buffer::MemoryBuffer,
    request::{self, IpcRequest},
    response::{self, ResponseShape},
    result::{ResultCode, ToRawResultCode},
};

/// C layout of an [`IpcRequest`].
///
/// Every pointer may be null when its length is zero.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawRequest {
    pub request_type: u32,
    pub request_id: u32,
    pub raw_data: *const u32,
    pub raw_data_len: usize,
    pub buffers: *const MemoryBuffer,
    pub num_buffers: usize,
    pub copy_handles: *const Handle,
    pub num_copy_handles: usize,
    pub move_handles: *const Handle,
    pub num_move_handles: usize,
    pub send_pid: bool,
}

/// C layout of a [`ResponseShape`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawResponseFormat {
    pub raw_data_len: usize,
    pub num_copy_handles: usize,
    pub num_move_handles: usize,
    pub has_pid: bool,
}

impl From<RawResponseFormat> for ResponseShape {
    fn from(format: RawResponseFormat) -> Self {
        Self {
            raw_data_len: format.raw_data_len,
            num_copy_handles: format.num_copy_handles,
            num_move_handles: format.num_move_handles,
            has_pid: format.has_pid,
        }
    }
}

/// C layout of a decoded [`Response`](crate::response::Response).
///
/// The pointers borrow from the message buffer passed to
/// [`__nx_ipc__unmarshal`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawResponse {
    pub pid: u64,
    pub has_pid: bool,
    pub raw_data: *const u32,
    pub raw_data_len: usize,
    pub copy_handles: *const Handle,
    pub num_copy_handles: usize,
    pub move_handles: *const Handle,
    pub num_move_handles: usize,
}

/// Encodes `request` into the `len`-word buffer at `buffer`.
///
/// On success, the number of words written is stored in `out_len` if it is
/// not null.
///
/// # Safety
///
/// - `buffer` must be valid for writes of `len` words.
/// - `request` must point to a valid [`RawRequest`] whose pointers are valid
///   for reads of their lengths.
/// - `out_len` must be null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __nx_ipc__marshal(
    buffer: *mut u32,
    len: usize,
    request: *const RawRequest,
    out_len: *mut usize,
) -> u32 {
    // SAFETY: Caller guarantees request points to a valid RawRequest.
    let raw = unsafe { &*request };

    // SAFETY: Caller guarantees each pointer is valid for its length.
    let request = unsafe {
        IpcRequest {
            request_type: raw.request_type,
            request_id: raw.request_id,
            raw_data: slice_or_empty(raw.raw_data, raw.raw_data_len),
            buffers: slice_or_empty(raw.buffers, raw.num_buffers),
            copy_handles: slice_or_empty(raw.copy_handles, raw.num_copy_handles),
            move_handles: slice_or_empty(raw.move_handles, raw.num_move_handles),
            send_pid: raw.send_pid,
        }
    };

    // SAFETY: Caller guarantees buffer is valid for len words.
    let message = unsafe { slice_or_empty_mut(buffer, len) };

    match request::marshal(message, &request) {
        Ok(written) => {
            if !out_len.is_null() {
                // SAFETY: out_len is non-null and valid per caller contract.
                unsafe { *out_len = written };
            }
            ResultCode::SUCCESS.to_raw()
        }
        Err(err) => err.to_rc().to_raw(),
    }
}

/// Decodes the reply in the `len`-word buffer at `buffer` against `format`.
///
/// On success, the decoded reply is stored in `out`. The reply status is
/// returned unchanged when it is non-zero.
///
/// # Safety
///
/// - `buffer` must be valid for reads of `len` words, and stay valid while
///   the pointers stored in `out` are in use.
/// - `format` must point to a valid [`RawResponseFormat`].
/// - `out` must be valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __nx_ipc__unmarshal(
    buffer: *const u32,
    len: usize,
    format: *const RawResponseFormat,
    out: *mut RawResponse,
) -> u32 {
    // SAFETY: Caller guarantees format points to a valid RawResponseFormat.
    let shape = ResponseShape::from(unsafe { *format });

    // SAFETY: Caller guarantees buffer is valid for len words.
    let message = unsafe { slice_or_empty(buffer, len) };

    match response::unmarshal(message, &shape) {
        Ok(response) => {
            let raw = RawResponse {
                pid: response.pid.unwrap_or_default(),
                has_pid: response.pid.is_some(),
                raw_data: response.raw_data.as_ptr(),
                raw_data_len: response.raw_data.len(),
                copy_handles: response.copy_handles.as_ptr(),
                num_copy_handles: response.copy_handles.len(),
                move_handles: response.move_handles.as_ptr(),
                num_move_handles: response.move_handles.len(),
            };
            // SAFETY: Caller guarantees out is valid for writes.
            unsafe { ptr::write(out, raw) };
            ResultCode::SUCCESS.to_raw()
        }
        Err(err) => err.to_rc().to_raw(),
    }
}

/// Builds a slice from a C pointer/length pair, treating null as empty.
///
/// # Safety
///
/// If `ptr` is non-null it must be valid for reads of `len` elements.
unsafe fn slice_or_empty<'a, T>(ptr: *const T, len: usize) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        // SAFETY: ptr is non-null and valid per caller contract.
        unsafe { slice::from_raw_parts(ptr, len) }
    }
}

/// Mutable counterpart of [`slice_or_empty`].
///
/// # Safety
///
/// If `ptr` is non-null it must be valid for writes of `len` elements.
unsafe fn slice_or_empty_mut<'a, T>(ptr: *mut T, len: usize) -> &'a mut [T] {
    if ptr.is_null() || len == 0 {
        &mut []
    } else {
        // SAFETY: ptr is non-null and valid per caller contract.
        unsafe { slice::from_raw_parts_mut(ptr, len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        layout::IN_HEADER_MAGIC,
        response::{Reply, marshal_reply},
    };

    fn raw_request(payload: &[u32]) -> RawRequest {
        RawRequest {
            request_type: 5,
            request_id: 0x42,
            raw_data: payload.as_ptr(),
            raw_data_len: payload.len(),
            buffers: ptr::null(),
            num_buffers: 0,
            copy_handles: ptr::null(),
            num_copy_handles: 0,
            move_handles: ptr::null(),
            num_move_handles: 0,
            send_pid: false,
        }
    }

    #[test]
    fn marshal_export_writes_message() {
        let payload = [0xAAAA, 0xBBBB];
        let request = raw_request(&payload);
        let mut message = [0u32; 64];
        let mut written = 0usize;

        let rc = unsafe {
            __nx_ipc__marshal(message.as_mut_ptr(), message.len(), &request, &mut written)
        };

        assert_eq!(rc, 0);
        assert_eq!(written, 12);
        assert_eq!(message[4], IN_HEADER_MAGIC);
        assert_eq!(&message[8..10], &payload);
    }

    #[test]
    fn marshal_export_reports_error_code() {
        let mut request = raw_request(&[]);
        request.request_type = 0x1_0000;
        let mut message = [0u32; 64];

        let rc = unsafe {
            __nx_ipc__marshal(message.as_mut_ptr(), message.len(), &request, ptr::null_mut())
        };

        assert_eq!(rc, Error::InvalidRequestType.to_rc().to_raw());
    }

    #[test]
    fn unmarshal_export_borrows_from_buffer() {
        let mut message = [0u32; 64];
        marshal_reply(
            &mut message,
            &Reply {
                raw_data: &[3, 4],
                copy_handles: &[0x77],
                ..Default::default()
            },
        )
        .unwrap();
        let format = RawResponseFormat {
            raw_data_len: 2,
            num_copy_handles: 1,
            ..Default::default()
        };
        let mut out = core::mem::MaybeUninit::<RawResponse>::uninit();

        let rc = unsafe {
            __nx_ipc__unmarshal(message.as_ptr(), message.len(), &format, out.as_mut_ptr())
        };

        assert_eq!(rc, 0);
        let out = unsafe { out.assume_init() };
        assert!(!out.has_pid);
        assert_eq!(unsafe { slice::from_raw_parts(out.raw_data, out.raw_data_len) }, &[3, 4]);
        assert_eq!(out.num_copy_handles, 1);
        assert_eq!(unsafe { *out.copy_handles }, 0x77);
    }

    #[test]
    fn unmarshal_export_passes_service_status_through() {
        let status = ResultCode::from_parts(2, 1002);
        let mut message = [0u32; 64];
        marshal_reply(
            &mut message,
            &Reply {
                status,
                ..Default::default()
            },
        )
        .unwrap();
        let format = RawResponseFormat::default();
        let mut out = core::mem::MaybeUninit::<RawResponse>::uninit();

        let rc = unsafe {
            __nx_ipc__unmarshal(message.as_ptr(), message.len(), &format, out.as_mut_ptr())
        };

        assert_eq!(rc, status.to_raw());
    }
}
