//! Horizon kernel transport.
//!
//! The kernel reads the request from, and writes the reply to, the first
//! 0x100 bytes of the calling thread's TLS block. Callers that encode
//! directly into [`ipc_buffer`] avoid the copies [`Kernel`] otherwise makes.
//!
//! # References
//!
//! - [Switchbrew SVC: SendSyncRequest](https://switchbrew.org/wiki/SVC#SendSyncRequest)
//! - [Switchbrew Thread Local Region](https://switchbrew.org/wiki/Thread_Local_Region)

use core::{arch::naked_asm, ptr, slice};

use super::Transport;
use crate::{Handle, layout::MAX_MESSAGE_WORDS, result::ResultCode};

/// Syscall code of `svcSendSyncRequest`.
const SEND_SYNC_REQUEST: u32 = 0x21;

/// Number of words in the IPC message buffer.
pub const IPC_BUFFER_WORDS: usize = MAX_MESSAGE_WORDS;

/// Transport issuing `svcSendSyncRequest` on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Kernel;

impl Transport for Kernel {
    fn send_sync_request(
        &mut self,
        session: Handle,
        message: &mut [u32],
    ) -> Result<(), ResultCode> {
        // SAFETY: Reading the TLS base register has no side effects.
        let tls = unsafe { tpidrro_el0() } as *mut u32;
        let in_place = ptr::eq(message.as_ptr(), tls);
        let len = message.len().min(IPC_BUFFER_WORDS);

        if !in_place {
            // SAFETY: The TLS message buffer holds IPC_BUFFER_WORDS words.
            unsafe { ptr::copy(message.as_ptr(), tls, len) };
        }

        // SAFETY: The request has been placed in the TLS message buffer.
        let rc = unsafe { send_sync_request(session) };

        if !in_place {
            // SAFETY: The kernel wrote the reply into the TLS message buffer.
            unsafe { ptr::copy(tls, message.as_mut_ptr(), len) };
        }

        if rc.is_success() { Ok(()) } else { Err(rc) }
    }
}

/// Returns the calling thread's IPC message buffer.
///
/// # Safety
///
/// The returned slice aliases thread-local memory. The caller must not hold
/// two live references to it, and must not send it to another thread.
pub unsafe fn ipc_buffer() -> &'static mut [u32] {
    // SAFETY: TPIDRRO_EL0 holds the base of this thread's TLS block, whose
    // first 0x100 bytes are the word-aligned message buffer.
    unsafe {
        let base = tpidrro_el0() as *mut u32;
        slice::from_raw_parts_mut(base, IPC_BUFFER_WORDS)
    }
}

/// Reads the `tpidrro_el0` system register (TLS base of the current thread).
///
/// # Safety
///
/// Only valid on AArch64 Horizon threads.
#[unsafe(naked)]
unsafe extern "C" fn tpidrro_el0() -> usize {
    naked_asm!(
        "mrs x0, tpidrro_el0", // Move the value of `tpidrro_el0` into the return register `x0`
        "ret",
    );
}

/// Sends the message in the TLS buffer on `session` and waits for the reply.
///
/// `Result svcSendSyncRequest(Handle session);`
///
/// # Safety
///
/// `session` must be a session handle owned by the current process.
#[unsafe(naked)]
unsafe extern "C" fn send_sync_request(session: Handle) -> ResultCode {
    naked_asm!(
        "svc {code}", // Issue the SVC call with immediate value 0x21
        "ret",
        code = const SEND_SYNC_REQUEST,
    );
}
