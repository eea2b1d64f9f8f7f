//! Result codes exchanged with the kernel and with services.
//!
//! Horizon result codes are 32-bit values where zero means success. A non-zero
//! code is split into a module and a description:
//!
//! - **Bits 0-8:** Module ID
//! - **Bits 9-21:** Description
//! - **Bits 22-31:** Reserved
//!
//! Errors raised by this crate are reported in [`MODULE`] so that C callers
//! (see the `ffi` feature) receive a code in the same format as kernel and
//! service failures.
//!
//! # References
//! - [Switchbrew Wiki: Error Codes](https://switchbrew.org/wiki/Error_codes)

/// Successful result code
const SUCCESS: u32 = 0;

/// Mask for the module field (9 bits)
const MODULE_MASK: u32 = 0x1FF;
/// Mask for the description field (13 bits)
const DESCRIPTION_MASK: u32 = 0x1FFF;
/// Shift amount for the description field
const DESCRIPTION_SHIFT: u32 = 9;

/// Module ID used for errors raised by the IPC codec itself.
pub const MODULE: u32 = 346;

/// A raw Horizon OS result code.
///
/// Wraps the `u32` returned by the kernel's synchronous request call and the
/// status word carried in `"SFCO"` replies.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
#[repr(transparent)]
pub struct ResultCode(u32);

impl ResultCode {
    /// The success code (`0`).
    pub const SUCCESS: Self = Self(SUCCESS);

    /// Creates a new [`ResultCode`] from a raw value
    #[inline]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Get the raw value of the [`ResultCode`]
    #[inline]
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// Creates a new [`ResultCode`] from a module and description
    #[inline]
    pub const fn from_parts(module: u32, description: u32) -> Self {
        let module_val = module & MODULE_MASK;
        let desc_val = (description & DESCRIPTION_MASK) << DESCRIPTION_SHIFT;
        Self(module_val | desc_val)
    }

    /// Returns true if the [`ResultCode`] represents a success
    #[inline]
    pub const fn is_success(&self) -> bool {
        self.0 == SUCCESS
    }

    /// Returns the module that produced the code
    #[inline]
    pub const fn module(&self) -> u32 {
        self.0 & MODULE_MASK
    }

    /// Returns the description value
    #[inline]
    pub const fn description(&self) -> u32 {
        (self.0 >> DESCRIPTION_SHIFT) & DESCRIPTION_MASK
    }
}

impl From<u32> for ResultCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for ResultCode {
    /// Formats the code as a `2XXX-YYYY` string.
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04}-{:04}", 2000 + self.module(), self.description())
    }
}

impl core::fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResultCode")
            .field("code", &format_args!("{}", self))
            .field("module", &self.module())
            .field("description", &self.description())
            .field("raw", &format_args!("{:#x}", self.0))
            .finish()
    }
}

/// Conversion of an error into the raw result code reported across the C ABI.
pub trait ToRawResultCode {
    /// Consumes the error and returns its raw result code.
    fn to_rc(self) -> ResultCode;
}
