//! Wire layout of IPC messages.
//!
//! A message is a flat array of little-endian 32-bit words written to the
//! thread's IPC buffer. The kernel reads the request from it and writes the
//! reply back in place.
//!
//! # Message Layout
//!
//! ```text
//! Offset (words)  Field
//! ──────────────────────────────────────────────────────────────
//! 0               Header word 0 (type, X/A/B/W counts)
//! 1               Header word 1 (raw size, C flag, handle flag)
//! 2 (optional)    Handle descriptor (pid flag, handle counts)
//! +2 (optional)   Process ID (kernel-filled on send)
//! var             Copy handles (1 word each)
//! var             Move handles (1 word each)
//! var             X descriptors (2 words each)
//! var             A descriptors, then B descriptors (3 words each)
//! aligned(4)      "SFCI"/"SFCO", 0, request id / status, 0
//! var             Raw payload words
//! var             Padding (pre + post padding = 0x10 bytes)
//! var             C size list (packed u16, word-rounded)
//! var             C descriptors (2 words each)
//! ──────────────────────────────────────────────────────────────
//! ```
//!
//! # Address Encoding
//!
//! Addresses and sizes are split across bitfields:
//!
//! **X descriptor (2 words):**
//! ```text
//! Bits 0-5:   index
//! Bits 6-8:   address[36:38]
//! Bits 9-11:  index[9:11]
//! Bits 12-15: address[32:35]
//! Bits 16-31: size (16 bits)
//! Bits 32-63: address[0:31]
//! ```
//!
//! **A/B descriptor (3 words):**
//! ```text
//! Bits 0-31:  size[0:31]
//! Bits 32-63: address[0:31]
//! Bits 64-65: mode
//! Bits 66-87: address[36:57]
//! Bits 88-91: size[32:35]
//! Bits 92-95: address[32:35]
//! ```
//!
//! **C descriptor (2 words):**
//! ```text
//! Bits 0-31:  address[0:31]
//! Bits 32-47: address[32:47]
//! Bits 48-63: size (16 bits)
//! ```
//!
//! # References
//!
//! - [Switchbrew IPC Marshalling](https://switchbrew.org/wiki/IPC_Marshalling)

use core::mem::size_of;

use modular_bitfield::prelude::*;
use static_assertions::const_assert_eq;

use crate::{Handle, error::Error};

/// Magic tag opening a request data section (`"SFCI"`).
pub const IN_HEADER_MAGIC: u32 = u32::from_le_bytes(*b"SFCI");

/// Magic tag opening a reply data section (`"SFCO"`).
pub const OUT_HEADER_MAGIC: u32 = u32::from_le_bytes(*b"SFCO");

const_assert_eq!(IN_HEADER_MAGIC, 0x49434653);
const_assert_eq!(OUT_HEADER_MAGIC, 0x4F434653);

/// Message type of a plain response.
pub const RESPONSE_TYPE: u16 = 0;

/// Maximum number of buffers of each kind in one message.
pub const MAX_BUFFERS_PER_KIND: usize = 16;

/// Copy and move handle counts must stay below this limit.
pub const MAX_HANDLES: usize = 16;

/// The data section sub-header is aligned to this many words.
pub const DATA_ALIGN_WORDS: usize = 4;

/// Padding words around the sub-header (before + after = 0x10 bytes).
pub const DATA_PADDING_WORDS: usize = 4;

/// Words of the data section sub-header (magic, reserved, id/status, reserved).
pub const DATA_HEADER_WORDS: usize = 4;

/// Words the raw size field counts beyond the payload.
pub const RAW_DATA_OVERHEAD: usize = DATA_PADDING_WORDS + DATA_HEADER_WORDS;

/// Size of the kernel's IPC message buffer in words (0x100 bytes).
pub const MAX_MESSAGE_WORDS: usize = 0x100 / size_of::<u32>();

/// Largest value of the 10-bit raw size field.
const MAX_RAW_DATA_WORDS: usize = 0x3FF;

/// Buffer transfer mode stored in A/B descriptors.
#[derive(BitfieldSpecifier, Debug, Clone, Copy, PartialEq, Eq)]
#[bits = 2]
pub enum BufferMode {
    /// Normal buffer mapping.
    Normal = 0,
    /// Non-secure memory area.
    NonSecure = 1,
    /// Invalid/device memory (cannot be mapped).
    Invalid = 2,
    /// Non-device memory area.
    NonDevice = 3,
}

impl BufferMode {
    /// Parses the mode from its 2-bit raw value.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Normal),
            1 => Some(Self::NonSecure),
            2 => Some(Self::Invalid),
            3 => Some(Self::NonDevice),
            _ => None,
        }
    }
}

/// Message header (2 words).
#[bitfield]
#[derive(Debug, Clone, Copy, Default)]
pub struct Header {
    /// Message type. The request opcode, or zero for a response.
    pub message_type: B16,
    /// Number of X descriptors.
    pub num_send_statics: B4,
    /// Number of A descriptors.
    pub num_send_buffers: B4,
    /// Number of B descriptors.
    pub num_recv_buffers: B4,
    /// Number of W descriptors.
    pub num_exch_buffers: B4,
    /// Raw data section size in words.
    pub num_data_words: B10,
    /// C descriptor flag (0 = none, 2 = one, 2+n = n entries).
    pub recv_static_mode: B4,
    #[skip]
    __padding: B6,
    /// Offset to receive list (unused).
    pub recv_list_offset: B11,
    /// Whether a handle descriptor follows.
    pub has_special_header: bool,
}

const_assert_eq!(size_of::<Header>(), 8);

/// Handle descriptor (1 word).
///
/// Present when the message carries a pid or any handles.
#[bitfield]
#[derive(Debug, Clone, Copy, Default)]
pub struct HandleDescriptor {
    /// Whether a process ID follows.
    pub send_pid: bool,
    /// Number of copy handles.
    pub num_copy_handles: B4,
    /// Number of move handles.
    pub num_move_handles: B4,
    #[skip]
    __padding: B23,
}

const_assert_eq!(size_of::<HandleDescriptor>(), 4);

/// X descriptor (2 words).
#[bitfield]
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticDescriptor {
    /// Running index of the descriptor.
    pub index: B6,
    /// Address bits 36-38, index bits 9-11 above them.
    pub address_high: B6,
    /// Address bits 32-35.
    pub address_mid: B4,
    /// Size of the buffer.
    pub size: B16,
    /// Address bits 0-31.
    pub address_low: B32,
}

const_assert_eq!(size_of::<StaticDescriptor>(), 8);

impl StaticDescriptor {
    /// Creates the descriptor of the `index`-th X buffer.
    pub fn new_send(address: u64, size: u16, index: usize) -> Self {
        let address_high = ((address >> 36) & 0b111) | (((index as u64 >> 9) & 0b111) << 3);
        Self::new()
            .with_index((index & 0x3F) as u8)
            .with_address_low(address as u32)
            .with_address_mid(((address >> 32) & 0xF) as u8)
            .with_address_high(address_high as u8)
            .with_size(size)
    }

    /// Reconstructs the address from the split fields.
    pub fn address(&self) -> u64 {
        self.address_low() as u64
            | ((self.address_mid() as u64) << 32)
            | (((self.address_high() & 0b111) as u64) << 36)
    }
}

/// A/B/W descriptor (3 words).
#[bitfield]
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferDescriptor {
    /// Size bits 0-31.
    pub size_low: B32,
    /// Address bits 0-31.
    pub address_low: B32,
    /// Buffer mode.
    pub mode: BufferMode,
    /// Address bits 36-57.
    pub address_high: B22,
    /// Size bits 32-35.
    pub size_high: B4,
    /// Address bits 32-35.
    pub address_mid: B4,
}

const_assert_eq!(size_of::<BufferDescriptor>(), 12);

impl BufferDescriptor {
    /// Creates a buffer descriptor with the given mode.
    pub fn new_buffer(address: u64, size: u64, mode: BufferMode) -> Self {
        Self::new()
            .with_mode(mode)
            .with_address_low(address as u32)
            .with_address_mid(((address >> 32) & 0xF) as u8)
            .with_address_high(((address >> 36) & 0x3FFFFF) as u32)
            .with_size_low(size as u32)
            .with_size_high(((size >> 32) & 0xF) as u8)
    }

    /// Reconstructs the address from the split fields.
    pub fn address(&self) -> u64 {
        self.address_low() as u64
            | ((self.address_mid() as u64) << 32)
            | ((self.address_high() as u64) << 36)
    }

    /// Reconstructs the size from the split fields.
    pub fn size(&self) -> u64 {
        self.size_low() as u64 | ((self.size_high() as u64) << 32)
    }
}

/// C descriptor (2 words).
#[bitfield]
#[derive(Debug, Clone, Copy, Default)]
pub struct RecvListEntry {
    /// Address bits 0-31.
    pub address_low: B32,
    /// Address bits 32-47.
    pub address_high: B16,
    /// Size of the buffer.
    pub size: B16,
}

const_assert_eq!(size_of::<RecvListEntry>(), 8);

impl RecvListEntry {
    /// Creates a C descriptor.
    pub fn new_recv(address: u64, size: u16) -> Self {
        Self::new()
            .with_address_low(address as u32)
            .with_address_high(((address >> 32) & 0xFFFF) as u16)
            .with_size(size)
    }

    /// Reconstructs the address from the split fields.
    pub fn address(&self) -> u64 {
        self.address_low() as u64 | ((self.address_high() as u64) << 32)
    }
}

macro_rules! impl_words {
    ($ty:ty, $words:literal) => {
        impl $ty {
            /// Number of message words this structure occupies.
            pub const WORDS: usize = $words;

            /// Splits the structure into little-endian message words.
            pub fn to_words(self) -> [u32; $words] {
                bytes_to_words(&self.into_bytes())
            }

            /// Reassembles the structure from little-endian message words.
            pub fn from_words(words: [u32; $words]) -> Self {
                Self::from_bytes(words_to_bytes(&words))
            }
        }
    };
}

impl_words!(Header, 2);
impl_words!(HandleDescriptor, 1);
impl_words!(StaticDescriptor, 2);
impl_words!(BufferDescriptor, 3);
impl_words!(RecvListEntry, 2);

fn bytes_to_words<const W: usize>(bytes: &[u8]) -> [u32; W] {
    let mut words = [0u32; W];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

fn words_to_bytes<const B: usize>(words: &[u32]) -> [u8; B] {
    let mut bytes = [0u8; B];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    bytes
}

/// Returns the words needed to align `offset` up to [`DATA_ALIGN_WORDS`].
#[inline]
pub const fn padding_to_align(offset: usize) -> usize {
    offset.next_multiple_of(DATA_ALIGN_WORDS) - offset
}

/// Returns the raw size field for a payload of `payload_words` words.
pub fn raw_data_size(payload_words: usize) -> Result<u16, Error> {
    payload_words
        .checked_add(RAW_DATA_OVERHEAD)
        .filter(|size| *size <= MAX_RAW_DATA_WORDS)
        .map(|size| size as u16)
        .ok_or(Error::RawDataTooLarge)
}

/// Returns the C descriptor flag for `num_c` C buffers.
pub fn recv_static_mode(num_c: usize) -> u32 {
    match num_c {
        0 => 0,
        1 => 2,
        n => n as u32 + 2,
    }
}

/// Contents of the two process ID words after a handle descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidSlot {
    /// No pid words.
    Absent,
    /// Two words left for the kernel to fill.
    Reserved,
    /// Two words holding this pid.
    Value(u64),
}

/// Bounded writer over a message buffer.
///
/// Every write is checked against the end of the buffer and fails with
/// [`Error::MessageTooLarge`] instead of panicking.
#[derive(Debug)]
pub struct Writer<'a> {
    words: &'a mut [u32],
    pos: usize,
}

impl<'a> Writer<'a> {
    /// Creates a writer positioned at the start of `words`.
    pub fn new(words: &'a mut [u32]) -> Self {
        Self { words, pos: 0 }
    }

    /// Current word offset.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    fn window(&mut self, count: usize) -> Result<&mut [u32], Error> {
        let start = self.pos;
        let end = start.checked_add(count).ok_or(Error::MessageTooLarge)?;
        let window = self
            .words
            .get_mut(start..end)
            .ok_or(Error::MessageTooLarge)?;
        self.pos = end;
        Ok(window)
    }

    /// Writes one word.
    pub fn put(&mut self, word: u32) -> Result<(), Error> {
        self.put_all(&[word])
    }

    /// Writes `words` in order.
    pub fn put_all(&mut self, words: &[u32]) -> Result<(), Error> {
        self.window(words.len())?.copy_from_slice(words);
        Ok(())
    }

    /// Advances past `count` words without touching them.
    pub fn skip(&mut self, count: usize) -> Result<(), Error> {
        self.window(count).map(|_| ())
    }

    /// Writes `count` zero words.
    pub fn zero(&mut self, count: usize) -> Result<(), Error> {
        self.window(count)?.fill(0);
        Ok(())
    }

    /// Zero-pads up to the data section alignment and returns the padding.
    pub fn align(&mut self) -> Result<usize, Error> {
        let padding = padding_to_align(self.pos);
        self.zero(padding)?;
        Ok(padding)
    }
}

/// Bounded reader over a message buffer.
///
/// Reads past the end of the buffer fail with [`Error::Truncated`].
#[derive(Debug)]
pub struct Reader<'a> {
    words: &'a [u32],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader positioned at the start of `words`.
    pub fn new(words: &'a [u32]) -> Self {
        Self { words, pos: 0 }
    }

    /// Current word offset.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Reads `count` words.
    pub fn take_slice(&mut self, count: usize) -> Result<&'a [u32], Error> {
        let start = self.pos;
        let end = start.checked_add(count).ok_or(Error::Truncated)?;
        let words = self.words.get(start..end).ok_or(Error::Truncated)?;
        self.pos = end;
        Ok(words)
    }

    /// Reads one word.
    pub fn take(&mut self) -> Result<u32, Error> {
        self.take_slice(1).map(|words| words[0])
    }

    /// Reads a fixed number of words.
    pub fn take_array<const N: usize>(&mut self) -> Result<[u32; N], Error> {
        let mut out = [0u32; N];
        out.copy_from_slice(self.take_slice(N)?);
        Ok(out)
    }

    /// Skips `count` words.
    pub fn skip(&mut self, count: usize) -> Result<(), Error> {
        self.take_slice(count).map(|_| ())
    }

    /// Skips to the data section alignment.
    pub fn align(&mut self) -> Result<(), Error> {
        self.skip(padding_to_align(self.pos))
    }
}

/// Writes the handle descriptor followed by the pid slot and handle words.
///
/// Fails with [`Error::TooManyHandles`] if either list has
/// [`MAX_HANDLES`] or more entries.
pub fn write_handles(
    w: &mut Writer<'_>,
    pid: PidSlot,
    copy_handles: &[Handle],
    move_handles: &[Handle],
) -> Result<(), Error> {
    if copy_handles.len() >= MAX_HANDLES || move_handles.len() >= MAX_HANDLES {
        return Err(Error::TooManyHandles);
    }

    let descriptor = HandleDescriptor::new()
        .with_send_pid(pid != PidSlot::Absent)
        .with_num_copy_handles(copy_handles.len() as u8)
        .with_num_move_handles(move_handles.len() as u8);
    w.put_all(&descriptor.to_words())?;

    match pid {
        PidSlot::Absent => {}
        PidSlot::Reserved => w.skip(2)?,
        PidSlot::Value(pid) => w.put_all(&[pid as u32, (pid >> 32) as u32])?,
    }

    w.put_all(copy_handles)?;
    w.put_all(move_handles)
}

/// Writes the aligned data section: padding, sub-header, payload, padding.
///
/// `value` is the request id on send and the status code on reply. The
/// padding before and after the sub-header always adds up to
/// [`DATA_PADDING_WORDS`].
pub fn write_data_section(
    w: &mut Writer<'_>,
    magic: u32,
    value: u32,
    payload: &[u32],
) -> Result<(), Error> {
    let pre_padding = w.align()?;
    w.put_all(&[magic, 0, value, 0])?;
    w.put_all(payload)?;
    w.zero(DATA_PADDING_WORDS - pre_padding)
}
