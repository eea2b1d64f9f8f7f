//! Memory buffers passed alongside a request, and their classification into
//! the four descriptor kinds.
//!
//! | Kind | Direction | Family   | Descriptor            |
//! |------|-----------|----------|-----------------------|
//! | A    | in        | normal   | mapped send buffer    |
//! | B    | out       | normal   | mapped receive buffer |
//! | X    | in        | pointer  | send static           |
//! | C    | out       | pointer  | receive list entry    |
//!
//! A buffer's [`BufferKind`] carries the direction and family as two 2-bit
//! fields. [`classify`] is the only place where those raw bits are turned into
//! a [`BufferClass`].

use bitflags::bitflags;

use crate::{
    error::Error,
    layout::{BufferMode, MAX_BUFFERS_PER_KIND},
};

/// Bits of a [`BufferKind`] holding the direction (`0b01` in, `0b10` out).
const DIRECTION_MASK: u32 = 0b0011;
/// Bits of a [`BufferKind`] holding the family (`0b01` normal, `0b10` pointer).
const FAMILY_MASK: u32 = 0b1100;
/// Shift of the protection bits of a [`BufferKind`].
const MODE_SHIFT: u32 = 6;

bitflags! {
    /// Buffer kind flags. Protection bits for A/B buffers sit above bit 6.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct BufferKind: u32 {
        /// Data flows into the callee.
        const IN = 1 << 0;
        /// Data flows out of the callee.
        const OUT = 1 << 1;
        /// Mapped buffer family (A/B).
        const NORMAL = 1 << 2;
        /// Pointer (exchange/indexed) family (X/C).
        const POINTER = 1 << 3;
        /// C buffer whose size goes in the u16 size list.
        const SIZE_LIST = 1 << 4;
        /// Extended layout, not supported.
        const EXTENDED = 1 << 5;

        /// Type A: mapped send buffer.
        const TYPE_A = Self::IN.bits() | Self::NORMAL.bits();
        /// Type B: mapped receive buffer.
        const TYPE_B = Self::OUT.bits() | Self::NORMAL.bits();
        /// Type X: send static.
        const TYPE_X = Self::IN.bits() | Self::POINTER.bits();
        /// Type C: receive list entry.
        const TYPE_C = Self::OUT.bits() | Self::POINTER.bits();

        // Protection bits live above bit 6.
        const _ = !0;
    }
}

impl BufferKind {
    /// Returns this kind with the given A/B mapping mode in its protection bits.
    pub const fn with_mode(self, mode: BufferMode) -> Self {
        let cleared = self.bits() & ((1 << MODE_SHIFT) - 1);
        Self::from_bits_retain(cleared | ((mode as u32) << MODE_SHIFT))
    }

    /// Returns the A/B mapping mode from the protection bits.
    ///
    /// Fails with [`Error::InvalidProtection`] if the protection value does not
    /// fit the 2-bit mode field.
    pub fn mode(self) -> Result<BufferMode, Error> {
        BufferMode::from_raw(self.bits() >> MODE_SHIFT).ok_or(Error::InvalidProtection)
    }
}

/// A region of the caller's address space passed with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct MemoryBuffer {
    /// Virtual address of the first byte.
    pub address: u64,
    /// Length in bytes.
    pub size: u64,
    /// Direction, family and flags.
    pub kind: BufferKind,
}

impl MemoryBuffer {
    /// Creates a buffer descriptor from a raw address.
    pub const fn new(address: u64, size: u64, kind: BufferKind) -> Self {
        Self {
            address,
            size,
            kind,
        }
    }

    /// Describes a slice that the callee reads.
    pub fn from_slice(data: &[u8], kind: BufferKind) -> Self {
        Self::new(data.as_ptr() as u64, data.len() as u64, kind)
    }

    /// Describes a slice that the callee writes.
    pub fn from_mut_slice(data: &mut [u8], kind: BufferKind) -> Self {
        Self::new(data.as_mut_ptr() as u64, data.len() as u64, kind)
    }
}

/// The descriptor kind a buffer is encoded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferClass {
    /// Mapped send buffer.
    A,
    /// Mapped receive buffer.
    B,
    /// Send static.
    X,
    /// Receive list entry.
    C,
}

/// Maps a [`BufferKind`] to its descriptor class.
pub fn classify(kind: BufferKind) -> Result<BufferClass, Error> {
    if kind.contains(BufferKind::EXTENDED) {
        return Err(Error::UnsupportedBufferKind);
    }

    let direction = kind.bits() & DIRECTION_MASK;
    let family = (kind.bits() & FAMILY_MASK) >> 2;
    match (direction, family) {
        (0b01, 0b01) => Ok(BufferClass::A),
        (0b01, 0b10) => Ok(BufferClass::X),
        (0b10, 0b01) => Ok(BufferClass::B),
        (0b10, 0b10) => Ok(BufferClass::C),
        _ => Err(Error::UnsupportedBufferKind),
    }
}

/// Ordered list of the buffers of one descriptor kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorList {
    entries: [MemoryBuffer; MAX_BUFFERS_PER_KIND],
    len: usize,
}

impl DescriptorList {
    /// Appends a buffer, keeping insertion order.
    pub fn push(&mut self, buffer: MemoryBuffer) -> Result<(), Error> {
        let slot = self.entries.get_mut(self.len).ok_or(Error::TooManyBuffers)?;
        *slot = buffer;
        self.len += 1;
        Ok(())
    }

    /// Number of buffers in the list.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The buffers in insertion order.
    #[inline]
    pub fn as_slice(&self) -> &[MemoryBuffer] {
        &self.entries[..self.len]
    }

    /// Iterates over the buffers in insertion order.
    pub fn iter(&self) -> core::slice::Iter<'_, MemoryBuffer> {
        self.as_slice().iter()
    }
}

/// A request's buffers partitioned by descriptor kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifiedBuffers {
    /// Type A buffers.
    pub a: DescriptorList,
    /// Type B buffers.
    pub b: DescriptorList,
    /// Type X buffers.
    pub x: DescriptorList,
    /// Type C buffers.
    pub c: DescriptorList,
}

impl ClassifiedBuffers {
    /// Partitions `buffers` into the four kinds, preserving input order
    /// within each kind.
    ///
    /// Fails with [`Error::UnsupportedBufferKind`] on an unknown kind and
    /// with [`Error::TooManyBuffers`] when a kind exceeds
    /// [`MAX_BUFFERS_PER_KIND`] entries.
    pub fn classify(buffers: &[MemoryBuffer]) -> Result<Self, Error> {
        let mut classified = Self::default();
        for buffer in buffers {
            let list = match classify(buffer.kind)? {
                BufferClass::A => &mut classified.a,
                BufferClass::B => &mut classified.b,
                BufferClass::X => &mut classified.x,
                BufferClass::C => &mut classified.c,
            };
            list.push(*buffer)?;
        }
        Ok(classified)
    }
}
