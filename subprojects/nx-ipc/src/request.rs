//! Request encoding.
//!
//! [`marshal`] writes an [`IpcRequest`] into a message buffer in the exact
//! layout the kernel's synchronous request call consumes. See the
//! [`layout`](crate::layout) module for the wire format.
//!
//! # References
//!
//! - [Switchbrew IPC Marshalling](https://switchbrew.org/wiki/IPC_Marshalling)

use log::trace;

use crate::{
    Handle,
    buffer::{BufferKind, ClassifiedBuffers, MemoryBuffer},
    error::Error,
    layout::{
        self, BufferDescriptor, Header, IN_HEADER_MAGIC, PidSlot, RecvListEntry,
        StaticDescriptor, Writer,
    },
};

/// Address width of X, A and B descriptors, in bits.
const MAX_MAPPED_ADDRESS_BITS: u32 = 38;
/// Size width of A and B descriptors, in bits.
const MAX_MAPPED_SIZE_BITS: u32 = 35;
/// Address width of C descriptors, in bits.
const MAX_RECV_ADDRESS_BITS: u32 = 48;
/// Size width of X and C descriptors, in bits.
const MAX_STATIC_SIZE_BITS: u32 = 16;

/// A request to be encoded.
///
/// Built with [`IpcRequest::new`] and the chained setters; all data is
/// borrowed from the caller for the duration of the encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpcRequest<'a> {
    /// Message type (opcode). Must fit 16 bits.
    pub request_type: u32,
    /// Command id written to the data section sub-header.
    pub request_id: u32,
    /// Raw payload words.
    pub raw_data: &'a [u32],
    /// Memory buffers, in any mix of kinds.
    pub buffers: &'a [MemoryBuffer],
    /// Handles the kernel duplicates into the callee.
    pub copy_handles: &'a [Handle],
    /// Handles whose ownership moves to the callee.
    pub move_handles: &'a [Handle],
    /// Whether the kernel should attach the caller's process id.
    pub send_pid: bool,
}

impl<'a> IpcRequest<'a> {
    /// Creates an empty request of the given message type.
    pub fn new(request_type: u32) -> Self {
        Self {
            request_type,
            ..Default::default()
        }
    }

    /// Sets the command id.
    pub fn request_id(mut self, id: u32) -> Self {
        self.request_id = id;
        self
    }

    /// Sets the raw payload words.
    pub fn raw_data(mut self, data: &'a [u32]) -> Self {
        self.raw_data = data;
        self
    }

    /// Sets the memory buffers.
    pub fn buffers(mut self, buffers: &'a [MemoryBuffer]) -> Self {
        self.buffers = buffers;
        self
    }

    /// Sets the copy handles.
    pub fn copy_handles(mut self, handles: &'a [Handle]) -> Self {
        self.copy_handles = handles;
        self
    }

    /// Sets the move handles.
    pub fn move_handles(mut self, handles: &'a [Handle]) -> Self {
        self.move_handles = handles;
        self
    }

    /// Requests that the kernel sends the caller's process id.
    pub fn send_pid(mut self) -> Self {
        self.send_pid = true;
        self
    }

    /// Whether the message needs a handle descriptor.
    #[inline]
    pub fn has_handle_descriptor(&self) -> bool {
        self.send_pid || !self.copy_handles.is_empty() || !self.move_handles.is_empty()
    }
}

/// Encodes `request` into `message` and returns the number of words written.
///
/// On error `message` is left partially written and must not be sent.
pub fn marshal(message: &mut [u32], request: &IpcRequest<'_>) -> Result<usize, Error> {
    let buffers = ClassifiedBuffers::classify(request.buffers)?;

    let message_type =
        u16::try_from(request.request_type).map_err(|_| Error::InvalidRequestType)?;
    let num_data_words = layout::raw_data_size(request.raw_data.len())?;
    let has_handle_descriptor = request.has_handle_descriptor();

    let header = Header::new()
        .with_message_type(message_type)
        .with_num_send_statics_checked(buffers.x.len() as u8)
        .and_then(|h| h.with_num_send_buffers_checked(buffers.a.len() as u8))
        .and_then(|h| h.with_num_recv_buffers_checked(buffers.b.len() as u8))
        .and_then(|h| {
            h.with_recv_static_mode_checked(layout::recv_static_mode(buffers.c.len()) as u8)
        })
        .map_err(|_| Error::TooManyBuffers)?
        .with_num_exch_buffers(0)
        .with_num_data_words(num_data_words)
        .with_has_special_header(has_handle_descriptor);

    let mut w = Writer::new(message);
    w.put_all(&header.to_words())?;

    if has_handle_descriptor {
        let pid = if request.send_pid {
            PidSlot::Reserved
        } else {
            PidSlot::Absent
        };
        layout::write_handles(&mut w, pid, request.copy_handles, request.move_handles)?;
    }

    for (index, buffer) in buffers.x.iter().enumerate() {
        check_address(buffer, MAX_MAPPED_ADDRESS_BITS)?;
        let size = static_size(buffer)?;
        w.put_all(&StaticDescriptor::new_send(buffer.address, size, index).to_words())?;
    }

    for buffer in buffers.a.iter().chain(buffers.b.iter()) {
        check_address(buffer, MAX_MAPPED_ADDRESS_BITS)?;
        if buffer.size >> MAX_MAPPED_SIZE_BITS != 0 {
            return Err(Error::InvalidBufferSize);
        }
        let mode = buffer.kind.mode()?;
        w.put_all(&BufferDescriptor::new_buffer(buffer.address, buffer.size, mode).to_words())?;
    }

    layout::write_data_section(&mut w, IN_HEADER_MAGIC, request.request_id, request.raw_data)?;

    write_size_list(&mut w, &buffers)?;

    for buffer in buffers.c.iter() {
        check_address(buffer, MAX_RECV_ADDRESS_BITS)?;
        let size = static_size(buffer)?;
        w.put_all(&RecvListEntry::new_recv(buffer.address, size).to_words())?;
    }

    trace!(
        "marshalled request type {:#x}: {} words ({} X, {} A, {} B, {} C, {} raw)",
        message_type,
        w.position(),
        buffers.x.len(),
        buffers.a.len(),
        buffers.b.len(),
        buffers.c.len(),
        request.raw_data.len(),
    );

    Ok(w.position())
}

/// Writes the packed u16 sizes of the C buffers flagged with
/// [`BufferKind::SIZE_LIST`], rounded up to whole words.
fn write_size_list(w: &mut Writer<'_>, buffers: &ClassifiedBuffers) -> Result<(), Error> {
    let mut count = 0usize;
    let mut pending = 0u32;

    for buffer in buffers.c.iter() {
        if !buffer.kind.contains(BufferKind::SIZE_LIST) {
            continue;
        }

        let size = static_size(buffer)? as u32;
        if count % 2 == 0 {
            pending = size;
        } else {
            w.put(pending | (size << 16))?;
        }
        count += 1;
    }

    if count % 2 == 1 {
        w.put(pending)?;
    }
    Ok(())
}

fn check_address(buffer: &MemoryBuffer, bits: u32) -> Result<(), Error> {
    if buffer.address >> bits != 0 {
        return Err(Error::InvalidBufferAddress);
    }
    Ok(())
}

fn static_size(buffer: &MemoryBuffer) -> Result<u16, Error> {
    if buffer.size >> MAX_STATIC_SIZE_BITS != 0 {
        return Err(Error::InvalidBufferSize);
    }
    Ok(buffer.size as u16)
}
