//! Reply decoding.
//!
//! [`unmarshal`] validates a reply written back by the kernel against the
//! [`ResponseShape`] the caller expects and returns a [`Response`] borrowing
//! the handles and payload from the message buffer.
//!
//! [`marshal_reply`] writes a reply in the same layout, for in-process
//! transports that stand in for a server.

use log::{debug, trace};

use crate::{
    Handle,
    error::Error,
    layout::{
        self, BufferDescriptor, HandleDescriptor, Header, OUT_HEADER_MAGIC, PidSlot,
        RAW_DATA_OVERHEAD, RESPONSE_TYPE, Reader, StaticDescriptor, Writer,
    },
    result::ResultCode,
};

/// What the caller expects a reply to carry.
///
/// The wire does not describe the meaning of a reply; each call knows its
/// own reply shape and any deviation is a hard error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseShape {
    /// Payload length in words.
    pub raw_data_len: usize,
    /// Number of copy handles.
    pub num_copy_handles: usize,
    /// Number of move handles.
    pub num_move_handles: usize,
    /// Whether a process id is present.
    pub has_pid: bool,
}

impl ResponseShape {
    /// Creates the shape of an empty reply.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the payload length in words.
    pub fn raw_data_len(mut self, len: usize) -> Self {
        self.raw_data_len = len;
        self
    }

    /// Sets the number of copy handles.
    pub fn copy_handles(mut self, count: usize) -> Self {
        self.num_copy_handles = count;
        self
    }

    /// Sets the number of move handles.
    pub fn move_handles(mut self, count: usize) -> Self {
        self.num_move_handles = count;
        self
    }

    /// Expects a process id.
    pub fn pid(mut self) -> Self {
        self.has_pid = true;
        self
    }
}

/// A decoded reply, borrowing from the message buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response<'a> {
    /// Process id, present when the shape expects one.
    pub pid: Option<u64>,
    /// Payload words.
    pub raw_data: &'a [u32],
    /// Copy handles received.
    pub copy_handles: &'a [Handle],
    /// Move handles received.
    pub move_handles: &'a [Handle],
}

/// Decodes the reply in `message` against `shape`.
///
/// A non-zero status in the reply is returned as [`Error::Service`] before
/// any shape check, since the rest of the reply is not meaningful then.
pub fn unmarshal<'a>(message: &'a [u32], shape: &ResponseShape) -> Result<Response<'a>, Error> {
    let mut r = Reader::new(message);

    let header = Header::from_words(r.take_array()?);
    if header.message_type() != RESPONSE_TYPE {
        return Err(Error::InvalidResponseType);
    }

    let mut pid = None;
    let mut copy_handles: &[Handle] = &[];
    let mut move_handles: &[Handle] = &[];

    if header.has_special_header() {
        let special = HandleDescriptor::from_words(r.take_array()?);
        if special.send_pid() {
            let [low, high] = r.take_array::<2>()?;
            pid = Some(low as u64 | ((high as u64) << 32));
        }
        copy_handles = r.take_slice(special.num_copy_handles() as usize)?;
        move_handles = r.take_slice(special.num_move_handles() as usize)?;
    }

    // Replies carry no caller-meaningful buffer descriptors
    r.skip(header.num_send_statics() as usize * StaticDescriptor::WORDS)?;
    r.skip(header.num_send_buffers() as usize * BufferDescriptor::WORDS)?;
    r.skip(header.num_recv_buffers() as usize * BufferDescriptor::WORDS)?;
    r.skip(header.num_exch_buffers() as usize * BufferDescriptor::WORDS)?;

    r.align()?;
    if r.take()? != OUT_HEADER_MAGIC {
        return Err(Error::InvalidResponseMagic);
    }
    r.skip(1)?;

    let status = ResultCode::from_raw(r.take()?);
    if !status.is_success() {
        return Err(Error::Service(status));
    }
    r.skip(1)?;

    let raw_data_len = (header.num_data_words() as usize).checked_sub(RAW_DATA_OVERHEAD);
    if raw_data_len != Some(shape.raw_data_len) {
        debug!(
            "raw data size mismatch: header {:#x} words, expected {:#x} + {:#x}",
            header.num_data_words(),
            shape.raw_data_len,
            RAW_DATA_OVERHEAD,
        );
        return Err(Error::UnexpectedRawDataSize);
    }

    if pid.is_some() != shape.has_pid {
        debug!("pid mismatch: present {}, expected {}", pid.is_some(), shape.has_pid);
        return Err(Error::UnexpectedPid);
    }

    if copy_handles.len() != shape.num_copy_handles {
        debug!(
            "copy handle count mismatch: got {}, expected {}",
            copy_handles.len(),
            shape.num_copy_handles,
        );
        return Err(Error::UnexpectedCopyHandles);
    }

    if move_handles.len() != shape.num_move_handles {
        debug!(
            "move handle count mismatch: got {}, expected {}",
            move_handles.len(),
            shape.num_move_handles,
        );
        return Err(Error::UnexpectedMoveHandles);
    }

    let raw_data = r.take_slice(shape.raw_data_len)?;

    trace!(
        "unmarshalled response: {} raw words, {} copy, {} move, pid {:?}",
        raw_data.len(),
        copy_handles.len(),
        move_handles.len(),
        pid,
    );

    Ok(Response {
        pid,
        raw_data,
        copy_handles,
        move_handles,
    })
}

/// A reply to be encoded by [`marshal_reply`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Reply<'a> {
    /// Status word of the reply.
    pub status: ResultCode,
    /// Process id to attach.
    pub pid: Option<u64>,
    /// Payload words.
    pub raw_data: &'a [u32],
    /// Copy handles.
    pub copy_handles: &'a [Handle],
    /// Move handles.
    pub move_handles: &'a [Handle],
}

/// Encodes `reply` into `message` and returns the number of words written.
pub fn marshal_reply(message: &mut [u32], reply: &Reply<'_>) -> Result<usize, Error> {
    let num_data_words = layout::raw_data_size(reply.raw_data.len())?;
    let has_handle_descriptor = reply.pid.is_some()
        || !reply.copy_handles.is_empty()
        || !reply.move_handles.is_empty();

    let header = Header::new()
        .with_message_type(RESPONSE_TYPE)
        .with_num_data_words(num_data_words)
        .with_has_special_header(has_handle_descriptor);

    let mut w = Writer::new(message);
    w.put_all(&header.to_words())?;

    if has_handle_descriptor {
        let pid = reply.pid.map_or(PidSlot::Absent, PidSlot::Value);
        layout::write_handles(&mut w, pid, reply.copy_handles, reply.move_handles)?;
    }

    layout::write_data_section(&mut w, OUT_HEADER_MAGIC, reply.status.to_raw(), reply.raw_data)?;

    Ok(w.position())
}
