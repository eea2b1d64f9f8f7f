//! Property tests for the request encoder, the reply decoder, and a full call
//! over an in-process transport.

use nx_ipc::{
    BufferKind, Error, Handle, IpcRequest, MemoryBuffer, ResponseShape, ResultCode, Session,
    Transport,
    buffer::ClassifiedBuffers,
    layout::{IN_HEADER_MAGIC, OUT_HEADER_MAGIC, padding_to_align},
    marshal,
    response::{Reply, marshal_reply},
    session, unmarshal,
};
use proptest::prelude::*;

const MESSAGE_WORDS: usize = 256;

fn arb_kind() -> impl Strategy<Value = BufferKind> {
    prop_oneof![
        Just(BufferKind::TYPE_A),
        Just(BufferKind::TYPE_B),
        Just(BufferKind::TYPE_X),
        Just(BufferKind::TYPE_C),
        Just(BufferKind::TYPE_C | BufferKind::SIZE_LIST),
    ]
}

fn arb_buffer() -> impl Strategy<Value = MemoryBuffer> {
    (0u64..(1 << 38), 0u64..0x1_0000, arb_kind())
        .prop_map(|(address, size, kind)| MemoryBuffer::new(address, size, kind))
}

/// Words ahead of the data section for the given request.
fn head_words(request: &IpcRequest<'_>, buffers: &ClassifiedBuffers) -> usize {
    let mut head = 2;
    if request.has_handle_descriptor() {
        head += 1 + request.copy_handles.len() + request.move_handles.len();
        if request.send_pid {
            head += 2;
        }
    }
    head + buffers.x.len() * 2 + (buffers.a.len() + buffers.b.len()) * 3
}

proptest! {
    #[test]
    fn data_section_is_aligned_and_padded(
        payload in prop::collection::vec(any::<u32>(), 0..32),
        copy in prop::collection::vec(any::<u32>(), 0..16),
        moved in prop::collection::vec(any::<u32>(), 0..16),
        send_pid in any::<bool>(),
        buffers in prop::collection::vec(arb_buffer(), 0..12),
        request_id in any::<u32>(),
    ) {
        let mut request = IpcRequest::new(1)
            .request_id(request_id)
            .raw_data(&payload)
            .copy_handles(&copy)
            .move_handles(&moved)
            .buffers(&buffers);
        request.send_pid = send_pid;

        let classified = ClassifiedBuffers::classify(&buffers).unwrap();
        prop_assume!(classified.c.len() < 14);

        let mut message = [0u32; MESSAGE_WORDS];
        let len = marshal(&mut message, &request).unwrap();

        let head = head_words(&request, &classified);
        let pre = padding_to_align(head);
        let data = head + pre;

        prop_assert_eq!(data % 4, 0);
        prop_assert!(message[head..data].iter().all(|&w| w == 0));
        prop_assert_eq!(&message[data..data + 4], &[IN_HEADER_MAGIC, 0, request_id, 0]);
        prop_assert_eq!(&message[data + 4..data + 4 + payload.len()], &payload[..]);

        let post = data + 4 + payload.len();
        prop_assert!(message[post..post + 4 - pre].iter().all(|&w| w == 0));

        prop_assert_eq!((message[1] & 0x3FF) as usize, payload.len() + 8);

        let size_list = classified
            .c
            .iter()
            .filter(|b| b.kind.contains(BufferKind::SIZE_LIST))
            .count();
        prop_assert_eq!(
            len,
            post + 4 - pre + size_list.div_ceil(2) + classified.c.len() * 2
        );
    }

    #[test]
    fn header_counts_follow_classification(
        buffers in prop::collection::vec(arb_buffer(), 0..24),
    ) {
        let classified = ClassifiedBuffers::classify(&buffers).unwrap();
        prop_assume!(classified.a.len() < 16 && classified.b.len() < 16);
        prop_assume!(classified.x.len() < 16 && classified.c.len() < 14);

        let mut message = [0u32; MESSAGE_WORDS];
        marshal(&mut message, &IpcRequest::new(1).buffers(&buffers)).unwrap();

        prop_assert_eq!(((message[0] >> 16) & 0xF) as usize, classified.x.len());
        prop_assert_eq!(((message[0] >> 20) & 0xF) as usize, classified.a.len());
        prop_assert_eq!(((message[0] >> 24) & 0xF) as usize, classified.b.len());
        prop_assert_eq!(message[0] >> 28, 0);

        let c_flag = (message[1] >> 10) & 0xF;
        let expected = match classified.c.len() {
            0 => 0,
            1 => 2,
            n => n as u32 + 2,
        };
        prop_assert_eq!(c_flag, expected);
    }

    #[test]
    fn reply_decodes_to_what_was_encoded(
        payload in prop::collection::vec(any::<u32>(), 0..64),
        copy in prop::collection::vec(any::<u32>(), 0..16),
        moved in prop::collection::vec(any::<u32>(), 0..16),
        pid in prop::option::of(any::<u64>()),
    ) {
        let mut message = [0u32; MESSAGE_WORDS];
        marshal_reply(&mut message, &Reply {
            pid,
            raw_data: &payload,
            copy_handles: &copy,
            move_handles: &moved,
            ..Default::default()
        }).unwrap();

        let mut shape = ResponseShape::new()
            .raw_data_len(payload.len())
            .copy_handles(copy.len())
            .move_handles(moved.len());
        shape.has_pid = pid.is_some();

        let response = unmarshal(&message, &shape).unwrap();

        prop_assert_eq!(response.pid, pid);
        prop_assert_eq!(response.raw_data, &payload[..]);
        prop_assert_eq!(response.copy_handles, &copy[..]);
        prop_assert_eq!(response.move_handles, &moved[..]);
    }

    #[test]
    fn reply_with_other_payload_length_is_rejected(
        len in 0usize..32,
        expected in 0usize..32,
    ) {
        prop_assume!(len != expected);
        let payload = [0u32; 32];

        let mut message = [0u32; MESSAGE_WORDS];
        marshal_reply(&mut message, &Reply {
            raw_data: &payload[..len],
            ..Default::default()
        }).unwrap();

        prop_assert_eq!(
            unmarshal(&message, &ResponseShape::new().raw_data_len(expected)),
            Err(Error::UnexpectedRawDataSize)
        );
    }
}

#[test]
fn plain_request_matches_documented_layout() {
    let payload = [0xAAAA, 0xBBBB];
    let request = IpcRequest::new(5).raw_data(&payload);
    let mut message = [0xFFFF_FFFFu32; 16];

    let len = marshal(&mut message, &request).unwrap();

    assert_eq!(
        &message[..len],
        &[
            0x0000_0005,
            0x0000_000A,
            0,
            0,
            IN_HEADER_MAGIC,
            0,
            0,
            0,
            0xAAAA,
            0xBBBB,
            0,
            0,
        ]
    );
}

/// Transport standing in for a server that doubles every payload word and
/// returns one move handle.
#[derive(Default)]
struct Doubler {
    sessions: Vec<Handle>,
    requests: Vec<Vec<u32>>,
}

impl Transport for Doubler {
    fn send_sync_request(
        &mut self,
        session: Handle,
        message: &mut [u32],
    ) -> Result<(), ResultCode> {
        self.sessions.push(session);

        let raw_words = (message[1] & 0x3FF) as usize - 8;
        let data = (0..message.len())
            .step_by(4)
            .find(|&i| message[i] == IN_HEADER_MAGIC)
            .ok_or(ResultCode::from_parts(10, 1))?;
        let payload: Vec<u32> = message[data + 4..data + 4 + raw_words].to_vec();
        self.requests.push(payload.clone());

        let doubled: Vec<u32> = payload.iter().map(|w| w.wrapping_mul(2)).collect();
        marshal_reply(
            message,
            &Reply {
                raw_data: &doubled,
                move_handles: &[0xCAFE],
                ..Default::default()
            },
        )
        .map_err(|_| ResultCode::from_parts(10, 2))?;
        Ok(())
    }
}

#[test]
fn session_call_round_trips_through_transport() {
    let mut transport = Doubler::default();
    let mut message = [0u32; 64];
    let payload = [1, 2, 3];
    let request = IpcRequest::new(4).request_id(9).raw_data(&payload);
    let shape = ResponseShape::new().raw_data_len(3).move_handles(1);

    let response = Session::from_raw(0x1234)
        .send(&mut transport, &mut message, &request, &shape)
        .unwrap();

    assert_eq!(response.raw_data, &[2, 4, 6]);
    assert_eq!(response.move_handles, &[0xCAFE]);
    assert_eq!(transport.sessions, vec![0x1234]);
    assert_eq!(transport.requests, vec![payload.to_vec()]);
}

#[test]
fn session_call_surfaces_service_status() {
    struct Failing;

    impl Transport for Failing {
        fn send_sync_request(
            &mut self,
            _session: Handle,
            message: &mut [u32],
        ) -> Result<(), ResultCode> {
            marshal_reply(
                message,
                &Reply {
                    status: ResultCode::from_parts(2, 1002),
                    ..Default::default()
                },
            )
            .map_err(|_| ResultCode::from_parts(10, 2))?;
            Ok(())
        }
    }

    let mut message = [0u32; 64];
    let result = session::send(
        &mut Failing,
        1,
        &mut message,
        &IpcRequest::new(4),
        &ResponseShape::new(),
    );

    assert_eq!(result, Err(Error::Service(ResultCode::from_parts(2, 1002))));
    assert_eq!(message[4], OUT_HEADER_MAGIC);
}

#[test]
fn header_count_fields_hold_fifteen_buffers_of_each_kind() {
    for (kind, shift) in [
        (BufferKind::TYPE_X, 16),
        (BufferKind::TYPE_A, 20),
        (BufferKind::TYPE_B, 24),
    ] {
        let buffers = [MemoryBuffer::new(0x1000, 0x10, kind); 15];
        let mut message = [0u32; MESSAGE_WORDS];

        marshal(&mut message, &IpcRequest::new(1).buffers(&buffers)).unwrap();

        assert_eq!(message[0], 1 | (15 << shift), "{kind:?}");
    }
}

#[test]
fn sixteen_buffers_of_a_kind_do_not_spill_into_the_next_count() {
    for kind in [BufferKind::TYPE_X, BufferKind::TYPE_A, BufferKind::TYPE_B] {
        let buffers = [MemoryBuffer::new(0x1000, 0x10, kind); 16];
        assert_eq!(ClassifiedBuffers::classify(&buffers).map(|_| ()), Ok(()));

        let mut message = [0u32; MESSAGE_WORDS];
        assert_eq!(
            marshal(&mut message, &IpcRequest::new(1).buffers(&buffers)),
            Err(Error::TooManyBuffers),
            "{kind:?}"
        );

        let buffers = [MemoryBuffer::new(0x1000, 0x10, kind); 17];
        assert_eq!(
            ClassifiedBuffers::classify(&buffers).map(|_| ()),
            Err(Error::TooManyBuffers)
        );
    }
}
