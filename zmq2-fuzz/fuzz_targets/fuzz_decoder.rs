#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use zmq2_zmtp::codec::{encode_message, FrameDecoder};

fuzz_target!(|data: &[u8]| {
    // First byte picks the read size, the rest is the stream.
    let Some((&split, stream)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(split).max(1);

    let mut decoder = FrameDecoder::with_max_frame_size(Some(1 << 20));
    let mut decoded = Vec::new();
    for piece in stream.chunks(chunk) {
        match decoder.decode_all(piece) {
            Ok(messages) => decoded.extend(messages),
            Err(_) => return,
        }
    }

    // Re-encoding uses the shortest length form, so it never outgrows the
    // bytes the messages were decoded from.
    let consumed = stream.len() - decoder.buffered();
    let mut wire = Vec::with_capacity(consumed);
    for message in &decoded {
        assert!(!message.is_empty());
        wire.extend_from_slice(&encode_message::<Bytes>(message));
    }
    assert!(wire.len() <= consumed);
});
