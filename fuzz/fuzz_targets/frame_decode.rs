//! Fuzz target for Frame::decode
//!
//! Arbitrary bytes must never panic the frame parser. Anything that decodes
//! must re-encode to the same bytes it was read from.

#![no_main]

use courier_proto::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    let encoded = frame.to_vec().expect("decoded frame must re-encode");
    assert_eq!(encoded.as_slice(), &data[..encoded.len()]);
});
