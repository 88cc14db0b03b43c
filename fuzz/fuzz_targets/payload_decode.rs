//! Fuzz target for Payload::from_frame
//!
//! Feeds arbitrary CBOR bodies under every opcode:
//! - Malformed CBOR
//! - Type confusion (wrong payload type for the opcode)
//! - Oversized strings and collections
//!
//! The fuzzer should NEVER panic. Invalid inputs return an error.

#![no_main]

use bytes::Bytes;
use courier_proto::{Frame, FrameHeader, Opcode, Payload};
use libfuzzer_sys::fuzz_target;

const OPCODES: [Opcode; 10] = [
    Opcode::Hello,
    Opcode::HelloReply,
    Opcode::Error,
    Opcode::KeepAlive,
    Opcode::KeepAliveAck,
    Opcode::ContactNotify,
    Opcode::FetchDirectory,
    Opcode::DirectorySnapshot,
    Opcode::Envelope,
    Opcode::Receipt,
];

fuzz_target!(|data: &[u8]| {
    for opcode in OPCODES {
        let frame = Frame::new(FrameHeader::new(opcode), Bytes::copy_from_slice(data));

        if let Ok(payload) = Payload::from_frame(&frame) {
            assert_eq!(payload.opcode(), opcode);
        }
    }
});
