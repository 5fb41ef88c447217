//! Fuzz target for frame and message decoding
//!
//! Replicas decode whatever a peer sends before any other check runs.
//!
//! # Invariants
//!
//! - NEVER panic on arbitrary bytes
//! - A decoded frame re-encodes to the bytes it was decoded from
//! - A decoded request or response survives a second encode/decode pass

#![no_main]

use chorus_proto::{Frame, FrameHeader, Request, Response};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    let mut encoded = Vec::new();
    if frame.encode(&mut encoded).is_ok() {
        let used = FrameHeader::SIZE + frame.payload.len();
        assert_eq!(encoded.as_slice(), &data[..used], "re-encoding changed the frame");
    }

    if let Ok(request) = Request::from_frame(&frame) {
        if let Ok(again) = request.to_frame() {
            assert_eq!(Request::from_frame(&again).ok(), Some(request));
        }
    }

    if let Ok(response) = Response::from_frame(&frame) {
        if let Ok(again) = response.to_frame() {
            assert_eq!(Response::from_frame(&again).ok(), Some(response));
        }
    }
});
