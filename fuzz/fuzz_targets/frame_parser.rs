//! Fuzz target for frame parsing
//!
//! Tests that the frame parser correctly handles arbitrary input without panicking.

#![no_main]

use creditline_core::{Frame, WireFrame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = Frame::parse(data);

    // Whatever decodes re-encodes to an equivalent frame
    if let Ok(frame) = WireFrame::decode(data) {
        let encoded = frame.encode().expect("decoded frame re-encodes");
        assert_eq!(WireFrame::decode(&encoded).ok(), Some(frame));
    }
});
