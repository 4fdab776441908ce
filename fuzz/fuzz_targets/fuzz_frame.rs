#![no_main]

use libfuzzer_sys::fuzz_target;
use nonogram_net::protocol::Frame;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must fail cleanly, and anything that decodes
    // must encode again.
    if let Ok(frame) = Frame::decode(data) {
        let _ = frame.encode();
    }
});
