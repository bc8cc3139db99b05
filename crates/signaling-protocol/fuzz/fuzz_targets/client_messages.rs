#![no_main]

use libfuzzer_sys::fuzz_target;
use signaling_protocol::{decode_client_message, encode_client_message};

fuzz_target!(|data: &[u8]| {
    // Clients control every byte of a text frame; decoding must never panic
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Anything the decoder accepts must re-encode to a frame it accepts again
    if let Ok(message) = decode_client_message(text) {
        if let Ok(encoded) = encode_client_message(&message) {
            let _ = decode_client_message(&encoded);
        }
    }
});
