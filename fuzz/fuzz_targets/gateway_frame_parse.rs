#![no_main]

use libfuzzer_sys::fuzz_target;
use xchat_gateway::{build_request_frame, parse_gateway_frame};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);

    match parse_gateway_frame(&raw) {
        Ok(Some(frame)) => {
            assert!(!frame.id.trim().is_empty());
            let echoed = build_request_frame(&frame.id, "status", frame.payload.clone());
            assert_eq!(echoed["type"], "req");
            assert_eq!(echoed["id"], frame.id.as_str());
        }
        Ok(None) => {}
        Err(error) => {
            assert!(!error.reason_code().trim().is_empty());
        }
    }
});
