#![no_main]
use libfuzzer_sys::fuzz_target;
use memora::remote::wire::{decode_session, SessionRow};

fuzz_target!(|data: &[u8]| {
    // Any row the remote hands back either decodes or is rejected.
    if let Ok(row) = serde_json::from_slice::<SessionRow>(data) {
        let _ = decode_session(row);
    }
});
