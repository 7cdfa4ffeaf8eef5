#![no_main]
use libfuzzer_sys::fuzz_target;
use memora::sessions::LogRecord;
use memora::store::jsonl::parse_records;

fuzz_target!(|data: &[u8]| {
    // Corrupt transcripts must surface as errors, never panics.
    let _ = parse_records::<LogRecord>(data);
});
