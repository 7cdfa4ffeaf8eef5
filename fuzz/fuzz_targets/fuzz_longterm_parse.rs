#![no_main]
use libfuzzer_sys::fuzz_target;
use memora::memory::LongTermRecord;
use memora::store::jsonl::parse_records;

fuzz_target!(|data: &[u8]| {
    let _ = parse_records::<LongTermRecord>(data);
});
