#![no_main]
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    // Profile report parser must not panic on any input, however malformed.
    let mut cursor = Cursor::new(data);
    let _ = covrs::profile::Profile::parse(&mut cursor);
});
