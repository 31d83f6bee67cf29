#![no_main]

use libfuzzer_sys::fuzz_target;
use modscan_reqcount::count_lines;

fuzz_target!(|data: &[u8]| {
    let counts = count_lines(&String::from_utf8_lossy(data));
    assert!(counts.total() <= counts.lines);
});
