#![no_main]

use libfuzzer_sys::fuzz_target;
use modscan_scanner::govulncheck::{Collector, ScanStats, decode_stream};

fuzz_target!(|data: &[u8]| {
    let mut collector = Collector::new();
    let _ = decode_stream(data, &mut collector);
    let _ = collector.into_output(ScanStats::default());
});
