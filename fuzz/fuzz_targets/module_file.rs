#![no_main]

use libfuzzer_sys::fuzz_target;
use modscan_scanner::corpus::read_module_file;

fuzz_target!(|data: &[u8]| {
    let _ = read_module_file(data);
});
