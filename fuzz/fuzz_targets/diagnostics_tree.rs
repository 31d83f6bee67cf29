#![no_main]

use libfuzzer_sys::fuzz_target;
use modscan_scanner::diagnostics::{json_tree_to_diagnostics, parse_json_tree};

fuzz_target!(|data: &[u8]| {
    if let Ok(tree) = parse_json_tree(data) {
        let _ = json_tree_to_diagnostics(&tree);
    }
});
