#![no_main]

use libfuzzer_sys::fuzz_target;
use modscan_scanner::{AnalysisRequest, EnqueueParams, ScanTarget};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let (path, query) = text.split_once('?').unwrap_or((text, ""));
    let _ = ScanTarget::parse(path, query);
    let _ = AnalysisRequest::parse(path, query);
    if let Ok(params) = EnqueueParams::from_query(query) {
        // encoding must be parseable again
        let _ = EnqueueParams::from_query(&params.to_query());
    }
});
