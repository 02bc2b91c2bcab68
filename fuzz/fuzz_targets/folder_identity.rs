#![no_main]

use libfuzzer_sys::fuzz_target;
use refforge::discovery::{parse_identity, parse_mode};
use refforge::layout::PeriodLabel;
use std::path::Path;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Folder names come from arbitrary trees and must never panic
        let _ = parse_identity(Path::new(input));
        let _ = parse_mode(input);
        if let Some(label) = PeriodLabel::parse(input) {
            assert_eq!(PeriodLabel::parse(&label.to_string()), Some(label));
        }
    }
});
