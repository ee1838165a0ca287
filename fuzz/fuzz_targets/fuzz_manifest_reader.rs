#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

use array_import::{ManifestLayout, manifest::Reader};

fuzz_target!(|data: &[u8]| {
    let Ok(reader) = Reader::new(Cursor::new(data), &ManifestLayout::default()) else {
        return;
    };

    // Iterate all records - should never panic
    for result in reader.take(1000) {
        if let Ok(record) = result {
            let _ = format!("{}", record);
            assert_ne!(record.chromosome, "0");
            assert_ne!(record.position, 0);
        }
    }
});
