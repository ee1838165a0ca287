#![no_main]

use libfuzzer_sys::fuzz_target;

use array_import::allele::{self, GenotypeCall, INDEL, ResolutionRule};

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);

    let Ok(call) = GenotypeCall::parse(&input) else {
        return;
    };
    assert!(call.first.len() + call.second.len() <= input.len());

    for base in ['A', 'C', 'G', 'T', 'N'] {
        let resolved = allele::resolve(&call, base);
        if resolved.rule == ResolutionRule::Indel {
            assert_eq!(resolved.alternate.as_deref(), Some(INDEL));
        }
        if resolved.rule == ResolutionRule::Unresolved {
            assert!(resolved.alternate.is_none());
        }
    }
});
