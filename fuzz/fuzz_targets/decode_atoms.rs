#![no_main]

use libfuzzer_sys::fuzz_target;
use weave_core::codec::{decode_atoms, encode_atoms};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(atoms) = decode_atoms(text) else {
        return;
    };
    // Whatever decodes must encode and decode back to the same atoms.
    let encoded = encode_atoms(&atoms).expect("decoded atoms encode");
    let again = decode_atoms(&encoded).expect("encoded atoms decode");
    assert_eq!(atoms.len(), again.len());
    for (a, b) in atoms.iter().zip(&again) {
        assert!(a.same_content(b));
    }
});
