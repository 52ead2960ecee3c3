#![no_main]

use cloudsql_connect::protocol::decode::decode_message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Several messages may arrive in one read; a split point anywhere
    // inside a message must only ever yield "need more bytes".
    let mut rest = data;
    while let Ok(Some((_, consumed))) = decode_message(rest) {
        assert!(consumed >= 5 && consumed <= rest.len());
        for cut in [1, consumed / 2, consumed - 1] {
            if cut < consumed {
                assert!(matches!(decode_message(&rest[..cut]), Ok(None)));
            }
        }
        rest = &rest[consumed..];
    }
});
