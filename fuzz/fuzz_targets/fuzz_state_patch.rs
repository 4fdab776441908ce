#![no_main]

use libfuzzer_sys::fuzz_target;
use nonogram_net::serializer::{SchemaSerializer, Serializer};

fuzz_target!(|data: &[u8]| {
    // The first byte splits the input into a schema and a patch stream.
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let split = usize::from(split).min(rest.len());
    let (schema, patch) = rest.split_at(split);

    let mut serializer = SchemaSerializer::new();
    if serializer.handshake(schema).is_ok() {
        let _ = serializer.set_state(patch);
        let _ = serializer.patch(patch);
    }
});
