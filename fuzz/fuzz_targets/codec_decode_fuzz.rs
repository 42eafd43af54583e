//! Fuzz test for the entity payload codec
//!
//! Feeds arbitrary bytes to `EntityCodec::decode` and `decode_list`. Decoding
//! must never panic, and anything it accepts must validate against the
//! schema and survive a re-encode.
//!
//! Run with: cargo +nightly fuzz run codec_decode_fuzz -- -max_total_time=60

#![no_main]

use fleet_core::{FieldDef, FieldDefault, Schema, Stamp, ValueType};
use fleet_storage::EntityCodec;
use libfuzzer_sys::fuzz_target;

static NODE: Schema = Schema::new(
    "Node",
    1,
    &[
        FieldDef::new("active", ValueType::Bool).with_default(FieldDefault::Bool(true)),
        FieldDef::new("label", ValueType::Str),
        FieldDef::new("rack", ValueType::Int),
        FieldDef::new("tags", ValueType::List).with_default(FieldDefault::EmptyList),
        FieldDef::new("blob", ValueType::Bytes),
        FieldDef::new("mtime", ValueType::Timestamp).stamped(Stamp::OnWrite),
    ],
);

fuzz_target!(|data: &[u8]| {
    let codec = EntityCodec::new(&NODE);

    if let Ok(entity) = codec.decode(data) {
        assert_eq!(entity.kind(), NODE.kind());
        assert!(NODE.validate(&entity).is_ok(), "Decoded entity must validate");

        let bytes = codec.encode(&entity).expect("Accepted entity must re-encode");
        let again = codec.decode(&bytes).expect("Re-encoded entity must decode");
        assert_eq!(again, entity);
    }

    if let Ok(entities) = codec.decode_list(data) {
        for entity in &entities {
            assert!(NODE.validate(entity).is_ok(), "Listed entity must validate");
        }
    }
});
