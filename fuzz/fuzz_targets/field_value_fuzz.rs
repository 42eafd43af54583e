//! Fuzz test for field-level cache payloads
//!
//! A field-level cache entry is plain JSON checked against the field's type.
//! Arbitrary bytes must either be rejected or decode to a value of exactly
//! that type.
//!
//! Run with: cargo +nightly fuzz run field_value_fuzz -- -max_total_time=60

#![no_main]

use fleet_core::{FieldDef, Schema, ValueType};
use fleet_storage::EntityCodec;
use libfuzzer_sys::fuzz_target;

static PROBE: Schema = Schema::new(
    "Probe",
    1,
    &[
        FieldDef::new("text", ValueType::Str),
        FieldDef::new("count", ValueType::Int),
        FieldDef::new("flag", ValueType::Bool),
        FieldDef::new("seen", ValueType::Timestamp),
        FieldDef::new("blob", ValueType::Bytes),
        FieldDef::new("items", ValueType::List),
    ],
);

fuzz_target!(|data: &[u8]| {
    for field in PROBE.all_fields() {
        if let Ok(value) = EntityCodec::decode_value(&field, data) {
            assert_eq!(value.value_type(), field.value_type());
            let bytes = EntityCodec::encode_value(&value).expect("Decoded value must re-encode");
            assert_eq!(EntityCodec::decode_value(&field, &bytes).ok(), Some(value));
        }
    }
});
