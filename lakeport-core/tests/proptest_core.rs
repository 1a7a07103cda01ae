//! Property-based tests for value conformance and naming using proptest.

use proptest::prelude::*;

use lakeport_core::destination::postgres::{dataset_name, dataset_prefix};
use lakeport_core::normalize::conform_value;
use lakeport_core::request::ProjectRef;
use lakeport_core::types::{LogicalType, Value};

// --- Value conformance properties ---

proptest! {
    #[test]
    fn bigint_text_roundtrips(v in any::<i64>()) {
        let value = conform_value(Some(&v.to_string()), LogicalType::BigInt);
        prop_assert_eq!(value.clone(), Some(Value::Int(v)));
        prop_assert_eq!(value.and_then(|v| v.render()), Some(v.to_string()));
    }

    #[test]
    fn integer_rejects_values_beyond_i32(v in (i64::from(i32::MAX) + 1)..i64::MAX) {
        prop_assert_eq!(conform_value(Some(&v.to_string()), LogicalType::Integer), None);
    }

    #[test]
    fn decimal_text_is_kept_verbatim(int in 0u64..1_000_000_000, frac in 0u32..10_000, neg in any::<bool>()) {
        let text = format!("{}{}.{}", if neg { "-" } else { "" }, int, frac);
        let value = conform_value(Some(&text), LogicalType::decimal());
        prop_assert_eq!(value.and_then(|v| v.render()), Some(text));
    }

    #[test]
    fn decimal_rejects_letters(word in "[a-df-z]{1,8}") {
        prop_assert_eq!(conform_value(Some(&word), LogicalType::decimal()), None);
    }

    #[test]
    fn missing_cells_are_null_for_every_type(idx in 0usize..6) {
        let types = [
            LogicalType::BigInt,
            LogicalType::Text,
            LogicalType::Boolean,
            LogicalType::Date,
            LogicalType::Binary,
            LogicalType::Uuid,
        ];
        prop_assert_eq!(conform_value(None, types[idx]), Some(Value::Null));
    }

    #[test]
    fn binary_hex_roundtrips(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        let value = conform_value(Some(&hex), LogicalType::Binary);
        prop_assert_eq!(value.clone(), Some(Value::Bytes(bytes)));
        prop_assert_eq!(value.and_then(|v| v.render()), Some(hex));
    }

    #[test]
    fn text_keeps_surrounding_whitespace(body in "[a-z]{1,10}", pad in " {0,3}") {
        let text = format!("{pad}{body}{pad}");
        prop_assert_eq!(conform_value(Some(&text), LogicalType::Text), Some(Value::Text(text)));
    }
}

// --- Naming properties ---

proptest! {
    #[test]
    fn dataset_names_are_lowercase_and_prefixed(
        name in "[A-Za-z][A-Za-z0-9]{0,12}",
        schema in "[A-Za-z][A-Za-z0-9_]{0,12}",
        date in 10_000_000u32..99_999_999,
        time in 0u32..999_999,
    ) {
        let project = ProjectRef::new(name, format!("{date}_{time:06}"));
        prop_assert!(project.validate().is_ok());
        let dataset = dataset_name(&project, &schema);
        prop_assert_eq!(dataset.clone(), dataset.to_lowercase());
        prop_assert!(dataset.starts_with(&dataset_prefix(&project)));
    }

    #[test]
    fn start_times_need_the_fixed_shape(start in "[0-9]{1,7}_[0-9]{6}") {
        let project = ProjectRef::new("acme", start);
        prop_assert!(project.validate().is_err());
    }

    #[test]
    fn project_names_reject_whitespace(left in "[a-z]{1,6}", right in "[a-z]{1,6}") {
        let project = ProjectRef::new(format!("{left} {right}"), "20250101_120000");
        prop_assert!(project.validate().is_err());
    }
}
