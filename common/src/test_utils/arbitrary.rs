//! Proptest strategies for foreign and domain types.

use proptest::collection::vec;
use proptest::prelude::*;

use crate::amount::Amount;
use crate::id::CorrelationId;
use crate::mobile::Mobile;
use crate::sheba::Sheba;
use crate::time::TimestampMs;

/// An arbitrary [`String`]. Characters are not necessarily ASCII.
pub fn any_string() -> impl Strategy<Value = String> {
    // Bounded length cuts shrink time without losing much coverage for
    // serde roundtrips.
    vec(any::<char>(), 0..64).prop_map(|chars| chars.into_iter().collect())
}

fn any_digits(len: usize) -> impl Strategy<Value = String> {
    vec(0u8..10, len).prop_map(|digits| {
        digits.into_iter().map(|d| char::from(b'0' + d)).collect()
    })
}

/// An arbitrary [`serde_json::Value`] object of string keys and scalar
/// values, the shape used by transaction / request metadata maps.
pub fn any_json_object() -> impl Strategy<Value = serde_json::Value> {
    let scalar = prop_oneof![
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
        any_string().prop_map(serde_json::Value::from),
    ];
    proptest::collection::btree_map(any_string(), scalar, 0..8).prop_map(|m| {
        serde_json::Value::Object(m.into_iter().collect())
    })
}

/// An arbitrary in-bounds [`Amount`].
pub fn any_amount() -> impl Strategy<Value = Amount> {
    (0..=Amount::MAX.tomans()).prop_map(Amount::from_tomans)
}

/// An arbitrary [`TimestampMs`].
pub fn any_timestamp() -> impl Strategy<Value = TimestampMs> {
    (0..i64::MAX).prop_map(TimestampMs::from_millis)
}

/// An arbitrary [`CorrelationId`].
pub fn any_correlation_id() -> impl Strategy<Value = CorrelationId> {
    any::<[u8; 16]>()
        .prop_map(|bytes| CorrelationId::from(uuid::Uuid::from_bytes(bytes)))
}

/// An arbitrary well-formed [`Sheba`].
pub fn any_sheba() -> impl Strategy<Value = Sheba> {
    any_digits(24).prop_map(|digits| {
        format!("IR{digits}").parse().expect("constructed well-formed")
    })
}

/// An arbitrary well-formed [`Mobile`].
pub fn any_mobile() -> impl Strategy<Value = Mobile> {
    any_digits(9).prop_map(|digits| {
        format!("09{digits}").parse().expect("constructed well-formed")
    })
}

#[cfg(test)]
mod test {
    use proptest::proptest;

    use super::*;

    proptest! {
        #[test]
        fn generated_identifiers_are_well_formed(
            sheba in any_sheba(),
            mobile in any_mobile(),
        ) {
            prop_assert_eq!(sheba.as_str().len(), 26);
            prop_assert_eq!(mobile.as_str().len(), 11);
        }
    }
}
