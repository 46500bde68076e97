//! Serde helpers that carry `f64` values by bit pattern.
//!
//! JSON has no spelling for infinities or `NaN`, and `serde_json` writes them
//! as `null`. Values cross the group as the `u64` from [`f64::to_bits`]
//! instead, so every float arrives exactly as it was sent, signed zeros and
//! `NaN` payloads included.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serializer};

/// For a single `f64` field: `#[serde(with = "crate::codec::f64_bits")]`.
pub mod f64_bits {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        u64::deserialize(deserializer).map(f64::from_bits)
    }
}

/// For a `BTreeMap<String, f64>` field.
pub mod f64_bits_map {
    use super::*;

    pub fn serialize<S: Serializer>(
        entries: &BTreeMap<String, f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(entries.iter().map(|(key, value)| (key, value.to_bits())))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, f64>, D::Error> {
        let raw = BTreeMap::<String, u64>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|(key, bits)| (key, f64::from_bits(bits)))
            .collect())
    }
}

/// Equality on bit patterns: `0.0` and `-0.0` differ, `NaN` equals itself.
pub fn same_value(a: f64, b: f64) -> bool {
    a.to_bits() == b.to_bits()
}
