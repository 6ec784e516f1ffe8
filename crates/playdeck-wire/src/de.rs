//! Lenient field deserializers for server payloads.
//!
//! The server emits `null` for absent lists and flags, and fractional
//! numbers for counters and durations. Neither should sink a whole envelope.

use serde::{Deserialize, Deserializer};

/// `null` deserializes as `T::default()`
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Any JSON number, rounded and clamped at zero; `null` is zero
pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_u64(deserializer)?.unwrap_or_default())
}

/// Like [`lenient_u64`], but `null` stays `None`
pub(crate) fn lenient_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?
        .filter(|n| n.is_finite())
        .map(|n| n.max(0.0).round() as u64))
}
