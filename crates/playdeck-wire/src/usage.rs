//! Token usage snapshots and per-model cost accounting

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::de::{lenient_u64, null_as_default};

/// Payload of a `usage` envelope
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UsagePayload {
    #[serde(deserialize_with = "null_as_default")]
    pub usage: RawUsage,
    pub model: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub cumulative: bool,
}

/// Token counts as the server reports them
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawUsage {
    #[serde(deserialize_with = "lenient_u64")]
    pub input_tokens: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub output_tokens: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub total_tokens: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub input_tokens_details: InputTokenDetails,
    #[serde(deserialize_with = "null_as_default")]
    pub output_tokens_details: OutputTokenDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InputTokenDetails {
    #[serde(deserialize_with = "lenient_u64")]
    pub cached_tokens: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputTokenDetails {
    #[serde(deserialize_with = "lenient_u64")]
    pub reasoning_tokens: u64,
}

/// The one live usage snapshot. A newer snapshot replaces it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cached_tokens: u64,
    pub reasoning_tokens: u64,
    pub model: Option<String>,
    pub is_cumulative: bool,
}

impl From<UsagePayload> for UsageSnapshot {
    fn from(payload: UsagePayload) -> Self {
        let usage = payload.usage;
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            cached_tokens: usage.input_tokens_details.cached_tokens,
            reasoning_tokens: usage.output_tokens_details.reasoning_tokens,
            model: payload.model,
            is_cumulative: payload.cumulative,
        }
    }
}

impl UsageSnapshot {
    /// Calculate cost for this snapshot with the given rates
    pub fn calculate_cost(&self, rates: &RateCard) -> CostBreakdown {
        let uncached = self.input_tokens.saturating_sub(self.cached_tokens);
        let input = (uncached as f64 / 1_000_000.0) * rates.input;
        let cached = (self.cached_tokens as f64 / 1_000_000.0) * rates.cached;
        let output = (self.output_tokens as f64 / 1_000_000.0) * rates.output;

        CostBreakdown {
            input,
            cached,
            output,
            total: input + cached + output,
        }
    }
}

/// Price per million tokens for one model
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateCard {
    pub input: f64,
    #[serde(default)]
    pub cached: f64,
    pub output: f64,
}

impl RateCard {
    pub const fn new(input: f64, cached: f64, output: f64) -> Self {
        Self {
            input,
            cached,
            output,
        }
    }
}

/// Cost breakdown in dollars
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input: f64,
    pub cached: f64,
    pub output: f64,
    pub total: f64,
}

const BUILTIN_RATES: &[(&str, RateCard)] = &[
    ("gpt-5.2", RateCard::new(1.75, 0.175, 14.00)),
    ("gpt-5.1", RateCard::new(1.25, 0.125, 10.00)),
    ("gpt-5", RateCard::new(1.25, 0.125, 10.00)),
    ("gpt-5-mini", RateCard::new(0.25, 0.025, 2.00)),
    ("gpt-5-nano", RateCard::new(0.05, 0.005, 0.40)),
    ("gpt-4.1", RateCard::new(2.00, 0.50, 8.00)),
    ("gpt-4.1-mini", RateCard::new(0.40, 0.10, 1.60)),
    ("gpt-4.1-nano", RateCard::new(0.10, 0.025, 0.40)),
    ("gpt-4o", RateCard::new(2.50, 1.25, 10.00)),
    ("gpt-4o-mini", RateCard::new(0.15, 0.075, 0.60)),
];

/// Rate cards keyed by model id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    cards: BTreeMap<String, RateCard>,
}

impl Default for RateTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RateTable {
    /// An empty table; every model is unknown
    pub fn empty() -> Self {
        Self {
            cards: BTreeMap::new(),
        }
    }

    /// The fixed table shipped with the client
    pub fn builtin() -> Self {
        Self {
            cards: BUILTIN_RATES
                .iter()
                .map(|(id, card)| (id.to_string(), *card))
                .collect(),
        }
    }

    /// Add or replace a model's rates
    pub fn insert(&mut self, model: impl Into<String>, card: RateCard) {
        self.cards.insert(model.into(), card);
    }

    /// Look up a model by id.
    ///
    /// Exact ids win; otherwise the longest registered id that prefixes the
    /// model followed by `-` matches, so dated snapshots such as
    /// `gpt-4o-2024-08-06` price like `gpt-4o`.
    pub fn lookup(&self, model: &str) -> Option<&RateCard> {
        if let Some(card) = self.cards.get(model) {
            return Some(card);
        }
        self.cards
            .iter()
            .filter(|(id, _)| {
                model
                    .strip_prefix(id.as_str())
                    .is_some_and(|rest| rest.starts_with('-'))
            })
            .max_by_key(|(id, _)| id.len())
            .map(|(_, card)| card)
    }

    /// Cost of a snapshot, or `None` when the model has no rate card.
    ///
    /// `fallback_model` prices snapshots whose envelope did not name a model.
    pub fn cost_for(
        &self,
        snapshot: &UsageSnapshot,
        fallback_model: Option<&str>,
    ) -> Option<CostBreakdown> {
        let model = snapshot.model.as_deref().or(fallback_model)?;
        self.lookup(model).map(|card| snapshot.calculate_cost(card))
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_cost_with_cached_tokens() {
        let snapshot = UsageSnapshot {
            input_tokens: 1000,
            cached_tokens: 200,
            output_tokens: 500,
            ..Default::default()
        };
        let cost = snapshot.calculate_cost(&RateCard::new(1.75, 0.175, 14.00));
        assert!(close(cost.input, 0.0014), "input: {}", cost.input);
        assert!(close(cost.cached, 0.000035), "cached: {}", cost.cached);
        assert!(close(cost.output, 0.007), "output: {}", cost.output);
        assert!(close(cost.total, 0.008435), "total: {}", cost.total);
    }

    #[test]
    fn test_cached_exceeding_input_does_not_underflow() {
        let snapshot = UsageSnapshot {
            input_tokens: 10,
            cached_tokens: 50,
            ..Default::default()
        };
        let cost = snapshot.calculate_cost(&RateCard::new(1.0, 0.1, 1.0));
        assert_eq!(cost.input, 0.0);
    }

    #[test]
    fn test_snapshot_from_payload() {
        let payload: UsagePayload = serde_json::from_value(json!({
            "usage": {
                "input_tokens": 1200,
                "output_tokens": 300,
                "total_tokens": 1500,
                "input_tokens_details": {"cached_tokens": 1024},
                "output_tokens_details": {"reasoning_tokens": 64}
            },
            "model": "gpt-5.2",
            "cumulative": true
        }))
        .unwrap();
        let snapshot = UsageSnapshot::from(payload);
        assert_eq!(snapshot.cached_tokens, 1024);
        assert_eq!(snapshot.reasoning_tokens, 64);
        assert_eq!(snapshot.total_tokens, 1500);
        assert!(snapshot.is_cumulative);
        assert_eq!(snapshot.model.as_deref(), Some("gpt-5.2"));
    }

    #[test]
    fn test_missing_details_default_to_zero() {
        let payload: UsagePayload =
            serde_json::from_value(json!({"usage": {"input_tokens": 5}})).unwrap();
        let snapshot = UsageSnapshot::from(payload);
        assert_eq!(snapshot.input_tokens, 5);
        assert_eq!(snapshot.cached_tokens, 0);
        assert!(!snapshot.is_cumulative);
        assert!(snapshot.model.is_none());
    }

    #[test]
    fn test_null_details_and_fractional_counts() {
        let payload: UsagePayload = serde_json::from_value(json!({
            "usage": {
                "input_tokens": 100,
                "output_tokens": 20.0,
                "total_tokens": 120,
                "input_tokens_details": null,
                "output_tokens_details": null
            },
            "model": null,
            "cumulative": null
        }))
        .unwrap();
        let snapshot = UsageSnapshot::from(payload);
        assert_eq!(snapshot.output_tokens, 20);
        assert_eq!(snapshot.cached_tokens, 0);
        assert_eq!(snapshot.reasoning_tokens, 0);
        assert!(!snapshot.is_cumulative);
    }

    #[test]
    fn test_lookup_prefers_longest_prefix() {
        let table = RateTable::builtin();
        assert_eq!(
            table.lookup("gpt-5-mini-2025-08-07"),
            Some(&RateCard::new(0.25, 0.025, 2.00))
        );
        assert_eq!(
            table.lookup("gpt-4o-2024-08-06"),
            Some(&RateCard::new(2.50, 1.25, 10.00))
        );
        assert!(table.lookup("gpt-4").is_none());
        assert!(table.lookup("claude-sonnet").is_none());
    }

    #[test]
    fn test_cost_for_unknown_model_is_none() {
        let table = RateTable::builtin();
        let snapshot = UsageSnapshot {
            model: Some("mystery-model".into()),
            input_tokens: 10,
            ..Default::default()
        };
        assert!(table.cost_for(&snapshot, None).is_none());
    }

    #[test]
    fn test_cost_for_uses_fallback_model() {
        let table = RateTable::builtin();
        let snapshot = UsageSnapshot {
            input_tokens: 1_000_000,
            ..Default::default()
        };
        let cost = table.cost_for(&snapshot, Some("gpt-5.2")).unwrap();
        assert!(close(cost.total, 1.75));
    }

    #[test]
    fn test_insert_overrides_builtin() {
        let mut table = RateTable::builtin();
        table.insert("gpt-5.2", RateCard::new(2.0, 0.2, 16.0));
        assert_eq!(table.lookup("gpt-5.2").map(|c| c.input), Some(2.0));
    }
}
