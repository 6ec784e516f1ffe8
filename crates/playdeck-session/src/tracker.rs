//! Live token usage and derived cost

use playdeck_wire::{CostBreakdown, RateTable, UsageSnapshot};

/// Holds the one live usage snapshot.
///
/// Cost is computed on every read, so replacing the rate table reprices
/// the current snapshot too.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    snapshot: Option<UsageSnapshot>,
    rates: RateTable,
    default_model: Option<String>,
}

impl UsageTracker {
    pub fn new(rates: RateTable, default_model: Option<String>) -> Self {
        Self {
            snapshot: None,
            rates,
            default_model,
        }
    }

    /// Replace the snapshot wholesale
    pub fn update(&mut self, snapshot: UsageSnapshot) -> &UsageSnapshot {
        self.snapshot.insert(snapshot)
    }

    pub fn snapshot(&self) -> Option<&UsageSnapshot> {
        self.snapshot.as_ref()
    }

    /// Cost of the live snapshot, `None` if there is none or the model is unpriced
    pub fn cost(&self) -> Option<CostBreakdown> {
        let snapshot = self.snapshot.as_ref()?;
        self.rates
            .cost_for(snapshot, self.default_model.as_deref())
    }

    pub fn set_rates(&mut self, rates: RateTable) {
        self.rates = rates;
    }

    pub fn rates(&self) -> &RateTable {
        &self.rates
    }

    pub fn clear(&mut self) {
        self.snapshot = None;
    }
}
