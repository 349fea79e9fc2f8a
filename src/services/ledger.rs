//! Usage and cost accounting for completed remote calls.

use crate::core::error::Endpoint;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Rate applied to models missing from the pricing table, per million units.
pub const FALLBACK_RATE_PER_MILLION: f64 = 0.5;

/// Ledger name for voice list queries, which use no model.
pub const VOICE_CATALOG: &str = "voice-catalog";

/// Price of one model. Text models bill tokens, speech models bill input
/// characters (output rate zero).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ModelRate {
    pub input_per_million: f64,
    #[serde(default)]
    pub output_per_million: f64,
    #[serde(default)]
    pub description: String,
}

impl ModelRate {
    pub fn input_rate(&self) -> f64 {
        self.input_per_million / 1_000_000.0
    }

    pub fn output_rate(&self) -> f64 {
        self.output_per_million / 1_000_000.0
    }

    pub fn cost(&self, input_units: u64, output_units: u64) -> f64 {
        input_units as f64 * self.input_rate() + output_units as f64 * self.output_rate()
    }
}

pub fn default_pricing() -> BTreeMap<String, ModelRate> {
    let mut table = BTreeMap::new();
    table.insert(
        "MiniMax-M1".to_string(),
        ModelRate {
            input_per_million: 0.4,
            output_per_million: 2.2,
            description: "Top-tier reasoning model".to_string(),
        },
    );
    table.insert(
        "MiniMax-Text-01".to_string(),
        ModelRate {
            input_per_million: 0.2,
            output_per_million: 1.1,
            description: "Fast text model".to_string(),
        },
    );
    table.insert(
        "speech-02-hd".to_string(),
        ModelRate {
            input_per_million: 100.0,
            output_per_million: 0.0,
            description: "HD speech, billed per character".to_string(),
        },
    );
    table.insert(
        "speech-02-turbo".to_string(),
        ModelRate {
            input_per_million: 60.0,
            output_per_million: 0.0,
            description: "Turbo speech, billed per character".to_string(),
        },
    );
    table.insert(
        VOICE_CATALOG.to_string(),
        ModelRate {
            input_per_million: 0.0,
            output_per_million: 0.0,
            description: "Voice list queries".to_string(),
        },
    );
    table
}

/// Read-only after construction.
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: BTreeMap<String, ModelRate>,
    fallback: ModelRate,
}

impl PricingTable {
    pub fn new(rates: BTreeMap<String, ModelRate>) -> Self {
        Self {
            rates,
            fallback: ModelRate {
                input_per_million: FALLBACK_RATE_PER_MILLION,
                output_per_million: FALLBACK_RATE_PER_MILLION,
                description: "Unknown model (estimated pricing)".to_string(),
            },
        }
    }

    pub fn rate(&self, model: &str) -> &ModelRate {
        self.rates.get(model).unwrap_or(&self.fallback)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new(default_pricing())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CallRecord {
    pub endpoint: Endpoint,
    pub model: String,
    pub input_units: u64,
    pub output_units: u64,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ModelUsage {
    pub calls: u64,
    pub input_units: u64,
    pub output_units: u64,
    pub cost: f64,
}

impl ModelUsage {
    pub fn total_units(&self) -> u64 {
        self.input_units + self.output_units
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UsageSummary {
    pub total_calls: u64,
    pub total_units: u64,
    pub total_cost: f64,
    pub most_expensive: Option<(String, f64)>,
    pub most_used: Option<(String, u64)>,
    pub by_model: BTreeMap<String, ModelUsage>,
}

#[derive(Debug, Default)]
struct LedgerState {
    records: Vec<CallRecord>,
    by_model: BTreeMap<String, ModelUsage>,
}

/// Append-only log of successful calls.
///
/// A record and its aggregate update are applied under one write lock, so a
/// summary taken under the read lock always sees whole records.
#[derive(Debug, Default)]
pub struct UsageLedger {
    pricing: PricingTable,
    state: RwLock<LedgerState>,
}

impl UsageLedger {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            state: RwLock::new(LedgerState::default()),
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn record(
        &self,
        model: &str,
        endpoint: Endpoint,
        input_units: u64,
        output_units: u64,
    ) -> CallRecord {
        let cost = self.pricing.rate(model).cost(input_units, output_units);
        let record = CallRecord {
            endpoint,
            model: model.to_string(),
            input_units,
            output_units,
            cost,
            timestamp: Utc::now(),
        };

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let usage = state.by_model.entry(record.model.clone()).or_default();
        usage.calls += 1;
        usage.input_units += input_units;
        usage.output_units += output_units;
        usage.cost += cost;
        state.records.push(record.clone());
        drop(state);

        log::debug!(
            "Recorded {} call on {}: {} in / {} out units, ${:.6}",
            endpoint,
            model,
            input_units,
            output_units,
            cost
        );
        record
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> UsageSummary {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let by_model = state.by_model.clone();
        let records_cost: f64 = state.records.iter().map(|r| r.cost).sum();
        let total_calls = state.records.len() as u64;
        let total_units = state
            .records
            .iter()
            .map(|r| r.input_units + r.output_units)
            .sum();
        drop(state);

        // BTreeMap iteration is by name, so the first maximum wins ties.
        let mut most_expensive: Option<(String, f64)> = None;
        let mut most_used: Option<(String, u64)> = None;
        for (model, usage) in &by_model {
            if most_expensive.as_ref().map_or(true, |(_, c)| usage.cost > *c) {
                most_expensive = Some((model.clone(), usage.cost));
            }
            if most_used.as_ref().map_or(true, |(_, n)| usage.calls > *n) {
                most_used = Some((model.clone(), usage.calls));
            }
        }

        UsageSummary {
            total_calls,
            total_units,
            total_cost: records_cost,
            most_expensive,
            most_used,
            by_model,
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        info!("API usage summary");
        info!("  Total API calls: {}", summary.total_calls);
        info!("  Total units used: {}", summary.total_units);
        info!("  Estimated total cost: ${:.4}", summary.total_cost);
        for (model, usage) in &summary.by_model {
            let rate = self.pricing.rate(model);
            info!(
                "  {}: {} calls, {} in / {} out units, ${:.6} ({})",
                model,
                usage.calls,
                usage.input_units,
                usage.output_units,
                usage.cost,
                rate.description
            );
        }
        if let Some((model, cost)) = &summary.most_expensive {
            info!("  Most expensive model: {} (${:.6})", model, cost);
        }
        if let Some((model, calls)) = &summary.most_used {
            info!("  Most used model: {} ({} calls)", model, calls);
        }
    }
}
