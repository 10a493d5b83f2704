//! Cost and usage ledger.
//!
//! Accumulates call counts, wall-clock time and tiered token cost per
//! pipeline stage and per model class. Shared by every candidate of a run
//! behind an `Arc`; all updates are additive.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::generation::Usage;

/// Pipeline stage a generation call is billed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// First-stage drafting of candidate documents.
    Generation,
    /// Analyzer-driven single-file fixes.
    StaticRepair,
    /// Test-driven corrections.
    DynamicRepair,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Generation, Stage::StaticRepair, Stage::DynamicRepair];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Generation => "generation",
            Stage::StaticRepair => "static repair",
            Stage::DynamicRepair => "dynamic repair",
        };
        write!(f, "{s}")
    }
}

/// Pricing class of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelClass {
    Standard,
    Escalated,
}

/// `(max_tokens, price per 1024 tokens)`; the first tier whose threshold
/// covers the token count prices the whole call.
pub type PriceTiers = Vec<(u64, f64)>;

/// Input and output tiers of one model class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassPricing {
    pub input: PriceTiers,
    pub output: PriceTiers,
}

/// Pricing for both model classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingTable {
    /// Models whose name starts with this prefix are billed as [`ModelClass::Escalated`].
    pub escalated_prefix: String,
    pub standard: ClassPricing,
    pub escalated: ClassPricing,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            escalated_prefix: "gpt-4".to_string(),
            standard: ClassPricing {
                input: vec![(4096, 0.0015), (16384, 0.002)],
                output: vec![(4096, 0.002), (16384, 0.004)],
            },
            escalated: ClassPricing {
                input: vec![(8192, 0.03), (32768, 0.06)],
                output: vec![(8192, 0.06), (32768, 0.12)],
            },
        }
    }
}

impl PricingTable {
    pub fn classify(&self, model: &str) -> ModelClass {
        if model.starts_with(&self.escalated_prefix) {
            ModelClass::Escalated
        } else {
            ModelClass::Standard
        }
    }

    pub fn pricing(&self, class: ModelClass) -> &ClassPricing {
        match class {
            ModelClass::Standard => &self.standard,
            ModelClass::Escalated => &self.escalated,
        }
    }
}

/// Price `tokens` by bracket, not marginally. Counts above the largest
/// threshold use the largest bracket.
pub fn tiered_cost(tokens: u64, tiers: &[(u64, f64)]) -> f64 {
    let rate = tiers
        .iter()
        .find(|(threshold, _)| tokens <= *threshold)
        .or_else(|| tiers.last())
        .map(|(_, rate)| *rate)
        .unwrap_or(0.0);
    tokens as f64 * rate / 1024.0
}

/// Token and cost totals of one model class within a stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

/// Totals of one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageStats {
    pub total_calls: u64,
    pub total_time: Duration,
    pub per_model: BTreeMap<ModelClass, ModelStats>,
}

impl StageStats {
    pub fn total_cost(&self) -> f64 {
        self.per_model.values().map(|m| m.total_cost).sum()
    }
}

/// Snapshot of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub stages: BTreeMap<Stage, StageStats>,
    pub attempts: u32,
    pub total_time: Duration,
    pub total_calls: u64,
    pub total_cost: f64,
}

impl RunStats {
    pub fn stage(&self, stage: Stage) -> StageStats {
        self.stages.get(&stage).cloned().unwrap_or_default()
    }
}

/// Concurrent-safe, append-only accumulator.
#[derive(Debug, Default)]
pub struct CostLedger {
    pricing: PricingTable,
    stages: Mutex<BTreeMap<Stage, StageStats>>,
}

impl CostLedger {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            stages: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Stage, StageStats>> {
        // Updates are single additive steps, so a poisoned map is still consistent.
        self.stages.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one service call and its usage.
    pub fn record_usage(&self, stage: Stage, usage: &Usage) {
        let class = self.pricing.classify(&usage.model);
        let pricing = self.pricing.pricing(class);
        let input_cost = tiered_cost(usage.prompt_tokens, &pricing.input);
        let output_cost = tiered_cost(usage.completion_tokens, &pricing.output);

        let mut stages = self.lock();
        let stats = stages.entry(stage).or_default();
        stats.total_calls += 1;
        let model = stats.per_model.entry(class).or_default();
        model.input_tokens += usage.prompt_tokens;
        model.output_tokens += usage.completion_tokens;
        model.input_cost += input_cost;
        model.output_cost += output_cost;
        model.total_cost += input_cost + output_cost;
    }

    /// Add wall-clock time spent in `stage`.
    pub fn record_time(&self, stage: Stage, elapsed: Duration) {
        self.lock().entry(stage).or_default().total_time += elapsed;
    }

    pub fn total_cost(&self) -> f64 {
        self.lock().values().map(StageStats::total_cost).sum()
    }

    /// Aggregate everything recorded so far.
    pub fn snapshot(&self, attempts: u32, total_time: Duration) -> RunStats {
        let stages = self.lock().clone();
        RunStats {
            total_calls: stages.values().map(|s| s.total_calls).sum(),
            total_cost: stages.values().map(StageStats::total_cost).sum(),
            stages,
            attempts,
            total_time,
        }
    }
}
