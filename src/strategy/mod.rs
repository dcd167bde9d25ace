//! Allocation strategies.
//!
//! Every strategy is a pure function of the scenario it is handed: no state is
//! kept between calls and the scenario is only read.

mod greedy;
mod optimize;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, StrategyError};
use crate::model::allocation::{Allocation, AllocationResult};
use crate::model::scenario::Scenario;
use crate::solver::{SolveLimits, Solver};

pub use greedy::{AdmissionOrder, Greedy};
pub use optimize::Optimization;

pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;
    fn allocate(&self, scenario: &Scenario) -> Result<AllocationResult, StrategyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    FirstFit,
    HighSurvivalFirst,
    HighSeverityFirst,
    TraumaPriorityFirst,
    Optimization,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::FirstFit,
        StrategyKind::HighSurvivalFirst,
        StrategyKind::HighSeverityFirst,
        StrategyKind::TraumaPriorityFirst,
        StrategyKind::Optimization,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::FirstFit => "first-fit",
            StrategyKind::HighSurvivalFirst => "high-survival-first",
            StrategyKind::HighSeverityFirst => "high-severity-first",
            StrategyKind::TraumaPriorityFirst => "trauma-priority-first",
            StrategyKind::Optimization => "optimization",
        }
    }

    pub fn build(self, solver: Arc<dyn Solver>, limits: SolveLimits) -> Box<dyn Strategy> {
        match self {
            StrategyKind::FirstFit => Box::new(Greedy::new(AdmissionOrder::Arrival)),
            StrategyKind::HighSurvivalFirst => Box::new(Greedy::new(AdmissionOrder::HighSurvival)),
            StrategyKind::HighSeverityFirst => Box::new(Greedy::new(AdmissionOrder::HighSeverity)),
            StrategyKind::TraumaPriorityFirst => Box::new(Greedy::new(AdmissionOrder::TraumaPriority)),
            StrategyKind::Optimization => Box::new(Optimization::new(solver, limits)),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ConfigError::Parse(format!("unknown strategy {s:?}")))
    }
}

/// Projected aggregates for a finished allocation: survival-if-admitted over
/// admitted patients, survival-if-not-admitted over the rest, and the stay
/// cost of admitted patients.
pub fn summarize(scenario: &Scenario, strategy: &str, allocation: Allocation) -> AllocationResult {
    let parameters = scenario.parameters();
    let mut survival_if_admitted = 0.0;
    let mut survival_if_not_admitted = 0.0;
    let mut cost = 0.0;
    for patient in scenario.patients() {
        match allocation.get(patient.id) {
            Some(resource) => {
                survival_if_admitted += patient.survival_if_admitted;
                let daily = parameters.resource(resource).map_or(0.0, |spec| spec.daily_cost);
                cost += f64::from(patient.days_in(resource)) * daily;
            }
            None => survival_if_not_admitted += patient.survival_if_not_admitted,
        }
    }
    AllocationResult {
        scenario_id: scenario.id(),
        strategy: strategy.to_string(),
        survival_if_admitted,
        survival_if_not_admitted,
        cost,
        allocation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::BranchAndBound;

    #[test]
    fn kinds_parse_from_their_names() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.name().parse::<StrategyKind>().unwrap(), kind);
            let built = kind.build(Arc::new(BranchAndBound::default()), SolveLimits::default());
            assert_eq!(built.name(), kind.name());
        }
        assert!("lottery".parse::<StrategyKind>().is_err());
    }
}
