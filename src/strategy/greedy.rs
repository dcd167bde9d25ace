use std::cmp::Ordering;

use itertools::Itertools;
use tracing::debug;

use super::{summarize, Strategy};
use crate::error::StrategyError;
use crate::ledger::CapacityLedger;
use crate::model::allocation::AllocationResult;
use crate::model::entity::Patient;
use crate::model::scenario::Scenario;

/// Order in which patients are offered a bed. All sorts are stable, so ties
/// keep scenario order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOrder {
    /// Scenario order.
    Arrival,
    /// `survival_if_admitted`, highest first.
    HighSurvival,
    /// Total severity, highest first; ties by trauma admitted-priority
    /// (non-trauma counts as 0), highest first.
    HighSeverity,
    /// Trauma patients first, by admitted-priority descending then
    /// non-admitted priority ascending.
    TraumaPriority,
}

impl AdmissionOrder {
    fn compare(self, a: &Patient, b: &Patient) -> Ordering {
        let admitted = |p: &Patient| p.trauma.map_or(0, |t| t.admitted);
        match self {
            AdmissionOrder::Arrival => Ordering::Equal,
            AdmissionOrder::HighSurvival => b.survival_if_admitted.total_cmp(&a.survival_if_admitted),
            AdmissionOrder::HighSeverity => b
                .severity
                .total()
                .cmp(&a.severity.total())
                .then_with(|| admitted(b).cmp(&admitted(a))),
            AdmissionOrder::TraumaPriority => match (a.trauma, b.trauma) {
                (Some(ta), Some(tb)) => tb
                    .admitted
                    .cmp(&ta.admitted)
                    .then_with(|| ta.not_admitted.cmp(&tb.not_admitted)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        }
    }

    fn strategy_name(self) -> &'static str {
        match self {
            AdmissionOrder::Arrival => "first-fit",
            AdmissionOrder::HighSurvival => "high-survival-first",
            AdmissionOrder::HighSeverity => "high-severity-first",
            AdmissionOrder::TraumaPriority => "trauma-priority-first",
        }
    }
}

/// Offers each patient, in `order`, the first resource type with room.
#[derive(Debug, Clone)]
pub struct Greedy {
    order: AdmissionOrder,
}

impl Greedy {
    pub fn new(order: AdmissionOrder) -> Greedy {
        Greedy { order }
    }

    pub fn first_fit() -> Greedy {
        Greedy::new(AdmissionOrder::Arrival)
    }
}

impl Strategy for Greedy {
    fn name(&self) -> &str {
        self.order.strategy_name()
    }

    fn allocate(&self, scenario: &Scenario) -> Result<AllocationResult, StrategyError> {
        let mut ledger = CapacityLedger::new(scenario.parameters());
        for patient in scenario.patients().iter().sorted_by(|a, b| self.order.compare(a, b)) {
            if ledger.admit_first_fit(patient.id)?.is_none() {
                break;
            }
        }
        let allocation = ledger.into_allocation();
        debug!(
            strategy = self.name(),
            scenario = scenario.id(),
            admitted = allocation.len(),
            "greedy allocation"
        );
        Ok(summarize(scenario, self.name(), allocation))
    }
}
