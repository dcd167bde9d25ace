//! ICU bed-allocation policy simulator.
//!
//! Synthetic patient cohorts are drawn from SOFA-like severity distributions
//! ([`generate`]), allocated to typed, capacity-limited ICU beds by competing
//! [`strategy`] implementations (greedy orderings and a binary program solved
//! by the built-in [`solver`]), and compared over repeated Monte-Carlo trials
//! ([`simulate`]). Parameters, scenarios and reports can be kept in a JSON
//! file [`store`].
//!
//! The library only emits `tracing` events; installing a subscriber is up to
//! the caller.

pub mod config;
pub mod error;
pub mod generate;
pub mod ledger;
pub mod model;
pub mod simulate;
pub mod solver;
pub mod store;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use config::{Experiment, Parameters, ParametersBuilder, SimulationConfig};
pub use error::{AllocationConsistencyError, ConfigError, SimulationError, StoreError, StrategyError};
pub use generate::Generator;
pub use model::allocation::{Allocation, AllocationResult};
pub use model::entity::{Organ, Patient, SeverityScore};
pub use model::scenario::Scenario;
pub use simulate::{SimulationReport, Simulator, StrategyStats};
pub use strategy::{Strategy, StrategyKind};
