use thiserror::Error;

use crate::ledger::LedgerError;
use crate::model::entity::{PatientId, ResourceType};
use crate::solver::{ModelError, Status};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("no resource types configured")]
    NoResources,
    #[error("resource type {0:?} declared more than once")]
    DuplicateResource(ResourceType),
    #[error("total capacity is zero")]
    ZeroCapacity,
    #[error("{field} must lie in [0, 1], got {value}")]
    OutOfUnitRange { field: String, value: f64 },
    #[error("{field} must be finite and non-negative, got {value}")]
    Negative { field: String, value: f64 },
    #[error("{table} has no entry for total score {score}")]
    MissingSurvivalEntry { table: &'static str, score: u8 },
    #[error("{table} has {len} entries, expected one per total score 0..=24")]
    SurvivalTableLength { table: &'static str, len: usize },
    #[error("no weights configured for {0}")]
    MissingWeights(String),
    #[error("weights for {organ} must have 5 entries, got {len}")]
    WeightLength { organ: String, len: usize },
    #[error("weights for {organ} must be finite, non-negative and sum to a positive value")]
    DegenerateWeights { organ: String },
    #[error("unknown epidemic profile {0:?}")]
    UnknownEpidemicProfile(String),
    #[error("unknown organ {0:?}")]
    UnknownOrgan(String),
    #[error("simulation needs at least one round")]
    NoRounds,
    #[error("load ratio must be finite and non-negative, got {0}")]
    InvalidLoadRatio(f64),
    #[error("duplicate patient id {0} in scenario")]
    DuplicatePatient(PatientId),
    #[error("patient {patient} has no occupancy days for resource type {resource:?}")]
    MissingOccupancy { patient: PatientId, resource: ResourceType },
    #[error("patient {patient} has occupancy days for unknown resource type {resource:?}")]
    UnknownOccupancy { patient: PatientId, resource: ResourceType },
    #[error("population of {0} patients exceeds the patient id range")]
    PopulationTooLarge(usize),
    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("failed to read configuration: {0}")]
    Io(String),
}

/// A strategy produced an allocation the scenario cannot honour. Always a bug
/// in the strategy, never clamped.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AllocationConsistencyError {
    #[error("patient {0} is not part of the scenario")]
    UnknownPatient(PatientId),
    #[error("patient {patient} assigned to unknown resource type {resource:?}")]
    UnknownResource { patient: PatientId, resource: ResourceType },
    #[error("resource type {resource:?} holds {assigned} patients but has capacity {capacity}")]
    OverCapacity { resource: ResourceType, assigned: usize, capacity: usize },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StrategyError {
    #[error("solver finished without an optimal solution: {0:?}")]
    NotOptimal(Status),
    #[error("optimization model is malformed: {0}")]
    Model(#[from] ModelError),
    #[error("capacity ledger rejected an admission: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no record with {field} = {value} in {collection}")]
    ItemNotFound { collection: String, field: &'static str, value: String },
    #[error("io error on {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("malformed collection {collection}: {source}")]
    Json { collection: String, source: serde_json::Error },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("strategy {strategy} returned an inconsistent allocation: {source}")]
    Inconsistent { strategy: String, source: AllocationConsistencyError },
}
