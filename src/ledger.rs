use std::collections::HashSet;

use thiserror::Error;

use crate::config::Parameters;
use crate::error::AllocationConsistencyError;
use crate::model::allocation::Allocation;
use crate::model::entity::{PatientId, ResourceType};
use crate::model::scenario::Scenario;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("unknown resource type {0:?}")]
    UnknownResource(ResourceType),
    #[error("no capacity left for {0:?}")]
    Exhausted(ResourceType),
    #[error("patient {0} already admitted")]
    AlreadyAdmitted(PatientId),
}

/// Remaining capacity per resource type, in declaration order.
#[derive(Debug, Clone)]
pub struct CapacityLedger {
    remaining: Vec<(ResourceType, usize)>,
    allocation: Allocation,
}

impl CapacityLedger {
    pub fn new(parameters: &Parameters) -> CapacityLedger {
        let remaining = parameters
            .resources()
            .iter()
            .map(|spec| (spec.name.clone(), spec.capacity))
            .collect();
        CapacityLedger { remaining, allocation: Allocation::new() }
    }

    pub fn remaining(&self, resource: &str) -> Option<usize> {
        self.remaining.iter().find(|(name, _)| name == resource).map(|(_, left)| *left)
    }

    pub fn total_remaining(&self) -> usize {
        self.remaining.iter().map(|(_, left)| left).sum()
    }

    /// First resource type, in declaration order, that still has room.
    pub fn first_available(&self) -> Option<&ResourceType> {
        self.remaining.iter().find(|(_, left)| *left > 0).map(|(name, _)| name)
    }

    pub fn admit(&mut self, patient: PatientId, resource: &str) -> Result<(), LedgerError> {
        if self.allocation.is_admitted(patient) {
            return Err(LedgerError::AlreadyAdmitted(patient));
        }
        let slot = self
            .remaining
            .iter_mut()
            .find(|(name, _)| name == resource)
            .ok_or_else(|| LedgerError::UnknownResource(resource.to_string()))?;
        if slot.1 == 0 {
            return Err(LedgerError::Exhausted(slot.0.clone()));
        }
        slot.1 -= 1;
        self.allocation.assign(patient, slot.0.clone());
        Ok(())
    }

    /// Admits `patient` to the first type with room; `Ok(None)` only if
    /// everything is full.
    pub fn admit_first_fit(&mut self, patient: PatientId) -> Result<Option<ResourceType>, LedgerError> {
        let resource = match self.first_available() {
            Some(resource) => resource.clone(),
            None => return Ok(None),
        };
        self.admit(patient, &resource)?;
        Ok(Some(resource))
    }

    pub fn into_allocation(self) -> Allocation {
        self.allocation
    }
}

/// Checks an allocation against the scenario it was computed for.
pub fn verify(scenario: &Scenario, allocation: &Allocation) -> Result<(), AllocationConsistencyError> {
    let parameters = scenario.parameters();
    let patients: HashSet<PatientId> = scenario.patients().iter().map(|p| p.id).collect();
    for (patient, resource) in allocation.iter() {
        if !patients.contains(&patient) {
            return Err(AllocationConsistencyError::UnknownPatient(patient));
        }
        if parameters.resource(resource).is_none() {
            return Err(AllocationConsistencyError::UnknownResource {
                patient,
                resource: resource.clone(),
            });
        }
    }
    let counts = allocation.counts();
    for spec in parameters.resources() {
        let assigned = counts.get(&spec.name);
        if assigned > spec.capacity {
            return Err(AllocationConsistencyError::OverCapacity {
                resource: spec.name.clone(),
                assigned,
                capacity: spec.capacity,
            });
        }
    }
    Ok(())
}
