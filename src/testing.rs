//! Fixtures shared by unit tests.

use std::collections::BTreeMap;

use crate::config::Parameters;
use crate::model::entity::{Patient, PatientId, SeverityScore, SurvivalBand};

pub fn two_type_parameters(general: usize, burn: usize) -> Parameters {
    Parameters::builder()
        .clear_resources()
        .resource("general", general, 100.0)
        .resource("burn", burn, 300.0)
        .build()
        .unwrap()
}

pub fn patient(id: PatientId, survival_if_not_admitted: f64, survival_if_admitted: f64) -> Patient {
    Patient {
        id,
        severity: SeverityScore::default(),
        survival_if_admitted,
        survival_if_not_admitted,
        survival_band: SurvivalBand::Moderate,
        occupancy_days: BTreeMap::from([("general".to_string(), 2), ("burn".to_string(), 3)]),
        trauma: None,
    }
}
