pub mod entity {
    use std::collections::BTreeMap;
    use std::fmt;
    use std::str::FromStr;

    use serde::{Deserialize, Serialize};

    use crate::error::ConfigError;

    pub type PatientId = u32;
    pub type ResourceType = String;

    /// Highest value any single organ sub-score may take.
    pub const MAX_SUB_SCORE: u8 = 4;
    /// Highest possible total severity score.
    pub const MAX_TOTAL_SCORE: u8 = MAX_SUB_SCORE * Organ::ALL.len() as u8;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Organ {
        Respiration,
        Coagulation,
        Liver,
        Cardiovascular,
        Neurological,
        Renal,
    }

    impl Organ {
        pub const ALL: [Organ; 6] = [
            Organ::Respiration,
            Organ::Coagulation,
            Organ::Liver,
            Organ::Cardiovascular,
            Organ::Neurological,
            Organ::Renal,
        ];

        pub fn name(self) -> &'static str {
            match self {
                Organ::Respiration => "respiration",
                Organ::Coagulation => "coagulation",
                Organ::Liver => "liver",
                Organ::Cardiovascular => "cardiovascular",
                Organ::Neurological => "neurological",
                Organ::Renal => "renal",
            }
        }
    }

    impl fmt::Display for Organ {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.name())
        }
    }

    impl FromStr for Organ {
        type Err = ConfigError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Organ::ALL
                .into_iter()
                .find(|organ| organ.name() == s)
                .ok_or_else(|| ConfigError::UnknownOrgan(s.to_string()))
        }
    }

    /// SOFA-like organ dysfunction score. The total is always derived.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SeverityScore {
        pub respiration: u8,
        pub coagulation: u8,
        pub liver: u8,
        pub cardiovascular: u8,
        pub neurological: u8,
        pub renal: u8,
    }

    impl SeverityScore {
        pub fn get(&self, organ: Organ) -> u8 {
            match organ {
                Organ::Respiration => self.respiration,
                Organ::Coagulation => self.coagulation,
                Organ::Liver => self.liver,
                Organ::Cardiovascular => self.cardiovascular,
                Organ::Neurological => self.neurological,
                Organ::Renal => self.renal,
            }
        }

        pub fn total(&self) -> u8 {
            Organ::ALL.iter().map(|organ| self.get(*organ)).sum()
        }
    }

    /// Qualitative survival outlook outside the resource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum SurvivalBand {
        VeryLow,
        Low,
        Moderate,
        High,
        VeryHigh,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TraumaPriority {
        /// 1..=5, higher means the resource matters more.
        pub admitted: u8,
        /// One of 1, 2, 3, 5. 1 means the patient cannot be managed outside.
        pub not_admitted: u8,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Patient {
        pub id: PatientId,
        pub severity: SeverityScore,
        /// Snapshot taken at generation time; not refreshed if `severity` changes.
        pub survival_if_admitted: f64,
        pub survival_if_not_admitted: f64,
        pub survival_band: SurvivalBand,
        pub occupancy_days: BTreeMap<ResourceType, u32>,
        pub trauma: Option<TraumaPriority>,
    }

    impl Patient {
        /// Days the patient would occupy `resource`. [`Scenario::new`] makes
        /// sure every configured type has an entry, so inside a scenario this
        /// never falls back to 0.
        ///
        /// [`Scenario::new`]: super::scenario::Scenario::new
        pub fn days_in(&self, resource: &str) -> u32 {
            self.occupancy_days.get(resource).copied().unwrap_or(0)
        }
    }
}


pub mod scenario {
    use std::collections::HashSet;
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};

    use super::entity::{Patient, PatientId, SeverityScore};
    use crate::config::Parameters;
    use crate::error::ConfigError;

    pub type ScenarioId = u32;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(try_from = "ScenarioRecord")]
    pub struct Scenario {
        id: ScenarioId,
        patients: Vec<Patient>,
        parameters: Arc<Parameters>,
    }

    /// Stored form of a [`Scenario`]; loading goes through [`Scenario::new`].
    #[derive(Deserialize)]
    struct ScenarioRecord {
        id: ScenarioId,
        patients: Vec<Patient>,
        parameters: Arc<Parameters>,
    }

    impl TryFrom<ScenarioRecord> for Scenario {
        type Error = ConfigError;

        fn try_from(raw: ScenarioRecord) -> Result<Self, Self::Error> {
            Scenario::new(raw.id, raw.patients, raw.parameters)
        }
    }

    impl Scenario {
        /// Patient ids must be unique and every patient needs occupancy days
        /// for exactly the configured resource types.
        pub fn new(
            id: ScenarioId,
            patients: Vec<Patient>,
            parameters: Arc<Parameters>,
        ) -> Result<Scenario, ConfigError> {
            let mut seen = HashSet::with_capacity(patients.len());
            if let Some(dup) = patients.iter().find(|p| !seen.insert(p.id)) {
                return Err(ConfigError::DuplicatePatient(dup.id));
            }
            for patient in &patients {
                let missing = parameters.resources().iter().find(|spec| !patient.occupancy_days.contains_key(&spec.name));
                if let Some(spec) = missing {
                    return Err(ConfigError::MissingOccupancy { patient: patient.id, resource: spec.name.clone() });
                }
                if let Some(extra) = patient.occupancy_days.keys().find(|name| parameters.resource(name).is_none()) {
                    return Err(ConfigError::UnknownOccupancy { patient: patient.id, resource: extra.clone() });
                }
            }
            Ok(Scenario { id, patients, parameters })
        }

        pub fn id(&self) -> ScenarioId {
            self.id
        }

        pub fn patients(&self) -> &[Patient] {
            &self.patients
        }

        pub fn parameters(&self) -> &Parameters {
            &self.parameters
        }

        pub fn shared_parameters(&self) -> Arc<Parameters> {
            Arc::clone(&self.parameters)
        }

        pub fn patient(&self, id: PatientId) -> Option<&Patient> {
            self.patients.iter().find(|p| p.id == id)
        }

        /// Snapshot with every patient's severity replaced, in patient order.
        /// Survival probabilities keep their generation-time values.
        pub fn with_severities(&self, severities: impl IntoIterator<Item = SeverityScore>) -> Scenario {
            let patients = self
                .patients
                .iter()
                .zip(severities)
                .map(|(patient, severity)| Patient { severity, ..patient.clone() })
                .collect();
            Scenario { id: self.id, patients, parameters: Arc::clone(&self.parameters) }
        }
    }
}


pub mod allocation {
    use std::collections::{BTreeMap, HashMap};
    use std::ops::Add;

    use serde::{Deserialize, Serialize};

    use super::entity::{PatientId, ResourceType};
    use super::scenario::ScenarioId;

    /// Patient → granted resource type. Absent patients were not admitted.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Allocation(BTreeMap<PatientId, ResourceType>);

    impl Allocation {
        pub fn new() -> Allocation {
            Allocation(BTreeMap::new())
        }

        /// Returns the previous assignment if the patient was already admitted.
        pub fn assign(&mut self, patient: PatientId, resource: ResourceType) -> Option<ResourceType> {
            self.0.insert(patient, resource)
        }

        pub fn get(&self, patient: PatientId) -> Option<&ResourceType> {
            self.0.get(&patient)
        }

        pub fn is_admitted(&self, patient: PatientId) -> bool {
            self.0.contains_key(&patient)
        }

        pub fn len(&self) -> usize {
            self.0.len()
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }

        pub fn iter(&self) -> impl Iterator<Item = (PatientId, &ResourceType)> {
            self.0.iter().map(|(id, resource)| (*id, resource))
        }

        pub fn counts(&self) -> ResourceCounter {
            self.0.values().cloned().collect::<Vec<ResourceType>>().into()
        }
    }

    impl FromIterator<(PatientId, ResourceType)> for Allocation {
        fn from_iter<T: IntoIterator<Item = (PatientId, ResourceType)>>(iter: T) -> Self {
            Allocation(iter.into_iter().collect())
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct ResourceCounter(HashMap<ResourceType, usize>);

    impl ResourceCounter {
        pub fn get(&self, resource: &str) -> usize {
            self.0.get(resource).copied().unwrap_or(0)
        }

        pub fn total(&self) -> usize {
            self.0.values().sum()
        }

        pub fn iter(&self) -> impl Iterator<Item = (&ResourceType, usize)> {
            self.0.iter().map(|(resource, count)| (resource, *count))
        }
    }

    impl From<Vec<ResourceType>> for ResourceCounter {
        fn from(resources: Vec<ResourceType>) -> Self {
            let mut counter = HashMap::new();
            for resource in resources {
                *counter.entry(resource).or_insert(0) += 1;
            }
            ResourceCounter(counter)
        }
    }

    impl Add for ResourceCounter {
        type Output = Self;

        fn add(self, rhs: Self) -> Self::Output {
            let mut counter = self.0;
            for (resource, count) in rhs.0 {
                *counter.entry(resource).or_insert(0) += count;
            }
            ResourceCounter(counter)
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct AllocationResult {
        pub scenario_id: ScenarioId,
        pub strategy: String,
        pub survival_if_admitted: f64,
        pub survival_if_not_admitted: f64,
        pub cost: f64,
        pub allocation: Allocation,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::allocation::Allocation;
    use super::entity::{Organ, SeverityScore};
    use super::scenario::Scenario;
    use crate::error::ConfigError;
    use crate::testing::{patient, two_type_parameters};

    #[test]
    fn total_is_sum_of_sub_scores() {
        let score = SeverityScore {
            respiration: 4,
            coagulation: 1,
            liver: 0,
            cardiovascular: 3,
            neurological: 2,
            renal: 1,
        };
        assert_eq!(score.total(), 11);
        assert_eq!(score.get(Organ::Cardiovascular), 3);
    }

    #[test]
    fn organ_names_round_trip() {
        for organ in Organ::ALL {
            assert_eq!(organ.name().parse::<Organ>().unwrap(), organ);
        }
        assert!("spleen".parse::<Organ>().is_err());
    }

    #[test]
    fn allocation_counts_by_resource() {
        let allocation: Allocation = vec![
            (1, "general".to_string()),
            (2, "burn".to_string()),
            (3, "general".to_string()),
        ]
        .into_iter()
        .collect();
        let counts = allocation.counts();
        assert_eq!(counts.get("general"), 2);
        assert_eq!(counts.get("burn"), 1);
        assert_eq!(counts.get("cardiac"), 0);
        assert_eq!(counts.total(), 3);
        assert!(!allocation.is_admitted(4));
    }

    #[test]
    fn loading_a_scenario_rechecks_patient_ids() {
        let params = Arc::new(two_type_parameters(3, 0));
        let scenario =
            Scenario::new(1, vec![patient(1, 0.0, 0.5), patient(2, 0.0, 0.5), patient(3, 0.0, 0.5)], params).unwrap();
        let mut json = serde_json::to_value(&scenario).unwrap();
        json["patients"][1]["id"] = serde_json::json!(1);

        let err = serde_json::from_value::<Scenario>(json).unwrap_err();
        assert_eq!(err.to_string(), ConfigError::DuplicatePatient(1).to_string());

        let intact = serde_json::to_value(&scenario).unwrap();
        let loaded: Scenario = serde_json::from_value(intact).unwrap();
        assert_eq!(loaded.patients(), scenario.patients());
    }

    #[test]
    fn occupancy_days_must_match_resource_types() {
        let params = Arc::new(two_type_parameters(1, 1));

        let mut short = patient(1, 0.0, 0.5);
        short.occupancy_days.clear();
        assert_eq!(
            Scenario::new(1, vec![short], Arc::clone(&params)).unwrap_err(),
            ConfigError::MissingOccupancy { patient: 1, resource: "general".to_string() }
        );

        let mut extra = patient(2, 0.0, 0.5);
        extra.occupancy_days.insert("cardiac".to_string(), 4);
        assert_eq!(
            Scenario::new(1, vec![extra], params).unwrap_err(),
            ConfigError::UnknownOccupancy { patient: 2, resource: "cardiac".to_string() }
        );
    }
}
