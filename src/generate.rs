//! Synthetic patient populations.
//!
//! Sub-scores are drawn independently per organ; no correlation between organ
//! systems is modelled.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::{Parameters, WeightSet};
use crate::error::ConfigError;
use crate::model::entity::{Organ, Patient, PatientId, SeverityScore, SurvivalBand, TraumaPriority};
use crate::model::scenario::{Scenario, ScenarioId};

const OCCUPANCY_DAYS: std::ops::RangeInclusive<u32> = 1..=10;
const ACT_TIME: std::ops::Range<f64> = 5.0..60.0;
const MAX_PRIORITY: u8 = 5;

/// Per-organ categorical samplers, in `Organ::ALL` order.
#[derive(Debug, Clone)]
struct SeveritySampler {
    organs: Vec<WeightedIndex<f64>>,
}

impl SeveritySampler {
    fn new(weights: &WeightSet) -> Result<SeveritySampler, ConfigError> {
        let organs = Organ::ALL
            .into_iter()
            .map(|organ| {
                WeightedIndex::new(weights.get(organ).iter().copied())
                    .map_err(|_| ConfigError::DegenerateWeights { organ: organ.to_string() })
            })
            .collect::<Result<_, _>>()?;
        Ok(SeveritySampler { organs })
    }

    fn sample(&self, rng: &mut SmallRng) -> SeverityScore {
        let mut draws = [0u8; Organ::ALL.len()];
        for (slot, index) in draws.iter_mut().zip(&self.organs) {
            *slot = index.sample(rng) as u8;
        }
        let [respiration, coagulation, liver, cardiovascular, neurological, renal] = draws;
        SeverityScore { respiration, coagulation, liver, cardiovascular, neurological, renal }
    }
}

pub struct Generator {
    parameters: Arc<Parameters>,
    baseline: SeveritySampler,
    epidemic: BTreeMap<String, SeveritySampler>,
    rng: SmallRng,
}

impl Generator {
    pub fn new(parameters: Arc<Parameters>) -> Result<Generator, ConfigError> {
        Generator::with_rng(parameters, SmallRng::from_entropy())
    }

    pub fn seeded(parameters: Arc<Parameters>, seed: u64) -> Result<Generator, ConfigError> {
        Generator::with_rng(parameters, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(parameters: Arc<Parameters>, rng: SmallRng) -> Result<Generator, ConfigError> {
        let baseline = SeveritySampler::new(parameters.weights())?;
        let epidemic = parameters
            .epidemic_profile_names()
            .map(|name| {
                let sampler = SeveritySampler::new(parameters.epidemic_profile(name)?)?;
                Ok((name.to_string(), sampler))
            })
            .collect::<Result<_, ConfigError>>()?;
        Ok(Generator { parameters, baseline, epidemic, rng })
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    pub fn sample_severity_score(&mut self) -> SeverityScore {
        self.baseline.sample(&mut self.rng)
    }

    /// Draws from a named epidemic profile, never from the baseline.
    pub fn sample_epidemic_severity(&mut self, profile: &str) -> Result<SeverityScore, ConfigError> {
        let sampler = self
            .epidemic
            .get(profile)
            .ok_or_else(|| ConfigError::UnknownEpidemicProfile(profile.to_string()))?;
        Ok(sampler.sample(&mut self.rng))
    }

    pub fn generate_patient(
        &mut self,
        id: PatientId,
        is_trauma: bool,
        act_time: f64,
        critical_area: bool,
    ) -> Result<Patient, ConfigError> {
        let severity = self.sample_severity_score();
        let total = severity.total();
        let survival_if_admitted = self.parameters.survival_if_admitted(total)?;
        let outside = self.parameters.survival_if_not_admitted(total)?;
        let occupancy_days = self
            .parameters
            .resources()
            .iter()
            .map(|spec| (spec.name.clone(), self.rng.gen_range(OCCUPANCY_DAYS)))
            .collect();
        let trauma = is_trauma.then(|| trauma_priority(&severity, outside.band, act_time, critical_area));
        Ok(Patient {
            id,
            severity,
            survival_if_admitted,
            survival_if_not_admitted: outside.probability,
            survival_band: outside.band,
            occupancy_days,
            trauma,
        })
    }

    /// `n` patients with ids `1..=n`; trauma flag, injury time and critical
    /// area are drawn independently per patient.
    pub fn generate_scenario(&mut self, id: ScenarioId, n: usize) -> Result<Scenario, ConfigError> {
        let last = PatientId::try_from(n).map_err(|_| ConfigError::PopulationTooLarge(n))?;
        let patients = (1..=last)
            .map(|patient_id| {
                let is_trauma = self.rng.gen_bool(0.5);
                let act_time = self.rng.gen_range(ACT_TIME);
                let critical_area = self.rng.gen_bool(0.5);
                self.generate_patient(patient_id, is_trauma, act_time, critical_area)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Scenario::new(id, patients, Arc::clone(&self.parameters))
    }

    /// New snapshot with every severity redrawn from `profile`.
    pub fn epidemic_scenario(&mut self, scenario: &Scenario, profile: &str) -> Result<Scenario, ConfigError> {
        let severities = (0..scenario.patients().len())
            .map(|_| self.sample_epidemic_severity(profile))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(scenario.with_severities(severities))
    }
}

/// Admission and non-admission priority for a trauma (burn) patient.
pub fn trauma_priority(
    severity: &SeverityScore,
    band: SurvivalBand,
    act_time: f64,
    critical_area: bool,
) -> TraumaPriority {
    let total = severity.total();

    let urgency = if act_time > 40.0 {
        5
    } else if act_time >= 20.0 {
        3
    } else {
        1
    };
    let severity_bucket = match total {
        0..=5 => 1,
        6..=9 => 2,
        10..=11 => 3,
        _ => 4,
    };
    let admitted = urgency
        + u8::from(critical_area)
        + severity_bucket
        + u8::from(severity.respiration >= 3)
        + u8::from(severity.cardiovascular >= 3);

    // 4 is never produced.
    let not_admitted = if band == SurvivalBand::VeryLow {
        1
    } else if total <= 5 && !critical_area {
        5
    } else if (6..=9).contains(&total) {
        3
    } else {
        2
    };

    TraumaPriority { admitted: admitted.min(MAX_PRIORITY), not_admitted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn score(respiration: u8, cardiovascular: u8, rest: u8) -> SeverityScore {
        SeverityScore {
            respiration,
            coagulation: rest,
            liver: 0,
            cardiovascular,
            neurological: 0,
            renal: 0,
        }
    }

    #[test]
    fn admitted_priority_is_capped() {
        let p = trauma_priority(&score(4, 4, 4), SurvivalBand::Low, 50.0, true);
        assert_eq!(p.admitted, 5);
    }

    #[test]
    fn admitted_priority_minimum() {
        let p = trauma_priority(&score(0, 0, 0), SurvivalBand::VeryHigh, 10.0, false);
        assert_eq!(p.admitted, 2);
        assert_eq!(p.not_admitted, 5);
    }

    #[test]
    fn act_time_buckets() {
        let s = score(0, 0, 0);
        assert_eq!(trauma_priority(&s, SurvivalBand::High, 19.9, false).admitted, 2);
        assert_eq!(trauma_priority(&s, SurvivalBand::High, 20.0, false).admitted, 4);
        assert_eq!(trauma_priority(&s, SurvivalBand::High, 40.0, false).admitted, 4);
        assert_eq!(trauma_priority(&s, SurvivalBand::High, 40.5, false).admitted, 5);
    }

    #[test]
    fn not_admitted_rules() {
        // very low outside survival wins over everything else
        assert_eq!(trauma_priority(&score(0, 0, 0), SurvivalBand::VeryLow, 10.0, false).not_admitted, 1);
        // low score but critical area falls through to the catch-all
        assert_eq!(trauma_priority(&score(0, 0, 0), SurvivalBand::High, 10.0, true).not_admitted, 2);
        assert_eq!(trauma_priority(&score(3, 3, 1), SurvivalBand::Low, 10.0, true).not_admitted, 3);
        assert_eq!(trauma_priority(&score(4, 4, 4), SurvivalBand::Low, 10.0, false).not_admitted, 2);
    }

    #[test]
    fn scenario_has_sequential_ids_and_snapshots() {
        let params = Arc::new(Parameters::default());
        let mut generator = Generator::seeded(Arc::clone(&params), 7).unwrap();
        let scenario = generator.generate_scenario(3, 25).unwrap();
        assert_eq!(scenario.id(), 3);
        let ids: Vec<_> = scenario.patients().iter().map(|p| p.id).collect();
        assert_eq!(ids, (1..=25).collect::<Vec<_>>());
        for patient in scenario.patients() {
            let total = patient.severity.total();
            assert_eq!(patient.survival_if_admitted, params.survival_if_admitted(total).unwrap());
            assert_eq!(patient.occupancy_days.len(), params.resources().len());
            assert!(patient.occupancy_days.values().all(|d| OCCUPANCY_DAYS.contains(d)));
        }
    }

    #[test]
    fn seeded_generators_agree() {
        let params = Arc::new(Parameters::default());
        let a = Generator::seeded(Arc::clone(&params), 11).unwrap().generate_scenario(1, 10).unwrap();
        let b = Generator::seeded(params, 11).unwrap().generate_scenario(1, 10).unwrap();
        assert_eq!(a.patients(), b.patients());
    }

    #[test]
    fn epidemic_rewrite_keeps_survival_snapshot() {
        let params = Arc::new(Parameters::default());
        let mut generator = Generator::seeded(params, 5).unwrap();
        let scenario = generator.generate_scenario(1, 30).unwrap();
        let surged = generator.epidemic_scenario(&scenario, "respiratory").unwrap();
        assert_eq!(surged.patients().len(), 30);
        for (before, after) in scenario.patients().iter().zip(surged.patients()) {
            assert_eq!(before.id, after.id);
            assert_eq!(before.survival_if_admitted, after.survival_if_admitted);
            assert_eq!(before.survival_if_not_admitted, after.survival_if_not_admitted);
        }
        assert_eq!(
            generator.epidemic_scenario(&scenario, "cholera").unwrap_err(),
            ConfigError::UnknownEpidemicProfile("cholera".to_string())
        );
    }

    #[test]
    fn epidemic_rewrite_draws_from_the_profile() {
        let params = Arc::new(
            Parameters::builder()
                .epidemic_profile("ards", BTreeMap::from([(Organ::Respiration, vec![0.0, 0.0, 0.0, 0.0, 1.0])]))
                .build()
                .unwrap(),
        );
        let mut generator = Generator::seeded(params, 13).unwrap();
        let scenario = generator.generate_scenario(1, 50).unwrap();
        assert!(scenario.patients().iter().any(|p| p.severity.respiration < 4));

        let surged = generator.epidemic_scenario(&scenario, "ards").unwrap();
        assert!(surged.patients().iter().all(|p| p.severity.respiration == 4));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn population_beyond_patient_ids_is_rejected() {
        let mut generator = Generator::seeded(Arc::new(Parameters::default()), 1).unwrap();
        let n = u32::MAX as usize + 1;
        assert_eq!(generator.generate_scenario(1, n).unwrap_err(), ConfigError::PopulationTooLarge(n));
    }

    #[test]
    fn zero_weight_categories_are_never_drawn() {
        let mut weights: BTreeMap<Organ, Vec<f64>> = WeightSet::baseline().into();
        for organ in Organ::ALL {
            weights.insert(organ, vec![0.0, 0.0, 0.0, 0.0, 1.0]);
        }
        let params = Arc::new(Parameters::builder().weights(weights).build().unwrap());
        let mut generator = Generator::seeded(params, 1).unwrap();
        for _ in 0..20 {
            assert_eq!(generator.sample_severity_score().total(), 24);
        }
    }

    proptest! {
        #[test]
        fn sampled_scores_stay_in_range(seed in any::<u64>()) {
            let mut generator = Generator::seeded(Arc::new(Parameters::default()), seed).unwrap();
            for _ in 0..16 {
                let s = generator.sample_severity_score();
                prop_assert!(s.total() <= 24);
                for organ in Organ::ALL {
                    prop_assert!(s.get(organ) <= 4);
                }
                let e = generator.sample_epidemic_severity("respiratory").unwrap();
                prop_assert!(e.total() <= 24);
            }
        }

        #[test]
        fn priorities_stay_in_range(
            r in 0u8..=4, c in 0u8..=4, rest in 0u8..=4,
            act in 0.0f64..90.0, critical in any::<bool>(), very_low in any::<bool>(),
        ) {
            let band = if very_low { SurvivalBand::VeryLow } else { SurvivalBand::Moderate };
            let p = trauma_priority(&score(r, c, rest), band, act, critical);
            prop_assert!((1..=5).contains(&p.admitted));
            prop_assert!([1, 2, 3, 5].contains(&p.not_admitted));
        }
    }
}
