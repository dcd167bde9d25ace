//! Experiment configuration.
//!
//! [`Parameters`] is built once per experiment and shared read-only (behind an
//! `Arc`) by every scenario and strategy. Construction validates everything the
//! generator and strategies later rely on, so lookups during a run only fail if
//! the tables were bypassed.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::entity::{Organ, ResourceType, SurvivalBand, MAX_SUB_SCORE, MAX_TOTAL_SCORE};

pub type ParametersId = u32;

const TABLE_LEN: usize = MAX_TOTAL_SCORE as usize + 1;
const CATEGORIES: usize = MAX_SUB_SCORE as usize + 1;

const IN_TABLE: &str = "survival_if_admitted";
const OUT_TABLE: &str = "survival_if_not_admitted";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: ResourceType,
    pub capacity: usize,
    pub daily_cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutsideOutcome {
    pub probability: f64,
    pub band: SurvivalBand,
}

/// One categorical weight vector per organ, always complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<Organ, Vec<f64>>", into = "BTreeMap<Organ, Vec<f64>>")]
pub struct WeightSet(BTreeMap<Organ, [f64; CATEGORIES]>);

impl WeightSet {
    pub fn get(&self, organ: Organ) -> &[f64; CATEGORIES] {
        // Constructors reject incomplete sets.
        &self.0[&organ]
    }

    /// Completes a partial override from `base`.
    fn overlay(base: &WeightSet, overrides: BTreeMap<Organ, Vec<f64>>) -> Result<WeightSet, ConfigError> {
        let mut organs = base.0.clone();
        for (organ, weights) in overrides {
            organs.insert(organ, check_weights(organ, weights)?);
        }
        Ok(WeightSet(organs))
    }

    /// The baseline case mix.
    pub fn baseline() -> WeightSet {
        WeightSet(BTreeMap::from([
            (Organ::Respiration, [0.4, 0.3, 0.2, 0.05, 0.05]),
            (Organ::Coagulation, [0.5, 0.3, 0.15, 0.04, 0.01]),
            (Organ::Liver, [0.6, 0.2, 0.15, 0.04, 0.01]),
            (Organ::Cardiovascular, [0.5, 0.2, 0.2, 0.07, 0.03]),
            (Organ::Neurological, [0.6, 0.25, 0.1, 0.04, 0.01]),
            (Organ::Renal, [0.5, 0.3, 0.15, 0.04, 0.01]),
        ]))
    }
}

impl TryFrom<BTreeMap<Organ, Vec<f64>>> for WeightSet {
    type Error = ConfigError;

    fn try_from(mut raw: BTreeMap<Organ, Vec<f64>>) -> Result<Self, Self::Error> {
        let organs = Organ::ALL
            .into_iter()
            .map(|organ| {
                let weights = raw
                    .remove(&organ)
                    .ok_or_else(|| ConfigError::MissingWeights(organ.to_string()))?;
                Ok((organ, check_weights(organ, weights)?))
            })
            .collect::<Result<_, ConfigError>>()?;
        Ok(WeightSet(organs))
    }
}

impl From<WeightSet> for BTreeMap<Organ, Vec<f64>> {
    fn from(set: WeightSet) -> Self {
        set.0.into_iter().map(|(organ, weights)| (organ, weights.to_vec())).collect()
    }
}

fn check_weights(organ: Organ, weights: Vec<f64>) -> Result<[f64; CATEGORIES], ConfigError> {
    let len = weights.len();
    let weights: [f64; CATEGORIES] = weights
        .try_into()
        .map_err(|_| ConfigError::WeightLength { organ: organ.to_string(), len })?;
    let sane = weights.iter().all(|w| w.is_finite() && *w >= 0.0);
    if !sane || weights.iter().sum::<f64>() <= 0.0 {
        return Err(ConfigError::DegenerateWeights { organ: organ.to_string() });
    }
    Ok(weights)
}

fn default_resources() -> Vec<ResourceSpec> {
    vec![
        ResourceSpec { name: "general".to_string(), capacity: 8, daily_cost: 1500.0 },
        ResourceSpec { name: "cardiac".to_string(), capacity: 4, daily_cost: 2200.0 },
        ResourceSpec { name: "burn".to_string(), capacity: 3, daily_cost: 2600.0 },
    ]
}

/// Synthetic monotone curve: survival drops with total score.
pub fn default_survival_if_admitted() -> Vec<f64> {
    (0..TABLE_LEN).map(|score| 0.95 - 0.035 * score as f64).collect()
}

pub fn default_survival_if_not_admitted() -> Vec<OutsideOutcome> {
    (0..TABLE_LEN)
        .map(|score| {
            let probability = (0.85 - 0.06 * score as f64).max(0.0);
            OutsideOutcome { probability, band: band_for(probability) }
        })
        .collect()
}

fn band_for(probability: f64) -> SurvivalBand {
    match probability {
        p if p >= 0.8 => SurvivalBand::VeryHigh,
        p if p >= 0.6 => SurvivalBand::High,
        p if p >= 0.4 => SurvivalBand::Moderate,
        p if p >= 0.2 => SurvivalBand::Low,
        _ => SurvivalBand::VeryLow,
    }
}

fn default_epidemic_overrides() -> BTreeMap<String, BTreeMap<Organ, [f64; CATEGORIES]>> {
    let surge = [0.1, 0.2, 0.3, 0.3, 0.1];
    BTreeMap::from([(
        "respiratory".to_string(),
        BTreeMap::from([(Organ::Respiration, surge), (Organ::Renal, surge)]),
    )])
}

/// Unvalidated parameter document, as read from disk or assembled by the builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParametersBuilder {
    id: ParametersId,
    resources: Vec<ResourceSpec>,
    ideal_occupancy_rate: f64,
    penalty_multiplier: f64,
    survival_weight: f64,
    cost_weight: f64,
    survival_if_admitted: Vec<f64>,
    survival_if_not_admitted: Vec<OutsideOutcome>,
    weights: Option<BTreeMap<Organ, Vec<f64>>>,
    epidemic_profiles: BTreeMap<String, BTreeMap<Organ, Vec<f64>>>,
}

impl Default for ParametersBuilder {
    fn default() -> Self {
        ParametersBuilder {
            id: 0,
            resources: default_resources(),
            ideal_occupancy_rate: 0.85,
            penalty_multiplier: 10.0,
            survival_weight: 1.0,
            cost_weight: 1e-5,
            survival_if_admitted: default_survival_if_admitted(),
            survival_if_not_admitted: default_survival_if_not_admitted(),
            weights: None,
            epidemic_profiles: default_epidemic_overrides()
                .into_iter()
                .map(|(name, overrides)| {
                    (name, overrides.into_iter().map(|(organ, w)| (organ, w.to_vec())).collect())
                })
                .collect(),
        }
    }
}

impl ParametersBuilder {
    pub fn id(mut self, id: ParametersId) -> Self {
        self.id = id;
        self
    }

    /// Drops the default resource types; follow with [`Self::resource`].
    pub fn clear_resources(mut self) -> Self {
        self.resources.clear();
        self
    }

    /// Appends a resource type. Declaration order is the first-fit order.
    pub fn resource(mut self, name: impl Into<ResourceType>, capacity: usize, daily_cost: f64) -> Self {
        self.resources.push(ResourceSpec { name: name.into(), capacity, daily_cost });
        self
    }

    pub fn ideal_occupancy_rate(mut self, rate: f64) -> Self {
        self.ideal_occupancy_rate = rate;
        self
    }

    pub fn penalty_multiplier(mut self, multiplier: f64) -> Self {
        self.penalty_multiplier = multiplier;
        self
    }

    pub fn objective_weights(mut self, survival: f64, cost: f64) -> Self {
        self.survival_weight = survival;
        self.cost_weight = cost;
        self
    }

    pub fn survival_if_admitted(mut self, table: Vec<f64>) -> Self {
        self.survival_if_admitted = table;
        self
    }

    pub fn survival_if_not_admitted(mut self, table: Vec<OutsideOutcome>) -> Self {
        self.survival_if_not_admitted = table;
        self
    }

    pub fn weights(mut self, weights: BTreeMap<Organ, Vec<f64>>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Registers an epidemic profile; organs left out inherit the baseline.
    pub fn epidemic_profile(mut self, name: impl Into<String>, overrides: BTreeMap<Organ, Vec<f64>>) -> Self {
        self.epidemic_profiles.insert(name.into(), overrides);
        self
    }

    pub fn build(self) -> Result<Parameters, ConfigError> {
        Parameters::try_from(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ParametersBuilder")]
pub struct Parameters {
    id: ParametersId,
    resources: Vec<ResourceSpec>,
    ideal_occupancy_rate: f64,
    penalty_multiplier: f64,
    survival_weight: f64,
    cost_weight: f64,
    survival_if_admitted: Vec<f64>,
    survival_if_not_admitted: Vec<OutsideOutcome>,
    weights: WeightSet,
    epidemic_profiles: BTreeMap<String, WeightSet>,
}

impl TryFrom<ParametersBuilder> for Parameters {
    type Error = ConfigError;

    fn try_from(raw: ParametersBuilder) -> Result<Self, Self::Error> {
        if raw.resources.is_empty() {
            return Err(ConfigError::NoResources);
        }
        for (index, spec) in raw.resources.iter().enumerate() {
            if raw.resources[..index].iter().any(|other| other.name == spec.name) {
                return Err(ConfigError::DuplicateResource(spec.name.clone()));
            }
            non_negative(&format!("daily_cost[{}]", spec.name), spec.daily_cost)?;
        }
        if raw.resources.iter().map(|spec| spec.capacity).sum::<usize>() == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        unit_range("ideal_occupancy_rate", raw.ideal_occupancy_rate)?;
        non_negative("penalty_multiplier", raw.penalty_multiplier)?;
        non_negative("survival_weight", raw.survival_weight)?;
        non_negative("cost_weight", raw.cost_weight)?;

        check_table_len(IN_TABLE, raw.survival_if_admitted.len())?;
        check_table_len(OUT_TABLE, raw.survival_if_not_admitted.len())?;
        for (score, p) in raw.survival_if_admitted.iter().enumerate() {
            unit_range(&format!("{IN_TABLE}[{score}]"), *p)?;
        }
        for (score, outcome) in raw.survival_if_not_admitted.iter().enumerate() {
            unit_range(&format!("{OUT_TABLE}[{score}]"), outcome.probability)?;
        }

        let weights = match raw.weights {
            Some(weights) => WeightSet::try_from(weights)?,
            None => WeightSet::baseline(),
        };
        let epidemic_profiles = raw
            .epidemic_profiles
            .into_iter()
            .map(|(name, overrides)| Ok((name, WeightSet::overlay(&weights, overrides)?)))
            .collect::<Result<_, ConfigError>>()?;

        Ok(Parameters {
            id: raw.id,
            resources: raw.resources,
            ideal_occupancy_rate: raw.ideal_occupancy_rate,
            penalty_multiplier: raw.penalty_multiplier,
            survival_weight: raw.survival_weight,
            cost_weight: raw.cost_weight,
            survival_if_admitted: raw.survival_if_admitted,
            survival_if_not_admitted: raw.survival_if_not_admitted,
            weights,
            epidemic_profiles,
        })
    }
}

fn unit_range(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfUnitRange { field: field.to_string(), value })
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { field: field.to_string(), value })
    }
}

fn check_table_len(table: &'static str, len: usize) -> Result<(), ConfigError> {
    if len < TABLE_LEN {
        Err(ConfigError::MissingSurvivalEntry { table, score: len as u8 })
    } else if len > TABLE_LEN {
        Err(ConfigError::SurvivalTableLength { table, len })
    } else {
        Ok(())
    }
}

impl Parameters {
    pub fn builder() -> ParametersBuilder {
        ParametersBuilder::default()
    }

    pub fn from_toml_str(text: &str) -> Result<Parameters, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Parameters, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Parameters::from_toml_str(&text)
    }

    pub fn id(&self) -> ParametersId {
        self.id
    }

    /// Resource types in declaration order.
    pub fn resources(&self) -> &[ResourceSpec] {
        &self.resources
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceSpec> {
        self.resources.iter().find(|spec| spec.name == name)
    }

    pub fn total_capacity(&self) -> usize {
        self.resources.iter().map(|spec| spec.capacity).sum()
    }

    pub fn ideal_occupancy_rate(&self) -> f64 {
        self.ideal_occupancy_rate
    }

    pub fn penalty_multiplier(&self) -> f64 {
        self.penalty_multiplier
    }

    pub fn survival_weight(&self) -> f64 {
        self.survival_weight
    }

    pub fn cost_weight(&self) -> f64 {
        self.cost_weight
    }

    pub fn survival_if_admitted(&self, total_score: u8) -> Result<f64, ConfigError> {
        self.survival_if_admitted
            .get(total_score as usize)
            .copied()
            .ok_or(ConfigError::MissingSurvivalEntry { table: IN_TABLE, score: total_score })
    }

    pub fn survival_if_not_admitted(&self, total_score: u8) -> Result<OutsideOutcome, ConfigError> {
        self.survival_if_not_admitted
            .get(total_score as usize)
            .copied()
            .ok_or(ConfigError::MissingSurvivalEntry { table: OUT_TABLE, score: total_score })
    }

    pub fn weights(&self) -> &WeightSet {
        &self.weights
    }

    pub fn epidemic_profile(&self, name: &str) -> Result<&WeightSet, ConfigError> {
        self.epidemic_profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEpidemicProfile(name.to_string()))
    }

    pub fn epidemic_profile_names(&self) -> impl Iterator<Item = &str> {
        self.epidemic_profiles.keys().map(String::as_str)
    }
}

impl Default for Parameters {
    /// Same values as [`ParametersBuilder::default`], assembled without the
    /// fallible validation pass.
    fn default() -> Self {
        let raw = ParametersBuilder::default();
        let weights = WeightSet::baseline();
        let epidemic_profiles = default_epidemic_overrides()
            .into_iter()
            .map(|(name, overrides)| {
                let mut organs = weights.0.clone();
                organs.extend(overrides);
                (name, WeightSet(organs))
            })
            .collect();
        Parameters {
            id: raw.id,
            resources: raw.resources,
            ideal_occupancy_rate: raw.ideal_occupancy_rate,
            penalty_multiplier: raw.penalty_multiplier,
            survival_weight: raw.survival_weight,
            cost_weight: raw.cost_weight,
            survival_if_admitted: raw.survival_if_admitted,
            survival_if_not_admitted: raw.survival_if_not_admitted,
            weights,
            epidemic_profiles,
        }
    }
}

/// Monte-Carlo run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub rounds: usize,
    pub load_ratios: Vec<f64>,
    pub epidemic: Option<String>,
    pub seed: Option<u64>,
    pub solve_timeout_ms: Option<u64>,
    /// Worker threads; `None` uses the global rayon pool.
    pub workers: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            rounds: 10,
            load_ratios: vec![0.5, 1.0, 1.5, 2.0],
            epidemic: None,
            seed: None,
            solve_timeout_ms: Some(10_000),
            workers: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self, parameters: &Parameters) -> Result<(), ConfigError> {
        if self.rounds == 0 {
            return Err(ConfigError::NoRounds);
        }
        if let Some(bad) = self.load_ratios.iter().find(|r| !r.is_finite() || **r < 0.0) {
            return Err(ConfigError::InvalidLoadRatio(*bad));
        }
        if let Some(profile) = &self.epidemic {
            parameters.epidemic_profile(profile)?;
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<SimulationConfig, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// A whole experiment file: `[parameters]` plus `[simulation]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Experiment {
    pub fn from_toml_str(text: &str) -> Result<Experiment, ConfigError> {
        let experiment: Experiment = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        experiment.simulation.validate(&experiment.parameters)?;
        Ok(experiment)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Experiment, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Experiment::from_toml_str(&text)
    }
}
