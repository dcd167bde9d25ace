//! Monte-Carlo comparison of allocation strategies.
//!
//! Every (round, load ratio) pair is an independent trial: a fresh scenario is
//! generated, every registered strategy allocates against it, and survival is
//! re-drawn for each allocation. Trials run on a rayon pool and are merged in
//! (round, ratio) order once all of them finished.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{Parameters, SimulationConfig};
use crate::error::{ConfigError, SimulationError, StrategyError};
use crate::generate::Generator;
use crate::ledger::verify;
use crate::model::allocation::{Allocation, ResourceCounter};
use crate::model::scenario::Scenario;
use crate::solver::{BranchAndBound, SolveLimits, Solver};
use crate::strategy::{Strategy, StrategyKind};

/// Counts survivors of one scenario under `allocation`.
///
/// One draw `u` in (0, 1] per patient: `u <= survival_if_not_admitted`
/// survives regardless of admission; otherwise `u <= survival_if_admitted`
/// survives only if admitted.
pub fn simulate_survival(scenario: &Scenario, allocation: &Allocation, rng: &mut impl Rng) -> usize {
    scenario
        .patients()
        .iter()
        .filter(|patient| {
            let u = 1.0 - rng.gen::<f64>();
            u <= patient.survival_if_not_admitted
                || (u <= patient.survival_if_admitted && allocation.is_admitted(patient.id))
        })
        .count()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    /// Trials that produced an allocation.
    pub trials: usize,
    /// Trials excluded because the strategy failed to allocate.
    pub failures: usize,
    pub mean_survivors: f64,
    pub std_dev_survivors: f64,
    pub min_survivors: usize,
    pub max_survivors: usize,
    pub mean_admitted: f64,
    pub mean_projected_cost: f64,
    pub admitted_by_resource: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub id: u32,
    pub rounds: usize,
    pub load_ratios: Vec<f64>,
    pub epidemic: Option<String>,
    pub strategies: BTreeMap<String, StrategyStats>,
}

impl SimulationReport {
    /// Unweighted mean survivor count per strategy. Strategies that never
    /// produced an allocation are left out.
    pub fn averages(&self) -> BTreeMap<String, f64> {
        self.strategies
            .iter()
            .filter(|(_, stats)| stats.trials > 0)
            .map(|(name, stats)| (name.clone(), stats.mean_survivors))
            .collect()
    }
}

struct TrialRecord {
    survivors: usize,
    admitted: usize,
    projected_cost: f64,
    by_resource: ResourceCounter,
}

struct TrialOutcome {
    per_strategy: Vec<Result<TrialRecord, StrategyError>>,
}

#[derive(Default)]
struct Accumulator {
    survivors: Vec<usize>,
    admitted: usize,
    projected_cost: f64,
    by_resource: ResourceCounter,
    failures: usize,
}

impl Accumulator {
    fn push(&mut self, record: Result<TrialRecord, StrategyError>) {
        match record {
            Ok(record) => {
                self.survivors.push(record.survivors);
                self.admitted += record.admitted;
                self.projected_cost += record.projected_cost;
                self.by_resource = std::mem::take(&mut self.by_resource) + record.by_resource;
            }
            Err(_) => self.failures += 1,
        }
    }

    fn finish(self) -> StrategyStats {
        let n = self.survivors.len();
        if n == 0 {
            return StrategyStats { failures: self.failures, ..StrategyStats::default() };
        }
        let mean = self.survivors.iter().sum::<usize>() as f64 / n as f64;
        let variance = if n > 1 {
            self.survivors.iter().map(|s| (*s as f64 - mean).powi(2)).sum::<f64>() / (n - 1) as f64
        } else {
            0.0
        };
        StrategyStats {
            trials: n,
            failures: self.failures,
            mean_survivors: mean,
            std_dev_survivors: variance.sqrt(),
            min_survivors: self.survivors.iter().copied().min().unwrap_or(0),
            max_survivors: self.survivors.iter().copied().max().unwrap_or(0),
            mean_admitted: self.admitted as f64 / n as f64,
            mean_projected_cost: self.projected_cost / n as f64,
            admitted_by_resource: self
                .by_resource
                .iter()
                .map(|(resource, count)| (resource.clone(), count))
                .collect(),
        }
    }
}

/// Seed for one trial, stable across scheduling order.
fn trial_seed(seed: u64, round: usize, ratio_index: usize) -> u64 {
    let mut z = seed ^ ((round as u64) << 32) ^ ratio_index as u64;
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

pub struct Simulator {
    parameters: Arc<Parameters>,
    strategies: Vec<Box<dyn Strategy>>,
    seed: Option<u64>,
    workers: Option<usize>,
}

impl Simulator {
    /// A simulator with no strategies registered.
    pub fn new(parameters: Arc<Parameters>) -> Simulator {
        Simulator { parameters, strategies: Vec::new(), seed: None, workers: None }
    }

    /// Registers every [`StrategyKind`], the optimizer using `solver`.
    pub fn with_all_strategies(parameters: Arc<Parameters>, solver: Arc<dyn Solver>, limits: SolveLimits) -> Simulator {
        let mut simulator = Simulator::new(parameters);
        for kind in StrategyKind::ALL {
            simulator = simulator.with_strategy(kind.build(Arc::clone(&solver), limits.clone()));
        }
        simulator
    }

    pub fn from_config(parameters: Arc<Parameters>, config: &SimulationConfig) -> Result<Simulator, ConfigError> {
        config.validate(&parameters)?;
        let limits = SolveLimits {
            time_limit: config.solve_timeout_ms.map(Duration::from_millis),
            cancel: None,
        };
        let mut simulator = Simulator::with_all_strategies(parameters, Arc::new(BranchAndBound::default()), limits);
        simulator.seed = config.seed;
        simulator.workers = config.workers;
        Ok(simulator)
    }

    /// Adds a strategy, replacing any registered under the same name.
    pub fn with_strategy(mut self, strategy: Box<dyn Strategy>) -> Simulator {
        self.strategies.retain(|s| s.name() != strategy.name());
        self.strategies.push(strategy);
        self
    }

    pub fn seed(mut self, seed: u64) -> Simulator {
        self.seed = Some(seed);
        self
    }

    pub fn workers(mut self, workers: usize) -> Simulator {
        self.workers = Some(workers);
        self
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Runs `num_rounds` rounds over every load ratio.
    ///
    /// A strategy that fails to allocate in a trial is left out of that
    /// trial's aggregate and counted in [`StrategyStats::failures`].
    /// Inconsistent allocations and configuration problems abort the run.
    pub fn run(
        &self,
        num_rounds: usize,
        load_ratios: &[f64],
        epidemic: Option<&str>,
    ) -> Result<SimulationReport, SimulationError> {
        if num_rounds == 0 {
            return Err(ConfigError::NoRounds.into());
        }
        if let Some(bad) = load_ratios.iter().find(|r| !r.is_finite() || **r < 0.0) {
            return Err(ConfigError::InvalidLoadRatio(*bad).into());
        }
        if let Some(profile) = epidemic {
            self.parameters.epidemic_profile(profile)?;
        }
        info!(
            rounds = num_rounds,
            ratios = ?load_ratios,
            epidemic,
            strategies = ?self.strategy_names(),
            capacity = self.parameters.total_capacity(),
            "starting simulation"
        );

        let trials: Vec<(usize, usize, f64)> = (1..=num_rounds)
            .flat_map(|round| load_ratios.iter().enumerate().map(move |(i, ratio)| (round, i, *ratio)))
            .collect();
        let execute = || {
            trials
                .par_iter()
                .map(|&(round, ratio_index, ratio)| self.run_trial(round, ratio_index, ratio, epidemic))
                .collect::<Result<Vec<TrialOutcome>, SimulationError>>()
        };
        let outcomes = match self.workers {
            Some(workers) => rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|e| ConfigError::WorkerPool(e.to_string()))?
                .install(execute)?,
            None => execute()?,
        };

        let mut accumulators: Vec<Accumulator> = self.strategies.iter().map(|_| Accumulator::default()).collect();
        for outcome in outcomes {
            for (accumulator, record) in accumulators.iter_mut().zip(outcome.per_strategy) {
                accumulator.push(record);
            }
        }
        let strategies: BTreeMap<String, StrategyStats> = self
            .strategies
            .iter()
            .zip(accumulators)
            .map(|(strategy, accumulator)| (strategy.name().to_string(), accumulator.finish()))
            .collect();
        for (name, stats) in &strategies {
            info!(
                strategy = %name,
                mean_survivors = stats.mean_survivors,
                trials = stats.trials,
                failures = stats.failures,
                "strategy summary"
            );
        }

        Ok(SimulationReport {
            id: 0,
            rounds: num_rounds,
            load_ratios: load_ratios.to_vec(),
            epidemic: epidemic.map(str::to_string),
            strategies,
        })
    }

    pub fn run_config(&self, config: &SimulationConfig) -> Result<SimulationReport, SimulationError> {
        config.validate(&self.parameters)?;
        self.run(config.rounds, &config.load_ratios, config.epidemic.as_deref())
    }

    fn run_trial(
        &self,
        round: usize,
        ratio_index: usize,
        ratio: f64,
        epidemic: Option<&str>,
    ) -> Result<TrialOutcome, SimulationError> {
        let parameters = Arc::clone(&self.parameters);
        let mut generator = match self.seed {
            Some(seed) => Generator::seeded(parameters, trial_seed(seed, round, ratio_index))?,
            None => Generator::new(parameters)?,
        };
        let population = (ratio * self.parameters.total_capacity() as f64).floor() as usize;
        let mut scenario = generator.generate_scenario(round as u32, population)?;
        if let Some(profile) = epidemic {
            scenario = generator.epidemic_scenario(&scenario, profile)?;
        }

        let mut per_strategy = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let record = match strategy.allocate(&scenario) {
                Ok(result) => {
                    verify(&scenario, &result.allocation).map_err(|source| SimulationError::Inconsistent {
                        strategy: strategy.name().to_string(),
                        source,
                    })?;
                    let survivors = simulate_survival(&scenario, &result.allocation, generator.rng());
                    debug!(strategy = strategy.name(), round, ratio, survivors, "strategy trial");
                    Ok(TrialRecord {
                        survivors,
                        admitted: result.allocation.len(),
                        projected_cost: result.cost,
                        by_resource: result.allocation.counts(),
                    })
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), round, ratio, error = %e, "strategy excluded from trial");
                    Err(e)
                }
            };
            per_strategy.push(record);
        }
        debug!(round, ratio, population, "trial finished");
        Ok(TrialOutcome { per_strategy })
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;
    use crate::model::allocation::AllocationResult;
    use crate::strategy::Greedy;
    use crate::testing::{patient, two_type_parameters};

    #[test]
    fn certain_outside_survivor_always_survives() {
        let scenario = Scenario::new(1, vec![patient(1, 1.0, 0.0)], Arc::new(two_type_parameters(1, 0))).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..1000 {
            assert_eq!(simulate_survival(&scenario, &Allocation::new(), &mut rng), 1);
        }
    }

    #[test]
    fn hopeless_patient_never_survives() {
        let scenario = Scenario::new(1, vec![patient(1, 0.0, 0.0)], Arc::new(two_type_parameters(1, 0))).unwrap();
        let admitted: Allocation = vec![(1, "general".to_string())].into_iter().collect();
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..1000 {
            assert_eq!(simulate_survival(&scenario, &admitted, &mut rng), 0);
            assert_eq!(simulate_survival(&scenario, &Allocation::new(), &mut rng), 0);
        }
    }

    #[test]
    fn admission_rescues_only_when_assigned() {
        let scenario = Scenario::new(1, vec![patient(1, 0.0, 1.0)], Arc::new(two_type_parameters(1, 0))).unwrap();
        let admitted: Allocation = vec![(1, "general".to_string())].into_iter().collect();
        let mut rng = SmallRng::seed_from_u64(9);
        assert_eq!(simulate_survival(&scenario, &admitted, &mut rng), 1);
        assert_eq!(simulate_survival(&scenario, &Allocation::new(), &mut rng), 0);
    }

    #[test]
    fn zero_population_averages_zero() {
        let params = Arc::new(Parameters::default());
        let simulator =
            Simulator::with_all_strategies(params, Arc::new(BranchAndBound::default()), SolveLimits::default()).seed(1);
        let report = simulator.run(1, &[0.0], None).unwrap();
        let averages = report.averages();
        assert_eq!(averages.len(), StrategyKind::ALL.len());
        assert!(averages.values().all(|mean| *mean == 0.0));
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let params = Arc::new(Parameters::default());
        let build = || {
            Simulator::with_all_strategies(Arc::clone(&params), Arc::new(BranchAndBound::default()), SolveLimits::default())
                .seed(99)
        };
        let a = build().run(2, &[0.5, 1.0], Some("respiratory")).unwrap();
        let b = build().workers(1).run(2, &[0.5, 1.0], Some("respiratory")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.strategies["first-fit"].trials, 4);
    }

    #[test]
    fn unknown_epidemic_profile_fails_before_trials() {
        let simulator = Simulator::new(Arc::new(Parameters::default())).with_strategy(Box::new(Greedy::first_fit()));
        assert_eq!(
            simulator.run(1, &[1.0], Some("smallpox")).unwrap_err(),
            SimulationError::Config(ConfigError::UnknownEpidemicProfile("smallpox".to_string()))
        );
        assert_eq!(simulator.run(0, &[1.0], None).unwrap_err(), SimulationError::Config(ConfigError::NoRounds));
    }

    #[test]
    fn oversized_population_is_a_configuration_error() {
        let simulator = Simulator::new(Arc::new(Parameters::default())).with_strategy(Box::new(Greedy::first_fit()));
        let err = simulator.seed(1).run(1, &[1e12], None).unwrap_err();
        assert!(matches!(err, SimulationError::Config(ConfigError::PopulationTooLarge(_))));
    }

    struct Failing;

    impl Strategy for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn allocate(&self, _: &Scenario) -> Result<AllocationResult, StrategyError> {
            Err(StrategyError::NotOptimal(crate::solver::Status::TimeLimit))
        }
    }

    struct Overbooking;

    impl Strategy for Overbooking {
        fn name(&self) -> &str {
            "overbooking"
        }

        fn allocate(&self, scenario: &Scenario) -> Result<AllocationResult, StrategyError> {
            let allocation = scenario.patients().iter().map(|p| (p.id, "general".to_string())).collect();
            Ok(crate::strategy::summarize(scenario, self.name(), allocation))
        }
    }

    #[test]
    fn failing_strategy_is_excluded_and_counted() {
        let simulator = Simulator::new(Arc::new(Parameters::default()))
            .with_strategy(Box::new(Greedy::first_fit()))
            .with_strategy(Box::new(Failing))
            .seed(5);
        let report = simulator.run(3, &[1.0], None).unwrap();
        assert_eq!(report.strategies["failing"].failures, 3);
        assert_eq!(report.strategies["failing"].trials, 0);
        assert!(!report.averages().contains_key("failing"));
        assert_eq!(report.strategies["first-fit"].trials, 3);
    }

    #[test]
    fn inconsistent_allocation_aborts_the_run() {
        let simulator = Simulator::new(Arc::new(Parameters::default()))
            .with_strategy(Box::new(Overbooking))
            .seed(5);
        let err = simulator.run(1, &[2.0], None).unwrap_err();
        assert!(matches!(err, SimulationError::Inconsistent { ref strategy, .. } if strategy == "overbooking"));
    }

    #[test]
    fn first_fit_never_exceeds_capacity_in_reports() {
        let params = Arc::new(Parameters::default());
        let simulator = Simulator::new(Arc::clone(&params)).with_strategy(Box::new(Greedy::first_fit())).seed(8);
        let report = simulator.run(4, &[3.0], None).unwrap();
        let stats = &report.strategies["first-fit"];
        assert_eq!(stats.mean_admitted, params.total_capacity() as f64);
        assert_eq!(stats.admitted_by_resource["general"], 4 * 8);
    }
}
