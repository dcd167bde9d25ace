use std::sync::Arc;

use tracing::{debug, warn};

use super::Strategy;
use crate::error::StrategyError;
use crate::model::allocation::{Allocation, AllocationResult};
use crate::model::entity::PatientId;
use crate::model::scenario::Scenario;
use crate::solver::{LinExpr, LinearModel, Relation, Sense, SolveLimits, Solver, Status, Var, VarKind};

const ASSIGNED: f64 = 0.5;

/// Decision variables of the assignment model.
pub struct AssignmentVars {
    /// `(patient, resource type index, x)` in patient-major order.
    pub assign: Vec<(PatientId, usize, Var)>,
    /// Slack absorbing the occupancy shortfall.
    pub theta: Var,
}

/// Admission as a binary program:
///
/// ```text
/// max  ws·Σ x·s_in − P·θ − wc·Σ x·days·cost
/// s.t. Σ_p x(p,r) ≤ capacity(r)        for every type r
///      Σ_r x(p,r) ≤ 1                  for every patient p
///      Σ x / total_capacity + θ ≥ ideal_occupancy_rate
///      x ∈ {0,1}, θ ≥ 0
/// ```
pub struct Optimization {
    solver: Arc<dyn Solver>,
    limits: SolveLimits,
}

impl Optimization {
    pub fn new(solver: Arc<dyn Solver>, limits: SolveLimits) -> Optimization {
        Optimization { solver, limits }
    }

    pub fn build_model(scenario: &Scenario) -> Result<(LinearModel, AssignmentVars), StrategyError> {
        let parameters = scenario.parameters();
        let resources = parameters.resources();
        let mut model = LinearModel::new();

        let mut assign = Vec::with_capacity(scenario.patients().len() * resources.len());
        for patient in scenario.patients() {
            for (r, spec) in resources.iter().enumerate() {
                let x = model.binary(format!("x_{}_{}", patient.id, spec.name));
                assign.push((patient.id, r, x));
            }
        }
        let theta = model.add_var("theta", 0.0, f64::INFINITY, VarKind::Continuous)?;

        for (r, spec) in resources.iter().enumerate() {
            let load = assign.iter().filter(|(_, ri, _)| *ri == r).map(|(_, _, x)| (*x, 1.0)).collect();
            model.add_constraint(format!("capacity_{}", spec.name), load, Relation::Le, spec.capacity as f64)?;
        }
        for patient in scenario.patients() {
            let once = assign.iter().filter(|(p, _, _)| *p == patient.id).map(|(_, _, x)| (*x, 1.0)).collect();
            model.add_constraint(format!("one_allocation_{}", patient.id), once, Relation::Le, 1.0)?;
        }
        let total_capacity = parameters.total_capacity() as f64;
        let occupancy = assign
            .iter()
            .map(|(_, _, x)| (*x, 1.0 / total_capacity))
            .collect::<LinExpr>()
            + LinExpr::from(theta);
        model.add_constraint("occupancy_penalty", occupancy, Relation::Ge, parameters.ideal_occupancy_rate())?;

        let objective = assign
            .iter()
            .zip(scenario.patients().iter().flat_map(|p| resources.iter().map(move |spec| (p, spec))))
            .map(|((_, _, x), (patient, spec))| {
                let survival = parameters.survival_weight() * patient.survival_if_admitted;
                let cost = parameters.cost_weight() * f64::from(patient.days_in(&spec.name)) * spec.daily_cost;
                (*x, survival - cost)
            })
            .collect::<LinExpr>()
            - LinExpr::from(theta) * parameters.penalty_multiplier();
        model.set_objective(objective, Sense::Maximize)?;

        Ok((model, AssignmentVars { assign, theta }))
    }
}

impl Strategy for Optimization {
    fn name(&self) -> &str {
        "optimization"
    }

    fn allocate(&self, scenario: &Scenario) -> Result<AllocationResult, StrategyError> {
        let (model, vars) = Optimization::build_model(scenario)?;
        let solution = self.solver.solve(&model, &self.limits);
        let values = match (solution.status, solution.values()) {
            (Status::Optimal, Some(values)) => values,
            (status, _) => {
                warn!(scenario = scenario.id(), ?status, solver = self.solver.name(), "no optimal allocation");
                return Err(StrategyError::NotOptimal(status));
            }
        };
        let value = |x: Var| values.get(x.index()).copied().unwrap_or(0.0);

        let resources = scenario.parameters().resources();
        let allocation: Allocation = vars
            .assign
            .iter()
            .filter(|(_, _, x)| value(*x) > ASSIGNED)
            .map(|(patient, r, _)| (*patient, resources[*r].name.clone()))
            .collect();

        // Aggregates come from the solved values, not from `allocation`.
        let mut survival_if_admitted = 0.0;
        let mut survival_if_not_admitted = 0.0;
        let mut cost = 0.0;
        for (patient, chunk) in scenario.patients().iter().zip(vars.assign.chunks(resources.len())) {
            let mut admitted = 0.0;
            for (_, r, x) in chunk {
                let v = value(*x);
                admitted += v;
                survival_if_admitted += v * patient.survival_if_admitted;
                cost += v * f64::from(patient.days_in(&resources[*r].name)) * resources[*r].daily_cost;
            }
            survival_if_not_admitted += (1.0 - admitted) * patient.survival_if_not_admitted;
        }
        debug!(
            scenario = scenario.id(),
            admitted = allocation.len(),
            theta = value(vars.theta),
            objective = ?solution.objective,
            "optimal allocation"
        );

        Ok(AllocationResult {
            scenario_id: scenario.id(),
            strategy: self.name().to_string(),
            survival_if_admitted,
            survival_if_not_admitted,
            cost,
            allocation,
        })
    }
}
