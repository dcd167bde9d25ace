//! Generic mixed binary linear modelling interface.
//!
//! Strategies declare variables, constraints and an objective on a
//! [`LinearModel`] and hand it to any [`Solver`]. [`BranchAndBound`] is the
//! built-in backend.

mod branch;
mod simplex;

use std::ops::{Add, Mul, Sub};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use branch::BranchAndBound;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(usize);

impl Var {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Continuous,
    Binary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDef {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub kind: VarKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Le,
    Ge,
    Eq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Maximize,
    Minimize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Optimal,
    Infeasible,
    Unbounded,
    TimeLimit,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("variable {0} does not belong to this model")]
    ForeignVariable(usize),
    #[error("variable {name} needs a finite lower bound not above its upper bound")]
    BadBounds { name: String },
    #[error("coefficient for {0} is not finite")]
    NonFinite(String),
}

/// Sparse linear expression `Σ coef·var + constant`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinExpr {
    terms: Vec<(Var, f64)>,
    constant: f64,
}

impl LinExpr {
    pub fn new() -> LinExpr {
        LinExpr::default()
    }

    pub fn constant(value: f64) -> LinExpr {
        LinExpr { terms: Vec::new(), constant: value }
    }

    pub fn term(mut self, var: Var, coef: f64) -> LinExpr {
        self.terms.push((var, coef));
        self
    }

    pub fn terms(&self) -> &[(Var, f64)] {
        &self.terms
    }

    pub fn constant_part(&self) -> f64 {
        self.constant
    }

    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(var, coef)| coef * values.get(var.0).copied().unwrap_or(0.0))
            .sum::<f64>()
            + self.constant
    }
}

impl From<Var> for LinExpr {
    fn from(var: Var) -> Self {
        LinExpr::new().term(var, 1.0)
    }
}

impl FromIterator<(Var, f64)> for LinExpr {
    fn from_iter<T: IntoIterator<Item = (Var, f64)>>(iter: T) -> Self {
        LinExpr { terms: iter.into_iter().collect(), constant: 0.0 }
    }
}

impl Add for LinExpr {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self::Output {
        self.terms.extend(rhs.terms);
        self.constant += rhs.constant;
        self
    }
}

impl Sub for LinExpr {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        self + rhs * -1.0
    }
}

impl Mul<f64> for LinExpr {
    type Output = Self;

    fn mul(mut self, rhs: f64) -> Self::Output {
        self.terms.iter_mut().for_each(|(_, coef)| *coef *= rhs);
        self.constant *= rhs;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub expr: LinExpr,
    pub relation: Relation,
    pub rhs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    vars: Vec<VarDef>,
    constraints: Vec<Constraint>,
    objective: LinExpr,
    sense: Sense,
}

impl Default for LinearModel {
    fn default() -> Self {
        LinearModel::new()
    }
}

impl LinearModel {
    pub fn new() -> LinearModel {
        LinearModel {
            vars: Vec::new(),
            constraints: Vec::new(),
            objective: LinExpr::new(),
            sense: Sense::Maximize,
        }
    }

    pub fn add_var(&mut self, name: impl Into<String>, lower: f64, upper: f64, kind: VarKind) -> Result<Var, ModelError> {
        let name = name.into();
        if !lower.is_finite() || upper.is_nan() || lower > upper {
            return Err(ModelError::BadBounds { name });
        }
        self.vars.push(VarDef { name, lower, upper, kind });
        Ok(Var(self.vars.len() - 1))
    }

    pub fn binary(&mut self, name: impl Into<String>) -> Var {
        self.vars.push(VarDef { name: name.into(), lower: 0.0, upper: 1.0, kind: VarKind::Binary });
        Var(self.vars.len() - 1)
    }

    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        expr: LinExpr,
        relation: Relation,
        rhs: f64,
    ) -> Result<(), ModelError> {
        let name = name.into();
        self.check(&expr, &name)?;
        if !rhs.is_finite() {
            return Err(ModelError::NonFinite(name));
        }
        self.constraints.push(Constraint { name, expr, relation, rhs });
        Ok(())
    }

    pub fn set_objective(&mut self, expr: LinExpr, sense: Sense) -> Result<(), ModelError> {
        self.check(&expr, "objective")?;
        self.objective = expr;
        self.sense = sense;
        Ok(())
    }

    fn check(&self, expr: &LinExpr, name: &str) -> Result<(), ModelError> {
        if let Some((var, _)) = expr.terms.iter().find(|(var, _)| var.0 >= self.vars.len()) {
            return Err(ModelError::ForeignVariable(var.0));
        }
        let finite = expr.terms.iter().all(|(_, coef)| coef.is_finite()) && expr.constant.is_finite();
        if finite {
            Ok(())
        } else {
            Err(ModelError::NonFinite(name.to_string()))
        }
    }

    pub fn vars(&self) -> &[VarDef] {
        &self.vars
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &LinExpr {
        &self.objective
    }

    pub fn sense(&self) -> Sense {
        self.sense
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub status: Status,
    values: Vec<f64>,
    pub objective: Option<f64>,
}

impl Solution {
    pub fn without_values(status: Status) -> Solution {
        Solution { status, values: Vec::new(), objective: None }
    }

    pub fn optimal(values: Vec<f64>, objective: f64) -> Solution {
        Solution { status: Status::Optimal, values, objective: Some(objective) }
    }

    /// Only available after an optimal solve.
    pub fn value(&self, var: Var) -> Option<f64> {
        if self.status == Status::Optimal {
            self.values.get(var.0).copied()
        } else {
            None
        }
    }

    pub fn values(&self) -> Option<&[f64]> {
        (self.status == Status::Optimal).then_some(self.values.as_slice())
    }
}

/// Wall-clock and cancellation bounds for one solve call.
#[derive(Debug, Clone, Default)]
pub struct SolveLimits {
    pub time_limit: Option<Duration>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl SolveLimits {
    pub fn with_time_limit(time_limit: Duration) -> SolveLimits {
        SolveLimits { time_limit: Some(time_limit), cancel: None }
    }

    pub(crate) fn start(&self) -> Clock {
        Clock {
            deadline: self.time_limit.map(|limit| Instant::now() + limit),
            cancel: self.cancel.clone(),
        }
    }
}

pub(crate) struct Clock {
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Clock {
    pub(crate) fn expired(&self) -> bool {
        let cancelled = self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed));
        cancelled || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

pub trait Solver: Send + Sync {
    fn name(&self) -> &str;
    fn solve(&self, model: &LinearModel, limits: &SolveLimits) -> Solution;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expressions_compose() {
        let mut model = LinearModel::new();
        let x = model.binary("x");
        let y = model.binary("y");
        let expr = (LinExpr::from(x) * 2.0 + LinExpr::from(y)) - LinExpr::constant(1.0);
        assert_eq!(expr.evaluate(&[1.0, 1.0]), 2.0);
        assert_eq!(expr.evaluate(&[0.0, 1.0]), 0.0);
    }

    #[test]
    fn rejects_foreign_variables_and_bad_bounds() {
        let mut other = LinearModel::new();
        other.binary("a");
        let stray = other.binary("b");
        let mut model = LinearModel::new();
        model.binary("x");
        assert_eq!(
            model.add_constraint("c", LinExpr::from(stray), Relation::Le, 1.0),
            Err(ModelError::ForeignVariable(1))
        );
        assert!(model.add_var("free", f64::NEG_INFINITY, 0.0, VarKind::Continuous).is_err());
        assert!(model.add_var("flipped", 2.0, 1.0, VarKind::Continuous).is_err());
        assert!(model.add_var("theta", 0.0, f64::INFINITY, VarKind::Continuous).is_ok());
    }

    #[test]
    fn values_hidden_unless_optimal() {
        let solution = Solution::without_values(Status::TimeLimit);
        assert_eq!(solution.value(Var(0)), None);
        assert!(solution.values().is_none());
    }

    #[test]
    fn cancelled_clock_is_expired() {
        let flag = Arc::new(AtomicBool::new(false));
        let limits = SolveLimits { time_limit: None, cancel: Some(Arc::clone(&flag)) };
        let clock = limits.start();
        assert!(!clock.expired());
        flag.store(true, Ordering::Relaxed);
        assert!(clock.expired());
    }
}
