//! Dense two-phase primal simplex with Bland's rule.
//!
//! Works on the LP relaxation of a [`LinearModel`] under per-variable bound
//! overrides supplied by the branch-and-bound driver.

use super::{Clock, LinearModel, Relation, Sense};

const EPS: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LpOutcome {
    /// Values in model variable order and the objective in the model's sense.
    Optimal { values: Vec<f64>, objective: f64 },
    Infeasible,
    Unbounded,
    Interrupted,
}

struct Tableau {
    rows: Vec<Vec<f64>>,
    basis: Vec<usize>,
    /// Reduced costs for maximisation; the last entry is the objective value.
    cost: Vec<f64>,
    width: usize,
}

enum Pivoting {
    Done,
    Unbounded,
    Interrupted,
}

impl Tableau {
    fn rhs(&self, row: usize) -> f64 {
        self.rows[row][self.width]
    }

    fn pivot(&mut self, row: usize, col: usize) {
        let scale = self.rows[row][col];
        self.rows[row].iter_mut().for_each(|v| *v /= scale);
        let pivot_row = self.rows[row].clone();
        for (r, other) in self.rows.iter_mut().enumerate() {
            let factor = other[col];
            if r != row && factor.abs() > EPS {
                other.iter_mut().zip(&pivot_row).for_each(|(v, p)| *v -= factor * p);
            }
        }
        let factor = self.cost[col];
        if factor.abs() > EPS {
            self.cost.iter_mut().zip(&pivot_row).for_each(|(v, p)| *v -= factor * p);
        }
        self.basis[row] = col;
    }

    /// Sets `cost` to `-c` and prices out the current basis.
    fn load_objective(&mut self, c: &[f64]) {
        self.cost = vec![0.0; self.width + 1];
        for (j, cj) in c.iter().enumerate() {
            self.cost[j] = -cj;
        }
        for row in 0..self.rows.len() {
            let factor = self.cost[self.basis[row]];
            if factor.abs() > EPS {
                let source = &self.rows[row];
                self.cost.iter_mut().zip(source).for_each(|(v, p)| *v -= factor * p);
            }
        }
    }

    fn optimise(&mut self, allowed: usize, clock: &Clock) -> Pivoting {
        loop {
            if clock.expired() {
                return Pivoting::Interrupted;
            }
            let Some(col) = (0..allowed).find(|&j| self.cost[j] < -EPS) else {
                return Pivoting::Done;
            };
            let mut leave: Option<(usize, f64)> = None;
            for row in 0..self.rows.len() {
                let a = self.rows[row][col];
                if a > EPS {
                    let ratio = self.rhs(row) / a;
                    let better = match leave {
                        None => true,
                        Some((best, best_ratio)) => {
                            ratio < best_ratio - EPS
                                || (ratio <= best_ratio + EPS && self.basis[row] < self.basis[best])
                        }
                    };
                    if better {
                        leave = Some((row, ratio));
                    }
                }
            }
            match leave {
                Some((row, _)) => self.pivot(row, col),
                None => return Pivoting::Unbounded,
            }
        }
    }
}

/// Solves the relaxation with `lower`/`upper` replacing the declared bounds.
pub(crate) fn solve_relaxation(model: &LinearModel, lower: &[f64], upper: &[f64], clock: &Clock) -> LpOutcome {
    let n = model.vars().len();

    // Shift x = lower + x', so x' >= 0. Finite upper bounds become rows.
    let mut rows: Vec<(Vec<f64>, Relation, f64)> = Vec::new();
    for constraint in model.constraints() {
        let mut coefs = vec![0.0; n];
        let mut shift = constraint.expr.constant_part();
        for (var, coef) in constraint.expr.terms() {
            coefs[var.index()] += coef;
            shift += coef * lower[var.index()];
        }
        rows.push((coefs, constraint.relation, constraint.rhs - shift));
    }
    for j in 0..n {
        if upper[j].is_finite() {
            let mut coefs = vec![0.0; n];
            coefs[j] = 1.0;
            rows.push((coefs, Relation::Le, upper[j] - lower[j]));
        }
    }
    for (coefs, relation, rhs) in rows.iter_mut() {
        if *rhs < 0.0 {
            coefs.iter_mut().for_each(|c| *c = -*c);
            *rhs = -*rhs;
            *relation = match relation {
                Relation::Le => Relation::Ge,
                Relation::Ge => Relation::Le,
                Relation::Eq => Relation::Eq,
            };
        }
    }

    let m = rows.len();
    let slack_count = rows.iter().filter(|(_, rel, _)| *rel != Relation::Eq).count();
    let artificial_count = rows.iter().filter(|(_, rel, _)| *rel != Relation::Le).count();
    let real = n + slack_count;
    let width = real + artificial_count;

    let mut tableau = Tableau {
        rows: Vec::with_capacity(m),
        basis: Vec::with_capacity(m),
        cost: Vec::new(),
        width,
    };
    let (mut next_slack, mut next_artificial) = (n, real);
    for (coefs, relation, rhs) in &rows {
        let mut row = vec![0.0; width + 1];
        row[..n].copy_from_slice(coefs);
        row[width] = *rhs;
        match relation {
            Relation::Le => {
                row[next_slack] = 1.0;
                tableau.basis.push(next_slack);
                next_slack += 1;
            }
            Relation::Ge => {
                row[next_slack] = -1.0;
                next_slack += 1;
                row[next_artificial] = 1.0;
                tableau.basis.push(next_artificial);
                next_artificial += 1;
            }
            Relation::Eq => {
                row[next_artificial] = 1.0;
                tableau.basis.push(next_artificial);
                next_artificial += 1;
            }
        }
        tableau.rows.push(row);
    }

    if artificial_count > 0 {
        let mut phase_one = vec![0.0; width];
        phase_one[real..].iter_mut().for_each(|c| *c = -1.0);
        tableau.load_objective(&phase_one);
        match tableau.optimise(width, clock) {
            Pivoting::Interrupted => return LpOutcome::Interrupted,
            // Phase one is bounded by construction.
            Pivoting::Unbounded | Pivoting::Done => {}
        }
        if tableau.cost[width] < -1e-7 {
            return LpOutcome::Infeasible;
        }
        // Drive zero-valued artificials out where a real column allows it.
        for row in 0..m {
            if tableau.basis[row] >= real {
                if let Some(col) = (0..real).find(|&j| tableau.rows[row][j].abs() > 1e-7) {
                    tableau.pivot(row, col);
                }
            }
        }
    }

    let sign = match model.sense() {
        Sense::Maximize => 1.0,
        Sense::Minimize => -1.0,
    };
    let mut c = vec![0.0; width];
    for (var, coef) in model.objective().terms() {
        c[var.index()] += sign * coef;
    }
    tableau.load_objective(&c);
    match tableau.optimise(real, clock) {
        Pivoting::Interrupted => return LpOutcome::Interrupted,
        Pivoting::Unbounded => return LpOutcome::Unbounded,
        Pivoting::Done => {}
    }

    let mut values = lower.to_vec();
    for (row, &col) in tableau.basis.iter().enumerate() {
        if col < n {
            values[col] += tableau.rhs(row);
        }
    }
    let objective = model.objective().evaluate(&values);
    LpOutcome::Optimal { values, objective }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{LinExpr, SolveLimits, VarKind};

    fn bounds(model: &LinearModel) -> (Vec<f64>, Vec<f64>) {
        (
            model.vars().iter().map(|v| v.lower).collect(),
            model.vars().iter().map(|v| v.upper).collect(),
        )
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn textbook_maximisation() {
        // max 3x + 5y  s.t. x <= 4, 2y <= 12, 3x + 2y <= 18
        let mut model = LinearModel::new();
        let x = model.add_var("x", 0.0, f64::INFINITY, VarKind::Continuous).unwrap();
        let y = model.add_var("y", 0.0, f64::INFINITY, VarKind::Continuous).unwrap();
        model.add_constraint("a", LinExpr::from(x), Relation::Le, 4.0).unwrap();
        model.add_constraint("b", LinExpr::new().term(y, 2.0), Relation::Le, 12.0).unwrap();
        model
            .add_constraint("c", LinExpr::new().term(x, 3.0).term(y, 2.0), Relation::Le, 18.0)
            .unwrap();
        model.set_objective(LinExpr::new().term(x, 3.0).term(y, 5.0), Sense::Maximize).unwrap();
        let (lo, hi) = bounds(&model);
        match solve_relaxation(&model, &lo, &hi, &SolveLimits::default().start()) {
            LpOutcome::Optimal { values, objective } => {
                assert!(approx(values[0], 2.0));
                assert!(approx(values[1], 6.0));
                assert!(approx(objective, 36.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn minimisation_with_ge_rows() {
        // min x + y  s.t. x + 2y >= 4, 3x + y >= 6
        let mut model = LinearModel::new();
        let x = model.add_var("x", 0.0, f64::INFINITY, VarKind::Continuous).unwrap();
        let y = model.add_var("y", 0.0, f64::INFINITY, VarKind::Continuous).unwrap();
        model
            .add_constraint("a", LinExpr::new().term(x, 1.0).term(y, 2.0), Relation::Ge, 4.0)
            .unwrap();
        model
            .add_constraint("b", LinExpr::new().term(x, 3.0).term(y, 1.0), Relation::Ge, 6.0)
            .unwrap();
        model.set_objective(LinExpr::from(x) + LinExpr::from(y), Sense::Minimize).unwrap();
        let (lo, hi) = bounds(&model);
        match solve_relaxation(&model, &lo, &hi, &SolveLimits::default().start()) {
            LpOutcome::Optimal { values, objective } => {
                assert!(approx(values[0], 1.6));
                assert!(approx(values[1], 1.2));
                assert!(approx(objective, 2.8));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn detects_infeasible_and_unbounded() {
        let mut model = LinearModel::new();
        let x = model.add_var("x", 0.0, 1.0, VarKind::Continuous).unwrap();
        model.add_constraint("a", LinExpr::from(x), Relation::Ge, 2.0).unwrap();
        let (lo, hi) = bounds(&model);
        assert_eq!(
            solve_relaxation(&model, &lo, &hi, &SolveLimits::default().start()),
            LpOutcome::Infeasible
        );

        let mut model = LinearModel::new();
        let x = model.add_var("x", 0.0, f64::INFINITY, VarKind::Continuous).unwrap();
        model.set_objective(LinExpr::from(x), Sense::Maximize).unwrap();
        let (lo, hi) = bounds(&model);
        assert_eq!(
            solve_relaxation(&model, &lo, &hi, &SolveLimits::default().start()),
            LpOutcome::Unbounded
        );
    }

    #[test]
    fn equality_rows_and_shifted_bounds() {
        // max x  s.t. x + y = 5, 2 <= y <= 4
        let mut model = LinearModel::new();
        let x = model.add_var("x", 0.0, f64::INFINITY, VarKind::Continuous).unwrap();
        let y = model.add_var("y", 2.0, 4.0, VarKind::Continuous).unwrap();
        model.add_constraint("sum", LinExpr::from(x) + LinExpr::from(y), Relation::Eq, 5.0).unwrap();
        model.set_objective(LinExpr::from(x), Sense::Maximize).unwrap();
        let (lo, hi) = bounds(&model);
        match solve_relaxation(&model, &lo, &hi, &SolveLimits::default().start()) {
            LpOutcome::Optimal { values, .. } => {
                assert!(approx(values[0], 3.0));
                assert!(approx(values[1], 2.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
