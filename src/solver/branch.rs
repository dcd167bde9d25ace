use tracing::debug;

use super::simplex::{solve_relaxation, LpOutcome};
use super::{LinearModel, Sense, SolveLimits, Solution, Solver, Status, VarKind};

const INTEGRALITY_TOLERANCE: f64 = 1e-6;

/// Depth-first branch and bound over binary variables, simplex relaxations at
/// every node.
#[derive(Debug, Clone)]
pub struct BranchAndBound {
    pub max_nodes: usize,
}

impl Default for BranchAndBound {
    fn default() -> Self {
        BranchAndBound { max_nodes: 100_000 }
    }
}

struct Node {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl BranchAndBound {
    fn most_fractional(model: &LinearModel, values: &[f64]) -> Option<(usize, f64)> {
        model
            .vars()
            .iter()
            .zip(values)
            .enumerate()
            .filter(|(_, (def, _))| def.kind == VarKind::Binary)
            .map(|(index, (_, value))| (index, *value, (value - value.round()).abs()))
            .filter(|(_, _, gap)| *gap > INTEGRALITY_TOLERANCE)
            .max_by(|a, b| a.2.total_cmp(&b.2))
            .map(|(index, value, _)| (index, value))
    }
}

impl Solver for BranchAndBound {
    fn name(&self) -> &str {
        "branch-and-bound"
    }

    fn solve(&self, model: &LinearModel, limits: &SolveLimits) -> Solution {
        let clock = limits.start();
        // Internally everything is a maximisation.
        let sign = match model.sense() {
            Sense::Maximize => 1.0,
            Sense::Minimize => -1.0,
        };

        let root = Node {
            lower: model.vars().iter().map(|v| v.lower).collect(),
            upper: model.vars().iter().map(|v| v.upper).collect(),
        };
        let mut stack = vec![root];
        let mut incumbent: Option<(Vec<f64>, f64)> = None;
        let mut nodes = 0usize;

        while let Some(node) = stack.pop() {
            nodes += 1;
            if nodes > self.max_nodes || clock.expired() {
                debug!(nodes, "branch and bound stopped before proving optimality");
                return Solution::without_values(Status::TimeLimit);
            }
            let (values, objective) = match solve_relaxation(model, &node.lower, &node.upper, &clock) {
                LpOutcome::Optimal { values, objective } => (values, objective),
                LpOutcome::Infeasible => continue,
                LpOutcome::Unbounded => return Solution::without_values(Status::Unbounded),
                LpOutcome::Interrupted => return Solution::without_values(Status::TimeLimit),
            };
            let bound = sign * objective;
            if let Some((_, best)) = &incumbent {
                if bound <= *best + 1e-9 {
                    continue;
                }
            }
            match Self::most_fractional(model, &values) {
                None => incumbent = Some((values, bound)),
                Some((index, value)) => {
                    let mut down = Node { lower: node.lower.clone(), upper: node.upper.clone() };
                    down.upper[index] = value.floor();
                    let mut up = node;
                    up.lower[index] = value.ceil();
                    // Rounding up is explored first.
                    stack.push(down);
                    stack.push(up);
                }
            }
        }

        debug!(nodes, "branch and bound finished");
        match incumbent {
            Some((mut values, _)) => {
                for (value, def) in values.iter_mut().zip(model.vars()) {
                    if def.kind == VarKind::Binary {
                        *value = value.round();
                    }
                }
                let objective = model.objective().evaluate(&values);
                Solution::optimal(values, objective)
            }
            None => Solution::without_values(Status::Infeasible),
        }
    }
}
