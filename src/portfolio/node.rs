use log::{debug, trace, warn};
use ndarray::Array1;

use crate::error::{Error, Result};
use crate::optimization::matrix::signum;
use crate::optimization::{Phase, Repair, SolverSettings, Tableau, Tolerances};
use crate::portfolio::cube::maximize_return_on_cube;
use crate::portfolio::local_improve::integer_local_improve;
use crate::portfolio::table_builder::{build_table, relaxed_lots, SlackLayout};
use crate::portfolio::tighten::{tighten_bounds, Tightening};
use crate::portfolio::{BestIntegerSolution, Goal, ProblemParameters, Stats};

/// Why a node left the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    /// Bounds crossed or the relaxation has no feasible point.
    Infeasible,
    /// Every coordinate was fixed before solving.
    Terminal,
    /// The bound reached the incumbent.
    Pruned,
    /// The relaxation optimum is integral.
    Integral,
    /// Both children are closed.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// A leaf waiting to be branched.
    Open,
    Branched,
    Closed(Closure),
}

/// Split of a fractional coordinate into `nu[index] <= low` and
/// `nu[index] >= high`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Branch {
    pub index: usize,
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Lower,
    Upper,
}

#[derive(Debug)]
pub struct Children {
    pub lower: Node,
    pub upper: Node,
}

impl Children {
    pub fn get(&self, side: Side) -> &Node {
        match side {
            Side::Lower => &self.lower,
            Side::Upper => &self.upper,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut Node {
        match side {
            Side::Lower => &mut self.lower,
            Side::Upper => &mut self.upper,
        }
    }

    /// The child with the smaller bound, closed children counting as
    /// infinite; ties go to the upper child.
    fn min_side(&self) -> Side {
        let key = |node: &Node| {
            if node.is_closed() {
                f64::INFINITY
            } else {
                node.lower_bound
            }
        };
        if key(&self.lower) < key(&self.upper) {
            Side::Lower
        } else {
            Side::Upper
        }
    }
}

/// Shared state threaded through node evaluation.
pub struct SearchContext<'a> {
    pub params: &'a ProblemParameters,
    pub settings: &'a SolverSettings,
    pub incumbent: &'a mut BestIntegerSolution,
    pub stats: &'a mut Stats,
}

/// The parent's optimal tableau and the box it was solved on.
#[derive(Clone, Copy)]
struct WarmStart<'a> {
    tableau: &'a Tableau,
    free: &'a [usize],
    lower: &'a Array1<f64>,
    upper: &'a Array1<f64>,
}

/// A node of the branch-and-bound tree: an integer box, the relaxation
/// solved on it and, once branched, its two children.
#[derive(Debug)]
pub struct Node {
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
    /// Relaxation optimum, infinite when the box is infeasible.
    pub lower_bound: f64,
    /// Best integer value found near this node by rounding.
    pub round_value: f64,
    /// Relaxed lot vector with near-integral entries snapped.
    pub nu: Array1<f64>,
    pub state: NodeState,
    pub depth: usize,
    pub branch: Option<Branch>,
    free: Vec<usize>,
    tableau: Option<Tableau>,
    children: Option<Box<Children>>,
}

impl Node {
    /// Evaluates the root box `[0, numax]`.
    pub fn root(ctx: &mut SearchContext) -> Result<Self> {
        let lower = Array1::zeros(ctx.params.assets);
        let upper = ctx.params.numax.clone();
        Self::evaluate(lower, upper, 0, None, ctx)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, NodeState::Closed(_))
    }

    pub fn is_open(&self) -> bool {
        self.state == NodeState::Open
    }

    /// Free coordinates of the box, in increasing order.
    pub fn free(&self) -> &[usize] {
        &self.free
    }

    pub fn tableau(&self) -> Option<&Tableau> {
        self.tableau.as_ref()
    }

    pub fn children(&self) -> Option<&Children> {
        self.children.as_deref()
    }

    /// Number of nodes in this subtree, this node included.
    pub fn subtree_size(&self) -> usize {
        1 + self
            .children
            .as_deref()
            .map_or(0, |c| c.lower.subtree_size() + c.upper.subtree_size())
    }

    fn evaluate(
        lower: Array1<f64>,
        upper: Array1<f64>,
        depth: usize,
        warm: Option<WarmStart>,
        ctx: &mut SearchContext,
    ) -> Result<Self> {
        ctx.stats.node_count += 1;
        ctx.stats.nodes_created += 1;
        let params = ctx.params;
        let settings = ctx.settings;
        let tolerances = &settings.tolerances;

        let mut node = Node {
            nu: lower.clone(),
            lower,
            upper,
            lower_bound: f64::INFINITY,
            round_value: f64::INFINITY,
            state: NodeState::Closed(Closure::Infeasible),
            depth,
            branch: None,
            free: Vec::new(),
            tableau: None,
            children: None,
        };

        if tighten_bounds(params, &mut node.lower, &mut node.upper, tolerances.integrality)
            == Tightening::Crossed
        {
            trace!("bounds crossed at depth {}", depth);
            return Ok(node);
        }
        node.free = (0..params.assets)
            .filter(|&i| node.lower[i] < node.upper[i])
            .collect();
        if node.free.is_empty() {
            node.close_terminal(ctx);
            return Ok(node);
        }

        let built = match warm {
            Some(warm) => match node.warm_start(warm, params.periods, settings) {
                Ok(tableau) => tableau,
                Err(e) if e.is_numerical() => {
                    warn!("warm start at depth {} failed ({}), rebuilding", depth, e);
                    build_table(params, &node.lower, &node.upper, settings)?
                }
                Err(e) => return Err(e),
            },
            None => build_table(params, &node.lower, &node.upper, settings)?,
        };
        let mut tableau = match built {
            Some(tableau) => tableau,
            None => {
                trace!("relaxation infeasible at depth {}", depth);
                return Ok(node);
            }
        };
        let solved = tableau.optimize(Phase::Two, settings);
        ctx.stats.simplex_iterations += tableau.take_pivots();
        solved?;

        let value = tableau.value();
        node.lower_bound = value;
        if ctx.incumbent.upper_bound() <= value {
            node.state = NodeState::Closed(Closure::Pruned);
            return Ok(node);
        }

        tableau.clamp_basic_values();
        node.nu = relaxed_lots(&tableau, &node.free, &node.lower, &node.upper, params.periods);
        let mut fractional = Vec::new();
        for &i in &node.free {
            let rounded = node.nu[i].round();
            if (node.nu[i] - rounded).abs() < tolerances.integrality {
                node.nu[i] = rounded;
            } else {
                fractional.push(i);
            }
        }

        if fractional.is_empty() {
            let objective = params.objective(&node.nu);
            node.round_value = objective;
            if params.is_feasible(&node.nu, tolerances.feasibility) {
                ctx.incumbent.offer(objective, &node.nu);
            }
            node.state = NodeState::Closed(Closure::Integral);
            return Ok(node);
        }

        node.branch = Some(node.choose_branch(params, &tableau, &fractional, tolerances));
        node.improve_by_rounding(ctx);
        node.tableau = Some(tableau);
        node.state = NodeState::Open;
        Ok(node)
    }

    /// All coordinates are fixed: the box is a single point.
    fn close_terminal(&mut self, ctx: &mut SearchContext) {
        self.nu = self.lower.clone();
        self.state = NodeState::Closed(Closure::Terminal);
        if ctx
            .params
            .is_feasible(&self.nu, ctx.settings.tolerances.feasibility)
        {
            let value = ctx.params.objective(&self.nu);
            self.lower_bound = value;
            self.round_value = value;
            ctx.incumbent.offer(value, &self.nu);
        }
    }

    /// Adapts the parent's optimal tableau to this node's bounds.
    ///
    /// Tightened bounds shift the slack variables; a single basic shift is
    /// repaired in place, anything else by the general repair. Coordinates
    /// pinned by the new bounds are then removed from the tableau.
    fn warm_start(
        &self,
        warm: WarmStart,
        periods: usize,
        settings: &SolverSettings,
    ) -> Result<Option<Tableau>> {
        let parent_free = warm.free.len();
        let mut tableau = warm.tableau.clone();

        let mut delta = Array1::zeros(tableau.rhs_col());
        for (k, &i) in warm.free.iter().enumerate() {
            delta[k] = warm.lower[i] - self.lower[i];
            delta[parent_free + k] = self.upper[i] - warm.upper[i];
        }
        let changed: Vec<usize> = delta
            .iter()
            .enumerate()
            .filter(|(_, d)| **d != 0.0)
            .map(|(j, _)| j)
            .collect();
        let repair = match changed.as_slice() {
            [] => Repair::Feasible,
            [j] => match tableau.position(*j) {
                Some(position) => {
                    tableau.quick_return_to_feasibility(position, delta[*j], settings)?
                }
                None => tableau.return_to_feasibility(&delta, settings)?,
            },
            _ => tableau.return_to_feasibility(&delta, settings)?,
        };
        if repair == Repair::Infeasible {
            return Ok(None);
        }

        let pinned: Vec<usize> = warm
            .free
            .iter()
            .enumerate()
            .filter(|(_, &i)| self.lower[i] == self.upper[i])
            .map(|(k, _)| k)
            .collect();
        let mut free = parent_free;
        for &k in pinned.iter().rev() {
            let layout = SlackLayout::new(free, periods);
            let (s_lower, s_upper) = (layout.s_lower(k), layout.s_upper(k));
            if let (Some(p), Some(_)) = (tableau.position(s_lower), tableau.position(s_upper)) {
                if !tableau.drive_out(p, &settings.tolerances) {
                    tableau.remove_basic_row(p);
                }
            }
            if let Some(p) = tableau.position(s_upper) {
                tableau.remove_basic_row(p);
            }
            tableau.remove_column(s_upper);
            if let Some(p) = tableau.position(s_lower) {
                tableau.remove_basic_row(p);
            }
            tableau.remove_column(s_lower);
            free -= 1;
        }
        Ok(Some(tableau))
    }

    /// Picks the coordinate to split.
    ///
    /// When minimising risk this is the fractional coordinate whose lots move
    /// the absolute deviation the most. Under a risk cap it is the one whose
    /// weaker child, estimated from the reduced costs along its slack rows,
    /// loses the most.
    fn choose_branch(
        &self,
        params: &ProblemParameters,
        tableau: &Tableau,
        fractional: &[usize],
        tolerances: &Tolerances,
    ) -> Branch {
        let mut index = fractional[0];
        match params.goal {
            Goal::MinRisk => {
                let signs = signum(&params.deviation(&self.nu));
                let sensitivity = params.m.t().dot(&signs);
                for &i in &fractional[1..] {
                    if sensitivity[i].abs() > sensitivity[index].abs() {
                        index = i;
                    }
                }
            }
            Goal::MaxReturn { .. } => {
                let layout = SlackLayout::new(self.free.len(), params.periods);
                let mut best = f64::NEG_INFINITY;
                for &i in fractional {
                    let k = match self.free.iter().position(|&f| f == i) {
                        Some(k) => k,
                        None => continue,
                    };
                    let v = self.nu[i];
                    let up = penalty(tableau, layout.s_lower(k), tolerances) * (v.ceil() - v);
                    let down = penalty(tableau, layout.s_upper(k), tolerances) * (v - v.floor());
                    let gain = up.min(down);
                    if gain > best {
                        best = gain;
                        index = i;
                    }
                }
            }
        }
        Branch {
            index,
            low: self.nu[index].floor(),
            high: self.nu[index].ceil(),
        }
    }

    /// Rounds the relaxed point a few ways and polishes each candidate.
    fn improve_by_rounding(&mut self, ctx: &mut SearchContext) {
        let params = ctx.params;
        let tolerance = ctx.settings.tolerances.feasibility;
        let mut starts = vec![self.nu.mapv(f64::round)];
        let floor = self.nu.mapv(f64::floor);
        let ceil = self.nu.mapv(f64::ceil);
        if let Some(cube) = maximize_return_on_cube(params, &floor, &ceil) {
            starts.push(cube.nu_low);
            starts.push(cube.nu_upp);
        }
        for start in starts {
            if let Some(found) = integer_local_improve(params, &start, tolerance) {
                self.round_value = self.round_value.min(found.value);
                ctx.incumbent.offer(found.value, &found.nu);
            }
        }
    }

    /// Splits an open node on its branch coordinate, evaluating the upper
    /// child first. Both children start from this node's tableau, which is
    /// released afterwards.
    ///
    /// Returns the number of integral entries of this node's relaxed point.
    pub fn bifurcate(&mut self, ctx: &mut SearchContext) -> Result<usize> {
        let branch = match (self.state, self.branch) {
            (NodeState::Open, Some(branch)) => branch,
            _ => return Err(Error::invalid_input("only open nodes can be branched")),
        };
        let tableau = self
            .tableau
            .take()
            .ok_or_else(|| Error::invalid_input("open node without a tableau"))?;
        let warm = WarmStart {
            tableau: &tableau,
            free: &self.free,
            lower: &self.lower,
            upper: &self.upper,
        };

        let mut upper_lower = self.lower.clone();
        upper_lower[branch.index] = branch.high;
        let upper = Self::evaluate(upper_lower, self.upper.clone(), self.depth + 1, Some(warm), ctx)?;

        let mut lower_upper = self.upper.clone();
        lower_upper[branch.index] = branch.low;
        let lower = Self::evaluate(self.lower.clone(), lower_upper, self.depth + 1, Some(warm), ctx)?;

        debug!(
            "branched on asset {} at depth {}: lower {} upper {}",
            branch.index, self.depth, lower.lower_bound, upper.lower_bound
        );
        self.children = Some(Box::new(Children { lower, upper }));
        self.state = NodeState::Branched;
        Ok(self.nu.iter().filter(|v| v.fract() == 0.0).count())
    }

    /// Raises this node's bound to the smaller bound of its children and
    /// collapses it once both are closed. Returns whether anything changed.
    pub fn update_node_value(&mut self, stats: &mut Stats) -> bool {
        let children = match self.children.as_deref() {
            Some(children) if self.state == NodeState::Branched => children,
            _ => return false,
        };
        let bound = children.lower.lower_bound.min(children.upper.lower_bound);
        let exhausted = children.lower.is_closed() && children.upper.is_closed();
        let changed = bound != self.lower_bound || exhausted;
        self.lower_bound = bound;
        if exhausted {
            stats.node_count = stats.node_count.saturating_sub(self.release_children());
            self.state = NodeState::Closed(Closure::Exhausted);
        }
        changed
    }

    /// Prunes every subtree whose bound reached `upper_bound`.
    pub fn update_by_upper_bound(&mut self, upper_bound: f64, stats: &mut Stats) {
        if self.is_closed() {
            return;
        }
        if self.lower_bound >= upper_bound {
            stats.node_count = stats.node_count.saturating_sub(self.release_children());
            self.tableau = None;
            self.state = NodeState::Closed(Closure::Pruned);
            return;
        }
        if let Some(children) = self.children.as_deref_mut() {
            children.lower.update_by_upper_bound(upper_bound, stats);
            children.upper.update_by_upper_bound(upper_bound, stats);
            self.update_node_value(stats);
        }
    }

    /// Drops the children and returns how many nodes went with them.
    pub fn release_children(&mut self) -> usize {
        self.children
            .take()
            .map_or(0, |c| c.lower.subtree_size() + c.upper.subtree_size())
    }

    /// Path from this node to the open leaf with the smallest bound.
    pub fn find_min_path(&self) -> Vec<Side> {
        let mut path = Vec::new();
        let mut node = self;
        while let Some(children) = node.children.as_deref() {
            let side = children.min_side();
            path.push(side);
            node = children.get(side);
        }
        path
    }

    /// Follows `path` down the tree.
    pub fn descend_mut(&mut self, path: &[Side]) -> Option<&mut Node> {
        let mut node = self;
        for &side in path {
            node = node.children.as_deref_mut()?.get_mut(side);
        }
        Some(node)
    }
}

/// Least objective increase per unit of raising the basic slack `col`,
/// read from its row: infinite when no column can raise it.
fn penalty(tableau: &Tableau, col: usize, tolerances: &Tolerances) -> f64 {
    let row = match tableau.position(col) {
        Some(p) => p + 1,
        None => return 0.0,
    };
    (0..tableau.rhs_col())
        .filter(|&j| tableau.table[[row, j]] < -tolerances.pivot_entry)
        .map(|j| -tableau.table[[0, j]] / tableau.table[[row, j]])
        .fold(f64::INFINITY, f64::min)
}
