use log::debug;
use ndarray::{s, Array1, Array2, Axis};

use crate::error::{Error, Result};
use crate::portfolio::{MadStatement, ProblemKind};

/// Slack used when flooring ratios that should be integral.
const FLOOR_SLACK: f64 = 1e-9;

/// What the search optimises.
///
/// Both goals are solved as minimisations; see
/// [`ProblemParameters::objective`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Goal {
    /// Minimise the mean absolute deviation above a return floor.
    MinRisk,
    /// Maximise the expected return with the mean absolute deviation
    /// capped at `gamma`.
    MaxReturn { gamma: f64 },
}

impl Goal {
    pub fn kind(&self, relaxed: bool) -> ProblemKind {
        match (self, relaxed) {
            (Goal::MinRisk, false) => ProblemKind::MadMin,
            (Goal::MinRisk, true) => ProblemKind::MadMinLp,
            (Goal::MaxReturn { .. }, false) => ProblemKind::MadMax,
            (Goal::MaxReturn { .. }, true) => ProblemKind::MadMaxLp,
        }
    }

    /// Whether a reported objective value satisfies a user limit.
    pub fn meets_limit(&self, reported: f64, limit: f64) -> bool {
        match self {
            Goal::MinRisk => reported <= limit,
            Goal::MaxReturn { .. } => reported >= limit,
        }
    }
}

/// Immutable data shared by every node of one solve.
///
/// Lot counts `nu` are measured in lots; `gr[i]` is the fraction of capital
/// one lot of asset `i` costs, so `gr . nu` is the invested fraction.
#[derive(Debug, Clone)]
pub struct ProblemParameters {
    pub assets: usize,
    pub periods: usize,
    pub capital: f64,
    pub goal: Goal,
    /// Lower limit on `rbar . nu`.
    pub mu0: f64,
    /// Lower limit on `gr . nu`.
    pub wmin: f64,
    pub gr: Array1<f64>,
    /// Per-period return of one lot, periods by assets.
    pub r: Array2<f64>,
    /// Column means of `r`.
    pub rbar: Array1<f64>,
    /// `r` with the column means removed.
    pub m: Array2<f64>,
    /// Largest lot count per asset.
    pub numax: Array1<f64>,
    /// Assets ordered by decreasing return per unit of capital.
    pub priority: Vec<usize>,
    /// Tableau template with the bound right-hand sides left at zero.
    pub zero_tableau: Array2<f64>,
}

impl ProblemParameters {
    /// Derives risk-minimising parameters from a statement.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` when dimensions disagree or prices, lot
    /// sizes or capital are not strictly positive.
    pub fn from_statement(statement: &MadStatement) -> Result<Self> {
        let assets = statement.assets();
        let periods = statement.periods();
        if assets == 0 || periods == 0 {
            return Err(Error::invalid_input("statement needs at least one asset and one period"));
        }
        for (name, len) in [
            ("close", statement.close.len()),
            ("lot_size", statement.lot_size.len()),
            ("max_weight", statement.max_weight.len()),
        ] {
            if len != assets {
                return Err(Error::invalid_input(format!(
                    "{} has {} entries for {} assets",
                    name, len, assets
                )));
            }
        }
        if !(statement.capital > 0.0) || !statement.capital.is_finite() {
            return Err(Error::invalid_input("capital must be positive"));
        }
        if statement.max_weight.iter().any(|w| w.is_nan() || *w < 0.0) {
            return Err(Error::invalid_input("max_weight must be non-negative"));
        }

        let gr: Array1<f64> = statement
            .close
            .iter()
            .zip(&statement.lot_size)
            .map(|(close, lot)| close * lot / statement.capital)
            .collect();
        let numax: Array1<f64> = statement
            .max_weight
            .iter()
            .zip(gr.iter())
            .map(|(w, g)| (w / g + FLOOR_SLACK).floor())
            .collect();
        let r = statement.time_rate.t().to_owned() * &gr;

        Self::new(r, gr, numax, statement.min_return, statement.min_size, statement.capital)
    }

    /// Derives the parameters of `kind` from a statement; the max-return
    /// kinds take their cap from `max_risk`.
    pub fn for_kind(statement: &MadStatement, kind: ProblemKind) -> Result<Self> {
        let params = Self::from_statement(statement)?;
        match kind {
            ProblemKind::MadMax | ProblemKind::MadMaxLp => params.with_risk_cap(statement.max_risk),
            ProblemKind::MadMin | ProblemKind::MadMinLp => Ok(params),
        }
    }

    /// Switches to maximising `rbar . nu` under `mean |m nu| <= gamma`.
    ///
    /// The return floor is dropped, and the risk cap takes the place of
    /// its row in the tableau template.
    pub fn with_risk_cap(mut self, gamma: f64) -> Result<Self> {
        if !gamma.is_finite() || gamma < 0.0 {
            return Err(Error::invalid_input(format!(
                "risk cap must be finite and non-negative, got {}",
                gamma
            )));
        }
        self.goal = Goal::MaxReturn { gamma };
        self.mu0 = slack_return_floor(&self.rbar, &self.numax);
        self.zero_tableau =
            zero_tableau(&self.gr, &self.rbar, &self.m, self.mu0, self.wmin, self.goal);
        debug!("risk capped at {:.6e}", gamma);
        Ok(self)
    }

    /// Builds the parameters from per-lot returns `r` (periods by assets).
    pub fn new(
        r: Array2<f64>,
        gr: Array1<f64>,
        numax: Array1<f64>,
        mu0: f64,
        wmin: f64,
        capital: f64,
    ) -> Result<Self> {
        let (periods, assets) = r.dim();
        if assets == 0 || periods == 0 {
            return Err(Error::invalid_input("return matrix is empty"));
        }
        if gr.len() != assets || numax.len() != assets {
            return Err(Error::invalid_input("granularity and bounds must match the asset count"));
        }
        if gr.iter().any(|g| !(*g > 0.0) || !g.is_finite()) {
            return Err(Error::invalid_input("granularity must be strictly positive"));
        }
        if r.iter().any(|v| !v.is_finite()) {
            return Err(Error::invalid_input("returns must be finite"));
        }
        if mu0.is_nan() || !wmin.is_finite() {
            return Err(Error::invalid_input("return and weight floors must be numbers"));
        }

        let rbar = r
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::invalid_input("return matrix is empty"))?;
        let m = &r - &rbar;

        let mu0 = mu0.max(slack_return_floor(&rbar, &numax));

        let mut priority: Vec<usize> = (0..assets).collect();
        priority.sort_by(|&a, &b| (-rbar[a] / gr[a]).total_cmp(&(-rbar[b] / gr[b])));

        let goal = Goal::MinRisk;
        let zero_tableau = zero_tableau(&gr, &rbar, &m, mu0, wmin, goal);
        debug!(
            "parameters: {} assets, {} periods, tableau {:?}",
            assets,
            periods,
            zero_tableau.dim()
        );

        Ok(Self {
            assets,
            periods,
            capital,
            goal,
            mu0,
            wmin,
            gr,
            r,
            rbar,
            m,
            numax,
            priority,
            zero_tableau,
        })
    }

    /// Invested fraction of capital.
    pub fn weight(&self, nu: &Array1<f64>) -> f64 {
        self.gr.dot(nu)
    }

    pub fn expected_return(&self, nu: &Array1<f64>) -> f64 {
        self.rbar.dot(nu)
    }

    /// Per-period deviation of the portfolio return from its mean.
    pub fn deviation(&self, nu: &Array1<f64>) -> Array1<f64> {
        self.m.dot(nu)
    }

    /// Mean absolute deviation of the portfolio return.
    pub fn risk(&self, nu: &Array1<f64>) -> f64 {
        self.deviation(nu).mapv(f64::abs).sum() / self.periods as f64
    }

    /// Value minimised by the search, equal to the LP objective: half the
    /// summed absolute deviation, or the negated return under a risk cap.
    pub fn objective(&self, nu: &Array1<f64>) -> f64 {
        match self.goal {
            Goal::MinRisk => 0.5 * self.deviation(nu).mapv(f64::abs).sum(),
            Goal::MaxReturn { .. } => -self.expected_return(nu),
        }
    }

    /// Converts a value of [`objective`](Self::objective) to the one
    /// reported to the caller.
    pub fn reported_value(&self, objective: f64) -> f64 {
        match self.goal {
            Goal::MinRisk => objective,
            Goal::MaxReturn { .. } => -objective,
        }
    }

    /// Checks the box, weight and return constraints within `tolerance`.
    pub fn satisfies_linear(&self, nu: &Array1<f64>, tolerance: f64) -> bool {
        let in_box = nu
            .iter()
            .zip(self.numax.iter())
            .all(|(v, u)| *v >= 0.0 && *v <= *u);
        let weight = self.weight(nu);
        in_box
            && weight >= self.wmin - tolerance
            && weight <= 1.0 + tolerance
            && self.expected_return(nu) >= self.mu0 - tolerance
    }

    /// [`satisfies_linear`](Self::satisfies_linear) plus the risk cap, if any.
    pub fn is_feasible(&self, nu: &Array1<f64>, tolerance: f64) -> bool {
        let within_cap = match self.goal {
            Goal::MinRisk => true,
            Goal::MaxReturn { gamma } => self.risk(nu) <= gamma + tolerance,
        };
        within_cap && self.satisfies_linear(nu, tolerance)
    }
}

/// A return floor every point of the box `[0, numax]` clears with room.
fn slack_return_floor(rbar: &Array1<f64>, numax: &Array1<f64>) -> f64 {
    let lowest: f64 = rbar
        .iter()
        .zip(numax.iter())
        .map(|(rb, u)| (rb * u).min(0.0))
        .sum();
    lowest - 1.0
}

/// Template tableau for `w` assets and `t` periods.
///
/// Columns: `nu (w) | s_l (w) | s_u (w) | s_wmin | s_one | s_lim | a (t) | b (t) | rhs`.
/// Rows: objective, `nu - s_l = l`, `nu + s_u = u`, `gr nu - s_wmin = wmin`,
/// `gr nu + s_one = 1`, the limit row and `m nu - a + b = 0` per period.
///
/// When minimising risk the objective is `sum b` and the limit row is
/// `rbar nu - s_lim = mu0`. Under a risk cap the objective is `-rbar nu` and
/// the limit row is `sum b + s_lim = gamma t / 2`; since `sum a = sum b`,
/// this caps `sum |m nu|` at `gamma t`.
fn zero_tableau(
    gr: &Array1<f64>,
    rbar: &Array1<f64>,
    m: &Array2<f64>,
    mu0: f64,
    wmin: f64,
    goal: Goal,
) -> Array2<f64> {
    let w = gr.len();
    let t = m.nrows();
    let rhs = 3 * w + 2 * t + 3;
    let (s_wmin, s_one, s_lim) = (3 * w, 3 * w + 1, 3 * w + 2);
    let (a0, b0) = (3 * w + 3, 3 * w + 3 + t);
    let (row_wmin, row_one, row_lim) = (2 * w + 1, 2 * w + 2, 2 * w + 3);

    let mut tab = Array2::zeros((2 * w + t + 4, rhs + 1));
    match goal {
        Goal::MinRisk => {
            tab.slice_mut(s![0, b0..b0 + t]).fill(1.0);
            tab.slice_mut(s![row_lim, ..w]).assign(rbar);
            tab[[row_lim, s_lim]] = -1.0;
            tab[[row_lim, rhs]] = mu0;
        }
        Goal::MaxReturn { gamma } => {
            tab.slice_mut(s![0, ..w]).assign(&rbar.mapv(|v| -v));
            tab.slice_mut(s![row_lim, b0..b0 + t]).fill(1.0);
            tab[[row_lim, s_lim]] = 1.0;
            tab[[row_lim, rhs]] = 0.5 * gamma * t as f64;
        }
    }
    for i in 0..w {
        tab[[1 + i, i]] = 1.0;
        tab[[1 + i, w + i]] = -1.0;
        tab[[1 + w + i, i]] = 1.0;
        tab[[1 + w + i, 2 * w + i]] = 1.0;
    }

    tab.slice_mut(s![row_wmin, ..w]).assign(gr);
    tab[[row_wmin, s_wmin]] = -1.0;
    tab[[row_wmin, rhs]] = wmin;

    tab.slice_mut(s![row_one, ..w]).assign(gr);
    tab[[row_one, s_one]] = 1.0;
    tab[[row_one, rhs]] = 1.0;

    for period in 0..t {
        let row = 2 * w + 4 + period;
        tab.slice_mut(s![row, ..w]).assign(&m.row(period));
        tab[[row, a0 + period]] = -1.0;
        tab[[row, b0 + period]] = 1.0;
    }
    tab
}
