use log::{debug, warn};
use serde::Serialize;

use super::engine::Simulation;
use super::error::PlanError;
use super::finance::{monthly_payment, required_monthly};
use super::types::{PlanConfig, PropertyEvent, validate_growth_rate};

#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    pub search_max: Option<f64>,
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_max: None,
            tolerance: 0.01,
            max_iterations: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bisection {
    pub value: f64,
    pub iterations: u32,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RequiredContribution {
    #[serde(rename_all = "camelCase")]
    Reachable {
        monthly: f64,
        iterations: u32,
        converged: bool,
    },
    #[serde(rename_all = "camelCase")]
    Unreachable { search_max: f64 },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapAnalysis {
    pub annual_return: f64,
    pub target_at_horizon: f64,
    pub projected_balance: f64,
    pub gap: f64,
    pub current_monthly: f64,
    pub closed_form: bool,
    pub required: RequiredContribution,
}

// `hi` must satisfy the predicate; the returned value always does.
pub fn bisect<F>(lo: f64, hi: f64, tolerance: f64, max_iterations: u32, mut satisfied: F) -> Bisection
where
    F: FnMut(f64) -> bool,
{
    let mut lo = lo;
    let mut hi = hi;
    let mut iterations = 0;
    let mut converged = (hi - lo).abs() <= tolerance;
    while !converged && iterations < max_iterations {
        iterations += 1;
        let mid = (lo + hi) * 0.5;
        if satisfied(mid) {
            hi = mid;
        } else {
            lo = mid;
        }
        converged = (hi - lo).abs() <= tolerance;
    }
    Bisection {
        value: hi,
        iterations,
        converged,
    }
}

pub fn analyze_gap(
    config: &PlanConfig,
    properties: &[PropertyEvent],
    annual_return: f64,
    search: SearchConfig,
) -> Result<GapAnalysis, PlanError> {
    validate_search(search)?;
    let simulation = Simulation::prepare(config, properties)?;
    validate_growth_rate(annual_return)?;
    let baseline = simulation.run(config.monthly_capacity, annual_return);
    let target = baseline.target_at_horizon;
    let projected = baseline.final_balance;

    let closed_form = properties.is_empty()
        && config.rent_start() == 1
        && config.cash_interest_rate.is_none();
    let required = if closed_form {
        let investable = required_monthly(
            config.portfolio_start + config.cash_start,
            target,
            annual_return,
            config.horizon_months(),
        );
        let monthly = if investable > 0.0 {
            investable + config.monthly_rent
        } else {
            0.0
        };
        RequiredContribution::Reachable {
            monthly,
            iterations: 0,
            converged: true,
        }
    } else {
        search_required_capacity(&simulation, config, properties, annual_return, target, search)
    };

    Ok(GapAnalysis {
        annual_return,
        target_at_horizon: target,
        projected_balance: projected,
        gap: (target - projected).max(0.0),
        current_monthly: config.monthly_capacity,
        closed_form,
        required,
    })
}

fn search_required_capacity(
    simulation: &Simulation<'_>,
    config: &PlanConfig,
    properties: &[PropertyEvent],
    annual_return: f64,
    target: f64,
    search: SearchConfig,
) -> RequiredContribution {
    let reaches_target =
        |capacity: f64| simulation.run(capacity, annual_return).final_balance >= target;

    if reaches_target(0.0) {
        return RequiredContribution::Reachable {
            monthly: 0.0,
            iterations: 0,
            converged: true,
        };
    }

    let search_max = search
        .search_max
        .unwrap_or_else(|| default_search_max(config, properties, target));
    if !reaches_target(search_max) {
        warn!(
            "target {target:.0} unreachable at {annual_return} return with monthly capacity up to {search_max:.0}"
        );
        return RequiredContribution::Unreachable { search_max };
    }

    let solved = bisect(
        0.0,
        search_max,
        search.tolerance,
        search.max_iterations,
        reaches_target,
    );
    debug!(
        "required capacity {:.2} after {} iterations (converged: {})",
        solved.value, solved.iterations, solved.converged
    );
    RequiredContribution::Reachable {
        monthly: solved.value,
        iterations: solved.iterations,
        converged: solved.converged,
    }
}

fn default_search_max(config: &PlanConfig, properties: &[PropertyEvent], target: f64) -> f64 {
    let housing: f64 = properties
        .iter()
        .map(|p| {
            2.0 * p.acquisition_cost()
                + monthly_payment(p.loan_amount(), p.mortgage_rate_pct, p.mortgage_term_years)
        })
        .sum();
    (target + config.monthly_rent + housing).max(1.0)
}

fn validate_search(search: SearchConfig) -> Result<(), PlanError> {
    if !search.tolerance.is_finite() || search.tolerance <= 0.0 {
        return Err(PlanError::InvalidSearch("tolerance must be > 0".to_string()));
    }
    if search.max_iterations == 0 {
        return Err(PlanError::InvalidSearch(
            "max_iterations must be > 0".to_string(),
        ));
    }
    if let Some(max) = search.search_max {
        if !max.is_finite() || max <= 0.0 {
            return Err(PlanError::InvalidSearch("search_max must be > 0".to_string()));
        }
    }
    Ok(())
}
