mod engine;
mod error;
mod finance;
mod solver;
mod types;

pub use engine::{build_scenario, run_scenarios};
pub use error::PlanError;
pub use finance::{
    DEFAULT_MAX_MONTHS, acquisition_cost, base_target, future_value, inflation_adjusted_target,
    monthly_payment, months_to_target, required_monthly, target_at_month,
};
pub use solver::{
    Bisection, GapAnalysis, RequiredContribution, SearchConfig, analyze_gap, bisect,
};
pub use types::{
    MAX_HORIZON_MONTHS, MAX_LOAN_YEARS, MonthState, PhaseKind, PhaseSummary, PlanConfig,
    PropertyEvent, ScenarioResult, StartMonth, TargetReached, YearSummary,
};
