use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("target age {target} must be greater than current age {current}")]
    InvalidAge { current: u32, target: u32 },

    #[error("{field} has invalid rate {value}")]
    InvalidRate { field: &'static str, value: f64 },

    #[error("{field} must be a non-negative amount, got {value}")]
    NegativeAmount { field: &'static str, value: f64 },

    #[error("{field} has invalid month {value}")]
    InvalidMonth { field: &'static str, value: u32 },

    #[error("property '{label}': {reason}")]
    InvalidProperty { label: String, reason: String },

    #[error("horizon of {months} months exceeds the {max}-month limit")]
    HorizonTooLong { months: u32, max: u32 },

    #[error("{field} of {years} years exceeds the {max}-year limit")]
    TermTooLong {
        field: &'static str,
        years: u32,
        max: u32,
    },

    #[error("at least one growth rate is required")]
    NoGrowthRates,

    #[error("invalid search settings: {0}")]
    InvalidSearch(String),
}
