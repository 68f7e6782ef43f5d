use chrono::{Months, NaiveDate};
use serde::Serialize;

use super::error::PlanError;
use super::finance::{self, DEFAULT_MAX_MONTHS};

pub const MAX_HORIZON_MONTHS: u32 = DEFAULT_MAX_MONTHS;
pub const MAX_LOAN_YEARS: u32 = 50;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StartMonth {
    pub year: i32,
    pub month: u32,
}

impl StartMonth {
    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn date_of(self, index: u32) -> Option<NaiveDate> {
        self.first_day()?
            .checked_add_months(Months::new(index.saturating_sub(1)))
    }
}

#[derive(Debug, Clone)]
pub struct PlanConfig {
    pub current_age: u32,
    pub target_age: u32,
    pub annual_spending: f64,
    pub withdrawal_rate: f64,
    pub inflation_rate: f64,
    pub portfolio_start: f64,
    pub cash_start: f64,
    pub monthly_capacity: f64,
    pub monthly_rent: f64,
    pub bridge_loan_years: u32,
    pub growth_rates: Vec<f64>,
    pub start: StartMonth,
    pub birth_month: u32,
    pub preserve_portfolio: bool,
    pub rent_start_month: Option<u32>,
    pub cash_interest_rate: Option<f64>,
}

impl PlanConfig {
    pub fn horizon_months(&self) -> u32 {
        self.target_age
            .saturating_sub(self.current_age)
            .saturating_mul(12)
    }

    pub fn rent_start(&self) -> u32 {
        self.rent_start_month.unwrap_or(1).max(1)
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        if self.target_age <= self.current_age {
            return Err(PlanError::InvalidAge {
                current: self.current_age,
                target: self.target_age,
            });
        }
        let horizon = self.horizon_months();
        if horizon > MAX_HORIZON_MONTHS {
            return Err(PlanError::HorizonTooLong {
                months: horizon,
                max: MAX_HORIZON_MONTHS,
            });
        }
        if self.bridge_loan_years > MAX_LOAN_YEARS {
            return Err(PlanError::TermTooLong {
                field: "bridge_loan_years",
                years: self.bridge_loan_years,
                max: MAX_LOAN_YEARS,
            });
        }
        if !self.withdrawal_rate.is_finite() || self.withdrawal_rate <= 0.0 {
            return Err(PlanError::InvalidRate {
                field: "withdrawal_rate",
                value: self.withdrawal_rate,
            });
        }
        if !self.inflation_rate.is_finite() || self.inflation_rate < 0.0 {
            return Err(PlanError::InvalidRate {
                field: "inflation_rate",
                value: self.inflation_rate,
            });
        }
        if let Some(rate) = self.cash_interest_rate {
            if !rate.is_finite() || rate < 0.0 {
                return Err(PlanError::InvalidRate {
                    field: "cash_interest_rate",
                    value: rate,
                });
            }
        }
        for (field, value) in [
            ("annual_spending", self.annual_spending),
            ("portfolio_start", self.portfolio_start),
            ("cash_start", self.cash_start),
            ("monthly_capacity", self.monthly_capacity),
            ("monthly_rent", self.monthly_rent),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PlanError::NegativeAmount { field, value });
            }
        }
        if self.growth_rates.is_empty() {
            return Err(PlanError::NoGrowthRates);
        }
        for &rate in &self.growth_rates {
            validate_growth_rate(rate)?;
        }
        if !(1..=12).contains(&self.birth_month) {
            return Err(PlanError::InvalidMonth {
                field: "birth_month",
                value: self.birth_month,
            });
        }
        if !(1..=12).contains(&self.start.month) || self.start.date_of(horizon).is_none() {
            return Err(PlanError::InvalidMonth {
                field: "start_month",
                value: self.start.month,
            });
        }
        if self.rent_start_month == Some(0) {
            return Err(PlanError::InvalidMonth {
                field: "rent_start_month",
                value: 0,
            });
        }
        Ok(())
    }
}

pub(crate) fn validate_growth_rate(rate: f64) -> Result<(), PlanError> {
    if !rate.is_finite() || rate < 0.0 {
        return Err(PlanError::InvalidRate {
            field: "growth_rate",
            value: rate,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyEvent {
    pub label: String,
    pub price: f64,
    pub down_payment_pct: f64,
    pub fees_pct: f64,
    pub additional_costs: f64,
    pub purchase_month: Option<u32>,
    pub purchase_year: u32,
    pub mortgage_rate_pct: f64,
    pub mortgage_term_years: u32,
}

impl PropertyEvent {
    // A year offset `y` lands on the first month after `y` full years.
    pub fn scheduled_month(&self) -> u32 {
        self.purchase_month
            .unwrap_or_else(|| self.purchase_year.saturating_mul(12).saturating_add(1))
            .max(1)
    }

    pub fn acquisition_cost(&self) -> f64 {
        finance::acquisition_cost(
            self.price,
            self.down_payment_pct,
            self.fees_pct,
            self.additional_costs,
        )
    }

    pub fn loan_amount(&self) -> f64 {
        (self.price * (1.0 - self.down_payment_pct / 100.0)).max(0.0)
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        let invalid = |reason: &str| PlanError::InvalidProperty {
            label: self.label.clone(),
            reason: reason.to_string(),
        };
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(invalid("price must be >= 0"));
        }
        if !(0.0..=100.0).contains(&self.down_payment_pct) {
            return Err(invalid("down payment must be between 0 and 100 percent"));
        }
        if !self.fees_pct.is_finite() || self.fees_pct < 0.0 {
            return Err(invalid("fees must be >= 0 percent"));
        }
        if !self.additional_costs.is_finite() || self.additional_costs < 0.0 {
            return Err(invalid("additional costs must be >= 0"));
        }
        if !self.mortgage_rate_pct.is_finite() || self.mortgage_rate_pct < 0.0 {
            return Err(invalid("mortgage rate must be >= 0 percent"));
        }
        if self.mortgage_term_years == 0 && self.loan_amount() > 0.0 {
            return Err(invalid("mortgage term must be > 0 years when a loan is needed"));
        }
        if self.mortgage_term_years > MAX_LOAN_YEARS {
            return Err(invalid(&format!(
                "mortgage term must be at most {MAX_LOAN_YEARS} years"
            )));
        }
        if self.purchase_month == Some(0) {
            return Err(invalid("purchase month is 1-based"));
        }
        if self.purchase_year > MAX_HORIZON_MONTHS / 12 {
            return Err(invalid(&format!(
                "purchase year must be at most {}",
                MAX_HORIZON_MONTHS / 12
            )));
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseKind {
    FreeHousing,
    Renting,
    Investing,
    MortgageAndBridgeLoan,
    Mortgage,
    BridgeLoan,
    PostMortgage,
}

impl PhaseKind {
    pub fn label(self) -> &'static str {
        match self {
            PhaseKind::FreeHousing => "Free housing",
            PhaseKind::Renting => "Renting",
            PhaseKind::Investing => "Investing",
            PhaseKind::MortgageAndBridgeLoan => "Mortgage + bridge loan",
            PhaseKind::Mortgage => "Mortgage",
            PhaseKind::BridgeLoan => "Bridge loan",
            PhaseKind::PostMortgage => "Post-mortgage",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthState {
    pub month: u32,
    pub date: NaiveDate,
    pub age: u32,
    pub phase: PhaseKind,
    pub start_balance: f64,
    pub start_portfolio: f64,
    pub start_cash: f64,
    pub rent: f64,
    pub mortgage: f64,
    pub bridge_repayment: f64,
    pub contribution: f64,
    pub investing: f64,
    pub cash_saving: f64,
    pub growth: f64,
    pub property_withdrawal: f64,
    pub acquisition_cost: f64,
    pub property_label: Option<String>,
    pub bridge_loan: f64,
    pub end_balance: f64,
    pub end_portfolio: f64,
    pub end_cash: f64,
    pub target: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearSummary {
    pub year: u32,
    pub first_month: u32,
    pub last_month: u32,
    pub age: u32,
    pub start_balance: f64,
    pub end_balance: f64,
    pub contributions: f64,
    pub growth: f64,
    pub property_withdrawals: f64,
    pub bridge_loans: f64,
    pub rent: f64,
    pub mortgage: f64,
    pub bridge_repayments: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSummary {
    pub kind: PhaseKind,
    pub label: &'static str,
    pub first_month: u32,
    pub last_month: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub months: u32,
    pub monthly_rent: f64,
    pub monthly_mortgage: f64,
    pub monthly_bridge_repayment: f64,
    pub monthly_contribution: f64,
    pub total_contributions: f64,
    pub total_growth: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetReached {
    pub month: u32,
    pub date: NaiveDate,
    pub age: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub annual_return: f64,
    pub months: Vec<MonthState>,
    pub years: Vec<YearSummary>,
    pub phases: Vec<PhaseSummary>,
    pub reached: Option<TargetReached>,
    pub final_balance: f64,
    pub final_portfolio: f64,
    pub final_cash: f64,
    pub target_at_horizon: f64,
    pub feasible: bool,
    pub total_bridge_loans: f64,
}
