// `annual_rate` arguments are fractions, `_pct` arguments are percentages.

pub const DEFAULT_MAX_MONTHS: u32 = 720;

fn monthly_rate(annual_rate: f64) -> f64 {
    annual_rate / 12.0
}

pub fn future_value(present: f64, monthly_contribution: f64, annual_rate: f64, months: u32) -> f64 {
    if months == 0 {
        return present;
    }
    let n = months as f64;
    if annual_rate == 0.0 {
        return present + monthly_contribution * n;
    }
    let r = monthly_rate(annual_rate);
    let growth = (1.0 + r).powf(n);
    present * growth + monthly_contribution * (growth - 1.0) / r
}

pub fn required_monthly(present: f64, target: f64, annual_rate: f64, months: u32) -> f64 {
    if months == 0 {
        return (target - present).max(0.0);
    }
    let n = months as f64;
    let required = if annual_rate == 0.0 {
        (target - present) / n
    } else {
        let r = monthly_rate(annual_rate);
        let growth = (1.0 + r).powf(n);
        (target - present * growth) * r / (growth - 1.0)
    };
    required.max(0.0)
}

pub fn months_to_target(
    present: f64,
    monthly_contribution: f64,
    annual_rate: f64,
    target: f64,
    max_months: u32,
) -> Option<u32> {
    if present >= target {
        return Some(0);
    }
    let r = monthly_rate(annual_rate);
    let mut balance = present;
    for month in 1..=max_months {
        balance = balance * (1.0 + r) + monthly_contribution;
        if balance >= target {
            return Some(month);
        }
    }
    None
}

pub fn monthly_payment(principal: f64, annual_rate_pct: f64, term_years: u32) -> f64 {
    if principal <= 0.0 || term_years == 0 {
        return 0.0;
    }
    let n = f64::from(term_years) * 12.0;
    if annual_rate_pct == 0.0 {
        return principal / n;
    }
    let r = annual_rate_pct / 100.0 / 12.0;
    let growth = (1.0 + r).powf(n);
    principal * r * growth / (growth - 1.0)
}

pub fn base_target(annual_spending: f64, withdrawal_rate: f64) -> f64 {
    annual_spending / withdrawal_rate
}

pub fn inflation_adjusted_target(
    annual_spending: f64,
    withdrawal_rate: f64,
    inflation_rate: f64,
    years: f64,
) -> f64 {
    annual_spending * (1.0 + inflation_rate).powf(years) / withdrawal_rate
}

pub fn target_at_month(
    annual_spending: f64,
    withdrawal_rate: f64,
    inflation_rate: f64,
    month: u32,
) -> f64 {
    inflation_adjusted_target(
        annual_spending,
        withdrawal_rate,
        inflation_rate,
        month as f64 / 12.0,
    )
}

pub fn acquisition_cost(
    price: f64,
    down_payment_pct: f64,
    fees_pct: f64,
    additional_costs: f64,
) -> f64 {
    price * (down_payment_pct + fees_pct) / 100.0 + additional_costs
}
