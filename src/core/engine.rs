use chrono::NaiveDate;
use log::{debug, info, warn};

use super::error::PlanError;
use super::finance::{monthly_payment, target_at_month};
use super::types::{
    MonthState, PhaseKind, PhaseSummary, PlanConfig, PropertyEvent, ScenarioResult,
    TargetReached, YearSummary, validate_growth_rate,
};

const MATERIAL_CHANGE: f64 = 1.0;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ObligationKind {
    Mortgage,
    BridgeLoan,
}

// Instalments run from the month after `origin_month` through `end_month`.
#[derive(Copy, Clone, Debug)]
struct Obligation {
    kind: ObligationKind,
    payment: f64,
    origin_month: u32,
    end_month: u32,
}

impl Obligation {
    fn is_due(&self, month: u32) -> bool {
        month > self.origin_month && month <= self.end_month
    }

    fn is_open(&self, month: u32) -> bool {
        month >= self.origin_month && month <= self.end_month
    }
}

#[derive(Debug, Default)]
struct ObligationLedger {
    entries: Vec<Obligation>,
}

impl ObligationLedger {
    fn open(&mut self, obligation: Obligation) {
        self.entries.push(obligation);
    }

    fn due(&self, kind: ObligationKind, month: u32) -> f64 {
        self.entries
            .iter()
            .filter(|o| o.kind == kind && o.is_due(month))
            .map(|o| o.payment)
            .sum::<f64>()
            .max(0.0)
    }

    fn any_open(&self, kind: ObligationKind, month: u32) -> bool {
        self.entries
            .iter()
            .any(|o| o.kind == kind && o.is_open(month))
    }
}

struct Schedule<'a> {
    purchases: Vec<(u32, &'a PropertyEvent)>,
    beyond_horizon: Vec<(u32, &'a PropertyEvent)>,
    first_purchase: Option<u32>,
    last_purchase: Option<u32>,
    rent_start: u32,
}

impl<'a> Schedule<'a> {
    fn new(config: &PlanConfig, properties: &'a [PropertyEvent]) -> Self {
        let horizon = config.horizon_months();
        let (mut purchases, beyond_horizon): (Vec<_>, Vec<_>) = properties
            .iter()
            .map(|property| (property.scheduled_month(), property))
            .partition(|(month, _)| *month <= horizon);
        purchases.sort_by_key(|(month, _)| *month);

        Self {
            first_purchase: purchases.first().map(|(month, _)| *month),
            last_purchase: purchases.last().map(|(month, _)| *month),
            purchases,
            beyond_horizon,
            rent_start: config.rent_start(),
        }
    }

    fn rent_due(&self, month: u32) -> bool {
        month >= self.rent_start && self.first_purchase.is_none_or(|first| month < first)
    }

    fn purchase_pending(&self, month: u32) -> bool {
        self.last_purchase.is_some_and(|last| month <= last)
    }

    fn owns_property(&self, month: u32) -> bool {
        self.first_purchase.is_some_and(|first| month >= first)
    }

    fn purchases_in(&self, month: u32) -> impl Iterator<Item = &'a PropertyEvent> + '_ {
        self.purchases
            .iter()
            .filter(move |(scheduled, _)| *scheduled == month)
            .map(|(_, property)| *property)
    }
}

#[derive(Copy, Clone, Debug)]
struct Balances {
    portfolio: f64,
    cash: f64,
}

impl Balances {
    fn total(self) -> f64 {
        self.portfolio + self.cash
    }
}

#[derive(Copy, Clone, Debug)]
struct Funding {
    cost: f64,
    own_withdrawal: f64,
    bridge_loan: f64,
}

#[derive(Copy, Clone, Debug)]
struct ObligationMix {
    before_rent_start: bool,
    renting: bool,
    owns_property: bool,
    mortgage: bool,
    bridge_loan: bool,
}

pub fn run_scenarios(
    config: &PlanConfig,
    properties: &[PropertyEvent],
) -> Result<Vec<ScenarioResult>, PlanError> {
    let simulation = Simulation::prepare(config, properties)?;
    simulation.warn_beyond_horizon();
    Ok(config
        .growth_rates
        .iter()
        .map(|&rate| {
            let result = simulation.run(config.monthly_capacity, rate);
            log_outcome(&result);
            result
        })
        .collect())
}

pub fn build_scenario(
    config: &PlanConfig,
    properties: &[PropertyEvent],
    annual_return: f64,
) -> Result<ScenarioResult, PlanError> {
    let simulation = Simulation::prepare(config, properties)?;
    validate_growth_rate(annual_return)?;
    simulation.warn_beyond_horizon();
    let result = simulation.run(config.monthly_capacity, annual_return);
    log_outcome(&result);
    Ok(result)
}

// A validated plan that can be run repeatedly, e.g. once per solver candidate.
pub(crate) struct Simulation<'a> {
    config: &'a PlanConfig,
    schedule: Schedule<'a>,
    dates: Vec<NaiveDate>,
}

impl<'a> Simulation<'a> {
    pub(crate) fn prepare(
        config: &'a PlanConfig,
        properties: &'a [PropertyEvent],
    ) -> Result<Self, PlanError> {
        config.validate()?;
        for property in properties {
            property.validate()?;
        }
        let dates = (1..=config.horizon_months())
            .map(|month| config.start.date_of(month))
            .collect::<Option<Vec<_>>>()
            .ok_or(PlanError::InvalidMonth {
                field: "start_month",
                value: config.start.month,
            })?;

        Ok(Self {
            config,
            schedule: Schedule::new(config, properties),
            dates,
        })
    }

    fn warn_beyond_horizon(&self) {
        for (month, property) in &self.schedule.beyond_horizon {
            warn!(
                "property '{}' scheduled for month {month}, beyond the {}-month horizon; ignoring it",
                property.label,
                self.dates.len()
            );
        }
    }

    pub(crate) fn run(&self, monthly_capacity: f64, annual_return: f64) -> ScenarioResult {
        let config = self.config;
        let schedule = &self.schedule;
        let cash_rate = config.cash_interest_rate.unwrap_or(0.0);
        let separate_cash = config.cash_interest_rate.is_some();

        let mut balances = if separate_cash {
            Balances {
                portfolio: config.portfolio_start,
                cash: config.cash_start,
            }
        } else {
            Balances {
                portfolio: config.portfolio_start + config.cash_start,
                cash: 0.0,
            }
        };
        let mut ledger = ObligationLedger::default();
        let mut months = Vec::with_capacity(self.dates.len());
        let mut feasible = true;
        let mut reached = None;
        let mut total_bridge_loans = 0.0;

        for (month, &date) in (1u32..).zip(&self.dates) {
            let age = age_at_month(config, month);

            let rent = if schedule.rent_due(month) {
                config.monthly_rent
            } else {
                0.0
            };
            let mortgage = ledger.due(ObligationKind::Mortgage, month);
            let bridge_repayment = ledger.due(ObligationKind::BridgeLoan, month);
            let contribution = (monthly_capacity - rent - mortgage - bridge_repayment).max(0.0);
            let (investing, cash_saving) = if separate_cash && schedule.purchase_pending(month) {
                (0.0, contribution)
            } else {
                (contribution, 0.0)
            };

            let start = balances;
            let portfolio_growth = start.portfolio * annual_return / 12.0;
            let cash_growth = start.cash * cash_rate / 12.0;
            let mut current = Balances {
                portfolio: start.portfolio + investing + portfolio_growth,
                cash: start.cash + cash_saving + cash_growth,
            };

            let mut acquisition_cost = 0.0;
            let mut property_withdrawal = 0.0;
            let mut bridge_loan = 0.0;
            let mut labels = Vec::new();
            for property in schedule.purchases_in(month) {
                let funding = fund_purchase(config, property, &mut current);
                debug!(
                    "month {month}: buying '{}' for {:.2} ({:.2} own funds, {:.2} bridge loan)",
                    property.label, funding.cost, funding.own_withdrawal, funding.bridge_loan
                );
                open_purchase_obligations(config, property, month, funding, &mut ledger);
                acquisition_cost += funding.cost;
                property_withdrawal += funding.own_withdrawal;
                bridge_loan += funding.bridge_loan;
                labels.push(property.label.clone());
            }
            total_bridge_loans += bridge_loan;

            if current.portfolio < 0.0 || current.cash < 0.0 {
                if feasible {
                    debug!("balance went negative in month {month} at {annual_return} return; clamping to zero");
                }
                feasible = false;
                current.portfolio = current.portfolio.max(0.0);
                current.cash = current.cash.max(0.0);
            }
            balances = current;

            let target = target_at_month(
                config.annual_spending,
                config.withdrawal_rate,
                config.inflation_rate,
                month,
            );
            if reached.is_none() && balances.total() >= target {
                reached = Some(TargetReached { month, date, age });
            }

            let phase = phase_for(ObligationMix {
                before_rent_start: month < schedule.rent_start,
                renting: rent > 0.0,
                owns_property: schedule.owns_property(month),
                mortgage: ledger.any_open(ObligationKind::Mortgage, month),
                bridge_loan: ledger.any_open(ObligationKind::BridgeLoan, month),
            });

            months.push(MonthState {
                month,
                date,
                age,
                phase,
                start_balance: start.total(),
                start_portfolio: start.portfolio,
                start_cash: start.cash,
                rent,
                mortgage,
                bridge_repayment,
                contribution,
                investing,
                cash_saving,
                growth: portfolio_growth + cash_growth,
                property_withdrawal,
                acquisition_cost,
                property_label: (!labels.is_empty()).then(|| labels.join(" + ")),
                bridge_loan,
                end_balance: balances.total(),
                end_portfolio: balances.portfolio,
                end_cash: balances.cash,
                target,
            });
        }

        let target_at_horizon = target_at_month(
            config.annual_spending,
            config.withdrawal_rate,
            config.inflation_rate,
            config.horizon_months(),
        );
        let years = summarize_years(&months);
        let phases = summarize_phases(&months);
        ScenarioResult {
            annual_return,
            months,
            years,
            phases,
            reached,
            final_balance: balances.total(),
            final_portfolio: balances.portfolio,
            final_cash: balances.cash,
            target_at_horizon,
            feasible,
            total_bridge_loans,
        }
    }
}

fn log_outcome(result: &ScenarioResult) {
    let rate = result.annual_return * 100.0;
    match result.reached {
        Some(r) => info!(
            "{rate:.2}% return: target reached in month {} at age {}, final balance {:.0}",
            r.month, r.age, result.final_balance
        ),
        None => info!(
            "{rate:.2}% return: target {:.0} not reached, final balance {:.0}",
            result.target_at_horizon, result.final_balance
        ),
    }
    if !result.feasible {
        warn!("{rate:.2}% return: balance went negative and was clamped to zero");
    }
}

fn age_at_month(config: &PlanConfig, month: u32) -> u32 {
    let elapsed = month.saturating_sub(1);
    let first_anniversary = match (config.birth_month + 12 - config.start.month) % 12 {
        0 => 12,
        offset => offset,
    };
    let anniversaries = if elapsed >= first_anniversary {
        1 + (elapsed - first_anniversary) / 12
    } else {
        0
    };
    config.current_age + anniversaries
}

fn fund_purchase(config: &PlanConfig, property: &PropertyEvent, balances: &mut Balances) -> Funding {
    let cost = property.acquisition_cost();
    if config.preserve_portfolio {
        return Funding {
            cost,
            own_withdrawal: 0.0,
            bridge_loan: cost,
        };
    }

    let from_cash = cost.min(balances.cash.max(0.0));
    balances.cash -= from_cash;
    let from_portfolio = (cost - from_cash).min(balances.portfolio.max(0.0));
    balances.portfolio -= from_portfolio;

    let own_withdrawal = from_cash + from_portfolio;
    Funding {
        cost,
        own_withdrawal,
        bridge_loan: (cost - own_withdrawal).max(0.0),
    }
}

fn open_purchase_obligations(
    config: &PlanConfig,
    property: &PropertyEvent,
    month: u32,
    funding: Funding,
    ledger: &mut ObligationLedger,
) {
    let payment = monthly_payment(
        property.loan_amount(),
        property.mortgage_rate_pct,
        property.mortgage_term_years,
    );
    if payment > 0.0 {
        ledger.open(Obligation {
            kind: ObligationKind::Mortgage,
            payment,
            origin_month: month,
            end_month: month.saturating_add(property.mortgage_term_years.saturating_mul(12)),
        });
    }

    if funding.bridge_loan > 0.0 && config.bridge_loan_years > 0 {
        let instalments = config.bridge_loan_years.saturating_mul(12);
        ledger.open(Obligation {
            kind: ObligationKind::BridgeLoan,
            payment: funding.bridge_loan / instalments as f64,
            origin_month: month,
            end_month: month.saturating_add(instalments),
        });
    }
}

fn phase_for(mix: ObligationMix) -> PhaseKind {
    if !mix.owns_property {
        return if mix.before_rent_start {
            PhaseKind::FreeHousing
        } else if mix.renting {
            PhaseKind::Renting
        } else {
            PhaseKind::Investing
        };
    }
    match (mix.mortgage, mix.bridge_loan) {
        (true, true) => PhaseKind::MortgageAndBridgeLoan,
        (true, false) => PhaseKind::Mortgage,
        (false, true) => PhaseKind::BridgeLoan,
        (false, false) => PhaseKind::PostMortgage,
    }
}

fn summarize_years(months: &[MonthState]) -> Vec<YearSummary> {
    months
        .chunks(12)
        .zip(1u32..)
        .filter_map(|(chunk, year)| {
            let first = chunk.first()?;
            let last = chunk.last()?;
            Some(YearSummary {
                year,
                first_month: first.month,
                last_month: last.month,
                age: last.age,
                start_balance: first.start_balance,
                end_balance: last.end_balance,
                contributions: chunk.iter().map(|m| m.contribution).sum(),
                growth: chunk.iter().map(|m| m.growth).sum(),
                property_withdrawals: chunk.iter().map(|m| m.property_withdrawal).sum(),
                bridge_loans: chunk.iter().map(|m| m.bridge_loan).sum(),
                rent: chunk.iter().map(|m| m.rent).sum(),
                mortgage: chunk.iter().map(|m| m.mortgage).sum(),
                bridge_repayments: chunk.iter().map(|m| m.bridge_repayment).sum(),
            })
        })
        .collect()
}

struct PhaseRange {
    summary: PhaseSummary,
    // Opened by a purchase month, whose new payments only show up next month.
    awaiting_payments: bool,
}

impl PhaseRange {
    fn open(month: &MonthState) -> Self {
        Self {
            summary: PhaseSummary {
                kind: month.phase,
                label: month.phase.label(),
                first_month: month.month,
                last_month: month.month,
                start_date: month.date,
                end_date: month.date,
                months: 1,
                monthly_rent: month.rent,
                monthly_mortgage: month.mortgage,
                monthly_bridge_repayment: month.bridge_repayment,
                monthly_contribution: month.contribution,
                total_contributions: month.contribution,
                total_growth: month.growth,
            },
            awaiting_payments: month.property_label.is_some(),
        }
    }

    fn accepts(&self, month: &MonthState) -> bool {
        if month.phase != self.summary.kind || month.property_label.is_some() {
            return false;
        }
        self.awaiting_payments
            || ((month.rent - self.summary.monthly_rent).abs() < MATERIAL_CHANGE
                && (month.mortgage - self.summary.monthly_mortgage).abs() < MATERIAL_CHANGE
                && (month.bridge_repayment - self.summary.monthly_bridge_repayment).abs()
                    < MATERIAL_CHANGE)
    }

    fn extend(&mut self, month: &MonthState) {
        let summary = &mut self.summary;
        if self.awaiting_payments {
            summary.monthly_rent = month.rent;
            summary.monthly_mortgage = month.mortgage;
            summary.monthly_bridge_repayment = month.bridge_repayment;
            summary.monthly_contribution = month.contribution;
            self.awaiting_payments = false;
        }
        summary.last_month = month.month;
        summary.end_date = month.date;
        summary.months += 1;
        summary.total_contributions += month.contribution;
        summary.total_growth += month.growth;
    }
}

fn summarize_phases(months: &[MonthState]) -> Vec<PhaseSummary> {
    let mut phases = Vec::new();
    let mut current: Option<PhaseRange> = None;
    for month in months {
        match current.as_mut() {
            Some(range) if range.accepts(month) => range.extend(month),
            _ => {
                if let Some(done) = current.replace(PhaseRange::open(month)) {
                    phases.push(done.summary);
                }
            }
        }
    }
    if let Some(done) = current {
        phases.push(done.summary);
    }
    phases
}
