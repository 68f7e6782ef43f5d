use axum::{
    Router,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use clap::Parser;
use log::info;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    GapAnalysis, MAX_HORIZON_MONTHS, MAX_LOAN_YEARS, PlanConfig, PlanError, PropertyEvent,
    ScenarioResult, SearchConfig, StartMonth, analyze_gap, base_target, run_scenarios,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlanPayload {
    current_age: Option<u32>,
    target_age: Option<u32>,
    annual_spending: Option<f64>,
    withdrawal_rate: Option<f64>,
    inflation_rate: Option<f64>,
    portfolio_start: Option<f64>,
    cash_start: Option<f64>,
    monthly_capacity: Option<f64>,
    monthly_rent: Option<f64>,
    bridge_loan_years: Option<u32>,
    growth_rates: Option<Vec<f64>>,
    start_year: Option<i32>,
    start_month: Option<u32>,
    birth_month: Option<u32>,
    preserve_portfolio: Option<bool>,
    rent_start_month: Option<u32>,
    cash_interest_rate: Option<f64>,
    properties: Option<Vec<PropertyPayload>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyPayload {
    label: Option<String>,
    price: f64,
    down_payment: Option<f64>,
    fees: Option<f64>,
    additional_costs: Option<f64>,
    purchase_month: Option<u32>,
    purchase_year: Option<u32>,
    mortgage_rate: Option<f64>,
    mortgage_term: Option<u32>,
}

#[derive(Parser, Debug)]
#[command(
    name = "fireplan",
    about = "Month-by-month FIRE projection with rent, mortgages and bridge loans"
)]
struct Cli {
    #[arg(long)]
    current_age: u32,
    #[arg(long)]
    target_age: u32,
    #[arg(long, help = "Annual spending to cover in today's money")]
    annual_spending: f64,
    #[arg(long, default_value_t = 4.0, help = "Safe withdrawal rate in percent")]
    withdrawal_rate: f64,
    #[arg(long, default_value_t = 2.0, help = "Expected annual inflation in percent")]
    inflation_rate: f64,
    #[arg(long, default_value_t = 0.0)]
    portfolio_start: f64,
    #[arg(long, default_value_t = 0.0)]
    cash_start: f64,
    #[arg(long, help = "Total amount saved each month before housing costs")]
    monthly_capacity: f64,
    #[arg(long, default_value_t = 0.0, help = "Monthly rent, paid until the first purchase")]
    monthly_rent: f64,
    #[arg(
        long,
        default_value_t = 5,
        help = "Years over which any bridge loan is repaid in equal instalments"
    )]
    bridge_loan_years: u32,
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = [4.0, 6.0, 8.0],
        help = "Annual portfolio growth rates to model, in percent"
    )]
    growth_rates: Vec<f64>,
    #[arg(long, default_value_t = 2025)]
    start_year: i32,
    #[arg(long, default_value_t = 1, help = "Calendar month (1-12) of the first simulated month")]
    start_month: u32,
    #[arg(long, default_value_t = 1, help = "Birth month (1-12), when the age increments")]
    birth_month: u32,
    #[arg(long, help = "Fund purchases entirely with bridge loans")]
    preserve_portfolio: bool,
    #[arg(long, help = "Simulation month in which rent starts; earlier months are rent-free")]
    rent_start_month: Option<u32>,
    #[arg(long, help = "Keep cash apart from the portfolio at this annual rate in percent")]
    cash_interest_rate: Option<f64>,
    #[arg(
        long = "property",
        value_parser = parse_property,
        help = "label:price:down%:fees%:extra:month:rate%:termYears (month may be yN for a year offset)"
    )]
    properties: Vec<PropertyEvent>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioReport {
    scenario: ScenarioResult,
    gap: GapAnalysis,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanResponse {
    base_target: f64,
    horizon_months: u32,
    properties: Vec<PropertyEvent>,
    scenarios: Vec<ScenarioReport>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn parse_property(raw: &str) -> Result<PropertyEvent, String> {
    let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
    if parts.len() != 8 {
        return Err(format!(
            "expected label:price:down%:fees%:extra:month:rate%:termYears, got '{raw}'"
        ));
    }
    let number = |idx: usize, name: &str| {
        parts[idx]
            .parse::<f64>()
            .map_err(|_| format!("invalid {name} '{}' in property '{raw}'", parts[idx]))
    };
    let whole = |value: &str, name: &str| {
        value
            .parse::<u32>()
            .map_err(|_| format!("invalid {name} '{value}' in property '{raw}'"))
    };

    let (purchase_month, purchase_year) = match parts[5].strip_prefix('y') {
        Some(years) => (None, whole(years, "year offset")?),
        None => (Some(whole(parts[5], "month")?), 0),
    };

    Ok(PropertyEvent {
        label: parts[0].to_string(),
        price: number(1, "price")?,
        down_payment_pct: number(2, "down payment")?,
        fees_pct: number(3, "fees")?,
        additional_costs: number(4, "additional costs")?,
        purchase_month,
        purchase_year,
        mortgage_rate_pct: number(6, "mortgage rate")?,
        mortgage_term_years: whole(parts[7], "mortgage term")?,
    })
}

fn build_config(cli: Cli) -> Result<(PlanConfig, Vec<PropertyEvent>), String> {
    if cli.target_age <= cli.current_age {
        return Err("--target-age must be > --current-age".to_string());
    }

    if cli.target_age - cli.current_age > MAX_HORIZON_MONTHS / 12 {
        return Err(format!(
            "--target-age must be at most {} years after --current-age",
            MAX_HORIZON_MONTHS / 12
        ));
    }

    if cli.bridge_loan_years > MAX_LOAN_YEARS {
        return Err(format!("--bridge-loan-years must be at most {MAX_LOAN_YEARS}"));
    }

    if !cli.annual_spending.is_finite() || cli.annual_spending < 0.0 {
        return Err("--annual-spending must be >= 0".to_string());
    }

    if !(cli.withdrawal_rate > 0.0 && cli.withdrawal_rate <= 100.0) {
        return Err("--withdrawal-rate must be between 0 (exclusive) and 100".to_string());
    }

    if !(0.0..=100.0).contains(&cli.inflation_rate) {
        return Err("--inflation-rate must be between 0 and 100".to_string());
    }

    for (name, amount) in [
        ("--portfolio-start", cli.portfolio_start),
        ("--cash-start", cli.cash_start),
        ("--monthly-capacity", cli.monthly_capacity),
        ("--monthly-rent", cli.monthly_rent),
    ] {
        if !amount.is_finite() || amount < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }

    if cli.growth_rates.is_empty() {
        return Err("--growth-rates needs at least one rate".to_string());
    }

    if cli.growth_rates.iter().any(|r| !(0.0..=100.0).contains(r)) {
        return Err("--growth-rates must be between 0 and 100".to_string());
    }

    if !(1..=12).contains(&cli.start_month) {
        return Err("--start-month must be between 1 and 12".to_string());
    }

    if !(1..=12).contains(&cli.birth_month) {
        return Err("--birth-month must be between 1 and 12".to_string());
    }

    if cli.rent_start_month == Some(0) {
        return Err("--rent-start-month is 1-based".to_string());
    }

    if let Some(rate) = cli.cash_interest_rate {
        if !(0.0..=100.0).contains(&rate) {
            return Err("--cash-interest-rate must be between 0 and 100".to_string());
        }
    }

    let config = PlanConfig {
        current_age: cli.current_age,
        target_age: cli.target_age,
        annual_spending: cli.annual_spending,
        withdrawal_rate: cli.withdrawal_rate / 100.0,
        inflation_rate: cli.inflation_rate / 100.0,
        portfolio_start: cli.portfolio_start,
        cash_start: cli.cash_start,
        monthly_capacity: cli.monthly_capacity,
        monthly_rent: cli.monthly_rent,
        bridge_loan_years: cli.bridge_loan_years,
        growth_rates: cli.growth_rates.iter().map(|r| r / 100.0).collect(),
        start: StartMonth {
            year: cli.start_year,
            month: cli.start_month,
        },
        birth_month: cli.birth_month,
        preserve_portfolio: cli.preserve_portfolio,
        rent_start_month: cli.rent_start_month,
        cash_interest_rate: cli.cash_interest_rate.map(|r| r / 100.0),
    };
    config.validate().map_err(|e| e.to_string())?;
    for property in &cli.properties {
        property.validate().map_err(|e| e.to_string())?;
    }

    Ok((config, cli.properties))
}

fn build_plan_response(
    config: &PlanConfig,
    properties: Vec<PropertyEvent>,
) -> Result<PlanResponse, PlanError> {
    let scenarios = run_scenarios(config, &properties)?
        .into_iter()
        .map(|scenario| {
            let gap = analyze_gap(
                config,
                &properties,
                scenario.annual_return,
                SearchConfig::default(),
            )?;
            Ok(ScenarioReport { scenario, gap })
        })
        .collect::<Result<Vec<_>, PlanError>>()?;

    Ok(PlanResponse {
        base_target: base_target(config.annual_spending, config.withdrawal_rate),
        horizon_months: config.horizon_months(),
        properties,
        scenarios,
    })
}

pub fn run_cli() -> Result<(), String> {
    let (config, properties) = build_config(Cli::parse())?;
    let response = build_plan_response(&config, properties).map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&response)
        .map_err(|e| format!("failed to serialize plan: {e}"))?;
    println!("{json}");
    Ok(())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/api/plan", post(plan_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!("FIRE planner API listening on http://{addr}");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn plan_handler(Json(payload): Json<PlanPayload>) -> Response {
    let (config, properties) = match plan_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match build_plan_response(&config, properties) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn plan_from_json(json: &str) -> Result<(PlanConfig, Vec<PropertyEvent>), String> {
    let payload = serde_json::from_str::<PlanPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    plan_from_payload(payload)
}

fn plan_from_payload(payload: PlanPayload) -> Result<(PlanConfig, Vec<PropertyEvent>), String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.current_age {
        cli.current_age = v;
    }
    if let Some(v) = payload.target_age {
        cli.target_age = v;
    }
    if let Some(v) = payload.annual_spending {
        cli.annual_spending = v;
    }
    if let Some(v) = payload.withdrawal_rate {
        cli.withdrawal_rate = v;
    }
    if let Some(v) = payload.inflation_rate {
        cli.inflation_rate = v;
    }
    if let Some(v) = payload.portfolio_start {
        cli.portfolio_start = v;
    }
    if let Some(v) = payload.cash_start {
        cli.cash_start = v;
    }
    if let Some(v) = payload.monthly_capacity {
        cli.monthly_capacity = v;
    }
    if let Some(v) = payload.monthly_rent {
        cli.monthly_rent = v;
    }
    if let Some(v) = payload.bridge_loan_years {
        cli.bridge_loan_years = v;
    }
    if let Some(v) = payload.growth_rates {
        cli.growth_rates = v;
    }
    if let Some(v) = payload.start_year {
        cli.start_year = v;
    }
    if let Some(v) = payload.start_month {
        cli.start_month = v;
    }
    if let Some(v) = payload.birth_month {
        cli.birth_month = v;
    }
    if let Some(v) = payload.preserve_portfolio {
        cli.preserve_portfolio = v;
    }
    if let Some(v) = payload.rent_start_month {
        cli.rent_start_month = Some(v);
    }
    if let Some(v) = payload.cash_interest_rate {
        cli.cash_interest_rate = Some(v);
    }

    for (idx, property) in payload.properties.unwrap_or_default().into_iter().enumerate() {
        let label = property
            .label
            .unwrap_or_else(|| format!("Property {}", idx + 1));
        if property.purchase_month.is_none() && property.purchase_year.is_none() {
            return Err(format!(
                "property '{label}' needs purchaseMonth or purchaseYear"
            ));
        }
        cli.properties.push(PropertyEvent {
            label,
            price: property.price,
            down_payment_pct: property.down_payment.unwrap_or(20.0),
            fees_pct: property.fees.unwrap_or(10.0),
            additional_costs: property.additional_costs.unwrap_or(0.0),
            purchase_month: property.purchase_month,
            purchase_year: property.purchase_year.unwrap_or(0),
            mortgage_rate_pct: property.mortgage_rate.unwrap_or(3.5),
            mortgage_term_years: property.mortgage_term.unwrap_or(25),
        });
    }

    build_config(cli)
}

fn default_cli_for_api() -> Cli {
    Cli {
        current_age: 30,
        target_age: 50,
        annual_spending: 40_000.0,
        withdrawal_rate: 4.0,
        inflation_rate: 2.0,
        portfolio_start: 50_000.0,
        cash_start: 10_000.0,
        monthly_capacity: 3_000.0,
        monthly_rent: 1_200.0,
        bridge_loan_years: 5,
        growth_rates: vec![4.0, 6.0, 8.0],
        start_year: 2025,
        start_month: 1,
        birth_month: 1,
        preserve_portfolio: false,
        rent_start_month: None,
        cash_interest_rate: None,
        properties: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_cli() -> Cli {
        default_cli_for_api()
    }

    #[test]
    fn parse_property_reads_month_offset() {
        let property = parse_property("Flat:400000:20:12:2500:18:3.2:25").expect("valid property");
        assert_eq!(property.label, "Flat");
        assert_approx(property.price, 400_000.0);
        assert_approx(property.down_payment_pct, 20.0);
        assert_approx(property.fees_pct, 12.0);
        assert_approx(property.additional_costs, 2_500.0);
        assert_eq!(property.purchase_month, Some(18));
        assert_eq!(property.scheduled_month(), 18);
        assert_approx(property.mortgage_rate_pct, 3.2);
        assert_eq!(property.mortgage_term_years, 25);
    }

    #[test]
    fn parse_property_reads_year_offset() {
        let property = parse_property("House:600000:25:10:0:y3:3.0:30").expect("valid property");
        assert_eq!(property.purchase_month, None);
        assert_eq!(property.purchase_year, 3);
        assert_eq!(property.scheduled_month(), 37);
    }

    #[test]
    fn parse_property_rejects_malformed_input() {
        assert!(parse_property("Flat:400000:20").is_err());
        let err = parse_property("Flat:abc:20:12:0:18:3.2:25").expect_err("bad price");
        assert!(err.contains("price"));
        let err = parse_property("Flat:400000:20:12:0:yx:3.2:25").expect_err("bad year");
        assert!(err.contains("year offset"));
    }

    #[test]
    fn build_config_converts_percentages() {
        let mut cli = sample_cli();
        cli.growth_rates = vec![5.0, 7.5];
        cli.cash_interest_rate = Some(1.5);
        let (config, _) = build_config(cli).expect("valid config");
        assert_approx(config.withdrawal_rate, 0.04);
        assert_approx(config.inflation_rate, 0.02);
        assert_eq!(config.growth_rates, vec![0.05, 0.075]);
        assert_eq!(config.cash_interest_rate, Some(0.015));
    }

    #[test]
    fn build_config_rejects_target_age_not_after_current_age() {
        let mut cli = sample_cli();
        cli.target_age = cli.current_age;
        let err = build_config(cli).expect_err("must reject ages");
        assert!(err.contains("--target-age"));
    }

    #[test]
    fn build_config_rejects_negative_rent() {
        let mut cli = sample_cli();
        cli.monthly_rent = -1.0;
        let err = build_config(cli).expect_err("must reject rent");
        assert!(err.contains("--monthly-rent"));
    }

    #[test]
    fn build_config_accepts_zero_spending() {
        let mut cli = sample_cli();
        cli.annual_spending = 0.0;
        let (config, _) = build_config(cli).expect("zero spending is valid");
        assert_approx(config.annual_spending, 0.0);

        let mut cli = sample_cli();
        cli.annual_spending = -1.0;
        let err = build_config(cli).expect_err("must reject spending");
        assert!(err.contains("--annual-spending"));
    }

    #[test]
    fn build_config_rejects_overlong_bridge_loan() {
        let mut cli = sample_cli();
        cli.bridge_loan_years = 400_000_000;
        let err = build_config(cli).expect_err("must reject bridge years");
        assert!(err.contains("--bridge-loan-years"));
    }

    #[test]
    fn plan_from_json_rejects_unbounded_horizon() {
        let err = plan_from_json(r#"{ "targetAge": 10000000 }"#).expect_err("must reject horizon");
        assert!(err.contains("--target-age"));

        let (config, _) = plan_from_json(r#"{ "currentAge": 30, "targetAge": 90 }"#)
            .expect("sixty years is the longest horizon");
        assert_eq!(config.horizon_months(), 720);
    }

    #[test]
    fn plan_from_json_rejects_overflowing_property_terms() {
        let err = plan_from_json(
            r#"{ "properties": [ { "label": "Flat", "price": 300000, "purchaseMonth": 13, "mortgageTerm": 400000000 } ] }"#,
        )
        .expect_err("must reject mortgage term");
        assert!(err.contains("Flat"));

        let err = plan_from_json(
            r#"{ "properties": [ { "label": "Later", "price": 300000, "purchaseYear": 400000000 } ] }"#,
        )
        .expect_err("must reject purchase year");
        assert!(err.contains("Later"));
    }

    #[test]
    fn build_config_rejects_invalid_property() {
        let mut cli = sample_cli();
        cli.properties
            .push(parse_property("Flat:400000:120:12:0:18:3.2:25").expect("parses"));
        let err = build_config(cli).expect_err("must reject down payment");
        assert!(err.contains("Flat"));
    }

    #[test]
    fn plan_from_json_parses_web_keys() {
        let json = r#"{
          "currentAge": 32,
          "targetAge": 55,
          "annualSpending": 60000,
          "withdrawalRate": 3.5,
          "portfolioStart": 120000,
          "monthlyCapacity": 4000,
          "monthlyRent": 1500,
          "growthRates": [5, 7],
          "startYear": 2026,
          "startMonth": 4,
          "birthMonth": 9,
          "rentStartMonth": 3,
          "preservePortfolio": true,
          "properties": [
            { "label": "Flat", "price": 450000, "purchaseYear": 2, "mortgageRate": 3.1 },
            { "price": 300000, "purchaseMonth": 90, "downPayment": 30 }
          ]
        }"#;
        let (config, properties) = plan_from_json(json).expect("json should parse");

        assert_eq!(config.current_age, 32);
        assert_eq!(config.target_age, 55);
        assert_approx(config.annual_spending, 60_000.0);
        assert_approx(config.withdrawal_rate, 0.035);
        assert_approx(config.portfolio_start, 120_000.0);
        assert_approx(config.cash_start, 10_000.0);
        assert_eq!(config.growth_rates, vec![0.05, 0.07]);
        assert_eq!(config.start, StartMonth { year: 2026, month: 4 });
        assert_eq!(config.birth_month, 9);
        assert_eq!(config.rent_start_month, Some(3));
        assert!(config.preserve_portfolio);

        assert_eq!(properties.len(), 2);
        assert_eq!(properties[0].label, "Flat");
        assert_eq!(properties[0].scheduled_month(), 25);
        assert_approx(properties[0].mortgage_rate_pct, 3.1);
        assert_eq!(properties[1].label, "Property 2");
        assert_eq!(properties[1].scheduled_month(), 90);
        assert_approx(properties[1].down_payment_pct, 30.0);
    }

    #[test]
    fn plan_from_json_requires_purchase_timing() {
        let err = plan_from_json(r#"{ "properties": [ { "label": "Flat", "price": 1000 } ] }"#)
            .expect_err("must require timing");
        assert!(err.contains("purchaseMonth"));
    }

    #[test]
    fn plan_response_serialization_contains_expected_fields() {
        let mut cli = sample_cli();
        cli.target_age = 35;
        cli.growth_rates = vec![5.0];
        cli.properties
            .push(parse_property("Flat:500000:20:10:0:13:3.0:25").expect("parses"));
        let (config, properties) = build_config(cli).expect("valid config");

        let response = build_plan_response(&config, properties).expect("valid plan");
        assert_eq!(response.scenarios.len(), 1);
        assert_eq!(response.horizon_months, 60);
        assert_approx(response.base_target, 1_000_000.0);

        let json = serde_json::to_string(&response).expect("response should serialize");
        for key in [
            "\"baseTarget\"",
            "\"scenarios\"",
            "\"months\"",
            "\"years\"",
            "\"phases\"",
            "\"bridgeLoan\"",
            "\"propertyWithdrawal\"",
            "\"targetAtHorizon\"",
            "\"mortgage-and-bridge-loan\"",
        ] {
            assert!(json.contains(key), "missing {key}");
        }
        assert!(json.contains("\"required\":{\"status\""));
    }
}
