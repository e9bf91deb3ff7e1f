use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    BracketRow, CAPITAL_GAINS_INCLUSION_RATE, Inputs, Projection, Strategy, YearRecord, project,
    tax_brackets_reference, tax_owed,
};

const INDEX_HTML: &str = include_str!("../../web/index.html");

/// JSON/query payload accepted by `/api/analyze`. Every field is optional;
/// missing values fall back to the CLI defaults. Dollar figures are nominal,
/// rates are percent.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AnalyzePayload {
    current_age: Option<u32>,
    retirement_age: Option<u32>,
    life_expectancy: Option<u32>,

    rrif: Option<f64>,
    rrsp: Option<f64>,
    tfsa: Option<f64>,
    fhsa: Option<f64>,
    resp: Option<f64>,
    individual_taxable: Option<f64>,
    joint_taxable: Option<f64>,
    corporate_investment: Option<f64>,
    appreciating_assets: Option<f64>,

    target_retirement_income: Option<f64>,
    arr: Option<f64>,
    inflation: Option<f64>,

    #[serde(alias = "annualOAS")]
    annual_oas: Option<f64>,
    #[serde(alias = "annualCPP")]
    annual_cpp: Option<f64>,
    annual_pension: Option<f64>,
    oas_start_age: Option<u32>,
    cpp_start_age: Option<u32>,
    pension_start_age: Option<u32>,

    #[serde(alias = "annualRRSPContribution")]
    annual_rrsp_contribution: Option<f64>,
    #[serde(alias = "annualTFSAContribution")]
    annual_tfsa_contribution: Option<f64>,
    annual_non_registered_contribution: Option<f64>,

    taxable_non_registered_withdrawal_percent: Option<f64>,
    #[serde(alias = "applyOASClawback")]
    apply_oas_clawback: Option<bool>,
    #[serde(alias = "applyMinimumRRIFWithdrawals")]
    apply_minimum_rrif_withdrawals: Option<bool>,
    apply_pension_income_tax_credit: Option<bool>,

    withdrawal_strategy: Option<String>,
}

#[derive(Parser, Debug)]
#[command(
    name = "drawdown",
    about = "Retirement drawdown projector (RRIF + TFSA + non-registered + withdrawal strategies)"
)]
struct Cli {
    #[arg(long)]
    current_age: u32,
    #[arg(long)]
    retirement_age: u32,
    #[arg(long, default_value_t = 95, help = "Age to project through")]
    life_expectancy: u32,
    #[arg(long, default_value_t = 0.0)]
    rrif_start: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Current RRSP balance, converted to a RRIF at retirement"
    )]
    rrsp_start: f64,
    #[arg(long, default_value_t = 0.0)]
    tfsa_start: f64,
    #[arg(long, default_value_t = 0.0)]
    non_registered_start: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Appreciating assets (e.g. home equity), never drawn for income"
    )]
    appreciating_start: f64,
    #[arg(
        long,
        help = "Desired annual retirement income in today's post-tax dollars"
    )]
    target_retirement_income: f64,
    #[arg(long, help = "Expected annual return in percent, e.g. 5")]
    annual_return_rate: f64,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Expected annual inflation in percent"
    )]
    inflation_rate: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Annual OAS benefit in today's dollars"
    )]
    annual_oas: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Annual CPP benefit in today's dollars"
    )]
    annual_cpp: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Annual employer pension income in today's dollars"
    )]
    annual_pension: f64,
    #[arg(long, default_value_t = 65)]
    oas_start_age: u32,
    #[arg(long, default_value_t = 65)]
    cpp_start_age: u32,
    #[arg(long, default_value_t = 65)]
    pension_start_age: u32,
    #[arg(long, default_value_t = 0.0)]
    annual_rrsp_contribution: f64,
    #[arg(long, default_value_t = 0.0)]
    annual_tfsa_contribution: f64,
    #[arg(long, default_value_t = 0.0)]
    annual_non_registered_contribution: f64,
    #[arg(
        long,
        default_value_t = 100.0,
        help = "Share of non-registered withdrawals subject to capital gains, in percent"
    )]
    taxable_non_registered_withdrawal_percent: f64,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    apply_oas_clawback: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    apply_minimum_rrif_withdrawals: bool,
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    apply_pension_income_tax_credit: bool,
    #[arg(
        long,
        default_value = "rrif_first",
        help = "Withdrawal strategy: rrif_first, tfsa_last, non_registered_first, bracket_fill, or tax_smoothing"
    )]
    withdrawal_strategy: String,
}

#[derive(Debug)]
struct ApiRequest {
    inputs: Inputs,
    strategy: Strategy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StrategyOption {
    id: &'static str,
    label: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StrategyComparison {
    id: &'static str,
    label: &'static str,
    lifetime_taxes: f64,
    depleted_age: Option<u32>,
    ending_balance: f64,
    estate_taxes: f64,
    ending_balance_after_estate_taxes: f64,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChartRanges {
    portfolio_max: f64,
    income_max: f64,
    tax_amount_max: f64,
    tax_rate_max: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    selected_strategy: &'static str,
    selected_strategy_label: &'static str,
    strategy_options: Vec<StrategyOption>,
    strategy_comparison: Vec<StrategyComparison>,
    chart_ranges: ChartRanges,
    years_to_retirement: u32,
    retirement_start_age: u32,
    balance_at_retirement: f64,
    depleted_age: Option<u32>,
    life_expectancy: u32,
    nest_egg: f64,
    rrif_at_start: f64,
    non_rrif_at_start: f64,
    years: Vec<YearRecord>,
    tax_brackets: Vec<BracketRow>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_inputs(cli: Cli) -> Result<Inputs, String> {
    if cli.current_age == 0 {
        return Err("--current-age must be > 0".to_string());
    }

    if cli.target_retirement_income <= 0.0 || !cli.target_retirement_income.is_finite() {
        return Err("--target-retirement-income must be > 0".to_string());
    }

    if cli.life_expectancy < cli.current_age.max(cli.retirement_age) {
        return Err("--life-expectancy must be >= the retirement start age".to_string());
    }

    for (name, value) in [
        ("--rrif-start", cli.rrif_start),
        ("--rrsp-start", cli.rrsp_start),
        ("--tfsa-start", cli.tfsa_start),
        ("--non-registered-start", cli.non_registered_start),
        ("--appreciating-start", cli.appreciating_start),
        ("--annual-oas", cli.annual_oas),
        ("--annual-cpp", cli.annual_cpp),
        ("--annual-pension", cli.annual_pension),
        ("--annual-rrsp-contribution", cli.annual_rrsp_contribution),
        ("--annual-tfsa-contribution", cli.annual_tfsa_contribution),
        (
            "--annual-non-registered-contribution",
            cli.annual_non_registered_contribution,
        ),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }

    if !(0.0..=100.0).contains(&cli.taxable_non_registered_withdrawal_percent) {
        return Err(
            "--taxable-non-registered-withdrawal-percent must be between 0 and 100".to_string(),
        );
    }

    if !cli.annual_return_rate.is_finite() || cli.annual_return_rate <= -100.0 {
        return Err("--annual-return-rate must be > -100".to_string());
    }

    if !cli.inflation_rate.is_finite() || cli.inflation_rate <= -100.0 {
        return Err("--inflation-rate must be > -100".to_string());
    }

    Ok(Inputs {
        current_age: cli.current_age,
        retirement_age: cli.retirement_age,
        life_expectancy: cli.life_expectancy,
        rrif_start: cli.rrif_start,
        rrsp_start: cli.rrsp_start,
        tfsa_start: cli.tfsa_start,
        non_registered_start: cli.non_registered_start,
        appreciating_start: cli.appreciating_start,
        target_income_post_tax: cli.target_retirement_income,
        return_rate: cli.annual_return_rate / 100.0,
        inflation_rate: cli.inflation_rate / 100.0,
        oas_annual: cli.annual_oas,
        cpp_annual: cli.annual_cpp,
        pension_annual: cli.annual_pension,
        oas_start_age: cli.oas_start_age,
        cpp_start_age: cli.cpp_start_age,
        pension_start_age: cli.pension_start_age,
        rrsp_contribution: cli.annual_rrsp_contribution,
        tfsa_contribution: cli.annual_tfsa_contribution,
        non_registered_contribution: cli.annual_non_registered_contribution,
        taxable_share: cli.taxable_non_registered_withdrawal_percent / 100.0,
        apply_oas_clawback: cli.apply_oas_clawback,
        apply_rrif_minimum: cli.apply_minimum_rrif_withdrawals,
        apply_pension_credit: cli.apply_pension_income_tax_credit,
    })
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/index.html", get(index_handler))
        .route(
            "/api/analyze",
            get(analyze_get_handler).post(analyze_post_handler),
        )
        .route("/api/strategies", get(strategies_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "drawdown HTTP API listening");
    tracing::info!("local access: http://127.0.0.1:{port}/");

    axum::serve(listener, app).await
}

async fn index_handler() -> impl IntoResponse {
    with_cache_control(Html(INDEX_HTML))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn strategies_handler() -> Response {
    json_response(StatusCode::OK, strategy_options())
}

async fn analyze_get_handler(Query(payload): Query<AnalyzePayload>) -> Response {
    analyze_handler_impl(payload).await
}

async fn analyze_post_handler(Json(payload): Json<AnalyzePayload>) -> Response {
    analyze_handler_impl(payload).await
}

async fn analyze_handler_impl(payload: AnalyzePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => {
            tracing::warn!(error = %msg, "rejected analyze request");
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    };

    match build_analyze_response(&request) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => {
            tracing::warn!(error = %msg, "projection failed");
            error_response(StatusCode::BAD_REQUEST, &msg)
        }
    }
}

fn build_analyze_response(request: &ApiRequest) -> Result<AnalyzeResponse, String> {
    let inputs = &request.inputs;
    let mut selected: Option<Projection> = None;
    let mut comparison = Vec::with_capacity(Strategy::ALL.len());
    let mut ranges = ChartRanges::default();

    for strategy in Strategy::ALL {
        let candidate = project(inputs, strategy).map_err(|e| e.to_string())?;
        let (estate_taxes, ending_balance_after_estate_taxes) =
            estimate_estate_taxes(inputs, &candidate);
        comparison.push(StrategyComparison {
            id: strategy.id(),
            label: strategy.label(),
            lifetime_taxes: candidate.years.iter().map(|y| y.total_tax).sum(),
            depleted_age: candidate.depleted_age,
            ending_balance: candidate.years.last().map_or(0.0, |y| y.total_balance),
            estate_taxes,
            ending_balance_after_estate_taxes,
        });
        widen_chart_ranges(&mut ranges, &candidate);
        if strategy == request.strategy {
            selected = Some(candidate);
        }
    }

    // Best after-estate outcome first, lifetime taxes as tie-breaker.
    comparison.sort_by(|a, b| {
        b.ending_balance_after_estate_taxes
            .total_cmp(&a.ending_balance_after_estate_taxes)
            .then(a.lifetime_taxes.total_cmp(&b.lifetime_taxes))
    });

    let projection = selected.ok_or_else(|| "selected strategy was not projected".to_string())?;
    let nest_egg =
        inputs.rrif_start + inputs.rrsp_start + inputs.tfsa_start + inputs.non_registered_start;

    Ok(AnalyzeResponse {
        selected_strategy: request.strategy.id(),
        selected_strategy_label: request.strategy.label(),
        strategy_options: strategy_options(),
        strategy_comparison: comparison,
        chart_ranges: ChartRanges {
            portfolio_max: ranges.portfolio_max.max(1.0) * 1.10,
            income_max: ranges.income_max.max(1.0) * 1.10,
            tax_amount_max: ranges.tax_amount_max.max(1.0) * 1.10,
            tax_rate_max: ranges.tax_rate_max.max(1.0) * 1.15,
        },
        years_to_retirement: projection.years_to_retirement,
        retirement_start_age: projection.retirement_start_age,
        balance_at_retirement: projection.balance_at_retirement,
        depleted_age: projection.depleted_age,
        life_expectancy: inputs.life_expectancy,
        nest_egg,
        rrif_at_start: inputs.rrif_start,
        non_rrif_at_start: inputs.tfsa_start + inputs.non_registered_start,
        years: projection.years,
        tax_brackets: tax_brackets_reference(),
    })
}

/// Tax due if the estate were settled after the final projected year: the
/// full RRIF balance plus the included share of unrealized gains, taxed at
/// that year's indexed schedule.
fn estimate_estate_taxes(inputs: &Inputs, projection: &Projection) -> (f64, f64) {
    let Some(last) = projection.years.last() else {
        return (0.0, 0.0);
    };

    let taxable_gains = last.non_registered_balance
        * inputs.taxable_share
        * CAPITAL_GAINS_INCLUSION_RATE
        + last.appreciating_balance * CAPITAL_GAINS_INCLUSION_RATE;
    let final_offset = (projection.years.len() - 1) as u32;
    let estate_taxes = tax_owed(
        last.rrif_balance + taxable_gains,
        inputs.inflation_rate,
        final_offset,
    );
    let ending_balance = last.rrif_balance
        + last.tfsa_balance
        + last.non_registered_balance
        + last.appreciating_balance;
    (estate_taxes, (ending_balance - estate_taxes).max(0.0))
}

fn widen_chart_ranges(ranges: &mut ChartRanges, projection: &Projection) {
    for year in &projection.years {
        ranges.portfolio_max = ranges
            .portfolio_max
            .max(year.total_balance)
            .max(year.rrif_balance)
            .max(year.tfsa_balance)
            .max(year.non_registered_balance)
            .max(year.appreciating_balance);
        ranges.income_max = ranges
            .income_max
            .max(year.rrif_withdrawal)
            .max(year.tfsa_withdrawal)
            .max(year.non_registered_withdrawal)
            .max(year.government_income)
            .max(year.net_income);
        ranges.tax_amount_max = ranges
            .tax_amount_max
            .max(year.income_tax)
            .max(year.capital_gains_tax)
            .max(year.oas_clawback)
            .max(year.total_tax);
        ranges.tax_rate_max = ranges
            .tax_rate_max
            .max(year.average_tax_rate)
            .max(year.marginal_tax_rate);
    }
}

fn strategy_options() -> Vec<StrategyOption> {
    Strategy::ALL
        .iter()
        .map(|s| StrategyOption {
            id: s.id(),
            label: s.label(),
        })
        .collect()
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
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
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<AnalyzePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: AnalyzePayload) -> Result<ApiRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.current_age {
        cli.current_age = v;
    }
    if let Some(v) = payload.retirement_age {
        cli.retirement_age = v;
    }
    if let Some(v) = payload.life_expectancy {
        cli.life_expectancy = v;
    }

    if let Some(v) = payload.rrif {
        cli.rrif_start = v;
    }
    if let Some(v) = payload.rrsp {
        cli.rrsp_start = v;
    }
    if let Some(v) = payload.tfsa {
        cli.tfsa_start = v;
    }
    if let Some(v) = payload.appreciating_assets {
        cli.appreciating_start = v;
    }

    // The web form breaks the non-registered bucket into sub-accounts; the
    // projection treats them as one taxable pool.
    let taxable_buckets = [
        payload.fhsa,
        payload.resp,
        payload.individual_taxable,
        payload.joint_taxable,
        payload.corporate_investment,
    ];
    if taxable_buckets.iter().any(Option::is_some) {
        cli.non_registered_start = taxable_buckets.iter().flatten().sum();
    }

    if let Some(v) = payload.target_retirement_income {
        cli.target_retirement_income = v;
    }
    if let Some(v) = payload.arr {
        cli.annual_return_rate = v;
    }
    if let Some(v) = payload.inflation {
        cli.inflation_rate = v;
    }

    if let Some(v) = payload.annual_oas {
        cli.annual_oas = v;
    }
    if let Some(v) = payload.annual_cpp {
        cli.annual_cpp = v;
    }
    if let Some(v) = payload.annual_pension {
        cli.annual_pension = v;
    }
    if let Some(v) = payload.oas_start_age {
        cli.oas_start_age = v;
    }
    if let Some(v) = payload.cpp_start_age {
        cli.cpp_start_age = v;
    }
    if let Some(v) = payload.pension_start_age {
        cli.pension_start_age = v;
    }

    if let Some(v) = payload.annual_rrsp_contribution {
        cli.annual_rrsp_contribution = v;
    }
    if let Some(v) = payload.annual_tfsa_contribution {
        cli.annual_tfsa_contribution = v;
    }
    if let Some(v) = payload.annual_non_registered_contribution {
        cli.annual_non_registered_contribution = v;
    }

    if let Some(v) = payload.taxable_non_registered_withdrawal_percent {
        cli.taxable_non_registered_withdrawal_percent = v;
    }
    if let Some(v) = payload.apply_oas_clawback {
        cli.apply_oas_clawback = v;
    }
    if let Some(v) = payload.apply_minimum_rrif_withdrawals {
        cli.apply_minimum_rrif_withdrawals = v;
    }
    if let Some(v) = payload.apply_pension_income_tax_credit {
        cli.apply_pension_income_tax_credit = v;
    }

    if let Some(v) = payload.withdrawal_strategy {
        cli.withdrawal_strategy = v;
    }

    let strategy = Strategy::from_id(&cli.withdrawal_strategy).map_err(|e| e.to_string())?;
    let inputs = build_inputs(cli)?;
    Ok(ApiRequest { inputs, strategy })
}

fn default_cli_for_api() -> Cli {
    Cli {
        current_age: 55,
        retirement_age: 65,
        life_expectancy: 95,
        rrif_start: 0.0,
        rrsp_start: 400_000.0,
        tfsa_start: 100_000.0,
        non_registered_start: 150_000.0,
        appreciating_start: 0.0,
        target_retirement_income: 60_000.0,
        annual_return_rate: 5.0,
        inflation_rate: 2.0,
        annual_oas: 8_500.0,
        annual_cpp: 12_000.0,
        annual_pension: 0.0,
        oas_start_age: 65,
        cpp_start_age: 65,
        pension_start_age: 65,
        annual_rrsp_contribution: 0.0,
        annual_tfsa_contribution: 0.0,
        annual_non_registered_contribution: 0.0,
        taxable_non_registered_withdrawal_percent: 100.0,
        apply_oas_clawback: true,
        apply_minimum_rrif_withdrawals: true,
        apply_pension_income_tax_credit: false,
        withdrawal_strategy: "rrif_first".to_string(),
    }
}
