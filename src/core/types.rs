use serde::Serialize;

/// Withdrawal strategy: how a year's total withdrawal is split across the
/// RRIF, TFSA, and non-registered accounts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Strategy {
    /// Legacy default: fill the RRIF, split the remainder evenly between
    /// TFSA and non-registered.
    RrifFirst,
    /// Sequential: RRIF, then non-registered, then TFSA.
    TfsaLast,
    /// Non-registered first, then an even split over remaining RRIF
    /// capacity and TFSA.
    NonRegisteredFirst,
    /// Draw the RRIF up to an inflation-indexed taxable-income ceiling,
    /// split the remainder evenly between TFSA and non-registered.
    BracketFill,
    /// Bracket-fill with the prior year's realized taxable income as a
    /// floor on the ceiling.
    TaxSmoothing,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::RrifFirst,
        Strategy::TfsaLast,
        Strategy::NonRegisteredFirst,
        Strategy::BracketFill,
        Strategy::TaxSmoothing,
    ];

    pub fn from_id(id: &str) -> Result<Self, ProjectionError> {
        match id {
            "rrif_first" => Ok(Strategy::RrifFirst),
            "tfsa_last" => Ok(Strategy::TfsaLast),
            "non_registered_first" => Ok(Strategy::NonRegisteredFirst),
            "bracket_fill" => Ok(Strategy::BracketFill),
            "tax_smoothing" => Ok(Strategy::TaxSmoothing),
            other => Err(ProjectionError::UnknownStrategy(other.to_string())),
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            Strategy::RrifFirst => "rrif_first",
            Strategy::TfsaLast => "tfsa_last",
            Strategy::NonRegisteredFirst => "non_registered_first",
            Strategy::BracketFill => "bracket_fill",
            Strategy::TaxSmoothing => "tax_smoothing",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Strategy::RrifFirst => "RRIF-first",
            Strategy::TfsaLast => "TFSA-last",
            Strategy::NonRegisteredFirst => "Non-registered-first",
            Strategy::BracketFill => "Bracket-fill",
            Strategy::TaxSmoothing => "Tax-smoothing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
    #[error("current age must be positive")]
    NonPositiveCurrentAge,
    #[error("life expectancy must be at or above the retirement start age")]
    LifeExpectancyBeforeRetirement,
    #[error("unsupported strategy: {0}")]
    UnknownStrategy(String),
}

/// Validated projection inputs. Monetary amounts are nominal dollars,
/// rates are fractions (0.05 = 5%); the adapters convert from percent.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub current_age: u32,
    pub retirement_age: u32,
    pub life_expectancy: u32,

    pub rrif_start: f64,
    pub rrsp_start: f64,
    pub tfsa_start: f64,
    pub non_registered_start: f64,
    pub appreciating_start: f64,

    /// Desired annual retirement income in today's post-tax dollars.
    pub target_income_post_tax: f64,
    pub return_rate: f64,
    pub inflation_rate: f64,

    pub oas_annual: f64,
    pub cpp_annual: f64,
    pub pension_annual: f64,
    pub oas_start_age: u32,
    pub cpp_start_age: u32,
    pub pension_start_age: u32,

    pub rrsp_contribution: f64,
    pub tfsa_contribution: f64,
    pub non_registered_contribution: f64,

    /// Fraction of non-registered withdrawals subject to capital-gains
    /// treatment.
    pub taxable_share: f64,

    pub apply_oas_clawback: bool,
    pub apply_rrif_minimum: bool,
    pub apply_pension_credit: bool,
}

/// One simulated retirement year.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRecord {
    pub age: u32,
    pub total_balance: f64,
    pub rrif_balance: f64,
    pub tfsa_balance: f64,
    pub non_registered_balance: f64,
    pub appreciating_balance: f64,
    pub portfolio_withdrawal: f64,
    pub rrif_withdrawal: f64,
    pub tfsa_withdrawal: f64,
    pub non_registered_withdrawal: f64,
    pub gross_income_target: f64,
    pub government_income: f64,
    pub net_income: f64,
    pub income_tax: f64,
    pub capital_gains_tax: f64,
    pub oas_clawback: f64,
    pub total_tax: f64,
    pub average_tax_rate: f64,
    pub marginal_tax_rate: f64,
    pub post_tax_income_target: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub years_to_retirement: u32,
    pub retirement_start_age: u32,
    pub balance_at_retirement: f64,
    pub depleted_age: Option<u32>,
    pub years: Vec<YearRecord>,
}
