use super::tax;
use super::types::{Inputs, Strategy};

/// Base taxable-income ceiling for the bracket-fill strategies: the top of
/// the lowest nonzero bracket, in year-0 dollars.
const BRACKET_FILL_CEILING: f64 = 52_886.0;
const TAX_SMOOTHING_FLOOR_SHARE: f64 = 0.85;

/// Liquid balances available for withdrawal in a single year.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountBalances {
    pub rrif: f64,
    pub tfsa: f64,
    pub non_registered: f64,
}

impl AccountBalances {
    pub fn total(&self) -> f64 {
        self.rrif + self.tfsa + self.non_registered
    }
}

/// Per-account split of one year's total withdrawal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WithdrawalSplit {
    pub rrif: f64,
    pub tfsa: f64,
    pub non_registered: f64,
}

impl WithdrawalSplit {
    pub fn total(&self) -> f64 {
        self.rrif + self.tfsa + self.non_registered
    }
}

/// Taxes and net income implied by a withdrawal split in a given year.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WithdrawalOutcome {
    pub net_income: f64,
    pub income_tax: f64,
    pub capital_gains_tax: f64,
    pub oas_clawback: f64,
    pub total_tax: f64,
    /// Ordinary income plus included gains, threaded into the next year's
    /// tax-smoothing ceiling.
    pub taxable_income: f64,
}

/// Everything about the current simulation year the allocator and tax
/// evaluation need besides the split itself.
#[derive(Debug, Clone)]
pub struct YearContext<'a> {
    pub inputs: &'a Inputs,
    pub age: u32,
    /// Years since retirement start; drives bracket and threshold indexing.
    pub year_offset: u32,
    /// Planned (pre-clawback) government income for the year.
    pub government_income: f64,
    pub pension_income: f64,
    pub oas_income: f64,
    /// Mandatory minimum RRIF withdrawal, already capped at the balance.
    pub minimum_deferred: f64,
    /// Taxable income realized the previous year; `None` in the first
    /// retirement year.
    pub previous_taxable_income: Option<f64>,
}

/// Split `amount` half-and-half over two balances, redirecting whatever one
/// side cannot absorb to the other. Never allocates more than the balances
/// hold.
pub fn split_evenly(amount: f64, balance_a: f64, balance_b: f64) -> (f64, f64) {
    let half = amount / 2.0;
    let mut from_a = half.min(balance_a);
    let mut from_b = half.min(balance_b);
    let leftover = amount - from_a - from_b;
    let extra_a = leftover.max(0.0).min(balance_a - from_a);
    from_a += extra_a;
    from_b += (leftover - extra_a).max(0.0).min(balance_b - from_b);
    (from_a, from_b)
}

/// Allocate `total` across the accounts per the strategy. The caller
/// guarantees `minimum_deferred <= total <= balances.total()`; every variant
/// honors the minimum as a floor on the RRIF share.
pub fn allocate(
    strategy: Strategy,
    total: f64,
    ctx: &YearContext<'_>,
    balances: &AccountBalances,
) -> WithdrawalSplit {
    match strategy {
        Strategy::RrifFirst => {
            let rrif = total.min(balances.rrif);
            let (tfsa, non_registered) =
                split_evenly(total - rrif, balances.tfsa, balances.non_registered);
            WithdrawalSplit { rrif, tfsa, non_registered }
        }
        Strategy::TfsaLast => {
            let rrif = total.min(balances.rrif);
            let non_registered = (total - rrif).min(balances.non_registered);
            let tfsa = (total - rrif - non_registered).min(balances.tfsa);
            WithdrawalSplit { rrif, tfsa, non_registered }
        }
        Strategy::NonRegisteredFirst => {
            let rrif_floor = ctx.minimum_deferred.min(balances.rrif);
            let non_registered = (total - rrif_floor).min(balances.non_registered);
            let remainder = total - rrif_floor - non_registered;
            let (extra_rrif, tfsa) =
                split_evenly(remainder, balances.rrif - rrif_floor, balances.tfsa);
            WithdrawalSplit {
                rrif: rrif_floor + extra_rrif,
                tfsa,
                non_registered,
            }
        }
        Strategy::BracketFill | Strategy::TaxSmoothing => {
            let ceiling = taxable_income_ceiling(strategy, ctx);
            let headroom = (ceiling - ctx.government_income).max(0.0);
            let rrif = total
                .min(balances.rrif)
                .min(ctx.minimum_deferred.max(headroom));
            let (tfsa, non_registered) =
                split_evenly(total - rrif, balances.tfsa, balances.non_registered);
            WithdrawalSplit { rrif, tfsa, non_registered }
        }
    }
}

/// The inflation-indexed taxable-income ceiling the bracket-fill variants
/// draw the RRIF up to.
fn taxable_income_ceiling(strategy: Strategy, ctx: &YearContext<'_>) -> f64 {
    let base =
        BRACKET_FILL_CEILING * tax::indexing_factor(ctx.inputs.inflation_rate, ctx.year_offset);
    match (strategy, ctx.previous_taxable_income) {
        (Strategy::TaxSmoothing, Some(previous)) => {
            let carried = previous * (1.0 + ctx.inputs.inflation_rate);
            (base * TAX_SMOOTHING_FLOOR_SHARE).max(carried)
        }
        _ => base,
    }
}

/// Evaluate the taxes, clawback and net income of a withdrawal split.
/// Capital-gains tax is the marginal cost of stacking the included gains on
/// top of ordinary income, so the two components sum to the tax on the
/// combined amount.
pub fn evaluate_withdrawal(ctx: &YearContext<'_>, split: &WithdrawalSplit) -> WithdrawalOutcome {
    let inputs = ctx.inputs;
    let ordinary_income = ctx.government_income + split.rrif;
    let included_gains =
        split.non_registered * inputs.taxable_share * tax::CAPITAL_GAINS_INCLUSION_RATE;
    let taxable_income = ordinary_income + included_gains;

    let credit = tax::pension_credit(inputs, ctx.age, ctx.pension_income, split.rrif);
    let income_tax =
        (tax::tax_owed(ordinary_income, inputs.inflation_rate, ctx.year_offset) - credit).max(0.0);
    let tax_on_total =
        (tax::tax_owed(taxable_income, inputs.inflation_rate, ctx.year_offset) - credit).max(0.0);
    let capital_gains_tax = (tax_on_total - income_tax).max(0.0);

    let oas_clawback = tax::oas_clawback(inputs, taxable_income, ctx.oas_income, ctx.year_offset);

    let net_income =
        ctx.government_income - oas_clawback + split.total() - income_tax - capital_gains_tax;

    WithdrawalOutcome {
        net_income,
        income_tax,
        capital_gains_tax,
        oas_clawback,
        total_tax: income_tax + capital_gains_tax + oas_clawback,
        taxable_income,
    }
}
