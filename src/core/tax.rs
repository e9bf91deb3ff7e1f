use serde::Serialize;

use super::types::Inputs;

/// Combined Ontario + federal marginal brackets for 2025, as
/// (upper bound, rate) pairs. The last bound is unbounded.
pub const COMBINED_TAX_BRACKETS: [(f64, f64); 11] = [
    (16_258.0, 0.0),
    (52_886.0, 0.2005),
    (57_375.0, 0.2415),
    (105_775.0, 0.2965),
    (109_727.0, 0.3148),
    (114_750.0, 0.3389),
    (150_000.0, 0.3791),
    (177_882.0, 0.4341),
    (220_000.0, 0.4497),
    (253_414.0, 0.4829),
    (f64::INFINITY, 0.5353),
];

pub const CAPITAL_GAINS_INCLUSION_RATE: f64 = 0.50;

/// OAS recovery tax: 15% of net income above the year-0 threshold.
const OAS_RECOVERY_THRESHOLD: f64 = 93_454.0;
const OAS_RECOVERY_RATE: f64 = 0.15;

/// Pension income tax credit: combined federal + Ontario rate on up to
/// $2,000 of eligible pension income.
const PENSION_CREDIT_ELIGIBLE_CAP: f64 = 2_000.0;
const PENSION_CREDIT_RATE: f64 = 0.2005;
const PENSION_CREDIT_RRIF_AGE: u32 = 65;

/// Prescribed RRIF minimum withdrawal factors for ages 71 through 94.
/// Below 71 the factor is 1/(90-age); from 95 on it is 20%.
const RRIF_MINIMUM_FACTORS: [f64; 24] = [
    0.0528, 0.0540, 0.0553, 0.0567, 0.0582, 0.0598, 0.0617, 0.0636, 0.0658, 0.0682, 0.0708,
    0.0738, 0.0771, 0.0808, 0.0851, 0.0899, 0.0955, 0.1021, 0.1099, 0.1192, 0.1306, 0.1449,
    0.1634, 0.1879,
];
const RRIF_MINIMUM_FACTOR_CAP: f64 = 0.20;

/// Bracket bounds are indexed forward from retirement start by this factor.
pub(crate) fn indexing_factor(inflation_rate: f64, year_offset: u32) -> f64 {
    (1.0 + inflation_rate).powi(year_offset as i32)
}

/// Progressive tax owed on `taxable_income`, with every finite bracket
/// bound scaled by the year's indexing factor. Continuous and
/// non-decreasing in income; the withdrawal solver's bisection depends
/// on both.
pub fn tax_owed(taxable_income: f64, inflation_rate: f64, year_offset: u32) -> f64 {
    let income = taxable_income.max(0.0);
    let factor = indexing_factor(inflation_rate, year_offset);

    let mut tax = 0.0;
    let mut lower = 0.0;
    for (upper, rate) in COMBINED_TAX_BRACKETS {
        if income <= lower {
            break;
        }
        let indexed_upper = if upper.is_finite() { upper * factor } else { upper };
        tax += (income.min(indexed_upper) - lower) * rate;
        lower = indexed_upper;
    }
    tax
}

/// Rate of the lowest bracket whose indexed upper bound covers `taxable_income`.
pub fn marginal_rate(taxable_income: f64, inflation_rate: f64, year_offset: u32) -> f64 {
    let income = taxable_income.max(0.0);
    let factor = indexing_factor(inflation_rate, year_offset);

    for (upper, rate) in COMBINED_TAX_BRACKETS {
        let indexed_upper = if upper.is_finite() { upper * factor } else { upper };
        if income <= indexed_upper {
            return rate;
        }
    }
    COMBINED_TAX_BRACKETS[COMBINED_TAX_BRACKETS.len() - 1].1
}

/// OAS recovery tax on `oas_received`, tested against `income_for_test`
/// (ordinary income plus taxable gains) and the inflation-indexed
/// recovery threshold. Never exceeds the benefit itself.
pub fn oas_clawback(
    inputs: &Inputs,
    income_for_test: f64,
    oas_received: f64,
    year_offset: u32,
) -> f64 {
    if !inputs.apply_oas_clawback || oas_received <= 0.0 {
        return 0.0;
    }
    let threshold = OAS_RECOVERY_THRESHOLD * indexing_factor(inputs.inflation_rate, year_offset);
    let excess = (income_for_test - threshold).max(0.0);
    (excess * OAS_RECOVERY_RATE).min(oas_received)
}

/// Pension income tax credit. RRIF withdrawals count as eligible pension
/// income from age 65. Applied as a direct reduction to computed tax,
/// which is floored at zero by the caller.
pub fn pension_credit(inputs: &Inputs, age: u32, pension_income: f64, rrif_withdrawal: f64) -> f64 {
    if !inputs.apply_pension_credit {
        return 0.0;
    }
    let mut eligible = pension_income.max(0.0);
    if age >= PENSION_CREDIT_RRIF_AGE {
        eligible += rrif_withdrawal.max(0.0);
    }
    eligible.min(PENSION_CREDIT_ELIGIBLE_CAP) * PENSION_CREDIT_RATE
}

/// Prescribed minimum withdrawal fraction of the RRIF balance at `age`.
pub fn minimum_withdrawal_fraction(age: u32) -> f64 {
    if age <= 70 {
        1.0 / (90 - age) as f64
    } else if age <= 94 {
        RRIF_MINIMUM_FACTORS[(age - 71) as usize]
    } else {
        RRIF_MINIMUM_FACTOR_CAP
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketRow {
    /// Upper bound of the bracket in year-0 dollars; `None` for the top
    /// (unbounded) bracket.
    pub up_to: Option<f64>,
    pub rate: f64,
}

/// The canonical bracket table in a display-friendly shape.
pub fn tax_brackets_reference() -> Vec<BracketRow> {
    COMBINED_TAX_BRACKETS
        .iter()
        .map(|&(upper, rate)| BracketRow {
            up_to: upper.is_finite().then_some(upper),
            rate,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn clawback_inputs() -> Inputs {
        Inputs {
            current_age: 65,
            retirement_age: 65,
            life_expectancy: 95,
            rrif_start: 0.0,
            rrsp_start: 0.0,
            tfsa_start: 0.0,
            non_registered_start: 0.0,
            appreciating_start: 0.0,
            target_income_post_tax: 0.0,
            return_rate: 0.0,
            inflation_rate: 0.0,
            oas_annual: 0.0,
            cpp_annual: 0.0,
            pension_annual: 0.0,
            oas_start_age: 65,
            cpp_start_age: 65,
            pension_start_age: 65,
            rrsp_contribution: 0.0,
            tfsa_contribution: 0.0,
            non_registered_contribution: 0.0,
            taxable_share: 1.0,
            apply_oas_clawback: true,
            apply_rrif_minimum: true,
            apply_pension_credit: true,
        }
    }

    #[test]
    fn zero_income_owes_zero_tax() {
        assert_approx(tax_owed(0.0, 0.02, 0), 0.0);
        assert_approx(tax_owed(-500.0, 0.02, 3), 0.0);
    }

    #[test]
    fn income_inside_zero_rate_bracket_owes_zero() {
        assert_approx(tax_owed(10_000.0, 0.0, 0), 0.0);
    }

    #[test]
    fn second_bracket_income_is_taxed_above_first_bound() {
        let income = 20_000.0;
        let expected = (income - 16_258.0) * 0.2005;
        assert_approx(tax_owed(income, 0.0, 0), expected);
    }

    #[test]
    fn tax_is_continuous_at_bracket_edges() {
        for (upper, _) in COMBINED_TAX_BRACKETS {
            if !upper.is_finite() {
                continue;
            }
            let below = tax_owed(upper - 1e-4, 0.0, 0);
            let above = tax_owed(upper + 1e-4, 0.0, 0);
            assert!(
                (above - below).abs() < 1e-3,
                "jump at bracket edge {upper}: {below} vs {above}"
            );
        }
    }

    #[test]
    fn indexing_scales_bracket_bounds() {
        // At 10% inflation and offset 1, the zero-rate bracket reaches
        // 16258 * 1.1, so income just below that stays untaxed.
        assert_approx(tax_owed(17_800.0, 0.10, 1), 0.0);
        assert!(tax_owed(17_800.0, 0.0, 1) > 0.0);
    }

    #[test]
    fn marginal_rate_matches_bracket_and_tops_out() {
        assert_approx(marginal_rate(10_000.0, 0.0, 0), 0.0);
        assert_approx(marginal_rate(30_000.0, 0.0, 0), 0.2005);
        assert_approx(marginal_rate(1_000_000.0, 0.0, 0), 0.5353);
    }

    #[test]
    fn minimum_fraction_follows_formula_then_table_then_cap() {
        assert_approx(minimum_withdrawal_fraction(65), 1.0 / 25.0);
        assert_approx(minimum_withdrawal_fraction(70), 0.05);
        assert_approx(minimum_withdrawal_fraction(71), 0.0528);
        assert_approx(minimum_withdrawal_fraction(94), 0.1879);
        assert_approx(minimum_withdrawal_fraction(95), 0.20);
        assert_approx(minimum_withdrawal_fraction(110), 0.20);
    }

    #[test]
    fn clawback_disabled_or_no_benefit_is_zero() {
        let mut inputs = clawback_inputs();
        assert_approx(oas_clawback(&inputs, 200_000.0, 0.0, 0), 0.0);
        inputs.apply_oas_clawback = false;
        assert_approx(oas_clawback(&inputs, 200_000.0, 8_000.0, 0), 0.0);
    }

    #[test]
    fn clawback_recovers_fifteen_percent_of_excess() {
        let inputs = clawback_inputs();
        let clawed = oas_clawback(&inputs, 103_454.0, 8_000.0, 0);
        assert_approx(clawed, 10_000.0 * 0.15);
    }

    #[test]
    fn clawback_threshold_is_indexed() {
        let mut inputs = clawback_inputs();
        inputs.inflation_rate = 0.10;
        // Threshold at offset 1 is 93454 * 1.1 = 102799.4, so income at
        // the unindexed excess point recovers less.
        let clawed = oas_clawback(&inputs, 103_454.0, 8_000.0, 1);
        assert_approx(clawed, (103_454.0 - 93_454.0 * 1.1) * 0.15);
    }

    #[test]
    fn pension_credit_caps_eligible_amount() {
        let inputs = clawback_inputs();
        assert_approx(pension_credit(&inputs, 66, 0.0, 50_000.0), 2_000.0 * 0.2005);
        assert_approx(pension_credit(&inputs, 66, 1_200.0, 0.0), 1_200.0 * 0.2005);
    }

    #[test]
    fn pension_credit_excludes_rrif_before_65() {
        let inputs = clawback_inputs();
        assert_approx(pension_credit(&inputs, 64, 0.0, 50_000.0), 0.0);
        assert_approx(pension_credit(&inputs, 64, 500.0, 50_000.0), 500.0 * 0.2005);
    }

    #[test]
    fn pension_credit_disabled_is_zero() {
        let mut inputs = clawback_inputs();
        inputs.apply_pension_credit = false;
        assert_approx(pension_credit(&inputs, 70, 2_000.0, 50_000.0), 0.0);
    }

    proptest! {
        #[test]
        fn prop_tax_is_monotone_in_income(
            lo in 0u32..400_000,
            delta in 0u32..200_000,
            inflation_bp in 0u32..800,
            offset in 0u32..40
        ) {
            let inflation = inflation_bp as f64 / 10_000.0;
            let low = tax_owed(lo as f64, inflation, offset);
            let high = tax_owed((lo + delta) as f64, inflation, offset);
            prop_assert!(high + 1e-9 >= low);
        }

        #[test]
        fn prop_tax_never_exceeds_income(
            income in 0u32..2_000_000,
            offset in 0u32..40
        ) {
            let tax = tax_owed(income as f64, 0.02, offset);
            prop_assert!(tax >= 0.0);
            prop_assert!(tax <= income as f64);
        }

        #[test]
        fn prop_clawback_never_exceeds_benefit(
            income in 0u32..500_000,
            benefit in 0u32..20_000,
            offset in 0u32..30
        ) {
            let inputs = clawback_inputs();
            let clawed = oas_clawback(&inputs, income as f64, benefit as f64, offset);
            prop_assert!(clawed >= 0.0);
            prop_assert!(clawed <= benefit as f64 + 1e-9);
        }
    }
}
