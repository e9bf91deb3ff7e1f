use super::solver::{self, SolvedWithdrawal};
use super::strategy::{self, AccountBalances, WithdrawalSplit, YearContext};
use super::tax;
use super::types::{Inputs, Projection, ProjectionError, Strategy, YearRecord};

/// Run a full projection: pre-retirement accumulation followed by the
/// year-by-year retirement drawdown under the given strategy.
pub fn project(inputs: &Inputs, strategy: Strategy) -> Result<Projection, ProjectionError> {
    validate(inputs)?;

    let retirement_start_age = inputs.current_age.max(inputs.retirement_age);
    let years_to_retirement = retirement_start_age - inputs.current_age;
    let growth = 1.0 + inputs.return_rate;
    let drift = 1.0 + inputs.inflation_rate;

    let mut rrif = inputs.rrif_start;
    let mut rrsp = inputs.rrsp_start;
    let mut tfsa = inputs.tfsa_start;
    let mut non_registered = inputs.non_registered_start;
    let mut appreciating = inputs.appreciating_start;

    for _ in 0..years_to_retirement {
        rrif *= growth;
        rrsp = rrsp * growth + inputs.rrsp_contribution;
        tfsa = tfsa * growth + inputs.tfsa_contribution;
        non_registered = non_registered * growth + inputs.non_registered_contribution;
        appreciating *= drift;
    }

    // The RRSP converts to a RRIF at retirement start.
    rrif += rrsp;
    let balance_at_retirement = rrif + tfsa + non_registered;

    let horizon = inputs.life_expectancy - retirement_start_age + 1;
    let mut years: Vec<YearRecord> = Vec::with_capacity(horizon as usize);
    let mut depleted_age: Option<u32> = None;
    let mut previous_taxable_income: Option<f64> = None;

    for offset in 0..horizon {
        let age = retirement_start_age + offset;
        let factor = tax::indexing_factor(inputs.inflation_rate, offset);
        let post_tax_target = inputs.target_income_post_tax * factor;

        let oas_income = if age >= inputs.oas_start_age {
            inputs.oas_annual * factor
        } else {
            0.0
        };
        let cpp_income = if age >= inputs.cpp_start_age {
            inputs.cpp_annual * factor
        } else {
            0.0
        };
        let pension_income = if age >= inputs.pension_start_age {
            inputs.pension_annual * factor
        } else {
            0.0
        };
        let government_income = oas_income + cpp_income + pension_income;

        rrif *= growth;
        tfsa *= growth;
        non_registered *= growth;
        appreciating *= drift;

        let minimum_deferred = if inputs.apply_rrif_minimum {
            (rrif * tax::minimum_withdrawal_fraction(age)).min(rrif).max(0.0)
        } else {
            0.0
        };

        let balances = AccountBalances { rrif, tfsa, non_registered };
        let ctx = YearContext {
            inputs,
            age,
            year_offset: offset,
            government_income,
            pension_income,
            oas_income,
            minimum_deferred,
            previous_taxable_income,
        };

        let solved = if balances.total() <= 0.0 {
            // Nothing left to draw from; benefits are still paid and taxed.
            let split = WithdrawalSplit { rrif: 0.0, tfsa: 0.0, non_registered: 0.0 };
            SolvedWithdrawal {
                split,
                outcome: strategy::evaluate_withdrawal(&ctx, &split),
            }
        } else {
            solver::solve_withdrawal(strategy, &ctx, &balances, post_tax_target)
        };

        rrif = (rrif - solved.split.rrif).max(0.0);
        tfsa = (tfsa - solved.split.tfsa).max(0.0);
        non_registered = (non_registered - solved.split.non_registered).max(0.0);

        let mut liquid = rrif + tfsa + non_registered;
        if liquid <= 0.0 && depleted_age.is_none() {
            depleted_age = Some(age);
        }
        if depleted_age.is_some() {
            rrif = 0.0;
            tfsa = 0.0;
            non_registered = 0.0;
            liquid = 0.0;
        }

        let outcome = solved.outcome;
        let portfolio_withdrawal = solved.split.total();
        let gross_for_rate = (government_income + portfolio_withdrawal).max(0.0);
        let average_tax_rate = if gross_for_rate > 0.0 {
            outcome.total_tax / gross_for_rate * 100.0
        } else {
            0.0
        };

        years.push(YearRecord {
            age,
            total_balance: liquid + appreciating,
            rrif_balance: rrif,
            tfsa_balance: tfsa,
            non_registered_balance: non_registered,
            appreciating_balance: appreciating,
            portfolio_withdrawal,
            rrif_withdrawal: solved.split.rrif,
            tfsa_withdrawal: solved.split.tfsa,
            non_registered_withdrawal: solved.split.non_registered,
            gross_income_target: post_tax_target + outcome.total_tax,
            government_income,
            net_income: outcome.net_income,
            income_tax: outcome.income_tax,
            capital_gains_tax: outcome.capital_gains_tax,
            oas_clawback: outcome.oas_clawback,
            total_tax: outcome.total_tax,
            average_tax_rate,
            marginal_tax_rate: tax::marginal_rate(
                outcome.taxable_income,
                inputs.inflation_rate,
                offset,
            ) * 100.0,
            post_tax_income_target: post_tax_target,
        });

        previous_taxable_income = Some(outcome.taxable_income);
    }

    Ok(Projection {
        years_to_retirement,
        retirement_start_age,
        balance_at_retirement,
        depleted_age,
        years,
    })
}

fn validate(inputs: &Inputs) -> Result<(), ProjectionError> {
    if inputs.current_age == 0 {
        return Err(ProjectionError::NonPositiveCurrentAge);
    }
    let retirement_start_age = inputs.current_age.max(inputs.retirement_age);
    if inputs.life_expectancy < retirement_start_age {
        return Err(ProjectionError::LifeExpectancyBeforeRetirement);
    }
    Ok(())
}
