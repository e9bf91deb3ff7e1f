use super::strategy::{
    self, AccountBalances, WithdrawalOutcome, WithdrawalSplit, YearContext,
};
use super::types::Strategy;

const BISECTION_ITERATIONS: u32 = 50;

/// A year's solved withdrawal: the per-account split and its tax outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolvedWithdrawal {
    pub split: WithdrawalSplit,
    pub outcome: WithdrawalOutcome,
}

/// Find the smallest total withdrawal whose net income reaches
/// `post_tax_target`, or exhaust the portfolio when the target is out of
/// reach. The mandatory deferred minimum is the lower bound of the search;
/// the bisection never probes below it. Relies on net income being
/// non-decreasing in the total withdrawal, which holds because the tax
/// schedule is progressive with all rates below 100%.
pub fn solve_withdrawal(
    strategy: Strategy,
    ctx: &YearContext<'_>,
    balances: &AccountBalances,
    post_tax_target: f64,
) -> SolvedWithdrawal {
    let available = balances.total();
    let floor = ctx.minimum_deferred.min(available);

    let evaluate = |total: f64| {
        let split = strategy::allocate(strategy, total, ctx, balances);
        let outcome = strategy::evaluate_withdrawal(ctx, &split);
        SolvedWithdrawal { split, outcome }
    };

    let at_max = evaluate(available);
    if at_max.outcome.net_income < post_tax_target {
        // Even draining everything falls short; accept the shortfall.
        return at_max;
    }

    let mut low = floor;
    let mut high = available;
    for _ in 0..BISECTION_ITERATIONS {
        let mid = (low + high) * 0.5;
        if evaluate(mid).outcome.net_income >= post_tax_target {
            high = mid;
        } else {
            low = mid;
        }
    }
    evaluate(high)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Inputs;
    use proptest::prelude::{prop_assert, proptest};

    fn sample_inputs() -> Inputs {
        Inputs {
            current_age: 60,
            retirement_age: 65,
            life_expectancy: 95,
            rrif_start: 400_000.0,
            rrsp_start: 0.0,
            tfsa_start: 150_000.0,
            non_registered_start: 200_000.0,
            appreciating_start: 0.0,
            target_income_post_tax: 60_000.0,
            return_rate: 0.05,
            inflation_rate: 0.02,
            oas_annual: 8_000.0,
            cpp_annual: 12_000.0,
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
            apply_pension_credit: false,
        }
    }

    fn sample_context(inputs: &Inputs) -> YearContext<'_> {
        YearContext {
            inputs,
            age: 72,
            year_offset: 7,
            government_income: 20_000.0,
            pension_income: 0.0,
            oas_income: 8_000.0,
            minimum_deferred: 5_000.0,
            previous_taxable_income: None,
        }
    }

    fn sample_balances() -> AccountBalances {
        AccountBalances {
            rrif: 100_000.0,
            tfsa: 50_000.0,
            non_registered: 80_000.0,
        }
    }

    #[test]
    fn reachable_target_is_met_with_minimal_withdrawal() {
        let inputs = sample_inputs();
        let ctx = sample_context(&inputs);
        let balances = sample_balances();

        let solved = solve_withdrawal(Strategy::RrifFirst, &ctx, &balances, 55_000.0);
        assert!(solved.outcome.net_income >= 55_000.0);
        // A dollar less should miss the target.
        let slightly_less = strategy::evaluate_withdrawal(
            &ctx,
            &strategy::allocate(Strategy::RrifFirst, solved.split.total() - 1.0, &ctx, &balances),
        );
        assert!(slightly_less.net_income < 55_000.0);
    }

    #[test]
    fn unreachable_target_drains_the_portfolio() {
        let inputs = sample_inputs();
        let ctx = sample_context(&inputs);
        let balances = AccountBalances {
            rrif: 10_000.0,
            tfsa: 5_000.0,
            non_registered: 2_000.0,
        };

        let solved = solve_withdrawal(Strategy::RrifFirst, &ctx, &balances, 200_000.0);
        assert!((solved.split.total() - balances.total()).abs() < 1e-6);
        assert!(solved.outcome.net_income < 200_000.0);
    }

    #[test]
    fn solution_never_dips_below_the_mandatory_minimum() {
        let inputs = sample_inputs();
        let mut ctx = sample_context(&inputs);
        ctx.minimum_deferred = 40_000.0;
        let balances = sample_balances();

        // Target so small the minimum alone overshoots it.
        let solved = solve_withdrawal(Strategy::RrifFirst, &ctx, &balances, 1_000.0);
        assert!(solved.split.total() >= 40_000.0 - 1e-6);
        assert!(solved.split.rrif >= 40_000.0 - 1e-6);
    }

    #[test]
    fn zero_target_with_no_minimum_withdraws_nothing() {
        let inputs = sample_inputs();
        let mut ctx = sample_context(&inputs);
        ctx.minimum_deferred = 0.0;
        let balances = sample_balances();

        let solved = solve_withdrawal(Strategy::RrifFirst, &ctx, &balances, 0.0);
        assert!(solved.split.total() < 1e-6);
    }

    proptest! {
        #[test]
        fn prop_higher_targets_never_shrink_the_withdrawal(
            strategy_ix in 0usize..5,
            target_k in 0u32..120,
            bump_k in 0u32..80
        ) {
            let inputs = sample_inputs();
            let ctx = sample_context(&inputs);
            let balances = sample_balances();
            let strategy = Strategy::ALL[strategy_ix];

            let lower = solve_withdrawal(strategy, &ctx, &balances, (target_k as f64) * 1_000.0);
            let higher = solve_withdrawal(
                strategy,
                &ctx,
                &balances,
                ((target_k + bump_k) as f64) * 1_000.0,
            );
            prop_assert!(higher.split.total() + 1e-6 >= lower.split.total());
        }

        #[test]
        fn prop_solved_net_reaches_reachable_targets(
            strategy_ix in 0usize..5,
            target_k in 1u32..60
        ) {
            let inputs = sample_inputs();
            let ctx = sample_context(&inputs);
            let balances = sample_balances();
            let target = (target_k as f64) * 1_000.0;

            let solved = solve_withdrawal(Strategy::ALL[strategy_ix], &ctx, &balances, target);
            prop_assert!(solved.outcome.net_income >= target - 1e-6);
        }
    }
}
