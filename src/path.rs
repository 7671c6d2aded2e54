//! Swap path selection and slippage math (spec §4.7, §8 Properties 7-8).
//!
//! Generalized from the teacher's `MulticallQuoter` multi-venue quoting
//! (`price/multicall.rs`, parallel `Multicall3` aggregation across venues)
//! to sequential per-path `getAmountsOut` calls against a single PancakeSwap-
//! style router, since the BSC router ABI in scope here has no multicall
//! counterpart.

use ethers::types::{Address, U256};

use crate::builder::TxBuilder;
use crate::error::BuildError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathQuote {
    pub path: Vec<Address>,
    pub amount_out: U256,
}

/// Builds the standard candidate set: direct, two-hop via wrapped-native,
/// two-hop via USDT (when configured) - matching the auto-buy/auto-sell
/// input-family described in spec.md §4.7.
pub fn candidate_paths(
    token_in: Address,
    token_out: Address,
    wrapped_native: Address,
    usdt: Option<Address>,
) -> Vec<Vec<Address>> {
    let mut candidates = vec![vec![token_in, token_out]];

    if token_in != wrapped_native && token_out != wrapped_native {
        candidates.push(vec![token_in, wrapped_native, token_out]);
    }
    if let Some(usdt) = usdt {
        if token_in != usdt && token_out != usdt {
            candidates.push(vec![token_in, usdt, token_out]);
        }
    }

    candidates
}

/// Queries every candidate path and picks the one with maximum output.
/// Ties are broken by fewest hops, then lexical order of the path
/// addresses (spec §8 Property 7).
pub async fn select_best_path(
    builder: &TxBuilder,
    router: Address,
    amount_in: U256,
    candidates: &[Vec<Address>],
) -> Result<PathQuote, BuildError> {
    let mut best: Option<PathQuote> = None;

    for path in candidates {
        let amounts = match builder.get_amounts_out(router, amount_in, path).await {
            Ok(a) => a,
            Err(_) => continue,
        };
        let Some(&amount_out) = amounts.last() else {
            continue;
        };

        let candidate = PathQuote {
            path: path.clone(),
            amount_out,
        };

        best = Some(match best {
            None => candidate,
            Some(current) => pick_better(current, candidate),
        });
    }

    best.ok_or_else(|| BuildError::SimulationReverted("no viable path quoted".into()))
}

fn pick_better(a: PathQuote, b: PathQuote) -> PathQuote {
    if b.amount_out > a.amount_out {
        return b;
    }
    if b.amount_out < a.amount_out {
        return a;
    }
    if b.path.len() < a.path.len() {
        return b;
    }
    if b.path.len() > a.path.len() {
        return a;
    }
    if lexical_order(&b.path) < lexical_order(&a.path) {
        b
    } else {
        a
    }
}

fn lexical_order(path: &[Address]) -> Vec<String> {
    path.iter().map(|a| format!("{:?}", a)).collect()
}

/// `min_out = floor(expected_out * (100 - slippage) / 100)` (spec §8
/// Property 8). A swap with `expected_out == 0` must not be submitted -
/// the caller is expected to treat a zero `min_out` with zero `expected_out`
/// as `SimulationReverted`.
pub fn apply_slippage_floor(expected_out: U256, slippage_percent: u64) -> U256 {
    if expected_out.is_zero() {
        return U256::zero();
    }
    expected_out * U256::from(100u64.saturating_sub(slippage_percent)) / U256::from(100u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slippage_floor_matches_scenario_s4() {
        let expected_out = U256::from(250_000_000_000_000_000u64);
        let min_out = apply_slippage_floor(expected_out, 5);
        assert_eq!(min_out, U256::from(237_500_000_000_000_000u64));
    }

    #[test]
    fn slippage_floor_zero_expected_out_is_zero() {
        assert_eq!(apply_slippage_floor(U256::zero(), 5), U256::zero());
    }

    #[test]
    fn candidate_paths_includes_direct_and_hops() {
        let token_in: Address = "0x0000000000000000000000000000000000000a".parse().unwrap();
        let token_out: Address = "0x0000000000000000000000000000000000000b".parse().unwrap();
        let wrapped: Address = "0x0000000000000000000000000000000000000c".parse().unwrap();
        let usdt: Address = "0x0000000000000000000000000000000000000d".parse().unwrap();

        let candidates = candidate_paths(token_in, token_out, wrapped, Some(usdt));
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0], vec![token_in, token_out]);
    }

    #[test]
    fn pick_better_prefers_max_output() {
        let a = PathQuote {
            path: vec![Address::zero()],
            amount_out: U256::from(100u64),
        };
        let b = PathQuote {
            path: vec![Address::zero(), Address::zero()],
            amount_out: U256::from(200u64),
        };
        let winner = pick_better(a, b.clone());
        assert_eq!(winner.amount_out, b.amount_out);
    }

    #[test]
    fn pick_better_breaks_ties_by_fewest_hops() {
        let short = PathQuote {
            path: vec![Address::zero()],
            amount_out: U256::from(100u64),
        };
        let long = PathQuote {
            path: vec![Address::zero(), Address::zero()],
            amount_out: U256::from(100u64),
        };
        let winner = pick_better(long, short.clone());
        assert_eq!(winner.path.len(), short.path.len());
    }
}
