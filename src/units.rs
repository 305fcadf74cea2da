//! Gwei/wei conversions. Channel values live on-chain in wei
//! (`ethereum_types::U256`); packet amounts and account balances are
//! tracked in gwei (`i64`, signed, since receivable/payable balances are
//! signed per §3). Conversions always round down when crediting a peer, per
//! §6's unit convention.

use ethereum_types::U256;

pub const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Converts a non-negative gwei amount into wei. Callers are expected to
/// guard against negative inputs (the budget in `createClaim` is already
/// clamped to be non-negative before this is called).
pub fn gwei_to_wei(gwei: i64) -> U256 {
    let gwei = gwei.max(0) as u64;
    U256::from(gwei) * U256::from(WEI_PER_GWEI)
}

/// Converts a wei amount down to whole gwei, rounding down (truncating).
pub fn wei_to_gwei_round_down(wei: U256) -> i64 {
    let gwei = wei / U256::from(WEI_PER_GWEI);
    // Channel values realistically never approach i64::MAX gwei; saturate
    // rather than panic if they somehow did.
    if gwei > U256::from(i64::MAX as u64) {
        i64::MAX
    } else {
        gwei.as_u64() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip_exact() {
        assert_eq!(gwei_to_wei(5), U256::from(5_000_000_000u64));
        assert_eq!(wei_to_gwei_round_down(U256::from(5_000_000_000u64)), 5);
    }

    #[test]
    fn rounds_down_on_remainder() {
        let wei = U256::from(5_999_999_999u64);
        assert_eq!(wei_to_gwei_round_down(wei), 5);
    }

    #[test]
    fn negative_gwei_clamped_to_zero_wei() {
        assert_eq!(gwei_to_wei(-100), U256::zero());
    }

    proptest! {
        /// §8: the wei -> gwei conversion never rounds up — converting back
        /// to wei must never exceed the original amount.
        #[test]
        fn wei_to_gwei_round_down_never_overstates(wei_value in any::<u64>()) {
            let wei = U256::from(wei_value);
            let gwei = wei_to_gwei_round_down(wei);
            prop_assert!(gwei_to_wei(gwei) <= wei);
        }

        /// Exact multiples of `WEI_PER_GWEI` round-trip losslessly.
        #[test]
        fn gwei_to_wei_round_trip_exact(gwei_value in 0i64..1_000_000_000i64) {
            let wei = gwei_to_wei(gwei_value);
            prop_assert_eq!(wei_to_gwei_round_down(wei), gwei_value);
        }
    }
}
