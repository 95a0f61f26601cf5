use walletd_log::log_error;
use walletd_primitives::{Address, Coin, CoinError};

use crate::db::WalletSnapshot;
use crate::error::WalletError;
use crate::modifier::AccountModifier;

/// Applies a pending delta to a confirmed balance.
///
/// A negative result means the pending pool spends more than the ledger holds
/// for the address, which cannot happen with consistent inputs. It is logged and
/// clamped to zero; exceeding the coin range is an error.
pub fn merge_balance(address: &Address, durable: Coin, delta: i128) -> Result<Coin, WalletError> {
    match durable.apply_delta(delta) {
        Ok(balance) => Ok(balance),
        Err(CoinError::Negative(value)) => {
            log_error!(
                "negative effective balance {} for {} (confirmed {}, pending {}); clamping to zero",
                value,
                address,
                durable,
                delta
            );
            Ok(Coin::ZERO)
        }
        Err(CoinError::Overflow) => Err(WalletError::Overflow),
    }
}

/// Effective balance of `address`: confirmed UTXO total plus the modifier's pending delta.
pub fn get_balance_with_mod(
    snapshot: &WalletSnapshot,
    modifier: &AccountModifier,
    address: &Address,
) -> Result<Coin, WalletError> {
    let balances = snapshot.wallet_balances_and_utxo()?;
    let durable = balances.get(address).copied().unwrap_or(Coin::ZERO);
    merge_balance(address, durable, modifier.utxo_delta(address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use walletd_primitives::MAX_COIN;

    #[test]
    fn merge_clamps_negative_and_rejects_overflow() {
        let address = Address::new(0x1c, [1u8; 20]);
        let ten = Coin::new(10).expect("coin");
        assert_eq!(merge_balance(&address, ten, -3).expect("merge").value(), 7);
        assert_eq!(merge_balance(&address, ten, -30).expect("merge"), Coin::ZERO);
        assert!(matches!(
            merge_balance(&address, ten, i128::from(MAX_COIN)),
            Err(WalletError::Overflow)
        ));
    }
}
