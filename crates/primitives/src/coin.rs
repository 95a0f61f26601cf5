//! Ledger value type. Every arithmetic path is checked against `MAX_COIN`.

use std::fmt;

/// Largest representable amount in the smallest unit.
pub const MAX_COIN: u64 = 45_000_000_000_000_000;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Coin(u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CoinError {
    Overflow,
    Negative(i128),
}

impl fmt::Display for CoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinError::Overflow => write!(f, "coin value exceeds {MAX_COIN}"),
            CoinError::Negative(value) => write!(f, "coin value {value} is negative"),
        }
    }
}

impl std::error::Error for CoinError {}

impl Coin {
    pub const ZERO: Coin = Coin(0);

    pub fn new(value: u64) -> Result<Self, CoinError> {
        if value > MAX_COIN {
            return Err(CoinError::Overflow);
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Coin) -> Result<Coin, CoinError> {
        Self::from_wide(self.0 as i128 + other.0 as i128)
    }

    pub fn checked_sub(self, other: Coin) -> Result<Coin, CoinError> {
        Self::from_wide(self.0 as i128 - other.0 as i128)
    }

    /// Applies a signed delta, failing rather than wrapping outside `0..=MAX_COIN`.
    pub fn apply_delta(self, delta: i128) -> Result<Coin, CoinError> {
        let wide = (self.0 as i128)
            .checked_add(delta)
            .ok_or(CoinError::Overflow)?;
        Self::from_wide(wide)
    }

    fn from_wide(value: i128) -> Result<Coin, CoinError> {
        if value < 0 {
            return Err(CoinError::Negative(value));
        }
        if value > MAX_COIN as i128 {
            return Err(CoinError::Overflow);
        }
        Ok(Coin(value as u64))
    }

    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn from_le_slice(bytes: &[u8]) -> Option<Coin> {
        let raw: [u8; 8] = bytes.try_into().ok()?;
        Coin::new(u64::from_le_bytes(raw)).ok()
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sums through a wide accumulator so intermediate totals never wrap.
pub fn sum_coins<I>(coins: I) -> Result<Coin, CoinError>
where
    I: IntoIterator<Item = Coin>,
{
    let mut total: u128 = 0;
    for coin in coins {
        total += coin.0 as u128;
        if total > MAX_COIN as u128 {
            return Err(CoinError::Overflow);
        }
    }
    Ok(Coin(total as u64))
}
