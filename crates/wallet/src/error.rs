use std::fmt;

use walletd_primitives::encoding::DecodeError;
use walletd_primitives::CoinError;
use walletd_storage::StoreError;

use crate::types::{AccountId, WalletId};

#[derive(Debug)]
pub enum WalletError {
    NoSuchWallet(WalletId),
    NoSuchAccount(AccountId),
    DuplicateWallet(WalletId),
    InvalidPassphrase,
    KeyNotFound(WalletId),
    Decode(DecodeError),
    Overflow,
    IndexExhausted,
    Store(StoreError),
    Io(std::io::Error),
    InvalidData(&'static str),
    Config(String),
}

impl WalletError {
    /// Errors caused by the request itself rather than by local state or I/O.
    pub fn is_request_rejection(&self) -> bool {
        matches!(
            self,
            WalletError::NoSuchWallet(_)
                | WalletError::NoSuchAccount(_)
                | WalletError::DuplicateWallet(_)
                | WalletError::InvalidPassphrase
                | WalletError::KeyNotFound(_)
        )
    }
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletError::NoSuchWallet(id) => write!(f, "no wallet with id {id} found"),
            WalletError::NoSuchAccount(id) => write!(f, "no account with id {id} found"),
            WalletError::DuplicateWallet(id) => {
                write!(f, "wallet with id {id} already exists (duplicate)")
            }
            WalletError::InvalidPassphrase => write!(f, "invalid passphrase given"),
            WalletError::KeyNotFound(id) => write!(f, "no secret key for wallet {id}"),
            WalletError::Decode(err) => write!(f, "failed to decode stored value: {err}"),
            WalletError::Overflow => write!(f, "balance exceeds maximum coin value"),
            WalletError::IndexExhausted => write!(f, "could not generate an unused index"),
            WalletError::Store(err) => write!(f, "{err}"),
            WalletError::Io(err) => write!(f, "{err}"),
            WalletError::InvalidData(msg) => write!(f, "{msg}"),
            WalletError::Config(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for WalletError {}

impl From<StoreError> for WalletError {
    fn from(err: StoreError) -> Self {
        WalletError::Store(err)
    }
}

impl From<DecodeError> for WalletError {
    fn from(err: DecodeError) -> Self {
        WalletError::Decode(err)
    }
}

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        WalletError::Io(err)
    }
}

impl From<CoinError> for WalletError {
    fn from(err: CoinError) -> Self {
        match err {
            CoinError::Overflow => WalletError::Overflow,
            CoinError::Negative(_) => WalletError::InvalidData("negative coin value"),
        }
    }
}
