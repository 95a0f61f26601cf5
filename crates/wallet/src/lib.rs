//! Wallet, account and address management over a UTXO ledger.
//!
//! Durable state lives in a [`walletd_storage::KeyValueStore`]; pending pool
//! effects are layered on top per wallet through a rebuildable
//! [`modifier::AccountModifier`] when views are reconstructed.

pub mod balance;
pub mod config;
pub mod db;
pub mod error;
pub mod keystore;
mod logic;
pub mod modifier;
pub mod pool;
pub mod reconstruct;
pub mod service;
pub mod types;

pub use config::WalletConfig;
pub use db::{WalletDb, WalletSnapshot};
pub use error::WalletError;
pub use keystore::{EncryptedSecretKey, KdfConfig, KeyList, KeyStorage, RootSecret};
pub use modifier::{AccountModifier, ModifierCache};
pub use pool::{AddressOwner, LocalPool, PendingInput, PendingOutput, PendingTx, PendingTxSource};
pub use service::WalletService;
pub use types::{
    AccountId, AccountInit, AccountMeta, AccountView, AddressMeta, AddressView, Assurance,
    CustomAddressKind, TxHistoryMeta, UtxoEntry, WalletId, WalletMeta, WalletView,
};
