//! Read interface over not-yet-confirmed transactions.

use std::sync::{Mutex, MutexGuard};

use walletd_primitives::{Address, Coin, OutPoint, TxId};

use crate::types::{AccountId, WalletId};

/// Derivation attribute carried by a wallet-generated address.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct AddressOwner {
    pub wallet_id: WalletId,
    pub account_index: u32,
    pub address_index: u32,
}

impl AddressOwner {
    pub fn account_id(&self) -> AccountId {
        AccountId::new(self.wallet_id, self.account_index)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingInput {
    pub outpoint: OutPoint,
    pub address: Address,
    pub value: Coin,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingOutput {
    pub address: Address,
    pub value: Coin,
    pub owner: Option<AddressOwner>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingTx {
    pub txid: TxId,
    pub inputs: Vec<PendingInput>,
    pub outputs: Vec<PendingOutput>,
}

/// Source of pending transactions. `version` changes whenever the set does.
pub trait PendingTxSource: Send + Sync {
    fn version(&self) -> u64;

    /// Pending transactions in arrival order.
    fn pending_txs(&self) -> Vec<PendingTx>;
}

#[derive(Default)]
struct PoolState {
    version: u64,
    txs: Vec<PendingTx>,
}

/// In-process pending pool keyed by txid, kept in arrival order.
#[derive(Default)]
pub struct LocalPool {
    state: Mutex<PoolState>,
}

impl LocalPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds `tx`, replacing any pending entry with the same txid in place.
    pub fn add(&self, tx: PendingTx) {
        let mut state = self.state();
        match state.txs.iter_mut().find(|existing| existing.txid == tx.txid) {
            Some(existing) => *existing = tx,
            None => state.txs.push(tx),
        }
        state.version = state.version.wrapping_add(1);
    }

    pub fn remove(&self, txid: &TxId) -> Option<PendingTx> {
        let mut state = self.state();
        let index = state.txs.iter().position(|tx| &tx.txid == txid)?;
        let removed = state.txs.remove(index);
        state.version = state.version.wrapping_add(1);
        Some(removed)
    }

    pub fn clear(&self) {
        let mut state = self.state();
        if state.txs.is_empty() {
            return;
        }
        state.txs.clear();
        state.version = state.version.wrapping_add(1);
    }

    pub fn len(&self) -> usize {
        self.state().txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PendingTxSource for LocalPool {
    fn version(&self) -> u64 {
        self.state().version
    }

    fn pending_txs(&self) -> Vec<PendingTx> {
        self.state().txs.clone()
    }
}
