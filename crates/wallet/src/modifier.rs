//! Per-wallet pending-state overlay derived from the pending pool.
//!
//! An [`AccountModifier`] is never persisted. It is a pure function of the
//! wallet's durable address set and the pool contents, so the cache may drop
//! and rebuild an entry at any time.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use walletd_log::log_debug;
use walletd_primitives::Address;

use crate::db::WalletSnapshot;
use crate::error::WalletError;
use crate::pool::{PendingTx, PendingTxSource};
use crate::types::{AccountId, AddressKey, AddressMeta, WalletId};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccountModifier {
    insertions: HashMap<AddressKey, (u64, AddressMeta)>,
    deletions: HashSet<AddressKey>,
    used: HashSet<AddressKey>,
    change: HashSet<AddressKey>,
    utxo_diff: BTreeMap<Address, i128>,
    next_seq: u64,
}

impl AccountModifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pending address. Re-inserting keeps the original discovery position.
    pub fn insert_address(&mut self, meta: AddressMeta) -> bool {
        let key = meta.key();
        if self.insertions.contains_key(&key) {
            return false;
        }
        self.insertions.insert(key, (self.next_seq, meta));
        self.next_seq += 1;
        true
    }

    pub fn delete_address(&mut self, key: AddressKey) {
        self.insertions.remove(&key);
        self.deletions.insert(key);
    }

    pub fn mark_used(&mut self, key: AddressKey) {
        self.used.insert(key);
    }

    pub fn mark_change(&mut self, key: AddressKey) {
        self.change.insert(key);
    }

    pub fn add_utxo_delta(&mut self, address: Address, delta: i128) {
        *self.utxo_diff.entry(address).or_insert(0) += delta;
    }

    /// Pending addresses in discovery order.
    pub fn sorted_insertions(&self) -> Vec<AddressMeta> {
        let mut rows: Vec<&(u64, AddressMeta)> = self.insertions.values().collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, meta)| *meta).collect()
    }

    pub fn account_insertions(&self, account: &AccountId) -> Vec<AddressMeta> {
        self.sorted_insertions()
            .into_iter()
            .filter(|meta| meta.account == *account)
            .collect()
    }

    pub fn is_inserted(&self, key: &AddressKey) -> bool {
        self.insertions.contains_key(key)
    }

    pub fn is_deleted(&self, key: &AddressKey) -> bool {
        self.deletions.contains(key)
    }

    pub fn is_used(&self, key: &AddressKey) -> bool {
        self.used.contains(key)
    }

    pub fn is_change(&self, key: &AddressKey) -> bool {
        self.change.contains(key)
    }

    pub fn utxo_delta(&self, address: &Address) -> i128 {
        self.utxo_diff.get(address).copied().unwrap_or(0)
    }

    pub fn utxo_diff(&self) -> &BTreeMap<Address, i128> {
        &self.utxo_diff
    }

    /// Derives the overlay for `wallet_id` from pending transactions.
    ///
    /// `known` maps the wallet's durable addresses to their keys. Outputs are
    /// claimed either through `known` or through an owner attribute naming this
    /// wallet; owner-claimed addresses missing from `known` become insertions.
    pub fn build(
        wallet_id: &WalletId,
        known: &HashMap<Address, AddressKey>,
        txs: &[PendingTx],
    ) -> Self {
        let mut modifier = Self::new();
        let mut discovered: HashMap<Address, AddressKey> = HashMap::new();

        for tx in txs {
            let mut all_inputs_ours = !tx.inputs.is_empty();
            for input in &tx.inputs {
                let key = known
                    .get(&input.address)
                    .or_else(|| discovered.get(&input.address))
                    .copied();
                match key {
                    Some(key) => {
                        modifier.add_utxo_delta(input.address, -i128::from(input.value.value()));
                        modifier.mark_used(key);
                    }
                    None => all_inputs_ours = false,
                }
            }

            let mut owned_outputs = Vec::with_capacity(tx.outputs.len());
            for output in &tx.outputs {
                let mut key = known
                    .get(&output.address)
                    .or_else(|| discovered.get(&output.address))
                    .copied();
                if key.is_none() {
                    if let Some(owner) = output.owner.filter(|owner| owner.wallet_id == *wallet_id)
                    {
                        let meta = AddressMeta {
                            account: owner.account_id(),
                            index: owner.address_index,
                            address: output.address,
                        };
                        modifier.insert_address(meta);
                        discovered.insert(output.address, meta.key());
                        key = Some(meta.key());
                    }
                }
                if let Some(key) = key {
                    modifier.add_utxo_delta(output.address, i128::from(output.value.value()));
                    modifier.mark_used(key);
                    owned_outputs.push(key);
                }
            }

            if all_inputs_ours && owned_outputs.len() < tx.outputs.len() {
                for key in owned_outputs {
                    modifier.mark_change(key);
                }
            }
        }
        modifier
    }
}

struct CachedModifier {
    pool_version: u64,
    epoch: u64,
    generation: u64,
    modifier: Arc<AccountModifier>,
}

#[derive(Default)]
struct CacheState {
    epochs: HashMap<WalletId, u64>,
    entries: HashMap<WalletId, CachedModifier>,
}

/// Wallet-keyed modifier cache.
///
/// An entry is reused while the pool version, the wallet's invalidation epoch
/// and the address-set generation of the reader's snapshot all match the values
/// it was built under. A reader on an older snapshot never replaces an entry
/// built from a newer address set.
#[derive(Default)]
pub struct ModifierCache {
    state: Mutex<CacheState>,
}

impl ModifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drops the wallet's entry; the next read rebuilds it.
    pub fn invalidate(&self, wallet_id: &WalletId) {
        let mut state = self.state();
        *state.epochs.entry(*wallet_id).or_insert(0) += 1;
        state.entries.remove(wallet_id);
    }

    pub fn is_cached(&self, wallet_id: &WalletId) -> bool {
        self.state().entries.contains_key(wallet_id)
    }

    pub fn modifier_for(
        &self,
        snapshot: &WalletSnapshot,
        pool: &dyn PendingTxSource,
        wallet_id: &WalletId,
    ) -> Result<Arc<AccountModifier>, WalletError> {
        let pool_version = pool.version();
        let generation = snapshot.address_generation(wallet_id)?;
        let epoch = {
            let state = self.state();
            let epoch = state.epochs.get(wallet_id).copied().unwrap_or(0);
            if let Some(cached) = state.entries.get(wallet_id) {
                if cached.pool_version == pool_version
                    && cached.epoch == epoch
                    && cached.generation == generation
                {
                    return Ok(Arc::clone(&cached.modifier));
                }
            }
            epoch
        };

        let known = snapshot.wallet_address_index(wallet_id)?;
        let txs = pool.pending_txs();
        let modifier = Arc::new(AccountModifier::build(wallet_id, &known, &txs));
        log_debug!(
            "rebuilt account modifier for wallet {} (pool version {}, generation {}, {} pending txs, {} insertions)",
            wallet_id,
            pool_version,
            generation,
            txs.len(),
            modifier.insertions.len()
        );

        let mut state = self.state();
        let current_epoch = state.epochs.get(wallet_id).copied().unwrap_or(0);
        let superseded = state
            .entries
            .get(wallet_id)
            .is_some_and(|cached| cached.generation > generation);
        if current_epoch == epoch && !superseded {
            state.entries.insert(
                *wallet_id,
                CachedModifier {
                    pool_version,
                    epoch,
                    generation,
                    modifier: Arc::clone(&modifier),
                },
            );
        }
        Ok(modifier)
    }

    /// Ensures a current modifier for `wallet_id` and runs `action` with it.
    pub fn fix_cached_acc_modifier_for<T>(
        &self,
        snapshot: &WalletSnapshot,
        pool: &dyn PendingTxSource,
        wallet_id: &WalletId,
        action: impl FnOnce(&AccountModifier) -> Result<T, WalletError>,
    ) -> Result<T, WalletError> {
        let modifier = self.modifier_for(snapshot, pool, wallet_id)?;
        action(&modifier)
    }

    /// Account-scoped form of [`ModifierCache::fix_cached_acc_modifier_for`].
    pub fn fixing_cached_acc_modifier<T>(
        &self,
        snapshot: &WalletSnapshot,
        pool: &dyn PendingTxSource,
        account_id: &AccountId,
        action: impl FnOnce(&AccountModifier) -> Result<T, WalletError>,
    ) -> Result<T, WalletError> {
        self.fix_cached_acc_modifier_for(snapshot, pool, &account_id.wallet_id, action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{AddressOwner, PendingInput, PendingOutput};
    use walletd_primitives::{Coin, OutPoint};

    fn address(tag: u8) -> Address {
        Address::new(0x1c, [tag; 20])
    }

    fn coin(value: u64) -> Coin {
        Coin::new(value).expect("coin")
    }

    #[test]
    fn pending_spend_marks_change_and_inserts_owned_outputs() {
        let wallet_id = WalletId::new([1u8; 20]);
        let account = AccountId::new(wallet_id, 7);
        let mut known = HashMap::new();
        known.insert(address(1), (account, 0));

        let tx = PendingTx {
            txid: [9u8; 32],
            inputs: vec![PendingInput {
                outpoint: OutPoint::new([8u8; 32], 0),
                address: address(1),
                value: coin(100),
            }],
            outputs: vec![
                PendingOutput {
                    address: address(2),
                    value: coin(60),
                    owner: None,
                },
                PendingOutput {
                    address: address(3),
                    value: coin(30),
                    owner: Some(AddressOwner {
                        wallet_id,
                        account_index: 7,
                        address_index: 1,
                    }),
                },
            ],
        };

        let modifier = AccountModifier::build(&wallet_id, &known, &[tx]);
        assert_eq!(modifier.utxo_delta(&address(1)), -100);
        assert_eq!(modifier.utxo_delta(&address(2)), 0);
        assert_eq!(modifier.utxo_delta(&address(3)), 30);
        assert!(modifier.is_used(&(account, 0)));
        assert!(modifier.is_change(&(account, 1)));
        assert!(!modifier.is_change(&(account, 0)));
        assert_eq!(
            modifier.sorted_insertions(),
            vec![AddressMeta {
                account,
                index: 1,
                address: address(3),
            }]
        );
    }

    #[test]
    fn foreign_owner_hint_is_ignored() {
        let wallet_id = WalletId::new([1u8; 20]);
        let tx = PendingTx {
            txid: [9u8; 32],
            inputs: Vec::new(),
            outputs: vec![PendingOutput {
                address: address(4),
                value: coin(5),
                owner: Some(AddressOwner {
                    wallet_id: WalletId::new([2u8; 20]),
                    account_index: 0,
                    address_index: 0,
                }),
            }],
        };
        let modifier = AccountModifier::build(&wallet_id, &HashMap::new(), &[tx]);
        assert_eq!(modifier, AccountModifier::new());
    }

    #[test]
    fn insertions_keep_discovery_order() {
        let account = AccountId::new(WalletId::new([3u8; 20]), 0);
        let mut modifier = AccountModifier::new();
        for (index, tag) in [(5u32, 9u8), (1, 2), (3, 7)] {
            modifier.insert_address(AddressMeta {
                account,
                index,
                address: address(tag),
            });
        }
        assert!(!modifier.insert_address(AddressMeta {
            account,
            index: 1,
            address: address(2),
        }));
        let order: Vec<u32> = modifier.sorted_insertions().iter().map(|m| m.index).collect();
        assert_eq!(order, vec![5, 1, 3]);

        modifier.delete_address((account, 1));
        assert!(modifier.is_deleted(&(account, 1)));
        assert!(!modifier.is_inserted(&(account, 1)));
    }
}
