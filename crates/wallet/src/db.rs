//! Durable wallet state over the column store.
//!
//! Reads go through [`WalletSnapshot`], a point-in-time view shared by every
//! reconstruction inside one logical operation. Writes go through [`WalletDb`]
//! and each returns a fresh snapshot taken after the write committed, so a
//! caller never reconstructs its result from a view that predates its own write.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use walletd_primitives::encoding::{decode, encode, Decodable, DecodeError};
use walletd_primitives::{Address, Coin, OutPoint};
use walletd_storage::{Column, KeyValueStore, StoreSnapshot, WriteBatch};

use crate::error::WalletError;
use crate::types::{
    AccountId, AccountMeta, AddressKey, AddressMeta, AddressRecord, CustomAddressKind,
    TxHistoryMeta, UtxoEntry, WalletId, WalletMeta, WalletRecord, ACCOUNT_KEY_BYTES,
    ADDRESS_KEY_BYTES, WALLET_ID_BYTES,
};

const ADDRESS_SEQ_KEY: &[u8] = b"address_seq";
const ADDRESS_GENERATION_PREFIX: &[u8] = b"address_gen/";

pub type Balances = BTreeMap<Address, Coin>;

#[derive(Clone)]
pub struct WalletSnapshot {
    inner: Arc<SnapshotInner>,
}

struct SnapshotInner {
    view: Arc<dyn StoreSnapshot>,
    balances: OnceLock<Arc<Balances>>,
}

fn decode_value<T: Decodable>(bytes: &[u8]) -> Result<T, WalletError> {
    decode(bytes).map_err(WalletError::Decode)
}

fn custom_address_key(kind: CustomAddressKind, address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 21);
    key.push(kind.tag());
    key.extend_from_slice(&address.to_bytes());
    key
}

/// Per-wallet counter bumped by every write that changes the wallet's address set.
fn address_generation_key(wallet_id: &WalletId) -> Vec<u8> {
    let mut key = Vec::with_capacity(ADDRESS_GENERATION_PREFIX.len() + WALLET_ID_BYTES);
    key.extend_from_slice(ADDRESS_GENERATION_PREFIX);
    key.extend_from_slice(wallet_id.as_bytes());
    key
}

fn decode_counter(bytes: Option<Vec<u8>>, what: &'static str) -> Result<u64, WalletError> {
    match bytes {
        Some(bytes) => Ok(u64::from_le_bytes(
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| WalletError::InvalidData(what))?,
        )),
        None => Ok(0),
    }
}

fn tx_history_key(wallet_id: &WalletId, meta: &TxHistoryMeta) -> Vec<u8> {
    let mut key = Vec::with_capacity(WALLET_ID_BYTES + 32);
    key.extend_from_slice(wallet_id.as_bytes());
    key.extend_from_slice(&meta.txid);
    key
}

impl WalletSnapshot {
    fn new(view: Arc<dyn StoreSnapshot>) -> Self {
        Self {
            inner: Arc::new(SnapshotInner {
                view,
                balances: OnceLock::new(),
            }),
        }
    }

    fn view(&self) -> &dyn StoreSnapshot {
        self.inner.view.as_ref()
    }

    fn wallet_record(&self, wallet_id: &WalletId) -> Result<Option<WalletRecord>, WalletError> {
        match self.view().get(Column::WalletMeta, wallet_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Metadata of a wallet; unready wallets are hidden unless `include_unready`.
    pub fn wallet_meta(
        &self,
        include_unready: bool,
        wallet_id: &WalletId,
    ) -> Result<Option<WalletMeta>, WalletError> {
        Ok(self
            .wallet_record(wallet_id)?
            .filter(|record| include_unready || record.ready)
            .map(|record| record.meta))
    }

    pub fn is_wallet_ready(&self, wallet_id: &WalletId) -> Result<bool, WalletError> {
        Ok(self
            .wallet_record(wallet_id)?
            .is_some_and(|record| record.ready))
    }

    pub fn wallet_ids(&self, include_unready: bool) -> Result<Vec<WalletId>, WalletError> {
        let mut out = Vec::new();
        for (key, value) in self.view().scan_prefix(Column::WalletMeta, &[])? {
            let wallet_id = WalletId::from_slice(&key)
                .ok_or(WalletError::Decode(DecodeError::InvalidData("invalid wallet key")))?;
            let record: WalletRecord = decode_value(&value)?;
            if include_unready || record.ready {
                out.push(wallet_id);
            }
        }
        Ok(out)
    }

    pub fn passphrase_update_time(&self, wallet_id: &WalletId) -> Result<Option<u64>, WalletError> {
        let Some(bytes) = self.view().get(Column::PassphraseUpdate, wallet_id.as_bytes())? else {
            return Ok(None);
        };
        let raw: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::Decode(DecodeError::InvalidData("invalid timestamp")))?;
        Ok(Some(u64::from_le_bytes(raw)))
    }

    /// Address-set generation of a wallet as of this snapshot; zero before the first address.
    pub fn address_generation(&self, wallet_id: &WalletId) -> Result<u64, WalletError> {
        decode_counter(
            self.view()
                .get(Column::Meta, &address_generation_key(wallet_id))?,
            "invalid address generation",
        )
    }

    pub fn account_meta(&self, account_id: &AccountId) -> Result<Option<AccountMeta>, WalletError> {
        match self.view().get(Column::AccountMeta, &account_id.key())? {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn does_account_exist(&self, account_id: &AccountId) -> Result<bool, WalletError> {
        Ok(self
            .view()
            .get(Column::AccountMeta, &account_id.key())?
            .is_some())
    }

    pub fn wallet_account_ids(&self, wallet_id: &WalletId) -> Result<Vec<AccountId>, WalletError> {
        let mut out = Vec::new();
        for (key, _) in self
            .view()
            .scan_prefix(Column::AccountMeta, wallet_id.as_bytes())?
        {
            out.push(
                AccountId::from_key(&key)
                    .ok_or(WalletError::Decode(DecodeError::InvalidData("invalid account key")))?,
            );
        }
        Ok(out)
    }

    /// Every account whose wallet is visible under `include_unready`, in key order.
    pub fn account_ids(&self, include_unready: bool) -> Result<Vec<AccountId>, WalletError> {
        let mut out = Vec::new();
        for wallet_id in self.wallet_ids(include_unready)? {
            out.extend(self.wallet_account_ids(&wallet_id)?);
        }
        Ok(out)
    }

    fn addresses_with_prefix(&self, prefix: &[u8]) -> Result<Vec<AddressMeta>, WalletError> {
        let mut rows = Vec::new();
        for (key, value) in self.view().scan_prefix(Column::Address, prefix)? {
            if key.len() != ADDRESS_KEY_BYTES {
                return Err(WalletError::Decode(DecodeError::InvalidData(
                    "invalid address key",
                )));
            }
            let account = AccountId::from_key(&key)
                .ok_or(WalletError::Decode(DecodeError::InvalidData("invalid address key")))?;
            let index = u32::from_be_bytes(
                key[ACCOUNT_KEY_BYTES..]
                    .try_into()
                    .map_err(|_| WalletError::InvalidData("invalid address key"))?,
            );
            let record: AddressRecord = decode_value(&value)?;
            rows.push((
                record.seq,
                AddressMeta {
                    account,
                    index,
                    address: record.address,
                },
            ));
        }
        rows.sort_by_key(|(seq, meta)| (meta.account, *seq, meta.index));
        Ok(rows.into_iter().map(|(_, meta)| meta).collect())
    }

    /// Durable addresses of one account in insertion order.
    pub fn account_addresses(&self, account_id: &AccountId) -> Result<Vec<AddressMeta>, WalletError> {
        self.addresses_with_prefix(&account_id.key())
    }

    pub fn wallet_addresses(&self, wallet_id: &WalletId) -> Result<Vec<AddressMeta>, WalletError> {
        self.addresses_with_prefix(wallet_id.as_bytes())
    }

    /// Chain address to uniqueness key for every durable address of a wallet.
    pub fn wallet_address_index(
        &self,
        wallet_id: &WalletId,
    ) -> Result<HashMap<Address, AddressKey>, WalletError> {
        Ok(self
            .wallet_addresses(wallet_id)?
            .into_iter()
            .map(|meta| (meta.address, meta.key()))
            .collect())
    }

    pub fn is_custom_address(
        &self,
        kind: CustomAddressKind,
        address: &Address,
    ) -> Result<bool, WalletError> {
        Ok(self
            .view()
            .get(Column::CustomAddress, &custom_address_key(kind, address))?
            .is_some())
    }

    /// Confirmed per-address balances summed from the UTXO column.
    ///
    /// Computed once per snapshot; the view is immutable so the result is shared.
    pub fn wallet_balances_and_utxo(&self) -> Result<Arc<Balances>, WalletError> {
        if let Some(balances) = self.inner.balances.get() {
            return Ok(Arc::clone(balances));
        }
        let mut balances = Balances::new();
        let mut failure: Option<WalletError> = None;
        self.view().for_each_prefix(Column::Utxo, &[], &mut |_, value| {
            let entry: UtxoEntry = match decode(value) {
                Ok(entry) => entry,
                Err(err) => {
                    failure = Some(WalletError::Decode(err));
                    return Ok(());
                }
            };
            let slot = balances.entry(entry.address).or_insert(Coin::ZERO);
            match slot.checked_add(entry.value) {
                Ok(sum) => *slot = sum,
                Err(_) => failure = Some(WalletError::Overflow),
            }
            Ok(())
        })?;
        if let Some(err) = failure {
            return Err(err);
        }
        let balances = Arc::new(balances);
        let _ = self.inner.balances.set(Arc::clone(&balances));
        Ok(balances)
    }

    pub fn tx_history(&self, wallet_id: &WalletId) -> Result<Vec<TxHistoryMeta>, WalletError> {
        self.view()
            .scan_prefix(Column::TxHistory, wallet_id.as_bytes())?
            .iter()
            .map(|(_, value)| decode_value(value))
            .collect()
    }

    pub fn history_cache(&self, wallet_id: &WalletId) -> Result<Option<Vec<u8>>, WalletError> {
        Ok(self.view().get(Column::HistoryCache, wallet_id.as_bytes())?)
    }
}

/// Write side of the wallet store. Every mutation is one atomic store call.
///
/// Writes that read stored state before building their batch (record updates,
/// counters, prefix deletes) hold `write_lock` across the read and the commit.
#[derive(Clone)]
pub struct WalletDb {
    store: Arc<dyn KeyValueStore>,
    write_lock: Arc<Mutex<()>>,
}

impl WalletDb {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn write_guard(&self) -> Result<MutexGuard<'_, ()>, WalletError> {
        self.write_lock
            .lock()
            .map_err(|_| WalletError::InvalidData("wallet db write lock poisoned"))
    }

    fn bump_address_generation(
        &self,
        batch: &mut WriteBatch,
        wallet_id: &WalletId,
    ) -> Result<(), WalletError> {
        let key = address_generation_key(wallet_id);
        let current = decode_counter(
            self.store.get(Column::Meta, &key)?,
            "invalid address generation",
        )?;
        batch.put(Column::Meta, key, current.saturating_add(1).to_le_bytes());
        Ok(())
    }

    pub fn snapshot(&self) -> Result<WalletSnapshot, WalletError> {
        Ok(WalletSnapshot::new(self.store.snapshot()?))
    }

    fn commit(&self, batch: &WriteBatch) -> Result<WalletSnapshot, WalletError> {
        self.store.write_batch(batch)?;
        self.snapshot()
    }

    fn load_wallet_record(&self, wallet_id: &WalletId) -> Result<WalletRecord, WalletError> {
        let bytes = self
            .store
            .get(Column::WalletMeta, wallet_id.as_bytes())?
            .ok_or(WalletError::NoSuchWallet(*wallet_id))?;
        decode_value(&bytes)
    }

    pub fn create_wallet(
        &self,
        wallet_id: &WalletId,
        meta: &WalletMeta,
        ready: bool,
        passphrase_updated_at: u64,
    ) -> Result<WalletSnapshot, WalletError> {
        let record = WalletRecord {
            meta: meta.clone(),
            ready,
        };
        let mut batch = WriteBatch::new();
        batch.put(Column::WalletMeta, *wallet_id.as_bytes(), encode(&record));
        batch.put(
            Column::PassphraseUpdate,
            *wallet_id.as_bytes(),
            passphrase_updated_at.to_le_bytes(),
        );
        self.commit(&batch)
    }

    pub fn set_wallet_meta(
        &self,
        wallet_id: &WalletId,
        meta: &WalletMeta,
    ) -> Result<WalletSnapshot, WalletError> {
        let _guard = self.write_guard()?;
        let mut record = self.load_wallet_record(wallet_id)?;
        record.meta = meta.clone();
        let mut batch = WriteBatch::new();
        batch.put(Column::WalletMeta, *wallet_id.as_bytes(), encode(&record));
        self.commit(&batch)
    }

    pub fn set_wallet_ready(
        &self,
        wallet_id: &WalletId,
        ready: bool,
    ) -> Result<WalletSnapshot, WalletError> {
        let _guard = self.write_guard()?;
        let mut record = self.load_wallet_record(wallet_id)?;
        record.ready = ready;
        let mut batch = WriteBatch::new();
        batch.put(Column::WalletMeta, *wallet_id.as_bytes(), encode(&record));
        self.commit(&batch)
    }

    pub fn set_passphrase_update_time(
        &self,
        wallet_id: &WalletId,
        time: u64,
    ) -> Result<WalletSnapshot, WalletError> {
        let mut batch = WriteBatch::new();
        batch.put(Column::PassphraseUpdate, *wallet_id.as_bytes(), time.to_le_bytes());
        self.commit(&batch)
    }

    pub fn remove_wallet(&self, wallet_id: &WalletId) -> Result<WalletSnapshot, WalletError> {
        let mut batch = WriteBatch::new();
        batch.delete(Column::WalletMeta, *wallet_id.as_bytes());
        batch.delete(Column::PassphraseUpdate, *wallet_id.as_bytes());
        self.commit(&batch)
    }

    pub fn create_account(
        &self,
        account_id: &AccountId,
        meta: &AccountMeta,
    ) -> Result<WalletSnapshot, WalletError> {
        let mut batch = WriteBatch::new();
        batch.put(Column::AccountMeta, account_id.key(), encode(meta));
        self.commit(&batch)
    }

    pub fn set_account_meta(
        &self,
        account_id: &AccountId,
        meta: &AccountMeta,
    ) -> Result<WalletSnapshot, WalletError> {
        let _guard = self.write_guard()?;
        if self.store.get(Column::AccountMeta, &account_id.key())?.is_none() {
            return Err(WalletError::NoSuchAccount(*account_id));
        }
        let mut batch = WriteBatch::new();
        batch.put(Column::AccountMeta, account_id.key(), encode(meta));
        self.commit(&batch)
    }

    /// Removes the account row and every address stored under it in one batch.
    pub fn remove_account(&self, account_id: &AccountId) -> Result<WalletSnapshot, WalletError> {
        let _guard = self.write_guard()?;
        let account_key = account_id.key();
        let mut batch = WriteBatch::new();
        batch.delete(Column::AccountMeta, account_key);
        for (key, _) in self.store.scan_prefix(Column::Address, &account_key)? {
            batch.delete(Column::Address, key);
        }
        self.bump_address_generation(&mut batch, &account_id.wallet_id)?;
        self.commit(&batch)
    }

    pub fn add_address(&self, meta: &AddressMeta) -> Result<WalletSnapshot, WalletError> {
        let _guard = self.write_guard()?;
        let seq = decode_counter(
            self.store.get(Column::Meta, ADDRESS_SEQ_KEY)?,
            "invalid address sequence",
        )?;
        let record = AddressRecord {
            seq,
            address: meta.address,
        };
        let mut batch = WriteBatch::new();
        batch.put(Column::Address, meta.store_key(), encode(&record));
        batch.put(Column::Meta, ADDRESS_SEQ_KEY, seq.saturating_add(1).to_le_bytes());
        self.bump_address_generation(&mut batch, &meta.account.wallet_id)?;
        self.commit(&batch)
    }

    pub fn add_custom_address(
        &self,
        kind: CustomAddressKind,
        address: &Address,
    ) -> Result<WalletSnapshot, WalletError> {
        let mut batch = WriteBatch::new();
        batch.put(Column::CustomAddress, custom_address_key(kind, address), Vec::<u8>::new());
        self.commit(&batch)
    }

    /// Ledger-facing UTXO update: spends are removed and new outputs added atomically.
    pub fn apply_utxo_batch(
        &self,
        created: &[(OutPoint, UtxoEntry)],
        spent: &[OutPoint],
    ) -> Result<WalletSnapshot, WalletError> {
        let mut batch = WriteBatch::new();
        for outpoint in spent {
            batch.delete(Column::Utxo, outpoint.key());
        }
        for (outpoint, entry) in created {
            batch.put(Column::Utxo, outpoint.key(), encode(entry));
        }
        self.commit(&batch)
    }

    pub fn add_tx_history_meta(
        &self,
        wallet_id: &WalletId,
        meta: &TxHistoryMeta,
    ) -> Result<WalletSnapshot, WalletError> {
        let mut batch = WriteBatch::new();
        batch.put(Column::TxHistory, tx_history_key(wallet_id, meta), encode(meta));
        self.commit(&batch)
    }

    pub fn remove_tx_history_metadata(
        &self,
        wallet_id: &WalletId,
    ) -> Result<WalletSnapshot, WalletError> {
        let _guard = self.write_guard()?;
        let mut batch = WriteBatch::new();
        for (key, _) in self.store.scan_prefix(Column::TxHistory, wallet_id.as_bytes())? {
            batch.delete(Column::TxHistory, key);
        }
        self.commit(&batch)
    }

    pub fn set_history_cache(
        &self,
        wallet_id: &WalletId,
        blob: &[u8],
    ) -> Result<WalletSnapshot, WalletError> {
        let mut batch = WriteBatch::new();
        batch.put(Column::HistoryCache, *wallet_id.as_bytes(), blob);
        self.commit(&batch)
    }

    pub fn remove_history_cache(&self, wallet_id: &WalletId) -> Result<WalletSnapshot, WalletError> {
        let mut batch = WriteBatch::new();
        batch.delete(Column::HistoryCache, *wallet_id.as_bytes());
        self.commit(&batch)
    }
}
