//! Explorer side indexes: per-transaction extras, per-address history and balances.
//!
//! Everything lives in the `explorer` column under short key prefixes and is
//! mutated only through [`ExplorerDb::apply_ops`], which commits one batch.

use std::collections::BTreeMap;
use std::fmt;

use walletd_log::log_info;
use walletd_primitives::address::ADDRESS_BYTES;
use walletd_primitives::encoding::{
    decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder,
};
use walletd_primitives::{Address, Coin, Hash256, TxId};
use walletd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

const TX_EXTRA_PREFIX: &[u8] = b"e/tx/";
const ADDR_HISTORY_PREFIX: &[u8] = b"e/ah/";
const ADDR_BALANCE_PREFIX: &[u8] = b"e/ab/";
const INIT_KEY: &[u8] = b"e/init/";

#[derive(Debug)]
pub enum ExplorerError {
    Store(StoreError),
    Decode(DecodeError),
    Overflow,
}

impl fmt::Display for ExplorerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplorerError::Store(err) => write!(f, "{err}"),
            ExplorerError::Decode(err) => write!(f, "failed to decode explorer record: {err}"),
            ExplorerError::Overflow => write!(f, "explorer balance exceeds maximum coin value"),
        }
    }
}

impl std::error::Error for ExplorerError {}

impl From<StoreError> for ExplorerError {
    fn from(err: StoreError) -> Self {
        ExplorerError::Store(err)
    }
}

impl From<DecodeError> for ExplorerError {
    fn from(err: DecodeError) -> Self {
        ExplorerError::Decode(err)
    }
}

/// Side metadata kept per confirmed transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxExtra {
    pub block_hash: Hash256,
    pub height: u32,
    pub time: u64,
    pub fee: Coin,
}

impl Encodable for TxExtra {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.block_hash);
        encoder.write_u32_le(self.height);
        encoder.write_u64_le(self.time);
        encoder.write_coin(self.fee);
    }
}

impl Decodable for TxExtra {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            block_hash: decoder.read_hash_le()?,
            height: decoder.read_u32_le()?,
            time: decoder.read_u64_le()?,
            fee: decoder.read_coin()?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExplorerOp {
    AddTxExtra(TxId, TxExtra),
    DelTxExtra(TxId),
    /// Replaces the address history; the list is newest first.
    UpdateAddrHistory(Address, Vec<TxId>),
    PutAddrBalance(Address, Coin),
    DelAddrBalance(Address),
}

fn tx_extra_key(txid: &TxId) -> Vec<u8> {
    let mut key = Vec::with_capacity(TX_EXTRA_PREFIX.len() + txid.len());
    key.extend_from_slice(TX_EXTRA_PREFIX);
    key.extend_from_slice(txid);
    key
}

fn address_key(prefix: &[u8], address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + ADDRESS_BYTES);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&address.to_bytes());
    key
}

pub struct ExplorerDb<S> {
    store: S,
}

impl<S> ExplorerDb<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> ExplorerDb<S> {
    fn decode_at<T: Decodable>(&self, key: &[u8]) -> Result<Option<T>, ExplorerError> {
        match self.store.get(Column::Explorer, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Commits every op in one atomic batch, in order.
    pub fn apply_ops(&self, ops: &[ExplorerOp]) -> Result<(), ExplorerError> {
        let mut batch = WriteBatch::new();
        for op in ops {
            match op {
                ExplorerOp::AddTxExtra(txid, extra) => {
                    batch.put(Column::Explorer, tx_extra_key(txid), encode(extra));
                }
                ExplorerOp::DelTxExtra(txid) => {
                    batch.delete(Column::Explorer, tx_extra_key(txid));
                }
                ExplorerOp::UpdateAddrHistory(address, history) => {
                    batch.put(
                        Column::Explorer,
                        address_key(ADDR_HISTORY_PREFIX, address),
                        encode(history),
                    );
                }
                ExplorerOp::PutAddrBalance(address, balance) => {
                    batch.put(
                        Column::Explorer,
                        address_key(ADDR_BALANCE_PREFIX, address),
                        encode(balance),
                    );
                }
                ExplorerOp::DelAddrBalance(address) => {
                    batch.delete(Column::Explorer, address_key(ADDR_BALANCE_PREFIX, address));
                }
            }
        }
        self.store.write_batch(&batch)?;
        Ok(())
    }

    pub fn get_tx_extra(&self, txid: &TxId) -> Result<Option<TxExtra>, ExplorerError> {
        self.decode_at(&tx_extra_key(txid))
    }

    /// Transactions touching `address`, newest first. Unknown addresses have none.
    pub fn get_addr_history(&self, address: &Address) -> Result<Vec<TxId>, ExplorerError> {
        Ok(self
            .decode_at(&address_key(ADDR_HISTORY_PREFIX, address))?
            .unwrap_or_default())
    }

    pub fn get_addr_history_page(
        &self,
        address: &Address,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<TxId>, ExplorerError> {
        Ok(self
            .get_addr_history(address)?
            .into_iter()
            .skip(skip)
            .take(limit)
            .collect())
    }

    /// History with `txid` moved to the front, ready for an `UpdateAddrHistory` op.
    pub fn prepend_addr_history(
        &self,
        address: &Address,
        txid: TxId,
    ) -> Result<Vec<TxId>, ExplorerError> {
        let mut history = self.get_addr_history(address)?;
        history.retain(|existing| existing != &txid);
        history.insert(0, txid);
        Ok(history)
    }

    pub fn get_addr_balance(&self, address: &Address) -> Result<Coin, ExplorerError> {
        Ok(self
            .decode_at(&address_key(ADDR_BALANCE_PREFIX, address))?
            .unwrap_or(Coin::ZERO))
    }

    pub fn is_initialized(&self) -> Result<bool, ExplorerError> {
        Ok(self.store.get(Column::Explorer, INIT_KEY)?.is_some())
    }

    /// Seeds address balances from the genesis allocations once.
    ///
    /// Repeated addresses are summed. The balances are written in one batch and
    /// the init flag only after it commits, so a failed population is retried on
    /// the next call. Returns whether anything was written.
    pub fn prepare_explorer_db(&self, genesis: &[(Address, Coin)]) -> Result<bool, ExplorerError> {
        if self.is_initialized()? {
            return Ok(false);
        }
        let mut combined: BTreeMap<Address, Coin> = BTreeMap::new();
        for (address, value) in genesis {
            let slot = combined.entry(*address).or_insert(Coin::ZERO);
            *slot = slot
                .checked_add(*value)
                .map_err(|_| ExplorerError::Overflow)?;
        }
        let ops: Vec<ExplorerOp> = combined
            .iter()
            .map(|(address, value)| ExplorerOp::PutAddrBalance(*address, *value))
            .collect();
        self.apply_ops(&ops)?;
        self.store.put(Column::Explorer, INIT_KEY, &[])?;
        log_info!(
            "explorer genesis balances written for {} addresses",
            combined.len()
        );
        Ok(true)
    }
}
