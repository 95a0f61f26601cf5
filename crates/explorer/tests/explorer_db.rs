use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use walletd_explorer::{ExplorerDb, ExplorerError, ExplorerOp, TxExtra};
use walletd_primitives::{Address, Coin, MAX_COIN};
use walletd_storage::memory::MemoryStore;
use walletd_storage::{
    Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, StoreSnapshot, WriteBatch,
};

#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    batches: AtomicUsize,
}

impl KeyValueStore for CountingStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(column, key)
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner.put(column, key, value)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.inner.delete(column, key)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.inner.scan_prefix(column, prefix)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        self.inner.for_each_prefix(column, prefix, visitor)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.inner.write_batch(batch)
    }

    fn snapshot(&self) -> Result<Arc<dyn StoreSnapshot>, StoreError> {
        self.inner.snapshot()
    }
}

fn address(tag: u8) -> Address {
    Address::new(0x1c, [tag; 20])
}

fn coin(value: u64) -> Coin {
    Coin::new(value).expect("coin")
}

#[test]
fn genesis_population_runs_once() {
    let store = Arc::new(CountingStore::default());
    let db = ExplorerDb::new(Arc::clone(&store));
    let genesis = vec![
        (address(1), coin(10)),
        (address(2), coin(5)),
        (address(1), coin(7)),
    ];

    assert!(!db.is_initialized().expect("init flag"));
    assert!(db.prepare_explorer_db(&genesis).expect("prepare"));
    assert_eq!(store.batches.load(Ordering::SeqCst), 1);
    assert!(db.is_initialized().expect("init flag"));
    assert_eq!(db.get_addr_balance(&address(1)).expect("balance"), coin(17));
    assert_eq!(db.get_addr_balance(&address(2)).expect("balance"), coin(5));

    assert!(!db.prepare_explorer_db(&genesis).expect("prepare again"));
    assert_eq!(store.batches.load(Ordering::SeqCst), 1);
    assert_eq!(db.get_addr_balance(&address(1)).expect("balance"), coin(17));
}

#[test]
fn genesis_overflow_leaves_store_untouched() {
    let store = Arc::new(CountingStore::default());
    let db = ExplorerDb::new(Arc::clone(&store));
    let genesis = vec![(address(1), coin(MAX_COIN)), (address(1), coin(1))];

    assert!(matches!(
        db.prepare_explorer_db(&genesis),
        Err(ExplorerError::Overflow)
    ));
    assert_eq!(store.batches.load(Ordering::SeqCst), 0);
    assert!(!db.is_initialized().expect("init flag"));
}

#[test]
fn ops_commit_as_one_batch() {
    let store = Arc::new(MemoryStore::new());
    let db = ExplorerDb::new(Arc::clone(&store));
    let extra = TxExtra {
        block_hash: [3u8; 32],
        height: 12,
        time: 1_700_000_000,
        fee: coin(1_000),
    };

    db.apply_ops(&[
        ExplorerOp::AddTxExtra([1u8; 32], extra.clone()),
        ExplorerOp::UpdateAddrHistory(address(4), vec![[1u8; 32]]),
        ExplorerOp::PutAddrBalance(address(4), coin(250)),
    ])
    .expect("apply");

    assert_eq!(db.get_tx_extra(&[1u8; 32]).expect("extra"), Some(extra));
    assert_eq!(db.get_addr_balance(&address(4)).expect("balance"), coin(250));
    assert_eq!(db.get_addr_balance(&address(5)).expect("balance"), Coin::ZERO);

    let history = db.prepend_addr_history(&address(4), [2u8; 32]).expect("prepend");
    db.apply_ops(&[
        ExplorerOp::UpdateAddrHistory(address(4), history),
        ExplorerOp::DelTxExtra([1u8; 32]),
        ExplorerOp::DelAddrBalance(address(4)),
    ])
    .expect("apply");

    assert_eq!(
        db.get_addr_history(&address(4)).expect("history"),
        vec![[2u8; 32], [1u8; 32]]
    );
    assert!(db.get_tx_extra(&[1u8; 32]).expect("extra").is_none());
    assert_eq!(db.get_addr_balance(&address(4)).expect("balance"), Coin::ZERO);
    assert!(db.get_addr_history(&address(9)).expect("history").is_empty());
}

#[test]
fn history_pages_newest_first() {
    let store = Arc::new(MemoryStore::new());
    let db = ExplorerDb::new(Arc::clone(&store));
    for n in 0..5u8 {
        let history = db.prepend_addr_history(&address(1), [n; 32]).expect("prepend");
        db.apply_ops(&[ExplorerOp::UpdateAddrHistory(address(1), history)])
            .expect("apply");
    }

    assert_eq!(
        db.get_addr_history_page(&address(1), 1, 2).expect("page"),
        vec![[3u8; 32], [2u8; 32]]
    );
    assert_eq!(
        db.get_addr_history_page(&address(1), 4, 10).expect("page"),
        vec![[0u8; 32]]
    );
    assert!(db
        .get_addr_history_page(&address(1), 9, 10)
        .expect("page")
        .is_empty());

    // A repeat moves the transaction to the front instead of duplicating it.
    let history = db.prepend_addr_history(&address(1), [1u8; 32]).expect("prepend");
    assert_eq!(history.len(), 5);
    assert_eq!(history[0], [1u8; 32]);
}
