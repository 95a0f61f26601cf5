use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use walletd_primitives::Coin;
use walletd_storage::memory::MemoryStore;
use walletd_storage::{
    Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, StoreSnapshot, WriteBatch,
};
use walletd_wallet::{
    AccountInit, AccountMeta, Assurance, EncryptedSecretKey, KdfConfig, KeyList, LocalPool,
    TxHistoryMeta, WalletConfig, WalletError, WalletId, WalletMeta, WalletService,
};

const TEST_KDF: KdfConfig = KdfConfig {
    mem_kib: 64,
    iters: 1,
    parallelism: 1,
};

fn test_service() -> (WalletService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let config = WalletConfig {
        kdf: TEST_KDF,
        ..WalletConfig::default()
    };
    let service = WalletService::new(
        store.clone(),
        Arc::new(KeyList::in_memory()),
        Arc::new(LocalPool::new()),
        config,
    );
    (service, store)
}

/// Memory store whose batch commits fail while `fail_writes` is set.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl KeyValueStore for FlakyStore {
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
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected write failure".to_string()));
        }
        self.inner.write_batch(batch)
    }

    fn snapshot(&self) -> Result<Arc<dyn StoreSnapshot>, StoreError> {
        self.inner.snapshot()
    }
}

fn wallet_meta(name: &str) -> WalletMeta {
    WalletMeta {
        name: name.to_string(),
        assurance: Assurance::Normal,
        unit: 0,
    }
}

fn account_init(wallet_id: WalletId, name: &str) -> AccountInit {
    AccountInit {
        wallet_id,
        meta: AccountMeta {
            name: name.to_string(),
        },
    }
}

#[test]
fn duplicate_wallet_is_rejected_without_second_write() {
    let (service, store) = test_service();
    let created = service
        .new_wallet(b"entropy-dup", "", &wallet_meta("main"), true)
        .expect("create wallet");
    assert!(created.ready);
    assert!(!created.has_passphrase);
    assert_eq!(created.account_count, 0);

    let err = service
        .new_wallet(b"entropy-dup", "", &wallet_meta("shadow"), true)
        .expect_err("duplicate");
    assert!(matches!(err, WalletError::DuplicateWallet(id) if id == created.id));
    assert!(err.is_request_rejection());

    let view = service.get_wallet_view(&created.id).expect("view");
    assert_eq!(view.meta.name, "main");
    assert_eq!(service.key_storage().secret_keys().expect("keys").len(), 1);
    assert_eq!(
        store
            .scan_prefix(Column::WalletMeta, &[])
            .expect("scan")
            .len(),
        1
    );
}

#[test]
fn create_wallet_safe_rejects_unready_duplicate() {
    let (service, _store) = test_service();
    let key = EncryptedSecretKey::generate(b"entropy-safe", "pw", &TEST_KDF).expect("seal");
    let wallet_id = *key.wallet_id();
    service
        .key_storage()
        .add_secret_key(key)
        .expect("add key");

    let view = service
        .create_wallet_safe(&wallet_id, &wallet_meta("pending"), false)
        .expect("create");
    assert!(!view.ready);
    assert!(view.has_passphrase);

    assert!(matches!(
        service.create_wallet_safe(&wallet_id, &wallet_meta("again"), true),
        Err(WalletError::DuplicateWallet(_))
    ));
    assert!(matches!(
        service.get_wallet_view(&wallet_id),
        Err(WalletError::NoSuchWallet(_))
    ));

    let ready = service.mark_wallet_ready(&wallet_id, true).expect("ready");
    assert!(ready.ready);
    assert_eq!(service.get_wallets().expect("wallets").len(), 1);
}

#[test]
fn failed_wallet_write_leaves_no_orphaned_key() {
    let store = Arc::new(FlakyStore::default());
    let config = WalletConfig {
        kdf: TEST_KDF,
        ..WalletConfig::default()
    };
    let service = WalletService::new(
        store.clone(),
        Arc::new(KeyList::in_memory()),
        Arc::new(LocalPool::new()),
        config,
    );

    store.fail_writes.store(true, Ordering::SeqCst);
    assert!(matches!(
        service.new_wallet(b"entropy-flaky", "first", &wallet_meta("main"), true),
        Err(WalletError::Store(_))
    ));
    assert!(service.key_storage().secret_keys().expect("keys").is_empty());

    store.fail_writes.store(false, Ordering::SeqCst);
    let wallet = service
        .new_wallet(b"entropy-flaky", "second", &wallet_meta("main"), true)
        .expect("create wallet");
    let keys = service.key_storage().secret_keys().expect("keys");
    assert_eq!(keys.len(), 1);
    assert!(keys[0].check_passphrase("second"));

    let account = service
        .new_account(1, "second", &account_init(wallet.id, "a"))
        .expect("new account");
    assert_eq!(account.addresses.len(), 1);
}

#[test]
fn concurrent_create_admits_exactly_one() {
    let (service, _store) = test_service();
    let service = Arc::new(service);
    let key = EncryptedSecretKey::generate(b"entropy-race", "", &TEST_KDF).expect("seal");
    let wallet_id = *key.wallet_id();
    service
        .key_storage()
        .add_secret_key(key)
        .expect("add key");

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                service.create_wallet_safe(&wallet_id, &wallet_meta(&format!("w{i}")), true)
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.join().expect("join") {
            Ok(_) => created += 1,
            Err(WalletError::DuplicateWallet(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!(created, 1);
}

#[test]
fn passphrase_change_to_current_is_noop() {
    let (service, _store) = test_service();
    let wallet = service
        .new_wallet(b"entropy-pass", "pw", &wallet_meta("main"), true)
        .expect("create wallet");
    assert!(wallet.has_passphrase);
    let keys_before = service.key_storage().secret_keys().expect("keys");

    service
        .change_wallet_passphrase(&wallet.id, "pw", "pw")
        .expect("noop change");

    assert_eq!(service.key_storage().secret_keys().expect("keys"), keys_before);
    let after = service.get_wallet_view(&wallet.id).expect("view");
    assert_eq!(after.passphrase_updated_at, wallet.passphrase_updated_at);
}

#[test]
fn passphrase_change_rotates_key() {
    let (service, _store) = test_service();
    let wallet = service
        .new_wallet(b"entropy-rotate", "old", &wallet_meta("main"), true)
        .expect("create wallet");

    assert!(matches!(
        service.change_wallet_passphrase(&wallet.id, "wrong", "new"),
        Err(WalletError::InvalidPassphrase)
    ));
    service
        .change_wallet_passphrase(&wallet.id, "old", "new")
        .expect("change");

    let keys = service.key_storage().secret_keys().expect("keys");
    assert_eq!(keys.len(), 1);
    assert!(keys[0].check_passphrase("new"));
    assert!(!keys[0].check_passphrase("old"));

    service
        .change_wallet_passphrase(&wallet.id, "new", "")
        .expect("clear passphrase");
    let view = service.get_wallet_view(&wallet.id).expect("view");
    assert!(!view.has_passphrase);

    let missing = WalletId::new([0xee; 20]);
    assert!(matches!(
        service.change_wallet_passphrase(&missing, "", "x"),
        Err(WalletError::NoSuchWallet(_))
    ));
}

#[test]
fn new_account_has_one_empty_address() {
    let (service, _store) = test_service();
    let wallet = service
        .new_wallet(b"entropy-acct", "pw", &wallet_meta("main"), true)
        .expect("create wallet");

    let first = service
        .new_account(7, "pw", &account_init(wallet.id, "savings"))
        .expect("new account");
    assert_eq!(first.id.wallet_id, wallet.id);
    assert_eq!(first.meta.name, "savings");
    assert_eq!(first.addresses.len(), 1);
    assert_eq!(first.balance, Coin::ZERO);
    assert!(first.id.index >= 0x8000_0000);
    assert!(!first.addresses[0].is_used);

    // Same seed draws the same first index; the collision forces a fresh draw.
    let second = service
        .new_account(7, "pw", &account_init(wallet.id, "spending"))
        .expect("new account");
    assert_ne!(second.id, first.id);

    let view = service.get_wallet_view(&wallet.id).expect("view");
    assert_eq!(view.account_count, 2);
}

#[test]
fn new_account_checks_wallet_and_passphrase_before_writing() {
    let (service, store) = test_service();
    let wallet = service
        .new_wallet(b"entropy-check", "pw", &wallet_meta("main"), false)
        .expect("create wallet");

    assert!(matches!(
        service.new_account(1, "pw", &account_init(wallet.id, "a")),
        Err(WalletError::NoSuchWallet(_))
    ));
    assert!(matches!(
        service.new_account_include_unready(1, "bad", &account_init(wallet.id, "a")),
        Err(WalletError::InvalidPassphrase)
    ));
    assert!(store
        .scan_prefix(Column::AccountMeta, &[])
        .expect("scan")
        .is_empty());

    let account = service
        .new_account_include_unready(1, "pw", &account_init(wallet.id, "a"))
        .expect("new account");
    assert!(service.get_accounts(None).expect("accounts").is_empty());
    assert_eq!(
        service
            .get_accounts_include_unready(Some(&wallet.id))
            .expect("accounts"),
        vec![account.clone()]
    );
    assert!(matches!(
        service.get_accounts(Some(&wallet.id)),
        Err(WalletError::NoSuchWallet(_))
    ));

    service.mark_wallet_ready(&wallet.id, true).expect("ready");
    assert_eq!(service.get_accounts(None).expect("accounts"), vec![account]);
}

#[test]
fn new_address_and_updates_read_their_writes() {
    let (service, _store) = test_service();
    let wallet = service
        .new_wallet(b"entropy-upd", "", &wallet_meta("main"), true)
        .expect("create wallet");
    let account = service
        .new_account(11, "", &account_init(wallet.id, "a"))
        .expect("new account");

    let address = service
        .new_address(12, "", &account.id)
        .expect("new address");
    assert_eq!(address.meta.account, account.id);
    assert_eq!(address.balance, Coin::ZERO);

    let view = service.get_account_view(&account.id).expect("account");
    assert_eq!(view.addresses.len(), 2);
    assert_eq!(view.addresses[1].meta, address.meta);

    let renamed = service
        .update_account(&account.id, &AccountMeta { name: "b".to_string() })
        .expect("update account");
    assert_eq!(renamed.meta.name, "b");
    assert_eq!(renamed.addresses.len(), 2);

    let updated = service
        .update_wallet(&wallet.id, &WalletMeta {
            name: "renamed".to_string(),
            assurance: Assurance::Strict,
            unit: 2,
        })
        .expect("update wallet");
    assert_eq!(updated.meta.assurance, Assurance::Strict);
    assert_eq!(updated.account_count, 1);

    let ghost = walletd_wallet::AccountId::new(wallet.id, 5);
    assert!(matches!(
        service.new_address(1, "", &ghost),
        Err(WalletError::NoSuchAccount(_))
    ));
    assert!(matches!(
        service.update_account(&ghost, &AccountMeta::default()),
        Err(WalletError::NoSuchAccount(_))
    ));
}

#[test]
fn delete_wallet_cascades() {
    let (service, store) = test_service();
    let wallet = service
        .new_wallet(b"entropy-del", "pw", &wallet_meta("main"), true)
        .expect("create wallet");
    let other = service
        .new_wallet(b"entropy-keep", "", &wallet_meta("keep"), true)
        .expect("create wallet");

    let a1 = service
        .new_account(1, "pw", &account_init(wallet.id, "a1"))
        .expect("a1");
    service.new_address(2, "pw", &a1.id).expect("y");
    service
        .new_account(3, "pw", &account_init(wallet.id, "a2"))
        .expect("a2");
    let kept = service
        .new_account(4, "", &account_init(other.id, "kept"))
        .expect("kept");
    service
        .db()
        .add_tx_history_meta(
            &wallet.id,
            &TxHistoryMeta {
                txid: [5u8; 32],
                time: 1,
                comment: "rent".to_string(),
            },
        )
        .expect("history");
    service
        .db()
        .set_history_cache(&wallet.id, b"cached")
        .expect("cache");

    service.delete_wallet(&wallet.id).expect("delete");

    let prefix = wallet.id.as_bytes();
    for column in [Column::AccountMeta, Column::Address, Column::TxHistory] {
        assert!(
            store.scan_prefix(column, prefix).expect("scan").is_empty(),
            "{} not empty",
            column.as_str()
        );
    }
    assert!(store.get(Column::WalletMeta, prefix).expect("get").is_none());
    assert!(store.get(Column::PassphraseUpdate, prefix).expect("get").is_none());
    assert!(store.get(Column::HistoryCache, prefix).expect("get").is_none());

    let keys = service.key_storage().secret_keys().expect("keys");
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].wallet_id(), &other.id);

    assert!(matches!(
        service.get_wallet_view(&wallet.id),
        Err(WalletError::NoSuchWallet(_))
    ));
    assert_eq!(
        service.get_accounts(None).expect("accounts"),
        vec![kept]
    );
    assert!(matches!(
        service.delete_wallet(&wallet.id),
        Err(WalletError::NoSuchWallet(_))
    ));
}
