#![cfg(feature = "fjall")]

use walletd_storage::fjall::FjallStore;
use walletd_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn fjall_batch_and_snapshot_isolation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FjallStore::open(dir.path()).expect("open fjall");

    let mut batch = WriteBatch::new();
    batch.put(Column::WalletMeta, b"w1", b"meta");
    batch.put(Column::AccountMeta, b"w1a1", b"acct");
    store.write_batch(&batch).expect("batch commit");

    let snapshot = store.snapshot().expect("snapshot");

    let mut batch = WriteBatch::new();
    batch.delete(Column::WalletMeta, b"w1");
    batch.put(Column::AccountMeta, b"w1a2", b"acct2");
    store.write_batch(&batch).expect("batch commit");

    assert_eq!(
        snapshot.get(Column::WalletMeta, b"w1").expect("get"),
        Some(b"meta".to_vec())
    );
    assert_eq!(
        snapshot
            .scan_prefix(Column::AccountMeta, b"w1")
            .expect("scan")
            .len(),
        1
    );
    assert!(store.get(Column::WalletMeta, b"w1").expect("get").is_none());
    assert_eq!(
        store.scan_prefix(Column::AccountMeta, b"w1").expect("scan").len(),
        2
    );
}
