use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::{
    Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, StoreSnapshot, WriteBatch,
    WriteOp,
};

type MemoryStoreMap = BTreeMap<(Column, Vec<u8>), Vec<u8>>;

/// In-memory store. Snapshots share the map until the next write clones it.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Arc<MemoryStoreMap>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut MemoryStoreMap) -> R) -> Result<R, StoreError> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        Ok(f(Arc::make_mut(&mut guard)))
    }

    fn current(&self) -> Result<Arc<MemoryStoreMap>, StoreError> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(Arc::clone(&guard))
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

fn visit_prefix(
    map: &MemoryStoreMap,
    column: Column,
    prefix: &[u8],
    visitor: &mut PrefixVisitor<'_>,
) -> Result<(), StoreError> {
    for ((entry_column, key), value) in map.range((column, prefix.to_vec())..) {
        if *entry_column != column || !key.starts_with(prefix) {
            break;
        }
        visitor(key.as_slice(), value.as_slice())?;
    }
    Ok(())
}

fn collect_prefix(
    map: &MemoryStoreMap,
    column: Column,
    prefix: &[u8],
) -> Result<ScanResult, StoreError> {
    let mut results = Vec::new();
    visit_prefix(map, column, prefix, &mut |key, value| {
        results.push((key.to_vec(), value.to_vec()));
        Ok(())
    })?;
    Ok(results)
}

pub struct MemorySnapshot {
    map: Arc<MemoryStoreMap>,
}

impl StoreSnapshot for MemorySnapshot {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map.get(&(column, key.to_vec())).cloned())
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        collect_prefix(&self.map, column, prefix)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        visit_prefix(&self.map, column, prefix, visitor)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard.get(&(column, key.to_vec())).cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.mutate(|map| {
            map.insert((column, key.to_vec()), value.to_vec());
        })
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.mutate(|map| {
            map.remove(&(column, key.to_vec()));
        })
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        collect_prefix(&guard, column, prefix)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        let map = self.current()?;
        visit_prefix(&map, column, prefix, visitor)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.mutate(|map| {
            for op in batch.iter() {
                match op {
                    WriteOp::Put { column, key, value } => {
                        map.insert((*column, key.as_slice().to_vec()), value.as_slice().to_vec());
                    }
                    WriteOp::Delete { column, key } => {
                        map.remove(&(*column, key.as_slice().to_vec()));
                    }
                }
            }
        })
    }

    fn snapshot(&self) -> Result<Arc<dyn StoreSnapshot>, StoreError> {
        Ok(Arc::new(MemorySnapshot {
            map: self.current()?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let store = MemoryStore::new();
        store.put(Column::Meta, b"a", b"1").expect("put");
        let snapshot = store.snapshot().expect("snapshot");

        store.put(Column::Meta, b"a", b"2").expect("put");
        store.put(Column::Meta, b"b", b"3").expect("put");

        assert_eq!(
            snapshot.get(Column::Meta, b"a").expect("get"),
            Some(b"1".to_vec())
        );
        assert!(snapshot.get(Column::Meta, b"b").expect("get").is_none());
        assert_eq!(
            store.snapshot().expect("snapshot").get(Column::Meta, b"a").expect("get"),
            Some(b"2".to_vec())
        );
    }

    #[test]
    fn prefix_scan_stays_inside_column() {
        let store = MemoryStore::new();
        store.put(Column::Address, b"ab1", b"x").expect("put");
        store.put(Column::Address, b"ab2", b"y").expect("put");
        store.put(Column::Address, b"ac1", b"z").expect("put");
        store.put(Column::CustomAddress, b"ab3", b"w").expect("put");

        let keys: Vec<Vec<u8>> = store
            .scan_prefix(Column::Address, b"ab")
            .expect("scan")
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec![b"ab1".to_vec(), b"ab2".to_vec()]);
    }
}
