use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use walletd_storage::KeyValueStore;

use crate::config::WalletConfig;
use crate::db::{WalletDb, WalletSnapshot};
use crate::error::WalletError;
use crate::keystore::{find_secret_key, KeyStorage, RootSecret};
use crate::modifier::ModifierCache;
use crate::pool::PendingTxSource;
use crate::types::WalletId;

/// Wallet/account/address service over one store, key list and pending pool.
///
/// Reads take one snapshot per call and reconstruct views by merging it with the
/// per-wallet modifier. Writes go straight to the store; the returned snapshot
/// is the only one used to build the response.
pub struct WalletService {
    pub(crate) db: WalletDb,
    pub(crate) keys: Arc<dyn KeyStorage>,
    pub(crate) pool: Arc<dyn PendingTxSource>,
    pub(crate) cache: ModifierCache,
    pub(crate) config: WalletConfig,
    create_lock: Mutex<()>,
}

impl WalletService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        keys: Arc<dyn KeyStorage>,
        pool: Arc<dyn PendingTxSource>,
        config: WalletConfig,
    ) -> Self {
        Self {
            db: WalletDb::new(store),
            keys,
            pool,
            cache: ModifierCache::new(),
            config,
            create_lock: Mutex::new(()),
        }
    }

    /// Opens the on-disk store and key file under `config.data_dir`.
    #[cfg(feature = "fjall")]
    pub fn open(config: WalletConfig, pool: Arc<dyn PendingTxSource>) -> Result<Self, WalletError> {
        use crate::keystore::KeyList;
        use walletd_storage::fjall::FjallStore;

        walletd_log::init(config.log);
        std::fs::create_dir_all(&config.data_dir)?;
        let store = FjallStore::open(config.store_path())?;
        let keys = KeyList::open(config.key_file_path())?;
        walletd_log::log_info!("wallet store opened at {}", config.data_dir.display());
        Ok(Self::new(Arc::new(store), Arc::new(keys), pool, config))
    }

    pub fn db(&self) -> &WalletDb {
        &self.db
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn key_storage(&self) -> &dyn KeyStorage {
        self.keys.as_ref()
    }

    pub fn modifier_cache(&self) -> &ModifierCache {
        &self.cache
    }

    pub fn snapshot(&self) -> Result<WalletSnapshot, WalletError> {
        self.db.snapshot()
    }

    /// Drops the cached modifier of `wallet_id`; the next read rebuilds it.
    pub fn invalidate_modifier(&self, wallet_id: &WalletId) {
        self.cache.invalidate(wallet_id);
    }

    pub(crate) fn create_guard(&self) -> Result<MutexGuard<'_, ()>, WalletError> {
        self.create_lock
            .lock()
            .map_err(|_| WalletError::InvalidData("wallet create lock poisoned"))
    }

    pub(crate) fn unlock(
        &self,
        wallet_id: &WalletId,
        passphrase: &str,
    ) -> Result<RootSecret, WalletError> {
        find_secret_key(self.keys.as_ref(), wallet_id)?
            .ok_or(WalletError::KeyNotFound(*wallet_id))?
            .decrypt_root_secret(passphrase)
    }
}

pub(crate) fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
