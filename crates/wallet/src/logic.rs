//! Wallet, account and address lifecycle.
//!
//! Verification failures return before the first durable write. Sequences of
//! writes (account row, then its first address) are separate atomic calls; a
//! reader may observe the account before its address lands.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use walletd_log::{log_error, log_info, log_warn};

use crate::db::WalletSnapshot;
use crate::error::WalletError;
use crate::keystore::{find_secret_key, EncryptedSecretKey, RootSecret};
use crate::reconstruct::{get_account, get_address};
use crate::service::{unix_time, WalletService};
use crate::types::{
    AccountId, AccountInit, AccountMeta, AccountView, AddressMeta, AddressView, WalletId,
    WalletMeta, WalletView,
};

const HARDENED: u32 = 0x8000_0000;

impl WalletService {
    /// Creates the wallet row unless a wallet with `wallet_id` exists in any state.
    pub fn create_wallet_safe(
        &self,
        wallet_id: &WalletId,
        meta: &WalletMeta,
        is_ready: bool,
    ) -> Result<WalletView, WalletError> {
        self.create_wallet_with_key(wallet_id, meta, is_ready, None)
    }

    /// Derives a root key from `entropy`, stores it sealed under `passphrase`
    /// and creates the wallet it identifies.
    pub fn new_wallet(
        &self,
        entropy: &[u8],
        passphrase: &str,
        meta: &WalletMeta,
        is_ready: bool,
    ) -> Result<WalletView, WalletError> {
        let key = EncryptedSecretKey::generate(entropy, passphrase, &self.config.kdf)?;
        let wallet_id = *key.wallet_id();
        self.create_wallet_with_key(&wallet_id, meta, is_ready, Some(key))
    }

    fn create_wallet_with_key(
        &self,
        wallet_id: &WalletId,
        meta: &WalletMeta,
        is_ready: bool,
        key: Option<EncryptedSecretKey>,
    ) -> Result<WalletView, WalletError> {
        let snapshot = {
            let _guard = self.create_guard()?;
            let snapshot = self.db.snapshot()?;
            if snapshot.wallet_meta(true, wallet_id)?.is_some() {
                return Err(WalletError::DuplicateWallet(*wallet_id));
            }
            if let Some(key) = &key {
                self.keys.add_secret_key(key.clone())?;
            }
            match self.db.create_wallet(wallet_id, meta, is_ready, unix_time()) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    if let Some(added) = &key {
                        self.forget_secret_key(wallet_id, added);
                    }
                    return Err(err);
                }
            }
        };
        self.cache.invalidate(wallet_id);
        log_info!("created wallet {} (ready {})", wallet_id, is_ready);
        self.get_wallet(&snapshot, true, wallet_id)
    }

    /// Removes a key added for a wallet whose row was never written.
    fn forget_secret_key(&self, wallet_id: &WalletId, added: &EncryptedSecretKey) {
        match self
            .keys
            .delete_secret_key_matching(wallet_id, &|candidate| candidate == added)
        {
            Ok(Some(_)) => {}
            Ok(None) => log_warn!("secret key of wallet {} was already gone", wallet_id),
            Err(err) => log_error!(
                "failed to remove secret key of uncreated wallet {}: {}",
                wallet_id,
                err
            ),
        }
    }

    pub fn mark_wallet_ready(
        &self,
        wallet_id: &WalletId,
        ready: bool,
    ) -> Result<WalletView, WalletError> {
        let snapshot = self.db.set_wallet_ready(wallet_id, ready)?;
        log_info!("wallet {} ready={}", wallet_id, ready);
        self.get_wallet(&snapshot, true, wallet_id)
    }

    pub fn update_wallet(
        &self,
        wallet_id: &WalletId,
        meta: &WalletMeta,
    ) -> Result<WalletView, WalletError> {
        if self.snapshot()?.wallet_meta(false, wallet_id)?.is_none() {
            return Err(WalletError::NoSuchWallet(*wallet_id));
        }
        let snapshot = self.db.set_wallet_meta(wallet_id, meta)?;
        self.get_wallet(&snapshot, false, wallet_id)
    }

    /// Deletes every account of the wallet, then its rows, its history and
    /// finally its secret key.
    pub fn delete_wallet(&self, wallet_id: &WalletId) -> Result<(), WalletError> {
        let snapshot = self.snapshot()?;
        if snapshot.wallet_meta(true, wallet_id)?.is_none() {
            return Err(WalletError::NoSuchWallet(*wallet_id));
        }
        for account_id in snapshot.wallet_account_ids(wallet_id)? {
            self.delete_account(&account_id)?;
        }
        self.db.remove_wallet(wallet_id)?;
        self.db.remove_tx_history_metadata(wallet_id)?;
        self.db.remove_history_cache(wallet_id)?;
        if self
            .keys
            .delete_secret_key_matching(wallet_id, &|_| true)?
            .is_none()
        {
            log_warn!("wallet {} had no secret key to delete", wallet_id);
        }
        self.cache.invalidate(wallet_id);
        log_info!("deleted wallet {}", wallet_id);
        Ok(())
    }

    pub fn new_account(
        &self,
        seed: u64,
        passphrase: &str,
        init: &AccountInit,
    ) -> Result<AccountView, WalletError> {
        self.create_account(seed, passphrase, init, false)
    }

    pub fn new_account_include_unready(
        &self,
        seed: u64,
        passphrase: &str,
        init: &AccountInit,
    ) -> Result<AccountView, WalletError> {
        self.create_account(seed, passphrase, init, true)
    }

    fn create_account(
        &self,
        seed: u64,
        passphrase: &str,
        init: &AccountInit,
        include_unready: bool,
    ) -> Result<AccountView, WalletError> {
        let wallet_id = init.wallet_id;
        let snapshot = self.snapshot()?;
        if snapshot.wallet_meta(include_unready, &wallet_id)?.is_none() {
            return Err(WalletError::NoSuchWallet(wallet_id));
        }
        let root = self.unlock(&wallet_id, passphrase)?;
        let mut rng = StdRng::seed_from_u64(seed);

        let account_index = self.unique_index(&mut rng, HARDENED, |index| {
            snapshot.does_account_exist(&AccountId::new(wallet_id, index))
        })?;
        let account_id = AccountId::new(wallet_id, account_index);
        let snapshot = self.db.create_account(&account_id, &init.meta)?;

        let address = self.generate_address(&snapshot, &mut rng, &root, &account_id)?;
        let snapshot = self.db.add_address(&address)?;
        self.cache.invalidate(&wallet_id);
        log_info!("created account {} with address {}", account_id, address.address);

        self.cache
            .fixing_cached_acc_modifier(&snapshot, self.pool.as_ref(), &account_id, |modifier| {
                get_account(&snapshot, modifier, &account_id)
            })
    }

    pub fn new_address(
        &self,
        seed: u64,
        passphrase: &str,
        account_id: &AccountId,
    ) -> Result<AddressView, WalletError> {
        let snapshot = self.snapshot()?;
        if !snapshot.does_account_exist(account_id)? {
            return Err(WalletError::NoSuchAccount(*account_id));
        }
        let root = self.unlock(&account_id.wallet_id, passphrase)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let address = self.generate_address(&snapshot, &mut rng, &root, account_id)?;
        let snapshot = self.db.add_address(&address)?;
        self.cache.invalidate(&account_id.wallet_id);

        self.cache
            .fixing_cached_acc_modifier(&snapshot, self.pool.as_ref(), account_id, |modifier| {
                get_address(&snapshot, modifier, &address)
            })
    }

    pub fn delete_account(&self, account_id: &AccountId) -> Result<(), WalletError> {
        if !self.snapshot()?.does_account_exist(account_id)? {
            return Err(WalletError::NoSuchAccount(*account_id));
        }
        self.db.remove_account(account_id)?;
        self.cache.invalidate(&account_id.wallet_id);
        log_info!("deleted account {}", account_id);
        Ok(())
    }

    pub fn update_account(
        &self,
        account_id: &AccountId,
        meta: &AccountMeta,
    ) -> Result<AccountView, WalletError> {
        let snapshot = self.db.set_account_meta(account_id, meta)?;
        self.cache
            .fixing_cached_acc_modifier(&snapshot, self.pool.as_ref(), account_id, |modifier| {
                get_account(&snapshot, modifier, account_id)
            })
    }

    /// Re-seals the wallet key under `new_passphrase`.
    ///
    /// Succeeds without any change when the key already accepts `new_passphrase`.
    /// Otherwise the old key is removed and the re-sealed one appended; the list
    /// is index-addressed so it is never rewritten in place.
    pub fn change_wallet_passphrase(
        &self,
        wallet_id: &WalletId,
        old_passphrase: &str,
        new_passphrase: &str,
    ) -> Result<(), WalletError> {
        if self.snapshot()?.wallet_meta(true, wallet_id)?.is_none() {
            return Err(WalletError::NoSuchWallet(*wallet_id));
        }
        let key = find_secret_key(self.keys.as_ref(), wallet_id)?
            .ok_or(WalletError::KeyNotFound(*wallet_id))?;
        if key.check_passphrase(new_passphrase) {
            return Ok(());
        }
        let resealed = key
            .reencrypt(old_passphrase, new_passphrase)
            .ok_or(WalletError::InvalidPassphrase)?;
        self.keys
            .delete_secret_key_matching(wallet_id, &|candidate| {
                candidate.check_passphrase(old_passphrase)
            })?
            .ok_or(WalletError::KeyNotFound(*wallet_id))?;
        self.keys.add_secret_key(resealed)?;
        self.db.set_passphrase_update_time(wallet_id, unix_time())?;
        log_info!("changed passphrase of wallet {}", wallet_id);
        Ok(())
    }

    /// Draws indices from `rng` until `exists` rejects one, within the configured bound.
    fn unique_index(
        &self,
        rng: &mut StdRng,
        flag: u32,
        mut exists: impl FnMut(u32) -> Result<bool, WalletError>,
    ) -> Result<u32, WalletError> {
        for _ in 0..self.config.index_attempts {
            let index = flag | (rng.next_u32() & !HARDENED);
            if !exists(index)? {
                return Ok(index);
            }
            log_warn!("index {:#010x} already taken; drawing another", index);
        }
        Err(WalletError::IndexExhausted)
    }

    /// Picks an address index unused both durably and among pending insertions.
    fn generate_address(
        &self,
        snapshot: &WalletSnapshot,
        rng: &mut StdRng,
        root: &RootSecret,
        account_id: &AccountId,
    ) -> Result<AddressMeta, WalletError> {
        let mut taken: HashSet<u32> = snapshot
            .account_addresses(account_id)?
            .iter()
            .map(|meta| meta.index)
            .collect();
        self.cache.fixing_cached_acc_modifier(
            snapshot,
            self.pool.as_ref(),
            account_id,
            |modifier| {
                taken.extend(modifier.account_insertions(account_id).iter().map(|m| m.index));
                Ok(())
            },
        )?;
        let index = self.unique_index(rng, 0, |index| Ok(taken.contains(&index)))?;
        let address = root.derive_address(account_id.index, index, self.config.address_version)?;
        Ok(AddressMeta {
            account: *account_id,
            index,
            address,
        })
    }
}
