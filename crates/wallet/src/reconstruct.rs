//! Read models built from one snapshot plus the wallet's pending modifier.

use std::collections::{HashMap, HashSet};

use walletd_primitives::coin::sum_coins;

use crate::balance::get_balance_with_mod;
use crate::db::WalletSnapshot;
use crate::error::WalletError;
use crate::keystore::find_secret_key;
use crate::modifier::AccountModifier;
use crate::service::WalletService;
use crate::types::{
    AccountId, AccountView, AddressMeta, AddressView, CustomAddressKind, WalletId, WalletView,
};

pub fn get_address(
    snapshot: &WalletSnapshot,
    modifier: &AccountModifier,
    meta: &AddressMeta,
) -> Result<AddressView, WalletError> {
    let key = meta.key();
    let balance = get_balance_with_mod(snapshot, modifier, &meta.address)?;
    let is_used =
        snapshot.is_custom_address(CustomAddressKind::Used, &meta.address)? || modifier.is_used(&key);
    let is_change = snapshot.is_custom_address(CustomAddressKind::Change, &meta.address)?
        || modifier.is_change(&key);
    Ok(AddressView {
        meta: *meta,
        balance,
        is_used,
        is_change,
    })
}

/// Durable addresses not deleted by the modifier, followed by pending-only ones.
///
/// Each `(account, index)` appears at most once.
pub fn gather_addresses(
    snapshot: &WalletSnapshot,
    modifier: &AccountModifier,
    account_id: &AccountId,
) -> Result<Vec<AddressMeta>, WalletError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for meta in snapshot.account_addresses(account_id)? {
        if modifier.is_deleted(&meta.key()) || !seen.insert(meta.key()) {
            continue;
        }
        out.push(meta);
    }
    for meta in modifier.account_insertions(account_id) {
        if seen.insert(meta.key()) {
            out.push(meta);
        }
    }
    Ok(out)
}

pub fn get_account(
    snapshot: &WalletSnapshot,
    modifier: &AccountModifier,
    account_id: &AccountId,
) -> Result<AccountView, WalletError> {
    let meta = snapshot
        .account_meta(account_id)?
        .ok_or(WalletError::NoSuchAccount(*account_id))?;
    let addresses = gather_addresses(snapshot, modifier, account_id)?
        .iter()
        .map(|address| get_address(snapshot, modifier, address))
        .collect::<Result<Vec<_>, _>>()?;
    let balance = sum_coins(addresses.iter().map(|address| address.balance))?;
    Ok(AccountView {
        id: *account_id,
        meta,
        addresses,
        balance,
    })
}

/// Groups account ids by wallet, keeping first-seen wallet order and the
/// original order inside each group.
fn group_by_wallet(ids: Vec<AccountId>) -> Vec<(WalletId, Vec<AccountId>)> {
    let mut groups: Vec<(WalletId, Vec<AccountId>)> = Vec::new();
    let mut slots: HashMap<WalletId, usize> = HashMap::new();
    for id in ids {
        let slot = *slots.entry(id.wallet_id).or_insert_with(|| {
            groups.push((id.wallet_id, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(id);
    }
    groups
}

impl WalletService {
    fn wallet_accounts(
        &self,
        snapshot: &WalletSnapshot,
        wallet_id: &WalletId,
        ids: &[AccountId],
    ) -> Result<Vec<AccountView>, WalletError> {
        self.cache
            .fix_cached_acc_modifier_for(snapshot, self.pool.as_ref(), wallet_id, |modifier| {
                ids.iter()
                    .map(|id| get_account(snapshot, modifier, id))
                    .collect()
            })
    }

    pub fn get_wallet(
        &self,
        snapshot: &WalletSnapshot,
        include_unready: bool,
        wallet_id: &WalletId,
    ) -> Result<WalletView, WalletError> {
        let meta = snapshot
            .wallet_meta(include_unready, wallet_id)?
            .ok_or(WalletError::NoSuchWallet(*wallet_id))?;
        let ready = snapshot.is_wallet_ready(wallet_id)?;
        let account_ids = snapshot.wallet_account_ids(wallet_id)?;
        let accounts = self.wallet_accounts(snapshot, wallet_id, &account_ids)?;
        let balance = sum_coins(accounts.iter().map(|account| account.balance))?;
        let key = find_secret_key(self.keys.as_ref(), wallet_id)?
            .ok_or(WalletError::KeyNotFound(*wallet_id))?;
        let passphrase_updated_at = snapshot
            .passphrase_update_time(wallet_id)?
            .ok_or(WalletError::NoSuchWallet(*wallet_id))?;
        Ok(WalletView {
            id: *wallet_id,
            meta,
            ready,
            account_count: accounts.len(),
            balance,
            has_passphrase: !key.check_passphrase(""),
            passphrase_updated_at,
        })
    }

    pub fn list_accounts(
        &self,
        snapshot: &WalletSnapshot,
        include_unready: bool,
        wallet_filter: Option<&WalletId>,
    ) -> Result<Vec<AccountView>, WalletError> {
        let ids = match wallet_filter {
            Some(wallet_id) => {
                if snapshot.wallet_meta(include_unready, wallet_id)?.is_none() {
                    return Err(WalletError::NoSuchWallet(*wallet_id));
                }
                snapshot.wallet_account_ids(wallet_id)?
            }
            None => snapshot.account_ids(include_unready)?,
        };
        let mut out = Vec::with_capacity(ids.len());
        for (wallet_id, group) in group_by_wallet(ids) {
            out.extend(self.wallet_accounts(snapshot, &wallet_id, &group)?);
        }
        Ok(out)
    }

    pub fn list_wallets(&self, snapshot: &WalletSnapshot) -> Result<Vec<WalletView>, WalletError> {
        snapshot
            .wallet_ids(false)?
            .iter()
            .map(|wallet_id| self.get_wallet(snapshot, false, wallet_id))
            .collect()
    }

    pub fn get_wallet_view(&self, wallet_id: &WalletId) -> Result<WalletView, WalletError> {
        self.get_wallet(&self.snapshot()?, false, wallet_id)
    }

    pub fn get_wallets(&self) -> Result<Vec<WalletView>, WalletError> {
        self.list_wallets(&self.snapshot()?)
    }

    pub fn get_accounts(&self, wallet_filter: Option<&WalletId>) -> Result<Vec<AccountView>, WalletError> {
        self.list_accounts(&self.snapshot()?, false, wallet_filter)
    }

    pub fn get_accounts_include_unready(
        &self,
        wallet_filter: Option<&WalletId>,
    ) -> Result<Vec<AccountView>, WalletError> {
        self.list_accounts(&self.snapshot()?, true, wallet_filter)
    }

    pub fn get_account_view(&self, account_id: &AccountId) -> Result<AccountView, WalletError> {
        let snapshot = self.snapshot()?;
        self.cache
            .fixing_cached_acc_modifier(&snapshot, self.pool.as_ref(), account_id, |modifier| {
                get_account(&snapshot, modifier, account_id)
            })
    }

    pub fn get_address_view(&self, meta: &AddressMeta) -> Result<AddressView, WalletError> {
        let snapshot = self.snapshot()?;
        self.cache
            .fixing_cached_acc_modifier(&snapshot, self.pool.as_ref(), &meta.account, |modifier| {
                get_address(&snapshot, modifier, meta)
            })
    }
}
