//! Wallet identities, stored metadata records and the reconstructed read models.

use std::fmt;

use walletd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use walletd_primitives::{bytes_to_hex, hash160, hex_to_bytes, Address, Coin, TxId};

pub const WALLET_ID_BYTES: usize = 20;
pub const ACCOUNT_KEY_BYTES: usize = WALLET_ID_BYTES + 4;
pub const ADDRESS_KEY_BYTES: usize = ACCOUNT_KEY_BYTES + 4;

/// Wallet identity: hash160 of the wallet's compressed root public key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct WalletId([u8; WALLET_ID_BYTES]);

impl WalletId {
    pub fn new(bytes: [u8; WALLET_ID_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn from_root_pubkey(pubkey: &[u8]) -> Self {
        Self(hash160(pubkey))
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    pub fn parse_hex(input: &str) -> Option<Self> {
        Self::from_slice(&hex_to_bytes(input)?)
    }

    pub fn as_bytes(&self) -> &[u8; WALLET_ID_BYTES] {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bytes_to_hex(&self.0))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct AccountId {
    pub wallet_id: WalletId,
    pub index: u32,
}

impl AccountId {
    pub fn new(wallet_id: WalletId, index: u32) -> Self {
        Self { wallet_id, index }
    }

    /// Store key: wallet id then big-endian index, so a wallet's accounts share a prefix.
    pub fn key(&self) -> [u8; ACCOUNT_KEY_BYTES] {
        let mut out = [0u8; ACCOUNT_KEY_BYTES];
        out[..WALLET_ID_BYTES].copy_from_slice(self.wallet_id.as_bytes());
        out[WALLET_ID_BYTES..].copy_from_slice(&self.index.to_be_bytes());
        out
    }

    pub fn from_key(key: &[u8]) -> Option<Self> {
        if key.len() < ACCOUNT_KEY_BYTES {
            return None;
        }
        let wallet_id = WalletId::from_slice(&key[..WALLET_ID_BYTES])?;
        let index = u32::from_be_bytes(key[WALLET_ID_BYTES..ACCOUNT_KEY_BYTES].try_into().ok()?);
        Some(Self { wallet_id, index })
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.wallet_id, self.index)
    }
}

/// Uniqueness key of a wallet address: owning account plus address index.
pub type AddressKey = (AccountId, u32);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct AddressMeta {
    pub account: AccountId,
    pub index: u32,
    pub address: Address,
}

impl AddressMeta {
    pub fn key(&self) -> AddressKey {
        (self.account, self.index)
    }

    pub fn store_key(&self) -> [u8; ADDRESS_KEY_BYTES] {
        let mut out = [0u8; ADDRESS_KEY_BYTES];
        out[..ACCOUNT_KEY_BYTES].copy_from_slice(&self.account.key());
        out[ACCOUNT_KEY_BYTES..].copy_from_slice(&self.index.to_be_bytes());
        out
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Assurance {
    #[default]
    Normal,
    Strict,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WalletMeta {
    pub name: String,
    pub assurance: Assurance,
    pub unit: u8,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccountMeta {
    pub name: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccountInit {
    pub wallet_id: WalletId,
    pub meta: AccountMeta,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CustomAddressKind {
    Used,
    Change,
}

impl CustomAddressKind {
    pub fn tag(self) -> u8 {
        match self {
            CustomAddressKind::Used => b'u',
            CustomAddressKind::Change => b'c',
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UtxoEntry {
    pub address: Address,
    pub value: Coin,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxHistoryMeta {
    pub txid: TxId,
    pub time: u64,
    pub comment: String,
}

/// Stored wallet row: metadata plus the readiness flag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct WalletRecord {
    pub meta: WalletMeta,
    pub ready: bool,
}

/// Stored address row. `seq` orders an account's addresses by insertion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct AddressRecord {
    pub seq: u64,
    pub address: Address,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressView {
    pub meta: AddressMeta,
    pub balance: Coin,
    pub is_used: bool,
    pub is_change: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccountView {
    pub id: AccountId,
    pub meta: AccountMeta,
    pub addresses: Vec<AddressView>,
    pub balance: Coin,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WalletView {
    pub id: WalletId,
    pub meta: WalletMeta,
    pub ready: bool,
    pub account_count: usize,
    pub balance: Coin,
    pub has_passphrase: bool,
    pub passphrase_updated_at: u64,
}

impl Encodable for WalletMeta {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_str(&self.name);
        encoder.write_u8(match self.assurance {
            Assurance::Normal => 0,
            Assurance::Strict => 1,
        });
        encoder.write_u8(self.unit);
    }
}

impl Decodable for WalletMeta {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let name = decoder.read_var_str()?;
        let assurance = match decoder.read_u8()? {
            0 => Assurance::Normal,
            1 => Assurance::Strict,
            _ => return Err(DecodeError::InvalidData("unknown wallet assurance level")),
        };
        let unit = decoder.read_u8()?;
        Ok(Self {
            name,
            assurance,
            unit,
        })
    }
}

impl Encodable for WalletRecord {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_bool(self.ready);
        self.meta.consensus_encode(encoder);
    }
}

impl Decodable for WalletRecord {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let ready = decoder.read_bool()?;
        let meta = WalletMeta::consensus_decode(decoder)?;
        Ok(Self { meta, ready })
    }
}

impl Encodable for AccountMeta {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_str(&self.name);
    }
}

impl Decodable for AccountMeta {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            name: decoder.read_var_str()?,
        })
    }
}

impl Encodable for AddressRecord {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u64_le(self.seq);
        encoder.write_address(&self.address);
    }
}

impl Decodable for AddressRecord {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let seq = decoder.read_u64_le()?;
        let address = decoder.read_address()?;
        Ok(Self { seq, address })
    }
}

impl Encodable for UtxoEntry {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_address(&self.address);
        encoder.write_coin(self.value);
    }
}

impl Decodable for UtxoEntry {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let address = decoder.read_address()?;
        let value = decoder.read_coin()?;
        Ok(Self { address, value })
    }
}

impl Encodable for TxHistoryMeta {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.txid);
        encoder.write_u64_le(self.time);
        encoder.write_var_str(&self.comment);
    }
}

impl Decodable for TxHistoryMeta {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let txid = decoder.read_hash_le()?;
        let time = decoder.read_u64_le()?;
        let comment = decoder.read_var_str()?;
        Ok(Self { txid, time, comment })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_key_roundtrips_and_prefixes_by_wallet() {
        let wallet_id = WalletId::new([7u8; WALLET_ID_BYTES]);
        let account = AccountId::new(wallet_id, 0x8000_0001);
        let key = account.key();
        assert!(key.starts_with(wallet_id.as_bytes()));
        assert_eq!(AccountId::from_key(&key), Some(account));
        assert_eq!(AccountId::from_key(&key[..10]), None);
    }

    #[test]
    fn wallet_id_hex_roundtrip() {
        let wallet_id = WalletId::from_root_pubkey(&[3u8; 33]);
        let text = wallet_id.to_string();
        assert_eq!(text.len(), WALLET_ID_BYTES * 2);
        assert_eq!(WalletId::parse_hex(&text), Some(wallet_id));
        assert_eq!(WalletId::parse_hex("zz"), None);
    }
}
