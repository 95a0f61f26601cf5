//! Passphrase-encrypted wallet root keys and the shared secret-key list.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use argon2::{
    Algorithm as Argon2Algorithm, Argon2, Params as Argon2Params, Version as Argon2Version,
};
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, KeyInit};
use rand::RngCore;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use zeroize::Zeroize;

use walletd_primitives::encoding::{
    decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder,
};
use walletd_primitives::{tagged_sha256, Address};

use crate::error::WalletError;
use crate::types::WalletId;

pub const KEY_FILE_NAME: &str = "keys.dat";

const KEY_FILE_MAGIC: &[u8; 6] = b"WDKEYS";
const KEY_FILE_VERSION: u32 = 1;
const SECRET_KEY_VERSION: u8 = 1;
const SALT_BYTES: usize = 16;
const NONCE_BYTES: usize = 12;
const ROOT_PUBKEY_BYTES: usize = 33;

/// Argon2id cost settings used when sealing new keys.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KdfConfig {
    pub mem_kib: u32,
    pub iters: u32,
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            mem_kib: 64 * 1024,
            iters: 3,
            parallelism: 1,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KdfParams {
    pub mem_kib: u32,
    pub iters: u32,
    pub parallelism: u32,
    pub salt: [u8; SALT_BYTES],
}

impl KdfParams {
    fn generate(config: &KdfConfig) -> Self {
        let mut salt = [0u8; SALT_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self {
            mem_kib: config.mem_kib,
            iters: config.iters,
            parallelism: config.parallelism,
            salt,
        }
    }

    fn config(&self) -> KdfConfig {
        KdfConfig {
            mem_kib: self.mem_kib,
            iters: self.iters,
            parallelism: self.parallelism,
        }
    }

    fn derive_key(&self, passphrase: &str) -> Result<[u8; 32], WalletError> {
        let params = Argon2Params::new(self.mem_kib, self.iters, self.parallelism, Some(32))
            .map_err(|_| WalletError::InvalidData("invalid key kdf parameters"))?;
        let argon2 = Argon2::new(Argon2Algorithm::Argon2id, Argon2Version::V0x13, params);
        let mut out = [0u8; 32];
        argon2
            .hash_password_into(passphrase.as_bytes(), &self.salt, &mut out)
            .map_err(|_| WalletError::InvalidData("key derivation failed"))?;
        Ok(out)
    }
}

fn secp() -> &'static Secp256k1<secp256k1::All> {
    static SECP: OnceLock<Secp256k1<secp256k1::All>> = OnceLock::new();
    SECP.get_or_init(Secp256k1::new)
}

fn public_key_for(secret: &[u8; 32]) -> Result<[u8; ROOT_PUBKEY_BYTES], WalletError> {
    let secret_key = SecretKey::from_slice(secret)
        .map_err(|_| WalletError::InvalidData("derived secret key out of range"))?;
    Ok(PublicKey::from_secret_key(secp(), &secret_key).serialize())
}

/// Decrypted wallet root secret. Wiped on drop.
pub struct RootSecret([u8; 32]);

impl RootSecret {
    pub fn from_entropy(entropy: &[u8]) -> Self {
        Self(tagged_sha256(b"walletd/root", &[entropy]))
    }

    pub fn public_key(&self) -> Result<[u8; ROOT_PUBKEY_BYTES], WalletError> {
        public_key_for(&self.0)
    }

    pub fn wallet_id(&self) -> Result<WalletId, WalletError> {
        Ok(WalletId::from_root_pubkey(&self.public_key()?))
    }

    /// Derives the chain address at `account_index / address_index`.
    pub fn derive_address(
        &self,
        account_index: u32,
        address_index: u32,
        version: u8,
    ) -> Result<Address, WalletError> {
        let mut account = tagged_sha256(
            b"walletd/account",
            &[self.0.as_slice(), account_index.to_be_bytes().as_slice()],
        );
        let mut secret = tagged_sha256(
            b"walletd/address",
            &[account.as_slice(), address_index.to_be_bytes().as_slice()],
        );
        let pubkey = public_key_for(&secret);
        account.zeroize();
        secret.zeroize();
        Ok(Address::from_pubkey(version, &pubkey?))
    }
}

impl Drop for RootSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A wallet's root secret sealed under its passphrase.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptedSecretKey {
    wallet_id: WalletId,
    root_pubkey: [u8; ROOT_PUBKEY_BYTES],
    kdf: KdfParams,
    nonce: [u8; NONCE_BYTES],
    ciphertext: Vec<u8>,
}

fn secret_key_aad(wallet_id: &WalletId) -> Vec<u8> {
    const PREFIX: &[u8] = b"walletd-root-key-v1:";
    let mut out = Vec::with_capacity(PREFIX.len() + wallet_id.as_bytes().len());
    out.extend_from_slice(PREFIX);
    out.extend_from_slice(wallet_id.as_bytes());
    out
}

impl EncryptedSecretKey {
    /// Seals a root secret derived from `entropy`.
    pub fn generate(
        entropy: &[u8],
        passphrase: &str,
        kdf: &KdfConfig,
    ) -> Result<Self, WalletError> {
        Self::seal(&RootSecret::from_entropy(entropy), passphrase, kdf)
    }

    pub fn seal(root: &RootSecret, passphrase: &str, kdf: &KdfConfig) -> Result<Self, WalletError> {
        let root_pubkey = root.public_key()?;
        let wallet_id = WalletId::from_root_pubkey(&root_pubkey);
        let kdf = KdfParams::generate(kdf);
        let mut nonce = [0u8; NONCE_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let mut key = kdf.derive_key(passphrase)?;
        let cipher = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key));
        let aad = secret_key_aad(&wallet_id);
        let sealed = cipher.encrypt(
            chacha20poly1305::Nonce::from_slice(&nonce),
            Payload {
                msg: &root.0,
                aad: &aad,
            },
        );
        key.zeroize();
        let ciphertext = sealed.map_err(|_| WalletError::InvalidData("key encryption failed"))?;
        Ok(Self {
            wallet_id,
            root_pubkey,
            kdf,
            nonce,
            ciphertext,
        })
    }

    pub fn wallet_id(&self) -> &WalletId {
        &self.wallet_id
    }

    pub fn root_pubkey(&self) -> &[u8; ROOT_PUBKEY_BYTES] {
        &self.root_pubkey
    }

    pub fn decrypt_root_secret(&self, passphrase: &str) -> Result<RootSecret, WalletError> {
        let mut key = self.kdf.derive_key(passphrase)?;
        let cipher = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key));
        let aad = secret_key_aad(&self.wallet_id);
        let opened = cipher.decrypt(
            chacha20poly1305::Nonce::from_slice(&self.nonce),
            Payload {
                msg: &self.ciphertext,
                aad: &aad,
            },
        );
        key.zeroize();
        let mut plaintext = opened.map_err(|_| WalletError::InvalidPassphrase)?;
        let secret: Result<[u8; 32], _> = plaintext.as_slice().try_into();
        plaintext.zeroize();
        let root = RootSecret(
            secret.map_err(|_| WalletError::InvalidData("invalid root secret length"))?,
        );
        if root.public_key()? != self.root_pubkey {
            return Err(WalletError::InvalidData("root secret does not match public key"));
        }
        Ok(root)
    }

    pub fn check_passphrase(&self, passphrase: &str) -> bool {
        self.decrypt_root_secret(passphrase).is_ok()
    }

    /// Re-seals under `new_passphrase` with a fresh salt and nonce.
    ///
    /// Returns `None` when `old_passphrase` does not open the key.
    pub fn reencrypt(&self, old_passphrase: &str, new_passphrase: &str) -> Option<Self> {
        let root = self.decrypt_root_secret(old_passphrase).ok()?;
        Self::seal(&root, new_passphrase, &self.kdf.config()).ok()
    }
}

impl Encodable for EncryptedSecretKey {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(SECRET_KEY_VERSION);
        encoder.write_bytes(self.wallet_id.as_bytes());
        encoder.write_bytes(&self.root_pubkey);
        encoder.write_u32_le(self.kdf.mem_kib);
        encoder.write_u32_le(self.kdf.iters);
        encoder.write_u32_le(self.kdf.parallelism);
        encoder.write_bytes(&self.kdf.salt);
        encoder.write_bytes(&self.nonce);
        encoder.write_var_bytes(&self.ciphertext);
    }
}

impl Decodable for EncryptedSecretKey {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        if decoder.read_u8()? != SECRET_KEY_VERSION {
            return Err(DecodeError::InvalidData("unsupported secret key version"));
        }
        let wallet_id = WalletId::new(decoder.read_fixed()?);
        let root_pubkey = decoder.read_fixed()?;
        let mem_kib = decoder.read_u32_le()?;
        let iters = decoder.read_u32_le()?;
        let parallelism = decoder.read_u32_le()?;
        let salt = decoder.read_fixed()?;
        let nonce = decoder.read_fixed()?;
        let ciphertext = decoder.read_var_bytes()?;
        Ok(Self {
            wallet_id,
            root_pubkey,
            kdf: KdfParams {
                mem_kib,
                iters,
                parallelism,
                salt,
            },
            nonce,
            ciphertext,
        })
    }
}

/// Ordered, index-addressed list of sealed wallet keys.
pub trait KeyStorage: Send + Sync {
    fn secret_keys(&self) -> Result<Vec<EncryptedSecretKey>, WalletError>;

    fn add_secret_key(&self, key: EncryptedSecretKey) -> Result<(), WalletError>;

    fn delete_secret_key_at(&self, index: usize) -> Result<EncryptedSecretKey, WalletError>;

    /// Deletes the first key of `wallet_id` accepted by `predicate`.
    ///
    /// The index is resolved and removed under one lock, so concurrent deletions
    /// never act on a shifted position.
    fn delete_secret_key_matching(
        &self,
        wallet_id: &WalletId,
        predicate: &dyn Fn(&EncryptedSecretKey) -> bool,
    ) -> Result<Option<EncryptedSecretKey>, WalletError>;
}

pub fn find_secret_key(
    storage: &dyn KeyStorage,
    wallet_id: &WalletId,
) -> Result<Option<EncryptedSecretKey>, WalletError> {
    Ok(storage
        .secret_keys()?
        .into_iter()
        .find(|key| key.wallet_id() == wallet_id))
}

struct KeyFile(Vec<EncryptedSecretKey>);

impl Encodable for KeyFile {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_bytes(KEY_FILE_MAGIC);
        encoder.write_u32_le(KEY_FILE_VERSION);
        encoder.write_varint(self.0.len() as u64);
        for key in &self.0 {
            key.consensus_encode(encoder);
        }
    }
}

impl Decodable for KeyFile {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let magic: [u8; 6] = decoder.read_fixed()?;
        if &magic != KEY_FILE_MAGIC {
            return Err(DecodeError::InvalidData("not a key file"));
        }
        if decoder.read_u32_le()? != KEY_FILE_VERSION {
            return Err(DecodeError::InvalidData("unsupported key file version"));
        }
        let count = decoder.read_varint()?;
        let mut keys = Vec::new();
        for _ in 0..count {
            keys.push(EncryptedSecretKey::consensus_decode(decoder)?);
        }
        Ok(Self(keys))
    }
}

/// In-process key list, optionally persisted to a key file after every change.
pub struct KeyList {
    keys: Mutex<Vec<EncryptedSecretKey>>,
    path: Option<PathBuf>,
}

impl KeyList {
    pub fn in_memory() -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
            path: None,
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, WalletError> {
        let path = path.into();
        let keys = match fs::read(&path) {
            Ok(bytes) => decode::<KeyFile>(&bytes)?.0,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            keys: Mutex::new(keys),
            path: Some(path),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<EncryptedSecretKey>>, WalletError> {
        self.keys
            .lock()
            .map_err(|_| WalletError::InvalidData("key list lock poisoned"))
    }

    fn save(&self, keys: &[EncryptedSecretKey]) -> Result<(), WalletError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        write_file_atomic(path, &encode(&KeyFile(keys.to_vec())))
    }

    fn remove_at(
        &self,
        keys: &mut Vec<EncryptedSecretKey>,
        index: usize,
    ) -> Result<EncryptedSecretKey, WalletError> {
        if index >= keys.len() {
            return Err(WalletError::InvalidData("secret key index out of range"));
        }
        let removed = keys.remove(index);
        if let Err(err) = self.save(keys) {
            keys.insert(index, removed);
            return Err(err);
        }
        Ok(removed)
    }
}

impl KeyStorage for KeyList {
    fn secret_keys(&self) -> Result<Vec<EncryptedSecretKey>, WalletError> {
        Ok(self.lock()?.clone())
    }

    fn add_secret_key(&self, key: EncryptedSecretKey) -> Result<(), WalletError> {
        let mut keys = self.lock()?;
        keys.push(key);
        if let Err(err) = self.save(&keys) {
            keys.pop();
            return Err(err);
        }
        Ok(())
    }

    fn delete_secret_key_at(&self, index: usize) -> Result<EncryptedSecretKey, WalletError> {
        let mut keys = self.lock()?;
        self.remove_at(&mut keys, index)
    }

    fn delete_secret_key_matching(
        &self,
        wallet_id: &WalletId,
        predicate: &dyn Fn(&EncryptedSecretKey) -> bool,
    ) -> Result<Option<EncryptedSecretKey>, WalletError> {
        let mut keys = self.lock()?;
        let Some(index) = keys
            .iter()
            .position(|key| key.wallet_id() == wallet_id && predicate(key))
        else {
            return Ok(None);
        };
        self.remove_at(&mut keys, index).map(Some)
    }
}

fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<(), WalletError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    if fs::rename(&tmp, path).is_err() {
        let _ = fs::remove_file(path);
        fs::rename(&tmp, path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST_KDF: KdfConfig = KdfConfig {
        mem_kib: 64,
        iters: 1,
        parallelism: 1,
    };

    #[test]
    fn passphrase_round_trip_and_rejection() {
        let key = EncryptedSecretKey::generate(b"seed-one", "hunter2", &FAST_KDF).expect("seal");
        assert!(key.check_passphrase("hunter2"));
        assert!(!key.check_passphrase(""));
        assert!(matches!(
            key.decrypt_root_secret("wrong"),
            Err(WalletError::InvalidPassphrase)
        ));
        let expected = RootSecret::from_entropy(b"seed-one")
            .wallet_id()
            .expect("wallet id");
        assert_eq!(key.wallet_id(), &expected);
    }

    #[test]
    fn reencrypt_requires_old_passphrase() {
        let key = EncryptedSecretKey::generate(b"seed-two", "", &FAST_KDF).expect("seal");
        assert!(key.reencrypt("nope", "new").is_none());
        let rotated = key.reencrypt("", "new").expect("reencrypt");
        assert!(rotated.check_passphrase("new"));
        assert!(!rotated.check_passphrase(""));
        assert_eq!(rotated.wallet_id(), key.wallet_id());
        assert_eq!(rotated.root_pubkey(), key.root_pubkey());
    }

    #[test]
    fn derived_addresses_are_distinct_per_index() {
        let root = RootSecret::from_entropy(b"seed-three");
        let a = root.derive_address(0, 0, 0x1c).expect("derive");
        let b = root.derive_address(0, 1, 0x1c).expect("derive");
        let c = root.derive_address(1, 0, 0x1c).expect("derive");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, root.derive_address(0, 0, 0x1c).expect("derive"));
    }

    #[test]
    fn key_list_persists_and_deletes_by_match() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(KEY_FILE_NAME);
        let first = EncryptedSecretKey::generate(b"a", "pa", &FAST_KDF).expect("seal");
        let second = EncryptedSecretKey::generate(b"b", "pb", &FAST_KDF).expect("seal");
        {
            let list = KeyList::open(&path).expect("open");
            list.add_secret_key(first.clone()).expect("add");
            list.add_secret_key(second.clone()).expect("add");
        }

        let list = KeyList::open(&path).expect("reopen");
        assert_eq!(list.secret_keys().expect("keys"), vec![first.clone(), second.clone()]);

        let none = list
            .delete_secret_key_matching(second.wallet_id(), &|key| key.check_passphrase("pa"))
            .expect("delete");
        assert!(none.is_none());
        let removed = list
            .delete_secret_key_matching(second.wallet_id(), &|key| key.check_passphrase("pb"))
            .expect("delete");
        assert_eq!(removed, Some(second));

        let list = KeyList::open(&path).expect("reopen");
        assert_eq!(list.secret_keys().expect("keys"), vec![first]);
        assert!(list.delete_secret_key_at(5).is_err());
    }
}
