//! Base58check pay-to-key-hash addresses.

use std::fmt;
use std::str::FromStr;

use crate::hash::{hash160, sha256d};

pub const ADDRESS_BYTES: usize = 21;

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressError {
    InvalidLength,
    InvalidCharacter,
    InvalidChecksum,
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::InvalidLength => write!(f, "invalid address length"),
            AddressError::InvalidCharacter => write!(f, "invalid base58 character"),
            AddressError::InvalidChecksum => write!(f, "invalid address checksum"),
        }
    }
}

impl std::error::Error for AddressError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Address {
    version: u8,
    key_hash: [u8; 20],
}

impl Address {
    pub fn new(version: u8, key_hash: [u8; 20]) -> Self {
        Self { version, key_hash }
    }

    pub fn from_pubkey(version: u8, pubkey: &[u8]) -> Self {
        Self::new(version, hash160(pubkey))
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn key_hash(&self) -> &[u8; 20] {
        &self.key_hash
    }

    pub fn to_bytes(&self) -> [u8; ADDRESS_BYTES] {
        let mut out = [0u8; ADDRESS_BYTES];
        out[0] = self.version;
        out[1..].copy_from_slice(&self.key_hash);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        if bytes.len() != ADDRESS_BYTES {
            return Err(AddressError::InvalidLength);
        }
        let mut key_hash = [0u8; 20];
        key_hash.copy_from_slice(&bytes[1..]);
        Ok(Self::new(bytes[0], key_hash))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base58check_encode(&self.to_bytes()))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let payload = base58check_decode(input)?;
        Address::from_bytes(&payload)
    }
}

fn base58check_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    let bytes = base58_decode(input)?;
    if bytes.len() < 4 {
        return Err(AddressError::InvalidLength);
    }
    let (payload, checksum) = bytes.split_at(bytes.len() - 4);
    let digest = sha256d(payload);
    if checksum != &digest[..4] {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(payload.to_vec())
}

fn base58check_encode(payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    let checksum = sha256d(payload);
    data.extend_from_slice(&checksum[..4]);
    base58_encode(&data)
}

fn base58_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    let mut bytes = Vec::new();
    for ch in input.bytes() {
        let mut carry = base58_value(ch).ok_or(AddressError::InvalidCharacter)? as u32;
        for byte in bytes.iter_mut().rev() {
            let val = (*byte as u32) * 58 + carry;
            *byte = (val & 0xff) as u8;
            carry = val >> 8;
        }
        while carry > 0 {
            bytes.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    let leading_zeros = input.bytes().take_while(|b| *b == b'1').count();
    let mut out = vec![0u8; leading_zeros];
    out.extend_from_slice(&bytes);
    Ok(out)
}

fn base58_encode(data: &[u8]) -> String {
    let mut digits = vec![0u8];
    for byte in data {
        let mut carry = *byte as u32;
        for digit in digits.iter_mut().rev() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 58) as u8;
            carry = value / 58;
        }
        while carry > 0 {
            digits.insert(0, (carry % 58) as u8);
            carry /= 58;
        }
    }
    let leading_zeros = data.iter().take_while(|b| **b == 0).count();
    let mut out = String::with_capacity(leading_zeros + digits.len());
    out.extend(std::iter::repeat('1').take(leading_zeros));
    out.extend(digits.into_iter().map(|digit| ALPHABET[digit as usize] as char));
    out
}

fn base58_value(byte: u8) -> Option<u8> {
    ALPHABET
        .iter()
        .position(|value| *value == byte)
        .map(|pos| pos as u8)
}
