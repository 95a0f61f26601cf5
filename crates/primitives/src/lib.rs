//! Ledger value types and the byte codec shared by the wallet and explorer stores.

pub mod address;
pub mod coin;
pub mod encoding;
pub mod hash;
pub mod outpoint;

/// 32-byte digest (transaction ids, block hashes).
pub type Hash256 = [u8; 32];

pub type TxId = Hash256;

pub use address::{Address, AddressError};
pub use coin::{Coin, CoinError, MAX_COIN};
pub use hash::{hash160, sha256, sha256d, tagged_sha256};
pub use outpoint::OutPoint;

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

pub fn hex_to_bytes(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    let digits = input.as_bytes();
    let mut out = Vec::with_capacity(digits.len() / 2);
    for pair in digits.chunks_exact(2) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        out.push(((hi << 4) | lo) as u8);
    }
    Some(out)
}
