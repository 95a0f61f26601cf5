use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::TxId;

pub const OUTPOINT_BYTES: usize = 36;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OutPoint {
    pub txid: TxId,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: TxId, index: u32) -> Self {
        Self { txid, index }
    }

    /// Store key: txid followed by the big-endian output index, so outputs of
    /// one transaction sort together and in order.
    pub fn key(&self) -> [u8; OUTPOINT_BYTES] {
        let mut out = [0u8; OUTPOINT_BYTES];
        out[..32].copy_from_slice(&self.txid);
        out[32..].copy_from_slice(&self.index.to_be_bytes());
        out
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.txid);
        encoder.write_u32_le(self.index);
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let txid = decoder.read_hash_le()?;
        let index = decoder.read_u32_le()?;
        Ok(Self { txid, index })
    }
}
