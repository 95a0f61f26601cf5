use walletd_primitives::encoding::{decode, encode, DecodeError, Decoder, Encoder};
use walletd_primitives::{Address, AddressError, Coin, Hash256, OutPoint};

fn seq_hash(start: u8) -> Hash256 {
    std::array::from_fn(|i| start.wrapping_add(i as u8))
}

#[test]
fn varint_rejects_non_canonical_prefix() {
    let mut decoder = Decoder::new(&[0xfd, 0x10, 0x00]);
    assert_eq!(decoder.read_varint(), Err(DecodeError::NonCanonicalVarInt));

    let mut encoder = Encoder::new();
    encoder.write_varint(0x1234);
    let bytes = encoder.into_inner();
    assert_eq!(bytes, vec![0xfd, 0x34, 0x12]);
    assert_eq!(Decoder::new(&bytes).read_varint(), Ok(0x1234));
}

#[test]
fn hash_list_decode_checks_trailing_bytes() {
    let list = vec![seq_hash(0x00), seq_hash(0x40)];
    let mut bytes = encode(&list);
    assert_eq!(decode::<Vec<Hash256>>(&bytes), Ok(list));
    bytes.push(0);
    assert_eq!(
        decode::<Vec<Hash256>>(&bytes),
        Err(DecodeError::TrailingBytes)
    );
}

#[test]
fn coin_decode_rejects_values_above_max() {
    let bytes = u64::MAX.to_le_bytes();
    assert!(decode::<Coin>(&bytes).is_err());
    let bytes = 42u64.to_le_bytes();
    assert_eq!(decode::<Coin>(&bytes), Ok(Coin::new(42).expect("coin")));
}

#[test]
fn address_text_form_is_checksummed() {
    let address = Address::from_pubkey(0x1c, &[0x02; 33]);
    let text = address.to_string();
    assert_eq!(text.parse::<Address>(), Ok(address));

    let mut corrupted = text.into_bytes();
    let last = corrupted.len() - 1;
    corrupted[last] = if corrupted[last] == b'2' { b'3' } else { b'2' };
    let corrupted = String::from_utf8(corrupted).expect("utf8");
    assert_eq!(
        corrupted.parse::<Address>(),
        Err(AddressError::InvalidChecksum)
    );
    assert_eq!("0OIl".parse::<Address>(), Err(AddressError::InvalidCharacter));
}

#[test]
fn outpoint_keys_sort_by_txid_then_index() {
    let a = OutPoint::new(seq_hash(1), 2).key();
    let b = OutPoint::new(seq_hash(1), 256).key();
    let c = OutPoint::new(seq_hash(2), 0).key();
    assert!(a < b);
    assert!(b < c);
}
