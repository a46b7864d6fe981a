use bitvec::prelude::*;
use num_traits::ToBytes;

/// Number of values in `lower..=upper`
pub(crate) fn range_size(lower: i128, upper: i128) -> u128 {
    upper.abs_diff(lower) + 1
}

/// Minimal bit-field width able to hold every offset of a range of `range` values
pub(crate) fn bits_for_range(range: u128) -> usize {
    if range <= 1 {
        0
    } else {
        (u128::BITS - (range - 1).leading_zeros()) as usize
    }
}

/// Minimal number of octets holding `value`, at least one
pub(crate) fn octets_for(value: u128) -> usize {
    let bits = (u128::BITS - value.leading_zeros()) as usize;
    num::Integer::div_ceil(&bits, &8).max(1)
}

/// Big-endian octets of `value` without leading zero octets.
pub(crate) fn minimal_unsigned_octets(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    bytes[(bytes.len() - octets_for(value))..].to_vec()
}

/// Shortest big-endian two's-complement representation of `value`.
pub(crate) fn minimal_signed_octets<I: ToBytes>(value: &I) -> Vec<u8>
where
    I::Bytes: AsRef<[u8]>,
{
    let bytes = value.to_be_bytes();
    let bytes = bytes.as_ref();
    let mut start = 0;
    while start + 1 < bytes.len() {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Interprets up to 16 octets as an unsigned big-endian number.
pub(crate) fn unsigned_from_be(octets: &[u8]) -> Option<u128> {
    if octets.len() > 16 {
        return None;
    }
    Some(
        octets
            .iter()
            .fold(0u128, |acc, octet| acc << 8 | u128::from(*octet)),
    )
}

/// Interprets up to 8 octets as a two's-complement big-endian number.
pub(crate) fn signed_from_be(octets: &[u8]) -> Option<i64> {
    if octets.is_empty() || octets.len() > 8 {
        return None;
    }
    let fill = if octets[0] & 0x80 == 0 { 0x00 } else { 0xff };
    let mut bytes = [fill; 8];
    bytes[(8 - octets.len())..].copy_from_slice(octets);
    Some(i64::from_be_bytes(bytes))
}

/// Packs `bits` into octets, padding the last octet with trailing zeros.
pub(crate) fn write_into_vec_right_padded(bits: &BitSlice<u8, Msb0>, vec: &mut Vec<u8>) {
    for chunk in bits.chunks(8) {
        let octet: u8 = chunk.load_be();
        vec.push(octet << (8 - chunk.len()));
    }
}
