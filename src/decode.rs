use core::fmt::Debug;

use bitvec::{field::BitField, prelude::*};
use log::{debug, trace};
use nom::{bytes::streaming::take, Needed};
use nom_bitvec::BSlice;
use num::Integer;
use thiserror::Error;

use crate::{
    schema::{ChoiceType, EnumeratedType, SequenceOfType, SequenceType},
    util::{bits_for_range, range_size, signed_from_be, unsigned_from_be},
    Bits, ChoiceSelection, EnumeratedValue, IntegerRange, Kind, Mode, Schema, SchemaError,
    SequenceValue, SizeRange, Value,
};

type DecodeIn<'input> = BSlice<'input, u8, Msb0>;

/// Number of items covered by one fragment multiplier of a length determinant
pub(crate) const FRAGMENT_SIZE: usize = 16_384;

/// Returns the value of a decoding attempt
#[derive(Debug, PartialEq)]
pub struct Decoded<T: Debug + PartialEq> {
    /// indicates the number of bytes that were consumed by the decoder
    pub bytes_consumed: usize,
    /// the decoded return value
    pub decoded: T,
}

pub trait Decode: Sized + Debug + PartialEq {
    /// Decodes one complete PER encoding of the implementing type.
    /// ### Usage
    /// ```rust
    /// # use rrlp_per::{*, rrlp::ReferenceRelation};
    /// let result = ReferenceRelation::decode(&[0x80], Mode::Unaligned).unwrap();
    /// assert_eq!(
    ///   result,
    ///   Decoded {
    ///     bytes_consumed: 1,
    ///     decoded: ReferenceRelation::FirstBtsFirstSet,
    ///   }
    /// );
    /// ```
    fn decode(input: &[u8], mode: Mode) -> Result<Decoded<Self>, DecodeError>;

    fn from_per_unaligned(input: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(input, Mode::Unaligned).map(|d| d.decoded)
    }

    fn from_per_aligned(input: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(input, Mode::Aligned).map(|d| d.decoded)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Unexpected end of input: needs at least {needed} more bits")]
    TruncatedInput { needed: usize },
    #[error("Value {value} of `{name}` violates constraint {bounds}")]
    ConstraintViolation {
        name: &'static str,
        value: i128,
        bounds: alloc::string::String,
    },
    #[error("Unknown alternative of CHOICE `{choice}`: {detail}")]
    UnknownTag {
        choice: &'static str,
        detail: alloc::string::String,
    },
    #[error("Malformed length determinant: {0}")]
    MalformedLength(alloc::string::String),
    #[error("Invalid value of `{name}`: {reason}")]
    InvalidValue {
        name: &'static str,
        reason: alloc::string::String,
    },
    #[error("Decoded value does not fit the target type: {0}")]
    SchemaMismatch(alloc::string::String),
    #[error("Parser error: {0}")]
    ParserError(alloc::string::String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[cfg(feature = "json")]
    #[error("Error decoding JSON: {0}")]
    Json(alloc::string::String),
}

impl<'input> From<nom::Err<nom::error::Error<DecodeIn<'input>>>> for DecodeError {
    fn from(value: nom::Err<nom::error::Error<DecodeIn<'input>>>) -> Self {
        match value {
            nom::Err::Incomplete(Needed::Size(n)) => DecodeError::TruncatedInput { needed: n.get() },
            nom::Err::Incomplete(Needed::Unknown) => DecodeError::TruncatedInput { needed: 1 },
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                DecodeError::ParserError(alloc::format!("{:?}", e.code))
            }
        }
    }
}

/// Forward-only bit cursor over an encoded buffer.
///
/// Alignment is relative to the start of the buffer and only happens in
/// [`Mode::Aligned`].
#[derive(Debug, Clone)]
pub struct BitStreamReader<'input> {
    input: &'input BitSlice<u8, Msb0>,
    remaining: &'input BitSlice<u8, Msb0>,
    mode: Mode,
}

impl<'input> BitStreamReader<'input> {
    #[must_use]
    pub fn new(bytes: &'input [u8], mode: Mode) -> Self {
        let input = bytes.view_bits::<Msb0>();
        Self {
            input,
            remaining: input,
            mode,
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Bits consumed so far
    #[must_use]
    pub fn position(&self) -> usize {
        self.input.len() - self.remaining.len()
    }

    /// Bits left in the buffer
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    /// Octets touched so far, counting a partially read octet
    #[must_use]
    pub fn bytes_consumed(&self) -> usize {
        Integer::div_ceil(&self.position(), &8usize)
    }

    pub fn ensure_available(&self, bit_count: usize) -> Result<(), DecodeError> {
        match bit_count.checked_sub(self.remaining.len()) {
            Some(missing) if missing > 0 => Err(DecodeError::TruncatedInput { needed: missing }),
            _ => Ok(()),
        }
    }

    pub fn read_bitslice(
        &mut self,
        bit_count: usize,
    ) -> Result<&'input BitSlice<u8, Msb0>, DecodeError> {
        let (rest, taken) =
            take::<usize, DecodeIn<'input>, nom::error::Error<DecodeIn<'input>>>(bit_count)(
                DecodeIn::from(self.remaining),
            )?;
        self.remaining = rest.0;
        Ok(taken.0)
    }

    pub fn read_bit(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_bitslice(1)?[0])
    }

    /// Reads `bit_count` bits, MSB first, as an unsigned number.
    pub fn read_bits(&mut self, bit_count: usize) -> Result<u64, DecodeError> {
        if bit_count > 64 {
            return Err(DecodeError::ParserError(alloc::format!(
                "Cannot read {bit_count} bits into a 64 bit integer!"
            )));
        }
        Ok(self
            .read_bitslice(bit_count)?
            .iter()
            .by_vals()
            .fold(0u64, |acc, bit| acc << 1 | u64::from(bit)))
    }

    pub fn read_bitvec(&mut self, bit_count: usize) -> Result<BitVec<u8, Msb0>, DecodeError> {
        Ok(self.read_bitslice(bit_count)?.to_bitvec())
    }

    pub fn read_octets(&mut self, count: usize) -> Result<alloc::vec::Vec<u8>, DecodeError> {
        let bit_count = count.checked_mul(8).ok_or_else(|| {
            DecodeError::MalformedLength(alloc::format!("{count} octets exceed the address space"))
        })?;
        self.ensure_available(bit_count)?;
        Ok(self
            .read_bitslice(bit_count)?
            .chunks(8)
            .map(BitField::load_be::<u8>)
            .collect())
    }

    /// Skips padding up to the next octet boundary in ALIGNED mode.
    pub fn skip_to_byte_boundary(&mut self) -> Result<(), DecodeError> {
        if self.mode == Mode::Aligned {
            let padding = (8 - self.position() % 8) % 8;
            self.read_bitslice(padding)?;
        }
        Ok(())
    }
}

/// Length determinant read from the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Length {
    Complete(usize),
    /// more fragments follow
    Fragment(usize),
}

fn read_unconstrained_length(reader: &mut BitStreamReader<'_>) -> Result<Length, DecodeError> {
    reader.skip_to_byte_boundary()?;
    let first = reader.read_bits(8)? as usize;
    if first & 0x80 == 0 {
        Ok(Length::Complete(first))
    } else if first & 0x40 == 0 {
        let second = reader.read_bits(8)? as usize;
        Ok(Length::Complete((first & 0x3f) << 8 | second))
    } else {
        match first & 0x3f {
            m @ 1..=4 => Ok(Length::Fragment(m * FRAGMENT_SIZE)),
            m => Err(DecodeError::MalformedLength(alloc::format!(
                "Fragment multiplier {m} is outside 1..=4"
            ))),
        }
    }
}

fn read_single_length(reader: &mut BitStreamReader<'_>) -> Result<usize, DecodeError> {
    match read_unconstrained_length(reader)? {
        Length::Complete(length) => Ok(length),
        Length::Fragment(_) => Err(DecodeError::MalformedLength(
            "Unexpected fragmented length".into(),
        )),
    }
}

/// Reads fragments until a complete length terminates them, checking the
/// running count against `limit` before handing each chunk to `read_chunk`.
fn read_fragmented<'input, F>(
    reader: &mut BitStreamReader<'input>,
    name: &'static str,
    limit: Option<&SizeRange>,
    mut read_chunk: F,
) -> Result<usize, DecodeError>
where
    F: FnMut(&mut BitStreamReader<'input>, usize) -> Result<(), DecodeError>,
{
    let mut total = 0usize;
    loop {
        let length = read_unconstrained_length(reader)?;
        let (Length::Complete(count) | Length::Fragment(count)) = length;
        total = total.checked_add(count).ok_or_else(|| {
            DecodeError::MalformedLength("Accumulated length overflows".into())
        })?;
        if let Some(size) = limit {
            if size.max.is_some_and(|max| total > max) {
                return Err(size_violation(name, total, size));
            }
        }
        read_chunk(reader, count)?;
        if let Length::Complete(_) = length {
            return Ok(total);
        }
    }
}

fn size_violation(name: &'static str, count: usize, size: &SizeRange) -> DecodeError {
    DecodeError::ConstraintViolation {
        name,
        value: count as i128,
        bounds: alloc::format!("{size}"),
    }
}

/// Reads a size-constrained run of items.
///
/// `align_fixed` and `align_variable` tell whether the content of a fixed or
/// length-prefixed run starts on an octet boundary in ALIGNED mode.
fn read_sized<'input, F>(
    reader: &mut BitStreamReader<'input>,
    name: &'static str,
    size: &SizeRange,
    align_fixed: bool,
    align_variable: bool,
    mut read_chunk: F,
) -> Result<usize, DecodeError>
where
    F: FnMut(&mut BitStreamReader<'input>, usize) -> Result<(), DecodeError>,
{
    let extended = size.extensible && reader.read_bit()?;
    if extended {
        return read_fragmented(reader, name, None, read_chunk);
    }
    if let Some(count) = size.fixed_size() {
        if align_fixed {
            reader.skip_to_byte_boundary()?;
        }
        read_chunk(reader, count)?;
        return Ok(count);
    }
    if let Some(max) = size.constrained_upper() {
        let count = read_constrained_whole(reader, size.min as i128, max as i128)?;
        if count > max as i128 {
            return Err(size_violation(name, count as usize, size));
        }
        let count = count as usize;
        if align_variable && count > 0 {
            reader.skip_to_byte_boundary()?;
        }
        read_chunk(reader, count)?;
        return Ok(count);
    }
    let total = read_fragmented(reader, name, Some(size), read_chunk)?;
    if total < size.min {
        return Err(size_violation(name, total, size));
    }
    Ok(total)
}

/// Reads the offset of a constrained whole number and adds `lower`.
///
/// The result is not checked against `upper`; bit-fields may carry offsets
/// beyond the range.
fn read_constrained_whole(
    reader: &mut BitStreamReader<'_>,
    lower: i128,
    upper: i128,
) -> Result<i128, DecodeError> {
    let range = range_size(lower, upper);
    let offset = match reader.mode() {
        _ if range == 1 => 0,
        Mode::Unaligned => u128::from(reader.read_bits(bits_for_range(range))?),
        Mode::Aligned if range <= 255 => u128::from(reader.read_bits(bits_for_range(range))?),
        Mode::Aligned if range == 256 => {
            reader.skip_to_byte_boundary()?;
            u128::from(reader.read_bits(8)?)
        }
        Mode::Aligned if range <= 65_536 => {
            reader.skip_to_byte_boundary()?;
            u128::from(reader.read_bits(16)?)
        }
        Mode::Aligned => {
            let max_octets = crate::util::octets_for(range - 1);
            let octets = read_constrained_whole(reader, 1, max_octets as i128)?;
            reader.skip_to_byte_boundary()?;
            let octets = reader.read_octets(octets as usize)?;
            unsigned_from_be(&octets).ok_or_else(|| {
                DecodeError::MalformedLength(alloc::format!("{} value octets", octets.len()))
            })?
        }
    };
    Ok(lower + offset as i128)
}

fn read_semi_constrained(
    reader: &mut BitStreamReader<'_>,
    name: &'static str,
    lower: i64,
) -> Result<i64, DecodeError> {
    let length = read_single_length(reader)?;
    // offsets from a 64 bit lower bound to a 64 bit value never need more than 8 octets
    if length > 8 {
        return Err(DecodeError::InvalidValue {
            name,
            reason: alloc::format!("{length} octets do not fit a 64 bit integer"),
        });
    }
    let octets = reader.read_octets(length)?;
    unsigned_from_be(&octets)
        .and_then(|offset| i128::try_from(offset).ok())
        .and_then(|offset| offset.checked_add(lower.into()))
        .and_then(|value| i64::try_from(value).ok())
        .ok_or_else(|| DecodeError::InvalidValue {
            name,
            reason: "value does not fit a 64 bit integer".into(),
        })
}

fn read_unconstrained(reader: &mut BitStreamReader<'_>, name: &'static str) -> Result<i64, DecodeError> {
    let length = read_single_length(reader)?;
    if length == 0 {
        return Err(DecodeError::MalformedLength(alloc::format!(
            "INTEGER `{name}` with zero length"
        )));
    }
    let octets = reader.read_octets(length)?;
    signed_from_be(&octets).ok_or_else(|| DecodeError::InvalidValue {
        name,
        reason: alloc::format!("{length} octets do not fit a 64 bit integer"),
    })
}

fn read_normally_small(reader: &mut BitStreamReader<'_>, name: &'static str) -> Result<usize, DecodeError> {
    if reader.read_bit()? {
        let value = read_semi_constrained(reader, name, 0)?;
        usize::try_from(value).map_err(|_| DecodeError::InvalidValue {
            name,
            reason: alloc::format!("index {value} is out of range"),
        })
    } else {
        Ok(reader.read_bits(6)? as usize)
    }
}

/// Size of the extension addition bitmap
fn read_normally_small_length(reader: &mut BitStreamReader<'_>) -> Result<usize, DecodeError> {
    if reader.read_bit()? {
        read_single_length(reader)
    } else {
        Ok(reader.read_bits(6)? as usize + 1)
    }
}

/// Reads the octets of an open type field.
fn read_open_type(reader: &mut BitStreamReader<'_>) -> Result<alloc::vec::Vec<u8>, DecodeError> {
    let mut octets = alloc::vec![];
    read_fragmented(reader, "open type", None, |reader, count| {
        octets.extend(reader.read_octets(count)?);
        Ok(())
    })?;
    Ok(octets)
}

fn decode_integer(
    reader: &mut BitStreamReader<'_>,
    name: &'static str,
    range: &IntegerRange,
) -> Result<i64, DecodeError> {
    if range.extensible && reader.read_bit()? {
        return read_unconstrained(reader, name);
    }
    match (range.lower, range.upper) {
        (Some(lower), Some(upper)) => {
            let value = read_constrained_whole(reader, lower.into(), upper.into())?;
            i64::try_from(value)
                .ok()
                .filter(|v| range.contains(*v))
                .ok_or_else(|| DecodeError::ConstraintViolation {
                    name,
                    value,
                    bounds: alloc::format!("{range}"),
                })
        }
        (Some(lower), None) => read_semi_constrained(reader, name, lower),
        (None, _) => read_unconstrained(reader, name),
    }
}

fn decode_enumerated(
    reader: &mut BitStreamReader<'_>,
    name: &'static str,
    enumerated: &EnumeratedType,
) -> Result<EnumeratedValue, DecodeError> {
    if enumerated.extensible && reader.read_bit()? {
        let index = read_normally_small(reader, name)?;
        if index >= enumerated.extensions.len() {
            debug!("Keeping unknown extension value {index} of ENUMERATED `{name}`");
        }
        return Ok(EnumeratedValue::extension(index));
    }
    let upper = enumerated.root_upper(name)? as i128;
    let index = read_constrained_whole(reader, 0, upper)?;
    if index > upper {
        return Err(DecodeError::ConstraintViolation {
            name,
            value: index,
            bounds: alloc::format!("0..={upper}"),
        });
    }
    Ok(EnumeratedValue::root(index as usize))
}

fn decode_bit_string(
    reader: &mut BitStreamReader<'_>,
    name: &'static str,
    size: &SizeRange,
) -> Result<Bits, DecodeError> {
    let mut bits = BitVec::<u8, Msb0>::new();
    read_sized(
        reader,
        name,
        size,
        size.fixed_size().is_some_and(|n| n > 16),
        true,
        |reader, count| {
            bits.extend_from_bitslice(reader.read_bitslice(count)?);
            Ok(())
        },
    )?;
    Ok(Bits(bits))
}

fn decode_octet_string(
    reader: &mut BitStreamReader<'_>,
    name: &'static str,
    size: &SizeRange,
) -> Result<alloc::vec::Vec<u8>, DecodeError> {
    let mut octets = alloc::vec![];
    read_sized(
        reader,
        name,
        size,
        size.fixed_size().is_some_and(|n| n > 2),
        true,
        |reader, count| {
            octets.extend(reader.read_octets(count)?);
            Ok(())
        },
    )?;
    Ok(octets)
}

/// Width of one IA5String character on the wire
pub(crate) fn ia5_char_bits(mode: Mode) -> usize {
    match mode {
        Mode::Aligned => 8,
        Mode::Unaligned => 7,
    }
}

fn decode_ia5_string(
    reader: &mut BitStreamReader<'_>,
    name: &'static str,
    size: &SizeRange,
) -> Result<alloc::string::String, DecodeError> {
    let char_bits = ia5_char_bits(reader.mode());
    let mut text = alloc::string::String::new();
    read_sized(
        reader,
        name,
        size,
        size.fixed_size().is_some_and(|n| n * char_bits > 16),
        size.max.map_or(true, |max| max * char_bits > 16),
        |reader, count| {
            reader.ensure_available(count.saturating_mul(char_bits))?;
            for _ in 0..count {
                let code = reader.read_bits(char_bits)? as u8;
                if !code.is_ascii() {
                    return Err(DecodeError::InvalidValue {
                        name,
                        reason: alloc::format!("character code {code:#04x} is not IA5"),
                    });
                }
                text.push(char::from(code));
            }
            Ok(())
        },
    )?;
    Ok(text)
}

fn decode_sequence(
    reader: &mut BitStreamReader<'_>,
    name: &'static str,
    sequence: &SequenceType,
) -> Result<SequenceValue, DecodeError> {
    let has_extensions = sequence.extensible && reader.read_bit()?;
    let presence = (0..sequence.optional_count())
        .map(|_| reader.read_bit())
        .collect::<Result<alloc::vec::Vec<bool>, DecodeError>>()?;
    let mut presence = presence.into_iter();

    let mut root = alloc::vec::Vec::with_capacity(sequence.fields.len());
    for field in &sequence.fields {
        let present = !field.is_optional() || presence.next().unwrap_or(false);
        root.push(if present {
            Some(field.schema.decode_from(reader)?)
        } else {
            None
        });
    }

    let mut extensions = alloc::vec![None; sequence.extensions.len()];
    if has_extensions {
        let count = read_normally_small_length(reader)?;
        let bitmap = reader.read_bitvec(count)?;
        for index in bitmap.iter_ones() {
            let octets = read_open_type(reader)?;
            match sequence.extensions.get(index) {
                Some(field) => {
                    extensions[index] = Some(field.schema.decode_complete(&octets, reader.mode())?);
                }
                None => debug!(
                    "Skipping unknown extension addition {index} of SEQUENCE `{name}` ({} octets)",
                    octets.len()
                ),
            }
        }
    }
    Ok(SequenceValue { root, extensions })
}

fn decode_sequence_of(
    reader: &mut BitStreamReader<'_>,
    name: &'static str,
    sequence_of: &SequenceOfType,
) -> Result<alloc::vec::Vec<Value>, DecodeError> {
    let mut items = alloc::vec::Vec::new();
    read_sized(reader, name, &sequence_of.size, false, false, |reader, count| {
        items.reserve(count.min(reader.remaining()));
        for _ in 0..count {
            items.push(sequence_of.element.decode_from(reader)?);
        }
        Ok(())
    })?;
    Ok(items)
}

fn decode_choice(
    reader: &mut BitStreamReader<'_>,
    name: &'static str,
    choice: &ChoiceType,
) -> Result<ChoiceSelection, DecodeError> {
    if choice.is_extensible() && reader.read_bit()? {
        let ordinal = read_normally_small(reader, name)?;
        let octets = read_open_type(reader)?;
        let value = match choice.extensions().get(ordinal) {
            Some(field) => {
                trace!("CHOICE `{name}` selects extension `{}`", field.name);
                field.schema.decode_complete(&octets, reader.mode())?
            }
            None => {
                debug!("Keeping unknown extension alternative {ordinal} of CHOICE `{name}` opaque");
                Value::Opaque(octets)
            }
        };
        return Ok(ChoiceSelection {
            is_extension: true,
            ordinal,
            value: alloc::boxed::Box::new(value),
        });
    }
    let alternatives = choice.alternatives();
    let ordinal = read_constrained_whole(reader, 0, alternatives.len() as i128 - 1)?;
    let field = usize::try_from(ordinal)
        .ok()
        .and_then(|ordinal| alternatives.get(ordinal))
        .ok_or_else(|| DecodeError::UnknownTag {
            choice: name,
            detail: alloc::format!(
                "root index {ordinal} exceeds the {} known alternatives",
                alternatives.len()
            ),
        })?;
    trace!("CHOICE `{name}` selects `{}`", field.name);
    Ok(ChoiceSelection {
        is_extension: false,
        ordinal: ordinal as usize,
        value: alloc::boxed::Box::new(field.schema.decode_from(reader)?),
    })
}

impl Schema {
    /// Decodes one complete encoding of this type from the start of `input`.
    pub fn decode(&self, input: &[u8], mode: Mode) -> Result<Decoded<Value>, DecodeError> {
        trace!("Decoding `{}` from {} octets ({mode:?})", self.name(), input.len());
        let mut reader = BitStreamReader::new(input, mode);
        let decoded = self.decode_from(&mut reader)?;
        // an empty encoding still occupies its single zero octet
        let bytes_consumed = reader.bytes_consumed().max(usize::from(!input.is_empty()));
        Ok(Decoded {
            bytes_consumed,
            decoded,
        })
    }

    /// Decodes the value at the cursor of `reader`.
    pub fn decode_from(&self, reader: &mut BitStreamReader<'_>) -> Result<Value, DecodeError> {
        let name = self.name();
        Ok(match self.kind() {
            Kind::Boolean => Value::Boolean(reader.read_bit()?),
            Kind::Null => Value::Null,
            Kind::Integer(range) => Value::Integer(decode_integer(reader, name, range)?),
            Kind::Enumerated(enumerated) => {
                Value::Enumerated(decode_enumerated(reader, name, enumerated)?)
            }
            Kind::BitString(size) => Value::BitString(decode_bit_string(reader, name, size)?),
            Kind::OctetString(size) => Value::OctetString(decode_octet_string(reader, name, size)?),
            Kind::Ia5String(size) => Value::Ia5String(decode_ia5_string(reader, name, size)?),
            Kind::Sequence(sequence) => Value::Sequence(decode_sequence(reader, name, sequence)?),
            Kind::SequenceOf(sequence_of) => {
                Value::SequenceOf(decode_sequence_of(reader, name, sequence_of)?)
            }
            Kind::Choice(choice) => Value::Choice(decode_choice(reader, name, choice)?),
        })
    }

    /// Decodes the complete encoding carried by an open type.
    fn decode_complete(&self, octets: &[u8], mode: Mode) -> Result<Value, DecodeError> {
        self.decode_from(&mut BitStreamReader::new(octets, mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Encoder, Field, SchemaError};

    fn reader(bytes: &[u8]) -> BitStreamReader<'_> {
        BitStreamReader::new(bytes, Mode::Unaligned)
    }

    #[test]
    fn reads_bits_msb_first() {
        let mut reader = reader(&[0b1011_0001, 0xff]);
        assert!(reader.read_bit().unwrap());
        assert_eq!(reader.read_bits(3).unwrap(), 0b011);
        assert_eq!(reader.read_bits(6).unwrap(), 0b0001_11);
        assert_eq!(reader.position(), 10);
        assert_eq!(reader.remaining(), 6);
        assert_eq!(reader.bytes_consumed(), 2);
    }

    #[test]
    fn reports_truncated_input() {
        let mut reader = reader(&[0xff]);
        assert_eq!(reader.read_bits(6).unwrap(), 0x3f);
        assert!(matches!(
            reader.read_bits(3),
            Err(DecodeError::TruncatedInput { .. })
        ));
        assert_eq!(
            BitStreamReader::new(&[0x01], Mode::Unaligned).read_octets(2),
            Err(DecodeError::TruncatedInput { needed: 8 })
        );
    }

    #[test]
    fn aligns_only_in_aligned_mode() {
        let mut aligned = BitStreamReader::new(&[0x80, 0x42], Mode::Aligned);
        assert!(aligned.read_bit().unwrap());
        aligned.skip_to_byte_boundary().unwrap();
        assert_eq!(aligned.read_bits(8).unwrap(), 0x42);

        let mut unaligned = reader(&[0x80, 0x42]);
        assert!(unaligned.read_bit().unwrap());
        unaligned.skip_to_byte_boundary().unwrap();
        assert_eq!(unaligned.position(), 1);
    }

    #[test]
    fn decodes_constrained_whole_numbers() {
        let octet = Schema::integer("Octet", 0, 255).unwrap();
        assert_eq!(crate::decode(&octet, &[0xff], Mode::Unaligned), Ok(Value::Integer(255)));

        let signed = Schema::integer("Signed", -2048, 2047).unwrap();
        assert_eq!(
            crate::decode(&signed, &[0x00, 0x00], Mode::Unaligned),
            Ok(Value::Integer(-2048))
        );
        assert_eq!(
            crate::decode(&signed, &[0x0f, 0xff], Mode::Aligned),
            Ok(Value::Integer(2047))
        );

        let single = Schema::integer("Single", 7, 7).unwrap();
        assert_eq!(single.decode(&[0x00], Mode::Unaligned).unwrap().decoded, Value::Integer(7));
    }

    #[test]
    fn decodes_large_aligned_ranges_with_octet_count() {
        // 0..7559999 needs up to 3 octets: 2-bit count, alignment, octets
        let tow = Schema::integer("GPSTOW23b", 0, 7_559_999).unwrap();
        assert_eq!(
            crate::decode(&tow, &[0x40, 0x01, 0x00], Mode::Aligned),
            Ok(Value::Integer(256))
        );
    }

    #[test]
    fn rejects_offsets_beyond_upper_bound() {
        let schema = Schema::integer("Small", 0, 2).unwrap();
        assert!(matches!(
            crate::decode(&schema, &[0xc0], Mode::Unaligned),
            Err(DecodeError::ConstraintViolation { value: 3, .. })
        ));
    }

    #[test]
    fn decodes_semi_constrained_and_unconstrained_integers() {
        let semi = Schema::semi_constrained_integer("Semi", -1);
        assert_eq!(crate::decode(&semi, &[0x01, 0x00], Mode::Unaligned), Ok(Value::Integer(-1)));
        let free = Schema::unconstrained_integer("Free");
        assert_eq!(
            crate::decode(&free, &[0x02, 0xff, 0x7f], Mode::Aligned),
            Ok(Value::Integer(-129))
        );
        assert!(matches!(
            crate::decode(&free, &[0x00], Mode::Aligned),
            Err(DecodeError::MalformedLength(_))
        ));
    }

    #[test]
    fn rejects_semi_constrained_offsets_beyond_64_bits() {
        let mut all_ones = vec![16];
        all_ones.extend([0xff; 16]);
        assert!(matches!(
            crate::decode(&Schema::semi_constrained_integer("Semi", -1), &all_ones, Mode::Aligned),
            Err(DecodeError::InvalidValue { name: "Semi", .. })
        ));
        let mut near_max = vec![16, 0x7f];
        near_max.extend([0xff; 15]);
        assert!(matches!(
            crate::decode(&Schema::semi_constrained_integer("Semi", 1), &near_max, Mode::Aligned),
            Err(DecodeError::InvalidValue { name: "Semi", .. })
        ));
        // the largest offset that still lands on i64::MAX
        let mut widest = vec![8];
        widest.extend(u64::MAX.to_be_bytes());
        assert_eq!(
            crate::decode(&Schema::semi_constrained_integer("Semi", i64::MIN), &widest, Mode::Aligned),
            Ok(Value::Integer(i64::MAX))
        );
        let mut overflowing = vec![8, 0x80];
        overflowing.extend([0x00; 7]);
        assert!(matches!(
            crate::decode(&Schema::semi_constrained_integer("Semi", 0), &overflowing, Mode::Aligned),
            Err(DecodeError::InvalidValue { .. })
        ));
    }

    #[test]
    fn decodes_extensible_integers() {
        let schema = Schema::extensible_integer("Ext", 0, 7).unwrap();
        assert_eq!(crate::decode(&schema, &[0x70], Mode::Unaligned), Ok(Value::Integer(7)));
        // extension bit, then a one octet length and the value 100
        assert_eq!(
            crate::decode(&schema, &[0x80, 0x80 | 0x32, 0x00], Mode::Unaligned),
            Ok(Value::Integer(100))
        );
    }

    #[test]
    fn decodes_length_prefixed_strings() {
        let schema = Schema::octet_string("Octets", SizeRange::new(0, 7)).unwrap();
        assert_eq!(
            crate::decode(&schema, &[0x40, 0x0a, 0xbb], Mode::Aligned),
            Ok(Value::OctetString(vec![0x0a, 0xbb]))
        );
        let bits = Schema::bit_string("Flags", SizeRange::fixed(3)).unwrap();
        assert_eq!(
            crate::decode(&bits, &[0xa0], Mode::Unaligned),
            Ok(Value::BitString(crate::bits![1, 0, 1]))
        );
        let text = Schema::ia5_string("Text", SizeRange::new(1, 8)).unwrap();
        // 3-bit length "1" (count 2), then 'h' and 'i' in 7 bits each
        assert_eq!(
            crate::decode(&text, &[0x3a, 0x34, 0x80], Mode::Unaligned),
            Ok(Value::Ia5String("hi".into()))
        );
    }

    #[test]
    fn rejects_fragment_multipliers_out_of_range() {
        let schema = Schema::octet_string("Octets", SizeRange::unbounded()).unwrap();
        assert!(matches!(
            crate::decode(&schema, &[0xc5], Mode::Aligned),
            Err(DecodeError::MalformedLength(_))
        ));
    }

    #[test]
    fn decodes_fragmented_octet_strings() {
        let schema = Schema::octet_string("Big", SizeRange::unbounded()).unwrap();
        let mut input = vec![0xc1];
        input.extend(core::iter::repeat(0x5a).take(FRAGMENT_SIZE));
        input.extend([0x02, 0x01, 0x02]);
        let Value::OctetString(octets) = crate::decode(&schema, &input, Mode::Aligned).unwrap() else {
            panic!("not an octet string")
        };
        assert_eq!(octets.len(), FRAGMENT_SIZE + 2);
        assert_eq!(&octets[FRAGMENT_SIZE..], &[0x01, 0x02]);
    }

    #[test]
    fn rejects_sequence_of_counts_before_allocating() {
        let schema = Schema::sequence_of(
            "List",
            Schema::integer("Item", 0, 1).unwrap(),
            SizeRange::at_least(1),
        )
        .unwrap();
        // claims 16383 elements, but two octets hold at most a handful
        assert!(matches!(
            crate::decode(&schema, &[0xbf, 0xff], Mode::Unaligned),
            Err(DecodeError::TruncatedInput { .. })
        ));

        let bounded = Schema::sequence_of(
            "Bounded",
            Schema::integer("Item", 0, 1).unwrap(),
            SizeRange::new(1, 2),
        )
        .unwrap();
        // SIZE(1..2) has a one bit length, 0 meaning one element
        assert_eq!(
            crate::decode(&bounded, &[0x40], Mode::Unaligned),
            Ok(Value::SequenceOf(vec![Value::Integer(1)]))
        );
        let empty = Schema::sequence_of(
            "Empty",
            Schema::null("Item"),
            SizeRange::new(0, 2),
        )
        .unwrap();
        assert!(matches!(
            crate::decode(&empty, &[0xc0], Mode::Unaligned),
            Err(DecodeError::ConstraintViolation { value: 3, .. })
        ));
    }

    fn method_like() -> Result<Schema, SchemaError> {
        Schema::extensible_choice(
            "MethodLike",
            vec![
                Field::required("a", Schema::integer("A", 0, 127)?),
                Field::required("b", Schema::boolean("B")),
                Field::required("c", Schema::null("C")),
            ],
            vec![Field::required("d", Schema::integer("D", 0, 3)?)],
        )
    }

    #[test]
    fn rejects_unknown_root_alternatives() {
        let schema = method_like().unwrap();
        // extension bit 0, index 3 of 0..=2
        assert!(matches!(
            crate::decode(&schema, &[0x60], Mode::Unaligned),
            Err(DecodeError::UnknownTag { choice: "MethodLike", .. })
        ));
    }

    #[test]
    fn keeps_unknown_extension_alternatives_opaque() {
        let schema = method_like().unwrap();
        // extension bit, normally small index 5, open type of one octet
        let mut encoder = Encoder::new(Mode::Unaligned);
        encoder.write_bit(true);
        encoder.write_bits(0b000101, 7).unwrap();
        encoder.write_bits(1, 8).unwrap();
        encoder.write_bits(0x99, 8).unwrap();
        let input: Vec<u8> = encoder.into();
        assert_eq!(
            crate::decode(&schema, &input, Mode::Unaligned),
            Ok(Value::extension_choice(5, Value::Opaque(vec![0x99])))
        );
    }

    #[test]
    fn skips_unknown_extension_additions() {
        let newer = Schema::extensible_sequence(
            "Versioned",
            vec![Field::required("base", Schema::integer("Base", 0, 15).unwrap())],
            vec![
                Field::optional("one", Schema::integer("One", 0, 255).unwrap()),
                Field::optional("two", Schema::boolean("Two")),
                Field::optional("three", Schema::ia5_string("Three", SizeRange::new(1, 4)).unwrap()),
            ],
        );
        let older = Schema::extensible_sequence(
            "Versioned",
            vec![Field::required("base", Schema::integer("Base", 0, 15).unwrap())],
            vec![Field::optional("one", Schema::integer("One", 0, 255).unwrap())],
        );
        let value = Value::Sequence(
            SequenceValue::new(vec![Some(Value::Integer(9))]).with_extensions(vec![
                Some(Value::Integer(200)),
                Some(Value::Boolean(true)),
                Some(Value::Ia5String("ok".into())),
            ]),
        );
        for mode in [Mode::Aligned, Mode::Unaligned] {
            let encoded = crate::encode(&newer, &value, mode).unwrap();
            assert_eq!(
                crate::decode(&older, &encoded, mode),
                Ok(Value::Sequence(
                    SequenceValue::new(vec![Some(Value::Integer(9))])
                        .with_extensions(vec![Some(Value::Integer(200))])
                ))
            );
        }
    }

    #[test]
    fn reports_bytes_consumed() {
        let schema = Schema::integer("Nibble", 0, 15).unwrap();
        assert_eq!(
            schema.decode(&[0xf0, 0xaa], Mode::Unaligned),
            Ok(Decoded {
                bytes_consumed: 1,
                decoded: Value::Integer(15)
            })
        );
        assert_eq!(
            Schema::null("Nothing").decode(&[0x00], Mode::Aligned),
            Ok(Decoded {
                bytes_consumed: 1,
                decoded: Value::Null
            })
        );
    }
}
