use core::ops::Range;

use bitvec::prelude::*;
use log::trace;
use num_traits::ToBytes;
use thiserror::Error;

use crate::{
    decode::{ia5_char_bits, FRAGMENT_SIZE},
    schema::{ChoiceType, EnumeratedType, SequenceOfType, SequenceType},
    util::{
        bits_for_range, minimal_signed_octets, minimal_unsigned_octets, octets_for, range_size,
        write_into_vec_right_padded,
    },
    Bits, ChoiceSelection, EnumeratedValue, IntegerRange, Kind, Mode, Schema, SchemaError,
    SequenceValue, SizeRange, Value,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("Value {value} of `{name}` violates constraint {bounds}")]
    ConstraintViolation {
        name: &'static str,
        value: i128,
        bounds: alloc::string::String,
    },
    #[error("Required field `{field}` of `{name}` is missing")]
    MissingField {
        name: &'static str,
        field: &'static str,
    },
    #[error("Unknown alternative of CHOICE `{name}`: {detail}")]
    UnknownTag {
        name: &'static str,
        detail: alloc::string::String,
    },
    #[error("Character {character:?} of `{name}` is not IA5")]
    InvalidCharacter { name: &'static str, character: char },
    #[error("`{name}` expects a {expected} value, found {found}")]
    SchemaMismatch {
        name: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Unsupported: {0}")]
    Unsupported(alloc::string::String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[cfg(feature = "json")]
    #[error("{0}")]
    Json(alloc::string::String),
}

/// Append-only bit buffer of one PER encoding.
#[derive(Debug, Default)]
pub struct Encoder {
    bits: BitVec<u8, Msb0>,
    mode: Mode,
}

impl Encoder {
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            bits: bitvec![u8, Msb0;],
            mode,
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Appends the `bit_count` least significant bits of `integer`, MSB first.
    pub fn write_as_int<I: ToBytes>(
        &mut self,
        integer: &I,
        bit_count: usize,
    ) -> Result<(), EncodeError> {
        let bytes = integer.to_be_bytes();
        let bits = bytes.as_ref().view_bits::<Msb0>();
        if bit_count > bits.len() {
            return Err(EncodeError::Unsupported(alloc::format!(
                "Cannot write {bit_count} bits of a {} bit integer",
                bits.len()
            )));
        }
        self.bits
            .extend_from_bitslice(&bits[(bits.len() - bit_count)..bits.len()]);
        Ok(())
    }

    pub fn write_bits(&mut self, value: u64, bit_count: usize) -> Result<(), EncodeError> {
        self.write_as_int(&value, bit_count)
    }

    pub fn write_bitslice(&mut self, bits: &BitSlice<u8, Msb0>) {
        self.bits.extend_from_bitslice(bits);
    }

    pub fn write_octets(&mut self, octets: &[u8]) {
        self.bits.extend_from_bitslice(octets.view_bits::<Msb0>());
    }

    /// Pads with zero bits up to the next octet boundary in ALIGNED mode.
    pub fn align(&mut self) {
        if self.mode == Mode::Aligned {
            let padding = (8 - self.bits.len() % 8) % 8;
            self.bits.resize(self.bits.len() + padding, false);
        }
    }

    /// Octets of the encoding, an empty encoding being a single zero octet.
    #[must_use]
    pub fn into_complete_encoding(self) -> alloc::vec::Vec<u8> {
        if self.bits.is_empty() {
            alloc::vec![0]
        } else {
            self.into()
        }
    }
}

impl From<Encoder> for alloc::vec::Vec<u8> {
    fn from(val: Encoder) -> Self {
        let mut vec = alloc::vec![];
        write_into_vec_right_padded(&val.bits, &mut vec);
        vec
    }
}

impl From<Encoder> for bytes::Bytes {
    fn from(val: Encoder) -> Self {
        val.into_complete_encoding().into()
    }
}

impl From<Encoder> for BitVec<u8, Msb0> {
    fn from(val: Encoder) -> Self {
        val.bits
    }
}

pub trait Encode {
    fn encode(&self, output: &mut Encoder) -> Result<(), EncodeError>;

    fn encode_to_vec(&self, mode: Mode) -> Result<alloc::vec::Vec<u8>, EncodeError> {
        let mut encoder = Encoder::new(mode);
        self.encode(&mut encoder)?;
        Ok(encoder.into_complete_encoding())
    }

    fn encode_per_unaligned(&self) -> Result<alloc::vec::Vec<u8>, EncodeError> {
        self.encode_to_vec(Mode::Unaligned)
    }

    fn encode_per_aligned(&self) -> Result<alloc::vec::Vec<u8>, EncodeError> {
        self.encode_to_vec(Mode::Aligned)
    }

    #[cfg(feature = "json")]
    fn encode_to_json(&self) -> Result<alloc::string::String, EncodeError>
    where
        Self: Sized + serde::Serialize,
    {
        serde_json::to_string(self)
            .map_err(|e| EncodeError::Json(alloc::format!("Error encoding JSON: {e:?}")))
    }
}

fn write_constrained_whole(
    output: &mut Encoder,
    value: i128,
    lower: i128,
    upper: i128,
) -> Result<(), EncodeError> {
    let range = range_size(lower, upper);
    let offset = value.abs_diff(lower);
    match output.mode() {
        _ if range == 1 => Ok(()),
        Mode::Unaligned => output.write_as_int(&offset, bits_for_range(range)),
        Mode::Aligned if range <= 255 => output.write_as_int(&offset, bits_for_range(range)),
        Mode::Aligned if range == 256 => {
            output.align();
            output.write_as_int(&offset, 8)
        }
        Mode::Aligned if range <= 65_536 => {
            output.align();
            output.write_as_int(&offset, 16)
        }
        Mode::Aligned => {
            let octets = minimal_unsigned_octets(offset);
            write_constrained_whole(
                output,
                octets.len() as i128,
                1,
                octets_for(range - 1) as i128,
            )?;
            output.align();
            output.write_octets(&octets);
            Ok(())
        }
    }
}

/// Writes a single unconstrained length determinant below 16K.
fn write_unconstrained_length(output: &mut Encoder, length: usize) -> Result<(), EncodeError> {
    output.align();
    if length < 128 {
        output.write_bits(length as u64, 8)
    } else if length < FRAGMENT_SIZE {
        output.write_bits(0x8000 | length as u64, 16)
    } else {
        Err(EncodeError::Unsupported(alloc::format!(
            "Length {length} needs fragmentation"
        )))
    }
}

/// Writes `count` items behind unconstrained length determinants, splitting
/// them into fragments of up to 64K items.
fn write_fragmented<F>(output: &mut Encoder, count: usize, mut write_chunk: F) -> Result<(), EncodeError>
where
    F: FnMut(&mut Encoder, Range<usize>) -> Result<(), EncodeError>,
{
    let mut start = 0;
    loop {
        let remaining = count - start;
        if remaining < FRAGMENT_SIZE {
            write_unconstrained_length(output, remaining)?;
            return write_chunk(output, start..count);
        }
        let multiplier = (remaining / FRAGMENT_SIZE).min(4);
        output.align();
        output.write_bits(0xc0 | multiplier as u64, 8)?;
        let end = start + multiplier * FRAGMENT_SIZE;
        write_chunk(output, start..end)?;
        start = end;
    }
}

fn size_violation(name: &'static str, count: usize, size: &SizeRange) -> EncodeError {
    EncodeError::ConstraintViolation {
        name,
        value: count as i128,
        bounds: alloc::format!("{size}"),
    }
}

/// Writes a size-constrained run of `count` items.
///
/// `align_fixed` and `align_variable` tell whether the content of a fixed or
/// length-prefixed run starts on an octet boundary in ALIGNED mode.
fn write_sized<F>(
    output: &mut Encoder,
    name: &'static str,
    size: &SizeRange,
    count: usize,
    align_fixed: bool,
    align_variable: bool,
    mut write_chunk: F,
) -> Result<(), EncodeError>
where
    F: FnMut(&mut Encoder, Range<usize>) -> Result<(), EncodeError>,
{
    let in_root = size.contains(count);
    if !in_root && !size.extensible {
        return Err(size_violation(name, count, size));
    }
    if size.extensible {
        output.write_bit(!in_root);
    }
    if in_root {
        if size.fixed_size().is_some() {
            if align_fixed {
                output.align();
            }
            return write_chunk(output, 0..count);
        }
        if let Some(max) = size.constrained_upper() {
            write_constrained_whole(output, count as i128, size.min as i128, max as i128)?;
            if align_variable && count > 0 {
                output.align();
            }
            return write_chunk(output, 0..count);
        }
    }
    write_fragmented(output, count, write_chunk)
}

fn write_semi_constrained(output: &mut Encoder, value: i64, lower: i64) -> Result<(), EncodeError> {
    let octets = minimal_unsigned_octets(value.abs_diff(lower).into());
    write_unconstrained_length(output, octets.len())?;
    output.write_octets(&octets);
    Ok(())
}

fn write_unconstrained(output: &mut Encoder, value: i64) -> Result<(), EncodeError> {
    let octets = minimal_signed_octets(&value);
    write_unconstrained_length(output, octets.len())?;
    output.write_octets(&octets);
    Ok(())
}

fn write_normally_small(output: &mut Encoder, value: usize) -> Result<(), EncodeError> {
    if value <= 63 {
        output.write_bit(false);
        output.write_bits(value as u64, 6)
    } else {
        output.write_bit(true);
        write_semi_constrained(output, value as i64, 0)
    }
}

/// Size of the extension addition bitmap, at least one
fn write_normally_small_length(output: &mut Encoder, length: usize) -> Result<(), EncodeError> {
    if length <= 64 {
        output.write_bit(false);
        output.write_bits(length as u64 - 1, 6)
    } else {
        output.write_bit(true);
        write_unconstrained_length(output, length)
    }
}

/// Writes a complete encoding as an open type field.
fn write_open_type(output: &mut Encoder, octets: &[u8]) -> Result<(), EncodeError> {
    write_fragmented(output, octets.len(), |output, range| {
        output.write_octets(&octets[range]);
        Ok(())
    })
}

fn mismatch(schema: &Schema, value: &Value) -> EncodeError {
    EncodeError::SchemaMismatch {
        name: schema.name(),
        expected: schema.kind().type_name(),
        found: value.type_name(),
    }
}

fn encode_integer(
    output: &mut Encoder,
    name: &'static str,
    range: &IntegerRange,
    value: i64,
) -> Result<(), EncodeError> {
    let in_root = range.contains(value);
    if range.extensible {
        output.write_bit(!in_root);
        if !in_root {
            return write_unconstrained(output, value);
        }
    } else if !in_root {
        return Err(EncodeError::ConstraintViolation {
            name,
            value: value.into(),
            bounds: alloc::format!("{range}"),
        });
    }
    match (range.lower, range.upper) {
        (Some(lower), Some(upper)) => {
            write_constrained_whole(output, value.into(), lower.into(), upper.into())
        }
        (Some(lower), None) => write_semi_constrained(output, value, lower),
        (None, _) => write_unconstrained(output, value),
    }
}

fn encode_enumerated(
    output: &mut Encoder,
    name: &'static str,
    enumerated: &EnumeratedType,
    value: &EnumeratedValue,
) -> Result<(), EncodeError> {
    if value.is_extension {
        if !enumerated.extensible {
            return Err(EncodeError::ConstraintViolation {
                name,
                value: value.index as i128,
                bounds: "no extension values".into(),
            });
        }
        output.write_bit(true);
        return write_normally_small(output, value.index);
    }
    let upper = enumerated.root_upper(name)?;
    if value.index > upper {
        return Err(EncodeError::ConstraintViolation {
            name,
            value: value.index as i128,
            bounds: alloc::format!("0..={upper}"),
        });
    }
    if enumerated.extensible {
        output.write_bit(false);
    }
    write_constrained_whole(output, value.index as i128, 0, upper as i128)
}

fn encode_bit_string(
    output: &mut Encoder,
    name: &'static str,
    size: &SizeRange,
    bits: &Bits,
) -> Result<(), EncodeError> {
    write_sized(
        output,
        name,
        size,
        bits.len(),
        size.fixed_size().is_some_and(|n| n > 16),
        true,
        |output, range| {
            output.write_bitslice(&bits.0[range]);
            Ok(())
        },
    )
}

fn encode_octet_string(
    output: &mut Encoder,
    name: &'static str,
    size: &SizeRange,
    octets: &[u8],
) -> Result<(), EncodeError> {
    write_sized(
        output,
        name,
        size,
        octets.len(),
        size.fixed_size().is_some_and(|n| n > 2),
        true,
        |output, range| {
            output.write_octets(&octets[range]);
            Ok(())
        },
    )
}

fn encode_ia5_string(
    output: &mut Encoder,
    name: &'static str,
    size: &SizeRange,
    text: &str,
) -> Result<(), EncodeError> {
    if let Some(character) = text.chars().find(|c| !c.is_ascii()) {
        return Err(EncodeError::InvalidCharacter { name, character });
    }
    let char_bits = ia5_char_bits(output.mode());
    let codes = text.as_bytes();
    write_sized(
        output,
        name,
        size,
        codes.len(),
        size.fixed_size().is_some_and(|n| n * char_bits > 16),
        size.max.map_or(true, |max| max * char_bits > 16),
        |output, range| {
            codes[range]
                .iter()
                .try_for_each(|code| output.write_as_int(code, char_bits))
        },
    )
}

/// Whether any value is set beyond the first `declared` slots
fn surplus(values: &[Option<Value>], declared: usize) -> bool {
    values.iter().skip(declared).any(Option::is_some)
}

fn encode_sequence(
    output: &mut Encoder,
    schema: &Schema,
    sequence: &SequenceType,
    value: &SequenceValue,
) -> Result<(), EncodeError> {
    let name = schema.name();
    let root_value = |ordinal: usize| value.root.get(ordinal).and_then(Option::as_ref);
    let extension_value = |ordinal: usize| value.extensions.get(ordinal).and_then(Option::as_ref);

    if surplus(&value.root, sequence.fields.len()) {
        return Err(EncodeError::Unsupported(alloc::format!(
            "`{name}` declares {} root components, but more values are set",
            sequence.fields.len()
        )));
    }
    let has_extensions = value.contains_extension_values();
    if has_extensions && !sequence.extensible {
        return Err(EncodeError::Unsupported(alloc::format!(
            "`{name}` has no extension marker, but extension values are set"
        )));
    }
    if surplus(&value.extensions, sequence.extensions.len()) {
        return Err(EncodeError::Unsupported(alloc::format!(
            "`{name}` declares {} extension additions, but more values are set",
            sequence.extensions.len()
        )));
    }
    if sequence.extensible {
        output.write_bit(has_extensions);
    }

    for (ordinal, field) in sequence.fields.iter().enumerate() {
        if field.is_optional() {
            output.write_bit(root_value(ordinal).is_some());
        }
    }
    for (ordinal, field) in sequence.fields.iter().enumerate() {
        match root_value(ordinal) {
            Some(value) => field.schema.encode_into(value, output)?,
            None if field.is_optional() => (),
            None => {
                return Err(EncodeError::MissingField {
                    name,
                    field: field.name,
                })
            }
        }
    }

    if has_extensions {
        write_normally_small_length(output, sequence.extensions.len())?;
        for ordinal in 0..sequence.extensions.len() {
            output.write_bit(extension_value(ordinal).is_some());
        }
        for (ordinal, field) in sequence.extensions.iter().enumerate() {
            if let Some(value) = extension_value(ordinal) {
                let octets = field.schema.encode_complete(value, output.mode())?;
                write_open_type(output, &octets)?;
            }
        }
    }
    Ok(())
}

fn encode_sequence_of(
    output: &mut Encoder,
    name: &'static str,
    sequence_of: &SequenceOfType,
    items: &[Value],
) -> Result<(), EncodeError> {
    write_sized(
        output,
        name,
        &sequence_of.size,
        items.len(),
        false,
        false,
        |output, range| {
            items[range]
                .iter()
                .try_for_each(|item| sequence_of.element.encode_into(item, output))
        },
    )
}

fn encode_choice(
    output: &mut Encoder,
    name: &'static str,
    choice: &ChoiceType,
    selection: &ChoiceSelection,
) -> Result<(), EncodeError> {
    let ordinal = selection.ordinal;
    if selection.is_extension {
        if !choice.is_extensible() {
            return Err(EncodeError::UnknownTag {
                name,
                detail: alloc::format!("extension alternative {ordinal} of a closed CHOICE"),
            });
        }
        let octets = match (choice.extensions().get(ordinal), selection.value.as_ref()) {
            (_, Value::Opaque(octets)) => octets.clone(),
            (Some(field), value) => {
                trace!("CHOICE `{name}` selects extension `{}`", field.name);
                field.schema.encode_complete(value, output.mode())?
            }
            (None, _) => {
                return Err(EncodeError::UnknownTag {
                    name,
                    detail: alloc::format!("no extension alternative {ordinal}"),
                })
            }
        };
        output.write_bit(true);
        write_normally_small(output, ordinal)?;
        return write_open_type(output, &octets);
    }
    let alternatives = choice.alternatives();
    let field = alternatives
        .get(ordinal)
        .ok_or_else(|| EncodeError::UnknownTag {
            name,
            detail: alloc::format!(
                "root index {ordinal} exceeds the {} known alternatives",
                alternatives.len()
            ),
        })?;
    trace!("CHOICE `{name}` selects `{}`", field.name);
    if choice.is_extensible() {
        output.write_bit(false);
    }
    write_constrained_whole(output, ordinal as i128, 0, alternatives.len() as i128 - 1)?;
    field.schema.encode_into(&selection.value, output)
}

impl Schema {
    /// Complete encoding of `value`.
    pub fn encode(&self, value: &Value, mode: Mode) -> Result<alloc::vec::Vec<u8>, EncodeError> {
        trace!("Encoding `{}` ({mode:?})", self.name());
        self.encode_complete(value, mode)
    }

    pub(crate) fn encode_complete(
        &self,
        value: &Value,
        mode: Mode,
    ) -> Result<alloc::vec::Vec<u8>, EncodeError> {
        let mut encoder = Encoder::new(mode);
        self.encode_into(value, &mut encoder)?;
        Ok(encoder.into_complete_encoding())
    }

    /// Appends `value` to `output` without completing the encoding.
    pub fn encode_into(&self, value: &Value, output: &mut Encoder) -> Result<(), EncodeError> {
        let name = self.name();
        match (self.kind(), value) {
            (Kind::Boolean, Value::Boolean(b)) => {
                output.write_bit(*b);
                Ok(())
            }
            (Kind::Null, Value::Null) => Ok(()),
            (Kind::Integer(range), Value::Integer(i)) => encode_integer(output, name, range, *i),
            (Kind::Enumerated(enumerated), Value::Enumerated(e)) => {
                encode_enumerated(output, name, enumerated, e)
            }
            (Kind::BitString(size), Value::BitString(bits)) => {
                encode_bit_string(output, name, size, bits)
            }
            (Kind::OctetString(size), Value::OctetString(octets)) => {
                encode_octet_string(output, name, size, octets)
            }
            (Kind::Ia5String(size), Value::Ia5String(text)) => {
                encode_ia5_string(output, name, size, text)
            }
            (Kind::Sequence(sequence), Value::Sequence(fields)) => {
                encode_sequence(output, self, sequence, fields)
            }
            (Kind::SequenceOf(sequence_of), Value::SequenceOf(items)) => {
                encode_sequence_of(output, name, sequence_of, items)
            }
            (Kind::Choice(choice), Value::Choice(selection)) => {
                encode_choice(output, name, choice, selection)
            }
            (_, value) => Err(mismatch(self, value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Field;

    fn encode_bits(schema: &Schema, value: &Value, mode: Mode) -> Bits {
        let mut encoder = Encoder::new(mode);
        schema.encode_into(value, &mut encoder).unwrap();
        Bits(encoder.into())
    }

    #[test]
    fn writes_integers_msb_first() {
        let mut encoder = Encoder::new(Mode::Unaligned);
        encoder.write_bits(0b101, 3).unwrap();
        encoder.write_as_int(&0x1ffu16, 9).unwrap();
        assert_eq!(
            Bits(BitVec::from(encoder)),
            crate::bits![1, 0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1]
        );
        assert!(matches!(
            Encoder::new(Mode::Unaligned).write_as_int(&1u8, 9),
            Err(EncodeError::Unsupported(_))
        ));
    }

    #[test]
    fn pads_complete_encodings() {
        let mut encoder = Encoder::new(Mode::Aligned);
        encoder.write_bit(true);
        encoder.align();
        assert_eq!(encoder.bit_len(), 8);
        encoder.write_bits(0b11, 2).unwrap();
        assert_eq!(encoder.into_complete_encoding(), vec![0x80, 0xc0]);
        assert_eq!(Encoder::new(Mode::Aligned).into_complete_encoding(), vec![0x00]);
        assert_eq!(
            Schema::null("Nothing").encode(&Value::Null, Mode::Unaligned),
            Ok(vec![0x00])
        );
    }

    #[test]
    fn full_octet_range_always_takes_eight_bits() {
        let schema = Schema::integer("Octet", 0, 255).unwrap();
        for value in [0, 1, 127, 255] {
            assert_eq!(
                encode_bits(&schema, &Value::Integer(value), Mode::Unaligned).len(),
                8
            );
        }
        assert_eq!(
            schema.encode(&Value::Integer(0xa5), Mode::Unaligned),
            Ok(vec![0xa5])
        );
    }

    #[test]
    fn accepts_bounds_and_rejects_neighbours() {
        let schema = Schema::integer("Doppler", -2048, 2047).unwrap();
        assert!(schema.encode(&Value::Integer(-2048), Mode::Unaligned).is_ok());
        assert!(schema.encode(&Value::Integer(2047), Mode::Aligned).is_ok());
        for value in [-2049, 2048] {
            for mode in [Mode::Aligned, Mode::Unaligned] {
                assert!(matches!(
                    schema.encode(&Value::Integer(value), mode),
                    Err(EncodeError::ConstraintViolation { name: "Doppler", .. })
                ));
            }
        }
    }

    #[test]
    fn aligns_large_constrained_numbers() {
        let pad_first = |schema: &Schema, value: i64| {
            let mut encoder = Encoder::new(Mode::Aligned);
            encoder.write_bit(true);
            schema.encode_into(&Value::Integer(value), &mut encoder).unwrap();
            alloc::vec::Vec::<u8>::from(encoder)
        };
        // bit-field, no padding
        assert_eq!(pad_first(&Schema::integer("Seven", 0, 254).unwrap(), 254), vec![0xff, 0x00]);
        // one aligned octet
        assert_eq!(pad_first(&Schema::integer("Octet", 0, 255).unwrap(), 3), vec![0x80, 0x03]);
        // two aligned octets
        assert_eq!(
            pad_first(&Schema::integer("Carrier", 0, 1023).unwrap(), 1023),
            vec![0x80, 0x03, 0xff]
        );
        // octet count 1..=3 in two bits, then aligned octets
        assert_eq!(
            pad_first(&Schema::integer("GPSTOW23b", 0, 7_559_999).unwrap(), 256),
            vec![0xa0, 0x01, 0x00]
        );
    }

    #[test]
    fn writes_semi_constrained_and_unconstrained_integers() {
        assert_eq!(
            Schema::semi_constrained_integer("Semi", 10).encode(&Value::Integer(265), Mode::Aligned),
            Ok(vec![0x01, 0xff])
        );
        assert_eq!(
            Schema::unconstrained_integer("Free").encode(&Value::Integer(-129), Mode::Unaligned),
            Ok(vec![0x02, 0xff, 0x7f])
        );
        assert!(matches!(
            Schema::semi_constrained_integer("Semi", 10).encode(&Value::Integer(9), Mode::Aligned),
            Err(EncodeError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn writes_extensible_integers() {
        let schema = Schema::extensible_integer("Ext", 0, 7).unwrap();
        assert_eq!(schema.encode(&Value::Integer(7), Mode::Unaligned), Ok(vec![0x70]));
        assert_eq!(
            schema.encode(&Value::Integer(100), Mode::Unaligned),
            Ok(vec![0x80, 0xb2, 0x00])
        );
    }

    #[test]
    fn writes_enumerated_extension_values() {
        let schema = Schema::extensible_enumerated("Env", &["bad", "notBad", "mixed"], &["new"])
            .unwrap();
        assert_eq!(
            encode_bits(&schema, &Value::enumerated(2), Mode::Unaligned),
            crate::bits![0, 1, 0]
        );
        assert_eq!(
            encode_bits(
                &schema,
                &Value::Enumerated(EnumeratedValue::extension(0)),
                Mode::Unaligned
            ),
            crate::bits![1, 0, 0, 0, 0, 0, 0, 0]
        );
        assert!(matches!(
            schema.encode(&Value::enumerated(3), Mode::Unaligned),
            Err(EncodeError::ConstraintViolation { value: 3, .. })
        ));
    }

    #[test]
    fn writes_strings_with_alignment() {
        let octets = Schema::octet_string("Octets", SizeRange::new(0, 7)).unwrap();
        let value = Value::OctetString(vec![0x0a, 0xbb]);
        assert_eq!(octets.encode(&value, Mode::Aligned), Ok(vec![0x40, 0x0a, 0xbb]));
        assert_eq!(octets.encode(&value, Mode::Unaligned), Ok(vec![0x41, 0x57, 0x60]));

        let fixed = Schema::octet_string("Pair", SizeRange::fixed(2)).unwrap();
        let mut encoder = Encoder::new(Mode::Aligned);
        encoder.write_bit(true);
        fixed.encode_into(&Value::OctetString(vec![0xff, 0xff]), &mut encoder).unwrap();
        assert_eq!(encoder.bit_len(), 17);

        let text = Schema::ia5_string("Text", SizeRange::new(1, 8)).unwrap();
        let hi = Value::Ia5String("hi".into());
        assert_eq!(text.encode(&hi, Mode::Unaligned), Ok(vec![0x3a, 0x34, 0x80]));
        // 3 bit length, padding, then two octets
        assert_eq!(text.encode(&hi, Mode::Aligned), Ok(vec![0x20, 0x68, 0x69]));
        assert_eq!(
            text.encode(&Value::Ia5String("grüß".into()), Mode::Aligned),
            Err(EncodeError::InvalidCharacter {
                name: "Text",
                character: 'ü'
            })
        );
    }

    #[test]
    fn writes_extensible_sizes() {
        let schema = Schema::bit_string("Flags", SizeRange::new(1, 2).extensible()).unwrap();
        assert_eq!(
            encode_bits(&schema, &Value::BitString(crate::bits![1, 1]), Mode::Unaligned),
            crate::bits![0, 1, 1, 1]
        );
        // outside the root: extension bit, unconstrained length 3, bits
        assert_eq!(
            encode_bits(&schema, &Value::BitString(crate::bits![1, 0, 1]), Mode::Unaligned),
            crate::bits![1, 0, 0, 0, 0, 0, 0, 1, 1, 1, 0, 1]
        );
        let closed = Schema::bit_string("Closed", SizeRange::new(1, 2)).unwrap();
        assert!(matches!(
            closed.encode(&Value::BitString(crate::bits![1, 0, 1]), Mode::Unaligned),
            Err(EncodeError::ConstraintViolation { value: 3, .. })
        ));
    }

    #[test]
    fn fragments_long_runs() {
        let schema = Schema::octet_string("Big", SizeRange::unbounded()).unwrap();
        let exact = schema
            .encode(&Value::OctetString(vec![0x5a; FRAGMENT_SIZE]), Mode::Aligned)
            .unwrap();
        assert_eq!(exact.len(), FRAGMENT_SIZE + 2);
        assert_eq!(exact[0], 0xc1);
        assert_eq!(exact[FRAGMENT_SIZE + 1], 0x00);

        let large = schema
            .encode(
                &Value::OctetString(vec![0x01; 5 * FRAGMENT_SIZE + 3]),
                Mode::Unaligned,
            )
            .unwrap();
        assert_eq!(large[0], 0xc4);
        assert_eq!(large[1 + 4 * FRAGMENT_SIZE], 0xc1);
        assert_eq!(large[2 + 5 * FRAGMENT_SIZE], 0x03);
        assert_eq!(large.len(), 5 * FRAGMENT_SIZE + 6);
        assert_eq!(
            crate::decode(&schema, &large, Mode::Unaligned),
            Ok(Value::OctetString(vec![0x01; 5 * FRAGMENT_SIZE + 3]))
        );
    }

    #[test]
    fn writes_sequence_preamble_and_extensions() {
        let schema = Schema::extensible_sequence(
            "Sample",
            vec![
                Field::optional("flag", Schema::boolean("Flag")),
                Field::required("level", Schema::integer("Level", 0, 3).unwrap()),
            ],
            vec![Field::optional("extra", Schema::integer("Extra", 0, 255).unwrap())],
        );
        assert_eq!(
            encode_bits(
                &schema,
                &Value::sequence(vec![None, Some(Value::Integer(2))]),
                Mode::Unaligned
            ),
            crate::bits![0, 0, 1, 0]
        );
        let extended = Value::Sequence(
            SequenceValue::new(vec![Some(Value::Boolean(true)), Some(Value::Integer(1))])
                .with_extensions(vec![Some(Value::Integer(0x42))]),
        );
        // preamble 1, bitmap 1, flag 1, level 01, bitmap length 000000,
        // extension bitmap 1, open type length 1 and octet 0x42
        assert_eq!(
            schema.encode(&extended, Mode::Unaligned),
            Ok(vec![0xe8, 0x08, 0x0a, 0x10])
        );
        assert_eq!(
            crate::decode(&schema, &[0xe8, 0x08, 0x0a, 0x10], Mode::Unaligned),
            Ok(extended)
        );
    }

    #[test]
    fn reports_missing_and_mismatched_fields() {
        let schema = Schema::sequence(
            "Pair",
            vec![
                Field::required("a", Schema::boolean("A")),
                Field::required("b", Schema::boolean("B")),
            ],
        );
        assert_eq!(
            schema.encode(&Value::sequence(vec![Some(Value::Boolean(true))]), Mode::Aligned),
            Err(EncodeError::MissingField {
                name: "Pair",
                field: "b"
            })
        );
        assert_eq!(
            schema.encode(&Value::Null, Mode::Aligned),
            Err(EncodeError::SchemaMismatch {
                name: "Pair",
                expected: "SEQUENCE",
                found: "NULL"
            })
        );
    }

    #[test]
    fn rejects_values_without_a_declared_component() {
        let schema = Schema::sequence("Single", vec![Field::required("flag", Schema::boolean("Flag"))]);
        let extra_root = Value::sequence(vec![Some(Value::Boolean(true)), Some(Value::Integer(5))]);
        assert!(matches!(
            schema.encode(&extra_root, Mode::Unaligned),
            Err(EncodeError::Unsupported(_))
        ));
        // trailing absent slots carry nothing and are accepted
        let padded = Value::sequence(vec![Some(Value::Boolean(true)), None]);
        assert_eq!(schema.encode(&padded, Mode::Unaligned), Ok(vec![0x80]));

        let extended = Value::Sequence(
            SequenceValue::new(vec![Some(Value::Boolean(true))])
                .with_extensions(vec![Some(Value::Boolean(false))]),
        );
        assert!(matches!(
            schema.encode(&extended, Mode::Unaligned),
            Err(EncodeError::Unsupported(_))
        ));
    }

    #[test]
    fn writes_choice_indices() {
        let schema = Schema::extensible_choice(
            "MethodLike",
            vec![
                Field::required("a", Schema::integer("A", 0, 127).unwrap()),
                Field::required("b", Schema::boolean("B")),
                Field::required("c", Schema::null("C")),
            ],
            vec![],
        )
        .unwrap();
        assert_eq!(
            encode_bits(&schema, &Value::choice(1, Value::Boolean(true)), Mode::Unaligned),
            crate::bits![0, 0, 1, 1]
        );
        assert!(matches!(
            schema.encode(&Value::choice(3, Value::Null), Mode::Unaligned),
            Err(EncodeError::UnknownTag { .. })
        ));
        assert!(matches!(
            schema.encode(&Value::extension_choice(0, Value::Null), Mode::Unaligned),
            Err(EncodeError::UnknownTag { .. })
        ));
        // opaque alternatives are written back unchanged
        let opaque = Value::extension_choice(5, Value::Opaque(vec![0x99]));
        let encoded = schema.encode(&opaque, Mode::Aligned).unwrap();
        assert_eq!(crate::decode(&schema, &encoded, Mode::Aligned), Ok(opaque));
    }
}
