#![doc = include_str!("../README.md")]
#![cfg(not(doctest))]
extern crate alloc;

use core::fmt::{Debug, Display};

use bitvec::prelude::*;

mod decode;
mod encode;
pub mod rrlp;
mod schema;
pub(crate) mod util;
#[cfg(feature = "validate")]
mod validate;

pub use decode::{BitStreamReader, Decode, DecodeError, Decoded};
pub use encode::{Encode, EncodeError, Encoder};
pub use schema::{
    ChoiceType, EnumeratedType, Field, IntegerRange, Kind, Presence, Schema, SchemaError,
    Selector, SequenceOfType, SequenceType, SizeRange,
};
#[cfg(feature = "validate")]
pub use validate::{Validate, ValidationResult};

#[cfg(feature = "json")]
use serde::{de::Visitor, Deserialize, Serialize};

/// Selects the PER variant used on the wire.
///
/// The `Aligned` variant pads to octet boundaries before length determinants,
/// open types and large fields, the `Unaligned` variant never pads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub enum Mode {
    Aligned,
    #[default]
    Unaligned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub enum TagClass {
    Universal = 0,
    Application = 1,
    Context = 2,
    Private = 3,
}

/// ASN.1 tag, used to resolve CHOICE alternatives and SEQUENCE fields.
/// PER never puts tags on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct Tag {
    pub class: TagClass,
    pub number: u32,
}

impl Tag {
    pub const BOOLEAN: Tag = Tag::universal(1);
    pub const INTEGER: Tag = Tag::universal(2);
    pub const BIT_STRING: Tag = Tag::universal(3);
    pub const OCTET_STRING: Tag = Tag::universal(4);
    pub const NULL: Tag = Tag::universal(5);
    pub const ENUMERATED: Tag = Tag::universal(10);
    pub const SEQUENCE: Tag = Tag::universal(16);
    pub const IA5_STRING: Tag = Tag::universal(22);

    #[must_use]
    pub const fn new(class: TagClass, number: u32) -> Self {
        Self { class, number }
    }

    #[must_use]
    pub const fn universal(number: u32) -> Self {
        Self::new(TagClass::Universal, number)
    }

    #[must_use]
    pub const fn application(number: u32) -> Self {
        Self::new(TagClass::Application, number)
    }

    /// Context-specific tag, as assigned by `AUTOMATIC TAGS` modules
    #[must_use]
    pub const fn context(number: u32) -> Self {
        Self::new(TagClass::Context, number)
    }

    #[must_use]
    pub const fn private(number: u32) -> Self {
        Self::new(TagClass::Private, number)
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.class {
            TagClass::Universal => write!(f, "[UNIVERSAL {}]", self.number),
            TagClass::Application => write!(f, "[APPLICATION {}]", self.number),
            TagClass::Context => write!(f, "[{}]", self.number),
            TagClass::Private => write!(f, "[PRIVATE {}]", self.number),
        }
    }
}

#[cfg(feature = "json")]
struct BitsVisitor;

#[cfg(feature = "json")]
impl<'de> Visitor<'de> for BitsVisitor {
    type Value = Bits;

    fn expecting(&self, formatter: &mut core::fmt::Formatter) -> core::fmt::Result {
        formatter.write_str("a sequence of boolean values")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let mut bits = BitVec::<u8, Msb0>::new();
        while let Some(bit) = seq.next_element::<bool>()? {
            bits.push(bit);
        }
        Ok(Bits(bits))
    }
}

/// Contents of a BIT STRING value, first bit on the wire first.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Bits(pub BitVec<u8, Msb0>);

impl Bits {
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for Bits {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for Bits {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("'")?;
        for bit in self.0.iter().by_vals() {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        f.write_str("'B")
    }
}

impl From<&[bool]> for Bits {
    fn from(value: &[bool]) -> Self {
        Bits(value.iter().collect())
    }
}

impl From<&BitSlice<u8, Msb0>> for Bits {
    fn from(value: &BitSlice<u8, Msb0>) -> Self {
        Bits(value.to_bitvec())
    }
}

#[cfg(feature = "json")]
impl<'de> Deserialize<'de> for Bits {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(BitsVisitor)
    }
}

#[cfg(feature = "json")]
impl Serialize for Bits {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_seq(self.0.iter().map(|bit| *bit))
    }
}

#[macro_export]
macro_rules! bits {
    ($val:expr; $len:expr) => {
        $crate::Bits(bitvec::vec::BitVec::<u8, bitvec::prelude::Msb0>::repeat($val != 0, $len))
    };
    ($($val:expr),* $(,)?) => {
        $crate::Bits(bitvec::prelude::bits![u8, bitvec::prelude::Msb0; $($val),*].to_bitvec())
    };
}

/// Value of an ENUMERATED type, addressed by its position in the root or
/// extension list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct EnumeratedValue {
    pub is_extension: bool,
    pub index: usize,
}

impl EnumeratedValue {
    #[must_use]
    pub const fn root(index: usize) -> Self {
        Self {
            is_extension: false,
            index,
        }
    }

    #[must_use]
    pub const fn extension(index: usize) -> Self {
        Self {
            is_extension: true,
            index,
        }
    }
}

/// Field values of a SEQUENCE in declaration order.
/// `None` marks an absent OPTIONAL/DEFAULT field or extension addition.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct SequenceValue {
    pub root: Vec<Option<Value>>,
    pub extensions: Vec<Option<Value>>,
}

impl SequenceValue {
    #[must_use]
    pub fn new(root: Vec<Option<Value>>) -> Self {
        Self {
            root,
            extensions: vec![],
        }
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: Vec<Option<Value>>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Looks up a root or extension field by name.
    #[must_use]
    pub fn get<'v>(&'v self, schema: &SequenceType, name: &str) -> Option<&'v Value> {
        match schema.field_index(name)? {
            Selector {
                is_extension: false,
                ordinal,
            } => self.root.get(ordinal)?.as_ref(),
            Selector {
                is_extension: true,
                ordinal,
            } => self.extensions.get(ordinal)?.as_ref(),
        }
    }

    /// Like [`SequenceValue::get`], but falls back to the DEFAULT value of
    /// an absent field.
    #[must_use]
    pub fn value_or_default<'v>(&'v self, schema: &'v SequenceType, name: &str) -> Option<&'v Value> {
        self.get(schema, name).or_else(|| {
            schema
                .field(schema.field_index(name)?)
                .and_then(Field::default_value)
        })
    }

    pub(crate) fn contains_extension_values(&self) -> bool {
        self.extensions.iter().any(Option::is_some)
    }
}

/// The single populated alternative of a CHOICE value.
///
/// Ordinals restart at zero for the extension alternatives.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct ChoiceSelection {
    pub is_extension: bool,
    pub ordinal: usize,
    pub value: Box<Value>,
}

impl ChoiceSelection {
    #[must_use]
    pub fn selector(&self) -> Selector {
        Selector {
            is_extension: self.is_extension,
            ordinal: self.ordinal,
        }
    }
}

/// Value tree produced by decoding, or built programmatically for encoding.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub enum Value {
    Boolean(bool),
    Null,
    Integer(i64),
    Enumerated(EnumeratedValue),
    BitString(Bits),
    OctetString(Vec<u8>),
    Ia5String(String),
    Sequence(SequenceValue),
    SequenceOf(Vec<Value>),
    Choice(ChoiceSelection),
    /// Complete encoding of an extension alternative unknown to the schema
    Opaque(Vec<u8>),
}

impl Value {
    #[must_use]
    pub fn sequence(root: Vec<Option<Value>>) -> Self {
        Value::Sequence(SequenceValue::new(root))
    }

    #[must_use]
    pub fn choice(ordinal: usize, value: Value) -> Self {
        Value::Choice(ChoiceSelection {
            is_extension: false,
            ordinal,
            value: Box::new(value),
        })
    }

    #[must_use]
    pub fn extension_choice(ordinal: usize, value: Value) -> Self {
        Value::Choice(ChoiceSelection {
            is_extension: true,
            ordinal,
            value: Box::new(value),
        })
    }

    #[must_use]
    pub fn enumerated(index: usize) -> Self {
        Value::Enumerated(EnumeratedValue::root(index))
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "BOOLEAN",
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Enumerated(_) => "ENUMERATED",
            Value::BitString(_) => "BIT STRING",
            Value::OctetString(_) => "OCTET STRING",
            Value::Ia5String(_) => "IA5String",
            Value::Sequence(_) => "SEQUENCE",
            Value::SequenceOf(_) => "SEQUENCE OF",
            Value::Choice(_) => "CHOICE",
            Value::Opaque(_) => "open type",
        }
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    #[cfg(feature = "json")]
    pub fn to_json(&self) -> Result<String, EncodeError> {
        serde_json::to_string(self)
            .map_err(|e| EncodeError::Json(alloc::format!("Error encoding JSON: {e:?}")))
    }

    #[cfg(feature = "json")]
    pub fn from_json(json: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(json).map_err(|e| DecodeError::Json(alloc::format!("{e:?}")))
    }
}

fn write_hex(f: &mut core::fmt::Formatter<'_>, octets: &[u8]) -> core::fmt::Result {
    f.write_str("'")?;
    for octet in octets {
        write!(f, "{octet:02X}")?;
    }
    f.write_str("'H")
}

impl Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Null => f.write_str("NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Enumerated(e) if e.is_extension => write!(f, "extension {}", e.index),
            Value::Enumerated(e) => write!(f, "{}", e.index),
            Value::BitString(bits) => write!(f, "{bits}"),
            Value::OctetString(octets) => write_hex(f, octets),
            Value::Ia5String(text) => write!(f, "\"{text}\""),
            Value::Opaque(octets) => write!(f, "<{} opaque octets>", octets.len()),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Decodes one complete value of `schema` from `input`.
pub fn decode(schema: &Schema, input: &[u8], mode: Mode) -> Result<Value, DecodeError> {
    schema.decode(input, mode).map(|d| d.decoded)
}

/// Encodes `value` as a complete PER encoding of `schema`.
pub fn encode(schema: &Schema, value: &Value, mode: Mode) -> Result<Vec<u8>, EncodeError> {
    schema.encode(value, mode)
}

/// Binds a Rust type to its schema descriptor.
///
/// Implementors get [`Decode`] and [`Encode`] through [`per_type!`].
pub trait AsnType: Sized {
    fn schema() -> Result<&'static Schema, SchemaError>;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self, DecodeError>;

    /// Human-readable dump, one component per line
    fn to_indented_string(&self) -> Result<String, SchemaError> {
        Ok(Self::schema()?.to_indented_string(&self.to_value(), ""))
    }
}

#[macro_export]
macro_rules! per_type {
    ($typ:ty) => {
        impl $crate::Decode for $typ {
            fn decode(
                input: &[u8],
                mode: $crate::Mode,
            ) -> Result<$crate::Decoded<Self>, $crate::DecodeError> {
                let schema = <$typ as $crate::AsnType>::schema()?;
                let decoded = schema.decode(input, mode)?;
                Ok($crate::Decoded {
                    bytes_consumed: decoded.bytes_consumed,
                    decoded: <$typ as $crate::AsnType>::from_value(decoded.decoded)?,
                })
            }
        }

        impl $crate::Encode for $typ {
            fn encode(&self, output: &mut $crate::Encoder) -> Result<(), $crate::EncodeError> {
                <$typ as $crate::AsnType>::schema()?
                    .encode_into(&<$typ as $crate::AsnType>::to_value(self), output)
            }
        }
    };
}
