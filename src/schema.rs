use alloc::collections::BTreeMap;
use core::fmt::Display;

use thiserror::Error;

use crate::{Tag, Value};

/// Largest size bound that still uses a constrained length determinant
pub(crate) const CONSTRAINED_LENGTH_LIMIT: usize = 65_536;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Alternatives `{first}` and `{second}` of CHOICE `{choice}` share the tag {tag}")]
    DuplicateTag {
        choice: &'static str,
        tag: Tag,
        first: &'static str,
        second: &'static str,
    },
    #[error("`{name}` has an empty value range {lower}..={upper}")]
    InvalidRange {
        name: &'static str,
        lower: i64,
        upper: i64,
    },
    #[error("`{name}` has an empty size range {min}..={max}")]
    InvalidSize {
        name: &'static str,
        min: usize,
        max: usize,
    },
    #[error("CHOICE `{0}` has no root alternatives")]
    EmptyChoice(&'static str),
    #[error("ENUMERATED `{0}` has no root values")]
    EmptyEnumeration(&'static str),
}

/// Value constraint of an INTEGER.
///
/// A missing lower bound makes the integer unconstrained, regardless of the
/// upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerRange {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub extensible: bool,
}

impl IntegerRange {
    #[must_use]
    pub const fn constrained(lower: i64, upper: i64) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
            extensible: false,
        }
    }

    #[must_use]
    pub const fn semi_constrained(lower: i64) -> Self {
        Self {
            lower: Some(lower),
            upper: None,
            extensible: false,
        }
    }

    #[must_use]
    pub const fn unconstrained() -> Self {
        Self {
            lower: None,
            upper: None,
            extensible: false,
        }
    }

    #[must_use]
    pub const fn extensible(mut self) -> Self {
        self.extensible = true;
        self
    }

    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        self.lower.map_or(true, |lower| value >= lower)
            && self.upper.map_or(true, |upper| value <= upper)
    }
}

impl Display for IntegerRange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match (self.lower, self.upper) {
            (Some(lower), Some(upper)) => write!(f, "{lower}..={upper}")?,
            (Some(lower), None) => write!(f, "{lower}..")?,
            (None, Some(upper)) => write!(f, "..={upper}")?,
            (None, None) => f.write_str("..")?,
        }
        if self.extensible {
            f.write_str(", ...")?;
        }
        Ok(())
    }
}

/// Size constraint of a BIT STRING, OCTET STRING, IA5String or SEQUENCE OF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeRange {
    pub min: usize,
    pub max: Option<usize>,
    pub extensible: bool,
}

impl SizeRange {
    #[must_use]
    pub const fn new(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
            extensible: false,
        }
    }

    #[must_use]
    pub const fn fixed(size: usize) -> Self {
        Self::new(size, size)
    }

    #[must_use]
    pub const fn at_least(min: usize) -> Self {
        Self {
            min,
            max: None,
            extensible: false,
        }
    }

    #[must_use]
    pub const fn unbounded() -> Self {
        Self::at_least(0)
    }

    #[must_use]
    pub const fn extensible(mut self) -> Self {
        self.extensible = true;
        self
    }

    #[must_use]
    pub fn contains(&self, size: usize) -> bool {
        size >= self.min && self.max.map_or(true, |max| size <= max)
    }

    /// Size that needs no length determinant at all
    pub(crate) fn fixed_size(&self) -> Option<usize> {
        match self.max {
            Some(max) if max == self.min && max < CONSTRAINED_LENGTH_LIMIT => Some(max),
            _ => None,
        }
    }

    /// Upper bound that allows a constrained length determinant
    pub(crate) fn constrained_upper(&self) -> Option<usize> {
        self.max.filter(|max| *max < CONSTRAINED_LENGTH_LIMIT)
    }
}

impl Display for SizeRange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.max {
            Some(max) => write!(f, "SIZE({}..{max}", self.min)?,
            None => write!(f, "SIZE({}..MAX", self.min)?,
        }
        if self.extensible {
            f.write_str(", ...")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratedType {
    /// Root identifiers ordered by their enumeration value, never empty
    pub(crate) root: Vec<&'static str>,
    pub(crate) extensions: Vec<&'static str>,
    pub(crate) extensible: bool,
}

impl EnumeratedType {
    #[must_use]
    pub fn root(&self) -> &[&'static str] {
        &self.root
    }

    #[must_use]
    pub fn extensions(&self) -> &[&'static str] {
        &self.extensions
    }

    #[must_use]
    pub fn is_extensible(&self) -> bool {
        self.extensible
    }

    /// Largest root index
    pub(crate) fn root_upper(&self, name: &'static str) -> Result<usize, SchemaError> {
        self.root
            .len()
            .checked_sub(1)
            .ok_or(SchemaError::EmptyEnumeration(name))
    }
}

/// Presence of a SEQUENCE component
#[derive(Debug, Clone, PartialEq)]
pub enum Presence {
    Required,
    Optional,
    Default(Value),
}

/// A named component of a SEQUENCE or an alternative of a CHOICE.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub tag: Option<Tag>,
    pub presence: Presence,
    pub schema: Schema,
}

impl Field {
    #[must_use]
    pub fn required(name: &'static str, schema: Schema) -> Self {
        Self {
            name,
            tag: None,
            presence: Presence::Required,
            schema,
        }
    }

    #[must_use]
    pub fn optional(name: &'static str, schema: Schema) -> Self {
        Self {
            name,
            tag: None,
            presence: Presence::Optional,
            schema,
        }
    }

    #[must_use]
    pub fn with_default(name: &'static str, schema: Schema, default: Value) -> Self {
        Self {
            name,
            tag: None,
            presence: Presence::Default(default),
            schema,
        }
    }

    /// Extension addition group `[[ ... ]]`.
    ///
    /// X.691 encodes the group exactly like an optional, non-extensible
    /// SEQUENCE of its members.
    #[must_use]
    pub fn group(name: &'static str, members: Vec<Field>) -> Self {
        Self::optional(name, Schema::sequence(name, members))
    }

    #[must_use]
    pub fn tagged(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Whether the field owns a bit in the presence bitmap
    #[must_use]
    pub fn is_optional(&self) -> bool {
        !matches!(self.presence, Presence::Required)
    }

    #[must_use]
    pub fn has_default(&self) -> bool {
        matches!(self.presence, Presence::Default(_))
    }

    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        match &self.presence {
            Presence::Default(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn possible_first_tags(&self) -> Vec<Tag> {
        match self.tag {
            Some(tag) => vec![tag],
            None => self.schema.possible_first_tags(),
        }
    }
}

/// Addresses a component by group and position within that group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selector {
    pub is_extension: bool,
    pub ordinal: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceType {
    pub(crate) fields: Vec<Field>,
    /// Extension additions, only ever non-empty with `extensible` set
    pub(crate) extensions: Vec<Field>,
    pub(crate) extensible: bool,
}

impl SequenceType {
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn extensions(&self) -> &[Field] {
        &self.extensions
    }

    #[must_use]
    pub fn is_extensible(&self) -> bool {
        self.extensible
    }

    pub(crate) fn optional_count(&self) -> usize {
        self.fields.iter().filter(|field| field.is_optional()).count()
    }

    fn selectors(&self) -> impl Iterator<Item = (Selector, &Field)> {
        let root = self.fields.iter().enumerate().map(|(ordinal, field)| {
            (
                Selector {
                    is_extension: false,
                    ordinal,
                },
                field,
            )
        });
        let extensions = self.extensions.iter().enumerate().map(|(ordinal, field)| {
            (
                Selector {
                    is_extension: true,
                    ordinal,
                },
                field,
            )
        });
        root.chain(extensions)
    }

    #[must_use]
    pub fn field(&self, selector: Selector) -> Option<&Field> {
        if selector.is_extension {
            self.extensions.get(selector.ordinal)
        } else {
            self.fields.get(selector.ordinal)
        }
    }

    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<Selector> {
        self.selectors()
            .find(|(_, field)| field.name == name)
            .map(|(selector, _)| selector)
    }

    /// Resolves the first component that may start with `tag`.
    #[must_use]
    pub fn field_for_tag(&self, tag: &Tag) -> Option<Selector> {
        self.selectors()
            .find(|(_, field)| field.possible_first_tags().contains(tag))
            .map(|(selector, _)| selector)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceOfType {
    pub element: Box<Schema>,
    pub size: SizeRange,
}

/// Alternatives of a CHOICE together with their tag table.
///
/// Only constructible through [`Schema::choice`] and
/// [`Schema::extensible_choice`], which reject alternatives sharing a tag.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceType {
    alternatives: Vec<Field>,
    extensions: Vec<Field>,
    extensible: bool,
    tags: BTreeMap<Tag, Selector>,
}

impl ChoiceType {
    fn build(
        name: &'static str,
        alternatives: Vec<Field>,
        extensions: Vec<Field>,
        extensible: bool,
    ) -> Result<Self, SchemaError> {
        if alternatives.is_empty() {
            return Err(SchemaError::EmptyChoice(name));
        }
        let mut choice = Self {
            alternatives,
            extensions,
            extensible,
            tags: BTreeMap::new(),
        };
        let mut tags = BTreeMap::new();
        for (is_extension, group) in [(false, &choice.alternatives), (true, &choice.extensions)] {
            for (ordinal, field) in group.iter().enumerate() {
                let selector = Selector {
                    is_extension,
                    ordinal,
                };
                for tag in field.possible_first_tags() {
                    if let Some(previous) = tags.insert(tag, selector) {
                        let first = choice.field(previous).map_or("?", |f| f.name);
                        return Err(SchemaError::DuplicateTag {
                            choice: name,
                            tag,
                            first,
                            second: field.name,
                        });
                    }
                }
            }
        }
        choice.tags = tags;
        Ok(choice)
    }

    #[must_use]
    pub fn alternatives(&self) -> &[Field] {
        &self.alternatives
    }

    #[must_use]
    pub fn extensions(&self) -> &[Field] {
        &self.extensions
    }

    #[must_use]
    pub fn is_extensible(&self) -> bool {
        self.extensible
    }

    #[must_use]
    pub fn field(&self, selector: Selector) -> Option<&Field> {
        if selector.is_extension {
            self.extensions.get(selector.ordinal)
        } else {
            self.alternatives.get(selector.ordinal)
        }
    }

    /// Resolves the alternative selected by `tag`.
    #[must_use]
    pub fn resolve_tag(&self, tag: &Tag) -> Option<Selector> {
        self.tags.get(tag).copied()
    }

    pub(crate) fn first_tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags.keys()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    Boolean,
    Null,
    Integer(IntegerRange),
    Enumerated(EnumeratedType),
    BitString(SizeRange),
    OctetString(SizeRange),
    Ia5String(SizeRange),
    Sequence(SequenceType),
    SequenceOf(SequenceOfType),
    Choice(ChoiceType),
}

impl Kind {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Kind::Boolean => "BOOLEAN",
            Kind::Null => "NULL",
            Kind::Integer(_) => "INTEGER",
            Kind::Enumerated(_) => "ENUMERATED",
            Kind::BitString(_) => "BIT STRING",
            Kind::OctetString(_) => "OCTET STRING",
            Kind::Ia5String(_) => "IA5String",
            Kind::Sequence(_) => "SEQUENCE",
            Kind::SequenceOf(_) => "SEQUENCE OF",
            Kind::Choice(_) => "CHOICE",
        }
    }

    fn universal_tag(&self) -> Option<Tag> {
        match self {
            Kind::Boolean => Some(Tag::BOOLEAN),
            Kind::Null => Some(Tag::NULL),
            Kind::Integer(_) => Some(Tag::INTEGER),
            Kind::Enumerated(_) => Some(Tag::ENUMERATED),
            Kind::BitString(_) => Some(Tag::BIT_STRING),
            Kind::OctetString(_) => Some(Tag::OCTET_STRING),
            Kind::Ia5String(_) => Some(Tag::IA5_STRING),
            Kind::Sequence(_) | Kind::SequenceOf(_) => Some(Tag::SEQUENCE),
            Kind::Choice(_) => None,
        }
    }
}

/// Declarative descriptor of one ASN.1 type.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: &'static str,
    tag: Option<Tag>,
    kind: Kind,
}

fn check_size(name: &'static str, size: SizeRange) -> Result<SizeRange, SchemaError> {
    match size.max {
        Some(max) if max < size.min => Err(SchemaError::InvalidSize {
            name,
            min: size.min,
            max,
        }),
        _ => Ok(size),
    }
}

impl Schema {
    fn new(name: &'static str, kind: Kind) -> Self {
        Self {
            name,
            tag: None,
            kind,
        }
    }

    #[must_use]
    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, Kind::Boolean)
    }

    #[must_use]
    pub fn null(name: &'static str) -> Self {
        Self::new(name, Kind::Null)
    }

    /// INTEGER (lower..upper)
    pub fn integer(name: &'static str, lower: i64, upper: i64) -> Result<Self, SchemaError> {
        Self::integer_with(name, IntegerRange::constrained(lower, upper))
    }

    /// INTEGER (lower..upper, ...)
    pub fn extensible_integer(
        name: &'static str,
        lower: i64,
        upper: i64,
    ) -> Result<Self, SchemaError> {
        Self::integer_with(name, IntegerRange::constrained(lower, upper).extensible())
    }

    pub fn integer_with(name: &'static str, range: IntegerRange) -> Result<Self, SchemaError> {
        match (range.lower, range.upper) {
            (Some(lower), Some(upper)) if upper < lower => {
                Err(SchemaError::InvalidRange { name, lower, upper })
            }
            _ => Ok(Self::new(name, Kind::Integer(range))),
        }
    }

    #[must_use]
    pub fn semi_constrained_integer(name: &'static str, lower: i64) -> Self {
        Self::new(name, Kind::Integer(IntegerRange::semi_constrained(lower)))
    }

    #[must_use]
    pub fn unconstrained_integer(name: &'static str) -> Self {
        Self::new(name, Kind::Integer(IntegerRange::unconstrained()))
    }

    pub fn enumerated(name: &'static str, root: &[&'static str]) -> Result<Self, SchemaError> {
        Self::enumerated_with(name, root, &[], false)
    }

    pub fn extensible_enumerated(
        name: &'static str,
        root: &[&'static str],
        extensions: &[&'static str],
    ) -> Result<Self, SchemaError> {
        Self::enumerated_with(name, root, extensions, true)
    }

    fn enumerated_with(
        name: &'static str,
        root: &[&'static str],
        extensions: &[&'static str],
        extensible: bool,
    ) -> Result<Self, SchemaError> {
        if root.is_empty() {
            return Err(SchemaError::EmptyEnumeration(name));
        }
        Ok(Self::new(
            name,
            Kind::Enumerated(EnumeratedType {
                root: root.to_vec(),
                extensions: extensions.to_vec(),
                extensible,
            }),
        ))
    }

    pub fn bit_string(name: &'static str, size: SizeRange) -> Result<Self, SchemaError> {
        Ok(Self::new(name, Kind::BitString(check_size(name, size)?)))
    }

    pub fn octet_string(name: &'static str, size: SizeRange) -> Result<Self, SchemaError> {
        Ok(Self::new(name, Kind::OctetString(check_size(name, size)?)))
    }

    pub fn ia5_string(name: &'static str, size: SizeRange) -> Result<Self, SchemaError> {
        Ok(Self::new(name, Kind::Ia5String(check_size(name, size)?)))
    }

    #[must_use]
    pub fn sequence(name: &'static str, fields: Vec<Field>) -> Self {
        Self::new(
            name,
            Kind::Sequence(SequenceType {
                fields,
                extensions: vec![],
                extensible: false,
            }),
        )
    }

    /// SEQUENCE with an extension marker; `extensions` may be empty.
    #[must_use]
    pub fn extensible_sequence(
        name: &'static str,
        fields: Vec<Field>,
        extensions: Vec<Field>,
    ) -> Self {
        Self::new(
            name,
            Kind::Sequence(SequenceType {
                fields,
                extensions,
                extensible: true,
            }),
        )
    }

    pub fn sequence_of(
        name: &'static str,
        element: Schema,
        size: SizeRange,
    ) -> Result<Self, SchemaError> {
        Ok(Self::new(
            name,
            Kind::SequenceOf(SequenceOfType {
                element: Box::new(element),
                size: check_size(name, size)?,
            }),
        ))
    }

    pub fn choice(name: &'static str, alternatives: Vec<Field>) -> Result<Self, SchemaError> {
        Ok(Self::new(
            name,
            Kind::Choice(ChoiceType::build(name, alternatives, vec![], false)?),
        ))
    }

    /// CHOICE with an extension marker; `extensions` may be empty.
    pub fn extensible_choice(
        name: &'static str,
        alternatives: Vec<Field>,
        extensions: Vec<Field>,
    ) -> Result<Self, SchemaError> {
        Ok(Self::new(
            name,
            Kind::Choice(ChoiceType::build(name, alternatives, extensions, true)?),
        ))
    }

    #[must_use]
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn tag(&self) -> Option<Tag> {
        self.tag
    }

    #[must_use]
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// Tags a value of this type may start with.
    ///
    /// Untagged CHOICE types delegate to their alternatives.
    #[must_use]
    pub fn possible_first_tags(&self) -> Vec<Tag> {
        if let Some(tag) = self.tag {
            return vec![tag];
        }
        match &self.kind {
            Kind::Choice(choice) => choice.first_tags().copied().collect(),
            kind => kind.universal_tag().into_iter().collect(),
        }
    }

    /// Debug dump of `value`, nested components indented by two spaces.
    #[must_use]
    pub fn to_indented_string(&self, value: &Value, indent: &str) -> String {
        let internal_indent = alloc::format!("{indent}  ");
        match (&self.kind, value) {
            (Kind::Sequence(sequence), Value::Sequence(fields)) => {
                let mut builder = alloc::format!("{} = {{\n", self.name);
                let dump_fields = |builder: &mut String, fields: &[Field], values: &[Option<Value>]| {
                    for (field, value) in fields.iter().zip(values) {
                        if let Some(value) = value {
                            builder.push_str(&internal_indent);
                            builder.push_str(field.name);
                            builder.push_str(" : ");
                            builder.push_str(&field.schema.to_indented_string(value, &internal_indent));
                        }
                    }
                };
                dump_fields(&mut builder, &sequence.fields, &fields.root);
                if sequence.extensible {
                    builder.push_str(&internal_indent);
                    builder.push_str("...\n");
                    dump_fields(&mut builder, &sequence.extensions, &fields.extensions);
                }
                builder.push_str(indent);
                builder.push_str("};\n");
                builder
            }
            (Kind::Choice(choice), Value::Choice(selection)) => {
                let mut builder = alloc::format!("{} = {{\n{internal_indent}", self.name);
                match choice.field(selection.selector()) {
                    Some(field) => {
                        builder.push_str(field.name);
                        builder.push_str(" : ");
                        builder.push_str(
                            &field
                                .schema
                                .to_indented_string(&selection.value, &internal_indent),
                        );
                    }
                    None => builder.push_str(&alloc::format!(
                        "extension {} : {};\n",
                        selection.ordinal, selection.value
                    )),
                }
                builder.push_str(indent);
                builder.push_str("};\n");
                builder
            }
            (Kind::SequenceOf(sequence_of), Value::SequenceOf(items)) => {
                let mut builder = alloc::format!("{} = [\n", self.name);
                for item in items {
                    builder.push_str(&internal_indent);
                    builder.push_str(
                        &sequence_of
                            .element
                            .to_indented_string(item, &internal_indent),
                    );
                }
                builder.push_str(indent);
                builder.push_str("];\n");
                builder
            }
            (Kind::Enumerated(enumerated), Value::Enumerated(selected)) => {
                let names = if selected.is_extension {
                    &enumerated.extensions
                } else {
                    &enumerated.root
                };
                match names.get(selected.index) {
                    Some(identifier) => alloc::format!("{} = {identifier};\n", self.name),
                    None => alloc::format!("{} = {value};\n", self.name),
                }
            }
            (_, value) => alloc::format!("{} = {value};\n", self.name),
        }
    }
}
