use crate::{
    schema::{ChoiceType, SequenceType},
    ChoiceSelection, Kind, Schema, SequenceValue, SizeRange, Value,
};

pub trait Validate {
    /// The `Validate` trait exposes a `validate` method that checks a value
    /// against the constraints of a type without encoding it.
    /// `validate` runs the following checks:
    /// - value kinds match the type tree
    /// - integers, enumeration indices and sizes stay within their constraints
    /// - IA5String characters are ASCII
    /// - required SEQUENCE components are present
    /// - CHOICE selections address a declared alternative
    /// #### Returns
    /// - `ValidationResult::Success` if all checks passed successful
    /// - `ValidationResult::Failure { reason: String }` if a check failed
    /// - `ValidationResult::NotApplicable { info: &'static str }` if no checks could be run
    fn validate(&self, value: &Value) -> ValidationResult;
}

#[derive(Debug, PartialEq)]
pub enum ValidationResult {
    Success,
    Failure { reason: String },
    NotApplicable { info: &'static str },
}

macro_rules! validate_and_continue {
    ($schema:expr, $value:expr) => {
        match $schema.validate($value) {
            ValidationResult::Success => (),
            ValidationResult::NotApplicable { .. } => (),
            failure => return failure,
        }
    };
}

fn failure(reason: String) -> ValidationResult {
    ValidationResult::Failure { reason }
}

fn validate_size(name: &str, size: &SizeRange, count: usize) -> ValidationResult {
    if size.contains(count) || size.extensible {
        ValidationResult::Success
    } else {
        failure(format!("`{name}` has size {count}, expected {size}"))
    }
}

fn validate_sequence(schema: &Schema, sequence: &SequenceType, value: &SequenceValue) -> ValidationResult {
    if value.root.iter().skip(sequence.fields.len()).any(Option::is_some) {
        return failure(format!(
            "`{}` declares {} root components, but more values are set",
            schema.name(),
            sequence.fields.len()
        ));
    }
    for (ordinal, field) in sequence.fields.iter().enumerate() {
        match value.root.get(ordinal).and_then(Option::as_ref) {
            Some(component) => validate_and_continue!(field.schema, component),
            None if field.is_optional() => (),
            None => {
                return failure(format!(
                    "Required field `{}` of `{}` is missing",
                    field.name,
                    schema.name()
                ))
            }
        }
    }
    if value.contains_extension_values() && !sequence.extensible {
        return failure(format!("`{}` has no extension marker", schema.name()));
    }
    for (ordinal, component) in value.extensions.iter().enumerate() {
        let Some(component) = component else {
            continue;
        };
        match sequence.extensions.get(ordinal) {
            Some(field) => validate_and_continue!(field.schema, component),
            None => {
                return failure(format!(
                    "`{}` declares no extension addition {ordinal}",
                    schema.name()
                ))
            }
        }
    }
    ValidationResult::Success
}

fn validate_choice(schema: &Schema, choice: &ChoiceType, selection: &ChoiceSelection) -> ValidationResult {
    if selection.is_extension && !choice.is_extensible() {
        return failure(format!("`{}` has no extension marker", schema.name()));
    }
    match (choice.field(selection.selector()), selection.value.as_ref()) {
        (_, Value::Opaque(_)) if selection.is_extension => ValidationResult::NotApplicable {
            info: "Opaque extension alternatives are not validated.",
        },
        (Some(field), value) => field.schema.validate(value),
        (None, _) => failure(format!(
            "`{}` has no alternative {:?}",
            schema.name(),
            selection.selector()
        )),
    }
}

impl Validate for Schema {
    fn validate(&self, value: &Value) -> ValidationResult {
        let name = self.name();
        match (self.kind(), value) {
            (Kind::Boolean, Value::Boolean(_)) | (Kind::Null, Value::Null) => {
                ValidationResult::Success
            }
            (Kind::Integer(range), Value::Integer(i)) => {
                if range.contains(*i) || range.extensible {
                    ValidationResult::Success
                } else {
                    failure(format!("`{name}` value {i} is outside {range}"))
                }
            }
            (Kind::Enumerated(enumerated), Value::Enumerated(e)) => {
                let known = if e.is_extension {
                    enumerated.extensible
                } else {
                    e.index < enumerated.root.len()
                };
                if known {
                    ValidationResult::Success
                } else {
                    failure(format!("`{name}` has no value {e:?}"))
                }
            }
            (Kind::BitString(size), Value::BitString(bits)) => validate_size(name, size, bits.len()),
            (Kind::OctetString(size), Value::OctetString(octets)) => {
                validate_size(name, size, octets.len())
            }
            (Kind::Ia5String(size), Value::Ia5String(text)) => {
                match text.chars().find(|c| !c.is_ascii()) {
                    Some(c) => failure(format!("`{name}` contains the non-IA5 character {c:?}")),
                    None => validate_size(name, size, text.len()),
                }
            }
            (Kind::Sequence(sequence), Value::Sequence(fields)) => {
                validate_sequence(self, sequence, fields)
            }
            (Kind::SequenceOf(sequence_of), Value::SequenceOf(items)) => {
                match validate_size(name, &sequence_of.size, items.len()) {
                    ValidationResult::Success => (),
                    failure => return failure,
                }
                for item in items {
                    validate_and_continue!(sequence_of.element, item);
                }
                ValidationResult::Success
            }
            (Kind::Choice(choice), Value::Choice(selection)) => {
                validate_choice(self, choice, selection)
            }
            (kind, value) => failure(format!(
                "`{name}` expects a {} value, found {}",
                kind.type_name(),
                value.type_name()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Field;

    fn sample() -> Schema {
        Schema::extensible_sequence(
            "Sample",
            vec![
                Field::required("svid", Schema::integer("SatelliteID", 0, 63).unwrap()),
                Field::optional(
                    "list",
                    Schema::sequence_of(
                        "listType",
                        Schema::integer("Item", 0, 7).unwrap(),
                        SizeRange::new(1, 2),
                    )
                    .unwrap(),
                ),
            ],
            vec![],
        )
    }

    #[test]
    fn accepts_values_within_constraints() {
        let value = Value::sequence(vec![
            Some(Value::Integer(63)),
            Some(Value::SequenceOf(vec![Value::Integer(7)])),
        ]);
        assert_eq!(sample().validate(&value), ValidationResult::Success);
    }

    #[test]
    fn reports_the_first_failure() {
        let out_of_range = Value::sequence(vec![Some(Value::Integer(64)), None]);
        assert_eq!(
            sample().validate(&out_of_range),
            ValidationResult::Failure {
                reason: "`SatelliteID` value 64 is outside 0..=63".into()
            }
        );
        let too_many = Value::sequence(vec![
            Some(Value::Integer(1)),
            Some(Value::SequenceOf(vec![Value::Integer(1); 3])),
        ]);
        assert!(matches!(
            sample().validate(&too_many),
            ValidationResult::Failure { .. }
        ));
        let missing = Value::sequence(vec![None, None]);
        assert_eq!(
            sample().validate(&missing),
            ValidationResult::Failure {
                reason: "Required field `svid` of `Sample` is missing".into()
            }
        );
    }

    #[test]
    fn skips_opaque_extension_alternatives_only() {
        let schema = Schema::extensible_choice(
            "Open",
            vec![Field::required("flag", Schema::boolean("Flag"))],
            vec![],
        )
        .unwrap();
        assert!(matches!(
            schema.validate(&Value::extension_choice(4, Value::Opaque(vec![0x00]))),
            ValidationResult::NotApplicable { .. }
        ));
        assert!(matches!(
            schema.validate(&Value::choice(1, Value::Boolean(true))),
            ValidationResult::Failure { .. }
        ));
        assert_eq!(
            schema.validate(&Value::choice(0, Value::Opaque(vec![0x00]))),
            ValidationResult::Failure {
                reason: "`Flag` expects a BOOLEAN value, found open type".into()
            }
        );
        assert!(matches!(
            sample().validate(&Value::sequence(vec![Some(Value::Opaque(vec![0x01])), None])),
            ValidationResult::Failure { .. }
        ));
    }

    #[test]
    fn rejects_values_beyond_declared_components() {
        let value = Value::sequence(vec![Some(Value::Integer(1)), None, Some(Value::Integer(5))]);
        assert_eq!(
            sample().validate(&value),
            ValidationResult::Failure {
                reason: "`Sample` declares 2 root components, but more values are set".into()
            }
        );
        let trailing_absent = Value::sequence(vec![Some(Value::Integer(1)), None, None]);
        assert_eq!(sample().validate(&trailing_absent), ValidationResult::Success);
    }
}
