//! Descriptors for a subset of the RRLP-Components module (3GPP TS 44.031).
//!
//! The module uses `AUTOMATIC TAGS`, so every component carries a
//! context-specific tag numbered in declaration order.

use std::sync::LazyLock;

#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};

use crate::{
    per_type, AsnType, ChoiceSelection, DecodeError, Field, Schema, SchemaError, SequenceValue,
    SizeRange, Tag, Value,
};

macro_rules! descriptor {
    ($(#[$doc:meta])* $getter:ident, $cell:ident, $build:expr) => {
        static $cell: LazyLock<Result<Schema, SchemaError>> = LazyLock::new($build);

        $(#[$doc])*
        pub fn $getter() -> Result<&'static Schema, SchemaError> {
            $cell.as_ref().map_err(Clone::clone)
        }
    };
}

fn automatic_tags(fields: Vec<Field>) -> Vec<Field> {
    fields
        .into_iter()
        .zip(0..)
        .map(|(field, number)| field.tagged(Tag::context(number)))
        .collect()
}

fn constrained(field: &'static str, type_name: &'static str, lower: i64, upper: i64) -> Result<Field, SchemaError> {
    Ok(Field::required(field, Schema::integer(type_name, lower, upper)?))
}

descriptor!(
    /// `SatelliteID ::= INTEGER (0..63)`
    satellite_id,
    SATELLITE_ID,
    || Schema::integer("SatelliteID", 0, 63)
);

descriptor!(
    /// `Accuracy ::= INTEGER (0..127)`
    accuracy,
    ACCURACY,
    || Schema::integer("Accuracy", 0, 127)
);

descriptor!(accuracy_opt, ACCURACY_OPT, || {
    Ok(Schema::sequence(
        "AccuracyOpt",
        automatic_tags(vec![Field::optional("accuracy", accuracy()?.clone())]),
    ))
});

descriptor!(method_type, METHOD_TYPE, || {
    Schema::choice(
        "MethodType",
        automatic_tags(vec![
            Field::required("msAssisted", accuracy_opt()?.clone()),
            Field::required("msBased", accuracy()?.clone()),
            Field::required("msBasedPref", accuracy()?.clone()),
            Field::required("msAssistedPref", accuracy()?.clone()),
        ]),
    )
});

descriptor!(position_method, POSITION_METHOD, || {
    Schema::enumerated("PositionMethod", &["eotd", "gps", "gpsOrEOTD"])
});

descriptor!(reference_relation, REFERENCE_RELATION, || {
    Schema::enumerated(
        "ReferenceRelation",
        &["secondBTSThirdSet", "secondBTSSecondSet", "firstBTSFirstSet"],
    )
});

descriptor!(environment_character, ENVIRONMENT_CHARACTER, || {
    Schema::extensible_enumerated(
        "EnvironmentCharacter",
        &["badArea", "notBadArea", "mixedArea"],
        &[],
    )
});

descriptor!(loc_error_reason, LOC_ERROR_REASON, || {
    Schema::extensible_enumerated(
        "LocErrorReason",
        &[
            "unDefined",
            "notEnoughBTSs",
            "notEnoughSats",
            "eotdLocCalAssDataMissing",
            "eotdAssDataMissing",
            "gpsLocCalAssDataMissing",
            "gpsAssDataMissing",
            "methodNotSupported",
            "notProcessed",
            "refBTSForGPSNotServingBTS",
            "refBTSForEOTDNotServingBTS",
        ],
        &[
            "notEnoughGANSSSats",
            "ganssAssDataMissing",
            "refBTSForGANSSNotServingBTS",
        ],
    )
});

descriptor!(addional_doppler_fields, ADDIONAL_DOPPLER_FIELDS, || {
    Ok(Schema::sequence(
        "AddionalDopplerFields",
        automatic_tags(vec![
            constrained("doppler1", "doppler1Type", 0, 63)?,
            constrained("dopplerUncertainty", "dopplerUncertaintyType", 0, 7)?,
        ]),
    ))
});

descriptor!(addional_angle_fields, ADDIONAL_ANGLE_FIELDS, || {
    Ok(Schema::sequence(
        "AddionalAngleFields",
        automatic_tags(vec![
            constrained("azimuth", "azimuthType", 0, 31)?,
            constrained("elevation", "elevationType", 0, 7)?,
        ]),
    ))
});

descriptor!(acquis_element, ACQUIS_ELEMENT, || {
    Ok(Schema::sequence(
        "AcquisElement",
        automatic_tags(vec![
            Field::required("svid", satellite_id()?.clone()),
            constrained("doppler0", "doppler0Type", -2048, 2047)?,
            Field::optional("addionalDoppler", addional_doppler_fields()?.clone()),
            constrained("codePhase", "codePhaseType", 0, 1022)?,
            constrained("intCodePhase", "intCodePhaseType", 0, 19)?,
            constrained("gpsBitNumber", "gpsBitNumberType", 0, 3)?,
            constrained("codePhaseSearchWindow", "codePhaseSearchWindowType", 0, 15)?,
            Field::optional("addionalAngle", addional_angle_fields()?.clone()),
        ]),
    ))
});

descriptor!(
    /// `SeqOfAcquisElement ::= SEQUENCE (SIZE (1..maxSat)) OF AcquisElement`
    seq_of_acquis_element,
    SEQ_OF_ACQUIS_ELEMENT,
    || {
        Schema::sequence_of(
            "SeqOfAcquisElement",
            acquis_element()?.clone(),
            SizeRange::new(1, 16),
        )
    }
);

descriptor!(gsm_time, GSM_TIME, || {
    Ok(Schema::sequence(
        "GSMTime",
        automatic_tags(vec![
            constrained("bcchCarrier", "BCCHCarrier", 0, 1023)?,
            constrained("bsic", "BSIC", 0, 63)?,
            constrained("frameNumber", "FrameNumber", 0, 2_097_151)?,
            constrained("timeSlot", "TimeSlot", 0, 7)?,
            constrained("bitNumber", "BitNumber", 0, 156)?,
        ]),
    ))
});

descriptor!(time_relation, TIME_RELATION, || {
    Ok(Schema::sequence(
        "TimeRelation",
        automatic_tags(vec![
            constrained("gpsTOW", "GPSTOW23b", 0, 7_559_999)?,
            Field::optional("gsmTime", gsm_time()?.clone()),
        ]),
    ))
});

descriptor!(acquis_assist, ACQUIS_ASSIST, || {
    Ok(Schema::sequence(
        "AcquisAssist",
        automatic_tags(vec![
            Field::required("timeRelation", time_relation()?.clone()),
            Field::required("acquisList", seq_of_acquis_element()?.clone()),
        ]),
    ))
});

descriptor!(
    /// GPS CNAV clock model of the GANSS assistance extension
    cnav_clock_model,
    CNAV_CLOCK_MODEL,
    || {
        let isc = |name: &'static str, type_name: &'static str| -> Result<Field, SchemaError> {
            Ok(Field::optional(name, Schema::integer(type_name, -4096, 4095)?))
        };
        Ok(Schema::sequence(
            "CNAVclockModel",
            automatic_tags(vec![
                constrained("cnavToc", "cnavTocType", 0, 2015)?,
                constrained("cnavTop", "cnavTopType", 0, 2015)?,
                constrained("cnavURA0", "cnavURA0Type", -16, 15)?,
                constrained("cnavURA1", "cnavURA1Type", 0, 7)?,
                constrained("cnavURA2", "cnavURA2Type", 0, 7)?,
                constrained("cnavAf2", "cnavAf2Type", -512, 511)?,
                constrained("cnavAf1", "cnavAf1Type", -524_288, 524_287)?,
                constrained("cnavAf0", "cnavAf0Type", -33_554_432, 33_554_431)?,
                constrained("cnavTgd", "cnavTgdType", -4096, 4095)?,
                isc("cnavISCl1cp", "cnavISCl1cpType")?,
                isc("cnavISCl1cd", "cnavISCl1cdType")?,
                isc("cnavISCl1ca", "cnavISCl1caType")?,
                isc("cnavISCl2c", "cnavISCl2cType")?,
                isc("cnavISCl5i5", "cnavISCl5i5Type")?,
                isc("cnavISCl5q5", "cnavISCl5q5Type")?,
            ]),
        ))
    }
);

fn unexpected(expected: &str, value: &Value) -> DecodeError {
    DecodeError::SchemaMismatch(alloc::format!(
        "expected {expected}, found {}",
        value.type_name()
    ))
}

fn small_integer(name: &'static str, value: Option<&Value>) -> Result<u8, DecodeError> {
    match value {
        Some(Value::Integer(i)) => u8::try_from(*i).map_err(|_| DecodeError::InvalidValue {
            name,
            reason: alloc::format!("{i} does not fit 8 bits"),
        }),
        Some(other) => Err(unexpected("INTEGER", other)),
        None => Err(DecodeError::SchemaMismatch(alloc::format!(
            "`{name}` is missing"
        ))),
    }
}

/// Pairing of the BTS measurement sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub enum ReferenceRelation {
    SecondBtsThirdSet = 0,
    SecondBtsSecondSet = 1,
    FirstBtsFirstSet = 2,
}

impl AsnType for ReferenceRelation {
    fn schema() -> Result<&'static Schema, SchemaError> {
        reference_relation()
    }

    fn to_value(&self) -> Value {
        Value::enumerated(*self as usize)
    }

    fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Enumerated(e) if !e.is_extension => match e.index {
                0 => Ok(Self::SecondBtsThirdSet),
                1 => Ok(Self::SecondBtsSecondSet),
                2 => Ok(Self::FirstBtsFirstSet),
                index => Err(DecodeError::InvalidValue {
                    name: "ReferenceRelation",
                    reason: alloc::format!("unknown index {index}"),
                }),
            },
            other => Err(unexpected("root ENUMERATED", &other)),
        }
    }
}

per_type!(ReferenceRelation);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct AddionalDopplerFields {
    pub doppler1: u8,
    pub doppler_uncertainty: u8,
}

impl AsnType for AddionalDopplerFields {
    fn schema() -> Result<&'static Schema, SchemaError> {
        addional_doppler_fields()
    }

    fn to_value(&self) -> Value {
        Value::sequence(vec![
            Some(Value::Integer(self.doppler1.into())),
            Some(Value::Integer(self.doppler_uncertainty.into())),
        ])
    }

    fn from_value(value: Value) -> Result<Self, DecodeError> {
        let Value::Sequence(SequenceValue { root, .. }) = value else {
            return Err(unexpected("SEQUENCE", &value));
        };
        Ok(Self {
            doppler1: small_integer("doppler1", root.first().and_then(Option::as_ref))?,
            doppler_uncertainty: small_integer(
                "dopplerUncertainty",
                root.get(1).and_then(Option::as_ref),
            )?,
        })
    }
}

per_type!(AddionalDopplerFields);

/// Positioning method requested from the mobile station, with the required
/// accuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub enum MethodType {
    MsAssisted { accuracy: Option<u8> },
    MsBased(u8),
    MsBasedPref(u8),
    MsAssistedPref(u8),
}

impl AsnType for MethodType {
    fn schema() -> Result<&'static Schema, SchemaError> {
        method_type()
    }

    fn to_value(&self) -> Value {
        match self {
            MethodType::MsAssisted { accuracy } => Value::choice(
                0,
                Value::sequence(vec![accuracy.map(|a| Value::Integer(a.into()))]),
            ),
            MethodType::MsBased(a) => Value::choice(1, Value::Integer((*a).into())),
            MethodType::MsBasedPref(a) => Value::choice(2, Value::Integer((*a).into())),
            MethodType::MsAssistedPref(a) => Value::choice(3, Value::Integer((*a).into())),
        }
    }

    fn from_value(value: Value) -> Result<Self, DecodeError> {
        let Value::Choice(ChoiceSelection {
            is_extension: false,
            ordinal,
            value,
        }) = value
        else {
            return Err(unexpected("root CHOICE alternative", &value));
        };
        match (ordinal, *value) {
            (0, Value::Sequence(SequenceValue { root, .. })) => Ok(MethodType::MsAssisted {
                accuracy: root
                    .first()
                    .and_then(Option::as_ref)
                    .map(|a| small_integer("accuracy", Some(a)))
                    .transpose()?,
            }),
            (1, accuracy) => Ok(MethodType::MsBased(small_integer("msBased", Some(&accuracy))?)),
            (2, accuracy) => Ok(MethodType::MsBasedPref(small_integer(
                "msBasedPref",
                Some(&accuracy),
            )?)),
            (3, accuracy) => Ok(MethodType::MsAssistedPref(small_integer(
                "msAssistedPref",
                Some(&accuracy),
            )?)),
            (ordinal, value) => Err(DecodeError::SchemaMismatch(alloc::format!(
                "MethodType alternative {ordinal} cannot hold {}",
                value.type_name()
            ))),
        }
    }
}

per_type!(MethodType);
