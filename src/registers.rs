use std::num::NonZeroU16;
use std::sync::Arc;

use jiff::SignedDuration;
use jiff::civil::Time;

use crate::catalog::Definition;

/// Temperatures are transmitted in tenths of a degree.
pub const CELSIUS_DIVISOR: u16 = 10;
const SECONDS_PER_DAY: i32 = 86_400;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("raw value {raw} is not a valid {class} value")]
    Unrecognized { class: &'static str, raw: i32 },
    #[error("a {value} value cannot be stored in a {class} register")]
    TypeMismatch { class: &'static str, value: &'static str },
    #[error("{value} is out of range for a {class} register")]
    OutOfRange { class: &'static str, value: String },
    #[error("`{input}` is not a valid {class} value")]
    Parse { class: &'static str, input: String },
}

/// One named code of an enumeration register.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Choice {
    pub code: i32,
    pub name: String,
}

/// Semantic class of a register, governing how its raw value is interpreted.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::IntoStaticStr)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Class {
    Bool,
    Int,
    /// A position the catalog says nothing about.
    Unknown,
    /// Degrees Celsius in tenths.
    Celsius,
    Scaled { divisor: NonZeroU16 },
    /// Whole seconds.
    Duration,
    Enumeration { choices: Arc<[Choice]> },
    /// `0x00MMmmpp`, i.e. one byte per version component.
    Version,
    /// Seconds since midnight.
    TimeOfDay,
}

impl Class {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    fn unrecognized(&self, raw: i32) -> ConversionError {
        ConversionError::Unrecognized { class: self.name(), raw }
    }

    fn out_of_range(&self, value: impl ToString) -> ConversionError {
        ConversionError::OutOfRange { class: self.name(), value: value.to_string() }
    }

    pub fn decode(&self, raw: i32) -> Result<Value, ConversionError> {
        Ok(match self {
            Class::Bool => match raw {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                _ => return Err(self.unrecognized(raw)),
            },
            Class::Int | Class::Unknown => Value::Int(raw),
            Class::Celsius => Value::Float(f64::from(raw) / f64::from(CELSIUS_DIVISOR)),
            Class::Scaled { divisor } => Value::Float(f64::from(raw) / f64::from(divisor.get())),
            Class::Duration => Value::Duration(SignedDuration::from_secs(raw.into())),
            Class::Enumeration { choices } => match choices.iter().find(|c| c.code == raw) {
                Some(choice) => Value::Enum(choice.clone()),
                None => return Err(self.unrecognized(raw)),
            },
            Class::Version => {
                let [reserved, major, minor, patch] = raw.to_be_bytes();
                if reserved != 0 {
                    return Err(self.unrecognized(raw));
                }
                Value::Version(Version { major, minor, patch })
            }
            Class::TimeOfDay => {
                if !(0..SECONDS_PER_DAY).contains(&raw) {
                    return Err(self.unrecognized(raw));
                }
                let (hour, minute, second) = (raw / 3600, raw % 3600 / 60, raw % 60);
                let time = Time::new(hour as i8, minute as i8, second as i8, 0)
                    .map_err(|_| self.unrecognized(raw))?;
                Value::TimeOfDay(time)
            }
        })
    }

    pub fn encode(&self, value: &Value) -> Result<i32, ConversionError> {
        match (self, value) {
            (Class::Bool, Value::Bool(b)) => Ok(i32::from(*b)),
            (Class::Int | Class::Unknown, Value::Int(n)) => Ok(*n),
            (Class::Celsius, Value::Float(v)) => self.scale(*v, CELSIUS_DIVISOR),
            (Class::Scaled { divisor }, Value::Float(v)) => self.scale(*v, divisor.get()),
            (Class::Duration, Value::Duration(d)) => {
                if d.subsec_nanos() != 0 {
                    return Err(self.out_of_range(value));
                }
                i32::try_from(d.as_secs()).map_err(|_| self.out_of_range(value))
            }
            (Class::Enumeration { choices }, Value::Enum(choice)) => {
                if choices.contains(choice) {
                    Ok(choice.code)
                } else {
                    Err(self.out_of_range(value))
                }
            }
            (Class::Version, Value::Version(v)) => Ok(i32::from_be_bytes([0, v.major, v.minor, v.patch])),
            (Class::TimeOfDay, Value::TimeOfDay(t)) => {
                if t.subsec_nanosecond() != 0 {
                    return Err(self.out_of_range(value));
                }
                Ok(i32::from(t.hour()) * 3600 + i32::from(t.minute()) * 60 + i32::from(t.second()))
            }
            (_, value) => {
                Err(ConversionError::TypeMismatch { class: self.name(), value: value.kind() })
            }
        }
    }

    fn scale(&self, value: f64, divisor: u16) -> Result<i32, ConversionError> {
        let scaled = (value * f64::from(divisor)).round();
        if !scaled.is_finite() || scaled < f64::from(i32::MIN) || scaled > f64::from(i32::MAX) {
            return Err(self.out_of_range(value));
        }
        Ok(scaled as i32)
    }

    /// Parse user input into a value of this class.
    pub fn parse(&self, input: &str) -> Result<Value, ConversionError> {
        let error = || ConversionError::Parse { class: self.name(), input: input.to_string() };
        let trimmed = input.trim();
        Ok(match self {
            Class::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Value::Bool(true),
                "false" | "off" | "no" | "0" => Value::Bool(false),
                _ => return Err(error()),
            },
            Class::Int | Class::Unknown => Value::Int(trimmed.parse().map_err(|_| error())?),
            Class::Celsius | Class::Scaled { .. } => {
                Value::Float(trimmed.parse().map_err(|_| error())?)
            }
            Class::Duration => Value::Duration(trimmed.parse().map_err(|_| error())?),
            Class::Enumeration { choices } => {
                let by_name = choices.iter().find(|c| c.name.eq_ignore_ascii_case(trimmed));
                let by_code = || {
                    let code = trimmed.parse::<i32>().ok()?;
                    choices.iter().find(|c| c.code == code)
                };
                Value::Enum(by_name.or_else(by_code).ok_or_else(error)?.clone())
            }
            Class::Version => {
                let mut components = trimmed.split('.').map(|c| c.parse::<u8>());
                let (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch)), None) = (
                    components.next(),
                    components.next(),
                    components.next(),
                    components.next(),
                ) else {
                    return Err(error());
                };
                Value::Version(Version { major, minor, patch })
            }
            Class::TimeOfDay => {
                let mut components = trimmed.split(':').map(|c| c.parse::<i8>());
                let (Some(Ok(hour)), Some(Ok(minute)), second, None) = (
                    components.next(),
                    components.next(),
                    components.next().transpose().map_err(|_| error())?,
                    components.next(),
                ) else {
                    return Err(error());
                };
                let time = Time::new(hour, minute, second.unwrap_or(0), 0).map_err(|_| error())?;
                Value::TimeOfDay(time)
            }
        })
    }
}

impl std::fmt::Display for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Class::Scaled { divisor } => f.write_fmt(format_args!("scaled/{divisor}")),
            Class::Enumeration { choices } => {
                f.write_fmt(format_args!("enumeration/{}", choices.len()))
            }
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}.{}.{}", self.major, self.minor, self.patch))
    }
}

/// A register value in its domain representation.
#[derive(Clone, Debug, PartialEq, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f64),
    Duration(SignedDuration),
    Enum(Choice),
    Version(Version),
    TimeOfDay(Time),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        self.into()
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => f.write_fmt(format_args!("{}", b)),
            Value::Int(n) => f.write_fmt(format_args!("{}", n)),
            Value::Float(n) => f.write_fmt(format_args!("{}", n)),
            Value::Duration(d) => f.write_fmt(format_args!("{:#}", d)),
            Value::Enum(choice) => f.write_str(&choice.name),
            Value::Version(v) => f.write_fmt(format_args!("{}", v)),
            Value::TimeOfDay(t) => f.write_fmt(format_args!("{}", t)),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i32(*n),
            Value::Float(n) => serializer.serialize_f64(*n),
            Value::Duration(d) => serializer.serialize_i64(d.as_secs()),
            Value::Enum(choice) => serializer.serialize_str(&choice.name),
            Value::Version(_) | Value::TimeOfDay(_) => serializer.collect_str(self),
        }
    }
}

/// One typed register slot.
///
/// Raw values only change through [`crate::RegisterTable::set_raw_values`], which keeps the
/// previous raw value around for change detection.
#[derive(Clone, Debug)]
pub struct Register {
    id: i32,
    name: String,
    unit: String,
    class: Class,
    minimum: Option<i32>,
    maximum: Option<i32>,
    raw: i32,
    previous_raw: i32,
}

impl Register {
    pub fn new(definition: Definition) -> Self {
        let Definition { id, name, unit, class, minimum, maximum } = definition;
        Self { id, name, unit, class, minimum, maximum, raw: 0, previous_raw: 0 }
    }

    pub(crate) fn unknown(id: i32) -> Self {
        Self::new(Definition {
            id,
            name: format!("unknown_{id}"),
            unit: String::new(),
            class: Class::Unknown,
            minimum: None,
            maximum: None,
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn class(&self) -> &Class {
        &self.class
    }

    pub fn minimum(&self) -> Option<i32> {
        self.minimum
    }

    pub fn maximum(&self) -> Option<i32> {
        self.maximum
    }

    pub fn raw_value(&self) -> i32 {
        self.raw
    }

    pub fn previous_raw_value(&self) -> i32 {
        self.previous_raw
    }

    pub fn has_changes(&self) -> bool {
        self.raw != self.previous_raw
    }

    pub fn from_heat_pump(&self) -> Result<Value, ConversionError> {
        self.class.decode(self.raw)
    }

    pub fn previous_value(&self) -> Result<Value, ConversionError> {
        self.class.decode(self.previous_raw)
    }

    /// Convert `value` into the raw integer to send in a parameter write.
    pub fn to_heat_pump(&self, value: &Value) -> Result<i32, ConversionError> {
        let raw = self.class.encode(value)?;
        let below = self.minimum.is_some_and(|min| raw < min);
        let above = self.maximum.is_some_and(|max| raw > max);
        if below || above {
            return Err(self.class.out_of_range(value));
        }
        Ok(raw)
    }

    pub fn parse_value(&self, input: &str) -> Result<Value, ConversionError> {
        self.class.parse(input)
    }

    pub(crate) fn store(&mut self, raw: i32) {
        self.previous_raw = self.raw;
        self.raw = raw;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choices() -> Arc<[Choice]> {
        Arc::from(vec![
            Choice { code: 0, name: "automatic".into() },
            Choice { code: 4, name: "off".into() },
        ])
    }

    fn register(class: Class) -> Register {
        Register::new(Definition {
            id: 3,
            name: "test".into(),
            unit: String::new(),
            class,
            minimum: None,
            maximum: None,
        })
    }

    fn assert_round_trip(class: Class, raws: &[i32]) {
        for &raw in raws {
            let value = class.decode(raw).unwrap();
            assert_eq!(class.encode(&value).unwrap(), raw, "{class} {value}");
        }
    }

    #[test]
    fn every_class_round_trips() {
        let edges = [i32::MIN, -1, 0, 1, 215, i32::MAX];
        assert_round_trip(Class::Bool, &[0, 1]);
        assert_round_trip(Class::Int, &edges);
        assert_round_trip(Class::Unknown, &edges);
        assert_round_trip(Class::Celsius, &edges);
        let divisor = NonZeroU16::new(100).unwrap();
        assert_round_trip(Class::Scaled { divisor }, &edges);
        assert_round_trip(Class::Duration, &edges);
        assert_round_trip(Class::Enumeration { choices: choices() }, &[0, 4]);
        assert_round_trip(Class::Version, &[0, 0x0003_0201, 0x00FF_FFFF]);
        assert_round_trip(Class::TimeOfDay, &[0, 3600, 45_296, SECONDS_PER_DAY - 1]);
    }

    #[test]
    fn decodes_domain_values() {
        assert_eq!(Class::Celsius.decode(215).unwrap(), Value::Float(21.5));
        assert_eq!(Class::Celsius.decode(-15).unwrap(), Value::Float(-1.5));
        assert_eq!(
            Class::Duration.decode(90).unwrap(),
            Value::Duration(SignedDuration::from_secs(90))
        );
        assert_eq!(
            Class::Version.decode(0x0003_0201).unwrap(),
            Value::Version(Version { major: 3, minor: 2, patch: 1 })
        );
        assert_eq!(
            Class::TimeOfDay.decode(45_296).unwrap(),
            Value::TimeOfDay(jiff::civil::time(12, 34, 56, 0))
        );
        let Value::Enum(choice) = Class::Enumeration { choices: choices() }.decode(4).unwrap() else {
            panic!("not an enumeration value");
        };
        assert_eq!(choice.name, "off");
    }

    #[test]
    fn rejects_unrecognized_raw_patterns() {
        assert!(matches!(Class::Bool.decode(2), Err(ConversionError::Unrecognized { raw: 2, .. })));
        assert!(Class::Enumeration { choices: choices() }.decode(1).is_err());
        assert!(Class::Version.decode(0x0100_0000).is_err());
        assert!(Class::Version.decode(-1).is_err());
        assert!(Class::TimeOfDay.decode(SECONDS_PER_DAY).is_err());
        assert!(Class::TimeOfDay.decode(-1).is_err());
    }

    #[test]
    fn rejects_mismatched_types() {
        let error = Class::Bool.encode(&Value::Float(1.0)).unwrap_err();
        assert_eq!(error, ConversionError::TypeMismatch { class: "bool", value: "float" });
        assert!(Class::Celsius.encode(&Value::Int(20)).is_err());
        assert!(Class::TimeOfDay.encode(&Value::Duration(SignedDuration::ZERO)).is_err());
    }

    #[test]
    fn rejects_unrepresentable_values() {
        assert!(matches!(
            Class::Celsius.encode(&Value::Float(f64::NAN)),
            Err(ConversionError::OutOfRange { .. })
        ));
        assert!(Class::Celsius.encode(&Value::Float(1e12)).is_err());
        assert!(Class::Duration.encode(&Value::Duration(SignedDuration::from_millis(1500))).is_err());
        assert!(Class::Duration.encode(&Value::Duration(SignedDuration::from_hours(1_000_000))).is_err());
        let stranger = Value::Enum(Choice { code: 4, name: "party".into() });
        assert!(Class::Enumeration { choices: choices() }.encode(&stranger).is_err());
    }

    #[test]
    fn scaled_values_are_rounded() {
        assert_eq!(Class::Celsius.encode(&Value::Float(-1.0)).unwrap(), -10);
        assert_eq!(Class::Celsius.encode(&Value::Float(21.46)).unwrap(), 215);
    }

    #[test]
    fn catalog_bounds_apply_to_writes() {
        let mut definition = register(Class::Celsius);
        definition.minimum = Some(-50);
        definition.maximum = Some(50);
        assert_eq!(definition.to_heat_pump(&Value::Float(-5.0)).unwrap(), -50);
        assert!(definition.to_heat_pump(&Value::Float(5.1)).is_err());
    }

    #[test]
    fn parses_user_input() {
        assert_eq!(Class::Bool.parse("On").unwrap(), Value::Bool(true));
        assert_eq!(Class::Celsius.parse(" -1.5 ").unwrap(), Value::Float(-1.5));
        assert_eq!(
            Class::Duration.parse("1h 30m").unwrap(),
            Value::Duration(SignedDuration::from_mins(90))
        );
        assert_eq!(
            Class::TimeOfDay.parse("06:30").unwrap(),
            Value::TimeOfDay(jiff::civil::time(6, 30, 0, 0))
        );
        assert_eq!(
            Class::Version.parse("3.88.1").unwrap(),
            Value::Version(Version { major: 3, minor: 88, patch: 1 })
        );
        let class = Class::Enumeration { choices: choices() };
        assert_eq!(class.parse("OFF").unwrap(), class.parse("4").unwrap());
        assert!(class.parse("party").is_err());
        assert!(Class::Version.parse("3.88").is_err());
        assert!(Class::TimeOfDay.parse("25:00").is_err());
        assert!(Class::Int.parse("twelve").is_err());
    }

    #[test]
    fn tracks_changes() {
        let mut register = register(Class::Int);
        assert!(!register.has_changes());
        register.store(7);
        assert!(register.has_changes());
        assert_eq!(register.previous_raw_value(), 0);
        register.store(7);
        assert!(!register.has_changes());
        assert_eq!(register.previous_value().unwrap(), Value::Int(7));
    }

    #[test]
    fn values_render_for_humans() {
        assert_eq!(Value::Float(21.5).to_string(), "21.5");
        assert_eq!(Value::Version(Version { major: 3, minor: 88, patch: 0 }).to_string(), "3.88.0");
        assert_eq!(serde_json::to_string(&Value::Float(-0.5)).unwrap(), "-0.5");
        assert_eq!(
            serde_json::to_string(&Value::TimeOfDay(jiff::civil::time(6, 30, 0, 0))).unwrap(),
            "\"06:30:00\""
        );
    }
}
