//! Config entries and their validation rules.
//!
//! A [`ConfigEntry`] is a named, typed, validated setting with a default and
//! a current value. The Connector owns a map of these; changing one is
//! atomic from an observer's point of view — the new value is stored before
//! its change callback (if any) runs, never the other way around.

use std::time::Duration;

use fabric_errors::Error;

/// The constraint a config value must satisfy, as parsed from a rule string
/// such as `"int [1,100]"`, `"bool"`, `"dur [1s,1m]"`, or a free string with
/// no brackets at all.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationRule {
    Int { min: Option<i64>, max: Option<i64> },
    Bool,
    Duration { min: Option<Duration>, max: Option<Duration> },
    Str,
}

impl ValidationRule {
    /// Parses a rule description. Recognized forms:
    /// `int`, `int [min,max]`, `bool`, `dur`, `dur [min,max]`, `str`.
    /// An unrecognized kind is treated as `str` (no constraint).
    pub fn parse(rule: &str) -> ValidationRule {
        let rule = rule.trim();
        let (kind, bounds) = match rule.find('[') {
            Some(idx) => (rule[..idx].trim(), Some(rule[idx..].trim())),
            None => (rule, None),
        };
        match kind {
            "int" => {
                let (min, max) = bounds
                    .and_then(parse_int_bounds)
                    .unwrap_or((None, None));
                ValidationRule::Int { min, max }
            }
            "bool" => ValidationRule::Bool,
            "dur" => {
                let (min, max) = bounds
                    .and_then(parse_duration_bounds)
                    .unwrap_or((None, None));
                ValidationRule::Duration { min, max }
            }
            _ => ValidationRule::Str,
        }
    }

    pub fn validate(&self, value: &str) -> Result<(), Error> {
        match self {
            ValidationRule::Int { min, max } => {
                let n: i64 = value
                    .parse()
                    .map_err(|_| Error::new(format!("not an integer: {value}"), vec![]))?;
                if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                    return Err(Error::new(
                        format!("{value} is out of range"),
                        vec![],
                    ));
                }
                Ok(())
            }
            ValidationRule::Bool => value
                .parse::<bool>()
                .map(|_| ())
                .map_err(|_| Error::new(format!("not a bool: {value}"), vec![])),
            ValidationRule::Duration { min, max } => {
                let d = parse_duration(value)
                    .ok_or_else(|| Error::new(format!("not a duration: {value}"), vec![]))?;
                if min.is_some_and(|m| d < m) || max.is_some_and(|m| d > m) {
                    return Err(Error::new(format!("{value} is out of range"), vec![]));
                }
                Ok(())
            }
            ValidationRule::Str => Ok(()),
        }
    }
}

fn parse_int_bounds(raw: &str) -> Option<(Option<i64>, Option<i64>)> {
    let inner = raw.trim_start_matches('[').trim_end_matches(']');
    let (lo, hi) = inner.split_once(',')?;
    let min = lo.trim().parse::<i64>().ok();
    let max = hi.trim().parse::<i64>().ok();
    Some((min, max))
}

fn parse_duration_bounds(raw: &str) -> Option<(Option<Duration>, Option<Duration>)> {
    let inner = raw.trim_start_matches('[').trim_end_matches(']');
    let (lo, hi) = inner.split_once(',')?;
    Some((parse_duration(lo.trim()), parse_duration(hi.trim())))
}

/// Parses a duration written as `"<number><unit>"` with unit one of `ms`,
/// `s`, `m`, `h`.
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let unit_start = raw.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let (num, unit) = raw.split_at(unit_start);
    let n: f64 = num.parse().ok()?;
    let secs = match unit {
        "ms" => n / 1000.0,
        "s" => n,
        "m" => n * 60.0,
        "h" => n * 3600.0,
        _ => return None,
    };
    Some(Duration::from_secs_f64(secs))
}

/// A single named, typed, validated configuration setting.
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub name: String,
    pub description: String,
    pub rule: ValidationRule,
    pub default: String,
    current: String,
}

impl ConfigEntry {
    pub fn new(name: impl Into<String>, rule: ValidationRule, default: impl Into<String>) -> Self {
        let default = default.into();
        ConfigEntry {
            name: name.into(),
            description: String::new(),
            rule,
            current: default.clone(),
            default,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn value(&self) -> &str {
        &self.current
    }

    /// Validates and sets the current value, returning the old value on
    /// success so the caller (the Connector's config store) can run any
    /// change observer with both values in hand, after the new value is
    /// already visible to concurrent readers.
    pub fn set(&mut self, value: impl Into<String>) -> Result<String, Error> {
        let value = value.into();
        self.rule.validate(&value)?;
        Ok(std::mem::replace(&mut self.current, value))
    }

    pub fn as_bool(&self) -> Result<bool, Error> {
        self.current
            .parse()
            .map_err(|_| Error::new(format!("{} is not a bool", self.name), vec![]))
    }

    pub fn as_int(&self) -> Result<i64, Error> {
        self.current
            .parse()
            .map_err(|_| Error::new(format!("{} is not an integer", self.name), vec![]))
    }

    pub fn as_duration(&self) -> Result<Duration, Error> {
        parse_duration(&self.current)
            .ok_or_else(|| Error::new(format!("{} is not a duration", self.name), vec![]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_rule_with_bounds_rejects_out_of_range() {
        let rule = ValidationRule::parse("int [1,10]");
        assert!(rule.validate("5").is_ok());
        assert!(rule.validate("11").is_err());
    }

    #[test]
    fn bool_rule_rejects_non_bool() {
        let rule = ValidationRule::parse("bool");
        assert!(rule.validate("true").is_ok());
        assert!(rule.validate("yes").is_err());
    }

    #[test]
    fn duration_rule_parses_units_and_bounds() {
        let rule = ValidationRule::parse("dur [1s,1m]");
        assert!(rule.validate("30s").is_ok());
        assert!(rule.validate("500ms").is_err());
        assert!(rule.validate("2m").is_err());
    }

    #[test]
    fn unrecognized_rule_falls_back_to_unconstrained_string() {
        let rule = ValidationRule::parse("anything goes");
        assert!(rule.validate("whatever").is_ok());
    }

    #[test]
    fn set_validates_and_returns_previous_value() {
        let mut e = ConfigEntry::new("MaxClients", ValidationRule::parse("int [1,1000]"), "100");
        let old = e.set("250").unwrap();
        assert_eq!(old, "100");
        assert_eq!(e.value(), "250");
    }

    #[test]
    fn set_rejects_invalid_value_and_keeps_current() {
        let mut e = ConfigEntry::new("MaxClients", ValidationRule::parse("int [1,1000]"), "100");
        assert!(e.set("too many").is_err());
        assert_eq!(e.value(), "100");
    }
}
