//! The routing predicate language.
//!
//! Edge conditions are short text expressions (`size_mbits > 50`,
//! `status regex 'OK.*'`, `0 <=> 49`). Each is compiled once at graph
//! construction into a [`Predicate`] and evaluated per routed message.
//!
//! Parsing is first-match-wins over a fixed pattern list. Operands bind at
//! the last occurrence of the operator token, so a field name may itself
//! contain spaces. Evaluation is total: a comparison over a missing or
//! non-numeric field is `false`, never an error; only `MISSING` matches
//! absence.

use crate::message::{keys, Message};
use crate::value::AttrValue;
use regex::Regex;
use thiserror::Error;

/// The left side of a predicate: the scheduler clock or a message attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// The pseudo-field `SimTime`, resolving to the event's virtual time.
    SimTime,
    /// A message attribute by name.
    Attr(String),
}

impl Field {
    fn parse(text: &str) -> Field {
        let text = text.trim();
        if text == keys::SIM_TIME_FIELD {
            Field::SimTime
        } else {
            Field::Attr(text.to_string())
        }
    }

    /// The attribute name, or `None` for `SimTime`.
    pub fn attr_name(&self) -> Option<&str> {
        match self {
            Field::SimTime => None,
            Field::Attr(name) => Some(name),
        }
    }
}

/// Right side of an equality comparison: numeric when the source text parses
/// as a number, textual otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum EqTarget {
    Number(f64),
    Text(String),
}

impl EqTarget {
    fn parse(text: &str) -> EqTarget {
        let text = text.trim();
        match text.parse::<f64>() {
            Ok(n) => EqTarget::Number(n),
            Err(_) => EqTarget::Text(text.to_string()),
        }
    }
}

/// Errors raised while compiling a predicate. All are fatal at load time.
#[derive(Debug, Error)]
pub enum PredicateError {
    #[error("condition did not match any predicate pattern: '{0}'")]
    Unrecognized(String),

    #[error("operand '{operand}' in '{text}' is not a number")]
    BadNumber { text: String, operand: String },

    #[error("invalid regex in '{text}': {source}")]
    BadRegex {
        text: String,
        source: regex::Error,
    },
}

/// A compiled routing predicate over `(simtime, message)`.
#[derive(Debug, Clone)]
pub enum Predicate {
    Gt(Field, f64),
    Gte(Field, f64),
    Lt(Field, f64),
    Lte(Field, f64),
    Eq(Field, EqTarget),
    Ne(Field, EqTarget),
    Exists(Field),
    Missing(Field),
    Regex(Field, Regex),
    FailedRegex(Field, Regex),
    /// True when `random_router_value` falls in the inclusive range.
    Percentage(i64, i64),
    StartsWith(Field, String),
}

impl Predicate {
    /// Compile a predicate from its source text.
    ///
    /// Patterns are tried in a fixed order; the first that matches wins.
    pub fn parse(text: &str) -> Result<Predicate, PredicateError> {
        let src = text.trim();

        if let Some((field, value)) = src.rsplit_once(" > ") {
            return Ok(Predicate::Gt(Field::parse(field), num(src, value)?));
        }
        if let Some((field, value)) = src.rsplit_once(" >= ") {
            return Ok(Predicate::Gte(Field::parse(field), num(src, value)?));
        }
        if let Some((field, value)) = src.rsplit_once(" < ") {
            return Ok(Predicate::Lt(Field::parse(field), num(src, value)?));
        }
        // " <= " must not swallow the percentage operator " <=> ".
        if !src.contains(" <=> ") {
            if let Some((field, value)) = src.rsplit_once(" <= ") {
                return Ok(Predicate::Lte(Field::parse(field), num(src, value)?));
            }
        }
        if let Some((field, value)) = src.rsplit_once(" == ") {
            return Ok(Predicate::Eq(Field::parse(field), EqTarget::parse(value)));
        }
        if let Some((field, value)) = src.rsplit_once(" != ") {
            return Ok(Predicate::Ne(Field::parse(field), EqTarget::parse(value)));
        }
        if let Some(field) = src.strip_suffix(" EXISTS") {
            return Ok(Predicate::Exists(Field::parse(field)));
        }
        if let Some(field) = src.strip_suffix(" MISSING") {
            return Ok(Predicate::Missing(Field::parse(field)));
        }
        if let Some((field, pat)) = split_quoted(src, " regex '") {
            return Ok(Predicate::Regex(Field::parse(field), compile(src, pat)?));
        }
        if let Some((field, pat)) = split_quoted(src, " failed_reg '") {
            return Ok(Predicate::FailedRegex(
                Field::parse(field),
                compile(src, pat)?,
            ));
        }
        if let Some((lo, hi)) = src.split_once(" <=> ") {
            let lo = int(src, lo)?;
            let hi = int(src, hi)?;
            return Ok(Predicate::Percentage(lo, hi));
        }
        if let Some((field, value)) = src.rsplit_once(" starts_with ") {
            return Ok(Predicate::StartsWith(
                Field::parse(field),
                value.trim().to_string(),
            ));
        }

        Err(PredicateError::Unrecognized(src.to_string()))
    }

    /// Evaluate against the event's virtual time and the message.
    pub fn eval(&self, simtime: f64, msg: &Message) -> bool {
        match self {
            Predicate::Gt(f, n) => numeric(f, simtime, msg).map_or(false, |v| v > *n),
            Predicate::Gte(f, n) => numeric(f, simtime, msg).map_or(false, |v| v >= *n),
            Predicate::Lt(f, n) => numeric(f, simtime, msg).map_or(false, |v| v < *n),
            Predicate::Lte(f, n) => numeric(f, simtime, msg).map_or(false, |v| v <= *n),
            Predicate::Eq(f, target) => equals(f, target, simtime, msg),
            Predicate::Ne(f, target) => match f {
                Field::SimTime => !equals(f, target, simtime, msg),
                Field::Attr(name) => {
                    msg.contains(name) && !equals(f, target, simtime, msg)
                }
            },
            Predicate::Exists(f) => match f {
                Field::SimTime => true,
                Field::Attr(name) => msg.contains(name),
            },
            Predicate::Missing(f) => match f {
                Field::SimTime => false,
                Field::Attr(name) => !msg.contains(name),
            },
            Predicate::Regex(f, re) => {
                textual(f, simtime, msg).map_or(false, |s| re.is_match(&s))
            }
            Predicate::FailedRegex(f, re) => {
                textual(f, simtime, msg).map_or(false, |s| !re.is_match(&s))
            }
            Predicate::Percentage(lo, hi) => msg
                .get(keys::RANDOM_ROUTER_VALUE)
                .and_then(AttrValue::as_i64)
                .map_or(false, |v| v >= *lo && v <= *hi),
            Predicate::StartsWith(f, prefix) => {
                textual(f, simtime, msg).map_or(false, |s| s.starts_with(prefix.as_str()))
            }
        }
    }

    /// The field this predicate inspects, where one exists. Percentage
    /// predicates inspect only the router-injected draw and return `None`.
    pub fn field(&self) -> Option<&Field> {
        match self {
            Predicate::Gt(f, _)
            | Predicate::Gte(f, _)
            | Predicate::Lt(f, _)
            | Predicate::Lte(f, _)
            | Predicate::Eq(f, _)
            | Predicate::Ne(f, _)
            | Predicate::Exists(f)
            | Predicate::Missing(f)
            | Predicate::Regex(f, _)
            | Predicate::FailedRegex(f, _)
            | Predicate::StartsWith(f, _) => Some(f),
            Predicate::Percentage(_, _) => None,
        }
    }
}

fn num(text: &str, operand: &str) -> Result<f64, PredicateError> {
    operand
        .trim()
        .parse::<f64>()
        .map_err(|_| PredicateError::BadNumber {
            text: text.to_string(),
            operand: operand.trim().to_string(),
        })
}

fn int(text: &str, operand: &str) -> Result<i64, PredicateError> {
    operand
        .trim()
        .parse::<i64>()
        .map_err(|_| PredicateError::BadNumber {
            text: text.to_string(),
            operand: operand.trim().to_string(),
        })
}

fn compile(text: &str, pattern: &str) -> Result<Regex, PredicateError> {
    Regex::new(pattern).map_err(|source| PredicateError::BadRegex {
        text: text.to_string(),
        source,
    })
}

/// Split `field op 'pattern'` forms, binding at the last operator occurrence.
fn split_quoted<'a>(src: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let body = src.strip_suffix('\'')?;
    body.rsplit_once(op)
}

fn numeric(field: &Field, simtime: f64, msg: &Message) -> Option<f64> {
    match field {
        Field::SimTime => Some(simtime),
        Field::Attr(name) => msg.get(name).and_then(AttrValue::to_number),
    }
}

fn textual(field: &Field, simtime: f64, msg: &Message) -> Option<String> {
    match field {
        Field::SimTime => Some(simtime.to_string()),
        Field::Attr(name) => msg.get(name).map(|v| v.to_string()),
    }
}

fn equals(field: &Field, target: &EqTarget, simtime: f64, msg: &Message) -> bool {
    match target {
        EqTarget::Number(n) => numeric(field, simtime, msg).map_or(false, |v| v == *n),
        EqTarget::Text(t) => match field {
            Field::SimTime => simtime.to_string() == *t,
            Field::Attr(name) => match msg.get(name) {
                // Booleans compare case-insensitively so YAML `true` matches
                // the conventional `== True` spelling.
                Some(AttrValue::Bool(b)) => t.eq_ignore_ascii_case(if *b {
                    "true"
                } else {
                    "false"
                }),
                Some(v) => v.to_string() == *t,
                None => false,
            },
        },
    }
}
