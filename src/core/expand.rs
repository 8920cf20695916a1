//! Compact per-iteration notation
//!
//! Protocol parameters that vary across iterations are written as
//! whitespace-separated tokens, each either a bare value `V` or a run-length
//! token `RxV` ("repeat V, R times"). `"2x8 2x2"` over four iterations is
//! `[8, 8, 2, 2]`. When the tokens describe fewer values than there are
//! iterations the last value is reused; extra values are ignored.

use crate::core::error::PipelineError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Prefix before the first `x` must be empty or an integer for the token to be run-length
static RUN_LENGTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([+-]?\d*)x(.*)$").expect("valid run-length regex"));

/// A resolved scalar parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ParamValue {
    /// Classify a raw token: integer, then float, then text
    pub fn parse(raw: &str) -> Self {
        if let Ok(i) = raw.parse::<i64>() {
            ParamValue::Int(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            ParamValue::Float(f)
        } else {
            ParamValue::Text(raw.to_string())
        }
    }

    /// Interpret the value as a 0/1 style toggle
    pub fn is_truthy(&self) -> bool {
        match self {
            ParamValue::Int(i) => *i != 0,
            ParamValue::Float(f) => *f != 0.0,
            ParamValue::Bool(b) => *b,
            ParamValue::Text(s) => {
                matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// A parameter written in compact per-iteration notation
///
/// Accepts plain YAML scalars as well (`inner_radius: 0`), since a single
/// value is valid notation on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "NotationRepr", into = "String")]
pub struct PerIteration(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum NotationRepr {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<NotationRepr> for PerIteration {
    fn from(repr: NotationRepr) -> Self {
        match repr {
            NotationRepr::Text(s) => PerIteration(s),
            NotationRepr::Int(i) => PerIteration(i.to_string()),
            NotationRepr::Float(f) => PerIteration(f.to_string()),
            NotationRepr::Bool(b) => PerIteration(if b { "1" } else { "0" }.to_string()),
        }
    }
}

impl From<PerIteration> for String {
    fn from(p: PerIteration) -> Self {
        p.0
    }
}

impl From<&str> for PerIteration {
    fn from(s: &str) -> Self {
        PerIteration(s.to_string())
    }
}

impl PerIteration {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn expand(&self, iterations: usize) -> Result<IterationValueTable, PipelineError> {
        expand(&self.0, iterations)
    }
}

impl fmt::Display for PerIteration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One resolved value per iteration, indexed from 1
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationValueTable {
    values: Vec<ParamValue>,
}

impl IterationValueTable {
    /// Value for iteration `iteration` (1-based)
    ///
    /// # Panics
    ///
    /// Panics if `iteration` is 0 or beyond the table; the builder only asks
    /// for indices within the run's iteration count.
    pub fn get(&self, iteration: usize) -> &ParamValue {
        &self.values[iteration - 1]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[ParamValue] {
        &self.values
    }

    /// True if any iteration carries a truthy value
    pub fn any_truthy(&self) -> bool {
        self.values.iter().any(ParamValue::is_truthy)
    }
}

/// Expand a compact notation string into exactly `iterations` values
pub fn expand(tokens: &str, iterations: usize) -> Result<IterationValueTable, PipelineError> {
    if iterations < 1 {
        return Err(PipelineError::invalid(format!(
            "iteration count must be at least 1, got {}",
            iterations
        )));
    }

    let malformed = |token: &str, reason: &str| PipelineError::MalformedToken {
        token: token.to_string(),
        input: tokens.to_string(),
        reason: reason.to_string(),
    };

    let mut candidates: Vec<ParamValue> = Vec::new();
    let mut seen_any = false;
    for token in tokens.split_whitespace() {
        seen_any = true;
        let room = iterations.saturating_sub(candidates.len());

        let Some(caps) = RUN_LENGTH.captures(token) else {
            if room > 0 {
                candidates.push(ParamValue::parse(token));
            }
            continue;
        };

        let repeat_raw = &caps[1];
        let value_raw = &caps[2];
        if repeat_raw.is_empty() || repeat_raw == "+" || repeat_raw == "-" {
            return Err(malformed(token, "missing repeat count"));
        }
        let repeat: i64 = repeat_raw
            .parse()
            .map_err(|_| malformed(token, "repeat count is not an integer"))?;
        if repeat <= 0 {
            return Err(malformed(token, "repeat count must be positive"));
        }
        if value_raw.is_empty() {
            return Err(malformed(token, "missing value"));
        }

        // Tokens past N are still validated but never stored
        let value = ParamValue::parse(value_raw);
        let take = usize::try_from(repeat).unwrap_or(usize::MAX).min(room);
        candidates.extend(std::iter::repeat(value).take(take));
    }

    if !seen_any {
        return Err(malformed(tokens, "no values given"));
    }
    if let Some(last) = candidates.last().cloned() {
        candidates.resize(iterations, last);
    }

    Ok(IterationValueTable { values: candidates })
}
