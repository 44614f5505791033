//! Read-only snapshot of the variables behaviors react to.
//!
//! The host application fills an [`InfoBuffer`] from whatever transport it
//! uses, then hands `&InfoBuffer` to the engine for one tick. Behaviors read
//! current values; the registry also reads the text strings that arrived
//! since the last [`InfoBuffer::clear_deltas`], which carry dynamic updates
//! and spawn requests.

use std::collections::BTreeMap;

use serde::Serialize;

/// A variable's current value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InfoValue {
    /// Numeric value.
    Number(f64),
    /// Text value.
    Text(String),
}

impl InfoValue {
    /// Numeric value, parsing text if needed.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Text form of the value.
    pub fn as_text(&self) -> String {
        match self {
            Self::Number(n) => tiller_ivp::text::compact(*n),
            Self::Text(s) => s.clone(),
        }
    }
}

/// Current variable values plus the text strings received since the last
/// clear.
#[derive(Debug, Clone, Default)]
pub struct InfoBuffer {
    time: f64,
    values: BTreeMap<String, InfoValue>,
    deltas: BTreeMap<String, Vec<String>>,
}

impl InfoBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Time of the last update, in seconds.
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Stamp the buffer with the current time.
    pub const fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    /// Store a numeric value.
    pub fn set_number(&mut self, var: &str, value: f64) {
        self.values.insert(var.to_owned(), InfoValue::Number(value));
    }

    /// Store a text value and record it as a fresh string.
    pub fn set_text(&mut self, var: &str, value: &str) {
        self.values
            .insert(var.to_owned(), InfoValue::Text(value.to_owned()));
        self.deltas
            .entry(var.to_owned())
            .or_default()
            .push(value.to_owned());
    }

    /// Current value of a variable.
    pub fn get(&self, var: &str) -> Option<&InfoValue> {
        self.values.get(var)
    }

    /// Whether the variable has ever been set.
    pub fn is_known(&self, var: &str) -> bool {
        self.values.contains_key(var)
    }

    /// Numeric value of a variable.
    pub fn number(&self, var: &str) -> Option<f64> {
        self.values.get(var).and_then(InfoValue::as_number)
    }

    /// Text value of a variable.
    pub fn text(&self, var: &str) -> Option<&str> {
        match self.values.get(var)? {
            InfoValue::Text(s) => Some(s),
            InfoValue::Number(_) => None,
        }
    }

    /// Text strings received on `var` since the last clear, oldest first.
    pub fn deltas(&self, var: &str) -> &[String] {
        self.deltas.get(var).map_or(&[], Vec::as_slice)
    }

    /// Forget the fresh strings. Current values are kept.
    pub fn clear_deltas(&mut self) {
        self.deltas.clear();
    }
}
