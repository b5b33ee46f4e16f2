use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Single value assigned to contract term dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TermValue {
    Number(f64),
    Label(String),
}

impl TermValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            TermValue::Number(value) => Some(*value),
            TermValue::Label(_) => None,
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            TermValue::Number(_) => None,
            TermValue::Label(label) => Some(label.as_str()),
        }
    }
}

impl fmt::Display for TermValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermValue::Number(value) => write!(f, "{}", value),
            TermValue::Label(label) => write!(f, "'{}'", label),
        }
    }
}

impl From<f64> for TermValue {
    fn from(value: f64) -> Self {
        TermValue::Number(value)
    }
}

impl From<&str> for TermValue {
    fn from(label: &str) -> Self {
        TermValue::Label(label.to_string())
    }
}

impl From<String> for TermValue {
    fn from(label: String) -> Self {
        TermValue::Label(label)
    }
}

/// Concrete assignment of one value per term dimension.
///
/// `TermVector` has no mutating methods. Every negotiation round builds
/// new vector instead of editing previous one, so history entries can be
/// shared freely.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermVector(BTreeMap<String, TermValue>);

impl TermVector {
    pub fn new() -> TermVector {
        TermVector(BTreeMap::new())
    }

    /// Returns vector extended with `dimension`. Existing value is replaced.
    pub fn with(mut self, dimension: impl ToString, value: impl Into<TermValue>) -> TermVector {
        self.0.insert(dimension.to_string(), value.into());
        self
    }

    pub fn get(&self, dimension: &str) -> Option<&TermValue> {
        self.0.get(dimension)
    }

    pub fn number(&self, dimension: &str) -> Option<f64> {
        self.get(dimension).and_then(TermValue::as_number)
    }

    pub fn label(&self, dimension: &str) -> Option<&str> {
        self.get(dimension).and_then(TermValue::as_label)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TermValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Hex encoded SHA-256 over canonical encoding of the vector.
    /// Dimensions are hashed in name order, so equal vectors always
    /// produce equal digests.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in &self.0 {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            match value {
                TermValue::Number(number) => {
                    hasher.update([b'n']);
                    hasher.update(number.to_bits().to_be_bytes());
                }
                TermValue::Label(label) => {
                    hasher.update([b'l']);
                    hasher.update(label.as_bytes());
                }
            }
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

impl FromIterator<(String, TermValue)> for TermVector {
    fn from_iter<I: IntoIterator<Item = (String, TermValue)>>(iter: I) -> Self {
        TermVector(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, TermValue>> for TermVector {
    fn from(map: BTreeMap<String, TermValue>) -> Self {
        TermVector(map)
    }
}

impl fmt::Display for TermVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms = self
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>();
        write!(f, "[{}]", terms.join(", "))
    }
}
