use serde::{Deserialize, Serialize};

/// Optimistic concurrency token of a stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocVersion {
    pub seq_no: i64,
    pub primary_term: i64,
}

impl DocVersion {
    pub fn new(seq_no: i64, primary_term: i64) -> Self {
        Self {
            seq_no,
            primary_term,
        }
    }
}

/// A stored value paired with the version it was read at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub value: T,
    pub version: DocVersion,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: DocVersion) -> Self {
        Self { value, version }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            value: f(self.value),
            version: self.version,
        }
    }
}
