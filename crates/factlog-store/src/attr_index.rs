//! Attribute indices: per-subject numeric values and per-subject entity sets.
//!
//! Both index families are addressed by subject entity id and grow by
//! doubling. The store keeps them sized to its physical entity capacity, but
//! they also grow on their own when written past the end.

use crate::bitset::BitSet;
use crate::error::KbError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capacity after growing `current` until it can address `needed` slots.
pub(crate) fn doubled_capacity(current: usize, needed: usize) -> usize {
    let mut cap = current.max(1);
    while cap < needed {
        cap *= 2;
    }
    cap
}

// ============================================================================
// Comparators
// ============================================================================

/// Numeric comparison used by `NumFilter` plans.
///
/// Comparison is exact IEEE-754: no epsilon. Callers that need tolerance
/// quantize before inserting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Comparator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
}

impl Comparator {
    pub fn token(self) -> &'static str {
        match self {
            Comparator::Gt => "gt",
            Comparator::Gte => "gte",
            Comparator::Lt => "lt",
            Comparator::Lte => "lte",
            Comparator::Eq => "eq",
            Comparator::Neq => "neq",
        }
    }

    #[inline]
    pub fn test(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparator::Gt => lhs > rhs,
            Comparator::Gte => lhs >= rhs,
            Comparator::Lt => lhs < rhs,
            Comparator::Lte => lhs <= rhs,
            Comparator::Eq => lhs == rhs,
            Comparator::Neq => lhs != rhs,
        }
    }
}

impl FromStr for Comparator {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gt" | ">" => Ok(Comparator::Gt),
            "gte" | ">=" => Ok(Comparator::Gte),
            "lt" | "<" => Ok(Comparator::Lt),
            "lte" | "<=" => Ok(Comparator::Lte),
            "eq" | "=" | "==" => Ok(Comparator::Eq),
            "neq" | "!=" => Ok(Comparator::Neq),
            other => Err(KbError::UnsupportedComparator(other.to_string())),
        }
    }
}

impl TryFrom<&str> for Comparator {
    type Error = KbError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl TryFrom<String> for Comparator {
    type Error = KbError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Comparator> for String {
    fn from(c: Comparator) -> Self {
        c.token().to_string()
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// ============================================================================
// Numeric attribute index
// ============================================================================

/// One numeric attribute: `subject -> f64`, with a presence mask.
#[derive(Debug, Clone, Default)]
pub struct NumericIndex {
    values: Vec<f64>,
    present: BitSet,
}

impl NumericIndex {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: vec![0.0; capacity],
            present: BitSet::new(capacity),
        }
    }

    pub(crate) fn grow_to(&mut self, capacity: usize) {
        if capacity > self.values.len() {
            self.values.resize(capacity, 0.0);
            self.present.resize(capacity);
        }
    }

    /// Overwrite the value for `subject`.
    pub fn set_value(&mut self, subject: usize, value: f64) {
        if subject >= self.values.len() {
            self.grow_to(doubled_capacity(self.values.len(), subject + 1));
        }
        self.values[subject] = value;
        self.present.set_bit(subject);
    }

    pub fn get(&self, subject: usize) -> Option<f64> {
        if self.present.contains(subject) {
            Some(self.values[subject])
        } else {
            None
        }
    }

    pub fn present(&self) -> &BitSet {
        &self.present
    }

    /// Subjects with a value satisfying `value <cmp> rhs`.
    pub fn filter(&self, cmp: Comparator, rhs: f64) -> BitSet {
        let mut out = BitSet::new(self.present.size());
        for subject in self.present.iter_set_bits() {
            if cmp.test(self.values[subject], rhs) {
                out.set_bit(subject);
            }
        }
        out
    }
}

// ============================================================================
// Entity-valued attribute index
// ============================================================================

/// One entity-valued attribute: `subject -> {objects}`.
#[derive(Debug, Clone, Default)]
pub struct EntityAttrIndex {
    rows: Vec<BitSet>,
    width: usize,
}

impl EntityAttrIndex {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: vec![BitSet::new(capacity); capacity],
            width: capacity,
        }
    }

    /// Grow to `capacity` subject rows, each `capacity` objects wide.
    pub(crate) fn grow_to(&mut self, capacity: usize) {
        if capacity > self.width {
            for row in &mut self.rows {
                row.resize(capacity);
            }
            self.width = capacity;
        }
        if capacity > self.rows.len() {
            let width = self.width;
            self.rows.resize_with(capacity, || BitSet::new(width));
        }
    }

    /// Add `object` to the value set of `subject`. Returns `true` if newly added.
    pub fn add_value(&mut self, subject: usize, object: usize) -> bool {
        let needed = subject.max(object) + 1;
        if needed > self.rows.len() || needed > self.width {
            let cap = doubled_capacity(self.rows.len().max(self.width), needed);
            self.grow_to(cap);
        }
        self.rows[subject].set_bit(object)
    }

    pub fn values(&self, subject: usize) -> Option<&BitSet> {
        self.rows.get(subject)
    }

    pub fn has_value(&self, subject: usize, object: usize) -> bool {
        self.rows
            .get(subject)
            .is_some_and(|row| row.contains(object))
    }

    /// Subjects having at least one value in `value_set`.
    pub fn filter(&self, value_set: &BitSet) -> BitSet {
        let mut out = BitSet::new(self.rows.len());
        for (subject, row) in self.rows.iter().enumerate() {
            if row.intersects(value_set) {
                out.set_bit(subject);
            }
        }
        out
    }
}
