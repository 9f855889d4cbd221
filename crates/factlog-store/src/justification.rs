//! Fact identifiers and the justification store.
//!
//! A [`FactId`] is an opaque key derived from a fact's shape. It never
//! indexes storage; it only keys derivation edges
//! `fact <- (rule, premises)`, which the rule engine records the first time
//! it adds a derived fact.
//!
//! Each derived fact keeps the edges recorded for it, in discovery order.
//! Explanations follow the first edge, which matches the single-witness
//! contract of the rule engine: one derivation per firing, not all of them.

use crate::error::KbError;
use crate::{AttrId, EntityId, PredId, RuleId, UnaryId};
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Facts and fact ids
// ============================================================================

/// A decoded fact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fact {
    Unary {
        unary: UnaryId,
        subject: EntityId,
    },
    Binary {
        pred: PredId,
        subject: EntityId,
        object: EntityId,
    },
    Numeric {
        attr: AttrId,
        subject: EntityId,
        value: f64,
    },
    EntityAttr {
        attr: AttrId,
        subject: EntityId,
        object: EntityId,
    },
}

impl Fact {
    pub fn id(&self) -> FactId {
        match *self {
            Fact::Unary { unary, subject } => FactId::unary(unary, subject),
            Fact::Binary {
                pred,
                subject,
                object,
            } => FactId::binary(pred, subject, object),
            Fact::Numeric {
                attr,
                subject,
                value,
            } => FactId::numeric(attr, subject, value),
            Fact::EntityAttr {
                attr,
                subject,
                object,
            } => FactId::entity_attr(attr, subject, object),
        }
    }

    pub fn subject(&self) -> EntityId {
        match *self {
            Fact::Unary { subject, .. }
            | Fact::Binary { subject, .. }
            | Fact::Numeric { subject, .. }
            | Fact::EntityAttr { subject, .. } => subject,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum FactKind {
    Unary,
    Binary,
    Numeric,
    EntityAttr,
}

impl FactKind {
    fn tag(self) -> &'static str {
        match self {
            FactKind::Unary => "u",
            FactKind::Binary => "b",
            FactKind::Numeric => "n",
            FactKind::EntityAttr => "e",
        }
    }
}

/// Opaque, stably-encodable fact key.
///
/// The textual form (`Display` / `FromStr`) is stable across runs:
/// `u:<unary>:<subject>`, `b:<pred>:<subject>:<object>`,
/// `n:<attr>:<subject>:<f64 bits as hex>`, `e:<attr>:<subject>:<object>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FactId {
    kind: FactKind,
    space: u32,
    subject: u32,
    payload: u64,
}

impl FactId {
    pub fn unary(unary: UnaryId, subject: EntityId) -> Self {
        Self {
            kind: FactKind::Unary,
            space: unary,
            subject,
            payload: 0,
        }
    }

    pub fn binary(pred: PredId, subject: EntityId, object: EntityId) -> Self {
        Self {
            kind: FactKind::Binary,
            space: pred,
            subject,
            payload: u64::from(object),
        }
    }

    pub fn numeric(attr: AttrId, subject: EntityId, value: f64) -> Self {
        Self {
            kind: FactKind::Numeric,
            space: attr,
            subject,
            payload: value.to_bits(),
        }
    }

    pub fn entity_attr(attr: AttrId, subject: EntityId, object: EntityId) -> Self {
        Self {
            kind: FactKind::EntityAttr,
            space: attr,
            subject,
            payload: u64::from(object),
        }
    }

    pub fn unpack(self) -> Fact {
        let object = self.payload as EntityId;
        match self.kind {
            FactKind::Unary => Fact::Unary {
                unary: self.space,
                subject: self.subject,
            },
            FactKind::Binary => Fact::Binary {
                pred: self.space,
                subject: self.subject,
                object,
            },
            FactKind::Numeric => Fact::Numeric {
                attr: self.space,
                subject: self.subject,
                value: f64::from_bits(self.payload),
            },
            FactKind::EntityAttr => Fact::EntityAttr {
                attr: self.space,
                subject: self.subject,
                object,
            },
        }
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.kind.tag();
        match self.kind {
            FactKind::Unary => write!(f, "{tag}:{}:{}", self.space, self.subject),
            FactKind::Numeric => {
                write!(f, "{tag}:{}:{}:{:016x}", self.space, self.subject, self.payload)
            }
            FactKind::Binary | FactKind::EntityAttr => {
                write!(f, "{tag}:{}:{}:{}", self.space, self.subject, self.payload)
            }
        }
    }
}

impl FromStr for FactId {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || KbError::InvalidFactId(s.to_string());
        let parts: Vec<&str> = s.split(':').collect();
        let num = |i: usize| -> Result<u32, KbError> {
            parts.get(i).and_then(|p| p.parse().ok()).ok_or_else(invalid)
        };

        match (parts.first().copied(), parts.len()) {
            (Some("u"), 3) => Ok(FactId::unary(num(1)?, num(2)?)),
            (Some("b"), 4) => Ok(FactId::binary(num(1)?, num(2)?, num(3)?)),
            (Some("e"), 4) => Ok(FactId::entity_attr(num(1)?, num(2)?, num(3)?)),
            (Some("n"), 4) => {
                let bits = u64::from_str_radix(parts[3], 16).map_err(|_| invalid())?;
                Ok(FactId::numeric(num(1)?, num(2)?, f64::from_bits(bits)))
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for FactId {
    type Error = KbError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FactId> for String {
    fn from(id: FactId) -> Self {
        id.to_string()
    }
}

// ============================================================================
// Justification store
// ============================================================================

/// One derivation edge: the rule that fired and the witness premises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Justification {
    pub rule: RuleId,
    pub premises: Vec<FactId>,
}

/// Append-only store of derivation edges.
#[derive(Debug, Default, Clone)]
pub struct JustificationStore {
    by_fact: AHashMap<FactId, Vec<Justification>>,
    /// Derived facts in the order they were first justified.
    order: Vec<FactId>,
}

impl JustificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_unary_fact_id(&self, unary: UnaryId, subject: EntityId) -> FactId {
        FactId::unary(unary, subject)
    }

    pub fn make_fact_id(&self, subject: EntityId, pred: PredId, object: EntityId) -> FactId {
        FactId::binary(pred, subject, object)
    }

    pub fn make_numeric_fact_id(&self, attr: AttrId, subject: EntityId, value: f64) -> FactId {
        FactId::numeric(attr, subject, value)
    }

    pub fn make_entity_attr_fact_id(
        &self,
        attr: AttrId,
        subject: EntityId,
        object: EntityId,
    ) -> FactId {
        FactId::entity_attr(attr, subject, object)
    }

    pub fn unpack_fact_id(&self, id: FactId) -> Fact {
        id.unpack()
    }

    /// Record `fact <- (rule, premises)`. Returns `false` if this exact edge
    /// was already recorded.
    pub fn add_derived_fact(&mut self, fact: FactId, rule: RuleId, premises: Vec<FactId>) -> bool {
        let edge = Justification { rule, premises };
        let edges = self.by_fact.entry(fact).or_default();
        if edges.contains(&edge) {
            return false;
        }
        if edges.is_empty() {
            self.order.push(fact);
        }
        edges.push(edge);
        true
    }

    pub fn justifications(&self, fact: FactId) -> &[Justification] {
        self.by_fact.get(&fact).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_derived(&self, fact: FactId) -> bool {
        self.by_fact.contains_key(&fact)
    }

    /// Derived facts in first-justified order.
    pub fn derived_facts(&self) -> &[FactId] {
        &self.order
    }

    /// Number of derived facts.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.by_fact.values().map(Vec::len).sum()
    }

    /// Derivation tree for `fact`, following the first recorded edge of each
    /// derived fact. Facts with no edge are leaves (asserted facts).
    pub fn explain(&self, fact: FactId) -> Explanation {
        let mut on_path = AHashSet::new();
        self.explain_inner(fact, &mut on_path)
    }

    fn explain_inner(&self, fact: FactId, on_path: &mut AHashSet<FactId>) -> Explanation {
        let Some(first) = self.by_fact.get(&fact).and_then(|edges| edges.first()) else {
            return Explanation::Asserted(fact.unpack());
        };
        if !on_path.insert(fact) {
            return Explanation::Cycle(fact.unpack());
        }
        let premises = first
            .premises
            .iter()
            .map(|&p| self.explain_inner(p, on_path))
            .collect();
        on_path.remove(&fact);
        Explanation::Derived {
            fact: fact.unpack(),
            rule: first.rule,
            premises,
        }
    }
}

/// A derivation tree produced by [`JustificationStore::explain`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Explanation {
    /// A fact with no recorded derivation.
    Asserted(Fact),
    Derived {
        fact: Fact,
        rule: RuleId,
        premises: Vec<Explanation>,
    },
    /// A fact already being explained higher up the tree.
    Cycle(Fact),
}

impl Explanation {
    pub fn fact(&self) -> &Fact {
        match self {
            Explanation::Asserted(f) | Explanation::Cycle(f) => f,
            Explanation::Derived { fact, .. } => fact,
        }
    }

    /// Leaves of the tree: the asserted facts the derivation rests on.
    pub fn support(&self) -> Vec<Fact> {
        let mut out = Vec::new();
        self.collect_support(&mut out);
        out
    }

    fn collect_support(&self, out: &mut Vec<Fact>) {
        match self {
            Explanation::Asserted(f) => {
                if !out.contains(f) {
                    out.push(*f);
                }
            }
            Explanation::Derived { premises, .. } => {
                for p in premises {
                    p.collect_support(out);
                }
            }
            Explanation::Cycle(_) => {}
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Explanation::Derived { premises, .. } => {
                1 + premises.iter().map(Explanation::depth).max().unwrap_or(0)
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fact_ids_roundtrip_through_text() {
        let ids = [
            FactId::unary(3, 7),
            FactId::binary(2, 0, 5),
            FactId::numeric(1, 4, -12.5),
            FactId::entity_attr(0, 9, 1),
        ];
        for id in ids {
            let text = id.to_string();
            assert_eq!(text.parse::<FactId>(), Ok(id), "{text}");
        }
        assert_eq!(FactId::binary(2, 0, 5).to_string(), "b:2:0:5");
    }

    #[test]
    fn malformed_fact_id_text_is_rejected() {
        for bad in ["", "u:1", "x:1:2", "b:1:2", "n:1:2:zz", "u:-1:2"] {
            assert!(
                matches!(bad.parse::<FactId>(), Err(KbError::InvalidFactId(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn unpack_recovers_shape() {
        let store = JustificationStore::new();
        let id = store.make_numeric_fact_id(2, 8, 900.0);
        assert_eq!(
            store.unpack_fact_id(id),
            Fact::Numeric {
                attr: 2,
                subject: 8,
                value: 900.0
            }
        );
        assert_ne!(store.make_unary_fact_id(1, 2), store.make_fact_id(2, 1, 0));
    }

    #[test]
    fn duplicate_edges_are_ignored() {
        let mut store = JustificationStore::new();
        let derived = FactId::unary(1, 0);
        let premise = FactId::unary(0, 0);

        assert!(store.add_derived_fact(derived, 0, vec![premise]));
        assert!(!store.add_derived_fact(derived, 0, vec![premise]));
        assert!(store.add_derived_fact(derived, 1, vec![]));
        assert_eq!(store.len(), 1);
        assert_eq!(store.edge_count(), 2);
        assert_eq!(store.justifications(derived)[0].rule, 0);
    }

    #[test]
    fn explain_walks_to_asserted_leaves() {
        let mut store = JustificationStore::new();
        let base = FactId::unary(0, 0);
        let mid = FactId::unary(1, 0);
        let top = FactId::unary(2, 0);
        store.add_derived_fact(mid, 0, vec![base]);
        store.add_derived_fact(top, 1, vec![mid]);

        let tree = store.explain(top);
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.support(), vec![base.unpack()]);
        assert_eq!(store.explain(base), Explanation::Asserted(base.unpack()));
    }

    #[test]
    fn explain_terminates_on_cyclic_edges() {
        let mut store = JustificationStore::new();
        let a = FactId::unary(0, 0);
        let b = FactId::unary(1, 0);
        store.add_derived_fact(a, 0, vec![b]);
        store.add_derived_fact(b, 1, vec![a]);

        let tree = store.explain(a);
        assert_eq!(tree.depth(), 2);
        assert!(tree.support().is_empty());
    }
}
