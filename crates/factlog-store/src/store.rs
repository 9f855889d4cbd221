//! Relation store: the single source of truth for indexed facts.
//!
//! Four index families share one dense entity id space:
//!
//! - unary predicates: `unary_index[u]` is the member set of category `u`
//! - binary predicates: `relations[p].rows[s]` (objects of `s`) and
//!   `inv_relations[p].rows[o]` (subjects of `o`), always written together
//! - numeric attributes: `attr -> subject -> f64`
//! - entity-valued attributes: `attr -> subject -> {objects}`
//!
//! Every per-entity bit vector is sized to a physical capacity that doubles
//! as new entity ids are registered. Writers call the `ensure_*` methods (the
//! insert methods do it for them); readers are lenient and treat unknown ids
//! as absent.

use crate::attr_index::{doubled_capacity, EntityAttrIndex, NumericIndex};
use crate::bitset::BitSet;
use crate::config::EngineConfig;
use crate::justification::Fact;
use crate::{AttrId, EntityId, PredId, UnaryId};

/// Adjacency matrix for one binary predicate, one row per entity.
#[derive(Debug, Clone, Default)]
pub struct RelationMatrix {
    rows: Vec<BitSet>,
}

impl RelationMatrix {
    fn new(capacity: usize) -> Self {
        Self {
            rows: vec![BitSet::new(capacity); capacity],
        }
    }

    fn grow_to(&mut self, capacity: usize) {
        for row in &mut self.rows {
            row.resize(capacity);
        }
        self.rows.resize_with(capacity, || BitSet::new(capacity));
    }

    pub fn row(&self, entity: EntityId) -> Option<&BitSet> {
        self.rows.get(entity as usize)
    }

    pub fn rows(&self) -> &[BitSet] {
        &self.rows
    }
}

/// The knowledge base: unary, binary, numeric, and entity-valued facts.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    entity_count: usize,
    entity_capacity: usize,
    unary_index: Vec<BitSet>,
    relations: Vec<RelationMatrix>,
    inv_relations: Vec<RelationMatrix>,
    numeric: Vec<NumericIndex>,
    entity_attrs: Vec<EntityAttrIndex>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::with_config(&EngineConfig::default())
    }
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        Self {
            entity_count: 0,
            entity_capacity: config.initial_entity_capacity.max(1),
            unary_index: Vec::new(),
            relations: Vec::new(),
            inv_relations: Vec::new(),
            numeric: Vec::new(),
            entity_attrs: Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Capacity management
    // ------------------------------------------------------------------------

    /// Register entity ids `0..n`.
    ///
    /// When `n` exceeds the physical capacity, the capacity doubles and every
    /// per-entity bit vector, relation matrix, and attribute index is grown.
    pub fn ensure_entity_capacity(&mut self, n: usize) {
        if n <= self.entity_count {
            return;
        }
        self.entity_count = n;
        if n <= self.entity_capacity {
            return;
        }

        let capacity = doubled_capacity(self.entity_capacity, n);
        tracing::debug!(
            from = self.entity_capacity,
            to = capacity,
            "growing entity capacity"
        );
        for members in &mut self.unary_index {
            members.resize(capacity);
        }
        for matrix in self.relations.iter_mut().chain(self.inv_relations.iter_mut()) {
            matrix.grow_to(capacity);
        }
        for idx in &mut self.numeric {
            idx.grow_to(capacity);
        }
        for idx in &mut self.entity_attrs {
            idx.grow_to(capacity);
        }
        self.entity_capacity = capacity;
    }

    pub fn ensure_predicate_capacity(&mut self, n: usize) {
        while self.relations.len() < n {
            self.relations.push(RelationMatrix::new(self.entity_capacity));
            self.inv_relations
                .push(RelationMatrix::new(self.entity_capacity));
        }
    }

    pub fn ensure_unary_capacity(&mut self, n: usize) {
        let capacity = self.entity_capacity;
        if self.unary_index.len() < n {
            self.unary_index.resize_with(n, || BitSet::new(capacity));
        }
    }

    /// Grow both attribute families (numeric and entity-valued share ids).
    pub fn ensure_attribute_capacity(&mut self, n: usize) {
        let capacity = self.entity_capacity;
        if self.numeric.len() < n {
            self.numeric
                .resize_with(n, || NumericIndex::with_capacity(capacity));
        }
        if self.entity_attrs.len() < n {
            self.entity_attrs
                .resize_with(n, || EntityAttrIndex::with_capacity(capacity));
        }
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Assert `unary(subject)`. Returns `true` if the fact is new.
    pub fn insert_unary(&mut self, unary: UnaryId, subject: EntityId) -> bool {
        self.ensure_unary_capacity(unary as usize + 1);
        self.ensure_entity_capacity(subject as usize + 1);
        self.unary_index[unary as usize].set_bit(subject as usize)
    }

    /// Assert `pred(subject, object)` in both directions. Returns `true` if new.
    pub fn insert_binary(&mut self, subject: EntityId, pred: PredId, object: EntityId) -> bool {
        self.ensure_entity_capacity(subject.max(object) as usize + 1);
        self.ensure_predicate_capacity(pred as usize + 1);
        let p = pred as usize;
        let added = self.relations[p].rows[subject as usize].set_bit(object as usize);
        self.inv_relations[p].rows[object as usize].set_bit(subject as usize);
        added
    }

    /// Overwrite the numeric value of `attr` for `subject`.
    ///
    /// Always writes; callers that need no-op detection compare against
    /// [`KnowledgeBase::numeric_value`] first.
    pub fn set_numeric(&mut self, attr: AttrId, subject: EntityId, value: f64) {
        self.ensure_attribute_capacity(attr as usize + 1);
        self.ensure_entity_capacity(subject as usize + 1);
        self.numeric[attr as usize].set_value(subject as usize, value);
    }

    /// Add `object` to the values of `attr` for `subject`, optionally mirroring
    /// the pair into binary predicate `project`. Returns `true` if the
    /// attribute value is new.
    pub fn insert_entity_attr(
        &mut self,
        attr: AttrId,
        subject: EntityId,
        object: EntityId,
        project: Option<PredId>,
    ) -> bool {
        self.ensure_attribute_capacity(attr as usize + 1);
        self.ensure_entity_capacity(subject.max(object) as usize + 1);
        let added = self.entity_attrs[attr as usize].add_value(subject as usize, object as usize);
        if let Some(pred) = project {
            self.insert_binary(subject, pred, object);
        }
        added
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    /// Physical width of the store's entity-indexed bit vectors.
    pub fn entity_capacity(&self) -> usize {
        self.entity_capacity
    }

    pub fn unary_count(&self) -> usize {
        self.unary_index.len()
    }

    pub fn predicate_count(&self) -> usize {
        self.relations.len()
    }

    pub fn attribute_count(&self) -> usize {
        self.numeric.len()
    }

    /// Every registered entity, as a set sized like the store's indices.
    pub fn universe(&self) -> BitSet {
        let mut all = BitSet::full(self.entity_count);
        all.resize(self.entity_capacity);
        all
    }

    /// Empty set sized like the store's indices.
    pub fn empty_set(&self) -> BitSet {
        BitSet::new(self.entity_capacity)
    }

    pub fn unary_members(&self, unary: UnaryId) -> Option<&BitSet> {
        self.unary_index.get(unary as usize)
    }

    pub fn has_unary(&self, unary: UnaryId, subject: EntityId) -> bool {
        self.unary_members(unary)
            .is_some_and(|m| m.contains(subject as usize))
    }

    /// Membership test for `pred(subject, object)`; `false` for unknown ids.
    pub fn has_binary(&self, subject: EntityId, pred: PredId, object: EntityId) -> bool {
        self.objects_of(subject, pred)
            .is_some_and(|row| row.contains(object as usize))
    }

    /// Forward row: objects `o` with `pred(subject, o)`.
    pub fn objects_of(&self, subject: EntityId, pred: PredId) -> Option<&BitSet> {
        self.relations.get(pred as usize)?.row(subject)
    }

    /// Inverse row: subjects `s` with `pred(s, object)`.
    pub fn subjects_of(&self, pred: PredId, object: EntityId) -> Option<&BitSet> {
        self.inv_relations.get(pred as usize)?.row(object)
    }

    pub fn relation(&self, pred: PredId) -> Option<&RelationMatrix> {
        self.relations.get(pred as usize)
    }

    pub fn inverse_relation(&self, pred: PredId) -> Option<&RelationMatrix> {
        self.inv_relations.get(pred as usize)
    }

    pub fn numeric_index(&self, attr: AttrId) -> Option<&NumericIndex> {
        self.numeric.get(attr as usize)
    }

    pub fn numeric_value(&self, attr: AttrId, subject: EntityId) -> Option<f64> {
        self.numeric_index(attr)?.get(subject as usize)
    }

    pub fn entity_attr_index(&self, attr: AttrId) -> Option<&EntityAttrIndex> {
        self.entity_attrs.get(attr as usize)
    }

    pub fn entity_attr_values(&self, attr: AttrId, subject: EntityId) -> Option<&BitSet> {
        self.entity_attr_index(attr)?.values(subject as usize)
    }

    pub fn has_entity_attr(&self, attr: AttrId, subject: EntityId, object: EntityId) -> bool {
        self.entity_attr_index(attr)
            .is_some_and(|idx| idx.has_value(subject as usize, object as usize))
    }

    /// Every stored fact, ordered by index family and then by ids.
    pub fn facts(&self) -> Vec<Fact> {
        let mut out = Vec::new();
        for (u, members) in self.unary_index.iter().enumerate() {
            for s in members.iter_set_bits() {
                out.push(Fact::Unary {
                    unary: u as UnaryId,
                    subject: s as EntityId,
                });
            }
        }
        for (p, matrix) in self.relations.iter().enumerate() {
            for (s, row) in matrix.rows.iter().enumerate() {
                for o in row.iter_set_bits() {
                    out.push(Fact::Binary {
                        pred: p as PredId,
                        subject: s as EntityId,
                        object: o as EntityId,
                    });
                }
            }
        }
        for (a, idx) in self.numeric.iter().enumerate() {
            for s in idx.present().iter_set_bits() {
                if let Some(value) = idx.get(s) {
                    out.push(Fact::Numeric {
                        attr: a as AttrId,
                        subject: s as EntityId,
                        value,
                    });
                }
            }
        }
        for (a, idx) in self.entity_attrs.iter().enumerate() {
            for s in 0..self.entity_capacity {
                let Some(values) = idx.values(s) else {
                    break;
                };
                for o in values.iter_set_bits() {
                    out.push(Fact::EntityAttr {
                        attr: a as AttrId,
                        subject: s as EntityId,
                        object: o as EntityId,
                    });
                }
            }
        }
        out
    }

    /// Whether `fact` currently holds in the store.
    pub fn holds(&self, fact: &Fact) -> bool {
        match *fact {
            Fact::Unary { unary, subject } => self.has_unary(unary, subject),
            Fact::Binary {
                pred,
                subject,
                object,
            } => self.has_binary(subject, pred, object),
            Fact::Numeric {
                attr,
                subject,
                value,
            } => self
                .numeric_value(attr, subject)
                .is_some_and(|v| v == value || v.to_bits() == value.to_bits()),
            Fact::EntityAttr {
                attr,
                subject,
                object,
            } => self.has_entity_attr(attr, subject, object),
        }
    }
}
