//! Plan IR: set expressions over entity ids, rule heads, and compiled rules.
//!
//! A [`SetPlan`] describes a set of entities in terms of the store's indices.
//! Query conditions and rule bodies use the same language. Plans are
//! immutable values and carry no store state, so one plan can be executed
//! against any snapshot.
//!
//! The serde form is internally tagged (`"op"` for plans, `"kind"` for heads)
//! so the compiler layer can hand plans over as JSON.

use crate::attr_index::Comparator;
use crate::error::Result;
use crate::{AttrId, EntityId, PredId, UnaryId};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

// ============================================================================
// Set plans
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SetPlan {
    /// Every registered entity.
    AllEntities,
    /// `{id}`.
    EntitySet { id: EntityId },
    /// Members of a unary predicate.
    UnarySet { unary: UnaryId },
    /// Conjunction. Must have at least one child.
    Intersect { children: Vec<SetPlan> },
    /// Disjunction. No children means the empty set.
    Union { children: Vec<SetPlan> },
    /// `universe \ plan`.
    Not {
        plan: Box<SetPlan>,
        universe: Box<SetPlan>,
    },
    /// Subjects `s` of `subjects` with some `o` in `objects` and `pred(s, o)`.
    Image {
        subjects: Box<SetPlan>,
        pred: PredId,
        objects: Box<SetPlan>,
    },
    /// Subjects `s` with `pred(s, o)` for some `o` in `objects`.
    Preimage { pred: PredId, objects: Box<SetPlan> },
    /// Subjects whose numeric `attr` satisfies `value_of(s) <cmp> value`.
    NumFilter {
        attr: AttrId,
        cmp: Comparator,
        value: f64,
    },
    /// Subjects with at least one entity value of `attr` in `values`.
    AttrEntityFilter { attr: AttrId, values: Box<SetPlan> },
}

impl SetPlan {
    pub fn all() -> Self {
        SetPlan::AllEntities
    }

    pub fn entity(id: EntityId) -> Self {
        SetPlan::EntitySet { id }
    }

    pub fn unary(unary: UnaryId) -> Self {
        SetPlan::UnarySet { unary }
    }

    pub fn intersect(children: Vec<SetPlan>) -> Self {
        SetPlan::Intersect { children }
    }

    pub fn union(children: Vec<SetPlan>) -> Self {
        SetPlan::Union { children }
    }

    pub fn not(plan: SetPlan, universe: SetPlan) -> Self {
        SetPlan::Not {
            plan: Box::new(plan),
            universe: Box::new(universe),
        }
    }

    pub fn image(subjects: SetPlan, pred: PredId, objects: SetPlan) -> Self {
        SetPlan::Image {
            subjects: Box::new(subjects),
            pred,
            objects: Box::new(objects),
        }
    }

    pub fn preimage(pred: PredId, objects: SetPlan) -> Self {
        SetPlan::Preimage {
            pred,
            objects: Box::new(objects),
        }
    }

    pub fn num_filter(attr: AttrId, cmp: Comparator, value: f64) -> Self {
        SetPlan::NumFilter { attr, cmp, value }
    }

    /// `NumFilter` from a comparator token as written in rule text.
    ///
    /// Fails with `UnsupportedComparator` for unknown tokens.
    pub fn num_filter_token(attr: AttrId, cmp: &str, value: f64) -> Result<Self> {
        Ok(SetPlan::NumFilter {
            attr,
            cmp: cmp.parse()?,
            value,
        })
    }

    pub fn attr_entity_filter(attr: AttrId, values: SetPlan) -> Self {
        SetPlan::AttrEntityFilter {
            attr,
            values: Box::new(values),
        }
    }

    /// Direct sub-plans, in field order.
    pub fn children(&self) -> Vec<&SetPlan> {
        match self {
            SetPlan::AllEntities
            | SetPlan::EntitySet { .. }
            | SetPlan::UnarySet { .. }
            | SetPlan::NumFilter { .. } => Vec::new(),
            SetPlan::Intersect { children } | SetPlan::Union { children } => {
                children.iter().collect()
            }
            SetPlan::Not { plan, universe } => vec![plan.as_ref(), universe.as_ref()],
            SetPlan::Image {
                subjects, objects, ..
            } => vec![subjects.as_ref(), objects.as_ref()],
            SetPlan::Preimage { objects, .. } => vec![objects.as_ref()],
            SetPlan::AttrEntityFilter { values, .. } => vec![values.as_ref()],
        }
    }

    /// Add every unary/predicate/attribute id this plan reads to `deps`.
    pub fn collect_deps(&self, deps: &mut DepSet) {
        match self {
            SetPlan::AllEntities | SetPlan::EntitySet { .. } => {}
            SetPlan::UnarySet { unary } => {
                deps.unary.insert(*unary);
            }
            SetPlan::Intersect { children } | SetPlan::Union { children } => {
                for child in children {
                    child.collect_deps(deps);
                }
            }
            SetPlan::Not { plan, universe } => {
                plan.collect_deps(deps);
                universe.collect_deps(deps);
            }
            SetPlan::Image {
                subjects,
                pred,
                objects,
            } => {
                deps.preds.insert(*pred);
                subjects.collect_deps(deps);
                objects.collect_deps(deps);
            }
            SetPlan::Preimage { pred, objects } => {
                deps.preds.insert(*pred);
                objects.collect_deps(deps);
            }
            SetPlan::NumFilter { attr, .. } => {
                deps.attrs.insert(*attr);
            }
            SetPlan::AttrEntityFilter { attr, values } => {
                deps.attrs.insert(*attr);
                values.collect_deps(deps);
            }
        }
    }
}

// ============================================================================
// Rule heads
// ============================================================================

/// Value written by an attribute head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrValue {
    Number(f64),
    Entities(SetPlan),
}

/// What a rule asserts for each subject in its body set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Emit {
    /// `unary(s)`.
    Unary { unary: UnaryId },
    /// `pred(s, o)` for every `o` in `objects`.
    Binary { pred: PredId, objects: SetPlan },
    /// Numeric value, or entity values (optionally mirrored into `project`).
    Attr {
        attr: AttrId,
        value: AttrValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project: Option<PredId>,
    },
}

impl Emit {
    pub fn collect_deps(&self, deps: &mut DepSet) {
        match self {
            Emit::Unary { unary } => {
                deps.unary.insert(*unary);
            }
            Emit::Binary { pred, objects } => {
                deps.preds.insert(*pred);
                objects.collect_deps(deps);
            }
            Emit::Attr {
                attr,
                value,
                project,
            } => {
                deps.attrs.insert(*attr);
                if let Some(pred) = project {
                    deps.preds.insert(*pred);
                }
                if let AttrValue::Entities(plan) = value {
                    plan.collect_deps(deps);
                }
            }
        }
    }
}

// ============================================================================
// Dependency sets
// ============================================================================

/// Unary, predicate, and attribute ids.
///
/// Used both for a rule's dependencies and for the ids touched by one
/// fixpoint round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepSet {
    #[serde(default)]
    pub unary: RoaringBitmap,
    #[serde(default)]
    pub preds: RoaringBitmap,
    #[serde(default)]
    pub attrs: RoaringBitmap,
}

impl DepSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.unary.is_empty() && self.preds.is_empty() && self.attrs.is_empty()
    }

    pub fn intersects(&self, other: &DepSet) -> bool {
        !self.unary.is_disjoint(&other.unary)
            || !self.preds.is_disjoint(&other.preds)
            || !self.attrs.is_disjoint(&other.attrs)
    }

    pub fn clear(&mut self) {
        self.unary.clear();
        self.preds.clear();
        self.attrs.clear();
    }
}

// ============================================================================
// Rules
// ============================================================================

/// A compiled rule: for every `s` in `body ∩ subject_plan`, assert `head`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulePlan {
    pub body: SetPlan,
    pub head: Emit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_plan: Option<SetPlan>,
    /// Ids read or written by body, head, and subject restriction.
    #[serde(default)]
    pub deps: DepSet,
}

impl RulePlan {
    pub fn new(body: SetPlan, head: Emit) -> Self {
        let mut rule = Self {
            body,
            head,
            subject_plan: None,
            deps: DepSet::default(),
        };
        rule.deps = rule.compute_deps();
        rule
    }

    pub fn with_subject_plan(mut self, subject_plan: SetPlan) -> Self {
        self.subject_plan = Some(subject_plan);
        self.deps = self.compute_deps();
        self
    }

    pub fn compute_deps(&self) -> DepSet {
        let mut deps = DepSet::default();
        self.body.collect_deps(&mut deps);
        self.head.collect_deps(&mut deps);
        if let Some(plan) = &self.subject_plan {
            plan.collect_deps(&mut deps);
        }
        deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deps_cover_body_head_and_subject_plan() {
        let rule = RulePlan::new(
            SetPlan::intersect(vec![
                SetPlan::unary(1),
                SetPlan::preimage(4, SetPlan::unary(2)),
            ]),
            Emit::Attr {
                attr: 7,
                value: AttrValue::Entities(SetPlan::attr_entity_filter(8, SetPlan::all())),
                project: Some(5),
            },
        )
        .with_subject_plan(SetPlan::num_filter(9, Comparator::Gt, 0.0));

        let deps = &rule.deps;
        assert_eq!(deps.unary.iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(deps.preds.iter().collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(deps.attrs.iter().collect::<Vec<_>>(), vec![7, 8, 9]);
    }

    #[test]
    fn dep_sets_intersect_per_family() {
        let mut a = DepSet::new();
        a.unary.insert(3);
        let mut b = DepSet::new();
        b.preds.insert(3);
        assert!(!a.intersects(&b));
        b.unary.insert(3);
        assert!(a.intersects(&b));
    }

    #[test]
    fn num_filter_token_rejects_unknown_comparator() {
        assert!(SetPlan::num_filter_token(0, "gte", 1.0).is_ok());
        assert!(SetPlan::num_filter_token(0, "about", 1.0).is_err());
    }

    #[test]
    fn plans_decode_from_tagged_json() {
        let json = r#"{
            "body": {"op": "num_filter", "attr": 0, "cmp": "gt", "value": 500.0},
            "head": {"kind": "unary", "unary": 3}
        }"#;
        let rule: RulePlan = serde_json::from_str(json).expect("decode rule");
        assert_eq!(rule.body, SetPlan::num_filter(0, Comparator::Gt, 500.0));
        assert!(rule.deps.is_empty());
        assert_eq!(rule.compute_deps().unary.len(), 1);

        let bad = r#"{"op": "num_filter", "attr": 0, "cmp": "~", "value": 1.0}"#;
        assert!(serde_json::from_str::<SetPlan>(bad).is_err());
    }
}
