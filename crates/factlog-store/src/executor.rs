//! Plan executor: evaluates a [`SetPlan`] to a [`BitSet`] against a store.
//!
//! Execution is a pure function of the plan and the current store snapshot.
//! Results are fresh values; nothing returned here aliases store memory, so
//! a result stays valid (if stale) across later mutations.

use crate::bitset::BitSet;
use crate::plan::SetPlan;
use crate::store::KnowledgeBase;
use crate::EntityId;

/// Evaluate `plan` against `kb`.
///
/// # Panics
///
/// On an `Intersect` with no children: it would denote the absolute
/// universe, which plans must spell as `AllEntities`.
pub fn execute_set(plan: &SetPlan, kb: &KnowledgeBase) -> BitSet {
    match plan {
        SetPlan::AllEntities => kb.universe(),

        // An id the store has not registered yet still names itself; a head
        // that emits it registers it on insertion.
        SetPlan::EntitySet { id } => BitSet::singleton(kb.entity_capacity(), *id as usize),

        SetPlan::UnarySet { unary } => {
            let mut out = kb.empty_set();
            if let Some(members) = kb.unary_members(*unary) {
                out.or_assign(members);
            }
            out
        }

        SetPlan::Intersect { children } => {
            let (first, rest) = children
                .split_first()
                .unwrap_or_else(|| panic!("Intersect plan with no children"));
            let mut acc = execute_set(first, kb);
            for child in rest {
                if acc.is_empty() {
                    break;
                }
                acc.and_assign(&execute_set(child, kb));
            }
            acc
        }

        SetPlan::Union { children } => {
            let mut acc = kb.empty_set();
            for child in children {
                acc.or_assign(&execute_set(child, kb));
            }
            acc
        }

        SetPlan::Not { plan, universe } => {
            let universe = execute_set(universe, kb);
            if universe.is_empty() {
                return universe;
            }
            universe.and_not(&execute_set(plan, kb))
        }

        SetPlan::Image {
            subjects,
            pred,
            objects,
        } => {
            let mut out = kb.empty_set();
            let Some(matrix) = kb.relation(*pred) else {
                return out;
            };
            let candidates = execute_set(subjects, kb);
            if candidates.is_empty() {
                return out;
            }
            let objects = execute_set(objects, kb);
            for s in candidates.iter_set_bits() {
                if matrix
                    .row(s as EntityId)
                    .is_some_and(|row| row.intersects(&objects))
                {
                    out.set_bit(s);
                }
            }
            out
        }

        SetPlan::Preimage { pred, objects } => {
            let mut out = kb.empty_set();
            let Some(inverse) = kb.inverse_relation(*pred) else {
                return out;
            };
            for o in execute_set(objects, kb).iter_set_bits() {
                if let Some(row) = inverse.row(o as EntityId) {
                    out.or_assign(row);
                }
            }
            out
        }

        SetPlan::NumFilter { attr, cmp, value } => {
            let mut out = kb.empty_set();
            if let Some(idx) = kb.numeric_index(*attr) {
                out.or_assign(&idx.filter(*cmp, *value));
            }
            out
        }

        SetPlan::AttrEntityFilter { attr, values } => {
            let mut out = kb.empty_set();
            if let Some(idx) = kb.entity_attr_index(*attr) {
                out.or_assign(&idx.filter(&execute_set(values, kb)));
            }
            out
        }
    }
}
