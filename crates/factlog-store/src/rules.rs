//! Rule store and forward-chaining engine.
//!
//! Two evaluation modes:
//!
//! - **naive**: one pass over every rule in registration order;
//! - **delta** (semi-naive): repeated rounds until a round adds nothing.
//!   Round 1 fires every rule. Later rounds fire only rules whose [`DepSet`]
//!   meets the ids changed in the previous round. Pruning is per rule, not
//!   per tuple: an activated rule re-scans its whole body.
//!
//! Rules never mint entities, so the id spaces are fixed for the duration of
//! a fixpoint and termination follows from monotonic insertion. A rule set
//! whose numeric heads keep overwriting each other does not converge; bound
//! it with `max_rounds`.
//!
//! When a [`JustificationStore`] is supplied, every newly added fact gets one
//! edge `fact <- (rule id, witness premises)`. Witnesses are collected before
//! the fact is inserted, so a fact never cites itself.

use crate::bitset::BitSet;
use crate::config::EngineConfig;
use crate::error::{KbError, Result};
use crate::executor::execute_set;
use crate::justification::{FactId, JustificationStore};
use crate::plan::{AttrValue, DepSet, Emit, RulePlan, SetPlan};
use crate::store::KnowledgeBase;
use crate::{EntityId, PredId, RuleId};
use serde::Serialize;

// ============================================================================
// Options and reports
// ============================================================================

/// Per-call evaluation options.
#[derive(Debug, Default)]
pub struct ApplyOptions<'a> {
    pub delta: bool,
    /// Semi-naive round bound; ignored in naive mode.
    pub max_rounds: Option<usize>,
    pub justifications: Option<&'a mut JustificationStore>,
}

impl<'a> ApplyOptions<'a> {
    pub fn naive() -> Self {
        Self::default()
    }

    pub fn delta() -> Self {
        Self {
            delta: true,
            ..Self::default()
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            delta: config.delta,
            max_rounds: config.max_rounds,
            justifications: None,
        }
    }

    pub fn with_max_rounds(mut self, limit: usize) -> Self {
        self.max_rounds = Some(limit);
        self
    }

    pub fn with_justifications(self, store: &'a mut JustificationStore) -> ApplyOptions<'a> {
        ApplyOptions {
            delta: self.delta,
            max_rounds: self.max_rounds,
            justifications: Some(store),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundStats {
    pub round: usize,
    pub rules_evaluated: usize,
    pub facts_added: usize,
}

/// Outcome of one `apply_rules` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FixpointReport {
    pub rounds: usize,
    pub facts_added: usize,
    pub per_round: Vec<RoundStats>,
}

// ============================================================================
// Rule store
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    rules: Vec<RulePlan>,
    config: EngineConfig,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            rules: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Options for `apply_rules` taken from this store's config.
    pub fn default_options(&self) -> ApplyOptions<'static> {
        ApplyOptions::from_config(&self.config)
    }

    /// Register a rule and return its id. Rules decoded without
    /// dependencies get them computed here.
    pub fn add_rule(&mut self, mut rule: RulePlan) -> RuleId {
        if rule.deps.is_empty() {
            rule.deps = rule.compute_deps();
        }
        self.rules.push(rule);
        self.rules.len() - 1
    }

    pub fn rules(&self) -> &[RulePlan] {
        &self.rules
    }

    pub fn rule(&self, id: RuleId) -> Option<&RulePlan> {
        self.rules.get(id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply the rules and return the number of facts newly added.
    pub fn apply_rules(&self, kb: &mut KnowledgeBase, options: ApplyOptions<'_>) -> Result<usize> {
        Ok(self.apply_rules_with_report(kb, options)?.facts_added)
    }

    pub fn apply_rules_with_report(
        &self,
        kb: &mut KnowledgeBase,
        mut options: ApplyOptions<'_>,
    ) -> Result<FixpointReport> {
        let mut report = FixpointReport::default();
        let mut changed = DepSet::new();

        loop {
            let round = report.rounds + 1;
            if options.delta {
                if let Some(limit) = options.max_rounds {
                    if round > limit {
                        return Err(KbError::RoundLimitExceeded {
                            limit,
                            added: report.facts_added,
                        });
                    }
                }
            }

            let mut touched = DepSet::new();
            let mut stats = RoundStats {
                round,
                rules_evaluated: 0,
                facts_added: 0,
            };
            for (id, rule) in self.rules.iter().enumerate() {
                if round > 1 && !rule.deps.intersects(&changed) {
                    continue;
                }
                stats.rules_evaluated += 1;
                let added = fire_rule(
                    id,
                    rule,
                    kb,
                    options.justifications.as_deref_mut(),
                    &mut touched,
                );
                if added > 0 {
                    tracing::trace!(rule = id, added, round, "rule fired");
                }
                stats.facts_added += added;
            }

            tracing::debug!(
                round,
                rules_evaluated = stats.rules_evaluated,
                facts_added = stats.facts_added,
                delta = options.delta,
                "rule round complete"
            );
            report.rounds = round;
            report.facts_added += stats.facts_added;
            let quiescent = stats.facts_added == 0;
            report.per_round.push(stats);

            if !options.delta || quiescent {
                return Ok(report);
            }
            changed = touched;
        }
    }
}

// ============================================================================
// Firing
// ============================================================================

fn fire_rule(
    rule_id: RuleId,
    rule: &RulePlan,
    kb: &mut KnowledgeBase,
    mut justifications: Option<&mut JustificationStore>,
    touched: &mut DepSet,
) -> usize {
    let mut subjects = execute_set(&rule.body, kb);
    if let Some(restriction) = &rule.subject_plan {
        if !subjects.is_empty() {
            subjects.and_assign(&execute_set(restriction, kb));
        }
    }
    if subjects.is_empty() {
        return 0;
    }

    let mut witnesses = WitnessCollector::new(&rule.body);
    let mut added = 0;

    match &rule.head {
        Emit::Unary { unary } => {
            for s in subjects.iter_set_bits() {
                let s = s as EntityId;
                if kb.has_unary(*unary, s) {
                    continue;
                }
                let premises = if justifications.is_some() {
                    Some(witnesses.premises(s, kb))
                } else {
                    None
                };
                kb.insert_unary(*unary, s);
                added += 1;
                touched.unary.insert(*unary);
                if let (Some(store), Some(premises)) = (justifications.as_deref_mut(), premises) {
                    store.add_derived_fact(FactId::unary(*unary, s), rule_id, premises);
                }
            }
        }

        Emit::Binary { pred, objects } => {
            let objects = execute_set(objects, kb);
            for s in subjects.iter_set_bits() {
                let s = s as EntityId;
                let mut premises: Option<Vec<FactId>> = None;
                for o in objects.iter_set_bits() {
                    let o = o as EntityId;
                    if kb.has_binary(s, *pred, o) {
                        continue;
                    }
                    if justifications.is_some() && premises.is_none() {
                        premises = Some(witnesses.premises(s, kb));
                    }
                    kb.insert_binary(s, *pred, o);
                    added += 1;
                    touched.preds.insert(*pred);
                    if let (Some(store), Some(premises)) =
                        (justifications.as_deref_mut(), premises.as_ref())
                    {
                        store.add_derived_fact(
                            FactId::binary(*pred, s, o),
                            rule_id,
                            premises.clone(),
                        );
                    }
                }
            }
        }

        Emit::Attr {
            attr,
            value: AttrValue::Number(value),
            ..
        } => {
            for s in subjects.iter_set_bits() {
                let s = s as EntityId;
                if kb
                    .numeric_value(*attr, s)
                    .is_some_and(|cur| same_number(cur, *value))
                {
                    continue;
                }
                let premises = if justifications.is_some() {
                    Some(witnesses.premises(s, kb))
                } else {
                    None
                };
                kb.set_numeric(*attr, s, *value);
                added += 1;
                touched.attrs.insert(*attr);
                if let (Some(store), Some(premises)) = (justifications.as_deref_mut(), premises) {
                    store.add_derived_fact(FactId::numeric(*attr, s, *value), rule_id, premises);
                }
            }
        }

        Emit::Attr {
            attr,
            value: AttrValue::Entities(values),
            project,
        } => {
            let values = execute_set(values, kb);
            for s in subjects.iter_set_bits() {
                let s = s as EntityId;
                let mut premises: Option<Vec<FactId>> = None;
                for o in values.iter_set_bits() {
                    let o = o as EntityId;
                    if kb.has_entity_attr(*attr, s, o) {
                        continue;
                    }
                    if justifications.is_some() && premises.is_none() {
                        premises = Some(witnesses.premises(s, kb));
                    }
                    kb.insert_entity_attr(*attr, s, o, *project);
                    added += 1;
                    touched.attrs.insert(*attr);
                    if let Some(pred) = project {
                        touched.preds.insert(*pred);
                    }
                    if let (Some(store), Some(premises)) =
                        (justifications.as_deref_mut(), premises.as_ref())
                    {
                        store.add_derived_fact(
                            FactId::entity_attr(*attr, s, o),
                            rule_id,
                            premises.clone(),
                        );
                    }
                }
            }
        }
    }

    added
}

fn push_unique(id: FactId, out: &mut Vec<FactId>) {
    if !out.contains(&id) {
        out.push(id);
    }
}

/// Exact equality, with NaN equal to an identical NaN so a NaN head settles.
#[inline]
fn same_number(a: f64, b: f64) -> bool {
    a == b || a.to_bits() == b.to_bits()
}

// ============================================================================
// Premise witnesses
// ============================================================================

/// Finds one witness fact per body conjunct for a concrete subject.
///
/// Body nodes are numbered in pre-order and sub-plan results are cached per
/// node for the duration of one firing. A cached set may miss facts inserted
/// later in the firing, but every member still holds, so any witness drawn
/// from it is valid.
struct WitnessCollector<'p> {
    body: &'p SetPlan,
    /// Node count of the subtree rooted at each pre-order index.
    sizes: Vec<usize>,
    cache: Vec<Option<BitSet>>,
}

impl<'p> WitnessCollector<'p> {
    fn new(body: &'p SetPlan) -> Self {
        let mut sizes = Vec::new();
        subtree_sizes(body, &mut sizes);
        let cache = vec![None; sizes.len()];
        Self { body, sizes, cache }
    }

    fn premises(&mut self, subject: EntityId, kb: &KnowledgeBase) -> Vec<FactId> {
        let mut out = Vec::new();
        let body = self.body;
        self.collect(body, 0, subject, kb, &mut out);
        out
    }

    fn evaluated(&mut self, plan: &SetPlan, node: usize, kb: &KnowledgeBase) -> &BitSet {
        self.cache[node].get_or_insert_with(|| execute_set(plan, kb))
    }

    /// Sub-plans of `plan` paired with their pre-order indices.
    fn child_nodes<'a>(&self, plan: &'a SetPlan, node: usize) -> Vec<(&'a SetPlan, usize)> {
        let mut next = node + 1;
        plan.children()
            .into_iter()
            .map(|child| {
                let at = next;
                next += self.sizes[at];
                (child, at)
            })
            .collect()
    }

    fn collect(
        &mut self,
        plan: &SetPlan,
        node: usize,
        s: EntityId,
        kb: &KnowledgeBase,
        out: &mut Vec<FactId>,
    ) {
        match plan {
            SetPlan::UnarySet { unary } => {
                if kb.has_unary(*unary, s) {
                    push_unique(FactId::unary(*unary, s), out);
                }
            }
            SetPlan::Intersect { .. } => {
                for (child, child_node) in self.child_nodes(plan, node) {
                    self.collect(child, child_node, s, kb, out);
                }
            }
            SetPlan::Union { .. } => {
                for (child, child_node) in self.child_nodes(plan, node) {
                    if self.evaluated(child, child_node, kb).contains(s as usize) {
                        self.collect(child, child_node, s, kb, out);
                        break;
                    }
                }
            }
            SetPlan::Preimage { pred, objects } => {
                if let Some(o) = self.first_object(s, *pred, objects, node + 1, kb) {
                    push_unique(FactId::binary(*pred, s, o), out);
                }
            }
            SetPlan::Image {
                subjects,
                pred,
                objects,
            } => {
                let subjects_node = node + 1;
                let objects_node = subjects_node + self.sizes[subjects_node];
                self.collect(subjects, subjects_node, s, kb, out);
                if let Some(o) = self.first_object(s, *pred, objects, objects_node, kb) {
                    push_unique(FactId::binary(*pred, s, o), out);
                }
            }
            SetPlan::NumFilter { attr, cmp, value } => {
                if let Some(v) = kb.numeric_value(*attr, s) {
                    if cmp.test(v, *value) {
                        push_unique(FactId::numeric(*attr, s, v), out);
                    }
                }
            }
            SetPlan::AttrEntityFilter { attr, values } => {
                let Some(row) = kb.entity_attr_values(*attr, s) else {
                    return;
                };
                let allowed = self.evaluated(values, node + 1, kb);
                if let Some(o) = row.iter_set_bits().find(|&o| allowed.contains(o)) {
                    push_unique(FactId::entity_attr(*attr, s, o as EntityId), out);
                }
            }
            SetPlan::AllEntities | SetPlan::EntitySet { .. } | SetPlan::Not { .. } => {}
        }
    }

    /// Smallest `o` in `objects` with `pred(s, o)`.
    fn first_object(
        &mut self,
        s: EntityId,
        pred: PredId,
        objects: &SetPlan,
        objects_node: usize,
        kb: &KnowledgeBase,
    ) -> Option<EntityId> {
        let row = kb.objects_of(s, pred)?;
        let allowed = self.evaluated(objects, objects_node, kb);
        row.iter_set_bits()
            .find(|&o| allowed.contains(o))
            .map(|o| o as EntityId)
    }
}

/// Push the subtree size of every node of `plan` in pre-order; returns the
/// size of `plan` itself.
fn subtree_sizes(plan: &SetPlan, sizes: &mut Vec<usize>) -> usize {
    let at = sizes.len();
    sizes.push(1);
    let size = 1 + plan
        .children()
        .into_iter()
        .map(|child| subtree_sizes(child, sizes))
        .sum::<usize>();
    sizes[at] = size;
    size
}
