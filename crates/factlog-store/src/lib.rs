//! Factlog: a small in-process deductive database.
//!
//! Facts asserted by the compiler/session layer live in a dense
//! [`KnowledgeBase`]: category membership, binary relations (forward and
//! inverse adjacency), numeric attributes, and entity-valued attributes, all
//! over one entity id space and all backed by [`BitSet`]s.
//!
//! Queries and rule bodies are [`SetPlan`] expressions evaluated by
//! [`execute_set`] into bit vectors. A [`RuleStore`] applies compiled
//! [`RulePlan`]s either once (naive) or to a fixpoint (semi-naive), and can
//! record why each derived fact holds in a [`JustificationStore`].
//!
//! ## Module Organization
//!
//! - `bitset`: packed 64-bit-word bit vector
//! - `store`: relation store and capacity management
//! - `attr_index`: numeric and entity-valued attribute indices
//! - `plan` / `executor`: set-algebra IR and its evaluator
//! - `rules`: rule store and fixpoint engine
//! - `justification`: fact ids, derivation edges, explanations
//!
//! Identifiers are allocated by the caller: dense, zero-based, never reused.
//! The engine never invents ids.

pub mod attr_index;
pub mod bitset;
pub mod config;
pub mod error;
pub mod executor;
pub mod justification;
pub mod plan;
pub mod rules;
pub mod store;

/// Index into the universe of individuals.
pub type EntityId = u32;
/// Index into the category space.
pub type UnaryId = u32;
/// Index into the binary-relation space.
pub type PredId = u32;
/// Index into the attribute space (numeric and entity-valued share it).
pub type AttrId = u32;
/// Position of a rule in its [`RuleStore`].
pub type RuleId = usize;

pub use attr_index::{Comparator, EntityAttrIndex, NumericIndex};
pub use bitset::BitSet;
pub use config::EngineConfig;
pub use error::{KbError, Result};
pub use executor::execute_set;
pub use justification::{Explanation, Fact, FactId, Justification, JustificationStore};
pub use plan::{AttrValue, DepSet, Emit, RulePlan, SetPlan};
pub use rules::{ApplyOptions, FixpointReport, RoundStats, RuleStore};
pub use store::{KnowledgeBase, RelationMatrix};
