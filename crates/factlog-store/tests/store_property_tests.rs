use factlog_store::{execute_set, BitSet, Comparator, KnowledgeBase, SetPlan};
use proptest::prelude::*;

const MAX_ENTITY: u32 = 40;
const MAX_UNARY: u32 = 4;
const MAX_PRED: u32 = 3;
const MAX_ATTR: u32 = 2;

#[derive(Debug, Clone)]
struct Seed {
    unary: Vec<(u32, u32)>,
    binary: Vec<(u32, u32, u32)>,
    numeric: Vec<(u32, u32, i32)>,
    entity_attr: Vec<(u32, u32, u32)>,
}

fn seed_strategy() -> impl Strategy<Value = Seed> {
    (
        prop::collection::vec((0..MAX_UNARY, 0..MAX_ENTITY), 0..30),
        prop::collection::vec((0..MAX_ENTITY, 0..MAX_PRED, 0..MAX_ENTITY), 0..60),
        prop::collection::vec((0..MAX_ATTR, 0..MAX_ENTITY, -5i32..5), 0..20),
        prop::collection::vec((0..MAX_ATTR, 0..MAX_ENTITY, 0..MAX_ENTITY), 0..20),
    )
        .prop_map(|(unary, binary, numeric, entity_attr)| Seed {
            unary,
            binary,
            numeric,
            entity_attr,
        })
}

fn build_kb(seed: &Seed) -> KnowledgeBase {
    let mut kb = KnowledgeBase::new();
    kb.ensure_entity_capacity(MAX_ENTITY as usize);
    for &(u, s) in &seed.unary {
        kb.insert_unary(u, s);
    }
    for &(s, p, o) in &seed.binary {
        kb.insert_binary(s, p, o);
    }
    for &(a, s, v) in &seed.numeric {
        kb.set_numeric(a, s, f64::from(v));
    }
    for &(a, s, o) in &seed.entity_attr {
        kb.insert_entity_attr(a, s, o, None);
    }
    kb
}

fn comparator_strategy() -> impl Strategy<Value = Comparator> {
    prop_oneof![
        Just(Comparator::Gt),
        Just(Comparator::Gte),
        Just(Comparator::Lt),
        Just(Comparator::Lte),
        Just(Comparator::Eq),
        Just(Comparator::Neq),
    ]
}

fn plan_strategy() -> impl Strategy<Value = SetPlan> {
    let leaf = prop_oneof![
        Just(SetPlan::all()),
        (0..MAX_ENTITY + 4).prop_map(SetPlan::entity),
        (0..MAX_UNARY + 1).prop_map(SetPlan::unary),
        (0..MAX_ATTR, comparator_strategy(), -5i32..5)
            .prop_map(|(a, c, v)| SetPlan::num_filter(a, c, f64::from(v))),
    ];
    leaf.prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..3).prop_map(SetPlan::intersect),
            prop::collection::vec(inner.clone(), 0..3).prop_map(SetPlan::union),
            (inner.clone(), inner.clone()).prop_map(|(p, u)| SetPlan::not(p, u)),
            (inner.clone(), 0..MAX_PRED + 1, inner.clone())
                .prop_map(|(s, p, o)| SetPlan::image(s, p, o)),
            (0..MAX_PRED + 1, inner.clone()).prop_map(|(p, o)| SetPlan::preimage(p, o)),
            (0..MAX_ATTR, inner).prop_map(|(a, v)| SetPlan::attr_entity_filter(a, v)),
        ]
    })
}

/// Every id named by an `EntitySet` anywhere in `plan`.
fn named_entities(plan: &SetPlan) -> BitSet {
    let mut out = BitSet::new(0);
    if let SetPlan::EntitySet { id } = plan {
        out.or_assign(&BitSet::singleton(0, *id as usize));
    }
    for child in plan.children() {
        out.or_assign(&named_entities(child));
    }
    out
}

fn bitset_strategy() -> impl Strategy<Value = BitSet> {
    (1usize..200).prop_flat_map(|size| {
        prop::collection::vec(0..size, 0..40)
            .prop_map(move |bits| BitSet::from_indices(size, bits))
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, ..ProptestConfig::default() })]

    #[test]
    fn prop_bitset_point_ops(size in 1usize..300, picks in prop::collection::vec(any::<prop::sample::Index>(), 1..20)) {
        let mut bs = BitSet::new(size);
        for pick in &picks {
            let i = pick.index(size);
            bs.set_bit(i);
            prop_assert!(bs.has_bit(i));
        }
        for pick in &picks {
            let i = pick.index(size);
            bs.clear_bit(i);
            prop_assert!(!bs.has_bit(i));
        }
        prop_assert!(bs.is_empty());
    }

    #[test]
    fn prop_bitset_algebra(a in bitset_strategy(), b in bitset_strategy()) {
        let and = a.and(&b);
        prop_assert!(and.popcount() <= a.popcount().min(b.popcount()));
        prop_assert_eq!(and.size(), a.size().max(b.size()));
        prop_assert!(a.or(&a).same_members(&a));
        prop_assert!(a.and_not(&a).is_empty());
        prop_assert_eq!(a.intersects(&b), !and.is_empty());
        prop_assert_eq!(a.or(&b).popcount() + and.popcount(), a.popcount() + b.popcount());

        let iterated: Vec<usize> = a.iter_set_bits().collect();
        prop_assert!(iterated.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(iterated.len(), a.popcount());
    }

    #[test]
    fn prop_relation_store_symmetry(seed in seed_strategy()) {
        let kb = build_kb(&seed);
        for p in 0..MAX_PRED + 1 {
            for s in 0..MAX_ENTITY {
                for o in 0..MAX_ENTITY {
                    let fwd = kb.objects_of(s, p).is_some_and(|row| row.contains(o as usize));
                    let inv = kb.subjects_of(p, o).is_some_and(|row| row.contains(s as usize));
                    prop_assert_eq!(kb.has_binary(s, p, o), fwd);
                    prop_assert_eq!(fwd, inv);
                }
            }
        }
        for &(s, p, o) in &seed.binary {
            prop_assert!(kb.has_binary(s, p, o));
        }
    }

    #[test]
    fn prop_insertion_is_idempotent(seed in seed_strategy()) {
        let mut kb = build_kb(&seed);
        let before = kb.facts();
        for &(u, s) in &seed.unary {
            prop_assert!(!kb.insert_unary(u, s));
        }
        for &(s, p, o) in &seed.binary {
            prop_assert!(!kb.insert_binary(s, p, o));
        }
        for &(a, s, o) in &seed.entity_attr {
            prop_assert!(!kb.insert_entity_attr(a, s, o, None));
        }
        prop_assert_eq!(before, kb.facts());
    }

    #[test]
    fn prop_not_partitions_its_universe(seed in seed_strategy(), p in plan_strategy(), u in plan_strategy()) {
        let kb = build_kb(&seed);
        let not = execute_set(&SetPlan::not(p.clone(), u.clone()), &kb);
        let inside = execute_set(&p, &kb).and(&execute_set(&u, &kb));
        let universe = execute_set(&u, &kb);

        prop_assert!(!not.intersects(&inside));
        prop_assert!(not.or(&inside).same_members(&universe));
    }

    #[test]
    fn prop_results_stay_within_registered_or_named_entities(seed in seed_strategy(), plan in plan_strategy()) {
        let kb = build_kb(&seed);
        let result = execute_set(&plan, &kb);
        let mut allowed = kb.universe();
        allowed.or_assign(&named_entities(&plan));
        prop_assert!(result.and_not(&allowed).is_empty());
        prop_assert_eq!(kb.entity_count(), MAX_ENTITY as usize);
    }

    #[test]
    fn prop_child_order_does_not_change_results(seed in seed_strategy(), children in prop::collection::vec(plan_strategy(), 1..4)) {
        let kb = build_kb(&seed);
        let mut reversed = children.clone();
        reversed.reverse();

        let a = execute_set(&SetPlan::intersect(children.clone()), &kb);
        let b = execute_set(&SetPlan::intersect(reversed.clone()), &kb);
        prop_assert!(a.same_members(&b));

        let a = execute_set(&SetPlan::union(children), &kb);
        let b = execute_set(&SetPlan::union(reversed), &kb);
        prop_assert!(a.same_members(&b));
    }
}
