#![allow(missing_docs)]

mod common;

use std::collections::BTreeMap;

use arbor::{ArborError, Column, ColumnType, Result, Schema, Tuple, Value};
use common::{assert_fill, assert_sound, id_of, init_tracing, key, mem_tree};
use proptest::prelude::*;
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn note_schema(width: u16) -> Schema {
    Schema::new(
        vec![
            Column::new("id", ColumnType::Integer),
            Column::new("note", ColumnType::VarChar(width)),
        ],
        1,
    )
    .expect("schema")
}

fn note_row(id: i32, len: usize) -> Tuple {
    let fill = char::from(b'a' + (id % 26) as u8);
    Tuple::new(vec![Value::Integer(id), Value::Str(fill.to_string().repeat(len))])
}

fn note_len(tuple: &Tuple) -> usize {
    match tuple.get(1) {
        Some(Value::Str(s)) => s.len(),
        other => panic!("unexpected note {other:?}"),
    }
}

fn contents(tree: &arbor::BTreeFile) -> Result<Vec<(i32, usize)>> {
    tree.iter()
        .map(|t| t.map(|t| (id_of(&t), note_len(&t))))
        .collect()
}

#[derive(Clone, Debug)]
enum Op {
    Insert(i32, usize),
    Delete(i32),
    DeleteRun(i32, usize),
}

fn ops(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        4 => (0..400i32, 0..=max_len).prop_map(|(k, len)| Op::Insert(k, len)),
        2 => (0..400i32).prop_map(Op::Delete),
        1 => (0..400i32, 1..20usize).prop_map(|(k, n)| Op::DeleteRun(k, n)),
    ];
    prop::collection::vec(op, 1..700)
}

/// Applies `ops` to a tree and to a model map, then compares the two.
fn run_against_model(page_size: usize, width: u16, ops: &[Op]) -> Result<()> {
    let mut tree = mem_tree(page_size, note_schema(width))?;
    let mut model: BTreeMap<i32, usize> = BTreeMap::new();
    for op in ops {
        match *op {
            Op::Insert(id, len) => match tree.insert(note_row(id, len)) {
                Ok(cursor) => {
                    assert_eq!(model.insert(id, len), None);
                    assert_eq!(cursor.tuple(), &note_row(id, len));
                }
                Err(ArborError::DuplicateKey) => assert!(model.contains_key(&id)),
                Err(err) => return Err(err),
            },
            Op::Delete(id) => {
                assert_eq!(tree.delete_key(&key(id))?, model.remove(&id).is_some());
            }
            Op::DeleteRun(from, count) => {
                let expected: Vec<i32> =
                    model.range(from..).take(count).map(|(id, _)| *id).collect();
                let mut deleted = Vec::new();
                let mut next = tree.seek(&key(from))?;
                while let Some(mut cursor) = next {
                    if deleted.len() == count {
                        break;
                    }
                    deleted.push(id_of(cursor.tuple()));
                    tree.delete(&mut cursor)?;
                    next = tree.get_next(&cursor)?;
                }
                assert_eq!(deleted, expected);
                for id in deleted {
                    model.remove(&id);
                }
            }
        }
    }
    assert_sound(&tree);
    let max_tuple = 1 + 4 + 2 + usize::from(width);
    assert_fill(&tree, max_tuple)?;
    let expected: Vec<(i32, usize)> = model.into_iter().collect();
    assert_eq!(contents(&tree)?, expected);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn small_pages_match_model(ops in ops(120)) {
        init_tracing();
        run_against_model(512, 120, &ops).expect("workload");
    }

    #[test]
    fn medium_pages_match_model(ops in ops(300)) {
        init_tracing();
        run_against_model(1024, 300, &ops).expect("workload");
    }
}

#[test]
fn seeded_churn_on_small_pages() -> Result<()> {
    init_tracing();
    let mut rng = ChaCha8Rng::seed_from_u64(20_240_611);
    let mut tree = mem_tree(512, note_schema(150))?;
    let mut model: BTreeMap<i32, usize> = BTreeMap::new();
    for round in 0..12 {
        for _ in 0..1500 {
            let id = rng.gen_range(0..3000);
            if rng.gen_ratio(2, 3) {
                let len = rng.gen_range(0..=150);
                if tree.insert(note_row(id, len)).is_ok() {
                    model.insert(id, len);
                } else {
                    assert!(model.contains_key(&id));
                }
            } else {
                assert_eq!(tree.delete_key(&key(id))?, model.remove(&id).is_some());
            }
        }
        assert_sound(&tree);
        assert_fill(&tree, 1 + 4 + 2 + 150)?;
        if round % 4 == 3 {
            let stats = tree.analyze()?;
            assert_eq!(stats.num_tuples, model.len() as u64);
        }
    }
    let expected: Vec<(i32, usize)> = model.into_iter().collect();
    assert_eq!(contents(&tree)?, expected);
    let counters = tree.stats().snapshot();
    assert!(counters.leaf_relocations > 0);
    assert!(counters.leaf_coalesces > 0);
    assert!(counters.leaf_redistributions > 0);
    assert!(counters.inner_splits > 0);
    Ok(())
}

#[test]
fn shuffled_fill_then_drain() -> Result<()> {
    init_tracing();
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut ids: Vec<i32> = (0..5000).collect();
    ids.shuffle(&mut rng);
    let mut tree = mem_tree(512, note_schema(40))?;
    for &id in &ids {
        tree.insert(note_row(id, (id % 41) as usize))?;
    }
    assert_sound(&tree);
    let depth = tree.analyze()?.depth;
    assert!(depth >= 3, "expected at least three levels, got {depth}");

    ids.shuffle(&mut rng);
    for (done, &id) in ids.iter().enumerate() {
        assert!(tree.delete_key(&key(id))?);
        if done % 997 == 0 {
            assert_sound(&tree);
            assert_fill(&tree, 1 + 4 + 2 + 40)?;
        }
    }
    assert!(tree.get_first()?.is_none());
    assert_eq!(tree.info()?.root, 0);
    assert_sound(&tree);
    let stats = tree.analyze()?;
    assert_eq!(stats.num_tuples, 0);
    assert_eq!(stats.empty_pages + 1, tree.store().num_pages());
    Ok(())
}

fn text_key_schema() -> Schema {
    Schema::new(
        vec![
            Column::new("name", ColumnType::VarChar(150)),
            Column::new("id", ColumnType::Integer),
        ],
        1,
    )
    .expect("schema")
}

fn text_key(id: i32, pad: usize) -> String {
    format!("k{id:05}{}", "~".repeat(pad))
}

#[test]
fn variable_length_keys_rebalance_inner_pages() -> Result<()> {
    init_tracing();
    let mut rng = ChaCha8Rng::seed_from_u64(0x7E57);
    let mut tree = mem_tree(512, text_key_schema())?;
    let mut model: BTreeMap<String, i32> = BTreeMap::new();
    let mut ids: Vec<i32> = (0..3000).collect();
    ids.shuffle(&mut rng);

    for (step, &id) in ids.iter().enumerate() {
        let name = text_key(id, rng.gen_range(0..=140));
        tree.insert(Tuple::new(vec![Value::Str(name.clone()), Value::Integer(id)]))?;
        model.insert(name, id);
        if step % 250 == 0 {
            assert_sound(&tree);
        }
    }
    assert_sound(&tree);

    let mut names: Vec<String> = model.keys().cloned().collect();
    names.shuffle(&mut rng);
    for (step, name) in names.iter().take(2500).enumerate() {
        assert!(tree.delete_key(&Tuple::new(vec![Value::Str(name.clone())]))?);
        model.remove(name);
        if step % 250 == 0 {
            assert_sound(&tree);
        }
    }
    assert_sound(&tree);

    let scanned: Vec<(String, i32)> = tree
        .iter()
        .map(|t| {
            t.map(|t| match (t.get(0), t.get(1)) {
                (Some(Value::Str(name)), Some(Value::Integer(id))) => (name.clone(), *id),
                other => panic!("unexpected tuple {other:?}"),
            })
        })
        .collect::<Result<_>>()?;
    assert_eq!(scanned, model.into_iter().collect::<Vec<_>>());

    let counters = tree.stats().snapshot();
    assert!(counters.inner_splits > 0);
    assert!(counters.inner_relocations > 0, "{counters:?}");
    assert!(counters.inner_coalesces + counters.inner_redistributions > 0, "{counters:?}");
    Ok(())
}
