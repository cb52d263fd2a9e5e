use proptest::prelude::*;
use swe_common::{
    Component, CompositeBlock, DataBlock, DataType, ElementCount, Error, ErrorKind, Value,
};

/// `station { n, obs[n] { id, m, samples[m] }, tail }`
fn station() -> Component {
    let obs = Component::record("ob")
        .with_field(Component::scalar("id", DataType::U32))
        .and_then(|r| r.with_field(Component::scalar("m", DataType::I32)))
        .and_then(|r| {
            r.with_field(Component::array(
                "samples",
                Component::scalar("s", DataType::F64),
                ElementCount::Ref("m".into()),
            ))
        })
        .unwrap();
    Component::record("station")
        .with_field(Component::scalar("n", DataType::U32))
        .and_then(|r| r.with_field(Component::array("obs", obs, ElementCount::Ref("n".into()))))
        .and_then(|r| r.with_field(Component::scalar("tail", DataType::F64)))
        .unwrap()
}

fn assert_consistent(block: &DataBlock) {
    if let Some(c) = block.composite() {
        assert_eq!(c.offsets().len(), c.children().len());
        let mut offset = 0;
        for (child, off) in c.children().iter().zip(c.offsets()) {
            assert_eq!(*off, offset);
            assert_consistent(child);
            offset += child.atom_count();
        }
        assert_eq!(c.atom_count(), offset);
        assert_eq!(block.atom_count(), offset);
    }
}

#[test]
fn test_counter_from_zero_to_ten() {
    let schema = Component::record("r")
        .with_field(Component::scalar("count", DataType::I32))
        .and_then(|r| {
            r.with_field(Component::array(
                "values",
                Component::scalar("v", DataType::F64),
                ElementCount::Ref("count".into()),
            ))
        })
        .unwrap();
    let mut block = schema.create_block();
    assert_eq!(block.atom_count(), 1);
    let values = schema.data_path("values").unwrap();
    assert_eq!(block.component_count(&schema, &values).unwrap(), 0);

    block.update_size(&schema, &values, 10).unwrap();
    assert_eq!(block.atom_count(), 11);
    assert_eq!(block.get_int(0).unwrap(), 10);
    assert_eq!(block.component_count(&schema, &values).unwrap(), 10);
}

#[test]
fn test_shared_counter_drives_every_array() {
    let schema = Component::record("r")
        .with_field(Component::scalar("n", DataType::U32))
        .and_then(|r| {
            r.with_field(Component::array(
                "a",
                Component::scalar("x", DataType::F64),
                ElementCount::Ref("n".into()),
            ))
        })
        .and_then(|r| {
            r.with_field(Component::array(
                "b",
                Component::range("y", DataType::I32),
                ElementCount::Ref("n".into()),
            ))
        })
        .and_then(|r| {
            r.with_field(Component::array(
                "c",
                Component::list("z", Component::scalar("e", DataType::Bool)),
                ElementCount::Ref("n".into()),
            ))
        })
        .unwrap();
    let mut block = schema.create_block();
    let a = schema.data_path("a").unwrap();
    block.update_size(&schema, &a, 4).unwrap();
    for name in ["a", "b", "c"] {
        let path = schema.data_path(name).unwrap();
        assert_eq!(block.component_count(&schema, &path).unwrap(), 4, "{name}");
    }
    // n + 4 + 4 * 2, the lists are empty
    assert_eq!(block.atom_count(), 13);
    assert_consistent(&block);

    block.set_int(0, 1).unwrap();
    block.apply_counts(&schema).unwrap();
    assert_eq!(block.atom_count(), 4);
}

#[test]
fn test_nested_sizes_accumulate() {
    let schema = station();
    let mut block = schema.create_block();
    let obs = schema.data_path("obs").unwrap();
    block.update_size(&schema, &obs, 3).unwrap();
    // n, 3 x (id, m), tail
    assert_eq!(block.atom_count(), 8);
    for (i, m) in [2usize, 0, 5].into_iter().enumerate() {
        let samples = schema.data_path(&format!("obs/{i}/samples")).unwrap();
        block.update_size(&schema, &samples, m).unwrap();
    }
    assert_eq!(block.atom_count(), 15);
    assert_consistent(&block);

    let tail = schema.data_path("tail").unwrap();
    assert_eq!(block.atom_index(&schema, &tail).unwrap(), 14);
    let last = schema.data_path("obs/2/samples/4").unwrap();
    assert_eq!(block.atom_index(&schema, &last).unwrap(), 13);
    let m = schema.data_path("obs/2/m").unwrap();
    assert_eq!(block.value_at(&schema, &m).unwrap(), &Value::I32(5));
}

#[test]
fn test_substituted_block_rederives_counts() {
    let schema = station();
    let mut block = schema.create_block();
    let obs = schema.data_path("obs").unwrap();
    block.update_size(&schema, &obs, 1).unwrap();

    let element = schema.fields()[1].element().unwrap();
    let mut replacement = schema.create_block();
    replacement.update_size(&schema, &obs, 4).unwrap();
    let mut inner = element.create_block();
    let samples = element.data_path("samples").unwrap();
    inner.update_size(element, &samples, 3).unwrap();
    let first = schema.data_path("obs/0").unwrap();
    replacement.set_block(&schema, &first, inner).unwrap();

    let sub = replacement.sub_block(&schema, &obs).unwrap().clone();
    block.set_block(&schema, &obs, sub).unwrap();
    assert_eq!(block.component_count(&schema, &obs).unwrap(), 4);
    assert_eq!(block.get_int(0).unwrap(), 4);
    let inner = schema.data_path("obs/0/samples").unwrap();
    assert_eq!(block.component_count(&schema, &inner).unwrap(), 3);
    assert_eq!(block.atom_count(), 1 + 4 * 2 + 3 + 1);
    assert_consistent(&block);

    let scalar = DataBlock::Atomic(vec![Value::F64(1.0)]);
    let err = block.set_block(&schema, &obs, scalar).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

#[test]
fn test_counter_type_bounds_resize() {
    let schema = Component::record("r")
        .with_field(Component::scalar("n", DataType::U32))
        .and_then(|r| {
            r.with_field(Component::array(
                "v",
                Component::scalar("x", DataType::Bool),
                ElementCount::Ref("n".into()),
            ))
        })
        .unwrap();
    let mut block = schema.create_block();
    let v = schema.data_path("v").unwrap();
    let too_many = u32::MAX as usize + 1;
    let err = block.update_size(&schema, &v, too_many).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resize);
    assert_eq!(block.atom_count(), 1);
}

proptest! {
    #[test]
    fn atom_count_is_sum_of_children(
        steps in prop::collection::vec((0usize..6, 0usize..6, 0usize..8), 1..12)
    ) {
        let schema = station();
        let mut block = schema.create_block();
        let obs = schema.data_path("obs").unwrap();
        for (outer, idx, inner) in steps {
            block.update_size(&schema, &obs, outer).unwrap();
            if outer > 0 {
                let i = idx % outer;
                let samples = schema.data_path(&format!("obs/{i}/samples")).unwrap();
                block.update_size(&schema, &samples, inner).unwrap();
                prop_assert_eq!(block.component_count(&schema, &samples).unwrap(), inner);
                let m = schema.data_path(&format!("obs/{i}/m")).unwrap();
                prop_assert_eq!(
                    block.value_at(&schema, &m).unwrap().as_i128(),
                    Some(inner as i128)
                );
            }
            prop_assert_eq!(block.component_count(&schema, &obs).unwrap(), outer);
            prop_assert_eq!(block.get_int(0).unwrap(), outer as i64);
            assert_consistent(&block);
        }
    }

    #[test]
    fn update_size_is_idempotent(outer in 0usize..8, inner in 0usize..8, value in -1e6f64..1e6) {
        let schema = station();
        let mut block = schema.create_block();
        let obs = schema.data_path("obs").unwrap();
        block.update_size(&schema, &obs, outer).unwrap();
        if outer > 0 {
            let samples = schema.data_path("obs/0/samples").unwrap();
            block.update_size(&schema, &samples, inner).unwrap();
            if inner > 0 {
                let s = schema.data_path("obs/0/samples/0").unwrap();
                block.set_value_at(&schema, &s, Value::F64(value)).unwrap();
            }
        }
        let before = block.clone();
        block.update_size(&schema, &obs, outer).unwrap();
        prop_assert_eq!(&block, &before);
        prop_assert_eq!(block.atom_count(), before.atom_count());
    }

    #[test]
    fn inner_sizes_are_independent(
        sizes in prop::collection::vec(0usize..6, 2..6),
        target in 0usize..6,
        new_size in 0usize..9,
    ) {
        let schema = station();
        let mut block = schema.create_block();
        let obs = schema.data_path("obs").unwrap();
        block.update_size(&schema, &obs, sizes.len()).unwrap();
        let paths: Vec<_> = (0..sizes.len())
            .map(|i| schema.data_path(&format!("obs/{i}/samples")).unwrap())
            .collect();
        for (path, size) in paths.iter().zip(&sizes) {
            block.update_size(&schema, path, *size).unwrap();
        }
        let target = target % sizes.len();
        block.update_size(&schema, &paths[target], new_size).unwrap();
        for (i, (path, size)) in paths.iter().zip(&sizes).enumerate() {
            let expected = if i == target { new_size } else { *size };
            prop_assert_eq!(block.component_count(&schema, path).unwrap(), expected);
        }
    }
}

#[test]
fn test_substitution_updates_outer_counter() {
    // r { n, pts[2] { s[n] } }
    let point = Component::record("pt")
        .with_field(Component::array(
            "s",
            Component::scalar("v", DataType::F32),
            ElementCount::Ref("n".into()),
        ))
        .unwrap();
    let schema = Component::record("r")
        .with_field(Component::scalar("n", DataType::U16))
        .and_then(|r| r.with_field(Component::array("pts", point, ElementCount::Fixed(2))))
        .unwrap();
    let mut block = schema.create_block();
    assert_eq!(block.atom_count(), 1);

    let pt0 = schema.data_path("pts/0").unwrap();
    let s0 = schema.data_path("pts/0/s").unwrap();
    let mut replacement = schema.create_block();
    replacement.update_size(&schema, &s0, 3).unwrap();
    let sub = replacement.sub_block(&schema, &pt0).unwrap().clone();
    block.set_block(&schema, &pt0, sub).unwrap();
    assert_eq!(block.get_int(0).unwrap(), 3);
    let s1 = schema.data_path("pts/1/s").unwrap();
    assert_eq!(block.component_count(&schema, &s0).unwrap(), 3);
    assert_eq!(block.component_count(&schema, &s1).unwrap(), 3);
    assert_eq!(block.atom_count(), 1 + 2 * 3);
    assert_consistent(&block);

    let mut two = schema.create_block();
    two.update_size(&schema, &s0, 2).unwrap();
    let pts = schema.data_path("pts").unwrap();
    let mixed = DataBlock::Sequence(CompositeBlock::new(vec![
        two.sub_block(&schema, &pt0).unwrap().clone(),
        replacement.sub_block(&schema, &pt0).unwrap().clone(),
    ]));
    let before = block.clone();
    let err = block.set_block(&schema, &pts, mixed).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
    assert_eq!(block, before);
}
