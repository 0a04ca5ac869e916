use std::collections::BTreeMap;

use post_fx_stack::stack::ENTRY_NAME_KEY;
use post_fx_stack::{EntryConfig, FxError, Stack, StackConfig, UniformValue};
use proptest::prelude::*;

fn snapshot(stack: &Stack) -> Vec<(String, BTreeMap<String, UniformValue>)> {
    stack
        .entries()
        .iter()
        .map(|e| (e.name().to_string(), e.overrides().clone()))
        .collect()
}

#[test]
fn configure_reads_serialized_json() {
    let json = r#"{
        "antialias": true,
        "entries": [
            { "name": "brightness_contrast", "brightness": 0.2, "contrast": -0.1 },
            { "name": "dither", "levels": 4, "animated": false },
            { "name": "vignette", "color": [0.1, 0.0, 0.2] },
            { "name": "lut", "texture": "film" }
        ]
    }"#;
    let config = StackConfig::from_json(json).expect("parse stack config");
    let mut stack = Stack::new();
    stack.configure(&config);

    assert!(stack.antialias());
    assert!(stack.filter());
    assert!(stack.is_dirty());
    assert_eq!(stack.len(), 4);

    let bc = stack.effect(0).expect("entry 0");
    assert_eq!(bc.get("brightness"), Some(&UniformValue::Float(0.2)));
    let dither = stack.effect(1).expect("entry 1");
    assert_eq!(dither.get("levels"), Some(&UniformValue::Int(4)));
    assert_eq!(dither.get("animated"), Some(&UniformValue::Bool(false)));
    let vignette = stack.effect(2).expect("entry 2");
    assert_eq!(vignette.get("color"), Some(&UniformValue::Vec3([0.1, 0.0, 0.2])));
    let lut = stack.effect(3).expect("entry 3");
    assert_eq!(lut.get("texture"), Some(&UniformValue::Texture("film".into())));

    let again = StackConfig::from_json(&stack.serialize().to_json_pretty().expect("to json"))
        .expect("reparse");
    assert_eq!(again, config);
}

#[test]
fn move_and_remove_keep_ids_stable() {
    let mut stack = Stack::new();
    let a = stack.add_effect("invert");
    let b = stack.add_effect("grain");
    let c = stack.add_effect("vignette");

    assert_eq!(stack.move_effect(c, -2), Some(0));
    assert_eq!(stack.index_of(a), Some(1));
    assert_eq!(stack.entry(b).map(|e| e.name()), Some("grain"));

    let removed = stack.remove_effect(a).expect("remove a");
    assert_eq!(removed.name(), "invert");
    assert_eq!(stack.index_of(b), Some(1));
    assert_eq!(stack.effect(0).map(|e| e.id()), Some(c));
    assert!(stack.entry(a).is_none());
}

#[test]
fn clear_override_restores_default_lookup() {
    let mut stack = Stack::new();
    let id = stack.add_effect("grain");
    stack
        .set_override(id, "amount", UniformValue::Float(0.3))
        .expect("set override");
    assert_eq!(
        stack.clear_override(id, "amount"),
        Some(UniformValue::Float(0.3))
    );
    assert!(stack.entry(id).expect("entry").overrides().is_empty());
    assert_eq!(stack.clear_override(id, "amount"), None);
}

#[test]
fn override_named_like_the_entry_key_is_rejected() {
    let mut stack = Stack::new();
    let id = stack.add_effect("grain");
    let err = stack
        .set_override(id, "name", UniformValue::Float(1.0))
        .expect_err("reserved key");
    assert!(matches!(err, FxError::InvalidUniform { .. }));

    let json = stack.serialize().to_json_pretty().expect("to json");
    let reparsed = StackConfig::from_json(&json).expect("reparse");
    assert_eq!(reparsed, stack.serialize());
}

fn value_strategy() -> impl Strategy<Value = UniformValue> {
    // Quarter steps are exact in both f32 and the JSON text.
    let unit = (-64i32..64).prop_map(|q| q as f32 * 0.25);
    prop_oneof![
        any::<bool>().prop_map(UniformValue::Bool),
        (-1000i32..1000).prop_map(UniformValue::Int),
        unit.clone().prop_map(UniformValue::Float),
        [unit.clone(), unit.clone()].prop_map(UniformValue::Vec2),
        [unit.clone(), unit.clone(), unit.clone()].prop_map(UniformValue::Vec3),
        [unit.clone(), unit.clone(), unit.clone(), unit].prop_map(UniformValue::Vec4),
        "[a-z]{1,8}".prop_map(UniformValue::Texture),
    ]
}

fn entry_strategy() -> impl Strategy<Value = EntryConfig> {
    (
        "[a-z_]{1,12}",
        proptest::collection::btree_map("[a-z]{1,6}", value_strategy(), 0..4),
    )
        .prop_map(|(name, overrides)| EntryConfig { name, overrides })
}

proptest! {
    #[test]
    fn configure_then_serialize_round_trips(
        antialias in any::<bool>(),
        filter in any::<bool>(),
        entries in proptest::collection::vec(entry_strategy(), 0..6),
    ) {
        let config = StackConfig { antialias, filter, entries };
        let mut stack = Stack::new();
        stack.configure(&config);

        let mut expected = config.clone();
        for entry in &mut expected.entries {
            entry.overrides.remove(ENTRY_NAME_KEY);
        }
        prop_assert_eq!(&stack.serialize(), &expected);

        let json = stack.serialize().to_json_pretty().expect("to json");
        let mut reloaded = Stack::new();
        reloaded.configure(&StackConfig::from_json(&json).expect("reparse"));
        prop_assert_eq!(snapshot(&reloaded), snapshot(&stack));
        prop_assert_eq!(reloaded.antialias(), antialias);
        prop_assert_eq!(reloaded.filter(), filter);
    }
}
