use post_fx_stack::gpu::HeadlessDevice;
use post_fx_stack::{Catalog, Stack, compile_passes};
use proptest::prelude::*;

fn stack_of(names: &[&str]) -> Stack {
    let mut stack = Stack::new();
    for name in names {
        stack.add_effect(*name);
    }
    stack
}

fn builtin() -> Catalog {
    Catalog::builtin().expect("load built-in catalog")
}

#[test]
fn single_color_effect_compiles_to_one_pass() {
    let catalog = builtin();
    let stack = stack_of(&["brightness_contrast"]);
    let out = compile_passes(stack.entries(), &catalog);
    assert_eq!(out.passes.len(), 1);
    assert!(out.diagnostics.is_clean());
}

#[test]
fn breaking_effect_starts_a_new_pass() {
    let catalog = builtin();
    let stack = stack_of(&["brightness_contrast", "aberration", "invert"]);
    let out = compile_passes(stack.entries(), &catalog);
    assert_eq!(out.passes.len(), 2);
    assert_eq!(out.passes[0].effect_names(), ["brightness_contrast"]);
    assert_eq!(out.passes[1].effect_names(), ["aberration", "invert"]);
    assert_eq!(out.passes[1].first_entry_index(), 1);
}

#[test]
fn unknown_effect_compiles_as_if_absent() {
    let catalog = builtin();
    let with_unknown = stack_of(&["brightness_contrast", "no_such_effect", "invert"]);
    let out = compile_passes(with_unknown.entries(), &catalog);
    assert_eq!(out.passes.len(), 1);
    assert_eq!(out.passes[0].effect_names(), ["brightness_contrast", "invert"]);
    assert_eq!(
        out.diagnostics.unknown_effects,
        [(1, "no_such_effect".to_string())]
    );

    let without = stack_of(&["brightness_contrast", "invert"]);
    assert_eq!(
        compile_passes(without.entries(), &catalog).passes.len(),
        out.passes.len()
    );
}

#[test]
fn recompiling_unchanged_stack_is_byte_identical() {
    let catalog = builtin();
    let mut stack = stack_of(&["hue_saturation", "grain", "lens_distortion", "dither", "lut"]);
    let mut device = HeadlessDevice::new([8, 8]);

    stack.compile(&catalog, &mut device);
    let first: Vec<String> = stack.passes().iter().map(|p| p.source().to_string()).collect();
    stack.mark_dirty();
    stack.compile(&catalog, &mut device);
    let second: Vec<String> = stack.passes().iter().map(|p| p.source().to_string()).collect();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}

#[test]
fn repeated_effect_gets_distinct_symbols() {
    let catalog = builtin();
    let stack = stack_of(&["vignette", "invert", "vignette"]);
    let out = compile_passes(stack.entries(), &catalog);
    assert_eq!(out.passes.len(), 1);

    let pass = &out.passes[0];
    let decls = pass.uniform_decls();
    assert!(decls.contains(&"uniform float u_vignette0;".to_string()));
    assert!(decls.contains(&"uniform float u_vignette2;".to_string()));
    assert!(pass.color_code().contains("float vig0 ="));
    assert!(pass.color_code().contains("float vig2 ="));

    let mut unique = decls.to_vec();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), decls.len());
}

#[test]
fn shared_functions_are_included_once_per_pass() {
    let catalog = builtin();
    let mut stack = stack_of(&["grain", "dither", "grain"]);
    let mut device = HeadlessDevice::new([8, 8]);
    stack.compile(&catalog, &mut device);

    let source = stack.passes()[0].source();
    assert_eq!(source.matches("float fx_rand(vec2 co)").count(), 1);
    assert!(stack.passes()[0].program().is_some());
}

const NAMES: &[&str] = &[
    "brightness_contrast",
    "invert",
    "hue_saturation",
    "vignette",
    "grain",
    "dither",
    "fog",
    "lut",
    "aberration",
    "lens_distortion",
    "pixelate",
    "missing_effect",
];

/// Reference count of passes: one per run of resolvable entries, where a
/// breaking entry always begins a run.
fn expected_pass_count(names: &[&str], catalog: &Catalog) -> usize {
    let mut count = 0;
    for name in names {
        let Some(effect) = catalog.effect(name) else {
            continue;
        };
        if count == 0 || effect.break_pass {
            count += 1;
        }
    }
    count
}

proptest! {
    #[test]
    fn pass_count_matches_break_runs(picks in proptest::collection::vec(0..NAMES.len(), 0..16)) {
        let catalog = builtin();
        let names: Vec<&str> = picks.iter().map(|&i| NAMES[i]).collect();
        let stack = stack_of(&names);
        let out = compile_passes(stack.entries(), &catalog);

        prop_assert_eq!(out.passes.len(), expected_pass_count(&names, &catalog));
        for pass in &out.passes {
            for member in pass.members().iter().skip(1) {
                prop_assert!(!member.effect.break_pass);
            }
        }
    }
}
