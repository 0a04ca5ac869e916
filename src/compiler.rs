//! Pass compiler: merges consecutive stack entries into as few full-screen
//! passes as `break_pass` allows.
//!
//! The compiler is a pure function of the entry list and the catalog.
//! Every per-instance symbol is suffixed with the entry's position in the
//! stack, so two entries using the same effect never share a name, and
//! compiling the same list twice yields identical text.

use std::sync::Arc;

use log::warn;

use crate::catalog::{Catalog, EffectDefinition};
use crate::gpu::ProgramId;
use crate::stack::{EntryId, StackEntry};

/// A stack entry folded into a pass.
#[derive(Debug, Clone)]
pub struct PassMember {
    /// Position in the stack at compile time; the suffix of every generated
    /// symbol for this entry.
    pub entry_index: usize,
    pub entry_id: EntryId,
    pub effect: Arc<EffectDefinition>,
}

#[derive(Debug, Clone)]
pub struct SharedFunction {
    pub name: String,
    pub source: Arc<str>,
}

/// One full-screen program covering a contiguous run of entries.
#[derive(Debug, Clone, Default)]
pub struct CompiledPass {
    pub(crate) members: Vec<PassMember>,
    pub(crate) first_entry_index: usize,
    pub(crate) color_code: String,
    pub(crate) uv_code: String,
    pub(crate) uniform_decls: Vec<String>,
    pub(crate) functions: Vec<SharedFunction>,
    pub(crate) source: String,
    pub(crate) program: Option<ProgramId>,
}

impl CompiledPass {
    fn open(first_entry_index: usize) -> Self {
        Self {
            first_entry_index,
            ..Self::default()
        }
    }

    pub fn members(&self) -> &[PassMember] {
        &self.members
    }

    pub fn first_entry_index(&self) -> usize {
        self.first_entry_index
    }

    pub fn color_code(&self) -> &str {
        &self.color_code
    }

    pub fn uv_code(&self) -> &str {
        &self.uv_code
    }

    pub fn uniform_decls(&self) -> &[String] {
        &self.uniform_decls
    }

    pub fn included_functions(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|f| f.name.as_str())
    }

    /// Generated program text; empty until the pass has been built.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// `None` if the program failed to compile or has not been built yet.
    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    /// Catalog names of the members, in order.
    pub fn effect_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.effect.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn push(&mut self, index: usize, entry: &StackEntry, effect: &Arc<EffectDefinition>) {
        for spec in effect.uniforms.values() {
            self.uniform_decls.push(format!(
                "uniform {} {};",
                spec.glsl_type.glsl(),
                spec.instance_name(index)
            ));
        }
        if let Some(uv) = &effect.uv_code {
            append_block(&mut self.uv_code, &effect.name, index, &uv.instantiate(index));
        }
        append_block(
            &mut self.color_code,
            &effect.name,
            index,
            &effect.code.instantiate(index),
        );
        self.members.push(PassMember {
            entry_index: index,
            entry_id: entry.id(),
            effect: Arc::clone(effect),
        });
    }

    fn include_function(&mut self, name: &str, source: &Arc<str>) {
        if !self.functions.iter().any(|f| f.name == name) {
            self.functions.push(SharedFunction {
                name: name.to_string(),
                source: Arc::clone(source),
            });
        }
    }
}

fn append_block(out: &mut String, effect: &str, index: usize, code: &str) {
    let code = code.trim();
    if code.is_empty() {
        return;
    }
    out.push_str(&format!("// {effect} #{index}\n"));
    out.push_str(code);
    out.push('\n');
}

/// Problems found while compiling. None of them stop compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileDiagnostics {
    /// `(stack index, name)` of entries whose effect is not in the catalog.
    pub unknown_effects: Vec<(usize, String)>,
    /// `(stack index, function)` of shared functions missing from the catalog.
    pub missing_functions: Vec<(usize, String)>,
}

impl CompileDiagnostics {
    pub fn is_clean(&self) -> bool {
        self.unknown_effects.is_empty() && self.missing_functions.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Compilation {
    pub passes: Vec<CompiledPass>,
    pub diagnostics: CompileDiagnostics,
}

pub fn compile_passes(entries: &[StackEntry], catalog: &Catalog) -> Compilation {
    let mut passes = Vec::new();
    let mut diagnostics = CompileDiagnostics::default();
    let mut open = CompiledPass::open(0);

    for (index, entry) in entries.iter().enumerate() {
        let Some(effect) = catalog.effect(entry.name()) else {
            warn!(
                "effect `{}` at stack index {index} is not in the catalog; skipping",
                entry.name()
            );
            diagnostics
                .unknown_effects
                .push((index, entry.name().to_string()));
            continue;
        };

        if effect.break_pass && !open.is_empty() {
            passes.push(std::mem::replace(&mut open, CompiledPass::open(index)));
        }
        if open.is_empty() {
            open.first_entry_index = index;
        }

        open.push(index, entry, effect);
        for function in &effect.functions {
            match catalog.function(function) {
                Some(source) => open.include_function(function, source),
                None => {
                    warn!(
                        "effect `{}` at stack index {index} needs unknown function `{function}`",
                        entry.name()
                    );
                    diagnostics.missing_functions.push((index, function.clone()));
                }
            }
        }
    }

    if !open.is_empty() {
        passes.push(open);
    }

    Compilation {
        passes,
        diagnostics,
    }
}
