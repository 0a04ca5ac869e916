//! The effect stack: an ordered list of effect entries plus the compiled
//! pass cache built from it.

use std::collections::BTreeMap;
use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogVersion;
use crate::compiler::{CompileDiagnostics, CompiledPass};
use crate::error::FxError;
use crate::random::{FrameRandom, HashRandom};
use crate::uniforms::UniformValue;

/// Stable handle to a stack entry; survives moves and removal of others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One occurrence of a catalog effect in the stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StackEntry {
    id: EntryId,
    name: String,
    overrides: BTreeMap<String, UniformValue>,
}

impl StackEntry {
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Catalog effect this entry refers to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn overrides(&self) -> &BTreeMap<String, UniformValue> {
        &self.overrides
    }

    pub fn get(&self, key: &str) -> Option<&UniformValue> {
        self.overrides.get(key)
    }
}

/// Key holding the effect name in a serialized entry. It shares the object
/// with the override keys, so no override may use it.
pub const ENTRY_NAME_KEY: &str = "name";

/// Serialized form of one entry: `{ "name": ..., <override key>: value, ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryConfig {
    pub name: String,
    #[serde(flatten)]
    pub overrides: BTreeMap<String, UniformValue>,
}

fn default_filter() -> bool {
    true
}

/// Serialized form of a whole stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(default)]
    pub antialias: bool,
    #[serde(default = "default_filter")]
    pub filter: bool,
    #[serde(default)]
    pub entries: Vec<EntryConfig>,
}

impl StackConfig {
    pub fn from_json(text: &str) -> Result<Self, FxError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, FxError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Program state of the fixed antialias pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum AntialiasProgram {
    #[default]
    NotBuilt,
    Ready(crate::gpu::ProgramId),
    Failed,
}

pub struct Stack {
    pub(crate) entries: Vec<StackEntry>,
    pub(crate) antialias: bool,
    pub(crate) filter: bool,
    pub(crate) dirty: bool,
    pub(crate) passes: Vec<CompiledPass>,
    pub(crate) diagnostics: CompileDiagnostics,
    pub(crate) compiled_version: Option<CatalogVersion>,
    pub(crate) antialias_program: AntialiasProgram,
    pub(crate) random: Box<dyn FrameRandom>,
    next_id: u64,
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("entries", &self.entries)
            .field("antialias", &self.antialias)
            .field("filter", &self.filter)
            .field("dirty", &self.dirty)
            .field("passes", &self.passes.len())
            .finish_non_exhaustive()
    }
}

impl Stack {
    pub fn new() -> Self {
        Self::with_random(Box::new(HashRandom::from_clock()))
    }

    /// A stack drawing its per-frame random values from `random`.
    pub fn with_random(random: Box<dyn FrameRandom>) -> Self {
        Self {
            entries: Vec::new(),
            antialias: false,
            filter: true,
            dirty: true,
            passes: Vec::new(),
            diagnostics: CompileDiagnostics::default(),
            compiled_version: None,
            antialias_program: AntialiasProgram::NotBuilt,
            random,
            next_id: 1,
        }
    }

    pub fn set_random(&mut self, random: Box<dyn FrameRandom>) {
        self.random = random;
    }

    /// Append an entry for the catalog effect `name`. The name is not checked
    /// here; unknown names are skipped at compile time.
    pub fn add_effect(&mut self, name: impl Into<String>) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        self.entries.push(StackEntry {
            id,
            name: name.into(),
            overrides: BTreeMap::new(),
        });
        self.dirty = true;
        id
    }

    pub fn remove_effect(&mut self, id: EntryId) -> Option<StackEntry> {
        let index = self.index_of(id)?;
        self.dirty = true;
        Some(self.entries.remove(index))
    }

    /// Move an entry by `offset` positions (negative is towards the front),
    /// clamped to the list bounds. Returns the new index.
    pub fn move_effect(&mut self, id: EntryId, offset: isize) -> Option<usize> {
        let from = self.index_of(id)?;
        let last = self.entries.len() - 1;
        let to = from.saturating_add_signed(offset).min(last);
        if to != from {
            let entry = self.entries.remove(from);
            self.entries.insert(to, entry);
            self.dirty = true;
        }
        Some(to)
    }

    pub fn effect(&self, index: usize) -> Option<&StackEntry> {
        self.entries.get(index)
    }

    pub fn entry(&self, id: EntryId) -> Option<&StackEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn index_of(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.dirty = true;
        }
    }

    /// Set a per-entry value. Values are gathered every frame, so this does
    /// not invalidate compiled passes.
    pub fn set_override(
        &mut self,
        id: EntryId,
        key: impl Into<String>,
        value: UniformValue,
    ) -> Result<(), FxError> {
        let key = key.into();
        if key == ENTRY_NAME_KEY {
            return Err(FxError::InvalidUniform {
                key,
                message: format!("`{ENTRY_NAME_KEY}` is reserved for the effect name"),
            });
        }
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(FxError::UnknownEntry(id))?;
        entry.overrides.insert(key, value);
        Ok(())
    }

    pub fn clear_override(&mut self, id: EntryId, key: &str) -> Option<UniformValue> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .and_then(|e| e.overrides.remove(key))
    }

    pub fn antialias(&self) -> bool {
        self.antialias
    }

    pub fn set_antialias(&mut self, antialias: bool) {
        self.antialias = antialias;
    }

    /// `true` for bilinear filtering on the final blit, `false` for nearest.
    pub fn filter(&self) -> bool {
        self.filter
    }

    pub fn set_filter(&mut self, filter: bool) {
        self.filter = filter;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Force a full recompile on the next apply.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Cached passes from the last compile.
    pub fn passes(&self) -> &[CompiledPass] {
        &self.passes
    }

    /// Problems found by the last compile.
    pub fn diagnostics(&self) -> &CompileDiagnostics {
        &self.diagnostics
    }

    pub fn serialize(&self) -> StackConfig {
        StackConfig {
            antialias: self.antialias,
            filter: self.filter,
            entries: self
                .entries
                .iter()
                .map(|e| EntryConfig {
                    name: e.name.clone(),
                    overrides: e.overrides.clone(),
                })
                .collect(),
        }
    }

    /// Replace the entry list and flags with `config`. Existing entry ids
    /// are invalidated.
    pub fn configure(&mut self, config: &StackConfig) {
        self.entries.clear();
        for entry in &config.entries {
            let id = self.add_effect(entry.name.clone());
            if let Some(e) = self.entries.iter_mut().find(|e| e.id == id) {
                e.overrides = entry.overrides.clone();
                if e.overrides.remove(ENTRY_NAME_KEY).is_some() {
                    warn!("entry `{}`: dropped override `{ENTRY_NAME_KEY}`", entry.name);
                }
            }
        }
        self.antialias = config.antialias;
        self.filter = config.filter;
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(stack: &Stack) -> Vec<&str> {
        stack.entries().iter().map(|e| e.name()).collect()
    }

    #[test]
    fn test_mutations_mark_dirty() {
        let mut stack = Stack::new();
        stack.dirty = false;
        let a = stack.add_effect("invert");
        assert!(stack.is_dirty());

        stack.dirty = false;
        stack.set_override(a, "amount", UniformValue::Float(1.0)).unwrap();
        assert!(!stack.is_dirty());

        stack.move_effect(a, 0);
        assert!(!stack.is_dirty());

        stack.remove_effect(a);
        assert!(stack.is_dirty());
    }

    #[test]
    fn test_move_clamps_to_bounds() {
        let mut stack = Stack::new();
        let a = stack.add_effect("a");
        stack.add_effect("b");
        let c = stack.add_effect("c");

        assert_eq!(stack.move_effect(a, 1), Some(1));
        assert_eq!(names(&stack), ["b", "a", "c"]);
        assert_eq!(stack.move_effect(c, -10), Some(0));
        assert_eq!(names(&stack), ["c", "b", "a"]);
        assert_eq!(stack.move_effect(c, 99), Some(2));
        assert_eq!(names(&stack), ["b", "a", "c"]);
    }

    #[test]
    fn test_unknown_entry() {
        let mut stack = Stack::new();
        let a = stack.add_effect("a");
        stack.remove_effect(a);
        assert!(stack.remove_effect(a).is_none());
        assert!(stack.move_effect(a, 1).is_none());
        assert!(matches!(
            stack.set_override(a, "x", UniformValue::Int(1)),
            Err(FxError::UnknownEntry(_))
        ));
    }

    #[test]
    fn test_reserved_name_key_is_rejected() {
        let mut stack = Stack::new();
        let a = stack.add_effect("invert");
        assert!(matches!(
            stack.set_override(a, "name", UniformValue::Float(1.0)),
            Err(FxError::InvalidUniform { .. })
        ));
        assert!(stack.entry(a).unwrap().overrides().is_empty());

        let config = StackConfig {
            antialias: false,
            filter: true,
            entries: vec![EntryConfig {
                name: "invert".into(),
                overrides: BTreeMap::from([("name".to_string(), UniformValue::Int(1))]),
            }],
        };
        stack.configure(&config);
        let json = stack.serialize().to_json_pretty().unwrap();
        let back = StackConfig::from_json(&json).unwrap();
        assert_eq!(back.entries[0].name, "invert");
        assert!(back.entries[0].overrides.is_empty());
    }

    #[test]
    fn test_config_json_shape() {
        let mut stack = Stack::new();
        let a = stack.add_effect("brightness_contrast");
        stack.set_override(a, "brightness", UniformValue::Float(0.25)).unwrap();
        let l = stack.add_effect("lut");
        stack.set_override(l, "texture", UniformValue::Texture("warm".into())).unwrap();
        stack.set_antialias(true);

        let json = serde_json::to_value(stack.serialize()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "antialias": true,
                "filter": true,
                "entries": [
                    { "name": "brightness_contrast", "brightness": 0.25 },
                    { "name": "lut", "texture": "warm" }
                ]
            })
        );
    }

    #[test]
    fn test_configure_defaults_filter() {
        let config = StackConfig::from_json(r#"{ "entries": [ { "name": "invert" } ] }"#).unwrap();
        let mut stack = Stack::new();
        stack.set_filter(false);
        stack.configure(&config);
        assert!(stack.filter());
        assert!(!stack.antialias());
        assert_eq!(names(&stack), ["invert"]);
    }
}
