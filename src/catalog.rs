//! Effect catalog: the registry of effect definitions and shared GLSL
//! functions the pass compiler draws from.
//!
//! A `Catalog` is an ordinary value. Stacks borrow it for compilation, so
//! several catalogs can coexist and registration (which needs `&mut`) can
//! never overlap a compile.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::FxError;
use crate::stack::ENTRY_NAME_KEY;
use crate::template::CodeTemplate;
use crate::uniforms::{GlslType, Sampling, UniformValue};

const BUILTIN_CATALOG_JSON: &str = include_str!("../assets/effects.json");

/// One entry of an effect's uniform schema, keyed by its override key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniformSpec {
    /// Base GLSL name; the declared uniform is this name followed by the
    /// entry's stack position.
    pub uniform_name: String,
    pub glsl_type: GlslType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<UniformValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<String>,
    /// Sampler-only: sample with nearest filtering.
    #[serde(default)]
    pub nearest: bool,
    /// Sampler-only: clamp coordinates to the edge.
    #[serde(default)]
    pub clamp_to_edge: bool,
}

impl UniformSpec {
    pub fn new(uniform_name: impl Into<String>, glsl_type: GlslType) -> Self {
        Self {
            uniform_name: uniform_name.into(),
            glsl_type,
            default_value: None,
            min: None,
            max: None,
            step: None,
            widget: None,
            nearest: false,
            clamp_to_edge: false,
        }
    }

    pub fn with_default(mut self, value: UniformValue) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Declared default, or the type's zero value.
    pub fn default_or_zero(&self) -> UniformValue {
        self.default_value
            .as_ref()
            .and_then(|v| v.coerce(self.glsl_type))
            .unwrap_or_else(|| self.glsl_type.zero())
    }

    pub fn sampling(&self) -> Sampling {
        Sampling {
            nearest: self.nearest,
            clamp_to_edge: self.clamp_to_edge,
        }
    }

    /// GLSL name declared for the entry at stack position `index`.
    pub fn instance_name(&self, index: usize) -> String {
        format!("{}{}", self.uniform_name, index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub uniforms: BTreeMap<String, UniformSpec>,
    /// Color-space code, run after the source is sampled.
    #[serde(default)]
    pub code: CodeTemplate,
    /// UV-space code, run before the source is sampled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uv_code: Option<CodeTemplate>,
    #[serde(default)]
    pub functions: Vec<String>,
    /// Always start a new pass at this effect.
    #[serde(default)]
    pub break_pass: bool,
}

impl EffectDefinition {
    pub fn new(code: CodeTemplate) -> Self {
        Self {
            name: String::new(),
            display_name: String::new(),
            uniforms: BTreeMap::new(),
            code,
            uv_code: None,
            functions: Vec::new(),
            break_pass: false,
        }
    }

    pub fn with_uniform(mut self, key: impl Into<String>, spec: UniformSpec) -> Self {
        self.uniforms.insert(key.into(), spec);
        self
    }

    pub fn with_uv_code(mut self, uv_code: CodeTemplate) -> Self {
        self.uv_code = Some(uv_code);
        self
    }

    pub fn with_function(mut self, name: impl Into<String>) -> Self {
        self.functions.push(name.into());
        self
    }

    pub fn breaking(mut self) -> Self {
        self.break_pass = true;
        self
    }

    fn validate(&self) -> Result<(), FxError> {
        let mut base_names = HashSet::new();
        for (key, spec) in &self.uniforms {
            let invalid = |message: String| FxError::InvalidUniform {
                key: key.clone(),
                message,
            };
            if key == ENTRY_NAME_KEY {
                return Err(invalid(format!(
                    "`{ENTRY_NAME_KEY}` is reserved for the effect name"
                )));
            }
            if !base_names.insert(spec.uniform_name.as_str()) {
                return Err(invalid(format!(
                    "`{}` is already declared by another key",
                    spec.uniform_name
                )));
            }
            if !is_glsl_identifier(&spec.uniform_name) {
                return Err(invalid(format!(
                    "`{}` is not a GLSL identifier",
                    spec.uniform_name
                )));
            }
            // A trailing digit would let `u_a1` + 1 collide with `u_a` + 11.
            if spec.uniform_name.ends_with(|c: char| c.is_ascii_digit()) {
                return Err(invalid(format!(
                    "`{}` must not end with a digit",
                    spec.uniform_name
                )));
            }
            if let Some(default) = &spec.default_value {
                if default.coerce(spec.glsl_type).is_none() {
                    return Err(invalid(format!(
                        "default {default:?} does not fit {}",
                        spec.glsl_type
                    )));
                }
            }
        }
        Ok(())
    }
}

fn is_glsl_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !s.starts_with("gl_")
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    functions: BTreeMap<String, String>,
    #[serde(default)]
    effects: BTreeMap<String, EffectDefinition>,
}

static NEXT_CATALOG_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one catalog state: which catalog value, and how many
/// registrations it has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CatalogVersion {
    pub catalog: u64,
    pub generation: u64,
}

#[derive(Debug)]
pub struct Catalog {
    id: u64,
    effects: HashMap<String, Arc<EffectDefinition>>,
    functions: HashMap<String, Arc<str>>,
    generation: u64,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            id: NEXT_CATALOG_ID.fetch_add(1, Ordering::Relaxed),
            effects: HashMap::new(),
            functions: HashMap::new(),
            generation: 0,
        }
    }
}

/// A clone is a separate catalog and gets its own id, so the two can be
/// extended independently without their versions colliding.
impl Clone for Catalog {
    fn clone(&self) -> Self {
        Self {
            effects: self.effects.clone(),
            functions: self.functions.clone(),
            generation: self.generation,
            ..Self::default()
        }
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The effects shipped in `assets/effects.json`.
    pub fn builtin() -> Result<Self, FxError> {
        Self::from_json(BUILTIN_CATALOG_JSON)
    }

    pub fn from_json(text: &str) -> Result<Self, FxError> {
        let mut catalog = Self::new();
        catalog.extend_from_json(text)?;
        Ok(catalog)
    }

    /// Register every function and effect in `text`. Nothing is registered
    /// if any effect fails validation.
    pub fn extend_from_json(&mut self, text: &str) -> Result<(), FxError> {
        let file: CatalogFile = serde_json::from_str(text)?;
        for def in file.effects.values() {
            def.validate()?;
        }
        for (name, body) in file.functions {
            self.register_function(name, body);
        }
        for (name, def) in file.effects {
            self.register_effect(name, def)?;
        }
        Ok(())
    }

    /// Add or replace an effect. Returns the definition it replaced.
    pub fn register_effect(
        &mut self,
        name: impl Into<String>,
        mut definition: EffectDefinition,
    ) -> Result<Option<Arc<EffectDefinition>>, FxError> {
        definition.validate()?;
        let name = name.into();
        definition.name = name.clone();
        if definition.display_name.is_empty() {
            definition.display_name = name.clone();
        }
        self.generation += 1;
        Ok(self.effects.insert(name, Arc::new(definition)))
    }

    pub fn register_function(&mut self, name: impl Into<String>, body: impl Into<String>) {
        let body: String = body.into();
        self.functions.insert(name.into(), Arc::from(body));
        self.generation += 1;
    }

    pub fn effect(&self, name: &str) -> Option<&Arc<EffectDefinition>> {
        self.effects.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&Arc<str>> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.effects.contains_key(name)
    }

    /// Effect names in sorted order.
    pub fn effect_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.effects.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Bumped by every registration; compiled passes remember the generation
    /// they were built against.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Instance id plus generation; compiled passes are reused only while
    /// this is unchanged.
    pub fn version(&self) -> CatalogVersion {
        CatalogVersion {
            catalog: self.id,
            generation: self.generation,
        }
    }
}
