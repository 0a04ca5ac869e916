//! Uniform types and values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::gpu::TextureId;

/// GLSL types an effect may declare in its uniform schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlslType {
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "vec2")]
    Vec2,
    #[serde(rename = "vec3")]
    Vec3,
    #[serde(rename = "vec4")]
    Vec4,
    #[serde(rename = "sampler2D")]
    Sampler2D,
}

impl GlslType {
    pub fn glsl(self) -> &'static str {
        match self {
            GlslType::Float => "float",
            GlslType::Int => "int",
            GlslType::Bool => "bool",
            GlslType::Vec2 => "vec2",
            GlslType::Vec3 => "vec3",
            GlslType::Vec4 => "vec4",
            GlslType::Sampler2D => "sampler2D",
        }
    }

    pub fn is_sampler(self) -> bool {
        matches!(self, GlslType::Sampler2D)
    }

    /// Value used when neither an override nor a schema default is present.
    pub fn zero(self) -> UniformValue {
        match self {
            GlslType::Float => UniformValue::Float(0.0),
            GlslType::Int => UniformValue::Int(0),
            GlslType::Bool => UniformValue::Bool(false),
            GlslType::Vec2 => UniformValue::Vec2([0.0; 2]),
            GlslType::Vec3 => UniformValue::Vec3([0.0; 3]),
            GlslType::Vec4 => UniformValue::Vec4([0.0; 4]),
            GlslType::Sampler2D => UniformValue::Texture(String::new()),
        }
    }
}

impl fmt::Display for GlslType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glsl())
    }
}

/// A per-instance override or schema default.
///
/// The JSON form is shape-driven: `true`, `3`, `0.5`, `[0.1, 0.2]`,
/// `[1, 0, 0, 1]` or `"texture_name"`. Variant order matters for untagged
/// decoding: an integer literal decodes as `Int`, a float literal as `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Texture(String),
}

impl UniformValue {
    /// Convert to the declared type. Numeric scalars convert freely; a
    /// scalar splats into a vector; vectors only convert between equal or
    /// smaller arities by truncation or padding with 1.0 for alpha.
    pub fn coerce(&self, ty: GlslType) -> Option<UniformValue> {
        use UniformValue as V;
        let scalar = match self {
            V::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            V::Int(i) => Some(*i as f32),
            V::Float(f) => Some(*f),
            _ => None,
        };
        match (ty, self) {
            (GlslType::Sampler2D, V::Texture(name)) => Some(V::Texture(name.clone())),
            (GlslType::Sampler2D, _) | (_, V::Texture(_)) => None,
            (GlslType::Float, _) => scalar.map(V::Float),
            (GlslType::Int, _) => scalar.map(|s| V::Int(s.round() as i32)),
            (GlslType::Bool, _) => scalar.map(|s| V::Bool(s != 0.0)),
            (GlslType::Vec2, V::Vec2(v)) => Some(V::Vec2(*v)),
            (GlslType::Vec2, V::Vec3([x, y, _]) | V::Vec4([x, y, _, _])) => Some(V::Vec2([*x, *y])),
            (GlslType::Vec3, V::Vec3(v)) => Some(V::Vec3(*v)),
            (GlslType::Vec3, V::Vec4([x, y, z, _])) => Some(V::Vec3([*x, *y, *z])),
            (GlslType::Vec4, V::Vec4(v)) => Some(V::Vec4(*v)),
            (GlslType::Vec4, V::Vec3([x, y, z])) => Some(V::Vec4([*x, *y, *z, 1.0])),
            (GlslType::Vec2, _) => scalar.map(|s| V::Vec2([s; 2])),
            (GlslType::Vec3, _) => scalar.map(|s| V::Vec3([s; 3])),
            (GlslType::Vec4, _) => scalar.map(|s| V::Vec4([s; 4])),
        }
    }

    pub fn as_texture_name(&self) -> Option<&str> {
        match self {
            UniformValue::Texture(name) if !name.is_empty() => Some(name),
            _ => None,
        }
    }
}

/// Sampling overrides a texture-typed uniform may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sampling {
    pub nearest: bool,
    pub clamp_to_edge: bool,
}

/// A value ready to hand to the device for one draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundUniform {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Sampler { unit: u32, texture: TextureId },
}

impl BoundUniform {
    /// Converts a coerced scalar/vector value. Texture values have no direct
    /// binding and return `None`; they are bound through a texture unit.
    pub fn from_value(value: &UniformValue) -> Option<Self> {
        Some(match value {
            UniformValue::Bool(b) => BoundUniform::Bool(*b),
            UniformValue::Int(i) => BoundUniform::Int(*i),
            UniformValue::Float(f) => BoundUniform::Float(*f),
            UniformValue::Vec2(v) => BoundUniform::Vec2(*v),
            UniformValue::Vec3(v) => BoundUniform::Vec3(*v),
            UniformValue::Vec4(v) => BoundUniform::Vec4(*v),
            UniformValue::Texture(_) => return None,
        })
    }

    /// Native-endian 32-bit words, for backends that upload uniform blocks.
    /// Bools and sampler units are written as `u32`.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            BoundUniform::Float(f) => bytemuck::bytes_of(f).to_vec(),
            BoundUniform::Int(i) => bytemuck::bytes_of(i).to_vec(),
            BoundUniform::Bool(b) => bytemuck::bytes_of(&u32::from(*b)).to_vec(),
            BoundUniform::Vec2(v) => bytemuck::cast_slice(v).to_vec(),
            BoundUniform::Vec3(v) => bytemuck::cast_slice(v).to_vec(),
            BoundUniform::Vec4(v) => bytemuck::cast_slice(v).to_vec(),
            BoundUniform::Sampler { unit, .. } => bytemuck::bytes_of(unit).to_vec(),
        }
    }
}
