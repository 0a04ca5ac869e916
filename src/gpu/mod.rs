//! Collaborator seams: the GPU device, the scratch-texture pool, and the
//! texture-by-name service.
//!
//! The stack never talks to a graphics API directly. Programs are compiled,
//! textures created and full-screen draws issued through [`GpuDevice`];
//! temporary render targets come from a [`TexturePool`]; texture-typed
//! overrides are resolved through a [`TextureResolver`].

pub mod headless;
pub mod pool;

use std::collections::HashMap;
use std::fmt;

use anyhow::Result;

use crate::uniforms::{BoundUniform, Sampling};

pub use headless::HeadlessDevice;
pub use pool::ScratchTexturePool;

/// Opaque handle to a device texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Opaque handle to a compiled device program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u64);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prog#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgb,
    Rgba,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    UnsignedByte,
    HalfFloat,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub pixel_type: PixelType,
}

impl TextureDesc {
    pub fn rgba8(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Rgba,
            pixel_type: PixelType::UnsignedByte,
        }
    }

    /// Same format and pixel type at another size.
    pub fn resized(self, [width, height]: [u32; 2]) -> Self {
        Self {
            width,
            height,
            ..self
        }
    }

    pub fn size(&self) -> [u32; 2] {
        [self.width, self.height]
    }
}

/// Filtering applied when a texture is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Linear,
    Nearest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapMode {
    #[default]
    Repeat,
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SamplerState {
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

impl From<Sampling> for SamplerState {
    fn from(s: Sampling) -> Self {
        Self {
            filter: if s.nearest {
                FilterMode::Nearest
            } else {
                FilterMode::Linear
            },
            wrap: if s.clamp_to_edge {
                WrapMode::ClampToEdge
            } else {
                WrapMode::Repeat
            },
        }
    }
}

/// Fixed-function state for full-screen draws.
///
/// The executor sets [`FixedFunctionState::FULLSCREEN`] before its first draw
/// and does not restore the previous state: callers that depend on depth
/// testing, blending or face culling must re-establish them afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedFunctionState {
    pub depth_test: bool,
    pub blend: bool,
    pub cull_face: bool,
}

impl FixedFunctionState {
    pub const FULLSCREEN: Self = Self {
        depth_test: false,
        blend: false,
        cull_face: false,
    };
}

/// Where a draw or copy writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    Texture(TextureId),
    /// The device's default framebuffer.
    Display,
}

impl From<Option<TextureId>> for RenderTarget {
    fn from(t: Option<TextureId>) -> Self {
        t.map_or(RenderTarget::Display, RenderTarget::Texture)
    }
}

/// One full-screen triangle draw.
#[derive(Debug, Clone)]
pub struct FullscreenDraw<'a> {
    pub program: ProgramId,
    pub target: RenderTarget,
    pub uniforms: &'a [(String, BoundUniform)],
}

pub trait GpuDevice {
    /// Compile a fragment program. The device supplies the full-screen
    /// vertex stage, which feeds `v_coord` in [0, 1].
    fn compile_program(&mut self, label: &str, fragment_source: &str) -> Result<ProgramId>;

    fn delete_program(&mut self, program: ProgramId);

    /// Whether `name` is an active uniform of `program`.
    fn program_has_uniform(&self, program: ProgramId, name: &str) -> bool;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId>;

    fn destroy_texture(&mut self, texture: TextureId);

    fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc>;

    /// A small always-valid texture substituted for unresolved samplers.
    fn placeholder_texture(&mut self) -> Result<TextureId>;

    fn set_sampler_state(&mut self, texture: TextureId, state: SamplerState);

    fn set_fixed_function_state(&mut self, state: FixedFunctionState);

    /// Size of [`RenderTarget::Display`].
    fn display_size(&self) -> [u32; 2];

    fn draw_fullscreen(&mut self, draw: &FullscreenDraw<'_>) -> Result<()>;

    /// Copy `source` to `target`, resampling when the sizes differ.
    fn copy_texture(&mut self, source: TextureId, target: RenderTarget) -> Result<()>;
}

/// Temporary render targets borrowed for the duration of one apply call.
pub trait TexturePool {
    fn acquire(&mut self, device: &mut dyn GpuDevice, desc: &TextureDesc) -> Result<TextureId>;

    fn release(&mut self, texture: TextureId);
}

/// Resolves texture-typed overrides by name.
pub trait TextureResolver {
    fn resolve(&self, name: &str) -> Option<TextureId>;
}

/// A plain name → texture table.
#[derive(Debug, Clone, Default)]
pub struct NamedTextures {
    textures: HashMap<String, TextureId>,
}

impl NamedTextures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, texture: TextureId) {
        self.textures.insert(name.into(), texture);
    }

    pub fn remove(&mut self, name: &str) -> Option<TextureId> {
        self.textures.remove(name)
    }
}

impl TextureResolver for NamedTextures {
    fn resolve(&self, name: &str) -> Option<TextureId> {
        self.textures.get(name).copied()
    }
}

impl<F> TextureResolver for F
where
    F: Fn(&str) -> Option<TextureId>,
{
    fn resolve(&self, name: &str) -> Option<TextureId> {
        self(name)
    }
}
