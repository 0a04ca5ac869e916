//! Post-processing effect stack.
//!
//! A [`Stack`] holds an ordered list of named effects drawn from a
//! [`Catalog`]. On [`Stack::apply`] adjacent effects are merged into as few
//! full-screen passes as possible, each pass is compiled into one fragment
//! program, and the passes run over the source image through two pooled
//! scratch textures.
//!
//! ```no_run
//! use post_fx_stack::gpu::{HeadlessDevice, NamedTextures, ScratchTexturePool};
//! use post_fx_stack::{ApplyOptions, Catalog, FxContext, Stack, UniformValue};
//!
//! # fn main() -> anyhow::Result<()> {
//! let catalog = Catalog::builtin()?;
//! let mut device = HeadlessDevice::new([640, 480]);
//! let mut pool = ScratchTexturePool::new();
//! let textures = NamedTextures::new();
//!
//! let source = device.upload_image(image::RgbaImage::new(640, 480));
//! let mut stack = Stack::new();
//! let vignette = stack.add_effect("vignette");
//! stack.set_override(vignette, "amount", UniformValue::Float(0.6))?;
//!
//! let ctx = FxContext {
//!     catalog: &catalog,
//!     device: &mut device,
//!     pool: &mut pool,
//!     textures: &textures,
//! };
//! let report = stack.apply(ctx, source, None, &ApplyOptions::default());
//! assert_eq!(report.passes_executed, 1);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod gpu;
pub mod random;
pub mod shader;
pub mod stack;
pub mod template;
pub mod uniforms;

pub use catalog::{Catalog, CatalogVersion, EffectDefinition, UniformSpec};
pub use compiler::{CompileDiagnostics, CompiledPass, PassMember, compile_passes};
pub use error::{FxError, TemplateError};
pub use executor::{ApplyOptions, ApplyReport, DepthInput, FxContext};
pub use random::{FixedRandom, FrameRandom, HashRandom};
pub use stack::{EntryConfig, EntryId, Stack, StackConfig, StackEntry};
pub use template::CodeTemplate;
pub use uniforms::{BoundUniform, GlslType, UniformValue};
