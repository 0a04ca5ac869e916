//! Pass executor: runs the compiled passes over a source texture using two
//! pooled scratch targets.
//!
//! Nothing here returns an error. Unknown effects, failed compiles, missing
//! textures and device failures all degrade to "draw the best image we
//! have" and are reported through [`ApplyReport`] and the log.
//!
//! State contract: the executor disables depth testing, blending and face
//! culling through [`GpuDevice::set_fixed_function_state`] and leaves them
//! that way. It also sets the sampler state of the texture it finally blits
//! (the source itself when the stack compiles to no passes).

use log::{debug, trace, warn};

use crate::catalog::Catalog;
use crate::compiler::{CompiledPass, compile_passes};
use crate::error::FxError;
use crate::gpu::{
    FilterMode, FixedFunctionState, FullscreenDraw, GpuDevice, ProgramId, RenderTarget,
    SamplerState, TextureDesc, TextureId, TexturePool, TextureResolver, WrapMode,
};
use crate::shader::{
    self, DEPTH_TEXTURE_UNIT, FIRST_EFFECT_TEXTURE_UNIT, INPUT_TEXTURE_UNIT, U_ASPECT,
    U_DEPTH_RANGE, U_DEPTH_TEXTURE, U_INV_RESOLUTION, U_RANDOM, U_RESOLUTION, U_TEXTURE,
};
use crate::stack::{AntialiasProgram, Stack, StackEntry};
use crate::uniforms::BoundUniform;

/// Collaborators borrowed for one compile or apply call.
pub struct FxContext<'a> {
    pub catalog: &'a Catalog,
    pub device: &'a mut dyn GpuDevice,
    pub pool: &'a mut dyn TexturePool,
    pub textures: &'a dyn TextureResolver,
}

/// An externally rendered depth buffer and the planes it was rendered with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthInput {
    pub texture: TextureId,
    pub near: f32,
    pub far: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ApplyOptions {
    pub depth: Option<DepthInput>,
}

impl ApplyOptions {
    pub fn with_depth(texture: TextureId, near: f32, far: f32) -> Self {
        Self {
            depth: Some(DepthInput { texture, near, far }),
        }
    }
}

/// What one apply call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub recompiled: bool,
    pub pass_count: usize,
    pub passes_executed: usize,
    /// Index of the pass the loop stopped at, if it stopped early.
    pub aborted_at: Option<usize>,
    /// Scratch textures borrowed from the pool (0 or 2).
    pub scratch_acquired: usize,
    /// Texture names that the resolver did not know.
    pub missing_textures: Vec<String>,
    /// Uniforms that were bound to the placeholder texture.
    pub placeholder_uniforms: Vec<String>,
    pub random: [f32; 2],
    /// Device failures that forced a fallback.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FrameGlobals {
    resolution: [f32; 2],
    inv_resolution: [f32; 2],
    aspect: f32,
    random: [f32; 2],
}

impl FrameGlobals {
    fn new([width, height]: [u32; 2], random: [f32; 2]) -> Self {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        Self {
            resolution: [w, h],
            inv_resolution: [1.0 / w, 1.0 / h],
            aspect: w / h,
            random,
        }
    }

    fn bind(&self, out: &mut Vec<(String, BoundUniform)>) {
        out.push((U_RESOLUTION.to_string(), BoundUniform::Vec2(self.resolution)));
        out.push((
            U_INV_RESOLUTION.to_string(),
            BoundUniform::Vec2(self.inv_resolution),
        ));
        out.push((U_ASPECT.to_string(), BoundUniform::Float(self.aspect)));
        out.push((U_RANDOM.to_string(), BoundUniform::Vec2(self.random)));
    }
}

/// Two pooled render targets used alternately as pass input and output.
/// Both are returned to the pool when this is dropped, on every exit path.
struct ScratchPair<'p> {
    pool: &'p mut dyn TexturePool,
    slots: [TextureId; 2],
    read: usize,
}

impl<'p> ScratchPair<'p> {
    fn acquire(
        pool: &'p mut dyn TexturePool,
        device: &mut dyn GpuDevice,
        desc: &TextureDesc,
    ) -> anyhow::Result<Self> {
        let first = pool.acquire(device, desc)?;
        let second = match pool.acquire(device, desc) {
            Ok(t) => t,
            Err(e) => {
                pool.release(first);
                return Err(e);
            }
        };
        Ok(Self {
            pool,
            slots: [first, second],
            read: 0,
        })
    }

    fn input(&self) -> TextureId {
        self.slots[self.read]
    }

    fn output(&self) -> TextureId {
        self.slots[self.read ^ 1]
    }

    fn flip(&mut self) {
        self.read ^= 1;
    }
}

impl Drop for ScratchPair<'_> {
    fn drop(&mut self) {
        for texture in self.slots {
            self.pool.release(texture);
        }
    }
}

impl Stack {
    fn needs_compile(&self, catalog: &Catalog) -> bool {
        self.dirty
            || self.passes.is_empty()
            || self.compiled_version != Some(catalog.version())
    }

    /// Rebuild every pass and program from the current entry list.
    pub fn compile(&mut self, catalog: &Catalog, device: &mut dyn GpuDevice) {
        for program in self.passes.iter().filter_map(CompiledPass::program) {
            device.delete_program(program);
        }

        let compilation = compile_passes(&self.entries, catalog);
        self.passes = compilation.passes;
        self.diagnostics = compilation.diagnostics;
        for (index, pass) in self.passes.iter_mut().enumerate() {
            shader::build_pass(pass, index, device);
        }

        debug!(
            "compiled {} entries into {} passes",
            self.entries.len(),
            self.passes.len()
        );
        self.compiled_version = Some(catalog.version());
        self.dirty = false;
    }

    /// Run the stack over `source`, writing to `destination` or, when that is
    /// `None`, to the device's display target.
    pub fn apply(
        &mut self,
        ctx: FxContext<'_>,
        source: TextureId,
        destination: Option<TextureId>,
        options: &ApplyOptions,
    ) -> ApplyReport {
        let FxContext {
            catalog,
            device,
            pool,
            textures,
        } = ctx;
        let mut report = ApplyReport::default();

        let Some(source_desc) = device.texture_desc(source) else {
            let err = FxError::Device(format!("source {source} is not a live texture"));
            warn!("{err}");
            report.errors.push(err.to_string());
            return report;
        };
        let target_size = destination
            .and_then(|d| device.texture_desc(d))
            .map_or(source_desc.size(), |d| d.size());
        let globals = FrameGlobals::new(target_size, self.random.next_pair());
        report.random = globals.random;

        if self.needs_compile(catalog) {
            self.compile(catalog, device);
            report.recompiled = true;
        }
        report.pass_count = self.passes.len();
        device.set_fixed_function_state(FixedFunctionState::FULLSCREEN);

        if self.passes.is_empty() {
            self.blit(device, source, destination, &mut report);
            return report;
        }

        let scratch_desc = source_desc.resized(target_size);
        let mut scratch = match ScratchPair::acquire(pool, device, &scratch_desc) {
            Ok(scratch) => scratch,
            Err(e) => {
                warn!("could not borrow scratch textures ({e:#}); copying source through");
                report.errors.push(format!("{e:#}"));
                self.blit(device, source, destination, &mut report);
                return report;
            }
        };
        report.scratch_acquired = 2;

        if let Err(e) = device.copy_texture(source, RenderTarget::Texture(scratch.input())) {
            warn!("copy into scratch failed ({e:#}); copying source through");
            report.errors.push(format!("{e:#}"));
            self.blit(device, source, destination, &mut report);
            return report;
        }

        for (index, pass) in self.passes.iter().enumerate() {
            let Some(program) = pass.program else {
                warn!("pass {index} has no program; skipping the remaining passes");
                report.aborted_at = Some(index);
                break;
            };

            let mut uniforms = vec![(
                U_TEXTURE.to_string(),
                BoundUniform::Sampler {
                    unit: INPUT_TEXTURE_UNIT,
                    texture: scratch.input(),
                },
            )];
            globals.bind(&mut uniforms);
            if let Some(depth) = options.depth {
                if device.program_has_uniform(program, U_DEPTH_TEXTURE) {
                    uniforms.push((
                        U_DEPTH_TEXTURE.to_string(),
                        BoundUniform::Sampler {
                            unit: DEPTH_TEXTURE_UNIT,
                            texture: depth.texture,
                        },
                    ));
                    uniforms.push((
                        U_DEPTH_RANGE.to_string(),
                        BoundUniform::Vec2([depth.near, depth.far]),
                    ));
                }
            }
            gather_entry_uniforms(
                pass,
                &self.entries,
                device,
                textures,
                &mut uniforms,
                &mut report,
            );

            let draw = FullscreenDraw {
                program,
                target: RenderTarget::Texture(scratch.output()),
                uniforms: &uniforms,
            };
            trace!(
                "pass {index}: {} -> {} with {} uniforms",
                scratch.input(),
                scratch.output(),
                uniforms.len()
            );
            if let Err(e) = device.draw_fullscreen(&draw) {
                warn!("pass {index} draw failed ({e:#}); skipping the remaining passes");
                report.errors.push(format!("{e:#}"));
                report.aborted_at = Some(index);
                break;
            }
            scratch.flip();
            report.passes_executed += 1;
        }

        let result = scratch.input();
        self.blit(device, result, destination, &mut report);
        report
    }

    /// Write `texture` to the destination, through the antialias program
    /// when enabled.
    fn blit(
        &mut self,
        device: &mut dyn GpuDevice,
        texture: TextureId,
        destination: Option<TextureId>,
        report: &mut ApplyReport,
    ) {
        let filter = if self.filter {
            FilterMode::Linear
        } else {
            FilterMode::Nearest
        };
        device.set_sampler_state(
            texture,
            SamplerState {
                filter,
                wrap: WrapMode::ClampToEdge,
            },
        );
        let target = RenderTarget::from(destination);

        if self.antialias {
            if let Some(program) = self.ensure_antialias_program(device) {
                let size = device
                    .texture_desc(texture)
                    .map_or([1, 1], |d| d.size());
                let uniforms = [
                    (
                        U_TEXTURE.to_string(),
                        BoundUniform::Sampler {
                            unit: INPUT_TEXTURE_UNIT,
                            texture,
                        },
                    ),
                    (
                        U_INV_RESOLUTION.to_string(),
                        BoundUniform::Vec2([
                            1.0 / size[0].max(1) as f32,
                            1.0 / size[1].max(1) as f32,
                        ]),
                    ),
                ];
                let draw = FullscreenDraw {
                    program,
                    target,
                    uniforms: &uniforms,
                };
                match device.draw_fullscreen(&draw) {
                    Ok(()) => return,
                    Err(e) => {
                        warn!("antialias draw failed ({e:#}); copying instead");
                        report.errors.push(format!("{e:#}"));
                    }
                }
            }
        }

        if let Err(e) = device.copy_texture(texture, target) {
            warn!("final copy failed: {e:#}");
            report.errors.push(format!("{e:#}"));
        }
    }

    fn ensure_antialias_program(&mut self, device: &mut dyn GpuDevice) -> Option<ProgramId> {
        match self.antialias_program {
            AntialiasProgram::Ready(program) => Some(program),
            AntialiasProgram::Failed => None,
            AntialiasProgram::NotBuilt => {
                let built = shader::build_antialias_program(device);
                self.antialias_program = match built {
                    Some(program) => AntialiasProgram::Ready(program),
                    None => AntialiasProgram::Failed,
                };
                built
            }
        }
    }
}

/// Per-entry uniforms of `pass`: stored overrides coerced to the declared
/// type, else the schema default. Samplers take units from 2 upwards.
fn gather_entry_uniforms(
    pass: &CompiledPass,
    entries: &[StackEntry],
    device: &mut dyn GpuDevice,
    textures: &dyn TextureResolver,
    out: &mut Vec<(String, BoundUniform)>,
    report: &mut ApplyReport,
) {
    let mut unit = FIRST_EFFECT_TEXTURE_UNIT;

    for member in &pass.members {
        let entry = entries
            .get(member.entry_index)
            .filter(|e| e.id() == member.entry_id);

        for (key, spec) in &member.effect.uniforms {
            let name = spec.instance_name(member.entry_index);
            let value = entry
                .and_then(|e| e.get(key))
                .and_then(|v| {
                    let coerced = v.coerce(spec.glsl_type);
                    if coerced.is_none() {
                        warn!(
                            "override `{key}` = {v:?} does not fit {} `{name}`; using the default",
                            spec.glsl_type
                        );
                    }
                    coerced
                })
                .unwrap_or_else(|| spec.default_or_zero());

            if !spec.glsl_type.is_sampler() {
                if let Some(bound) = BoundUniform::from_value(&value) {
                    out.push((name, bound));
                }
                continue;
            }

            let resolved = value.as_texture_name().and_then(|tex_name| {
                let found = textures.resolve(tex_name);
                if found.is_none() {
                    warn!("{}", FxError::ResourceMissing(tex_name.to_string()));
                    report.missing_textures.push(tex_name.to_string());
                }
                found
            });
            let texture = match resolved {
                Some(texture) => texture,
                None => match device.placeholder_texture() {
                    Ok(placeholder) => {
                        report.placeholder_uniforms.push(name.clone());
                        placeholder
                    }
                    Err(e) => {
                        warn!("no placeholder texture for `{name}`: {e:#}");
                        continue;
                    }
                },
            };
            if spec.nearest || spec.clamp_to_edge {
                device.set_sampler_state(texture, spec.sampling().into());
            }
            out.push((name, BoundUniform::Sampler { unit, texture }));
            unit += 1;
        }
    }
}
