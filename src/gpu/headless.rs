//! CPU reference device.
//!
//! `HeadlessDevice` keeps textures as RGBA8 images and records every draw.
//! It does not interpret GLSL: a full-screen draw resamples whatever is bound
//! to texture unit 0 into the target. That is enough to check plumbing
//! (pass ordering, ping-pong, uniform gathering, copies) without a GPU, and
//! to run the CLI in environments without one.

use std::collections::{HashMap, HashSet};

use anyhow::{Result, anyhow, bail};
use image::{Rgba, RgbaImage, imageops};

use super::{
    FilterMode, FixedFunctionState, FullscreenDraw, GpuDevice, ProgramId, RenderTarget,
    SamplerState, TextureDesc, TextureId,
};
use crate::uniforms::BoundUniform;

#[derive(Debug, Clone)]
struct HeadlessTexture {
    desc: TextureDesc,
    pixels: RgbaImage,
    sampler: SamplerState,
}

#[derive(Debug, Clone)]
pub struct HeadlessProgram {
    pub label: String,
    pub source: String,
    active_uniforms: HashSet<String>,
}

/// A recorded full-screen draw.
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub program: ProgramId,
    pub label: String,
    pub target: RenderTarget,
    pub uniforms: Vec<(String, BoundUniform)>,
    /// Every uniform packed in draw order, as a block upload would see it.
    pub uniform_block: Vec<u8>,
}

impl DrawRecord {
    pub fn uniform(&self, name: &str) -> Option<&BoundUniform> {
        self.uniforms.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Byte range of `name` inside [`DrawRecord::uniform_block`].
    pub fn block_range(&self, name: &str) -> Option<std::ops::Range<usize>> {
        let mut offset = 0;
        for (n, value) in &self.uniforms {
            let len = value.to_bytes().len();
            if n == name {
                return Some(offset..offset + len);
            }
            offset += len;
        }
        None
    }
}

#[derive(Debug)]
pub struct HeadlessDevice {
    next_id: u64,
    textures: HashMap<TextureId, HeadlessTexture>,
    programs: HashMap<ProgramId, HeadlessProgram>,
    display: RgbaImage,
    placeholder: Option<TextureId>,
    fixed_function: Option<FixedFunctionState>,
    fail_markers: Vec<String>,
    draws: Vec<DrawRecord>,
    copies: usize,
}

impl HeadlessDevice {
    pub fn new([width, height]: [u32; 2]) -> Self {
        Self {
            next_id: 1,
            textures: HashMap::new(),
            programs: HashMap::new(),
            display: RgbaImage::new(width.max(1), height.max(1)),
            placeholder: None,
            fixed_function: None,
            fail_markers: Vec::new(),
            draws: Vec::new(),
            copies: 0,
        }
    }

    /// Reject any program whose source contains `marker`.
    pub fn fail_programs_containing(&mut self, marker: impl Into<String>) {
        self.fail_markers.push(marker.into());
    }

    pub fn upload_image(&mut self, image: RgbaImage) -> TextureId {
        let id = TextureId(self.alloc_id());
        self.textures.insert(
            id,
            HeadlessTexture {
                desc: TextureDesc::rgba8(image.width(), image.height()),
                pixels: image,
                sampler: SamplerState::default(),
            },
        );
        id
    }

    pub fn pixels(&self, texture: TextureId) -> Option<&RgbaImage> {
        self.textures.get(&texture).map(|t| &t.pixels)
    }

    pub fn display_pixels(&self) -> &RgbaImage {
        &self.display
    }

    pub fn sampler_state(&self, texture: TextureId) -> Option<SamplerState> {
        self.textures.get(&texture).map(|t| t.sampler)
    }

    pub fn fixed_function_state(&self) -> Option<FixedFunctionState> {
        self.fixed_function
    }

    pub fn program(&self, program: ProgramId) -> Option<&HeadlessProgram> {
        self.programs.get(&program)
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn copy_count(&self) -> usize {
        self.copies
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn clear_records(&mut self) {
        self.draws.clear();
        self.copies = 0;
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn write_target(&mut self, target: RenderTarget, source: TextureId) -> Result<()> {
        let src = self
            .textures
            .get(&source)
            .ok_or_else(|| anyhow!("unknown source texture {source}"))?;
        let [w, h] = match target {
            RenderTarget::Display => [self.display.width(), self.display.height()],
            RenderTarget::Texture(t) => self
                .textures
                .get(&t)
                .map(|t| t.desc.size())
                .ok_or_else(|| anyhow!("unknown target texture {t}"))?,
        };
        let pixels = resample(&src.pixels, src.sampler.filter, w, h);
        match target {
            RenderTarget::Display => self.display = pixels,
            RenderTarget::Texture(t) => {
                if let Some(tex) = self.textures.get_mut(&t) {
                    tex.pixels = pixels;
                }
            }
        }
        Ok(())
    }
}

fn resample(src: &RgbaImage, filter: FilterMode, width: u32, height: u32) -> RgbaImage {
    if src.dimensions() == (width, height) {
        return src.clone();
    }
    let filter = match filter {
        FilterMode::Linear => imageops::FilterType::Triangle,
        FilterMode::Nearest => imageops::FilterType::Nearest,
    };
    imageops::resize(src, width, height, filter)
}

fn check_balanced(source: &str) -> Result<()> {
    let mut stack = Vec::new();
    for (line_no, line) in source.lines().enumerate() {
        let code = line.split("//").next().unwrap_or_default();
        for c in code.chars() {
            match c {
                '{' | '(' | '[' => stack.push(c),
                '}' | ')' | ']' => {
                    let open = stack.pop();
                    let expected = match c {
                        '}' => '{',
                        ')' => '(',
                        _ => '[',
                    };
                    if open != Some(expected) {
                        bail!("line {}: unbalanced `{c}`", line_no + 1);
                    }
                }
                _ => {}
            }
        }
    }
    if let Some(open) = stack.pop() {
        bail!("unclosed `{open}` at end of source");
    }
    Ok(())
}

/// Uniforms referenced somewhere besides their own declaration, mirroring a
/// GL linker dropping unused uniforms.
fn active_uniforms(source: &str) -> HashSet<String> {
    let mut token_counts: HashMap<&str, usize> = HashMap::new();
    for token in source
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
    {
        *token_counts.entry(token).or_default() += 1;
    }

    source
        .lines()
        .filter_map(|line| line.trim().strip_prefix("uniform "))
        .filter_map(|decl| {
            let decl = decl.trim_end().trim_end_matches(';');
            decl.split_whitespace().last()
        })
        .filter(|name| token_counts.get(name).copied().unwrap_or(0) > 1)
        .map(str::to_string)
        .collect()
}

impl GpuDevice for HeadlessDevice {
    fn compile_program(&mut self, label: &str, fragment_source: &str) -> Result<ProgramId> {
        if let Some(marker) = self
            .fail_markers
            .iter()
            .find(|m| fragment_source.contains(m.as_str()))
        {
            bail!("{label}: rejected program containing `{marker}`");
        }
        if !fragment_source.contains("void main()") {
            bail!("{label}: missing `void main()`");
        }
        check_balanced(fragment_source).map_err(|e| anyhow!("{label}: {e}"))?;

        let id = ProgramId(self.alloc_id());
        self.programs.insert(
            id,
            HeadlessProgram {
                label: label.to_string(),
                source: fragment_source.to_string(),
                active_uniforms: active_uniforms(fragment_source),
            },
        );
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn program_has_uniform(&self, program: ProgramId, name: &str) -> bool {
        self.programs
            .get(&program)
            .is_some_and(|p| p.active_uniforms.contains(name))
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        if desc.width == 0 || desc.height == 0 {
            bail!("cannot create a {}x{} texture", desc.width, desc.height);
        }
        let id = TextureId(self.alloc_id());
        self.textures.insert(
            id,
            HeadlessTexture {
                desc: *desc,
                pixels: RgbaImage::new(desc.width, desc.height),
                sampler: SamplerState::default(),
            },
        );
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
        if self.placeholder == Some(texture) {
            self.placeholder = None;
        }
    }

    fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc> {
        self.textures.get(&texture).map(|t| t.desc)
    }

    fn placeholder_texture(&mut self) -> Result<TextureId> {
        if let Some(id) = self.placeholder {
            return Ok(id);
        }
        let id = self.upload_image(RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255])));
        self.placeholder = Some(id);
        Ok(id)
    }

    fn set_sampler_state(&mut self, texture: TextureId, state: SamplerState) {
        if let Some(t) = self.textures.get_mut(&texture) {
            t.sampler = state;
        }
    }

    fn set_fixed_function_state(&mut self, state: FixedFunctionState) {
        self.fixed_function = Some(state);
    }

    fn display_size(&self) -> [u32; 2] {
        [self.display.width(), self.display.height()]
    }

    fn draw_fullscreen(&mut self, draw: &FullscreenDraw<'_>) -> Result<()> {
        let label = self
            .programs
            .get(&draw.program)
            .map(|p| p.label.clone())
            .ok_or_else(|| anyhow!("unknown program {}", draw.program))?;
        let input = draw.uniforms.iter().find_map(|(_, v)| match v {
            BoundUniform::Sampler { unit: 0, texture } => Some(*texture),
            _ => None,
        });

        if let Some(input) = input {
            self.write_target(draw.target, input)?;
        }
        let uniform_block = draw
            .uniforms
            .iter()
            .flat_map(|(_, value)| value.to_bytes())
            .collect();
        self.draws.push(DrawRecord {
            program: draw.program,
            label,
            target: draw.target,
            uniforms: draw.uniforms.to_vec(),
            uniform_block,
        });
        Ok(())
    }

    fn copy_texture(&mut self, source: TextureId, target: RenderTarget) -> Result<()> {
        if target == RenderTarget::Texture(source) {
            return Ok(());
        }
        self.write_target(target, source)?;
        self.copies += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_uniforms_require_a_use() {
        let src = "uniform float u_used;\nuniform vec2 u_unused;\nvoid main() { gl_FragColor = vec4(u_used); }";
        let active = active_uniforms(src);
        assert!(active.contains("u_used"));
        assert!(!active.contains("u_unused"));
    }

    #[test]
    fn test_compile_rejects_unbalanced_source() {
        let mut device = HeadlessDevice::new([4, 4]);
        assert!(device.compile_program("bad", "void main() { if (x) {").is_err());
        assert!(device.compile_program("good", "void main() { }").is_ok());
        assert_eq!(device.program_count(), 1);
    }

    #[test]
    fn test_draw_records_packed_uniform_block() {
        let mut device = HeadlessDevice::new([4, 4]);
        let program = device
            .compile_program("p", "uniform float u_a;\nvoid main() { gl_FragColor = vec4(u_a); }")
            .unwrap();
        let input = device.upload_image(RgbaImage::new(4, 4));
        let uniforms = [
            ("u_texture".to_string(), BoundUniform::Sampler { unit: 0, texture: input }),
            ("u_offset".to_string(), BoundUniform::Vec2([0.5, -2.0])),
            ("u_a".to_string(), BoundUniform::Float(0.25)),
        ];
        device
            .draw_fullscreen(&FullscreenDraw {
                program,
                target: RenderTarget::Display,
                uniforms: &uniforms,
            })
            .unwrap();

        let record = &device.draws()[0];
        assert_eq!(record.uniform_block.len(), 4 + 8 + 4);
        assert_eq!(record.block_range("u_offset"), Some(4..12));
        let range = record.block_range("u_a").unwrap();
        assert_eq!(&record.uniform_block[range], &0.25f32.to_ne_bytes());
        assert_eq!(record.block_range("u_missing"), None);
    }

    #[test]
    fn test_copy_resamples_into_target() {
        let mut device = HeadlessDevice::new([4, 4]);
        let src = device.upload_image(RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255])));
        let dst = device.create_texture(&TextureDesc::rgba8(4, 4)).unwrap();
        device.copy_texture(src, RenderTarget::Texture(dst)).unwrap();
        let out = device.pixels(dst).unwrap();
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(3, 3), &Rgba([10, 20, 30, 255]));

        device.copy_texture(src, RenderTarget::Display).unwrap();
        assert_eq!(device.display_pixels().get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
        assert_eq!(device.copy_count(), 2);
    }
}
