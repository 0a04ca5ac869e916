//! Shader builder: wraps a compiled pass in the fixed preamble and main body
//! and hands it to the device.
//!
//! Effect code sees these names inside `main`:
//! - `uv`: sampling coordinate, writable by UV-space code
//! - `center`, `center_dist`: offset from and distance to the screen center
//! - `pixel`: fragment position in pixels
//! - `color`: the sampled source color, writable by color-space code

use log::{debug, warn};

use crate::compiler::CompiledPass;
use crate::error::FxError;
use crate::gpu::{GpuDevice, ProgramId};

pub const U_TEXTURE: &str = "u_texture";
pub const U_DEPTH_TEXTURE: &str = "u_depth_texture";
pub const U_RESOLUTION: &str = "u_resolution";
pub const U_INV_RESOLUTION: &str = "u_inv_resolution";
pub const U_ASPECT: &str = "u_aspect";
pub const U_DEPTH_RANGE: &str = "u_depth_range";
pub const U_RANDOM: &str = "u_random";

/// Texture unit of the ping-pong input.
pub const INPUT_TEXTURE_UNIT: u32 = 0;
/// Texture unit of the optional depth texture.
pub const DEPTH_TEXTURE_UNIT: u32 = 1;
/// First unit handed to texture-typed effect uniforms.
pub const FIRST_EFFECT_TEXTURE_UNIT: u32 = 2;

const PREAMBLE: &str = "\
#extension GL_OES_standard_derivatives : enable
precision highp float;

uniform sampler2D u_texture;
uniform sampler2D u_depth_texture;
uniform vec2 u_resolution;
uniform vec2 u_inv_resolution;
uniform float u_aspect;
uniform vec2 u_depth_range;
uniform vec2 u_random;

varying vec2 v_coord;
";

/// Source of the full program for `pass`.
pub fn program_source(pass: &CompiledPass) -> String {
    let mut out = String::from(PREAMBLE);

    if !pass.uniform_decls.is_empty() {
        out.push('\n');
        for decl in &pass.uniform_decls {
            out.push_str(decl);
            out.push('\n');
        }
    }

    for function in &pass.functions {
        out.push('\n');
        out.push_str(function.source.trim_end());
        out.push('\n');
    }

    out.push_str(
        "
void main() {
    vec2 uv = v_coord;
    vec2 center = uv - vec2(0.5);
    float center_dist = length(center * vec2(u_aspect, 1.0));
    vec2 pixel = uv * u_resolution;
",
    );
    push_indented(&mut out, &pass.uv_code);
    out.push_str("    vec4 color = texture2D(u_texture, uv);\n");
    push_indented(&mut out, &pass.color_code);
    out.push_str("    gl_FragColor = color;\n}\n");
    out
}

fn push_indented(out: &mut String, code: &str) {
    for line in code.lines() {
        if line.trim().is_empty() {
            out.push('\n');
        } else {
            out.push_str("    ");
            out.push_str(line);
            out.push('\n');
        }
    }
}

/// Generate and compile the program for `pass`. A failed compile leaves
/// `program` empty; the executor stops at such a pass and blits what it has.
pub fn build_pass(pass: &mut CompiledPass, pass_index: usize, device: &mut dyn GpuDevice) {
    pass.source = program_source(pass);
    let label = format!("fx_pass_{pass_index}[{}]", pass.effect_names().join(","));
    pass.program = match device.compile_program(&label, &pass.source) {
        Ok(program) => {
            debug!("compiled {label} as {program}");
            Some(program)
        }
        Err(e) => {
            let err = FxError::Compile {
                pass: pass_index,
                message: format!("{e:#}"),
            };
            warn!("{err}");
            None
        }
    };
}

/// Fixed FXAA-style pass used when the stack has `antialias` set.
pub const ANTIALIAS_SOURCE: &str = "\
#extension GL_OES_standard_derivatives : enable
precision highp float;

uniform sampler2D u_texture;
uniform vec2 u_inv_resolution;

varying vec2 v_coord;

void main() {
    vec3 luma = vec3(0.299, 0.587, 0.114);
    vec3 rgb_m = texture2D(u_texture, v_coord).rgb;
    vec3 rgb_nw = texture2D(u_texture, v_coord + vec2(-1.0, -1.0) * u_inv_resolution).rgb;
    vec3 rgb_ne = texture2D(u_texture, v_coord + vec2(1.0, -1.0) * u_inv_resolution).rgb;
    vec3 rgb_sw = texture2D(u_texture, v_coord + vec2(-1.0, 1.0) * u_inv_resolution).rgb;
    vec3 rgb_se = texture2D(u_texture, v_coord + vec2(1.0, 1.0) * u_inv_resolution).rgb;
    float l_nw = dot(rgb_nw, luma);
    float l_ne = dot(rgb_ne, luma);
    float l_sw = dot(rgb_sw, luma);
    float l_se = dot(rgb_se, luma);
    float l_m = dot(rgb_m, luma);
    float l_min = min(l_m, min(min(l_nw, l_ne), min(l_sw, l_se)));
    float l_max = max(l_m, max(max(l_nw, l_ne), max(l_sw, l_se)));
    vec2 dir = vec2(-((l_nw + l_ne) - (l_sw + l_se)), (l_nw + l_sw) - (l_ne + l_se));
    float reduce = max((l_nw + l_ne + l_sw + l_se) * 0.03125, 0.0078125);
    float rcp = 1.0 / (min(abs(dir.x), abs(dir.y)) + reduce);
    dir = clamp(dir * rcp, vec2(-8.0), vec2(8.0)) * u_inv_resolution;
    vec3 rgb_a = 0.5 * (texture2D(u_texture, v_coord + dir * (1.0 / 3.0 - 0.5)).rgb
        + texture2D(u_texture, v_coord + dir * (2.0 / 3.0 - 0.5)).rgb);
    vec3 rgb_b = rgb_a * 0.5 + 0.25 * (texture2D(u_texture, v_coord - dir * 0.5).rgb
        + texture2D(u_texture, v_coord + dir * 0.5).rgb);
    float l_b = dot(rgb_b, luma);
    vec3 rgb = (l_b < l_min || l_b > l_max) ? rgb_a : rgb_b;
    gl_FragColor = vec4(rgb, texture2D(u_texture, v_coord).a);
}
";

pub fn build_antialias_program(device: &mut dyn GpuDevice) -> Option<ProgramId> {
    match device.compile_program("fx_antialias", ANTIALIAS_SOURCE) {
        Ok(program) => Some(program),
        Err(e) => {
            warn!("antialias program failed to compile, blitting without it: {e:#}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::compiler::compile_passes;
    use crate::gpu::HeadlessDevice;
    use crate::stack::Stack;

    #[test]
    fn test_source_layout() {
        let catalog = Catalog::builtin().unwrap();
        let mut stack = Stack::new();
        stack.add_effect("hue_saturation");
        stack.add_effect("lens_distortion");
        let mut passes = compile_passes(stack.entries(), &catalog).passes;
        assert_eq!(passes.len(), 2);

        let src = program_source(&passes[1]);
        let decl = src.find("uniform float u_lens_strength1;").unwrap();
        let func = src.find("vec2 fx_barrel(").unwrap();
        let uv = src.find("uv = fx_barrel(uv, u_lens_strength1);").unwrap();
        let sample = src.find("vec4 color = texture2D(u_texture, uv);").unwrap();
        assert!(decl < func && func < uv && uv < sample);
        assert!(src.starts_with("#extension GL_OES_standard_derivatives"));

        let mut device = HeadlessDevice::new([4, 4]);
        build_pass(&mut passes[0], 0, &mut device);
        assert!(passes[0].program().is_some());
        assert!(passes[0].source().contains("fx_rgb2hsv"));
        let program = passes[0].program().unwrap();
        assert!(device.program_has_uniform(program, "u_hue0"));
        assert!(!device.program_has_uniform(program, "u_depth_texture"));
    }

    #[test]
    fn test_failed_compile_leaves_program_empty() {
        let catalog = Catalog::builtin().unwrap();
        let mut stack = Stack::new();
        stack.add_effect("invert");
        let mut passes = compile_passes(stack.entries(), &catalog).passes;
        let mut device = HeadlessDevice::new([4, 4]);
        device.fail_programs_containing("vec3(1.0) - color.rgb");
        build_pass(&mut passes[0], 0, &mut device);
        assert!(passes[0].program().is_none());
        assert!(!passes[0].source().is_empty());
    }

    #[test]
    fn test_antialias_program_compiles_on_headless() {
        let mut device = HeadlessDevice::new([4, 4]);
        let program = build_antialias_program(&mut device).unwrap();
        assert!(device.program_has_uniform(program, U_INV_RESOLUTION));
    }
}
