//! Deterministic color grading applied to every frame before encoding.
//!
//! Stages always run in the same order: contrast, saturation, brightness,
//! grain, vignette, chromatic aberration. A stage at its neutral value is
//! skipped, so neutral parameters leave the frame untouched.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::frame::{Frame, CHANNELS};
use crate::config::PostProcessParams;

/// Standard deviation of grain noise at intensity 1.0, in 8-bit units.
const GRAIN_SIGMA: f32 = 50.0;
/// Darkest multiplier the vignette may apply.
const VIGNETTE_FLOOR: f32 = 0.3;
/// Pixel shift per unit of chromatic aberration intensity.
const ABERRATION_SCALE: f32 = 3.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PostProcessor {
    params: PostProcessParams,
}

impl PostProcessor {
    pub fn new(params: PostProcessParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PostProcessParams {
        &self.params
    }

    pub fn is_identity(&self) -> bool {
        self.params.is_neutral()
    }

    /// Grade one frame. Pure: the output depends only on the parameters,
    /// the input pixels and `frame_index` (which seeds the grain).
    pub fn apply(&self, mut frame: Frame, frame_index: usize) -> Frame {
        let p = &self.params;
        if p.contrast != 1.0 {
            let mean = luma_mean(&frame);
            blend_with(&mut frame, p.contrast, |_| [mean; 3]);
        }
        if p.saturation != 1.0 {
            blend_with(&mut frame, p.saturation, |px| [luma(px); 3]);
        }
        if p.brightness != 1.0 {
            blend_with(&mut frame, p.brightness, |_| [0; 3]);
        }
        if p.grain > 0.0 {
            add_grain(&mut frame, p.grain, p.grain_seed, frame_index);
        }
        if p.vignette > 0.0 {
            vignette(&mut frame, p.vignette);
        }
        let shift = (p.chromatic_aberration * ABERRATION_SCALE) as usize;
        if shift > 0 {
            chromatic_shift(&mut frame, shift);
        }
        frame
    }
}

/// ITU-R 601 luma in fixed point.
fn luma(px: &[u8]) -> u8 {
    ((px[0] as u32 * 19595 + px[1] as u32 * 38470 + px[2] as u32 * 7471 + 0x8000) >> 16) as u8
}

fn luma_mean(frame: &Frame) -> u8 {
    let bytes = frame.as_bytes();
    let pixels = bytes.len() / CHANNELS;
    if pixels == 0 {
        return 0;
    }
    let sum: u64 = bytes.chunks_exact(CHANNELS).map(|px| luma(px) as u64).sum();
    (sum as f64 / pixels as f64 + 0.5) as u8
}

/// `degenerate + factor * (pixel - degenerate)`, clamped and truncated.
fn blend_with(frame: &mut Frame, factor: f32, degenerate: impl Fn(&[u8]) -> [u8; 3]) {
    for px in frame.as_bytes_mut().chunks_exact_mut(CHANNELS) {
        let base = degenerate(px);
        for (c, d) in px.iter_mut().zip(base) {
            let v = d as f32 + factor * (*c as f32 - d as f32);
            *c = v.clamp(0.0, 255.0) as u8;
        }
    }
}

fn add_grain(frame: &mut Frame, intensity: f32, seed: u64, frame_index: usize) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ frame_index as u64);
    let sigma = intensity * GRAIN_SIGMA;
    let mut spare: Option<f32> = None;
    for c in frame.as_bytes_mut() {
        let z = match spare.take() {
            Some(z) => z,
            None => {
                let (a, b) = box_muller(&mut rng);
                spare = Some(b);
                a
            }
        };
        *c = (*c as f32 + z * sigma).clamp(0.0, 255.0) as u8;
    }
}

fn box_muller(rng: &mut impl Rng) -> (f32, f32) {
    let u1 = 1.0 - rng.random::<f32>();
    let u2 = rng.random::<f32>();
    let r = (-2.0 * u1.ln()).sqrt();
    let theta = std::f32::consts::TAU * u2;
    (r * theta.cos(), r * theta.sin())
}

fn vignette(frame: &mut Frame, intensity: f32) {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    let max_dist = (cx * cx + cy * cy).sqrt().max(f32::EPSILON);
    let bytes = frame.as_bytes_mut();
    for y in 0..h {
        let dy = y as f32 - cy;
        for x in 0..w {
            let dx = x as f32 - cx;
            let dist = (dx * dx + dy * dy).sqrt();
            let gain = (1.0 - dist / max_dist * intensity).clamp(VIGNETTE_FLOOR, 1.0);
            let o = (y * w + x) * CHANNELS;
            for c in &mut bytes[o..o + CHANNELS] {
                *c = (*c as f32 * gain) as u8;
            }
        }
    }
}

/// Shift red left and blue right by `shift` pixels. Columns the shift
/// vacates keep their original values; nothing wraps around the row.
fn chromatic_shift(frame: &mut Frame, shift: usize) {
    let w = frame.width() as usize;
    if shift == 0 || shift >= w {
        return;
    }
    for row in frame.as_bytes_mut().chunks_exact_mut(w * CHANNELS) {
        // Forward pass reads ahead of the write position, backward pass behind.
        for x in 0..w - shift {
            row[x * CHANNELS] = row[(x + shift) * CHANNELS];
        }
        for x in (shift..w).rev() {
            row[x * CHANNELS + 2] = row[(x - shift) * CHANNELS + 2];
        }
    }
}
