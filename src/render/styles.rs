//! Built-in reference generators.

use std::f32::consts::{PI, TAU};

use super::frame::Frame;
use super::generator::{FrameGenerator, GeneratorContext, GeneratorRegistry};
use crate::config::Rgb;
use crate::error::Result;

pub fn register_builtin(registry: &mut GeneratorRegistry) {
    registry.register("solid", "Constant primary color, ignores the audio", |ctx| {
        Box::new(Solid(ctx))
    });
    registry.register(
        "pulsing_core",
        "Circle pulsing with loudness, onset ring and a brightness trail",
        |ctx| Box::new(PulsingCore::new(ctx)),
    );
    registry.register(
        "spectrum_bars",
        "Equalizer bars tinted by the dominant pitch class",
        |ctx| Box::new(SpectrumBars::new(ctx)),
    );
}

pub struct Solid(GeneratorContext);

impl FrameGenerator for Solid {
    fn render_frame(&self, _index: usize) -> Result<Frame> {
        Ok(Frame::filled(self.0.width, self.0.height, self.0.colors.primary))
    }
}

const TRAIL_LEN: usize = 20;

pub struct PulsingCore {
    ctx: GeneratorContext,
    center: (f32, f32),
    base_radius: f32,
}

impl PulsingCore {
    pub fn new(ctx: GeneratorContext) -> Self {
        Self {
            ctx,
            center: (0.0, 0.0),
            base_radius: 0.0,
        }
    }
}

impl FrameGenerator for PulsingCore {
    fn setup(&mut self) -> Result<()> {
        let (w, h) = (self.ctx.width, self.ctx.height);
        self.center = ((w / 2) as f32, (h / 2) as f32);
        self.base_radius = (w.min(h) / 6) as f32;
        Ok(())
    }

    fn render_frame(&self, index: usize) -> Result<Frame> {
        let colors = self.ctx.colors;
        let timeline = &self.ctx.timeline;
        let f = timeline.at(index);
        let mut frame = Frame::filled(self.ctx.width, self.ctx.height, colors.background);
        let (cx, cy) = self.center;

        let radius = self.base_radius * (1.0 + f.loudness * 0.8);
        let glow_step = (self.base_radius / 6.0).max(2.0);

        for i in 0..3 {
            let strength = 100.0 * (1.0 - i as f32 / 3.0) * f.loudness;
            if strength > 10.0 {
                let r = radius + i as f32 * glow_step;
                let thickness = (3 - i) as f32;
                draw_ring(&mut frame, (cx, cy), r, r + thickness, colors.primary, None);
            }
        }
        fill_circle(&mut frame, (cx, cy), radius, colors.primary);

        if f.onset > 0.3 {
            let ring = self.base_radius * 1.8;
            let start = ((index * 2) % 360) as f32;
            draw_ring(&mut frame, (cx, cy), ring, ring + 4.0, colors.secondary, Some((start, start + 60.0)));
        }

        // Trail of past spectral centroids along the bottom edge.
        let h = self.ctx.height as f32;
        let spacing = self.ctx.width as f32 / (TRAIL_LEN as f32 * 1.5);
        for i in 0..TRAIL_LEN {
            let past = timeline.at(index.saturating_sub(i));
            let x = cx + (i as f32 - TRAIL_LEN as f32 / 2.0) * spacing;
            let y = h * 0.9 - past.spectral_centroid * h * 0.2;
            let size = (h / 50.0) * (1.0 - i as f32 / TRAIL_LEN as f32);
            if size >= 1.0 {
                fill_circle(&mut frame, (x, y), size, colors.primary);
            }
        }

        Ok(frame)
    }
}

const BAR_COUNT: u32 = 40;

pub struct SpectrumBars {
    ctx: GeneratorContext,
    bar_width: u32,
    bar_spacing: u32,
    max_bar_height: f32,
    base_y: u32,
    start_x: u32,
}

impl SpectrumBars {
    pub fn new(ctx: GeneratorContext) -> Self {
        Self {
            ctx,
            bar_width: 0,
            bar_spacing: 0,
            max_bar_height: 0.0,
            base_y: 0,
            start_x: 0,
        }
    }
}

impl FrameGenerator for SpectrumBars {
    fn setup(&mut self) -> Result<()> {
        let (w, h) = (self.ctx.width, self.ctx.height);
        self.bar_width = (w / (BAR_COUNT + 4)).max(1);
        self.bar_spacing = self.bar_width / 4;
        self.max_bar_height = h as f32 * 0.7;
        self.base_y = (h as f32 * 0.85) as u32;
        let total = BAR_COUNT * (self.bar_width + self.bar_spacing);
        self.start_x = w.saturating_sub(total) / 2;
        Ok(())
    }

    fn render_frame(&self, index: usize) -> Result<Frame> {
        let f = self.ctx.timeline.at(index);
        let mut frame = Frame::filled(self.ctx.width, self.ctx.height, self.ctx.colors.background);

        let base_hue = f.dominant_pitch() as f32 / 12.0;
        let t = index as f32 * 0.1;

        for i in 0..BAR_COUNT {
            let phase = i as f32 / BAR_COUNT as f32 * TAU;
            let wave1 = (phase + t + f.loudness * PI).sin() * 0.5 + 0.5;
            let wave2 = (phase * 2.0 + t * 1.5).sin() * 0.3 + 0.3;
            let wave3 = f.onset * (phase * 3.0 + t * 2.0).sin() * 0.2;
            let factor = ((wave1 + wave2 + wave3) / 1.5 * f.loudness * 1.5).clamp(0.1, 1.0);

            let bar_h = (self.max_bar_height * factor) as u32;
            let hue = (base_hue + i as f32 / BAR_COUNT as f32 * 0.3).fract();
            let color = hsv_to_rgb(hue, 0.8, 0.6 + 0.4 * f.spectral_centroid);

            let x0 = self.start_x + i * (self.bar_width + self.bar_spacing);
            let y0 = self.base_y.saturating_sub(bar_h);
            frame.fill_rect(x0, y0, x0 + self.bar_width, self.base_y, color);
        }

        Ok(frame)
    }
}

fn fill_circle(frame: &mut Frame, center: (f32, f32), radius: f32, color: Rgb) {
    draw_ring(frame, center, 0.0, radius, color, None);
}

/// Paint pixels whose centre lies between `inner` and `outer`, optionally
/// limited to an arc given in degrees (clockwise from +x).
fn draw_ring(
    frame: &mut Frame,
    (cx, cy): (f32, f32),
    inner: f32,
    outer: f32,
    color: Rgb,
    arc: Option<(f32, f32)>,
) {
    let (w, h) = (frame.width() as f32, frame.height() as f32);
    let x0 = (cx - outer).floor().clamp(0.0, w) as u32;
    let x1 = (cx + outer).ceil().clamp(0.0, w) as u32;
    let y0 = (cy - outer).floor().clamp(0.0, h) as u32;
    let y1 = (cy + outer).ceil().clamp(0.0, h) as u32;
    let (inner2, outer2) = (inner * inner, outer * outer);

    for y in y0..y1 {
        for x in x0..x1 {
            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            let d2 = dx * dx + dy * dy;
            if d2 < inner2 || d2 > outer2 {
                continue;
            }
            if let Some((start, end)) = arc {
                let angle = dy.atan2(dx).to_degrees().rem_euclid(360.0);
                let rel = (angle - start).rem_euclid(360.0);
                if rel > end - start {
                    continue;
                }
            }
            frame.set_pixel(x, y, color);
        }
    }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb {
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match sector as i32 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    let to_u8 = |c: f32| (c.clamp(0.0, 1.0) * 255.0) as u8;
    [to_u8(r), to_u8(g), to_u8(b)]
}
