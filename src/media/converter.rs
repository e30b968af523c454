// SPDX-License-Identifier: GPL-3.0-only

//! Resample source frames into the fixed planar YUV 4:2:0 output
//!
//! RGB sources use BT.601 limited-range coefficients. YUV sources are sampled
//! directly without a round trip through RGB. Float grayscale is normalized
//! from [0, 65535] to [0, 1] before resampling.

use super::frame::{Frame, FrameData};
use super::layout::{PixelLayout, SourceFormat};
use super::yuv420::Yuv420Buffer;
use crate::constants::IR_MAX_VALUE;
use tracing::{debug, warn};

/// Converts one source frame into the shared output buffer
///
/// Implementations overwrite `out` in place. Callers must not read `out`
/// while a conversion is in progress.
pub trait FrameConverter: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn convert(&mut self, frame: &Frame<'_>, out: &mut Yuv420Buffer);
}

/// Cached resource dimensions, used to rebuild state only when sizes change
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
pub struct CachedDimensions {
    pub width: u32,
    pub height: u32,
}

impl CachedDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn needs_update(&self, width: u32, height: u32) -> bool {
        self.width != width || self.height != height
    }

    pub fn update(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn is_initialized(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Normalize infrared samples from [0, 65535] to [0, 1]
///
/// `dst` is cleared and refilled; its allocation is reused.
pub fn normalize_ir(src: &[f32], dst: &mut Vec<f32>) {
    dst.clear();
    dst.extend(src.iter().map(|&v| normalize_sample(v)));
}

#[inline]
fn normalize_sample(v: f32) -> f32 {
    (v / IR_MAX_VALUE).clamp(0.0, 1.0)
}

/// Source index pair and blend weight along one axis
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tap {
    i0: usize,
    i1: usize,
    t: f32,
}

fn build_taps(src: u32, dst: u32) -> Vec<Tap> {
    let src = src.max(1) as usize;
    let dst = dst as usize;
    let scale = src as f32 / dst.max(1) as f32;
    let last = (src - 1) as f32;

    (0..dst)
        .map(|i| {
            let pos = ((i as f32 + 0.5) * scale - 0.5).clamp(0.0, last);
            let i0 = pos.floor() as usize;
            Tap {
                i0,
                i1: (i0 + 1).min(src - 1),
                t: pos - i0 as f32,
            }
        })
        .collect()
}

/// Precomputed bilinear taps for one source/output size pair
#[derive(Debug, Default)]
struct ResampleMap {
    src: CachedDimensions,
    dst: CachedDimensions,
    cols: Vec<Tap>,
    rows: Vec<Tap>,
}

impl ResampleMap {
    fn prepare(&mut self, src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) {
        if !self.src.needs_update(src_w, src_h) && !self.dst.needs_update(dst_w, dst_h) {
            return;
        }
        debug!(src_w, src_h, dst_w, dst_h, "Rebuilding resample map");
        self.cols = build_taps(src_w, dst_w);
        self.rows = build_taps(src_h, dst_h);
        self.src.update(src_w, src_h);
        self.dst.update(dst_w, dst_h);
    }

    #[inline]
    fn sample(&self, sampler: &Sampler<'_>, x: usize, y: usize) -> [f32; 3] {
        let c = self.cols[x];
        let r = self.rows[y];
        let p00 = sampler.fetch(c.i0, r.i0);
        let p10 = sampler.fetch(c.i1, r.i0);
        let p01 = sampler.fetch(c.i0, r.i1);
        let p11 = sampler.fetch(c.i1, r.i1);

        let mut out = [0.0; 3];
        for k in 0..3 {
            let top = p00[k] + (p10[k] - p00[k]) * c.t;
            let bottom = p01[k] + (p11[k] - p01[k]) * c.t;
            out[k] = top + (bottom - top) * r.t;
        }
        out
    }
}

/// Reads one source pixel as RGB in [0, 1] or as YUV in [0, 255]
struct Sampler<'a> {
    layout: PixelLayout,
    bytes: &'a [u8],
    floats: &'a [f32],
}

impl Sampler<'_> {
    #[inline]
    fn byte(&self, index: usize) -> f32 {
        self.bytes.get(index).copied().unwrap_or(0) as f32
    }

    #[inline]
    fn fetch(&self, x: usize, y: usize) -> [f32; 3] {
        let p0 = self.layout.plane(0);
        let row = p0.offset + y * p0.stride;
        match self.layout.format {
            SourceFormat::GrayF32 => {
                let w = self.layout.width as usize;
                let g = self.floats.get(y * w + x).copied().unwrap_or(0.0);
                [g, g, g]
            }
            SourceFormat::Gray8 => {
                let g = self.byte(row + x) / 255.0;
                [g, g, g]
            }
            SourceFormat::Bgrx32 => {
                let i = row + x * 4;
                [
                    self.byte(i + 2) / 255.0,
                    self.byte(i + 1) / 255.0,
                    self.byte(i) / 255.0,
                ]
            }
            SourceFormat::Rgb24 => {
                let i = row + x * 3;
                [
                    self.byte(i) / 255.0,
                    self.byte(i + 1) / 255.0,
                    self.byte(i + 2) / 255.0,
                ]
            }
            SourceFormat::Bgr24 => {
                let i = row + x * 3;
                [
                    self.byte(i + 2) / 255.0,
                    self.byte(i + 1) / 255.0,
                    self.byte(i) / 255.0,
                ]
            }
            SourceFormat::Yuyv => {
                // Y0 U Y1 V
                let i = row + (x / 2) * 4;
                let luma = if x % 2 == 0 { i } else { i + 2 };
                [self.byte(luma), self.byte(i + 1), self.byte(i + 3)]
            }
            SourceFormat::Uyvy => {
                // U Y0 V Y1
                let i = row + (x / 2) * 4;
                let luma = if x % 2 == 0 { i + 1 } else { i + 3 };
                [self.byte(luma), self.byte(i), self.byte(i + 2)]
            }
            SourceFormat::Yuv420 => {
                let pu = self.layout.plane(1);
                let pv = self.layout.plane(2);
                [
                    self.byte(row + x),
                    self.byte(pu.offset + (y / 2) * pu.stride + x / 2),
                    self.byte(pv.offset + (y / 2) * pv.stride + x / 2),
                ]
            }
            SourceFormat::Nv12 => {
                let puv = self.layout.plane(1);
                let i = puv.offset + (y / 2) * puv.stride + (x / 2) * 2;
                [self.byte(row + x), self.byte(i), self.byte(i + 1)]
            }
        }
    }
}

#[inline]
fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// BT.601 limited-range luma from RGB in [0, 1]
#[inline]
pub fn rgb_to_luma(rgb: [f32; 3]) -> u8 {
    let [r, g, b] = rgb;
    to_u8(16.0 + 65.481 * r + 128.553 * g + 24.966 * b)
}

/// BT.601 limited-range chroma from RGB in [0, 1]
#[inline]
pub fn rgb_to_chroma(rgb: [f32; 3]) -> (u8, u8) {
    let [r, g, b] = rgb;
    let u = 128.0 - 37.797 * r - 74.203 * g + 112.0 * b;
    let v = 128.0 + 112.0 * r - 93.786 * g - 18.214 * b;
    (to_u8(u), to_u8(v))
}

/// Bilinear CPU converter
///
/// Output dimensions are taken from the destination buffer and must be even.
#[derive(Debug, Default)]
pub struct CpuConverter {
    map: ResampleMap,
    normalized: Vec<f32>,
}

impl CpuConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalized samples of the last float frame
    pub fn normalized(&self) -> &[f32] {
        &self.normalized
    }

    fn normalize_frame(&mut self, layout: &PixelLayout, src: &[f32]) {
        let w = layout.width as usize;
        let h = layout.height as usize;
        let stride = layout.plane(0).stride / 4;

        if stride == w {
            normalize_ir(&src[..(w * h).min(src.len())], &mut self.normalized);
            return;
        }
        self.normalized.clear();
        for row in src.chunks(stride).take(h) {
            self.normalized
                .extend(row.iter().take(w).map(|&v| normalize_sample(v)));
        }
    }
}

impl FrameConverter for CpuConverter {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn convert(&mut self, frame: &Frame<'_>, out: &mut Yuv420Buffer) {
        let layout = frame.layout;
        if !frame.is_complete() || layout.width == 0 || layout.height == 0 {
            warn!(
                format = %layout.format,
                width = layout.width,
                height = layout.height,
                len = frame.data.byte_len(),
                "Incomplete frame, writing blank"
            );
            out.fill_blank();
            return;
        }

        let bytes: &[u8] = match frame.data {
            FrameData::Bytes(b) => b,
            FrameData::Float(f) => {
                self.normalize_frame(&layout, f);
                &[]
            }
        };
        let floats = self.normalized.as_slice();

        self.map
            .prepare(layout.width, layout.height, out.width(), out.height());
        let sampler = Sampler {
            layout,
            bytes,
            floats,
        };
        resample(&self.map, &sampler, out);
    }
}

fn resample(map: &ResampleMap, sampler: &Sampler<'_>, out: &mut Yuv420Buffer) {
    let yuv = sampler.layout.format.is_yuv();
    let width = out.width() as usize;
    let chroma_w = width / 2;
    let chroma_h = out.height() as usize / 2;
    let (y_plane, u_plane, v_plane) = out.planes_mut();

    for cy in 0..chroma_h {
        for cx in 0..chroma_w {
            let mut acc = [0.0f32; 3];
            for dy in 0..2 {
                for dx in 0..2 {
                    let x = cx * 2 + dx;
                    let y = cy * 2 + dy;
                    let s = map.sample(sampler, x, y);
                    y_plane[y * width + x] = if yuv { to_u8(s[0]) } else { rgb_to_luma(s) };
                    for k in 0..3 {
                        acc[k] += s[k];
                    }
                }
            }
            let avg = acc.map(|v| v * 0.25);
            let (u, v) = if yuv {
                (to_u8(avg[1]), to_u8(avg[2]))
            } else {
                rgb_to_chroma(avg)
            };
            u_plane[cy * chroma_w + cx] = u;
            v_plane[cy * chroma_w + cx] = v;
        }
    }
}
