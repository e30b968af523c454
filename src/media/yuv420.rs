// SPDX-License-Identifier: GPL-3.0-only

//! Fixed-size planar YUV 4:2:0 output buffer

use crate::constants::{BLANK_LUMA, yuv420_frame_len};

/// Reusable output frame: Y plane, then U, then V, rows tightly packed
///
/// Allocated once and overwritten in place; never resized.
#[derive(Debug, Clone)]
pub struct Yuv420Buffer {
    width: u32,
    height: u32,
    blank_chroma: u8,
    data: Vec<u8>,
}

impl Yuv420Buffer {
    /// Allocate a buffer holding a blank frame
    ///
    /// `blank_chroma` is used by every later [`fill_blank`](Self::fill_blank).
    pub fn new(width: u32, height: u32, blank_chroma: u8) -> Self {
        let mut buffer = Self {
            width,
            height,
            blank_chroma,
            data: vec![0; yuv420_frame_len(width, height)],
        };
        buffer.fill_blank();
        buffer
    }

    pub fn blank_chroma(&self) -> u8 {
        self.blank_chroma
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn luma_len(&self) -> usize {
        (self.width * self.height) as usize
    }

    pub fn chroma_len(&self) -> usize {
        ((self.width / 2) * (self.height / 2)) as usize
    }

    /// Whole frame as written to the sink
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Mutable Y, U and V planes
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let luma = self.luma_len();
        let chroma = self.chroma_len();
        let (y, rest) = self.data.split_at_mut(luma);
        let (u, v) = rest.split_at_mut(chroma);
        (y, u, v)
    }

    /// Black luma with the configured chroma value
    pub fn fill_blank(&mut self) {
        let luma = self.luma_len();
        self.data[..luma].fill(BLANK_LUMA);
        self.data[luma..].fill(self.blank_chroma);
    }
}
