// SPDX-License-Identifier: GPL-3.0-only

//! Borrowed source frames

use super::layout::PixelLayout;

/// Where a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Color,
    Infrared,
    Backup,
}

/// Sample storage of a frame
#[derive(Debug, Clone, Copy)]
pub enum FrameData<'a> {
    Bytes(&'a [u8]),
    Float(&'a [f32]),
}

impl FrameData<'_> {
    /// Length in bytes
    pub fn byte_len(&self) -> usize {
        match self {
            FrameData::Bytes(b) => b.len(),
            FrameData::Float(f) => std::mem::size_of_val(*f),
        }
    }
}

/// One frame, borrowed from the buffer that produced it
///
/// The producer keeps ownership; the frame is only valid until the next
/// call on the producer.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub kind: SourceKind,
    pub layout: PixelLayout,
    pub data: FrameData<'a>,
    /// Driver sequence number, or a local counter
    pub sequence: u64,
}

impl<'a> Frame<'a> {
    pub fn new(kind: SourceKind, layout: PixelLayout, data: FrameData<'a>, sequence: u64) -> Self {
        Self {
            kind,
            layout,
            data,
            sequence,
        }
    }

    /// Whether the data covers the whole layout
    pub fn is_complete(&self) -> bool {
        self.data.byte_len() >= self.layout.min_len()
    }
}
