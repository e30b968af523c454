// SPDX-License-Identifier: GPL-3.0-only

//! Source pixel formats and their plane layout
//!
//! A [`PixelLayout`] is computed once when a stream's format is known and
//! reused for every frame of that stream.

use std::fmt;

/// Pixel formats a frame can arrive in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    // ===== Sensor formats =====
    /// Packed 32-bit color, B G R X byte order
    Bgrx32,
    /// 32-bit float grayscale over [0, 65535]
    GrayF32,

    // ===== Packed YUV 4:2:2 =====
    /// Y0 U Y1 V byte order
    Yuyv,
    /// U Y0 V Y1 byte order
    Uyvy,

    // ===== Packed RGB =====
    /// R G B byte order
    Rgb24,
    /// B G R byte order
    Bgr24,

    // ===== Grayscale =====
    /// 8-bit grayscale
    Gray8,

    // ===== YUV 4:2:0 =====
    /// Planar Y, U, V
    Yuv420,
    /// Y plane followed by interleaved UV
    Nv12,
}

impl SourceFormat {
    /// Map a V4L2 FourCC to a known layout
    ///
    /// Returns `None` for formats that cannot be converted.
    pub fn from_fourcc(fourcc: &str) -> Option<Self> {
        match fourcc.trim_end().to_uppercase().as_str() {
            "YUYV" | "YUY2" => Some(Self::Yuyv),
            "UYVY" => Some(Self::Uyvy),
            "GREY" | "Y8" | "Y800" => Some(Self::Gray8),
            "YU12" | "I420" => Some(Self::Yuv420),
            "NV12" => Some(Self::Nv12),
            "RGB3" => Some(Self::Rgb24),
            "BGR3" => Some(Self::Bgr24),
            "BGR4" | "XR24" => Some(Self::Bgrx32),
            _ => None,
        }
    }

    /// FourCC for this format, where one exists
    pub fn fourcc(&self) -> &'static str {
        match self {
            Self::Bgrx32 => "BGR4",
            Self::GrayF32 => "F32 ",
            Self::Yuyv => "YUYV",
            Self::Uyvy => "UYVY",
            Self::Rgb24 => "RGB3",
            Self::Bgr24 => "BGR3",
            Self::Gray8 => "GREY",
            Self::Yuv420 => "YU12",
            Self::Nv12 => "NV12",
        }
    }

    /// Bytes per pixel in the first plane
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Bgrx32 | Self::GrayF32 => 4,
            Self::Rgb24 | Self::Bgr24 => 3,
            Self::Yuyv | Self::Uyvy => 2,
            Self::Gray8 | Self::Yuv420 | Self::Nv12 => 1,
        }
    }

    /// Whether samples are already Y/U/V rather than R/G/B
    pub fn is_yuv(&self) -> bool {
        matches!(
            self,
            Self::Yuyv | Self::Uyvy | Self::Yuv420 | Self::Nv12
        )
    }

    /// Number of memory planes
    pub fn plane_count(&self) -> usize {
        match self {
            Self::Yuv420 => 3,
            Self::Nv12 => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fourcc())
    }
}

/// Byte offset and row stride of one plane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Plane {
    pub offset: usize,
    pub stride: usize,
}

/// Plane geometry of a source frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    pub format: SourceFormat,
    pub width: u32,
    pub height: u32,
    planes: [Plane; 3],
}

impl PixelLayout {
    /// Layout with tightly packed rows
    pub fn packed(format: SourceFormat, width: u32, height: u32) -> Self {
        Self::with_stride(format, width, height, 0)
    }

    /// Layout using the driver-reported first-plane stride
    ///
    /// A stride smaller than the packed row length (including 0) is treated
    /// as unset.
    pub fn with_stride(format: SourceFormat, width: u32, height: u32, bytes_per_line: u32) -> Self {
        let w = width as usize;
        let h = height as usize;
        let stride = (bytes_per_line as usize).max(w * format.bytes_per_pixel());

        let mut planes = [Plane::default(); 3];
        planes[0] = Plane { offset: 0, stride };
        match format {
            SourceFormat::Yuv420 => {
                let chroma_stride = stride / 2;
                planes[1] = Plane {
                    offset: stride * h,
                    stride: chroma_stride,
                };
                planes[2] = Plane {
                    offset: stride * h + chroma_stride * h.div_ceil(2),
                    stride: chroma_stride,
                };
            }
            SourceFormat::Nv12 => {
                planes[1] = Plane {
                    offset: stride * h,
                    stride,
                };
            }
            _ => {}
        }

        Self {
            format,
            width,
            height,
            planes,
        }
    }

    /// Geometry of plane `index`
    pub fn plane(&self, index: usize) -> Plane {
        self.planes[index.min(2)]
    }

    pub fn plane_count(&self) -> usize {
        self.format.plane_count()
    }

    /// Minimum buffer length holding a whole frame in this layout
    pub fn min_len(&self) -> usize {
        let h = self.height as usize;
        match self.format {
            SourceFormat::Yuv420 => self.planes[2].offset + self.planes[2].stride * h.div_ceil(2),
            SourceFormat::Nv12 => self.planes[1].offset + self.planes[1].stride * h.div_ceil(2),
            _ => self.planes[0].stride * h,
        }
    }
}
