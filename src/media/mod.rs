// SPDX-License-Identifier: MPL-2.0

//! Frame representation and color conversion
//!
//! Every frame written to the sink is planar YUV 4:2:0 at a fixed size.
//! Sources arrive as packed 32-bit color, float grayscale, or one of the
//! formats a backup capture device negotiates.
//!
//! # Modules
//!
//! - [`layout`]: Source pixel formats and plane geometry
//! - [`frame`]: Borrowed source frames
//! - [`yuv420`]: The reusable output buffer and the blank frame
//! - [`converter`]: Bilinear CPU conversion
//! - `gpu`: wgpu compute conversion (feature `gpu`)

pub mod converter;
pub mod frame;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod layout;
pub mod yuv420;

// Re-export commonly used types
pub use converter::{CpuConverter, FrameConverter, normalize_ir};
pub use frame::{Frame, FrameData, SourceKind};
pub use layout::{PixelLayout, Plane, SourceFormat};
pub use yuv420::Yuv420Buffer;

use tracing::{info, warn};

/// Pick the converter for sensor frames
///
/// Hardware acceleration is best effort: any failure to set it up falls back
/// to the CPU converter.
pub fn sensor_converter(hw_accel: bool) -> Box<dyn FrameConverter> {
    if !hw_accel {
        return Box::new(CpuConverter::new());
    }

    #[cfg(feature = "gpu")]
    {
        match gpu::GpuConverter::new() {
            Ok(converter) => {
                info!("Using GPU frame conversion");
                return Box::new(converter);
            }
            Err(e) => warn!(error = %e, "GPU conversion unavailable, using CPU"),
        }
    }

    #[cfg(not(feature = "gpu"))]
    warn!("Built without the gpu feature, using CPU conversion");

    info!("Using CPU frame conversion");
    Box::new(CpuConverter::new())
}
