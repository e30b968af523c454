// SPDX-License-Identifier: GPL-3.0-only

//! Depth sensor exposed by a kernel V4L2 driver
//!
//! The driver creates one video node per stream:
//! - Infrared (Y16/Y10B formats)
//! - Color (UYVY/YUYV/Bayer GRBG formats)
//!
//! Nodes of one physical sensor share the same `bus_info`, which is how they
//! are paired.
//!
//! # Discovery and the sink
//!
//! Opening the sink would itself be seen as a consumer by the presence
//! monitor, so discovery skips the sink and backup paths entirely.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

use super::format_converters::{self, Packed422};
use super::{SensorDevice, SensorInfo, SensorProvider, StreamSelection};
use crate::backends::v4l2_utils;
use crate::constants::SENSOR_BUFFER_COUNT;
use crate::errors::{SensorError, SensorResult};
use crate::media::{Frame, FrameData, PixelLayout, SourceFormat, SourceKind};

const IR_FORMATS: [&[u8; 4]; 2] = [b"Y16 ", b"Y10B"];
const COLOR_FORMATS: [&[u8; 4]; 3] = [b"UYVY", b"YUYV", b"GRBG"];

/// Role of a video node, decided by the formats it offers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Color,
    Infrared,
}

/// Decide a node's role from its formats
///
/// Infrared formats win: some drivers expose color formats on the IR node
/// as well, never the other way around.
pub fn classify_formats(formats: &[FourCC]) -> Option<NodeRole> {
    let has = |codes: &[&[u8; 4]]| {
        formats
            .iter()
            .any(|f| codes.iter().any(|c| *f == FourCC::new(c)))
    };
    if has(&IR_FORMATS[..]) {
        Some(NodeRole::Infrared)
    } else if has(&COLOR_FORMATS[..]) {
        Some(NodeRole::Color)
    } else {
        None
    }
}

/// Video nodes of one physical sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorNodes {
    /// USB bus info shared by the nodes (e.g., "usb-0000:00:14.0-11")
    pub bus_info: String,
    pub card: String,
    pub color_path: Option<String>,
    pub ir_path: Option<String>,
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn node_role(path: &Path) -> Option<NodeRole> {
    let dev = Device::with_path(path).ok()?;
    let formats: Vec<FourCC> = dev
        .enum_formats()
        .into_iter()
        .flatten()
        .map(|f| f.fourcc)
        .collect();
    classify_formats(&formats)
}

/// Scan `/dev/video*` for sensor nodes, grouped by `bus_info`
///
/// Paths in `exclude` (compared after resolving symlinks) are never opened.
pub fn find_sensor_nodes(exclude: &[PathBuf]) -> Vec<SensorNodes> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir("/dev")
        .into_iter()
        .flatten()
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("video"))
                .unwrap_or(false)
        })
        .collect();
    entries.sort();

    let mut by_bus: BTreeMap<String, SensorNodes> = BTreeMap::new();
    for path in entries {
        if exclude.contains(&canonical(&path)) {
            debug!(path = %path.display(), "Skipping excluded node");
            continue;
        }
        let path_str = path.to_string_lossy().to_string();

        let Some(info) = v4l2_utils::query_device_info(&path_str) else {
            continue;
        };
        if !info.can_capture() {
            continue;
        }
        let Some(role) = node_role(&path) else {
            continue;
        };

        debug!(
            path = %path_str,
            role = ?role,
            bus_info = %info.bus_info,
            card = %info.card,
            "Found sensor node"
        );

        let nodes = by_bus
            .entry(info.bus_info.clone())
            .or_insert_with(|| SensorNodes {
                bus_info: info.bus_info.clone(),
                card: info.card.clone(),
                color_path: None,
                ir_path: None,
            });
        let slot = match role {
            NodeRole::Color => &mut nodes.color_path,
            NodeRole::Infrared => &mut nodes.ir_path,
        };
        // First node per role wins; drivers may expose metadata twins
        if slot.is_none() {
            *slot = Some(path_str);
        }
    }

    by_bus
        .into_values()
        .filter(|n| n.ir_path.is_some() || n.color_path.is_some())
        .collect()
}

/// Finds V4L2 sensors, or uses an explicitly configured node
pub struct V4l2SensorProvider {
    explicit: Option<PathBuf>,
    exclude: Vec<PathBuf>,
}

impl V4l2SensorProvider {
    /// `exclude` lists nodes that must never be opened (sink, backup)
    pub fn new(explicit: Option<PathBuf>, exclude: &[&Path]) -> Self {
        Self {
            explicit,
            exclude: exclude.iter().map(|p| canonical(p)).collect(),
        }
    }

    fn nodes(&self) -> SensorResult<Vec<SensorNodes>> {
        let Some(path) = &self.explicit else {
            return Ok(find_sensor_nodes(&self.exclude));
        };

        let path_str = path.to_string_lossy().to_string();
        let info = v4l2_utils::query_device_info(&path_str)
            .ok_or_else(|| SensorError::OpenFailed(format!("{} is not a V4L2 device", path_str)))?;
        let role = node_role(path).ok_or_else(|| {
            SensorError::OpenFailed(format!("{} offers no sensor formats", path_str))
        })?;

        let (color_path, ir_path) = match role {
            NodeRole::Color => (Some(path_str), None),
            NodeRole::Infrared => (None, Some(path_str)),
        };
        Ok(vec![SensorNodes {
            bus_info: info.bus_info,
            card: info.card,
            color_path,
            ir_path,
        }])
    }
}

impl SensorProvider for V4l2SensorProvider {
    type Device = V4l2Sensor;

    fn enumerate(&mut self) -> SensorResult<Vec<SensorInfo>> {
        Ok(self
            .nodes()?
            .into_iter()
            .map(|n| SensorInfo {
                name: n.card,
                id: n.bus_info,
            })
            .collect())
    }

    fn open_default(&mut self) -> SensorResult<V4l2Sensor> {
        let nodes = self
            .nodes()?
            .into_iter()
            .next()
            .ok_or(SensorError::NotFound)?;
        V4l2Sensor::open(nodes)
    }
}

/// How raw buffers of the active stream become frame samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoder {
    Y16,
    Y10b,
    Packed(Packed422),
    Grbg,
}

impl Decoder {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"Y16 " => Some(Self::Y16),
            b"Y10B" => Some(Self::Y10b),
            b"UYVY" => Some(Self::Packed(Packed422::Uyvy)),
            b"YUYV" => Some(Self::Packed(Packed422::Yuyv)),
            b"GRBG" => Some(Self::Grbg),
            _ => None,
        }
    }
}

/// Streaming state of the selected node
///
/// The stream holds its own reference to the device handle; dropping it
/// stops streaming and unmaps the buffers.
struct ActiveStream {
    stream: MmapStream<'static>,
    decoder: Decoder,
    kind: SourceKind,
    width: u32,
    height: u32,
    stride: usize,
}

/// An opened V4L2 sensor
pub struct V4l2Sensor {
    active: Option<ActiveStream>,
    nodes: SensorNodes,
    color: Option<Device>,
    infrared: Option<Device>,
    samples: Vec<f32>,
    pixels: Vec<u8>,
}

fn open_node(path: Option<&String>) -> SensorResult<Option<Device>> {
    path.map(|p| {
        Device::with_path(p).map_err(|e| SensorError::OpenFailed(format!("{}: {}", p, e)))
    })
    .transpose()
}

/// Set the first format in `candidates` the driver grants as requested
fn negotiate(
    device: &Device,
    width: u32,
    height: u32,
    candidates: &[&[u8; 4]],
) -> SensorResult<Format> {
    for code in candidates {
        let fourcc = FourCC::new(code);
        match device.set_format(&Format::new(width, height, fourcc)) {
            Ok(granted) if granted.fourcc == fourcc => return Ok(granted),
            Ok(granted) => {
                debug!(requested = %fourcc, granted = %granted.fourcc, "Format substituted")
            }
            Err(e) => debug!(requested = %fourcc, error = %e, "Format rejected"),
        }
    }
    Err(SensorError::StartFailed(
        "driver accepted none of the sensor formats".into(),
    ))
}

impl V4l2Sensor {
    pub fn open(nodes: SensorNodes) -> SensorResult<Self> {
        let color = open_node(nodes.color_path.as_ref())?;
        let infrared = open_node(nodes.ir_path.as_ref())?;

        info!(
            card = %nodes.card,
            bus_info = %nodes.bus_info,
            color = ?nodes.color_path,
            infrared = ?nodes.ir_path,
            "Opened sensor"
        );

        Ok(Self {
            active: None,
            nodes,
            color,
            infrared,
            samples: Vec::new(),
            pixels: Vec::new(),
        })
    }

    pub fn nodes(&self) -> &SensorNodes {
        &self.nodes
    }
}

impl SensorDevice for V4l2Sensor {
    /// Start one stream; infrared wins when both are selected
    fn start(&mut self, streams: StreamSelection) -> SensorResult<()> {
        if self.active.is_some() {
            return Ok(());
        }

        let (kind, device, candidates): (_, _, &[&[u8; 4]]) = if streams.infrared {
            (SourceKind::Infrared, self.infrared.as_ref(), &IR_FORMATS[..])
        } else if streams.color {
            (SourceKind::Color, self.color.as_ref(), &COLOR_FORMATS[..])
        } else {
            return Err(SensorError::StreamUnavailable("no stream selected".into()));
        };
        let device = device.ok_or_else(|| {
            SensorError::StreamUnavailable(format!("sensor has no {:?} node", kind))
        })?;

        let current = device
            .format()
            .map_err(|e| SensorError::StartFailed(format!("format query failed: {}", e)))?;
        let granted = negotiate(device, current.width, current.height, candidates)?;
        let decoder = Decoder::from_fourcc(granted.fourcc).ok_or_else(|| {
            SensorError::StartFailed(format!("unexpected format {}", granted.fourcc))
        })?;

        let stream = MmapStream::with_buffers(device, Type::VideoCapture, SENSOR_BUFFER_COUNT)
            .map_err(|e| SensorError::StartFailed(format!("buffer setup failed: {}", e)))?;

        info!(
            kind = ?kind,
            width = granted.width,
            height = granted.height,
            fourcc = %granted.fourcc,
            buffers = SENSOR_BUFFER_COUNT,
            "Sensor stream started"
        );

        self.active = Some(ActiveStream {
            stream,
            decoder,
            kind,
            width: granted.width,
            height: granted.height,
            stride: granted.stride as usize,
        });
        Ok(())
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> SensorResult<Option<Frame<'_>>> {
        let Some(active) = self.active.as_mut() else {
            return Err(SensorError::StreamFailed("stream not started".into()));
        };
        let (width, height, stride) = (active.width, active.height, active.stride);
        let decoder = active.decoder;
        let kind = active.kind;
        let samples = &mut self.samples;
        let pixels = &mut self.pixels;

        active.stream.set_timeout(timeout);
        let next = v4l2_utils::next_frame(&mut active.stream)
            .map_err(|e| SensorError::StreamFailed(e.to_string()))?;
        let Some((data, meta)) = next else {
            return Ok(None);
        };

        match decoder {
            Decoder::Y16 => format_converters::y16_to_ir(data, width, height, stride, samples),
            Decoder::Y10b => format_converters::y10b_to_ir(data, width, height, samples),
            Decoder::Packed(order) => {
                format_converters::packed_422_to_bgrx(data, width, height, stride, order, pixels)
            }
            Decoder::Grbg => format_converters::grbg_to_bgrx(data, width, height, pixels),
        }
        let sequence = meta.sequence as u64;

        let frame = match kind {
            SourceKind::Infrared => Frame::new(
                kind,
                PixelLayout::packed(SourceFormat::GrayF32, width, height),
                FrameData::Float(&self.samples),
                sequence,
            ),
            _ => Frame::new(
                kind,
                PixelLayout::packed(SourceFormat::Bgrx32, width, height),
                FrameData::Bytes(&self.pixels),
                sequence,
            ),
        };
        Ok(Some(frame))
    }

    fn stop(&mut self) -> SensorResult<()> {
        if self.active.take().is_some() {
            info!(bus_info = %self.nodes.bus_info, "Sensor stream stopped");
        }
        Ok(())
    }

    fn close(&mut self) -> SensorResult<()> {
        self.stop()?;
        let color = self.color.take();
        let infrared = self.infrared.take();
        if color.is_some() || infrared.is_some() {
            info!(bus_info = %self.nodes.bus_info, "Sensor closed");
        }
        Ok(())
    }
}

impl Drop for V4l2Sensor {
    fn drop(&mut self) {
        if self.active.is_some() {
            warn!("Sensor dropped while streaming");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ir_formats_classify_as_infrared() {
        let formats = [FourCC::new(b"GRBG"), FourCC::new(b"Y10B")];
        assert_eq!(classify_formats(&formats), Some(NodeRole::Infrared));
    }

    #[test]
    fn test_color_formats_classify_as_color() {
        let formats = [FourCC::new(b"UYVY")];
        assert_eq!(classify_formats(&formats), Some(NodeRole::Color));
        let formats = [FourCC::new(b"YUYV"), FourCC::new(b"MJPG")];
        assert_eq!(classify_formats(&formats), Some(NodeRole::Color));
    }

    #[test]
    fn test_unrelated_formats_are_ignored() {
        let formats = [FourCC::new(b"MJPG"), FourCC::new(b"H264")];
        assert_eq!(classify_formats(&formats), None);
    }

    #[test]
    fn test_decoder_mapping() {
        assert_eq!(Decoder::from_fourcc(FourCC::new(b"Y16 ")), Some(Decoder::Y16));
        assert_eq!(
            Decoder::from_fourcc(FourCC::new(b"UYVY")),
            Some(Decoder::Packed(Packed422::Uyvy))
        );
        assert_eq!(Decoder::from_fourcc(FourCC::new(b"NV12")), None);
    }

    #[test]
    fn test_explicit_missing_node_fails_to_open() {
        let mut provider =
            V4l2SensorProvider::new(Some(PathBuf::from("/dev/does-not-exist-sensor")), &[]);
        assert!(matches!(
            provider.open_default(),
            Err(SensorError::OpenFailed(_))
        ));
    }
}
