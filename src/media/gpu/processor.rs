// SPDX-License-Identifier: GPL-3.0-only

//! GPU resampling of sensor frames to planar YUV 4:2:0

use super::{compute_dispatch_size, create_compute_device, read_buffer_async};
use crate::media::converter::{CachedDimensions, CpuConverter, FrameConverter, normalize_ir};
use crate::media::frame::{Frame, FrameData};
use crate::media::layout::SourceFormat;
use crate::media::yuv420::Yuv420Buffer;
use tracing::{debug, info, warn};

/// Uniform buffer for shader parameters
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ResampleParams {
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
    format: u32,
    src_stride: u32,
    _pad0: u32,
    _pad1: u32,
}

const FORMAT_GRAY_F32: u32 = 0;
const FORMAT_BGRX: u32 = 1;

/// Whether the shader's 8x2 block write covers an output of this size
pub fn output_supported(width: u32, height: u32) -> bool {
    width % 8 == 0 && height % 2 == 0 && (width * height) % 16 == 0
}

/// Converter that resamples on the GPU and falls back to the CPU
///
/// Backup formats, unaligned outputs and any GPU failure take the CPU path.
/// After a dispatch failure the GPU path stays disabled.
pub struct GpuConverter {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    src_dims: CachedDimensions,
    dst_dims: CachedDimensions,
    uniform_buffer: wgpu::Buffer,
    input_buffer: Option<wgpu::Buffer>,
    output_buffer: Option<wgpu::Buffer>,
    staging_buffer: Option<wgpu::Buffer>,
    scratch: Vec<f32>,
    fallback: CpuConverter,
    disabled: bool,
}

impl GpuConverter {
    pub fn new() -> Result<Self, String> {
        let (device, queue, info) = pollster::block_on(create_compute_device("YUV420 Resample"))?;

        info!(
            adapter_name = %info.adapter_name,
            backend = ?info.backend,
            "GPU device created for frame conversion"
        );

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("YUV420 Resample Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("yuv420.wgsl").into()),
        });

        let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("YUV420 Resample Bind Group Layout"),
            entries: &[
                // Params uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Source words
                storage(1, true),
                // Packed YUV420 output
                storage(2, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("YUV420 Resample Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("YUV420 Resample Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader_module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("YUV420 Params Buffer"),
            size: std::mem::size_of::<ResampleParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            src_dims: CachedDimensions::default(),
            dst_dims: CachedDimensions::default(),
            uniform_buffer,
            input_buffer: None,
            output_buffer: None,
            staging_buffer: None,
            scratch: Vec::new(),
            fallback: CpuConverter::new(),
            disabled: false,
        })
    }

    fn ensure_resources(&mut self, src_words: u64, src_w: u32, src_h: u32, out: &Yuv420Buffer) {
        if self.src_dims.needs_update(src_w, src_h) || self.input_buffer.is_none() {
            debug!(src_w, src_h, "Allocating GPU input buffer");
            self.input_buffer = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("YUV420 Input Buffer"),
                size: src_words * 4,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.src_dims.update(src_w, src_h);
        }

        if self.dst_dims.needs_update(out.width(), out.height()) || self.output_buffer.is_none() {
            let size = out.len() as u64;
            debug!(width = out.width(), height = out.height(), "Allocating GPU output buffers");
            self.output_buffer = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("YUV420 Output Buffer"),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }));
            self.staging_buffer = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("YUV420 Staging Buffer"),
                size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            }));
            self.dst_dims.update(out.width(), out.height());
        }
    }

    fn dispatch(&mut self, frame: &Frame<'_>, out: &mut Yuv420Buffer) -> Result<(), String> {
        let layout = frame.layout;
        let (width, height) = (layout.width, layout.height);
        let stride = layout.plane(0).stride;
        if stride % 4 != 0 {
            return Err(format!("row stride {} is not word aligned", stride));
        }
        let stride_words = (stride / 4) as u32;

        let format = match (layout.format, frame.data) {
            (SourceFormat::GrayF32, FrameData::Float(samples)) => {
                if stride_words != width {
                    return Err("padded float rows are not supported".into());
                }
                normalize_ir(&samples[..(width * height) as usize], &mut self.scratch);
                FORMAT_GRAY_F32
            }
            (SourceFormat::Bgrx32, FrameData::Bytes(_)) => FORMAT_BGRX,
            _ => return Err(format!("{} is not handled on the GPU", layout.format)),
        };

        let src_words = (stride_words as u64) * (height as u64);
        self.ensure_resources(src_words, width, height, out);

        let upload: &[u8] = match frame.data {
            FrameData::Float(_) => bytemuck::cast_slice(&self.scratch),
            FrameData::Bytes(bytes) => &bytes[..layout.min_len()],
        };
        let (Some(input), Some(output), Some(staging)) = (
            self.input_buffer.as_ref(),
            self.output_buffer.as_ref(),
            self.staging_buffer.as_ref(),
        ) else {
            return Err("GPU buffers not allocated".into());
        };

        let params = ResampleParams {
            src_width: width,
            src_height: height,
            dst_width: out.width(),
            dst_height: out.height(),
            format,
            src_stride: stride_words,
            _pad0: 0,
            _pad1: 0,
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&params));
        self.queue.write_buffer(input, 0, upload);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("YUV420 Resample Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("YUV420 Resample Encoder"),
            });

        // One invocation per 8x2 output block, 8x8 invocations per workgroup
        let workgroups_x = compute_dispatch_size(out.width() / 8, 8);
        let workgroups_y = compute_dispatch_size(out.height() / 2, 8);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("YUV420 Resample Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups_x, workgroups_y, 1);
        }
        encoder.copy_buffer_to_buffer(output, 0, staging, 0, out.len() as u64);
        self.queue.submit(std::iter::once(encoder.finish()));

        let data = pollster::block_on(read_buffer_async(&self.device, staging))?;
        if data.len() != out.len() {
            return Err(format!(
                "readback size {} does not match frame size {}",
                data.len(),
                out.len()
            ));
        }
        out.as_bytes_mut().copy_from_slice(&data);
        Ok(())
    }
}

impl FrameConverter for GpuConverter {
    fn name(&self) -> &'static str {
        if self.disabled { "cpu" } else { "gpu" }
    }

    fn convert(&mut self, frame: &Frame<'_>, out: &mut Yuv420Buffer) {
        let gpu_format = matches!(
            frame.layout.format,
            SourceFormat::GrayF32 | SourceFormat::Bgrx32
        );
        if self.disabled
            || !gpu_format
            || !frame.is_complete()
            || !output_supported(out.width(), out.height())
        {
            self.fallback.convert(frame, out);
            return;
        }

        if let Err(e) = self.dispatch(frame, out) {
            warn!(error = %e, "GPU conversion failed, using CPU converter from now on");
            self.disabled = true;
            self.fallback.convert(frame, out);
        }
    }
}
