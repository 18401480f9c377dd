// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The GPU backend: the escape-time kernel as a wgpu compute shader.
//!
//! The device holds a grid of `GPU_WORKGROUPS * GPU_WORKGROUP_SIZE`
//! invocations, each striding through the image exactly like a CPU
//! lane.  Images larger than the device will hold in one storage
//! buffer are rendered in bands of whole rows, one dispatch per band.
//! Device buffers are sized for a band of the display and reallocated
//! with it; renders at any other width (exports) get temporary buffers.
//! The device is behind one lock, so display renders and exports never
//! run on it at the same time.
//!
//! Any failure to bring the device up, running into its limits
//! included, is reported as an ordinary initialization error, and the
//! engine moves on to a CPU backend.

use std::sync::{mpsc, Arc, Mutex, MutexGuard};

use bytemuck::{Pod, Zeroable};

use crate::backend::{Backend, BackendKind, Surface};
use crate::color::color_map;
use crate::config::{GPU_WORKGROUPS, GPU_WORKGROUP_SIZE};
use crate::errors::{pixel_count, EngineError};
use crate::params::{EngineParameters, ParameterCell};
use crate::planes::{PlaneMapper, Viewport};

// The shader declares @workgroup_size(256).
const _: () = assert!(GPU_WORKGROUP_SIZE == 256);

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct Uniforms {
    width: u32,
    height: u32,
    max_iterations: u32,
    exponent: u32,
    escape_radius_sq: f32,
    stride: u32,
    _pad: [u32; 2],
}

fn init_error<S: Into<String>>(reason: S) -> EngineError {
    EngineError::backend_init(BackendKind::Gpu, reason)
}

/// Device, queue and the compiled kernel.
struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

impl GpuContext {
    fn new() -> Result<Self, EngineError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| init_error("no compatible adapter found"))?;

        let info = adapter.get_info();
        if !adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(init_error(format!("{} cannot run compute shaders", info.name)));
        }
        log::info!("GPU adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("mandelview"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|err| init_error(err.to_string()))?;

        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            log::error!("Uncaptured GPU error: {}", err);
        }));

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("escape_time"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/escape.wgsl").into()),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("escape_time_layout"),
            entries: &[
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
                storage(1, true),
                storage(2, true),
                storage(3, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("escape_time_pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("escape_time_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(init_error(format!("shader rejected: {}", err)));
        }

        Ok(GpuContext {
            device,
            queue,
            pipeline,
            layout,
        })
    }
}

/// The largest count buffer, in bytes, the device can bind.
fn count_limit(limits: &wgpu::Limits) -> u64 {
    u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size)
}

/// How many whole rows of `width` pixels fit in `limit` bytes of
/// counts, capped at `height`.  None when not even one row fits.
fn band_rows(width: usize, height: usize, limit: u64) -> Option<usize> {
    let row_bytes = (width * std::mem::size_of::<u32>()) as u64;
    match limit / row_bytes {
        0 => None,
        rows => Some((rows.min(height as u64)) as usize),
    }
}

/// Device-resident buffers for a band of `width` × `height` pixels.
struct DeviceBuffers {
    width: usize,
    height: usize,
    uniforms: wgpu::Buffer,
    columns: wgpu::Buffer,
    rows: wgpu::Buffer,
    counts: wgpu::Buffer,
    staging: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl DeviceBuffers {
    fn new(context: &GpuContext, width: usize, height: usize) -> Result<Self, EngineError> {
        let pixels = pixel_count(width, height)?;
        let count_bytes = (pixels * std::mem::size_of::<u32>()) as u64;
        let device = &context.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let buffer = |label: &str, size: u64, usage: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        };
        let uniforms = buffer(
            "uniforms",
            std::mem::size_of::<Uniforms>() as u64,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );
        let columns = buffer(
            "columns",
            (width * std::mem::size_of::<f32>()) as u64,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        let rows = buffer(
            "rows",
            (height * std::mem::size_of::<f32>()) as u64,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        let counts = buffer(
            "counts",
            count_bytes,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        );
        let staging = buffer(
            "staging",
            count_bytes,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        );

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            log::error!("Could not allocate device buffers: {}", err);
            return Err(EngineError::OutOfMemory { pixels });
        }

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("escape_time_bind_group"),
            layout: &context.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: columns.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: rows.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: counts.as_entire_binding(),
                },
            ],
        });

        Ok(DeviceBuffers {
            width,
            height,
            uniforms,
            columns,
            rows,
            counts,
            staging,
            bind_group,
        })
    }

    /// A band of `rows` rows, `width` pixels wide, can be run here.
    fn fits(&self, width: usize, rows: usize) -> bool {
        self.width == width && self.height >= rows
    }
}

struct DeviceState {
    context: GpuContext,
    display: DeviceBuffers,
    count_limit: u64,
}

impl DeviceState {
    fn band_rows(&self, width: usize, height: usize) -> Result<usize, EngineError> {
        band_rows(width, height, self.count_limit).ok_or_else(|| {
            EngineError::device(format!(
                "a row of {} pixels exceeds the device buffer limit",
                width
            ))
        })
    }
}

pub struct GpuBackend {
    params: Arc<ParameterCell>,
    surface: Mutex<Surface>,
    device: Mutex<DeviceState>,
}

impl GpuBackend {
    pub fn new(
        width: usize,
        height: usize,
        params: Arc<ParameterCell>,
    ) -> Result<Self, EngineError> {
        log::debug!("Starting GPU engine...");
        let context = GpuContext::new()?;
        let limit = count_limit(&context.device.limits());
        let rows = band_rows(width, height, limit).ok_or_else(|| {
            init_error(format!("{} pixel rows exceed the device limits", width))
        })?;
        if rows < height {
            log::info!("GPU renders {}x{} in bands of {} rows", width, height, rows);
        }
        let display = DeviceBuffers::new(&context, width, rows)
            .map_err(|err| init_error(format!("could not allocate device buffers: {}", err)))?;
        Ok(GpuBackend {
            params,
            surface: Mutex::new(Surface::new(width, height)?),
            device: Mutex::new(DeviceState {
                context,
                display,
                count_limit: limit,
            }),
        })
    }

    fn lock_device(&self) -> MutexGuard<'_, DeviceState> {
        self.device.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reads the first `bytes` bytes of counts back from `staging`.
fn read_counts(
    device: &wgpu::Device,
    staging: &wgpu::Buffer,
    bytes: u64,
) -> Result<Vec<u32>, EngineError> {
    let slice = staging.slice(..bytes);
    let (sender, receiver) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    let _ = device.poll(wgpu::Maintain::Wait);

    receiver
        .recv()
        .map_err(|_| EngineError::device("readback channel closed"))?
        .map_err(|err| EngineError::device(err.to_string()))?;

    let counts: Vec<u32> = {
        let view = slice.get_mapped_range();
        bytemuck::cast_slice(&view).to_vec()
    };
    staging.unmap();
    Ok(counts)
}

/// Runs the kernel over one band whose rows' imaginary parts are
/// `rows`, and returns its iteration counts.
fn run_band(
    context: &GpuContext,
    buffers: &DeviceBuffers,
    uniforms: Uniforms,
    rows: &[f32],
) -> Result<Vec<u32>, EngineError> {
    context
        .queue
        .write_buffer(&buffers.uniforms, 0, bytemuck::bytes_of(&uniforms));
    context
        .queue
        .write_buffer(&buffers.rows, 0, bytemuck::cast_slice(rows));

    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("escape_time_encoder"),
        });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("escape_time_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&context.pipeline);
        pass.set_bind_group(0, &buffers.bind_group, &[]);
        pass.dispatch_workgroups(GPU_WORKGROUPS, 1, 1);
    }
    let bytes = u64::from(uniforms.width * uniforms.height) * std::mem::size_of::<u32>() as u64;
    encoder.copy_buffer_to_buffer(&buffers.counts, 0, &buffers.staging, 0, bytes);
    context.queue.submit(std::iter::once(encoder.finish()));

    read_counts(&context.device, &buffers.staging, bytes)
}

impl Backend for GpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn parameters(&self) -> &Arc<ParameterCell> {
        &self.params
    }

    fn surface(&self) -> &Mutex<Surface> {
        &self.surface
    }

    fn render(
        &self,
        width: usize,
        height: usize,
        viewport: Viewport,
        params: EngineParameters,
        out: &mut [u32],
    ) -> Result<(), EngineError> {
        let state = self.lock_device();
        let context = &state.context;
        let band = state.band_rows(width, height)?;

        let temporary;
        let buffers = if state.display.fits(width, band) {
            &state.display
        } else {
            temporary = DeviceBuffers::new(context, width, band)?;
            &temporary
        };

        let plane = PlaneMapper::new(width, height, viewport);
        let columns: Vec<f32> = (0..width).map(|column| plane.column_to_re(column)).collect();
        context
            .queue
            .write_buffer(&buffers.columns, 0, bytemuck::cast_slice(&columns));

        for (index, chunk) in out.chunks_mut(band * width).enumerate() {
            let first = index * band;
            let band_height = chunk.len() / width;
            let rows: Vec<f32> = (first..first + band_height)
                .map(|row| plane.row_to_im(row))
                .collect();
            let uniforms = Uniforms {
                width: width as u32,
                height: band_height as u32,
                max_iterations: params.max_iterations,
                exponent: params.exponent,
                escape_radius_sq: params.escape_radius_sq(),
                stride: GPU_WORKGROUPS * GPU_WORKGROUP_SIZE,
                _pad: [0; 2],
            };
            let counts = run_band(context, buffers, uniforms, &rows)?;
            for (pixel, &iterations) in chunk.iter_mut().zip(counts.iter()) {
                *pixel = color_map(iterations, params.max_iterations);
            }
        }
        Ok(())
    }

    fn resize_resources(&self, width: usize, height: usize) -> Result<(), EngineError> {
        let mut state = self.lock_device();
        let band = state.band_rows(width, height)?;
        let display = DeviceBuffers::new(&state.context, width, band)?;
        state.display = display;
        Ok(())
    }
}
