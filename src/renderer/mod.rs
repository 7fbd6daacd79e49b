use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

use crate::channel_mask::pixel_buffer_len;
use crate::config::WindowConfig;
use crate::environment::EnvironmentGpu;
use crate::mesh::MeshImport;

mod blit_pass;
pub(crate) mod egui_pass;
mod mesh_pass;
mod window_surface;

pub use window_surface::{SurfaceFrame, WindowSurface};

use crate::camera3d::Camera3D;
use blit_pass::BlitPass;
use mesh_pass::{MeshPass, SceneGpu};

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
/// Extraction renders into a linear target so readback bytes match the
/// uploaded source exactly.
pub const OFFSCREEN_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Idle background for the preview viewport.
pub const DEFAULT_CLEAR_COLOR: wgpu::Color = wgpu::Color { r: 0.05, g: 0.06, b: 0.08, a: 1.0 };
/// Red wash shown while the scene-issue heuristic considers the scene broken.
pub const ERROR_CLEAR_COLOR: wgpu::Color = wgpu::Color { r: 0.55, g: 0.05, b: 0.05, a: 1.0 };

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightingMode {
    Basic,
    Environment,
}

/// Per-frame lighting inputs for the preview pass. The environment maps are
/// always bound; `mode` decides whether the shader samples them or falls back
/// to the directional term.
pub struct SceneLightingState {
    pub mode: LightingMode,
    pub environment: Arc<EnvironmentGpu>,
    pub light_direction: glam::Vec3,
    pub light_color: glam::Vec3,
    pub ambient_color: glam::Vec3,
    pub intensity: f32,
}

/// Instance, adapter and device shared by every surface and offscreen pass.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Initializes the context against a window surface so the adapter is
    /// guaranteed to be able to present to it. Returns the surface for reuse.
    pub async fn for_window(window: &Arc<Window>) -> Result<(Self, wgpu::Surface<'static>)> {
        let instance = wgpu::Instance::default();
        let surface = instance.create_surface(window.clone()).context("Failed to create WGPU surface")?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("Failed to request WGPU adapter")?;
        let (device, queue) = Self::request_device(&adapter).await?;
        Ok((Self { instance, adapter, device, queue }, surface))
    }

    pub async fn headless() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("Failed to request headless adapter")?;
        let (device, queue) = Self::request_device(&adapter).await?;
        Ok(Self { instance, adapter, device, queue })
    }

    async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
        let mut required_limits = adapter.limits();
        required_limits.max_bind_groups = required_limits.max_bind_groups.max(4);
        let device_desc = wgpu::DeviceDescriptor {
            label: Some("Device"),
            required_features: wgpu::Features::empty(),
            required_limits,
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::default(),
        };
        adapter.request_device(&device_desc).await.context("Failed to request WGPU device")
    }
}

pub struct Renderer {
    gpu: Option<Arc<GpuContext>>,
    main: WindowSurface,
    blit: BlitPass,
    mesh: MeshPass,
    scene: Option<SceneGpu>,
    clear_color: wgpu::Color,
    error_count: u64,
}

impl Renderer {
    pub async fn new(window_cfg: &WindowConfig) -> Self {
        Self {
            gpu: None,
            main: WindowSurface::new(window_cfg),
            blit: BlitPass::new(),
            mesh: MeshPass::new(),
            scene: None,
            clear_color: DEFAULT_CLEAR_COLOR,
            error_count: 0,
        }
    }

    pub fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        if self.main.window().is_some() && self.main.is_attached() {
            return Ok(());
        }
        let window = self.main.ensure_window(event_loop)?;
        if self.gpu.is_none() {
            let (gpu, surface) = pollster::block_on(GpuContext::for_window(&window))?;
            let gpu = Arc::new(gpu);
            self.main.attach_prepared(gpu.clone(), surface)?;
            self.gpu = Some(gpu);
            return Ok(());
        }
        let gpu = self.gpu()?;
        self.main.attach(gpu)
    }

    pub fn gpu(&self) -> Result<Arc<GpuContext>> {
        self.gpu.clone().context("GPU context not initialized")
    }

    pub fn device(&self) -> Result<&wgpu::Device> {
        Ok(&self.gpu.as_ref().context("GPU device not initialized")?.device)
    }

    pub fn queue(&self) -> Result<&wgpu::Queue> {
        Ok(&self.gpu.as_ref().context("GPU queue not initialized")?.queue)
    }

    pub fn device_and_queue(&self) -> Result<(&wgpu::Device, &wgpu::Queue)> {
        Ok((self.device()?, self.queue()?))
    }

    pub fn is_ready(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn window(&self) -> Option<&Window> {
        self.main.window()
    }

    pub fn window_arc(&self) -> Option<Arc<Window>> {
        self.main.window_arc()
    }

    pub fn surface_format(&self) -> Result<wgpu::TextureFormat> {
        self.main.surface_format()
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.main.size()
    }

    pub fn pixels_per_point(&self) -> f32 {
        self.main.pixels_per_point()
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.main.resize(new_size);
    }

    pub fn vsync_enabled(&self) -> bool {
        self.main.vsync_enabled()
    }

    pub fn set_vsync(&mut self, enabled: bool) -> Result<()> {
        self.main.set_vsync(enabled)
    }

    pub fn clear_color(&self) -> wgpu::Color {
        self.clear_color
    }

    pub fn set_clear_color(&mut self, color: wgpu::Color) {
        self.clear_color = color;
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn note_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    pub fn has_scene(&self) -> bool {
        self.scene.is_some()
    }

    pub fn scene_subset_count(&self) -> usize {
        self.scene.as_ref().map(|scene| scene.subset_count()).unwrap_or(0)
    }

    /// Uploads an imported asset, replacing any previous scene. The previous
    /// scene's GPU resources are released only once the new one is built.
    pub fn install_scene(&mut self, import: &MeshImport) -> Result<()> {
        let gpu = self.gpu()?;
        let format = self.surface_format()?;
        self.mesh.ensure_resources(&gpu.device, format)?;
        let resources = self.mesh.resources()?;
        let scene = SceneGpu::from_import(&gpu.device, &gpu.queue, resources, import)?;
        self.scene = Some(scene);
        Ok(())
    }

    /// Renders the preview scene into the main surface and returns the frame
    /// for the UI pass to draw over.
    pub fn render_frame(
        &mut self,
        camera: &Camera3D,
        lighting: &SceneLightingState,
    ) -> Result<SurfaceFrame> {
        let gpu = self.gpu()?;
        let frame = match self.main.acquire_surface_frame() {
            Ok(frame) => frame,
            Err(err) => {
                self.error_count = self.error_count.saturating_add(1);
                return Err(err);
            }
        };
        let format = self.main.surface_format()?;
        self.mesh.ensure_resources(&gpu.device, format)?;
        let viewport = self.main.size();
        if let Some(scene) = self.scene.as_ref() {
            self.mesh.prepare(&gpu.device, &gpu.queue, camera, viewport, lighting, scene)?;
        }

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Frame Encoder") });
        {
            let depth_view = self.main.depth_view()?;
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Preview Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: frame.view(),
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            if let Some(scene) = self.scene.as_ref() {
                self.mesh.record(&mut pass, scene)?;
            }
        }
        gpu.queue.submit(Some(encoder.finish()));
        Ok(frame)
    }

    pub fn render_egui(
        &mut self,
        painter: &mut egui_wgpu::Renderer,
        paint_jobs: &[egui::ClippedPrimitive],
        screen: &egui_wgpu::ScreenDescriptor,
        frame: SurfaceFrame,
    ) -> Result<()> {
        let gpu = self.gpu()?;
        egui_pass::render(&gpu.device, &gpu.queue, painter, paint_jobs, screen, frame)
    }

    /// Blits `source` into a fresh offscreen target of the given size and
    /// reads the pixels back as tightly packed RGBA rows. Target and staging
    /// buffer live only for this call.
    pub fn extract_texture_pixels(
        &mut self,
        source: &wgpu::TextureView,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        let gpu = self.gpu()?;
        if width == 0 || height == 0 {
            bail!("Extraction target has zero extent ({width}x{height})");
        }
        self.blit.ensure_resources(&gpu.device, OFFSCREEN_COLOR_FORMAT)?;

        let target = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Extraction Target"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let bytes_per_row = aligned_bytes_per_row(width);
        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Extraction Staging"),
            size: bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Extraction Encoder") });
        self.blit.record(&gpu.device, &mut encoder, source, &target_view)?;
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        gpu.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = gpu.device.poll(wgpu::PollType::wait_indefinitely()).context("Device poll failed during readback")?;
        rx.recv()
            .context("Readback completion channel closed")?
            .map_err(|err| anyhow!("Failed to map readback buffer: {err:?}"))?;

        let mut pixels = Vec::with_capacity(pixel_buffer_len(width, height));
        {
            let data = slice.get_mapped_range();
            let packed_row = (width * 4) as usize;
            for row in 0..height as usize {
                let start = row * bytes_per_row as usize;
                pixels.extend_from_slice(&data[start..start + packed_row]);
            }
        }
        staging.unmap();
        Ok(pixels)
    }

    pub async fn init_headless_for_test(&mut self) -> Result<()> {
        if self.gpu.is_some() {
            return Ok(());
        }
        let gpu = Arc::new(GpuContext::headless().await?);
        self.main.init_headless(gpu.clone())?;
        self.gpu = Some(gpu);
        Ok(())
    }

    pub fn prepare_headless_render_target(&mut self) -> Result<()> {
        self.main.prepare_headless_render_target()
    }

    #[cfg(test)]
    pub fn inject_surface_error_for_test(&mut self, error: wgpu::SurfaceError) {
        self.main.inject_surface_error_for_test(error);
    }
}

fn aligned_bytes_per_row(width: u32) -> u32 {
    let bytes = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (bytes + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_alignment_pads_to_copy_granularity() {
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        assert_eq!(aligned_bytes_per_row(1) % align, 0);
        assert_eq!(aligned_bytes_per_row(333) % align, 0);
        assert!(aligned_bytes_per_row(333) >= 333 * 4);
        assert_eq!(aligned_bytes_per_row(align / 4), align);
    }
}
