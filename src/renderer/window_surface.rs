use crate::config::WindowConfig;
use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Fullscreen, Window};

use super::{GpuContext, DEPTH_FORMAT};

enum FrameTarget {
    Swapchain(wgpu::SurfaceTexture),
    Offscreen,
}

/// A frame to render into: an acquired swapchain texture, or an offscreen
/// stand-in when no surface exists. Offscreen frames drop their texture on
/// `present`.
pub struct SurfaceFrame {
    view: wgpu::TextureView,
    target: FrameTarget,
}

impl SurfaceFrame {
    fn from_swapchain(texture: wgpu::SurfaceTexture) -> Self {
        let view = texture.texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { view, target: FrameTarget::Swapchain(texture) }
    }

    fn offscreen(view: wgpu::TextureView) -> Self {
        Self { view, target: FrameTarget::Offscreen }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn present(self) {
        if let FrameTarget::Swapchain(texture) = self.target {
            texture.present();
        }
    }
}

struct OffscreenTarget {
    texture: wgpu::Texture,
}

/// Surface state for one OS window. The GPU device itself lives in the shared
/// [`GpuContext`] so the editor and popup windows can present from one queue.
pub struct WindowSurface {
    gpu: Option<Arc<GpuContext>>,
    window: Option<Arc<Window>>,
    surface: Option<wgpu::Surface<'static>>,
    config: Option<wgpu::SurfaceConfiguration>,
    present_modes: Vec<wgpu::PresentMode>,
    size: PhysicalSize<u32>,
    title: String,
    vsync: bool,
    fullscreen: bool,
    // The view keeps its texture alive, so only the view is stored.
    depth_view: Option<wgpu::TextureView>,
    offscreen_target: Option<OffscreenTarget>,
    #[cfg(test)]
    resize_invocations: usize,
    #[cfg(test)]
    surface_error_injector: Option<wgpu::SurfaceError>,
}

impl WindowSurface {
    pub fn new(window_cfg: &WindowConfig) -> Self {
        Self::with_title(window_cfg, window_cfg.title.clone())
    }

    pub fn with_title(window_cfg: &WindowConfig, title: String) -> Self {
        Self {
            gpu: None,
            window: None,
            surface: None,
            config: None,
            present_modes: Vec::new(),
            size: PhysicalSize::new(window_cfg.width, window_cfg.height),
            title,
            vsync: window_cfg.vsync,
            fullscreen: window_cfg.fullscreen,
            depth_view: None,
            offscreen_target: None,
            #[cfg(test)]
            resize_invocations: 0,
            #[cfg(test)]
            surface_error_injector: None,
        }
    }

    /// Creates the OS window if it does not exist yet. GPU attachment is a
    /// separate step so the shared context can be initialized in between.
    pub fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Result<Arc<Window>> {
        if let Some(window) = self.window.as_ref() {
            return Ok(window.clone());
        }
        let mut attrs =
            Window::default_attributes().with_title(self.title.clone()).with_inner_size(self.size);
        if self.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let window = Arc::new(event_loop.create_window(attrs).context("Failed to create window")?);
        let actual = window.inner_size();
        if actual.width > 0 && actual.height > 0 {
            self.size = actual;
        }
        self.window = Some(window.clone());
        Ok(window)
    }

    /// Creates a surface for this window from the shared context and
    /// configures it.
    pub fn attach(&mut self, gpu: Arc<GpuContext>) -> Result<()> {
        let window = self.window.as_ref().context("Window not created")?.clone();
        let surface = gpu.instance.create_surface(window).context("Failed to create WGPU surface")?;
        self.attach_prepared(gpu, surface)
    }

    /// Variant of [`Self::attach`] for a surface that already exists, such as
    /// the one used to pick a compatible adapter during startup.
    pub fn attach_prepared(&mut self, gpu: Arc<GpuContext>, surface: wgpu::Surface<'static>) -> Result<()> {
        let window = self.window.as_ref().context("Window not created")?;
        let reported = window.inner_size();
        if reported.width > 0 && reported.height > 0 {
            self.size = reported;
        }

        let caps = surface.get_capabilities(&gpu.adapter);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: preferred_surface_format(&caps)?,
            width: self.size.width.max(1),
            height: self.size.height.max(1),
            present_mode: self.select_present_mode(&caps.present_modes),
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &config);

        self.depth_view = Some(create_depth_view(&gpu.device, self.size));
        self.surface = Some(surface);
        self.config = Some(config);
        self.present_modes = caps.present_modes;
        self.gpu = Some(gpu);
        Ok(())
    }

    /// Binds the shared context without a surface. Used by tests running
    /// against an offscreen target.
    pub fn init_headless(&mut self, gpu: Arc<GpuContext>) -> Result<()> {
        self.gpu = Some(gpu);
        if self.config.is_none() {
            self.config = Some(wgpu::SurfaceConfiguration {
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                format: wgpu::TextureFormat::Bgra8UnormSrgb,
                width: self.size.width.max(1),
                height: self.size.height.max(1),
                present_mode: wgpu::PresentMode::Fifo,
                alpha_mode: wgpu::CompositeAlphaMode::Opaque,
                view_formats: vec![],
                desired_maximum_frame_latency: 2,
            });
        }
        if self.depth_view.is_none() {
            self.rebuild_depth_view()?;
        }
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.surface.is_some()
    }

    pub fn depth_view(&self) -> Result<&wgpu::TextureView> {
        self.depth_view.as_ref().context("Depth texture missing")
    }

    pub fn surface_format(&self) -> Result<wgpu::TextureFormat> {
        Ok(self.config.as_ref().context("Surface configuration missing")?.format)
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    /// Falls back to 1.0 for offscreen targets, which have no display scale.
    pub fn pixels_per_point(&self) -> f32 {
        self.window.as_ref().map_or(1.0, |window| window.scale_factor() as f32)
    }

    pub fn window(&self) -> Option<&Window> {
        self.window.as_deref()
    }

    pub fn window_arc(&self) -> Option<Arc<Window>> {
        self.window.clone()
    }

    pub fn vsync_enabled(&self) -> bool {
        self.vsync
    }

    pub fn set_vsync(&mut self, enabled: bool) -> Result<()> {
        if self.vsync == enabled {
            return Ok(());
        }
        self.vsync = enabled;
        self.reconfigure_present_mode()
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.size = new_size;
        #[cfg(test)]
        {
            self.resize_invocations = self.resize_invocations.saturating_add(1);
        }
        self.offscreen_target = None;
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        if let Some(config) = self.config.as_mut() {
            config.width = new_size.width;
            config.height = new_size.height;
            if let Err(err) = self.configure_surface() {
                eprintln!("Surface reconfigure after resize failed: {err:?}");
            }
        }
        if self.gpu.is_some() {
            if let Err(err) = self.rebuild_depth_view() {
                eprintln!("Depth texture rebuild failed: {err:?}");
            }
        }
    }

    pub fn acquire_surface_frame(&mut self) -> Result<SurfaceFrame> {
        #[cfg(test)]
        if let Some(err) = self.surface_error_injector.take() {
            return Err(self.handle_surface_error(&err));
        }
        if let Some(surface) = self.surface.as_ref() {
            return match surface.get_current_texture() {
                Ok(texture) => Ok(SurfaceFrame::from_swapchain(texture)),
                Err(err) => Err(self.handle_surface_error(&err)),
            };
        }
        let target = self.offscreen_target.as_ref().context("Surface not initialized")?;
        Ok(SurfaceFrame::offscreen(target.texture.create_view(&wgpu::TextureViewDescriptor::default())))
    }

    pub fn prepare_headless_render_target(&mut self) -> Result<()> {
        if self.size.width == 0 || self.size.height == 0 {
            bail!("Headless render target requires non-zero dimensions");
        }
        let gpu = self.gpu.as_ref().context("GPU device not initialized")?;
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Frame"),
            size: wgpu::Extent3d {
                width: self.size.width,
                height: self.size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Bgra8UnormSrgb,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        self.offscreen_target = Some(OffscreenTarget { texture });
        Ok(())
    }

    /// Resizes on lost/outdated so the next acquisition sees a fresh
    /// configuration; every variant surfaces as an error for the caller to
    /// log and skip the frame.
    pub fn handle_surface_error(&mut self, error: &wgpu::SurfaceError) -> anyhow::Error {
        match error {
            wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => {
                self.resize(self.size);
                anyhow!("Surface lost or outdated; reconfigured surface")
            }
            wgpu::SurfaceError::Timeout => anyhow!("Surface acquisition timed out"),
            wgpu::SurfaceError::OutOfMemory => anyhow!("Surface out of memory"),
            wgpu::SurfaceError::Other => anyhow!("Surface reported an unknown error"),
        }
    }

    pub fn reconfigure_present_mode(&mut self) -> Result<()> {
        if self.surface.is_none() {
            return Ok(());
        }
        let mode = if self.present_modes.is_empty() {
            wgpu::PresentMode::Fifo
        } else {
            self.select_present_mode(&self.present_modes)
        };
        self.config.as_mut().context("Surface configuration missing")?.present_mode = mode;
        self.configure_surface()
    }

    #[cfg(test)]
    pub fn resize_invocations_for_test(&self) -> usize {
        self.resize_invocations
    }

    #[cfg(test)]
    pub fn inject_surface_error_for_test(&mut self, error: wgpu::SurfaceError) {
        self.surface_error_injector = Some(error);
    }

    fn configure_surface(&mut self) -> Result<()> {
        let surface = self.surface.as_ref().context("Surface not initialized")?;
        let gpu = self.gpu.as_ref().context("GPU device not initialized")?;
        let config = self.config.as_mut().context("Surface configuration missing")?;
        surface.configure(&gpu.device, config);
        Ok(())
    }

    fn rebuild_depth_view(&mut self) -> Result<()> {
        let gpu = self.gpu.as_ref().context("GPU device not initialized")?;
        self.depth_view = Some(create_depth_view(&gpu.device, self.size));
        Ok(())
    }

    fn select_present_mode(&self, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
        if !self.vsync {
            for mode in available {
                if *mode != wgpu::PresentMode::Fifo {
                    return *mode;
                }
            }
        }
        wgpu::PresentMode::Fifo
    }
}

fn preferred_surface_format(caps: &wgpu::SurfaceCapabilities) -> Result<wgpu::TextureFormat> {
    caps.formats
        .iter()
        .copied()
        .find(|format| format.is_srgb())
        .or_else(|| caps.formats.first().copied())
        .context("Surface reports no supported formats")
}

fn create_depth_view(device: &wgpu::Device, size: PhysicalSize<u32>) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Buffer"),
        size: wgpu::Extent3d {
            width: size.width.max(1),
            height: size.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}
