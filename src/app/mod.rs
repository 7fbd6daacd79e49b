use crate::channel_mask::{pixel_buffer_len, ChannelMask};
use crate::config::{AppConfig, AppConfigOverrides};
use crate::environment::EnvironmentRegistry;
use crate::events::EventBus;
use crate::extraction::Extractor;
use crate::preview::PreviewPane;
use crate::renderer::{LightingMode, Renderer, SurfaceFrame};
use crate::texture_registry::{TextureKind, TextureRegistry};
use crate::time::Time;
use crate::tools::ToolDescriptor;

mod asset_watch;
mod editor_ui;
mod popup;
mod tool_host;

use asset_watch::AssetWatcher;
use popup::PopupHost;
pub use tool_host::{ToolCanvas, ToolHost};

use anyhow::{Context, Result};
use glam::Vec2;
use std::collections::VecDeque;
use std::path::Path;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

// egui
use egui::Context as EguiCtx;
use egui_wgpu::{Renderer as EguiRenderer, RendererOptions, ScreenDescriptor};
use egui_winit::State as EguiWinit;

const EVENT_LOG_LIMIT: usize = 32;
const FRAME_HISTORY: usize = 240;
const ORBIT_SENSITIVITY: f32 = 0.008;
const ZOOM_STEP: f32 = 0.1;

pub async fn run() -> Result<()> {
    run_with_overrides(AppConfigOverrides::default()).await
}

pub async fn run_with_overrides(overrides: AppConfigOverrides) -> Result<()> {
    let mut config = AppConfig::load_or_default("config/app.json");
    if !overrides.is_empty() {
        println!("[cli] overriding config fields: {}", overrides.applied_fields().join(", "));
    }
    config.apply_overrides(&overrides);
    let event_loop = EventLoop::new().context("Failed to create winit event loop")?;
    let mut app = App::new(config).await;
    event_loop.run_app(&mut app).context("Event loop execution failed")?;
    Ok(())
}

/// Everything egui needs for the main window, bundled so the platform state,
/// painter, and screen descriptor cannot get out of step with each other.
struct UiLayer {
    ctx: EguiCtx,
    platform: EguiWinit,
    painter: EguiRenderer,
    screen: ScreenDescriptor,
    canvas_upload: Option<(u64, egui::TextureHandle)>,
}

impl UiLayer {
    fn attach(renderer: &Renderer) -> Result<Self> {
        let window = renderer.window().context("Ui layer needs a live window")?;
        let device = renderer.device()?;
        let format = renderer.surface_format()?;
        let ctx = EguiCtx::default();
        let platform = EguiWinit::new(
            ctx.clone(),
            egui::ViewportId::ROOT,
            window,
            Some(renderer.pixels_per_point()),
            window.theme(),
            None,
        );
        let painter = EguiRenderer::new(device, format, RendererOptions::default());
        let size = renderer.size();
        let screen = ScreenDescriptor {
            size_in_pixels: [size.width, size.height],
            pixels_per_point: renderer.pixels_per_point(),
        };
        Ok(Self { ctx, platform, painter, screen, canvas_upload: None })
    }

    fn absorb_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        self.platform.on_window_event(window, event).consumed
    }

    fn resize(&mut self, size: PhysicalSize<u32>, pixels_per_point: f32) {
        self.screen.size_in_pixels = [size.width, size.height];
        self.screen.pixels_per_point = pixels_per_point;
    }

    /// Returns the egui handle for the extraction canvas, re-uploading the
    /// pixels only when a tool or a fresh extraction bumped the revision.
    fn sync_canvas_texture(&mut self, canvas: &ToolCanvas) -> Option<egui::TextureHandle> {
        if !canvas.has_content() {
            return None;
        }
        if let Some((revision, handle)) = &self.canvas_upload {
            if *revision == canvas.revision() {
                return Some(handle.clone());
            }
        }
        let size = [canvas.width() as usize, canvas.height() as usize];
        let image = egui::ColorImage::from_rgba_unmultiplied(size, canvas.pixels());
        let handle =
            self.ctx.load_texture("extraction_canvas", image, egui::TextureOptions::NEAREST);
        self.canvas_upload = Some((canvas.revision(), handle.clone()));
        Some(handle)
    }

    fn paint(
        &mut self,
        renderer: &mut Renderer,
        window: &Window,
        frame: SurfaceFrame,
        full_output: egui::FullOutput,
    ) -> Result<()> {
        let egui::FullOutput { platform_output, textures_delta, shapes, .. } = full_output;
        self.platform.handle_platform_output(window, platform_output);
        {
            let (device, queue) = renderer.device_and_queue()?;
            for (id, delta) in &textures_delta.set {
                self.painter.update_texture(device, queue, *id, delta);
            }
        }
        let meshes = self.ctx.tessellate(shapes, self.screen.pixels_per_point);
        renderer.render_egui(&mut self.painter, &meshes, &self.screen, frame)?;
        for id in &textures_delta.free {
            self.painter.free_texture(id);
        }
        Ok(())
    }
}

pub struct App {
    renderer: Renderer,
    time: Time,
    should_close: bool,
    ui: Option<UiLayer>,

    // UI state
    frame_ms: VecDeque<f32>,
    mask: ChannelMask,
    selected_texture: Option<String>,
    selected_face: u32,
    asset_path_input: String,
    auto_reload: bool,
    extraction_status: Option<String>,
    tool_status: Option<String>,

    // Inspection state
    textures: TextureRegistry,
    extractor: Extractor,
    canvas: ToolCanvas,
    tool_host: ToolHost,
    preview: PreviewPane,
    environments: EnvironmentRegistry,
    watcher: Option<AssetWatcher>,
    popup: PopupHost,
    events: EventBus,
    recent_events: VecDeque<String>,

    // Orbit input
    cursor_position: Option<(f32, f32)>,
    orbit_dragging: bool,

    config: AppConfig,
}

impl App {
    pub async fn new(config: AppConfig) -> Self {
        let renderer = Renderer::new(&config.window).await;
        let time = Time::new();

        let mut environments = EnvironmentRegistry::new();
        if let Some(dir) = config.preview.environment_dir.as_ref() {
            match environments.load_directory(dir) {
                Ok(keys) if !keys.is_empty() => {
                    println!("[env] loaded {} environments from {}", keys.len(), dir.display());
                }
                Ok(_) => {}
                Err(err) => eprintln!("[env] loading '{}' failed: {err:?}", dir.display()),
            }
        }

        let tool_host = ToolHost::new(&config.tools);
        let extractor = Extractor::new(&config.extraction);
        let watcher = match AssetWatcher::new() {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                eprintln!("[asset] file watcher unavailable: {err:?}");
                None
            }
        };
        let asset_path_input = config
            .preview
            .asset
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        let auto_reload = config.preview.auto_reload;
        let popup = PopupHost::new(&config.window);

        let mut textures = TextureRegistry::new();
        seed_sample_textures(&mut textures);
        let selected_texture = textures.names().into_iter().next();

        Self {
            renderer,
            time,
            should_close: false,
            ui: None,
            frame_ms: VecDeque::with_capacity(FRAME_HISTORY),
            mask: ChannelMask::default(),
            selected_texture,
            selected_face: 0,
            asset_path_input,
            auto_reload,
            extraction_status: None,
            tool_status: None,
            textures,
            extractor,
            canvas: ToolCanvas::new(),
            tool_host,
            preview: PreviewPane::new(),
            environments,
            watcher,
            popup,
            events: EventBus::default(),
            recent_events: VecDeque::with_capacity(EVENT_LOG_LIMIT),
            cursor_position: None,
            orbit_dragging: false,
            config,
        }
    }

    fn load_asset(&mut self, path: &Path) {
        self.preview.request_load(path);
        if let Some(watcher) = self.watcher.as_mut() {
            if let Err(err) = watcher.watch(path) {
                eprintln!("[asset] watching '{}' failed: {err:#}", path.display());
            }
        }
    }

    fn pump_asset_reloads(&mut self) {
        if !self.auto_reload {
            return;
        }
        if let Some(path) = self.watcher.as_mut().and_then(|watcher| watcher.take_reload()) {
            println!("[asset] change detected, reloading {}", path.display());
            self.preview.request_load(&path);
        }
    }

    fn absorb_completed_extractions(&mut self) {
        let completed =
            self.extractor.tick(&mut self.renderer, &mut self.textures, &mut self.events);
        for result in completed {
            let label = match result.face {
                Some(face) => format!("{} face {} ({})", result.texture, face, result.mask.label()),
                None => format!("{} ({})", result.texture, result.mask.label()),
            };
            self.extraction_status =
                Some(format!("Extracted {label}, {}x{}", result.width, result.height));
            self.canvas.install(label, result.width, result.height, result.pixels);
        }
    }

    fn apply_ui_actions(&mut self, actions: editor_ui::UiActions, event_loop: &ActiveEventLoop) {
        if actions.extract {
            if let Some(name) = self.selected_texture.clone() {
                let is_cube = self
                    .textures
                    .get(&name)
                    .map(|record| matches!(record.kind, TextureKind::Cube))
                    .unwrap_or(false);
                let face = if is_cube { Some(self.selected_face.min(5)) } else { None };
                self.extractor.request(&name, face, self.mask);
                self.extraction_status = Some(format!("Queued {} ({})", name, self.mask.label()));
            }
        }
        if let Some((x, y)) = actions.fill_at {
            let suppressor = self.extractor.suppressor();
            self.tool_host.fill(&mut self.canvas, x, y, &suppressor);
        } else if let Some(sample) = actions.pointer_sample {
            let suppressor = self.extractor.suppressor();
            self.tool_host.pointer(&mut self.canvas, sample, &suppressor);
        }
        if let Some(metadata) = actions.metadata_update {
            self.canvas.set_metadata(metadata);
        }
        if let Some(name) = actions.activate_tool {
            self.tool_host.activate(&name, &mut self.canvas, &mut self.events);
        }
        if actions.deactivate_tool {
            self.tool_host.deactivate(&mut self.canvas, &mut self.events);
        }
        if let Some((name, enabled)) = actions.toggle_manifest {
            let verb = if enabled { "enabled" } else { "disabled" };
            match self.tool_host.set_enabled(&name, enabled) {
                Ok(()) => self.tool_status = Some(format!("Manifest: {name} {verb}")),
                Err(err) => self.tool_status = Some(format!("Manifest update failed: {err:#}")),
            }
        }
        if actions.open_popup {
            match self.renderer.gpu() {
                Ok(gpu) => self.popup.open(event_loop, gpu, &mut self.events),
                Err(err) => eprintln!("[popup] cannot open before GPU init: {err:?}"),
            }
        }
        if actions.close_popup {
            self.popup.close(&mut self.events);
        }
        if actions.load_asset {
            let trimmed = self.asset_path_input.trim().to_string();
            if !trimmed.is_empty() {
                self.load_asset(Path::new(&trimmed));
            }
        }
        if let Some(key) = actions.environment_selection {
            if let Err(err) = self.preview.set_environment(&mut self.environments, Some(key.clone()))
            {
                eprintln!("[env] switching to '{key}' failed: {err:?}");
            }
        }
        if actions.reset_camera {
            self.preview.reset_camera();
        }
        if actions.clear_events {
            self.recent_events.clear();
        }
    }

    fn render_popup(&mut self) {
        if !self.popup.is_open() {
            return;
        }
        let gpu = match self.renderer.gpu() {
            Ok(gpu) => gpu,
            Err(_) => return,
        };
        let descriptors = self.tool_host.descriptors();
        let active = self.tool_host.active_name().map(|name| name.to_string());
        let metadata = self.canvas.metadata();
        match self.popup.render(&gpu, &descriptors, active.as_deref(), metadata) {
            Ok(output) => {
                if let Some(metadata) = output.metadata {
                    self.canvas.set_metadata(metadata);
                }
                if let Some(name) = output.activate_tool {
                    self.tool_host.activate(&name, &mut self.canvas, &mut self.events);
                }
                if output.close_requested {
                    self.popup.close(&mut self.events);
                }
            }
            Err(err) => eprintln!("[popup] render failed: {err:?}"),
        }
    }

    fn record_events(&mut self) {
        for event in self.events.drain() {
            if self.recent_events.len() == EVENT_LOG_LIMIT {
                self.recent_events.pop_front();
            }
            self.recent_events.push_back(event.to_string());
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(err) = self.renderer.ensure_window(event_loop) {
            eprintln!("Renderer initialization error: {err:?}");
            self.should_close = true;
            return;
        }
        if self.ui.is_some() {
            return;
        }
        match UiLayer::attach(&self.renderer) {
            Ok(ui) => self.ui = Some(ui),
            Err(err) => {
                eprintln!("Ui setup error: {err:?}");
                self.should_close = true;
                return;
            }
        }
        // First resume only: pick up the configured startup asset.
        if let Some(path) = self.config.preview.asset.clone() {
            self.load_asset(&path);
        }
    }

    fn window_event(&mut self, _el: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if self.popup.handle_window_event(id, &event, &mut self.events) {
            return;
        }
        let Some(window) = self.renderer.window_arc() else {
            return;
        };
        if id != window.id() {
            return;
        }
        let consumed = match self.ui.as_mut() {
            Some(ui) => ui.absorb_event(&window, &event),
            None => false,
        };

        // Cursor tracking stays live while egui owns the pointer, otherwise a
        // drag that crosses the panel edge would jump.
        if let WindowEvent::CursorMoved { position, .. } = &event {
            let current = (position.x as f32, position.y as f32);
            if let Some(previous) = self.cursor_position {
                if self.orbit_dragging && !consumed {
                    let delta = Vec2::new(current.0 - previous.0, current.1 - previous.1);
                    self.preview.orbit_mut().orbit(delta * ORBIT_SENSITIVITY);
                }
            }
            self.cursor_position = Some(current);
        }
        if let WindowEvent::MouseInput {
            state: ElementState::Released, button: MouseButton::Left, ..
        } = &event
        {
            self.orbit_dragging = false;
        }

        if consumed {
            return;
        }

        match &event {
            WindowEvent::CloseRequested => self.should_close = true,
            WindowEvent::Resized(size) => {
                self.renderer.resize(*size);
                if let Some(ui) = self.ui.as_mut() {
                    ui.resize(*size, self.renderer.pixels_per_point());
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                // Escape dismisses the palette first, then the app.
                if self.popup.is_open() {
                    self.popup.close(&mut self.events);
                } else {
                    self.should_close = true;
                }
            }
            WindowEvent::MouseInput {
                state: ElementState::Pressed, button: MouseButton::Left, ..
            } => {
                self.orbit_dragging = true;
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 60.0,
                };
                if scroll.abs() > f32::EPSILON {
                    self.preview.orbit_mut().zoom(1.0 - scroll * ZOOM_STEP);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_close {
            self.tool_host.teardown(&mut self.canvas, &mut self.events);
            self.popup.force_close(&mut self.events);
            self.record_events();
            event_loop.exit();
            return;
        }
        let dt = self.time.tick();

        self.pump_asset_reloads();
        self.preview.tick(&mut self.renderer, &mut self.events);
        self.absorb_completed_extractions();
        self.preview.run_error_heuristic(&mut self.renderer, &mut self.events);
        self.record_events();

        let camera = self.preview.camera();
        let lighting = match self.preview.lighting_state(&self.renderer, &mut self.environments) {
            Ok(lighting) => lighting,
            Err(err) => {
                eprintln!("Lighting setup error: {err:?}");
                return;
            }
        };
        let frame = match self.renderer.render_frame(&camera, &lighting) {
            Ok(frame) => frame,
            Err(err) => {
                eprintln!("Render error: {err:?}");
                return;
            }
        };

        let Some(window) = self.renderer.window_arc() else {
            frame.present();
            return;
        };
        let (ctx, raw_input, canvas_texture) = match self.ui.as_mut() {
            Some(ui) => (
                ui.ctx.clone(),
                ui.platform.take_egui_input(&window),
                ui.sync_canvas_texture(&self.canvas),
            ),
            None => {
                frame.present();
                return;
            }
        };

        self.frame_ms.push_back(dt * 1000.0);
        if self.frame_ms.len() > FRAME_HISTORY {
            self.frame_ms.pop_front();
        }
        let hist_points: Vec<[f64; 2]> =
            self.frame_ms.iter().enumerate().map(|(i, ms)| [i as f64, *ms as f64]).collect();

        if let Some(name) = self.selected_texture.clone() {
            if !self.textures.contains(&name) {
                self.selected_texture = None;
            }
        }
        let texture_names = self.textures.names();
        let (selected_is_cube, selected_invert_y) = self
            .selected_texture
            .as_deref()
            .and_then(|name| self.textures.get(name))
            .map(|record| (matches!(record.kind, TextureKind::Cube), record.invert_y))
            .unwrap_or((false, false));

        let tool_entries: Vec<(ToolDescriptor, bool)> = self
            .tool_host
            .descriptors()
            .into_iter()
            .map(|descriptor| {
                let dynamic = self.tool_host.is_dynamic(&descriptor.name);
                (descriptor, dynamic)
            })
            .collect();
        let manifest_entries: Vec<(String, bool)> = self
            .tool_host
            .manifest()
            .tools
            .iter()
            .map(|entry| (entry.name.clone(), entry.enabled))
            .collect();

        let mut environment_options = self.environments.options();
        environment_options.sort_by(|a, b| a.1.cmp(&b.1));
        let active_environment = self
            .preview
            .environment_key()
            .unwrap_or(self.environments.default_key())
            .to_string();

        let lighting_label = match self.preview.lighting_mode() {
            LightingMode::Environment => "environment",
            LightingMode::Basic => "basic",
        };

        let editor_params = editor_ui::EditorUiParams {
            raw_input,
            hist_points,
            frame_count: self.time.frame_index(),
            smoothed_fps: self.time.smoothed_fps(),
            renderer_errors: self.renderer.error_count(),
            scene_subsets: self.renderer.scene_subset_count(),
            has_scene: self.renderer.has_scene(),
            vsync_enabled: self.renderer.vsync_enabled(),
            texture_names,
            selected_texture: self.selected_texture.clone(),
            selected_is_cube,
            selected_invert_y,
            selected_face: self.selected_face,
            mask: self.mask,
            pending_extractions: self.extractor.pending_count(),
            extraction_status: self.extraction_status.clone(),
            canvas_texture,
            canvas_size: (self.canvas.width(), self.canvas.height()),
            canvas_source: self.canvas.source().map(|source| source.to_string()),
            metadata: self.canvas.metadata(),
            tool_entries,
            active_tool: self.tool_host.active_name().map(|name| name.to_string()),
            manifest_entries,
            manifest_error: self.tool_host.manifest_error().map(|err| err.to_string()),
            load_failures: self.tool_host.load_failures().to_vec(),
            tool_status: self.tool_status.clone(),
            popup_open: self.popup.is_open(),
            popup_blocked: self.popup.blocked_reason().map(|reason| reason.to_string()),
            asset_path_input: self.asset_path_input.clone(),
            preview_status: self.preview.status().to_string(),
            preview_loading: self.preview.is_loading(),
            lighting_label,
            environment_options,
            active_environment,
            auto_reload: self.auto_reload,
            recent_events: self.recent_events.iter().cloned().collect(),
        };

        let editor_ui::EditorUiOutput {
            full_output,
            actions,
            mask,
            selected_texture,
            selected_face,
            asset_path_input,
            auto_reload,
            vsync_request,
        } = editor_ui::draw(&ctx, editor_params);

        self.mask = mask;
        self.selected_texture = selected_texture;
        self.selected_face = selected_face;
        self.asset_path_input = asset_path_input;
        self.auto_reload = auto_reload;
        if let Some(enabled) = vsync_request {
            if let Err(err) = self.renderer.set_vsync(enabled) {
                eprintln!("[render] vsync change failed: {err:?}");
            }
        }

        self.apply_ui_actions(actions, event_loop);

        if let Some(ui) = self.ui.as_mut() {
            if let Err(err) = ui.paint(&mut self.renderer, &window, frame, full_output) {
                eprintln!("Egui paint error: {err:?}");
            }
        }

        self.render_popup();
        self.record_events();
        window.request_redraw();
    }
}

/// Built-in inspection subjects so extraction works before any file is
/// loaded: a checkerboard, a flipped gradient, and a cube with tinted faces.
fn seed_sample_textures(textures: &mut TextureRegistry) {
    if let Err(err) = textures.insert_test_pattern("checker", 256, 256) {
        eprintln!("[texture] seeding 'checker' failed: {err:?}");
    }

    let (width, height) = (192u32, 128u32);
    let mut gradient = Vec::with_capacity(pixel_buffer_len(width, height));
    for y in 0..height {
        let down = (y * 255 / height.max(1)) as u8;
        for x in 0..width {
            let across = (x * 255 / width.max(1)) as u8;
            gradient.extend_from_slice(&[across, down, 128, 255]);
        }
    }
    if let Err(err) = textures.insert_pixels("gradient_flipped", width, height, true, gradient) {
        eprintln!("[texture] seeding 'gradient_flipped' failed: {err:?}");
    }

    let face_size = 64u32;
    let tints: [[u8; 3]; 6] =
        [[220, 60, 60], [120, 30, 30], [60, 220, 60], [30, 120, 30], [60, 60, 220], [30, 30, 120]];
    let mut faces = Vec::with_capacity(pixel_buffer_len(face_size, face_size) * tints.len());
    for tint in tints {
        for y in 0..face_size {
            for x in 0..face_size {
                let edge = x == 0 || y == 0 || x + 1 == face_size || y + 1 == face_size;
                let scale = if edge { 0.4 } else { 1.0 };
                faces.push((tint[0] as f32 * scale) as u8);
                faces.push((tint[1] as f32 * scale) as u8);
                faces.push((tint[2] as f32 * scale) as u8);
                faces.push(255);
            }
        }
    }
    if let Err(err) = textures.insert_cube("axis_cube", face_size, false, faces) {
        eprintln!("[texture] seeding 'axis_cube' failed: {err:?}");
    }
}
