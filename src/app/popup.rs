use crate::config::WindowConfig;
use crate::events::{EventBus, InspectorEvent};
use crate::renderer::{egui_pass, GpuContext, WindowSurface};
use crate::tools::{ToolDescriptor, ToolMetadata};
use anyhow::{Context, Result};
use egui::Context as EguiCtx;
use egui_wgpu::{Renderer as EguiRenderer, RendererOptions, ScreenDescriptor};
use egui_winit::State as EguiWinit;
use std::sync::Arc;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::WindowId;

const POPUP_TITLE: &str = "Tool Palette";
const POPUP_WIDTH: u32 = 320;
const POPUP_HEIGHT: u32 = 420;
const POPUP_CLEAR: wgpu::Color = wgpu::Color { r: 0.08, g: 0.08, b: 0.1, a: 1.0 };

#[derive(Default)]
pub struct PopupUiOutput {
    pub activate_tool: Option<String>,
    pub metadata: Option<ToolMetadata>,
    pub close_requested: bool,
}

/// Projects the tool palette into a second OS window with its own egui
/// context and surface. Creation failure leaves the host in a visible
/// "blocked" state instead of tearing the app down.
pub struct PopupHost {
    window_cfg: WindowConfig,
    surface: Option<WindowSurface>,
    egui_ctx: EguiCtx,
    egui_winit: Option<EguiWinit>,
    egui_renderer: Option<EguiRenderer>,
    egui_screen: Option<ScreenDescriptor>,
    blocked: Option<String>,
}

impl PopupHost {
    pub fn new(main_cfg: &WindowConfig) -> Self {
        let window_cfg = WindowConfig {
            title: POPUP_TITLE.to_string(),
            width: POPUP_WIDTH,
            height: POPUP_HEIGHT,
            vsync: main_cfg.vsync,
            fullscreen: false,
        };
        Self {
            window_cfg,
            surface: None,
            egui_ctx: EguiCtx::default(),
            egui_winit: None,
            egui_renderer: None,
            egui_screen: None,
            blocked: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.surface.as_ref().map(|surface| surface.is_attached()).unwrap_or(false)
    }

    pub fn blocked_reason(&self) -> Option<&str> {
        self.blocked.as_deref()
    }

    pub fn window_id(&self) -> Option<WindowId> {
        self.surface.as_ref().and_then(|surface| surface.window()).map(|window| window.id())
    }

    pub fn open(&mut self, event_loop: &ActiveEventLoop, gpu: Arc<GpuContext>, events: &mut EventBus) {
        if self.is_open() {
            return;
        }
        match self.try_open(event_loop, gpu) {
            Ok(window_id) => {
                self.blocked = None;
                events.push(InspectorEvent::PopupOpened { window_id: u64::from(window_id) });
            }
            Err(err) => {
                let reason = format!("{err:#}");
                eprintln!("[popup] creation blocked: {reason}");
                self.discard_window_state();
                self.blocked = Some(reason.clone());
                events.push(InspectorEvent::PopupBlocked { reason });
            }
        }
    }

    fn try_open(&mut self, event_loop: &ActiveEventLoop, gpu: Arc<GpuContext>) -> Result<WindowId> {
        let mut surface = WindowSurface::new(&self.window_cfg);
        let window = surface.ensure_window(event_loop)?;
        surface.attach(gpu.clone())?;
        let format = surface.surface_format()?;
        let pixels_per_point = surface.pixels_per_point();

        let state = EguiWinit::new(
            self.egui_ctx.clone(),
            egui::ViewportId::ROOT,
            window.as_ref(),
            Some(pixels_per_point),
            window.theme(),
            None,
        );
        let renderer = EguiRenderer::new(&gpu.device, format, RendererOptions::default());
        let size = surface.size();
        self.egui_screen = Some(ScreenDescriptor {
            size_in_pixels: [size.width, size.height],
            pixels_per_point,
        });
        self.egui_winit = Some(state);
        self.egui_renderer = Some(renderer);
        let id = window.id();
        self.surface = Some(surface);
        Ok(id)
    }

    /// Handles an event addressed to the popup window. Returns false when the
    /// id belongs to some other window.
    pub fn handle_window_event(&mut self, id: WindowId, event: &WindowEvent, events: &mut EventBus) -> bool {
        if self.window_id() != Some(id) {
            return false;
        }
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                self.close(events);
            }
            WindowEvent::Resized(size) => {
                if let Some(surface) = self.surface.as_mut() {
                    surface.resize(*size);
                    if let Some(screen) = self.egui_screen.as_mut() {
                        screen.size_in_pixels = [size.width, size.height];
                    }
                }
            }
            _ => {
                if let (Some(surface), Some(state)) = (self.surface.as_ref(), self.egui_winit.as_mut()) {
                    if let Some(window) = surface.window() {
                        let _ = state.on_window_event(window, event);
                    }
                }
            }
        }
        true
    }

    pub fn close(&mut self, events: &mut EventBus) {
        if self.surface.is_none() {
            return;
        }
        self.discard_window_state();
        events.push(InspectorEvent::PopupClosed);
    }

    /// Tears the popup down alongside the main window or the whole host.
    pub fn force_close(&mut self, events: &mut EventBus) {
        if self.surface.is_some() {
            println!("[popup] force closing palette window");
            self.close(events);
        }
    }

    fn discard_window_state(&mut self) {
        self.egui_renderer = None;
        self.egui_winit = None;
        self.egui_screen = None;
        self.surface = None;
    }

    /// Runs the palette UI and presents it into the popup surface. Never
    /// touches the main window's frame.
    pub fn render(
        &mut self,
        gpu: &GpuContext,
        tools: &[ToolDescriptor],
        active: Option<&str>,
        metadata: ToolMetadata,
    ) -> Result<PopupUiOutput> {
        let mut output = PopupUiOutput::default();
        let Some(surface) = self.surface.as_mut() else {
            return Ok(output);
        };
        let window = surface.window_arc().context("Popup window missing")?;
        let raw_input = self
            .egui_winit
            .as_mut()
            .context("Popup egui state missing")?
            .take_egui_input(&window);

        let mut edited = metadata;
        let mut metadata_changed = false;
        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.heading("Tools");
                for descriptor in tools {
                    let selected = active == Some(descriptor.name.as_str());
                    let label = format!("[{}] {}", descriptor.icon, descriptor.name);
                    if ui.selectable_label(selected, label).clicked() && !selected {
                        output.activate_tool = Some(descriptor.name.clone());
                    }
                }
                ui.separator();
                ui.label("Brush color");
                let mut color = egui::Color32::from_rgba_unmultiplied(
                    edited.color[0],
                    edited.color[1],
                    edited.color[2],
                    edited.color[3],
                );
                if ui.color_edit_button_srgba(&mut color).changed() {
                    edited.color = color.to_array();
                    metadata_changed = true;
                }
                let mut opacity = edited.opacity;
                if ui
                    .add(egui::Slider::new(&mut opacity, 0.0..=1.0).text("Opacity"))
                    .changed()
                {
                    edited.opacity = opacity;
                    metadata_changed = true;
                }
                ui.separator();
                if ui.button("Close palette").clicked() {
                    output.close_requested = true;
                }
            });
        });
        if metadata_changed {
            output.metadata = Some(edited);
        }

        let egui::FullOutput { platform_output, textures_delta, shapes, .. } = full_output;
        if let Some(state) = self.egui_winit.as_mut() {
            state.handle_platform_output(&window, platform_output);
        }

        let (Some(painter), Some(screen)) = (self.egui_renderer.as_mut(), self.egui_screen.as_ref())
        else {
            return Ok(output);
        };
        let frame = match surface.acquire_surface_frame() {
            Ok(frame) => frame,
            Err(err) => {
                eprintln!("[popup] frame acquisition failed: {err:?}");
                return Ok(output);
            }
        };
        for (id, delta) in &textures_delta.set {
            painter.update_texture(&gpu.device, &gpu.queue, *id, delta);
        }
        let meshes = self.egui_ctx.tessellate(shapes, screen.pixels_per_point);
        egui_pass::render_cleared(&gpu.device, &gpu.queue, painter, &meshes, screen, frame, POPUP_CLEAR)?;
        for id in &textures_delta.free {
            painter.free_texture(id);
        }
        window.request_redraw();
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_an_unopened_popup_emits_nothing() {
        let mut popup = PopupHost::new(&WindowConfig::default());
        let mut events = EventBus::default();
        popup.close(&mut events);
        popup.force_close(&mut events);
        assert!(events.is_empty());
        assert!(!popup.is_open());
        assert!(popup.window_id().is_none());
    }

    #[test]
    fn render_without_a_window_is_a_no_op() {
        let mut popup = PopupHost::new(&WindowConfig::default());
        assert!(popup.blocked_reason().is_none());
        assert!(popup.surface.is_none());
        let out = PopupUiOutput::default();
        assert!(out.activate_tool.is_none() && !out.close_requested);
    }
}
