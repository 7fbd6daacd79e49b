use crate::channel_mask::ChannelMask;
use crate::tools::{PointerSample, ToolDescriptor, ToolMetadata};

use egui_plot as eplot;

pub(super) struct EditorUiParams {
    pub raw_input: egui::RawInput,
    pub hist_points: Vec<[f64; 2]>,
    pub frame_count: u64,
    pub smoothed_fps: f32,
    pub renderer_errors: u64,
    pub scene_subsets: usize,
    pub has_scene: bool,
    pub vsync_enabled: bool,
    pub texture_names: Vec<String>,
    pub selected_texture: Option<String>,
    pub selected_is_cube: bool,
    pub selected_invert_y: bool,
    pub selected_face: u32,
    pub mask: ChannelMask,
    pub pending_extractions: usize,
    pub extraction_status: Option<String>,
    pub canvas_texture: Option<egui::TextureHandle>,
    pub canvas_size: (u32, u32),
    pub canvas_source: Option<String>,
    pub metadata: ToolMetadata,
    pub tool_entries: Vec<(ToolDescriptor, bool)>,
    pub active_tool: Option<String>,
    pub manifest_entries: Vec<(String, bool)>,
    pub manifest_error: Option<String>,
    pub load_failures: Vec<String>,
    pub tool_status: Option<String>,
    pub popup_open: bool,
    pub popup_blocked: Option<String>,
    pub asset_path_input: String,
    pub preview_status: String,
    pub preview_loading: bool,
    pub lighting_label: &'static str,
    pub environment_options: Vec<(String, String)>,
    pub active_environment: String,
    pub auto_reload: bool,
    pub recent_events: Vec<String>,
}

#[derive(Default)]
pub(super) struct UiActions {
    pub extract: bool,
    pub load_asset: bool,
    pub activate_tool: Option<String>,
    pub deactivate_tool: bool,
    pub toggle_manifest: Option<(String, bool)>,
    pub open_popup: bool,
    pub close_popup: bool,
    pub pointer_sample: Option<PointerSample>,
    pub fill_at: Option<(u32, u32)>,
    pub metadata_update: Option<ToolMetadata>,
    pub environment_selection: Option<String>,
    pub reset_camera: bool,
    pub clear_events: bool,
}

pub(super) struct EditorUiOutput {
    pub full_output: egui::FullOutput,
    pub actions: UiActions,
    pub mask: ChannelMask,
    pub selected_texture: Option<String>,
    pub selected_face: u32,
    pub asset_path_input: String,
    pub auto_reload: bool,
    pub vsync_request: Option<bool>,
}

const FACE_LABELS: [&str; 6] = ["+X", "-X", "+Y", "-Y", "+Z", "-Z"];
const CANVAS_DISPLAY_WIDTH: f32 = 300.0;

/// Runs one egui frame for the left panel and reports every state change the
/// user made, without touching application state itself.
pub(super) fn draw(ctx: &egui::Context, params: EditorUiParams) -> EditorUiOutput {
    let EditorUiParams {
        raw_input,
        hist_points,
        frame_count,
        smoothed_fps,
        renderer_errors,
        scene_subsets,
        has_scene,
        mut vsync_enabled,
        texture_names,
        mut selected_texture,
        selected_is_cube,
        selected_invert_y,
        mut selected_face,
        mut mask,
        pending_extractions,
        extraction_status,
        canvas_texture,
        canvas_size,
        canvas_source,
        metadata,
        tool_entries,
        active_tool,
        manifest_entries,
        manifest_error,
        load_failures,
        tool_status,
        popup_open,
        popup_blocked,
        mut asset_path_input,
        preview_status,
        preview_loading,
        lighting_label,
        environment_options,
        active_environment,
        mut auto_reload,
        recent_events,
    } = params;

    let mut actions = UiActions::default();
    let mut vsync_request: Option<bool> = None;

    let full_output = ctx.run(raw_input, |ctx| {
        egui::SidePanel::left("shrike_left_panel").default_width(340.0).show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                egui::CollapsingHeader::new("Stats").default_open(true).show(ui, |ui| {
                    let mut vsync_box = vsync_enabled;
                    if ui.checkbox(&mut vsync_box, "Enable VSync").changed() {
                        vsync_enabled = vsync_box;
                        vsync_request = Some(vsync_box);
                    }
                    ui.label(format!("{smoothed_fps:.0} fps over {frame_count} frames"));
                    ui.label(format!("Surface errors: {renderer_errors}"));
                    if has_scene {
                        ui.label(format!("Scene parts: {scene_subsets}"));
                    } else {
                        ui.label("No scene installed");
                    }
                    ui.separator();
                    ui.label("Frame time (ms)");
                    let hist =
                        eplot::Plot::new("fps_plot").height(120.0).include_y(0.0).include_y(40.0);
                    hist.show(ui, |plot_ui| {
                        plot_ui.line(eplot::Line::new(
                            "ms/frame",
                            eplot::PlotPoints::from(hist_points.clone()),
                        ));
                    });
                    ui.label("Target: 16.7ms for 60 FPS");
                });

                egui::CollapsingHeader::new("Channel Extraction").default_open(true).show(
                    ui,
                    |ui| {
                        if texture_names.is_empty() {
                            ui.label("No textures registered.");
                        } else {
                            let current = selected_texture.clone().unwrap_or_default();
                            egui::ComboBox::from_id_salt("texture_select")
                                .selected_text(if current.is_empty() {
                                    "select texture"
                                } else {
                                    current.as_str()
                                })
                                .show_ui(ui, |ui| {
                                    for name in &texture_names {
                                        let chosen = selected_texture.as_deref() == Some(name);
                                        if ui.selectable_label(chosen, name).clicked() && !chosen {
                                            selected_texture = Some(name.clone());
                                            selected_face = 0;
                                        }
                                    }
                                });
                        }
                        if selected_is_cube {
                            ui.horizontal(|ui| {
                                ui.label("Face:");
                                for (index, label) in FACE_LABELS.iter().enumerate() {
                                    if ui
                                        .selectable_label(selected_face == index as u32, *label)
                                        .clicked()
                                    {
                                        selected_face = index as u32;
                                    }
                                }
                            });
                        }
                        ui.horizontal(|ui| {
                            for (flag, label) in [
                                (ChannelMask::R, "R"),
                                (ChannelMask::G, "G"),
                                (ChannelMask::B, "B"),
                                (ChannelMask::A, "A"),
                            ] {
                                let mut on = mask.contains(flag);
                                if ui.toggle_value(&mut on, label).changed() {
                                    mask.set(flag, on);
                                }
                            }
                            ui.label(format!("mask {}", mask.label()));
                        });
                        if selected_invert_y {
                            ui.small("Source rows are flipped on readback.");
                        }
                        ui.horizontal(|ui| {
                            let can_extract = selected_texture.is_some();
                            if ui.add_enabled(can_extract, egui::Button::new("Extract")).clicked() {
                                actions.extract = true;
                            }
                            if pending_extractions > 0 {
                                ui.label(format!("{pending_extractions} queued"));
                            }
                        });
                        if let Some(status) = extraction_status.as_deref() {
                            ui.small(status);
                        }
                        ui.separator();
                        match canvas_texture.as_ref() {
                            Some(handle) => {
                                if let Some(source) = canvas_source.as_deref() {
                                    ui.label(format!("Canvas: {source}"));
                                }
                                let (width, height) = canvas_size;
                                let display_width = ui.available_width().min(CANVAS_DISPLAY_WIDTH);
                                let display_height =
                                    display_width * height.max(1) as f32 / width.max(1) as f32;
                                let response = ui.add(
                                    egui::Image::new(handle)
                                        .fit_to_exact_size(egui::vec2(
                                            display_width,
                                            display_height,
                                        ))
                                        .sense(egui::Sense::click_and_drag()),
                                );
                                if let Some(pos) = response.interact_pointer_pos() {
                                    let rect = response.rect;
                                    if rect.width() > 0.0 && rect.height() > 0.0 {
                                        let rel = pos - rect.min;
                                        let x = ((rel.x / rect.width()) * width as f32)
                                            .floor()
                                            .clamp(0.0, width.saturating_sub(1) as f32)
                                            as u32;
                                        let y = ((rel.y / rect.height()) * height as f32)
                                            .floor()
                                            .clamp(0.0, height.saturating_sub(1) as f32)
                                            as u32;
                                        if response.double_clicked() {
                                            actions.fill_at = Some((x, y));
                                        } else {
                                            actions.pointer_sample = Some(PointerSample {
                                                x,
                                                y,
                                                pressed: response.is_pointer_button_down_on(),
                                            });
                                        }
                                    }
                                }
                            }
                            None => {
                                ui.small("Extract a texture to open the canvas.");
                            }
                        }
                    },
                );

                egui::CollapsingHeader::new("Tools").default_open(true).show(ui, |ui| {
                    for (descriptor, dynamic) in &tool_entries {
                        let selected = active_tool.as_deref() == Some(descriptor.name.as_str());
                        let suffix = if *dynamic { " (dylib)" } else { "" };
                        let label = format!("[{}] {}{suffix}", descriptor.icon, descriptor.name);
                        if ui.selectable_label(selected, label).clicked() {
                            if selected {
                                actions.deactivate_tool = true;
                            } else {
                                actions.activate_tool = Some(descriptor.name.clone());
                            }
                        }
                    }
                    if let Some(status) = tool_status.as_deref() {
                        ui.small(status);
                    }
                    ui.separator();
                    ui.label("Brush");
                    let mut edited = metadata;
                    let mut metadata_changed = false;
                    let mut color = egui::Color32::from_rgba_unmultiplied(
                        edited.color[0],
                        edited.color[1],
                        edited.color[2],
                        edited.color[3],
                    );
                    ui.horizontal(|ui| {
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
                    });
                    if metadata_changed {
                        actions.metadata_update = Some(edited);
                    }
                    ui.separator();
                    if manifest_entries.is_empty() {
                        ui.small("Manifest lists no tool libraries.");
                    } else {
                        ui.label("Manifest libraries");
                        for (name, enabled) in &manifest_entries {
                            let mut on = *enabled;
                            if ui.checkbox(&mut on, name).changed() {
                                actions.toggle_manifest = Some((name.clone(), on));
                            }
                        }
                        ui.small("Library changes apply on restart.");
                    }
                    if let Some(error) = manifest_error.as_deref() {
                        ui.colored_label(
                            egui::Color32::from_rgb(220, 120, 120),
                            format!("Manifest: {error}"),
                        );
                    }
                    for failure in &load_failures {
                        ui.colored_label(egui::Color32::from_rgb(220, 180, 80), failure);
                    }
                    ui.separator();
                    if popup_open {
                        if ui.button("Close palette window").clicked() {
                            actions.close_popup = true;
                        }
                    } else if ui.button("Open palette window").clicked() {
                        actions.open_popup = true;
                    }
                    if let Some(reason) = popup_blocked.as_deref() {
                        ui.colored_label(
                            egui::Color32::from_rgb(220, 120, 120),
                            format!("Popup blocked: {reason}"),
                        );
                    }
                });

                egui::CollapsingHeader::new("Preview").default_open(true).show(ui, |ui| {
                    ui.horizontal(|ui| {
                        ui.label("Asset:");
                        ui.text_edit_singleline(&mut asset_path_input);
                    });
                    ui.horizontal(|ui| {
                        if ui.button("Load").clicked() {
                            actions.load_asset = true;
                        }
                        if preview_loading {
                            ui.spinner();
                        }
                        if ui.button("Reset camera").clicked() {
                            actions.reset_camera = true;
                        }
                    });
                    ui.label(&preview_status);
                    ui.label(format!("Lighting: {lighting_label}"));
                    let mut selected_environment = active_environment.clone();
                    let current_label = environment_options
                        .iter()
                        .find(|(key, _)| key == &selected_environment)
                        .map(|(_, label)| label.as_str())
                        .unwrap_or(selected_environment.as_str());
                    egui::ComboBox::from_id_salt("environment_select")
                        .selected_text(current_label)
                        .show_ui(ui, |ui| {
                            for (key, label) in environment_options.iter() {
                                ui.selectable_value(&mut selected_environment, key.clone(), label);
                            }
                        });
                    if selected_environment != active_environment {
                        actions.environment_selection = Some(selected_environment);
                    }
                    ui.checkbox(&mut auto_reload, "Reload on file change");
                });

                let events_header = if recent_events.is_empty() {
                    "Events".to_string()
                } else {
                    format!("Events ({})", recent_events.len())
                };
                egui::CollapsingHeader::new(events_header).default_open(false).show(ui, |ui| {
                    if recent_events.is_empty() {
                        ui.small("No events yet.");
                    } else {
                        for entry in recent_events.iter().rev() {
                            ui.small(entry);
                        }
                        if ui.button("Clear").clicked() {
                            actions.clear_events = true;
                        }
                    }
                });
            });
        });
    });

    EditorUiOutput {
        full_output,
        actions,
        mask,
        selected_texture,
        selected_face,
        asset_path_input,
        auto_reload,
        vsync_request,
    }
}
