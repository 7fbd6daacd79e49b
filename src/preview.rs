use anyhow::Result;
use glam::Vec3;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use crate::camera3d::{Camera3D, OrbitCamera};
use crate::environment::EnvironmentRegistry;
use crate::events::{EventBus, InspectorEvent};
use crate::mesh::{self, MeshImport};
use crate::renderer::{
    LightingMode, Renderer, SceneLightingState, DEFAULT_CLEAR_COLOR, ERROR_CLEAR_COLOR,
};

const PREVIEW_FOV_RADIANS: f32 = 60.0 * std::f32::consts::PI / 180.0;
const PREVIEW_NEAR: f32 = 0.1;
const PREVIEW_FAR: f32 = 1000.0;

struct AssetLoadResult {
    path: PathBuf,
    outcome: Result<MeshImport>,
}

#[derive(Clone)]
pub struct LoadedAssetSummary {
    pub path: PathBuf,
    pub subset_count: usize,
    pub has_pbr: bool,
    pub gltf_convention: bool,
}

/// The 3D preview: background asset loads, the scene slot, camera framing,
/// lighting choice and the render error heuristic. Loads are never aborted;
/// whichever import finishes last replaces the scene.
pub struct PreviewPane {
    results_tx: mpsc::Sender<AssetLoadResult>,
    results_rx: mpsc::Receiver<AssetLoadResult>,
    in_flight: usize,
    current: Option<LoadedAssetSummary>,
    orbit: OrbitCamera,
    home_orbit: OrbitCamera,
    lighting_mode: LightingMode,
    environment_key: Option<String>,
    status: String,
    issue_reported: bool,
}

impl PreviewPane {
    pub fn new() -> Self {
        let (results_tx, results_rx) = mpsc::channel();
        let orbit = OrbitCamera::new(Vec3::ZERO, 4.0);
        Self {
            results_tx,
            results_rx,
            in_flight: 0,
            current: None,
            home_orbit: orbit.clone(),
            orbit,
            lighting_mode: LightingMode::Basic,
            environment_key: None,
            status: "No asset loaded".to_string(),
            issue_reported: false,
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    pub fn loaded(&self) -> Option<&LoadedAssetSummary> {
        self.current.as_ref()
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|summary| summary.path.as_path())
    }

    pub fn lighting_mode(&self) -> LightingMode {
        self.lighting_mode
    }

    pub fn camera(&self) -> Camera3D {
        self.orbit.to_camera(PREVIEW_FOV_RADIANS, PREVIEW_NEAR, PREVIEW_FAR)
    }

    pub fn orbit_mut(&mut self) -> &mut OrbitCamera {
        &mut self.orbit
    }

    /// Puts the camera back on the framing computed for the current asset.
    pub fn reset_camera(&mut self) {
        self.orbit = self.home_orbit.clone();
    }

    pub fn environment_key(&self) -> Option<&str> {
        self.environment_key.as_deref()
    }

    /// Spawns a background import for `path`. An in-flight load keeps running.
    pub fn request_load(&mut self, path: &Path) {
        let display = path.display().to_string();
        self.status = format!("Loading {display}...");
        let tx = self.results_tx.clone();
        let path = path.to_path_buf();
        let spawn = thread::Builder::new().name("asset-load".to_string()).spawn(move || {
            let outcome = mesh::load_gltf_with_materials(&path);
            let _ = tx.send(AssetLoadResult { path, outcome });
        });
        match spawn {
            Ok(_) => self.in_flight += 1,
            Err(err) => {
                eprintln!("[asset] failed to spawn load thread: {err:?}");
                self.status = format!("Failed to start load of {display}");
            }
        }
    }

    /// Drains finished imports and applies them. Returns how many completions
    /// were handled.
    pub fn tick(&mut self, renderer: &mut Renderer, events: &mut EventBus) -> usize {
        let mut handled = 0;
        while let Ok(result) = self.results_rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            handled += 1;
            match result.outcome {
                Ok(import) => self.apply_import(result.path, import, renderer, events),
                Err(err) => {
                    let error = format!("{err:#}");
                    eprintln!("[asset] load of '{}' failed: {error}", result.path.display());
                    self.status = format!("Failed to load {}: {error}", result.path.display());
                    events.push(InspectorEvent::AssetLoadFailed { path: result.path, error });
                }
            }
        }
        handled
    }

    fn apply_import(
        &mut self,
        path: PathBuf,
        import: MeshImport,
        renderer: &mut Renderer,
        events: &mut EventBus,
    ) {
        // The previous scene stays installed until the replacement is built.
        if let Err(err) = renderer.install_scene(&import) {
            let error = format!("{err:#}");
            eprintln!("[asset] scene upload for '{}' failed: {error}", path.display());
            self.status = format!("Failed to load {}: {error}", path.display());
            events.push(InspectorEvent::AssetLoadFailed { path, error });
            return;
        }
        let gltf_convention = is_gltf_path(&path);
        let has_pbr = import.has_pbr_materials();
        self.orbit = OrbitCamera::frame_bounds(&import.mesh.bounds, gltf_convention);
        self.home_orbit = self.orbit.clone();
        self.lighting_mode = decide_lighting(gltf_convention, has_pbr);
        let subset_count = import.mesh.subsets.len();
        self.status = format!("Loaded {} ({subset_count} parts)", path.display());
        self.issue_reported = false;
        events.push(InspectorEvent::AssetLoaded { path: path.clone(), mesh_count: subset_count });
        self.current = Some(LoadedAssetSummary { path, subset_count, has_pbr, gltf_convention });
    }

    /// Per-frame lighting inputs. The environment maps are resolved through
    /// the registry so they are always available to bind.
    pub fn lighting_state(
        &self,
        renderer: &Renderer,
        environments: &mut EnvironmentRegistry,
    ) -> Result<SceneLightingState> {
        let (device, queue) = renderer.device_and_queue()?;
        let key = self
            .environment_key
            .clone()
            .unwrap_or_else(|| environments.default_key().to_string());
        let environment = environments.ensure_gpu(device, queue, &key)?;
        Ok(SceneLightingState {
            mode: self.lighting_mode,
            environment,
            light_direction: Vec3::new(-0.4, -1.0, -0.3),
            light_color: Vec3::splat(1.0),
            ambient_color: Vec3::splat(0.25),
            intensity: 1.0,
        })
    }

    /// Switches to a registry environment (`None` falls back to the built-in
    /// sky), adjusting retain counts.
    pub fn set_environment(
        &mut self,
        environments: &mut EnvironmentRegistry,
        key: Option<String>,
    ) -> Result<()> {
        if key == self.environment_key {
            return Ok(());
        }
        if let Some(new_key) = key.as_deref() {
            environments.retain(new_key)?;
        }
        if let Some(old) = self.environment_key.take() {
            environments.release(&old);
        }
        self.environment_key = key;
        Ok(())
    }

    /// Raises a scene-issue notification when the frame looks broken: a scene
    /// that produced no primitives against a red clear, or surface errors.
    /// A flagged scene keeps a red clear behind it until the issue goes away.
    pub fn run_error_heuristic(&mut self, renderer: &mut Renderer, events: &mut EventBus) {
        let clear = renderer.clear_color();
        let red_clear = clear.r > 0.5 && clear.g < 0.2 && clear.b < 0.2;
        let empty_scene = renderer.has_scene() && renderer.scene_subset_count() == 0;
        let broken = (empty_scene && red_clear) || renderer.error_count() > 0;
        if broken && !self.issue_reported {
            let detail = if empty_scene && red_clear {
                "scene has no primitives against a red clear".to_string()
            } else {
                format!("renderer reported {} surface errors", renderer.error_count())
            };
            eprintln!("[scene] issue detected: {detail}");
            events.push(InspectorEvent::SceneIssue { detail });
            renderer.set_clear_color(ERROR_CLEAR_COLOR);
            self.issue_reported = true;
        } else if !broken && self.issue_reported {
            renderer.set_clear_color(DEFAULT_CLEAR_COLOR);
            self.issue_reported = false;
        }
    }
}

impl Default for PreviewPane {
    fn default() -> Self {
        Self::new()
    }
}

fn decide_lighting(gltf_convention: bool, has_pbr: bool) -> LightingMode {
    if gltf_convention || has_pbr {
        LightingMode::Environment
    } else {
        LightingMode::Basic
    }
}

fn is_gltf_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()).map(|s| s.to_ascii_lowercase()).as_deref(),
        Some("gltf") | Some("glb")
    )
}
