use crate::config::ToolsConfig;
use crate::events::{EventBus, InspectorEvent};
use crate::extraction::EditSuppressor;
use crate::tools::{
    PointerSample, Tool, ToolContext, ToolDescriptor, ToolManifest, ToolMetadata, ToolRegistry,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// The editable pixel canvas the tools operate on. Extraction results are
/// installed here; the UI re-uploads the pixels whenever `revision` changes.
pub struct ToolCanvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    metadata: ToolMetadata,
    source: Option<String>,
    revision: u64,
}

impl ToolCanvas {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            pixels: Vec::new(),
            metadata: ToolMetadata::default(),
            source: None,
            revision: 0,
        }
    }

    pub fn install(&mut self, source: String, width: u32, height: u32, pixels: Vec<u8>) {
        debug_assert_eq!(pixels.len(), (width as usize) * (height as usize) * 4);
        self.width = width;
        self.height = height;
        self.pixels = pixels;
        self.source = Some(source);
        self.revision += 1;
    }

    pub fn has_content(&self) -> bool {
        !self.pixels.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn metadata(&self) -> ToolMetadata {
        self.metadata
    }

    pub fn set_metadata(&mut self, metadata: ToolMetadata) {
        self.metadata = metadata;
    }

    /// Runs `f` against a scoped [`ToolContext`]. A requested update bumps the
    /// canvas revision so the UI re-uploads.
    pub fn edit<R>(&mut self, f: impl FnOnce(&mut ToolContext<'_>) -> R) -> R {
        let mut metadata = self.metadata;
        let mut ctx = ToolContext::new(self.width, self.height, &mut self.pixels, &mut metadata);
        let out = f(&mut ctx);
        let updated = ctx.update_requested();
        self.metadata = metadata;
        if updated {
            self.revision += 1;
        }
        out
    }
}

impl Default for ToolCanvas {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the tool registry, the startup manifest and the event plumbing around
/// tool switches.
pub struct ToolHost {
    registry: ToolRegistry,
    manifest: ToolManifest,
    manifest_path: PathBuf,
    manifest_error: Option<String>,
    load_failures: Vec<String>,
}

impl ToolHost {
    pub fn new(config: &ToolsConfig) -> Self {
        let manifest_path = config.manifest.clone();
        let mut registry = ToolRegistry::new();
        for tool in builtin_tools() {
            if let Err(err) = registry.register(tool) {
                eprintln!("[tool] builtin registration failed: {err:?}");
            }
        }
        let mut manifest_error = None;
        let mut load_failures = Vec::new();
        let manifest = match ToolManifest::from_path(&manifest_path) {
            Ok(Some(manifest)) => {
                let dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
                load_failures = registry.load_from_manifest(&manifest, dir);
                manifest
            }
            Ok(None) => ToolManifest::default(),
            Err(err) => {
                eprintln!("[tool] manifest '{}' unreadable: {err:?}", manifest_path.display());
                manifest_error = Some(format!("{err:#}"));
                ToolManifest::default()
            }
        };
        Self { registry, manifest, manifest_path, manifest_error, load_failures }
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.registry.active_name()
    }

    pub fn is_dynamic(&self, name: &str) -> bool {
        self.registry.is_dynamic(name)
    }

    pub fn manifest(&self) -> &ToolManifest {
        &self.manifest
    }

    pub fn manifest_error(&self) -> Option<&str> {
        self.manifest_error.as_deref()
    }

    pub fn load_failures(&self) -> &[String] {
        &self.load_failures
    }

    pub fn activate(&mut self, name: &str, canvas: &mut ToolCanvas, events: &mut EventBus) {
        let previous = self.registry.active_name().map(|n| n.to_string());
        if previous.as_deref() == Some(name) {
            return;
        }
        let result = canvas.edit(|ctx| self.registry.activate(name, ctx));
        match result {
            Ok(()) => {
                if let Some(prev) = previous {
                    events.push(InspectorEvent::ToolDeactivated { name: prev });
                }
                events.push(InspectorEvent::ToolActivated { name: name.to_string() });
            }
            Err(err) => {
                eprintln!("[tool] activating '{name}' failed: {err:?}");
                events.push(InspectorEvent::ToolMessage {
                    tool: name.to_string(),
                    message: format!("activation failed: {err:#}"),
                });
            }
        }
    }

    pub fn deactivate(&mut self, canvas: &mut ToolCanvas, events: &mut EventBus) {
        if let Some(name) = self.registry.active_name().map(|n| n.to_string()) {
            canvas.edit(|ctx| self.registry.deactivate(ctx));
            events.push(InspectorEvent::ToolDeactivated { name });
        }
    }

    /// Routes a pointer sample to the active tool. Samples arriving while an
    /// extraction attempt holds the suppression guard are dropped.
    pub fn pointer(&mut self, canvas: &mut ToolCanvas, sample: PointerSample, suppressor: &EditSuppressor) {
        if suppressor.is_suppressed() || !canvas.has_content() {
            return;
        }
        canvas.edit(|ctx| self.registry.pointer(ctx, sample));
    }

    pub fn fill(&mut self, canvas: &mut ToolCanvas, x: u32, y: u32, suppressor: &EditSuppressor) {
        if suppressor.is_suppressed() || !canvas.has_content() {
            return;
        }
        canvas.edit(|ctx| self.registry.fill(ctx, x, y));
    }

    /// Persists an enabled-flag change. Library load state changes on the next
    /// startup.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        match self.manifest.set_enabled(name, enabled) {
            None => anyhow::bail!("manifest has no entry named '{name}'"),
            Some(false) => Ok(()),
            Some(true) => self
                .manifest
                .save_to(&self.manifest_path)
                .with_context(|| format!("saving {}", self.manifest_path.display())),
        }
    }

    pub fn teardown(&mut self, canvas: &mut ToolCanvas, events: &mut EventBus) {
        self.deactivate(canvas, events);
        canvas.edit(|ctx| {
            self.registry.unload_dynamic(ctx);
        });
    }
}

fn builtin_tools() -> Vec<Box<dyn Tool>> {
    vec![Box::new(PencilTool), Box::new(EyedropperTool)]
}

/// Stamps a 3x3 block of the brush color, blended by the brush opacity.
struct PencilTool;

impl Tool for PencilTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor { name: "pencil".to_string(), icon: "P".to_string() }
    }

    fn pointer(&mut self, ctx: &mut ToolContext<'_>, sample: PointerSample) -> Result<()> {
        if !sample.pressed {
            return Ok(());
        }
        let meta = ctx.metadata();
        let opacity = meta.opacity.clamp(0.0, 1.0);
        if opacity <= 0.0 {
            return Ok(());
        }
        let (width, height) = (ctx.width(), ctx.height());
        let pixels = ctx.pixels_mut();
        let mut touched = false;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let x = sample.x as i64 + dx;
                let y = sample.y as i64 + dy;
                if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                    continue;
                }
                let idx = ((y as usize) * (width as usize) + x as usize) * 4;
                for channel in 0..3 {
                    let dst = pixels[idx + channel] as f32;
                    let src = meta.color[channel] as f32;
                    pixels[idx + channel] = (dst + (src - dst) * opacity).round() as u8;
                }
                pixels[idx + 3] = 255;
                touched = true;
            }
        }
        if touched {
            ctx.request_update();
        }
        Ok(())
    }
}

/// Copies the pressed pixel's color into the brush metadata.
struct EyedropperTool;

impl Tool for EyedropperTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor { name: "eyedropper".to_string(), icon: "E".to_string() }
    }

    fn pointer(&mut self, ctx: &mut ToolContext<'_>, sample: PointerSample) -> Result<()> {
        if !sample.pressed || sample.x >= ctx.width() || sample.y >= ctx.height() {
            return Ok(());
        }
        let idx = ((sample.y as usize) * (ctx.width() as usize) + sample.x as usize) * 4;
        let pixels = ctx.pixels();
        let color = [pixels[idx], pixels[idx + 1], pixels[idx + 2], pixels[idx + 3]];
        let mut meta = ctx.metadata();
        meta.color = color;
        ctx.set_metadata(meta);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolManifestEntry;

    fn host_with_temp_manifest(dir: &tempfile::TempDir) -> ToolHost {
        let config = ToolsConfig { manifest: dir.path().join("tools.json") };
        ToolHost::new(&config)
    }

    fn white_canvas(width: u32, height: u32) -> ToolCanvas {
        let mut canvas = ToolCanvas::new();
        canvas.install("test".to_string(), width, height, vec![255; (width * height * 4) as usize]);
        canvas
    }

    #[test]
    fn pencil_blends_toward_the_brush_color() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut host = host_with_temp_manifest(&dir);
        let mut canvas = white_canvas(4, 4);
        canvas.set_metadata(ToolMetadata { color: [255, 0, 0, 255], opacity: 1.0 });
        let mut events = EventBus::default();
        host.activate("pencil", &mut canvas, &mut events);

        let suppressor = EditSuppressor::default();
        let before = canvas.revision();
        host.pointer(&mut canvas, PointerSample { x: 1, y: 1, pressed: true }, &suppressor);

        let idx = (1 * 4 + 1) * 4;
        assert_eq!(&canvas.pixels()[idx..idx + 4], &[255, 0, 0, 255]);
        assert!(canvas.revision() > before, "pencil edits bump the revision");
    }

    #[test]
    fn pencil_ignores_unpressed_samples() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut host = host_with_temp_manifest(&dir);
        let mut canvas = white_canvas(4, 4);
        canvas.set_metadata(ToolMetadata { color: [0, 0, 0, 255], opacity: 1.0 });
        let mut events = EventBus::default();
        host.activate("pencil", &mut canvas, &mut events);

        let suppressor = EditSuppressor::default();
        let before = canvas.revision();
        host.pointer(&mut canvas, PointerSample { x: 1, y: 1, pressed: false }, &suppressor);
        assert_eq!(canvas.revision(), before);
        assert!(canvas.pixels().iter().all(|&b| b == 255));
    }

    #[test]
    fn eyedropper_reads_the_pressed_pixel_into_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut host = host_with_temp_manifest(&dir);
        let mut canvas = ToolCanvas::new();
        let mut pixels = vec![0u8; 2 * 2 * 4];
        pixels[4..8].copy_from_slice(&[10, 20, 30, 40]);
        canvas.install("test".to_string(), 2, 2, pixels);
        let mut events = EventBus::default();
        host.activate("eyedropper", &mut canvas, &mut events);

        let suppressor = EditSuppressor::default();
        host.pointer(&mut canvas, PointerSample { x: 1, y: 0, pressed: true }, &suppressor);
        assert_eq!(canvas.metadata().color, [10, 20, 30, 40]);
    }

    #[test]
    fn suppression_drops_pointer_samples() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut host = host_with_temp_manifest(&dir);
        let mut canvas = white_canvas(2, 2);
        canvas.set_metadata(ToolMetadata { color: [0, 0, 0, 255], opacity: 1.0 });
        let mut events = EventBus::default();
        host.activate("pencil", &mut canvas, &mut events);

        let suppressor = EditSuppressor::default();
        let _guard = suppressor.hold();
        host.pointer(&mut canvas, PointerSample { x: 0, y: 0, pressed: true }, &suppressor);
        assert!(canvas.pixels().iter().all(|&b| b == 255), "held guard blocks edits");
    }

    #[test]
    fn switching_tools_emits_lifecycle_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut host = host_with_temp_manifest(&dir);
        let mut canvas = white_canvas(2, 2);
        let mut events = EventBus::default();

        host.activate("pencil", &mut canvas, &mut events);
        host.activate("pencil", &mut canvas, &mut events);
        host.activate("eyedropper", &mut canvas, &mut events);

        let drained = events.drain();
        let summary: Vec<String> = drained
            .iter()
            .map(|event| match event {
                InspectorEvent::ToolActivated { name } => format!("+{name}"),
                InspectorEvent::ToolDeactivated { name } => format!("-{name}"),
                other => format!("?{other}"),
            })
            .collect();
        assert_eq!(summary, ["+pencil", "-pencil", "+eyedropper"]);
    }

    #[test]
    fn enabling_unknown_manifest_entries_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut host = host_with_temp_manifest(&dir);
        assert!(host.set_enabled("missing", true).is_err());
    }

    #[test]
    fn manifest_toggles_survive_a_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ToolsConfig { manifest: dir.path().join("tools.json") };
        let seed = ToolManifest {
            tools: vec![ToolManifestEntry {
                name: "sketch".to_string(),
                path: "libsketch.so".to_string(),
                enabled: false,
                min_host_api: None,
            }],
        };
        seed.save_to(&config.manifest).expect("seed manifest");

        let mut host = ToolHost::new(&config);
        assert!(host.load_failures().is_empty(), "disabled entries must not load");
        host.set_enabled("sketch", true).expect("toggle saves");
        host.set_enabled("sketch", true).expect("no-op toggle is fine");

        let reopened = ToolHost::new(&config);
        assert!(reopened.manifest().tools[0].enabled);
        assert_eq!(reopened.load_failures().len(), 1, "enabled entry now attempts to load");
    }
}
