use anyhow::{anyhow, bail, Context, Result};
use libloading::Library;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::ptr;

pub const TOOL_PLUGIN_API_VERSION: u32 = 1;
pub const TOOL_ENTRY_SYMBOL: &[u8] = b"shrike_tool_entry\0";

/// Brush state shared between the picker UI and the active tool.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToolMetadata {
    pub color: [u8; 4],
    pub opacity: f32,
}

impl Default for ToolMetadata {
    fn default() -> Self {
        Self { color: [255, 255, 255, 255], opacity: 1.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: String,
    pub icon: String,
}

#[derive(Clone, Copy, Debug)]
pub struct PointerSample {
    pub x: u32,
    pub y: u32,
    pub pressed: bool,
}

/// The complete capability set a tool hook receives: the canvas, its size,
/// the brush metadata and an update-request flag. Tools get nothing else from
/// the host.
pub struct ToolContext<'a> {
    width: u32,
    height: u32,
    pixels: &'a mut [u8],
    metadata: &'a mut ToolMetadata,
    update_requested: bool,
}

impl<'a> ToolContext<'a> {
    pub fn new(width: u32, height: u32, pixels: &'a mut [u8], metadata: &'a mut ToolMetadata) -> Self {
        Self { width, height, pixels, metadata, update_requested: false }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.pixels
    }

    pub fn metadata(&self) -> ToolMetadata {
        *self.metadata
    }

    pub fn set_metadata(&mut self, metadata: ToolMetadata) {
        *self.metadata = metadata;
    }

    /// Asks the host to re-upload the canvas after this hook returns.
    pub fn request_update(&mut self) {
        self.update_requested = true;
    }

    pub fn update_requested(&self) -> bool {
        self.update_requested
    }
}

pub trait Tool {
    fn descriptor(&self) -> ToolDescriptor;

    fn setup(&mut self, _ctx: &mut ToolContext<'_>) -> Result<()> {
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &mut ToolContext<'_>) -> Result<()> {
        Ok(())
    }

    fn fill(&mut self, _ctx: &mut ToolContext<'_>, _x: u32, _y: u32) -> Result<()> {
        Ok(())
    }

    fn pointer(&mut self, _ctx: &mut ToolContext<'_>, _sample: PointerSample) -> Result<()> {
        Ok(())
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ToolHandle {
    data: *mut (),
    vtable: *mut (),
}

impl ToolHandle {
    pub const fn null() -> Self {
        Self { data: ptr::null_mut(), vtable: ptr::null_mut() }
    }

    pub fn is_null(&self) -> bool {
        self.data.is_null() || self.vtable.is_null()
    }

    pub unsafe fn from_box(tool: Box<dyn Tool>) -> Self {
        Self::from_raw(Box::into_raw(tool))
    }

    pub unsafe fn from_raw(raw: *mut dyn Tool) -> Self {
        let erased: (*mut (), *mut ()) = mem::transmute(raw);
        Self { data: erased.0, vtable: erased.1 }
    }

    pub unsafe fn into_raw(self) -> *mut dyn Tool {
        mem::transmute((self.data, self.vtable))
    }

    pub unsafe fn into_box(self) -> Box<dyn Tool> {
        Box::from_raw(self.into_raw())
    }
}

pub type ToolEntryFn = unsafe extern "C" fn() -> ToolExport;
pub type ToolCreateFn = unsafe extern "C" fn() -> ToolHandle;

#[repr(C)]
pub struct ToolExport {
    pub api_version: u32,
    pub create: ToolCreateFn,
}

struct ToolSlot {
    descriptor: ToolDescriptor,
    // The instance must drop before the library that provides its code.
    tool: Box<dyn Tool>,
    origin: ToolOrigin,
}

enum ToolOrigin {
    BuiltIn,
    Dynamic(Library),
}

impl ToolOrigin {
    fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }
}

/// Installed tools plus the single active slot. Switching tools tears the
/// previous one down exactly once before the next one's setup runs.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<ToolSlot>,
    active: Option<usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<ToolDescriptor> {
        let descriptor = tool.descriptor();
        if self.tools.iter().any(|slot| slot.descriptor.name == descriptor.name) {
            bail!("Tool '{}' is already registered", descriptor.name);
        }
        self.tools.push(ToolSlot { descriptor: descriptor.clone(), tool, origin: ToolOrigin::BuiltIn });
        Ok(descriptor)
    }

    pub fn load_library(&mut self, path: &Path) -> Result<ToolDescriptor> {
        let bytes =
            fs::read(path).with_context(|| format!("reading tool library '{}'", path.display()))?;
        let fingerprint = blake3::hash(&bytes);
        println!("[tool] loading '{}' (blake3 {})", path.display(), fingerprint.to_hex());

        let library = unsafe {
            Library::new(path).with_context(|| format!("loading tool library '{}'", path.display()))?
        };
        let entry_fn = unsafe {
            library.get::<ToolEntryFn>(TOOL_ENTRY_SYMBOL).with_context(|| {
                format!("resolving 'shrike_tool_entry' in '{}'", path.display())
            })?
        };
        let export = unsafe { entry_fn() };
        drop(entry_fn);

        if export.api_version != TOOL_PLUGIN_API_VERSION {
            bail!(
                "api mismatch: library targets v{}, host exports v{TOOL_PLUGIN_API_VERSION}",
                export.api_version
            );
        }
        let handle = unsafe { (export.create)() };
        if handle.is_null() {
            bail!("tool library '{}' returned a null handle", path.display());
        }
        let tool = unsafe { handle.into_box() };

        let descriptor = tool.descriptor();
        if self.tools.iter().any(|slot| slot.descriptor.name == descriptor.name) {
            bail!("Tool '{}' is already registered", descriptor.name);
        }
        self.tools.push(ToolSlot {
            descriptor: descriptor.clone(),
            tool,
            origin: ToolOrigin::Dynamic(library),
        });
        Ok(descriptor)
    }

    /// Loads every enabled manifest entry, resolving relative paths against
    /// `manifest_dir`. Per-entry failures are logged and returned as display
    /// strings; loading continues past them.
    pub fn load_from_manifest(&mut self, manifest: &ToolManifest, manifest_dir: &Path) -> Vec<String> {
        let mut failures = Vec::new();
        for entry in &manifest.tools {
            if !entry.enabled {
                continue;
            }
            if let Err(err) = self.load_manifest_entry(entry, manifest_dir) {
                eprintln!("[tool:{}] failed to load: {err:?}", entry.name);
                failures.push(format!("{}: {err:#}", entry.name));
            }
        }
        failures
    }

    fn load_manifest_entry(&mut self, entry: &ToolManifestEntry, manifest_dir: &Path) -> Result<()> {
        if let Some(min_host_api) = entry.min_host_api {
            if TOOL_PLUGIN_API_VERSION < min_host_api {
                bail!(
                    "requires host tool API {min_host_api}, current version is {TOOL_PLUGIN_API_VERSION}"
                );
            }
        }
        let library_path = if Path::new(&entry.path).is_absolute() {
            PathBuf::from(&entry.path)
        } else {
            manifest_dir.join(&entry.path)
        };
        self.load_library(&library_path)?;
        Ok(())
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|slot| slot.descriptor.clone()).collect()
    }

    pub fn is_dynamic(&self, name: &str) -> bool {
        self.tools
            .iter()
            .any(|slot| slot.descriptor.name == name && slot.origin.is_dynamic())
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.map(|index| self.tools[index].descriptor.name.as_str())
    }

    /// Activates `name`. The previous tool's cleanup runs exactly once before
    /// the next tool's setup; re-activating the active tool is a no-op. A
    /// failed setup leaves no tool active.
    pub fn activate(&mut self, name: &str, ctx: &mut ToolContext<'_>) -> Result<()> {
        let next = self
            .tools
            .iter()
            .position(|slot| slot.descriptor.name == name)
            .ok_or_else(|| anyhow!("Unknown tool '{name}'"))?;
        if self.active == Some(next) {
            return Ok(());
        }
        if let Some(prev) = self.active.take() {
            let prev_name = self.tools[prev].descriptor.name.clone();
            if let Err(err) = self.tools[prev].tool.cleanup(ctx) {
                eprintln!("[tool:{prev_name}] cleanup failed: {err:?}");
            }
        }
        self.tools[next]
            .tool
            .setup(ctx)
            .with_context(|| format!("Tool '{name}' setup failed"))?;
        self.active = Some(next);
        Ok(())
    }

    pub fn deactivate(&mut self, ctx: &mut ToolContext<'_>) {
        if let Some(index) = self.active.take() {
            let name = self.tools[index].descriptor.name.clone();
            if let Err(err) = self.tools[index].tool.cleanup(ctx) {
                eprintln!("[tool:{name}] cleanup failed: {err:?}");
            }
        }
    }

    /// Routes one pointer sample to the active tool, if any.
    pub fn pointer(&mut self, ctx: &mut ToolContext<'_>, sample: PointerSample) {
        if let Some(index) = self.active {
            let name = self.tools[index].descriptor.name.clone();
            if let Err(err) = self.tools[index].tool.pointer(ctx, sample) {
                eprintln!("[tool:{name}] pointer hook failed: {err:?}");
            }
        }
    }

    pub fn fill(&mut self, ctx: &mut ToolContext<'_>, x: u32, y: u32) {
        if let Some(index) = self.active {
            let name = self.tools[index].descriptor.name.clone();
            if let Err(err) = self.tools[index].tool.fill(ctx, x, y) {
                eprintln!("[tool:{name}] fill failed: {err:?}");
            }
        }
    }

    /// Drops every dynamic tool (instances before their libraries), cleaning
    /// up the active one first when it is dynamic. Returns the removed count.
    pub fn unload_dynamic(&mut self, ctx: &mut ToolContext<'_>) -> usize {
        if let Some(index) = self.active {
            if self.tools[index].origin.is_dynamic() {
                self.deactivate(ctx);
            }
        }
        let active_name = self.active_name().map(str::to_string);
        let before = self.tools.len();
        self.tools.retain(|slot| !slot.origin.is_dynamic());
        self.active =
            active_name.and_then(|name| self.tools.iter().position(|s| s.descriptor.name == name));
        before - self.tools.len()
    }
}

impl Drop for ToolRegistry {
    fn drop(&mut self) {
        self.tools.clear();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolManifest {
    #[serde(default)]
    pub tools: Vec<ToolManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifestEntry {
    pub name: String,
    pub path: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub min_host_api: Option<u32>,
}

impl ToolManifest {
    /// Reads a manifest, treating a missing file as "no manifest" rather than
    /// an error.
    pub fn from_path(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let manifest = serde_json::from_str(&contents)
                    .with_context(|| format!("parsing tool manifest '{}'", path.display()))?;
                Ok(Some(manifest))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(anyhow!(err).context(format!("reading tool manifest '{}'", path.display())))
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("serializing tool manifest")?;
        fs::write(path, contents)
            .with_context(|| format!("writing tool manifest '{}'", path.display()))
    }

    /// Flips the `enabled` flag of the named entry. Returns whether anything
    /// changed, or `None` when no entry has that name.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Option<bool> {
        let entry = self.tools.iter_mut().find(|entry| entry.name == name)?;
        let changed = entry.enabled != enabled;
        entry.enabled = enabled;
        Some(changed)
    }
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::tempdir;

    struct ScriptedTool {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl ScriptedTool {
        fn boxed(name: &'static str, log: &Rc<RefCell<Vec<String>>>) -> Box<dyn Tool> {
            Box::new(Self { name, log: log.clone() })
        }
    }

    impl Tool for ScriptedTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor { name: self.name.to_string(), icon: "*".to_string() }
        }

        fn setup(&mut self, _ctx: &mut ToolContext<'_>) -> Result<()> {
            self.log.borrow_mut().push(format!("{}.setup", self.name));
            Ok(())
        }

        fn cleanup(&mut self, _ctx: &mut ToolContext<'_>) -> Result<()> {
            self.log.borrow_mut().push(format!("{}.cleanup", self.name));
            Ok(())
        }

        fn pointer(&mut self, _ctx: &mut ToolContext<'_>, sample: PointerSample) -> Result<()> {
            self.log.borrow_mut().push(format!("{}.pointer {},{}", self.name, sample.x, sample.y));
            Ok(())
        }
    }

    fn test_canvas() -> (Vec<u8>, ToolMetadata) {
        (vec![0u8; 4 * 4 * 4], ToolMetadata::default())
    }

    #[test]
    fn switching_cleans_up_the_previous_tool_exactly_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        registry.register(ScriptedTool::boxed("brush", &log)).expect("register brush");
        registry.register(ScriptedTool::boxed("stamp", &log)).expect("register stamp");

        let (mut pixels, mut metadata) = test_canvas();
        let mut ctx = ToolContext::new(4, 4, &mut pixels, &mut metadata);
        registry.activate("brush", &mut ctx).expect("activate brush");
        registry.activate("stamp", &mut ctx).expect("activate stamp");

        let entries = log.borrow().clone();
        assert_eq!(entries, vec!["brush.setup", "brush.cleanup", "stamp.setup"]);
        let cleanups = entries.iter().filter(|line| line.ends_with("cleanup")).count();
        assert_eq!(cleanups, 1);
        assert_eq!(registry.active_name(), Some("stamp"));
    }

    #[test]
    fn reactivating_the_active_tool_is_a_no_op() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        registry.register(ScriptedTool::boxed("brush", &log)).expect("register brush");

        let (mut pixels, mut metadata) = test_canvas();
        let mut ctx = ToolContext::new(4, 4, &mut pixels, &mut metadata);
        registry.activate("brush", &mut ctx).expect("first activate");
        registry.activate("brush", &mut ctx).expect("second activate");
        assert_eq!(log.borrow().as_slice(), ["brush.setup"]);
    }

    #[test]
    fn register_returns_the_descriptor_and_rejects_duplicates() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        let descriptor = registry.register(ScriptedTool::boxed("brush", &log)).expect("register");
        assert_eq!(descriptor.name, "brush");
        assert_eq!(descriptor.icon, "*");
        let err = registry.register(ScriptedTool::boxed("brush", &log)).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn pointer_samples_reach_only_the_active_tool() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        registry.register(ScriptedTool::boxed("brush", &log)).expect("register brush");
        registry.register(ScriptedTool::boxed("stamp", &log)).expect("register stamp");

        let (mut pixels, mut metadata) = test_canvas();
        let mut ctx = ToolContext::new(4, 4, &mut pixels, &mut metadata);
        registry.pointer(&mut ctx, PointerSample { x: 0, y: 0, pressed: true });
        assert!(log.borrow().is_empty(), "no samples without an active tool");

        registry.activate("brush", &mut ctx).expect("activate brush");
        registry.pointer(&mut ctx, PointerSample { x: 2, y: 3, pressed: true });
        let entries = log.borrow().clone();
        assert!(entries.contains(&"brush.pointer 2,3".to_string()));
        assert!(!entries.iter().any(|line| line.starts_with("stamp.pointer")));
    }

    #[test]
    fn context_reports_update_requests() {
        let (mut pixels, mut metadata) = test_canvas();
        let mut ctx = ToolContext::new(4, 4, &mut pixels, &mut metadata);
        assert!(!ctx.update_requested());
        ctx.request_update();
        assert!(ctx.update_requested());
        ctx.set_metadata(ToolMetadata { color: [1, 2, 3, 4], opacity: 0.5 });
        assert_eq!(ctx.metadata().color, [1, 2, 3, 4]);
    }

    #[test]
    fn null_handles_are_detected() {
        assert!(ToolHandle::null().is_null());
    }

    #[test]
    fn missing_library_files_error_with_the_path() {
        let mut registry = ToolRegistry::new();
        let err = registry.load_library(Path::new("/nonexistent/libmissing.so")).unwrap_err();
        assert!(err.to_string().contains("libmissing.so"));
    }

    #[test]
    fn manifest_round_trips_and_toggles() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("tools.json");
        let manifest = ToolManifest {
            tools: vec![ToolManifestEntry {
                name: "flood_fill".to_string(),
                path: "libflood_fill.so".to_string(),
                enabled: true,
                min_host_api: Some(1),
            }],
        };
        manifest.save_to(&path).expect("save manifest");

        let mut reloaded = ToolManifest::from_path(&path).expect("read").expect("present");
        assert_eq!(reloaded.tools.len(), 1);
        assert_eq!(reloaded.set_enabled("flood_fill", false), Some(true));
        assert_eq!(reloaded.set_enabled("flood_fill", false), Some(false), "no change reported twice");
        assert_eq!(reloaded.set_enabled("ghost", true), None);
        reloaded.save_to(&path).expect("save again");

        let persisted = ToolManifest::from_path(&path).expect("read").expect("present");
        assert!(!persisted.tools[0].enabled);
        assert!(ToolManifest::from_path(&dir.path().join("absent.json")).expect("read").is_none());
    }

    #[test]
    fn manifest_entries_gate_on_host_api() {
        let dir = tempdir().expect("temp dir");
        let mut registry = ToolRegistry::new();
        let manifest = ToolManifest {
            tools: vec![ToolManifestEntry {
                name: "future".to_string(),
                path: "libfuture.so".to_string(),
                enabled: true,
                min_host_api: Some(TOOL_PLUGIN_API_VERSION + 1),
            }],
        };
        let failures = registry.load_from_manifest(&manifest, dir.path());
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("future"), "failure names the entry: {}", failures[0]);
        assert!(registry.descriptors().is_empty());
    }
}
