use serde_json::json;
use shrike_inspector::app::{ToolCanvas, ToolHost};
use shrike_inspector::config::ToolsConfig;
use shrike_inspector::events::{EventBus, InspectorEvent};
use shrike_inspector::extraction::EditSuppressor;
use shrike_inspector::tools::{ToolMetadata, ToolRegistry};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

fn write_manifest(dir: &Path, plugin_path: &Path) -> PathBuf {
    let manifest_path = dir.join("tools.json");
    let manifest_json = json!({
        "tools": [{
            "name": "flood_fill",
            "path": plugin_path.to_string_lossy(),
            "enabled": true,
            "min_host_api": 1
        }]
    });
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest_json).unwrap())
        .expect("manifest written");
    manifest_path
}

#[test]
fn dynamic_libraries_register_through_the_manifest() {
    let plugin_path = build_flood_fill_plugin();
    let dir = tempdir().expect("temp manifest dir");
    let manifest_path = write_manifest(dir.path(), &plugin_path);

    let host = ToolHost::new(&ToolsConfig { manifest: manifest_path });
    assert!(host.load_failures().is_empty(), "load failures: {:?}", host.load_failures());
    let names: Vec<String> = host.descriptors().into_iter().map(|d| d.name).collect();
    assert!(names.contains(&"flood_fill".to_string()), "descriptors: {names:?}");
    assert!(host.is_dynamic("flood_fill"));
    assert!(!host.is_dynamic("pencil"), "builtins keep their origin");
}

#[test]
fn loaded_tools_paint_the_canvas() {
    let plugin_path = build_flood_fill_plugin();
    let dir = tempdir().expect("temp manifest dir");
    let manifest_path = write_manifest(dir.path(), &plugin_path);

    let mut host = ToolHost::new(&ToolsConfig { manifest: manifest_path });
    let mut canvas = ToolCanvas::new();
    canvas.install("extract".to_string(), 4, 4, vec![255; 4 * 4 * 4]);
    canvas.set_metadata(ToolMetadata { color: [200, 40, 40, 255], opacity: 1.0 });
    let mut events = EventBus::default();
    let suppressor = EditSuppressor::new();

    host.activate("flood_fill", &mut canvas, &mut events);
    let drained = events.drain();
    assert!(
        drained
            .iter()
            .any(|event| matches!(event, InspectorEvent::ToolActivated { name } if name == "flood_fill")),
        "activation event missing: {drained:?}"
    );

    let before = canvas.revision();
    host.fill(&mut canvas, 1, 1, &suppressor);
    assert!(canvas.revision() > before, "fill should request a re-upload");
    assert!(
        canvas.pixels().chunks_exact(4).all(|px| px == [200, 40, 40, 255]),
        "flood fill should replace the whole uniform region"
    );
}

#[test]
fn duplicate_library_names_are_rejected() {
    let plugin_path = build_flood_fill_plugin();
    let mut registry = ToolRegistry::new();
    registry.load_library(&plugin_path).expect("first load succeeds");
    let err = registry.load_library(&plugin_path).expect_err("second load duplicates the name");
    assert!(err.to_string().contains("already registered"), "unexpected error: {err:#}");
}

fn build_flood_fill_plugin() -> PathBuf {
    let project_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let plugin_dir = project_root.join("tools").join("flood_fill");
    let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let artifact = plugin_dir.join("target").join("debug").join(library_file_name("flood_fill"));
    if !artifact.exists() {
        let status = Command::new(&cargo)
            .args(["build", "--offline"])
            .current_dir(&plugin_dir)
            .status()
            .expect("cargo build flood_fill");
        assert!(status.success(), "building the flood_fill plugin failed");
    }
    assert!(artifact.exists(), "flood_fill artifact missing at {}", artifact.display());
    artifact
}

fn library_file_name(name: &str) -> String {
    format!("{}{}{}", std::env::consts::DLL_PREFIX, name, std::env::consts::DLL_SUFFIX)
}
