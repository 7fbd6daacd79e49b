use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant};

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches the currently previewed asset file and reports a debounced reload
/// request once writes settle.
pub struct AssetWatcher {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    watched: Option<PathBuf>,
    last_change: Option<Instant>,
}

impl AssetWatcher {
    pub fn new() -> Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher
            .configure(
                NotifyConfig::default()
                    .with_compare_contents(false)
                    .with_poll_interval(Duration::from_millis(250)),
            )
            .context("configure asset watcher")?;
        Ok(Self { watcher, rx, watched: None, last_change: None })
    }

    /// Retargets the watcher at `path`, dropping the previous registration.
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        let normalized = normalize_watch_path(path);
        if self.watched.as_deref() == Some(normalized.as_path()) {
            return Ok(());
        }
        if let Some(previous) = self.watched.take() {
            if let Err(err) = self.watcher.unwatch(&previous) {
                eprintln!("[asset] unwatch of '{}' failed: {err}", previous.display());
            }
        }
        self.watcher
            .watch(&normalized, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", normalized.display()))?;
        self.watched = Some(normalized);
        self.last_change = None;
        Ok(())
    }

    pub fn watched(&self) -> Option<&Path> {
        self.watched.as_deref()
    }

    /// Returns the watched path once per burst of writes, after the debounce
    /// window has passed without further events.
    pub fn take_reload(&mut self) -> Option<PathBuf> {
        self.drain_events();
        self.take_reload_at(Instant::now())
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Ok(event) => {
                    if Self::is_relevant(&event.kind) {
                        self.note_change_at(Instant::now());
                    }
                }
                Err(err) => eprintln!("[asset] watcher error: {err}"),
            }
        }
    }

    fn note_change_at(&mut self, at: Instant) {
        self.last_change = Some(at);
    }

    fn take_reload_at(&mut self, now: Instant) -> Option<PathBuf> {
        let last = self.last_change?;
        if now.duration_since(last) < DEBOUNCE {
            return None;
        }
        self.last_change = None;
        self.watched.clone()
    }

    fn is_relevant(kind: &EventKind) -> bool {
        matches!(
            kind,
            EventKind::Modify(ModifyKind::Data(_))
                | EventKind::Modify(ModifyKind::Name(_))
                | EventKind::Modify(ModifyKind::Any)
                | EventKind::Create(_)
        )
    }
}

fn normalize_watch_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else if let Ok(cwd) = env::current_dir() {
        cwd.join(path)
    } else {
        path.to_path_buf()
    };
    match fs::canonicalize(&absolute) {
        Ok(canonical) => canonical,
        Err(_) => {
            if let Some(parent) = absolute.parent() {
                if let Ok(parent_canon) = fs::canonicalize(parent) {
                    if let Some(name) = absolute.file_name() {
                        return parent_canon.join(name);
                    }
                    return parent_canon;
                }
            }
            absolute
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reloads_wait_for_the_debounce_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("model.gltf");
        std::fs::File::create(&path).expect("create asset").write_all(b"{}").expect("write");

        let Ok(mut watcher) = AssetWatcher::new() else {
            eprintln!("file watching unavailable; skipping");
            return;
        };
        watcher.watch(&path).expect("watch asset");

        let start = Instant::now();
        watcher.note_change_at(start);
        assert!(watcher.take_reload_at(start + Duration::from_millis(10)).is_none());
        let fired = watcher.take_reload_at(start + DEBOUNCE + Duration::from_millis(1));
        assert_eq!(fired.as_deref(), watcher.watched());
        assert!(fired.is_some());
        assert!(
            watcher.take_reload_at(start + DEBOUNCE + Duration::from_millis(2)).is_none(),
            "a burst reports a single reload"
        );
    }

    #[test]
    fn rewatching_the_same_path_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("model.gltf");
        std::fs::File::create(&path).expect("create asset");

        let Ok(mut watcher) = AssetWatcher::new() else {
            eprintln!("file watching unavailable; skipping");
            return;
        };
        watcher.watch(&path).expect("watch asset");
        let first = watcher.watched().map(|p| p.to_path_buf());
        watcher.watch(&path).expect("watch asset again");
        assert_eq!(watcher.watched().map(|p| p.to_path_buf()), first);
    }
}
