use anyhow::{bail, Context, Result};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::channel_mask::{flip_rows, remap_pixels, ChannelMask};
use crate::config::ExtractionConfig;
use crate::events::{EventBus, InspectorEvent};
use crate::renderer::Renderer;
use crate::texture_registry::{TextureKind, TextureRegistry};

/// Shared counter behind the edit-suppression guards. Canvas mutation handling
/// is deferred while any guard is live.
#[derive(Clone, Default)]
pub struct EditSuppressor {
    live: Arc<AtomicUsize>,
}

impl EditSuppressor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self) -> EditGuard {
        self.live.fetch_add(1, Ordering::SeqCst);
        EditGuard { live: self.live.clone() }
    }

    pub fn is_suppressed(&self) -> bool {
        self.live.load(Ordering::SeqCst) > 0
    }
}

pub struct EditGuard {
    live: Arc<AtomicUsize>,
}

impl Drop for EditGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct PendingExtraction {
    ticket: Uuid,
    texture: String,
    face: Option<u32>,
    mask: ChannelMask,
    retry_at: Instant,
    attempts: u32,
}

/// A finished extraction, handed back to the caller that owns the pixels.
pub struct ExtractionResult {
    pub ticket: Uuid,
    pub texture: String,
    pub face: Option<u32>,
    pub mask: ChannelMask,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

enum AttemptOutcome {
    Completed(ExtractionResult),
    NotReady,
}

/// Queued channel extractions with fixed-delay retry. Requests wait until the
/// GPU exists; zero-sized targets and readback failures complete with an error
/// exactly once.
pub struct Extractor {
    pending: SmallVec<[PendingExtraction; 4]>,
    retry_interval: Duration,
    suppressor: EditSuppressor,
}

impl Extractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            pending: SmallVec::new(),
            retry_interval: Duration::from_millis(config.retry_interval_ms),
            suppressor: EditSuppressor::new(),
        }
    }

    pub fn suppressor(&self) -> EditSuppressor {
        self.suppressor.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn request(&mut self, texture: &str, face: Option<u32>, mask: ChannelMask) -> Uuid {
        let ticket = Uuid::new_v4();
        self.pending.push(PendingExtraction {
            ticket,
            texture: texture.to_string(),
            face,
            mask,
            retry_at: Instant::now(),
            attempts: 0,
        });
        ticket
    }

    pub fn tick(
        &mut self,
        renderer: &mut Renderer,
        registry: &mut TextureRegistry,
        events: &mut EventBus,
    ) -> Vec<ExtractionResult> {
        self.tick_at(Instant::now(), renderer, registry, events)
    }

    pub fn tick_at(
        &mut self,
        now: Instant,
        renderer: &mut Renderer,
        registry: &mut TextureRegistry,
        events: &mut EventBus,
    ) -> Vec<ExtractionResult> {
        let mut completed = Vec::new();
        let mut queue = std::mem::take(&mut self.pending);
        for mut item in queue.drain(..) {
            if item.retry_at > now {
                self.pending.push(item);
                continue;
            }
            let _guard = self.suppressor.hold();
            match attempt_extraction(&item, renderer, registry) {
                Ok(AttemptOutcome::Completed(result)) => {
                    events.push(InspectorEvent::ExtractionCompleted {
                        ticket: result.ticket,
                        texture: result.texture.clone(),
                        mask: result.mask,
                        bytes: result.pixels.len(),
                    });
                    completed.push(result);
                }
                Ok(AttemptOutcome::NotReady) => {
                    if item.attempts == 0 {
                        eprintln!(
                            "[extract] GPU not ready for '{}'; retrying every {}ms",
                            item.texture,
                            self.retry_interval.as_millis()
                        );
                    }
                    item.attempts = item.attempts.saturating_add(1);
                    item.retry_at = now + self.retry_interval;
                    self.pending.push(item);
                }
                Err(err) => {
                    eprintln!("[extract] Extraction of '{}' failed: {err:#}", item.texture);
                    events.push(InspectorEvent::ExtractionFailed {
                        ticket: item.ticket,
                        texture: item.texture.clone(),
                        error: format!("{err:#}"),
                    });
                }
            }
        }
        completed
    }
}

fn attempt_extraction(
    item: &PendingExtraction,
    renderer: &mut Renderer,
    registry: &mut TextureRegistry,
) -> Result<AttemptOutcome> {
    if !renderer.is_ready() {
        return Ok(AttemptOutcome::NotReady);
    }
    let (width, height, kind, invert_y) = {
        let record = registry
            .get(&item.texture)
            .with_context(|| format!("Texture '{}' is not registered", item.texture))?;
        (record.width, record.height, record.kind, record.invert_y)
    };
    let layer = match kind {
        TextureKind::Flat => 0,
        TextureKind::Cube => item.face.unwrap_or(0),
    };
    if layer >= kind.layer_count() {
        bail!("Face {layer} out of range for texture '{}'", item.texture);
    }

    let view = {
        let (device, queue) = renderer.device_and_queue()?;
        let gpu = registry.ensure_gpu(device, queue, &item.texture)?;
        gpu.face_view(layer)
    };
    let mut pixels = renderer.extract_texture_pixels(&view, width, height)?;
    remap_pixels(&mut pixels, item.mask);
    if invert_y {
        flip_rows(&mut pixels, width, height);
    }
    Ok(AttemptOutcome::Completed(ExtractionResult {
        ticket: item.ticket,
        texture: item.texture.clone(),
        face: item.face,
        mask: item.mask,
        width,
        height,
        pixels,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowConfig;

    fn offline_renderer() -> Renderer {
        pollster::block_on(Renderer::new(&WindowConfig::default()))
    }

    #[test]
    fn guards_count_while_held_and_release_on_drop() {
        let suppressor = EditSuppressor::new();
        assert!(!suppressor.is_suppressed());
        let outer = suppressor.hold();
        let inner = suppressor.hold();
        assert!(suppressor.is_suppressed());
        drop(inner);
        assert!(suppressor.is_suppressed());
        drop(outer);
        assert!(!suppressor.is_suppressed());
    }

    #[test]
    fn requests_wait_for_the_gpu_and_honor_the_retry_delay() {
        let mut renderer = offline_renderer();
        let mut registry = TextureRegistry::new();
        let mut events = EventBus::default();
        let mut extractor = Extractor::new(&ExtractionConfig::default());

        extractor.request("checker", None, ChannelMask::default());
        assert_eq!(extractor.pending_count(), 1);

        let start = Instant::now();
        let done = extractor.tick_at(start, &mut renderer, &mut registry, &mut events);
        assert!(done.is_empty());
        assert_eq!(extractor.pending_count(), 1);
        assert_eq!(extractor.pending[0].attempts, 1);

        // Within the retry window nothing is attempted again.
        extractor.tick_at(start + Duration::from_millis(10), &mut renderer, &mut registry, &mut events);
        assert_eq!(extractor.pending[0].attempts, 1);

        extractor.tick_at(
            start + extractor.retry_interval,
            &mut renderer,
            &mut registry,
            &mut events,
        );
        assert_eq!(extractor.pending[0].attempts, 2);
        assert!(events.is_empty(), "deferred attempts must not report failure");
    }

    #[test]
    fn suppression_clears_between_ticks() {
        let mut renderer = offline_renderer();
        let mut registry = TextureRegistry::new();
        let mut events = EventBus::default();
        let mut extractor = Extractor::new(&ExtractionConfig::default());
        let suppressor = extractor.suppressor();

        extractor.request("missing", None, ChannelMask::default());
        extractor.tick(&mut renderer, &mut registry, &mut events);
        assert!(!suppressor.is_suppressed());
    }
}
