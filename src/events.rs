use std::fmt;
use std::path::PathBuf;

use uuid::Uuid;

use crate::channel_mask::ChannelMask;

#[derive(Debug, Clone)]
pub enum InspectorEvent {
    AssetLoaded { path: PathBuf, mesh_count: usize },
    AssetLoadFailed { path: PathBuf, error: String },
    SceneIssue { detail: String },
    ToolActivated { name: String },
    ToolDeactivated { name: String },
    ToolMessage { tool: String, message: String },
    ExtractionCompleted { ticket: Uuid, texture: String, mask: ChannelMask, bytes: usize },
    ExtractionFailed { ticket: Uuid, texture: String, error: String },
    PopupOpened { window_id: u64 },
    PopupBlocked { reason: String },
    PopupClosed,
}

impl fmt::Display for InspectorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InspectorEvent::AssetLoaded { path, mesh_count } => {
                write!(f, "AssetLoaded path={} meshes={}", path.display(), mesh_count)
            }
            InspectorEvent::AssetLoadFailed { path, error } => {
                write!(f, "AssetLoadFailed path={} error={}", path.display(), error)
            }
            InspectorEvent::SceneIssue { detail } => write!(f, "SceneIssue {detail}"),
            InspectorEvent::ToolActivated { name } => write!(f, "ToolActivated name={name}"),
            InspectorEvent::ToolDeactivated { name } => {
                write!(f, "ToolDeactivated name={name}")
            }
            InspectorEvent::ToolMessage { tool, message } => {
                write!(f, "ToolMessage tool={tool} message={message}")
            }
            InspectorEvent::ExtractionCompleted { ticket, texture, mask, bytes } => {
                write!(
                    f,
                    "ExtractionCompleted ticket={} texture={} mask={} bytes={}",
                    ticket,
                    texture,
                    mask.label(),
                    bytes
                )
            }
            InspectorEvent::ExtractionFailed { ticket, texture, error } => {
                write!(f, "ExtractionFailed ticket={ticket} texture={texture} error={error}")
            }
            InspectorEvent::PopupOpened { window_id } => {
                write!(f, "PopupOpened window={window_id}")
            }
            InspectorEvent::PopupBlocked { reason } => write!(f, "PopupBlocked {reason}"),
            InspectorEvent::PopupClosed => write!(f, "PopupClosed"),
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    events: Vec<InspectorEvent>,
}

impl EventBus {
    pub fn push(&mut self, event: InspectorEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<InspectorEvent> {
        self.events.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_push_order() {
        let mut bus = EventBus::default();
        bus.push(InspectorEvent::ToolActivated { name: "brush".into() });
        bus.push(InspectorEvent::PopupClosed);
        bus.push(InspectorEvent::SceneIssue { detail: "red clear".into() });
        let drained = bus.drain();
        assert_eq!(drained.len(), 3);
        assert!(matches!(drained[0], InspectorEvent::ToolActivated { .. }));
        assert!(matches!(drained[1], InspectorEvent::PopupClosed));
        assert!(matches!(drained[2], InspectorEvent::SceneIssue { .. }));
        assert!(bus.is_empty());
    }

    #[test]
    fn display_formats_are_stable() {
        let event = InspectorEvent::ExtractionCompleted {
            ticket: Uuid::nil(),
            texture: "checker".into(),
            mask: ChannelMask::R | ChannelMask::A,
            bytes: 64,
        };
        let rendered = event.to_string();
        assert!(rendered.contains("texture=checker"));
        assert!(rendered.contains("mask=RA"));
        assert!(rendered.contains("bytes=64"));
    }
}
