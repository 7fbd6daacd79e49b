pub mod app;
pub mod camera3d;
pub mod channel_mask;
pub mod cli;
pub mod config;
pub mod environment;
pub mod events;
pub mod extraction;
pub mod mesh;
pub mod preview;
pub mod renderer;
pub mod texture_registry;
pub mod time;
pub mod tools;

pub use app::{run, run_with_overrides, App};
