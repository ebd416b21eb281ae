//! Projectionist - asynchronous HLS transcoding pipeline
//!
//! Turns uploaded videos into adaptive-bitrate HLS output: one rendition
//! per target resolution, a master playlist once all of them succeed, and
//! removal of the original upload once the playlist is live. Work is
//! modeled as dependency-ordered job graphs executed by a bounded worker
//! pool; the owning application submits lifecycle events and polls status.

pub mod asset;
pub mod config;
pub mod events;
pub mod jobs;
pub mod media;
pub mod pipeline;

pub use asset::{Asset, AssetId, AssetStatus};
pub use config::Config;
pub use events::EventBridge;
