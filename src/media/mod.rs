//! Media processing: probing, HLS encoding, playlist assembly, cleanup

pub mod cleanup;
pub mod playlist;
pub mod probe;
pub mod transcoder;

pub use cleanup::{AssetCleanup, CleanupError, CleanupOutcome, cleanup_asset, cleanup_source};
pub use playlist::{MASTER_PLAYLIST, PlaylistError, build_master, render_master};
pub use probe::{ProbeError, Prober, SourceInfo};
pub use transcoder::{EncodeError, RENDITION_PLAYLIST, Rendition, Resolution, Transcoder};
