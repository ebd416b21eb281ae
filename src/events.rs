//! Record-lifecycle event bridge
//!
//! Translates "video record created" and "video record deleted" events from
//! the owning application into job-graph submissions, and answers the
//! status queries that application polls. Submission returns as soon as the
//! graph is registered; all encoding happens behind the worker pool.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::asset::{Asset, AssetId, AssetStatus};
use crate::pipeline::{GraphBuilder, GraphError, GraphId, JobGraph, JobKind, Scheduler};

/// The standard graph for a freshly created asset:
/// one transcode per target rendition, the master playlist once all of
/// them succeed, and removal of the original upload once the playlist is
/// live.
pub fn creation_graph(asset: &Asset) -> Result<JobGraph, GraphError> {
    let mut builder = GraphBuilder::for_asset(format!("asset-{}", asset.id), asset.id);

    let transcodes: Vec<_> = asset
        .resolutions
        .iter()
        .map(|resolution| {
            builder.add_job(JobKind::Transcode {
                source: asset.source_path.clone(),
                resolution: *resolution,
                output_root: asset.output_root.clone(),
            })
        })
        .collect();

    let playlist = builder.add_job_after(
        JobKind::BuildPlaylist {
            output_root: asset.output_root.clone(),
            renditions: asset.resolutions.clone(),
        },
        &transcodes,
    );

    builder.add_job_after(
        JobKind::CleanupSource {
            path: asset.source_path.clone(),
        },
        &[playlist],
    );

    builder.build()
}

/// The standalone cleanup graph for a deleted record. The video directory
/// is derived from the stored file path, mirroring how the upload was laid
/// out; either component may already be gone.
pub fn deletion_graph(
    video_path: Option<PathBuf>,
    thumbnail_path: Option<PathBuf>,
) -> Result<JobGraph, GraphError> {
    let video_dir = video_path
        .as_deref()
        .and_then(|p| p.parent())
        .map(|p| p.to_path_buf());

    let mut builder = GraphBuilder::new("asset-delete");
    builder.add_job(JobKind::CleanupAsset {
        video_dir,
        thumbnail: thumbnail_path,
    });
    builder.build()
}

/// Pipeline entry point handed to the owning application.
pub struct EventBridge {
    scheduler: Arc<Scheduler>,
}

impl EventBridge {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }

    /// A video record was created: submit its processing graph.
    /// Returns once the graph is registered; poll `status` for progress.
    pub fn on_asset_created(&self, asset: &Asset) -> Result<GraphId, GraphError> {
        let graph = creation_graph(asset)?;
        let graph_id = self.scheduler.submit(graph)?;
        info!(
            asset_id = %asset.id,
            graph_id = %graph_id,
            source = %asset.source_path.display(),
            "Asset submitted for processing"
        );
        Ok(graph_id)
    }

    /// A video record was deleted: submit best-effort removal of its
    /// on-disk remains.
    pub fn on_asset_deleted(
        &self,
        video_path: Option<PathBuf>,
        thumbnail_path: Option<PathBuf>,
    ) -> Result<GraphId, GraphError> {
        let graph = deletion_graph(video_path, thumbnail_path)?;
        let graph_id = self.scheduler.submit(graph)?;
        info!(graph_id = %graph_id, "Asset cleanup submitted");
        Ok(graph_id)
    }

    /// Poll interface for the owning application.
    pub fn status(&self, asset_id: AssetId) -> Option<AssetStatus> {
        self.scheduler.asset_status(asset_id)
    }

    /// Await a submitted graph's terminal state.
    pub async fn wait(&self, graph_id: GraphId) -> bool {
        self.scheduler.wait(graph_id).await
    }

    pub fn cancel(&self, graph_id: GraphId) -> bool {
        self.scheduler.cancel(graph_id)
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::transcoder::Resolution;
    use std::path::Path;

    #[test]
    fn creation_graph_has_expected_shape() {
        let asset = Asset::new("/media/videos/a1/in.mp4", "/media/videos/a1");
        let graph = creation_graph(&asset).unwrap();

        assert_eq!(graph.asset_id, Some(asset.id));
        assert_eq!(graph.jobs.len(), 5);

        let transcodes: Vec<_> = graph
            .jobs
            .iter()
            .filter(|j| matches!(j.kind, JobKind::Transcode { .. }))
            .collect();
        assert_eq!(transcodes.len(), 3);
        for job in &transcodes {
            assert!(job.depends_on.is_empty());
        }

        let playlist = graph
            .jobs
            .iter()
            .find(|j| matches!(j.kind, JobKind::BuildPlaylist { .. }))
            .expect("playlist job");
        assert_eq!(playlist.depends_on.len(), 3);
        for t in &transcodes {
            assert!(playlist.depends_on.contains(&t.id));
        }

        let cleanup = graph
            .jobs
            .iter()
            .find(|j| matches!(j.kind, JobKind::CleanupSource { .. }))
            .expect("cleanup job");
        assert_eq!(cleanup.depends_on, vec![playlist.id]);
    }

    #[test]
    fn creation_graph_covers_all_renditions() {
        let asset = Asset::new("/in.mp4", "/out");
        let graph = creation_graph(&asset).unwrap();

        let resolutions: Vec<Resolution> = graph
            .jobs
            .iter()
            .filter_map(|j| match &j.kind {
                JobKind::Transcode { resolution, .. } => Some(*resolution),
                _ => None,
            })
            .collect();
        assert_eq!(resolutions, Resolution::all().to_vec());
    }

    #[test]
    fn deletion_graph_derives_video_dir_from_file_path() {
        let graph = deletion_graph(
            Some("/media/videos/a1/in.mp4".into()),
            Some("/media/thumbnails/a1.jpg".into()),
        )
        .unwrap();

        assert_eq!(graph.asset_id, None);
        assert_eq!(graph.jobs.len(), 1);
        match &graph.jobs[0].kind {
            JobKind::CleanupAsset {
                video_dir,
                thumbnail,
            } => {
                assert_eq!(video_dir.as_deref(), Some(Path::new("/media/videos/a1")));
                assert_eq!(
                    thumbnail.as_deref(),
                    Some(Path::new("/media/thumbnails/a1.jpg"))
                );
            }
            other => panic!("expected cleanup_asset, got {}", other.name()),
        }
    }

    #[test]
    fn deletion_graph_tolerates_absent_components() {
        let graph = deletion_graph(None, None).unwrap();
        assert_eq!(graph.jobs.len(), 1);
        match &graph.jobs[0].kind {
            JobKind::CleanupAsset {
                video_dir,
                thumbnail,
            } => {
                assert!(video_dir.is_none());
                assert!(thumbnail.is_none());
            }
            other => panic!("expected cleanup_asset, got {}", other.name()),
        }
    }
}
