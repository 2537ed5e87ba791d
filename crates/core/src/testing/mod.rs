//! Testing utilities and mock implementations.
//!
//! Mocks stand in for every external collaborator of the phase runners
//! (remote servers, the tile script, the tracking catalogue and the lock
//! directory), so whole pipelines can run against a temp directory.
//!
//! # Example
//!
//! ```rust,ignore
//! use mediafetch_core::testing::{MockCatalogue, MockTiler, MockTransport};
//!
//! let transport = MockTransport::default();
//! let tiler = MockTiler::new();
//! let catalogue = MockCatalogue::new();
//!
//! catalogue.set_candidates(vec![/* candidates */]);
//! tiler.set_size(None).await;
//! ```

mod mock_catalogue;
mod mock_lock;
mod mock_tiler;
mod mock_transport;

pub use mock_catalogue::MockCatalogue;
pub use mock_lock::MockLockProvider;
pub use mock_tiler::{MockTiler, MOCK_TILE_MARKER};
pub use mock_transport::{MockTransport, RecordedFetch};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use crate::discovery::Candidate;
    use crate::job::{JobStore, MediaContext, MediaJob, NewMediaJob};

    /// Context with fixed pipeline-to-parameter ids.
    pub fn context(centre_id: i64, measurement_id: i64) -> MediaContext {
        MediaContext {
            centre_id,
            pipeline_id: 7,
            genotype_id: 1200,
            strain_id: 14,
            procedure_id: 91,
            parameter_id: 4011,
            measurement_id,
        }
    }

    /// Catalogue candidate for [`context`].
    pub fn candidate(centre_id: i64, measurement_id: i64, url: &str) -> Candidate {
        Candidate {
            context: context(centre_id, measurement_id),
            url: url.to_string(),
        }
    }

    /// Enqueue a job at (download, pending), taking the extension from the
    /// URL and treating the usual image extensions as images.
    pub fn enqueue_job(
        store: &dyn JobStore,
        centre_id: i64,
        measurement_id: i64,
        url: &str,
    ) -> MediaJob {
        let extension = url.rsplit('.').next().unwrap_or("bin").to_lowercase();
        let is_image = crate::config::default_image_extensions().contains(&extension);
        let extension_id = store
            .lookup_or_create_extension(&extension)
            .expect("extension registered");
        store
            .enqueue(NewMediaJob {
                context: context(centre_id, measurement_id),
                source_url: url.to_string(),
                extension_id,
                is_image,
            })
            .expect("job enqueued")
    }

    /// Write a black JPEG of the given size.
    pub fn write_jpeg(path: &Path, width: u32, height: u32) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("parent dir created");
        }
        image::RgbImage::new(width, height)
            .save(path)
            .expect("jpeg written");
    }
}
