//! Enqueues a download job for every new catalogue candidate.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::catalogue::{CatalogueError, TrackingCatalogue};
use super::classify::{parse_extension, ImageClassifier, InternalUrlFilter};
use crate::job::{JobStore, JobStoreError, NewMediaJob};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Catalogue(#[from] CatalogueError),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Tally of one discovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub candidates: usize,
    pub enqueued: usize,
    /// A job for the context already existed.
    pub existing: usize,
    /// Hosted internally, never fetched.
    pub internal: usize,
    pub unknown_extension: usize,
}

pub struct Enumerator {
    store: Arc<dyn JobStore>,
    catalogue: Arc<dyn TrackingCatalogue>,
    classifier: ImageClassifier,
    internal: InternalUrlFilter,
}

impl Enumerator {
    pub fn new(
        store: Arc<dyn JobStore>,
        catalogue: Arc<dyn TrackingCatalogue>,
        classifier: ImageClassifier,
        internal: InternalUrlFilter,
    ) -> Self {
        Self {
            store,
            catalogue,
            classifier,
            internal,
        }
    }

    /// One pass over the catalogue. Safe to repeat: known contexts are skipped.
    pub fn run(&self) -> Result<DiscoveryReport, DiscoveryError> {
        let candidates = self.catalogue.candidates()?;
        let mut report = DiscoveryReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        debug!(catalogue = self.catalogue.name(), count = candidates.len(), "Fetched candidates");

        for candidate in candidates {
            if self.store.find_by_context(&candidate.context)?.is_some() {
                report.existing += 1;
                continue;
            }

            if self.internal.is_internal(&candidate.url) {
                debug!(context = %candidate.context, url = %candidate.url, "Skipping internally hosted media");
                report.internal += 1;
                continue;
            }

            let Some(extension) = parse_extension(&candidate.url) else {
                warn!(context = %candidate.context, url = %candidate.url, "Cannot determine file extension, skipping");
                report.unknown_extension += 1;
                continue;
            };

            let extension_id = self.store.lookup_or_create_extension(&extension)?;
            let is_image = self.classifier.is_image(&extension);

            match self.store.enqueue(NewMediaJob {
                context: candidate.context,
                source_url: candidate.url,
                extension_id,
                is_image,
            }) {
                Ok(job) => {
                    debug!(job_id = job.id, context = %job.context, is_image, "Enqueued download");
                    report.enqueued += 1;
                }
                // The catalogue listed the same context twice.
                Err(JobStoreError::DuplicateContext(_)) => report.existing += 1,
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            candidates = report.candidates,
            enqueued = report.enqueued,
            existing = report.existing,
            internal = report.internal,
            unknown_extension = report.unknown_extension,
            "Discovery finished"
        );
        Ok(report)
    }
}
