//! Discovery: turning tracking catalogue rows into download jobs.

mod catalogue;
mod classify;
mod enumerator;
mod sqlite_catalogue;

pub use catalogue::{Candidate, CatalogueError, TrackingCatalogue};
pub use classify::{parse_extension, ImageClassifier, InternalUrlFilter, MAX_EXTENSION_LEN};
pub use enumerator::{DiscoveryError, DiscoveryReport, Enumerator};
pub use sqlite_catalogue::{SqliteTrackingCatalogue, DEFAULT_CANDIDATE_QUERY};
