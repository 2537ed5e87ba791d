//! Mock tracking catalogue for testing.

use std::sync::Mutex;

use crate::discovery::{Candidate, CatalogueError, TrackingCatalogue};

/// Mock implementation of the TrackingCatalogue trait.
///
/// The catalogue trait is synchronous, so unlike the async mocks this one
/// uses a std mutex.
#[derive(Debug, Default)]
pub struct MockCatalogue {
    candidates: Mutex<Vec<Candidate>>,
    next_error: Mutex<Option<CatalogueError>>,
    queries: Mutex<usize>,
}

impl MockCatalogue {
    /// Create an empty mock catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the listed candidates.
    pub fn set_candidates(&self, candidates: Vec<Candidate>) {
        if let Ok(mut guard) = self.candidates.lock() {
            *guard = candidates;
        }
    }

    /// Configure the next query to fail with the given error.
    pub fn set_next_error(&self, error: CatalogueError) {
        if let Ok(mut guard) = self.next_error.lock() {
            *guard = Some(error);
        }
    }

    /// Number of times the catalogue was queried.
    pub fn query_count(&self) -> usize {
        self.queries.lock().map(|q| *q).unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> CatalogueError {
    CatalogueError::Query("mock catalogue lock poisoned".to_string())
}

impl TrackingCatalogue for MockCatalogue {
    fn name(&self) -> &str {
        "mock"
    }

    fn candidates(&self) -> Result<Vec<Candidate>, CatalogueError> {
        *self.queries.lock().map_err(poisoned)? += 1;
        if let Some(err) = self.next_error.lock().map_err(poisoned)?.take() {
            return Err(err);
        }
        Ok(self.candidates.lock().map_err(poisoned)?.clone())
    }
}
