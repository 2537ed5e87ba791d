//! SQLite-backed tracking catalogue.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags};

use super::catalogue::{Candidate, CatalogueError, TrackingCatalogue};
use crate::job::MediaContext;

/// Candidate query used when the config does not override it. Any
/// replacement must select the same eight columns in the same order.
pub const DEFAULT_CANDIDATE_QUERY: &str = "\
    SELECT centre_id, pipeline_id, genotype_id, strain_id, procedure_id, \
           parameter_id, measurement_id, url \
    FROM media_measurement \
    ORDER BY centre_id, pipeline_id, genotype_id, strain_id, procedure_id, \
             parameter_id, measurement_id";

/// Opens the tracking database read-only and runs one query per discovery.
pub struct SqliteTrackingCatalogue {
    conn: Mutex<Connection>,
    query: String,
}

impl SqliteTrackingCatalogue {
    pub fn open(path: &Path, query: Option<String>) -> Result<Self, CatalogueError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| CatalogueError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
            query: query.unwrap_or_else(|| DEFAULT_CANDIDATE_QUERY.to_string()),
        })
    }
}

impl TrackingCatalogue for SqliteTrackingCatalogue {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn candidates(&self) -> Result<Vec<Candidate>, CatalogueError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| CatalogueError::Query(format!("lock poisoned: {}", e)))?;
        let query_err = |e: rusqlite::Error| CatalogueError::Query(e.to_string());

        let mut stmt = conn.prepare(&self.query).map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Candidate {
                    context: MediaContext {
                        centre_id: row.get(0)?,
                        pipeline_id: row.get(1)?,
                        genotype_id: row.get(2)?,
                        strain_id: row.get(3)?,
                        procedure_id: row.get(4)?,
                        parameter_id: row.get(5)?,
                        measurement_id: row.get(6)?,
                    },
                    url: row.get(7)?,
                })
            })
            .map_err(query_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_tracker(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("tracker.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE media_measurement (
                centre_id INTEGER, pipeline_id INTEGER, genotype_id INTEGER,
                strain_id INTEGER, procedure_id INTEGER, parameter_id INTEGER,
                measurement_id INTEGER, url TEXT
            );
            INSERT INTO media_measurement VALUES (2, 1, 1, 1, 1, 1, 20, 'http://b.org/2.png');
            INSERT INTO media_measurement VALUES (1, 1, 1, 1, 1, 1, 10, 'http://a.org/1.jpg');
            "#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_default_query_orders_by_context() {
        let temp = TempDir::new().unwrap();
        let catalogue = SqliteTrackingCatalogue::open(&create_tracker(temp.path()), None).unwrap();

        let candidates = catalogue.candidates().unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].context.centre_id, 1);
        assert_eq!(candidates[0].url, "http://a.org/1.jpg");
        assert_eq!(candidates[1].context.measurement_id, 20);
    }

    #[test]
    fn test_query_override() {
        let temp = TempDir::new().unwrap();
        let query = "SELECT centre_id, pipeline_id, genotype_id, strain_id, procedure_id, \
                     parameter_id, measurement_id, url FROM media_measurement WHERE centre_id = 2"
            .to_string();
        let catalogue =
            SqliteTrackingCatalogue::open(&create_tracker(temp.path()), Some(query)).unwrap();

        let candidates = catalogue.candidates().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "http://b.org/2.png");
    }

    #[test]
    fn test_missing_database() {
        let temp = TempDir::new().unwrap();
        let result = SqliteTrackingCatalogue::open(&temp.path().join("absent.db"), None);
        assert!(matches!(result, Err(CatalogueError::Open { .. })));
    }

    #[test]
    fn test_bad_query() {
        let temp = TempDir::new().unwrap();
        let catalogue = SqliteTrackingCatalogue::open(
            &create_tracker(temp.path()),
            Some("SELECT nothing FROM nowhere".to_string()),
        )
        .unwrap();
        assert!(matches!(catalogue.candidates(), Err(CatalogueError::Query(_))));
    }
}
