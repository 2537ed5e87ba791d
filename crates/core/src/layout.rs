//! On-disk addressing of originals and tile trees.

use std::path::{Path, PathBuf};

use crate::config::StorageConfig;
use crate::job::{MediaContext, MediaJob};

/// Width of each checksum path segment.
pub const SEGMENT_WIDTH: usize = 4;

/// Resolves where a job's files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLayout {
    originals_root: PathBuf,
    tiles_root: PathBuf,
}

impl MediaLayout {
    pub fn new(originals_root: impl Into<PathBuf>, tiles_root: impl Into<PathBuf>) -> Self {
        Self {
            originals_root: originals_root.into(),
            tiles_root: tiles_root.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.originals_dir, &config.tiles_dir)
    }

    pub fn originals_root(&self) -> &Path {
        &self.originals_root
    }

    pub fn tiles_root(&self) -> &Path {
        &self.tiles_root
    }

    /// `<originals>/<centre>/<pipeline>/<genotype>/<strain>/<procedure>/<parameter>`
    pub fn original_dir(&self, context: &MediaContext) -> PathBuf {
        self.originals_root
            .join(context.centre_id.to_string())
            .join(context.pipeline_id.to_string())
            .join(context.genotype_id.to_string())
            .join(context.strain_id.to_string())
            .join(context.procedure_id.to_string())
            .join(context.parameter_id.to_string())
    }

    /// `<original_dir>/<job_id>.<ext>`
    pub fn original_path(&self, job: &MediaJob) -> PathBuf {
        self.original_dir(&job.context)
            .join(format!("{}.{}", job.id, job.extension))
    }

    /// Tile tree for a checksum. Identical content shares one tree.
    pub fn tile_root(&self, checksum: &str) -> PathBuf {
        checksum_segments(checksum)
            .into_iter()
            .fold(self.tiles_root.clone(), |path, segment| path.join(segment))
    }
}

/// Splits a checksum into [`SEGMENT_WIDTH`]-character groups, left to right.
/// A trailing group shorter than the width is kept as the last segment.
pub fn checksum_segments(checksum: &str) -> Vec<&str> {
    let mut segments = Vec::with_capacity(checksum.len() / SEGMENT_WIDTH + 1);
    let mut start = 0;
    for (count, (idx, _)) in checksum.char_indices().enumerate() {
        if count > 0 && count % SEGMENT_WIDTH == 0 {
            segments.push(&checksum[start..idx]);
            start = idx;
        }
    }
    if start < checksum.len() {
        segments.push(&checksum[start..]);
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use chrono::Utc;

    fn job(id: i64, extension: &str) -> MediaJob {
        MediaJob {
            id,
            context: MediaContext {
                centre_id: 3,
                pipeline_id: 7,
                genotype_id: 1200,
                strain_id: 14,
                procedure_id: 91,
                parameter_id: 4011,
                measurement_id: 555,
            },
            source_url: "http://example.org/x".to_string(),
            extension_id: 1,
            extension: extension.to_string(),
            is_image: true,
            checksum: None,
            width: None,
            height: None,
            state: JobState::DOWNLOAD_PENDING,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_original_path() {
        let layout = MediaLayout::new("/srv/originals", "/srv/tiles");
        assert_eq!(
            layout.original_path(&job(42, "tiff")),
            PathBuf::from("/srv/originals/3/7/1200/14/91/4011/42.tiff")
        );
    }

    #[test]
    fn test_tile_root_has_ten_segments_for_forty_chars() {
        let layout = MediaLayout::new("/o", "/t");
        let checksum = "abcd1234efgh5678ijkl9012mnop3456qrst7890";
        let root = layout.tile_root(checksum);

        let segments: Vec<String> = root
            .strip_prefix("/t")
            .unwrap()
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            segments,
            vec![
                "abcd", "1234", "efgh", "5678", "ijkl", "9012", "mnop", "3456", "qrst", "7890"
            ]
        );
        assert!(segments.iter().all(|s| s.len() == 4));
        assert_eq!(segments.concat(), checksum);
    }

    #[test]
    fn test_tile_root_is_deterministic() {
        let layout = MediaLayout::new("/o", "/t");
        let checksum = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";
        assert_eq!(layout.tile_root(checksum), layout.tile_root(checksum));
        assert_ne!(
            layout.tile_root(checksum),
            layout.tile_root("2aae6c35c94fcfb415dbe95f408b9ce91ee846ee")
        );
    }

    #[test]
    fn test_checksum_segments_keeps_remainder() {
        assert_eq!(checksum_segments("abcdef"), vec!["abcd", "ef"]);
        assert_eq!(checksum_segments("abcd"), vec!["abcd"]);
        assert!(checksum_segments("").is_empty());
    }
}
