//! Extension parsing, image classification and internal URL filtering.

use std::collections::HashSet;

use regex_lite::Regex;
use url::Url;

/// Extensions this long or longer are treated as not-an-extension.
pub const MAX_EXTENSION_LEN: usize = 8;

/// Lowercased text after the last `.` of the URL's final path segment.
///
/// Returns `None` for unparseable URLs, dotless names, and anything that
/// is empty, too long or not alphanumeric.
pub fn parse_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let file_name = parsed.path().rsplit('/').next()?;
    let (_, extension) = file_name.rsplit_once('.')?;

    let valid = !extension.is_empty()
        && extension.len() < MAX_EXTENSION_LEN
        && extension.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| extension.to_ascii_lowercase())
}

/// Decides whether an extension is an image.
#[derive(Debug, Clone)]
pub struct ImageClassifier {
    extensions: HashSet<String>,
}

impl ImageClassifier {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_image(&self, extension: &str) -> bool {
        self.extensions.contains(&extension.to_ascii_lowercase())
    }
}

/// Matches URLs served by our own infrastructure, which are never fetched.
#[derive(Debug, Clone, Default)]
pub struct InternalUrlFilter {
    patterns: Vec<Regex>,
}

impl InternalUrlFilter {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex_lite::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_internal(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(url))
    }
}
