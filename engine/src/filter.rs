//! File selection by name pattern and minimum size
//!
//! Only files are filtered; directories are always walked and mirrored so that the destination
//! keeps the source structure.
//!
//! # Pattern Syntax
//!
//! The pattern is matched against the file name (not the full path), case-sensitively:
//!
//! - `*` matches any sequence of characters
//! - `?` matches a single character
//! - `[...]` character classes
//!
//! # Examples
//!
//! ```
//! use engine::filter::FileFilter;
//!
//! let filter = FileFilter::new("*.csv", 10).unwrap();
//! assert!(filter.matches("data.csv", 100));
//! assert!(!filter.matches("data.csv", 5));
//! assert!(!filter.matches("data.CSV", 100));
//! ```

use anyhow::Context;

pub const DEFAULT_INCLUDE_PATTERN: &str = "*";

/// Compiled include pattern plus size threshold.
#[derive(Debug, Clone)]
pub struct FileFilter {
    /// original pattern string
    pub pattern: String,
    matcher: globset::GlobMatcher,
    pub min_size: u64,
}

impl FileFilter {
    pub fn new(pattern: &str, min_size: u64) -> anyhow::Result<Self> {
        if pattern.is_empty() {
            return Err(anyhow::anyhow!("empty include pattern is not allowed"));
        }
        let glob = globset::GlobBuilder::new(pattern)
            .case_insensitive(false)
            .literal_separator(false)
            .backslash_escape(true)
            .build()
            .with_context(|| format!("invalid include pattern: {pattern}"))?;
        Ok(Self {
            pattern: pattern.to_string(),
            matcher: glob.compile_matcher(),
            min_size,
        })
    }

    /// Checks a file by name and size.
    pub fn matches(&self, file_name: impl AsRef<std::path::Path>, size: u64) -> bool {
        size >= self.min_size && self.matcher.is_match(file_name)
    }

    /// Checks a listed entry; directories always pass.
    pub fn accepts(&self, entry: &fsclient::PathEntry) -> bool {
        if entry.is_dir {
            return true;
        }
        match entry.file_name() {
            Some(name) => self.matches(name, entry.size),
            None => false,
        }
    }
}
