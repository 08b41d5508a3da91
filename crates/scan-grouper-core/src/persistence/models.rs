use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One finalized image, as recorded in the ledger.
///
/// Rows are append-only except for `path`, which is updated exactly once
/// when the anchor of a newly discovered duplicate run is relocated into
/// its series folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedImage {
    /// ID in the database; `None` until appended
    pub id: Option<i64>,

    /// Finalize time
    pub timestamp: DateTime<Utc>,

    /// Attributed operator/process identity
    pub user: String,

    /// Original base name of the image
    pub filename: String,

    /// Directory currently holding the image
    pub path: PathBuf,

    /// Ordinal position within the duplicate run; 0 for an anchor
    pub duplicates: i64,

    /// Filename of the anchor that opened the run (own filename when
    /// `duplicates == 0`)
    pub main_double: String,

    /// Optional quality-enhanced representative for the run; reserved,
    /// never populated by the grouping engines
    pub enhanced_path: Option<String>,
}

impl ProcessedImage {
    /// Create a record to be appended, stamped with the current time
    pub fn new(
        filename: impl Into<String>,
        path: impl Into<PathBuf>,
        duplicates: i64,
        main_double: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            user: user.into(),
            filename: filename.into(),
            path: path.into(),
            duplicates,
            main_double: main_double.into(),
            enhanced_path: None,
        }
    }

    /// Current on-disk location of the image
    pub fn file_path(&self) -> PathBuf {
        self.path.join(&self.filename)
    }

    /// Whether this record opened its run
    pub fn is_anchor(&self) -> bool {
        self.duplicates == 0
    }

    /// Update the directory after a relocation
    pub fn relocated_to(&mut self, dir: &Path) {
        self.path = dir.to_path_buf();
    }
}
