use std::path::Path;

use image::DynamicImage;
use log::warn;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::types::ImageFormat;

/// List supported image filenames directly inside a directory.
///
/// The intake is flat: scans arrive as a single numbered batch in one
/// folder, so subdirectories (including previously created series folders)
/// are never candidates. Names that are not valid UTF-8 cannot be recorded
/// in the ledger and are skipped with a warning.
pub fn list_images(directory: &Path) -> Result<Vec<String>> {
    if !directory.exists() {
        return Err(Error::FileNotFound(directory.to_path_buf()));
    }

    let mut names = Vec::new();

    for entry in WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        if !is_image_path(path) {
            continue;
        }

        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => names.push(name.to_string()),
            None => warn!("Skipping non-UTF-8 filename: {}", path.display()),
        }
    }

    Ok(names)
}

/// Returns if the given path has a supported image extension
pub fn is_image_path(path: &Path) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => ImageFormat::from_extension(ext).is_supported(),
        None => false,
    }
}

/// Decode an image from disk
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|source| Error::Decode {
        path: path.to_path_buf(),
        source,
    })
}

// -- Tests --
