//! Natural ordering of scan filenames.
//!
//! Scanner software numbers pages (`page2.jpg`, `page10.jpg`), so lexical
//! order does not match scan sequence. Each name is split at its first
//! maximal digit run, the run is left-padded to the longest run observed in
//! the batch, and names sort by `(prefix, padded digits, suffix)`.

use log::warn;

use crate::error::{Error, Result};

/// Split a filename at its first maximal digit run.
///
/// Returns `(prefix, digits, suffix)` or `MalformedName` when the name
/// contains no digit.
pub fn split_numeric(name: &str) -> Result<(&str, &str, &str)> {
    let start = name
        .char_indices()
        .find(|(_, c)| c.is_ascii_digit())
        .map(|(i, _)| i)
        .ok_or_else(|| Error::MalformedName(name.to_string()))?;

    let end = name[start..]
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| start + i)
        .unwrap_or(name.len());

    Ok((&name[..start], &name[start..end], &name[end..]))
}

/// Order filenames by their embedded scan sequence.
///
/// If any name in the batch has no digit run the whole batch falls back to
/// plain lexical order, with a warning. Ties between names that normalize
/// identically are broken by the original string, so the order is stable.
pub fn natural_order(mut names: Vec<String>) -> Vec<String> {
    let parts: Option<Vec<(String, String, String)>> = names
        .iter()
        .map(|name| {
            split_numeric(name)
                .ok()
                .map(|(p, d, s)| (p.to_string(), d.to_string(), s.to_string()))
        })
        .collect();

    let Some(parts) = parts else {
        warn!("Batch contains filenames without digit runs; falling back to lexical order");
        names.sort();
        return names;
    };

    let max_digits = parts.iter().map(|(_, d, _)| d.len()).max().unwrap_or(0);

    let mut keyed: Vec<((String, String, String), String)> = parts
        .into_iter()
        .zip(names)
        .map(|((prefix, digits, suffix), name)| {
            let padded = format!("{:0>width$}", digits, width = max_digits);
            ((prefix, padded, suffix), name)
        })
        .collect();

    keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    keyed.into_iter().map(|(_, name)| name).collect()
}

// -- Tests --
