//! Absolute-path splitting (§4.5, §9).
//!
//! The original C sources rewrite the path in place, inserting NULs at `/`
//! boundaries (`findFileInternal`'s `strtok`-style walk). §9 calls for a
//! path-splitting iterator yielding borrowed byte-slices of components
//! instead, so the input is never mutated; that is what this module does.

use crate::error::{Error, Result};
use crate::layout::MAX_NAME_LEN;

/// Splits an absolute path into its `/`-separated components.
///
/// A trailing `/` is stripped and ignored. Each component must be at most
/// [`MAX_NAME_LEN`] bytes. The path must start with `/`.
pub fn components(path: &[u8]) -> Result<impl Iterator<Item = &[u8]>> {
    if path.first() != Some(&b'/') {
        return Err(Error::InvalidPath);
    }

    let trimmed = if path.len() > 1 && path.last() == Some(&b'/') {
        &path[1..path.len() - 1]
    } else {
        &path[1..]
    };

    Ok(trimmed
        .split(|&b| b == b'/')
        .filter(|segment| !segment.is_empty()))
}

/// Validates a single path component's length.
pub fn check_component_len(name: &[u8]) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        Err(Error::NameTooLong)
    } else {
        Ok(())
    }
}
