//! Filesystem-safe renaming of untrusted archive member names
//!
//! Archives from untrusted sources can carry names with control characters,
//! reserved characters, or arbitrary Unicode. Directory segments lose every
//! character outside the allow-list; file names get one random letter or digit
//! per offending character so two hostile names don't collapse into one.

use rand::Rng;
use rand::distributions::Alphanumeric;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Characters reserved in Windows paths; none of them is ever allowed in a segment
pub const RESERVED_CHARS: &str = "<>:\"/\\|?*";

/// Attempts at finding a free destination before giving up
const MAX_RELOCATE_ATTEMPTS: usize = 16;

/// Printable set used by `is_safe_path`: ASCII 0x20..=0x7E plus the ASCII whitespace controls
fn is_printable(c: char) -> bool {
    matches!(c, ' '..='~' | '\t' | '\n' | '\r' | '\x0b' | '\x0c')
}

/// Allow-list for a single path segment
fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '(' | ')' | ' ')
}

fn random_alnum(rng: &mut impl Rng) -> char {
    rng.sample(Alphanumeric) as char
}

/// True iff every character of the path is printable ASCII
///
/// Any non-ASCII or non-UTF-8 path needs remediation.
pub fn is_safe_path(path: &Path) -> bool {
    path.to_str().is_some_and(|s| s.chars().all(is_printable))
}

/// True iff the segment would come out of `sanitize_component` unchanged
pub fn is_acceptable_name(name: &OsStr) -> bool {
    name.to_str()
        .is_some_and(|s| !s.is_empty() && s.chars().all(is_allowed))
}

/// Sanitize one path segment
///
/// Directory segments (`is_final_segment == false`) drop disallowed characters and may
/// become empty. File names replace each disallowed character with a random letter or
/// digit, so they never shrink and never come back empty.
pub fn sanitize_component(name: &str, is_final_segment: bool) -> String {
    if !is_final_segment {
        return name.chars().filter(|c| is_allowed(*c)).collect();
    }

    let mut rng = rand::thread_rng();
    if name.is_empty() {
        return (0..8).map(|_| random_alnum(&mut rng)).collect();
    }

    name.chars()
        .map(|c| if is_allowed(c) { c } else { random_alnum(&mut rng) })
        .collect()
}

/// Sanitize every segment of a path without touching the filesystem
///
/// Root, prefix and `.`/`..` components pass through untouched. Directory segments
/// that become empty are dropped.
pub fn sanitized_form(path: &Path) -> PathBuf {
    let components: Vec<Component<'_>> = path.components().collect();
    let last = components.len().saturating_sub(1);

    let mut result = PathBuf::new();
    for (index, component) in components.iter().enumerate() {
        match component {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                let cleaned = sanitize_component(&name, index == last);
                if !cleaned.is_empty() {
                    result.push(cleaned);
                }
            }
            other => result.push(other.as_os_str()),
        }
    }
    result
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        // create_dir_all tolerates existing directories and concurrent creators
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Sanitize a full path and make sure all of its ancestor directories exist
///
/// Re-applying it to its own output returns the same path.
pub fn sanitize_path(full_path: &Path) -> io::Result<PathBuf> {
    let sanitized = sanitized_form(full_path);
    ensure_parent(&sanitized)?;
    Ok(sanitized)
}

/// Sanitize only the part of `path` below `root`, keeping the result inside `root`
///
/// Paths outside `root` fall back to `sanitize_path`.
pub fn sanitize_under(root: &Path, path: &Path) -> io::Result<PathBuf> {
    let Ok(relative) = path.strip_prefix(root) else {
        return sanitize_path(path);
    };
    let sanitized = root.join(sanitized_form(relative));
    ensure_parent(&sanitized)?;
    Ok(sanitized)
}

/// Append `-XXXXXX` to the file stem, keeping the extension
fn with_random_suffix(path: &Path) -> PathBuf {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6).map(|_| random_alnum(&mut rng)).collect();

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{suffix}"),
    };
    path.with_file_name(name)
}

/// Move an unsafe member of `root` to its sanitized location and return the new path
///
/// An existing file at the destination is never overwritten; a random suffix is
/// added to the file name until a free name is found.
pub fn relocate(root: &Path, path: &Path) -> io::Result<PathBuf> {
    let sanitized = sanitize_under(root, path)?;
    if sanitized == path {
        return Ok(sanitized);
    }

    let mut destination = sanitized.clone();
    let mut attempts = 0;
    while destination.exists() {
        attempts += 1;
        if attempts > MAX_RELOCATE_ATTEMPTS {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("no free sanitized name for {}", sanitized.display()),
            ));
        }
        destination = with_random_suffix(&sanitized);
    }

    fs::rename(path, &destination)?;
    tracing::debug!(
        "Relocated {} -> {}",
        path.display(),
        destination.display()
    );
    Ok(destination)
}

/// Rename every unacceptable entry below `root`, deepest first
///
/// Files are renamed before the directories containing them. An entry is left in
/// place when its sanitized name already exists or sanitizes to nothing.
/// Returns the number of renamed entries.
pub fn sanitize_tree_in_place(root: &Path) -> io::Result<usize> {
    let entries: Vec<walkdir::DirEntry> = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .collect::<Result<_, _>>()
        .map_err(io::Error::other)?;

    let mut renamed = 0;
    for entry in entries {
        if is_acceptable_name(entry.file_name()) {
            continue;
        }
        let Some(parent) = entry.path().parent() else {
            continue;
        };

        let is_file = !entry.file_type().is_dir();
        let cleaned = sanitize_component(&entry.file_name().to_string_lossy(), is_file);
        if cleaned.is_empty() {
            tracing::debug!("Skipping {}: name sanitizes to nothing", entry.path().display());
            continue;
        }

        let destination = parent.join(cleaned);
        if destination.exists() {
            tracing::debug!(
                "Skipping {}: {} already exists",
                entry.path().display(),
                destination.display()
            );
            continue;
        }

        fs::rename(entry.path(), &destination)?;
        renamed += 1;
    }

    Ok(renamed)
}
