//! Atomic destination-file rendering.
//!
//! Change detection is byte-exact against the current destination
//! contents. Writes go through a temp file in the destination's
//! directory, are fsynced, then renamed into place, so readers never
//! observe a partial file.

use std::fs;
use std::io::Write;
use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};

use crate::constants::DEFAULT_FILE_PERMS;
use crate::errors::RenderError;


/// What a render call is asked to do.
pub struct RenderInput<'a> {
    pub contents: &'a str,
    pub dest: &'a Path,
    /// Octal mode string; the destination's current mode wins over the
    /// default when absent.
    pub perms: Option<&'a str>,
    pub backup: bool,
    pub dry: bool,
}

/// `would_render` reports the contents are correct (written or already
/// in place); `did_render` reports this call touched the filesystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderResult {
    pub did_render: bool,
    pub would_render: bool,
}

pub fn render(input: &RenderInput<'_>) -> Result<RenderResult, RenderError> {
    let existing = match fs::read(input.dest) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(source) => {
            return Err(RenderError::Write {
                dest: input.dest.to_path_buf(),
                source,
            })
        }
    };

    if existing.as_deref() == Some(input.contents.as_bytes()) {
        debug!("(renderer) {:?} is unchanged", input.dest);
        return Ok(RenderResult {
            did_render: false,
            would_render: true,
        });
    }

    if input.dry {
        info!("(renderer) dry run: would render {:?}", input.dest);
        return Ok(RenderResult {
            did_render: false,
            would_render: true,
        });
    }

    let mode = match input.perms {
        Some(s) => parse_file_mode(s)?,
        None => current_mode(input.dest).unwrap_or(DEFAULT_FILE_PERMS),
    };

    if input.backup && existing.is_some() {
        let backup = backup_path(input.dest);
        fs::rename(input.dest, &backup).map_err(|source| RenderError::Write {
            dest: input.dest.to_path_buf(),
            source,
        })?;
        debug!("(renderer) backed up {:?} to {:?}", input.dest, backup);
    }

    let parent = input
        .dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| RenderError::NoParent(input.dest.to_path_buf()))?;
    atomic_write(parent, input.dest, input.contents.as_bytes(), mode).map_err(|source| {
        RenderError::Write {
            dest: input.dest.to_path_buf(),
            source,
        }
    })?;
    info!("(renderer) rendered {:?}", input.dest);
    Ok(RenderResult {
        did_render: true,
        would_render: true,
    })
}

/// Accepts `"0644"` and `"644"`, both read as octal.
pub fn parse_file_mode(s: &str) -> Result<u32, RenderError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(RenderError::InvalidPerms(s.to_string()));
    }
    u32::from_str_radix(trimmed, 8)
        .map_err(|_| RenderError::InvalidPerms(s.to_string()))
        .and_then(|mode| {
            if mode > 0o7777 {
                Err(RenderError::InvalidPerms(s.to_string()))
            } else {
                Ok(mode)
            }
        })
}

fn backup_path(dest: &Path) -> std::path::PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".bak");
    std::path::PathBuf::from(name)
}

#[cfg(unix)]
fn current_mode(dest: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(dest)
        .ok()
        .map(|m| m.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn current_mode(_dest: &Path) -> Option<u32> {
    None
}

fn atomic_write(parent: &Path, dest: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    fs::create_dir_all(parent)?;

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let tmp = parent.join(format!(
        ".{}.{}",
        dest.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "render".to_string()),
        suffix
    ));

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        set_mode(&file, mode)?;
        drop(file);
        fs::rename(&tmp, dest)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(unix)]
fn set_mode(file: &fs::File, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &fs::File, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
