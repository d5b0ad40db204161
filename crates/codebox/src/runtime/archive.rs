//! Tar archives for moving files across the container boundary
//!
//! The container runtime uploads and downloads paths as tar streams. Uploads
//! are single-file archives named after the destination; downloads are
//! rooted at the source's base name, which [`unpack_into`] renames to the
//! requested host destination.

use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tar::{Archive, Builder, EntryType, Header};

/// Build a single-file archive holding `content` under `name`
pub fn pack_bytes(name: &str, content: &[u8], mode: u32) -> io::Result<Vec<u8>> {
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    header.set_mtime(mtime);

    let mut builder = Builder::new(Vec::new());
    builder.append_data(&mut header, name, content)?;
    builder.into_inner()
}

/// Build an archive of a directory's contents, used as an image build context
pub fn pack_dir(dir: &Path) -> io::Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

/// Permission bits of a host file, as stored in archive headers
pub fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o7777
    }
    #[cfg(not(unix))]
    {
        if metadata.permissions().readonly() { 0o444 } else { 0o644 }
    }
}

/// Extract an archive rooted at `root` so that `root` lands at `dest`
///
/// Entries under another top-level name keep their names and land next to
/// `dest`. Parent directories are created on demand, so an archive with no
/// entries leaves the host untouched. Returns the number of entries written.
///
/// Hard links are rejected, and so are symlinks resolving outside `dest` and
/// entries placed beneath an extracted symlink.
pub fn unpack_into(archive: &[u8], root: &str, dest: &Path) -> io::Result<usize> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let dest_name = dest.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("destination has no file name: {}", dest.display()),
        )
    })?;

    let mut archive = Archive::new(archive);
    let mut links: Vec<PathBuf> = Vec::new();
    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let Some(relative) = relocate(&path, root, dest_name.as_ref())? else {
            continue;
        };
        if links.iter().any(|link| relative != *link && relative.starts_with(link)) {
            return Err(invalid(format!(
                "archive entry is beneath a symlink: {}",
                path.display()
            )));
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_hard_link() {
            return Err(invalid(format!(
                "hard links are not supported: {}",
                path.display()
            )));
        }
        if entry_type.is_symlink() {
            let link = entry
                .link_name()?
                .ok_or_else(|| invalid(format!("symlink without target: {}", path.display())))?
                .into_owned();
            check_link(&relative, &link, dest_name)?;
            links.push(relative.clone());
        }

        let target = parent.join(&relative);
        if let Some(dir) = target.parent() {
            std::fs::create_dir_all(dir)?;
        }
        entry.unpack(&target)?;
        count += 1;
    }

    Ok(count)
}

/// Map an archive path to a path relative to the destination's parent
///
/// Returns `None` for entries that name nothing (e.g., `./`).
fn relocate(path: &Path, root: &str, dest_name: &Path) -> io::Result<Option<PathBuf>> {
    let mut relative = PathBuf::new();
    for (index, component) in path.components().enumerate() {
        match component {
            Component::Normal(part) if index == 0 && part == root => relative.push(dest_name),
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid(format!(
                    "archive entry escapes destination: {}",
                    path.display()
                )));
            }
        }
    }

    Ok((!relative.as_os_str().is_empty()).then_some(relative))
}

/// Ensure a symlink at `entry` (relative to the destination's parent) points
/// inside `dest_name`
fn check_link(entry: &Path, link: &Path, dest_name: &OsStr) -> io::Result<()> {
    let escapes = || {
        invalid(format!(
            "symlink escapes destination: {} -> {}",
            entry.display(),
            link.display()
        ))
    };

    let mut resolved: Vec<&OsStr> = entry
        .parent()
        .map(|dir| dir.iter().collect())
        .unwrap_or_default();
    for component in link.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop().ok_or_else(escapes)?;
            }
            Component::RootDir | Component::Prefix(_) => return Err(escapes()),
        }
    }

    match resolved.first() {
        Some(first) if *first == dest_name => Ok(()),
        _ => Err(escapes()),
    }
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
