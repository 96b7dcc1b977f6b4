//! Translation between scp wire attributes and filesystem metadata.
//!
//! The scp dialect encodes permissions as a 4-digit octal string folding the
//! nine POSIX `rwx` bits and timestamps as whole POSIX-epoch seconds.
//! Set-uid, set-gid and sticky bits are ignored on input; sub-second time
//! components are emitted as `0` and ignored on input.

use anyhow::{Context, Result};
use std::os::unix::prelude::PermissionsExt;

/// Mode sent for files when the peer did not ask for attribute preservation.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Mode sent for directories when the peer did not ask for attribute preservation.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// The nine `{rwx}{ugo}` bits carried by the wire encoding.
pub const PERMISSION_MASK: u32 = 0o777;

/// Fold the nine permission bits of `mode` into the wire's 4-digit octal form.
pub fn format_octal(mode: u32) -> String {
    format!("{:04o}", mode & PERMISSION_MASK)
}

/// Parse a 1-4 digit octal permission string from the wire.
///
/// Set-uid, set-gid and sticky bits are accepted but dropped.
pub fn parse_octal(digits: &str) -> Result<u32> {
    if digits.is_empty()
        || digits.len() > 4
        || !digits.bytes().all(|b| b.is_ascii_digit() && b < b'8')
    {
        return Err(anyhow::anyhow!("invalid octal permission field: {digits:?}"));
    }
    let mode = u32::from_str_radix(digits, 8)
        .with_context(|| format!("invalid octal permission field: {digits:?}"))?;
    Ok(mode & PERMISSION_MASK)
}

/// Permission bits of `metadata` as carried on the wire.
pub fn mode_bits(metadata: &std::fs::Metadata) -> u32 {
    metadata.permissions().mode() & PERMISSION_MASK
}

pub async fn set_permissions(path: &std::path::Path, mode: u32) -> Result<()> {
    tracing::debug!("setting permissions of {:?} to {:04o}", path, mode);
    let permissions = std::fs::Permissions::from_mode(mode & PERMISSION_MASK);
    tokio::fs::set_permissions(path, permissions.clone())
        .await
        .with_context(|| format!("cannot set {:?} permissions to {:?}", &path, &permissions))?;
    Ok(())
}

/// Apply whole-second timestamps to `path`.
pub async fn set_times(path: &std::path::Path, mtime: i64, atime: i64) -> Result<()> {
    let dst = path.to_owned();
    tokio::task::spawn_blocking(move || -> Result<()> {
        tracing::debug!("setting timestamps");
        let atime_spec = nix::sys::time::TimeSpec::new(atime, 0);
        let mtime_spec = nix::sys::time::TimeSpec::new(mtime, 0);
        nix::sys::stat::utimensat(
            nix::fcntl::AT_FDCWD,
            &dst,
            &atime_spec,
            &mtime_spec,
            nix::sys::stat::UtimensatFlags::NoFollowSymlink,
        )
        .with_context(|| format!("failed setting timestamps for {:?}", &dst))?;
        Ok(())
    })
    .await?
}

/// Whether the current user may write to an existing `path`.
pub async fn is_writable(path: &std::path::Path) -> Result<bool> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || -> Result<bool> {
        match nix::unistd::access(&path, nix::unistd::AccessFlags::W_OK) {
            Ok(()) => Ok(true),
            Err(nix::errno::Errno::EACCES | nix::errno::Errno::EROFS) => Ok(false),
            Err(errno) => {
                Err(anyhow::Error::from(errno))
                    .with_context(|| format!("cannot check write access to {:?}", &path))
            }
        }
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn octal_formatting() {
        assert_eq!(format_octal(0o644), "0644");
        assert_eq!(format_octal(0o7), "0007");
        assert_eq!(format_octal(0o755), "0755");
        // set-uid, set-gid and sticky bits are dropped
        assert_eq!(format_octal(0o4755), "0755");
    }

    #[test]
    fn octal_parsing() {
        assert_eq!(parse_octal("0644").unwrap(), 0o644);
        assert_eq!(parse_octal("755").unwrap(), 0o755);
        assert_eq!(parse_octal("7777").unwrap(), 0o777);
        assert!(parse_octal("").is_err());
        assert!(parse_octal("0868").is_err());
        assert!(parse_octal("worm").is_err());
        assert!(parse_octal("+644").is_err());
        assert!(parse_octal("06440").is_err());
    }

    #[test]
    fn octal_round_trip() {
        for mode in [0o000, 0o123, 0o644, 0o755, 0o777] {
            assert_eq!(parse_octal(&format_octal(mode)).unwrap(), mode);
        }
    }

    #[tokio::test]
    async fn permissions_applied() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("file.txt");
        tokio::fs::write(&path, "x").await?;
        set_permissions(&path, 0o604).await?;
        let metadata = tokio::fs::metadata(&path).await?;
        assert_eq!(mode_bits(&metadata), 0o604);
        Ok(())
    }

    #[tokio::test]
    async fn times_applied_to_the_second() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("file.txt");
        tokio::fs::write(&path, "x").await?;
        set_times(&path, 1_000_000_000, 1_000_000_100).await?;
        let metadata = tokio::fs::metadata(&path).await?;
        assert_eq!(metadata.mtime(), 1_000_000_000);
        assert_eq!(metadata.atime(), 1_000_000_100);
        Ok(())
    }

    #[tokio::test]
    async fn writability_probe() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("file.txt");
        tokio::fs::write(&path, "x").await?;
        assert!(is_writable(&path).await?);
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o400)).await?;
        // root bypasses permission checks, so only assert when not root
        if !nix::unistd::Uid::effective().is_root() {
            assert!(!is_writable(&path).await?);
        }
        Ok(())
    }
}
