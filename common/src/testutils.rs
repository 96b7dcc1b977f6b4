#![allow(dead_code)]

use anyhow::{Context, Result};

async fn create_temp_dir() -> Result<std::path::PathBuf> {
    let mut idx = 0;
    loop {
        let tmp_dir = std::env::temp_dir().join(format!("rscp_test{}", &idx));
        if let Err(error) = tokio::fs::create_dir(&tmp_dir).await {
            match error.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    idx += 1;
                }
                _ => return Err(error.into()),
            }
        } else {
            return Ok(tmp_dir);
        }
    }
}

pub async fn setup_test_dir() -> Result<std::path::PathBuf> {
    // create a temporary directory
    let tmp_dir = create_temp_dir().await?;
    // foo
    // |- 0.txt
    // |- bar
    //    |- 1.txt
    //    |- 2.txt
    //    |- 3.txt
    // |- baz
    //    |- 4.txt
    let foo_path = tmp_dir.join("foo");
    tokio::fs::create_dir(&foo_path).await.unwrap();
    tokio::fs::write(foo_path.join("0.txt"), "0").await.unwrap();
    let bar_path = foo_path.join("bar");
    tokio::fs::create_dir(&bar_path).await.unwrap();
    tokio::fs::write(bar_path.join("1.txt"), "1").await.unwrap();
    tokio::fs::write(bar_path.join("2.txt"), "2").await.unwrap();
    tokio::fs::write(bar_path.join("3.txt"), "3").await.unwrap();
    let baz_path = foo_path.join("baz");
    tokio::fs::create_dir(&baz_path).await.unwrap();
    tokio::fs::write(baz_path.join("4.txt"), "4").await.unwrap();
    Ok(tmp_dir)
}

/// Compare two trees produced by an scp transfer.
///
/// Symlinks in `src` are followed - the transfer materializes their targets.
/// Timestamps compare to the whole second only, matching the wire encoding.
pub fn check_dirs_identical(
    src: &std::path::Path,
    dst: &std::path::Path,
    check_modes: bool,
    check_times: bool,
) -> Result<()> {
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::prelude::PermissionsExt;
    for src_entry in std::fs::read_dir(src)? {
        let src_entry_path = src_entry?.path();
        let src_entry_name = src_entry_path.file_name().unwrap();
        let dst_entry_path = dst.join(src_entry_name);
        let src_md = std::fs::metadata(&src_entry_path)
            .context(format!("Source file {:?} is missing!", &src_entry_path))?;
        let dst_md = std::fs::metadata(&dst_entry_path).context(format!(
            "Destination file {:?} is missing!",
            &dst_entry_path
        ))?;
        assert_eq!(src_md.is_dir(), dst_md.is_dir());
        if src_md.is_file() {
            let src_contents = std::fs::read(&src_entry_path)?;
            let dst_contents = std::fs::read(&dst_entry_path)?;
            assert_eq!(src_contents, dst_contents);
        } else {
            check_dirs_identical(&src_entry_path, &dst_entry_path, check_modes, check_times)?;
        }
        if check_modes {
            assert_eq!(
                src_md.permissions().mode() & 0o777,
                dst_md.permissions().mode() & 0o777,
                "mode doesn't match for {:?} {:?}",
                src_entry_path,
                dst_entry_path
            );
        }
        if check_times && src_md.is_file() {
            // NOTE: skip comparing "atime" - reading the source during the
            // transfer updates it
            assert_eq!(
                src_md.mtime(),
                dst_md.mtime(),
                "mtime doesn't match for {:?} {:?}",
                src_entry_path,
                dst_entry_path
            );
        }
    }
    Ok(())
}
