//! Per-action isolated HOME directories.
//!
//! Actions marked `need_home` get a private clone of a template home
//! directory so that concurrent siblings cannot race on the same dotfiles.
//! The clone is rearranged into an explicit XDG layout (`cache/`, `config/`,
//! `data/`) with the traditional dot-directories left behind as symlinks.

use std::env;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Dot-directory → XDG subdirectory → environment variable.
const XDG_MAPPING: &[(&str, &str, &str)] = &[
    (".cache", "cache", "XDG_CACHE_HOME"),
    (".config", "config", "XDG_CONFIG_HOME"),
    (".local/share", "data", "XDG_DATA_HOME"),
];

/// Clone `template` into `<tmpdir>/home/<action>` (reusing an existing
/// clone), remap it to the XDG layout, and point `HOME` plus the XDG
/// environment variables of the current process at it.
///
/// Runs in the forked worker, so the environment changes stay private to
/// the action.
pub fn clone_home(template: &Path, tmpdir: &Path, action: &str) -> Result<PathBuf> {
    let home = tmpdir.join("home").join(action);
    if !home.is_dir() {
        copy_tree(template, &home)?;
    }
    env::set_var("HOME", &home);

    for (old, new, var) in XDG_MAPPING {
        let olddir = home.join(old);
        let newdir = home.join(new);
        if !newdir.exists() {
            if !olddir.is_dir() {
                fs::create_dir_all(&olddir)?;
            }
            fs::rename(&olddir, &newdir)?;
            // Keep the old name as a symlink, just in case.
            symlink(&newdir, &olddir)?;
        }
        env::set_var(var, &newdir);
    }
    Ok(home)
}

/// Recursive copy keeping symlinks as symlinks. Special files (sockets,
/// fifos) and `*.pid` files left behind by concurrent daemons are skipped.
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(".pid") {
            continue;
        }
        let source = entry.path();
        let target = to.join(&name);
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            symlink(fs::read_link(&source)?, &target)?;
        } else if file_type.is_dir() {
            copy_tree(&source, &target)?;
        } else if file_type.is_file() {
            fs::copy(&source, &target)?;
        }
        // Anything else is not copyable home state.
    }
    Ok(())
}
