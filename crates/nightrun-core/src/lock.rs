//! Named resource locks backed by `flock`.
//!
//! One lock file per physical resource lives in a shared directory; taking
//! the blocking exclusive lock serializes conflicting runs across
//! independent process trees. There is deliberately no unlock path: the OS
//! releases `flock` on process exit, which also covers the crash case.

use std::env;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::Result;

/// Environment variable naming the lock-file directory.
pub const RESOURCES_DIR_ENV: &str = "RESOURCES_DIR";

/// Expand logical resource names via `RESOURCES_<NAME>` aliases.
///
/// `RESOURCES_FOO=bar,baz` maps the logical resource `foo` onto the two
/// physical resources `bar` and `baz`. Names without an alias pass through.
pub fn expand_resources(names: &[String]) -> Vec<String> {
    let mut resources = Vec::new();
    for name in names {
        match env::var(format!("RESOURCES_{}", name.to_uppercase())) {
            Ok(replacement) => {
                resources.extend(replacement.split(',').map(|s| s.trim().to_string()))
            }
            Err(_) => resources.push(name.clone()),
        }
    }
    if resources != names {
        tracing::info!(?names, ?resources, "replaced resource set based on RESOURCES_* env vars");
    }
    resources
}

/// Held exclusive locks. Dropping releases them, but the intended lifetime
/// is "until process exit": callers keep this alive for the whole run.
pub struct ResourceLocks {
    held: Vec<(String, File)>,
}

impl ResourceLocks {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.held.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Sequentially take a blocking exclusive `flock` on one file per resource.
pub fn lock_resources(dir: &Path, names: &[String]) -> Result<ResourceLocks> {
    fs::create_dir_all(dir)?;
    let mut held = Vec::new();
    for name in names {
        let path = lock_path(dir, name);
        tracing::info!(resource = %name, path = %path.display(), "locking resource");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;
        file.lock_exclusive()?;
        tracing::info!(resource = %name, "locked resource");
        held.push((name.clone(), file));
    }
    Ok(ResourceLocks { held })
}

pub fn lock_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.lock"))
}
