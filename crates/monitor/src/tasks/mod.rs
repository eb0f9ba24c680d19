//! Built-in monitoring tasks.
mod checkpoint;
mod recorders;
mod sleep;
mod timings;
mod trace;

pub use checkpoint::*;
pub use recorders::*;
pub use sleep::*;
pub use timings::*;
pub use trace::*;

#[cfg(test)]
pub(crate) use timings::tests::SharedBuffer;

use crate::errors::Result;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Publishes a file atomically: `write` fills a temporary file beside `path`
/// which is synced to disk then renamed over `path`.
pub(crate) fn publish<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let mut tmp = PathBuf::from(path);
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    tmp.set_file_name(name);

    let res = write(&tmp).and_then(|_| Ok(File::open(&tmp)?.sync_all()?));
    if let Err(err) = res {
        let _ = std::fs::remove_file(&tmp);
        return Err(err);
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}
