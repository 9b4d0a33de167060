//! Subprocess-backed capabilities
//!
//! Registration, resampling and brain extraction can be delegated to
//! mrtrix3 and hd-bet. Every intermediate file lives in a [`Scratch`]
//! directory owned by one run and removed when it is dropped.

mod hdbet;
mod mrtrix;

pub use hdbet::HdBet;
pub use mrtrix::{MrRegister, MrTransform, MrtrixTools};

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::nifti_io::{read_nifti_file, save_mask_to_file, save_nifti_to_file};
use crate::volume::{Mask, Volume};

/// Run-scoped working directory for intermediate files
pub struct Scratch {
    dir: TempDir,
    counter: Cell<usize>,
}

impl Scratch {
    /// Create a fresh directory under `parent` (system temp dir if `None`).
    /// With `keep`, the directory survives the run for inspection.
    pub fn new(parent: Option<&Path>, keep: bool) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("nii-superres-").disable_cleanup(keep);
        let dir = match parent {
            Some(p) => builder.tempdir_in(p).map_err(|e| Error::io(p, e))?,
            None => builder.tempdir().map_err(|e| Error::io(std::env::temp_dir(), e))?,
        };
        if keep {
            info!(path = %dir.path().display(), "keeping scratch directory");
        } else {
            debug!(path = %dir.path().display(), "created scratch directory");
        }
        Ok(Self { dir, counter: Cell::new(0) })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A path that no other call on this scratch area has returned
    pub fn unique(&self, stem: &str, extension: &str) -> PathBuf {
        let n = self.counter.get();
        self.counter.set(n + 1);
        self.dir.path().join(format!("{}_{:04}.{}", stem, n, extension))
    }

    pub fn write_volume(&self, stem: &str, volume: &Volume) -> Result<PathBuf> {
        let path = self.unique(stem, "nii");
        save_nifti_to_file(&path, volume)?;
        Ok(path)
    }

    pub fn write_mask(&self, stem: &str, mask: &Mask) -> Result<PathBuf> {
        let path = self.unique(stem, "nii");
        save_mask_to_file(&path, mask)?;
        Ok(path)
    }

    pub fn read_volume(&self, path: &Path) -> Result<Volume> {
        read_nifti_file(path)
    }
}

/// Run an external program to completion; non-zero exit is an error
pub fn run_tool(stage: &str, command: &mut Command) -> Result<Output> {
    let tool = command.get_program().to_string_lossy().into_owned();
    debug!(stage, command = ?command, "running external tool");

    let output = command.output().map_err(|e| Error::ExternalTool {
        tool: tool.clone(),
        stage: stage.to_string(),
        status: format!("could not start: {}", e),
        stderr: String::new(),
    })?;

    if !output.status.success() {
        return Err(Error::ExternalTool {
            tool,
            stage: stage.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output)
}
