//! Brain extraction with hd-bet

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{run_tool, Scratch};
use crate::brain_mask::MaskExtractor;
use crate::error::Result;
use crate::nifti_io::read_mask_file;
use crate::volume::{Mask, Volume};

/// `hd-bet -i in -o out -device <device> -mode <mode> -tta <0|1>`
pub struct HdBet<'a> {
    scratch: &'a Scratch,
    pub program: String,
    pub device: String,
    pub mode: String,
    pub tta: bool,
}

impl<'a> HdBet<'a> {
    pub fn new(scratch: &'a Scratch) -> Self {
        Self {
            scratch,
            program: "hd-bet".to_string(),
            device: "cpu".to_string(),
            mode: "fast".to_string(),
            tta: false,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

/// hd-bet writes the mask next to its output as `<stem>_mask.nii.gz`
fn mask_path(output: &Path) -> PathBuf {
    let name = output.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let stem = name
        .strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(&name);
    output.with_file_name(format!("{}_mask.nii.gz", stem))
}

impl MaskExtractor for HdBet<'_> {
    fn extract(&self, volume: &Volume) -> Result<Mask> {
        let input = self.scratch.unique("fused", "nii.gz");
        crate::nifti_io::save_nifti_to_file(&input, volume)?;
        let output = self.scratch.unique("bet", "nii.gz");

        let mut cmd = Command::new(&self.program);
        cmd.arg("-i")
            .arg(&input)
            .arg("-o")
            .arg(&output)
            .args(["-device", self.device.as_str(), "-mode", self.mode.as_str(), "-tta", if self.tta { "1" } else { "0" }]);
        run_tool("brain mask", &mut cmd)?;

        read_mask_file(&mask_path(&output))
    }
}
