//! mrtrix3-backed registration and resampling

use std::path::Path;
use std::process::Command;

use tracing::debug;

use super::{run_tool, Scratch};
use crate::error::{Error, Result};
use crate::registration::{Registrar, RegistrationRequest};
use crate::resample::{Interpolation, Resampler};
use crate::transform::RigidTransform;
use crate::volume::{Grid, Volume};

/// Executable names for the mrtrix3 commands
#[derive(Clone, Debug)]
pub struct MrtrixTools {
    pub mrregister: String,
    pub mrtransform: String,
}

impl Default for MrtrixTools {
    fn default() -> Self {
        Self {
            mrregister: "mrregister".to_string(),
            mrtransform: "mrtransform".to_string(),
        }
    }
}

impl MrtrixTools {
    pub fn registrar<'a>(&self, scratch: &'a Scratch) -> MrRegister<'a> {
        MrRegister { scratch, program: self.mrregister.clone() }
    }

    pub fn resampler<'a>(&self, scratch: &'a Scratch) -> MrTransform<'a> {
        MrTransform { scratch, program: self.mrtransform.clone() }
    }
}

/// Rigid registration with `mrregister -type rigid`
///
/// mrregister writes the reference-to-moving matrix; it is inverted on read,
/// and seeds are inverted before they are handed over.
pub struct MrRegister<'a> {
    scratch: &'a Scratch,
    program: String,
}

impl<'a> MrRegister<'a> {
    pub fn new(scratch: &'a Scratch) -> Self {
        MrtrixTools::default().registrar(scratch)
    }

    fn run(&self, request: &RegistrationRequest<'_>) -> Result<RigidTransform> {
        let stem = format!("img{}", request.index);
        let moving = self.scratch.write_volume(&stem, request.moving)?;
        let reference = self.scratch.write_volume("reference", request.reference)?;
        let output = self.scratch.unique(&format!("{}_rigid", stem), "txt");

        let mut cmd = Command::new(&self.program);
        cmd.arg(&moving)
            .arg(&reference)
            .args(["-type", "rigid", "-rigid"])
            .arg(&output);
        if let Some(mask) = request.moving_mask {
            cmd.arg("-mask1").arg(self.scratch.write_mask(&format!("{}_mask", stem), mask)?);
        }
        if let Some(mask) = request.reference_mask {
            cmd.arg("-mask2").arg(self.scratch.write_mask("reference_mask", mask)?);
        }
        if let Some(init) = request.init {
            let seed = self.scratch.unique(&format!("{}_init", stem), "txt");
            init.inverse().write(&seed)?;
            cmd.arg("-rigid_init_matrix").arg(&seed);
        }
        cmd.arg("-force");

        run_tool("registration", &mut cmd)?;
        Ok(RigidTransform::read(&output)?.inverse())
    }
}

impl Registrar for MrRegister<'_> {
    fn register(&self, request: &RegistrationRequest<'_>) -> Result<RigidTransform> {
        self.run(request).map_err(|e| match e {
            Error::Registration { .. } => e,
            other => Error::Registration { input: request.index, message: other.to_string() },
        })
    }
}

/// Resampling with `mrtransform -linear -template`
///
/// `-linear` takes the template-to-moving matrix, the inverse of ours.
pub struct MrTransform<'a> {
    scratch: &'a Scratch,
    program: String,
}

impl<'a> MrTransform<'a> {
    pub fn new(scratch: &'a Scratch) -> Self {
        MrtrixTools::default().resampler(scratch)
    }

    fn write_template(&self, template: &Grid) -> Result<std::path::PathBuf> {
        self.scratch.write_volume("template", &Volume::filled(template.clone(), 0.0))
    }
}

impl Resampler for MrTransform<'_> {
    fn resample(
        &self,
        volume: &Volume,
        transform: &RigidTransform,
        template: &Grid,
        interpolation: Interpolation,
    ) -> Result<Volume> {
        let input = self.scratch.write_volume("moving", volume)?;
        let linear = self.scratch.unique("linear", "txt");
        transform.inverse().write(&linear)?;
        let template_path = self.write_template(template)?;
        let output = self.scratch.unique("regrid", "nii");

        let mut cmd = Command::new(&self.program);
        cmd.arg(&input)
            .arg(&output)
            .arg("-linear")
            .arg(&linear)
            .arg("-template")
            .arg(&template_path)
            .args(["-interp", interpolation.as_str(), "-force"]);
        run_tool("resample", &mut cmd)?;

        let resampled = self.scratch.read_volume(&output)?;
        check_template_shape(&output, &resampled, template)?;
        debug!(interpolation = %interpolation, "resampled onto template");
        Ok(resampled)
    }
}

fn check_template_shape(path: &Path, volume: &Volume, template: &Grid) -> Result<()> {
    if volume.grid.same_shape(template) {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "'{}' has shape {:?}, template has {:?}",
            path.display(),
            volume.dims(),
            template.dims
        )))
    }
}
