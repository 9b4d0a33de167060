//! Brain-extraction capability used to refresh the alignment mask

use crate::error::Result;
use crate::utils::threshold::otsu_threshold;
use crate::volume::{Mask, Volume};

/// Produces a binary brain mask for a volume
pub trait MaskExtractor {
    fn extract(&self, volume: &Volume) -> Result<Mask>;
}

impl<M: MaskExtractor + ?Sized> MaskExtractor for &M {
    fn extract(&self, volume: &Volume) -> Result<Mask> {
        (**self).extract(volume)
    }
}

/// Foreground mask from an Otsu threshold on the intensities
///
/// In-process fallback when hd-bet is not installed; it separates head from
/// background but does not strip the skull.
#[derive(Clone, Copy, Debug)]
pub struct OtsuMask {
    pub num_bins: usize,
}

impl Default for OtsuMask {
    fn default() -> Self {
        Self { num_bins: 256 }
    }
}

impl MaskExtractor for OtsuMask {
    fn extract(&self, volume: &Volume) -> Result<Mask> {
        let threshold = otsu_threshold(&volume.data, self.num_bins);
        Ok(Mask::from_volume(volume, threshold))
    }
}
