//! Rigid registration capability

use crate::error::Result;
use crate::transform::RigidTransform;
use crate::volume::{Mask, Volume};

/// Everything a registrar needs to align one moving image to a reference
#[derive(Clone, Copy, Debug)]
pub struct RegistrationRequest<'a> {
    /// Position of the moving image in the input list
    pub index: usize,
    pub moving: &'a Volume,
    pub moving_mask: Option<&'a Mask>,
    pub reference: &'a Volume,
    pub reference_mask: Option<&'a Mask>,
    /// Warm start from the previous iteration for the same input
    pub init: Option<&'a RigidTransform>,
}

/// Computes a rigid transform mapping the moving image onto the reference
pub trait Registrar {
    fn register(&self, request: &RegistrationRequest<'_>) -> Result<RigidTransform>;
}

impl<R: Registrar + ?Sized> Registrar for &R {
    fn register(&self, request: &RegistrationRequest<'_>) -> Result<RigidTransform> {
        (**self).register(request)
    }
}

/// For inputs that are already aligned: returns the seed, or the identity
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityRegistrar;

impl Registrar for IdentityRegistrar {
    fn register(&self, request: &RegistrationRequest<'_>) -> Result<RigidTransform> {
        Ok(request.init.cloned().unwrap_or_default())
    }
}
