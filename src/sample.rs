use std::collections::TryReserveError;

use crate::set::SetError;

/// Vignette geometry shared by all the samples of a [`Set`](crate::Set)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub struct VigSize {
    pub width: usize,
    pub height: usize,
}
impl VigSize {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }
    /// Number of pixels in a vignette
    pub fn len(&self) -> usize {
        self.width * self.height
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Geometric center `(width/2, height/2)`, with integer division
    pub fn center(&self) -> (f64, f64) {
        ((self.width / 2) as f64, (self.height / 2) as f64)
    }
}

/// Allocates a zeroed buffer, reporting allocation failure instead of aborting
fn zeroed<T: Clone + Default>(n: usize) -> Result<Vec<T>, TryReserveError> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(n)?;
    buffer.resize(n, T::default());
    Ok(buffer)
}

/// Calibration star: vignette, derived maps and measurements
///
/// The four pixel buffers are stored row-major (`y * width + x`) and always
/// have the length of the [`VigSize`] of the set that owns the sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub(crate) vig: Vec<f32>,
    pub(crate) vigresi: Vec<f32>,
    pub(crate) vigchi: Vec<f32>,
    pub(crate) vigweight: Vec<f32>,
    pub(crate) context: Vec<f64>,
    /// Centroid offset from the vignette geometric center along x
    pub dx: f64,
    /// Centroid offset from the vignette geometric center along y
    pub dy: f64,
    /// Detector gain [e-/ADU]
    pub gain: f64,
    /// Background noise variance [ADU^2]
    pub backnoise2: f64,
    /// Half-light radius [pixel]
    pub fluxrad: f64,
    /// Photometric flux the vignette is normalized to
    pub norm: f64,
    /// Catalog x coordinate
    pub x: f64,
    /// Catalog y coordinate
    pub y: f64,
    pub catindex: usize,
    pub extindex: usize,
}
impl Sample {
    pub(crate) fn try_new(vig_size: VigSize, ncontext: usize) -> Result<Self, TryReserveError> {
        let n = vig_size.len();
        Ok(Self {
            vig: zeroed(n)?,
            vigresi: zeroed(n)?,
            vigchi: zeroed(n)?,
            vigweight: zeroed(n)?,
            context: zeroed(ncontext)?,
            dx: 0.,
            dy: 0.,
            gain: 0.,
            backnoise2: 0.,
            fluxrad: 0.,
            norm: 0.,
            x: 0.,
            y: 0.,
            catindex: 0,
            extindex: 0,
        })
    }
    /// Number of pixels in each buffer
    pub fn len(&self) -> usize {
        self.vig.len()
    }
    pub fn is_empty(&self) -> bool {
        self.vig.is_empty()
    }
    pub fn vig(&self) -> &[f32] {
        &self.vig
    }
    pub fn vig_mut(&mut self) -> &mut [f32] {
        &mut self.vig
    }
    pub fn vigresi(&self) -> &[f32] {
        &self.vigresi
    }
    pub fn vigresi_mut(&mut self) -> &mut [f32] {
        &mut self.vigresi
    }
    pub fn vigchi(&self) -> &[f32] {
        &self.vigchi
    }
    pub fn vigchi_mut(&mut self) -> &mut [f32] {
        &mut self.vigchi
    }
    pub fn vigweight(&self) -> &[f32] {
        &self.vigweight
    }
    pub fn vigweight_mut(&mut self) -> &mut [f32] {
        &mut self.vigweight
    }
    pub fn context(&self) -> &[f64] {
        &self.context
    }
    pub fn context_mut(&mut self) -> &mut [f64] {
        &mut self.context
    }
    /// Copies `pixels` into the vignette
    pub fn set_vig(&mut self, pixels: &[f32]) -> Result<(), SetError> {
        if pixels.len() != self.vig.len() {
            return Err(SetError::VignetteLength {
                expected: self.vig.len(),
                found: pixels.len(),
            });
        }
        self.vig.copy_from_slice(pixels);
        Ok(())
    }
    /// Copies `values` into the context vector
    pub fn set_context(&mut self, values: &[f64]) -> Result<(), SetError> {
        if values.len() != self.context.len() {
            return Err(SetError::ContextLength {
                expected: self.context.len(),
                found: values.len(),
            });
        }
        self.context.copy_from_slice(values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation() {
        let sample = Sample::try_new(VigSize::new(5, 3), 2).unwrap();
        assert_eq!(sample.len(), 15);
        assert_eq!(sample.vigresi().len(), 15);
        assert_eq!(sample.vigchi().len(), 15);
        assert_eq!(sample.vigweight().len(), 15);
        assert_eq!(sample.context().len(), 2);
        assert!(sample.vig().iter().all(|&p| p == 0.));
    }

    #[test]
    fn vignette_length_mismatch() {
        let mut sample = Sample::try_new(VigSize::new(2, 2), 0).unwrap();
        assert!(sample.set_vig(&[1., 2., 3.]).is_err());
        sample.set_vig(&[1., 2., 3., 4.]).unwrap();
        assert_eq!(sample.vig(), &[1., 2., 3., 4.]);
        assert!(sample.set_context(&[1.]).is_err());
    }

    #[test]
    fn center_uses_integer_division() {
        assert_eq!(VigSize::new(25, 24).center(), (12., 12.));
    }
}
