/*!
# Sample set

The [`Set`] holds the calibration samples of a PSF model.

Samples live in an arena of fully allocated slots: the first [`Set::len`]
slots are live, the remaining ones up to [`Set::capacity`] are spare
capacity whose content is unspecified. Indices are the only durable handles
to samples: removing a sample moves the last live one into its slot.
*/

use std::collections::TryReserveError;

use rayon::prelude::*;
use serde::Deserialize;

use crate::{
    context::Parameter,
    make_weights, recenter,
    selection::{Candidate, Rejection, SelectionCriteria},
    Context, RecenterConfig, RecenterStatus, Recentering, Sample, VigSize,
};

/// Number of slots allocated by the first growth of a set
pub const DEFAULT_CAPACITY: usize = 1000;
/// Capacity ratio between consecutive growths
pub const GROWTH_RATIO: f64 = 1.62;

#[derive(Debug, thiserror::Error)]
pub enum SetError {
    #[error("failed to allocate sample storage")]
    Allocation(#[from] TryReserveError),
    #[error("the vignette size must be set before allocating samples")]
    VigSizeUnset,
    #[error("cannot change the vignette size from {current:?} to {requested:?} while samples are allocated")]
    VigSizeLocked { current: VigSize, requested: VigSize },
    #[error("invalid vignette size {0:?}")]
    InvalidVigSize(VigSize),
    #[error("sample index {index} out of range (#samples: {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("context index {index} out of range (#context: {ncontext})")]
    ContextIndex { index: usize, ncontext: usize },
    #[error("expected a vignette of {expected} pixels, found {found}")]
    VignetteLength { expected: usize, found: usize },
    #[error("expected {expected} context values, found {found}")]
    ContextLength { expected: usize, found: usize },
}
type Result<T> = std::result::Result<T, SetError>;

/// Catalog extension the candidates of a shipment come from
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Extension {
    pub catindex: usize,
    pub extindex: usize,
    /// Detector gain [e-/ADU]
    pub gain: f64,
    /// Background noise variance [ADU^2]
    pub backnoise2: f64,
}

/// Number of candidates failing each selection criterion
///
/// A candidate failing several criteria is counted under each of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rejections {
    pub flags: usize,
    pub signal_to_noise: usize,
    pub fluxrad_min: usize,
    pub fluxrad_max: usize,
    pub elongation: usize,
    pub bad_pixels: usize,
}
impl Rejections {
    pub fn record(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::Flags => self.flags += 1,
            Rejection::SignalToNoise => self.signal_to_noise += 1,
            Rejection::FluxRadiusTooSmall => self.fluxrad_min += 1,
            Rejection::FluxRadiusTooLarge => self.fluxrad_max += 1,
            Rejection::Elongation => self.elongation += 1,
            Rejection::BadPixels => self.bad_pixels += 1,
        }
    }
    pub fn total(&self) -> usize {
        self.flags
            + self.signal_to_noise
            + self.fluxrad_min
            + self.fluxrad_max
            + self.elongation
            + self.bad_pixels
    }
}

/// Recentering outcomes of [`Set::finish_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinishSummary {
    pub converged: usize,
    pub no_flux: usize,
    pub iteration_limit: usize,
}
impl FinishSummary {
    fn add(mut self, status: RecenterStatus) -> Self {
        match status {
            RecenterStatus::Converged => self.converged += 1,
            RecenterStatus::NoFlux => self.no_flux += 1,
            RecenterStatus::IterationLimit => self.iteration_limit += 1,
        }
        self
    }
    fn merge(self, other: Self) -> Self {
        Self {
            converged: self.converged + other.converged,
            no_flux: self.no_flux + other.no_flux,
            iteration_limit: self.iteration_limit + other.iteration_limit,
        }
    }
}

/// Store of calibration samples sharing the same vignette geometry
///
/// # Example
///
/// ```rust
/// use psf_samples::{Context, Set};
///
/// let mut set = Set::new(&Context::new(["X_IMAGE", "Y_IMAGE"]))?;
/// set.set_vig_size(15, 15)?;
/// for i in 0..3 {
///     set.append()?.x = i as f64;
/// }
/// set.remove(0)?;
/// assert_eq!(set.get(0).map(|s| s.x), Some(2.));
/// # Ok::<(), psf_samples::SetError>(())
/// ```
#[derive(Debug, Default)]
pub struct Set {
    samples: Vec<Sample>,
    nsample: usize,
    vig_size: VigSize,
    context: Vec<Parameter>,
    recenter: RecenterConfig,
    rejections: Rejections,
    fwhm: f64,
}
impl Set {
    /// Creates an empty set with the context parameters of `context`
    pub fn new(context: &Context) -> Result<Self> {
        let mut parameters = Vec::new();
        parameters.try_reserve_exact(context.len())?;
        parameters.extend(context.parameters.iter().cloned());
        Ok(Self {
            context: parameters,
            ..Default::default()
        })
    }
    /// Sets the windowed barycenter settings used by [`Set::recenter`]
    pub fn recenter_config(mut self, config: RecenterConfig) -> Self {
        self.recenter = config;
        self
    }
    /// Sets the vignette geometry
    ///
    /// The geometry can only change while no sample slot is allocated.
    pub fn set_vig_size(&mut self, width: usize, height: usize) -> Result<()> {
        let requested = VigSize::new(width, height);
        if requested.is_empty() {
            return Err(SetError::InvalidVigSize(requested));
        }
        if !self.samples.is_empty() && requested != self.vig_size {
            return Err(SetError::VigSizeLocked {
                current: self.vig_size,
                requested,
            });
        }
        self.vig_size = requested;
        Ok(())
    }
    pub fn vig_size(&self) -> VigSize {
        self.vig_size
    }
    /// Number of live samples
    pub fn len(&self) -> usize {
        self.nsample
    }
    pub fn is_empty(&self) -> bool {
        self.nsample == 0
    }
    /// Number of allocated sample slots
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }
    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples().get(index)
    }
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Sample> {
        self.samples_mut().get_mut(index)
    }
    /// Live samples
    pub fn samples(&self) -> &[Sample] {
        &self.samples[..self.nsample]
    }
    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.samples[..self.nsample]
    }
    fn sample_mut(&mut self, index: usize) -> Result<&mut Sample> {
        let len = self.nsample;
        self.get_mut(index)
            .ok_or(SetError::IndexOutOfRange { index, len })
    }
    /// Checks that a sample still has the geometry of the set
    ///
    /// A slot overwritten with a sample from another set keeps its own buffers.
    fn check_geometry(&self, sample: &Sample) -> Result<()> {
        if sample.len() != self.vig_size.len() {
            return Err(SetError::VignetteLength {
                expected: self.vig_size.len(),
                found: sample.len(),
            });
        }
        Ok(())
    }
    fn finishable_mut(&mut self, index: usize) -> Result<&mut Sample> {
        let len = self.nsample;
        let sample = self
            .samples()
            .get(index)
            .ok_or(SetError::IndexOutOfRange { index, len })?;
        self.check_geometry(sample)?;
        self.sample_mut(index)
    }
    /// Resizes the slot arena to exactly `n` slots
    fn realloc(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            self.release();
        } else if n > self.samples.len() {
            self.samples.try_reserve_exact(n - self.samples.len())?;
            while self.samples.len() < n {
                self.samples
                    .push(Sample::try_new(self.vig_size, self.context.len())?);
            }
        } else if n < self.samples.len() {
            self.samples.truncate(n);
            self.samples.shrink_to_fit();
        }
        Ok(())
    }
    fn release(&mut self) {
        self.samples = Vec::new();
        self.nsample = 0;
    }
    fn grow(&mut self) -> Result<()> {
        let capacity = self.samples.len();
        let new_capacity = if capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            (GROWTH_RATIO * capacity as f64) as usize + 1
        };
        log::debug!("growing sample set: {capacity} -> {new_capacity} slots");
        self.realloc(new_capacity)
    }
    /// Makes a new sample live at index [`Set::len`] and returns it
    ///
    /// The storage grows when all slots are in use; the samples already in
    /// the set keep their index and content.
    pub fn append(&mut self) -> Result<&mut Sample> {
        if self.vig_size.is_empty() {
            return Err(SetError::VigSizeUnset);
        }
        if self.nsample == self.samples.len() {
            self.grow()?;
        }
        let index = self.nsample;
        self.nsample += 1;
        Ok(&mut self.samples[index])
    }
    /// Frees the spare capacity
    pub fn shrink_to_fit(&mut self) {
        if self.nsample == self.samples.len() {
            return;
        }
        log::info!(
            "trimming sample set from {} to {} slots",
            self.samples.len(),
            self.nsample
        );
        if self.nsample == 0 {
            self.release();
        } else {
            self.samples.truncate(self.nsample);
            self.samples.shrink_to_fit();
        }
    }
    /// Removes the sample at `index`, replacing it with the last live sample
    ///
    /// The slot of the removed sample is freed. Returns the sample that now
    /// occupies `index`, or `None` if `index` was the last live sample.
    /// Removing the last remaining sample frees all the storage.
    pub fn remove(&mut self, index: usize) -> Result<Option<&mut Sample>> {
        if index >= self.nsample {
            return Err(SetError::IndexOutOfRange {
                index,
                len: self.nsample,
            });
        }
        let last = self.nsample - 1;
        if last == 0 {
            self.release();
            return Ok(None);
        }
        self.samples.swap(index, last);
        self.samples.swap_remove(last);
        self.nsample = last;
        Ok(self.samples.get_mut(index).filter(|_| index < last))
    }

    /// Number of context parameters
    pub fn ncontext(&self) -> usize {
        self.context.len()
    }
    fn parameter_mut(&mut self, index: usize) -> Result<&mut Parameter> {
        let ncontext = self.context.len();
        self.context
            .get_mut(index)
            .ok_or(SetError::ContextIndex { index, ncontext })
    }
    pub fn context_name(&self, index: usize) -> Option<&str> {
        self.context.get(index).map(|p| p.name.as_str())
    }
    pub fn context_offset(&self, index: usize) -> Option<f64> {
        self.context.get(index).map(|p| p.offset)
    }
    pub fn context_scale(&self, index: usize) -> Option<f64> {
        self.context.get(index).map(|p| p.scale)
    }
    pub fn set_context_name(&mut self, index: usize, name: impl ToString) -> Result<()> {
        self.parameter_mut(index)?.name = name.to_string();
        Ok(())
    }
    pub fn set_context_offset(&mut self, index: usize, offset: f64) -> Result<()> {
        self.parameter_mut(index)?.offset = offset;
        Ok(())
    }
    pub fn set_context_scale(&mut self, index: usize, scale: f64) -> Result<()> {
        self.parameter_mut(index)?.scale = scale;
        Ok(())
    }
    /// Centers and scales each context parameter on the range spanned by the live samples
    pub fn update_context_scaling(&mut self) {
        if self.nsample == 0 {
            return;
        }
        for i in 0..self.context.len() {
            let (min, max) = self.samples[..self.nsample]
                .iter()
                .map(|s| s.context[i])
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), c| {
                    (min.min(c), max.max(c))
                });
            let parameter = &mut self.context[i];
            parameter.offset = (min + max) / 2.;
            parameter.scale = max - min;
            if parameter.scale == 0. {
                log::warn!(
                    "context parameter {} is constant ({}) over the sample set",
                    parameter.name,
                    min
                );
            }
        }
    }
    /// Context vector of the sample at `index` in normalized coordinates
    pub fn normalized_context(&self, index: usize) -> Option<Vec<f64>> {
        self.get(index).map(|sample| {
            sample
                .context
                .iter()
                .zip(&self.context)
                .map(|(c, p)| (c - p.offset) / p.scale)
                .collect()
        })
    }

    pub fn rejections(&self) -> &Rejections {
        &self.rejections
    }
    /// FWHM mode of the stars [pixel]
    pub fn fwhm(&self) -> f64 {
        self.fwhm
    }
    pub fn set_fwhm(&mut self, fwhm: f64) {
        self.fwhm = fwhm;
    }
    /// Screens a catalog entry and stores it as a new sample if accepted
    ///
    /// Returns `None` if the candidate is turned down, every criterion it
    /// fails is then accounted for in [`Set::rejections`].
    pub fn ingest(
        &mut self,
        candidate: &Candidate,
        criteria: &SelectionCriteria,
        extension: &Extension,
    ) -> Result<Option<&mut Sample>> {
        let rejections = criteria.check(candidate);
        if !rejections.is_empty() {
            rejections
                .into_iter()
                .for_each(|rejection| self.rejections.record(rejection));
            return Ok(None);
        }
        if self.vig_size.is_empty() {
            return Err(SetError::VigSizeUnset);
        }
        if candidate.vig.len() != self.vig_size.len() {
            return Err(SetError::VignetteLength {
                expected: self.vig_size.len(),
                found: candidate.vig.len(),
            });
        }
        if candidate.context.len() != self.context.len() {
            return Err(SetError::ContextLength {
                expected: self.context.len(),
                found: candidate.context.len(),
            });
        }
        let sample = self.append()?;
        sample.vig.copy_from_slice(&candidate.vig);
        sample.context.copy_from_slice(&candidate.context);
        sample.dx = 0.;
        sample.dy = 0.;
        sample.norm = candidate.flux;
        sample.fluxrad = candidate.fluxrad;
        sample.x = candidate.x;
        sample.y = candidate.y;
        sample.gain = extension.gain;
        sample.backnoise2 = extension.backnoise2;
        sample.catindex = extension.catindex;
        sample.extindex = extension.extindex;
        Ok(Some(sample))
    }

    /// Builds the weight map of the sample at `index`
    pub fn make_weights(&mut self, index: usize, prof_accuracy: f32) -> Result<()> {
        make_weights(self.finishable_mut(index)?, prof_accuracy);
        Ok(())
    }
    /// Recenters the sample at `index`
    pub fn recenter(&mut self, index: usize) -> Result<Recentering> {
        let (vig_size, config) = (self.vig_size, self.recenter);
        let outcome = recenter(self.finishable_mut(index)?, vig_size, &config);
        if outcome.status != RecenterStatus::Converged {
            log::debug!("sample #{index} recentering: {:?}", outcome);
        }
        Ok(outcome)
    }
    /// Builds the weight map of the sample at `index` and recenters it
    pub fn finish_sample(&mut self, index: usize, prof_accuracy: f32) -> Result<Recentering> {
        self.make_weights(index, prof_accuracy)?;
        self.recenter(index)
    }
    /// Builds the weight maps and recenters all the live samples in parallel
    ///
    /// No sample is modified if any of them does not match the set geometry.
    pub fn finish_all(&mut self, prof_accuracy: f32) -> Result<FinishSummary> {
        self.samples()
            .iter()
            .try_for_each(|sample| self.check_geometry(sample))?;
        let (vig_size, config) = (self.vig_size, self.recenter);
        let summary = self.samples[..self.nsample]
            .par_iter_mut()
            .map(|sample| {
                make_weights(sample, prof_accuracy);
                recenter(sample, vig_size, &config).status
            })
            .fold(FinishSummary::default, FinishSummary::add)
            .reduce(FinishSummary::default, FinishSummary::merge);
        log::info!(
            "recentered {} samples: {} converged, {} without flux, {} at the iteration limit",
            self.nsample,
            summary.converged,
            summary.no_flux,
            summary.iteration_limit
        );
        Ok(summary)
    }
}
