/*!
# Sample selection

Screening rules applied to catalog entries before they are stored as
samples, and the flux-radius range estimator used to pick the stellar locus
automatically.
*/

use serde::Deserialize;

use crate::BIG;

/// Vignette oversampling of the PSF model
pub const INTERPFAC: f64 = 3.;
/// FWHM [pixel] used when no star is found on the stellar locus
pub const FALLBACK_FWHM: f64 = 2.35 / (1. - 1. / INTERPFAC);

/// Catalog entry candidate to become a sample
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Candidate {
    pub x: f64,
    pub y: f64,
    pub flux: f64,
    pub flux_err: f64,
    /// Peak value above the background [ADU]
    pub flux_max: f64,
    /// Half-light radius [pixel]
    pub fluxrad: f64,
    pub elongation: f64,
    pub flags: u32,
    pub vig: Vec<f32>,
    pub context: Vec<f64>,
}
impl Candidate {
    /// Signal-to-noise ratio, `-BIG` when the flux error is not positive
    pub fn signal_to_noise(&self) -> f64 {
        if self.flux_err > 0. {
            self.flux / self.flux_err
        } else {
            -BIG as f64
        }
    }
    /// Number of masked pixels in the vignette
    pub fn bad_pixels(&self) -> usize {
        self.vig.iter().filter(|&&p| p <= -BIG).count()
    }
}

/// Reason a candidate was turned down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    Flags,
    SignalToNoise,
    FluxRadiusTooSmall,
    FluxRadiusTooLarge,
    Elongation,
    BadPixels,
}

/// Star selection thresholds
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SelectionCriteria {
    /// Extraction flags that disqualify a source
    pub flag_mask: u32,
    pub min_sn: f64,
    pub fluxrad_min: f64,
    pub fluxrad_max: f64,
    pub max_ellipticity: f64,
    /// Enables the bad pixel count check
    pub badpix_filter: bool,
    pub badpix_nmax: usize,
}
impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            flag_mask: 0x00fe,
            min_sn: 20.,
            fluxrad_min: 1.,
            fluxrad_max: 5.,
            max_ellipticity: 0.3,
            badpix_filter: false,
            badpix_nmax: 0,
        }
    }
}
impl SelectionCriteria {
    pub fn flag_mask(self, flag_mask: u32) -> Self {
        Self { flag_mask, ..self }
    }
    pub fn min_sn(self, min_sn: f64) -> Self {
        Self { min_sn, ..self }
    }
    pub fn fluxrad_range(self, fluxrad_min: f64, fluxrad_max: f64) -> Self {
        Self {
            fluxrad_min,
            fluxrad_max,
            ..self
        }
    }
    pub fn max_ellipticity(self, max_ellipticity: f64) -> Self {
        Self {
            max_ellipticity,
            ..self
        }
    }
    pub fn bad_pixels(self, badpix_nmax: usize) -> Self {
        Self {
            badpix_filter: true,
            badpix_nmax,
            ..self
        }
    }
    /// Maximum elongation `(1+e)/(1-e)` for the maximum ellipticity `e`
    pub fn max_elongation(&self) -> f64 {
        if self.max_ellipticity < 1. {
            (self.max_ellipticity + 1.) / (1. - self.max_ellipticity)
        } else {
            100.
        }
    }
    /// Returns every criterion the candidate fails, empty if it is accepted
    pub fn check(&self, candidate: &Candidate) -> Vec<Rejection> {
        [
            (candidate.flags & self.flag_mask != 0, Rejection::Flags),
            (
                candidate.signal_to_noise() < self.min_sn,
                Rejection::SignalToNoise,
            ),
            (
                candidate.fluxrad < self.fluxrad_min,
                Rejection::FluxRadiusTooSmall,
            ),
            (
                candidate.fluxrad > self.fluxrad_max,
                Rejection::FluxRadiusTooLarge,
            ),
            (
                candidate.elongation > self.max_elongation(),
                Rejection::Elongation,
            ),
            (
                self.badpix_filter && candidate.bad_pixels() > self.badpix_nmax,
                Rejection::BadPixels,
            ),
        ]
        .into_iter()
        .filter_map(|(failed, rejection)| failed.then_some(rejection))
        .collect()
    }
    pub fn accepts(&self, candidate: &Candidate) -> bool {
        self.check(candidate).is_empty()
    }
    /// FWHM of a candidate star of the stellar locus, `None` if the candidate
    /// is not one
    ///
    /// The locus is screened on the peak S/N `flux_max/backnoise`, the flags,
    /// the elongation and the FWHM range `[fwhm_min, fwhm_max)`.
    pub fn locus_fwhm(
        &self,
        candidate: &Candidate,
        backnoise: f64,
        fwhm_min: f64,
        fwhm_max: f64,
    ) -> Option<f64> {
        let backnoise = if backnoise < 1. / BIG as f64 {
            1.
        } else {
            backnoise
        };
        let fwhm = 2. * candidate.fluxrad;
        (candidate.flux_max / backnoise > self.min_sn
            && candidate.flags & self.flag_mask == 0
            && candidate.elongation < self.max_elongation()
            && fwhm >= fwhm_min
            && fwhm < fwhm_max)
            .then_some(fwhm)
    }
}

/// FWHM mode and the range of accepted FWHMs around it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FwhmRange {
    pub mode: f64,
    pub min: f64,
    pub max: f64,
}

/// Estimates the FWHM mode of a population of stars and the range of FWHMs
/// compatible with a relative variation `maxvar`, clamped to `[min_in, max_in]`
///
/// The mode is the middle of the narrowest interval holding a quarter of the
/// measurements. Without any measurement, the mode and both bounds are
/// [`FALLBACK_FWHM`].
pub fn fwhm_range(fwhms: &[f64], maxvar: f64, min_in: f64, max_in: f64) -> FwhmRange {
    if fwhms.is_empty() {
        log::warn!("no source with appropriate FWHM found, using {FALLBACK_FWHM:.3}");
        return FwhmRange {
            mode: FALLBACK_FWHM,
            min: FALLBACK_FWHM,
            max: FALLBACK_FWHM,
        };
    }
    let mut fwhm = fwhms.to_vec();
    fwhm.sort_by(|a, b| a.total_cmp(b));
    let n = fwhm.len();

    let nw = match n / 4 {
        nw if nw < 4 => 1,
        nw => nw,
    };
    let mut dfmin = f64::INFINITY;
    let mut mode = 0f64;
    for i in 0..n.saturating_sub(nw) {
        let df = fwhm[i + nw] - fwhm[i];
        if df < dfmin {
            dfmin = df;
            mode = (fwhm[i + nw] + fwhm[i]) / 2.;
        }
    }
    if n < 2 {
        mode = fwhm[0];
    }

    let d = (maxvar + 1.).cbrt();
    let min = if d > 0. { mode / d } else { 0. };
    let min = min.max(min_in);
    let max = (mode * d * d).min(max_in);
    log::debug!("FWHM mode: {mode:.3} range: [{min:.3}, {max:.3}]");
    FwhmRange { mode, min, max }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star() -> Candidate {
        Candidate {
            flux: 1e4,
            flux_err: 100.,
            fluxrad: 2.,
            elongation: 1.1,
            vig: vec![1.; 9],
            ..Default::default()
        }
    }

    #[test]
    fn accepted() {
        let criteria = SelectionCriteria::default();
        assert!(criteria.check(&star()).is_empty());
        assert!(criteria.accepts(&star()));
    }

    #[test]
    fn each_rejection() {
        let criteria = SelectionCriteria::default();
        let mut candidate = star();
        candidate.flags = 0x01;
        assert!(criteria.accepts(&candidate));
        candidate.flux_err = 1e3;
        assert_eq!(criteria.check(&candidate), vec![Rejection::SignalToNoise]);
        candidate.flux_err = 100.;
        candidate.fluxrad = 0.5;
        assert_eq!(criteria.check(&candidate), vec![Rejection::FluxRadiusTooSmall]);
        candidate.fluxrad = 6.;
        assert_eq!(criteria.check(&candidate), vec![Rejection::FluxRadiusTooLarge]);
        candidate.fluxrad = 2.;
        candidate.elongation = 2.;
        assert_eq!(criteria.check(&candidate), vec![Rejection::Elongation]);
    }

    #[test]
    fn all_failed_criteria() {
        let mut candidate = star();
        candidate.flags = 0x02;
        candidate.flux_err = 0.;
        candidate.fluxrad = 0.1;
        candidate.elongation = 50.;
        assert_eq!(
            SelectionCriteria::default().check(&candidate),
            vec![
                Rejection::Flags,
                Rejection::SignalToNoise,
                Rejection::FluxRadiusTooSmall,
                Rejection::Elongation
            ]
        );
    }

    #[test]
    fn bad_pixels() {
        let mut candidate = star();
        candidate.vig[3] = -1e30;
        candidate.vig[4] = -2e30;
        assert_eq!(candidate.bad_pixels(), 2);
        assert!(SelectionCriteria::default().accepts(&candidate));
        let criteria = SelectionCriteria::default().bad_pixels(1);
        assert_eq!(criteria.check(&candidate), vec![Rejection::BadPixels]);
        let criteria = SelectionCriteria::default().bad_pixels(2);
        assert!(criteria.accepts(&candidate));
    }

    #[test]
    fn max_elongation() {
        let criteria = SelectionCriteria::default().max_ellipticity(0.5);
        assert!((criteria.max_elongation() - 3.).abs() < 1e-12);
        let criteria = SelectionCriteria::default().max_ellipticity(1.);
        assert_eq!(criteria.max_elongation(), 100.);
    }

    #[test]
    fn fwhm_mode() {
        let range = fwhm_range(&[3., 2., 2.1, 5.], 0.2, 0., 10.);
        assert!((range.mode - 2.05).abs() < 1e-12);
        let d = 1.2f64.cbrt();
        assert!((range.min - 2.05 / d).abs() < 1e-12);
        assert!((range.max - 2.05 * d * d).abs() < 1e-12);
    }

    #[test]
    fn fwhm_clamped() {
        let range = fwhm_range(&[3., 2., 2.1, 5.], 0.2, 2., 2.2);
        assert_eq!(range.min, 2.);
        assert_eq!(range.max, 2.2);
    }

    #[test]
    fn fwhm_single_and_empty() {
        let range = fwhm_range(&[4.], 0., 0., 10.);
        assert_eq!(range.mode, 4.);
        let range = fwhm_range(&[], 0.2, 0., 10.);
        assert!((range.mode - 3.525).abs() < 1e-12);
        assert_eq!((range.min, range.max), (range.mode, range.mode));
    }

    #[test]
    fn stellar_locus() {
        let criteria = SelectionCriteria::default();
        let mut candidate = star();
        candidate.flux_max = 500.;
        candidate.flux_err = 0.;
        assert_eq!(criteria.locus_fwhm(&candidate, 10., 2., 10.), Some(4.));
        assert_eq!(criteria.locus_fwhm(&candidate, 24., 2., 10.), Some(4.));
        assert_eq!(criteria.locus_fwhm(&candidate, 25., 2., 10.), None);
        assert_eq!(criteria.locus_fwhm(&candidate, 0., 2., 10.), Some(4.));
        assert_eq!(criteria.locus_fwhm(&candidate, 10., 2., 4.), None);
        assert_eq!(criteria.locus_fwhm(&candidate, 10., 4., 10.), Some(4.));
        candidate.flags = 0x10;
        assert_eq!(criteria.locus_fwhm(&candidate, 10., 2., 10.), None);
        candidate.flags = 0;
        candidate.elongation = criteria.max_elongation();
        assert_eq!(criteria.locus_fwhm(&candidate, 10., 2., 10.), None);
    }
}
