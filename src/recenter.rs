use serde::Deserialize;

use crate::{Sample, VigSize};

/// Windowed barycenter settings
///
/// The defaults are the values the PSF pipeline runs with; they are exposed
/// for experimentation, not meant to be tuned per sample.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecenterConfig {
    /// Aperture radius in units of the Gaussian sigma
    pub nsig: f64,
    /// Sub-pixel sampling factor of the aperture boundary
    pub oversampling: usize,
    pub max_iterations: usize,
    /// Centroid shift below which the iteration stops [pixel]
    pub step_min: f64,
    /// Damping applied to each centroid update
    pub grad_factor: f64,
}
impl Default for RecenterConfig {
    fn default() -> Self {
        Self {
            nsig: 4.,
            oversampling: 3,
            max_iterations: 16,
            step_min: 1e-3,
            grad_factor: 0.9,
        }
    }
}
impl RecenterConfig {
    pub fn nsig(self, nsig: f64) -> Self {
        Self { nsig, ..self }
    }
    pub fn oversampling(self, oversampling: usize) -> Self {
        Self {
            oversampling,
            ..self
        }
    }
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }
    pub fn step_min(self, step_min: f64) -> Self {
        Self { step_min, ..self }
    }
    pub fn grad_factor(self, grad_factor: f64) -> Self {
        Self {
            grad_factor,
            ..self
        }
    }
}

/// How the centroid iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecenterStatus {
    /// The centroid shift fell below the convergence threshold
    Converged,
    /// No positive flux within the aperture, the last position is kept
    NoFlux,
    /// The iteration budget ran out, the last position is kept
    IterationLimit,
}

/// Outcome of [`recenter`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recentering {
    pub status: RecenterStatus,
    pub iterations: usize,
}

/// Fraction of the pixel at offset `(dx, dy)` that falls inside the aperture
///
/// `(dx, dy)` is the position of the first sub-pixel, the grid is `n x n`
/// with a step of `step`.
fn coverage(dx: f64, dy: f64, raper2: f64, n: usize, step: f64) -> f64 {
    let mut count = 0usize;
    let mut sy = dy;
    for _ in 0..n {
        let dy2 = sy * sy;
        let mut sx = dx;
        for _ in 0..n {
            if sx * sx + dy2 < raper2 {
                count += 1;
            }
            sx += step;
        }
        sy += step;
    }
    count as f64 / (n * n) as f64
}

/// Refines the sample centroid with an iterative Gaussian-windowed barycenter
///
/// The window sigma is derived from the half-light radius
/// (`sigma = fluxrad * 2 / 2.35`) and the integration is restricted to a
/// circular aperture of radius `nsig * sigma` whose boundary pixels are
/// weighted by their sub-sampled coverage.
/// Pixels with a null weight are replaced by their point-symmetric
/// counterpart around the current centroid when that one is valid.
///
/// The search starts from `(sample.dx, sample.dy)` and the refined offsets
/// relative to the vignette geometric center are written back to the sample.
///
/// # Panics
///
/// Panics if the sample buffers do not hold `vig_size.len()` pixels;
/// [`Set::recenter`](crate::Set::recenter) reports that case as an error instead.
pub fn recenter(sample: &mut Sample, vig_size: VigSize, config: &RecenterConfig) -> Recentering {
    assert_eq!(
        sample.len(),
        vig_size.len(),
        "vignette of {} pixels recentered with a {}x{} geometry",
        sample.len(),
        vig_size.width,
        vig_size.height
    );
    let sig = sample.fluxrad * 2. / 2.35;
    let twosig2 = 2. * sig * sig;
    let (w, h) = (vig_size.width as i64, vig_size.height as i64);

    let raper = config.nsig * sig;
    let raper2 = raper * raper;
    // inner and outer radii of the oversampled annulus (r -/+ sqrt(2)/2)
    let rintlim = raper - 0.75;
    let rintlim2 = if rintlim > 0. { rintlim * rintlim } else { 0. };
    let rextlim2 = (raper + 0.75) * (raper + 0.75);
    let oversampling = config.oversampling.max(1);
    let step = 1. / oversampling as f64;
    let offset = 0.5 * (step - 1.);

    let (cx, cy) = vig_size.center();
    let mut mx = sample.dx + cx;
    let mut my = sample.dy + cy;

    let vig = &sample.vig;
    let weight = &sample.vigweight;
    let mut outcome = Recentering {
        status: RecenterStatus::IterationLimit,
        iterations: 0,
    };

    for _ in 0..config.max_iterations {
        outcome.iterations += 1;
        let xmin = ((mx - raper + 0.499999) as i64).max(0);
        let xmax = ((mx + raper + 1.499999) as i64).min(w);
        let ymin = ((my - raper + 0.499999) as i64).max(0);
        let ymax = ((my + raper + 1.499999) as i64).min(h);
        let mx2ph = mx * 2. + 0.49999;
        let my2ph = my * 2. + 0.49999;

        let mut tv = 0f64;
        let mut dxpos = 0f64;
        let mut dypos = 0f64;
        for y in ymin..ymax {
            let dy = y as f64 - my;
            for x in xmin..xmax {
                let dx = x as f64 - mx;
                let r2 = dx * dx + dy * dy;
                if r2 >= rextlim2 {
                    continue;
                }
                let area = if oversampling > 1 && r2 > rintlim2 {
                    coverage(dx + offset, dy + offset, raper2, oversampling, step)
                } else {
                    1.
                };
                let locarea = area * (-r2 / twosig2).exp();

                let pos = (y * w + x) as usize;
                let pix = if weight[pos] == 0. {
                    let x2 = (mx2ph - x as f64) as i64;
                    let y2 = (my2ph - y as f64) as i64;
                    if x2 >= 0 && x2 < w && y2 >= 0 && y2 < h {
                        let pos2 = (y2 * w + x2) as usize;
                        if weight[pos2] > 0. {
                            vig[pos2] as f64
                        } else {
                            0.
                        }
                    } else {
                        0.
                    }
                } else {
                    vig[pos] as f64
                };

                let locpix = locarea * pix;
                tv += locpix;
                dxpos += locpix * dx;
                dypos += locpix * dy;
            }
        }

        if tv > 0. {
            dxpos /= tv;
            dypos /= tv;
            mx += dxpos * config.grad_factor;
            my += dypos * config.grad_factor;
        } else {
            outcome.status = RecenterStatus::NoFlux;
            break;
        }

        if dxpos * dxpos + dypos * dypos < config.step_min * config.step_min {
            outcome.status = RecenterStatus::Converged;
            break;
        }
    }

    sample.dx = mx - cx;
    sample.dy = my - cy;
    outcome
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SIZE: usize = 25;

    /// Gaussian star of the given sigma centered at `(12 + x0, 12 + y0)`
    pub(crate) fn gaussian_star(sigma: f64, x0: f64, y0: f64) -> Sample {
        let vig_size = VigSize::new(SIZE, SIZE);
        let mut sample = Sample::try_new(vig_size, 0).unwrap();
        let (cx, cy) = vig_size.center();
        for y in 0..SIZE {
            for x in 0..SIZE {
                let dx = x as f64 - cx - x0;
                let dy = y as f64 - cy - y0;
                sample.vig[y * SIZE + x] =
                    (1000. * (-(dx * dx + dy * dy) / (2. * sigma * sigma)).exp()) as f32;
            }
        }
        sample.vigweight.iter_mut().for_each(|w| *w = 1.);
        sample.fluxrad = sigma * 2.35 / 2.;
        sample
    }

    fn vig_size() -> VigSize {
        VigSize::new(SIZE, SIZE)
    }

    #[test]
    fn centered_star() {
        let config = RecenterConfig::default();
        let mut sample = gaussian_star(2., 0., 0.);
        let outcome = recenter(&mut sample, vig_size(), &config);
        assert_eq!(outcome.status, RecenterStatus::Converged);
        assert!(outcome.iterations < config.max_iterations);
        assert!(sample.dx.abs() < config.step_min);
        assert!(sample.dy.abs() < config.step_min);
    }

    #[test]
    fn offset_star() {
        let config = RecenterConfig::default();
        let mut sample = gaussian_star(2., 0.3, -0.2);
        let outcome = recenter(&mut sample, vig_size(), &config);
        assert_eq!(outcome.status, RecenterStatus::Converged);
        assert!((sample.dx - 0.3).abs() < 1e-2, "dx: {}", sample.dx);
        assert!((sample.dy + 0.2).abs() < 1e-2, "dy: {}", sample.dy);
    }

    #[test]
    fn idempotent() {
        let config = RecenterConfig::default();
        let mut sample = gaussian_star(1.8, -0.4, 0.25);
        recenter(&mut sample, vig_size(), &config);
        let (dx, dy) = (sample.dx, sample.dy);
        recenter(&mut sample, vig_size(), &config);
        assert!((sample.dx - dx).abs() < config.step_min);
        assert!((sample.dy - dy).abs() < config.step_min);
    }

    #[test]
    fn masked_pixels_use_symmetric_counterpart() {
        let config = RecenterConfig::default();
        let mut sample = gaussian_star(2., 0., 0.);
        for pos in [12 * SIZE + 14, 11 * SIZE + 12, 15 * SIZE + 10] {
            sample.vig[pos] = 1e4;
            sample.vigweight[pos] = 0.;
        }
        recenter(&mut sample, vig_size(), &config);
        assert!(sample.dx.abs() < config.step_min, "dx: {}", sample.dx);
        assert!(sample.dy.abs() < config.step_min, "dy: {}", sample.dy);
    }

    #[test]
    fn masked_pair_contributes_nothing() {
        let config = RecenterConfig::default();
        let mut sample = gaussian_star(2., 0., 0.);
        // both the pixel and its counterpart are masked
        for pos in [12 * SIZE + 14, 12 * SIZE + 10] {
            sample.vig[pos] = 1e4;
            sample.vigweight[pos] = 0.;
        }
        recenter(&mut sample, vig_size(), &config);
        assert!(sample.dx.abs() < config.step_min, "dx: {}", sample.dx);
    }

    #[test]
    fn no_flux() {
        let mut sample = gaussian_star(2., 0., 0.);
        sample.vig.iter_mut().for_each(|p| *p = 0.);
        sample.dx = 0.5;
        let outcome = recenter(&mut sample, vig_size(), &RecenterConfig::default());
        assert_eq!(outcome.status, RecenterStatus::NoFlux);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(sample.dx, 0.5);
    }

    #[test]
    fn iteration_limit() {
        let config = RecenterConfig::default().max_iterations(1);
        let mut sample = gaussian_star(2., 0.3, 0.);
        let outcome = recenter(&mut sample, vig_size(), &config);
        assert_eq!(outcome.status, RecenterStatus::IterationLimit);
        assert_eq!(outcome.iterations, 1);
        assert!(sample.dx > 0. && sample.dx < 0.3, "dx: {}", sample.dx);
    }

    #[test]
    #[should_panic]
    fn mismatched_geometry() {
        let mut sample = gaussian_star(2., 0., 0.);
        recenter(&mut sample, VigSize::new(5, 5), &RecenterConfig::default());
    }

    #[test]
    fn coverage_bounds() {
        // far inside and far outside the aperture
        assert_eq!(coverage(-1. / 3., -1. / 3., 100., 3, 1. / 3.), 1.);
        assert_eq!(coverage(20., 20., 100., 3, 1. / 3.), 0.);
        let partial = coverage(10. - 1. / 3., -1. / 3., 100., 3, 1. / 3.);
        assert!(partial > 0. && partial < 1.);
    }
}
