use crate::{Sample, BIG};

/// Builds the inverse-variance weight map of a sample
///
/// The noise variance of a pixel `p` is the background variance, plus the
/// profile-fitting accuracy term `(prof_accuracy * p)^2`, plus the photon
/// noise `p / gain` for positive pixels when the gain is known.
/// Masked pixels (`p <= -BIG`) get a null value and a null weight.
pub fn make_weights(sample: &mut Sample, prof_accuracy: f32) {
    let profaccu2 = (prof_accuracy * prof_accuracy) as f64;
    let gain = sample.gain;
    let backnoise2 = sample.backnoise2;
    sample
        .vig
        .iter_mut()
        .zip(sample.vigweight.iter_mut())
        .for_each(|(pix, weight)| {
            if *pix <= -BIG {
                *pix = 0.;
                *weight = 0.;
            } else {
                let p = *pix as f64;
                let mut noise2 = backnoise2 + profaccu2 * p * p;
                if p > 0. && gain > 0. {
                    noise2 += p / gain;
                }
                *weight = (1. / noise2) as f32;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VigSize;

    fn sample(pixels: &[f32]) -> Sample {
        let mut sample = Sample::try_new(VigSize::new(pixels.len(), 1), 0).unwrap();
        sample.set_vig(pixels).unwrap();
        sample
    }

    #[test]
    fn background_only() {
        let mut s = sample(&[5.]);
        s.backnoise2 = 1.;
        make_weights(&mut s, 0.);
        assert_eq!(s.vigweight(), &[1.]);
        assert_eq!(s.vig(), &[5.]);
    }

    #[test]
    fn masked_pixel() {
        let mut s = sample(&[-1e30, 3.]);
        s.backnoise2 = 4.;
        make_weights(&mut s, 0.);
        assert_eq!(s.vig(), &[0., 3.]);
        assert_eq!(s.vigweight(), &[0., 0.25]);
    }

    #[test]
    fn photon_and_profile_noise() {
        let mut s = sample(&[10., -2.]);
        s.backnoise2 = 1.;
        s.gain = 2.;
        make_weights(&mut s, 0.1);
        // 1 + 0.01 * 100 + 10 / 2
        assert!((s.vigweight()[0] - 1. / 7.).abs() < 1e-6);
        // negative pixels carry no photon noise
        assert!((s.vigweight()[1] - 1. / 1.04).abs() < 1e-6);
    }
}
