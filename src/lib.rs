/*!
# PSF Samples

In-memory calibration dataset for point-spread-function modelling: star
vignettes together with their weight, residual and chi maps, the noise model
that turns a vignette into an inverse-variance weight map, and the windowed
barycenter that recenters each vignette before PSF fitting.

## Key Components

- [`Context`] - Named parameters the PSF depends on
- [`Sample`] - One star vignette with its derived maps
- [`Set`] - Resizable store of samples sharing the same vignette geometry
- [`make_weights`] - Inverse-variance weight map from the noise model
- [`recenter`] - Iterative sub-pixel centroid refinement
- [`SelectionCriteria`] - Catalog entry screening before ingestion

## Usage

```rust,no_run
use psf_samples::{Context, Set};

let context = Context::new(["X_IMAGE", "Y_IMAGE"]);
let mut set = Set::new(&context)?;
set.set_vig_size(25, 25)?;

let sample = set.append()?;
sample.gain = 2.5;
sample.backnoise2 = 16.0;
sample.fluxrad = 2.35;

set.finish_sample(0, 0.01)?;
println!("{:?}", set.get(0).map(|s| (s.dx, s.dy)));
# Ok::<(), psf_samples::Error>(())
```
*/

/// Magnitude of the invalid pixel sentinel: any pixel `<= -BIG` is masked
pub const BIG: f32 = 1e30;

mod context;
mod error;
mod recenter;
mod sample;
pub mod selection;
mod set;
mod weights;

pub use context::Context;
pub use error::Error;
pub use recenter::{recenter, RecenterConfig, RecenterStatus, Recentering};
pub use sample::{Sample, VigSize};
pub use selection::{
    fwhm_range, Candidate, FwhmRange, Rejection, SelectionCriteria, FALLBACK_FWHM, INTERPFAC,
};
pub use set::{
    Extension, FinishSummary, Rejections, Set, SetError, DEFAULT_CAPACITY, GROWTH_RATIO,
};
pub use weights::make_weights;
