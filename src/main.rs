use std::{fs::File, io::BufReader, path::PathBuf};

use anyhow::Context as _;
use psf_samples::{
    fwhm_range, Candidate, Context, Extension, RecenterConfig, SelectionCriteria, Set, VigSize,
};
use serde::Deserialize;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "psf-samples",
    about = "Loading and recentering PSF calibration samples"
)]
struct Opt {
    /// Pickle file with the vignettes shipment
    #[structopt(parse(from_os_str))]
    path: PathBuf,
    /// Relative accuracy of the PSF profile model
    #[structopt(long, default_value = "0.01")]
    prof_accuracy: f32,
    /// Minimum S/N of the selected stars
    #[structopt(long, default_value = "20")]
    min_sn: f64,
    /// Maximum ellipticity of the selected stars
    #[structopt(long, default_value = "0.3")]
    max_ellip: f64,
    /// Minimum FWHM of the selected stars [pixel]
    #[structopt(long, default_value = "2")]
    fwhm_min: f64,
    /// Maximum FWHM of the selected stars [pixel]
    #[structopt(long, default_value = "10")]
    fwhm_max: f64,
    /// Narrow the FWHM range around the stellar locus
    #[structopt(short, long)]
    autoselect: bool,
    /// Maximum relative FWHM variation when autoselecting
    #[structopt(long, default_value = "0.2")]
    max_var: f64,
    /// Maximum number of bad pixels per vignette
    #[structopt(long)]
    badpix_nmax: Option<usize>,
    /// Number of recentering iterations
    #[structopt(long)]
    max_iter: Option<usize>,
    /// Print the recentered offsets of every sample
    #[structopt(short, long)]
    verbose: bool,
}

/// Candidates from a single catalog extension
#[derive(Deserialize)]
struct ExtensionData {
    extension: Extension,
    candidates: Vec<Candidate>,
}
/// Vignettes shipment as written by the catalog reader
#[derive(Deserialize)]
struct Shipment {
    context: Vec<String>,
    vig_size: VigSize,
    extensions: Vec<ExtensionData>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let file = File::open(&opt.path).with_context(|| format!("failed to open {:?}", opt.path))?;
    let shipment: Shipment = serde_pickle::from_reader(BufReader::new(file), Default::default())
        .with_context(|| format!("failed to decode {:?}", opt.path))?;
    log::info!(
        "{} extensions, {} candidates",
        shipment.extensions.len(),
        shipment
            .extensions
            .iter()
            .map(|e| e.candidates.len())
            .sum::<usize>()
    );

    let mut recenter_config = RecenterConfig::default();
    if let Some(n) = opt.max_iter {
        recenter_config = recenter_config.max_iterations(n);
    }
    let mut set = Set::new(&Context::new(&shipment.context))?.recenter_config(recenter_config);
    set.set_vig_size(shipment.vig_size.width, shipment.vig_size.height)?;

    let mut criteria = SelectionCriteria::default()
        .min_sn(opt.min_sn)
        .max_ellipticity(opt.max_ellip)
        .fluxrad_range(opt.fwhm_min / 2., opt.fwhm_max / 2.);
    if let Some(n) = opt.badpix_nmax {
        criteria = criteria.bad_pixels(n);
    }
    if opt.autoselect {
        let fwhms: Vec<f64> = shipment
            .extensions
            .iter()
            .flat_map(|data| {
                let backnoise = data.extension.backnoise2.sqrt();
                let criteria = &criteria;
                data.candidates.iter().filter_map(move |c| {
                    criteria.locus_fwhm(c, backnoise, opt.fwhm_min, opt.fwhm_max)
                })
            })
            .collect();
        let range = fwhm_range(&fwhms, opt.max_var, opt.fwhm_min, opt.fwhm_max);
        log::info!(
            "FWHM mode: {:.2} range: [{:.2}, {:.2}]",
            range.mode,
            range.min,
            range.max
        );
        criteria = criteria.fluxrad_range(range.min / 2., range.max / 2.);
        set.set_fwhm(range.mode);
    } else {
        set.set_fwhm((opt.fwhm_min + opt.fwhm_max) / 2.);
    }

    for data in &shipment.extensions {
        for candidate in &data.candidates {
            set.ingest(candidate, &criteria, &data.extension)?;
        }
    }
    set.update_context_scaling();
    set.shrink_to_fit();
    let summary = set.finish_all(opt.prof_accuracy)?;

    println!("SUMMARY:");
    println!(" - # of samples: {}", set.len());
    println!(" - FWHM: {:.3} pixel", set.fwhm());
    let rejections = set.rejections();
    println!(" - # of rejections: {}", rejections.total());
    println!(
        "    flags: {}, S/N: {}, fluxrad min: {}, fluxrad max: {}, elongation: {}, bad pixels: {}",
        rejections.flags,
        rejections.signal_to_noise,
        rejections.fluxrad_min,
        rejections.fluxrad_max,
        rejections.elongation,
        rejections.bad_pixels
    );
    println!(
        " - recentering: {} converged, {} without flux, {} at the iteration limit",
        summary.converged, summary.no_flux, summary.iteration_limit
    );
    for i in 0..set.ncontext() {
        println!(
            " - context {:>12}: offset {:>12.3} scale {:>12.3}",
            set.context_name(i).unwrap_or_default(),
            set.context_offset(i).unwrap_or_default(),
            set.context_scale(i).unwrap_or_default()
        );
    }
    if opt.verbose {
        println!(
            "    {:^6}: {:^10} {:^10} {:^8} {:^8}",
            "#", "X", "Y", "DX", "DY"
        );
        for (i, sample) in set.samples().iter().enumerate() {
            println!(
                "    {:>6}: {:>10.3} {:>10.3} {:>8.3} {:>8.3}",
                i, sample.x, sample.y, sample.dx, sample.dy
            );
        }
    }

    Ok(())
}
