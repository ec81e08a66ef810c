//! Solve parameter snapshots and the engine's profile catalog.
//!
//! ## Parameters
//! Source extraction:
//! - `aperture_shape`, `kron_fact`, `subpix`, `r_min`: photometry aperture.
//! - `min_area`: minimum number of pixels of a detection.
//! - `deblend_thresh`, `deblend_contrast`: splitting of blended sources.
//! - `fwhm`: width of the Gaussian detection filter, see [`conv_filter`](SolveParameters::conv_filter).
//!
//! Star filtering, applied before solving:
//! - `max_size`, `min_size`: star diameter limits in pixels, `0` disables.
//! - `max_ellipse`: maximum ratio of semi-major to semi-minor axis.
//! - `initial_keep`: number of stars kept after extraction.
//! - `keep_num`: number of stars handed to the solver, at most `initial_keep`.
//! - `remove_brightest`, `remove_dimmest`: percentage trimmed from either end.
//! - `saturation_limit`: percentage of full scale above which stars are dropped.
//!
//! Solving:
//! - `min_width`, `max_width`: field width search bounds in degrees.
//! - `search_radius`: radius in degrees around a position hint.
//! - `solver_time_limit`: upper bound of a single run.
//! - `logratio_tokeep`, `logratio_totune`, `logratio_tosolve`: log-odds thresholds.

use std::time::Duration;

use crate::error::{Error, Result};

/// Shape of the photometry aperture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApertureShape {
    /// Fixed circular aperture.
    #[default]
    Circle,
    /// Kron-style elliptical aperture.
    Ellipse,
}

/// How a parallel solve splits the search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MultiAlgorithm {
    /// Single thread.
    None,
    /// Let the engine choose.
    #[default]
    Auto,
    /// Split the scale range over threads.
    Scale,
    /// Split the index depth over threads.
    Depth,
}

/// An immutable snapshot of engine parameters.
///
/// A run receives its own copy, so changes made after [`start_solve`](crate::SolveController::start_solve)
/// only affect later runs. Fields are described in the module documentation.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
pub struct SolveParameters {
    /// Profile name.
    pub list_name: String,
    /// Human readable description.
    pub description: String,

    pub aperture_shape: ApertureShape,
    pub kron_fact: f64,
    pub subpix: u32,
    pub r_min: f64,
    pub magzero: f64,
    pub min_area: f64,
    pub deblend_thresh: u32,
    pub deblend_contrast: f64,
    pub clean: bool,
    pub clean_param: f64,
    pub partition: bool,
    fwhm: f64,
    conv_filter: Vec<f64>,

    pub resort: bool,
    pub max_size: f64,
    pub min_size: f64,
    pub max_ellipse: f64,
    pub initial_keep: u32,
    pub keep_num: u32,
    pub remove_brightest: f64,
    pub remove_dimmest: f64,
    pub saturation_limit: f64,

    pub max_width: f64,
    pub min_width: f64,
    pub in_parallel: bool,
    pub multi_algorithm: MultiAlgorithm,
    pub solver_time_limit: Duration,
    pub auto_downsample: bool,
    pub downsample: u32,
    pub search_radius: f64,

    pub logratio_tokeep: f64,
    pub logratio_totune: f64,
    pub logratio_tosolve: f64,
}

impl Default for SolveParameters {
    fn default() -> Self {
        Self {
            list_name: "Custom".to_owned(),
            description: String::new(),
            aperture_shape: ApertureShape::Circle,
            kron_fact: 2.5,
            subpix: 5,
            r_min: 3.5,
            magzero: 20.,
            min_area: 10.,
            deblend_thresh: 32,
            deblend_contrast: 0.005,
            clean: true,
            clean_param: 1.,
            partition: true,
            fwhm: 4.,
            conv_filter: gaussian_filter(4.),
            resort: true,
            max_size: 0.,
            min_size: 0.,
            max_ellipse: 1.5,
            initial_keep: 500,
            keep_num: 50,
            remove_brightest: 0.,
            remove_dimmest: 0.,
            saturation_limit: 0.,
            max_width: 180.,
            min_width: 1.,
            in_parallel: true,
            multi_algorithm: MultiAlgorithm::Auto,
            solver_time_limit: Duration::from_secs(600),
            auto_downsample: true,
            downsample: 1,
            search_radius: 15.,
            logratio_tokeep: 20.7233,
            logratio_totune: 13.8155,
            logratio_tosolve: 20.7233,
        }
    }
}

impl SolveParameters {
    /// Start from the default settings under a new profile name.
    pub fn named(list_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            list_name: list_name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// Set the detection filter width and rebuild the convolution filter.
    pub fn with_fwhm(mut self, fwhm: f64) -> Self {
        self.fwhm = fwhm;
        self.conv_filter = gaussian_filter(fwhm);
        self
    }

    /// Set the star diameter limits in pixels.
    pub fn with_star_size(mut self, min_size: f64, max_size: f64) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    /// Set how many stars are kept after extraction and used for solving.
    pub fn with_keep(mut self, initial_keep: u32, keep_num: u32) -> Self {
        self.initial_keep = initial_keep;
        self.keep_num = keep_num;
        self
    }

    /// Set the field width search bounds in degrees.
    pub fn with_width_range(mut self, min_width: f64, max_width: f64) -> Self {
        self.min_width = min_width;
        self.max_width = max_width;
        self
    }

    /// Enable or disable parallel solving.
    pub fn with_parallel(mut self, in_parallel: bool) -> Self {
        self.in_parallel = in_parallel;
        self.multi_algorithm = if in_parallel {
            MultiAlgorithm::Auto
        } else {
            MultiAlgorithm::None
        };
        self
    }

    /// Set the percentage of brightest and dimmest stars to drop.
    pub fn with_trim(mut self, remove_brightest: f64, remove_dimmest: f64) -> Self {
        self.remove_brightest = remove_brightest;
        self.remove_dimmest = remove_dimmest;
        self
    }

    /// Set the solver time limit.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.solver_time_limit = limit;
        self
    }

    /// Detection filter width in pixels.
    pub fn fwhm(&self) -> f64 {
        self.fwhm
    }

    /// Row-major square Gaussian kernel derived from [`fwhm`](Self::fwhm).
    pub fn conv_filter(&self) -> &[f64] {
        &self.conv_filter
    }

    /// Check the snapshot before handing it to the engine.
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("kron_fact", self.kron_fact),
            ("r_min", self.r_min),
            ("min_area", self.min_area),
            ("deblend_contrast", self.deblend_contrast),
            ("clean_param", self.clean_param),
            ("max_size", self.max_size),
            ("min_size", self.min_size),
            ("max_ellipse", self.max_ellipse),
            ("remove_brightest", self.remove_brightest),
            ("remove_dimmest", self.remove_dimmest),
            ("saturation_limit", self.saturation_limit),
            ("min_width", self.min_width),
            ("max_width", self.max_width),
            ("search_radius", self.search_radius),
            ("logratio_tokeep", self.logratio_tokeep),
            ("logratio_totune", self.logratio_totune),
            ("logratio_tosolve", self.logratio_tosolve),
        ];
        if let Some((name, value)) = non_negative
            .into_iter()
            .find(|(_, value)| value.is_nan() || *value < 0.)
        {
            return Err(Error::InvalidParameter(format!(
                "{name} must be non-negative, got {value}"
            )));
        }
        if self.fwhm.is_nan() || self.fwhm <= 0. {
            return Err(Error::InvalidParameter(format!(
                "fwhm must be positive, got {}",
                self.fwhm
            )));
        }
        if self.max_size > 0. && self.min_size > self.max_size {
            return Err(Error::InvalidParameter(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        if self.min_width > self.max_width {
            return Err(Error::InvalidParameter(format!(
                "min_width {} exceeds max_width {}",
                self.min_width, self.max_width
            )));
        }
        if self.keep_num > self.initial_keep {
            return Err(Error::InvalidParameter(format!(
                "keep_num {} exceeds initial_keep {}",
                self.keep_num, self.initial_keep
            )));
        }
        if self.downsample == 0 {
            return Err(Error::InvalidParameter("downsample must be at least 1".to_owned()));
        }
        Ok(())
    }
}

/// Gaussian kernel with the given full width at half maximum.
///
/// The kernel spans `-ceil(0.6 * fwhm)..=ceil(0.6 * fwhm)` on both axes, peaks at 1.
fn gaussian_filter(fwhm: f64) -> Vec<f64> {
    if !(fwhm > 0.) {
        return Vec::new();
    }
    let size = (fwhm * 0.6).ceil() as i64;
    let mut filter = Vec::with_capacity(((2 * size + 1) * (2 * size + 1)) as usize);
    for y in -size..=size {
        for x in -size..=size {
            let r2 = (x * x + y * y) as f64;
            filter.push((-4. * std::f64::consts::LN_2 * r2 / (fwhm * fwhm)).exp());
        }
    }
    filter
}

/// Names of the standard profiles, in catalog order.
pub const STANDARD_PROFILES: [&str; 8] = [
    "Default",
    "SingleThreadSolving",
    "ParallelLargeScale",
    "ParallelSmallScale",
    "AllStars",
    "SmallStars",
    "MidStars",
    "BigStars",
];

/// Catalog index of the `ParallelLargeScale` standard profile.
pub const PARALLEL_LARGE_SCALE: usize = 2;

/// The standard profile set, indexed like [`STANDARD_PROFILES`].
pub fn standard_profiles() -> Vec<SolveParameters> {
    let [
        default,
        single_thread,
        large_scale,
        small_scale,
        all_stars,
        small_stars,
        mid_stars,
        big_stars,
    ] = STANDARD_PROFILES;

    vec![
        SolveParameters::named(
            default,
            "Default profile. Generic and not optimized for any specific purpose.",
        ),
        SolveParameters::named(
            single_thread,
            "Solve in a single thread, useful on constrained hosts.",
        )
        .with_parallel(false),
        SolveParameters::named(large_scale, "Parallel solving tuned for wide fields.")
            .with_width_range(10., 180.),
        SolveParameters::named(small_scale, "Parallel solving tuned for narrow fields.")
            .with_width_range(0.1, 10.),
        SolveParameters::named(all_stars, "Keep every detected star.")
            .with_keep(1000, 1000)
            .with_fwhm(2.),
        SolveParameters::named(small_stars, "Extract small, sharp stars.")
            .with_fwhm(2.)
            .with_star_size(0., 5.)
            .with_trim(10., 20.),
        SolveParameters::named(mid_stars, "Extract medium sized stars.")
            .with_star_size(0., 10.)
            .with_trim(10., 20.),
        SolveParameters::named(big_stars, "Extract large, bright stars.")
            .with_fwhm(8.)
            .with_star_size(5., 0.)
            .with_trim(0., 50.),
    ]
}

/// Ordered, immutable list of parameter profiles offered by an engine.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileCatalog {
    profiles: Vec<SolveParameters>,
}

impl ProfileCatalog {
    /// Wrap an engine's built-in profiles.
    pub fn new(profiles: Vec<SolveParameters>) -> Self {
        Self { profiles }
    }

    /// Number of profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// The profile at `index`.
    pub fn get(&self, index: usize) -> Result<&SolveParameters> {
        self.profiles.get(index).ok_or(Error::InvalidProfile(index))
    }

    /// Profile names in catalog order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.list_name.as_str())
    }

    /// Index of the profile called `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names().position(|n| n == name)
    }
}

impl Default for ProfileCatalog {
    fn default() -> Self {
        Self::new(standard_profiles())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn default_filter() {
        let params = SolveParameters::default();
        let filter = params.conv_filter();
        assert_eq!(filter.len(), 49);
        assert_abs_diff_eq!(filter[24], 1.);
        // Half maximum lies at a radius of fwhm / 2.
        let half = (-4. * std::f64::consts::LN_2 * 4. / 16.).exp();
        assert_abs_diff_eq!(half, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(filter[24 + 2], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(filter[0], filter[48]);
    }

    #[test]
    fn filter_follows_fwhm() {
        let params = SolveParameters::default().with_fwhm(1.);
        assert_eq!(params.conv_filter().len(), 9);
        assert_eq!(params.fwhm(), 1.);
    }

    #[test]
    fn defaults_validate() {
        SolveParameters::default().validate().unwrap();
        for profile in standard_profiles() {
            profile.validate().unwrap();
        }
    }

    #[test]
    fn negative_threshold_rejected() {
        let mut params = SolveParameters::default();
        params.deblend_contrast = -0.1;
        assert!(matches!(
            params.validate(),
            Err(Error::InvalidParameter(msg)) if msg.contains("deblend_contrast")
        ));

        let mut params = SolveParameters::default();
        params.search_radius = f64::NAN;
        assert!(params.validate().is_err());
    }

    #[test]
    fn keep_num_bounded_by_initial_keep() {
        let params = SolveParameters::default().with_keep(10, 50);
        assert!(matches!(params.validate(), Err(Error::InvalidParameter(_))));

        let params = SolveParameters::default().with_keep(50, 50);
        params.validate().unwrap();
    }

    #[test]
    fn width_range_ordered() {
        let params = SolveParameters::default().with_width_range(20., 5.);
        assert!(params.validate().is_err());
    }

    #[test]
    fn catalog_lookup() {
        let catalog = ProfileCatalog::default();
        assert_eq!(catalog.len(), STANDARD_PROFILES.len());
        assert_eq!(
            catalog.get(PARALLEL_LARGE_SCALE).unwrap().list_name,
            "ParallelLargeScale"
        );
        assert_eq!(catalog.position("BigStars"), Some(7));
        assert_eq!(catalog.get(8), Err(Error::InvalidProfile(8)));
        assert!(!catalog.get(1).unwrap().in_parallel);
    }
}
