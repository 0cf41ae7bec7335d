use std::collections::BTreeMap;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Guard added to bin-edge lookups of configured limits.
///
/// A limit like 2.8 on an axis with bin edges at multiples of 0.1 lands
/// exactly on an edge; adding `DELTA` before the lookup makes the result
/// independent of floating point rounding of the edge itself. The guard is
/// always added, never subtracted, on both the lower and upper lookup.
pub const DELTA: f64 = 1e-6;

#[derive(Debug, Error, PartialEq)]
pub enum HistogramError {
    #[error("invalid axis: {n_bins} bins over [{min}, {max})")]
    InvalidAxis { n_bins: usize, min: f64, max: f64 },
    #[error("invalid grid: {0}")]
    InvalidGrid(String),
}

/// A uniformly binned axis over `[min, max)`.
///
/// Bin indices are 1-based: bin 1 is the first in-range bin, bin `n_bins`
/// the last. Index 0 is the underflow region and `n_bins + 1` the overflow
/// region, so `find_bin` never fails.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinAxis {
    n_bins: usize,
    min: f64,
    max: f64,
}

impl BinAxis {
    /// Constructs a new `BinAxis`.
    ///
    /// # Arguments
    ///
    /// * `n_bins` - Number of bins, at least 1.
    /// * `min` - Lower edge of the first bin.
    /// * `max` - Upper edge of the last bin, strictly greater than `min`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use hicore::data::histogram::BinAxis;
    /// let axis = BinAxis::new(100, -5.0, 5.0).unwrap();
    /// assert_eq!(axis.n_bins(), 100);
    /// assert_eq!(axis.width(), 0.1);
    /// ```
    pub fn new(n_bins: usize, min: f64, max: f64) -> Result<Self, HistogramError> {
        if n_bins == 0 || !min.is_finite() || !max.is_finite() || min >= max {
            return Err(HistogramError::InvalidAxis { n_bins, min, max });
        }
        Ok(BinAxis { n_bins, min, max })
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn width(&self) -> f64 {
        (self.max - self.min) / self.n_bins as f64
    }

    /// Returns the 1-based index of the bin containing `value`.
    ///
    /// Values below `min` return 0 (underflow), values at or above `max`
    /// return `n_bins + 1` (overflow).
    ///
    /// # Example
    ///
    /// ```rust
    /// # use hicore::data::histogram::BinAxis;
    /// let axis = BinAxis::new(4, -2.0, 2.0).unwrap();
    /// assert_eq!(axis.find_bin(-2.0), 1);
    /// assert_eq!(axis.find_bin(0.5), 3);
    /// assert_eq!(axis.find_bin(-3.0), 0);
    /// assert_eq!(axis.find_bin(2.0), 5);
    /// ```
    pub fn find_bin(&self, value: f64) -> usize {
        if value < self.min {
            return 0;
        }
        if value >= self.max {
            return self.n_bins + 1;
        }
        ((value - self.min) / self.width()) as usize + 1
    }

    /// Center of the 1-based bin `index`.
    pub fn bin_center(&self, index: usize) -> f64 {
        self.min + (index as f64 - 0.5) * self.width()
    }

    /// Lower edge of the 1-based bin `index`.
    pub fn low_edge(&self, index: usize) -> f64 {
        self.min + (index as f64 - 1.0) * self.width()
    }
}

/// A 1D histogram with uniform binning.
///
/// Under- and overflow entries are counted but not stored per bin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hist1 {
    pub axis: BinAxis,
    pub bins: Vec<f64>,
    pub entries: u64,
}

impl Hist1 {
    pub fn new(axis: BinAxis) -> Self {
        let bins = vec![0.0; axis.n_bins()];
        Hist1 { axis, bins, entries: 0 }
    }

    pub fn fill(&mut self, x: f64) {
        self.fill_weighted(x, 1.0);
    }

    pub fn fill_weighted(&mut self, x: f64, weight: f64) {
        self.entries += 1;
        let bin = self.axis.find_bin(x);
        if bin >= 1 && bin <= self.axis.n_bins() {
            self.bins[bin - 1] += weight;
        }
    }

    pub fn bin_content(&self, index: usize) -> f64 {
        self.bins[index - 1]
    }

    pub fn integral(&self) -> f64 {
        self.bins.iter().sum()
    }
}

/// A 2D grid of transverse energy sums over (eta, phi).
///
/// The grid is rebuilt per event from raw cluster data and read by the
/// fluctuation estimator; both bin indices are 1-based like `BinAxis`.
/// It lives for one event only and is never persisted.
#[derive(Clone, Debug)]
pub struct EnergyGrid {
    eta_axis: BinAxis,
    phi_axis: BinAxis,
    data: DMatrix<f64>,
}

impl EnergyGrid {
    /// Constructs an empty grid from axis definitions.
    ///
    /// # Arguments
    ///
    /// * `n_eta_bins`, `eta_min`, `eta_max` - eta axis definition.
    /// * `n_phi_bins`, `phi_min`, `phi_max` - phi axis definition.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use hicore::data::histogram::EnergyGrid;
    /// let mut grid = EnergyGrid::new(100, -5.0, 5.0, 64, -3.2, 3.2).unwrap();
    /// grid.fill(0.05, 0.0, 12.5);
    /// assert_eq!(grid.bin_content(51, 33), 12.5);
    /// ```
    pub fn new(
        n_eta_bins: usize,
        eta_min: f64,
        eta_max: f64,
        n_phi_bins: usize,
        phi_min: f64,
        phi_max: f64,
    ) -> Result<Self, HistogramError> {
        let eta_axis = BinAxis::new(n_eta_bins, eta_min, eta_max)
            .map_err(|e| HistogramError::InvalidGrid(format!("eta axis: {}", e)))?;
        let phi_axis = BinAxis::new(n_phi_bins, phi_min, phi_max)
            .map_err(|e| HistogramError::InvalidGrid(format!("phi axis: {}", e)))?;
        Ok(EnergyGrid::with_axes(eta_axis, phi_axis))
    }

    pub fn with_axes(eta_axis: BinAxis, phi_axis: BinAxis) -> Self {
        let data = DMatrix::zeros(eta_axis.n_bins(), phi_axis.n_bins());
        EnergyGrid { eta_axis, phi_axis, data }
    }

    pub fn eta_axis(&self) -> &BinAxis {
        &self.eta_axis
    }

    pub fn phi_axis(&self) -> &BinAxis {
        &self.phi_axis
    }

    /// Adds `et` into the bin containing `(eta, phi)`.
    ///
    /// Values outside either axis range are dropped; the estimator only
    /// ever reads the core region.
    pub fn fill(&mut self, eta: f64, phi: f64, et: f64) {
        let ix = self.eta_axis.find_bin(eta);
        let iy = self.phi_axis.find_bin(phi);
        if ix >= 1 && ix <= self.eta_axis.n_bins() && iy >= 1 && iy <= self.phi_axis.n_bins() {
            self.data[(ix - 1, iy - 1)] += et;
        }
    }

    /// Content of the bin at 1-based indices `(ix, iy)`.
    pub fn bin_content(&self, ix: usize, iy: usize) -> f64 {
        self.data[(ix - 1, iy - 1)]
    }

    /// Sum over all in-range bins.
    pub fn total_et(&self) -> f64 {
        self.data.sum()
    }
}

/// A 3D histogram with uniform binning on all axes.
///
/// Used to accumulate (eta, FCal ET, window ET) triples across events.
/// At the axis sizes of the analyses most of the volume stays empty, so
/// bin contents are stored sparsely keyed by the flattened bin index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hist3 {
    pub x_axis: BinAxis,
    pub y_axis: BinAxis,
    pub z_axis: BinAxis,
    pub bins: BTreeMap<usize, f64>,
    pub entries: u64,
}

impl Hist3 {
    pub fn new(x_axis: BinAxis, y_axis: BinAxis, z_axis: BinAxis) -> Self {
        Hist3 { x_axis, y_axis, z_axis, bins: BTreeMap::new(), entries: 0 }
    }

    fn flat_index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        ((iz - 1) * self.y_axis.n_bins() + (iy - 1)) * self.x_axis.n_bins() + (ix - 1)
    }

    pub fn fill(&mut self, x: f64, y: f64, z: f64) {
        self.fill_weighted(x, y, z, 1.0);
    }

    pub fn fill_weighted(&mut self, x: f64, y: f64, z: f64, weight: f64) {
        self.entries += 1;
        let ix = self.x_axis.find_bin(x);
        let iy = self.y_axis.find_bin(y);
        let iz = self.z_axis.find_bin(z);
        if ix >= 1
            && ix <= self.x_axis.n_bins()
            && iy >= 1
            && iy <= self.y_axis.n_bins()
            && iz >= 1
            && iz <= self.z_axis.n_bins()
        {
            let index = self.flat_index(ix, iy, iz);
            *self.bins.entry(index).or_insert(0.0) += weight;
        }
    }

    pub fn bin_content(&self, ix: usize, iy: usize, iz: usize) -> f64 {
        self.bins.get(&self.flat_index(ix, iy, iz)).copied().unwrap_or(0.0)
    }

    pub fn integral(&self) -> f64 {
        self.bins.values().sum()
    }
}
