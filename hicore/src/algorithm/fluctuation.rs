use itertools::iproduct;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::histogram::{EnergyGrid, DELTA};

#[derive(Clone, Debug, Error, PartialEq)]
pub enum FluctuationError {
    #[error("window size must cover at least one bin per direction, got {eta_bins}x{phi_bins}")]
    InvalidWindowSize { eta_bins: usize, phi_bins: usize },
    #[error(
        "no complete {window_eta_bins}x{window_phi_bins} window fits within |eta| < {eta_limit}"
    )]
    InsufficientWindows {
        eta_limit: f64,
        window_eta_bins: usize,
        window_phi_bins: usize,
    },
}

/// Size of the scan window, in grid bins.
///
/// Validated once at configuration time; a zero extent in either direction
/// is rejected up front instead of failing on every event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    eta_bins: usize,
    phi_bins: usize,
}

impl WindowConfig {
    /// Constructs a validated window size.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use hicore::algorithm::fluctuation::WindowConfig;
    /// let window = WindowConfig::new(7, 7).unwrap();
    /// assert_eq!(window.eta_bins(), 7);
    /// assert!(WindowConfig::new(0, 7).is_err());
    /// ```
    pub fn new(eta_bins: usize, phi_bins: usize) -> Result<Self, FluctuationError> {
        if eta_bins == 0 || phi_bins == 0 {
            return Err(FluctuationError::InvalidWindowSize { eta_bins, phi_bins });
        }
        Ok(WindowConfig { eta_bins, phi_bins })
    }

    pub fn eta_bins(&self) -> usize {
        self.eta_bins
    }

    pub fn phi_bins(&self) -> usize {
        self.phi_bins
    }
}

impl Default for WindowConfig {
    /// The 7x7 window used throughout the heavy-ion runs.
    fn default() -> Self {
        WindowConfig { eta_bins: 7, phi_bins: 7 }
    }
}

/// Fluctuation statistics of one event, global and per eta slice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FluctuationResult {
    /// Standard deviation of window sums over the whole scanned range.
    pub global: f64,
    /// One standard deviation per window column along eta, ordered by
    /// ascending eta.
    pub eta_slices: Vec<f64>,
}

/// Running sums of window transverse energies.
#[derive(Clone, Copy, Debug, Default)]
struct WindowAccumulator {
    sum_et: f64,
    sum_sq_et: f64,
    n_windows: usize,
}

impl WindowAccumulator {
    fn add(&mut self, window_et: f64) {
        self.sum_et += window_et;
        self.sum_sq_et += window_et * window_et;
        self.n_windows += 1;
    }

    /// Population standard deviation of the accumulated window sums,
    /// `sqrt(E[x^2] - E[x]^2)`, without Bessel correction. `None` when no
    /// window was accumulated.
    fn fluctuation(&self) -> Option<f64> {
        if self.n_windows == 0 {
            return None;
        }
        let n = self.n_windows as f64;
        let mean = self.sum_et / n;
        // the second moment can dip below the squared mean by rounding
        let variance = (self.sum_sq_et / n - mean * mean).max(0.0);
        Some(variance.sqrt())
    }
}

/// Walks the window tiling and feeds every window sum to `observer`.
///
/// Returns the global accumulator plus one accumulator per eta column.
/// Windows are non-overlapping tiles anchored at `xcorner`; trailing bins
/// that do not fill a complete window in either direction are dropped, not
/// errored. The eta range is the whole axis when `eta_limit` equals the
/// axis maximum, otherwise the bins whose centers lie within
/// `[-eta_limit, eta_limit]` found via the `DELTA`-guarded edge lookup.
fn scan<F>(
    grid: &EnergyGrid,
    eta_limit: f64,
    window: WindowConfig,
    mut observer: F,
) -> (WindowAccumulator, Vec<WindowAccumulator>)
where
    F: FnMut(f64, f64),
{
    let eta = grid.eta_axis();
    let n_x = eta.n_bins();
    let n_y = grid.phi_axis().n_bins();

    let (mut xcorner, x_bin_max) = if eta_limit == eta.max() {
        (1, n_x)
    } else {
        // limits beyond the axis clamp to the full range
        let lo = eta.find_bin(-eta_limit + DELTA).max(1);
        let hi = eta.find_bin(eta_limit + DELTA).saturating_sub(1).min(n_x);
        (lo, hi)
    };

    let mut total = WindowAccumulator::default();
    let mut slices = Vec::new();

    while xcorner + window.eta_bins - 1 <= x_bin_max {
        let mut slice = WindowAccumulator::default();

        let mut ycorner = 1;
        while ycorner + window.phi_bins - 1 <= n_y {
            let mut window_et = 0.0;
            for (xbin, ybin) in iproduct!(
                xcorner..xcorner + window.eta_bins,
                ycorner..ycorner + window.phi_bins
            ) {
                window_et += grid.bin_content(xbin, ybin);
            }

            total.add(window_et);
            slice.add(window_et);
            observer(eta.bin_center(xcorner), window_et);

            ycorner += window.phi_bins;
        }

        slices.push(slice);
        xcorner += window.eta_bins;
    }

    (total, slices)
}

/// Computes the calorimeter fluctuation of one event.
///
/// Scans the grid with non-overlapping windows of `window` size inside
/// `|eta| < eta_limit` and returns the population standard deviation of the
/// per-window transverse energy sums.
///
/// # Errors
///
/// `InsufficientWindows` when the limit and window size admit no complete
/// window; the statistic is undefined there and the caller decides whether
/// to skip the event or abort the run.
///
/// # Example
///
/// ```rust
/// # use hicore::data::histogram::EnergyGrid;
/// # use hicore::algorithm::fluctuation::{analyze_fluctuations, WindowConfig};
/// let mut grid = EnergyGrid::new(4, -2.0, 2.0, 4, 0.0, 4.0).unwrap();
/// grid.fill(-1.5, 0.5, 8.0);
/// let window = WindowConfig::new(2, 2).unwrap();
/// // four windows, one holding 8 GeV: sqrt(64/4 - (8/4)^2) = sqrt(12)
/// let fluctuation = analyze_fluctuations(&grid, 2.0, window).unwrap();
/// assert!((fluctuation - 12f64.sqrt()).abs() < 1e-12);
/// ```
pub fn analyze_fluctuations(
    grid: &EnergyGrid,
    eta_limit: f64,
    window: WindowConfig,
) -> Result<f64, FluctuationError> {
    let (total, _) = scan(grid, eta_limit, window, |_, _| {});
    total
        .fluctuation()
        .ok_or(FluctuationError::InsufficientWindows {
            eta_limit,
            window_eta_bins: window.eta_bins,
            window_phi_bins: window.phi_bins,
        })
}

/// Computes the global fluctuation together with one statistic per eta
/// slice (all phi windows sharing one eta column).
///
/// `observer` is called once per window with the eta center of the window's
/// corner bin and the window transverse energy sum; callers use it to feed
/// auxiliary accumulation such as the (eta, FCal ET, window ET) histogram.
pub fn analyze_fluctuations_eta_slices<F>(
    grid: &EnergyGrid,
    eta_limit: f64,
    window: WindowConfig,
    observer: F,
) -> Result<FluctuationResult, FluctuationError>
where
    F: FnMut(f64, f64),
{
    let insufficient = FluctuationError::InsufficientWindows {
        eta_limit,
        window_eta_bins: window.eta_bins,
        window_phi_bins: window.phi_bins,
    };

    let (total, slices) = scan(grid, eta_limit, window, observer);
    let global = total.fluctuation().ok_or(insufficient.clone())?;

    let mut eta_slices = Vec::with_capacity(slices.len());
    for slice in slices {
        eta_slices.push(slice.fluctuation().ok_or(insufficient.clone())?);
    }

    Ok(FluctuationResult { global, eta_slices })
}

/// Computes the global fluctuation for a batch of independent events in
/// parallel.
///
/// Every event's grid is scanned with the same limit and window size; the
/// computation holds no cross-event state, so the batch is embarrassingly
/// parallel.
pub fn analyze_fluctuations_batch(
    grids: &[EnergyGrid],
    eta_limit: f64,
    window: WindowConfig,
) -> Vec<Result<f64, FluctuationError>> {
    grids
        .par_iter()
        .map(|grid| analyze_fluctuations(grid, eta_limit, window))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::histogram::EnergyGrid;

    fn uniform_grid(
        n_eta: usize,
        eta_range: (f64, f64),
        n_phi: usize,
        phi_range: (f64, f64),
        value: f64,
    ) -> EnergyGrid {
        let mut grid =
            EnergyGrid::new(n_eta, eta_range.0, eta_range.1, n_phi, phi_range.0, phi_range.1)
                .unwrap();
        for ix in 1..=n_eta {
            for iy in 1..=n_phi {
                let eta = grid.eta_axis().bin_center(ix);
                let phi = grid.phi_axis().bin_center(iy);
                grid.fill(eta, phi, value);
            }
        }
        grid
    }

    #[test]
    fn test_uniform_grid_has_zero_fluctuation() {
        let grid = uniform_grid(14, (-3.5, 3.5), 14, (0.0, 7.0), 2.5);
        let window = WindowConfig::new(7, 7).unwrap();
        let fluctuation = analyze_fluctuations(&grid, 3.5, window).unwrap();
        assert_eq!(fluctuation, 0.0);
    }

    #[test]
    fn test_single_hot_window_matches_hand_computation() {
        // 4x4 grid, 2x2 windows: four windows, one holding 8 GeV
        let mut grid = EnergyGrid::new(4, -2.0, 2.0, 4, 0.0, 4.0).unwrap();
        grid.fill(-1.5, 0.5, 8.0);
        let window = WindowConfig::new(2, 2).unwrap();
        let fluctuation = analyze_fluctuations(&grid, 2.0, window).unwrap();
        let expected: f64 = (64.0f64 / 4.0 - (8.0 / 4.0) * (8.0 / 4.0)).sqrt();
        assert!((fluctuation - expected).abs() < 1e-12);
        assert!((fluctuation - 12f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_trailing_columns_are_dropped() {
        // 5 eta bins with a 2-bin window: bin 5 never enters any window
        let window = WindowConfig::new(2, 2).unwrap();

        let mut grid = EnergyGrid::new(5, -2.5, 2.5, 2, 0.0, 2.0).unwrap();
        grid.fill(-2.0, 0.5, 3.0);
        let clean = analyze_fluctuations(&grid, 2.5, window).unwrap();

        // a marker in the trailing eta column must not change the result
        grid.fill(2.3, 0.5, 999.0);
        let marked = analyze_fluctuations(&grid, 2.5, window).unwrap();
        assert_eq!(clean, marked);
    }

    #[test]
    fn test_trailing_phi_rows_are_dropped() {
        let window = WindowConfig::new(2, 2).unwrap();

        let mut grid = EnergyGrid::new(4, -2.0, 2.0, 5, 0.0, 5.0).unwrap();
        grid.fill(0.5, 0.5, 3.0);
        let clean = analyze_fluctuations(&grid, 2.0, window).unwrap();

        grid.fill(0.5, 4.5, 999.0);
        let marked = analyze_fluctuations(&grid, 2.0, window).unwrap();
        assert_eq!(clean, marked);
    }

    #[test]
    fn test_limit_at_axis_maximum_uses_full_range() {
        // a marker in the outermost eta bin is only reachable from bin 1
        let window = WindowConfig::new(7, 7).unwrap();
        let mut grid =
            EnergyGrid::new(100, -5.0, 5.0, 64, -std::f64::consts::PI, std::f64::consts::PI)
                .unwrap();
        grid.fill(-4.95, 0.0, 100.0);

        let full = analyze_fluctuations(&grid, 5.0, window).unwrap();
        let limited = analyze_fluctuations(&grid, 4.9, window).unwrap();
        assert!(full > 0.0);
        assert_ne!(full, limited);

        // the 4.9 limit starts at bin 2, so the marker is invisible there
        let empty =
            EnergyGrid::new(100, -5.0, 5.0, 64, -std::f64::consts::PI, std::f64::consts::PI)
                .unwrap();
        let limited_empty = analyze_fluctuations(&empty, 4.9, window).unwrap();
        assert_eq!(limited, limited_empty);
    }

    #[test]
    fn test_slice_window_counts_partition_the_total() {
        let mut grid = EnergyGrid::new(21, -5.0, 5.0, 14, 0.0, 7.0).unwrap();
        grid.fill(0.1, 0.5, 4.0);
        grid.fill(-3.0, 2.5, 2.0);
        let window = WindowConfig::new(7, 7).unwrap();

        let (total, slices) = scan(&grid, 5.0, window, |_, _| {});
        assert_eq!(total.n_windows, 6);
        assert_eq!(slices.len(), 3);
        let per_slice: usize = slices.iter().map(|s| s.n_windows).sum();
        assert_eq!(per_slice, total.n_windows);
    }

    #[test]
    fn test_insufficient_windows_is_an_error_not_nan() {
        // only 4 eta bins fall within |eta| < 0.2, the 7-bin window cannot fit
        let grid = uniform_grid(100, (-5.0, 5.0), 64, (0.0, 6.4), 1.0);
        let window = WindowConfig::new(7, 7).unwrap();
        let result = analyze_fluctuations(&grid, 0.2, window);
        assert!(matches!(
            result,
            Err(FluctuationError::InsufficientWindows { .. })
        ));

        // the slices variant reports the same condition
        let slices = analyze_fluctuations_eta_slices(&grid, 0.2, window, |_, _| {});
        assert!(slices.is_err());
    }

    #[test]
    fn test_window_larger_than_grid_is_an_error() {
        let grid = uniform_grid(10, (-5.0, 5.0), 4, (0.0, 4.0), 1.0);
        let window = WindowConfig::new(11, 1).unwrap();
        assert!(analyze_fluctuations(&grid, 5.0, window).is_err());
    }

    #[test]
    fn test_single_window_degeneracy_is_exactly_zero() {
        // one window covering the whole grid: the variance vanishes for any
        // content
        let mut grid = EnergyGrid::new(4, -2.0, 2.0, 2, 0.0, std::f64::consts::PI).unwrap();
        grid.fill(-1.7, 0.3, 17.3);
        grid.fill(0.2, 1.1, 0.07);
        grid.fill(1.9, 3.0, 253.9);
        let window = WindowConfig::new(4, 2).unwrap();
        let result = analyze_fluctuations_eta_slices(&grid, 2.0, window, |_, _| {}).unwrap();
        assert_eq!(result.global, 0.0);
        assert_eq!(result.eta_slices, vec![0.0]);
    }

    #[test]
    fn test_slices_variant_global_matches_plain_variant() {
        let mut grid = EnergyGrid::new(14, -3.5, 3.5, 14, 0.0, 7.0).unwrap();
        grid.fill(-2.0, 1.0, 5.0);
        grid.fill(1.0, 6.0, 9.0);
        grid.fill(3.0, 3.0, 1.5);
        let window = WindowConfig::new(7, 7).unwrap();

        let global = analyze_fluctuations(&grid, 3.5, window).unwrap();
        let sliced = analyze_fluctuations_eta_slices(&grid, 3.5, window, |_, _| {}).unwrap();
        assert_eq!(global, sliced.global);
        assert_eq!(sliced.eta_slices.len(), 2);
    }

    #[test]
    fn test_observer_sees_every_window() {
        let mut grid = EnergyGrid::new(4, -2.0, 2.0, 4, 0.0, 4.0).unwrap();
        grid.fill(-1.5, 0.5, 8.0);
        let window = WindowConfig::new(2, 2).unwrap();

        let mut seen = Vec::new();
        analyze_fluctuations_eta_slices(&grid, 2.0, window, |eta, window_et| {
            seen.push((eta, window_et));
        })
        .unwrap();

        // four windows, eta corner centers at -1.5 and 0.5
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], (-1.5, 8.0));
        assert!(seen.iter().filter(|(eta, _)| *eta == -1.5).count() == 2);
        assert!(seen.iter().filter(|(eta, _)| *eta == 0.5).count() == 2);
        let sum: f64 = seen.iter().map(|(_, et)| et).sum();
        assert_eq!(sum, 8.0);
    }

    #[test]
    fn test_batch_matches_sequential() {
        let window = WindowConfig::new(7, 7).unwrap();
        let grids: Vec<EnergyGrid> = (0..8)
            .map(|i| {
                let mut grid = EnergyGrid::new(14, -3.5, 3.5, 14, 0.0, 7.0).unwrap();
                grid.fill(-1.0, 2.0, i as f64 * 3.0);
                grid.fill(2.0, 5.0, 1.0);
                grid
            })
            .collect();

        let batch = analyze_fluctuations_batch(&grids, 3.5, window);
        for (grid, result) in grids.iter().zip(batch) {
            assert_eq!(result.unwrap(), analyze_fluctuations(grid, 3.5, window).unwrap());
        }
    }

    #[test]
    fn test_zero_window_size_rejected_at_configuration() {
        assert!(matches!(
            WindowConfig::new(0, 7),
            Err(FluctuationError::InvalidWindowSize { .. })
        ));
        assert!(matches!(
            WindowConfig::new(7, 0),
            Err(FluctuationError::InvalidWindowSize { .. })
        ));
    }
}
