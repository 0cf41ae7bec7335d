use hicore::algorithm::fluctuation::{
    analyze_fluctuations, analyze_fluctuations_eta_slices, WindowConfig,
};
use hicore::data::histogram::{BinAxis, EnergyGrid, Hist1, Hist3};
use log::debug;
use serde_json::json;

use crate::analysis::manager::{Analysis, AnalysisError, Verdict};
use crate::config::AnalysisConfig;
use crate::io::sink::EventSink;

/// Calorimeter fluctuation analysis.
///
/// Per event: bins the cluster transverse energies into the eta-phi grid,
/// records the FCal sum, and computes the windowed fluctuation statistic
/// globally for every configured eta limit plus per eta slice at the widest
/// limit. Window sums of the slice pass also feed the
/// (eta, FCal ET, window ET) histogram.
pub struct FluctuationAnalysis {
    window: WindowConfig,
    eta_limits: Vec<f64>,

    n_eta_bins: usize,
    eta_min: f64,
    eta_max: f64,
    n_phi_bins: usize,
    phi_min: f64,
    phi_max: f64,

    fcal_axis: Option<BinAxis>,
    window_et_axis: Option<BinAxis>,
    h1_fcal: Option<Hist1>,
    h3_eta_fcal_window: Option<Hist3>,
}

impl FluctuationAnalysis {
    pub fn new() -> Self {
        FluctuationAnalysis {
            window: WindowConfig::default(),
            eta_limits: Vec::new(),
            n_eta_bins: 100,
            eta_min: -5.0,
            eta_max: 5.0,
            n_phi_bins: 64,
            phi_min: -std::f64::consts::PI,
            phi_max: std::f64::consts::PI,
            fcal_axis: None,
            window_et_axis: None,
            h1_fcal: None,
            h3_eta_fcal_window: None,
        }
    }
}

impl Default for FluctuationAnalysis {
    fn default() -> Self {
        FluctuationAnalysis::new()
    }
}

impl Analysis for FluctuationAnalysis {
    fn name(&self) -> &str {
        "FluctuationAnalysis"
    }

    fn setup(&mut self, config: &AnalysisConfig) -> Result<(), AnalysisError> {
        self.window = WindowConfig::new(config.window_eta_size, config.window_phi_size)?;
        self.eta_limits = config.eta_limits.clone();
        for limit in &self.eta_limits {
            debug!("EtaLimit = {}", limit);
        }

        self.n_eta_bins = config.n_eta_bins;
        self.eta_min = config.eta_min;
        self.eta_max = config.eta_max;
        self.n_phi_bins = config.n_phi_bins;
        self.phi_min = config.phi_min;
        self.phi_max = config.phi_max;

        self.fcal_axis =
            Some(BinAxis::new(config.n_fcal_et_bins, config.fcal_et_min, config.fcal_et_max)?);
        self.window_et_axis = Some(BinAxis::new(
            config.n_window_et_bins,
            config.window_et_min,
            config.window_et_max,
        )?);
        Ok(())
    }

    fn hist_initialize(&mut self, _sink: &mut EventSink) -> Result<(), AnalysisError> {
        let fcal_axis = self.fcal_axis.expect("setup ran before hist_initialize");
        let window_et_axis = self.window_et_axis.expect("setup ran before hist_initialize");

        // the FCal spectrum is binned ten times finer than the 3D axis
        let fine_fcal =
            BinAxis::new(fcal_axis.n_bins() * 10, fcal_axis.min(), fcal_axis.max())?;
        self.h1_fcal = Some(Hist1::new(fine_fcal));

        let eta_axis = BinAxis::new(self.n_eta_bins, self.eta_min, self.eta_max)?;
        self.h3_eta_fcal_window = Some(Hist3::new(eta_axis, fcal_axis, window_et_axis));
        Ok(())
    }

    fn process_event(
        &mut self,
        event: &hicore::data::event::Event,
        sink: &mut EventSink,
    ) -> Result<Verdict, AnalysisError> {
        let h1_fcal = self.h1_fcal.as_mut().expect("hist_initialize ran");
        let h3 = self.h3_eta_fcal_window.as_mut().expect("hist_initialize ran");

        // FCal sum, the event-activity proxy; kept at -1 when absent
        let fcal_et = event.calo_sums.fcal_et_tev().unwrap_or(-1.0);
        h1_fcal.fill(fcal_et);
        sink.fill("FCalEt", json!(fcal_et));

        // eta-phi distribution of cluster Et, rebuilt for every event
        let mut grid = EnergyGrid::new(
            self.n_eta_bins,
            self.eta_min,
            self.eta_max,
            self.n_phi_bins,
            self.phi_min,
            self.phi_max,
        )?;
        for cluster in &event.clusters {
            grid.fill(cluster.eta, cluster.phi, cluster.et());
        }

        let widest = *self.eta_limits.last().expect("eta_limits validated non-empty");
        let sliced =
            analyze_fluctuations_eta_slices(&grid, widest, self.window, |eta, window_et| {
                h3.fill(eta, fcal_et, window_et);
            })?;
        sink.fill("v_caloFluctuationEtaSlices", json!(sliced.eta_slices));

        let mut fluctuations = Vec::with_capacity(self.eta_limits.len());
        for &limit in &self.eta_limits {
            fluctuations.push(analyze_fluctuations(&grid, limit, self.window)?);
        }
        sink.fill("v_caloFluctuations", json!(fluctuations));

        Ok(Verdict::Keep)
    }

    fn hist_finalize(&mut self, sink: &mut EventSink) -> Result<(), AnalysisError> {
        if let Some(h1) = &self.h1_fcal {
            sink.write_histogram("h1_FCalEt", h1)?;
        }
        if let Some(h3) = &self.h3_eta_fcal_window {
            sink.write_histogram("h3_EtaFCalEtWindowEt", h3)?;
        }
        Ok(())
    }
}
