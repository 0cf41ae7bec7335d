use hicore::data::event::{Event, Jet};
use log::info;

use crate::analysis::manager::{Analysis, AnalysisError, Verdict};
use crate::config::{AnalysisConfig, EtaScaleFactor};
use crate::io::sink::EventSink;

/// Jet energy calibration provider.
///
/// The actual calibration derivation lives outside this crate; analyses
/// only depend on this seam, so a run can swap the provider without
/// touching the event loop.
pub trait JetCalibrator {
    fn calibrate(&self, jet: &Jet) -> Jet;
}

/// Passes jets through unchanged.
pub struct IdentityCalibration;

impl JetCalibrator for IdentityCalibration {
    fn calibrate(&self, jet: &Jet) -> Jet {
        *jet
    }
}

/// Multiplicative energy scale factors binned in eta.
///
/// Jets outside every configured range are passed through unchanged.
pub struct EtaBinnedCalibration {
    factors: Vec<EtaScaleFactor>,
}

impl EtaBinnedCalibration {
    pub fn new(factors: Vec<EtaScaleFactor>) -> Self {
        EtaBinnedCalibration { factors }
    }
}

impl JetCalibrator for EtaBinnedCalibration {
    fn calibrate(&self, jet: &Jet) -> Jet {
        let scale = self
            .factors
            .iter()
            .find(|f| jet.eta >= f.eta_min && jet.eta < f.eta_max)
            .map(|f| f.scale)
            .unwrap_or(1.0);
        Jet::new(jet.pt * scale, jet.eta, jet.phi, jet.e * scale)
    }
}

/// Quality flag for one reconstructed jet.
///
/// The record-level stand-in for the jet cleaning decision: jets with
/// non-physical kinematics are flagged bad.
fn is_clean(jet: &Jet) -> bool {
    jet.pt.is_finite() && jet.e.is_finite() && jet.pt > 0.0 && jet.e > 0.0
}

/// Jet calibration and bookkeeping.
///
/// Calibrates the EM-scale jets through the configured provider, applies
/// the pT and acceptance cuts, and records calibrated, EM-scale and (for
/// simulation) particle-level jets per event.
pub struct JetAnalysis {
    is_data: bool,
    pt_min: f64,
    eta_max: f64,
    calibrator: Box<dyn JetCalibrator>,
    n_jets: u64,
    n_rejected: u64,
}

impl JetAnalysis {
    pub fn new() -> Self {
        JetAnalysis {
            is_data: true,
            pt_min: 20.0,
            eta_max: 2.8,
            calibrator: Box::new(IdentityCalibration),
            n_jets: 0,
            n_rejected: 0,
        }
    }

    /// Replaces the calibration provider.
    pub fn with_calibrator(mut self, calibrator: Box<dyn JetCalibrator>) -> Self {
        self.calibrator = calibrator;
        self
    }
}

impl Default for JetAnalysis {
    fn default() -> Self {
        JetAnalysis::new()
    }
}

impl Analysis for JetAnalysis {
    fn name(&self) -> &str {
        "JetAnalysis"
    }

    fn setup(&mut self, config: &AnalysisConfig) -> Result<(), AnalysisError> {
        self.is_data = config.is_data;
        self.pt_min = config.jet_pt_min;
        self.eta_max = config.jet_eta_max;
        if !config.jet_calibration.is_empty() {
            self.calibrator = Box::new(EtaBinnedCalibration::new(config.jet_calibration.clone()));
        }
        Ok(())
    }

    fn process_event(
        &mut self,
        event: &Event,
        sink: &mut EventSink,
    ) -> Result<Verdict, AnalysisError> {
        let mut calibrated = Vec::with_capacity(event.em_jets.len());
        let mut clean_flags = Vec::with_capacity(event.em_jets.len());

        for jet in &event.em_jets {
            let cal = self.calibrator.calibrate(jet);
            self.n_jets += 1;
            if cal.pt < self.pt_min || cal.eta.abs() > self.eta_max {
                self.n_rejected += 1;
                continue;
            }
            clean_flags.push(is_clean(&cal));
            calibrated.push(cal);
        }

        sink.fill("vR_C_jets", serde_json::to_value(&calibrated)?);
        sink.fill("vR_EM_jets", serde_json::to_value(&event.em_jets)?);
        sink.fill("v_isCleanJet", serde_json::to_value(&clean_flags)?);
        if !self.is_data {
            sink.fill("vT_jets", serde_json::to_value(&event.truth_jets)?);
        }

        Ok(Verdict::Keep)
    }

    fn finalize(&mut self, _sink: &mut EventSink) -> Result<(), AnalysisError> {
        info!(
            "JetAnalysis saw {} jets, {} below threshold or out of acceptance",
            self.n_jets, self.n_rejected
        );
        Ok(())
    }
}
