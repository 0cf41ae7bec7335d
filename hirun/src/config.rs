use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One eta range with a multiplicative jet energy scale factor.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EtaScaleFactor {
    pub eta_min: f64,
    pub eta_max: f64,
    pub scale: f64,
}

/// Run configuration shared by all analyses.
///
/// Deserialized from a JSON file; every field falls back to the default
/// used in the heavy-ion runs, so a partial file configures only what it
/// names.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// True for recorded collision data, false for simulation. Gates the
    /// GRL, trigger and DAQ-error requirements.
    pub is_data: bool,
    /// Good-runs-list file; no file means no GRL requirement.
    pub grl_path: Option<PathBuf>,
    /// Trigger chains of which at least one must have fired.
    pub triggers: Vec<String>,
    pub min_vertices: usize,

    // eta x phi binning of the cluster energy grid
    pub n_eta_bins: usize,
    pub eta_min: f64,
    pub eta_max: f64,
    pub n_phi_bins: usize,
    pub phi_min: f64,
    pub phi_max: f64,

    // fluctuation scan windows, in bins
    pub window_eta_size: usize,
    pub window_phi_size: usize,
    /// Absolute eta cutoffs, ascending; the last one drives the eta-slice
    /// output.
    pub eta_limits: Vec<f64>,

    // FCal ET axis (TeV)
    pub n_fcal_et_bins: usize,
    pub fcal_et_min: f64,
    pub fcal_et_max: f64,

    // window ET axis (GeV)
    pub n_window_et_bins: usize,
    pub window_et_min: f64,
    pub window_et_max: f64,

    // jets
    /// Minimum calibrated jet pT in GeV.
    pub jet_pt_min: f64,
    pub jet_eta_max: f64,
    /// Eta-binned jet energy scale factors; empty means unit calibration.
    pub jet_calibration: Vec<EtaScaleFactor>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            is_data: true,
            grl_path: None,
            triggers: Vec::new(),
            min_vertices: 2,

            n_eta_bins: 100,
            eta_min: -5.0,
            eta_max: 5.0,
            n_phi_bins: 64,
            phi_min: -std::f64::consts::PI,
            phi_max: std::f64::consts::PI,

            window_eta_size: 7,
            window_phi_size: 7,
            eta_limits: vec![0.7, 1.4, 2.1, 2.8, 4.9],

            n_fcal_et_bins: 600,
            fcal_et_min: 0.0,
            fcal_et_max: 6.0,

            n_window_et_bins: 250,
            window_et_min: 0.0,
            window_et_max: 250.0,

            jet_pt_min: 20.0,
            jet_eta_max: 2.8,
            jet_calibration: Vec::new(),
        }
    }
}

impl AnalysisConfig {
    /// Loads and validates a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: AnalysisConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Fail-fast checks on values the analyses rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_eta_size == 0 || self.window_phi_size == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size must be at least 1x1 bins, got {}x{}",
                self.window_eta_size, self.window_phi_size
            )));
        }
        if self.eta_limits.is_empty() {
            return Err(ConfigError::Invalid("eta_limits must not be empty".to_string()));
        }
        if self.eta_limits.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::Invalid(
                "eta_limits must be strictly ascending".to_string(),
            ));
        }
        if self.n_eta_bins == 0 || self.n_phi_bins == 0 {
            return Err(ConfigError::Invalid(format!(
                "grid must have at least one bin per axis, got {}x{}",
                self.n_eta_bins, self.n_phi_bins
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_the_heavy_ion_setup() {
        let config = AnalysisConfig::default();
        assert_eq!(config.window_eta_size, 7);
        assert_eq!(config.window_phi_size, 7);
        assert_eq!(config.n_eta_bins, 100);
        assert_eq!(config.n_phi_bins, 64);
        assert_eq!(config.eta_limits, vec![0.7, 1.4, 2.1, 2.8, 4.9]);
        assert_eq!(config.min_vertices, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: AnalysisConfig =
            serde_json::from_str(r#"{"window_eta_size": 5, "is_data": false}"#).unwrap();
        assert_eq!(config.window_eta_size, 5);
        assert_eq!(config.window_phi_size, 7);
        assert!(!config.is_data);
    }

    #[test]
    fn test_zero_window_size_fails_validation() {
        let config = AnalysisConfig { window_eta_size: 0, ..AnalysisConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unsorted_eta_limits_fail_validation() {
        let config = AnalysisConfig {
            eta_limits: vec![2.8, 0.7],
            ..AnalysisConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AnalysisConfig { eta_limits: Vec::new(), ..AnalysisConfig::default() };
        assert!(config.validate().is_err());
    }
}
