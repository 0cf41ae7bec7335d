use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use hicore::data::event::Event;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::analysis::manager::{Analysis, AnalysisError, RejectReason, Verdict};
use crate::config::{AnalysisConfig, ConfigError};
use crate::io::sink::EventSink;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct GrlRun {
    run: u32,
    lumi_blocks: Vec<(u32, u32)>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct GrlFile {
    runs: Vec<GrlRun>,
}

/// Good-runs list: per run, the inclusive lumi-block ranges certified for
/// physics.
#[derive(Clone, Debug, Default)]
pub struct GoodRunsList {
    ranges: BTreeMap<u32, Vec<(u32, u32)>>,
}

impl GoodRunsList {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let file: GrlFile = serde_json::from_str(&contents)?;
        let mut ranges: BTreeMap<u32, Vec<(u32, u32)>> = BTreeMap::new();
        for entry in file.runs {
            ranges.entry(entry.run).or_default().extend(entry.lumi_blocks);
        }
        Ok(GoodRunsList { ranges })
    }

    /// True when the (run, lumi block) pair is certified.
    pub fn passes(&self, run: u32, lumi_block: u32) -> bool {
        self.ranges
            .get(&run)
            .map(|blocks| blocks.iter().any(|&(lo, hi)| lumi_block >= lo && lumi_block <= hi))
            .unwrap_or(false)
    }

    pub fn n_runs(&self) -> usize {
        self.ranges.len()
    }
}

/// Event selection common to the whole analysis chain.
///
/// Applies, in order, the good-runs-list, trigger, vertex and DAQ-error
/// requirements, and writes the event bookkeeping branches. The GRL,
/// trigger and DAQ gates only apply to recorded data.
pub struct EventSelection {
    is_data: bool,
    triggers: Vec<String>,
    min_vertices: usize,
    grl_path: Option<PathBuf>,
    grl: Option<GoodRunsList>,
}

impl EventSelection {
    pub fn new() -> Self {
        EventSelection {
            is_data: true,
            triggers: Vec::new(),
            min_vertices: 2,
            grl_path: None,
            grl: None,
        }
    }
}

impl Default for EventSelection {
    fn default() -> Self {
        EventSelection::new()
    }
}

impl Analysis for EventSelection {
    fn name(&self) -> &str {
        "EventSelection"
    }

    fn setup(&mut self, config: &AnalysisConfig) -> Result<(), AnalysisError> {
        self.is_data = config.is_data;
        self.triggers = config.triggers.clone();
        self.min_vertices = config.min_vertices;
        self.grl_path = config.grl_path.clone();
        for trigger in &self.triggers {
            info!("requiring trigger: {}", trigger);
        }
        Ok(())
    }

    fn hist_initialize(&mut self, sink: &mut EventSink) -> Result<(), AnalysisError> {
        let statistics = sink.statistics_mut();
        statistics.declare(RejectReason::GoodRunsList.label());
        statistics.declare(RejectReason::Trigger.label());
        statistics.declare(RejectReason::Vertex.label());
        statistics.declare(RejectReason::DaqError.label());
        statistics.declare("Accepted");
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), AnalysisError> {
        if self.is_data {
            if let Some(path) = &self.grl_path {
                let grl = GoodRunsList::from_file(path)?;
                info!("good-runs list covers {} runs", grl.n_runs());
                self.grl = Some(grl);
            }
        }
        Ok(())
    }

    fn process_event(
        &mut self,
        event: &Event,
        sink: &mut EventSink,
    ) -> Result<Verdict, AnalysisError> {
        let info = &event.info;
        let is_mc = info.sample_type.is_simulation();

        sink.fill("eventNumber", json!(info.event_number));
        sink.fill("LBN", json!(info.lumi_block));
        sink.fill("runNumber", json!(info.run_number));
        sink.fill("haveDaqError", json!(info.has_daq_error()));
        sink.fill("vertices", serde_json::to_value(&event.vertices)?);

        // GRL, data only
        if !is_mc {
            if let Some(grl) = &self.grl {
                if !grl.passes(info.run_number, info.lumi_block) {
                    debug!(
                        "run {} LBN {} not in good-runs list",
                        info.run_number, info.lumi_block
                    );
                    return Ok(Verdict::Skip(RejectReason::GoodRunsList));
                }
            }
        }

        // trigger decision, data only
        if !is_mc && !self.triggers.is_empty() {
            let mut n_passed = 0;
            for name in &self.triggers {
                let bit = event.triggers.iter().find(|t| &t.name == name);
                let passed = bit.map(|t| t.passed).unwrap_or(false);
                let prescale = bit.map(|t| t.prescale).unwrap_or(1.0);
                sink.fill(&format!("passed_{}", name), json!(passed));
                sink.fill(&format!("prescale_{}", name), json!(prescale));
                if passed {
                    n_passed += 1;
                }
            }
            if n_passed == 0 {
                return Ok(Verdict::Skip(RejectReason::Trigger));
            }
        }

        // vertex requirement, data and simulation alike
        if event.vertices.len() < self.min_vertices {
            return Ok(Verdict::Skip(RejectReason::Vertex));
        }

        // DAQ errors, data only
        if !is_mc && info.has_daq_error() {
            return Ok(Verdict::Skip(RejectReason::DaqError));
        }

        Ok(Verdict::Keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hicore::data::event::{EventInfo, SampleType, TriggerBit, Vertex};
    use std::path::PathBuf;

    fn temp_dir(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("hirun_selection_{}_{}", std::process::id(), name));
        path
    }

    fn test_event() -> Event {
        Event {
            info: EventInfo {
                run_number: 312984,
                event_number: 5,
                lumi_block: 150,
                sample_type: SampleType::Data,
                ..EventInfo::default()
            },
            triggers: vec![TriggerBit::new("HLT_noalg_mb_L1TE50".to_string(), true, 1.0)],
            vertices: vec![
                Vertex { z: 1.0, n_tracks: 20 },
                Vertex { z: -14.0, n_tracks: 5 },
            ],
            ..Event::default()
        }
    }

    fn configured_selection(config: &AnalysisConfig) -> EventSelection {
        let mut selection = EventSelection::new();
        selection.setup(config).unwrap();
        selection.initialize().unwrap();
        selection
    }

    #[test]
    fn test_grl_ranges() {
        let dir = temp_dir("grl");
        std::fs::create_dir_all(&dir).unwrap();
        let grl_path = dir.join("grl.json");
        std::fs::write(
            &grl_path,
            r#"{"runs": [{"run": 312984, "lumi_blocks": [[100, 200], [300, 310]]}]}"#,
        )
        .unwrap();

        let grl = GoodRunsList::from_file(&grl_path).unwrap();
        assert!(grl.passes(312984, 100));
        assert!(grl.passes(312984, 200));
        assert!(grl.passes(312984, 305));
        assert!(!grl.passes(312984, 250));
        assert!(!grl.passes(312985, 150));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_good_event_is_kept() {
        let config = AnalysisConfig {
            triggers: vec!["HLT_noalg_mb_L1TE50".to_string()],
            ..AnalysisConfig::default()
        };
        let mut selection = configured_selection(&config);

        let dir = temp_dir("keep");
        let mut sink = EventSink::new(&dir).unwrap();
        let verdict = selection.process_event(&test_event(), &mut sink).unwrap();
        assert_eq!(verdict, Verdict::Keep);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_trigger_rejection() {
        let config = AnalysisConfig {
            triggers: vec!["HLT_mb_sptrk_ion_L1ZDC_A_C_VTE50".to_string()],
            ..AnalysisConfig::default()
        };
        let mut selection = configured_selection(&config);

        let dir = temp_dir("trigger");
        let mut sink = EventSink::new(&dir).unwrap();
        let verdict = selection.process_event(&test_event(), &mut sink).unwrap();
        assert_eq!(verdict, Verdict::Skip(RejectReason::Trigger));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_vertex_rejection() {
        let mut selection = configured_selection(&AnalysisConfig::default());

        let mut event = test_event();
        event.vertices.truncate(1);

        let dir = temp_dir("vertex");
        let mut sink = EventSink::new(&dir).unwrap();
        let verdict = selection.process_event(&event, &mut sink).unwrap();
        assert_eq!(verdict, Verdict::Skip(RejectReason::Vertex));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_daq_rejection_is_data_only() {
        let mut selection = configured_selection(&AnalysisConfig::default());

        let mut event = test_event();
        event.info.lar_error = true;

        let dir = temp_dir("daq");
        let mut sink = EventSink::new(&dir).unwrap();
        let verdict = selection.process_event(&event, &mut sink).unwrap();
        assert_eq!(verdict, Verdict::Skip(RejectReason::DaqError));

        // the same error state on simulation passes
        event.info.sample_type = SampleType::MonteCarlo;
        let verdict = selection.process_event(&event, &mut sink).unwrap();
        assert_eq!(verdict, Verdict::Keep);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_simulation_skips_grl_and_trigger() {
        let dir = temp_dir("mc");
        std::fs::create_dir_all(&dir).unwrap();
        let grl_path = dir.join("grl.json");
        std::fs::write(&grl_path, r#"{"runs": []}"#).unwrap();

        let config = AnalysisConfig {
            triggers: vec!["HLT_nonexistent".to_string()],
            grl_path: Some(grl_path),
            ..AnalysisConfig::default()
        };
        let mut selection = configured_selection(&config);

        let mut event = test_event();
        event.info.sample_type = SampleType::MonteCarlo;

        let mut sink = EventSink::new(dir.join("out")).unwrap();
        let verdict = selection.process_event(&event, &mut sink).unwrap();
        assert_eq!(verdict, Verdict::Keep);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
