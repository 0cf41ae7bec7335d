use hicore::algorithm::fluctuation::FluctuationError;
use hicore::data::event::Event;
use hicore::data::histogram::HistogramError;
use log::info;
use thiserror::Error;

use crate::config::{AnalysisConfig, ConfigError};
use crate::data::dataset::{DatasetError, EventData};
use crate::io::sink::{EventSink, EventStatistics, SinkError};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("fluctuation estimator error: {0}")]
    Fluctuation(#[from] FluctuationError),
    #[error("histogram error: {0}")]
    Histogram(#[from] HistogramError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why an analysis vetoed an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    GoodRunsList,
    Trigger,
    Vertex,
    DaqError,
}

impl RejectReason {
    /// Label used in the event statistics output.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::GoodRunsList => "GRL Reject",
            RejectReason::Trigger => "Trigger Reject",
            RejectReason::Vertex => "Vertex Reject",
            RejectReason::DaqError => "DAQ Reject",
        }
    }
}

/// Outcome of one analysis on one event.
///
/// `Skip` marks the event as not to be recorded; the remaining analyses
/// still see it, so their histograms stay comparable with and without the
/// selection. An `Err` from `process_event` aborts the run instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Skip(RejectReason),
}

/// One analysis module driven through the event loop.
///
/// The lifecycle is: `setup` (configuration), `hist_initialize` (output
/// declaration), `initialize` (tools), then `process_event` per event, then
/// `finalize` and `hist_finalize`. The sink is handed in explicitly at
/// every hook that produces output.
pub trait Analysis {
    fn name(&self) -> &str;

    fn setup(&mut self, _config: &AnalysisConfig) -> Result<(), AnalysisError> {
        Ok(())
    }

    fn hist_initialize(&mut self, _sink: &mut EventSink) -> Result<(), AnalysisError> {
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), AnalysisError> {
        Ok(())
    }

    fn process_event(&mut self, event: &Event, sink: &mut EventSink)
        -> Result<Verdict, AnalysisError>;

    fn finalize(&mut self, _sink: &mut EventSink) -> Result<(), AnalysisError> {
        Ok(())
    }

    fn hist_finalize(&mut self, _sink: &mut EventSink) -> Result<(), AnalysisError> {
        Ok(())
    }
}

/// Sequential event-loop driver.
///
/// Owns the analyses and the sink; analyses are composed explicitly at
/// construction and executed in registration order for every event.
pub struct AnalysisManager {
    config: AnalysisConfig,
    analyses: Vec<Box<dyn Analysis>>,
    sink: EventSink,
}

impl AnalysisManager {
    pub fn new(config: AnalysisConfig, sink: EventSink) -> Self {
        AnalysisManager { config, analyses: Vec::new(), sink }
    }

    /// Adds an analysis to the end of the execution order.
    pub fn add_analysis(&mut self, analysis: Box<dyn Analysis>) {
        self.analyses.push(analysis);
    }

    /// Runs the full lifecycle over `data`, consuming the manager.
    ///
    /// Returns the final event statistics after the sink has been written
    /// out.
    pub fn run(
        mut self,
        data: &dyn EventData,
        max_events: Option<u64>,
    ) -> Result<EventStatistics, AnalysisError> {
        self.config.validate()?;

        for analysis in &mut self.analyses {
            info!("{} Setup", analysis.name());
            analysis.setup(&self.config)?;
            info!("{} HistInitialize", analysis.name());
            analysis.hist_initialize(&mut self.sink)?;
            info!("{} Initializing", analysis.name());
            analysis.initialize()?;
        }

        self.event_loop(data, max_events)?;

        for analysis in &mut self.analyses {
            info!("{} Finalizing", analysis.name());
            analysis.finalize(&mut self.sink)?;
            analysis.hist_finalize(&mut self.sink)?;
        }

        let statistics = self.sink.finalize()?;
        Ok(statistics)
    }

    fn event_loop(&mut self, data: &dyn EventData, max_events: Option<u64>) -> Result<(), AnalysisError> {
        let available = data.event_count();
        let n_events = max_events.map_or(available, |m| m.min(available));
        info!("Entering event loop over {} of {} events", n_events, available);

        for index in 0..n_events {
            let event = data.get_event(index)?;

            if self.sink.should_log() {
                info!("SampleEvent : {} {}", self.sink.event_counter(), event);
            }

            let mut keep = true;
            for analysis in &mut self.analyses {
                match analysis.process_event(&event, &mut self.sink)? {
                    Verdict::Keep => {}
                    Verdict::Skip(reason) => {
                        self.sink.statistics_mut().fill(reason.label());
                        keep = false;
                    }
                }
            }

            if keep {
                self.sink.statistics_mut().fill("Accepted");
                self.sink.end_of_event()?;
            } else {
                self.sink.discard_event();
            }
        }

        info!("Event loop done, {} events processed", self.sink.event_counter());
        Ok(())
    }
}
