use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Labeled event counters, one bin per rejection or bookkeeping label.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EventStatistics {
    counters: BTreeMap<String, u64>,
}

impl EventStatistics {
    /// Registers a label so it shows up in the output even when never hit.
    pub fn declare(&mut self, label: &str) {
        self.counters.entry(label.to_string()).or_insert(0);
    }

    pub fn fill(&mut self, label: &str) {
        *self.counters.entry(label.to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, label: &str) -> u64 {
        self.counters.get(label).copied().unwrap_or(0)
    }
}

/// Output collaborator shared by all analyses for one run.
///
/// Collects one record per kept event (the tree), histograms handed over at
/// finalization, and the event statistics. Passed explicitly into each
/// analysis hook; nothing here is process-global.
pub struct EventSink {
    output_dir: PathBuf,
    tree_writer: BufWriter<File>,
    current_record: BTreeMap<String, Value>,
    histograms: BTreeMap<String, Value>,
    statistics: EventStatistics,
    event_counter: u64,
}

impl EventSink {
    /// Creates the output directory and opens the per-event tree file.
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self, SinkError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;
        let tree_writer = BufWriter::new(File::create(output_dir.join("tree.jsonl"))?);
        Ok(EventSink {
            output_dir,
            tree_writer,
            current_record: BTreeMap::new(),
            histograms: BTreeMap::new(),
            statistics: EventStatistics::default(),
            event_counter: 0,
        })
    }

    /// Sets a branch value on the current event's record.
    pub fn fill(&mut self, branch: &str, value: Value) {
        self.current_record.insert(branch.to_string(), value);
    }

    /// Writes the current record as one tree entry and starts the next
    /// event. Only called for kept events; records of rejected events are
    /// discarded by `discard_event`.
    pub fn end_of_event(&mut self) -> Result<(), SinkError> {
        let record = std::mem::take(&mut self.current_record);
        serde_json::to_writer(&mut self.tree_writer, &record)?;
        self.tree_writer.write_all(b"\n")?;
        self.event_counter += 1;
        Ok(())
    }

    /// Drops the current record without writing it.
    pub fn discard_event(&mut self) {
        self.current_record.clear();
        self.event_counter += 1;
    }

    /// Number of events seen so far.
    pub fn event_counter(&self) -> u64 {
        self.event_counter
    }

    pub fn statistics(&self) -> &EventStatistics {
        &self.statistics
    }

    pub fn statistics_mut(&mut self) -> &mut EventStatistics {
        &mut self.statistics
    }

    /// Print cadence for the event loop: every event up to 10, then every
    /// 10, every 100, every 1000 and so on.
    pub fn should_log(&self) -> bool {
        let mut stat_size: u64 = 1;
        if self.event_counter != 0 {
            let power = (self.event_counter as f64).log10().floor();
            stat_size = 10f64.powf(power) as u64;
        }
        self.event_counter % stat_size == 0
    }

    /// Registers a finalized histogram for write-out.
    pub fn write_histogram<T: Serialize>(&mut self, name: &str, histogram: &T) -> Result<(), SinkError> {
        let value = serde_json::to_value(histogram)?;
        self.histograms.insert(name.to_string(), value);
        Ok(())
    }

    /// Flushes the tree and writes histograms and statistics files.
    pub fn finalize(mut self) -> Result<EventStatistics, SinkError> {
        self.tree_writer.flush()?;

        let hist_file = File::create(self.output_dir.join("histograms.json"))?;
        serde_json::to_writer_pretty(hist_file, &self.histograms)?;

        let stats_file = File::create(self.output_dir.join("statistics.json"))?;
        serde_json::to_writer_pretty(stats_file, &self.statistics)?;

        Ok(self.statistics)
    }
}
