use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{error, info};

use hicore::sim::generator::{EventGenerator, GeneratorConfig};
use hirun::analysis::fluctuation::FluctuationAnalysis;
use hirun::analysis::jet::JetAnalysis;
use hirun::analysis::manager::AnalysisManager;
use hirun::analysis::selection::EventSelection;
use hirun::config::AnalysisConfig;
use hirun::data::dataset::{EventData, EventDataHandle, EventDatasetWriter};
use hirun::io::sink::EventSink;

#[derive(Parser)]
#[command(name = "hirun", about = "Heavy-ion calorimeter event analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis chain over an event dataset
    Run {
        /// Analysis configuration file (JSON); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Input event dataset (.hiev)
        #[arg(long)]
        input: PathBuf,
        /// Output directory for tree, histograms and statistics
        #[arg(long)]
        output: PathBuf,
        /// Stop after this many events
        #[arg(long)]
        max_events: Option<u64>,
    },
    /// Generate a synthetic event dataset
    Simulate {
        /// Output dataset path (.hiev)
        #[arg(long)]
        output: PathBuf,
        /// Number of events to generate
        #[arg(long, default_value_t = 1000)]
        events: u64,
        /// Random seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Generator configuration file (JSON); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    env_logger::init();
    if let Err(e) = dispatch(Cli::parse()) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Commands::Run { config, input, output, max_events } => {
            run_analyses(config, input, output, max_events)
        }
        Commands::Simulate { output, events, seed, config } => {
            simulate(output, events, seed, config)
        }
    }
}

fn run_analyses(
    config_path: Option<PathBuf>,
    input: PathBuf,
    output: PathBuf,
    max_events: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    let config = match config_path {
        Some(path) => AnalysisConfig::from_file(path)?,
        None => AnalysisConfig::default(),
    };

    let handle = EventDataHandle::open(&input)?;
    info!("opened {} with {} events", handle.data_path, handle.event_count());

    let sink = EventSink::new(&output)?;
    let mut manager = AnalysisManager::new(config, sink);
    manager.add_analysis(Box::new(EventSelection::new()));
    manager.add_analysis(Box::new(JetAnalysis::new()));
    manager.add_analysis(Box::new(FluctuationAnalysis::new()));

    let statistics = manager.run(&handle, max_events)?;
    info!("accepted {} events", statistics.count("Accepted"));
    Ok(())
}

fn simulate(
    output: PathBuf,
    events: u64,
    seed: u64,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let config = match config_path {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => GeneratorConfig::default(),
    };

    let mut generator = EventGenerator::new(config, seed);
    let generated = generator.generate_run(events);
    EventDatasetWriter::write(&output, &generated)?;
    info!("wrote {} events to {}", generated.len(), output.display());
    Ok(())
}
