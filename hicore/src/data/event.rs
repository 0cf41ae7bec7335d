use std::fmt;
use std::fmt::{Display, Formatter};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Slot of the forward calorimeter sum inside `CaloSums`.
pub const FCAL_SLOT: usize = 5;

/// Distinguishes recorded collision data from simulated events.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, Encode, Decode)]
pub enum SampleType {
    Data,
    MonteCarlo,
}

impl SampleType {
    /// Returns the `SampleType` corresponding to the given integer value.
    pub fn new(sample_type: i32) -> SampleType {
        match sample_type {
            1 => SampleType::MonteCarlo,
            _ => SampleType::Data,
        }
    }

    pub fn sample_type_numeric(&self) -> i32 {
        match self {
            SampleType::Data => 0,
            SampleType::MonteCarlo => 1,
        }
    }

    pub fn is_simulation(&self) -> bool {
        matches!(self, SampleType::MonteCarlo)
    }
}

impl Default for SampleType {
    fn default() -> Self {
        SampleType::Data
    }
}

impl Display for SampleType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SampleType::Data => write!(f, "Data"),
            SampleType::MonteCarlo => write!(f, "MonteCarlo"),
        }
    }
}

/// Bookkeeping block common to every event.
///
/// The error flags carry the DAQ state of the calorimeter and tracker
/// partitions; bit 18 of `core_flags` marks an incomplete event.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Encode, Decode)]
pub struct EventInfo {
    pub run_number: u32,
    pub event_number: u64,
    pub lumi_block: u32,
    pub sample_type: SampleType,
    pub lar_error: bool,
    pub tile_error: bool,
    pub sct_error: bool,
    pub core_flags: u32,
}

impl EventInfo {
    /// True if any DAQ error condition vetoes this event.
    pub fn has_daq_error(&self) -> bool {
        self.lar_error || self.tile_error || self.sct_error || (self.core_flags >> 18) & 1 == 1
    }
}

/// A reconstructed calorimeter energy deposit.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Encode, Decode)]
pub struct CaloCluster {
    pub eta: f64,
    pub phi: f64,
    /// Cluster energy in GeV.
    pub e: f64,
}

impl CaloCluster {
    pub fn new(eta: f64, phi: f64, e: f64) -> Self {
        CaloCluster { eta, phi, e }
    }

    /// Transverse energy in GeV.
    pub fn et(&self) -> f64 {
        self.e / self.eta.cosh()
    }
}

/// Per-slice total transverse energy sums, in MeV.
///
/// Slot `FCAL_SLOT` holds the forward calorimeter sum used as the
/// event-activity proxy.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Encode, Decode)]
pub struct CaloSums {
    pub et_sums: Vec<f64>,
}

impl CaloSums {
    pub fn new(et_sums: Vec<f64>) -> Self {
        CaloSums { et_sums }
    }

    /// Forward calorimeter total transverse energy in TeV, if present.
    pub fn fcal_et_tev(&self) -> Option<f64> {
        self.et_sums.get(FCAL_SLOT).map(|et| et * 0.001 * 0.001)
    }
}

/// Upstream trigger decision for one chain.
///
/// The decision is opaque here: whether a chain fired and at what combined
/// prescale was decided by the trigger system that produced the event.
#[derive(Clone, Debug, Serialize, Deserialize, Encode, Decode)]
pub struct TriggerBit {
    pub name: String,
    pub passed: bool,
    pub prescale: f32,
}

impl TriggerBit {
    pub fn new(name: String, passed: bool, prescale: f32) -> Self {
        TriggerBit { name, passed, prescale }
    }
}

/// A reconstructed primary vertex candidate.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Encode, Decode)]
pub struct Vertex {
    pub z: f64,
    pub n_tracks: u32,
}

/// A jet four-vector at some calibration scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Jet {
    /// Transverse momentum in GeV.
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    /// Jet energy in GeV.
    pub e: f64,
}

impl Jet {
    pub fn new(pt: f64, eta: f64, phi: f64, e: f64) -> Self {
        Jet { pt, eta, phi, e }
    }
}

/// One collision event as read from a dataset.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Encode, Decode)]
pub struct Event {
    pub info: EventInfo,
    pub calo_sums: CaloSums,
    pub clusters: Vec<CaloCluster>,
    pub triggers: Vec<TriggerBit>,
    pub vertices: Vec<Vertex>,
    pub em_jets: Vec<Jet>,
    pub truth_jets: Vec<Jet>,
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event(run: {}, event: {}, clusters: {}, jets: {})",
            self.info.run_number,
            self.info.event_number,
            self.clusters.len(),
            self.em_jets.len()
        )
    }
}
