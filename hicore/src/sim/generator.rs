use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Exp, Normal, Poisson};

use crate::data::event::{
    CaloCluster, CaloSums, Event, EventInfo, Jet, SampleType, TriggerBit, Vertex, FCAL_SLOT,
};

/// Simulated trigger chain: name, fraction of events that fire it and the
/// combined L1*HLT prescale reported with a positive decision.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TriggerSim {
    pub name: String,
    pub pass_fraction: f64,
    pub prescale: f32,
}

impl TriggerSim {
    pub fn new(name: &str, pass_fraction: f64, prescale: f32) -> Self {
        TriggerSim { name: name.to_string(), pass_fraction, prescale }
    }
}

/// Configuration for synthetic heavy-ion event generation.
///
/// Event activity is drawn per event and drives both the cluster
/// multiplicity and the forward calorimeter sum, so generated samples show
/// the FCal/multiplicity correlation real data has.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub run_number: u32,
    pub first_lumi_block: u32,
    pub events_per_lumi_block: u64,
    pub sample_type: SampleType,
    /// Mean cluster multiplicity of the most active events.
    pub mean_clusters: f64,
    /// Mean cluster transverse energy in GeV.
    pub mean_cluster_et: f64,
    pub eta_min: f64,
    pub eta_max: f64,
    /// Number of calorimeter sum slices carried per event.
    pub n_calo_slices: usize,
    /// FCal sum of the most active events, in MeV.
    pub fcal_scale_mev: f64,
    pub triggers: Vec<TriggerSim>,
    pub mean_vertices: f64,
    /// Fraction of events carrying a DAQ error flag.
    pub daq_error_fraction: f64,
    pub mean_jets: f64,
    /// Mean jet transverse momentum in GeV.
    pub mean_jet_pt: f64,
    pub jet_eta_max: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            run_number: 312984,
            first_lumi_block: 120,
            events_per_lumi_block: 500,
            sample_type: SampleType::Data,
            mean_clusters: 600.0,
            mean_cluster_et: 2.0,
            eta_min: -5.0,
            eta_max: 5.0,
            n_calo_slices: 7,
            fcal_scale_mev: 4.5e6,
            triggers: vec![
                TriggerSim::new("HLT_noalg_mb_L1TE50", 0.85, 1.0),
                TriggerSim::new("HLT_mb_sptrk_ion_L1ZDC_A_C_VTE50", 0.6, 1.0),
            ],
            mean_vertices: 2.4,
            daq_error_fraction: 0.01,
            mean_jets: 1.5,
            mean_jet_pt: 35.0,
            jet_eta_max: 2.8,
        }
    }
}

/// Seeded generator of synthetic events.
///
/// Deterministic for a fixed seed and configuration, which keeps tests and
/// demo datasets reproducible.
pub struct EventGenerator {
    config: GeneratorConfig,
    rng: StdRng,
}

impl EventGenerator {
    pub fn new(config: GeneratorConfig, seed: u64) -> Self {
        EventGenerator { config, rng: StdRng::seed_from_u64(seed) }
    }

    /// Generates one event with the given sequential event number.
    pub fn generate(&mut self, event_index: u64) -> Event {
        let activity: f64 = self.rng.gen::<f64>().powi(2);

        let info = self.generate_info(event_index);
        let calo_sums = self.generate_calo_sums(activity);
        let clusters = self.generate_clusters(activity);
        let triggers = self.generate_triggers();
        let vertices = self.generate_vertices();
        let (em_jets, truth_jets) = self.generate_jets();

        Event { info, calo_sums, clusters, triggers, vertices, em_jets, truth_jets }
    }

    /// Generates a run of `n` consecutive events.
    pub fn generate_run(&mut self, n: u64) -> Vec<Event> {
        (0..n).map(|i| self.generate(i)).collect()
    }

    fn generate_info(&mut self, event_index: u64) -> EventInfo {
        let mut info = EventInfo {
            run_number: self.config.run_number,
            event_number: 1_000_000 + event_index,
            lumi_block: self.config.first_lumi_block
                + (event_index / self.config.events_per_lumi_block.max(1)) as u32,
            sample_type: self.config.sample_type,
            ..EventInfo::default()
        };
        if self.rng.gen_bool(self.config.daq_error_fraction.clamp(0.0, 1.0)) {
            match self.rng.gen_range(0..4) {
                0 => info.lar_error = true,
                1 => info.tile_error = true,
                2 => info.sct_error = true,
                _ => info.core_flags |= 1 << 18,
            }
        }
        info
    }

    fn generate_calo_sums(&mut self, activity: f64) -> CaloSums {
        let noise = Normal::new(1.0, 0.05).unwrap();
        let mut et_sums = vec![0.0; self.config.n_calo_slices.max(FCAL_SLOT + 1)];
        for (slice, et) in et_sums.iter_mut().enumerate() {
            let slice_scale = 1.0 / (slice + 1) as f64;
            *et = activity
                * self.config.fcal_scale_mev
                * slice_scale
                * noise.sample(&mut self.rng).abs();
        }
        CaloSums::new(et_sums)
    }

    fn generate_clusters(&mut self, activity: f64) -> Vec<CaloCluster> {
        let n = self.sample_poisson(self.config.mean_clusters * activity);
        let eta_dist = Uniform::new(self.config.eta_min, self.config.eta_max);
        let phi_dist = Uniform::new(-std::f64::consts::PI, std::f64::consts::PI);
        let et_dist = Exp::new(1.0 / self.config.mean_cluster_et).unwrap();

        (0..n)
            .map(|_| {
                let eta = eta_dist.sample(&mut self.rng);
                let phi = phi_dist.sample(&mut self.rng);
                let et = et_dist.sample(&mut self.rng);
                // stored as energy, the analysis recovers Et via cosh(eta)
                CaloCluster::new(eta, phi, et * eta.cosh())
            })
            .collect()
    }

    fn generate_triggers(&mut self) -> Vec<TriggerBit> {
        let menu = self.config.triggers.clone();
        menu.iter()
            .map(|t| {
                let passed = self.rng.gen_bool(t.pass_fraction.clamp(0.0, 1.0));
                TriggerBit::new(t.name.clone(), passed, t.prescale)
            })
            .collect()
    }

    fn generate_vertices(&mut self) -> Vec<Vertex> {
        let n = self.sample_poisson(self.config.mean_vertices);
        let z_dist = Normal::new(0.0, 50.0).unwrap();
        (0..n)
            .map(|_| Vertex {
                z: z_dist.sample(&mut self.rng),
                n_tracks: 2 + self.sample_poisson(18.0) as u32,
            })
            .collect()
    }

    fn generate_jets(&mut self) -> (Vec<Jet>, Vec<Jet>) {
        let n = self.sample_poisson(self.config.mean_jets);
        let pt_dist = Exp::new(1.0 / self.config.mean_jet_pt).unwrap();
        let eta_dist = Uniform::new(-self.config.jet_eta_max, self.config.jet_eta_max);
        let phi_dist = Uniform::new(-std::f64::consts::PI, std::f64::consts::PI);
        let response = Normal::new(0.92, 0.04).unwrap();

        let mut em_jets = Vec::with_capacity(n as usize);
        let mut truth_jets = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let pt = 20.0 + pt_dist.sample(&mut self.rng);
            let eta = eta_dist.sample(&mut self.rng);
            let phi = phi_dist.sample(&mut self.rng);
            let e = pt * eta.cosh();
            // EM-scale jets sit below the particle-level reference
            let r = response.sample(&mut self.rng).abs();
            em_jets.push(Jet::new(pt * r, eta, phi, e * r));
            if self.config.sample_type.is_simulation() {
                truth_jets.push(Jet::new(pt, eta, phi, e));
            }
        }
        (em_jets, truth_jets)
    }

    fn sample_poisson(&mut self, mean: f64) -> u64 {
        if mean <= 0.0 {
            return 0;
        }
        let sample: f64 = Poisson::new(mean).unwrap().sample(&mut self.rng);
        sample as u64
    }
}
