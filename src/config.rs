//! Simulation configuration, loaded from a JSON file.
//!
//! Every setting which depends on external data (connectivity matrix, coordinates, per-neuron driving) refers to a
//! comma-delimited text file. Relative paths are resolved against the directory of the configuration file.
//!
//! # Examples
//!
//! ```rust
//! use ifnet::config::SimulationConfig;
//!
//! let config: SimulationConfig = serde_json::from_str(r#"{
//!     "neuron_number": 10,
//!     "seed": 1,
//!     "dt": 0.125,
//!     "max_time": 10.0,
//!     "types": { "mode": "leading", "probability": 0.8 },
//!     "connectivity": { "mode": "small_world", "density": 2, "rewiring_probability": 0.1 },
//!     "strength": { "mode": "by_type", "ee": 5e-3, "ei": 5e-3, "ie": 5e-3, "ii": 5e-3 },
//!     "delay": { "mode": "homogeneous", "delay": 0.5 },
//!     "driving": { "mode": "homogeneous", "rate": 1.5, "strength": 5e-3 }
//! }"#).unwrap();
//!
//! let mut network = config.build().unwrap();
//! assert_eq!(network.num_neurons(), 10);
//! network.advance(0.0, config.dt).unwrap();
//! ```
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use log;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::connection::{DenseConnectivity, TypePairs};
use crate::drive::{DriveSetting, PoissonDrive};
use crate::error::SimError;
use crate::io::{read_bool_matrix, read_matrix, read_vector};
use crate::model::{Model, NeuronModel};
use crate::network::NetworkEngine;
use crate::neuron::NeuronType;
use crate::utils::to_points;

/// Random stream used for the neuron types and the topology, distinct from the driving streams.
const TOPOLOGY_STREAM: u64 = u64::MAX;

/// The network built from a configuration file.
pub type Network = NetworkEngine<Model, DenseConnectivity, PoissonDrive>;

/// How to assign the neuron types.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TypeSetting {
    /// The first `floor(probability * n)` neurons are excitatory, the others inhibitory.
    Leading { probability: f64 },
    /// Each neuron is excitatory with the given probability.
    Random { probability: f64 },
    /// One value per neuron, non-zero for excitatory neurons.
    Explicit { path: PathBuf },
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConnectivitySetting {
    None,
    /// Adjacency matrix, row by source neuron.
    Matrix { path: PathBuf },
    SmallWorld {
        density: usize,
        rewiring_probability: f64,
    },
    /// Connection probabilities by (source type, target type).
    RandomByType(TypePairs),
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StrengthSetting {
    Matrix { path: PathBuf },
    ByType(TypePairs),
    /// Strengths by type, scaled by `0.02 / d^2` where `d` is the distance between the neurons.
    ByTypeInverseSquare {
        ee: f64,
        ei: f64,
        ie: f64,
        ii: f64,
        coordinates: PathBuf,
    },
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DelaySetting {
    Homogeneous { delay: f64 },
    /// Distance between the neurons divided by the transmission speed.
    Distance { coordinates: PathBuf, speed: f64 },
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DrivingSetting {
    Homogeneous {
        rate: f64,
        strength: f64,
        #[serde(default)]
        inhibitory_rate: f64,
        #[serde(default)]
        inhibitory_strength: f64,
    },
    /// One row per neuron: `rate,strength` or `excitatory rate,excitatory strength,inhibitory rate,inhibitory strength`.
    PerNeuron { path: PathBuf },
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub neuron_number: usize,
    #[serde(default)]
    pub seed: u64,
    /// Outer time step.
    pub dt: f64,
    pub max_time: f64,
    #[serde(default)]
    pub model: Model,
    pub types: TypeSetting,
    pub connectivity: ConnectivitySetting,
    pub strength: StrengthSetting,
    pub delay: DelaySetting,
    pub driving: DrivingSetting,
    /// Maximum number of resolving passes per step, defaults to the number of neurons plus one.
    #[serde(default)]
    pub max_cascade_iterations: Option<usize>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl SimulationConfig {
    /// Load a configuration from a JSON file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let mut config: SimulationConfig = serde_json::from_reader(reader)?;
        config.base_dir = path.as_ref().parent().map(Path::to_path_buf);
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration to a JSON file.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), SimError> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Check the parameters which do not depend on external files.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.neuron_number == 0 {
            return Err(SimError::InvalidParameters(
                "The network must have at least one neuron".to_string(),
            ));
        }
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(SimError::InvalidParameters(
                "Time step must be positive".to_string(),
            ));
        }
        if !(self.max_time >= 0.0 && self.max_time.is_finite()) {
            return Err(SimError::InvalidParameters(
                "Maximum time must be non-negative".to_string(),
            ));
        }
        self.model.validate()?;
        if self.dt > self.model.refractory_period() {
            return Err(SimError::InvalidParameters(format!(
                "Time step {} exceeds the refractory period {}",
                self.dt,
                self.model.refractory_period()
            )));
        }
        match self.types {
            TypeSetting::Leading { probability } | TypeSetting::Random { probability }
                if !(0.0..=1.0).contains(&probability) =>
            {
                return Err(SimError::InvalidParameters(
                    "Type probability must be in [0, 1]".to_string(),
                ));
            }
            _ => {}
        }
        if let DrivingSetting::Homogeneous {
            rate,
            strength,
            inhibitory_rate,
            inhibitory_strength,
        } = self.driving
        {
            DriveSetting {
                excitatory_rate: rate,
                excitatory_strength: strength,
                inhibitory_rate,
                inhibitory_strength,
            }
            .validate()?;
        }
        Ok(())
    }

    /// Returns the number of outer steps needed to reach the maximum time.
    pub fn num_steps(&self) -> usize {
        (self.max_time / self.dt).ceil() as usize
    }

    /// Build the network described by the configuration.
    pub fn build(&self) -> Result<Network, SimError> {
        self.validate()?;

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(TOPOLOGY_STREAM);

        let types = self.neuron_types(&mut rng)?;
        let mut connectivity = self.topology(&types, &mut rng)?;
        self.apply_strengths(&mut connectivity, &types)?;
        self.apply_delays(&mut connectivity)?;
        let drive = self.drive()?;

        let network = NetworkEngine::build(self.model.clone(), types, connectivity, drive)?;
        Ok(match self.max_cascade_iterations {
            Some(max_cascade_iterations) => network.with_max_cascade_iterations(max_cascade_iterations),
            None => network,
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn neuron_types<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<NeuronType>, SimError> {
        let n = self.neuron_number;
        let types: Vec<NeuronType> = match &self.types {
            TypeSetting::Leading { probability } => {
                let num_excitatory = (n as f64 * probability).floor() as usize;
                (0..n).map(|i| NeuronType::from(i < num_excitatory)).collect()
            }
            TypeSetting::Random { probability } => (0..n)
                .map(|_| NeuronType::from(rng.gen::<f64>() < *probability))
                .collect(),
            TypeSetting::Explicit { path } => {
                let values: Vec<f64> = read_vector(self.resolve(path))?;
                if values.len() != n {
                    return Err(SimError::InvalidParameters(format!(
                        "Expected {} neuron types, got {}",
                        n,
                        values.len()
                    )));
                }
                values.into_iter().map(|x| NeuronType::from(x != 0.0)).collect()
            }
        };

        let num_excitatory = types.iter().filter(|t| t.is_excitatory()).count();
        log::info!(
            "{} excitatory and {} inhibitory neurons in the network.",
            num_excitatory,
            n - num_excitatory
        );
        Ok(types)
    }

    fn topology<R: Rng + ?Sized>(&self, types: &[NeuronType], rng: &mut R) -> Result<DenseConnectivity, SimError> {
        let n = self.neuron_number;
        match &self.connectivity {
            ConnectivitySetting::None => Ok(DenseConnectivity::new(n)),
            ConnectivitySetting::Matrix { path } => {
                let matrix = read_bool_matrix(self.resolve(path))?;
                if matrix.len() != n {
                    return Err(SimError::InvalidParameters(format!(
                        "Wrong size of connectivity matrix, expected {}x{}",
                        n, n
                    )));
                }
                DenseConnectivity::from_matrix(&matrix)
            }
            ConnectivitySetting::SmallWorld {
                density,
                rewiring_probability,
            } => DenseConnectivity::small_world(n, *density, *rewiring_probability, rng),
            ConnectivitySetting::RandomByType(probabilities) => {
                DenseConnectivity::random_by_type(types, probabilities, rng)
            }
        }
    }

    fn apply_strengths(&self, connectivity: &mut DenseConnectivity, types: &[NeuronType]) -> Result<(), SimError> {
        match &self.strength {
            StrengthSetting::Matrix { path } => {
                let matrix: Vec<Vec<f64>> = read_matrix(self.resolve(path))?;
                connectivity.set_strength_matrix(&matrix)
            }
            StrengthSetting::ByType(strengths) => connectivity.set_type_strengths(types, strengths),
            StrengthSetting::ByTypeInverseSquare {
                ee,
                ei,
                ie,
                ii,
                coordinates,
            } => {
                let strengths = TypePairs {
                    ee: *ee,
                    ei: *ei,
                    ie: *ie,
                    ii: *ii,
                };
                connectivity.set_type_strengths(types, &strengths)?;
                connectivity.scale_strengths_inverse_square(&self.coordinates(coordinates)?)
            }
        }
    }

    fn apply_delays(&self, connectivity: &mut DenseConnectivity) -> Result<(), SimError> {
        match &self.delay {
            DelaySetting::Homogeneous { delay } => connectivity.set_homogeneous_delay(*delay),
            DelaySetting::Distance { coordinates, speed } => {
                connectivity.set_distance_delays(&self.coordinates(coordinates)?, *speed)
            }
        }
    }

    fn coordinates(&self, path: &Path) -> Result<Vec<[f64; 2]>, SimError> {
        let rows: Vec<Vec<f64>> = read_matrix(self.resolve(path))?;
        to_points(&rows).ok_or_else(|| {
            SimError::InvalidParameters("Coordinates must have exactly 2 columns".to_string())
        })
    }

    fn drive(&self) -> Result<PoissonDrive, SimError> {
        match &self.driving {
            DrivingSetting::Homogeneous {
                rate,
                strength,
                inhibitory_rate,
                inhibitory_strength,
            } => {
                let setting = DriveSetting {
                    excitatory_rate: *rate,
                    excitatory_strength: *strength,
                    inhibitory_rate: *inhibitory_rate,
                    inhibitory_strength: *inhibitory_strength,
                };
                PoissonDrive::homogeneous(self.seed, self.neuron_number, setting)
            }
            DrivingSetting::PerNeuron { path } => {
                let rows: Vec<Vec<f64>> = read_matrix(self.resolve(path))?;
                if rows.len() != self.neuron_number {
                    return Err(SimError::InvalidParameters(format!(
                        "Expected {} driving settings, got {}",
                        self.neuron_number,
                        rows.len()
                    )));
                }
                let settings = rows
                    .iter()
                    .map(|row| DriveSetting::from_row(row))
                    .collect::<Result<Vec<DriveSetting>, SimError>>()?;
                PoissonDrive::new(self.seed, settings)
            }
        }
    }
}
