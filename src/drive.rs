//! Exogenous drives, i.e., the feedforward spikes fed into the network from the outside.
//!
//! A drive is consumed incrementally: at every outer step, the engine asks it for the spikes arriving
//! before the end of the step, and the drive resumes from there at the next call.
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::spike_train::{Polarity, Spike, SpikeQueue};

/// A source of exogenous spikes, one stream per neuron.
pub trait DriveSource: Send {
    /// Insert into `queue` every spike for neuron `neuron_id` arriving before `horizon` and not fed yet.
    fn feed(&mut self, neuron_id: usize, horizon: f64, queue: &mut SpikeQueue) -> Result<(), SimError>;

    /// Rewind the drive to time zero.
    fn reset(&mut self);
}

/// A drive without any spike.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct NoDrive;

impl DriveSource for NoDrive {
    fn feed(&mut self, _neuron_id: usize, _horizon: f64, _queue: &mut SpikeQueue) -> Result<(), SimError> {
        Ok(())
    }

    fn reset(&mut self) {}
}

/// The Poisson inputs of a single neuron.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct DriveSetting {
    pub excitatory_rate: f64,
    pub excitatory_strength: f64,
    #[serde(default)]
    pub inhibitory_rate: f64,
    #[serde(default)]
    pub inhibitory_strength: f64,
}

impl DriveSetting {
    /// Excitatory input only.
    pub fn excitatory(rate: f64, strength: f64) -> Self {
        DriveSetting {
            excitatory_rate: rate,
            excitatory_strength: strength,
            inhibitory_rate: 0.0,
            inhibitory_strength: 0.0,
        }
    }

    /// Parse a row `[rate, strength]` or `[excitatory rate, excitatory strength, inhibitory rate, inhibitory strength]`.
    pub fn from_row(row: &[f64]) -> Result<Self, SimError> {
        match row {
            [rate, strength] => Ok(DriveSetting::excitatory(*rate, *strength)),
            [e_rate, e_strength, i_rate, i_strength] => Ok(DriveSetting {
                excitatory_rate: *e_rate,
                excitatory_strength: *e_strength,
                inhibitory_rate: *i_rate,
                inhibitory_strength: *i_strength,
            }),
            _ => Err(SimError::InvalidParameters(format!(
                "Driving setting must have 2 or 4 columns, got {}",
                row.len()
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), SimError> {
        let rates = [self.excitatory_rate, self.inhibitory_rate];
        if !rates.iter().all(|rate| rate.is_finite() && *rate >= 0.0) {
            return Err(SimError::InvalidParameters(
                "Driving rates must be finite and non-negative".to_string(),
            ));
        }
        if !(self.excitatory_strength.is_finite() && self.inhibitory_strength.is_finite()) {
            return Err(SimError::InvalidParameters(
                "Driving strengths must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Homogeneous Poisson process, generated lazily.
#[derive(Debug, Clone)]
struct PoissonCursor {
    polarity: Polarity,
    strength: f64,
    interval: Option<Exp<f64>>,
    next_time: f64,
    rng: ChaCha8Rng,
}

impl PoissonCursor {
    fn new(seed: u64, stream: u64, polarity: Polarity, rate: f64, strength: f64) -> Result<Self, SimError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(stream);

        let interval = match rate > 0.0 {
            true => Some(Exp::new(rate).map_err(|e| SimError::InvalidParameters(e.to_string()))?),
            false => None,
        };
        let next_time = match &interval {
            Some(exp) => exp.sample(&mut rng),
            None => f64::INFINITY,
        };

        Ok(PoissonCursor {
            polarity,
            strength,
            interval,
            next_time,
            rng,
        })
    }

    fn feed(&mut self, horizon: f64, queue: &mut SpikeQueue) {
        let Some(exp) = self.interval.as_ref() else {
            return;
        };
        while self.next_time < horizon {
            queue.insert(Spike::exogenous(self.next_time, self.polarity, self.strength));
            self.next_time += exp.sample(&mut self.rng);
        }
    }
}

/// Independent excitatory and inhibitory Poisson inputs for every neuron.
///
/// Every process owns its random stream, derived from the seed and the (neuron, polarity) pair, so that the
/// generated spikes do not depend on the order in which neurons are fed.
#[derive(Debug, Clone)]
pub struct PoissonDrive {
    seed: u64,
    settings: Vec<DriveSetting>,
    cursors: Vec<[PoissonCursor; 2]>,
}

impl PoissonDrive {
    pub fn new(seed: u64, settings: Vec<DriveSetting>) -> Result<Self, SimError> {
        for setting in settings.iter() {
            setting.validate()?;
        }
        let cursors = Self::init_cursors(seed, &settings)?;
        Ok(PoissonDrive {
            seed,
            settings,
            cursors,
        })
    }

    /// The same inputs for all neurons.
    pub fn homogeneous(seed: u64, num_neurons: usize, setting: DriveSetting) -> Result<Self, SimError> {
        PoissonDrive::new(seed, vec![setting; num_neurons])
    }

    pub fn settings(&self) -> &[DriveSetting] {
        &self.settings
    }

    fn init_cursors(seed: u64, settings: &[DriveSetting]) -> Result<Vec<[PoissonCursor; 2]>, SimError> {
        settings
            .iter()
            .enumerate()
            .map(|(id, setting)| {
                let stream = 2 * id as u64;
                Ok([
                    PoissonCursor::new(
                        seed,
                        stream,
                        Polarity::Excitatory,
                        setting.excitatory_rate,
                        setting.excitatory_strength,
                    )?,
                    PoissonCursor::new(
                        seed,
                        stream + 1,
                        Polarity::Inhibitory,
                        setting.inhibitory_rate,
                        setting.inhibitory_strength,
                    )?,
                ])
            })
            .collect()
    }
}

impl DriveSource for PoissonDrive {
    fn feed(&mut self, neuron_id: usize, horizon: f64, queue: &mut SpikeQueue) -> Result<(), SimError> {
        let cursors = self.cursors.get_mut(neuron_id).ok_or_else(|| {
            SimError::InvalidParameters(format!("No driving setting for neuron {}", neuron_id))
        })?;
        for cursor in cursors.iter_mut() {
            cursor.feed(horizon, queue);
        }
        Ok(())
    }

    fn reset(&mut self) {
        // The settings were validated at construction.
        if let Ok(cursors) = Self::init_cursors(self.seed, &self.settings) {
            self.cursors = cursors;
        }
    }
}

/// Pre-recorded spikes, e.g., the output of another network.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayDrive {
    spikes: Vec<Vec<Spike>>,
    cursors: Vec<usize>,
}

impl ReplayDrive {
    /// Returns an error if the spikes of some neuron are not sorted by arrival time, or if some arrival time is not finite.
    pub fn new(spikes: Vec<Vec<Spike>>) -> Result<Self, SimError> {
        for (id, train) in spikes.iter().enumerate() {
            if train.iter().any(|s| !s.arrival_time.is_finite()) {
                return Err(SimError::InvalidParameters(format!(
                    "Replayed spikes of neuron {} must have finite arrival times",
                    id
                )));
            }
            if train.windows(2).any(|w| w[0].arrival_time > w[1].arrival_time) {
                return Err(SimError::InvalidParameters(format!(
                    "Replayed spikes of neuron {} must be sorted by arrival time",
                    id
                )));
            }
        }
        let cursors = vec![0; spikes.len()];
        Ok(ReplayDrive { spikes, cursors })
    }
}

impl DriveSource for ReplayDrive {
    fn feed(&mut self, neuron_id: usize, horizon: f64, queue: &mut SpikeQueue) -> Result<(), SimError> {
        let Some(train) = self.spikes.get(neuron_id) else {
            return Ok(());
        };
        let cursor = &mut self.cursors[neuron_id];
        while let Some(spike) = train.get(*cursor) {
            if spike.arrival_time >= horizon {
                break;
            }
            queue.insert(*spike);
            *cursor += 1;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.cursors.iter_mut().for_each(|c| *c = 0);
    }
}
