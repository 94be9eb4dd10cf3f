//! Spike related structures: pending synaptic events and recorded firings.
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::neuron::NeuronType;

/// The conductance a spike acts upon.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Excitatory,
    Inhibitory,
}

impl From<NeuronType> for Polarity {
    fn from(neuron_type: NeuronType) -> Self {
        match neuron_type {
            NeuronType::Excitatory => Polarity::Excitatory,
            NeuronType::Inhibitory => Polarity::Inhibitory,
        }
    }
}

/// Where a spike comes from.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpikeOrigin {
    /// Feedforward input from an external drive.
    Exogenous,
    /// Delivery from another neuron of the network.
    Internal,
}

/// A synaptic event pending at a target neuron.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Spike {
    /// The time at which the spike reaches the target neuron.
    pub arrival_time: f64,
    /// The conductance receiving the jump.
    pub polarity: Polarity,
    /// The size of the conductance jump.
    pub magnitude: f64,
    /// Exogenous or network-internal.
    pub origin: SpikeOrigin,
}

impl Spike {
    pub fn exogenous(arrival_time: f64, polarity: Polarity, magnitude: f64) -> Self {
        Spike {
            arrival_time,
            polarity,
            magnitude,
            origin: SpikeOrigin::Exogenous,
        }
    }

    pub fn internal(arrival_time: f64, polarity: Polarity, magnitude: f64) -> Self {
        Spike {
            arrival_time,
            polarity,
            magnitude,
            origin: SpikeOrigin::Internal,
        }
    }
}

/// A firing event produced by the network during one outer step.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct RecordedSpike {
    /// The ID of the neuron that fired.
    pub neuron_id: usize,
    /// The exact firing time.
    pub time: f64,
    /// The type of the neuron that fired.
    pub neuron_type: NeuronType,
}

impl RecordedSpike {
    pub fn new(neuron_id: usize, time: f64, neuron_type: NeuronType) -> Self {
        RecordedSpike {
            neuron_id,
            time,
            neuron_type,
        }
    }
}

/// Pending input spikes of a neuron, always sorted by time of arrival.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct SpikeQueue {
    spikes: VecDeque<Spike>,
}

impl SpikeQueue {
    pub fn new() -> Self {
        SpikeQueue {
            spikes: VecDeque::new(),
        }
    }

    /// Insert a spike while keeping the queue sorted by time of arrival.
    /// Spikes sharing an arrival time keep their insertion order.
    ///
    /// # Panics
    /// If the arrival time is not finite.
    pub fn insert(&mut self, spike: Spike) {
        assert!(
            spike.arrival_time.is_finite(),
            "spike arrival time must be finite, got {}",
            spike.arrival_time
        );
        match self.spikes.back() {
            Some(last) if spike.arrival_time < last.arrival_time => {
                let pos = self
                    .spikes
                    .partition_point(|s| s.arrival_time <= spike.arrival_time);
                self.spikes.insert(pos, spike);
            }
            _ => self.spikes.push_back(spike),
        }
    }

    /// Remove and return all spikes arriving strictly before `t`, in order.
    pub fn drain_before(&mut self, t: f64) -> Vec<Spike> {
        let pos = self.spikes.partition_point(|s| s.arrival_time < t);
        self.spikes.drain(..pos).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Spike> + '_ {
        self.spikes.iter()
    }

    pub fn len(&self) -> usize {
        self.spikes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spikes.is_empty()
    }

    pub fn clear(&mut self) {
        self.spikes.clear();
    }

    /// The latest arrival time in the queue, if any.
    pub fn last_arrival(&self) -> Option<f64> {
        self.spikes.back().map(|s| s.arrival_time)
    }

    pub fn is_sorted(&self) -> bool {
        self.spikes
            .iter()
            .zip(self.spikes.iter().skip(1))
            .all(|(a, b)| a.arrival_time <= b.arrival_time)
    }
}
