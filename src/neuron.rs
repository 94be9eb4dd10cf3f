//! This module provides the `NeuronUnit` structure which composes the network engine.
//!
//! A unit owns the committed dynamic state of one neuron, a scratch copy used for speculative
//! integration, the queue of its pending input spikes and its spike train.

use serde::{Deserialize, Serialize};

use crate::model::{DymState, NeuronModel};
use crate::spike_train::{Spike, SpikeQueue};

/// The type of a neuron, which sets the polarity of the spikes it sends.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeuronType {
    Excitatory,
    Inhibitory,
}

impl NeuronType {
    pub fn is_excitatory(&self) -> bool {
        matches!(self, NeuronType::Excitatory)
    }
}

impl From<bool> for NeuronType {
    fn from(excitatory: bool) -> Self {
        match excitatory {
            true => NeuronType::Excitatory,
            false => NeuronType::Inhibitory,
        }
    }
}

/// Restart state of a neuron.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct NeuronSnapshot {
    pub neuron_type: NeuronType,
    pub index: usize,
    pub potential: f64,
    pub excitatory_conductance: f64,
    pub inhibitory_conductance: f64,
    pub remaining_refractory: f64,
}

/// Represents a neuron of the network.
#[derive(Debug, PartialEq, Clone)]
pub struct NeuronUnit {
    index: usize,
    neuron_type: NeuronType,
    // Committed state, at the start of the current outer step.
    state: DymState,
    // Candidate state at the end of the current outer step.
    scratch: DymState,
    queue: SpikeQueue,
    firing_times: Vec<f64>,
    // Cascade bookkeeping for the current outer step.
    pub(crate) fired: bool,
    pub(crate) stale: bool,
}

impl NeuronUnit {
    pub fn new<M: NeuronModel + ?Sized>(index: usize, neuron_type: NeuronType, model: &M) -> Self {
        let state = model.default_state();
        NeuronUnit {
            index,
            neuron_type,
            state,
            scratch: state,
            queue: SpikeQueue::new(),
            firing_times: vec![],
            fired: false,
            stale: false,
        }
    }

    /// Returns the neuron index in the network.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn neuron_type(&self) -> NeuronType {
        self.neuron_type
    }

    /// Returns the committed state.
    pub fn state(&self) -> &DymState {
        &self.state
    }

    /// Returns the speculative state.
    pub fn scratch(&self) -> &DymState {
        &self.scratch
    }

    pub fn queue(&self) -> &SpikeQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut SpikeQueue {
        &mut self.queue
    }

    /// Add an input spike to the pending queue.
    pub fn in_spike(&mut self, spike: Spike) {
        self.queue.insert(spike);
    }

    /// Returns a slice of firing times of the neuron.
    pub fn firing_times(&self) -> &[f64] {
        &self.firing_times
    }

    /// Record a firing at the specified time.
    pub fn fire(&mut self, time: f64) {
        self.firing_times.push(time);
    }

    /// Advance the committed state over `[t, t + dt)`, consuming the queued spikes in this window.
    /// Returns the offset from `t` of the first threshold crossing, if any.
    pub fn integrate<M: NeuronModel + ?Sized>(&mut self, model: &M, t: f64, dt: f64) -> Option<f64> {
        evolve_with_inputs(model, &mut self.state, &self.queue, t, dt)
    }

    /// Same as [`NeuronUnit::integrate`], but the result is written to the scratch state and the committed state is left untouched.
    pub fn speculative_integrate<M: NeuronModel + ?Sized>(
        &mut self,
        model: &M,
        t: f64,
        dt: f64,
    ) -> Option<f64> {
        self.scratch = self.state;
        evolve_with_inputs(model, &mut self.scratch, &self.queue, t, dt)
    }

    /// Recompute the synaptic variables of the scratch state over `[t, t + dt)`, keeping the scratch potential.
    /// Used for neurons which already fired during the step and may still receive input.
    pub fn speculative_update_source<M: NeuronModel + ?Sized>(&mut self, model: &M, t: f64, dt: f64) {
        let mut source = self.state;
        evolve_source_with_inputs(model, &mut source, &self.queue, t, dt);
        for &id in model.source_ids() {
            self.scratch[id] = source[id];
        }
    }

    /// Accept the scratch state as the committed one.
    pub fn commit(&mut self) {
        self.state = self.scratch;
    }

    /// Discard the input spikes consumed before `t_end`.
    pub fn clean_used_inputs(&mut self, t_end: f64) -> Vec<Spike> {
        self.queue.drain_before(t_end)
    }

    pub fn snapshot<M: NeuronModel + ?Sized>(&self, model: &M) -> NeuronSnapshot {
        NeuronSnapshot {
            neuron_type: self.neuron_type,
            index: self.index,
            potential: self.state[model.v_id()],
            excitatory_conductance: self.state[model.ge_id()],
            inhibitory_conductance: self.state[model.gi_id()],
            remaining_refractory: self.state[model.tr_id()],
        }
    }

    /// Restore the dynamic state. The type of the neuron is fixed at construction and is not read from the snapshot.
    pub fn load_snapshot<M: NeuronModel + ?Sized>(&mut self, model: &M, snapshot: &NeuronSnapshot) {
        self.state = model.import_state(
            snapshot.potential,
            snapshot.excitatory_conductance,
            snapshot.inhibitory_conductance,
            snapshot.remaining_refractory,
        );
        self.scratch = self.state;
    }

    /// Reset the neuron into its condition at time zero.
    pub fn reset<M: NeuronModel + ?Sized>(&mut self, model: &M) {
        self.state = model.default_state();
        self.scratch = self.state;
        self.queue.clear();
        self.firing_times.clear();
        self.fired = false;
        self.stale = false;
    }
}

/// Integrate `state` over `[t, t + dt)`, splitting the window at the arrival of each queued spike.
fn evolve_with_inputs<M: NeuronModel + ?Sized>(
    model: &M,
    state: &mut DymState,
    queue: &SpikeQueue,
    t: f64,
    dt: f64,
) -> Option<f64> {
    assert!(queue.is_sorted(), "pending spikes must be sorted by arrival time");
    let t_end = t + dt;
    let mut clock = t;
    let mut first: Option<f64> = None;

    for spike in queue.iter().take_while(|spike| spike.arrival_time < t_end) {
        let arrival = spike.arrival_time.max(t);
        if arrival > clock {
            if let Some(offset) = model.evolve(state, arrival - clock) {
                first.get_or_insert(clock - t + offset);
            }
            clock = arrival;
        }
        state[model.jump_id(spike.polarity)] += spike.magnitude;
    }

    if t_end > clock {
        if let Some(offset) = model.evolve(state, t_end - clock) {
            first.get_or_insert(clock - t + offset);
        }
    }
    first
}

fn evolve_source_with_inputs<M: NeuronModel + ?Sized>(
    model: &M,
    state: &mut DymState,
    queue: &SpikeQueue,
    t: f64,
    dt: f64,
) {
    let t_end = t + dt;
    let mut clock = t;
    for spike in queue.iter().take_while(|spike| spike.arrival_time < t_end) {
        let arrival = spike.arrival_time.max(t);
        if arrival > clock {
            model.evolve_source(state, arrival - clock);
            clock = arrival;
        }
        state[model.jump_id(spike.polarity)] += spike.magnitude;
    }
    if t_end > clock {
        model.evolve_source(state, t_end - clock);
    }
}
