//! Network engine: advances all neurons over outer steps and resolves the spike cascades inside each step in causal order.
//!
//! Within a step `[t, t + dt)`, every neuron is first integrated speculatively. The earliest predicted
//! firing (ties broken by ascending neuron index) is then accepted, its spikes are delivered to the
//! connected neurons, and the neurons whose input changed before the end of the step are integrated
//! again. The loop stops when no neuron is predicted to fire anymore, and only then are the new
//! states committed.
use log;
use rayon::prelude::*;

use crate::connection::ConnectivityModel;
use crate::drive::DriveSource;
use crate::error::SimError;
use crate::model::NeuronModel;
use crate::neuron::{NeuronSnapshot, NeuronType, NeuronUnit};
use crate::spike_train::{Polarity, RecordedSpike, Spike};
use crate::MIN_NEURONS_PAR;

/// A predicted firing, only valid as long as the neuron's inputs do not change.
#[derive(Debug, PartialEq, Clone, Copy)]
struct SpikeCandidate {
    neuron_id: usize,
    fire_time: f64,
    neuron_type: NeuronType,
}

/// Represents a spiking neural network.
#[derive(Debug, Clone)]
pub struct NetworkEngine<M, C, D> {
    model: M,
    connectivity: C,
    drive: D,
    neurons: Vec<NeuronUnit>,
    spikes: Vec<RecordedSpike>,
    max_cascade_iterations: usize,
    last_cascade_iterations: usize,
    // Connectivity is fixed once the network is built.
    has_connections: bool,
}

impl<M, C, D> NetworkEngine<M, C, D>
where
    M: NeuronModel,
    C: ConnectivityModel,
    D: DriveSource,
{
    /// Create a network with one neuron per entry of `types`.
    /// Returns an error if the model or the connectivity is invalid, or if their sizes disagree.
    pub fn build(model: M, types: Vec<NeuronType>, connectivity: C, drive: D) -> Result<Self, SimError> {
        model.validate()?;
        if connectivity.num_neurons() != types.len() {
            return Err(SimError::InvalidParameters(format!(
                "Connectivity has {} neurons but {} neuron types were given",
                connectivity.num_neurons(),
                types.len()
            )));
        }
        connectivity.validate()?;

        let neurons: Vec<NeuronUnit> = types
            .into_iter()
            .enumerate()
            .map(|(index, neuron_type)| NeuronUnit::new(index, neuron_type, &model))
            .collect();

        let num_excitatory = neurons
            .iter()
            .filter(|n| n.neuron_type().is_excitatory())
            .count();
        log::info!(
            "Network built with {} neurons ({} excitatory) and {} connections",
            neurons.len(),
            num_excitatory,
            connectivity.connections().len()
        );

        let max_cascade_iterations = neurons.len() + 1;
        let has_connections = connectivity.has_connections();
        Ok(NetworkEngine {
            model,
            connectivity,
            drive,
            neurons,
            spikes: vec![],
            max_cascade_iterations,
            last_cascade_iterations: 0,
            has_connections,
        })
    }

    /// Set the maximum number of resolving passes per step.
    pub fn with_max_cascade_iterations(mut self, max_cascade_iterations: usize) -> Self {
        self.max_cascade_iterations = max_cascade_iterations;
        self
    }

    pub fn max_cascade_iterations(&self) -> usize {
        self.max_cascade_iterations
    }

    /// Returns the number of resolving passes of the last step.
    pub fn last_cascade_iterations(&self) -> usize {
        self.last_cascade_iterations
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn connectivity(&self) -> &C {
        &self.connectivity
    }

    pub fn num_neurons(&self) -> usize {
        self.neurons.len()
    }

    pub fn neurons(&self) -> &[NeuronUnit] {
        &self.neurons
    }

    /// Returns the neuron with the specified index, if any.
    pub fn neuron(&self, id: usize) -> Option<&NeuronUnit> {
        self.neurons.get(id)
    }

    /// Advance the network over the outer step `[t, t + dt)`.
    /// Returns the spikes fired during the step, sorted by time then neuron index.
    ///
    /// The step must not exceed the refractory period, so that a neuron fires at most once per step.
    /// If the spike cascade does not settle within the allowed number of passes, a `CascadeOverflow` error
    /// is returned and the network must not be advanced any further.
    pub fn advance(&mut self, t: f64, dt: f64) -> Result<Vec<RecordedSpike>, SimError> {
        if !t.is_finite() {
            return Err(SimError::InvalidParameters(format!(
                "Step start must be finite, got {}",
                t
            )));
        }
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(SimError::InvalidParameters(format!(
                "Time step must be positive, got {}",
                dt
            )));
        }
        if dt > self.model.refractory_period() {
            return Err(SimError::InvalidParameters(format!(
                "Time step {} exceeds the refractory period {}",
                dt,
                self.model.refractory_period()
            )));
        }

        let t_end = t + dt;
        for neuron in self.neurons.iter_mut() {
            self.drive.feed(neuron.index(), t_end, neuron.queue_mut())?;
        }

        let new_spikes = match self.has_connections {
            true => self.resolve_cascade(t, dt)?,
            false => self.integrate_independently(t, dt),
        };

        log::debug!(
            "Step [{}, {}): {} spikes in {} passes",
            t,
            t_end,
            new_spikes.len(),
            self.last_cascade_iterations
        );
        self.spikes.extend_from_slice(&new_spikes);
        Ok(new_spikes)
    }

    /// Every neuron only sees its own input: integrate them in place.
    fn integrate_independently(&mut self, t: f64, dt: f64) -> Vec<RecordedSpike> {
        let model = &self.model;
        let step = |neuron: &mut NeuronUnit| -> Option<RecordedSpike> {
            let offset = neuron.integrate(model, t, dt);
            neuron.clean_used_inputs(t + dt);
            offset.map(|offset| {
                neuron.fire(t + offset);
                RecordedSpike::new(neuron.index(), t + offset, neuron.neuron_type())
            })
        };

        let mut new_spikes: Vec<RecordedSpike> = match self.neurons.len() > MIN_NEURONS_PAR {
            true => self.neurons.par_iter_mut().filter_map(step).collect(),
            false => self.neurons.iter_mut().filter_map(step).collect(),
        };
        new_spikes.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.neuron_id.cmp(&b.neuron_id)));
        self.last_cascade_iterations = 1;
        new_spikes
    }

    fn resolve_cascade(&mut self, t: f64, dt: f64) -> Result<Vec<RecordedSpike>, SimError> {
        let t_end = t + dt;
        for neuron in self.neurons.iter_mut() {
            neuron.fired = false;
            neuron.stale = true;
        }

        let mut candidates: Vec<SpikeCandidate> = vec![];
        let mut new_spikes: Vec<RecordedSpike> = vec![];
        let mut passes = 0;

        loop {
            if passes >= self.max_cascade_iterations {
                self.last_cascade_iterations = passes;
                log::warn!(
                    "Spike cascade at t = {} still unsettled after {} passes ({} spikes so far)",
                    t,
                    passes,
                    new_spikes.len()
                );
                return Err(SimError::CascadeOverflow {
                    time: t,
                    iterations: passes,
                });
            }
            passes += 1;

            candidates.extend(self.evaluate_stale(t, dt));

            let Some(first) = candidates.iter().copied().min_by(|a, b| {
                a.fire_time
                    .total_cmp(&b.fire_time)
                    .then(a.neuron_id.cmp(&b.neuron_id))
            }) else {
                break;
            };

            let source = &mut self.neurons[first.neuron_id];
            source.fired = true;
            source.fire(first.fire_time);
            new_spikes.push(RecordedSpike::new(first.neuron_id, first.fire_time, first.neuron_type));
            log::trace!("Neuron {} fired at t = {}", first.neuron_id, first.fire_time);

            self.deliver(first.neuron_id, first.fire_time, Polarity::from(first.neuron_type), t_end);

            let neurons = &self.neurons;
            candidates.retain(|c| c.neuron_id != first.neuron_id && !neurons[c.neuron_id].stale);
        }

        for neuron in self.neurons.iter_mut() {
            neuron.commit();
            neuron.clean_used_inputs(t_end);
        }
        new_spikes.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.neuron_id.cmp(&b.neuron_id)));
        self.last_cascade_iterations = passes;
        Ok(new_spikes)
    }

    /// Integrate again every neuron whose input changed, and return the new firing candidates.
    fn evaluate_stale(&mut self, t: f64, dt: f64) -> Vec<SpikeCandidate> {
        let model = &self.model;
        let evaluate = |neuron: &mut NeuronUnit| -> Option<SpikeCandidate> {
            if !neuron.stale {
                return None;
            }
            neuron.stale = false;
            if neuron.fired {
                neuron.speculative_update_source(model, t, dt);
                return None;
            }
            neuron
                .speculative_integrate(model, t, dt)
                .map(|offset| SpikeCandidate {
                    neuron_id: neuron.index(),
                    fire_time: t + offset,
                    neuron_type: neuron.neuron_type(),
                })
        };

        let num_stale = self.neurons.iter().filter(|n| n.stale).count();
        match num_stale > MIN_NEURONS_PAR {
            true => self.neurons.par_iter_mut().filter_map(evaluate).collect(),
            false => self.neurons.iter_mut().filter_map(evaluate).collect(),
        }
    }

    /// Send the spike of `source_id` to all its targets; the targets hit before `t_end` must be integrated again.
    fn deliver(&mut self, source_id: usize, fire_time: f64, polarity: Polarity, t_end: f64) {
        for target_id in 0..self.neurons.len() {
            if target_id == source_id || !self.connectivity.is_connected(source_id, target_id) {
                continue;
            }
            let delay = self.connectivity.delay(source_id, target_id);
            assert!(delay >= 0.0, "connection delay must be non-negative");

            let arrival_time = fire_time + delay;
            let strength = self.connectivity.strength(source_id, target_id);
            let target = &mut self.neurons[target_id];
            target.in_spike(Spike::internal(arrival_time, polarity, strength));
            if arrival_time < t_end {
                target.stale = true;
            }
        }
    }

    /// Add spikes from outside the network to the input of a neuron, e.g., the output of another network.
    pub fn inject_spikes<I>(&mut self, neuron_id: usize, spikes: I) -> Result<(), SimError>
    where
        I: IntoIterator<Item = Spike>,
    {
        let neuron = self.neurons.get_mut(neuron_id).ok_or_else(|| {
            SimError::InvalidParameters(format!("Neuron {} does not exist", neuron_id))
        })?;
        for spike in spikes {
            if !spike.arrival_time.is_finite() {
                return Err(SimError::InvalidParameters(format!(
                    "Injected spike arrival time must be finite, got {}",
                    spike.arrival_time
                )));
            }
            neuron.in_spike(spike);
        }
        Ok(())
    }

    /// Returns the spikes fired at or after `t`.
    /// The history is sorted by time as long as the steps are advanced in increasing order.
    pub fn spikes_since(&self, t: f64) -> Vec<RecordedSpike> {
        let pos = self.spikes.partition_point(|s| s.time < t);
        self.spikes[pos..].to_vec()
    }

    /// Returns the total number of spikes fired since time zero.
    pub fn num_spikes(&self) -> usize {
        self.spikes.len()
    }

    /// Returns the spike train of every neuron.
    pub fn spike_trains(&self) -> Vec<&[f64]> {
        self.neurons.iter().map(|n| n.firing_times()).collect()
    }

    /// Returns the membrane potential of every neuron.
    pub fn potentials(&self) -> Vec<f64> {
        let id = self.model.v_id();
        self.neurons.iter().map(|n| n.state()[id]).collect()
    }

    /// Returns the excitatory or inhibitory conductance of every neuron.
    pub fn conductances(&self, polarity: Polarity) -> Vec<f64> {
        let id = match polarity {
            Polarity::Excitatory => self.model.ge_id(),
            Polarity::Inhibitory => self.model.gi_id(),
        };
        self.neurons.iter().map(|n| n.state()[id]).collect()
    }

    /// Returns the membrane current of every neuron.
    pub fn currents(&self) -> Vec<f64> {
        self.neurons
            .iter()
            .map(|n| self.model.current(n.state()))
            .collect()
    }

    pub fn types(&self) -> Vec<NeuronType> {
        self.neurons.iter().map(|n| n.neuron_type()).collect()
    }

    pub fn snapshot(&self) -> Vec<NeuronSnapshot> {
        self.neurons
            .iter()
            .map(|n| n.snapshot(&self.model))
            .collect()
    }

    /// Restore the state of every neuron from a snapshot, one entry per neuron.
    pub fn load_snapshot(&mut self, snapshot: &[NeuronSnapshot]) -> Result<(), SimError> {
        if snapshot.len() != self.neurons.len() {
            return Err(SimError::InvalidParameters(format!(
                "Snapshot has {} neurons, expected {}",
                snapshot.len(),
                self.neurons.len()
            )));
        }
        if let Some(entry) = snapshot.iter().find(|s| s.index >= self.neurons.len()) {
            return Err(SimError::InvalidParameters(format!(
                "Snapshot refers to neuron {} which does not exist",
                entry.index
            )));
        }
        if let Some(entry) = snapshot
            .iter()
            .find(|s| s.neuron_type != self.neurons[s.index].neuron_type())
        {
            return Err(SimError::InvalidParameters(format!(
                "Snapshot gives neuron {} the type {:?}, but the network was built with {:?}",
                entry.index,
                entry.neuron_type,
                self.neurons[entry.index].neuron_type()
            )));
        }
        for entry in snapshot.iter() {
            self.neurons[entry.index].load_snapshot(&self.model, entry);
        }
        log::debug!("Neuron states restored from snapshot");
        Ok(())
    }

    /// Bring the network back to time zero: default states, empty queues and spike trains, rewound drive.
    pub fn reset(&mut self) {
        for neuron in self.neurons.iter_mut() {
            neuron.reset(&self.model);
        }
        self.drive.reset();
        self.spikes.clear();
        self.last_cascade_iterations = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DenseConnectivity;
    use crate::drive::{NoDrive, ReplayDrive};
    use crate::model::lif_g::LifG;
    use approx::assert_relative_eq;

    fn excitatory(n: usize) -> Vec<NeuronType> {
        vec![NeuronType::Excitatory; n]
    }

    fn kick(time: f64) -> Vec<Spike> {
        vec![Spike::exogenous(time, Polarity::Excitatory, 1.0)]
    }

    #[test]
    fn test_build_size_mismatch() {
        let result = NetworkEngine::build(LifG::default(), excitatory(3), DenseConnectivity::new(2), NoDrive);
        assert!(matches!(result, Err(SimError::InvalidParameters(_))));
    }

    #[test]
    fn test_build_invalid_model() {
        let model = LifG {
            tau_e: -1.0,
            ..LifG::default()
        };
        let result = NetworkEngine::build(model, excitatory(2), DenseConnectivity::new(2), NoDrive);
        assert!(result.is_err());
    }

    #[test]
    fn test_advance_invalid_step() {
        let mut network =
            NetworkEngine::build(LifG::default(), excitatory(2), DenseConnectivity::new(2), NoDrive).unwrap();
        assert!(network.advance(0.0, 0.0).is_err());
        assert!(network.advance(0.0, f64::NAN).is_err());
        assert!(network.advance(0.0, 3.0).is_err());
        assert!(network.advance(f64::INFINITY, 0.5).is_err());
        assert_eq!(network.advance(0.0, 0.5), Ok(vec![]));
    }

    #[test]
    fn test_fast_path_sorted() {
        let drive = ReplayDrive::new(vec![kick(0.3), kick(0.1), vec![]]).unwrap();
        let mut network =
            NetworkEngine::build(LifG::default(), excitatory(3), DenseConnectivity::new(3), drive).unwrap();

        let spikes = network.advance(0.0, 1.0).unwrap();
        assert_eq!(spikes.len(), 2);
        assert_eq!(spikes[0].neuron_id, 1);
        assert_eq!(spikes[1].neuron_id, 0);
        assert!(spikes[0].time < spikes[1].time);
        assert_eq!(network.last_cascade_iterations(), 1);
        assert_eq!(network.neuron(0).unwrap().firing_times(), &[spikes[1].time]);
        assert!(network.neurons().iter().all(|n| n.queue().is_empty()));
    }

    #[test]
    fn test_tie_break_by_index() {
        // Two identical neurons fire at the same time; their spikes only arrive after the step.
        let mut connectivity = DenseConnectivity::new(2);
        connectivity.add_connection(0, 1, 0.5, 5.0).unwrap();
        connectivity.add_connection(1, 0, 0.5, 5.0).unwrap();
        let drive = ReplayDrive::new(vec![kick(0.1), kick(0.1)]).unwrap();
        let mut network = NetworkEngine::build(LifG::default(), excitatory(2), connectivity, drive).unwrap();

        let spikes = network.advance(0.0, 1.0).unwrap();
        assert_eq!(spikes.len(), 2);
        assert_eq!(spikes[0].neuron_id, 0);
        assert_eq!(spikes[1].neuron_id, 1);
        assert_eq!(spikes[0].time, spikes[1].time);
        assert_eq!(network.last_cascade_iterations(), 3);
        for neuron in network.neurons() {
            assert_eq!(neuron.queue().last_arrival(), Some(spikes[0].time + 5.0));
        }
    }

    #[test]
    fn test_inhibition_cancels_candidate() {
        // Neuron 0 fires first and its inhibitory spike prevents neuron 1 from firing.
        let mut connectivity = DenseConnectivity::new(2);
        connectivity.add_connection(0, 1, 5.0, 0.0).unwrap();
        let types = vec![NeuronType::Inhibitory, NeuronType::Excitatory];
        let drive = ReplayDrive::new(vec![kick(0.05), kick(0.1)]).unwrap();
        let mut network = NetworkEngine::build(LifG::default(), types, connectivity, drive).unwrap();

        let mut spikes = vec![];
        for k in 0..8 {
            spikes.extend(network.advance(0.25 * k as f64, 0.25).unwrap());
        }
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].neuron_id, 0);
        assert_eq!(spikes[0].neuron_type, NeuronType::Inhibitory);
        assert!(network.potentials()[1] < 1.0);
        assert_relative_eq!(
            network.conductances(Polarity::Inhibitory)[1],
            5.0 * (-(2.0 - spikes[0].time) / 7.0_f64).exp(),
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_fired_neuron_keeps_receiving_input() {
        // Neuron 0 excites neuron 1, which inhibits neuron 0 back within the same step.
        let mut connectivity = DenseConnectivity::new(2);
        connectivity.add_connection(0, 1, 1.0, 0.1).unwrap();
        connectivity.add_connection(1, 0, 0.5, 0.1).unwrap();
        let types = vec![NeuronType::Excitatory, NeuronType::Inhibitory];
        let drive = ReplayDrive::new(vec![kick(0.1), vec![]]).unwrap();
        let model = LifG::default();
        let mut network = NetworkEngine::build(model.clone(), types, connectivity, drive).unwrap();

        let spikes = network.advance(0.0, 1.0).unwrap();
        assert_eq!(spikes.len(), 2);
        assert_eq!(spikes[0].neuron_id, 0);
        assert_eq!(spikes[1].neuron_id, 1);
        let feedback = spikes[1].time + 0.1;
        assert!(feedback < 1.0);
        assert_eq!(network.last_cascade_iterations(), 3);

        let state = network.neuron(0).unwrap().state();
        assert_relative_eq!(state[model.ge_id()], (-0.9_f64 / 2.0).exp(), max_relative = 1e-12);
        assert_relative_eq!(
            state[model.gi_id()],
            0.5 * (-(1.0 - feedback) / 7.0).exp(),
            max_relative = 1e-12
        );
        // Still refractory: the potential is held at rest.
        assert_eq!(state[model.v_id()], model.lif.v_rest);
        assert_relative_eq!(
            state[model.tr_id()],
            model.lif.tau_ref - (1.0 - spikes[0].time),
            max_relative = 1e-12
        );
        assert_eq!(network.neuron(0).unwrap().firing_times().len(), 1);
        assert!(network.neurons().iter().all(|n| n.queue().is_empty()));
    }

    #[test]
    fn test_spikes_since() {
        let weak = |time: f64| vec![Spike::exogenous(time, Polarity::Excitatory, 0.3)];
        let drive = ReplayDrive::new(vec![weak(0.1), weak(2.6), weak(5.1)]).unwrap();
        let mut network =
            NetworkEngine::build(LifG::default(), excitatory(3), DenseConnectivity::new(3), drive).unwrap();
        for k in 0..8 {
            network.advance(k as f64, 1.0).unwrap();
        }

        let spikes = network.spikes_since(0.0);
        assert_eq!(spikes.len(), 3);
        assert_eq!(spikes.iter().map(|s| s.neuron_id).collect::<Vec<usize>>(), vec![0, 1, 2]);
        assert_eq!(network.spikes_since(spikes[1].time), spikes[1..].to_vec());
        assert_eq!(network.spikes_since(spikes[1].time + 1e-9), spikes[2..].to_vec());
        assert!(network.spikes_since(8.0).is_empty());
    }

    #[test]
    fn test_load_snapshot_type_mismatch() {
        let mut network =
            NetworkEngine::build(LifG::default(), excitatory(2), DenseConnectivity::new(2), NoDrive).unwrap();
        let mut snapshot = network.snapshot();
        snapshot[1].neuron_type = NeuronType::Inhibitory;
        snapshot[1].potential = 0.5;

        assert!(matches!(
            network.load_snapshot(&snapshot),
            Err(SimError::InvalidParameters(_))
        ));
        assert_eq!(network.types(), excitatory(2));
        assert_eq!(network.potentials(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_cascade_overflow() {
        let mut connectivity = DenseConnectivity::new(2);
        connectivity.add_connection(0, 1, 0.01, 0.5).unwrap();
        let drive = ReplayDrive::new(vec![kick(0.1), vec![]]).unwrap();
        let mut network = NetworkEngine::build(LifG::default(), excitatory(2), connectivity, drive)
            .unwrap()
            .with_max_cascade_iterations(1);

        match network.advance(0.0, 1.0) {
            Err(SimError::CascadeOverflow { time, iterations }) => {
                assert_eq!(time, 0.0);
                assert_eq!(iterations, 1);
            }
            other => panic!("expected a cascade overflow, got {:?}", other),
        }
    }

    #[test]
    fn test_inject_spikes() {
        let mut network =
            NetworkEngine::build(LifG::default(), excitatory(2), DenseConnectivity::new(2), NoDrive).unwrap();
        assert!(network.inject_spikes(2, kick(0.1)).is_err());
        assert!(network
            .inject_spikes(0, vec![Spike::exogenous(f64::NAN, Polarity::Excitatory, 1.0)])
            .is_err());

        network.inject_spikes(1, kick(0.1)).unwrap();
        let spikes = network.advance(0.0, 1.0).unwrap();
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].neuron_id, 1);
        assert_eq!(network.spikes_since(0.0), spikes);
        assert!(network.spikes_since(1.0).is_empty());
        assert_eq!(network.num_spikes(), 1);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let drive = ReplayDrive::new(vec![kick(0.1), vec![]]).unwrap();
        let mut network =
            NetworkEngine::build(LifG::default(), excitatory(2), DenseConnectivity::new(2), drive).unwrap();
        let first = network.advance(0.0, 1.0).unwrap();
        let snapshot = network.snapshot();
        assert_eq!(snapshot[0].index, 0);
        assert!(snapshot[0].remaining_refractory > 0.0);

        network.reset();
        assert_eq!(network.num_spikes(), 0);
        assert!(network.spike_trains().iter().all(|train| train.is_empty()));
        assert_eq!(network.advance(0.0, 1.0).unwrap(), first);

        network.load_snapshot(&snapshot).unwrap();
        assert_eq!(network.snapshot(), snapshot);
        assert!(network.load_snapshot(&snapshot[..1]).is_err());
    }
}
