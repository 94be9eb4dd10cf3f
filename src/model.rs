//! Neuron models, i.e., the single-neuron dynamics integrated between input spikes.
//!
//! Every model implements [`NeuronModel`], a capability interface giving the default state, the
//! integration of a spike-free interval with threshold detection, and the stable ids of the
//! fields of its [`DymState`]. The available variants are:
//!
//! - [`lif_g::LifG`]: conductance-based LIF neuron with exponentially decaying conductances,
//! - [`lif_gh::LifGh`]: conductance-based LIF neuron with rising and decaying conductances.
//!
//! [`Model`] selects one of them at construction, e.g., from a configuration file.
//!
//! # Examples
//!
//! ```rust
//! use ifnet::model::{Model, NeuronModel};
//!
//! let model = Model::default();
//! let mut state = model.default_state();
//!
//! // Without input, the neuron stays at rest.
//! assert_eq!(model.evolve(&mut state, 1.0), None);
//! assert_eq!(state[model.v_id()], 0.0);
//! ```
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::spike_train::Polarity;

pub mod lif;
pub mod lif_g;
pub mod lif_gh;

use lif_g::LifG;
use lif_gh::LifGh;

/// The maximum number of dynamic variables of a neuron model.
pub const MAX_DYM_LEN: usize = 6;

/// The dynamic variables of a neuron, addressed by the ids exposed by its model.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct DymState([f64; MAX_DYM_LEN]);

impl DymState {
    pub fn zeros() -> Self {
        DymState([0.0; MAX_DYM_LEN])
    }
}

impl Default for DymState {
    fn default() -> Self {
        DymState::zeros()
    }
}

impl Index<usize> for DymState {
    type Output = f64;

    fn index(&self, id: usize) -> &f64 {
        &self.0[id]
    }
}

impl IndexMut<usize> for DymState {
    fn index_mut(&mut self, id: usize) -> &mut f64 {
        &mut self.0[id]
    }
}

pub trait NeuronModel: Send + Sync {
    /// The number of dynamic variables used by the model.
    fn dym_len(&self) -> usize;

    /// The state of a neuron at rest, out of its refractory period.
    fn default_state(&self) -> DymState;

    /// Integrate the state over a spike-free interval of length `dt`.
    /// Returns the offset (from the start of the interval) at which the potential reaches the threshold, if any.
    /// At most one crossing is reported.
    fn evolve(&self, state: &mut DymState, dt: f64) -> Option<f64>;

    /// Integrate only the synaptic conductances and the refractory timer over a spike-free interval of length `dt`.
    fn evolve_source(&self, state: &mut DymState, dt: f64);

    /// The id of the membrane potential.
    fn v_id(&self) -> usize;

    /// The id of the excitatory conductance.
    fn ge_id(&self) -> usize;

    /// The id of the inhibitory conductance.
    fn gi_id(&self) -> usize;

    /// The id of the remaining refractory time.
    fn tr_id(&self) -> usize;

    /// The id of the variable receiving the jump of an input spike of the given polarity.
    fn jump_id(&self, polarity: Polarity) -> usize;

    /// The ids of the variables updated by [`NeuronModel::evolve_source`].
    fn source_ids(&self) -> &[usize];

    /// The firing threshold of the membrane potential.
    fn threshold(&self) -> f64;

    /// The refractory period following a spike.
    fn refractory_period(&self) -> f64;

    /// The total membrane current.
    fn current(&self, state: &DymState) -> f64;

    /// Check the model parameters.
    fn validate(&self) -> Result<(), SimError>;

    /// Build a state from its observable variables; hidden variables are set to their default.
    fn import_state(&self, potential: f64, ge: f64, gi: f64, remaining_refractory: f64) -> DymState {
        let mut state = self.default_state();
        state[self.v_id()] = potential;
        state[self.ge_id()] = ge;
        state[self.gi_id()] = gi;
        state[self.tr_id()] = remaining_refractory.max(0.0);
        state
    }
}

/// A neuron model selected at construction.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Model {
    LifG(LifG),
    LifGh(LifGh),
}

impl Default for Model {
    fn default() -> Self {
        Model::LifG(LifG::default())
    }
}

impl Model {
    fn inner(&self) -> &dyn NeuronModel {
        match self {
            Model::LifG(model) => model,
            Model::LifGh(model) => model,
        }
    }
}

impl NeuronModel for Model {
    fn dym_len(&self) -> usize {
        self.inner().dym_len()
    }

    fn default_state(&self) -> DymState {
        self.inner().default_state()
    }

    fn evolve(&self, state: &mut DymState, dt: f64) -> Option<f64> {
        self.inner().evolve(state, dt)
    }

    fn evolve_source(&self, state: &mut DymState, dt: f64) {
        self.inner().evolve_source(state, dt)
    }

    fn v_id(&self) -> usize {
        self.inner().v_id()
    }

    fn ge_id(&self) -> usize {
        self.inner().ge_id()
    }

    fn gi_id(&self) -> usize {
        self.inner().gi_id()
    }

    fn tr_id(&self) -> usize {
        self.inner().tr_id()
    }

    fn jump_id(&self, polarity: Polarity) -> usize {
        self.inner().jump_id(polarity)
    }

    fn source_ids(&self) -> &[usize] {
        self.inner().source_ids()
    }

    fn threshold(&self) -> f64 {
        self.inner().threshold()
    }

    fn refractory_period(&self) -> f64 {
        self.inner().refractory_period()
    }

    fn current(&self, state: &DymState) -> f64 {
        self.inner().current(state)
    }

    fn validate(&self) -> Result<(), SimError> {
        self.inner().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_deserialize() {
        let model: Model = serde_json::from_str(r#"{"kind": "lif_g"}"#).unwrap();
        assert_eq!(model, Model::LifG(LifG::default()));

        let model: Model =
            serde_json::from_str(r#"{"kind": "lif_gh", "tau_e_rise": 0.25}"#).unwrap();
        match model {
            Model::LifGh(inner) => {
                assert_eq!(inner.tau_e_rise, 0.25);
                assert_eq!(inner.tau_e_decay, LifGh::default().tau_e_decay);
            }
            _ => panic!("expected the lif_gh variant"),
        }
    }

    #[test]
    fn test_model_dispatch() {
        let model = Model::LifGh(LifGh::default());
        assert_eq!(model.dym_len(), 6);
        assert_eq!(model.jump_id(Polarity::Excitatory), lif_gh::HE_ID);
        let model = Model::default();
        assert_eq!(model.dym_len(), 4);
        assert_eq!(model.jump_id(Polarity::Excitatory), lif::GE_ID);
    }

    #[test]
    fn test_import_state() {
        let model = Model::default();
        let state = model.import_state(0.5, 0.1, 0.2, -1.0);
        assert_eq!(state[model.v_id()], 0.5);
        assert_eq!(state[model.ge_id()], 0.1);
        assert_eq!(state[model.gi_id()], 0.2);
        assert_eq!(state[model.tr_id()], 0.0);
    }
}
