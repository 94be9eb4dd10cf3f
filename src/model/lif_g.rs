//! Conductance-based LIF neuron with exponentially decaying synaptic conductances.
use serde::{Deserialize, Serialize};

use super::lif::{self, Kinetics, LifParams, GE_ID, GI_ID, TR_ID, V_ID};
use super::{DymState, NeuronModel};
use crate::error::SimError;
use crate::spike_train::Polarity;

const SOURCE_IDS: [usize; 2] = [GE_ID, GI_ID];

/// An input spike increments the conductance of its polarity, which then decays with the corresponding time constant.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifG {
    pub lif: LifParams,
    /// Decay time constant of the excitatory conductance.
    pub tau_e: f64,
    /// Decay time constant of the inhibitory conductance.
    pub tau_i: f64,
}

impl Default for LifG {
    fn default() -> Self {
        LifG {
            lif: LifParams::default(),
            tau_e: 2.0,
            tau_i: 7.0,
        }
    }
}

impl Kinetics for LifG {
    fn conductances(&self, state: &DymState) -> (f64, f64) {
        (state[GE_ID], state[GI_ID])
    }

    fn decay(&self, state: &mut DymState, dt: f64) {
        state[GE_ID] *= (-dt / self.tau_e).exp();
        state[GI_ID] *= (-dt / self.tau_i).exp();
    }
}

impl NeuronModel for LifG {
    fn dym_len(&self) -> usize {
        4
    }

    fn default_state(&self) -> DymState {
        let mut state = DymState::zeros();
        state[V_ID] = self.lif.v_rest;
        state
    }

    fn evolve(&self, state: &mut DymState, dt: f64) -> Option<f64> {
        lif::evolve(&self.lif, self, state, dt)
    }

    fn evolve_source(&self, state: &mut DymState, dt: f64) {
        lif::evolve_source(self, state, dt)
    }

    fn v_id(&self) -> usize {
        V_ID
    }

    fn ge_id(&self) -> usize {
        GE_ID
    }

    fn gi_id(&self) -> usize {
        GI_ID
    }

    fn tr_id(&self) -> usize {
        TR_ID
    }

    fn jump_id(&self, polarity: Polarity) -> usize {
        match polarity {
            Polarity::Excitatory => GE_ID,
            Polarity::Inhibitory => GI_ID,
        }
    }

    fn source_ids(&self) -> &[usize] {
        &SOURCE_IDS
    }

    fn threshold(&self) -> f64 {
        self.lif.v_th
    }

    fn refractory_period(&self) -> f64 {
        self.lif.tau_ref
    }

    fn current(&self, state: &DymState) -> f64 {
        self.lif.dvdt(state[V_ID], state[GE_ID], state[GI_ID])
    }

    fn validate(&self) -> Result<(), SimError> {
        self.lif.validate()?;
        if !(self.tau_e > 0.0 && self.tau_i > 0.0) {
            return Err(SimError::InvalidParameters(
                "Conductance time constants must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
