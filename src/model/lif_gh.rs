//! Conductance-based LIF neuron whose synaptic conductances rise and decay.
//!
//! Each conductance is driven by a hidden variable: `dg/dt = -g / tau_decay + h / tau_rise` and
//! `dh/dt = -h / tau_rise`. Input spikes increment the hidden variable, so that the conductance grows
//! continuously instead of jumping.
use serde::{Deserialize, Serialize};

use super::lif::{self, Kinetics, LifParams, GE_ID, GI_ID, TR_ID, V_ID};
use super::{DymState, NeuronModel};
use crate::error::SimError;
use crate::spike_train::Polarity;

/// Id of the hidden excitatory variable.
pub const HE_ID: usize = 4;
/// Id of the hidden inhibitory variable.
pub const HI_ID: usize = 5;

const SOURCE_IDS: [usize; 4] = [GE_ID, GI_ID, HE_ID, HI_ID];

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifGh {
    pub lif: LifParams,
    pub tau_e_rise: f64,
    pub tau_e_decay: f64,
    pub tau_i_rise: f64,
    pub tau_i_decay: f64,
}

impl Default for LifGh {
    fn default() -> Self {
        LifGh {
            lif: LifParams::default(),
            tau_e_rise: 0.5,
            tau_e_decay: 2.0,
            tau_i_rise: 0.8,
            tau_i_decay: 7.0,
        }
    }
}

/// Exact solution of the rise-decay kinetics after `dt`.
fn rise_decay(g: f64, h: f64, tau_rise: f64, tau_decay: f64, dt: f64) -> (f64, f64) {
    let ed = (-dt / tau_decay).exp();
    let er = (-dt / tau_rise).exp();
    let g_new = g * ed + h * tau_decay / (tau_decay - tau_rise) * (ed - er);
    (g_new, h * er)
}

impl Kinetics for LifGh {
    fn conductances(&self, state: &DymState) -> (f64, f64) {
        (state[GE_ID], state[GI_ID])
    }

    fn decay(&self, state: &mut DymState, dt: f64) {
        let (ge, he) = rise_decay(state[GE_ID], state[HE_ID], self.tau_e_rise, self.tau_e_decay, dt);
        let (gi, hi) = rise_decay(state[GI_ID], state[HI_ID], self.tau_i_rise, self.tau_i_decay, dt);
        state[GE_ID] = ge;
        state[HE_ID] = he;
        state[GI_ID] = gi;
        state[HI_ID] = hi;
    }
}

impl NeuronModel for LifGh {
    fn dym_len(&self) -> usize {
        6
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
            Polarity::Excitatory => HE_ID,
            Polarity::Inhibitory => HI_ID,
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
        let taus = [
            self.tau_e_rise,
            self.tau_e_decay,
            self.tau_i_rise,
            self.tau_i_decay,
        ];
        if taus.iter().any(|tau| !(*tau > 0.0)) {
            return Err(SimError::InvalidParameters(
                "Conductance time constants must be positive".to_string(),
            ));
        }
        if self.tau_e_rise == self.tau_e_decay || self.tau_i_rise == self.tau_i_decay {
            return Err(SimError::InvalidParameters(
                "Rise and decay time constants must differ".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_conductance_rises_from_zero() {
        let model = LifGh::default();
        let mut state = model.default_state();
        state[HE_ID] = 1.0;

        // Initial slope is h / tau_rise.
        let mut probe = state;
        model.evolve_source(&mut probe, 1e-6);
        assert_relative_eq!(probe[GE_ID] / 1e-6, 1.0 / model.tau_e_rise, max_relative = 1e-4);

        // The conductance peaks and decays back.
        let mut peak = 0.0;
        for _ in 0..200 {
            model.evolve_source(&mut state, 0.1);
            peak = f64::max(peak, state[GE_ID]);
        }
        assert!(peak > 0.0);
        assert!(state[GE_ID] < 0.01 * peak);
    }

    #[test]
    fn test_decay_composes() {
        let model = LifGh::default();
        let mut once = model.default_state();
        once[GI_ID] = 0.3;
        once[HI_ID] = 0.7;
        let mut twice = once;

        model.evolve_source(&mut once, 1.5);
        model.evolve_source(&mut twice, 0.4);
        model.evolve_source(&mut twice, 1.1);

        assert_abs_diff_eq!(once[GI_ID], twice[GI_ID], epsilon = 1e-12);
        assert_abs_diff_eq!(once[HI_ID], twice[HI_ID], epsilon = 1e-12);
    }

    #[test]
    fn test_strong_input_fires() {
        let model = LifGh::default();
        let mut state = model.default_state();
        state[model.jump_id(Polarity::Excitatory)] += 2.0;
        let fired = (0..20).any(|_| model.evolve(&mut state, 0.1).is_some());
        assert!(fired);
    }

    #[test]
    fn test_equal_time_constants_rejected() {
        let model = LifGh {
            tau_e_rise: 2.0,
            ..LifGh::default()
        };
        assert!(model.validate().is_err());
    }
}
