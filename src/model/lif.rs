//! Membrane dynamics shared by the conductance-based leaky integrate-and-fire models.
//!
//! The potential obeys `dV/dt = -g_m (V - V_rest) - g_E (V - V_E) - g_I (V - V_I)`. Between two input
//! spikes, the conductances evolve in closed form, while the potential is advanced by 4th-order
//! Runge-Kutta steps no longer than [`crate::MAX_STEP`]. When the predicted potential reaches the
//! threshold, the crossing time is recovered from the cubic Hermite interpolant through the values and
//! slopes at both ends of the step which crosses.
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::model::DymState;
use crate::{MAX_STEP, TIME_RESOLUTION};

/// Id of the membrane potential.
pub const V_ID: usize = 0;
/// Id of the excitatory conductance.
pub const GE_ID: usize = 1;
/// Id of the inhibitory conductance.
pub const GI_ID: usize = 2;
/// Id of the remaining refractory time.
pub const TR_ID: usize = 3;

/// Membrane parameters, in normalized units (potentials relative to the threshold, times in ms).
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LifParams {
    /// Leak conductance.
    pub g_m: f64,
    /// Resting (and reset) potential.
    pub v_rest: f64,
    /// Firing threshold.
    pub v_th: f64,
    /// Excitatory reversal potential.
    pub v_e: f64,
    /// Inhibitory reversal potential.
    pub v_i: f64,
    /// Refractory period.
    pub tau_ref: f64,
}

impl Default for LifParams {
    fn default() -> Self {
        LifParams {
            g_m: 5e-2,
            v_rest: 0.0,
            v_th: 1.0,
            v_e: 14.0 / 3.0,
            v_i: -2.0 / 3.0,
            tau_ref: 2.0,
        }
    }
}

impl LifParams {
    pub fn validate(&self) -> Result<(), SimError> {
        if !(self.g_m > 0.0) {
            return Err(SimError::InvalidParameters(
                "Leak conductance must be positive".to_string(),
            ));
        }
        if !(self.v_th > self.v_rest) {
            return Err(SimError::InvalidParameters(
                "Firing threshold must be above the resting potential".to_string(),
            ));
        }
        if !(self.tau_ref > 0.0) {
            return Err(SimError::InvalidParameters(
                "Refractory period must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Time derivative of the membrane potential, i.e., the total membrane current.
    pub fn dvdt(&self, v: f64, ge: f64, gi: f64) -> f64 {
        -self.g_m * (v - self.v_rest) - ge * (v - self.v_e) - gi * (v - self.v_i)
    }
}

/// Closed-form evolution of the synaptic conductances of a model.
pub(crate) trait Kinetics {
    /// The excitatory and inhibitory conductances seen by the membrane.
    fn conductances(&self, state: &DymState) -> (f64, f64);

    /// Advance the conductance variables by `dt`.
    fn decay(&self, state: &mut DymState, dt: f64);
}

/// Integrate a spike-free interval of length `dt`, including the refractory period.
pub(crate) fn evolve<K: Kinetics>(
    params: &LifParams,
    kinetics: &K,
    state: &mut DymState,
    dt: f64,
) -> Option<f64> {
    if dt <= 0.0 {
        return None;
    }

    let tr = state[TR_ID];
    if tr > 0.0 {
        if tr >= dt {
            kinetics.decay(state, dt);
            state[TR_ID] = tr - dt;
            state[V_ID] = params.v_rest;
            return None;
        }

        // The refractory period ends inside the interval: resume from that very instant.
        kinetics.decay(state, tr);
        state[TR_ID] = 0.0;
        state[V_ID] = params.v_rest;
        return evolve_active(params, kinetics, state, dt - tr).map(|offset| offset + tr);
    }

    evolve_active(params, kinetics, state, dt)
}

/// Integrate only the conductances and the refractory timer.
pub(crate) fn evolve_source<K: Kinetics>(kinetics: &K, state: &mut DymState, dt: f64) {
    if dt <= 0.0 {
        return;
    }
    kinetics.decay(state, dt);
    if state[TR_ID] > 0.0 {
        state[TR_ID] = (state[TR_ID] - dt).max(0.0);
    }
}

fn evolve_active<K: Kinetics>(
    params: &LifParams,
    kinetics: &K,
    state: &mut DymState,
    dt: f64,
) -> Option<f64> {
    if dt <= 0.0 {
        return None;
    }

    let offset = match state[V_ID] >= params.v_th {
        true => 0.0,
        false => advance_to_crossing(params, kinetics, state, dt)?,
    };

    // Reset at the crossing and spend the rest of the interval (at least partly) in refractory period.
    state[V_ID] = params.v_rest;
    state[TR_ID] = params.tau_ref;
    let _ = evolve(params, kinetics, state, dt - offset);
    Some(offset)
}

/// Integrate the potential with RK4 steps no longer than `MAX_STEP`, until the end of the interval or the first
/// step which reaches the threshold.
/// In the latter case, the state is left at the crossing and its offset is returned.
fn advance_to_crossing<K: Kinetics>(
    params: &LifParams,
    kinetics: &K,
    state: &mut DymState,
    dt: f64,
) -> Option<f64> {
    let num_steps = (dt / MAX_STEP).ceil().max(1.0) as usize;
    let h = dt / num_steps as f64;

    for k in 0..num_steps {
        let v0 = state[V_ID];
        let g0 = kinetics.conductances(state);
        let mut mid = *state;
        kinetics.decay(&mut mid, 0.5 * h);
        let g_mid = kinetics.conductances(&mid);
        let mut end = *state;
        kinetics.decay(&mut end, h);
        let g1 = kinetics.conductances(&end);

        let v1 = rk4_step(params, v0, g0, g_mid, g1, h);
        if v1 < params.v_th {
            *state = end;
            state[V_ID] = v1;
            continue;
        }

        let d0 = params.dvdt(v0, g0.0, g0.1);
        let d1 = params.dvdt(v1, g1.0, g1.1);
        let local = cubic_crossing(v0, d0, v1, d1, h, params.v_th);
        kinetics.decay(state, local);
        return Some(k as f64 * h + local);
    }
    None
}

fn rk4_step(
    params: &LifParams,
    v0: f64,
    g0: (f64, f64),
    g_mid: (f64, f64),
    g1: (f64, f64),
    dt: f64,
) -> f64 {
    let k1 = params.dvdt(v0, g0.0, g0.1);
    let k2 = params.dvdt(v0 + 0.5 * dt * k1, g_mid.0, g_mid.1);
    let k3 = params.dvdt(v0 + 0.5 * dt * k2, g_mid.0, g_mid.1);
    let k4 = params.dvdt(v0 + dt * k3, g1.0, g1.1);
    v0 + dt / 6.0 * (k1 + 2.0 * k2 + 2.0 * k3 + k4)
}

/// Returns the time in `[0, dt]` at which the cubic Hermite interpolant through `(0, v0, d0)` and `(dt, v1, d1)` reaches the threshold.
/// It assumes `v0 < threshold <= v1`.
pub fn cubic_crossing(v0: f64, d0: f64, v1: f64, d1: f64, dt: f64, threshold: f64) -> f64 {
    let hermite = |u: f64| {
        let u2 = u * u;
        let u3 = u2 * u;
        (2.0 * u3 - 3.0 * u2 + 1.0) * v0
            + (u3 - 2.0 * u2 + u) * dt * d0
            + (-2.0 * u3 + 3.0 * u2) * v1
            + (u3 - u2) * dt * d1
    };

    let (mut lo, mut hi) = (0.0, 1.0);
    while (hi - lo) * dt > TIME_RESOLUTION {
        let mid = 0.5 * (lo + hi);
        match hermite(mid) >= threshold {
            true => hi = mid,
            false => lo = mid,
        }
    }
    0.5 * (lo + hi) * dt
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Conductances that never decay.
    struct Frozen;

    impl Kinetics for Frozen {
        fn conductances(&self, state: &DymState) -> (f64, f64) {
            (state[GE_ID], state[GI_ID])
        }

        fn decay(&self, _state: &mut DymState, _dt: f64) {}
    }

    fn analytic_crossing(params: &LifParams, ge: f64) -> f64 {
        let a = params.g_m + ge;
        let v_inf = ge * params.v_e / a;
        (v_inf / (v_inf - params.v_th)).ln() / a
    }

    #[test]
    fn test_cubic_crossing_linear() {
        // A straight line from 0 to 2 over 1 ms crosses 1 at 0.5 ms.
        assert_abs_diff_eq!(cubic_crossing(0.0, 2.0, 2.0, 2.0, 1.0, 1.0), 0.5, epsilon = 1e-10);
        assert_abs_diff_eq!(cubic_crossing(0.0, 4.0, 2.0, 4.0, 0.5, 1.0), 0.25, epsilon = 1e-10);
    }

    #[test]
    fn test_cubic_crossing_at_boundary() {
        assert_abs_diff_eq!(cubic_crossing(0.0, 1.0, 1.0, 1.0, 1.0, 1.0), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_rest_is_stationary() {
        let params = LifParams::default();
        let mut state = DymState::zeros();
        for _ in 0..100 {
            assert_eq!(evolve(&params, &Frozen, &mut state, 0.5), None);
        }
        assert_eq!(state[V_ID], params.v_rest);
    }

    #[test]
    fn test_crossing_time_constant_conductance() {
        let params = LifParams::default();
        let mut state = DymState::zeros();
        state[GE_ID] = 1.0;

        let dt = 0.1;
        let mut t = 0.0;
        let mut spike = None;
        for _ in 0..10 {
            if let Some(offset) = evolve(&params, &Frozen, &mut state, dt) {
                spike = Some(t + offset);
                break;
            }
            t += dt;
        }

        let spike = spike.expect("the neuron should fire");
        assert_abs_diff_eq!(spike, analytic_crossing(&params, 1.0), epsilon = 1e-5);
        // Reset and refractory for the remainder of the step.
        assert_eq!(state[V_ID], params.v_rest);
        assert_abs_diff_eq!(state[TR_ID], params.tau_ref - (t + dt - spike), epsilon = 1e-12);
    }

    #[test]
    fn test_refractory_holds_potential() {
        let params = LifParams::default();
        let mut state = DymState::zeros();
        state[GE_ID] = 1.0;
        state[TR_ID] = 1.0;

        assert_eq!(evolve(&params, &Frozen, &mut state, 0.5), None);
        assert_eq!(state[V_ID], params.v_rest);
        assert_abs_diff_eq!(state[TR_ID], 0.5, epsilon = 1e-12);

        assert_eq!(evolve(&params, &Frozen, &mut state, 0.5), None);
        assert_eq!(state[V_ID], params.v_rest);
        assert_eq!(state[TR_ID], 0.0);
    }

    #[test]
    fn test_refractory_exit_mid_interval() {
        let params = LifParams::default();
        let crossing = analytic_crossing(&params, 1.0);

        // The refractory period ends 0.05 ms into the interval, integration restarts from there.
        let mut state = DymState::zeros();
        state[GE_ID] = 1.0;
        state[TR_ID] = 0.05;
        let mut t = 0.0;
        let mut spike = None;
        for _ in 0..10 {
            if let Some(offset) = evolve(&params, &Frozen, &mut state, 0.1) {
                spike = Some(t + offset);
                break;
            }
            t += 0.1;
        }
        assert_abs_diff_eq!(spike.unwrap(), 0.05 + crossing, epsilon = 1e-5);
    }

    #[test]
    fn test_long_interval_strong_conductance() {
        let params = LifParams::default();
        let mut state = DymState::zeros();
        state[GE_ID] = 3.0;

        let spike = evolve(&params, &Frozen, &mut state, 2.0).expect("the neuron should fire");
        assert_abs_diff_eq!(spike, analytic_crossing(&params, 3.0), epsilon = 1e-6);
        assert_eq!(state[V_ID], params.v_rest);
        assert_abs_diff_eq!(state[TR_ID], params.tau_ref - (2.0 - spike), epsilon = 1e-12);
    }

    #[test]
    fn test_above_threshold_fires_immediately() {
        let params = LifParams::default();
        let mut state = DymState::zeros();
        state[V_ID] = 1.5;
        assert_eq!(evolve(&params, &Frozen, &mut state, 0.1), Some(0.0));
        assert_eq!(state[V_ID], params.v_rest);
        assert_abs_diff_eq!(state[TR_ID], params.tau_ref - 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_evolve_source_leaves_potential() {
        let mut state = DymState::zeros();
        state[V_ID] = 0.3;
        state[TR_ID] = 0.2;
        evolve_source(&Frozen, &mut state, 0.5);
        assert_eq!(state[V_ID], 0.3);
        assert_eq!(state[TR_ID], 0.0);
    }

    #[test]
    fn test_invalid_params() {
        let params = LifParams {
            v_th: -1.0,
            ..LifParams::default()
        };
        assert!(params.validate().is_err());
        assert_eq!(LifParams::default().validate(), Ok(()));
    }
}
