//! Module implementing the connectivity of a network: which neurons are connected, with which strength and delay.
//!
//! The engine only queries connectivity through the [`ConnectivityModel`] trait. The provided
//! implementation, [`DenseConnectivity`], stores row-major matrices indexed by (source, target),
//! and comes with builders for the usual topologies.
use log;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::neuron::NeuronType;
use crate::utils::l2;

/// Scale of the inverse-square distance law applied to strengths.
pub const INVERSE_SQUARE_SCALE: f64 = 0.02;

/// Represents a connection between two neurons in a network.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Connection {
    source_id: usize,
    target_id: usize,
    /// Size of the conductance jump at the target
    strength: f64,
    /// Transmission delay (must be non-negative)
    delay: f64,
}

impl Connection {
    /// Create a new connection with the specified parameters.
    /// Returns an error if the connection is a self-edge, or if the delay is negative or not finite.
    pub fn build(
        source_id: usize,
        target_id: usize,
        strength: f64,
        delay: f64,
    ) -> Result<Self, SimError> {
        if source_id == target_id {
            return Err(SimError::InvalidParameters(format!(
                "Neuron {} cannot be connected to itself",
                source_id
            )));
        }
        if !(delay >= 0.0 && delay.is_finite()) {
            return Err(SimError::InvalidParameters(
                "Connection delay must be non-negative".to_string(),
            ));
        }
        if !strength.is_finite() {
            return Err(SimError::InvalidParameters(
                "Connection strength must be finite".to_string(),
            ));
        }

        Ok(Connection {
            source_id,
            target_id,
            strength,
            delay,
        })
    }

    /// Returns the ID of the source neuron.
    pub fn source_id(&self) -> usize {
        self.source_id
    }

    /// Returns the ID of the target neuron.
    pub fn target_id(&self) -> usize {
        self.target_id
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }
}

/// A value per (source type, target type) pair, e.g., a connection probability or a strength.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct TypePairs {
    pub ee: f64,
    pub ei: f64,
    pub ie: f64,
    pub ii: f64,
}

impl TypePairs {
    pub fn uniform(value: f64) -> Self {
        TypePairs {
            ee: value,
            ei: value,
            ie: value,
            ii: value,
        }
    }

    /// Returns the value for a connection from a neuron of type `source` to a neuron of type `target`.
    pub fn get(&self, source: NeuronType, target: NeuronType) -> f64 {
        match (source, target) {
            (NeuronType::Excitatory, NeuronType::Excitatory) => self.ee,
            (NeuronType::Excitatory, NeuronType::Inhibitory) => self.ei,
            (NeuronType::Inhibitory, NeuronType::Excitatory) => self.ie,
            (NeuronType::Inhibitory, NeuronType::Inhibitory) => self.ii,
        }
    }
}

/// Read access to the connectivity of a network.
pub trait ConnectivityModel: Send + Sync {
    fn num_neurons(&self) -> usize;

    /// Whether `source` sends its spikes to `target`.
    fn is_connected(&self, source: usize, target: usize) -> bool;

    /// The conductance jump caused at `target` by a spike of `source`.
    fn strength(&self, source: usize, target: usize) -> f64;

    /// The time a spike of `source` takes to reach `target`.
    fn delay(&self, source: usize, target: usize) -> f64;

    /// Whether the network has at least one connection.
    fn has_connections(&self) -> bool;

    /// Returns all the connections of the network, sorted by source then target.
    fn connections(&self) -> Vec<Connection> {
        let n = self.num_neurons();
        (0..n)
            .flat_map(|i| (0..n).map(move |j| (i, j)))
            .filter(|&(i, j)| self.is_connected(i, j))
            .map(|(i, j)| Connection {
                source_id: i,
                target_id: j,
                strength: self.strength(i, j),
                delay: self.delay(i, j),
            })
            .collect()
    }

    /// Check the connectivity: no self-edges, finite strengths and non-negative delays.
    fn validate(&self) -> Result<(), SimError> {
        for connection in self.connections() {
            Connection::build(
                connection.source_id,
                connection.target_id,
                connection.strength,
                connection.delay,
            )?;
        }
        Ok(())
    }
}

/// Dense connectivity, stored as row-major (source, target) matrices.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DenseConnectivity {
    num_neurons: usize,
    adjacency: Vec<bool>,
    strengths: Vec<f64>,
    delays: Vec<f64>,
}

impl DenseConnectivity {
    /// Create a network of `num_neurons` neurons without any connection.
    pub fn new(num_neurons: usize) -> Self {
        DenseConnectivity {
            num_neurons,
            adjacency: vec![false; num_neurons * num_neurons],
            strengths: vec![0.0; num_neurons * num_neurons],
            delays: vec![0.0; num_neurons * num_neurons],
        }
    }

    /// Create the connectivity from an adjacency matrix, where `matrix[i][j]` tells whether `i` sends spikes to `j`.
    pub fn from_matrix(matrix: &[Vec<bool>]) -> Result<Self, SimError> {
        let num_neurons = matrix.len();
        check_square(matrix, num_neurons, "connectivity")?;

        let mut connectivity = DenseConnectivity::new(num_neurons);
        for (i, row) in matrix.iter().enumerate() {
            for (j, &connected) in row.iter().enumerate() {
                if connected {
                    if i == j {
                        return Err(SimError::InvalidParameters(format!(
                            "Neuron {} cannot be connected to itself",
                            i
                        )));
                    }
                    connectivity.adjacency[i * num_neurons + j] = true;
                }
            }
        }
        Ok(connectivity)
    }

    /// Create a small-world network: every neuron connects to its `density` nearest neighbors on each side of a ring,
    /// then every connection is moved, with the given probability, to a random target it was not connected to.
    pub fn small_world<R: Rng + ?Sized>(
        num_neurons: usize,
        density: usize,
        rewiring_probability: f64,
        rng: &mut R,
    ) -> Result<Self, SimError> {
        if !(0.0..=1.0).contains(&rewiring_probability) {
            return Err(SimError::InvalidParameters(
                "Rewiring probability must be in [0, 1]".to_string(),
            ));
        }
        if num_neurons > 0 && 2 * density >= num_neurons {
            return Err(SimError::InvalidParameters(format!(
                "Connection density {} is too large for a ring of {} neurons",
                density, num_neurons
            )));
        }

        let mut connectivity = DenseConnectivity::new(num_neurons);
        for i in 0..num_neurons {
            for j in 0..num_neurons {
                let gap = i.abs_diff(j);
                if i != j && (gap <= density || num_neurons - gap <= density) {
                    connectivity.adjacency[i * num_neurons + j] = true;
                }
            }
        }
        let num_connections = connectivity.num_connections();

        let mut num_rewirings = 0;
        for i in 0..num_neurons {
            let targets: Vec<usize> = connectivity.targets(i).collect();
            for target in targets {
                if rng.gen::<f64>() >= rewiring_probability {
                    continue;
                }
                let free: Vec<usize> = (0..num_neurons)
                    .filter(|&j| j != i && !connectivity.is_connected(i, j))
                    .collect();
                let Some(&new_target) = free.choose(rng) else {
                    break;
                };
                connectivity.adjacency[i * num_neurons + new_target] = true;
                connectivity.adjacency[i * num_neurons + target] = false;
                num_rewirings += 1;
            }
        }

        log::info!(
            "Small-world network: {} connections total with {} rewirings.",
            num_connections,
            num_rewirings
        );
        Ok(connectivity)
    }

    /// Create a random network: each ordered pair of distinct neurons is connected with the probability of its type pair.
    pub fn random_by_type<R: Rng + ?Sized>(
        types: &[NeuronType],
        probabilities: &TypePairs,
        rng: &mut R,
    ) -> Result<Self, SimError> {
        let probs = [
            probabilities.ee,
            probabilities.ei,
            probabilities.ie,
            probabilities.ii,
        ];
        if probs.iter().any(|p| !(0.0..=1.0).contains(p)) {
            return Err(SimError::InvalidParameters(
                "Connection probabilities must be in [0, 1]".to_string(),
            ));
        }

        let num_neurons = types.len();
        let mut connectivity = DenseConnectivity::new(num_neurons);
        for (i, &source) in types.iter().enumerate() {
            for (j, &target) in types.iter().enumerate() {
                let x = rng.gen::<f64>();
                if i != j && x < probabilities.get(source, target) {
                    connectivity.adjacency[i * num_neurons + j] = true;
                }
            }
        }

        log::info!(
            "Random network: {} connections total.",
            connectivity.num_connections()
        );
        Ok(connectivity)
    }

    /// Add a connection to the network, or overwrite an existing one.
    pub fn add_connection(
        &mut self,
        source_id: usize,
        target_id: usize,
        strength: f64,
        delay: f64,
    ) -> Result<(), SimError> {
        if source_id >= self.num_neurons || target_id >= self.num_neurons {
            return Err(SimError::InvalidParameters(format!(
                "Connection from {} to {} is out of range for {} neurons",
                source_id, target_id, self.num_neurons
            )));
        }
        let connection = Connection::build(source_id, target_id, strength, delay)?;
        let k = self.flat(connection.source_id, connection.target_id);
        self.adjacency[k] = true;
        self.strengths[k] = connection.strength;
        self.delays[k] = connection.delay;
        Ok(())
    }

    /// Set every strength from the type of the source and target neurons.
    pub fn set_type_strengths(
        &mut self,
        types: &[NeuronType],
        strengths: &TypePairs,
    ) -> Result<(), SimError> {
        self.check_len(types.len(), "neuron types")?;
        for (i, &source) in types.iter().enumerate() {
            for (j, &target) in types.iter().enumerate() {
                let k = self.flat(i, j);
                self.strengths[k] = strengths.get(source, target);
            }
        }
        Ok(())
    }

    /// Set every strength from a matrix, where `matrix[i][j]` is the strength from `i` to `j`.
    pub fn set_strength_matrix(&mut self, matrix: &[Vec<f64>]) -> Result<(), SimError> {
        check_square(matrix, self.num_neurons, "strength")?;
        for (i, row) in matrix.iter().enumerate() {
            for (j, &strength) in row.iter().enumerate() {
                let k = self.flat(i, j);
                self.strengths[k] = strength;
            }
        }
        Ok(())
    }

    /// Scale every strength by `0.02 / d^2`, where `d` is the distance between the two neurons.
    pub fn scale_strengths_inverse_square(&mut self, coordinates: &[[f64; 2]]) -> Result<(), SimError> {
        self.check_len(coordinates.len(), "coordinates")?;
        for i in 0..self.num_neurons {
            for j in 0..self.num_neurons {
                if i == j {
                    continue;
                }
                let distance = l2(&coordinates[i], &coordinates[j]);
                if self.is_connected(i, j) && distance == 0.0 {
                    return Err(SimError::InvalidParameters(format!(
                        "Connected neurons {} and {} share the same position",
                        i, j
                    )));
                }
                let k = self.flat(i, j);
                if distance > 0.0 {
                    self.strengths[k] *= INVERSE_SQUARE_SCALE / distance.powi(2);
                }
            }
        }
        Ok(())
    }

    /// Set the same delay on every connection.
    pub fn set_homogeneous_delay(&mut self, delay: f64) -> Result<(), SimError> {
        if !(delay >= 0.0 && delay.is_finite()) {
            return Err(SimError::InvalidParameters(
                "Connection delay must be non-negative".to_string(),
            ));
        }
        self.delays.iter_mut().for_each(|d| *d = delay);
        Ok(())
    }

    /// Set every delay to the distance between the neurons divided by the transmission speed.
    pub fn set_distance_delays(&mut self, coordinates: &[[f64; 2]], speed: f64) -> Result<(), SimError> {
        self.check_len(coordinates.len(), "coordinates")?;
        if !(speed > 0.0) {
            return Err(SimError::InvalidParameters(
                "Transmission speed must be positive".to_string(),
            ));
        }
        for i in 0..self.num_neurons {
            for j in 0..self.num_neurons {
                let k = self.flat(i, j);
                self.delays[k] = l2(&coordinates[i], &coordinates[j]) / speed;
            }
        }
        Ok(())
    }

    /// Returns the number of connections in the network.
    pub fn num_connections(&self) -> usize {
        self.adjacency.iter().filter(|&&c| c).count()
    }

    /// Returns the targets of a neuron, in increasing order.
    pub fn targets(&self, source: usize) -> impl Iterator<Item = usize> + '_ {
        let row = &self.adjacency[source * self.num_neurons..(source + 1) * self.num_neurons];
        row.iter()
            .enumerate()
            .filter_map(|(j, &connected)| connected.then_some(j))
    }

    /// Returns the adjacency matrix, row by source.
    pub fn adjacency_matrix(&self) -> Vec<Vec<bool>> {
        self.adjacency
            .chunks(self.num_neurons.max(1))
            .take(self.num_neurons)
            .map(|row| row.to_vec())
            .collect()
    }

    fn flat(&self, source: usize, target: usize) -> usize {
        source * self.num_neurons + target
    }

    fn check_len(&self, len: usize, what: &str) -> Result<(), SimError> {
        if len != self.num_neurons {
            return Err(SimError::InvalidParameters(format!(
                "Expected {} {}, got {}",
                self.num_neurons, what, len
            )));
        }
        Ok(())
    }
}

fn check_square<T>(matrix: &[Vec<T>], size: usize, what: &str) -> Result<(), SimError> {
    if matrix.len() != size || matrix.iter().any(|row| row.len() != size) {
        return Err(SimError::InvalidParameters(format!(
            "Wrong size of {} matrix, expected {}x{}",
            what, size, size
        )));
    }
    Ok(())
}

impl ConnectivityModel for DenseConnectivity {
    fn num_neurons(&self) -> usize {
        self.num_neurons
    }

    fn is_connected(&self, source: usize, target: usize) -> bool {
        self.adjacency[self.flat(source, target)]
    }

    fn strength(&self, source: usize, target: usize) -> f64 {
        self.strengths[self.flat(source, target)]
    }

    fn delay(&self, source: usize, target: usize) -> f64 {
        self.delays[self.flat(source, target)]
    }

    fn has_connections(&self) -> bool {
        self.adjacency.iter().any(|&c| c)
    }
}
