//! This crate provides an event-driven simulator for networks of conductance-based integrate-and-fire neurons.
//!
//! The network is advanced over fixed outer steps. Inside each step, the input spikes of every neuron
//! are applied at their exact arrival time, and the spikes fired by the network are resolved one at a
//! time in causal order, so that a neuron never evolves independently of an input it received during
//! the step.
//!
//! # Building Networks
//!
//! ## From Scratch
//!
//! ```rust
//! use ifnet::connection::DenseConnectivity;
//! use ifnet::drive::ReplayDrive;
//! use ifnet::model::lif_g::LifG;
//! use ifnet::network::NetworkEngine;
//! use ifnet::neuron::NeuronType;
//! use ifnet::spike_train::{Polarity, Spike};
//!
//! // Neuron 0 excites neuron 1 with a delay of 5 ms
//! let mut connectivity = DenseConnectivity::new(2);
//! connectivity.add_connection(0, 1, 0.3, 5.0).unwrap();
//!
//! // An exogenous spike makes neuron 0 fire about 1 ms after t = 1 ms
//! let drive = ReplayDrive::new(vec![vec![Spike::exogenous(1.0, Polarity::Excitatory, 0.3)], vec![]]).unwrap();
//!
//! let types = vec![NeuronType::Excitatory; 2];
//! let mut network = NetworkEngine::build(LifG::default(), types, connectivity, drive).unwrap();
//!
//! let dt = 0.25;
//! let mut spikes = vec![];
//! for k in 0..40 {
//!     spikes.extend(network.advance(k as f64 * dt, dt).unwrap());
//! }
//!
//! assert_eq!(spikes.len(), 2);
//! assert_eq!(spikes[0].neuron_id, 0);
//! assert_eq!(spikes[1].neuron_id, 1);
//! assert!(spikes[1].time > spikes[0].time + 5.0);
//! ```
//!
//! ## From a Configuration File
//!
//! See [`config::SimulationConfig`], which describes the neuron types, the topology, the synaptic strengths and
//! delays, and the Poisson driving of a network in JSON.
pub mod config;
pub mod connection;
pub mod drive;
pub mod error;
pub mod io;
pub mod model;
pub mod network;
pub mod neuron;
pub mod spike_train;
pub mod utils;

/// Time resolution of the threshold crossing search.
pub const TIME_RESOLUTION: f64 = 1e-12;

/// Longest Runge-Kutta step of the membrane potential.
pub const MAX_STEP: f64 = 1.0 / 32.0;

/// Minimum number of neurons to parallelize the computation.
pub const MIN_NEURONS_PAR: usize = 100;
