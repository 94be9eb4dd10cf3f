use std::fs;

use tempfile::tempdir;

use ifnet::config::SimulationConfig;
use ifnet::io::{write_bool_matrix, write_matrix};

const CONFIG: &str = r#"{
    "neuron_number": 4,
    "seed": 11,
    "dt": 0.125,
    "max_time": 20.0,
    "types": { "mode": "leading", "probability": 0.75 },
    "connectivity": { "mode": "matrix", "path": "mat.csv" },
    "strength": { "mode": "by_type", "ee": 0.02, "ei": 0.02, "ie": 0.05, "ii": 0.05 },
    "delay": { "mode": "homogeneous", "delay": 0.5 },
    "driving": { "mode": "per_neuron", "path": "driving.csv" }
}"#;

fn write_inputs(dir: &std::path::Path) {
    let adjacency = vec![
        vec![false, true, false, true],
        vec![false, false, true, false],
        vec![true, false, false, true],
        vec![true, true, false, false],
    ];
    write_bool_matrix(dir.join("mat.csv"), &adjacency).unwrap();
    let driving = vec![
        vec![1.5, 0.05],
        vec![1.5, 0.05],
        vec![0.0, 0.0],
        vec![1.5, 0.05, 0.5, 0.02],
    ];
    write_matrix(dir.join("driving.csv"), &driving).unwrap();
    fs::write(dir.join("config.json"), CONFIG).unwrap();
}

#[test]
fn test_config_driven_run() {
    let dir = tempdir().unwrap();
    write_inputs(dir.path());

    let config = SimulationConfig::load_from(dir.path().join("config.json")).unwrap();
    assert_eq!(config.num_steps(), 160);

    let run = || {
        let mut network = config.build().unwrap();
        for k in 0..config.num_steps() {
            network.advance(k as f64 * config.dt, config.dt).unwrap();
        }
        network
    };

    let network = run();
    assert_eq!(network.num_neurons(), 4);
    assert!(network.types()[..3].iter().all(|t| t.is_excitatory()));
    assert!(!network.types()[3].is_excitatory());
    assert!(network.num_spikes() > 0);
    assert!(!network.spike_trains()[0].is_empty());

    let again = run();
    assert_eq!(network.spikes_since(0.0), again.spikes_since(0.0));
}

#[test]
fn test_config_missing_file() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("config.json"), CONFIG).unwrap();

    let config = SimulationConfig::load_from(dir.path().join("config.json")).unwrap();
    assert!(config.build().is_err());
}
