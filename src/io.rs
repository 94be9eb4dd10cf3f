//! Reading and writing comma-delimited text files: matrices, vectors, neuron snapshots and recorded series.
use itertools::Itertools;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::SimError;
use crate::neuron::{NeuronSnapshot, NeuronType};

fn parse_row<T: FromStr>(line: &str, line_number: usize) -> Result<Vec<T>, SimError> {
    line.split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(|field| {
            field.parse::<T>().map_err(|_| {
                SimError::ParseError(format!("Invalid value '{}' on line {}", field, line_number))
            })
        })
        .collect()
}

/// Read a matrix, one row per line. Blank lines are skipped.
pub fn read_matrix<T: FromStr, P: AsRef<Path>>(path: P) -> Result<Vec<Vec<T>>, SimError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut rows = vec![];
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(parse_row(&line, i + 1)?);
    }
    Ok(rows)
}

/// Write a matrix, one row per line.
pub fn write_matrix<T: Display, P: AsRef<Path>>(path: P, rows: &[Vec<T>]) -> Result<(), SimError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for row in rows.iter() {
        writeln!(writer, "{}", row.iter().join(","))?;
    }
    writer.flush()?;
    Ok(())
}

/// Read all values of a file in reading order, whatever its layout.
pub fn read_vector<T: FromStr, P: AsRef<Path>>(path: P) -> Result<Vec<T>, SimError> {
    Ok(read_matrix(path)?.into_iter().flatten().collect())
}

/// Read a boolean matrix stored as integers, where any non-zero entry is true.
pub fn read_bool_matrix<P: AsRef<Path>>(path: P) -> Result<Vec<Vec<bool>>, SimError> {
    let rows: Vec<Vec<i64>> = read_matrix(path)?;
    Ok(rows
        .into_iter()
        .map(|row| row.into_iter().map(|x| x != 0).collect())
        .collect())
}

/// Write a boolean matrix as zeros and ones.
pub fn write_bool_matrix<P: AsRef<Path>>(path: P, rows: &[Vec<bool>]) -> Result<(), SimError> {
    let rows: Vec<Vec<u8>> = rows
        .iter()
        .map(|row| row.iter().map(|&x| x as u8).collect())
        .collect();
    write_matrix(path, &rows)
}

/// Write neuron snapshots, one line `type,index,potential,ge,gi,remaining refractory` per neuron,
/// where the type is 1 for excitatory and 0 for inhibitory neurons.
pub fn write_snapshot<P: AsRef<Path>>(path: P, snapshot: &[NeuronSnapshot]) -> Result<(), SimError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for entry in snapshot.iter() {
        writeln!(
            writer,
            "{},{},{},{},{},{}",
            entry.neuron_type.is_excitatory() as u8,
            entry.index,
            entry.potential,
            entry.excitatory_conductance,
            entry.inhibitory_conductance,
            entry.remaining_refractory
        )?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_snapshot<P: AsRef<Path>>(path: P) -> Result<Vec<NeuronSnapshot>, SimError> {
    let rows: Vec<Vec<f64>> = read_matrix(path)?;
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| match row.as_slice() {
            [neuron_type, index, potential, ge, gi, tr] => {
                if *index < 0.0 || index.fract() != 0.0 {
                    return Err(SimError::ParseError(format!(
                        "Invalid neuron index {} on row {}",
                        index,
                        i + 1
                    )));
                }
                Ok(NeuronSnapshot {
                    neuron_type: NeuronType::from(*neuron_type != 0.0),
                    index: *index as usize,
                    potential: *potential,
                    excitatory_conductance: *ge,
                    inhibitory_conductance: *gi,
                    remaining_refractory: *tr,
                })
            }
            _ => Err(SimError::ParseError(format!(
                "Expected 6 columns on row {}, got {}",
                i + 1,
                row.len()
            ))),
        })
        .collect()
}

/// Write one line per neuron with its firing times.
pub fn write_raster<P: AsRef<Path>>(path: P, spike_trains: &[&[f64]]) -> Result<(), SimError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for train in spike_trains.iter() {
        writeln!(writer, "{}", train.iter().join(","))?;
    }
    writer.flush()?;
    Ok(())
}

/// Appends one row per call to a file, e.g., the potentials of all neurons at the end of every step.
pub struct SeriesWriter {
    writer: BufWriter<File>,
    num_rows: usize,
}

impl SeriesWriter {
    /// Create the file, truncating it if it exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let file = File::create(path)?;
        Ok(SeriesWriter {
            writer: BufWriter::new(file),
            num_rows: 0,
        })
    }

    pub fn write_row(&mut self, values: &[f64]) -> Result<(), SimError> {
        writeln!(self.writer, "{}", values.iter().join(","))?;
        self.num_rows += 1;
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn flush(&mut self) -> Result<(), SimError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_matrix_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mat.csv");
        let rows = vec![vec![0.5, -1.25, 3.0], vec![1e-3, 0.0, 2.5]];
        write_matrix(&path, &rows).unwrap();
        let read: Vec<Vec<f64>> = read_matrix(&path).unwrap();
        assert_eq!(read, rows);
    }

    #[test]
    fn test_read_matrix_lenient_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mat.csv");
        fs::write(&path, "0, 1,0,\n\n1,0 ,1\n").unwrap();
        let read: Vec<Vec<u8>> = read_matrix(&path).unwrap();
        assert_eq!(read, vec![vec![0, 1, 0], vec![1, 0, 1]]);
        let read = read_bool_matrix(&path).unwrap();
        assert_eq!(read, vec![vec![false, true, false], vec![true, false, true]]);
        let read: Vec<u8> = read_vector(&path).unwrap();
        assert_eq!(read, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_read_matrix_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mat.csv");
        fs::write(&path, "0,1\n1,x\n").unwrap();
        let result: Result<Vec<Vec<f64>>, SimError> = read_matrix(&path);
        assert!(matches!(result, Err(SimError::ParseError(msg)) if msg.contains("line 2")));

        let result: Result<Vec<Vec<f64>>, SimError> = read_matrix(dir.path().join("missing.csv"));
        assert!(matches!(result, Err(SimError::IOError(_))));
    }

    #[test]
    fn test_bool_matrix_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mat.csv");
        let rows = vec![vec![false, true], vec![true, false]];
        write_bool_matrix(&path, &rows).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0,1\n1,0\n");
        assert_eq!(read_bool_matrix(&path).unwrap(), rows);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("neuron.csv");
        let snapshot = vec![
            NeuronSnapshot {
                neuron_type: NeuronType::Excitatory,
                index: 0,
                potential: 0.75,
                excitatory_conductance: 0.125,
                inhibitory_conductance: 0.0,
                remaining_refractory: 0.0,
            },
            NeuronSnapshot {
                neuron_type: NeuronType::Inhibitory,
                index: 1,
                potential: 0.0,
                excitatory_conductance: 0.5,
                inhibitory_conductance: 0.25,
                remaining_refractory: 1.5,
            },
        ];
        write_snapshot(&path, &snapshot).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("1,0,0.75,0.125,0,0\n"));
        assert_eq!(read_snapshot(&path).unwrap(), snapshot);
    }

    #[test]
    fn test_read_snapshot_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("neuron.csv");
        fs::write(&path, "1,0,0.5,0,0\n").unwrap();
        assert!(read_snapshot(&path).is_err());
        fs::write(&path, "1,0.5,0.5,0,0,0\n").unwrap();
        assert!(read_snapshot(&path).is_err());
    }

    #[test]
    fn test_series_and_raster() {
        let dir = tempdir().unwrap();
        let series_path = dir.path().join("V.csv");
        let mut series = SeriesWriter::create(&series_path).unwrap();
        series.write_row(&[0.0, 0.5]).unwrap();
        series.write_row(&[0.25, 1.0]).unwrap();
        series.flush().unwrap();
        assert_eq!(series.num_rows(), 2);
        assert_eq!(fs::read_to_string(&series_path).unwrap(), "0,0.5\n0.25,1\n");

        let raster_path = dir.path().join("raster.csv");
        let first = vec![1.5, 3.25];
        let second: Vec<f64> = vec![];
        let trains = vec![first.as_slice(), second.as_slice()];
        write_raster(&raster_path, &trains).unwrap();
        assert_eq!(fs::read_to_string(&raster_path).unwrap(), "1.5,3.25\n\n");
    }
}
