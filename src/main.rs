use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use log;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use ifnet::config::SimulationConfig;
use ifnet::error::SimError;
use ifnet::io::{read_snapshot, write_bool_matrix, write_raster, write_snapshot, SeriesWriter};
use ifnet::spike_train::Polarity;

#[derive(Parser, Debug)]
#[command(version, about = "Simulate a conductance-based integrate-and-fire network")]
struct Args {
    /// The JSON configuration file
    #[arg(short, long)]
    config: PathBuf,
    /// The directory receiving V.csv, I.csv, raster.csv, neuron.csv and mat.csv
    #[arg(short, long)]
    output: PathBuf,
    /// The log file, defaults to ifnet.log in the output directory
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Restore the neuron states from a snapshot file before running
    #[arg(long)]
    restore: Option<PathBuf>,
    /// Also record the excitatory and inhibitory conductances (GE.csv and GI.csv)
    #[arg(long)]
    conductances: bool,
    /// Log the progress of every step
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(args: &Args) -> Result<(), SimError> {
    let log_path = args
        .log_file
        .clone()
        .unwrap_or_else(|| args.output.join("ifnet.log"));
    let level = match args.verbose {
        true => LevelFilter::Debug,
        false => LevelFilter::Info,
    };

    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{l} - {m}\n")))
        .build(log_path)
        .map_err(|e| SimError::IOError(e.to_string()))?;
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(">> {m}\n")))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(
            Root::builder()
                .appender("logfile")
                .appender("stdout")
                .build(level),
        )
        .map_err(|e| SimError::IOError(e.to_string()))?;

    log4rs::init_config(config).map_err(|e| SimError::IOError(e.to_string()))?;
    Ok(())
}

fn main() -> Result<(), SimError> {
    let args = Args::parse();
    fs::create_dir_all(&args.output)?;
    init_logging(&args)?;
    log::info!("{:?}", args);

    let start = Instant::now();
    let config = SimulationConfig::load_from(&args.config)?;
    let mut network = config.build()?;
    if let Some(path) = &args.restore {
        network.load_snapshot(&read_snapshot(path)?)?;
        log::info!("Neuron states restored from {}", path.display());
    }

    let mut potentials = SeriesWriter::create(args.output.join("V.csv"))?;
    let mut currents = SeriesWriter::create(args.output.join("I.csv"))?;
    let mut conductances = match args.conductances {
        true => Some((
            SeriesWriter::create(args.output.join("GE.csv"))?,
            SeriesWriter::create(args.output.join("GI.csv"))?,
        )),
        false => None,
    };

    let num_steps = config.num_steps();
    let mut next_report = 0;
    for k in 0..num_steps {
        let t = k as f64 * config.dt;
        network.advance(t, config.dt)?;

        potentials.write_row(&network.potentials())?;
        currents.write_row(&network.currents())?;
        if let Some((ge, gi)) = conductances.as_mut() {
            ge.write_row(&network.conductances(Polarity::Excitatory))?;
            gi.write_row(&network.conductances(Polarity::Inhibitory))?;
        }

        let progress = 100 * (k + 1) / num_steps;
        if progress >= next_report {
            log::info!("Processing ... {:3}%", progress);
            next_report = progress + 10;
        }
    }
    potentials.flush()?;
    currents.flush()?;
    if let Some((ge, gi)) = conductances.as_mut() {
        ge.flush()?;
        gi.flush()?;
    }

    write_snapshot(args.output.join("neuron.csv"), &network.snapshot())?;
    write_bool_matrix(
        args.output.join("mat.csv"),
        &network.connectivity().adjacency_matrix(),
    )?;
    write_raster(args.output.join("raster.csv"), &network.spike_trains())?;

    log::info!(
        "{} spikes in {} steps, it takes {:.2}s",
        network.num_spikes(),
        num_steps,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
