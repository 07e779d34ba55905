//! Trickle - continuous conjunctive queries over N-Triples/N-Quads streams
//!
//! Registers one query, streams tuples through the engine and prints every solution
//! as a JSON line on stdout.
//!
//! Usage:
//!   trickle --query query.rq --input data/sensors.nt --ttl 60
//!   cat data/sensors.nt | trickle --query query.rq --strategy caching

use clap::Parser;
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use trickle::parsing::{parse_query, parse_rdf_line};
use trickle::{Engine, EngineConfig, JoinStrategy};

#[derive(Parser, Debug)]
#[command(name = "trickle")]
#[command(about = "Trickle - Continuous conjunctive queries over N-Triples/N-Quads streams")]
struct Args {
    /// File containing the query (SELECT, ASK or CONSTRUCT over basic graph patterns)
    #[arg(short, long)]
    query: PathBuf,

    /// Input file (N-Triples or N-Quads); reads stdin when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Time-to-live of every input tuple in seconds (0 = never expires)
    #[arg(short, long, default_value = "0")]
    ttl: u64,

    /// Time-to-live of the query in seconds (0 = never expires)
    #[arg(long, default_value = "0")]
    query_ttl: u64,

    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Join strategy: symmetric or caching (overrides the configuration file)
    #[arg(short, long)]
    strategy: Option<String>,

    /// Also log engine activity (registrations, evictions) to stderr
    #[arg(short, long)]
    verbose: bool,
}

/// Writes engine log records to stderr.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    log::set_logger(&LOGGER).map_err(|err| err.to_string())?;
    log::set_max_level(if args.verbose { LevelFilter::Debug } else { LevelFilter::Warn });

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(strategy) = &args.strategy {
        config.join_strategy = match strategy.to_lowercase().as_str() {
            "symmetric" | "symmetric_hash_join" => JoinStrategy::SymmetricHashJoin,
            "caching" => JoinStrategy::Caching,
            _ => {
                eprintln!("Error: Unknown join strategy: {}", strategy);
                eprintln!("Valid options: symmetric, caching");
                std::process::exit(1);
            }
        };
    }

    let query_text = fs::read_to_string(&args.query)?;
    let query = parse_query(&query_text)?;
    let engine = Engine::new(config)?;

    let delivered = Arc::new(AtomicU64::new(0));
    let delivered_clone = Arc::clone(&delivered);
    let subscription = engine.register(query, args.query_ttl, move |solution| {
        match serde_json::to_string(&solution) {
            Ok(line) => println!("{}", line),
            Err(err) => eprintln!("Error: could not serialize solution: {}", err),
        }
        delivered_clone.fetch_add(1, Ordering::Relaxed);
    })?;

    let should_stop = Arc::new(AtomicBool::new(false));
    let should_stop_clone = Arc::clone(&should_stop);
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, stopping...");
        should_stop_clone.store(true, Ordering::Relaxed);
    })?;

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let start = Instant::now();
    let mut lines_read: u64 = 0;
    let mut tuples_added: u64 = 0;
    let mut malformed: u64 = 0;

    for line in reader.lines() {
        if should_stop.load(Ordering::Relaxed) {
            break;
        }
        let line = line?;
        lines_read += 1;
        match parse_rdf_line(&line) {
            Ok(Some(tuple)) => {
                engine.add(&tuple, args.ttl);
                tuples_added += 1;
            }
            Ok(None) => {}
            Err(err) => {
                malformed += 1;
                eprintln!("Skipping line {}: {}", lines_read, err);
            }
        }
        // LIMIT and ASK queries unregister themselves once satisfied
        if !subscription.is_active() {
            break;
        }
    }
    engine.shutdown();

    let elapsed = start.elapsed().as_secs_f64();
    eprintln!();
    eprintln!("Lines read:       {}", lines_read);
    eprintln!("Tuples added:     {}", tuples_added);
    eprintln!("Malformed lines:  {}", malformed);
    eprintln!("Solutions:        {}", delivered.load(Ordering::Relaxed));
    eprintln!("Partials stored:  {}", engine.partial_count());
    eprintln!("Elapsed time:     {:.2}s", elapsed);
    if elapsed > 0.0 {
        eprintln!("Throughput:       {:.1} tuples/sec", tuples_added as f64 / elapsed);
    }

    Ok(())
}
