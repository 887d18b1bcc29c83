//! CLI for the metrix metrics store.
//!
//! Provides commands for simulating collection cycles, testing selectors
//! against label sets, and inspecting store configuration.

use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use metrix::{CollectorStore, Labels, ReadOptions, StoreConfig, parse, with_description};
use tracing_subscriber::EnvFilter;

/// metrix: cycle-consistent in-process metrics store CLI.
#[derive(Parser)]
#[command(name = "metrix", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Run collection cycles with concurrent writers and print the result.
    Simulate {
        /// Number of collection cycles to run.
        #[arg(long, default_value = "10")]
        cycles: u64,

        /// Number of concurrent writer threads per cycle.
        #[arg(long, default_value = "4")]
        writers: u32,

        /// Series written by each writer.
        #[arg(long, default_value = "8")]
        series: u32,

        /// Fail every Nth cycle (0 = never).
        #[arg(long, default_value = "0")]
        fail_every: u64,

        /// Skip series whose index is divisible by N in odd cycles (0 = never).
        #[arg(long, default_value = "0")]
        dropout: u32,

        /// Selector applied to the final read.
        #[arg(long, default_value = "sim.*")]
        selector: String,

        /// Read every retained series instead of the latest cycle only.
        #[arg(long)]
        raw: bool,

        /// Store configuration file (JSON).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Evaluate a selector against a metric name and labels.
    Select {
        /// Selector expression, e.g. `up{job="api",instance=*"10.*"}`.
        selector: String,

        /// Metric name to test.
        metric: String,

        /// Labels as `key=value` pairs.
        labels: Vec<String>,
    },

    /// Print the effective store configuration as JSON.
    Config {
        /// Configuration file to validate and print. Defaults are printed when omitted.
        path: Option<PathBuf>,
    },
}

/// Output format for read results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with series and store stats.
    Json,
}

/// Shape of a simulation run.
struct Simulation {
    cycles: u64,
    writers: u32,
    series: u32,
    fail_every: u64,
    dropout: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            cycles,
            writers,
            series,
            fail_every,
            dropout,
            selector,
            raw,
            config,
            format,
        } => {
            let sim = Simulation {
                cycles,
                writers,
                series,
                fail_every,
                dropout,
            };
            cmd_simulate(&sim, &selector, raw, config.as_ref(), &format)
        }
        Commands::Select {
            selector,
            metric,
            labels,
        } => cmd_select(&selector, &metric, &labels),
        Commands::Config { path } => cmd_config(path.as_ref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<StoreConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(StoreConfig::load(path)?),
        None => Ok(StoreConfig::default()),
    }
}

/// Implements `metrix simulate`.
#[allow(clippy::cast_precision_loss)] // Simulated values are display-only
fn cmd_simulate(
    sim: &Simulation,
    selector: &str,
    raw: bool,
    config: Option<&PathBuf>,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let selector = parse(selector)?;
    let store = CollectorStore::with_config(load_config(config)?)?;
    let cc = store.cycle_controller();

    let meter = store.write().snapshot_meter("sim");
    let load =
        meter.gauge_vec("load", &["writer", "series"], &[with_description("Simulated load")])?;
    let ticks = store
        .write()
        .stateful_meter("sim")
        .counter_vec("ticks_total", &["writer"], &[with_description("Writes per writer")])?;

    let start = Instant::now();
    let mut failed = 0_u64;

    for cycle in 1..=sim.cycles {
        cc.begin_cycle()?;

        let written = thread::scope(|s| -> Result<(), Box<dyn std::error::Error>> {
            let handles: Vec<_> = (0..sim.writers)
                .map(|w| {
                    let load = &load;
                    let ticks = &ticks;
                    s.spawn(move || -> metrix::Result<()> {
                        let writer = w.to_string();
                        let ticks = ticks.with_label_values(&[writer.as_str()])?;
                        for i in 0..sim.series {
                            if sim.dropout > 0 && cycle % 2 == 1 && i % sim.dropout == 0 {
                                continue;
                            }
                            let series = i.to_string();
                            load.with_label_values(&[writer.as_str(), series.as_str()])?
                                .observe(cycle as f64 * 10.0 + f64::from(i));
                            ticks.add(1.0);
                        }
                        Ok(())
                    })
                })
                .collect();

            for handle in handles {
                handle.join().map_err(|_| "writer thread panicked")??;
            }
            Ok(())
        });
        if let Err(e) = written {
            cc.commit_cycle_failure()?;
            return Err(e);
        }

        if sim.fail_every > 0 && cycle % sim.fail_every == 0 {
            cc.commit_cycle_failure()?;
            failed += 1;
            tracing::info!(cycle, "simulated collection failure");
        } else {
            cc.commit_cycle_success()?;
        }
    }

    let elapsed = start.elapsed();
    tracing::info!(cycles = sim.cycles, failed, elapsed = ?elapsed, "simulation finished");

    let opts = if raw { ReadOptions::raw() } else { ReadOptions::filtered() };
    let reader = store.read(opts);
    let mut rows = Vec::new();
    reader.for_each_series(|s| {
        if selector.matches(s.metric, s.labels) {
            rows.push((s.identity(), s.value, s.delta, s.meta.kind, s.cycle));
        }
    });
    let stats = store.stats();

    match format {
        OutputFormat::Csv => {
            println!("# selector={selector}, raw={raw}, series={}", rows.len());
            println!("id,hash64,kind,value,delta,cycle");
            for (identity, value, delta, kind, cycle) in &rows {
                let delta = delta.map(|d| d.to_string()).unwrap_or_default();
                println!(
                    "{},{:016x},{kind},{value},{delta},{}",
                    identity.id,
                    identity.hash64,
                    cycle.get()
                );
            }
            println!();
            println!("# {}", serde_json::to_string(&stats)?);
        }
        OutputFormat::Json => {
            let series: Vec<serde_json::Value> = rows
                .iter()
                .map(|(identity, value, delta, kind, cycle)| {
                    serde_json::json!({
                        "id": identity.id,
                        "hash64": identity.hash64,
                        "kind": kind,
                        "value": value,
                        "delta": delta,
                        "cycle": cycle,
                    })
                })
                .collect();

            let output = serde_json::json!({
                "selector": selector.to_string(),
                "raw": raw,
                "count": series.len(),
                "series": series,
                "stats": stats,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `metrix select <selector> <metric> [k=v ...]`.
fn cmd_select(
    selector: &str,
    metric: &str,
    pairs: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let sel = match parse(selector) {
        Ok(sel) => sel,
        Err(e) => {
            eprintln!("{selector}");
            eprintln!("{}^", " ".repeat(e.offset));
            return Err(e.into());
        }
    };

    let mut labels = Labels::new();
    for pair in pairs {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| format!("Invalid label '{pair}': expected key=value"))?;
        labels.insert(k.to_string(), v.to_string());
    }

    let matched = sel.matches(metric, &labels);
    println!("{sel}");
    println!("{}", if matched { "match" } else { "no match" });

    if !matched {
        std::process::exit(2);
    }
    Ok(())
}

/// Implements `metrix config [path]`.
fn cmd_config(path: Option<&PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
