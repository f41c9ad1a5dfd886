//! CLI argument parsing and validation.

use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};

use district_locator::logger::VerbosityLevel;
use district_locator::normalize::DEFAULT_TOLERANCE;

/// Command line arguments for district-locator.
#[derive(Parser, Debug)]
#[command(name = "district-locator")]
#[command(version, about = "Build and query the US school district boundary store")]
pub struct Args {
    /// Only errors and final results.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Everything including debug details.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a district store from an NCES EDGE shapefile.
    Build {
        /// Path to the .shp geometry file.
        shp: PathBuf,

        /// Path to the .dbf attribute file (default: sibling of the .shp).
        #[arg(long)]
        dbf: Option<PathBuf>,

        /// Output store path.
        #[arg(short, long)]
        out: PathBuf,

        /// Simplification tolerance in degrees.
        #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
        tolerance: f64,
    },

    /// Look up the district containing a coordinate.
    Lookup {
        /// Path to a built store.
        #[arg(short, long)]
        store: PathBuf,

        /// Latitude, degrees north.
        lat: f64,

        /// Longitude, degrees east.
        lng: f64,

        /// Decoded-geometry cache capacity (0 disables the cache).
        #[arg(long, default_value_t = 32)]
        lru_capacity: usize,
    },

    /// Look up a file of "lat,lng" lines as one batch.
    Batch {
        /// Path to a built store.
        #[arg(short, long)]
        store: PathBuf,

        /// Input file with one "lat,lng" pair per line.
        file: PathBuf,

        /// Maximum accepted batch length.
        #[arg(long, default_value_t = 100)]
        batch_max: usize,

        /// Decoded-geometry cache capacity (0 disables the cache).
        #[arg(long, default_value_t = 32)]
        lru_capacity: usize,
    },

    /// Print store figures.
    Stats {
        /// Path to a built store.
        #[arg(short, long)]
        store: PathBuf,

        /// Also print district counts per state code.
        #[arg(long)]
        by_state: bool,
    },
}

/// Fully validated configuration object.
#[derive(Debug)]
pub enum Config {
    Build {
        shp: PathBuf,
        dbf: PathBuf,
        out: PathBuf,
        tolerance: f64,
    },
    Lookup {
        store: PathBuf,
        lat: f64,
        lng: f64,
        lru_capacity: usize,
    },
    Batch {
        store: PathBuf,
        file: PathBuf,
        batch_max: usize,
        lru_capacity: usize,
    },
    Stats {
        store: PathBuf,
        by_state: bool,
    },
}

impl Args {
    /// Verbosity level implied by the global flags.
    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    /// Validates arguments and converts them to a structured `Config`.
    pub fn validate(self) -> anyhow::Result<Config> {
        match self.command {
            Command::Build {
                shp,
                dbf,
                out,
                tolerance,
            } => {
                if tolerance <= 0.0 {
                    bail!("tolerance must be positive, got {}", tolerance);
                }
                let dbf = dbf.unwrap_or_else(|| shp.with_extension("dbf"));
                Ok(Config::Build {
                    shp,
                    dbf,
                    out,
                    tolerance,
                })
            }
            Command::Lookup {
                store,
                lat,
                lng,
                lru_capacity,
            } => Ok(Config::Lookup {
                store,
                lat,
                lng,
                lru_capacity,
            }),
            Command::Batch {
                store,
                file,
                batch_max,
                lru_capacity,
            } => {
                if batch_max == 0 {
                    bail!("batch-max must be at least 1");
                }
                Ok(Config::Batch {
                    store,
                    file,
                    batch_max,
                    lru_capacity,
                })
            }
            Command::Stats { store, by_state } => Ok(Config::Stats { store, by_state }),
        }
    }
}

/// Parse one "lat,lng" line from a batch input file.
pub fn parse_point(line: &str) -> anyhow::Result<(f64, f64)> {
    let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
    if parts.len() != 2 {
        bail!("expected \"lat,lng\", got: {}", line);
    }
    let lat: f64 = parts[0]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid latitude: {}", parts[0]))?;
    let lng: f64 = parts[1]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid longitude: {}", parts[1]))?;
    Ok((lat, lng))
}
