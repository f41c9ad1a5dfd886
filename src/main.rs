mod cli;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use district_locator::builder::{BuildOptions, StoreBuilder};
use district_locator::engine::{EngineConfig, LookupEngine, LookupResult};
use district_locator::logger::{self, Logger, VerbosityLevel};
use district_locator::reader::ShapefileReader;
use district_locator::store::DistrictStore;

use cli::{parse_point, Args, Config};

/// Entry point of the application.
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Orchestrates the global processing pipeline.
///
/// 1. Parses CLI arguments and validates configuration.
/// 2. Dispatches to the requested subcommand.
async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let verbosity = args.verbosity();
    Logger::init(verbosity);

    let show_progress = verbosity == VerbosityLevel::Normal;
    let config = args.validate()?;

    match config {
        Config::Build {
            shp,
            dbf,
            out,
            tolerance,
        } => build(&shp, &dbf, &out, tolerance, show_progress).await,
        Config::Lookup {
            store,
            lat,
            lng,
            lru_capacity,
        } => lookup(store, lat, lng, lru_capacity).await,
        Config::Batch {
            store,
            file,
            batch_max,
            lru_capacity,
        } => batch(store, &file, batch_max, lru_capacity).await,
        Config::Stats { store, by_state } => stats(&store, by_state).await,
    }
}

/// Run the offline build: stream the shapefile, normalize, write the store.
async fn build(
    shp: &Path,
    dbf: &Path,
    out: &Path,
    tolerance: f64,
    show_progress: bool,
) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut reader = ShapefileReader::open(shp, dbf).context("opening source shapefile")?;
    logger::info(&format!(
        "Source: {} ({} features)",
        reader.source_name(),
        reader.feature_count()
    ));

    let pb = if show_progress {
        let pb = ProgressBar::new(reader.feature_count() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap()
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let builder = StoreBuilder::new(out, BuildOptions { tolerance });
    let report = builder
        .build(&mut reader, |read| {
            if let Some(ref pb) = pb {
                pb.set_position(read);
            }
        })
        .await
        .context("building store")?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    logger::info(&format!(
        "Districts written: {} (of {} features, school year {})",
        report.districts_written, report.features_read, report.school_year
    ));
    if report.skipped_non_polygon > 0 {
        logger::info(&format!(
            "Skipped {} non-polygon shapes",
            report.skipped_non_polygon
        ));
    }
    if report.skipped_missing_geoid > 0 {
        logger::info(&format!(
            "Skipped {} records without a GEOID",
            report.skipped_missing_geoid
        ));
    }
    if report.rejected_invalid_geometry > 0 {
        logger::info(&format!(
            "Rejected {} districts with invalid geometry",
            report.rejected_invalid_geometry
        ));
    }
    logger::info(&format!("Total time: {:.2?}", start.elapsed()));
    logger::success(&out.display().to_string());
    Ok(())
}

/// Resolve a single coordinate against a built store.
async fn lookup(store: PathBuf, lat: f64, lng: f64, lru_capacity: usize) -> anyhow::Result<()> {
    let engine = LookupEngine::open(EngineConfig {
        store_path: store,
        lru_capacity,
        batch_max: 100,
    })
    .await?;

    let result = engine.lookup(lat, lng).await?;
    print_result(lat, lng, &result);

    engine.shutdown().await;
    Ok(())
}

/// Resolve a file of coordinates as one batch.
async fn batch(
    store: PathBuf,
    file: &Path,
    batch_max: usize,
    lru_capacity: usize,
) -> anyhow::Result<()> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let points = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_point)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let engine = LookupEngine::open(EngineConfig {
        store_path: store,
        lru_capacity,
        batch_max,
    })
    .await?;

    let results = engine.lookup_batch(&points).await?;
    for ((lat, lng), result) in points.iter().zip(&results) {
        match result {
            Ok(result) => print_result(*lat, *lng, result),
            Err(e) => logger::error(&format!("({}, {}): {}", lat, lng, e)),
        }
    }

    engine.shutdown().await;
    Ok(())
}

/// Print store-level figures, optionally broken down per state.
async fn stats(store: &Path, by_state: bool) -> anyhow::Result<()> {
    let store = DistrictStore::open(store).await?;
    let stats = store.stats();

    logger::success(&format!(
        "{} districts | school year {} | tolerance {} deg",
        stats.total_districts, stats.school_year, stats.tolerance
    ));

    if by_state {
        for (state_code, count) in store.state_counts().await? {
            logger::success(&format!("  {}  {}", state_code, count));
        }
    }

    store.close().await;
    Ok(())
}

fn print_result(lat: f64, lng: f64, result: &LookupResult) {
    match result {
        LookupResult::Exact(district) => logger::success(&format!(
            "({}, {}) -> {} [{}] | state {} | grades {} | {:.1} sq mi | {}",
            lat,
            lng,
            district.name,
            district.district_id,
            district.state_code,
            district.grade_range,
            district.area_sq_miles,
            district.school_year
        )),
        LookupResult::Approximate {
            district,
            distance_meters,
        } => logger::success(&format!(
            "({}, {}) -> {} [{}] | nearest, {} m away | state {} | grades {}",
            lat,
            lng,
            district.name,
            district.district_id,
            distance_meters,
            district.state_code,
            district.grade_range
        )),
        LookupResult::NotFound => {
            logger::success(&format!("({}, {}) -> no district found", lat, lng))
        }
    }
}
