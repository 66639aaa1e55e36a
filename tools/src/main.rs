//! ubo-runner: headless driver for the ownership engine.
//!
//! Builds the fan-out scenario (investors -> fund of funds -> master pool ->
//! SPVs), computes look-through exposure for every investor and prints a
//! summary.
//!
//! Usage:
//!   ubo-runner --seed 42 --investors 1000 --spvs 200 --db run.db
//!   ubo-runner --fof-policy ALWAYS --json

use anyhow::Result;
use chrono::NaiveDate;
use std::{env, time::Instant};
use ubo_core::{
    config::EngineConfig,
    engine::OwnershipEngine,
    role_profile::LookthroughPolicy,
    scenario::{build_fan_out, FanOutSpec},
};

#[derive(serde::Serialize)]
struct RunSummary {
    seed: u64,
    as_of: NaiveDate,
    fof_policy: LookthroughPolicy,
    investors: usize,
    spvs: usize,
    exposure_queries: usize,
    max_slices_per_investor: usize,
    total_slices: usize,
    truncated_results: usize,
    incomplete_results: usize,
    cache_hits: u64,
    cache_misses: u64,
    elapsed_ms: u128,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let investors = parse_arg(&args, "--investors", 1_000usize);
    let spvs = parse_arg(&args, "--spvs", 200usize);
    let json = args.iter().any(|a| a == "--json");
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let data_dir = string_arg(&args, "--data-dir").unwrap_or("./data");
    let as_of = match string_arg(&args, "--as-of") {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|e| anyhow::anyhow!("Invalid --as-of '{s}': {e}"))?,
        None => chrono::Utc::now().date_naive(),
    };
    let fof_policy: LookthroughPolicy = match string_arg(&args, "--fof-policy") {
        Some(s) => s.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        None => LookthroughPolicy::None,
    };

    let config = match EngineConfig::load(data_dir) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{e}; using built-in defaults");
            EngineConfig::default()
        }
    };

    if !json {
        println!("ubo-runner");
        println!("  seed:        {seed}");
        println!("  investors:   {investors}");
        println!("  spvs:        {spvs}");
        println!("  fof policy:  {fof_policy}");
        println!("  as_of:       {as_of}");
        println!("  db:          {db}");
        println!("  data_dir:    {data_dir}");
        println!();
    }

    let engine = if db == ":memory:" {
        OwnershipEngine::build_test_with(config)?
    } else {
        OwnershipEngine::build(db, config)?
    };

    let spec = FanOutSpec::new(as_of)
        .with_seed(seed)
        .with_size(investors, spvs)
        .with_fof_policy(fof_policy);
    let fan_out = build_fan_out(&engine, &spec)?;

    let started = Instant::now();
    let mut max_slices = 0;
    let mut total_slices = 0;
    let mut truncated = 0;
    let mut incomplete = 0;
    for investor in &fan_out.investors {
        let result = engine.compute_exposure(investor, as_of)?;
        max_slices = max_slices.max(result.slices.len());
        total_slices += result.slices.len();
        if result.truncated {
            truncated += 1;
        }
        if !result.outcome.is_complete() {
            incomplete += 1;
        }
    }
    // Second pass is served from the cache.
    for investor in &fan_out.investors {
        engine.compute_exposure(investor, as_of)?;
    }
    let stats = engine.cache().stats();

    let summary = RunSummary {
        seed,
        as_of,
        fof_policy,
        investors: fan_out.investors.len(),
        spvs: fan_out.spvs.len(),
        exposure_queries: fan_out.investors.len() * 2,
        max_slices_per_investor: max_slices,
        total_slices,
        truncated_results: truncated,
        incomplete_results: incomplete,
        cache_hits: stats.hits,
        cache_misses: stats.misses,
        elapsed_ms: started.elapsed().as_millis(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(s: &RunSummary) {
    println!("=== EXPOSURE SUMMARY ===");
    println!("  queries:            {}", s.exposure_queries);
    println!("  max slices/query:   {}", s.max_slices_per_investor);
    println!("  total slices:       {}", s.total_slices);
    println!("  truncated results:  {}", s.truncated_results);
    println!("  incomplete results: {}", s.incomplete_results);
    println!("  cache hits/misses:  {}/{}", s.cache_hits, s.cache_misses);
    println!("  elapsed:            {} ms", s.elapsed_ms);
    println!(
        "  naive cartesian:    {} rows avoided",
        s.investors * s.spvs
    );
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
