// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

#[macro_use]
extern crate log;

use anyhow::{bail, Context, Result};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use convref::{
    dataset,
    model::speedup_ns,
    report::dump_feature_map,
    Configuration, Pipeline, SampleSource,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_INPUT: &str = "dataset/img_0.txt";
const DEFAULT_GOLDEN: &str = "results/cpu_reference_output.txt";

fn main() -> Result<()> {
    // Parse the command line arguments.
    let input = Arg::with_name("input")
        .long("input")
        .takes_value(true)
        .default_value(DEFAULT_INPUT)
        .help("Sample grid to process; a synthetic image is used if it does not exist");
    let matches = App::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("config")
                .long("config")
                .takes_value(true)
                .global(true)
                .help("YAML or JSON run configuration"),
        )
        .arg(Arg::from_usage("-v... 'Increase the verbosity level'").global(true))
        .subcommand(
            SubCommand::with_name("golden")
                .about("Compute the golden value of one window")
                .arg(input.clone())
                .arg(
                    Arg::with_name("top")
                        .long("top")
                        .takes_value(true)
                        .default_value("0")
                        .help("Row of the window's top-left pixel"),
                )
                .arg(
                    Arg::with_name("left")
                        .long("left")
                        .takes_value(true)
                        .default_value("0")
                        .help("Column of the window's top-left pixel"),
                )
                .arg(
                    Arg::with_name("output")
                        .long("output")
                        .takes_value(true)
                        .default_value(DEFAULT_GOLDEN)
                        .help("Where to write the golden report"),
                ),
        )
        .subcommand(
            SubCommand::with_name("bench")
                .about("Benchmark the reference and compare against the accelerator model")
                .arg(input.clone())
                .arg(
                    Arg::with_name("json")
                        .long("json")
                        .help("Print a JSON summary instead of the console report"),
                )
                .arg(
                    Arg::with_name("dump")
                        .long("dump")
                        .takes_value(true)
                        .help("Write the convolution output as CSV"),
                ),
        )
        .subcommand(
            SubCommand::with_name("model")
                .about("Evaluate the accelerator latency model against a CPU time")
                .arg(
                    Arg::with_name("cpu-ms")
                        .long("cpu-ms")
                        .takes_value(true)
                        .required(true)
                        .help("Measured CPU latency of one full convolution in milliseconds"),
                ),
        )
        .subcommand(
            SubCommand::with_name("verify")
                .about("Co-verify the reference against the register-level device model")
                .arg(input),
        )
        .subcommand(
            SubCommand::with_name("dataset")
                .about("Generate synthetic sample grids and a labels file")
                .arg(
                    Arg::with_name("out")
                        .long("out")
                        .takes_value(true)
                        .required(true)
                        .help("Output directory"),
                )
                .arg(
                    Arg::with_name("count")
                        .long("count")
                        .takes_value(true)
                        .default_value("3")
                        .help("Number of grids"),
                )
                .arg(
                    Arg::with_name("seed")
                        .long("seed")
                        .takes_value(true)
                        .default_value("42")
                        .help("Seed of the first grid"),
                ),
        )
        .get_matches();

    // Configure the logger.
    let mut logger = pretty_env_logger::formatted_builder();
    logger.filter_level(match matches.occurrences_of("v") {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    });
    if let Ok(s) = std::env::var("RUST_LOG") {
        logger.parse_filters(&s);
    }
    logger.init();

    let config = match matches.value_of("config") {
        Some(path) => Configuration::parse(path)
            .with_context(|| format!("Failed to load configuration {}", path))?,
        None => Configuration::default(),
    };
    trace!("Configuration: {:?}", config);

    match matches.subcommand() {
        ("golden", Some(m)) => golden(config, m),
        ("bench", Some(m)) => bench(config, m),
        ("model", Some(m)) => model(config, m),
        ("verify", Some(m)) => verify(config, m),
        ("dataset", Some(m)) => generate_dataset(config, m),
        _ => unreachable!(),
    }
}

fn parse_arg<T>(matches: &ArgMatches, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = matches
        .value_of(name)
        .with_context(|| format!("Missing --{}", name))?;
    value
        .parse()
        .with_context(|| format!("Invalid value for --{}: {}", name, value))
}

/// Resolve the sample source once, before any processing.
fn pipeline(config: Configuration, matches: &ArgMatches) -> Result<Pipeline> {
    let source = SampleSource::detect(
        matches.value_of("input").map(Path::new),
        config.synthetic,
    );
    Ok(Pipeline::new(config, source)?)
}

fn golden(config: Configuration, matches: &ArgMatches) -> Result<()> {
    let top: usize = parse_arg(matches, "top")?;
    let left: usize = parse_arg(matches, "left")?;
    let output = PathBuf::from(matches.value_of("output").unwrap_or(DEFAULT_GOLDEN));
    let pipeline = pipeline(config, matches)?;
    let image = pipeline.load().context("Failed to load the sample input")?;
    let golden = pipeline
        .golden(&image, top, left)
        .with_context(|| format!("Failed to compute the window at ({}, {})", top, left))?;
    print!("{}", golden);
    golden
        .write(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Saved: {}", output.display());
    Ok(())
}

fn bench(config: Configuration, matches: &ArgMatches) -> Result<()> {
    let pipeline = pipeline(config, matches)?;
    let image = pipeline.load().context("Failed to load the sample input")?;
    let stages = pipeline.run(&image).context("Reference run failed")?;
    info!(
        "Conv {:?} -> ReLU -> pool {:?}",
        stages.convolved.dim(),
        stages.pooled.dim()
    );
    if let Some(path) = matches.value_of("dump") {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path))?;
        dump_feature_map(&stages.convolved, file)
            .with_context(|| format!("Failed to write {}", path))?;
        info!("Feature map written to {}", path);
    }
    let perf = pipeline.performance(&image).context("Benchmark failed")?;
    if matches.is_present("json") {
        println!("{}", serde_json::to_string_pretty(&pipeline.summary(&perf))?);
    } else {
        print!("{}", pipeline.report(&perf));
    }
    Ok(())
}

fn model(config: Configuration, matches: &ArgMatches) -> Result<()> {
    let cpu_ms: f64 = parse_arg(matches, "cpu-ms")?;
    let cpu_ns = cpu_ms * 1e6;
    if !(cpu_ns.is_finite() && cpu_ns > 0.0) {
        bail!("--cpu-ms must be a positive number, got {}", cpu_ms);
    }
    config.validate()?;
    let hw = &config.hardware;
    let estimate = hw.estimate(config.output_count())?;
    let sp = speedup_ns(cpu_ns, &estimate);
    println!(
        "Outputs:            {} ({}x{} image, {}x{} kernel)",
        estimate.outputs, config.image_size, config.image_size, config.kernel_size, config.kernel_size
    );
    println!(
        "Total cycles:       {} = {} + ({} - 1) x {}",
        estimate.total_cycles, hw.pipeline_latency, estimate.outputs, hw.initiation_interval
    );
    println!(
        "Accelerator time:   {:.6} ms ({:.3} us) at {} MHz",
        estimate.time_ms(),
        estimate.time_us(),
        hw.clock_mhz
    );
    println!("CPU time:           {:.6} ms", cpu_ms);
    println!("Latency speedup:    {:.2}x", sp.latency);
    println!("Throughput speedup: {:.2}x", sp.throughput);
    Ok(())
}

fn verify(config: Configuration, matches: &ArgMatches) -> Result<()> {
    let pipeline = pipeline(config, matches)?;
    let image = pipeline.load().context("Failed to load the sample input")?;
    let report = pipeline.verify(&image).context("Co-verification failed")?;
    for m in &report.mismatches {
        match m.golden {
            Some(g) => println!("({}, {}): golden {}, device {}", m.row, m.col, g, m.device),
            None => println!("({}, {}): golden overflowed, device {}", m.row, m.col, m.device),
        }
    }
    if !report.passed() {
        bail!(
            "{} of {} windows differ from the device model",
            report.mismatches.len(),
            report.windows
        );
    }
    println!("PASS: {} windows match the device model", report.windows);
    Ok(())
}

fn generate_dataset(config: Configuration, matches: &ArgMatches) -> Result<()> {
    let out = PathBuf::from(matches.value_of("out").unwrap_or("dataset"));
    let count: usize = parse_arg(matches, "count")?;
    let seed: u64 = parse_arg(matches, "seed")?;
    let written = dataset::generate(&out, count, config.image_size, seed)
        .with_context(|| format!("Failed to generate dataset in {}", out.display()))?;
    println!(
        "Wrote {} grids and {} to {}",
        written.len(),
        dataset::LABELS_FILE,
        out.display()
    );
    Ok(())
}
