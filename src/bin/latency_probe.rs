//! Latency curve over a range of region sizes.
//!
//! Sweeps powers of two from `--min` to `--max`, then goes back and fills in sizes wherever
//! latency jumps by more than the threshold between neighbours. Prints `size,value` CSV sorted by
//! size, with the value in cycles (or nanoseconds with `-t`).

use chase_latency_rs::bench::{self, Setup};
use chase_latency_rs::chain::Pattern;
use chase_latency_rs::clock::Calibration;
use chase_latency_rs::config::{DEFAULT_CACHELINE, RunParams, UNROLL};
use chase_latency_rs::region::{self, PageKind};
use chase_latency_rs::sweep::Sweep;
use chase_latency_rs::{Error, parse_size};
use clap::Parser;
use log::{error, info};
use std::io::{self, Write};
use std::process::ExitCode;

// use faster/smaller `mimalloc` allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "latency_probe", about = "Load latency for a range of working set sizes")]
struct Args {
    /// CPU to allocate memory on
    #[arg(short = 'a', value_name = "CPU")]
    alloc_cpu: Option<usize>,

    /// CPU to run on
    #[arg(short = 'c', value_name = "CPU")]
    run_cpu: Option<usize>,

    /// Use large pages
    #[arg(short = 'l')]
    largepage: bool,

    /// Report latency as time (default processor cycles)
    #[arg(short = 't')]
    report_time: bool,

    /// Smallest size measured
    #[arg(long, default_value = "1k", value_parser = parse_size)]
    min: usize,

    /// Largest size measured
    #[arg(long, default_value = "256m", value_parser = parse_size)]
    max: usize,

    /// Relative latency change between neighbours that triggers a new sample
    #[arg(long, default_value_t = 0.1)]
    threshold: f64,

    /// Refinement rounds after the power-of-two pass
    #[arg(long, default_value_t = 20)]
    rounds: usize,

    /// Processor frequency, instead of detecting it
    #[arg(long, value_name = "MHZ")]
    cpu_mhz: Option<f64>,
}

fn run(args: &Args) -> Result<(), Error> {
    let pages = if args.largepage { PageKind::Huge } else { PageKind::Small };
    let page_size = region::page_size_for(pages)?;
    let calibration = Calibration::detect(args.cpu_mhz);
    let setup = Setup {
        pages,
        alloc_cpu: args.alloc_cpu,
        run_cpu: args.run_cpu,
        verbose: false,
        multiplier: calibration.multiplier,
    };

    let sweep = Sweep {
        min: args.min,
        max: args.max,
        threshold: args.threshold,
        rounds: args.rounds,
        granule: usize::max(1024, UNROLL * DEFAULT_CACHELINE),
    };

    let samples = sweep.run(|size| {
        let params = RunParams::new(size, None, Pattern::Random, page_size);
        let m = bench::measure(&params, &setup)?;
        info!("{} -> {:.2} cycles {:.2} ns", size, m.cycles_per_access, m.ns_per_access);
        Ok(if args.report_time { m.ns_per_access } else { m.cycles_per_access })
    })?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (size, value) in samples {
        writeln!(out, "{size},{value:.2}")?;
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Chain(e)) => {
            error!("{e}: slot/stride arithmetic disagrees with the region, aborting");
            std::process::abort();
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
