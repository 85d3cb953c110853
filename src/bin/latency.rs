//! Memory Latency Measurement via Pointer Chasing
//!
//! Builds a chain of links through a region of each requested size and reports the average cost
//! of one load, in processor cycles and nanoseconds. By default the links are scattered with an
//! LFSR to defeat stride prefetchers; `-T` walks one link per page to stress the TLB and `-S`
//! walks them in order as a best-case reference.

use chase_latency_rs::bench::{self, Setup};
use chase_latency_rs::chain::Pattern;
use chase_latency_rs::clock::Calibration;
use chase_latency_rs::config::{DEFAULT_CACHELINE, RunParams, default_stride};
use chase_latency_rs::region::{self, PageKind};
use chase_latency_rs::report::{CSV_HEADER, OutputFormat};
use chase_latency_rs::{Error, affinity, parse_size};
use clap::Parser;
use log::error;
use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

// use faster/smaller `mimalloc` allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "latency", about = "Measure memory load latency by pointer chasing")]
struct Args {
    /// CPU to allocate memory on
    #[arg(short = 'a', value_name = "CPU")]
    alloc_cpu: Option<usize>,

    /// CPU to run on
    #[arg(short = 'c', value_name = "CPU")]
    run_cpu: Option<usize>,

    /// Output in CSV format
    #[arg(short = 'C')]
    csv: bool,

    /// Use large pages
    #[arg(short = 'l')]
    largepage: bool,

    /// Minimum time in seconds to run for
    #[arg(short = 't', value_name = "SECONDS", default_value_t = 1)]
    time: u64,

    /// TLB test
    #[arg(short = 'T', conflicts_with = "sequential")]
    tlb: bool,

    /// Sequential test
    #[arg(short = 'S')]
    sequential: bool,

    /// Stride size (accepts k/m/g suffixes)
    #[arg(short = 's', value_name = "STRIDE", value_parser = parse_size)]
    stride: Option<usize>,

    /// Touch end of cachelines
    #[arg(short = 'e')]
    end_of_line: bool,

    /// Print physical addresses of the region and progress
    #[arg(short = 'v')]
    verbose: bool,

    /// Cache line size used by the TLB test and the default stride
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_CACHELINE, value_parser = parse_size)]
    cacheline: usize,

    /// Processor frequency, instead of detecting it
    #[arg(long, value_name = "MHZ")]
    cpu_mhz: Option<f64>,

    /// Run the benchmark thread at maximum priority
    #[arg(long)]
    max_priority: bool,

    /// Region sizes to measure (accepts k/m/g suffixes)
    #[arg(required = true, value_name = "SIZE", value_parser = parse_size)]
    sizes: Vec<usize>,
}

impl Args {
    fn pattern(&self) -> Pattern {
        if self.tlb {
            Pattern::Tlb
        } else if self.sequential {
            Pattern::Sequential
        } else {
            Pattern::Random
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(args: &Args) -> Result<(), Error> {
    let pages = if args.largepage { PageKind::Huge } else { PageKind::Small };
    let page_size = region::page_size_for(pages)?;
    let calibration = Calibration::detect(args.cpu_mhz);
    let format = if args.csv { OutputFormat::Csv } else { OutputFormat::Human };

    if args.max_priority {
        affinity::raise_priority();
    }

    let setup = Setup {
        pages,
        alloc_cpu: args.alloc_cpu,
        run_cpu: args.run_cpu,
        verbose: args.verbose,
        multiplier: calibration.multiplier,
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if format == OutputFormat::Csv {
        writeln!(out, "{CSV_HEADER}")?;
    }

    // Stride is picked once, from the first size, and reused for the rest
    let pattern = args.pattern();
    let mut chosen_stride = args.stride;
    for &size in &args.sizes {
        let stride = *chosen_stride
            .get_or_insert_with(|| default_stride(pattern, size, page_size, args.cacheline));
        let params = RunParams {
            size,
            stride,
            pattern,
            duration: Duration::from_secs(args.time),
            end_of_line: args.end_of_line,
            cacheline: args.cacheline,
        };

        let measurement = bench::measure(&params, &setup)?;
        measurement.write_to(&mut out, format)?;
        out.flush()?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

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
