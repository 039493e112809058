//! Contention-aware benchmarking driver
//!
//! Times a program's execution per problem instance while busy-work
//! processes pinned to the remaining CPU cores or GPUs keep the host
//! contended, emulating a loaded cluster node.

#![deny(missing_docs)]

use clap::{Parser, ValueEnum};
use loadbench::{
    affinity::{AffinityTool, MemBinding, SystemBinder},
    config::{Config, DeviceSet},
    problems::ProblemFeed,
    run::{self, OutputMode, RunStats},
};
use std::{
    error::Error,
    fs::File,
    io::{BufReader, BufWriter},
    path::PathBuf,
    process::ExitCode,
    time::Duration,
};

/// Benchmark a program under controlled CPU/GPU contention
///
/// The first CPU affinity specifier (or GPU index) is the timed job's
/// device; every following one gets a busy-work process for the duration of
/// each measurement.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// CPU affinity specifiers, one per job slot; each is a comma-separated
    /// list of CPU ids or id ranges, and its CPU count is the thread count
    /// communicated to that job
    #[clap(long = "cpu-affinity-list", num_args = 1.., required = true)]
    cpu_affinity_list: Vec<String>,

    /// GPU device indices; a non-empty list moves the job fan-out to the
    /// GPUs and requires a single CPU affinity specifier, shared by all jobs
    #[clap(long = "gpu-list", num_args = 1..)]
    gpu_list: Vec<u32>,

    /// Busy-work command filling otherwise idle devices; it should start
    /// fast and never terminate on its own (see the bundled `spin` binary)
    #[clap(long)]
    dummy_program: Option<String>,

    /// Command whose execution time is being measured; whatever it prints
    /// on stdout is the record for each problem
    #[clap(long)]
    timing_program: String,

    /// Name of the environment variable through which launched jobs are
    /// told their thread count
    #[clap(long)]
    nthreads_env_name: Option<String>,

    /// Seconds to sleep after launching each busy-work job
    #[clap(long, default_value = "10")]
    wait_time: u64,

    /// Command used to pin jobs to CPUs
    #[clap(long, value_enum, default_value = "numactl")]
    affinity_cmd: AffinityCmd,

    /// Whether jobs are also bound to node-local memory; 'auto' binds under
    /// numactl and not under taskset, which cannot bind memory
    #[clap(long, value_enum, default_value = "auto")]
    bind_mem: BindMem,

    /// File with one problem per non-blank, non-comment line; without it a
    /// single problem is timed with parameters taken from the trailing
    /// pass-through tokens
    #[clap(long, requires = "output_file")]
    input_file: Option<PathBuf>,

    /// File receiving one timing record per problem, in input order
    #[clap(long, requires = "input_file")]
    output_file: Option<PathBuf>,

    /// Flag (without the leading dashes) passing a problem line to the
    /// dummy and timing programs
    #[clap(long, default_value = "problem")]
    problem_flag: String,

    /// Declared problem argument names; when given, input lines are
    /// whitespace-tokenized and paired positionally with these names
    #[clap(long = "problem-args", num_args = 1.., requires = "input_file")]
    problem_args: Vec<String>,

    /// Tokens after `--`, forwarded verbatim to every launched program
    #[clap(last = true)]
    passthrough: Vec<String>,
}

/// CPU pinning command
#[derive(Clone, Copy, Debug, ValueEnum)]
enum AffinityCmd {
    /// numactl, preferred as it can also bind memory
    Numactl,

    /// taskset, CPU pinning only
    Taskset,
}
//
impl From<AffinityCmd> for AffinityTool {
    fn from(cmd: AffinityCmd) -> Self {
        match cmd {
            AffinityCmd::Numactl => AffinityTool::Numactl,
            AffinityCmd::Taskset => AffinityTool::Taskset,
        }
    }
}

/// Memory binding tristate
#[derive(Clone, Copy, Debug, ValueEnum)]
enum BindMem {
    /// Bind under numactl, don't under taskset
    Auto,

    /// Always bind
    True,

    /// Never bind
    False,
}
//
impl From<BindMem> for MemBinding {
    fn from(mem: BindMem) -> Self {
        match mem {
            BindMem::Auto => MemBinding::Auto,
            BindMem::True => MemBinding::Bind,
            BindMem::False => MemBinding::NoBind,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match try_main(args) {
        Ok(stats) => {
            log::info!(
                "Timed {} problem(s), launching {} busy-work process(es) along the way",
                stats.problems,
                stats.dummies
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Build the run configuration from the CLI and execute it
fn try_main(args: Args) -> Result<RunStats, Box<dyn Error>> {
    let binder = SystemBinder::detect(args.affinity_cmd.into(), args.bind_mem.into())?;
    let devices = DeviceSet::new(args.cpu_affinity_list, args.gpu_list)?;
    let config = Config::new(
        devices,
        args.dummy_program.as_deref(),
        &args.timing_program,
        args.nthreads_env_name,
        Duration::from_secs(args.wait_time),
        args.passthrough,
    )?;

    let Some(input_path) = &args.input_file else {
        // Single-problem entry point: output is not redirected
        return Ok(run::run(
            &config,
            &binder,
            ProblemFeed::single(),
            OutputMode::Inherit,
        )?);
    };
    let reader = BufReader::new(File::open(input_path)?);
    let feed = if args.problem_args.is_empty() {
        ProblemFeed::lines(reader, args.problem_flag)
    } else {
        ProblemFeed::rows(reader, args.problem_args)?
    };
    let output_path = args
        .output_file
        .as_ref()
        .ok_or("--output-file is required with --input-file")?;
    let mut writer = BufWriter::new(File::create(output_path)?);
    Ok(run::run(
        &config,
        &binder,
        feed,
        OutputMode::Capture(&mut writer),
    )?)
}
