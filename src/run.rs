//! Process supervision and the per-problem orchestration protocol

use crate::{
    affinity::{Affinity, ResourceBinder},
    config::{Config, ConfigError, Device},
    jobs::{JobRole, JobSpec},
    problems::{FeedError, ProblemFeed},
};
use std::{
    io::{self, Write},
    process::{Child, Command, ExitStatus, Stdio},
};
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use thiserror::Error;

/// Where the timed job's standard output goes
pub enum OutputMode<'out> {
    /// Inherit the orchestrator's stdout (single-problem entry point)
    Inherit,

    /// Capture stdout and append it as one record per problem
    Capture(&'out mut dyn Write),
}

/// Tallies reported once a run completes
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    /// Problems timed
    pub problems: usize,

    /// Busy-work processes launched over the whole run
    pub dummies: usize,
}

/// Time every problem from `feed` under contention from busy-work jobs
///
/// Per problem, one busy-work job is launched per tail device of the active
/// list with a configured pause after each launch, then the timed job runs
/// to completion on the head device, its output is recorded, and every
/// busy-work process is sent a termination signal before the next problem
/// starts. Exit statuses of signaled processes are collected before the run
/// returns, so no busy-work entry lingers in the OS process table. Binding
/// resolution happens upfront so configuration errors are reported before
/// anything is launched.
pub fn run(
    config: &Config,
    binder: &dyn ResourceBinder,
    feed: ProblemFeed,
    mut output: OutputMode<'_>,
) -> Result<RunStats, RunError> {
    let (timing_device, dummy_devices) = resolve_devices(config, binder)?;
    let mem_prefix = binder.mem_binding_prefix();
    let nthreads_env = config.nthreads_env.as_deref();

    let mut stats = RunStats::default();
    let mut pool = DummyPool::new();
    for problem in feed {
        let problem = problem?;

        // Busy-work first, staggered so each process reaches steady
        // contention before the next one starts and before the timed job
        if let Some(dummy_program) = &config.dummy_program {
            for device in &dummy_devices {
                let spec = JobSpec::assemble(
                    JobRole::Dummy,
                    dummy_program,
                    &device.affinity,
                    &mem_prefix,
                    &problem,
                    &config.passthrough,
                    device.gpu,
                    nthreads_env,
                );
                pool.launch(&spec)?;
                stats.dummies += 1;
                std::thread::sleep(config.launch_delay);
            }
        }

        let spec = JobSpec::assemble(
            JobRole::Timing,
            &config.timing_program,
            &timing_device.affinity,
            &mem_prefix,
            &problem,
            &config.passthrough,
            timing_device.gpu,
            nthreads_env,
        );
        log::info!(
            "Timing problem #{} with {} busy-work job(s)",
            stats.problems + 1,
            pool.len()
        );
        let status = run_timing(&spec, &mut output)?;
        if !status.success() {
            // Recorded anyway, but a failed timing run should be visible
            log::warn!("Timing job exited with {status}, recording its output anyway");
        }
        pool.terminate();
        stats.problems += 1;
    }
    pool.drain();
    Ok(stats)
}

/// Error while orchestrating a run
#[derive(Debug, Error)]
pub enum RunError {
    /// Invalid configuration, reported before any launch
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Bad problem input
    #[error("bad problem input ({0})")]
    Feed(#[from] FeedError),

    /// OS refused to start a process
    #[error("failed to launch {role} job '{program}' ({source})")]
    Launch {
        /// Role of the job that could not start
        role: JobRole,
        /// Executable that could not be launched
        program: String,
        /// Underlying OS error
        source: io::Error,
    },

    /// Failed to await the timing process
    #[error("failed to await timing job ({0})")]
    Wait(io::Error),

    /// Failed to write the timing record
    #[error("failed to write timing output ({0})")]
    Output(io::Error),
}

/// Device slot with its binding resolved
struct BoundDevice {
    affinity: Affinity,
    gpu: Option<u32>,
}

/// Resolve every device slot's binding before any process is launched
fn resolve_devices(
    config: &Config,
    binder: &dyn ResourceBinder,
) -> Result<(BoundDevice, Vec<BoundDevice>), ConfigError> {
    let bind = |device: Device<'_>| -> Result<BoundDevice, ConfigError> {
        Ok(BoundDevice {
            affinity: binder.resolve_affinity(device.cpu)?,
            gpu: device.gpu,
        })
    };
    let timing = bind(config.devices.timing())?;
    let dummies = config
        .devices
        .dummies()
        .map(bind)
        .collect::<Result<Vec<_>, _>>()?;

    // Every affinity group must name the same number of CPUs, otherwise the
    // advertised thread count would lie to some of the jobs
    for dummy in &dummies {
        if dummy.affinity.threads != timing.affinity.threads {
            return Err(ConfigError::UnevenThreadCount(
                timing.affinity.threads,
                dummy.affinity.threads,
            ));
        }
    }
    Ok((timing, dummies))
}

/// Run the timing job to completion, recording its stdout as one record
fn run_timing(spec: &JobSpec, output: &mut OutputMode<'_>) -> Result<ExitStatus, RunError> {
    let mut command = command_for(spec);
    match output {
        OutputMode::Inherit => {
            command.stdout(Stdio::inherit());
            let mut child = command
                .spawn()
                .map_err(|source| launch_error(spec, source))?;
            child.wait().map_err(RunError::Wait)
        }
        OutputMode::Capture(writer) => {
            command.stdout(Stdio::piped());
            let child = command
                .spawn()
                .map_err(|source| launch_error(spec, source))?;
            let captured = child.wait_with_output().map_err(RunError::Wait)?;
            writer.write_all(&captured.stdout).map_err(RunError::Output)?;
            if !captured.stdout.ends_with(b"\n") {
                // Keep the one-record-per-problem contract even for programs
                // that do not terminate their output
                writer.write_all(b"\n").map_err(RunError::Output)?;
            }
            writer.flush().map_err(RunError::Output)?;
            Ok(captured.status)
        }
    }
}

/// Map a JobSpec onto an OS process invocation
///
/// The full environment is forwarded, overlaid with the spec's derived
/// variables. Standard streams are left inherited; the caller decides what
/// to redirect, and in particular the timed job keeps the orchestrator's
/// stdin.
fn command_for(spec: &JobSpec) -> Command {
    let mut command = Command::new(spec.program());
    command.args(spec.args());
    for (name, value) in spec.env() {
        command.env(name, value);
    }
    command
}

/// Build the launch-failure report for one spec
fn launch_error(spec: &JobSpec, source: io::Error) -> RunError {
    RunError::Launch {
        role: spec.role(),
        program: spec.program().to_owned(),
        source,
    }
}

/// Owned set of busy-work processes launched over one run
///
/// Live handles are populated as busy-work launches and all signaled by
/// `terminate()` at the end of each problem iteration. Signaled handles are
/// kept until their exit status has been collected, so a terminated process
/// does not linger in the OS process table as a zombie: `terminate()` reaps
/// the already-dead non-blockingly, and `drain()` awaits the rest when the
/// run ends. Draining also runs on drop, so busy-work launched before a
/// failed timing launch is still torn down.
struct DummyPool {
    live: Vec<Child>,
    signaled: Vec<Child>,
}
//
impl DummyPool {
    /// Start with no live processes
    fn new() -> Self {
        Self {
            live: Vec::new(),
            signaled: Vec::new(),
        }
    }

    /// Launch one busy-work process and record its handle
    ///
    /// Non-blocking: the process keeps running until `terminate()`. All of
    /// its standard streams are redirected to the null device.
    fn launch(&mut self, spec: &JobSpec) -> Result<(), RunError> {
        let mut command = command_for(spec);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = command
            .spawn()
            .map_err(|source| launch_error(spec, source))?;
        log::info!(
            "Launched busy-work process {} ('{}')",
            child.id(),
            spec.program()
        );
        self.live.push(child);
        Ok(())
    }

    /// Number of live process handles
    fn len(&self) -> usize {
        self.live.len()
    }

    /// Signal every live process once, without awaiting its exit
    ///
    /// Best-effort: a process that already exited or refuses the signal is
    /// logged and forgotten. Previously signaled processes that have died in
    /// the meantime are reaped along the way.
    fn terminate(&mut self) {
        self.reap();
        if self.live.is_empty() {
            return;
        }
        let pids = self
            .live
            .iter()
            .map(|child| Pid::from_u32(child.id()))
            .collect::<Vec<_>>();
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&pids));
        for pid in &pids {
            match system.process(*pid) {
                Some(process) => {
                    // Graceful termination, hard kill only where the
                    // platform has no TERM signal
                    if !process.kill_with(Signal::Term).unwrap_or_else(|| process.kill()) {
                        log::warn!("Could not signal busy-work process {pid}");
                    }
                }
                None => log::info!("Busy-work process {pid} already exited"),
            }
        }
        self.signaled.append(&mut self.live);
    }

    /// Collect the exit status of signaled processes that have died,
    /// releasing their process-table entries
    fn reap(&mut self) {
        self.signaled.retain_mut(|child| match child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                log::warn!("Could not check busy-work process {} ({e})", child.id());
                false
            }
        });
    }

    /// Signal anything still live, then await every signaled process
    ///
    /// Blocks until the whole pool has been reaped, which is quick since
    /// every process was just signaled.
    fn drain(&mut self) {
        self.terminate();
        for mut child in self.signaled.drain(..) {
            if let Err(e) = child.wait() {
                log::warn!("Could not await busy-work process {} ({e})", child.id());
            }
        }
    }
}
//
impl Drop for DummyPool {
    fn drop(&mut self) {
        self.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problems::ProblemInstance;
    use assert_matches::assert_matches;

    fn spec(role: JobRole, program: &[&str]) -> JobSpec {
        JobSpec::assemble(
            role,
            &program.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            &Affinity {
                threads: 3,
                prefix: Vec::new(),
            },
            &[],
            &ProblemInstance::default(),
            &[],
            None,
            Some("POOL_NTHREADS"),
        )
    }

    #[test]
    fn command_construction() {
        let command = command_for(&spec(JobRole::Timing, &["bench"]));
        assert_eq!(command.get_program(), "bench");
        assert_eq!(command.get_args().count(), 0);
        let env = command.get_envs().collect::<Vec<_>>();
        assert_eq!(
            env,
            [(
                std::ffi::OsStr::new("POOL_NTHREADS"),
                Some(std::ffi::OsStr::new("3"))
            )]
        );
    }

    #[test]
    fn launch_failure_reports_program() {
        let mut pool = DummyPool::new();
        let result = pool.launch(&spec(JobRole::Dummy, &["/nonexistent/busy-work"]));
        match result {
            Err(RunError::Launch { role, program, .. }) => {
                assert_eq!(role, JobRole::Dummy);
                assert_eq!(program, "/nonexistent/busy-work");
            }
            other => panic!("Unexpected launch result: {other:?}"),
        }
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn inherit_mode_launch_failure() {
        let result = run_timing(
            &spec(JobRole::Timing, &["/nonexistent/timer"]),
            &mut OutputMode::Inherit,
        );
        assert_matches!(result, Err(RunError::Launch { .. }));
    }

    #[test]
    fn terminate_empties_the_pool() {
        let mut pool = DummyPool::new();
        pool.terminate();
        assert_eq!(pool.len(), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stdin_wiring_per_role() {
        fn fd0(pid: u32) -> std::path::PathBuf {
            std::fs::read_link(format!("/proc/{pid}/fd/0")).expect("Failed to inspect a stdin fd")
        }
        const EXEC_DELAY: std::time::Duration = std::time::Duration::from_millis(50);

        // Busy-work runs with all of its standard streams nulled
        let mut pool = DummyPool::new();
        pool.launch(&spec(JobRole::Dummy, &["sleep", "30"]))
            .expect("Failed to launch a sleeping process");
        std::thread::sleep(EXEC_DELAY);
        let dummy_fd0 = fd0(pool.live[0].id());
        assert!(
            dummy_fd0.to_string_lossy().ends_with("null"),
            "Busy-work stdin points at {dummy_fd0:?}, not the null device"
        );
        pool.drain();

        // The timed job inherits this process' stdin, whatever it is
        let mut child = command_for(&spec(JobRole::Timing, &["sleep", "30"]))
            .spawn()
            .expect("Failed to launch a sleeping process");
        std::thread::sleep(EXEC_DELAY);
        assert_eq!(fd0(child.id()), fd0(std::process::id()));
        child.kill().expect("Failed to kill the sleeping process");
        child.wait().expect("Failed to await the sleeping process");
    }
}
