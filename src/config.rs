//! Run configuration and device resolution

use crate::affinity::BindingError;
use std::time::Duration;
use thiserror::Error;

/// Ordered device list for one run
///
/// The head of the active list is reserved for the timed job, the tail for
/// busy-work; this position-based mapping is fixed, there is no scheduling
/// policy. CPU and GPU mode are exclusive: a non-empty GPU list switches the
/// active list to the GPUs, in which case the CPU-affinity list must contain
/// exactly one specifier that supplies the CPU placement of every process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceSet {
    cpus: Vec<String>,
    gpus: Vec<u32>,
}
//
impl DeviceSet {
    /// Validate the two parallel device lists
    pub fn new(cpus: Vec<String>, gpus: Vec<u32>) -> Result<Self, ConfigError> {
        if cpus.is_empty() {
            return Err(ConfigError::NoCpuAffinity);
        }
        if !gpus.is_empty() && cpus.len() != 1 {
            return Err(ConfigError::GpuNeedsSingleCpu(cpus.len()));
        }
        Ok(Self { cpus, gpus })
    }

    /// Number of busy-work jobs to run per problem
    pub fn fan_out(&self) -> usize {
        self.active_len() - 1
    }

    /// Device slot for the timed job, always the head of the active list
    pub fn timing(&self) -> Device<'_> {
        Device {
            cpu: &self.cpus[0],
            gpu: self.gpus.first().copied(),
        }
    }

    /// Device slots for busy-work jobs, the tail of the active list in order
    pub fn dummies(&self) -> impl Iterator<Item = Device<'_>> + '_ {
        let gpu_mode = !self.gpus.is_empty();
        (1..self.active_len()).map(move |idx| {
            if gpu_mode {
                // Busy-work does not need distinct CPU placement in GPU
                // mode, only the targeted GPU differs
                Device {
                    cpu: &self.cpus[0],
                    gpu: Some(self.gpus[idx]),
                }
            } else {
                Device {
                    cpu: &self.cpus[idx],
                    gpu: None,
                }
            }
        })
    }

    /// Length of the active device list
    fn active_len(&self) -> usize {
        if self.gpus.is_empty() {
            self.cpus.len()
        } else {
            self.gpus.len()
        }
    }
}

/// One resolved device slot
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Device<'set> {
    /// CPU-affinity specifier binding this slot's process
    pub cpu: &'set str,

    /// GPU targeted by this slot's process, in GPU mode
    pub gpu: Option<u32>,
}

/// Immutable run configuration, built once from the CLI and passed by
/// reference into the orchestrator
#[derive(Clone, Debug)]
pub struct Config {
    /// Devices to spread jobs over
    pub devices: DeviceSet,

    /// Busy-work program argv, present whenever the fan-out is nonzero
    pub dummy_program: Option<Vec<String>>,

    /// Timed program argv
    pub timing_program: Vec<String>,

    /// Name of the environment variable carrying the resolved thread count
    pub nthreads_env: Option<String>,

    /// Pause after launching each busy-work job, letting it reach steady
    /// contention before the next launch
    pub launch_delay: Duration,

    /// Tokens forwarded verbatim to every launched program
    pub passthrough: Vec<String>,
}
//
impl Config {
    /// Assemble and validate a run configuration
    ///
    /// Program commands are strings split with shell-like rules, so a
    /// program may carry baked-in arguments (`"spin --threads 4"`).
    pub fn new(
        devices: DeviceSet,
        dummy_command: Option<&str>,
        timing_command: &str,
        nthreads_env: Option<String>,
        launch_delay: Duration,
        passthrough: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let timing_program = split_command(timing_command)?;
        let dummy_program = dummy_command.map(split_command).transpose()?;
        if devices.fan_out() > 0 && dummy_program.is_none() {
            return Err(ConfigError::NoDummyProgram(devices.fan_out()));
        }
        Ok(Self {
            devices,
            dummy_program,
            timing_program,
            nthreads_env,
            launch_delay,
            passthrough,
        })
    }
}

/// Split a program command string into an argv
fn split_command(command: &str) -> Result<Vec<String>, ConfigError> {
    match shlex::split(command) {
        Some(argv) if !argv.is_empty() => Ok(argv),
        _ => Err(ConfigError::BadCommand(command.to_owned())),
    }
}

/// Invalid run configuration, reported before any process is launched
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Empty CPU-affinity list
    #[error("at least one CPU affinity specifier is required")]
    NoCpuAffinity,

    /// GPU mode with more or less than one CPU-affinity specifier
    #[error("a non-empty GPU list requires exactly one CPU affinity specifier, got {0}")]
    GpuNeedsSingleCpu(usize),

    /// Busy-work requested without a program to run it with
    #[error("{0} busy-work job(s) requested but no dummy program was given")]
    NoDummyProgram(usize),

    /// Empty or unsplittable program command string
    #[error("cannot parse program command '{0}'")]
    BadCommand(String),

    /// Affinity items resolving to different thread counts
    #[error("CPU affinity items must name the same number of CPUs ({0} vs {1})")]
    UnevenThreadCount(usize, usize),

    /// Underlying binder failure
    #[error(transparent)]
    Binding(#[from] BindingError),
}
