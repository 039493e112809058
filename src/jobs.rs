//! Assembly of per-process launch specifications

use crate::{affinity::Affinity, problems::ProblemInstance};
use std::fmt;

/// GPU selection flag, appended last by contract with downstream programs
pub const DEVICE_ID_FLAG: &str = "--processing-device-id";

/// What a launched process is for
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobRole {
    /// Busy-work consuming resources for the duration of the measurement
    Dummy,

    /// The process whose execution time is the measurement of interest
    Timing,
}
//
impl fmt::Display for JobRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobRole::Dummy => "busy-work",
            JobRole::Timing => "timing",
        })
    }
}

/// Fully assembled invocation of one process
///
/// Built fresh per (problem, device) pair, never mutated afterwards, and
/// consumed exactly once by the process supervisor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobSpec {
    role: JobRole,
    argv: Vec<String>,
    env: Vec<(String, String)>,
}
//
impl JobSpec {
    /// Assemble the invocation for one (problem, device) pair
    ///
    /// The argv concatenation order is a contract with the downstream
    /// executables, which expect the device-id flag last:
    /// binding prefix, memory prefix, program, problem parameters,
    /// pass-through tokens, device id.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        role: JobRole,
        program: &[String],
        affinity: &Affinity,
        mem_prefix: &[String],
        problem: &ProblemInstance,
        passthrough: &[String],
        gpu: Option<u32>,
        nthreads_env: Option<&str>,
    ) -> Self {
        let mut argv = Vec::with_capacity(
            affinity.prefix.len()
                + mem_prefix.len()
                + program.len()
                + 2 * problem.pairs().len()
                + passthrough.len()
                + 2,
        );
        argv.extend(affinity.prefix.iter().cloned());
        argv.extend(mem_prefix.iter().cloned());
        argv.extend(program.iter().cloned());
        argv.extend(problem.argv_tokens());
        argv.extend(passthrough.iter().cloned());
        if let Some(gpu) = gpu {
            argv.push(DEVICE_ID_FLAG.to_owned());
            argv.push(gpu.to_string());
        }
        let env = nthreads_env
            .map(|name| (name.to_owned(), affinity.threads.to_string()))
            .into_iter()
            .collect();
        Self { role, argv, env }
    }

    /// Role this process plays
    pub fn role(&self) -> JobRole {
        self.role
    }

    /// Executable to launch
    ///
    /// The argv starts with the binding prefix or, with a prefix-less
    /// binder, the program itself; it is never empty.
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Arguments to the executable
    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    /// Full argument vector, executable included
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Environment overlay applied on top of the inherited environment
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }
}
