//! CPU affinity resolution and process binding prefixes

use std::{
    fmt,
    process::{Command, Stdio},
};
use thiserror::Error;

/// Process binding derived from one CPU-affinity specifier
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Affinity {
    /// Number of CPUs named by the specifier
    ///
    /// Communicated to launched jobs through the configured environment
    /// variable so they can size their thread pools accordingly.
    pub threads: usize,

    /// Command prefix binding a process to those CPUs
    pub prefix: Vec<String>,
}

/// Interface through which the orchestrator acquires binding prefixes
///
/// Kept narrow so tests can substitute a binder that emits no prefix and
/// therefore does not require numactl or taskset on the host.
pub trait ResourceBinder {
    /// Resolve a CPU-affinity specifier into a thread count and a
    /// process-launch prefix
    fn resolve_affinity(&self, cpu_spec: &str) -> Result<Affinity, BindingError>;

    /// Memory-binding fragment inserted right after the affinity prefix
    fn mem_binding_prefix(&self) -> Vec<String>;
}

/// OS command used to pin processes to CPUs
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AffinityTool {
    /// `numactl -C <spec>`, can also bind memory to the local node
    Numactl,

    /// `taskset -c <spec>`, CPU pinning only
    Taskset,
}
//
impl fmt::Display for AffinityTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AffinityTool::Numactl => "numactl",
            AffinityTool::Taskset => "taskset",
        })
    }
}

/// Whether jobs should also be bound to node-local memory
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MemBinding {
    /// Bind under numactl, don't under taskset
    #[default]
    Auto,

    /// Always bind (an error under taskset, which cannot)
    Bind,

    /// Never bind
    NoBind,
}

/// Binder shelling out to numactl or taskset
#[derive(Clone, Copy, Debug)]
pub struct SystemBinder {
    tool: AffinityTool,
    mem: MemBinding,
}
//
impl SystemBinder {
    /// Set up a binder, validating the tool/memory-binding combination
    pub fn new(tool: AffinityTool, mem: MemBinding) -> Result<Self, BindingError> {
        if tool == AffinityTool::Taskset && mem == MemBinding::Bind {
            return Err(BindingError::MemBindUnsupported);
        }
        Ok(Self { tool, mem })
    }

    /// Set up a binder after checking that the tool responds on this host
    pub fn detect(tool: AffinityTool, mem: MemBinding) -> Result<Self, BindingError> {
        let available = match tool {
            AffinityTool::Numactl => probe("numactl", "--hardware"),
            AffinityTool::Taskset => probe("taskset", "-V"),
        };
        if !available {
            return Err(BindingError::ToolUnavailable(tool));
        }
        Self::new(tool, mem)
    }
}
//
impl ResourceBinder for SystemBinder {
    fn resolve_affinity(&self, cpu_spec: &str) -> Result<Affinity, BindingError> {
        let threads = thread_count(cpu_spec)?;
        let prefix = match self.tool {
            AffinityTool::Numactl => ["numactl", "-C", cpu_spec],
            AffinityTool::Taskset => ["taskset", "-c", cpu_spec],
        };
        Ok(Affinity {
            threads,
            prefix: prefix.into_iter().map(String::from).collect(),
        })
    }

    fn mem_binding_prefix(&self) -> Vec<String> {
        match (self.tool, self.mem) {
            (AffinityTool::Numactl, MemBinding::Auto | MemBinding::Bind) => {
                vec!["-l".to_owned(), "--".to_owned()]
            }
            (AffinityTool::Numactl, MemBinding::NoBind) => vec!["--".to_owned()],
            (AffinityTool::Taskset, _) => Vec::new(),
        }
    }
}

/// Failure to set up or use a resource binder
#[derive(Debug, Error)]
pub enum BindingError {
    /// Affinity specifier does not follow the id/range list grammar
    #[error("cannot parse CPU affinity specifier '{0}'")]
    BadCpuSpec(String),

    /// Requested tool did not respond on this host
    #[error("{0} is not available on this host")]
    ToolUnavailable(AffinityTool),

    /// Memory binding requested under a tool that cannot do it
    #[error("taskset cannot bind memory, use numactl or disable memory binding")]
    MemBindUnsupported,
}

/// Count the CPUs named by an affinity specifier
///
/// The grammar is a comma-separated list of items, each item being a single
/// CPU id or an inclusive `a-b` id range.
pub fn thread_count(cpu_spec: &str) -> Result<usize, BindingError> {
    let bad = || BindingError::BadCpuSpec(cpu_spec.to_owned());
    let mut count = 0usize;
    for item in cpu_spec.split(',') {
        let item = item.trim();
        count += match item.split_once('-') {
            None => {
                item.parse::<u32>().map_err(|_| bad())?;
                1
            }
            Some((start, end)) => {
                let start = start.trim().parse::<u32>().map_err(|_| bad())?;
                let end = end.trim().parse::<u32>().map_err(|_| bad())?;
                if end < start {
                    return Err(bad());
                }
                (end - start) as usize + 1
            }
        };
    }
    Ok(count)
}

/// Check that a pinning tool answers a trivial query
fn probe(program: &str, arg: &str) -> bool {
    Command::new(program)
        .arg(arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
