pub mod hosts;
pub mod slurm;

#[cfg(test)]
mod hosts_test;
#[cfg(test)]
mod resources_test;
#[cfg(test)]
mod slurm_test;

use crate::{
    batch::{BatchInfo, SchedulerKind},
    env::EnvSnapshot,
    exec::CommandRunner,
};
use serde::{Serialize, Serializer};
use std::{
    fmt, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// name of hosts files materialized from a hosts list
pub const GENERATED_HOSTS_FILE: &str = "hostsfile";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{variable} has an invalid numeric value: {value:?}")]
    InvalidNumber { variable: String, value: String },
    #[error("{variable} could not be parsed: {value:?}")]
    MalformedSlurm {
        variable: &'static str,
        value: String,
    },
    #[error("SLURM_TASKS_PER_NODE lists {counts} nodes but SLURM_NODELIST expands to {nodes}")]
    TaskCountMismatch { nodes: usize, counts: usize },
    #[error("Failed to access hosts file {path:?}: {source}")]
    HostsFile { path: PathBuf, source: io::Error },
}

/// A hosts file, either as a concrete path or expressed through an environment variable.
///
/// The variable form is kept so generated scripts can reference the file the same way
/// the resource manager exposes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostsFile {
    Path(PathBuf),
    /// `$NAME`
    Variable(&'static str),
    /// `$TMPDIR/machines`, used by Grid Engine parallel environments
    TmpdirMachines,
}

impl HostsFile {
    /// concrete path of the hosts file, if it can be determined
    pub fn resolve(&self, env: &EnvSnapshot) -> Option<PathBuf> {
        match self {
            Self::Path(path) => Some(path.clone()),
            Self::Variable(name) => env.get(name).map(PathBuf::from),
            Self::TmpdirMachines => env.get("TMPDIR").map(|dir| Path::new(dir).join("machines")),
        }
    }

    pub fn exists(&self, env: &EnvSnapshot) -> bool {
        self.resolve(env).map(|path| path.is_file()).unwrap_or(false)
    }
}

impl fmt::Display for HostsFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Variable(name) => write!(f, "${name}"),
            Self::TmpdirMachines => f.write_str("$TMPDIR/machines"),
        }
    }
}

impl Serialize for HostsFile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Execution resources granted to the current job
#[derive(Serialize, Clone, Debug)]
pub struct ResourceInfo {
    #[serde(flatten)]
    batch: BatchInfo,
    manager: SchedulerKind,
    process_count: Option<usize>,
    node_count: Option<usize>,
    hosts_file: Option<HostsFile>,
    hosts_list: Option<Vec<String>>,
    #[serde(skip)]
    env: EnvSnapshot,
}

impl ResourceInfo {
    /// Detect batch system and resources from `env`.
    ///
    /// `process_override` wins over the detected process count (with a warning if they
    /// differ), `process_default` is used when nothing could be detected.
    #[tracing::instrument(level = "debug", skip(env))]
    pub fn detect(
        env: &EnvSnapshot,
        process_override: Option<usize>,
        process_default: Option<usize>,
    ) -> Result<Self, ProbeError> {
        let mut builder = ResourceBuilder::new(BatchInfo::detect(env), env.clone());

        builder.probe_slurm()?;
        builder.probe_lsf()?;
        builder.probe_loadleveler()?;
        builder.probe_pbs();
        builder.probe_sge()?;

        builder.build(process_override, process_default)
    }

    pub fn batch(&self) -> &BatchInfo {
        &self.batch
    }

    pub fn manager(&self) -> SchedulerKind {
        self.manager
    }

    pub fn process_count(&self) -> Option<usize> {
        self.process_count
    }

    pub fn node_count(&self) -> Option<usize> {
        self.node_count
    }

    /// the hosts file reported by the resource manager, if it exists
    pub fn known_hosts_file(&self) -> Option<&HostsFile> {
        self.hosts_file.as_ref()
    }

    pub fn env(&self) -> &EnvSnapshot {
        &self.env
    }

    /// processes per node, 1 unless both counts are known
    pub fn processes_per_node(&self) -> usize {
        match (self.process_count, self.node_count) {
            (Some(processes), Some(nodes)) if nodes > 0 => (processes / nodes).max(1),
            _ => 1,
        }
    }

    /// Hosts list, one entry per process, as far as the resource manager provides one
    pub fn hosts_list(&self, runner: &dyn CommandRunner) -> Result<Option<Vec<String>>, ProbeError> {
        if let Some(list) = &self.hosts_list {
            return Ok(Some(list.clone()));
        }

        let list = match self.manager {
            SchedulerKind::Slurm => {
                let counts = self
                    .env
                    .get("SLURM_TASKS_PER_NODE")
                    .map(slurm::parse_tasks_per_node)
                    .transpose()?;

                match self.env.get("SLURM_NODELIST") {
                    Some(node_list) => Some(slurm::expand_node_list(node_list, counts.as_deref())?),
                    None => {
                        let mut list = runner
                            .output("srun hostname -s")
                            .split_whitespace()
                            .map(str::to_string)
                            .collect::<Vec<_>>();
                        list.sort();

                        Some(list).filter(|list| !list.is_empty())
                    }
                }
            }
            SchedulerKind::Lsf => match self.env.get("LSB_MCPU_HOSTS") {
                Some(value) => Some(hosts::expand_counted(&hosts::parse_mcpu_hosts(value)?)),
                None => self.env.get("LSB_HOSTS").map(split_hosts),
            },
            SchedulerKind::LoadLeveler => self.env.get("LOADL_PROCESSOR_LIST").map(split_hosts),
            _ => None,
        };

        Ok(list)
    }

    /// Hosts file for the job.
    ///
    /// The resource manager's file is used if it exists, otherwise one is written to
    /// `wdir` (or the current directory) from the hosts list. That file is rewritten
    /// on every call and is not removed afterwards. Callers needing it more than once
    /// should keep the returned path.
    pub fn hosts_file(
        &self,
        wdir: Option<&Path>,
        runner: &dyn CommandRunner,
    ) -> Result<Option<HostsFile>, ProbeError> {
        if let Some(file) = &self.hosts_file {
            return Ok(Some(file.clone()));
        }

        match self.hosts_list(runner)? {
            Some(list) => {
                let path = wdir
                    .map(|dir| dir.join(GENERATED_HOSTS_FILE))
                    .unwrap_or_else(|| PathBuf::from(GENERATED_HOSTS_FILE));

                hosts::write_hosts_file(&path, &list, self.process_count)?;
                info!(path = ?path, "Generated hosts file from hosts list");

                Ok(Some(HostsFile::Path(path)))
            }
            None => Ok(None),
        }
    }
}

fn split_hosts(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Collects resource information while probing, see `ResourceInfo::detect`
#[derive(Debug)]
pub struct ResourceBuilder {
    batch: BatchInfo,
    env: EnvSnapshot,
    manager: SchedulerKind,
    process_count: Option<usize>,
    node_count: Option<usize>,
    hosts_file: Option<HostsFile>,
    hosts_list: Option<Vec<String>>,
}

impl ResourceBuilder {
    pub fn new(batch: BatchInfo, env: EnvSnapshot) -> Self {
        Self {
            batch,
            env,
            manager: SchedulerKind::None,
            process_count: None,
            node_count: None,
            hosts_file: None,
            hosts_list: None,
        }
    }

    fn use_hosts_list(&mut self, list: Vec<String>) {
        let (processes, nodes) = hosts::count_hosts(&list);

        self.process_count = Some(processes);
        self.node_count = Some(nodes);
        self.hosts_list = Some(list);
    }

    /// SLURM is detected from its resource variables, independently of the batch kind
    fn probe_slurm(&mut self) -> Result<(), ProbeError> {
        let nodes = self.env.parse::<usize>("SLURM_NNODES")?;

        if let Some(processes) = self.env.parse::<usize>("SLURM_NPROCS")? {
            self.manager = SchedulerKind::Slurm;
            self.process_count = Some(processes);
            self.node_count = nodes;
        } else if let Some(nodes) = nodes {
            self.manager = SchedulerKind::Slurm;
            self.node_count = Some(nodes);
            self.process_count = Some(match self.env.get("SLURM_TASKS_PER_NODE") {
                Some(tasks) => slurm::total_tasks(tasks)?,
                None => nodes,
            });
        }

        Ok(())
    }

    fn probe_lsf(&mut self) -> Result<(), ProbeError> {
        if self.manager.is_some() || self.batch.kind != SchedulerKind::Lsf {
            return Ok(());
        }

        self.manager = SchedulerKind::Lsf;

        if let Some(value) = self.env.get("LSB_MCPU_HOSTS") {
            let pairs = hosts::parse_mcpu_hosts(value)?;

            self.node_count = Some(pairs.len());
            self.process_count = Some(pairs.iter().map(|(_, count)| count).sum());
        } else if let Some(value) = self.env.get("LSB_HOSTS") {
            self.use_hosts_list(split_hosts(value));
        }

        Ok(())
    }

    fn probe_loadleveler(&mut self) -> Result<(), ProbeError> {
        if self.manager.is_some() || self.batch.kind != SchedulerKind::LoadLeveler {
            return Ok(());
        }

        let tasks = match self.env.parse::<usize>("LOADL_TOTAL_TASKS")? {
            Some(tasks) => Some(tasks),
            None => self.env.parse::<usize>("LOADL_BG_SIZE")?,
        };

        if let Some(tasks) = tasks {
            self.manager = SchedulerKind::LoadLeveler;
            self.process_count = Some(tasks);
        } else if let Some(value) = self.env.get("LOADL_PROCESSOR_LIST") {
            self.manager = SchedulerKind::LoadLeveler;
            self.use_hosts_list(split_hosts(value));
        }

        if self.env.contains("LOADL_HOSTFILE") {
            self.manager = SchedulerKind::LoadLeveler;
            self.hosts_file = Some(HostsFile::Variable("LOADL_HOSTFILE"));
        }

        Ok(())
    }

    fn probe_pbs(&mut self) {
        if self.manager.is_none()
            && self.batch.kind == SchedulerKind::Pbs
            && self.env.contains("PBS_NODEFILE")
        {
            self.manager = SchedulerKind::Pbs;
            self.hosts_file = Some(HostsFile::Variable("PBS_NODEFILE"));
        }
    }

    fn probe_sge(&mut self) -> Result<(), ProbeError> {
        if self.manager.is_some() || self.batch.kind != SchedulerKind::Sge {
            return Ok(());
        }

        if let Some(slots) = self.env.parse::<usize>("NSLOTS")? {
            self.process_count = Some(slots);
        }
        if let Some(hosts) = self.env.parse::<usize>("NHOSTS")? {
            self.node_count = Some(hosts);
        }

        if self.env.contains("TMPDIR") {
            if HostsFile::TmpdirMachines.exists(&self.env) {
                self.manager = SchedulerKind::Sge;
                self.hosts_file = Some(HostsFile::TmpdirMachines);
            }
        } else if self.env.contains("PE_HOSTFILE") {
            self.hosts_file = Some(HostsFile::Variable("PE_HOSTFILE"));
        }

        Ok(())
    }

    /// Resolve process counts and produce the immutable record
    pub fn build(
        mut self,
        process_override: Option<usize>,
        process_default: Option<usize>,
    ) -> Result<ResourceInfo, ProbeError> {
        // a hosts file that doesn't exist is treated as absent
        if let Some(file) = &self.hosts_file {
            if !file.exists(&self.env) {
                debug!(hosts_file = %file, "Ignoring missing hosts file");
                self.hosts_file = None;
            }
        }

        if self.process_count.is_none() {
            if let Some(path) = self.hosts_file.as_ref().and_then(|file| file.resolve(&self.env)) {
                self.process_count = Some(hosts::count_lines(&path)?);
            } else if let Some(list) = &self.hosts_list {
                let (processes, nodes) = hosts::count_hosts(list);
                self.process_count = Some(processes);
                self.node_count = Some(nodes);
            }
        }

        if let Some(requested) = process_override {
            if let Some(detected) = self.process_count.filter(|detected| *detected != requested) {
                warn!(
                    "Resource manager ({}) allows for {detected} processes, using {requested} as requested",
                    self.manager
                );
            }
            self.process_count = Some(requested);
        }

        if self.process_count.is_none() {
            self.process_count = process_default;
        }

        let info = ResourceInfo {
            batch: self.batch,
            manager: self.manager,
            process_count: self.process_count,
            node_count: self.node_count,
            hosts_file: self.hosts_file,
            hosts_list: self.hosts_list,
            env: self.env,
        };
        debug!(
            manager = %info.manager,
            processes = ?info.process_count,
            nodes = ?info.node_count,
            "Detected resources"
        );

        Ok(info)
    }
}
