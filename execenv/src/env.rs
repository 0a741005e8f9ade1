use crate::{exec::CommandRunner, resources::ProbeError};
use std::{
    collections::BTreeMap,
    env,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, warn};

/// Every variable consulted while probing the execution environment.
/// Anything outside of this list is never read from the process environment.
pub const CAPTURED_VARIABLES: &[&str] = &[
    // LSF
    "LSB_JOBID",
    "LS_SUBCWDIR",
    "LSB_JOBFILENAME",
    "LSB_JOBNAME",
    "LSB_BATCH_JID",
    "LSB_QUEUE",
    "LSB_MCPU_HOSTS",
    "LSB_HOSTS",
    // PBS / TORQUE
    "PBS_JOBID",
    "PBS_O_WORKDIR",
    "PBS_JOBNAME",
    "PBS_QUEUE",
    "PBS_NODEFILE",
    // LoadLeveler
    "LOADL_JOB_NAME",
    "LOADL_STEP_COMMAND",
    "LOADL_STEP_INITDIR",
    "LOADL_STEP_ID",
    "LOADL_STEP_CLASS",
    "LOADL_TOTAL_TASKS",
    "LOADL_BG_SIZE",
    "LOADL_PROCESSOR_LIST",
    "LOADL_HOSTFILE",
    // Grid Engine
    "SGE_TASK_ID",
    "SGE_O_WORKDIR",
    "JOB_NAME",
    "JOB_ID",
    "QUEUE",
    "NSLOTS",
    "NHOSTS",
    "PE_HOSTFILE",
    // SLURM
    "SLURM_JOBID",
    "SLURM_SUBMIT_DIR",
    "SLURM_JOB_NAME",
    "SLURM_PARTITION",
    "SLURM_NPROCS",
    "SLURM_NNODES",
    "SLURM_TASKS_PER_NODE",
    "SLURM_NODELIST",
    // MPI
    "MPD_USE_ROOT_MPD",
    // general
    "PATH",
    "TMPDIR",
    "SHELL",
    "HOME",
    "USER",
    "USERNAME",
];

/// Immutable copy of the environment variables relevant for probing.
///
/// The snapshot is taken once and handed to every constructor, probing code never
/// reads the process environment on its own. Sourcing a script or loading modules
/// yields a new snapshot holding the complete environment reported by the shell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// capture all known variables from the current process environment
    pub fn capture() -> Self {
        Self {
            vars: CAPTURED_VARIABLES
                .iter()
                .filter_map(|name| env::var(name).ok().map(|value| (name.to_string(), value)))
                .collect(),
        }
    }

    /// build a snapshot from explicit pairs, e.g., for dry runs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Parse a variable, absence is `Ok(None)` while a malformed value is an error
    pub fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, ProbeError> {
        match self.get(name) {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ProbeError::InvalidNumber {
                    variable: name.to_string(),
                    value: value.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Snapshot after sourcing the shell script at `path`.
    ///
    /// Variables printed by `env` after sourcing replace or extend the current ones.
    /// A missing script or a failing shell leaves the snapshot unchanged.
    pub fn sourced(&self, path: &Path, runner: &dyn CommandRunner) -> Self {
        if !path.is_file() {
            warn!(path = ?path, "File is not present, so it can't be sourced");
            return self.clone();
        }

        self.merged(&runner.output(&format!(". \"{}\" && env", path.display())))
    }

    /// Snapshot after purging all environment modules and loading `modules` with `modulecmd`
    pub fn with_modules<S: AsRef<str>>(
        &self,
        modulecmd: &str,
        modules: &[S],
        runner: &dyn CommandRunner,
    ) -> Self {
        let command = std::iter::once("purge".to_string())
            .chain(modules.iter().map(|module| format!("load {}", module.as_ref())))
            .map(|action| format!("eval \"$({modulecmd} sh {action})\""))
            .chain(std::iter::once("env".to_string()))
            .collect::<Vec<_>>()
            .join(" && ");

        self.merged(&runner.output(&command))
    }

    /// Rcfile configured by the user, relative names are dotfiles in `$HOME`
    pub fn rcfile_path(&self, rcfile: &Path) -> Option<PathBuf> {
        if rcfile.is_absolute() {
            Some(rcfile.to_path_buf())
        } else {
            self.get("HOME")
                .map(|home| Path::new(home).join(format!(".{}", rcfile.display())))
        }
    }

    /// merge the `NAME=value` lines of `env` output into a copy of this snapshot
    fn merged(&self, env_output: &str) -> Self {
        let mut vars = self.vars.clone();
        let mut count = 0;

        for line in env_output.lines() {
            if let Some((name, value)) = line.split_once('=') {
                if !name.is_empty() && !name.contains(char::is_whitespace) {
                    vars.insert(name.to_string(), value.to_string());
                    count += 1;
                }
            }
        }
        debug!(count, "Merged environment variables");

        Self { vars }
    }

    /// entries of `PATH`, empty if it is not set
    pub fn path_dirs(&self) -> Vec<PathBuf> {
        self.get("PATH")
            .map(|path| env::split_paths(path).collect())
            .unwrap_or_default()
    }
}
