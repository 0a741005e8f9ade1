use crate::{batch::SchedulerKind, mpi::MpiVariant, resources::ProbeError};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{error, warn};

/// external commands are killed after this many milliseconds unless configured otherwise
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;

/// Whether any execute bit is set on the launcher at `path`
pub fn is_launcher_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        return Err(ConfigErrors::MissingLauncher(path.to_path_buf()));
    }

    path.metadata()
        .map(|metadata| metadata.mode() & 0o111 != 0)
        .map_err(|source| ConfigErrors::LauncherMetadata {
            path: path.to_path_buf(),
            source,
        })
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("MPI variant '{variant}' can't be used with resource manager {manager}")]
    UnsupportedCombination {
        variant: String,
        manager: SchedulerKind,
    },
    #[error("Resource detection failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("Failed to read configuration {path:?}: {source}")]
    ReadConfig { path: PathBuf, source: io::Error },
    #[error("Configuration is not valid: {0}")]
    InvalidConfig(#[from] serde_yaml::Error),
    #[error("MPI launcher {0:?} does not exist")]
    MissingLauncher(PathBuf),
    #[error("Failed to read the metadata of MPI launcher {path:?}: {source}")]
    LauncherMetadata { path: PathBuf, source: io::Error },
    #[error("Failed to determine the working directory: {0}")]
    CurrentDir(io::Error),
    #[error("Configuration failed the preflight checks")]
    FailedPreflight,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub mpi: MpiConfig,
    // explicit process count, wins over whatever the resource manager reports
    pub procs: Option<usize>,
    // process count used when nothing is detected
    pub procs_default: Option<usize>,
    pub wdir: Option<PathBuf>,
    /// timeout for introspection commands in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
    #[serde(default)]
    pub environment: EnvironmentConfig,
}

/// How the shell environment is prepared before anything is detected or run
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    // sourced first, a relative name means a dotfile in $HOME
    pub rcfile: Option<PathBuf>,
    // loaded after a purge, in this order
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default = "default_modulecmd")]
    pub modulecmd: String,
    // prepended to PATH for `run`
    pub path_prefix: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MpiConfig {
    // MPI implementation, e.g., MPICH2 or OpenMPI. Empty or unknown names get the generic setup
    #[serde(default)]
    pub variant: String,
    pub bindir: Option<PathBuf>,
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}

fn default_modulecmd() -> String {
    "modulecmd".to_string()
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            rcfile: None,
            modules: Vec::new(),
            modulecmd: default_modulecmd(),
            path_prefix: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mpi: MpiConfig::default(),
            procs: None,
            procs_default: None,
            wdir: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT_MS,
            environment: EnvironmentConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let file = File::open(path).map_err(|source| ConfigErrors::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(serde_yaml::from_reader(file)?)
    }

    pub fn variant(&self) -> MpiVariant {
        match self.mpi.variant.parse() {
            Ok(variant) => variant,
            Err(never) => match never {},
        }
    }

    pub fn bindir(&self) -> Option<&Path> {
        self.mpi.bindir.as_deref()
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout)
    }

    pub fn preflight_checks(&mut self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        self.mpi.variant = self.mpi.variant.trim().to_string();
        if self.mpi.bindir.as_ref().is_some_and(|dir| dir.as_os_str().is_empty()) {
            self.mpi.bindir = None;
        }

        if let Some(bindir) = &self.mpi.bindir {
            if !bindir.is_dir() {
                error!(
                    "mpi.bindir {} is not a directory",
                    bindir.to_string_lossy()
                );
                contains_error = true;
            } else {
                for name in self.variant().launcher_names() {
                    let launcher = bindir.join(name);
                    if !launcher.is_file() {
                        continue;
                    }

                    match is_launcher_executable(&launcher) {
                        Ok(true) => {}
                        Ok(false) => {
                            error!(
                                "MPI launcher {} is not executable",
                                launcher.to_string_lossy()
                            );
                            contains_error = true;
                        }
                        Err(e) => {
                            error!("{e}");
                            contains_error = true;
                        }
                    }
                }
            }
        }

        for (key, value) in [("procs", self.procs), ("procs_default", self.procs_default)] {
            if value == Some(0) {
                error!("{key} must be at least 1");
                contains_error = true;
            }
        }

        if let Some(wdir) = &self.wdir {
            if !wdir.is_dir() {
                error!("wdir {} is not a directory", wdir.to_string_lossy());
                contains_error = true;
            }
        }

        self.environment.modules.retain(|module| !module.trim().is_empty());
        if self.environment.modulecmd.trim().is_empty() {
            error!("environment.modulecmd must not be empty");
            contains_error = true;
        }

        if self.command_timeout == 0 {
            warn!("command_timeout is 0, falling back to {DEFAULT_COMMAND_TIMEOUT_MS} ms");
            self.command_timeout = DEFAULT_COMMAND_TIMEOUT_MS;
        }

        !contains_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt};

    #[test]
    fn load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("execenv.yaml");
        fs::write(
            &path,
            "mpi:\n  variant: OpenMPI\n  bindir: /opt/openmpi/bin\nprocs: 8\ncommand_timeout: 500\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();

        assert_eq!(config.variant(), MpiVariant::OpenMpi);
        assert_eq!(config.bindir(), Some(Path::new("/opt/openmpi/bin")));
        assert_eq!(config.procs, Some(8));
        assert_eq!(config.procs_default, None);
        assert_eq!(config.command_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.variant(), MpiVariant::Other(String::new()));
        assert_eq!(config.command_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_yaml::from_str::<Config>("nprocs: 4\n").is_err());
        assert!(serde_yaml::from_str::<Config>("mpi:\n  flavour: LAM_MPI\n").is_err());
    }

    #[test]
    fn missing_config_file() {
        assert!(matches!(
            Config::load(Path::new("/nonexistent/execenv.yaml")),
            Err(ConfigErrors::ReadConfig { .. })
        ));
    }

    #[test]
    fn executable_bits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mpiexec");
        fs::write(&path, "#!/bin/sh\n").unwrap();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!is_launcher_executable(&path).unwrap());

        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(is_launcher_executable(&path).unwrap());
    }

    #[test]
    fn missing_launcher_names_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("mpirun");

        let error = is_launcher_executable(&missing).unwrap_err();

        assert!(matches!(&error, ConfigErrors::MissingLauncher(path) if *path == missing));
        assert!(error.to_string().contains("mpirun"));
    }

    #[test]
    fn load_environment_section() {
        let config: Config = serde_yaml::from_str(
            "environment:\n  rcfile: cfdrc\n  modules: [gcc, openmpi/4.1]\n  path_prefix: /opt/cs/bin\n",
        )
        .unwrap();

        assert_eq!(config.environment.rcfile, Some(PathBuf::from("cfdrc")));
        assert_eq!(config.environment.modules, ["gcc", "openmpi/4.1"]);
        assert_eq!(config.environment.modulecmd, "modulecmd");
        assert_eq!(config.environment.path_prefix, Some(PathBuf::from("/opt/cs/bin")));
        assert!(serde_yaml::from_str::<Config>("environment:\n  module: gcc\n").is_err());
    }

    #[test]
    fn preflight_checks_modulecmd() {
        let mut config = Config::default();
        config.environment.modules = vec!["gcc".to_string(), " ".to_string()];
        assert!(config.preflight_checks());
        assert_eq!(config.environment.modules, ["gcc"]);

        config.environment.modulecmd = String::new();
        assert!(!config.preflight_checks());
    }

    #[test]
    fn preflight_reports_every_problem() {
        let mut config = Config {
            mpi: MpiConfig {
                variant: "MPICH2".to_string(),
                bindir: Some(PathBuf::from("/nonexistent/bin")),
            },
            procs: Some(0),
            wdir: Some(PathBuf::from("/nonexistent/wdir")),
            command_timeout: 0,
            ..Config::default()
        };

        assert!(!config.preflight_checks());
        assert_eq!(config.command_timeout, DEFAULT_COMMAND_TIMEOUT_MS);
    }

    #[test]
    fn preflight_rejects_launcher_without_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = dir.path().join("mpiexec");
        fs::write(&launcher, "").unwrap();
        fs::set_permissions(&launcher, fs::Permissions::from_mode(0o644)).unwrap();

        let mut config = Config {
            mpi: MpiConfig {
                variant: "MPICH2".to_string(),
                bindir: Some(dir.path().to_path_buf()),
            },
            ..Config::default()
        };
        assert!(!config.preflight_checks());

        fs::set_permissions(&launcher, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(config.preflight_checks());
    }

    #[test]
    fn preflight_drops_empty_bindir() {
        let mut config = Config {
            mpi: MpiConfig {
                variant: " LAM_MPI ".to_string(),
                bindir: Some(PathBuf::new()),
            },
            ..Config::default()
        };

        assert!(config.preflight_checks());
        assert_eq!(config.bindir(), None);
        assert_eq!(config.variant(), MpiVariant::Lam);
    }
}
