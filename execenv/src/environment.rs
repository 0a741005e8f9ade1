use crate::{
    config::{Config, ConfigErrors, EnvironmentConfig},
    env::EnvSnapshot,
    exec::CommandRunner,
    mpi::{MpiEnvironment, SelectContext},
    resources::ResourceInfo,
};
use serde::Serialize;
use std::{env, path::PathBuf};
use tracing::{info, warn};

/// Everything known about where and how a computation will run
#[derive(Serialize, Debug)]
pub struct ExecEnvironment {
    pub user: Option<String>,
    pub host: Option<String>,
    pub wdir: PathBuf,
    pub resources: ResourceInfo,
    pub mpi: MpiEnvironment,
}

impl ExecEnvironment {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn build(
        config: &Config,
        env: &EnvSnapshot,
        runner: &dyn CommandRunner,
    ) -> Result<Self, ConfigErrors> {
        let user = user_name(env);

        let wdir = match &config.wdir {
            Some(wdir) => wdir.clone(),
            None => env::current_dir().map_err(ConfigErrors::CurrentDir)?,
        };

        let resources = ResourceInfo::detect(env, config.procs, config.procs_default)?;

        let context = SelectContext::new(env, runner)
            .with_bindir(config.bindir())
            .with_resources(Some(&resources))
            .with_wdir(Some(&wdir));
        let mpi = MpiEnvironment::select(&config.variant(), &context)?;

        Ok(Self {
            user,
            host: host_name(),
            wdir,
            resources,
            mpi,
        })
    }
}

/// Source the configured rcfile, then purge and load the configured modules.
///
/// Without an rcfile or modules the snapshot is returned as is.
#[tracing::instrument(level = "debug", skip_all)]
pub fn prepare_snapshot(
    config: &EnvironmentConfig,
    env: &EnvSnapshot,
    runner: &dyn CommandRunner,
) -> EnvSnapshot {
    let mut prepared = env.clone();

    if let Some(rcfile) = &config.rcfile {
        match env.rcfile_path(rcfile) {
            Some(path) => {
                info!(path = ?path, "Sourcing rcfile");
                prepared = prepared.sourced(&path, runner);
            }
            None => warn!(rcfile = ?rcfile, "HOME is not set, rcfile is not sourced"),
        }
    }

    if !config.modules.is_empty() {
        info!(modules = ?config.modules, "Loading environment modules");
        prepared = prepared.with_modules(&config.modulecmd, config.modules.as_slice(), runner);
    }

    prepared
}

fn user_name(env: &EnvSnapshot) -> Option<String> {
    let variable = if cfg!(windows) { "USERNAME" } else { "USER" };

    env.get(variable).map(str::to_string)
}

fn host_name() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(hostname) => Some(hostname.to_string_lossy().into_owned()),
        Err(error) => {
            warn!(error = ?error, "Failed to retrieve hostname: {error}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{batch::SchedulerKind, exec::fake::FakeRunner, mpi::MpiVariant};

    #[test]
    fn build_without_scheduler() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            procs_default: Some(1),
            wdir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        let env = EnvSnapshot::from_pairs([("USER", "alice")]);

        let exec_env = ExecEnvironment::build(&config, &env, &FakeRunner::new()).unwrap();

        assert_eq!(exec_env.user.as_deref(), Some("alice"));
        assert_eq!(exec_env.wdir, dir.path());
        assert_eq!(exec_env.resources.manager(), SchedulerKind::None);
        assert_eq!(exec_env.resources.process_count(), Some(1));
        assert_eq!(exec_env.mpi.variant(), &MpiVariant::Other(String::new()));
        assert_eq!(exec_env.mpi.launcher(), None);
    }

    #[test]
    fn wdir_defaults_to_current_directory() {
        let exec_env =
            ExecEnvironment::build(&Config::default(), &EnvSnapshot::default(), &FakeRunner::new())
                .unwrap();

        assert_eq!(exec_env.wdir, env::current_dir().unwrap());
        assert_eq!(exec_env.user, None);
    }

    #[test]
    fn unsupported_combination_is_fatal() {
        let config = Config {
            mpi: crate::config::MpiConfig {
                variant: "MPIBULL2".to_string(),
                bindir: None,
            },
            ..Config::default()
        };
        let env = EnvSnapshot::from_pairs([("LSB_JOBID", "1"), ("LSB_HOSTS", "a b")]);

        assert!(matches!(
            ExecEnvironment::build(&config, &env, &FakeRunner::new()),
            Err(ConfigErrors::UnsupportedCombination {
                manager: SchedulerKind::Lsf,
                ..
            })
        ));
    }

    #[test]
    fn rcfile_is_sourced_before_modules() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join(".cfdrc"), "export CS_MPI=OpenMPI\n").unwrap();
        let home_dir = home.path().to_string_lossy().into_owned();

        let config = EnvironmentConfig {
            rcfile: Some(PathBuf::from("cfdrc")),
            modules: vec!["openmpi".to_string()],
            ..EnvironmentConfig::default()
        };
        let env = EnvSnapshot::from_pairs([("HOME", home_dir.as_str()), ("USER", "alice")]);
        let runner = FakeRunner::new()
            .respond(".cfdrc", "CS_MPI=OpenMPI\n")
            .respond("modulecmd sh load openmpi", "LOADEDMODULES=openmpi\n");

        let prepared = prepare_snapshot(&config, &env, &runner);

        assert_eq!(prepared.get("USER"), Some("alice"));
        assert_eq!(prepared.get("CS_MPI"), Some("OpenMPI"));
        assert_eq!(prepared.get("LOADEDMODULES"), Some("openmpi"));
        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains(".cfdrc"));
        assert!(calls[1].contains("modulecmd sh purge"));
    }

    #[test]
    fn nothing_to_prepare() {
        let env = EnvSnapshot::from_pairs([("USER", "alice")]);
        let runner = FakeRunner::new();

        assert_eq!(prepare_snapshot(&EnvironmentConfig::default(), &env, &runner), env);
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn malformed_variables_are_reported() {
        let env = EnvSnapshot::from_pairs([("SLURM_NNODES", "two")]);

        assert!(matches!(
            ExecEnvironment::build(&Config::default(), &env, &FakeRunner::new()),
            Err(ConfigErrors::Probe(_))
        ));
    }
}
