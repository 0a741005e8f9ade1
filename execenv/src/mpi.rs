mod bluegene;
mod hpmpi;
mod lam;
mod mpibull2;
mod mpich1;
mod mpich2;
mod msmpi;
mod openmpi;
mod other;


pub use mpich2::classify_banner;

use crate::{
    batch::SchedulerKind,
    config::ConfigErrors,
    env::EnvSnapshot,
    exec::CommandRunner,
    resources::{HostsFile, ProbeError, ResourceInfo},
};
use once_cell::sync::Lazy;
use serde::{Serialize, Serializer};
use std::{
    convert::Infallible,
    fmt,
    ops::BitOr,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, warn};

/// MPI implementations with a dedicated launcher setup
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MpiVariant {
    Mpich2,
    Mpich1,
    OpenMpi,
    Lam,
    BlueGeneL,
    BlueGeneP,
    BlueGeneQ,
    HpMpi,
    MsMpi,
    MpiBull2,
    /// anything else, handled by the generic setup
    Other(String),
}

impl FromStr for MpiVariant {
    type Err = Infallible;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Ok(match name {
            "MPICH2" => Self::Mpich2,
            "MPICH1" => Self::Mpich1,
            "OpenMPI" => Self::OpenMpi,
            "LAM_MPI" => Self::Lam,
            "BGL_MPI" => Self::BlueGeneL,
            "BGP_MPI" => Self::BlueGeneP,
            "BGQ_MPI" => Self::BlueGeneQ,
            "HP_MPI" => Self::HpMpi,
            "MSMPI" => Self::MsMpi,
            "MPIBULL2" => Self::MpiBull2,
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for MpiVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mpich2 => "MPICH2",
            Self::Mpich1 => "MPICH1",
            Self::OpenMpi => "OpenMPI",
            Self::Lam => "LAM_MPI",
            Self::BlueGeneL => "BGL_MPI",
            Self::BlueGeneP => "BGP_MPI",
            Self::BlueGeneQ => "BGQ_MPI",
            Self::HpMpi => "HP_MPI",
            Self::MsMpi => "MSMPI",
            Self::MpiBull2 => "MPIBULL2",
            Self::Other(name) => name,
        })
    }
}

impl Serialize for MpiVariant {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl MpiVariant {
    /// launcher executables searched for this variant, in priority order
    pub fn launcher_names(&self) -> &'static [&'static str] {
        match self {
            Self::Mpich2 | Self::MpiBull2 => &mpich2::LAUNCHERS,
            Self::Mpich1 => &mpich1::LAUNCHERS,
            Self::OpenMpi => &openmpi::LAUNCHERS,
            Self::Lam => &lam::LAUNCHERS,
            Self::HpMpi => &hpmpi::LAUNCHERS,
            Self::MsMpi => &msmpi::LAUNCHERS,
            Self::BlueGeneL | Self::BlueGeneP | Self::BlueGeneQ | Self::Other(_) => &[],
        }
    }
}

/// Process managers of the MPICH2 family, they need different bootstrap commands
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessManager {
    Hydra,
    Mpd,
    Gforker,
}

impl fmt::Display for ProcessManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hydra => "hydra",
            Self::Mpd => "mpd",
            Self::Gforker => "gforker",
        })
    }
}

/// Set of MPMD (multiple program, multiple data) launch modes a launcher supports
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MpmdModes(u8);

impl MpmdModes {
    pub const NONE: Self = Self(0);
    /// `mpiexec` colon separated syntax
    pub const MPIEXEC: Self = Self(1 << 0);
    /// `mpiexec -configfile` syntax
    pub const CONFIGFILE: Self = Self(1 << 1);
    pub const SCRIPT: Self = Self(1 << 2);
    pub const EXECVE: Self = Self(1 << 3);

    const NAMES: [(Self, &'static str); 4] = [
        (Self::MPIEXEC, "mpiexec"),
        (Self::CONFIGFILE, "configfile"),
        (Self::SCRIPT, "script"),
        (Self::EXECVE, "execve"),
    ];

    pub fn contains(&self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(mode, _)| self.contains(*mode))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for MpmdModes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Serialize for MpmdModes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

/// Everything launcher selection depends on besides the variant itself
pub struct SelectContext<'a> {
    env: &'a EnvSnapshot,
    runner: &'a dyn CommandRunner,
    bindir: Option<&'a Path>,
    resources: Option<&'a ResourceInfo>,
    wdir: Option<&'a Path>,
    os_name: String,
}

impl<'a> SelectContext<'a> {
    pub fn new(env: &'a EnvSnapshot, runner: &'a dyn CommandRunner) -> Self {
        Self {
            env,
            runner,
            bindir: None,
            resources: None,
            wdir: None,
            os_name: SYSTEM_NAME.clone(),
        }
    }

    /// directory of the configured MPI installation, searched before `PATH`
    pub fn with_bindir(mut self, bindir: Option<&'a Path>) -> Self {
        self.bindir = bindir.filter(|dir| !dir.as_os_str().is_empty());
        self
    }

    pub fn with_resources(mut self, resources: Option<&'a ResourceInfo>) -> Self {
        self.resources = resources;
        self
    }

    /// directory generated hosts files are written to
    pub fn with_wdir(mut self, wdir: Option<&'a Path>) -> Self {
        self.wdir = wdir;
        self
    }

    /// operating system name as reported by uname, e.g., `Linux` or `AIX`
    pub fn with_os_name(mut self, os_name: impl Into<String>) -> Self {
        self.os_name = os_name.into();
        self
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        self.bindir
            .map(Path::to_path_buf)
            .into_iter()
            .chain(self.env.path_dirs())
            .collect()
    }

    fn in_bindir(&self, dir: &Path) -> bool {
        self.bindir.map(|bindir| bindir == dir).unwrap_or(false)
    }

    /// Command for `name` living in `dir`: absolute inside the MPI bindir,
    /// bare otherwise so the script relies on `PATH`
    fn command_in(&self, dir: &Path, name: &str) -> String {
        if self.in_bindir(dir) {
            dir.join(name).to_string_lossy().into_owned()
        } else {
            name.to_string()
        }
    }

    /// first of `names` found in the search directories, directories take precedence
    fn find_launcher(&self, names: &[&'static str]) -> Option<Launcher> {
        self.search_dirs().into_iter().find_map(|dir| {
            names
                .iter()
                .find(|name| dir.join(name).is_file())
                .map(|name| Launcher {
                    command: self.command_in(&dir, name),
                    path: dir.join(name),
                    name: *name,
                    dir,
                })
        })
    }

    fn manager(&self) -> SchedulerKind {
        self.resources
            .map(ResourceInfo::manager)
            .unwrap_or_default()
    }

    fn processes_per_node(&self) -> Option<usize> {
        self.resources.map(ResourceInfo::processes_per_node)
    }

    fn hosts_file(&self) -> Result<Option<HostsFile>, ProbeError> {
        match self.resources {
            Some(resources) => resources.hosts_file(self.wdir, self.runner),
            None => Ok(None),
        }
    }

    fn hosts_list(&self) -> Result<Option<Vec<String>>, ProbeError> {
        match self.resources {
            Some(resources) => resources.hosts_list(self.runner),
            None => Ok(None),
        }
    }
}

/// operating system name as reported by uname
static SYSTEM_NAME: Lazy<String> = Lazy::new(|| match nix::sys::utsname::uname() {
    Ok(name) => name.sysname().to_string_lossy().into_owned(),
    Err(error) => {
        warn!(error = ?error, "Failed to determine the operating system name");
        String::new()
    }
});

/// A launcher executable found in the search directories
#[derive(Debug, Clone)]
struct Launcher {
    dir: PathBuf,
    name: &'static str,
    path: PathBuf,
    /// what generated scripts should call
    command: String,
}

/// Launcher setup for a specific MPI implementation and resource manager
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct MpiEnvironment {
    variant: MpiVariant,
    process_manager: Option<ProcessManager>,
    launcher: Option<String>,
    launcher_options: Vec<String>,
    np_flag: Option<String>,
    per_node_flag: Option<String>,
    separator: Option<String>,
    exe_flag: Option<String>,
    args_flag: Option<String>,
    boot: Option<String>,
    halt: Option<String>,
    gen_hostsfile: Option<String>,
    del_hostsfile: Option<String>,
    mpmd: MpmdModes,
    info_commands: Vec<String>,
}

impl MpiEnvironment {
    /// Select launcher, flags and boot/halt commands for `variant`.
    ///
    /// Fails if the detected resource manager can't be served by the variant.
    #[tracing::instrument(level = "debug", skip(context))]
    pub fn select(variant: &MpiVariant, context: &SelectContext) -> Result<Self, ConfigErrors> {
        let mut builder = MpiEnvironmentBuilder::new(variant.clone());

        match variant {
            MpiVariant::Mpich2 => mpich2::init(context, &mut builder)?,
            MpiVariant::Mpich1 => mpich1::init(context, &mut builder)?,
            MpiVariant::OpenMpi => openmpi::init(context, &mut builder)?,
            MpiVariant::Lam => lam::init(context, &mut builder)?,
            MpiVariant::BlueGeneL => bluegene::init_l(&mut builder),
            MpiVariant::BlueGeneP => bluegene::init_p(&mut builder),
            MpiVariant::BlueGeneQ => bluegene::init_q(context, &mut builder),
            MpiVariant::HpMpi => hpmpi::init(context, &mut builder),
            MpiVariant::MsMpi => msmpi::init(&mut builder),
            MpiVariant::MpiBull2 => mpibull2::init(context, &mut builder)?,
            MpiVariant::Other(_) => other::init(context, &mut builder)?,
        }

        let environment = builder.build();
        info!(
            variant = %environment.variant,
            launcher = ?environment.launcher_command(),
            "Selected MPI launcher"
        );

        Ok(environment)
    }

    pub fn variant(&self) -> &MpiVariant {
        &self.variant
    }

    pub fn process_manager(&self) -> Option<ProcessManager> {
        self.process_manager
    }

    /// launcher executable without options
    pub fn launcher(&self) -> Option<&str> {
        self.launcher.as_deref()
    }

    pub fn launcher_options(&self) -> &[String] {
        &self.launcher_options
    }

    /// launcher followed by its fixed options, ready to be written to a script
    pub fn launcher_command(&self) -> Option<String> {
        self.launcher.as_ref().map(|launcher| {
            std::iter::once(launcher.as_str())
                .chain(self.launcher_options.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ")
        })
    }

    /// Flag preceding the process count. Surrounding blanks are part of the flag since
    /// some launchers expect the count glued to it (`srun -n4`, `--ntasks=4`).
    pub fn np_flag(&self) -> Option<&str> {
        self.np_flag.as_deref()
    }

    /// processes per node option including its value
    pub fn per_node_flag(&self) -> Option<&str> {
        self.per_node_flag.as_deref()
    }

    pub fn separator(&self) -> Option<&str> {
        self.separator.as_deref()
    }

    pub fn exe_flag(&self) -> Option<&str> {
        self.exe_flag.as_deref()
    }

    pub fn args_flag(&self) -> Option<&str> {
        self.args_flag.as_deref()
    }

    /// shell fragment starting the MPI daemons, if they have to be managed
    pub fn boot(&self) -> Option<&str> {
        self.boot.as_deref()
    }

    /// shell fragment stopping the MPI daemons started by `boot`
    pub fn halt(&self) -> Option<&str> {
        self.halt.as_deref()
    }

    pub fn gen_hostsfile(&self) -> Option<&str> {
        self.gen_hostsfile.as_deref()
    }

    pub fn del_hostsfile(&self) -> Option<&str> {
        self.del_hostsfile.as_deref()
    }

    pub fn mpmd(&self) -> MpmdModes {
        self.mpmd
    }

    pub fn info_commands(&self) -> &[String] {
        &self.info_commands
    }

    /// copy without the given MPMD mode, e.g., when a run can't use configuration files
    pub fn without_mpmd_mode(&self, mode: MpmdModes) -> Self {
        Self {
            mpmd: self.mpmd.without(mode),
            ..self.clone()
        }
    }

    /// run the info commands of the implementation, one output block each
    pub fn info(&self, runner: &dyn CommandRunner) -> String {
        self.info_commands
            .iter()
            .map(|command| {
                debug!("Querying MPI information with {command}");
                runner.output(command) + "\n"
            })
            .collect()
    }
}

/// Mutable state of a launcher setup while an implementation specific `init` runs
#[derive(Debug, Clone)]
struct MpiEnvironmentBuilder {
    variant: MpiVariant,
    process_manager: Option<ProcessManager>,
    launcher: Option<String>,
    launcher_options: Vec<String>,
    np_flag: Option<String>,
    per_node_flag: Option<String>,
    separator: Option<String>,
    exe_flag: Option<String>,
    args_flag: Option<String>,
    boot: Option<String>,
    halt: Option<String>,
    gen_hostsfile: Option<String>,
    del_hostsfile: Option<String>,
    mpmd: MpmdModes,
    info_commands: Vec<String>,
}

impl MpiEnvironmentBuilder {
    fn new(variant: MpiVariant) -> Self {
        Self {
            variant,
            process_manager: None,
            launcher: None,
            launcher_options: Vec::new(),
            np_flag: None,
            per_node_flag: None,
            separator: None,
            exe_flag: None,
            args_flag: None,
            boot: None,
            halt: None,
            gen_hostsfile: None,
            del_hostsfile: None,
            mpmd: MpmdModes::NONE,
            info_commands: Vec::new(),
        }
    }

    /// replace the launcher, options of the previous launcher don't apply anymore
    fn set_launcher(&mut self, launcher: impl Into<String>) {
        self.launcher = Some(launcher.into());
        self.launcher_options.clear();
    }

    fn option(&mut self, option: String) {
        self.launcher_options.push(option);
    }

    fn build(self) -> MpiEnvironment {
        MpiEnvironment {
            variant: self.variant,
            process_manager: self.process_manager,
            launcher: self.launcher,
            launcher_options: self.launcher_options,
            np_flag: self.np_flag,
            per_node_flag: self.per_node_flag,
            separator: self.separator,
            exe_flag: self.exe_flag,
            args_flag: self.args_flag,
            boot: self.boot,
            halt: self.halt,
            gen_hostsfile: self.gen_hostsfile,
            del_hostsfile: self.del_hostsfile,
            mpmd: self.mpmd,
            info_commands: self.info_commands,
        }
    }
}
