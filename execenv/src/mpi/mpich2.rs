use super::{Launcher, MpiEnvironmentBuilder, MpmdModes, ProcessManager, SelectContext};
use crate::{batch::SchedulerKind, config::ConfigErrors};
use tracing::{debug, warn};

pub const LAUNCHERS: [&str; 7] = [
    "mpiexec.mpich2",
    "mpiexec",
    "mpiexec.hydra",
    "mpiexec.mpd",
    "mpiexec.gforker",
    "mpirun.mpich2",
    "mpirun",
];

/// resource managers Hydra talks to on its own, no hosts file needed
const HYDRA_NATIVE: [SchedulerKind; 5] = [
    SchedulerKind::Pbs,
    SchedulerKind::LoadLeveler,
    SchedulerKind::Lsf,
    SchedulerKind::Sge,
    SchedulerKind::Slurm,
];

/// converts a PBS node file to the `host:count` format of mpdboot
const PBS_TO_MPD_NODES: &str = r#"sort $PBS_NODEFILE | uniq -c | awk '{ printf("%s:%s\n", $2, $1); }' > ./mpd.nodes"#;

/// Determine the process manager from the output of a launcher run without arguments
pub fn classify_banner(banner: &str) -> Option<ProcessManager> {
    if banner.contains("Hydra") {
        Some(ProcessManager::Hydra)
    } else if banner.contains(" mpd ") {
        Some(ProcessManager::Mpd)
    } else if banner.contains("-usize") {
        Some(ProcessManager::Gforker)
    } else {
        None
    }
}

fn process_manager(context: &SelectContext, launcher: &Launcher) -> Option<ProcessManager> {
    match launcher.name {
        "mpiexec.hydra" => Some(ProcessManager::Hydra),
        "mpiexec.mpd" => Some(ProcessManager::Mpd),
        "mpiexec.gforker" => Some(ProcessManager::Gforker),
        _ => {
            // generic names may belong to any process manager, ask the launcher itself
            let banner = context.runner.outputs(&launcher.path.to_string_lossy());
            let manager = classify_banner(&banner);
            debug!(launcher = ?launcher.path, manager = ?manager, "Inspected launcher banner");

            manager
        }
    }
}

/// MPD ring management commands
struct MpdTools {
    boot: String,
    halt: String,
    trace: String,
    listjobs: String,
}

fn use_root_mpd(context: &SelectContext) -> bool {
    context
        .env
        .get("MPD_USE_ROOT_MPD")
        .and_then(|value| value.trim().parse::<i64>().ok())
        .map(|value| value != 0)
        .unwrap_or(false)
}

/// Setup for MPICH2 and its four process managers.
///
/// Hydra integrates with batch systems directly, MPD runs a ring of daemons which
/// is booted and halted around the run unless one is already up, gforker runs
/// everything on the local machine.
pub(super) fn init(
    context: &SelectContext,
    builder: &mut MpiEnvironmentBuilder,
) -> Result<(), ConfigErrors> {
    let found = context.find_launcher(&LAUNCHERS);
    let manager = found
        .as_ref()
        .and_then(|launcher| process_manager(context, launcher));
    let launcher_name = found.as_ref().map(|launcher| launcher.name).unwrap_or("mpiexec");

    builder.set_launcher(
        found
            .as_ref()
            .map(|launcher| launcher.command.clone())
            .unwrap_or_else(|| "mpiexec".to_string()),
    );
    builder.process_manager = manager;

    // mpirun wraps mpdboot and mpdallexit itself, a root MPD needs no setup either
    let mut tools = match &found {
        Some(launcher)
            if manager == Some(ProcessManager::Mpd)
                && !launcher_name.starts_with("mpirun")
                && !use_root_mpd(context)
                && launcher.dir.join("mpdboot").is_file() =>
        {
            Some(MpdTools {
                boot: context.command_in(&launcher.dir, "mpdboot"),
                halt: context.command_in(&launcher.dir, "mpdallexit"),
                trace: context.command_in(&launcher.dir, "mpdtrace"),
                listjobs: context.command_in(&launcher.dir, "mpdlistjobs"),
            })
        }
        _ => None,
    };

    if launcher_name.starts_with("mpiexec") {
        builder.mpmd = MpmdModes::MPIEXEC | MpmdModes::CONFIGFILE | MpmdModes::SCRIPT;
        builder.np_flag = Some(" -n ".to_string());
    } else if launcher_name.starts_with("mpirun") {
        builder.mpmd = MpmdModes::SCRIPT;
        builder.np_flag = Some(" -np ".to_string());
    }

    match manager {
        Some(ProcessManager::Mpd) => match context.manager() {
            SchedulerKind::Slurm => {
                // requires MPICH2 linked against the PMI library of SLURM
                builder.set_launcher("srun");
                builder.np_flag = Some(" -n".to_string());
                builder.mpmd = MpmdModes::SCRIPT;
                tools = None;
            }
            SchedulerKind::Pbs => {
                if let Some(tools) = tools.as_mut() {
                    builder.gen_hostsfile = Some(PBS_TO_MPD_NODES.to_string());
                    builder.del_hostsfile = Some("rm -f ./mpd.nodes".to_string());
                    tools.boot.push_str(" --file=./mpd.nodes");
                }
            }
            _ => {
                if let Some(tools) = tools.as_mut() {
                    if let Some(hosts_file) = context.hosts_file()? {
                        tools.boot.push_str(&format!(" --file={hosts_file}"));
                    }
                }
            }
        },
        Some(ProcessManager::Hydra) => {
            if !HYDRA_NATIVE.contains(&context.manager()) {
                if let Some(hosts_file) = context.hosts_file()? {
                    builder.option(format!("-f {hosts_file}"));
                }
            }

            if let Some(ppn) = context.processes_per_node().filter(|ppn| *ppn != 1) {
                builder.per_node_flag = Some(format!(" -ppn {ppn}"));
            }
        }
        Some(ProcessManager::Gforker) => {
            if context.hosts_list()?.is_some() || context.hosts_file()?.is_some() {
                warn!("Hosts list will be ignored by the MPICH2 gforker process manager");
            }
        }
        None => {}
    }

    // boot only if mpdtrace finds no ring, halt only once mpdlistjobs shows no jobs
    if let Some(tools) = tools {
        builder.boot = Some(format!(
            "{} > /dev/null 2>&1\nif test $? != 0 ; then {} ; fi",
            tools.trace, tools.boot
        ));
        builder.halt = Some(format!(
            "listjobs=`{} | wc -l`\nif test $listjobs = 0 ; then {} ; fi",
            tools.listjobs, tools.halt
        ));
    }

    builder.info_commands = vec!["mpich2version".to_string()];

    Ok(())
}
