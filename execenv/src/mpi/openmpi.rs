use super::{MpiEnvironmentBuilder, MpmdModes, SelectContext};
use crate::{batch::SchedulerKind, config::ConfigErrors};
use std::path::Path;
use tracing::debug;

pub const LAUNCHERS: [&str; 4] = ["mpiexec.openmpi", "mpirun.openmpi", "mpiexec", "mpirun"];

/// component name `ompi_info` lists when support for a resource manager was built in
fn ras_component(manager: SchedulerKind) -> Option<&'static str> {
    match manager {
        SchedulerKind::Slurm => Some(" slurm "),
        SchedulerKind::Lsf => Some(" lsf "),
        SchedulerKind::LoadLeveler => Some(" loadleveler "),
        SchedulerKind::Sge => Some(" gridengine "),
        SchedulerKind::Pbs | SchedulerKind::None => None,
    }
}

/// whether this Open MPI build picks up the allocation of `manager` by itself
fn knows_manager(context: &SelectContext, manager: SchedulerKind, ompi_info: Option<&Path>) -> bool {
    if manager == SchedulerKind::Pbs {
        return true;
    }

    match (ras_component(manager), ompi_info.filter(|path| path.is_file())) {
        (Some(component), Some(ompi_info)) => {
            let known = context
                .runner
                .output(&ompi_info.to_string_lossy())
                .contains(component);
            debug!(manager = %manager, known, "Checked Open MPI resource manager support");

            known
        }
        _ => false,
    }
}

pub(super) fn init(
    context: &SelectContext,
    builder: &mut MpiEnvironmentBuilder,
) -> Result<(), ConfigErrors> {
    let found = context.find_launcher(&LAUNCHERS);
    let ompi_info = found.as_ref().map(|launcher| launcher.dir.join("ompi_info"));
    let launcher_name = found.as_ref().map(|launcher| launcher.name).unwrap_or("mpiexec");

    builder.set_launcher(
        found
            .as_ref()
            .map(|launcher| launcher.command.clone())
            .unwrap_or_else(|| "mpiexec".to_string()),
    );
    builder.np_flag = Some(" -n ".to_string());

    if let Some(ppn) = context.processes_per_node().filter(|ppn| *ppn != 1) {
        builder.per_node_flag = Some(format!(" --npernode {ppn}"));
    }

    if launcher_name.starts_with("mpiexec") {
        builder.mpmd = MpmdModes::MPIEXEC | MpmdModes::SCRIPT;
    } else if launcher_name.starts_with("mpirun") {
        builder.mpmd = MpmdModes::SCRIPT;
    }

    if context.resources.is_some()
        && !knows_manager(context, context.manager(), ompi_info.as_deref())
    {
        if let Some(hosts_file) = context.hosts_file()? {
            builder.option(format!("--machinefile {hosts_file}"));
        }
    }

    builder.info_commands = vec!["ompi_info -a".to_string()];

    Ok(())
}
