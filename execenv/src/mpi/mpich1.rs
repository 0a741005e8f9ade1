use super::{MpiEnvironmentBuilder, MpmdModes, SelectContext};
use crate::config::ConfigErrors;

pub const LAUNCHERS: [&str; 4] = [
    "mpirun.mpich",
    "mpirun.mpich-mpd",
    "mpirun.mpich-shmem",
    "mpirun",
];

/// MPICH1, the ch_p4mpd daemons are left to the user or environment
pub(super) fn init(
    context: &SelectContext,
    builder: &mut MpiEnvironmentBuilder,
) -> Result<(), ConfigErrors> {
    builder.set_launcher(
        context
            .find_launcher(&LAUNCHERS)
            .map(|launcher| launcher.command)
            .unwrap_or_else(|| "mpirun".to_string()),
    );
    builder.np_flag = Some(" -np ".to_string());
    builder.mpmd = MpmdModes::SCRIPT;

    if let Some(hosts_file) = context.hosts_file()? {
        builder.option(format!("-machinefile {hosts_file}"));
    }

    builder.info_commands = vec!["mpichversion".to_string()];

    Ok(())
}
