use super::{MpiEnvironmentBuilder, MpmdModes, SelectContext};
use crate::config::ConfigErrors;

pub const LAUNCHERS: [&str; 4] = ["mpiexec.lam", "mpirun.lam", "mpiexec", "mpirun"];

/// LAM/MPI, daemons are started with lamboot next to the launcher
pub(super) fn init(
    context: &SelectContext,
    builder: &mut MpiEnvironmentBuilder,
) -> Result<(), ConfigErrors> {
    let found = context.find_launcher(&LAUNCHERS);
    let launcher_name = found.as_ref().map(|launcher| launcher.name).unwrap_or("mpiexec");

    let (mut boot, mut halt) = match &found {
        Some(launcher) if launcher.dir.join("lamboot").is_file() => (
            Some(context.command_in(&launcher.dir, "lamboot") + " -v"),
            Some(context.command_in(&launcher.dir, "lamhalt") + " -v"),
        ),
        _ => (None, None),
    };

    builder.set_launcher(
        found
            .map(|launcher| launcher.command)
            .unwrap_or_else(|| "mpiexec".to_string()),
    );

    if launcher_name.starts_with("mpiexec") {
        builder.np_flag = Some(" -n ".to_string());
        builder.mpmd = MpmdModes::MPIEXEC | MpmdModes::SCRIPT;
    } else if launcher_name.starts_with("mpirun") {
        builder.np_flag = Some(" -np ".to_string());
        builder.mpmd = MpmdModes::SCRIPT;
    }

    if let (Some(boot), Some(halt)) = (boot.as_mut(), halt.as_mut()) {
        if let Some(hosts_file) = context.hosts_file()? {
            boot.push_str(&format!(" {hosts_file}"));
            halt.push_str(&format!(" {hosts_file}"));
        }
        boot.push_str(" || exit $?");
    }

    builder.boot = boot;
    builder.halt = halt;
    builder.info_commands = vec!["laminfo -all".to_string()];

    Ok(())
}
