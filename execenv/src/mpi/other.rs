use super::{MpiEnvironmentBuilder, MpmdModes, SelectContext};
use crate::{config::ConfigErrors, exec::find_executable};
use tracing::debug;

/// Generic setup for MPI implementations without dedicated support.
///
/// Only Tru64 (prun) and AIX (poe) launchers are known, anything else has to be
/// started through a script without a launcher, which is impossible inside an
/// allocation of a resource manager.
pub(super) fn init(
    context: &SelectContext,
    builder: &mut MpiEnvironmentBuilder,
) -> Result<(), ConfigErrors> {
    let path = context.env.path_dirs();

    match context.os_name.as_str() {
        "OSF1" if find_executable("prun", path.as_slice()).is_some() => {
            builder.set_launcher("prun");
            builder.np_flag = Some(" -n ".to_string());
        }
        "AIX" if find_executable("poe", path.as_slice()).is_some() => {
            builder.set_launcher("poe");
            builder.np_flag = None;
        }
        os_name => debug!(os_name, "No launcher known for this system"),
    }

    builder.mpmd = MpmdModes::SCRIPT;

    let manager = context.manager();
    if builder.launcher.is_none() && manager.is_some() {
        return Err(ConfigErrors::UnsupportedCombination {
            variant: builder.variant.to_string(),
            manager,
        });
    }

    Ok(())
}
