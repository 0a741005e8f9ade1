use super::{mpich2, MpiEnvironmentBuilder, MpmdModes, SelectContext};
use crate::{batch::SchedulerKind, config::ConfigErrors};

/// MPIBULL2 is MPICH2 based, but on SLURM systems srun replaces the MPD setup
pub(super) fn init(
    context: &SelectContext,
    builder: &mut MpiEnvironmentBuilder,
) -> Result<(), ConfigErrors> {
    mpich2::init(context, builder)?;

    match context.manager() {
        SchedulerKind::Slurm => {
            builder.set_launcher("srun");
            builder.mpmd = MpmdModes::SCRIPT;
            builder.np_flag = None;
            builder.boot = None;
            builder.halt = None;
            builder.gen_hostsfile = None;
            builder.del_hostsfile = None;
        }
        SchedulerKind::None => {}
        manager => {
            return Err(ConfigErrors::UnsupportedCombination {
                variant: builder.variant.to_string(),
                manager,
            })
        }
    }

    builder.info_commands = vec!["mpibull2-version".to_string()];

    Ok(())
}
