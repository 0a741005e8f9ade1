use super::{MpiEnvironmentBuilder, MpmdModes, SelectContext};
use crate::batch::SchedulerKind;

pub const LAUNCHERS: [&str; 1] = ["mpirun"];

/// HP-MPI and its successor Platform MPI, both keep the mpirun syntax
pub(super) fn init(context: &SelectContext, builder: &mut MpiEnvironmentBuilder) {
    builder.set_launcher(
        context
            .find_launcher(&LAUNCHERS)
            .map(|launcher| launcher.command)
            .unwrap_or_else(|| "mpirun".to_string()),
    );
    builder.mpmd = MpmdModes::SCRIPT;
    builder.np_flag = Some("-np".to_string());

    match context.manager() {
        SchedulerKind::Slurm => {
            // process count comes from the allocation
            builder.option("-srun".to_string());
            builder.np_flag = None;
        }
        SchedulerKind::Lsf => builder.option("-lsb_hosts".to_string()),
        _ => {}
    }
}
