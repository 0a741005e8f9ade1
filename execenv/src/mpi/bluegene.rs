use super::{MpiEnvironmentBuilder, MpmdModes, SelectContext};
use crate::batch::SchedulerKind;

const BGL_MPIRUN: &str = "/bgl/BlueLight/ppcfloor/bglsys/mpi/mpirun";

/// Blue Gene/L, executable and arguments are passed through dedicated flags
pub(super) fn init_l(builder: &mut MpiEnvironmentBuilder) {
    builder.set_launcher(BGL_MPIRUN);
    builder.np_flag = None;
    builder.mpmd = MpmdModes::EXECVE;
    builder.exe_flag = Some("-exe".to_string());
    builder.args_flag = Some("-args".to_string());
}

/// Blue Gene/P
pub(super) fn init_p(builder: &mut MpiEnvironmentBuilder) {
    builder.set_launcher("mpiexec");
    builder.np_flag = None;
    builder.mpmd = MpmdModes::CONFIGFILE;
}

/// Blue Gene/Q, runjob unless the partition is allocated through SLURM
pub(super) fn init_q(context: &SelectContext, builder: &mut MpiEnvironmentBuilder) {
    let ppn = context.processes_per_node().unwrap_or(1);

    if context.manager() == SchedulerKind::Slurm {
        builder.set_launcher("srun");
        builder.np_flag = Some(" --ntasks=".to_string());
        if ppn != 1 {
            builder.per_node_flag = Some(format!(" --ntasks-per-node={ppn}"));
        }
    } else {
        builder.set_launcher("runjob");
        builder.np_flag = Some(" --np ".to_string());
        if ppn != 1 {
            builder.per_node_flag = Some(format!(" --ranks-per-node {ppn}"));
        }
        builder.separator = Some(":".to_string());
    }

    builder.mpmd = MpmdModes::NONE;
}
