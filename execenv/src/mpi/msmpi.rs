use super::{MpiEnvironmentBuilder, MpmdModes};

pub const LAUNCHERS: [&str; 1] = ["mpiexec.exe"];

/// Microsoft MPI, found through `PATH` and driven by independent smpd daemons
pub(super) fn init(builder: &mut MpiEnvironmentBuilder) {
    builder.set_launcher(LAUNCHERS[0]);
    builder.mpmd = MpmdModes::MPIEXEC | MpmdModes::CONFIGFILE;
    builder.np_flag = Some(" -n ".to_string());
}
