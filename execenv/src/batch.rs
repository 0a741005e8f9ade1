use crate::{env::EnvSnapshot, exec::CommandRunner};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Batch schedulers (and resource managers) known to the prober
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchedulerKind {
    #[default]
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "LSF")]
    Lsf,
    #[serde(rename = "PBS")]
    Pbs,
    #[serde(rename = "LOADL")]
    LoadLeveler,
    #[serde(rename = "SGE")]
    Sge,
    #[serde(rename = "SLURM")]
    Slurm,
}

impl SchedulerKind {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn is_some(&self) -> bool {
        !self.is_none()
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "NONE",
            Self::Lsf => "LSF",
            Self::Pbs => "PBS",
            Self::LoadLeveler => "LOADL",
            Self::Sge => "SGE",
            Self::Slurm => "SLURM",
        })
    }
}

/// Job marker variables in probing order, the first one present decides the scheduler.
/// Order matters when jobs are nested, e.g., a SLURM allocation started from an LSF job.
pub const SCHEDULER_MARKERS: [(SchedulerKind, &str); 5] = [
    (SchedulerKind::Lsf, "LSB_JOBID"),
    (SchedulerKind::Pbs, "PBS_JOBID"),
    (SchedulerKind::LoadLeveler, "LOADL_JOB_NAME"),
    (SchedulerKind::Sge, "SGE_TASK_ID"),
    (SchedulerKind::Slurm, "SLURM_JOBID"),
];

/// Information about the batch job this process runs in
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchInfo {
    pub kind: SchedulerKind,
    pub submit_dir: Option<String>,
    pub job_file: Option<String>,
    pub job_name: Option<String>,
    pub job_id: Option<String>,
    pub queue: Option<String>,
}

impl BatchInfo {
    /// detect the batch scheduler from the job marker variables
    pub fn detect(env: &EnvSnapshot) -> Self {
        let kind = SCHEDULER_MARKERS
            .iter()
            .find(|(_, marker)| env.contains(marker))
            .map(|(kind, _)| *kind)
            .unwrap_or_default();

        let get = |name: &str| env.get(name).map(str::to_string);

        let info = match kind {
            SchedulerKind::None => Self::default(),
            SchedulerKind::Lsf => Self {
                kind,
                submit_dir: get("LS_SUBCWDIR"),
                job_file: get("LSB_JOBFILENAME"),
                job_name: get("LSB_JOBNAME"),
                job_id: get("LSB_BATCH_JID"),
                queue: get("LSB_QUEUE"),
            },
            SchedulerKind::Pbs => Self {
                kind,
                submit_dir: get("PBS_O_WORKDIR"),
                job_file: None,
                job_name: get("PBS_JOBNAME"),
                job_id: get("PBS_JOBID"),
                queue: get("PBS_QUEUE"),
            },
            SchedulerKind::LoadLeveler => Self {
                kind,
                submit_dir: get("LOADL_STEP_INITDIR"),
                job_file: get("LOADL_STEP_COMMAND"),
                job_name: get("LOADL_JOB_NAME"),
                job_id: get("LOADL_STEP_ID"),
                queue: get("LOADL_STEP_CLASS"),
            },
            SchedulerKind::Sge => Self {
                kind,
                submit_dir: get("SGE_O_WORKDIR"),
                job_file: None,
                job_name: get("JOB_NAME"),
                job_id: get("JOB_ID"),
                queue: get("QUEUE"),
            },
            SchedulerKind::Slurm => Self {
                kind,
                submit_dir: get("SLURM_SUBMIT_DIR"),
                job_file: None,
                job_name: get("SLURM_JOB_NAME"),
                job_id: get("SLURM_JOBID"),
                queue: get("SLURM_PARTITION"),
            },
        };

        debug!(scheduler = %info.kind, job_id = ?info.job_id, "Detected batch environment");

        info
    }

    /// Remaining wall time of the job as reported by the scheduler.
    /// Only PBS exposes this, every other scheduler yields `None`.
    pub fn remaining_time(&self, runner: &dyn CommandRunner) -> Option<String> {
        match (self.kind, self.job_id.as_deref()) {
            (SchedulerKind::Pbs, Some(job_id)) => {
                let output = runner.output(&format!("qstat -r {job_id}"));

                output
                    .lines()
                    .find(|line| line.contains(job_id))
                    // column 9 of the qstat -r listing is the remaining time
                    .and_then(|line| line.split_whitespace().nth(8))
                    .map(str::to_string)
            }
            _ => None,
        }
    }
}
