use super::{HostsFile, ResourceInfo};
use crate::{batch::SchedulerKind, env::EnvSnapshot, exec::fake::FakeRunner};
use std::fs;

#[test]
fn no_scheduler_falls_back_to_default() {
    let info = ResourceInfo::detect(&EnvSnapshot::default(), None, Some(2)).unwrap();

    assert_eq!(info.batch().kind, SchedulerKind::None);
    assert_eq!(info.manager(), SchedulerKind::None);
    assert_eq!(info.process_count(), Some(2));
    assert_eq!(info.node_count(), None);
    assert_eq!(info.processes_per_node(), 1);
    assert_eq!(info.hosts_file(None, &FakeRunner::new()).unwrap(), None);
}

#[test]
fn slurm_nprocs() {
    let env = EnvSnapshot::from_pairs([
        ("SLURM_JOBID", "1"),
        ("SLURM_NPROCS", "32"),
        ("SLURM_NNODES", "4"),
    ]);
    let info = ResourceInfo::detect(&env, None, Some(1)).unwrap();

    assert_eq!(info.manager(), SchedulerKind::Slurm);
    assert_eq!(info.process_count(), Some(32));
    assert_eq!(info.node_count(), Some(4));
    assert_eq!(info.processes_per_node(), 8);
}

#[test]
fn slurm_tasks_per_node() {
    let env = EnvSnapshot::from_pairs([
        ("SLURM_JOBID", "1"),
        ("SLURM_NNODES", "4"),
        ("SLURM_TASKS_PER_NODE", "2(x3),1"),
    ]);
    let info = ResourceInfo::detect(&env, None, None).unwrap();

    assert_eq!(info.process_count(), Some(7));
    assert_eq!(info.node_count(), Some(4));
}

#[test]
fn slurm_nodes_only() {
    let env = EnvSnapshot::from_pairs([("SLURM_NNODES", "3")]);
    let info = ResourceInfo::detect(&env, None, None).unwrap();

    assert_eq!(info.manager(), SchedulerKind::Slurm);
    assert_eq!(info.process_count(), Some(3));
}

#[test]
fn malformed_count_is_reported() {
    let env = EnvSnapshot::from_pairs([("SLURM_NPROCS", "many")]);

    assert!(ResourceInfo::detect(&env, None, None).is_err());
}

#[test]
fn override_wins_over_detected_count() {
    let env = EnvSnapshot::from_pairs([("SLURM_NPROCS", "16"), ("SLURM_NNODES", "2")]);
    let info = ResourceInfo::detect(&env, Some(4), Some(1)).unwrap();

    assert_eq!(info.process_count(), Some(4));
    assert_eq!(info.processes_per_node(), 2);
}

#[test]
fn slurm_hosts_list_from_node_list() {
    let env = EnvSnapshot::from_pairs([
        ("SLURM_JOBID", "1"),
        ("SLURM_NNODES", "2"),
        ("SLURM_TASKS_PER_NODE", "2,1"),
        ("SLURM_NODELIST", "node[07-08]"),
    ]);
    let info = ResourceInfo::detect(&env, None, None).unwrap();
    let runner = FakeRunner::new();

    assert_eq!(
        info.hosts_list(&runner).unwrap().unwrap(),
        vec!["node07", "node07", "node08"]
    );
    assert!(runner.calls.borrow().is_empty());
}

#[test]
fn slurm_hosts_list_from_srun() {
    let env = EnvSnapshot::from_pairs([("SLURM_NNODES", "2")]);
    let info = ResourceInfo::detect(&env, None, None).unwrap();
    let runner = FakeRunner::new().respond("srun hostname -s", "n2\nn1\n");

    assert_eq!(info.hosts_list(&runner).unwrap().unwrap(), vec!["n1", "n2"]);
}

#[test]
fn lsf_mcpu_hosts() {
    let env = EnvSnapshot::from_pairs([
        ("LSB_JOBID", "77"),
        ("LSB_MCPU_HOSTS", "hostA 4 hostB 2"),
    ]);
    let info = ResourceInfo::detect(&env, None, None).unwrap();

    assert_eq!(info.manager(), SchedulerKind::Lsf);
    assert_eq!(info.process_count(), Some(6));
    assert_eq!(info.node_count(), Some(2));
    assert_eq!(
        info.hosts_list(&FakeRunner::new()).unwrap().unwrap(),
        vec!["hostA", "hostA", "hostA", "hostA", "hostB", "hostB"]
    );
}

#[test]
fn lsf_hosts_are_deduplicated_for_nodes() {
    let env = EnvSnapshot::from_pairs([("LSB_JOBID", "77"), ("LSB_HOSTS", "b a b a b")]);
    let info = ResourceInfo::detect(&env, None, None).unwrap();

    assert_eq!(info.process_count(), Some(5));
    assert_eq!(info.node_count(), Some(2));
    // the list keeps its original order
    assert_eq!(
        info.hosts_list(&FakeRunner::new()).unwrap().unwrap(),
        vec!["b", "a", "b", "a", "b"]
    );
}

#[test]
fn lsf_variables_ignored_outside_lsf_jobs() {
    let env = EnvSnapshot::from_pairs([("PBS_JOBID", "1"), ("LSB_HOSTS", "a b")]);
    let info = ResourceInfo::detect(&env, None, Some(1)).unwrap();

    assert_eq!(info.manager(), SchedulerKind::None);
    assert_eq!(info.process_count(), Some(1));
}

#[test]
fn loadleveler_total_tasks() {
    let env = EnvSnapshot::from_pairs([("LOADL_JOB_NAME", "job"), ("LOADL_TOTAL_TASKS", "64")]);
    let info = ResourceInfo::detect(&env, None, None).unwrap();

    assert_eq!(info.manager(), SchedulerKind::LoadLeveler);
    assert_eq!(info.process_count(), Some(64));
}

#[test]
fn pbs_nodefile_counts_processes() {
    let dir = tempfile::tempdir().unwrap();
    let nodefile = dir.path().join("nodes");
    fs::write(&nodefile, "n1\nn1\nn2\nn2\n").unwrap();

    let env = EnvSnapshot::from_pairs([
        ("PBS_JOBID", "12.server".to_string()),
        ("PBS_NODEFILE", nodefile.to_string_lossy().to_string()),
    ]);
    let info = ResourceInfo::detect(&env, None, None).unwrap();

    assert_eq!(info.manager(), SchedulerKind::Pbs);
    assert_eq!(info.process_count(), Some(4));
    assert_eq!(
        info.known_hosts_file(),
        Some(&HostsFile::Variable("PBS_NODEFILE"))
    );
    assert_eq!(
        info.hosts_file(None, &FakeRunner::new())
            .unwrap()
            .map(|file| file.to_string()),
        Some("$PBS_NODEFILE".to_string())
    );
}

#[test]
fn missing_pbs_nodefile_is_dropped() {
    let env = EnvSnapshot::from_pairs([
        ("PBS_JOBID", "12.server"),
        ("PBS_NODEFILE", "/nonexistent/nodes"),
    ]);
    let info = ResourceInfo::detect(&env, None, Some(1)).unwrap();

    assert_eq!(info.known_hosts_file(), None);
    assert_eq!(info.process_count(), Some(1));
}

#[test]
fn sge_machines_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("machines"), "a\nb\n").unwrap();

    let env = EnvSnapshot::from_pairs([
        ("SGE_TASK_ID", "undefined".to_string()),
        ("NHOSTS", "2".to_string()),
        ("TMPDIR", dir.path().to_string_lossy().to_string()),
    ]);
    let info = ResourceInfo::detect(&env, None, None).unwrap();

    assert_eq!(info.manager(), SchedulerKind::Sge);
    assert_eq!(info.known_hosts_file(), Some(&HostsFile::TmpdirMachines));
    assert_eq!(info.process_count(), Some(2));
    assert_eq!(info.node_count(), Some(2));
}

#[test]
fn generated_hosts_file_cycles_hosts() {
    let dir = tempfile::tempdir().unwrap();
    let env = EnvSnapshot::from_pairs([
        ("LSB_JOBID", "1"),
        ("LSB_HOSTS", "host1 host2 host3"),
    ]);
    let info = ResourceInfo::detect(&env, Some(4), None).unwrap();

    let file = info
        .hosts_file(Some(dir.path()), &FakeRunner::new())
        .unwrap()
        .unwrap();

    assert_eq!(file, HostsFile::Path(dir.path().join("hostsfile")));
    assert_eq!(
        fs::read_to_string(dir.path().join("hostsfile")).unwrap(),
        "host1\nhost2\nhost3\nhost1\n"
    );
}

#[test]
fn generated_hosts_file_is_rewritten_on_every_call() {
    let dir = tempfile::tempdir().unwrap();
    let env = EnvSnapshot::from_pairs([("LSB_JOBID", "1"), ("LSB_HOSTS", "host1 host2")]);
    let info = ResourceInfo::detect(&env, None, None).unwrap();
    let path = dir.path().join("hostsfile");

    info.hosts_file(Some(dir.path()), &FakeRunner::new()).unwrap();
    fs::write(&path, "stale\n").unwrap();
    let file = info.hosts_file(Some(dir.path()), &FakeRunner::new()).unwrap();

    assert_eq!(file, Some(HostsFile::Path(path.clone())));
    assert_eq!(fs::read_to_string(&path).unwrap(), "host1\nhost2\n");
}
