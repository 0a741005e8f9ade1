use super::ProbeError;
use itertools::Itertools;
use std::{
    fs::{self, File},
    io::{BufRead, BufReader},
    path::Path,
};
use tracing::debug;

/// Number of processes and distinct nodes in a hosts list
pub fn count_hosts<S: AsRef<str>>(hosts: &[S]) -> (usize, usize) {
    let nodes = hosts.iter().map(AsRef::as_ref).sorted().dedup().count();

    (hosts.len(), nodes)
}

/// Parse the flat `host count host count ...` list of `LSB_MCPU_HOSTS`
pub fn parse_mcpu_hosts(value: &str) -> Result<Vec<(String, usize)>, ProbeError> {
    value
        .split_whitespace()
        .tuples()
        .map(|(host, count)| {
            count
                .parse()
                .map(|count| (host.to_string(), count))
                .map_err(|_| ProbeError::InvalidNumber {
                    variable: "LSB_MCPU_HOSTS".to_string(),
                    value: value.to_string(),
                })
        })
        .collect()
}

/// expand `(host, count)` pairs into one entry per process
pub fn expand_counted<S: AsRef<str>>(pairs: &[(S, usize)]) -> Vec<String> {
    pairs
        .iter()
        .flat_map(|(host, count)| std::iter::repeat(host.as_ref().to_string()).take(*count))
        .collect()
}

/// one process per line of the hosts file
pub fn count_lines(path: &Path) -> Result<usize, ProbeError> {
    let file = File::open(path).map_err(|source| ProbeError::HostsFile {
        path: path.to_path_buf(),
        source,
    })?;

    BufReader::new(file)
        .lines()
        .try_fold(0, |count, line| line.map(|_| count + 1))
        .map_err(|source| ProbeError::HostsFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a hosts file with one host per line.
///
/// Without a process count every host is written once. With a process count exactly
/// that many lines are written, cycling through the list when it is shorter and
/// truncating it when it is longer.
pub fn write_hosts_file<S: AsRef<str>>(
    path: &Path,
    hosts: &[S],
    processes: Option<usize>,
) -> Result<(), ProbeError> {
    let lines = match processes.filter(|count| *count > 0) {
        Some(count) => hosts.iter().map(AsRef::as_ref).cycle().take(count).collect_vec(),
        None => hosts.iter().map(AsRef::as_ref).collect_vec(),
    };

    debug!(path = ?path, lines = lines.len(), "Writing hosts file");

    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }

    fs::write(path, content).map_err(|source| ProbeError::HostsFile {
        path: path.to_path_buf(),
        source,
    })
}
