use super::ProbeError;

/// Parse `SLURM_TASKS_PER_NODE` into one task count per node.
///
/// The variable uses a compact syntax, `2(x3),1` means three nodes running 2 tasks
/// each followed by one node running a single task.
pub fn parse_tasks_per_node(value: &str) -> Result<Vec<usize>, ProbeError> {
    let malformed = || ProbeError::MalformedSlurm {
        variable: "SLURM_TASKS_PER_NODE",
        value: value.to_string(),
    };
    let mut counts = Vec::new();

    for group in value.trim().split(',') {
        match group.split_once('(') {
            Some((tasks, repeat)) => {
                let tasks = tasks.trim().parse::<usize>().map_err(|_| malformed())?;
                let repeat = repeat
                    .strip_prefix('x')
                    .and_then(|repeat| repeat.strip_suffix(')'))
                    .and_then(|repeat| repeat.parse::<usize>().ok())
                    .ok_or_else(malformed)?;

                counts.extend(std::iter::repeat(tasks).take(repeat));
            }
            None => counts.push(group.trim().parse().map_err(|_| malformed())?),
        }
    }

    Ok(counts)
}

/// total number of tasks described by `SLURM_TASKS_PER_NODE`
pub fn total_tasks(value: &str) -> Result<usize, ProbeError> {
    parse_tasks_per_node(value).map(|counts| counts.iter().sum())
}

/// Expand the compact `SLURM_NODELIST` syntax into host names.
///
/// `node[01-03,07],login` expands to `node01 node02 node03 node07 login`, zero
/// padding of range bounds is kept. Several bracket groups in one entry expand to
/// every combination, `rack[1-2]-n[1-2]` gives `rack1-n1 rack1-n2 rack2-n1 rack2-n2`.
/// If `counts` is given, every host is repeated by its task count, in node order.
pub fn expand_node_list(value: &str, counts: Option<&[usize]>) -> Result<Vec<String>, ProbeError> {
    let malformed = || ProbeError::MalformedSlurm {
        variable: "SLURM_NODELIST",
        value: value.to_string(),
    };
    let mut nodes = Vec::new();

    for entry in split_top_level(value.trim()) {
        nodes.extend(expand_entry(entry).ok_or_else(malformed)?);
    }

    match counts {
        Some(counts) => {
            if counts.len() < nodes.len() {
                return Err(ProbeError::TaskCountMismatch {
                    nodes: nodes.len(),
                    counts: counts.len(),
                });
            }

            Ok(nodes
                .into_iter()
                .zip(counts)
                .flat_map(|(node, count)| std::iter::repeat(node).take(*count))
                .collect())
        }
        None => Ok(nodes),
    }
}

/// expand the first bracket group of `entry` and, recursively, the rest after it
fn expand_entry(entry: &str) -> Option<Vec<String>> {
    let Some((base, rest)) = entry.split_once('[') else {
        return Some(vec![entry.to_string()]);
    };
    let (ranges, suffix) = rest.split_once(']')?;
    let tails = expand_entry(suffix)?;
    let mut nodes = Vec::new();

    for range in ranges.split(',') {
        let indices = match range.split_once('-') {
            Some((start, end)) => {
                let width = start.len();
                let start = start.parse::<usize>().ok()?;
                let end = end.parse::<usize>().ok()?;

                (start..=end).map(|index| format!("{index:0width$}")).collect()
            }
            None => vec![range.to_string()],
        };

        for index in indices {
            nodes.extend(tails.iter().map(|tail| format!("{base}{index}{tail}")));
        }
    }

    Some(nodes)
}

/// split on commas which are not enclosed in brackets
fn split_top_level(value: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (index, character) in value.char_indices() {
        match character {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                entries.push(&value[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    entries.push(&value[start..]);

    entries.into_iter().filter(|entry| !entry.is_empty()).collect()
}
