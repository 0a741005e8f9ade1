use super::{slurm::*, ProbeError};

#[test]
fn tasks_per_node_with_multiplier() {
    assert_eq!(parse_tasks_per_node("2(x3),1").unwrap(), vec![2, 2, 2, 1]);
    assert_eq!(total_tasks("2(x3),1").unwrap(), 7);
}

#[test]
fn tasks_per_node_totals() {
    for (a, b, c) in [(1, 1, 1), (4, 2, 3), (16, 8, 1), (36, 100, 12)] {
        assert_eq!(total_tasks(&format!("{a}(x{b}),{c}")).unwrap(), a * b + c);
    }
}

#[test]
fn tasks_per_node_plain() {
    assert_eq!(parse_tasks_per_node("8").unwrap(), vec![8]);
    assert_eq!(parse_tasks_per_node("4,4,2").unwrap(), vec![4, 4, 2]);
}

#[test]
fn tasks_per_node_malformed() {
    for value in ["", "2(3)", "2(x3", "two", "2(xz)"] {
        assert!(
            matches!(
                parse_tasks_per_node(value),
                Err(ProbeError::MalformedSlurm { .. })
            ),
            "{value:?} should not parse"
        );
    }
}

#[test]
fn node_list_ranges_keep_padding() {
    assert_eq!(
        expand_node_list("node[08-11]", None).unwrap(),
        vec!["node08", "node09", "node10", "node11"]
    );
}

#[test]
fn node_list_mixed_entries() {
    assert_eq!(
        expand_node_list("cn[1-2,7],login,gpu[003]-ib", None).unwrap(),
        vec!["cn1", "cn2", "cn7", "login", "gpu003-ib"]
    );
}

#[test]
fn node_list_with_several_bracket_groups() {
    assert_eq!(
        expand_node_list("rack[1-2]-n[01-02]", None).unwrap(),
        vec!["rack1-n01", "rack1-n02", "rack2-n01", "rack2-n02"]
    );
    assert_eq!(
        expand_node_list("r[1,3]c[2]-ib,login", None).unwrap(),
        vec!["r1c2-ib", "r3c2-ib", "login"]
    );
    assert!(expand_node_list("rack[1-2]-n[01-02", None).is_err());
}

#[test]
fn node_list_repeated_by_task_count() {
    let counts = parse_tasks_per_node("2(x2),1").unwrap();

    assert_eq!(
        expand_node_list("a[1-2],b", Some(counts.as_slice())).unwrap(),
        vec!["a1", "a1", "a2", "a2", "b"]
    );
}

#[test]
fn node_list_with_too_few_counts() {
    assert!(matches!(
        expand_node_list("a[1-3]", Some(&[1, 1][..])),
        Err(ProbeError::TaskCountMismatch { nodes: 3, counts: 2 })
    ));
}

#[test]
fn node_list_unterminated_bracket() {
    assert!(expand_node_list("a[1-3", None).is_err());
}
