use super::hosts::*;
use std::fs;

#[test]
fn node_count_is_distinct_hosts() {
    assert_eq!(count_hosts(&["b", "a", "b", "c", "a"]), (5, 3));
    assert_eq!(count_hosts(&["n1", "n1", "n1", "n1"]), (4, 1));
    assert_eq!(count_hosts::<&str>(&[]), (0, 0));
}

#[test]
fn mcpu_hosts_pairs() {
    assert_eq!(
        parse_mcpu_hosts("hostA 4 hostB 2").unwrap(),
        vec![("hostA".to_string(), 4), ("hostB".to_string(), 2)]
    );
    assert_eq!(
        expand_counted(&parse_mcpu_hosts("hostA 2 hostB 1").unwrap()),
        vec!["hostA", "hostA", "hostB"]
    );
    assert!(parse_mcpu_hosts("hostA four").is_err());
}

#[test]
fn hosts_file_cycles_through_short_list() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hostsfile");

    write_hosts_file(&path, &["host1", "host2", "host3"], Some(4)).unwrap();

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "host1\nhost2\nhost3\nhost1\n"
    );
    assert_eq!(count_lines(&path).unwrap(), 4);
}

#[test]
fn hosts_file_truncates_long_list() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hostsfile");

    write_hosts_file(&path, &["a", "b", "c", "d"], Some(2)).unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\n");
}

#[test]
fn hosts_file_without_process_count() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hostsfile");

    write_hosts_file(&path, &["a", "b"], None).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\n");

    write_hosts_file(&path, &["a", "b"], Some(0)).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\n");
}

#[test]
fn missing_hosts_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();

    assert!(count_lines(&dir.path().join("missing")).is_err());
}
