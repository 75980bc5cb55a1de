//! End-to-end sampling scenarios against the simulated runtime host.

use pyrope_engine::frame::Frame;
use pyrope_engine::runtime::sim::SimRuntime;
use pyrope_engine::topology::saver::ProfileSaver;
use pyrope_engine::topology::ProcessRole;
use pyrope_engine::{FrameFilters, Sampler, SamplerConfig, SessionConfig, StackTable};

use pyrope_flame::{CallTree, FlameGraph, Options};

use std::sync::Arc;
use std::time::Duration;

fn quick(interval_us: u64) -> SamplerConfig {
    SamplerConfig {
        interval_us,
        ..SamplerConfig::default()
    }
}

#[test]
fn single_thread_folding_reconstructs_the_call_chain() {
    // a() -> b() -> c() busy-looping, pinned on the main thread.
    let host = Arc::new(SimRuntime::new());
    host.spawn_thread(
        "MainThread",
        vec![
            Frame::new("/src/demo.py", "a", 1, 2),
            Frame::new("/src/demo.py", "b", 4, 5),
            Frame::new("/src/demo.py", "c", 7, 8),
        ],
    );

    let sampler = Sampler::worker(host, quick(1_000)).unwrap();
    sampler.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    sampler.stop().unwrap();

    let dump = sampler.dumps();
    assert!(!dump.is_empty(), "100ms at 1ms interval produced nothing");
    for line in dump.lines() {
        let (key, _) = line.rsplit_once(' ').unwrap();
        assert!(key.starts_with("MainThread;"));
        assert!(key.ends_with("/src/demo.py:c:7"));
    }

    // Rebuilding the tree gives exactly the chain Main -> a -> b -> c.
    let mut graph = FlameGraph::new(Options::default());
    graph.feed(dump.lines());
    let tree = CallTree::build(graph.stacks());

    let mut depth = 0;
    let mut node = tree.root();
    loop {
        let children = tree.ordered_children(node);
        match children.len() {
            0 => break,
            1 => {
                node = children[0];
                depth += 1;
            }
            n => panic!("expected a chain, found {n} children"),
        }
    }
    assert_eq!(depth, 4, "MainThread, a, b, c");
    assert_eq!(tree.node(node).name, "/src/demo.py:c:7");
}

#[test]
fn multi_thread_sampling_keeps_threads_distinct() {
    let host = Arc::new(SimRuntime::new());
    let fib = || {
        vec![
            Frame::new("/src/demo.py", "run", 1, 2),
            Frame::new("/src/demo.py", "fib", 10, 12),
        ]
    };
    host.spawn_thread("fib-0", fib());
    host.spawn_thread("fib-1", fib());

    let sampler = Sampler::worker(host, quick(1_000)).unwrap();
    sampler.start().unwrap();
    std::thread::sleep(Duration::from_millis(200));
    sampler.stop().unwrap();

    let table = StackTable::parse(&sampler.dumps()).unwrap();
    assert!(table.len() >= 2, "each thread owns a distinct stack key");

    let prefixes: Vec<&str> = table
        .iter()
        .map(|(key, _)| key.split(';').next().unwrap())
        .collect();
    assert!(prefixes.contains(&"fib-0"));
    assert!(prefixes.contains(&"fib-1"));

    // Every tick observed both scripted threads.
    assert_eq!(table.total(), sampler.metrics().samples * 2);
}

#[test]
fn tree_mode_and_default_mode_agree_on_totals() {
    // The same trace folded through both canonicalisation strategies must
    // account for the same number of samples; only the key partitioning
    // may differ.
    let host = SimRuntime::new();
    let stacks = [
        vec![
            Frame::new("/src/demo.py", "main", 1, 10),
            Frame::new("/src/demo.py", "work", 20, 21),
        ],
        vec![
            Frame::new("/src/demo.py", "main", 1, 14),
            Frame::new("/src/demo.py", "work", 20, 25),
        ],
    ];

    let default_filters = FrameFilters::compile(&quick(1_000), &host).unwrap();
    let tree_filters = FrameFilters::compile(
        &SamplerConfig {
            tree_mode: true,
            ..quick(1_000)
        },
        &host,
    )
    .unwrap();

    let mut default_table = StackTable::new();
    let mut tree_table = StackTable::new();
    for stack in &stacks {
        default_table.fold("MainThread", &default_filters.canonical_stack(stack));
        tree_table.fold("MainThread", &tree_filters.canonical_stack(stack));
    }

    assert_eq!(default_table.total(), tree_table.total());
    // Default mode collapses both call sites into one key; tree mode
    // distinguishes them by caller line.
    assert_eq!(default_table.len(), 1);
    assert_eq!(tree_table.len(), 2);
}

#[test]
fn merged_graph_groups_three_processes() {
    let dir = tempfile::tempdir().unwrap();
    let pid = std::process::id();

    // Two children already flushed their tagged artifacts.
    for (child, count) in [(5001u32, 11u64), (5002u32, 23u64)] {
        std::fs::write(
            dir.path().join(format!("{child}-{pid}.folded")),
            format!("Process(pid={child}, ppid={pid});MainThread;/src/demo.py:spin:3 {count}"),
        )
        .unwrap();
    }

    // The root samples its own workload, then merges.
    let host = Arc::new(SimRuntime::new());
    host.spawn_thread(
        "MainThread",
        vec![Frame::new("/src/demo.py", "main", 1, 2)],
    );
    let sampler = Sampler::worker_with_role(host, quick(1_000), ProcessRole::root()).unwrap();
    sampler.start().unwrap();
    std::thread::sleep(Duration::from_millis(60));
    sampler.stop().unwrap();
    sampler.incr_child_cnt();
    sampler.incr_child_cnt();

    let mut config = SessionConfig::default();
    config.save.work_dir = dir.path().to_path_buf();
    config.save.folded_save = true;
    let report = ProfileSaver::new(&sampler, &config).save().unwrap();
    assert!(!report.timed_out);

    let folded = std::fs::read_to_string(dir.path().join("result.folded")).unwrap();
    let mut groups: Vec<&str> = folded
        .lines()
        .map(|l| l.split(';').next().unwrap())
        .collect();
    groups.sort();
    groups.dedup();
    assert_eq!(groups.len(), 3, "three Process(...) groups: {groups:?}");

    // Count conservation: the rendered total equals the folded sum.
    let folded_sum: u64 = folded
        .lines()
        .map(|l| l.rsplit_once(' ').unwrap().1.parse::<u64>().unwrap())
        .sum();
    assert_eq!(report.sample_count, folded_sum);
    assert_eq!(folded_sum, sampler.metrics().samples + 11 + 23);
}

#[test]
fn renderer_total_matches_folded_sum_after_sampling() {
    let host = Arc::new(SimRuntime::new());
    host.spawn_thread(
        "MainThread",
        vec![Frame::new("/src/demo.py", "main", 1, 2)],
    );
    let sampler = Sampler::worker(host, quick(1_000)).unwrap();
    sampler.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    sampler.stop().unwrap();

    let dump = sampler.dumps();
    let table = StackTable::parse(&dump).unwrap();

    let mut graph = FlameGraph::new(Options::default());
    graph.feed(dump.lines());
    assert_eq!(graph.total_samples(), table.total());
    assert_eq!(graph.skipped(), 0);
}
