//! Concurrency tests for HostHandle
//!
//! These validate that status reads never block on a running sweep:
//! - a reader thread can query the host while hooks are executing
//! - observed statuses only ever move forward through the enable chain
//! - dependency queries stay consistent while discovery rewrites the tables

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use common::{Behavior, Fixture};
use kiln_plugin_api::{HostView, PluginStatus};

fn slow() -> Behavior {
    Behavior {
        pause: Some(Duration::from_millis(20)),
        ..Behavior::default()
    }
}

fn rank(status: PluginStatus) -> u8 {
    match status {
        PluginStatus::Unloaded => 0,
        PluginStatus::Loaded => 1,
        PluginStatus::PreEnable => 2,
        PluginStatus::Enable => 3,
        PluginStatus::PostEnable => 4,
        PluginStatus::Enabled => 5,
        PluginStatus::PreDisable => 6,
        PluginStatus::Disable => 7,
        PluginStatus::PostDisable => 8,
        PluginStatus::Disabled => 9,
    }
}

#[test]
fn handle_reads_do_not_block_on_running_hooks() {
    let fixture = Fixture::new()
        .plugin_with("a", &["b"], slow())
        .plugin_with("b", &[], slow());
    let mut host = fixture.host();
    host.load_all().unwrap();

    let handle = host.handle();
    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut reads = 0usize;
            while !done.load(Ordering::SeqCst) {
                let listed = handle.list_plugins();
                assert_eq!(listed.len(), 2);
                let _ = handle.plugin_names();
                reads += 1;
                thread::sleep(Duration::from_millis(1));
            }
            reads
        })
    };

    let report = host.enable_plugins();
    done.store(true, Ordering::SeqCst);
    let reads = reader.join().unwrap();

    assert!(report.is_clean(), "{report:?}");
    assert!(reads > 0);
    assert!(host.is_plugin_enabled("a"));
}

#[test]
fn observed_statuses_move_forward() {
    let fixture = Fixture::new().plugin_with("a", &[], slow());
    let mut host = fixture.host();
    host.load_all().unwrap();

    let handle = host.handle();
    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut seen = Vec::new();
            while !done.load(Ordering::SeqCst) {
                if let Some(status) = handle.status("a") {
                    if seen.last() != Some(&status) {
                        seen.push(status);
                    }
                }
                thread::sleep(Duration::from_millis(1));
            }
            seen
        })
    };

    host.enable_plugins();
    host.disable_plugins();
    done.store(true, Ordering::SeqCst);
    let seen = reader.join().unwrap();

    assert!(!seen.is_empty());
    assert!(
        seen.windows(2).all(|w| rank(w[0]) < rank(w[1])),
        "{seen:?}"
    );
    assert_eq!(host.status("a"), Some(PluginStatus::Disabled));
}

#[test]
fn handle_outlives_shutdown() {
    let fixture = Fixture::new().plugin("a", &[]);
    let mut host = fixture.host();
    host.load_all().unwrap();
    host.enable_plugins();
    let handle = host.handle();

    host.shutdown();
    drop(host);

    assert_eq!(handle.status("a"), None);
    assert!(handle.list_plugins().is_empty());
    assert!(!handle.is_plugin_loaded("a"));
}

#[test]
fn dependency_queries_keep_up_with_rediscovery() {
    let fixture = Fixture::new().plugin("a", &["b"]).plugin("b", &[]);
    let mut host = fixture.host();
    host.load_all().unwrap();

    let handle = host.handle();
    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let handle = handle.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    assert!(handle.has_all_dependencies_loaded("a"));
                }
            })
        })
        .collect();

    for _ in 0..200 {
        host.discover_all().unwrap();
    }
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        reader.join().unwrap();
    }
}
