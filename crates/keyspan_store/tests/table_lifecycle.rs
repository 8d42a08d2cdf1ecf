//! Table lifecycle under concurrent callers and namespace-scoped cleanup.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{families, memory_store};
use keyspan_store::{BackendConnection, Fault, StoreConfig, StoreOperations, TableName};

#[test]
fn concurrent_create_table_yields_one_table() {
    let (backend, ops) = memory_store("concurrent-create", StoreConfig::default().with_namespace("ns"));
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let ops = ops.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                ops.create_table("spatial", &families(&["a", "b"]), &[])
            })
        })
        .collect();
    for handle in handles {
        handle
            .join()
            .expect("creator thread")
            .expect("create_table succeeds");
    }

    assert_eq!(backend.stats().tables_created, 1);
    let tables = backend.list_tables().expect("list tables");
    assert_eq!(tables, vec![TableName::new("ns_spatial")]);
}

#[test]
fn delete_all_tables_only_touches_namespace_prefix() {
    let (backend, ns_ops) = memory_store("delete-all", StoreConfig::default().with_namespace("ns"));
    let other_ops = StoreOperations::new(
        Arc::new(backend.clone()),
        StoreConfig::new(backend.address()).with_namespace("other"),
    );
    let f = families(&["f"]);
    ns_ops.create_table("a", &f, &[]).expect("create ns_a");
    ns_ops.create_table("b", &f, &[]).expect("create ns_b");
    other_ops.create_table("a", &f, &[]).expect("create other_a");

    let mut deleted = ns_ops.delete_all_tables().expect("delete namespace");
    deleted.sort();
    assert_eq!(deleted, vec![TableName::new("ns_a"), TableName::new("ns_b")]);
    assert_eq!(
        backend.list_tables().expect("list"),
        vec![TableName::new("other_a")]
    );
    assert!(other_ops.table_exists("a").expect("probe"));
}

#[test]
fn delete_all_tables_without_namespace_removes_everything() {
    let (backend, ops) = memory_store("delete-everything", StoreConfig::default());
    let f = families(&["f"]);
    ops.create_table("x", &f, &[]).expect("create");
    ops.create_table("y", &f, &[]).expect("create");
    assert_eq!(ops.delete_all_tables().expect("delete").len(), 2);
    assert!(backend.list_tables().expect("list").is_empty());
}

#[test]
fn delete_all_tables_propagates_backend_failure() {
    let (backend, ops) = memory_store("delete-fault", StoreConfig::default());
    ops.create_table("x", &families(&["f"]), &[]).expect("create");
    backend.inject_fault(Fault::DropTable);
    assert!(ops.delete_all_tables().is_err());
    assert_eq!(ops.delete_all_tables().expect("retry").len(), 1);
}

#[test]
fn create_table_surfaces_backend_errors() {
    let (backend, ops) = memory_store("create-fault", StoreConfig::default());
    backend.inject_fault(Fault::CreateTable);
    assert!(ops.create_table("x", &families(&["f"]), &[]).is_err());
    ops.create_table("x", &families(&["f"]), &[]).expect("retry succeeds");
}

#[test]
fn online_schema_updates_skip_disable() {
    let (backend, ops) = {
        let (backend, _) = memory_store("online", StoreConfig::default());
        backend.set_property(keyspan_store::ONLINE_SCHEMA_UPDATE_KEY, "true");
        let ops = StoreOperations::new(
            Arc::new(backend.clone()),
            StoreConfig::new(backend.address()),
        );
        (backend, ops)
    };
    assert!(ops.is_schema_update_enabled());
    ops.create_table("t", &families(&["a"]), &[]).expect("create");
    assert_eq!(ops.add_column_families("t", &families(&["b"])).expect("add"), 1);
    assert!(backend.is_table_enabled(&TableName::new("t")).expect("enabled"));
}
