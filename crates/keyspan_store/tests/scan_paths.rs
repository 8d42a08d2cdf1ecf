//! Scans through `StoreOperations` against the in-memory backend.

mod common;

use bytes::Bytes;
use common::{families, memory_store};
use keyspan_core::{Authorizations, ByteId};
use keyspan_store::{
    Error, Fault, MultiRowRangeFilter, RowRange, ScanRequest, StoreConfig, StoreOperations,
};

fn load(ops: &StoreOperations, rows: u8) {
    let mut writer = ops
        .create_writer("t", &families(&["f", "g"]), true, &[])
        .expect("writer");
    for i in 0..rows {
        writer
            .put([i], "f", "q", Bytes::from(vec![i]), ByteId::empty())
            .expect("put");
        writer
            .put([i], "g", "label", Bytes::from_static(b"x"), if i % 2 == 0 { "even" } else { "" })
            .expect("put labelled");
    }
    writer.close().expect("close writer");
}

#[test]
fn stream_fetches_on_demand_and_closes_early() {
    let (backend, ops) = memory_store("scan-lazy", StoreConfig::default().with_writer_buffer_size(7));
    load(&ops, 50);

    let request = ScanRequest::new(ops.qualified_table_name("t")).with_caching(10);
    let mut stream = ops.scan(&request).expect("open scan");
    for _ in 0..3 {
        stream.next_row().expect("row").expect("present");
    }
    assert_eq!(backend.stats().fetches, 1);
    stream.close();
    assert_eq!(backend.stats().open_scanners(), 0);
    assert_eq!(stream.stats().rows, 10);
}

#[test]
fn multi_range_scan_respects_stop_bounds_and_columns() {
    let (_, ops) = memory_store("scan-ranges", StoreConfig::default());
    load(&ops, 20);

    let mut request = ScanRequest::new(ops.qualified_table_name("t")).with_ranges(
        MultiRowRangeFilter::new(vec![
            RowRange::half_open(ByteId::from([15]), Some(ByteId::from([17]))),
            RowRange::half_open(ByteId::from([2]), Some(ByteId::from([4]))),
        ]),
    );
    request.add_column("f", "q");
    let rows: Vec<_> = ops
        .scan(&request)
        .expect("scan")
        .collect::<Result<_, Error>>()
        .expect("rows");
    let keys: Vec<u8> = rows.iter().map(|row| row.key.as_bytes()[0]).collect();
    assert_eq!(keys, vec![2, 3, 15, 16]);
    assert!(rows.iter().all(|row| row.cells.len() == 1));
}

#[test]
fn authorizations_reveal_labelled_cells() {
    let (_, ops) = memory_store("scan-auths", StoreConfig::default());
    load(&ops, 4);

    let count_g = |auths: Authorizations| {
        let mut request = ScanRequest::new(ops.qualified_table_name("t")).with_authorizations(auths);
        request.add_family("g");
        ops.scan(&request).expect("scan").count()
    };
    assert_eq!(count_g(Authorizations::default()), 2);
    assert_eq!(count_g(Authorizations::new(["even"])), 4);
}

#[test]
fn open_and_fetch_failures_are_scan_errors() {
    let (backend, ops) = memory_store("scan-faults", StoreConfig::default());
    load(&ops, 5);
    let request = ScanRequest::new(ops.qualified_table_name("t"));

    backend.inject_fault(Fault::OpenScanner);
    assert!(matches!(ops.scan(&request), Err(Error::ScanExecution { .. })));

    backend.inject_fault(Fault::ScanFetch);
    let mut stream = ops.scan(&request).expect("open");
    assert!(stream.prefetch().is_err());
    assert!(stream.is_closed());
    assert_eq!(backend.stats().open_scanners(), 0);

    let missing = ScanRequest::new(ops.qualified_table_name("missing"));
    assert!(matches!(ops.scan(&missing), Err(Error::TableNotFound(_))));
}
