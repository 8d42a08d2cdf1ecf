use crate::adapter::AdapterRow;

/// Observer invoked once for every entry a query hands to its caller.
pub trait ScanCallback<T>: Send + Sync {
    fn entry_scanned(&self, entry: &T, row: &AdapterRow);
}

impl<T, F> ScanCallback<T> for F
where
    F: Fn(&T, &AdapterRow) + Send + Sync,
{
    fn entry_scanned(&self, entry: &T, row: &AdapterRow) {
        self(entry, row)
    }
}
