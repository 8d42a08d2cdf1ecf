//! Workload generator for exercising the KeySpan query path.
//!
//! This binary ingests synthetic sensor readings into an in-memory backend,
//! runs concurrent range queries against them, and writes a JSON report with
//! latency percentiles plus store and query counters.

mod adapters;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use keyspan_core::{ByteRange, CodecRegistry};
use keyspan_query::{
    AdapterStore, Comparison, FieldValueFilter, FilteredIndexQuery, IndexWriter,
    PushdownFilterEvaluator, QueryMetrics, QueryMetricsSnapshot,
};
use keyspan_store::{MemoryBackend, MemoryStats, StoreConfig, StoreOperations};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::adapters::{
    cell_position, readings_index, CellHits, HitsAdapter, Reading, ReadingAdapter,
};

const PUSHDOWN_COPROCESSOR: &str = "keyspan.coprocessor.DistributableFilter";

/// CLI entry point wrapper.
#[derive(Parser, Debug)]
#[command(name = "keyspan-workload")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Run(RunArgs),
}

/// CLI options for running the workload. Store settings not listed here
/// come from `KEYSPAN_*` environment variables.
#[derive(Parser, Debug, Clone)]
struct RunArgs {
    /// Backend address; only `memory://<name>` is supported.
    #[arg(long, env = "KEYSPAN_ADDRESS", default_value = "memory://workload")]
    address: String,

    /// Table namespace.
    #[arg(long, default_value = "workload")]
    namespace: String,

    /// Number of grid cells readings are spread over.
    #[arg(long, default_value_t = 4096)]
    cells: u32,

    /// Number of readings to ingest.
    #[arg(long, default_value_t = 20_000)]
    readings: usize,

    /// Number of distinct sensors.
    #[arg(long, default_value_t = 32)]
    sensors: usize,

    /// Percent of readings that span two adjacent cells.
    #[arg(long, default_value_t = 20)]
    span_pct: u8,

    /// Number of concurrent query clients.
    #[arg(long, default_value_t = 4)]
    clients: usize,

    /// Queries issued by each client.
    #[arg(long, default_value_t = 250)]
    queries: usize,

    /// Number of cells covered by each query range.
    #[arg(long, default_value_t = 64)]
    range_width: u32,

    /// Percent of reading queries that filter on one sensor.
    #[arg(long, default_value_t = 50)]
    filter_pct: u8,

    /// Percent of queries that read folded per-cell hit counts instead of
    /// readings.
    #[arg(long, default_value_t = 20)]
    hits_pct: u8,

    /// Optional cap on entries returned per query.
    #[arg(long)]
    limit: Option<usize>,

    /// Install the pushdown coprocessor and ship sensor filters to it.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pushdown: bool,

    /// Rows fetched per scanner round trip.
    #[arg(long, default_value_t = 1000)]
    scan_cache_size: usize,

    /// Coprocessor roll-out timeout.
    #[arg(long, default_value = "30s")]
    coprocessor_timeout: humantime::Duration,

    /// Random seed (0 picks a random seed).
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Write the JSON report to this path.
    #[arg(long, default_value = ".tmp/keyspan/report.json")]
    out: PathBuf,
}

#[derive(serde::Serialize, Debug, Clone)]
struct ReportMeta {
    address: String,
    namespace: String,
    cells: u32,
    readings: usize,
    sensors: usize,
    span_pct: u8,
    clients: usize,
    queries: usize,
    range_width: u32,
    filter_pct: u8,
    hits_pct: u8,
    limit: Option<usize>,
    pushdown: bool,
    scan_cache_size: usize,
    seed: u64,
}

#[derive(serde::Serialize, Debug, Clone)]
struct IngestReport {
    readings: usize,
    reading_rows: u64,
    hit_rows: u64,
    elapsed_ms: u64,
}

#[derive(serde::Serialize, Debug, Clone, Default)]
struct LatencyReport {
    queries: usize,
    entries: u64,
    p50_us: u64,
    p99_us: u64,
    max_us: u64,
}

#[derive(serde::Serialize, Debug, Clone)]
struct Report {
    meta: ReportMeta,
    ingest: IngestReport,
    reading_queries: LatencyReport,
    hit_queries: LatencyReport,
    /// Folded hit count over the whole keyspace; equals `ingest.hit_rows`.
    total_hits: u64,
    query_metrics: QueryMetricsSnapshot,
    store: MemoryStats,
    elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryKind {
    Readings,
    Hits,
}

#[derive(Debug, Clone, Copy)]
struct QuerySample {
    kind: QueryKind,
    entries: u64,
    latency_us: u64,
}

/// Query-side state shared by every client.
struct Workload {
    ops: StoreOperations,
    readings: AdapterStore<Reading>,
    hits: AdapterStore<CellHits>,
    metrics: Arc<QueryMetrics>,
    sensors: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyspan=info,warn")),
        )
        .init();
    let args = Args::parse();
    match args.cmd {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.cells > 0, "--cells must be > 0");
    anyhow::ensure!(args.sensors > 0, "--sensors must be > 0");
    anyhow::ensure!(args.clients > 0, "--clients must be > 0");
    anyhow::ensure!(args.range_width > 0, "--range-width must be > 0");
    anyhow::ensure!(args.span_pct <= 100, "--span-pct must be <= 100");
    anyhow::ensure!(args.filter_pct <= 100, "--filter-pct must be <= 100");
    anyhow::ensure!(args.hits_pct <= 100, "--hits-pct must be <= 100");
    anyhow::ensure!(
        args.address.starts_with("memory://"),
        "--address must be a memory:// address, got {}",
        args.address
    );

    let seed = if args.seed == 0 {
        rand::thread_rng().gen()
    } else {
        args.seed
    };
    let started = Instant::now();

    let mut config = StoreConfig::from_env()
        .context("load store config")?
        .with_namespace(args.namespace.clone())
        .with_scan_cache_size(args.scan_cache_size)
        .with_server_side_filtering(args.pushdown);
    config.address = args.address.clone();
    if args.pushdown {
        config = config
            .with_coprocessor(PUSHDOWN_COPROCESSOR, None)
            .with_coprocessor_timing(Duration::from_millis(10), args.coprocessor_timeout.into());
    }

    let backend = MemoryBackend::with_variant(args.address.clone(), config.variant);
    backend.register_evaluator(PUSHDOWN_COPROCESSOR, Arc::new(PushdownFilterEvaluator::default()));
    let ops = StoreOperations::new(Arc::new(backend.clone()), config);

    let registry = CodecRegistry::global();
    let reading_adapter = Arc::new(ReadingAdapter::new(registry)?);
    let hits_adapter = Arc::new(HitsAdapter::new(registry)?);
    let sensors: Vec<String> = (0..args.sensors).map(|i| format!("sensor-{i:03}")).collect();

    let ingested = {
        let ops = ops.clone();
        let args = args.clone();
        let sensors = sensors.clone();
        let reading_adapter = reading_adapter.clone();
        let hits_adapter = hits_adapter.clone();
        tokio::task::spawn_blocking(move || {
            ingest(&ops, &args, seed, &sensors, reading_adapter, hits_adapter)
        })
        .await
        .context("ingest task panicked")??
    };
    info!(
        readings = ingested.readings,
        reading_rows = ingested.reading_rows,
        hit_rows = ingested.hit_rows,
        elapsed_ms = ingested.elapsed_ms,
        "ingest finished"
    );

    let mut readings: AdapterStore<Reading> = AdapterStore::new();
    readings.add(reading_adapter);
    let mut hits: AdapterStore<CellHits> = AdapterStore::new();
    hits.add(hits_adapter);
    let workload = Arc::new(Workload {
        ops,
        readings,
        hits,
        metrics: Arc::new(QueryMetrics::default()),
        sensors,
    });

    let mut tasks = Vec::with_capacity(args.clients);
    for client_id in 0..args.clients {
        let workload = workload.clone();
        let args = args.clone();
        // Mix the base seed with the client id for deterministic per-client RNG.
        let seed = seed ^ (client_id as u64).wrapping_mul(0x9e3779b97f4a7c15);
        tasks.push(tokio::task::spawn_blocking(move || {
            run_client(&workload, &args, seed)
        }));
    }
    let mut samples = Vec::new();
    for task in tasks {
        samples.append(&mut task.await.context("client task panicked")?);
    }

    let total_hits: u64 = FilteredIndexQuery::new(readings_index())
        .with_metrics(workload.metrics.clone())
        .execute(&workload.ops, &workload.hits)
        .map(|cell| cell.hits)
        .sum();
    anyhow::ensure!(
        total_hits == ingested.hit_rows,
        "folded hit count {total_hits} does not match {} written hit rows",
        ingested.hit_rows
    );

    let report = Report {
        meta: ReportMeta {
            address: args.address.clone(),
            namespace: args.namespace.clone(),
            cells: args.cells,
            readings: args.readings,
            sensors: args.sensors,
            span_pct: args.span_pct,
            clients: args.clients,
            queries: args.queries,
            range_width: args.range_width,
            filter_pct: args.filter_pct,
            hits_pct: args.hits_pct,
            limit: args.limit,
            pushdown: args.pushdown,
            scan_cache_size: args.scan_cache_size,
            seed,
        },
        ingest: ingested,
        reading_queries: summarize(&samples, QueryKind::Readings),
        hit_queries: summarize(&samples, QueryKind::Hits),
        total_hits,
        query_metrics: workload.metrics.snapshot(),
        store: backend.stats(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        queries = samples.len(),
        total_hits,
        elapsed_ms = report.elapsed_ms,
        "query workload finished"
    );
    write_report(&args.out, &report).context("write report")?;
    eprintln!("wrote report: {}", args.out.display());
    Ok(())
}

/// Writes every reading plus one hit row per covered cell.
fn ingest(
    ops: &StoreOperations,
    args: &RunArgs,
    seed: u64,
    sensors: &[String],
    reading_adapter: Arc<ReadingAdapter>,
    hits_adapter: Arc<HitsAdapter>,
) -> anyhow::Result<IngestReport> {
    let started = Instant::now();
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut reading_writer = IndexWriter::<Reading>::open(ops, readings_index(), reading_adapter, &[])
        .context("open readings writer")?;
    let mut hits_writer =
        IndexWriter::<CellHits>::open(ops, readings_index(), hits_adapter, &[]).context("open hits writer")?;

    let mut reading_rows = 0u64;
    let mut hit_rows = 0u64;
    for idx in 0..args.readings {
        let cell = rng.gen_range(0..args.cells);
        let mut cells = vec![cell];
        if cell + 1 < args.cells && rng.gen_range(0..100) < args.span_pct as u32 {
            cells.push(cell + 1);
        }
        let reading = Reading {
            id: format!("r{idx:08}"),
            sensor: sensors[rng.gen_range(0..sensors.len())].clone(),
            cell: u64::from(cell),
            value: rng.gen_range(-40.0..60.0),
            flagged: rng.gen_bool(0.05),
        };
        let positions: Vec<_> = cells.iter().copied().map(cell_position).collect();
        reading_rows += reading_writer
            .write(&reading, &positions)
            .with_context(|| format!("write reading {}", reading.id))?
            .len() as u64;
        for cell in cells {
            hits_writer
                .write(
                    &CellHits {
                        cell: u64::from(cell),
                        hits: 1,
                    },
                    &[cell_position(cell)],
                )
                .with_context(|| format!("write hit for cell {cell}"))?;
            hit_rows += 1;
        }
    }
    reading_writer.close().context("close readings writer")?;
    hits_writer.close().context("close hits writer")?;

    Ok(IngestReport {
        readings: args.readings,
        reading_rows,
        hit_rows,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

fn run_client(workload: &Workload, args: &RunArgs, seed: u64) -> Vec<QuerySample> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut samples = Vec::with_capacity(args.queries);
    for _ in 0..args.queries {
        let start = rng.gen_range(0..args.cells);
        let end = start.saturating_add(args.range_width - 1).min(args.cells - 1);
        let range = ByteRange::new(cell_position(start), cell_position(end));

        let began = Instant::now();
        let (kind, entries) = if rng.gen_range(0..100) < args.hits_pct as u32 {
            let mut query = FilteredIndexQuery::new(readings_index())
                .with_ranges(vec![range])
                .with_metrics(workload.metrics.clone());
            if let Some(limit) = args.limit {
                query = query.with_limit(limit);
            }
            let folded = query.execute(&workload.ops, &workload.hits).count();
            (QueryKind::Hits, folded as u64)
        } else {
            let mut query = FilteredIndexQuery::new(readings_index())
                .with_ranges(vec![range])
                .with_metrics(workload.metrics.clone());
            if rng.gen_range(0..100) < args.filter_pct as u32 {
                let sensor = &workload.sensors[rng.gen_range(0..workload.sensors.len())];
                query = query.with_distributable_filter(Arc::new(FieldValueFilter::new(
                    "sensor",
                    Comparison::Equal,
                    Bytes::from(sensor.clone()),
                )));
            }
            if let Some(limit) = args.limit {
                query = query.with_limit(limit);
            }
            let matched = query.execute(&workload.ops, &workload.readings).count();
            (QueryKind::Readings, matched as u64)
        };
        samples.push(QuerySample {
            kind,
            entries,
            latency_us: began.elapsed().as_micros() as u64,
        });
    }
    samples
}

fn summarize(samples: &[QuerySample], kind: QueryKind) -> LatencyReport {
    let mut latencies: Vec<u64> = samples
        .iter()
        .filter(|sample| sample.kind == kind)
        .map(|sample| sample.latency_us)
        .collect();
    if latencies.is_empty() {
        return LatencyReport::default();
    }
    latencies.sort_unstable();
    let percentile = |pct: usize| latencies[(latencies.len() - 1) * pct / 100];
    LatencyReport {
        queries: latencies.len(),
        entries: samples
            .iter()
            .filter(|sample| sample.kind == kind)
            .map(|sample| sample.entries)
            .sum(),
        p50_us: percentile(50),
        p99_us: percentile(99),
        max_us: latencies[latencies.len() - 1],
    }
}

fn write_report(path: &PathBuf, report: &Report) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(report).context("serialize report")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: QueryKind, latency_us: u64) -> QuerySample {
        QuerySample {
            kind,
            entries: 2,
            latency_us,
        }
    }

    #[test]
    fn summarize_splits_by_kind() {
        let samples: Vec<_> = (1..=100)
            .map(|us| sample(QueryKind::Readings, us))
            .chain([sample(QueryKind::Hits, 7)])
            .collect();
        let readings = summarize(&samples, QueryKind::Readings);
        assert_eq!(readings.queries, 100);
        assert_eq!(readings.entries, 200);
        assert_eq!(readings.p50_us, 50);
        assert_eq!(readings.p99_us, 99);
        assert_eq!(readings.max_us, 100);

        let hits = summarize(&samples, QueryKind::Hits);
        assert_eq!((hits.queries, hits.p50_us, hits.max_us), (1, 7, 7));
        assert_eq!(summarize(&[], QueryKind::Hits).queries, 0);
    }

    #[test]
    fn small_workload_folds_every_hit() {
        let registry = CodecRegistry::global();
        let backend = MemoryBackend::new("memory://workload-test");
        let ops = StoreOperations::new(
            Arc::new(backend.clone()),
            StoreConfig::new("memory://workload-test").with_namespace("t"),
        );
        let args = RunArgs::parse_from(["run", "--cells", "16", "--readings", "200", "--queries", "5"]);
        let sensors = vec!["a".to_string(), "b".to_string()];
        let reading_adapter = Arc::new(ReadingAdapter::new(registry).expect("reading adapter"));
        let hits_adapter = Arc::new(HitsAdapter::new(registry).expect("hits adapter"));
        let report = ingest(&ops, &args, 7, &sensors, reading_adapter.clone(), hits_adapter.clone())
            .expect("ingest");
        assert_eq!(report.readings, 200);
        assert_eq!(report.reading_rows, report.hit_rows);

        let mut hits: AdapterStore<CellHits> = AdapterStore::new();
        hits.add(hits_adapter);
        let mut readings: AdapterStore<Reading> = AdapterStore::new();
        readings.add(reading_adapter);
        let workload = Workload {
            ops,
            readings,
            hits,
            metrics: Arc::new(QueryMetrics::default()),
            sensors,
        };
        let folded: Vec<CellHits> = FilteredIndexQuery::new(readings_index())
            .execute(&workload.ops, &workload.hits)
            .collect();
        assert!(folded.len() <= 16);
        assert_eq!(folded.iter().map(|cell| cell.hits).sum::<u64>(), report.hit_rows);

        let samples = run_client(&workload, &args, 11);
        assert_eq!(samples.len(), 5);
        assert_eq!(backend.stats().open_scanners(), 0);
    }
}
