use anyhow::{anyhow, Context, Result};
use asset_search::{
    export_search_to_parquet, parse, AssetInput, AssetKind, Db, RefreshMode, SearchHit, SearchRecord, SearchSettings,
    VulnerabilityInput,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use toolbox_core::observability::{init_logging, LogFormat};
use toolbox_core::rfc3339_from_ms;

mod config;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl, Csv }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ExportFormat { Parquet, Csv, Jsonl }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LogArg { Pretty, Json }

const DEFAULT_DB: &str = "assets.db";
const DEFAULT_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Parser)]
#[command(name = "toolbox", version, about = "Asset inventory search")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./toolbox.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path (default: config `db`, else ./assets.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Log output on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogArg::Pretty)]
    log_format: LogArg,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Create the database and provision the search projections
    Init,
    /// Upsert assets from a JSON-lines file ('-' reads stdin)
    Ingest {
        file: PathBuf,
        /// Target (scope) name; created if missing
        #[arg(long)]
        target: String,
        #[arg(long, default_value = "website")]
        kind: AssetKind,
        /// Assets per transaction
        #[arg(long, default_value_t = 1000)]
        batch: usize,
    },
    /// Record vulnerabilities from a JSON-lines file ('-' reads stdin)
    IngestVulns {
        file: PathBuf,
        #[arg(long)]
        target: String,
    },
    /// Run a query and print one page of hits
    Search {
        query: String,
        #[arg(long, default_value = "website")]
        kind: AssetKind,
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Hits per page (clamped to the configured maximum)
        #[arg(long)]
        page_size: Option<usize>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Count matches for a query
    Count {
        query: String,
        #[arg(long, default_value = "website")]
        kind: AssetKind,
    },
    /// Stream every match of a query into a file
    Export {
        query: String,
        #[arg(long, default_value = "website")]
        kind: AssetKind,
        #[arg(long, value_enum, default_value_t = ExportFormat::Jsonl)]
        format: ExportFormat,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Show the refresh governor state
    Status,
    /// Flag the projections as stale
    MarkDirty,
    /// Resynchronise the search projections
    Refresh {
        /// Truncate and reload instead of applying a diff
        #[arg(long, default_value_t = false)]
        exclusive: bool,
        /// Only refresh when the governor says it is due
        #[arg(long, default_value_t = false)]
        if_due: bool,
    },
    /// Periodically refresh the projections when due; stops on Ctrl-C
    Scheduler {
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(match cli.log_format { LogArg::Json => LogFormat::Json, LogArg::Pretty => LogFormat::Pretty });
    let loaded_cfg = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    let settings = loaded_cfg.search.clone().unwrap_or_default();
    let db_path = cli.db.clone().or_else(|| loaded_cfg.db.clone()).unwrap_or_else(|| PathBuf::from(DEFAULT_DB));

    match cli.command {
        Commands::Version => {
            println!("toolbox {} (core {})", env!("CARGO_PKG_VERSION"), toolbox_core::version());
        }
        Commands::Init => {
            let db = open_db(&db_path, settings)?;
            println!("initialised {} (strategy {:?})", db_path.display(), db.settings().strategy);
        }
        Commands::Ingest { file, target, kind, batch } => {
            let db = open_db(&db_path, settings)?;
            let target_id = db.ensure_target(&target)?;
            let started = Instant::now();
            let mut total = 0usize;
            let mut chunk: Vec<AssetInput> = Vec::with_capacity(batch.max(1));
            for item in read_jsonl::<AssetInput>(&file)? {
                chunk.push(item?);
                if chunk.len() >= batch.max(1) {
                    total += db.bulk_upsert(kind, target_id, &chunk)?;
                    chunk.clear();
                }
            }
            if !chunk.is_empty() {
                total += db.bulk_upsert(kind, target_id, &chunk)?;
            }
            tracing::info!(%kind, target = %target, total, duration_ms = started.elapsed().as_millis() as u64, "ingest complete");
            println!("upserted {} {}(s) into target {}", total, kind, target);
        }
        Commands::IngestVulns { file, target } => {
            let db = open_db(&db_path, settings)?;
            let target_id = db.ensure_target(&target)?;
            let mut n = 0usize;
            for v in read_jsonl::<VulnerabilityInput>(&file)? {
                db.add_vulnerability(target_id, &v?)?;
                n += 1;
            }
            println!("recorded {} vulnerabilit{} for target {}", n, if n == 1 { "y" } else { "ies" }, target);
        }
        Commands::Search { query, kind, page, page_size, format } => {
            let db = open_db(&db_path, settings)?;
            let result = db.search_page(&query, kind, page, page_size)?;
            match format {
                OutputFormat::Text => {
                    for h in &result.results {
                        println!("{}", hit_line(h));
                    }
                    println!("(page {}/{}, {} total)", result.page, result.total_pages, result.total);
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Jsonl => {
                    for h in &result.results {
                        println!("{}", serde_json::to_string(h)?);
                    }
                }
                OutputFormat::Csv => {
                    let mut wtr = csv::Writer::from_writer(std::io::stdout());
                    wtr.write_record(["id", "url", "host", "title", "status_code", "technologies", "vulnerabilities"])?;
                    for h in &result.results {
                        wtr.write_record([
                            h.id.to_string(),
                            h.url.clone(),
                            h.host.clone(),
                            h.title.clone(),
                            h.status_code.map(|v| v.to_string()).unwrap_or_default(),
                            h.technologies.join("|"),
                            h.vulnerabilities.len().to_string(),
                        ])?;
                    }
                    wtr.flush()?;
                }
            }
        }
        Commands::Count { query, kind } => {
            let db = open_db(&db_path, settings)?;
            println!("{}", db.count(&parse(&query), kind)?);
        }
        Commands::Export { query, kind, format, out } => {
            let db = open_db(&db_path, settings)?;
            let tree = parse(&query);
            let started = Instant::now();
            let rows = match format {
                ExportFormat::Parquet => export_search_to_parquet(&db, &tree, kind, &out)?,
                ExportFormat::Csv => {
                    let mut wtr = csv::Writer::from_writer(File::create(&out)?);
                    wtr.write_record([
                        "id", "target_id", "url", "host", "title", "status_code", "content_length", "webserver", "content_type",
                        "location", "tech", "matched_patterns", "created_at",
                    ])?;
                    let mut n = 0usize;
                    for rec in db.search_stream(&tree, kind, db.settings().stream_batch_size) {
                        wtr.write_record(csv_row(&rec?))?;
                        n += 1;
                    }
                    wtr.flush()?;
                    n
                }
                ExportFormat::Jsonl => {
                    let mut w = BufWriter::new(File::create(&out)?);
                    let mut n = 0usize;
                    for rec in db.search_stream(&tree, kind, db.settings().stream_batch_size) {
                        writeln!(w, "{}", serde_json::to_string(&rec?)?)?;
                        n += 1;
                    }
                    w.flush()?;
                    n
                }
            };
            tracing::info!(%kind, ?format, rows, duration_ms = started.elapsed().as_millis() as u64, "export complete");
            println!("exported {} row(s) to {}", rows, out.display());
        }
        Commands::Status => {
            let db = open_db(&db_path, settings)?;
            let status = db.refresh_status()?;
            let mut kinds = serde_json::Map::new();
            for kind in AssetKind::ALL {
                kinds.insert(
                    kind.to_string(),
                    serde_json::json!({
                        "assets": db.asset_count(kind)?,
                        "projected": db.projection_count(kind)?,
                        "newest_projected_id": db.newest_projected_id(kind)?,
                    }),
                );
            }
            let obj = serde_json::json!({
                "strategy": format!("{:?}", db.settings().strategy).to_lowercase(),
                "state": db.governor_state()?,
                "needs_refresh": status.needs_refresh,
                "last_refresh_at": status.last_refresh_at_ms.map(rfc3339_from_ms),
                "last_refresh_duration_ms": status.last_refresh_duration_ms,
                "last_error": status.last_error,
                "updated_at": rfc3339_from_ms(status.updated_at_ms),
                "kinds": kinds,
            });
            println!("{}", serde_json::to_string_pretty(&obj)?);
        }
        Commands::MarkDirty => {
            let db = open_db(&db_path, settings)?;
            db.mark_dirty()?;
            println!("state: {:?}", db.governor_state()?);
        }
        Commands::Refresh { exclusive, if_due } => {
            let db = open_db(&db_path, settings)?;
            let mode = if exclusive { RefreshMode::Exclusive } else { db.settings().refresh_mode };
            if if_due && !db.should_refresh() {
                println!("not due ({:?})", db.governor_state()?);
                return Ok(());
            }
            let outcome = db.refresh_with_mode(mode);
            println!("{}", serde_json::to_string(&outcome)?);
            if !outcome.success {
                return Err(anyhow!("refresh failed: {}", outcome.error.unwrap_or_default()));
            }
        }
        Commands::Scheduler { interval_secs } => {
            let every = interval_secs
                .or_else(|| loaded_cfg.scheduler.as_ref().and_then(|s| s.interval_secs))
                .unwrap_or(DEFAULT_INTERVAL_SECS)
                .max(1);
            let db = open_db(&db_path, settings)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_scheduler(db, Duration::from_secs(every)))?;
        }
    }
    Ok(())
}

fn open_db(path: &Path, settings: SearchSettings) -> Result<Db> {
    Db::open_or_create(path, settings).with_context(|| format!("opening {}", path.display()))
}

/// Lines are parsed lazily; blank lines and `#` comments are skipped.
fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<impl Iterator<Item = Result<T>>> {
    let reader: Box<dyn BufRead> = if path.as_os_str() == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        Box::new(BufReader::new(File::open(path).with_context(|| format!("opening {}", path.display()))?))
    };
    Ok(reader.lines().enumerate().filter_map(|(i, line)| match line {
        Err(e) => Some(Err(e.into())),
        Ok(l) if l.trim().is_empty() || l.trim_start().starts_with('#') => None,
        Ok(l) => Some(serde_json::from_str::<T>(&l).with_context(|| format!("line {}", i + 1))),
    }))
}

fn hit_line(h: &SearchHit) -> String {
    let status = h.status_code.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
    let mut line = format!("{:>6} {:>3} {}", h.id, status, h.url);
    if !h.title.is_empty() {
        line.push_str(&format!(" [{}]", h.title));
    }
    if !h.technologies.is_empty() {
        line.push_str(&format!(" ({})", h.technologies.join(",")));
    }
    if !h.vulnerabilities.is_empty() {
        line.push_str(&format!(" vulns={}", h.vulnerabilities.len()));
    }
    line
}

fn csv_row(r: &SearchRecord) -> [String; 13] {
    [
        r.id.to_string(),
        r.target_id.to_string(),
        r.url.clone(),
        r.host.clone(),
        r.title.clone(),
        r.status_code.map(|v| v.to_string()).unwrap_or_default(),
        r.content_length.map(|v| v.to_string()).unwrap_or_default(),
        r.webserver.clone(),
        r.content_type.clone(),
        r.location.clone(),
        r.tech.join("|"),
        r.matched_patterns.join("|"),
        rfc3339_from_ms(r.created_at_ms),
    ]
}

/// Ticks every `every`; each tick runs `refresh_if_due` off the async workers. The connection
/// moves into the blocking task and back, so only one refresh is ever in flight.
async fn run_scheduler(mut db: Db, every: Duration) -> Result<()> {
    tracing::info!(interval_secs = every.as_secs(), debounce_secs = db.settings().debounce_secs, "scheduler started");
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (back, outcome) = tokio::task::spawn_blocking(move || {
                    let outcome = db.refresh_if_due();
                    (db, outcome)
                })
                .await?;
                db = back;
                match outcome {
                    Some(o) if o.success => tracing::info!(duration_ms = o.duration_ms, "scheduled refresh done"),
                    Some(o) => tracing::warn!(duration_ms = o.duration_ms, error = ?o.error, "scheduled refresh failed; retrying next tick"),
                    None => tracing::debug!("refresh not due"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("scheduler stopping");
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_search_flags() {
        let cli = Cli::try_parse_from([
            "toolbox", "--db", "x.db", "search", r#"host="a""#, "--kind", "endpoint", "--page", "2", "--format", "jsonl",
        ])
        .unwrap();
        match cli.command {
            Commands::Search { query, kind, page, page_size, format } => {
                assert_eq!(query, r#"host="a""#);
                assert_eq!(kind, AssetKind::Endpoint);
                assert_eq!(page, 2);
                assert_eq!(page_size, None);
                assert_eq!(format, OutputFormat::Jsonl);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(Cli::try_parse_from(["toolbox", "count", "x", "--kind", "subdomain"]).is_err());
    }

    #[test]
    fn jsonl_reader_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("in.jsonl");
        std::fs::write(&p, "# scan 1\n{\"url\":\"http://a.com\",\"tech\":[\"nginx\"]}\n\n{\"url\":\"http://b.com\"}\n").unwrap();
        let items: Vec<AssetInput> = read_jsonl(&p).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].tech, vec!["nginx"]);
    }

    #[test]
    fn jsonl_reader_reports_bad_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("in.jsonl");
        std::fs::write(&p, "{\"url\":\"http://a.com\"}\nnot json\n").unwrap();
        let err = read_jsonl::<AssetInput>(&p).unwrap().nth(1).unwrap().unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
