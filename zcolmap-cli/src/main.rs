use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use zcolmap_core::connection::Row;
use zcolmap_core::processor::{self, Processor};
use zcolmap_core::properties::{self as keys, PropertySet};
use zcolmap_core::{
    ColumnValue, ConnectionSource, CycleReport, MessageContext, MessageDocument, RecordingConnection,
    RecordingPool, SharedLock, TransactionPolicy,
};
use zcolmap_sqlite::SqlitePool;

#[derive(Parser, Debug)]
#[command(name = "zcolmap")]
#[command(about = "Configuration-driven column mapping for provisioning writes", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print every configured descriptor
    Describe {
        /// Processor properties as a flat JSON object
        #[arg(long)]
        config: PathBuf,
    },
    /// Resolve and build without a database; prints SQL and bound parameters
    Render {
        #[arg(long)]
        config: PathBuf,
        /// Message context as a JSON object
        #[arg(long, default_value = "{}")]
        context: String,
        /// Current document (JSON or plain text)
        #[arg(long, default_value = "")]
        document: String,
        /// Staging rows returned to the batch lookup, as a JSON array of objects
        #[arg(long)]
        rows: Option<String>,
    },
    /// Execute one cycle against a SQLite database with an owned connection
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        database: PathBuf,
        #[arg(long, default_value = "{}")]
        context: String,
        #[arg(long, default_value = "")]
        document: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output = match cli.cmd {
        Cmd::Describe { config } => describe(&config)?,
        Cmd::Render {
            config,
            context,
            document,
            rows,
        } => render(&config, &context, &document, rows.as_deref())?,
        Cmd::Run {
            config,
            database,
            context,
            document,
        } => run(&config, &database, &context, &document)?,
    };
    println!("{}", output);
    Ok(())
}

fn load_properties(path: &Path) -> anyhow::Result<PropertySet> {
    let props = PropertySet::from_file(path)
        .with_context(|| format!("reading properties from {}", path.display()))?
        .with_env_overrides();
    info!("Loaded {} properties from {}", props.len(), path.display());
    Ok(props)
}

fn build(props: &PropertySet) -> anyhow::Result<Box<dyn Processor>> {
    processor::from_properties(props, Arc::new(SharedLock::new())).context("configuring processor")
}

fn parse_context(raw: &str) -> anyhow::Result<MessageContext> {
    let value: serde_json::Value = serde_json::from_str(raw).context("parsing --context")?;
    anyhow::ensure!(value.is_object(), "--context must be a JSON object");
    Ok(MessageContext::from_json(&value))
}

fn parse_document(raw: &str) -> MessageDocument {
    if raw.trim().is_empty() {
        MessageDocument::Empty
    } else {
        MessageDocument::parse(raw)
    }
}

fn parse_rows(raw: &str) -> anyhow::Result<Vec<Row>> {
    let value: serde_json::Value = serde_json::from_str(raw).context("parsing --rows")?;
    let items = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("--rows must be a JSON array"))?;
    items
        .iter()
        .map(|item| {
            let obj = item
                .as_object()
                .ok_or_else(|| anyhow::anyhow!("each staging row must be a JSON object"))?;
            Ok(obj
                .iter()
                .map(|(k, v)| (k.clone(), ColumnValue::from_json(v)))
                .collect::<Row>())
        })
        .collect()
}

fn report_json(report: &CycleReport) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

fn describe(config: &Path) -> anyhow::Result<String> {
    let props = load_properties(config)?;
    let processor = build(&props)?;
    Ok(format!(
        "{} processor on {} ({} transaction)\n{}",
        processor.kind(),
        processor.settings().table,
        processor.settings().policy,
        processor.describe().trim_end()
    ))
}

fn render(config: &Path, context: &str, document: &str, rows: Option<&str>) -> anyhow::Result<String> {
    let props = load_properties(config)?;
    let processor = build(&props)?;
    let context = parse_context(context)?;
    let document = parse_document(document);

    let mut conn = RecordingConnection::new();
    let pool = RecordingPool::new();
    let journal = match processor.settings().policy {
        TransactionPolicy::Ambient => conn.journal(),
        TransactionPolicy::Owned => pool.journal(),
    };
    if let Some(rows) = rows {
        journal.push_query_result(parse_rows(rows)?);
    }

    let source = match processor.settings().policy {
        TransactionPolicy::Ambient => ConnectionSource::Ambient(&mut conn),
        TransactionPolicy::Owned => ConnectionSource::Pool(&pool),
    };
    let report = processor.process(source, &context, &document)?;

    let mut out = String::new();
    for statement in journal.executed() {
        out.push_str(&statement.sql);
        out.push('\n');
        for (entry, bindings) in statement.bindings.iter().enumerate() {
            let params: Vec<String> = bindings
                .iter()
                .map(|(slot, param)| format!("{}={}", slot, param))
                .collect();
            out.push_str(&format!("  [{}] {}\n", entry, params.join(", ")));
        }
    }
    out.push_str(&report_json(&report)?);
    Ok(out)
}

fn run(config: &Path, database: &Path, context: &str, document: &str) -> anyhow::Result<String> {
    let mut props = load_properties(config)?;
    props.set(keys::TRANSACTIONAL_LOGGING, "false");
    if !props.contains(keys::DIALECT) {
        props.set(keys::DIALECT, "sqlite");
    }
    let processor = build(&props)?;

    let pool = SqlitePool::open(database)
        .with_context(|| format!("opening {}", database.display()))?;
    let report = processor.process(
        ConnectionSource::Pool(&pool),
        &parse_context(context)?,
        &parse_document(document),
    )?;
    info!("{}", report);
    report_json(&report)
}
