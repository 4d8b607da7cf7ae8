use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tablekit::console::echo_table;
use tablekit::definition::{self, TableDefinition};
use tablekit::heap::HeapEngine;
use tablekit::tablespace::{self, TablespaceEngine};
use tablekit::transaction::Xid;
use tablekit::{echo, echo_error, echo_lines, Config, EngineRegistry, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    name = "tablekit",
    version = VERSION,
    about = "Inspect and recover tablekit data directories."
)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode and print a table definition file.
    Inspect { file: PathBuf },
    /// List the tables of a schema.
    Tables { schema: String },
    /// List prepared transactions waiting for a decision.
    Recover,
    /// Commit or roll back one prepared transaction.
    Resolve {
        xid: Xid,
        #[arg(long, conflicts_with = "rollback", required_unless_present = "rollback")]
        commit: bool,
        #[arg(long)]
        rollback: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        echo_error!("{}\n", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Command::Inspect { file } = &cli.command {
        print_definition(&definition::read_definition(file)?);
        return Ok(());
    }

    let registry = open(cli.config)?;
    let outcome = match cli.command {
        Command::Inspect { .. } => Ok(()),
        Command::Tables { schema } => registry.table_names(&schema).map(|names| {
            let rows: Vec<Vec<String>> = names.into_iter().map(|n| vec![n]).collect();
            echo!("{}", echo_table(&[format!("Tables_in_{}", schema)], &rows));
        }),
        Command::Recover => registry.xa_recover().map(|xids| {
            let rows: Vec<Vec<String>> = xids.iter().map(|x| vec![x.to_string()]).collect();
            echo!("{}", echo_table(&["xid".to_string()], &rows));
        }),
        Command::Resolve { xid, commit, .. } => registry.resolve_by_xid(&xid, commit).map(|_| {
            echo_lines!("{} {}\n", if commit { "Committed" } else { "Rolled back" }, xid);
        }),
    };
    let closed = registry.shutdown();
    outcome.and(closed)
}

fn open(config: Config) -> Result<EngineRegistry> {
    info!(data_dir = %config.data_dir.display(), "Opening data directory");
    let registry = EngineRegistry::new(config);
    registry.add(Arc::new(TablespaceEngine::new(tablespace::ENGINE_NAME, registry.config())))?;
    registry.add(Arc::new(HeapEngine::new(tablekit::heap::ENGINE_NAME)))?;
    registry.init()?;
    Ok(registry)
}

fn print_definition(def: &TableDefinition) {
    echo_lines!(
        "{}.{} (engine {}, version {}{})\n",
        def.schema,
        def.name,
        def.engine,
        def.version,
        if def.is_temporary() { ", temporary" } else { "" }
    );
    let columns: Vec<Vec<String>> = def
        .columns
        .iter()
        .map(|c| {
            vec![
                c.name.clone(),
                c.kind.to_string(),
                if c.nullable { "YES" } else { "NO" }.to_string(),
                c.default.clone().unwrap_or_else(|| "NULL".to_string()),
                if c.auto_increment { "auto_increment" } else { "" }.to_string(),
            ]
        })
        .collect();
    let headers = ["Field", "Type", "Null", "Default", "Extra"].map(String::from);
    echo!("{}", echo_table(&headers, &columns));

    let indexes: Vec<Vec<String>> = def
        .indexes
        .iter()
        .map(|i| {
            let parts: Vec<String> = i
                .parts
                .iter()
                .map(|p| match p.prefix {
                    Some(len) => format!("{}({})", p.column, len),
                    None => p.column.clone(),
                })
                .collect();
            vec![
                i.name.clone(),
                if i.unique { "YES" } else { "NO" }.to_string(),
                parts.join(", "),
            ]
        })
        .collect();
    let headers = ["Key", "Unique", "Columns"].map(String::from);
    echo!("{}", echo_table(&headers, &indexes));
}
