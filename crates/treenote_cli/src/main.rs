//! Command-line entry point over `treenote_core`.
//!
//! # Responsibility
//! - Import and export collections without the desktop UI.
//! - Inspect a database: filtered rows and the tag tree.

use clap::{Args, Parser, Subcommand};
use log::error;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use treenote_core::view::RowSource;
use treenote_core::{
    export_json, export_outline, import_json, init_logging, DocumentStore, FilterView,
    SessionConfig, Session, SqliteDocumentStore, TagIndex, TagNode, ROOT_ID,
};

#[derive(Parser)]
#[command(name = "treenote", about = "Outline database tools", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database file
    #[arg(long, global = true, default_value = "treenote.sqlite3")]
    db: PathBuf,

    /// Collection inside the database
    #[arg(long, global = true, default_value = "items")]
    collection: String,

    /// Absolute directory for log files; logging is off when omitted
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log level (trace|debug|info|warn|error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a JSON document array into an empty collection
    Import(FileArgs),
    /// Export live documents as a JSON array
    ExportJson(OutputArgs),
    /// Export the outline as indented plain text
    ExportOutline(OutputArgs),
    /// Print the rows matching a filter query
    Filter(FilterArgs),
    /// Print the tag tree with item counts
    Tags,
    /// List collections in the database
    Collections,
    /// Print the core version
    Version,
}

#[derive(Args)]
struct FileArgs {
    /// Input file
    path: PathBuf,
}

#[derive(Args)]
struct OutputArgs {
    /// Output file; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct FilterArgs {
    /// Query text, e.g. "t=task c=red"
    query: String,
}

fn main() {
    let cli = Cli::parse();
    if let Some(log_dir) = &cli.log_dir {
        if let Err(e) = init_logging(&cli.log_level, log_dir) {
            eprintln!("warning: {}", e);
        }
    }
    if let Err(e) = run(cli) {
        error!("event=cli_run module=cli status=error error={}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    if let Commands::Version = cli.command {
        println!("treenote {}", treenote_core::core_version());
        return Ok(());
    }

    let store = Arc::new(SqliteDocumentStore::open(&cli.db)?);
    match cli.command {
        Commands::Import(args) => {
            let json = std::fs::read_to_string(&args.path)?;
            let count = import_json(store.as_ref(), &cli.collection, &json)?;
            println!("imported {} documents into `{}`", count, cli.collection);
        }
        Commands::ExportJson(args) => {
            let json = export_json(store.as_ref(), &cli.collection)?;
            write_output(args.output, &json)?;
        }
        Commands::ExportOutline(args) => {
            let session = open_session(store);
            let model = session.open_tree(&cli.collection)?;
            write_output(args.output, &export_outline(&model, ROOT_ID))?;
        }
        Commands::Filter(args) => {
            let session = open_session(store);
            let mut model = session.open_tree(&cli.collection)?;
            let today = chrono::Local::now().date_naive();
            let mut view = FilterView::new(&mut model, today);
            view.set_query(&model, &args.query)?;
            for position in 0..view.count() {
                let Some(row) = view.sequence_at(position) else {
                    continue;
                };
                let text = model.item(row.id).map_or("", |item| item.text.as_str());
                let marker = if row.matched { "-" } else { "·" };
                println!("{}{} {}", "\t".repeat(row.depth), marker, text);
            }
        }
        Commands::Tags => {
            let session = open_session(store);
            let model = session.open_tree(&cli.collection)?;
            let index = TagIndex::build(&model);
            for node in index.roots() {
                print_tag(node, 0);
            }
        }
        Commands::Collections => {
            for name in store.collections()? {
                println!("{}", name);
            }
        }
        Commands::Version => {}
    }
    Ok(())
}

fn open_session(store: Arc<SqliteDocumentStore>) -> Session {
    let store: Arc<dyn DocumentStore> = store;
    Session::new(store, SessionConfig::default())
}

fn print_tag(node: &TagNode, depth: usize) {
    println!("{}{} ({})", "  ".repeat(depth), node.full_path, node.count);
    for child in &node.children {
        print_tag(child, depth + 1);
    }
}

fn write_output(path: Option<PathBuf>, content: &str) -> std::io::Result<()> {
    match path {
        Some(path) => std::fs::write(path, content),
        None => {
            print!("{}", content);
            Ok(())
        }
    }
}
