//! Command-line front end for a snippet library file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use codelib::config::Config;
use codelib::export;
use codelib::logging::init_logging;
use codelib::{
    core_version, ChannelCatcher, Ranking, SearchEngine, SearchEvent, SharedStore, Snippet,
    SnippetStore,
};
use parking_lot::RwLock;

/// Upper bound on how long a single CLI search may take.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser, Debug)]
#[command(author, version, about = "Personal code snippet library", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Library file; defaults to `[library] path` from the config file
    #[arg(short, long, global = true)]
    library: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show format version and snippet counts
    Info,
    /// Search a library; `*` lists everything
    Search {
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// Add a snippet from a file or from literal text
    Add {
        #[arg(short, long)]
        keywords: String,
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
        #[arg(short, long)]
        text: Option<String>,
    },
    /// Tombstone a snippet by id
    Delete { id: String },
    /// Import plain files or other library files, merged by id
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Export live snippets to a .zcl2 or .html file
    Export {
        output: PathBuf,
        #[arg(long, default_value = "CodeLib")]
        title: String,
    },
    /// Re-save a library in the current format version
    Upgrade,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref())?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, config.logging.dir.as_deref()).context("Failed to initialize logging")?;

    let library = config.library_path(cli.library.as_deref())?;

    match cli.command {
        Command::Info => info(&config, &library),
        Command::Search { query } => search(&config, &library, &query.join(" ")),
        Command::Add {
            keywords,
            file,
            text,
        } => add(&config, &library, &keywords, file.as_deref(), text),
        Command::Delete { id } => {
            let mut store = open_or_new(&config, &library)?;
            store.soft_delete(&id)?;
            store.save(&library)?;
            println!("Deleted {id}");
            Ok(())
        }
        Command::Import { paths } => {
            let mut store = open_or_new(&config, &library)?;
            let report = store.import_files(&paths)?;
            store.save(&library)?;
            println!(
                "Imported: {} added, {} replaced, {} kept; {} active snippets",
                report.added,
                report.replaced,
                report.kept,
                store.active_count()
            );
            Ok(())
        }
        Command::Export {
            output,
            title,
        } => {
            let store = open(&config, &library)?;
            let snippets: Vec<Arc<Snippet>> = store.iter().cloned().collect();
            let count = export::export(&output, &title, &snippets)?;
            println!("Exported {count} snippets to {}", output.display());
            Ok(())
        }
        Command::Upgrade => {
            let mut store = open(&config, &library)?;
            let from = store.loaded_version();
            store.save(&library)?;
            println!(
                "Upgraded {} from version {} to {}",
                library.display(),
                from.map_or_else(|| "?".to_string(), |v| v.to_string()),
                codelib::CURRENT_VERSION
            );
            Ok(())
        }
    }
}

fn open(config: &Config, library: &Path) -> Result<SnippetStore> {
    SnippetStore::open(library, Arc::new(config.content_types.table()))
        .with_context(|| format!("Failed to open library {}", library.display()))
}

fn open_or_new(config: &Config, library: &Path) -> Result<SnippetStore> {
    if library.exists() {
        open(config, library)
    } else {
        Ok(SnippetStore::with_content_types(Arc::new(config.content_types.table())))
    }
}

fn info(config: &Config, library: &Path) -> Result<()> {
    let store = open(config, library)?;
    println!("codelib {}", core_version());
    println!("Library: {}", library.display());
    if let Some(version) = store.loaded_version() {
        println!("  Format version: {version}");
    }
    println!("  Snippets: {}", store.len());
    println!("  Active: {}", store.active_count());
    println!("  Deleted: {}", store.len() - store.active_count());
    if store.is_modified() {
        println!("  Note: ids were assigned on load; run `upgrade` to persist them");
    }
    Ok(())
}

fn search(config: &Config, library: &Path, query: &str) -> Result<()> {
    let store: SharedStore = Arc::new(RwLock::new(open(config, library)?));
    let (catcher, rx) = ChannelCatcher::new();
    let engine = SearchEngine::new(store, Arc::new(catcher), config.search_options())?;
    engine.search_now(query);

    let limit = config.display_limit_for(query).unwrap_or(usize::MAX);
    let mut shown = 0usize;
    let mut total = 0usize;
    loop {
        let event = rx
            .recv_timeout(SEARCH_TIMEOUT)
            .context("Search did not complete in time")?;
        match event {
            SearchEvent::Hit {
                snippet,
                match_degree,
                ..
            } => {
                total += 1;
                if shown < limit {
                    shown += 1;
                    println!("{:>6}  {}  {}", match_degree, snippet.id(), snippet);
                }
            }
            SearchEvent::Complete { ranking, .. } => {
                let order = match ranking {
                    Ranking::MatchDegree => "relevance",
                    Ranking::Keywords => "keywords",
                };
                if total > shown {
                    println!("... {} more", total - shown);
                }
                println!("{total} results, ordered by {order}");
                return Ok(());
            }
        }
    }
}

fn add(
    config: &Config,
    library: &Path,
    keywords: &str,
    file: Option<&Path>,
    text: Option<String>,
) -> Result<()> {
    let content = match (file, text) {
        (Some(file), _) => std::fs::read(file)
            .with_context(|| format!("Failed to read {}", file.display()))?,
        (None, Some(text)) => text.into_bytes(),
        (None, None) => bail!("either --file or --text is required"),
    };

    let mut store = open_or_new(config, library)?;
    let id = store.add(Snippet::with_text(keywords, content));
    store.save(library)?;
    println!("{id}");
    Ok(())
}
