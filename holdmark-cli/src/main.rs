//! holdmark: inspect and clean up replication bookmarks and holds.
//!
//! # Usage
//!
//! ```bash
//! # List every marker below pool/data
//! holdmark list --filter 'pool/data<'
//!
//! # Show markers superseded by newer ones of the same job
//! holdmark stale --filter 'pool<' --job push
//!
//! # Release stale markers (preview first)
//! holdmark release-stale --filter 'pool<' --dry-run
//! holdmark release-stale --filter 'pool<'
//! ```

mod output;
mod query_args;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use holdmark_core::{
    Abstraction, Config, ListZfsHoldsAndBookmarksQuery, VersionStore, ZfsCli, batch_destroy,
    check_registry, list_abstractions, list_stale,
};
use query_args::{QueryArgs, UntilArgs};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG_PATH: &str = "/etc/holdmark/config.json";

#[derive(Parser, Debug)]
#[command(name = "holdmark")]
#[command(author = "Holdmark Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Replication bookmark and hold lifecycle tool")]
struct Cli {
    /// Config file (JSON)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List bookmarks and holds matching a query
    List {
        #[command(flatten)]
        query: QueryArgs,
        #[command(flatten)]
        until: UntilArgs,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// List stale bookmarks and holds
    Stale {
        #[command(flatten)]
        query: QueryArgs,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Destroy stale bookmarks and release stale holds
    #[command(name = "release-stale")]
    ReleaseStale {
        #[command(flatten)]
        query: QueryArgs,
        /// Only print what would be destroyed
        #[arg(long)]
        dry_run: bool,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Destroy every bookmark and release every hold matching a query
    #[command(name = "release-all")]
    ReleaseAll {
        #[command(flatten)]
        query: QueryArgs,
        #[command(flatten)]
        until: UntilArgs,
        /// Only print what would be destroyed
        #[arg(long)]
        dry_run: bool,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("holdmark=info".parse()?)
            .add_directive("holdmark_core=info".parse()?)
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    check_registry();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config {:?}", cli.config))?;
    config.apply();

    let store: Arc<dyn VersionStore> = Arc::new(ZfsCli::new(config.zfs_binary.clone()));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let app = App {
        store,
        cancel,
        config,
    };

    match cli.command {
        Commands::List { query, until, json } => app.cmd_list(query, until, json).await,
        Commands::Stale { query, json } => app.cmd_stale(query, json).await,
        Commands::ReleaseStale {
            query,
            dry_run,
            json,
        } => app.cmd_release_stale(query, dry_run, json).await,
        Commands::ReleaseAll {
            query,
            until,
            dry_run,
            json,
        } => app.cmd_release_all(query, until, dry_run, json).await,
    }
}

struct App {
    store: Arc<dyn VersionStore>,
    cancel: CancellationToken,
    config: Config,
}

impl App {
    fn build_query(&self, args: &QueryArgs, until: &UntilArgs) -> Result<ListZfsHoldsAndBookmarksQuery> {
        args.build(until, self.config.default_concurrency)
    }

    /// Enumerate, print errors to stderr, and fail if there were any.
    async fn enumerate(&self, query: ListZfsHoldsAndBookmarksQuery) -> Result<Vec<Abstraction>> {
        let (abstractions, errors) =
            list_abstractions(self.store.clone(), self.cancel.clone(), query).await?;
        if !errors.is_empty() {
            eprint!("{}", output::render_errors(&errors));
            return Err(anyhow!(
                "{} filesystem(s) could not be listed ({} markers found)",
                errors.len(),
                abstractions.len()
            ));
        }
        Ok(abstractions)
    }

    async fn cmd_list(&self, args: QueryArgs, until: UntilArgs, json: bool) -> Result<()> {
        let query = self.build_query(&args, &until)?;
        let (abstractions, errors) =
            list_abstractions(self.store.clone(), self.cancel.clone(), query).await?;

        // partial results are printed before the error list
        print!("{}", output::render_abstractions(&abstractions, json)?);
        if !errors.is_empty() {
            eprint!("{}", output::render_errors(&errors));
            return Err(anyhow!("{} filesystem(s) could not be listed", errors.len()));
        }
        Ok(())
    }

    async fn cmd_stale(&self, args: QueryArgs, json: bool) -> Result<()> {
        let query = self.build_query(&args, &UntilArgs::default())?;
        let info = list_stale(self.store.clone(), self.cancel.clone(), query).await?;
        tracing::info!(
            all = info.all.len(),
            live = info.live.len(),
            stale = info.stale.len(),
            "classified markers"
        );
        print!("{}", output::render_abstractions(&info.stale, json)?);
        Ok(())
    }

    async fn cmd_release_stale(&self, args: QueryArgs, dry_run: bool, json: bool) -> Result<()> {
        let query = self.build_query(&args, &UntilArgs::default())?;
        let info = list_stale(self.store.clone(), self.cancel.clone(), query).await?;
        self.release(info.stale, dry_run, json).await
    }

    async fn cmd_release_all(
        &self,
        args: QueryArgs,
        until: UntilArgs,
        dry_run: bool,
        json: bool,
    ) -> Result<()> {
        let query = self.build_query(&args, &until)?;
        let abstractions = self.enumerate(query).await?;
        self.release(abstractions, dry_run, json).await
    }

    async fn release(&self, abstractions: Vec<Abstraction>, dry_run: bool, json: bool) -> Result<()> {
        if dry_run {
            if json {
                print!("{}", output::render_abstractions(&abstractions, true)?);
            } else {
                for a in &abstractions {
                    println!("would destroy {}", a);
                }
            }
            return Ok(());
        }

        let total = abstractions.len();
        let mut rx = batch_destroy(self.store.clone(), self.cancel.clone(), abstractions);
        let mut results = Vec::with_capacity(total);
        while let Some(result) = rx.recv().await {
            if !json {
                print!("{}", output::render_destroy_results(std::slice::from_ref(&result), false)?);
            }
            results.push(result);
        }
        if json {
            print!("{}", output::render_destroy_results(&results, true)?);
        }

        let failed = results.iter().filter(|r| !r.is_ok()).count();
        if failed > 0 {
            return Err(anyhow!("{} of {} destroy operations failed", failed, total));
        }
        Ok(())
    }
}
