//! UTM tracker host — plays the part of the page for the tracker library.
//!
//! Each invocation is one page interaction against file-backed storage:
//! `load` is a fresh page load, the other commands act on an already loaded
//! page and read the snapshot it persisted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use utm_core::config::TrackerConfig;
use utm_web_sdk::{DirectoryTarget, FileStore, PageContext, PageRuntime, TrackerStores};

#[derive(Parser, Debug)]
#[command(name = "utm-tracker")]
#[command(about = "Capture UTM attribution and correlate it with embedded form submissions")]
#[command(version)]
struct Cli {
    /// Storage key prefix (overrides config)
    #[arg(long, env = "UTM_TRACKER__STORAGE_PREFIX")]
    prefix: Option<String>,

    /// Directory holding durable and session storage (overrides config)
    #[arg(long, env = "UTM_TRACKER__STORAGE__DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory exports are written to (overrides config)
    #[arg(long, env = "UTM_TRACKER__STORAGE__DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,

    /// URL of the current page
    #[arg(long, global = true, default_value = "")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fresh page load: capture the snapshot and log a page view
    Load {
        #[arg(long, default_value = "")]
        referrer: String,
        #[arg(long, default_value = "")]
        user_agent: String,
    },
    /// Deliver a cross-frame message (JSON) to the page
    Submit { message: String },
    /// Click an element on the page
    Click {
        #[arg(long, default_value = "iframe")]
        tag: String,
    },
    /// Write the export document to the download directory
    Export,
    /// Print everything the tracker has stored
    Dump,
    /// Delete every tracker key
    Clear,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing; logs go to stderr so stdout stays JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "utm_tracker=info,utm_web_sdk=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = TrackerConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        TrackerConfig::default()
    });

    // Apply CLI overrides
    if let Some(prefix) = cli.prefix {
        config.storage_prefix = prefix;
    }
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    if let Some(dir) = cli.download_dir {
        config.storage.download_dir = dir;
    }

    info!(
        prefix = %config.storage_prefix,
        data_dir = %config.storage.data_dir.display(),
        "Configuration loaded"
    );

    let stores = TrackerStores::new(
        Arc::new(FileStore::new(config.storage.data_dir.join("local"))),
        Arc::new(FileStore::new(config.storage.data_dir.join("session"))),
    );
    let download_dir = config.storage.download_dir.clone();
    let runtime = PageRuntime::new(config, stores);

    match cli.command {
        Command::Load {
            referrer,
            user_agent,
        } => {
            let view = runtime.on_page_ready(PageContext::new(cli.url, referrer, user_agent))?;
            print_json(&serde_json::json!({
                "utm": runtime.utm_data(),
                "pageView": view,
            }))?;
        }
        Command::Submit { message } => {
            let data: serde_json::Value =
                serde_json::from_str(&message).context("message is not valid JSON")?;
            runtime.attach(PageContext::new(cli.url, "", ""));
            match runtime.post_message(data)? {
                Some(record) => print_json(&record)?,
                None => warn!("message was not a form submission, nothing stored"),
            }
        }
        Command::Click { tag } => {
            runtime.attach(PageContext::new(cli.url, "", ""));
            runtime.click(&tag);
        }
        Command::Export => {
            runtime.attach(PageContext::new(cli.url, "", ""));
            let target = DirectoryTarget::new(&download_dir);
            if let Some(result) = runtime.export_data(&target) {
                let filename = result?;
                println!("{}", target.dir().join(filename).display());
            }
        }
        Command::Dump => {
            runtime.attach(PageContext::new(cli.url, "", ""));
            print_json(&runtime.all_data())?;
        }
        Command::Clear => {
            runtime.attach(PageContext::new(cli.url, "", ""));
            if let Some(result) = runtime.clear_all_data() {
                result?;
            }
        }
    }

    runtime.teardown();
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
