use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use quill_kernel::{KernelBuilder, OrchestrationContext, ProviderSettings};
use quill_protocol::{ContextPatch, CursorPosition, SearchScope};
use quill_runtime::RuntimeConfig;
use quill_toolchain::ProcessToolchain;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SOURCE_EXTENSIONS: &[&str] = &["c", "h"];

#[derive(Debug, Parser)]
#[command(name = "quilld")]
#[command(about = "Quill assistance core from the command line")]
struct Cli {
    /// Project root; memory lives in `<root>/.quill`.
    #[arg(long, env = "QUILL_ROOT", default_value = ".")]
    root: PathBuf,
    /// Skip remote providers and answer with the local adapter only.
    #[arg(long)]
    offline: bool,
    /// Per-attempt provider timeout, overriding the per-action default.
    #[arg(long, env = "QUILL_TIMEOUT_MS")]
    timeout_ms: Option<u64>,
    #[arg(long, env = "QUILL_CC", default_value = "cc")]
    compiler: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index source files under the root (or the given paths).
    Index { paths: Vec<PathBuf> },
    /// Print the snapshot a prompt would be built from.
    Context,
    /// Complete at a cursor position in a file.
    Complete {
        file: PathBuf,
        #[arg(long)]
        line: usize,
        #[arg(long)]
        column: usize,
        #[arg(long, default_value = "")]
        selection: String,
    },
    Refactor {
        file: PathBuf,
        #[arg(long, default_value = "")]
        intent: String,
    },
    /// Diagnose a compiler error; defaults to the last recorded one.
    Diagnose {
        #[arg(long)]
        error: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    Generate {
        prompt: String,
        /// Write the generated files under the root.
        #[arg(long)]
        write: bool,
    },
    /// Review a file for bugs and unsafe constructs.
    Review {
        file: PathBuf,
        /// Areas to emphasise; repeatable.
        #[arg(long)]
        focus: Vec<String>,
    },
    /// Check connectivity of every configured provider.
    Health,
    /// Compile a file, optionally running it.
    Build {
        file: PathBuf,
        #[arg(long)]
        run: bool,
    },
    Search {
        query: String,
        #[arg(long, default_value = "all")]
        scope: SearchScope,
    },
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Import { file: PathBuf },
    Clear,
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let providers = if cli.offline {
        ProviderSettings::offline()
    } else {
        ProviderSettings::from_env()
    };
    let runtime = RuntimeConfig {
        attempt_timeout: cli.timeout_ms.map(Duration::from_millis),
        ..RuntimeConfig::default()
    };
    let kernel = KernelBuilder::new(&cli.root)
        .providers(providers)
        .runtime_config(runtime)
        .toolchain(Arc::new(ProcessToolchain::new(&cli.compiler)))
        .open()
        .await?;

    let outcome = execute(&kernel, cli.command).await;
    if let Err(error) = kernel.close().await {
        warn!(%error, "failed to close project cleanly");
    }
    outcome
}

async fn execute(kernel: &OrchestrationContext, command: Command) -> Result<()> {
    match command {
        Command::Index { paths } => {
            let paths = if paths.is_empty() {
                vec![kernel.root().to_path_buf()]
            } else {
                paths
            };
            let mut indexed = 0usize;
            for path in paths {
                for file in collect_sources(&path).await? {
                    open_file(kernel, &file).await?;
                    indexed += 1;
                }
            }
            info!(indexed, "index complete");
            print_json(&kernel.stats().memory)
        }
        Command::Context => print_json(&kernel.context_snapshot()),
        Command::Complete {
            file,
            line,
            column,
            selection,
        } => {
            let key = open_file(kernel, &file).await?;
            let cursor = CursorPosition::new(line, column);
            kernel
                .update_context(&ContextPatch {
                    current_file: Some(Some(key)),
                    cursor: Some(cursor),
                    ..ContextPatch::default()
                })
                .await?;
            print_json(&kernel.request_completion(cursor, selection).await?)
        }
        Command::Refactor { file, intent } => {
            let key = open_file(kernel, &file).await?;
            focus_file(kernel, key).await?;
            let code = read_source(&file).await?;
            print_json(&kernel.request_refactor(code, intent).await?)
        }
        Command::Diagnose { error, file } => {
            if let Some(file) = &file {
                let key = open_file(kernel, file).await?;
                focus_file(kernel, key).await?;
            }
            let outcome = match error {
                Some(error) => {
                    let code = match &file {
                        Some(file) => read_source(file).await?,
                        None => String::new(),
                    };
                    kernel.request_diagnosis(error, code).await?
                }
                None => match kernel.diagnose_last_error().await? {
                    Some(outcome) => outcome,
                    None => bail!("no error recorded; pass --error"),
                },
            };
            print_json(&outcome)
        }
        Command::Generate { prompt, write } => {
            let outcome = kernel.request_generation(prompt).await?;
            if write {
                for file in &outcome.files {
                    let target = kernel.root().join(&file.name);
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&target, &file.content)
                        .await
                        .with_context(|| format!("writing {}", target.display()))?;
                    kernel.update_file(&file.name, &file.content).await?;
                    info!(file = %file.name, "generated file written");
                }
            }
            print_json(&outcome)
        }
        Command::Review { file, focus } => {
            let key = open_file(kernel, &file).await?;
            focus_file(kernel, key).await?;
            let code = read_source(&file).await?;
            print_json(&kernel.request_review(code, focus).await?)
        }
        Command::Health => {
            let report = kernel.provider_health().await;
            for entry in report.iter().filter(|entry| !entry.healthy) {
                warn!(provider = %entry.provider, "provider unavailable");
            }
            print_json(&report)
        }
        Command::Build { file, run } => {
            let key = open_file(kernel, &file).await?;
            focus_file(kernel, key).await?;
            let source = read_source(&file).await?;
            if run {
                print_json(&kernel.run(&source).await?)
            } else {
                print_json(&kernel.compile(&source).await?)
            }
        }
        Command::Search { query, scope } => print_json(&kernel.search(&query, scope)),
        Command::Export { out } => {
            let document = kernel.export_json()?;
            match out {
                Some(out) => {
                    tokio::fs::write(&out, document)
                        .await
                        .with_context(|| format!("writing {}", out.display()))?;
                    info!(out = %out.display(), "memory exported");
                    Ok(())
                }
                None => {
                    println!("{document}");
                    Ok(())
                }
            }
        }
        Command::Import { file } => {
            let payload = read_source(&file).await?;
            print_json(&kernel.import_json(&payload).await?)
        }
        Command::Clear => {
            kernel.clear().await?;
            print_json(&kernel.stats().memory)
        }
        Command::Stats => print_json(&kernel.stats()),
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn read_source(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

/// Record `path` in memory and return its project-relative key.
async fn open_file(kernel: &OrchestrationContext, path: &Path) -> Result<String> {
    let content = read_source(path).await?;
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let absolute = tokio::fs::canonicalize(&absolute).await.unwrap_or(absolute);
    let record = kernel
        .update_file(&absolute.to_string_lossy(), &content)
        .await?;
    Ok(record.path)
}

async fn focus_file(kernel: &OrchestrationContext, key: String) -> Result<()> {
    kernel
        .update_context(&ContextPatch {
            current_file: Some(Some(key)),
            ..ContextPatch::default()
        })
        .await?;
    Ok(())
}

/// Every C source or header under `path`, skipping hidden directories.
async fn collect_sources(path: &Path) -> Result<Vec<PathBuf>> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    if metadata.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut found = Vec::new();
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("listing {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            let file_type = entry.file_type().await?;
            if file_type.is_dir() && !hidden {
                pending.push(entry_path);
            } else if file_type.is_file() && is_source(&entry_path) {
                found.push(entry_path);
            }
        }
    }
    found.sort();
    Ok(found)
}

fn is_source(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| SOURCE_EXTENSIONS.contains(&extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_subcommand() -> Result<()> {
        let cli = Cli::try_parse_from([
            "quilld", "--offline", "complete", "main.c", "--line", "3", "--column", "5",
        ])?;
        assert!(cli.offline);
        match cli.command {
            Command::Complete { line, column, .. } => assert_eq!((line, column), (3, 5)),
            other => bail!("unexpected command {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn review_focus_is_repeatable() -> Result<()> {
        let cli = Cli::try_parse_from([
            "quilld", "review", "main.c", "--focus", "memory", "--focus", "input",
        ])?;
        match cli.command {
            Command::Review { focus, .. } => assert_eq!(focus, vec!["memory", "input"]),
            other => bail!("unexpected command {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn search_scope_is_validated() {
        assert!(Cli::try_parse_from(["quilld", "search", "main", "--scope", "symbols"]).is_ok());
        assert!(Cli::try_parse_from(["quilld", "search", "main", "--scope", "bogus"]).is_err());
    }

    #[test]
    fn only_c_sources_are_indexed() {
        assert!(is_source(Path::new("src/main.c")));
        assert!(is_source(Path::new("include/util.h")));
        assert!(!is_source(Path::new("README.md")));
    }
}
