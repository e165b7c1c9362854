//! # llembed CLI
//!
//! Command-line interface for turning text into normalized embedding vectors
//! with a pooling-capable language model.
//!
//! ## Commands
//!
//! - `llembed embed [TEXT]...` - Embed text from arguments, `--file` or stdin
//! - `llembed dim` - Print the model's embedding width
//! - `llembed compare <A> <B>` - Cosine similarity and Euclidean distance
//! - `llembed config show|init|path` - Inspect configuration
//!
//! ## Examples
//!
//! ```bash
//! # Embed with a GGUF model
//! llembed embed -m models/bge-small-en-v1.5-q8_0.gguf "hello world"
//!
//! # Load the model through the in-memory staging path
//! llembed embed -m models/bge-small-en-v1.5-q8_0.gguf --from-memory "hello"
//!
//! # JSON output
//! llembed --format json compare -m hf:thenlper/gte-small "cat" "kitten"
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use llembed_core::{Embedding, ModelSource, MEMORY_SOURCE};
use llembed_engine::{backend, EmbeddingSession, SessionBuilder, StagingArea};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "llembed")]
#[command(about = "Text embeddings from pooling language models")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ~/.config/llembed/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging, including the inference runtime's own logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json); defaults to the configured format
    #[arg(short, long, global = true)]
    format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => bail!("unknown output format '{other}'"),
        }
    }
}

/// Options selecting and loading the model.
#[derive(Args, Debug, Default)]
struct ModelArgs {
    /// Model path (GGUF), model directory or hf:<repo>
    #[arg(short, long)]
    model: Option<String>,

    /// Evaluation threads (0 = one per CPU)
    #[arg(short, long)]
    threads: Option<i32>,

    /// Backend (auto, llama, candle)
    #[arg(short, long)]
    backend: Option<String>,

    /// Stage the model file in memory and load it through the memory source
    #[arg(long)]
    from_memory: bool,

    /// Skip the post-load verification embedding
    #[arg(long)]
    no_verify: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed text
    Embed {
        #[command(flatten)]
        model: ModelArgs,

        /// Read text from a file instead of arguments
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Text to embed (joined with spaces); stdin if absent
        text: Vec<String>,
    },

    /// Print the embedding dimension of a model
    Dim {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Compare two texts
    Compare {
        #[command(flatten)]
        model: ModelArgs,

        /// First text
        left: String,

        /// Second text
        right: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Print sample configuration file
    Init,
    /// Show config file path
    Path,
}

/// Output structure for an embedding.
#[derive(Serialize)]
struct EmbedOutput<'a> {
    dimension: usize,
    #[serde(flatten)]
    embedding: &'a Embedding,
}

/// Output structure for a comparison.
#[derive(Serialize)]
struct CompareOutput {
    dimension: usize,
    cosine_similarity: f32,
    euclidean_distance: f32,
}

/// Output structure for the dimension query.
#[derive(Serialize)]
struct DimOutput {
    source: String,
    backend: String,
    dimension: usize,
    context: u32,
}

/// Load a session from CLI arguments layered over the config file.
fn open_session(args: &ModelArgs, config: &Config, verbose: bool) -> Result<EmbeddingSession> {
    let source = args
        .model
        .clone()
        .or_else(|| config.model.source.clone())
        .context("No model given; pass --model or set model.source in the config file")?;

    let mut model_config = config.model.clone();
    if let Some(threads) = args.threads {
        model_config.threads = threads;
    }
    let threads = model_config.effective_threads();
    let backend_name = args.backend.as_deref().unwrap_or(&config.model.backend);
    let verify = config.model.verify && !args.no_verify;

    let model_source = if args.from_memory {
        ModelSource::Memory
    } else {
        ModelSource::parse(&source)
    };
    let backend = backend::for_source(backend_name, &model_source, verbose)
        .with_context(|| format!("Failed to select backend '{backend_name}'"))?;
    debug!("Using {} backend with {threads} threads", backend.name());

    if args.from_memory {
        let bytes = std::fs::read(&source)
            .with_context(|| format!("Failed to read model file {source}"))?;
        let mut staging = StagingArea::new();
        staging.supply(&bytes).context("Failed to stage model")?;
        drop(bytes);

        info!("Loading {source} from memory ({} bytes)", staging.len());
        return SessionBuilder::new(MEMORY_SOURCE)
            .threads(threads)
            .verify(verify)
            .build_with_staging(backend, Some(&staging))
            .context("Failed to initialize session");
    }

    info!("Loading {source}");
    SessionBuilder::new(source.as_str())
        .threads(threads)
        .verify(verify)
        .build(backend)
        .with_context(|| format!("Failed to initialize session from {source}"))
}

/// Text from arguments, a file, or stdin.
fn read_input(text: Vec<String>, file: Option<PathBuf>) -> Result<String> {
    if let Some(path) = file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }
    if !text.is_empty() {
        return Ok(text.join(" "));
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read stdin")?;
    Ok(buf.trim_end_matches(['\n', '\r']).to_string())
}

fn format_values(values: &[f32], precision: usize) -> String {
    values
        .iter()
        .map(|v| format!("{v:.precision$}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_level(config: &Config, verbose: bool) -> Level {
    if verbose {
        return Level::DEBUG;
    }
    Level::from_str(&config.logging.level).unwrap_or(Level::WARN)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.config {
        Config::load_from(Some(path.clone()))
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        Config::load().context("Failed to load config")?
    };

    // Logs go to stderr so stdout stays parseable
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(&config, cli.verbose))
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let format = match cli.format {
        Some(format) => format,
        None => config.output.format.parse()?,
    };
    let precision = config.output.precision;

    match cli.command {
        Commands::Embed { model, file, text } => {
            let input = read_input(text, file)?;
            let mut session = open_session(&model, &config, cli.verbose)?;
            let embedding = session.embed(&input).context("Embedding failed")?;

            match format {
                OutputFormat::Json => {
                    let output = EmbedOutput {
                        dimension: embedding.dimension(),
                        embedding: &embedding,
                    };
                    println!("{}", serde_json::to_string(&output)?);
                }
                OutputFormat::Text => {
                    if let Some(original) = embedding.truncated_from {
                        eprintln!(
                            "note: input truncated from {original} to {} tokens",
                            embedding.token_count
                        );
                    }
                    println!("{}", format_values(&embedding.values, precision));
                }
            }
            session.close();
        }

        Commands::Dim { model } => {
            let session = open_session(&model, &config, cli.verbose)?;
            match format {
                OutputFormat::Json => {
                    let output = DimOutput {
                        source: session.config().source.to_string(),
                        backend: session.backend_name().to_string(),
                        dimension: session.dimension(),
                        context: session.config().n_ctx,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Text => println!("{}", session.dimension()),
            }
            session.close();
        }

        Commands::Compare { model, left, right } => {
            let mut session = open_session(&model, &config, cli.verbose)?;
            let a = session.embed(&left).context("Embedding first text failed")?;
            let b = session.embed(&right).context("Embedding second text failed")?;

            let output = CompareOutput {
                dimension: a.dimension(),
                cosine_similarity: a.cosine_similarity(&b)?,
                euclidean_distance: a.euclidean_distance(&b)?,
            };
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
                OutputFormat::Text => {
                    println!("cosine similarity:  {:.precision$}", output.cosine_similarity);
                    println!("euclidean distance: {:.precision$}", output.euclidean_distance);
                }
            }
            session.close();
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => match format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&config)
                            .context("Failed to serialize config")?
                    );
                }
                OutputFormat::Text => {
                    println!(
                        "{}",
                        toml::to_string_pretty(&config).context("Failed to serialize config")?
                    );
                }
            },
            ConfigAction::Init => {
                println!("{}", Config::sample_toml());
            }
            ConfigAction::Path => {
                if let Some(path) = Config::config_path() {
                    println!("{}", path.display());
                } else {
                    println!("Could not determine config directory");
                }
            }
        },
    }

    Ok(())
}
