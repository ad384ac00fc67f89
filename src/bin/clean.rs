//! `clean` - strip span/font tags from EPUB content pages
//!
//! Single file: `clean book.epub cleaned.epub`
//! Batch:       `clean --batch in/ out/`

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use clean_epub::html::{Leniency, SanitizeConfig, DEFAULT_DISALLOWED_TAGS};
use clean_epub::{clean_directory, CleanConfig, Pipeline};

#[derive(Clone, Debug, Parser)]
#[command(name = "clean", version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Args {
    /// EPUB to clean, or a directory of them with --batch
    source: PathBuf,

    /// Output EPUB, or the output directory with --batch
    destination: PathBuf,

    /// Treat source and destination as directories
    #[arg(short, long)]
    batch: bool,

    /// Log progress, not just warnings and errors
    #[arg(short, long)]
    verbose: bool,

    /// Tag to unwrap; repeat for several (default: span, font)
    #[arg(short, long = "tag", value_name = "TAG")]
    tags: Vec<String>,

    /// Also drop style/meta elements, inline styles and page structure tags
    #[arg(long)]
    full_clean: bool,

    /// Fail on pages that are not well-formed XML
    #[arg(long)]
    strict: bool,

    /// Refuse to replace an existing destination file
    #[arg(long)]
    no_clobber: bool,

    /// Directory for temporary working areas (default: system temp dir)
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,
}

impl Args {
    fn clean_config(&self) -> CleanConfig {
        let disallowed_tags = if self.tags.is_empty() {
            DEFAULT_DISALLOWED_TAGS.iter().map(|t| t.to_string()).collect()
        } else {
            self.tags.clone()
        };

        CleanConfig {
            sanitize: SanitizeConfig {
                disallowed_tags,
                full_clean: self.full_clean,
                leniency: if self.strict {
                    Leniency::Strict
                } else {
                    Leniency::Lenient
                },
            },
            overwrite: !self.no_clobber,
            work_root: self.work_dir.clone(),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    exit_code(run(&args))
}

fn exit_code(outcome: anyhow::Result<bool>) -> ExitCode {
    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every archive was cleaned
fn run(args: &Args) -> anyhow::Result<bool> {
    let pipeline = Pipeline::new(args.clean_config())?;

    if args.batch {
        let report = clean_directory(&pipeline, &args.source, &args.destination)?;
        if !report.is_success() {
            tracing::error!(
                "{} of {} files failed",
                report.failed.len(),
                report.failed.len() + report.cleaned.len()
            );
        }
        return Ok(report.is_success());
    }

    match pipeline.clean(&args.source, &args.destination) {
        Ok(path) => {
            tracing::info!("Wrote {}", path.display());
            Ok(true)
        }
        Err(e) => {
            tracing::error!("{}", e);
            Ok(false)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "warn,clean=info,clean_epub=info"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
