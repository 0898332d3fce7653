use clap::{Parser, ValueEnum};
use dessi::fs_utils::absolutize;
use dessi::{
    DEFAULT_MAX_DEPTH, DessiError, ExpandConfig, Expander, Result, WalkOptions, check, scan, walk,
};
use globset::{Glob, GlobSet, GlobSetBuilder};
use log::{LevelFilter, debug, error, info, warn};
use std::path::PathBuf;

const LONG_HELP: &str = r#"
Directive:
  <!--#include virtual="path/to/file.html"-->

  The path may contain letters, digits and . / $ - _
  It always resolves against --root, no matter which file the directive is in.
  Included .html/.shtml files are expanded recursively; anything else is
  inserted as is. Other SSI commands are left untouched.

Examples:
  # Expand ./site into ./public
  dessi --source=site --target=public
  # Resolve includes against a shared root
  dessi --source=site/pages --target=public --root=site
  # Check that every include resolves, without writing
  dessi --source=site --target=public --dry-run
  # List all directives as JSON
  dessi --source=site --target=public --list=json
  # Also expand .inc files and skip drafts
  dessi --source=site --target=public --extension=inc --exclude='drafts/**'
"#;

/// Static server-side include expansion.
#[derive(Parser, Debug)]
#[command(
    name = "dessi",
    version,
    about = "Copy a directory tree, expanding <!--#include virtual=\"...\"--> directives.",
    after_long_help = LONG_HELP
)]
struct Cli {
    /// Directory to expand from
    #[arg(long, value_name = "DIR")]
    source: PathBuf,

    /// Directory to write the expanded tree into
    #[arg(long, value_name = "DIR")]
    target: PathBuf,

    /// Directory include paths resolve against (defaults to --source)
    #[arg(long, value_name = "DIR", env = "DESSI_ROOT")]
    root: Option<PathBuf>,

    /// Maximum include nesting depth
    #[arg(long, value_name = "DEPTH", default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Additional includable extension (repeatable). .html and .shtml are always included
    #[arg(long = "extension", value_name = "EXT", action = clap::ArgAction::Append)]
    extensions: Vec<String>,

    /// Exclude glob patterns (repeatable). Patterns are relative to the source directory
    #[arg(short = 'x', long = "exclude", value_name = "GLOB", action = clap::ArgAction::Append)]
    exclude: Vec<String>,

    /// Reject include paths that resolve outside the root directory
    #[arg(long)]
    confine: bool,

    /// Expand everything in memory and report failures, without writing
    #[arg(long, conflicts_with = "list")]
    dry_run: bool,

    /// List include directives in the source tree (optionally with format: plain, detailed, json)
    #[arg(long, value_name = "FORMAT", num_args = 0..=1, default_missing_value = "plain", conflicts_with = "dry_run")]
    list: Option<ListFormat>,

    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq)]
enum ListFormat {
    /// One directive per line
    Plain,
    /// Detailed information about each directive
    Detailed,
    /// JSON output for scripting
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.quiet, cli.verbose);

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e}");
            let code = if matches!(e, DessiError::Config { .. }) {
                2
            } else {
                1
            };
            std::process::exit(code);
        }
    }
}

fn init_logger(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    debug!("Logger initialized with level: {level:?}");
}

/// Runs the requested mode and returns the process exit code.
fn run(cli: &Cli) -> Result<i32> {
    let source = absolutize(&cli.source)?;
    let target = absolutize(&cli.target)?;
    let root = match &cli.root {
        Some(root) => absolutize(root)?,
        None => source.clone(),
    };

    info!("Expanding from:\n\t{}", source.display());
    info!("Saving to:\n\t{}", target.display());
    info!("Path root:\n\t{}", root.display());

    if !source.is_dir() {
        return Err(DessiError::config(format!(
            "source directory does not exist: {}",
            source.display()
        )));
    }
    if source == target {
        return Err(DessiError::config(
            "--source and --target must be different directories",
        ));
    }
    if !root.is_dir() {
        warn!("Root directory does not exist: {}", root.display());
    }

    let mut config = ExpandConfig::new(root);
    config.max_depth = cli.max_depth;
    config.confine_to_root = cli.confine;
    config.extensions = cli
        .extensions
        .iter()
        .fold(config.extensions, |set, ext| set.with_extension(ext));
    debug!(
        "Includable extensions: {}",
        config.extensions.iter().collect::<Vec<_>>().join(", ")
    );
    let expander = Expander::new(config)?;

    let mut options = WalkOptions::new(source, target);
    options.exclude = build_exclude(&cli.exclude)?;

    if cli.dry_run {
        return dry_run(&options, &expander);
    }
    if let Some(format) = cli.list {
        list_directives(&options, &expander, format)?;
        return Ok(0);
    }

    let stats = walk(&options, &expander)?;
    info!(
        "Done: {} expanded, {} copied, {} directories, {} skipped",
        stats.expanded, stats.copied, stats.directories, stats.skipped
    );
    Ok(0)
}

fn build_exclude(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat)
            .map_err(|e| DessiError::config(format!("invalid exclude pattern '{pat}': {e}")))?;
        builder.add(glob);
    }
    Ok(Some(builder.build()?))
}

fn dry_run(options: &WalkOptions, expander: &Expander) -> Result<i32> {
    info!("Performing dry run - expanding without writing...");

    let results = check(options, expander)?;
    let mut invalid_count = 0;

    for result in &results {
        match &result.error {
            None => info!("✓ {}", result.file.display()),
            Some(e) => {
                warn!("✗ {} -> {e}", result.file.display());
                invalid_count += 1;
            }
        }
    }

    println!("\nSummary: {} includable files checked", results.len());
    let valid_count = results.len() - invalid_count;
    if valid_count > 0 {
        println!("  ✓ {valid_count} valid");
    }
    if invalid_count > 0 {
        println!("  ✗ {invalid_count} invalid");
    }

    Ok(if invalid_count > 0 { 1 } else { 0 })
}

fn list_directives(options: &WalkOptions, expander: &Expander, format: ListFormat) -> Result<()> {
    debug!("Listing include directives...");

    let reports = scan(options, expander)?;

    match format {
        ListFormat::Plain => {
            for report in &reports {
                println!(
                    "{}: {}",
                    report.file.display(),
                    report.directive.virtual_path
                );
            }
        }
        ListFormat::Detailed => {
            for report in &reports {
                println!("Directive: {}", report.directive.virtual_path);
                println!("  File: {}", report.file.display());
                println!(
                    "  Position: {}..{}",
                    report.directive.start, report.directive.end
                );
                if let Some(resolved) = &report.resolved {
                    println!("  Path: {}", resolved.display());
                }
                println!("  Exists: {}", if report.exists { "yes" } else { "no" });
                if let Some(e) = &report.error {
                    println!("  Error: {e}");
                }
                println!();
            }
        }
        ListFormat::Json => {
            let json = serde_json::to_string_pretty(&reports)?;
            println!("{json}");
        }
    }

    Ok(())
}
