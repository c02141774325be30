//! sqlhoist: hoist correlated analytics subqueries into shared CTEs
//!
//! # Usage
//!
//! ```bash
//! # Optimize a statement from a file
//! sqlhoist query.sql
//!
//! # From stdin, with the generated CTEs as JSON
//! cat query.sql | sqlhoist - --format json
//!
//! # List recognized subqueries without rewriting
//! sqlhoist explain query.sql
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use sqlhoist::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlhoist")]
#[command(version)]
#[command(about = "Hoists correlated analytics subqueries into shared CTEs", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
#[command(after_help = "EXAMPLES:
    sqlhoist query.sql
    cat query.sql | sqlhoist --format json
    sqlhoist explain query.sql
    sqlhoist patterns")]
struct Cli {
    /// SQL file to optimize, `-` or nothing for stdin
    file: Option<PathBuf>,

    /// Configuration file (defaults to ./sqlhoist.toml, then the user config dir)
    #[arg(short, long, env = "SQLHOIST_CONFIG")]
    config: Option<PathBuf>,

    /// Output format, overrides `[output] format`
    #[arg(short, long, value_enum)]
    format: Option<FormatArg>,

    /// More logging on stderr (repeatable); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Sql,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Sql => OutputFormat::Sql,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the enabled subquery patterns in the order they are tried
    Patterns {
        #[arg(short, long, env = "SQLHOIST_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Show every recognized subquery of a statement without rewriting it
    Explain {
        /// SQL file, `-` for stdin
        file: PathBuf,

        #[arg(short, long, env = "SQLHOIST_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::Patterns { config }) => show_patterns(config.as_deref()),
        Some(Commands::Explain { file, config }) => explain(file, config.as_deref()),
        None => optimize(cli),
    }
}

fn load_engine(config_path: Option<&Path>) -> Result<(Engine, Config)> {
    let config = Config::load(config_path)?;
    let engine = Engine::new(&config)?;
    Ok((engine, config))
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display())),
        _ => {
            let mut sql = String::new();
            std::io::stdin()
                .read_to_string(&mut sql)
                .context("reading stdin")?;
            Ok(sql)
        }
    }
}

fn optimize(cli: &Cli) -> Result<()> {
    let (engine, config) = load_engine(cli.config.as_deref())?;
    let format = cli.format.map(OutputFormat::from).unwrap_or(config.output.format);

    let sql = read_input(cli.file.as_deref())?;
    let report = engine.optimize(&sql)?;
    if let Some(reason) = &report.fallback
        && format == OutputFormat::Sql
    {
        eprintln!("{} {}", "Not optimized:".yellow().bold(), reason);
    }
    println!("{}", render(&report, format)?);
    Ok(())
}

fn show_patterns(config_path: Option<&Path>) -> Result<()> {
    let (engine, _) = load_engine(config_path)?;
    println!("{}", "Enabled patterns (first match wins):".cyan().bold());
    for (i, id) in engine.pattern_ids().iter().enumerate() {
        println!("  {:>2}. {}", i + 1, id.white());
    }
    Ok(())
}

fn explain(file: &Path, config_path: Option<&Path>) -> Result<()> {
    let (engine, _) = load_engine(config_path)?;
    let sql = read_input(Some(file))?;
    let recognized = engine.explain(&sql)?;

    if recognized.is_empty() {
        println!("{}", "(no recognized subqueries)".dimmed());
        return Ok(());
    }

    for item in &recognized {
        let found = &item.found;
        println!(
            "{} {} {} {}",
            item.id.to_string().dimmed(),
            found.name.green().bold(),
            "as".dimmed(),
            found.join_alias.cyan()
        );
        println!(
            "    {} {} = {}.{}",
            "join on".dimmed(),
            found.correlation.outer,
            found.join_alias,
            found.correlation.key_column
        );
        println!("    {} {}", "column:".dimmed(), found.column_reference);
        for (key, value) in &found.metadata {
            println!("    {} {}", format!("{}:", key).dimmed(), value.yellow());
        }
    }
    println!();
    println!("{} subquer(ies) recognized", recognized.len().to_string().cyan());
    Ok(())
}
