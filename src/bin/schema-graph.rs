//! Schema Graph CLI
//!
//! Command-line interface for resolving and checking API description documents.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use schema_graph::{
    lint, load_document, FileStatus, ResolverConfig, SchemaGraphNormalizer, SecurePathResolver,
    Severity,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-graph")]
#[command(about = "Resolve $ref chains and composition in API description documents")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SandboxArgs {
    /// Extra directory to search for externally referenced files (repeatable)
    #[arg(long = "search-path", value_name = "DIR")]
    search_paths: Vec<PathBuf>,

    /// Ignore the SCHEMA_GRAPH_SEARCH_PATH environment variable
    #[arg(long)]
    no_env: bool,
}

impl SandboxArgs {
    fn resolver(&self) -> SecurePathResolver {
        let config = ResolverConfig::new()
            .search_paths(self.search_paths.iter().cloned())
            .use_environment(!self.no_env);
        SecurePathResolver::from_config(&config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a document and print its flattened schema graph
    Resolve {
        /// Document to resolve (.json, .yaml or .yml)
        document: PathBuf,

        /// Resolve only this named schema
        #[arg(long)]
        schema: Option<String>,

        #[command(flatten)]
        sandbox: SandboxArgs,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Check every $ref in a file or directory of documents
    Check {
        /// File or directory to check
        path: PathBuf,

        #[command(flatten)]
        sandbox: SandboxArgs,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Resolve {
            document,
            schema,
            sandbox,
            output,
            pretty,
        } => run_resolve(&document, schema.as_deref(), &sandbox, output, pretty),

        Commands::Check {
            path,
            sandbox,
            format,
            strict,
            quiet,
        } => run_check(&path, &sandbox, &format, strict, quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn run_resolve(
    document_path: &Path,
    schema: Option<&str>,
    sandbox: &SandboxArgs,
    output: Option<PathBuf>,
    pretty: bool,
) -> Result<(), u8> {
    let resolver = sandbox.resolver();
    tracing::debug!(search_paths = resolver.search_paths().len(), "resolver ready");

    let document = load_document(document_path).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    if let Some(name) = schema {
        let known = document
            .schema_registry()
            .is_some_and(|(_, registry)| registry.contains_key(name));
        if !known {
            eprintln!("Error: no schema named {}", name);
            return Err(2);
        }
    }

    let normalizer = SchemaGraphNormalizer::new(&resolver);
    let graph = match schema {
        Some(name) => normalizer.normalize_only(document, name),
        None => normalizer.normalize(document),
    }
    .map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let summary = graph.summary();
    let value = match schema.and_then(|name| summary.schemas.get(name)) {
        Some(entry) => serde_json::to_value(entry),
        None => serde_json::to_value(&summary),
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    let json_output = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

fn run_check(
    path: &Path,
    sandbox: &SandboxArgs,
    format: &str,
    strict: bool,
    quiet: bool,
) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(2);
    }

    let resolver = sandbox.resolver();
    let result = lint(path, &resolver, strict);

    if format == "json" {
        let rendered = serde_json::to_string_pretty(&result).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", rendered);
    } else {
        if !quiet {
            println!("Checking {} ...\n", path.display());
        }

        for file_result in &result.results {
            let status_icon = match file_result.status {
                FileStatus::Ok => "\x1b[32m✓\x1b[0m",
                FileStatus::Warning => "\x1b[33m⚠\x1b[0m",
                FileStatus::Error => "\x1b[31m✗\x1b[0m",
            };

            if !quiet || file_result.status != FileStatus::Ok {
                println!("  {} {}", status_icon, file_result.file.display());
            }

            for diag in &file_result.diagnostics {
                let (color, label) = match diag.severity {
                    Severity::Error => ("\x1b[31m", "error"),
                    Severity::Warning => ("\x1b[33m", "warning"),
                };
                if !quiet || diag.severity == Severity::Error {
                    println!(
                        "    {}{}[{}]\x1b[0m: {} - {}",
                        color, label, diag.code, diag.path, diag.message
                    );
                }
            }
        }

        println!();
        if result.is_ok() && (!strict || result.warnings == 0) {
            println!(
                "\x1b[32m✓ {} files checked, all passed\x1b[0m",
                result.files_checked
            );
        } else {
            println!(
                "\x1b[31m✗ {} files checked: {} passed, {} failed ({} errors, {} warnings)\x1b[0m",
                result.files_checked, result.passed, result.failed, result.errors, result.warnings
            );
        }
    }

    if result.is_ok() && (!strict || result.warnings == 0) {
        Ok(())
    } else {
        Err(1)
    }
}
