//! closure-cache CLI
//!
//! Entry point for the `closure-cache` command-line tool.

use clap::{Args, Parser, Subcommand};
use closure_cache::{
    ArtifactServer, BuildConfig, BuildRequest, CompilerPipeline, ConditionalRequest, ConfigError,
    ServeError, ServeOutcome,
};
use env_logger::Builder as LogBuilder;
use log::LevelFilter;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "closure-cache")]
#[command(about = "Cached Closure Compiler builds with conditional HTTP serving", version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile (or reuse the cached artifact) and write it out
    Build {
        #[command(flatten)]
        build: BuildArgs,

        /// Write the artifact here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Answer as a CGI script: headers, then the body or a 304
    Serve {
        #[command(flatten)]
        build: BuildArgs,

        /// Client `If-None-Match` header
        #[arg(long, env = "HTTP_IF_NONE_MATCH")]
        if_none_match: Option<String>,

        /// Client `If-Modified-Since` header
        #[arg(long, env = "HTTP_IF_MODIFIED_SINCE")]
        if_modified_since: Option<String>,
    },

    /// Show the fingerprint, cache file and staleness of the build
    Status {
        #[command(flatten)]
        build: BuildArgs,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// Flags layered over closure.toml
#[derive(Args)]
struct BuildArgs {
    /// Path to build config file (default: closure.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Optimisation mode: w (whitespace), s (simple), a (advanced)
    #[arg(long, value_parser = ["w", "s", "a"])]
    mode: Option<String>,

    /// Compile with the local compiler jars
    #[arg(long)]
    local: bool,

    /// Leave statistics, warnings and errors out of the artifact
    #[arg(long)]
    no_debug: bool,

    /// Cache directory (overrides the config file)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Script whose modification invalidates the cache
    #[arg(long, env = "SCRIPT_FILENAME")]
    caller_script: Option<PathBuf>,

    /// Referer forwarded to the compile service
    #[arg(long, env = "HTTP_REFERER")]
    referer: Option<String>,
}

impl BuildArgs {
    /// Load closure.toml and apply CLI overrides.
    fn load(&self) -> Result<(BuildConfig, BuildRequest), ConfigError> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(closure_cache::config::CONFIG_FILE_NAME));
        let config = BuildConfig::from_file(&path)?;

        let mut builder = config.to_builder()?;
        if let Some(ref mode) = self.mode {
            builder = builder.mode_from_param(Some(mode.as_str()));
        }
        if self.local {
            builder = builder.local_compile(true);
        }
        if self.no_debug {
            builder = builder.hide_debug_info();
        }
        if let Some(ref dir) = self.cache_dir {
            builder = builder.cache_dir(dir);
        }

        let req = builder.build()?;
        Ok((config, req))
    }

    fn server(&self, config: &BuildConfig) -> ArtifactServer {
        let referer = self.referer.clone().or_else(|| config.referer.clone());
        let pipeline = CompilerPipeline::new(
            config.resolved_tools(),
            &config.timeouts,
            config.remote.clone(),
        )
        .with_referer(referer);
        ArtifactServer::new(pipeline)
    }

    fn conditional(&self) -> ConditionalRequest {
        ConditionalRequest {
            caller_script: self.caller_script.clone(),
            ..ConditionalRequest::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let mut logger = LogBuilder::new();
    logger.filter_level(level).parse_default_env().init();

    let result = match cli.command {
        Commands::Build { build, output } => run_build(&build, output),
        Commands::Serve {
            build,
            if_none_match,
            if_modified_since,
        } => run_serve(&build, if_none_match, if_modified_since),
        Commands::Status { build, json } => run_status(&build, json),
    };

    if let Err(e) = result {
        report(&e);
        process::exit(e.exit_code());
    }
}

fn run_build(args: &BuildArgs, output: Option<PathBuf>) -> Result<(), ServeError> {
    let (config, req) = args.load()?;
    let outcome = args.server(&config).write(&req, &args.conditional())?;
    let body = outcome.body().unwrap_or_default();

    let written = match output {
        Some(path) => fs::write(&path, body),
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(body).and_then(|_| stdout.flush())
        }
    };
    written.map_err(ServeError::Output)
}

fn run_serve(
    args: &BuildArgs,
    if_none_match: Option<String>,
    if_modified_since: Option<String>,
) -> Result<(), ServeError> {
    let (config, req) = args.load()?;
    let cond = ConditionalRequest {
        if_none_match,
        if_modified_since,
        ..args.conditional()
    };

    let mut stdout = io::stdout().lock();
    match args.server(&config).write(&req, &cond) {
        Ok(outcome) => write_cgi(&outcome, &mut stdout),
        Err(ServeError::CompileFailed(diag)) => {
            // Surface compiler output in the browser console
            let body = diag.to_script();
            let _ = write!(
                stdout,
                "Content-Type: {}\r\n\r\n{}",
                closure_cache::server::CONTENT_TYPE,
                body
            );
            Err(ServeError::CompileFailed(diag))
        }
        Err(e) => {
            let _ = write!(
                stdout,
                "Status: 500 Internal Server Error\r\nContent-Type: {}\r\n\r\n",
                closure_cache::server::CONTENT_TYPE
            );
            Err(e)
        }
    }
}

fn write_cgi(outcome: &ServeOutcome, out: &mut impl Write) -> Result<(), ServeError> {
    outcome
        .write_cgi(out)
        .map_err(ServeError::Output)
}

fn run_status(args: &BuildArgs, json_output: bool) -> Result<(), ServeError> {
    let (config, req) = args.load()?;
    let fingerprint = closure_cache::fingerprint(&req);
    let status = args
        .server(&config)
        .status(&req, args.caller_script.as_deref())?;

    if json_output {
        let output = serde_json::json!({
            "fingerprint": fingerprint,
            "sources": req.sources(),
            "optimization_level": req.optimization_level().as_flag(),
            "warning_level": req.warning_level().as_flag(),
            "local_compile": req.local_compile(),
            "debug": req.debug(),
            "cache": status,
        });
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
        return Ok(());
    }

    println!("Fingerprint: {}", fingerprint);
    println!("Sources: {}", req.sources().len());
    println!("  Mode: {}", req.optimization_level());
    println!("  Warnings: {}", req.warning_level());
    println!("  Compile: {}", if req.local_compile() { "local" } else { "remote" });
    match status {
        Some(status) => {
            println!("Cache file: {}", status.cache_file.display());
            println!("  Cached: {}", if status.cached { "yes" } else { "no" });
            println!(
                "  Recompile needed: {}",
                if status.needs_recompile { "yes" } else { "no" }
            );
        }
        None => println!("Cache: disabled"),
    }
    Ok(())
}

fn report(err: &ServeError) {
    match err {
        ServeError::CompileFailed(diag) => {
            eprintln!("Compilation failed ({}): {}", diag.stage, diag.command);
            for line in &diag.lines {
                eprintln!("  {}", line);
            }
        }
        other => eprintln!("Error: {}", other),
    }
}
