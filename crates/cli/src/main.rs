use anyhow::{bail, Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use command::{
    CheckFactsPayload, CommandAction, CommandHandler, CommandRequest, CommandResponse,
    EvaluatePayload,
};
use configurator_engine::EngineProfile;
use configurator_facts::RequestContext;
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

mod command;

#[derive(Parser)]
#[command(name = "configurator")]
#[command(about = "Graph-fact-driven product selection and configuration", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Engine profile: builtin name (default, strict) or path to a JSON/TOML file
    /// (falls back to CONFIGURATOR_PROFILE)
    #[arg(long, global = true)]
    profile: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one request context against a fact bundle
    Evaluate(EvaluateArgs),

    /// Load a fact bundle and report statistics and skipped records
    #[command(name = "check-facts")]
    CheckFacts(CheckFactsArgs),

    /// Execute a JSON Command API request
    Command(CommandArgs),
}

#[derive(Args)]
struct EvaluateArgs {
    /// Fact bundle (JSON or TOML)
    #[arg(long)]
    facts: PathBuf,

    /// File containing the request context as a JSON object
    #[arg(long, conflicts_with = "json")]
    context: Option<PathBuf>,

    /// Inline request context JSON
    #[arg(long)]
    json: Option<String>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct CheckFactsArgs {
    /// Fact bundle (JSON or TOML)
    #[arg(long)]
    facts: PathBuf,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct CommandArgs {
    /// Inline JSON request (mutually exclusive with --file)
    #[arg(long, conflicts_with = "file")]
    json: Option<String>,

    /// Path to file containing the JSON request
    #[arg(long)]
    file: Option<PathBuf>,

    /// Pretty-print JSON response
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // stdout carries the response; logs stay at warnings unless -v.
    if matches!(cli.command, Commands::Command(_)) && !cli.verbose {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let profile = load_profile(cli.profile.as_deref())?;
    log::debug!("Using engine profile '{}'", profile.name());
    let handler = CommandHandler::new(profile);

    match cli.command {
        Commands::Evaluate(args) => run_evaluate(&handler, args),
        Commands::CheckFacts(args) => run_check_facts(&handler, args),
        Commands::Command(args) => run_command(&handler, args),
    }
}

fn load_profile(spec: Option<&str>) -> Result<EngineProfile> {
    match spec {
        Some(spec) => {
            EngineProfile::resolve(spec).with_context(|| format!("Invalid --profile '{spec}'"))
        }
        None => EngineProfile::from_env(),
    }
}

fn run_evaluate(handler: &CommandHandler, args: EvaluateArgs) -> Result<()> {
    let raw = match (&args.context, &args.json) {
        (Some(path), _) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read context from {}", path.display()))?,
        (None, Some(inline)) => inline.clone(),
        (None, None) => "{}".to_string(),
    };
    let context: RequestContext =
        serde_json::from_str(&raw).context("Request context must be a JSON object")?;

    let payload = EvaluatePayload {
        facts: args.facts,
        context,
        profile: None,
    };
    let request = CommandRequest {
        action: CommandAction::Evaluate,
        payload: serde_json::to_value(payload)?,
    };
    let data = unwrap_response(handler.execute(request))?;
    print_json(&data, args.pretty)
}

fn run_check_facts(handler: &CommandHandler, args: CheckFactsArgs) -> Result<()> {
    let payload = CheckFactsPayload { facts: args.facts };
    let request = CommandRequest {
        action: CommandAction::CheckFacts,
        payload: serde_json::to_value(payload)?,
    };
    let data = unwrap_response(handler.execute(request))?;
    print_json(&data, args.pretty)
}

fn run_command(handler: &CommandHandler, args: CommandArgs) -> Result<()> {
    let raw = read_payload(&args)?;
    let response = match serde_json::from_str::<CommandRequest>(&raw) {
        Ok(request) => handler.execute(request),
        Err(err) => CommandResponse::error(format!("Invalid JSON passed to --json/--file: {err}")),
    };

    print_json(&response, args.pretty)?;

    if response.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

fn unwrap_response(response: CommandResponse) -> Result<serde_json::Value> {
    if response.is_error() {
        bail!(
            "{}",
            response
                .message
                .unwrap_or_else(|| "command failed".to_string())
        );
    }
    Ok(response.data)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}

fn read_payload(args: &CommandArgs) -> Result<String> {
    if let Some(raw) = &args.json {
        return Ok(raw.clone());
    }
    if let Some(path) = &args.file {
        return fs::read_to_string(path)
            .with_context(|| format!("Failed to read JSON from {}", path.display()));
    }

    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read JSON from stdin")?;

    if buffer.trim().is_empty() {
        bail!("Command request is empty. Provide --json, --file, or pipe JSON via stdin.");
    }

    Ok(buffer)
}
