//! `forge` command-line entry point

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use forge_core::prelude::*;
use forge_core::{telemetry, CommandGenerator, CommandRepairer};
use forge_ledger::{fingerprint, Fingerprint};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let cli = Command::new("forge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sandboxed generate -> verify -> repair loop")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file (defaults to <project>/forge.yaml)"),
        )
        .subcommand(
            Command::new("exec")
                .about("Run one file in the sandbox and print the outcome as JSON")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_parser(value_parser!(u64))
                        .help("Wall-clock limit in seconds"),
                )
                .arg(
                    Arg::new("memory")
                        .long("memory")
                        .value_parser(value_parser!(u64))
                        .help("Resident memory ceiling in MB"),
                ),
        )
        .subcommand(
            Command::new("fingerprint")
                .about("Compute the fingerprint of a failure")
                .arg(Arg::new("label").long("label").required(true))
                .arg(Arg::new("diagnostic").long("diagnostic").required(true))
                .arg(
                    Arg::new("code-file")
                        .long("code-file")
                        .value_parser(value_parser!(PathBuf))
                        .help("Code related to the failure"),
                ),
        )
        .subcommand(
            Command::new("ledger")
                .about("List failure ledger entries of a project")
                .arg(
                    Arg::new("project")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("open")
                        .long("open")
                        .action(ArgAction::SetTrue)
                        .help("Only entries not yet fixed"),
                )
                .arg(
                    Arg::new("regressions")
                        .long("regressions")
                        .action(ArgAction::SetTrue)
                        .help("Only entries recorded after the same failure was fixed"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Drive a project to PASS or FAILED")
                .arg(
                    Arg::new("project")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("generator")
                        .long("generator")
                        .required(true)
                        .help("Shell command producing candidate code"),
                )
                .arg(
                    Arg::new("repairer")
                        .long("repairer")
                        .help("Shell command attempting micro-repairs"),
                )
                .arg(
                    Arg::new("max-iterations")
                        .long("max-iterations")
                        .value_parser(value_parser!(u32))
                        .help("Override the iteration budget"),
                ),
        );

    let matches = cli.get_matches();
    let code = match dispatch(&matches).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn dispatch(matches: &ArgMatches) -> anyhow::Result<bool> {
    match matches.subcommand() {
        Some(("exec", args)) => exec(args).await,
        Some(("fingerprint", args)) => fingerprint_cmd(args),
        Some(("ledger", args)) => ledger(args),
        Some(("run", args)) => run(args).await,
        _ => Ok(false),
    }
}

fn load_config(args: &ArgMatches, project: Option<&PathBuf>) -> anyhow::Result<ForgeConfig> {
    let path = match (args.get_one::<PathBuf>("config"), project) {
        (Some(path), _) => path.clone(),
        (None, Some(project)) => ProjectLayout::new(project).config_path(),
        (None, None) => PathBuf::from(forge_core::project::CONFIG_FILE_NAME),
    };
    let config = ForgeConfig::load(&path)
        .with_context(|| format!("loading configuration {}", path.display()))?;
    telemetry::init(&config.agent.log_level);
    Ok(config)
}

async fn exec(args: &ArgMatches) -> anyhow::Result<bool> {
    let config = load_config(args, None)?;
    let file = args
        .get_one::<PathBuf>("file")
        .context("missing file argument")?;
    let code = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let mut limits: SandboxLimits = config.limits();
    if let Some(secs) = args.get_one::<u64>("timeout") {
        limits.timeout = Duration::from_secs(*secs);
    }
    if let Some(mb) = args.get_one::<u64>("memory") {
        limits.memory_ceiling_mb = *mb;
    }

    let outcome = Sandbox::new(config.sandbox_config())
        .execute(&code, &limits)
        .await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(outcome.is_success())
}

fn fingerprint_cmd(args: &ArgMatches) -> anyhow::Result<bool> {
    let label = args.get_one::<String>("label").context("missing --label")?;
    let diagnostic = args
        .get_one::<String>("diagnostic")
        .context("missing --diagnostic")?;
    let related = match args.get_one::<PathBuf>("code-file") {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => String::new(),
    };
    let fp: Fingerprint = fingerprint(label, diagnostic, &related);
    println!("{fp}");
    Ok(true)
}

fn ledger(args: &ArgMatches) -> anyhow::Result<bool> {
    let project = args
        .get_one::<PathBuf>("project")
        .context("missing project argument")?;
    load_config(args, Some(project))?;
    let ledger = ProjectLayout::new(project).ledger();

    let entries = if args.get_flag("regressions") {
        ledger.reopened_entries()?
    } else if args.get_flag("open") {
        ledger.open_entries()?
    } else {
        ledger.entries()?
    };
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(true)
}

async fn run(args: &ArgMatches) -> anyhow::Result<bool> {
    let project = args
        .get_one::<PathBuf>("project")
        .context("missing project argument")?;
    let mut config = load_config(args, Some(project))?;
    if let Some(max) = args.get_one::<u32>("max-iterations") {
        config = config.with_max_iterations(*max);
    }
    config.validate()?;

    let generator_cmd = args
        .get_one::<String>("generator")
        .context("missing --generator")?;
    let generator = CommandGenerator::new(generator_cmd.as_str(), config.generator_timeout());
    let repairer: Arc<dyn MicroRepairer> = match args.get_one::<String>("repairer") {
        Some(cmd) => Arc::new(CommandRepairer::new(cmd.as_str(), config.generator_timeout())),
        None => Arc::new(NoRepair),
    };
    let executor = Arc::new(Sandbox::new(config.sandbox_config()));

    let mut controller =
        IterationController::open(ProjectLayout::new(project), &config, executor, repairer)
            .await
            .with_context(|| format!("opening project {}", project.display()))?;
    controller.begin_coding()?;
    let result = controller.run(&generator).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.verdict == Verdict::Pass)
}
