use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wikimigrate_core::batch::{BatchOptions, DEFAULT_EXTENSIONS, run_batch, run_titles};
use wikimigrate_core::config::{MigrateConfig, load_config};
use wikimigrate_core::document::TransformOptions;
use wikimigrate_core::features::{FeatureSet, is_active, parse_activation_token};
use wikimigrate_core::remote::{CommonsClient, TitleDecision, resolve_title};
use wikimigrate_core::report::{ReportOptions, RunMode, RunReport};
use wikimigrate_core::rules::{RuleSet, builtin_content_rules, builtin_title_rules, load_rules};
use wikimigrate_core::runtime::{PathOverrides, ResolutionContext, ResolvedPaths, resolve_paths};
use wikimigrate_core::selftest::{builtin_cases, load_cases, run_cases};

#[derive(Debug, Parser)]
#[command(
    name = "wikimigrate",
    version,
    about = "Rewrite wiki page dumps and titles into the Commons namespace layout"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, help = "Show which rules fired and debug logs")]
    verbose: bool,
    #[arg(long, global = true, help = "Print the report as JSON")]
    json: bool,
    #[arg(
        long,
        global = true,
        value_name = "FEATURE",
        help = "Activate a gated rule feature (repeatable; also accepts activate=<feature>)"
    )]
    activate: Vec<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
    verbose: bool,
    json: bool,
    activate: Vec<String>,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
            verbose: cli.verbose,
            json: cli.json,
            activate: cli.activate.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Apply content rules to every page dump under a directory")]
    Migrate(MigrateArgs),
    #[command(about = "Run the title rules over one or more page titles")]
    Title(TitleArgs),
    #[command(about = "Check the content rules against literal input/expected fixtures")]
    Selftest(SelftestArgs),
    #[command(about = "List loaded rules and their validity")]
    Rules(RulesArgs),
}

#[derive(Debug, Args)]
struct MigrateArgs {
    input: PathBuf,
    #[arg(short, long, value_name = "DIR", help = "Directory receiving the complete output set")]
    output: Option<PathBuf>,
    #[arg(long, help = "Compute changes without writing anything")]
    dry_run: bool,
    #[arg(long, help = "Print a unified diff per changed document")]
    diff: bool,
    #[arg(short, long, value_name = "N", help = "Worker threads (1 = sequential)")]
    jobs: Option<usize>,
    #[arg(long, value_name = "FILE", help = "Content rule source (JSON, YAML or TOML)")]
    rules: Option<PathBuf>,
    #[arg(long = "ext", value_name = "EXT", help = "Document extensions to transform")]
    extensions: Vec<String>,
}

#[derive(Debug, Args)]
struct TitleArgs {
    #[arg(required = true)]
    titles: Vec<String>,
    #[arg(long, help = "Confirm the target exists at the destination wiki")]
    check: bool,
    #[arg(long, value_name = "FILE", help = "Title rule source (JSON, YAML or TOML)")]
    rules: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SelftestArgs {
    #[arg(long, value_name = "FILE", help = "JSON fixture list replacing the built-in cases")]
    fixtures: Option<PathBuf>,
    #[arg(long, value_name = "FILE", help = "Content rule source (JSON, YAML or TOML)")]
    rules: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RulesArgs {
    #[arg(long, help = "List title rules instead of content rules")]
    titles: bool,
    #[arg(long, value_name = "FILE")]
    rules: Option<PathBuf>,
}

struct Session {
    paths: ResolvedPaths,
    config: MigrateConfig,
    features: FeatureSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    Content,
    Titles,
}

fn main() -> Result<()> {
    let cli = Cli::parse_from(normalize_legacy_args(std::env::args_os()));
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Migrate(args)) => run_migrate(&runtime, args),
        Some(Commands::Title(args)) => run_title(&runtime, args),
        Some(Commands::Selftest(args)) => run_selftest(&runtime, args),
        Some(Commands::Rules(args)) => run_rules(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Rewrite bare `activate=<feature>` tokens into `--activate=<feature>`.
fn normalize_legacy_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| match arg.to_str().and_then(parse_activation_token) {
            Some(feature) => OsString::from(format!("--activate={feature}")),
            None => arg,
        })
        .collect()
}

fn run_migrate(runtime: &RuntimeOptions, args: MigrateArgs) -> Result<()> {
    let session = load_session(runtime)?;
    let rules = load_rule_set(&session, RuleKind::Content, args.rules.as_deref())?;
    let mode = if args.dry_run {
        RunMode::Dry
    } else {
        RunMode::Live
    };
    if mode == RunMode::Live && args.output.is_none() {
        bail!("`migrate` needs --output <DIR> unless --dry-run is given");
    }

    let extensions = if !args.extensions.is_empty() {
        args.extensions
    } else if !session.config.batch.extensions.is_empty() {
        session.config.batch.extensions.clone()
    } else {
        DEFAULT_EXTENSIONS.iter().map(ToString::to_string).collect()
    };
    let options = BatchOptions {
        mode,
        report: ReportOptions {
            verbose: runtime.verbose,
            diff: args.diff,
        },
        transform: TransformOptions {
            verbose: runtime.verbose,
            delimiters: session.config.delimiters(),
        },
        jobs: args.jobs.or(session.config.batch.jobs),
        extensions,
    };

    let input = session.paths.resolve(&args.input);
    let output = args
        .output
        .as_deref()
        .map(|path| session.paths.resolve(path));
    let report = run_batch(
        &input,
        output.as_deref(),
        &rules,
        &session.features,
        &options,
    )?;

    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("migrate");
        println!("input: {}", normalize_path(&input));
        println!(
            "output: {}",
            output
                .as_deref()
                .map(normalize_path)
                .unwrap_or_else(|| "<none>".to_string())
        );
        println!("rules: {} ({} loaded)", rules.origin(), rules.len());
        print_features(&session.features);
        print_run_report(&report, runtime.verbose, &rules);
    }
    print_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_title(runtime: &RuntimeOptions, args: TitleArgs) -> Result<()> {
    let session = load_session(runtime)?;
    let rules = load_rule_set(&session, RuleKind::Titles, args.rules.as_deref())?;

    if !args.check {
        let report = run_titles(
            &args.titles,
            &rules,
            &session.features,
            ReportOptions {
                verbose: runtime.verbose,
                diff: false,
            },
        );
        if runtime.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("title");
            println!("rules: {} ({} loaded)", rules.origin(), rules.len());
            print_features(&session.features);
            print_run_report(&report, runtime.verbose, &rules);
        }
        print_diagnostics(runtime, &session.paths);
        return Ok(());
    }

    let remote = session.config.remote_config();
    let policy = remote.retry_policy();
    let mut client = CommonsClient::new(remote)?;
    let mut decisions = Vec::with_capacity(args.titles.len());
    for title in &args.titles {
        let decision = resolve_title(&mut client, title, &rules, &session.features, policy);
        decisions.push((title.clone(), decision));
    }

    if runtime.json {
        let rendered = decisions
            .iter()
            .map(|(title, decision)| {
                serde_json::json!({ "title": title, "result": decision })
            })
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else {
        println!("title check");
        println!("rules: {} ({} loaded)", rules.origin(), rules.len());
        for (title, decision) in &decisions {
            match decision {
                TitleDecision::NotApplicable => println!("title.{title}: not applicable"),
                TitleDecision::Unmigrated { target, reason } => {
                    println!("title.{title}: unmigrated -> {target} ({reason})")
                }
                TitleDecision::Migrated { target } => {
                    println!("title.{title}: migrated -> {target}")
                }
            }
        }
        println!(
            "migrated: {}",
            decisions
                .iter()
                .filter(|(_, decision)| decision.is_migrated())
                .count()
        );
    }
    print_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_selftest(runtime: &RuntimeOptions, args: SelftestArgs) -> Result<()> {
    let session = load_session(runtime)?;
    let rules = load_rule_set(&session, RuleKind::Content, args.rules.as_deref())?;
    let cases = match args.fixtures.as_deref() {
        Some(path) => load_cases(&session.paths.resolve(path))?,
        None => builtin_cases(),
    };
    let report = run_cases(&cases, &rules, &session.config.delimiters());

    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("selftest");
        println!("rules: {} ({} loaded)", rules.origin(), rules.len());
        println!("cases: {}", cases.len());
        println!("passed: {}", report.passed);
        println!("failed: {}", report.failed);
        for failure in &report.failures {
            println!("failure.name: {}", failure.name);
            println!("failure.expected: {:?}", failure.expected);
            println!("failure.actual: {:?}", failure.actual);
        }
    }
    print_diagnostics(runtime, &session.paths);
    if !report.success() {
        bail!("selftest failed: {} of {} cases", report.failed, cases.len());
    }
    Ok(())
}

fn run_rules(runtime: &RuntimeOptions, args: RulesArgs) -> Result<()> {
    let session = load_session(runtime)?;
    let kind = if args.titles {
        RuleKind::Titles
    } else {
        RuleKind::Content
    };
    let rules = load_rule_set(&session, kind, args.rules.as_deref())?;

    println!("rules: {}", rules.origin());
    println!("rules.count: {}", rules.len());
    println!("rules.invalid: {}", rules.compile_errors().len());
    for rule in &rules {
        let state = match rule.compile_error() {
            Some(error) => format!("invalid: {error}"),
            None if is_active(rule, &session.features) => "active".to_string(),
            None => "inactive".to_string(),
        };
        println!(
            "rule.{}: {:?} scope={} requires={} redirect={} [{}]",
            rule.index,
            rule.pattern,
            rule.scope.as_str(),
            rule.required_feature.as_deref().unwrap_or("<none>"),
            rule.redirect_on_match,
            state
        );
    }
    print_diagnostics(runtime, &session.paths);
    Ok(())
}

fn load_session(runtime: &RuntimeOptions) -> Result<Session> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let features = config
        .features
        .activate
        .iter()
        .chain(runtime.activate.iter())
        .collect::<FeatureSet>();
    debug!(
        config = %normalize_path(&paths.config_path),
        features = features.iter().count(),
        "session ready"
    );
    Ok(Session {
        paths,
        config,
        features,
    })
}

fn load_rule_set(session: &Session, kind: RuleKind, explicit: Option<&Path>) -> Result<RuleSet> {
    let configured = match kind {
        RuleKind::Content => session.config.rules.content.as_deref(),
        RuleKind::Titles => session.config.rules.titles.as_deref(),
    };
    let rules = match explicit.or(configured) {
        Some(path) => load_rules(&session.paths.resolve(path))?,
        None => match kind {
            RuleKind::Content => builtin_content_rules()?,
            RuleKind::Titles => builtin_title_rules()?,
        },
    };
    debug!(
        origin = rules.origin(),
        rules = rules.len(),
        invalid = rules.compile_errors().len(),
        "rules loaded"
    );
    Ok(rules)
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn print_run_report(report: &RunReport, verbose: bool, rules: &RuleSet) {
    println!("mode: {}", report.mode.as_str());
    for document in &report.documents {
        println!(
            "document.{}: {} changes={}{}",
            document.name,
            document.status.as_str(),
            document.changes,
            document
                .detail
                .as_deref()
                .map(|detail| format!(" ({detail})"))
                .unwrap_or_default()
        );
        if verbose {
            for hit in &document.fired {
                let pattern = rules
                    .get(hit.rule)
                    .map(|rule| rule.pattern.as_str())
                    .unwrap_or("?");
                println!("  rule.{} {:?}: {}", hit.rule, pattern, hit.matches);
            }
        }
        if let Some(diff) = &document.diff {
            print!("{diff}");
        }
    }
    let summary = &report.summary;
    println!("summary.documents: {}", summary.documents);
    println!("summary.changed: {}", summary.changed);
    println!("summary.unchanged: {}", summary.unchanged);
    println!("summary.skipped: {}", summary.skipped);
    println!("summary.errored: {}", summary.errored);
    println!("summary.total_changes: {}", summary.total_changes);
    println!("summary.written: {}", summary.written);
}

fn print_features(features: &FeatureSet) {
    if features.is_empty() {
        println!("features: <none>");
    } else {
        let names = features.iter().collect::<Vec<_>>();
        println!("features: {}", names.join(", "));
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
