//! Credential Conformance CLI
//!
//! Command-line interface for running conformance scenarios, validating
//! single documents and resolving identifier codes.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use credential_conformance::{
    default_config_path, load_json, load_json_auto, logging, new_correlation_id,
    run_with_correlation_id, with_did_formats, Config, DidDocumentChecker, Orchestrator,
    RunOptions, RunReport, RuleEngine, RuleSet, ScenarioOutcome, SchemaRule, SchemaValidator,
    ServiceError, StrategyRegistry, ValidationResult, PROVIDER_URL_ENV,
};

#[derive(Parser)]
#[command(name = "conformance")]
#[command(about = "Validate credentials and resolve product identifiers")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the conformance scenarios of a configuration file
    Test {
        /// Configuration file (default: $CONFORMANCE_CONFIG or conformance.json)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Only run scenarios with this tag (repeatable)
        #[arg(long = "tag", short)]
        tags: Vec<String>,

        /// Output the run report as JSON
        #[arg(long)]
        json: bool,

        /// Do not generate missing fixtures from their templates
        #[arg(long)]
        no_generate: bool,
    },

    /// Write a default configuration file
    Config {
        /// Where to write (default: $CONFORMANCE_CONFIG or conformance.json)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate one document against schemas and/or the DID Core rules
    Validate {
        /// Document to validate
        document: PathBuf,

        /// Schema source: file path or URL, with optional #fragment (repeatable)
        #[arg(long = "schema", short)]
        schemas: Vec<String>,

        /// JSON Pointer of the sub-document the schemas apply to
        #[arg(long)]
        path: Option<String>,

        /// Also apply the DID Core document rules
        #[arg(long)]
        did: bool,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// Resolve an identifier code to its canonical link
    Resolve {
        /// Identifier code or raw scanner output
        code: String,

        /// Resolver base URL
        #[arg(long, env = PROVIDER_URL_ENV)]
        provider_url: Option<String>,

        /// Provider type (default: gs1)
        #[arg(long)]
        provider: Option<String>,

        /// Barcode symbology of raw scanner output (e.g. EAN_13, DATA_MATRIX)
        #[arg(long)]
        format: Option<String>,

        /// Fetch the linkset from the resolver and print it
        #[arg(long)]
        fetch: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);

    let result = run_with_correlation_id(new_correlation_id(), run(cli.command)).await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

async fn run(command: Commands) -> Result<(), u8> {
    match command {
        Commands::Test {
            config,
            tags,
            json,
            no_generate,
        } => {
            let options = RunOptions::new(config.unwrap_or_else(default_config_path))
                .tags(tags)
                .generate_missing(!no_generate);
            run_test(&options, json).await
        }

        Commands::Config { output, force } => {
            run_config(output.unwrap_or_else(default_config_path), force)
        }

        Commands::Validate {
            document,
            schemas,
            path,
            did,
            json,
        } => run_validate(ValidateArgs {
            document,
            schemas,
            path,
            did,
            json_output: json,
        })
        .await,

        Commands::Resolve {
            code,
            provider_url,
            provider,
            format,
            fetch,
        } => run_resolve(&code, provider_url, provider, format, fetch).await,
    }
}

async fn run_test(options: &RunOptions, json_output: bool) -> Result<(), u8> {
    let orchestrator = Orchestrator::new().map_err(|e| fail(&e, json_output))?;
    let report = orchestrator
        .run(options)
        .await
        .map_err(|e| fail(&e, json_output))?;

    if json_output {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("Error serializing report: {e}");
                return Err(2);
            }
        }
    } else {
        print_report(&report);
    }

    match report.exit_code() {
        0 => Ok(()),
        code => Err(code as u8),
    }
}

fn print_report(report: &RunReport) {
    println!("Running {} scenario(s) ...\n", report.scenarios.len());

    for scenario in &report.scenarios {
        let generated = if scenario.generated { " (generated)" } else { "" };
        match &scenario.outcome {
            ScenarioOutcome::Passed => {
                println!("  \x1b[32m✓\x1b[0m {}{generated}", scenario.name);
            }
            ScenarioOutcome::Failed { errors } => {
                println!("  \x1b[31m✗\x1b[0m {}{generated}", scenario.name);
                for error in errors {
                    println!("    {error}");
                }
            }
            ScenarioOutcome::Error { code, message } => {
                println!("  \x1b[33m!\x1b[0m {}: {code}: {message}", scenario.name);
            }
        }
    }
    for name in &report.skipped {
        println!("  - {name} (skipped)");
    }

    println!();
    if report.is_success() {
        println!(
            "\x1b[32m✓ {} scenario(s) passed\x1b[0m",
            report.scenarios.len()
        );
    } else {
        println!(
            "\x1b[31m✗ {} passed, {} failed, {} errored\x1b[0m",
            report.passed(),
            report.failed(),
            report.errored()
        );
    }
}

fn run_config(path: PathBuf, force: bool) -> Result<(), u8> {
    Config::write_default(&path, force).map_err(|e| {
        eprintln!("Error: {e}");
        e.exit_code() as u8
    })?;
    println!("Wrote {}", path.display());
    Ok(())
}

struct ValidateArgs {
    document: PathBuf,
    schemas: Vec<String>,
    path: Option<String>,
    did: bool,
    json_output: bool,
}

async fn run_validate(args: ValidateArgs) -> Result<(), u8> {
    let ValidateArgs {
        document: document_path,
        schemas,
        path,
        did,
        json_output,
    } = args;

    if schemas.is_empty() && !did {
        report_error(json_output, "nothing to validate against: pass --schema or --did");
        return Err(2);
    }

    let document = load_json(&document_path).map_err(|e| {
        report_error(json_output, &format!("loading document: {e}"));
        e.exit_code() as u8
    })?;

    let validator = with_did_formats(SchemaValidator::new());
    let mut builder = RuleSet::builder();
    for source in &schemas {
        let schema = load_json_auto(source).await.map_err(|e| {
            report_error(json_output, &format!("loading schema: {e}"));
            e.exit_code() as u8
        })?;
        let mut rule = SchemaRule::with_validator(&validator, &schema)
            .map_err(|e| fail(&e.with_context("schema", source.as_str()), json_output))?;
        if let Some(path) = &path {
            rule = rule.at_path(path.as_str());
        }
        builder = builder.rule(rule);
    }
    let mut rules = builder.build();
    if did {
        let checker = DidDocumentChecker::new().map_err(|e| fail(&e, json_output))?;
        rules = rules.extend(checker.rule_set());
    }

    let result = RuleEngine::new().evaluate(&document, &rules).await;
    print_result(&result, json_output);
    if result.is_valid() {
        Ok(())
    } else {
        Err(1)
    }
}

fn print_result(result: &ValidationResult, json_output: bool) {
    if json_output {
        println!("{}", serde_json::json!(result));
    } else if result.is_valid() {
        println!("Valid");
    } else {
        eprintln!("Validation failed:");
        for error in result.errors() {
            eprintln!("  {error}");
        }
    }
}

async fn run_resolve(
    input: &str,
    provider_url: Option<String>,
    provider: Option<String>,
    format: Option<String>,
    fetch: bool,
) -> Result<(), u8> {
    let provider_url = provider_url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| fail(&ServiceError::missing_env(PROVIDER_URL_ENV), false))?;

    let registry = StrategyRegistry::default();
    let strategy = match provider.as_deref() {
        Some(key) => registry.strategy(key),
        None => registry.default_strategy(),
    };

    let code = match format.as_deref() {
        Some(format) => strategy.code(input, format),
        None => input.trim().to_string(),
    };

    if fetch {
        return fetch_linkset(strategy.as_ref(), &code, &provider_url).await;
    }

    match strategy.dlr_url(&code, &provider_url) {
        Some(url) => {
            println!("{url}");
            Ok(())
        }
        None => {
            eprintln!(
                "Error: '{code}' cannot be resolved as a {} identifier",
                strategy.provider_type()
            );
            Err(1)
        }
    }
}

#[cfg(feature = "remote")]
async fn fetch_linkset(
    strategy: &dyn credential_conformance::IdentityProviderStrategy,
    code: &str,
    provider_url: &str,
) -> Result<(), u8> {
    let resolver = credential_conformance::LinkResolver::new().map_err(|e| fail(&e, false))?;
    let link = resolver
        .resolve(strategy, code, provider_url)
        .await
        .map_err(|e| fail(&e, false))?;
    match serde_json::to_string_pretty(&link.linkset) {
        Ok(out) => println!("{out}"),
        Err(e) => {
            eprintln!("Error serializing linkset: {e}");
            return Err(2);
        }
    }
    Ok(())
}

#[cfg(not(feature = "remote"))]
async fn fetch_linkset(
    _strategy: &dyn credential_conformance::IdentityProviderStrategy,
    _code: &str,
    _provider_url: &str,
) -> Result<(), u8> {
    eprintln!("Error: fetching linksets requires the `remote` feature");
    Err(2)
}

/// Log a service error and report it, returning the exit code.
fn fail(err: &ServiceError, json_output: bool) -> u8 {
    err.log();
    if json_output {
        println!("{}", err.to_body());
    } else {
        eprintln!("Error: {err}");
    }
    err.exit_code() as u8
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {msg}");
    }
}
