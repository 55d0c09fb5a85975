use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use qa_copilot::config::Config;
use qa_copilot::copilot::Copilot;
use qa_copilot::observability::MetricsSink;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "qa-copilot",
    about = "AI copilot that keeps a manual QA test suite in sync with change requests",
    version
)]
struct Cli {
    /// Project root directory (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process a change request: analyze, update, create, report
    Process(ProcessArgs),
    /// Validate every stored test case against the schema
    Validate,
    /// List stored test cases
    List,
    /// Show one test case in full
    Show { id: String },
    /// Show system readiness
    Status,
    /// Show cumulative usage metrics
    Metrics,
    /// Show recent processing sessions
    Sessions(SessionsArgs),
    /// Delete all stored metrics and session history
    ResetMetrics(ResetArgs),
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// Path to the change request file
    #[arg(short, long)]
    change_request: PathBuf,

    /// Print readiness details and a report preview
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct SessionsArgs {
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

#[derive(Args, Debug)]
struct ResetArgs {
    /// Skip the confirmation prompt
    #[arg(long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.project)?;

    match cli.command {
        Commands::Process(args) => {
            if args.verbose {
                let status = qa_copilot::copilot::system_status(&config);
                println!("Ready: {}", if status.ready { "yes" } else { "no" });
                println!("Test cases: {}", status.test_case_count);
            }
            let mut copilot = Copilot::new(config)?;
            println!("Processing change request: {}", args.change_request.display());
            let report = copilot.process_change_request(&args.change_request).await?;
            println!("Done. Report: {}", report.display());
            if args.verbose {
                print_report_preview(&report);
            }
            Ok(())
        }
        Commands::Validate => {
            let copilot = offline(config)?;
            let result = copilot.validate_store()?;
            println!(
                "{} test cases checked: {} valid, {} invalid",
                result.total,
                result.valid,
                result.invalid.len()
            );
            for (id, detail) in &result.invalid {
                println!("  {id}: {detail}");
            }
            if result.invalid.is_empty() {
                Ok(())
            } else {
                anyhow::bail!("{} invalid test cases", result.invalid.len())
            }
        }
        Commands::List => {
            let copilot = offline(config)?;
            let cases = copilot.list_cases()?;
            if cases.is_empty() {
                println!("No test cases found.");
            }
            for case in cases {
                println!(
                    "{}  [{} / {}]  {}",
                    case.id,
                    case.kind.as_str(),
                    case.priority.as_str(),
                    case.title
                );
            }
            Ok(())
        }
        Commands::Show { id } => {
            let copilot = offline(config)?;
            let case = copilot.show_case(&id)?;
            println!("{}: {}", case.id, case.title);
            println!("Kind: {}  Priority: {}", case.kind.as_str(), case.priority.as_str());
            if let Some(pre) = &case.preconditions {
                println!("Preconditions: {pre}");
            }
            println!("Steps:");
            for (i, step) in case.steps.iter().enumerate() {
                println!("  {}. {}", i + 1, step.action);
                println!("     Expected: {}", step.expected_outcome);
            }
            Ok(())
        }
        Commands::Status => {
            let status = qa_copilot::copilot::system_status(&config);
            println!("Ready: {}", if status.ready { "yes" } else { "no" });
            println!(
                "API key: {}",
                if status.api_key_configured { "configured" } else { "missing (set OPENROUTER_API_KEY)" }
            );
            println!("Test cases: {}", status.test_case_count);
            println!("Context overview: {}", present(status.context_exists));
            println!("Schema: {}", present(status.schema_exists));
            println!("Reports dir: {}", status.reports_dir.display());
            Ok(())
        }
        Commands::Metrics => {
            let sink = MetricsSink::open(config.metrics_file());
            let m = sink.summary();
            println!("Runs: {} ({:.1}% success)", m.total_requests, m.success_rate);
            println!("Model calls: {}", m.llm_calls);
            println!("Tokens used: {}", m.total_tokens_used);
            println!("Estimated cost: ${:.4}", m.total_cost);
            println!("Avg run time: {:.2}s", m.average_response_time);
            println!("Avg call latency: {:.2}s", m.average_call_latency);
            println!("Test cases generated: {}", m.test_cases_generated);
            println!("Test cases updated: {}", m.test_cases_updated);
            println!("Retries: {}", m.retry_attempts);
            println!("Schema validation failures: {}", m.schema_validation_failures);
            Ok(())
        }
        Commands::Sessions(args) => {
            let sink = MetricsSink::open(config.metrics_file());
            let sessions = sink.recent(args.limit);
            if sessions.is_empty() {
                println!("No sessions recorded.");
            }
            for s in sessions {
                println!(
                    "{}  {:?}  {}  tokens={} updated={} generated={}",
                    s.start_time,
                    s.status,
                    s.session_id,
                    s.tokens_used,
                    s.test_cases_updated,
                    s.test_cases_generated
                );
                for error in &s.errors {
                    println!("    - {error}");
                }
            }
            Ok(())
        }
        Commands::ResetMetrics(args) => {
            if !args.yes {
                anyhow::bail!("refusing to delete metrics without --yes");
            }
            MetricsSink::open(config.metrics_file()).reset();
            println!("Metrics cleared.");
            Ok(())
        }
    }
}

/// Commands that never talk to the model still need the full component
/// wiring; give them a backend that rejects any call outright.
fn offline(config: Config) -> Result<Copilot> {
    struct NoBackend;

    #[async_trait::async_trait]
    impl qa_copilot::llm::ChatBackend for NoBackend {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &qa_copilot::llm::CompletionOptions,
        ) -> Result<qa_copilot::llm::ChatCompletion> {
            anyhow::bail!("this command does not call the model")
        }
    }

    Ok(Copilot::with_backend(config, std::sync::Arc::new(NoBackend))?)
}

fn print_report_preview(path: &std::path::Path) {
    const PREVIEW_LINES: usize = 20;
    let Ok(body) = std::fs::read_to_string(path) else {
        return;
    };
    println!("\nReport preview:");
    for line in body.lines().take(PREVIEW_LINES) {
        println!("{line}");
    }
    if body.lines().count() > PREVIEW_LINES {
        println!("... (truncated)");
    }
}

fn present(exists: bool) -> &'static str {
    if exists {
        "present"
    } else {
        "missing"
    }
}
