use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use guardian_core::{EventSink, Orchestrator, Report, SessionEvent};

#[derive(Parser)]
#[command(
    name = "guardian",
    about = "Audit a repository against a regulatory document, or ask questions about it",
    version
)]
struct Cli {
    /// Natural-language request, e.g. "check https://github.com/acme/app against rules.pdf"
    query: Option<String>,

    /// Start an interactive REPL
    #[arg(short, long)]
    interactive: bool,

    /// Write the full report JSON to a file
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Print the full report JSON to stdout instead of the final answer
    #[arg(long)]
    json: bool,

    /// Model to use (overrides config and GUARDIAN_MODEL)
    #[arg(short, long)]
    model: Option<String>,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn event(&self, event: &SessionEvent) {
        eprintln!("[{}] {}", event.stage, event.message);
    }
}

fn init_tracing(quiet: bool) {
    let default = if quiet {
        "error"
    } else if guardian_config::Config::verbose_from_env() {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let mut config = match guardian_config::Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("guardian: configuration error: {err}");
            return ExitCode::from(2);
        }
    };
    if let Some(model) = &cli.model {
        let default = config.provider.default.clone();
        config
            .provider
            .providers
            .entry(default)
            .or_default()
            .model = Some(model.clone());
    }

    let provider = match guardian_provider::create_provider(&config.provider.default, &config) {
        Ok(provider) => provider,
        Err(err) => {
            eprintln!("guardian: {err}");
            return ExitCode::from(2);
        }
    };

    let mut orchestrator = match Orchestrator::new(config, Arc::from(provider)) {
        Ok(orchestrator) => orchestrator,
        Err(err) => {
            eprintln!("guardian: initialization failed: {err}");
            return ExitCode::from(2);
        }
    };
    if !cli.quiet && !cli.json {
        orchestrator.add_event_sink(Arc::new(ConsoleSink));
    }
    tracing::debug!(model = %orchestrator.model_name(), "guardian initialized");

    if cli.interactive {
        if let Err(err) = repl(&mut orchestrator, &cli).await {
            eprintln!("guardian: {err}");
            return ExitCode::from(1);
        }
        return ExitCode::SUCCESS;
    }

    let Some(query) = cli.query.clone() else {
        eprintln!("guardian: provide a query or use --interactive (see --help)");
        return ExitCode::from(2);
    };

    match run_once(&mut orchestrator, &query, &cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("guardian: {err}");
            ExitCode::from(1)
        }
    }
}

/// Tool failures live inside the report; this only fails on I/O problems
/// like an unwritable --output path.
async fn run_once(orchestrator: &mut Orchestrator, query: &str, cli: &Cli) -> Result<()> {
    let report = orchestrator.run(query).await;
    emit_report(&report, cli)?;
    Ok(())
}

fn emit_report(report: &Report, cli: &Cli) -> Result<()> {
    if let Some(path) = &cli.output {
        std::fs::write(path, report.to_json_pretty()?)?;
        if !cli.quiet {
            eprintln!("report written to {}", path.display());
        }
    }
    if cli.json {
        println!("{}", report.to_json_pretty()?);
    } else {
        println!("{}", report.final_answer);
        if let Some(audit) = &report.tool_results.audit {
            if audit.total_violations > 0 && !cli.quiet {
                eprintln!(
                    "({} violations, {} files scanned, full detail with --json)",
                    audit.total_violations, audit.files_scanned
                );
            }
        }
    }
    Ok(())
}

const REPL_HELP: &str = "commands:\n  \
    set_qa <url>   start (or switch) the repository QA session\n  \
    end_qa         close the QA session\n  \
    session        show the active QA session\n  \
    history        show past queries in this session\n  \
    clear          clear the history\n  \
    help           this text\n  \
    exit           leave\n\
    anything else is treated as a query.";

async fn repl(orchestrator: &mut Orchestrator, cli: &Cli) -> Result<()> {
    println!("guardian interactive session - `help` lists commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        use std::io::Write as _;
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((c, r)) => (c, r.trim()),
            None => (line.as_str(), ""),
        };

        match command {
            "exit" | "quit" => break,
            "help" => println!("{REPL_HELP}"),
            "set_qa" => {
                if rest.is_empty() {
                    println!("usage: set_qa <repo-url>");
                    continue;
                }
                match orchestrator.ensure_qa_session(rest).await {
                    Ok(info) => println!(
                        "session ready: {} ({} files, {} chunks)",
                        info.repo_url, info.doc_count, info.chunk_count
                    ),
                    Err(err) => println!("could not open session: {err}"),
                }
            }
            "end_qa" => {
                orchestrator.end_qa_session();
                println!("session closed");
            }
            "session" => match orchestrator.session_info() {
                Some(info) => println!(
                    "{} - {} files, {} chunks, created {}",
                    info.repo_url,
                    info.doc_count,
                    info.chunk_count,
                    info.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                None => println!("no active session"),
            },
            "history" => {
                let history = orchestrator.session_history();
                if history.is_empty() {
                    println!("no history yet");
                }
                for entry in history {
                    println!(
                        "[{}] {}",
                        entry.timestamp.format("%H:%M:%S"),
                        entry.query
                    );
                }
            }
            "clear" => {
                orchestrator.clear_history();
                println!("history cleared");
            }
            _ => {
                let report = orchestrator.run(&line).await;
                emit_report(&report, cli)?;
            }
        }
    }

    Ok(())
}
