//! slate CLI - run or trace a Python program through the execution engine

use clap::{Args, Parser, Subcommand};
use slate_core::{Engine, EngineConfig, ExecutionRequest, SessionId};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "slate")]
#[command(author, version, about = "Sandboxed execution and step tracing for student code")]
struct Cli {
    /// JSON config file (missing fields take defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program to completion
    Run {
        #[command(flatten)]
        job: JobArgs,
    },

    /// Run a program under the step tracer
    Trace {
        #[command(flatten)]
        job: JobArgs,

        /// Step ceiling (clamped to the configured maximum)
        #[arg(long)]
        max_steps: Option<u64>,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Args)]
struct JobArgs {
    /// Code to execute (or - for stdin)
    code: String,

    /// File whose contents are the program's stdin
    #[arg(long, conflicts_with = "input")]
    stdin: Option<PathBuf>,

    /// Literal text for the program's stdin
    #[arg(long)]
    input: Option<String>,

    /// Seed for the program's random module
    #[arg(long)]
    seed: Option<i64>,

    /// Attach a file to the program's directory
    #[arg(long = "file", value_name = "NAME=PATH", value_parser = parse_file)]
    files: Vec<(String, PathBuf)>,

    /// Wall-clock timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Run through a prepared session backend
    #[arg(long)]
    session: Option<String>,
}

impl JobArgs {
    fn into_request(self, max_steps: Option<u64>) -> Result<ExecutionRequest, Box<dyn std::error::Error>> {
        let code = if self.code == "-" {
            let mut code = String::new();
            std::io::stdin().read_to_string(&mut code)?;
            code
        } else {
            self.code
        };

        let mut builder = ExecutionRequest::builder(code);
        if let Some(path) = &self.stdin {
            builder = builder.stdin(std::fs::read_to_string(path)?);
        } else if let Some(input) = self.input {
            builder = builder.stdin(input);
        }
        if let Some(seed) = self.seed {
            builder = builder.random_seed(seed);
        }
        for (name, path) in &self.files {
            builder = builder.file(name.clone(), std::fs::read_to_string(path)?);
        }
        if let Some(ms) = self.timeout_ms {
            builder = builder.timeout_ms(ms);
        }
        if let Some(steps) = max_steps {
            builder = builder.max_steps(steps);
        }
        if let Some(session) = self.session {
            builder = builder.session(session);
        }
        Ok(builder.build())
    }
}

fn parse_file(raw: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got {raw:?}"))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PATH, got {raw:?}"));
    }
    Ok((name.to_owned(), PathBuf::from(path)))
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("slate=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Run { job } => {
            let engine = Engine::new(config)?;
            let request = job.into_request(None)?;
            let session = prepare(&engine, &request).await;
            let result = engine.run(request).await;
            finish(&engine, session).await;

            let result = result?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Commands::Trace { job, max_steps } => {
            let engine = Engine::new(config)?;
            let request = job.into_request(max_steps)?;
            let session = prepare(&engine, &request).await;
            let trace = engine.trace(request).await;
            finish(&engine, session).await;

            println!("{}", serde_json::to_string_pretty(&trace?)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Warm the request's session, if it names one
async fn prepare(engine: &Engine, request: &ExecutionRequest) -> Option<SessionId> {
    let session = request.session_id()?.clone();
    if session.as_str().is_empty() {
        return None;
    }
    engine.prepare_for_session(&session).await;
    tracing::info!(%session, state = ?engine.session_state(&session), "session prepared");
    Some(session)
}

async fn finish(engine: &Engine, session: Option<SessionId>) {
    if let Some(session) = session {
        engine.cleanup_session(&session).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_file_pairs() {
        assert_eq!(
            parse_file("data.csv=/tmp/in.csv").unwrap(),
            ("data.csv".to_owned(), PathBuf::from("/tmp/in.csv"))
        );
        assert!(parse_file("data.csv").is_err());
        assert!(parse_file("=x").is_err());
    }

    #[test]
    fn trace_arguments_build_a_request() {
        let cli = Cli::parse_from([
            "slate", "trace", "print(1)", "--input", "a\n", "--seed", "7", "--max-steps", "20",
            "--session", "room",
        ]);
        let Commands::Trace { job, max_steps } = cli.command else {
            panic!("expected trace");
        };
        let request = job.into_request(max_steps).unwrap();
        assert_eq!(request.code(), "print(1)");
        assert_eq!(request.stdin(), "a\n");
        assert_eq!(request.random_seed(), Some(7));
        assert_eq!(request.max_steps(), Some(20));
        assert_eq!(request.session_id().map(SessionId::as_str), Some("room"));
    }
}
