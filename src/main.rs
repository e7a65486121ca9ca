//! ai-chatbot — console entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI flags
//!   3. Load config
//!   4. Resolve effective log level (CLI `-v` flags > env > config)
//!   5. Init logger once
//!   6. Build the chat session (fails fast without an API key)
//!   7. Spawn Ctrl-C → shutdown signal watcher
//!   8. Run the session on stdin/stdout until it terminates

use ai_chatbot::config;
use ai_chatbot::error::AppError;
use ai_chatbot::logger;
use ai_chatbot::session::{ChatSession, ExitReason};

use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Exit explicitly: the runtime cannot cancel a pending blocking stdin read,
    // so returning after Ctrl-C would wait for the next line.
    let code = match run().await {
        Ok(reason) => reason.exit_code(),
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<ExitReason, AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = match parse_cli_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => return Err(AppError::Config(msg)),
    };
    if args.help {
        print_help();
        return Ok(ExitReason::OperatorExit);
    }

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.logging.level.as_str());
    let force_cli_level = args.log_level.is_some();

    logger::init(effective_log_level, force_cli_level, config.logging.file.as_deref())?;

    info!(
        provider = %config.llm.provider,
        model = %config.llm.gemini.model,
        api_key_env = %config.llm.api_key_env,
        configured_log_level = %config.logging.level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let mut session = ChatSession::from_config(&config)?;

    // Ctrl-C cancels the token; the session watches it while reading and
    // while a request is in flight.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — shutting down");
            ctrlc_token.cancel();
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    session.run(stdin, &mut stdout, &shutdown).await
}

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
    help: bool,
}

fn parse_cli_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs, String> {
    let mut verbosity = 0u8;
    let mut parsed = CliArgs::default();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => parsed.help = true,
            "-f" | "--config" => match iter.next() {
                Some(path) => parsed.config_path = Some(path),
                None => return Err("-f/--config requires a path argument".to_string()),
            },
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            other => return Err(format!("unrecognised argument: {other} (see --help)")),
        }
    }

    parsed.log_level = logger::level_for_verbosity(verbosity);
    Ok(parsed)
}

fn print_help() {
    println!("Usage: ai-chatbot [OPTIONS]");
    println!();
    println!("Chat with a Gemini model from the terminal. Type `exit` to quit.");
    println!();
    println!("Options:");
    println!("  -h, --help                 Print help");
    println!("  -f, --config <PATH>        Path to configuration file (default: {})", config::DEFAULT_CONFIG_PATH);
    println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
    println!();
    println!("Environment:");
    println!("  GEMINI_API_KEY             API key (name configurable via [llm] api_key_env)");
    println!("  {:<26} Override the configured log level", config::LOG_LEVEL_ENV);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs, String> {
        parse_cli_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn no_args_defaults() {
        assert_eq!(parse(&[]).unwrap(), CliArgs::default());
    }

    #[test]
    fn config_path_and_verbosity() {
        let args = parse(&["-f", "my.toml", "-vvv"]).unwrap();
        assert_eq!(args.config_path.as_deref(), Some("my.toml"));
        assert_eq!(args.log_level, Some("debug"));
    }

    #[test]
    fn repeated_verbose_flags_accumulate() {
        let args = parse(&["-v", "--verbose"]).unwrap();
        assert_eq!(args.log_level, Some("info"));
    }

    #[test]
    fn missing_config_path_errors() {
        assert!(parse(&["--config"]).unwrap_err().contains("requires a path"));
    }

    #[test]
    fn unknown_flag_errors() {
        assert!(parse(&["--model", "x"]).is_err());
    }

    #[test]
    fn help_flag() {
        assert!(parse(&["--help"]).unwrap().help);
    }

    #[test]
    fn double_dash_stops_parsing() {
        let args = parse(&["--", "--bogus"]).unwrap();
        assert_eq!(args, CliArgs::default());
    }
}
