use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::json;
use snap_context::{inject, lookup, ContextToken, LookupError, ProcessEnvironment};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info, warn};

const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yaml");
const DEFAULT_CONFIG_PATH: &str = "/etc/snap-context/config.yaml";
const CONFIG_ENV: &str = "SNAP_CONTEXT_CONFIG";

#[derive(Parser, Debug)]
#[command(name = "snap-context", version, about = "Pass application context to confined programs")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Lookup { app: String },
    Run {
        #[arg(long)]
        require_context: bool,
        app: String,
        #[arg(last = true, required = true)]
        command: Vec<OsString>,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Validate,
    Show,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Lookup(#[from] LookupError),
    #[error("invalid application name {0:?}")]
    InvalidApp(String),
    #[error("process error: {0}")]
    Process(String),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
struct Config {
    version: u32,
    context: ContextConfig,
    log: LogConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
struct ContextConfig {
    missing: MissingPolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
struct LogConfig {
    level: LogLevel,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum MissingPolicy {
    Debug,
    Warn,
    Fatal,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            context: ContextConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            missing: MissingPolicy::Debug,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug)]
struct Context {
    config_path: PathBuf,
    config_explicit: bool,
    json: bool,
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = build_context(&cli);

    let result = load_config(&ctx).and_then(|cfg| {
        init_tracing(cli.verbose, cfg.log.level);
        match cli.command {
            Commands::Lookup { app } => handle_lookup(&ctx, &app),
            Commands::Run {
                require_context,
                app,
                command,
            } => handle_run(&cfg, require_context, &app, &command),
            Commands::Config { command } => handle_config(&ctx, &cfg, command),
        }
    });

    if let Err(err) = result {
        if ctx.json {
            let payload = JsonResult::<serde_json::Value> {
                ok: false,
                result: None,
                error: Some(err.to_string()),
            };
            print_json(&payload)?;
        } else {
            eprintln!("{err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn build_context(cli: &Cli) -> Context {
    let (config_path, config_explicit) = resolve_config_path(cli.config.as_ref());
    Context {
        config_path,
        config_explicit,
        json: cli.json,
    }
}

fn resolve_config_path(override_path: Option<&PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = override_path {
        return (path.clone(), true);
    }
    if let Some(path) = env::var_os(CONFIG_ENV) {
        return (PathBuf::from(path), true);
    }
    (PathBuf::from(DEFAULT_CONFIG_PATH), false)
}

fn load_config(ctx: &Context) -> Result<Config, CliError> {
    if !ctx.config_explicit && !ctx.config_path.exists() {
        return parse_config(DEFAULT_CONFIG_YAML);
    }
    read_config(&ctx.config_path)
}

fn read_config(path: &Path) -> Result<Config, CliError> {
    let content = fs::read_to_string(path).map_err(|err| {
        CliError::Config(format!("cannot read {}: {err}", path.display()))
    })?;
    parse_config(&content)
}

fn parse_config(content: &str) -> Result<Config, CliError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    if cfg.version != 1 {
        return Err(CliError::Config(format!(
            "unsupported config version {}",
            cfg.version
        )));
    }
    Ok(cfg)
}

fn init_tracing(verbose: u8, configured: LogLevel) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(configured.as_str())),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    // A second subscriber can only appear in tests; keep the first.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .try_init();
}

/// Upstream check before the name is spliced into a path.
fn validate_app(app: &str) -> Result<(), CliError> {
    if app.is_empty() || app.contains('/') || app.contains('\0') {
        return Err(CliError::InvalidApp(app.to_string()));
    }
    Ok(())
}

fn handle_lookup(ctx: &Context, app: &str) -> Result<(), CliError> {
    validate_app(app)?;
    let token = lookup(app)?;
    info!(app, length = token.len(), "context found");
    if ctx.json {
        let payload = JsonResult {
            ok: true,
            result: Some(token_json(app, &token)),
            error: None,
        };
        print_json(&payload)?;
    } else {
        println!("{}", token.as_c_str().to_string_lossy());
    }
    Ok(())
}

fn token_json(app: &str, token: &ContextToken) -> serde_json::Value {
    json!({
        "app": app,
        "path": token.path().display().to_string(),
        "length": token.len(),
        "token": token.as_c_str().to_string_lossy(),
    })
}

fn handle_run(
    cfg: &Config,
    require_context: bool,
    app: &str,
    command: &[OsString],
) -> Result<(), CliError> {
    validate_app(app)?;
    let policy = if require_context {
        MissingPolicy::Fatal
    } else {
        cfg.context.missing
    };

    let token = match lookup(app) {
        Ok(token) => {
            debug!(app, length = token.len(), "context found");
            Some(token)
        }
        Err(err) => {
            report_missing(policy, &err)?;
            None
        }
    };
    inject(&mut ProcessEnvironment, token.as_ref());
    drop(token);

    let (program, args) = command
        .split_first()
        .ok_or_else(|| CliError::Process("no command given".to_string()))?;
    info!(app, program = %Path::new(program).display(), "executing");
    let err = Command::new(program).args(args).exec();
    Err(CliError::Process(format!(
        "cannot execute {}: {err}",
        Path::new(program).display()
    )))
}

fn report_missing(policy: MissingPolicy, err: &LookupError) -> Result<(), CliError> {
    match policy {
        MissingPolicy::Debug => {
            debug!(path = %err.path().display(), "{err}");
            Ok(())
        }
        MissingPolicy::Warn => {
            warn!(path = %err.path().display(), "{err}");
            Ok(())
        }
        MissingPolicy::Fatal => Err(CliError::Process(format!(
            "context is required but unavailable: {err}"
        ))),
    }
}

fn handle_config(ctx: &Context, cfg: &Config, command: ConfigCommand) -> Result<(), CliError> {
    match command {
        ConfigCommand::Validate => output(
            ctx,
            json!({"path": ctx.config_path, "exists": ctx.config_path.exists(), "valid": true}),
        ),
        ConfigCommand::Show => output(ctx, serde_json::to_value(cfg)?),
    }
}

fn output(ctx: &Context, payload: serde_json::Value) -> Result<(), CliError> {
    if ctx.json {
        let wrapper = JsonResult {
            ok: true,
            result: Some(payload),
            error: None,
        };
        print_json(&wrapper)?;
    } else {
        println!("{}", payload);
    }
    Ok(())
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}
