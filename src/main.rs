//! CLI entry point: hand-rolled flag parsing (spec.md §6.1) wiring config
//! loading, the variable store, the orchestrator run, and the test-suite
//! runner mode.

use std::path::PathBuf;
use std::time::Duration;

use loadgen::client::ClientConfig;
use loadgen::domain::RunnerConfig;
use loadgen::orchestrator;
use loadgen::test_runner::{self, RunnerEnv};
use loadgen::variables::VariableStore;
use loadgen::yaml_config::YamlConfig;

struct Cli {
    config_path: Option<PathBuf>,
    log_level: String,
    concurrency: Option<usize>,
    duration_secs: Option<u64>,
    rate_limit: Option<i64>,
    total_requests: Option<i64>,
    timeout_secs: u64,
    read_timeout_secs: u64,
    write_timeout_secs: u64,
    dial_timeout_secs: u64,
    compress: bool,
    mixed: bool,
    run_path: Option<PathBuf>,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config_path: None,
            log_level: "info".to_string(),
            concurrency: None,
            duration_secs: None,
            rate_limit: None,
            total_requests: None,
            timeout_secs: 60,
            read_timeout_secs: 0,
            write_timeout_secs: 0,
            dial_timeout_secs: 3,
            compress: false,
            mixed: false,
            run_path: None,
        }
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Cli, String> {
    let mut cli = Cli::default();
    while let Some(arg) = args.next() {
        macro_rules! value {
            () => {
                args.next().ok_or_else(|| format!("{} requires a value", arg))?
            };
        }
        match arg.as_str() {
            "-config" => cli.config_path = Some(PathBuf::from(value!())),
            "-log" => cli.log_level = value!(),
            "-c" => cli.concurrency = Some(value!().parse().map_err(|_| "-c expects an integer")?),
            "-d" => cli.duration_secs = Some(value!().parse().map_err(|_| "-d expects an integer")?),
            "-r" => cli.rate_limit = Some(value!().parse().map_err(|_| "-r expects an integer")?),
            "-l" => cli.total_requests = Some(value!().parse().map_err(|_| "-l expects an integer")?),
            "-timeout" => cli.timeout_secs = value!().parse().map_err(|_| "-timeout expects an integer")?,
            "-read-timeout" => {
                cli.read_timeout_secs = value!().parse().map_err(|_| "-read-timeout expects an integer")?
            }
            "-write-timeout" => {
                cli.write_timeout_secs = value!().parse().map_err(|_| "-write-timeout expects an integer")?
            }
            "-dial-timeout" => {
                cli.dial_timeout_secs = value!().parse().map_err(|_| "-dial-timeout expects an integer")?
            }
            "-compress" => cli.compress = true,
            "-mixed" => cli.mixed = true,
            "-run" => cli.run_path = Some(PathBuf::from(value!())),
            other => return Err(format!("unrecognized flag '{other}'")),
        }
    }
    Ok(cli)
}

/// Overlay CLI flags onto the config file's `runner` section. CLI flags win
/// when present, matching the original loader's flag-over-config precedence.
fn apply_overrides(runner: &mut RunnerConfig, cli: &Cli) {
    if let Some(c) = cli.concurrency {
        runner.concurrency = c;
    }
    if let Some(d) = cli.duration_secs {
        runner.duration_in_seconds = Some(d);
    }
    if let Some(r) = cli.rate_limit {
        runner.rate_limit_per_sec = if r < 0 { None } else { Some(r as u64) };
    }
    if let Some(l) = cli.total_requests {
        runner.request_budget = if l < 0 { None } else { Some(l as u64) };
    }
    if cli.compress {
        runner.compress = true;
    }
}

/// Build the shared HTTP client's configuration from the CLI timeout flags.
/// reqwest exposes one request timeout rather than separate read/write
/// stages, so the tighter of `-timeout`/`-read-timeout`/`-write-timeout` is
/// used; `0` means "no timeout" for all four flags, matching the original
/// loader's flag defaults.
fn client_config(cli: &Cli) -> ClientConfig {
    let request_timeout_secs = [cli.timeout_secs, cli.read_timeout_secs, cli.write_timeout_secs]
        .into_iter()
        .filter(|&s| s > 0)
        .min();
    ClientConfig {
        connect_timeout: (cli.dial_timeout_secs > 0).then(|| Duration::from_secs(cli.dial_timeout_secs)),
        request_timeout: request_timeout_secs.map(Duration::from_secs),
        ..ClientConfig::default()
    }
}

async fn run_config(path: &std::path::Path, cli: &Cli) -> i32 {
    let config = match YamlConfig::load(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: failed to load config '{}': {e}", path.display());
            return 78;
        }
    };

    let mut runner = config.runner;
    apply_overrides(&mut runner, cli);

    let variables = match VariableStore::new(config.variables) {
        Ok(v) => std::sync::Arc::new(v),
        Err(e) => {
            eprintln!("fatal: {e}");
            return 78;
        }
    };

    let outcome = match orchestrator::run(&runner, config.requests, variables, client_config(cli)).await {
        Ok(o) => o,
        Err(e) => {
            eprintln!("fatal: {e}");
            return 78;
        }
    };

    orchestrator::report(&outcome.stats, &outcome.latencies, &runner, outcome.wall_time);
    orchestrator::exit_code(&outcome.stats, &runner)
}

#[tokio::main]
async fn main() {
    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("fatal: {e}");
            std::process::exit(78);
        }
    };

    loadgen::logging::init(&cli.log_level);

    let mut exit = 0;

    if let Some(path) = &cli.config_path {
        exit = run_config(path, &cli).await;
    }

    if cli.mixed {
        if let Some(run_path) = &cli.run_path {
            let dsl_exit = run_config(run_path, &cli).await;
            exit = exit.max(dsl_exit);
        }

        if let Some(config_path) = &cli.config_path {
            if let Ok(config) = YamlConfig::load(config_path) {
                if !config.tests.is_empty() {
                    let env = RunnerEnv {
                        test_dir: std::env::var("LR_TEST_DIR")
                            .map(PathBuf::from)
                            .unwrap_or_else(|_| PathBuf::from(".")),
                        gateway_cmd: std::env::var("LR_GATEWAY_CMD").ok().map(PathBuf::from),
                        gateway_host: std::env::var("LR_GATEWAY_HOST").ok(),
                        gateway_api_host: std::env::var("LR_GATEWAY_API_HOST").ok(),
                        env_vars: std::env::vars().collect(),
                    };
                    let outcomes = test_runner::run_suite(&env, &config.tests);
                    for outcome in &outcomes {
                        println!(
                            "[TEST][{}] {} duration: {}ms",
                            outcome.status, outcome.path, outcome.duration_ms
                        );
                        if outcome.status != "SUCCESS" {
                            exit = exit.max(1);
                        }
                    }
                }
            }
        }
    } else if cli.run_path.is_some() {
        exit = exit.max(run_config(cli.run_path.as_ref().unwrap(), &cli).await);
    }

    if cli.config_path.is_none() && cli.run_path.is_none() {
        eprintln!("fatal: no config provided; pass -config <path.yml>");
        exit = 78;
    }

    std::process::exit(exit);
}
