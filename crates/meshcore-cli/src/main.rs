//! `meshcore-cli` entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use meshcore_cli::chain::Chain;
use meshcore_cli::config::{self, Config};
use meshcore_cli::output::Style;
use meshcore_cli::transport::{StreamConnector, Target};
use meshcore_cli::{CliError, ExecOptions, Executor, Result, Session};

/// Command-line client for MeshCore companion radios.
#[derive(Parser, Debug)]
#[command(name = "meshcore-cli", version, about)]
#[command(after_help = "Run with `help` as a command for the command list.")]
struct Args {
    /// Print results as JSON.
    #[arg(short = 'j')]
    json: bool,

    /// Debug logging.
    #[arg(short = 'D')]
    debug: bool,

    /// TCP host of the radio.
    #[arg(short = 't', value_name = "HOST")]
    host: Option<String>,

    /// TCP port.
    #[arg(short = 'p', value_name = "PORT")]
    port: Option<u16>,

    /// Serial device.
    #[arg(short = 's', value_name = "DEVICE")]
    serial: Option<String>,

    /// Serial baud rate.
    #[arg(short = 'b', value_name = "BAUD")]
    baud: Option<u32>,

    /// Target as `host:port` or a device path.
    #[arg(short = 'a', value_name = "TARGET")]
    address: Option<String>,

    /// Commands to run in order. None starts chat mode.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    commands: Vec<String>,
}

fn init_tracing(args: &Args) {
    let level = if args.debug {
        "debug"
    } else if args.json {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Pick the target from flags, falling back to the remembered one.
fn resolve_target(args: &Args, config: &Config, dir: Option<&PathBuf>) -> Result<Target> {
    let port = args.port.unwrap_or(config.tcp_port);
    let baud = args.baud.unwrap_or(config.baudrate);
    if let Some(path) = &args.serial {
        return Ok(Target::Serial {
            path: path.clone(),
            baud,
        });
    }
    if let Some(host) = &args.host {
        return Ok(Target::Tcp {
            host: host.clone(),
            port,
        });
    }
    let address = args
        .address
        .clone()
        .or_else(|| dir.and_then(|d| config::load_default_address(d)))
        .ok_or_else(|| CliError::Usage("no target given, use -t, -s or -a".to_string()))?;
    Ok(Target::parse(&address, port, baud)?)
}

/// Connect and run. `Ok(false)` means a command failed and was already
/// reported.
fn run(args: Args) -> Result<bool> {
    let dir = config::config_dir();
    let config = Config::load_or_default(dir.as_deref());

    let target = resolve_target(&args, &config, dir.as_ref())?;
    tracing::debug!(%target, "connecting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("link")
        .enable_all()
        .build()
        .map_err(|e| CliError::Config(format!("failed to start runtime: {}", e)))?;

    let connector = StreamConnector::new(target.clone(), runtime.handle().clone(), config.connect_timeout());
    let session = Session::open(Box::new(connector), config.session())?;

    if let Some(dir) = &dir {
        match config::save_default_address(dir, &target.to_string()) {
            Ok(true) => tracing::debug!("remembered {}", target),
            Ok(false) => {}
            Err(e) => tracing::warn!("{}", e),
        }
    }

    let router = session.router().clone();
    if let Err(e) = ctrlc::set_handler(move || router.interrupt()) {
        tracing::warn!("failed to install Ctrl-C handler: {}", e);
    }

    let options = ExecOptions {
        wait_timeout: config.wait_timeout(),
        cache_ttl: config.cache_ttl(),
        style: Style {
            color: config.color,
            print_snr: config.print_snr,
            json_msgs: config.json_msgs,
        },
    };
    let mut executor = Executor::new(session, std::io::stdout(), options);

    let result = if args.commands.is_empty() {
        meshcore_cli::repl::run(&mut executor, None)
    } else {
        let mut chain = Chain::new(args.commands.clone(), args.json);
        executor.run_chain(&mut chain)
    };

    executor.session().close();
    runtime.shutdown_timeout(std::time::Duration::from_millis(200));
    if let Err(e) = &result {
        tracing::debug!("stopped: {}", e);
    }
    Ok(result.is_ok())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args);
    let json = args.json;

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            if json {
                println!("{}", serde_json::json!({ "error": e.to_string() }));
            } else {
                eprintln!("Error: {}", e);
            }
            ExitCode::FAILURE
        }
    }
}
