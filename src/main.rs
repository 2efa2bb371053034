use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tbbox_gate::comm::{self, Comm};
use tbbox_gate::config::Config;
use tbbox_gate::consts::{GATE_NAME, GATE_VERSION};
use tbbox_gate::controller::SwitchController;
use tbbox_gate::directory::{ControlAction, ProgramDirectory};
use tbbox_gate::gpio::{self, PinEvent};
use tbbox_gate::http::{self, AppState};
use tbbox_gate::pattern::{MappingTable, PatternTranslator, ProgramId};
use tbbox_gate::session::DeviceSession;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(long, global = true, default_value = "config.yaml")]
    config_path: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run GPIO and HTTP front ends (default).
    Run,
    /// Switch to a single program and exit.
    Switch { id: ProgramId },
    /// Send a transport control.
    Control { action: ControlAction },
    /// Set volume in percent, rounded to tens.
    Volume {
        #[arg(allow_negative_numbers = true)]
        percent: i32,
    },
    /// Connect and log in, then disconnect.
    CheckConnection,
}

fn init_log(level: Option<&str>) {
    let timer = fmt::time::ChronoLocal::new("%H:%M:%S%.3f".to_string());

    // Configure a custom event formatter
    let format = fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_source_location(true)
        .with_timer(timer)
        .compact();

    let default = level
        .and_then(|level| level.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::INFO);
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();

    fmt().event_format(format).with_env_filter(filter).init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Unable to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Long running mode: pin edges and HTTP alerts until a shutdown signal.
async fn run(
    config: &Config,
    translator: Arc<PatternTranslator>,
    controller: SwitchController,
) -> anyhow::Result<()> {
    if let Err(err) = controller.connect().await {
        warn!("Initial connection failed, will retry on first command: {}", err);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // GPIO -> device
    let (events_tx, events) = mpsc::channel::<PinEvent>(16);
    let watcher = gpio::detect(&config.gpio);
    let watcher_task = tokio::spawn(async move {
        if let Err(err) = watcher.run(events_tx).await {
            error!("GPIO monitoring failed: {:#}", err);
        }
    });

    let gpio_task = tokio::spawn(gpio::dispatch(events, controller.clone(), shutdown_rx.clone()));

    // HTTP -> device
    let mut http_shutdown = shutdown_rx.clone();
    let stopped = async move {
        let _ = http_shutdown.changed().await;
    };
    let mut http_task = if config.http.enabled {
        let state = AppState {
            translator,
            controller: controller.clone(),
        };
        let bind = config.http.bind.clone();
        tokio::spawn(async move { http::serve(&bind, state, stopped).await })
    } else {
        info!("HTTP disabled in configuration");
        tokio::spawn(async move {
            stopped.await;
            Ok(())
        })
    };

    info!("{} initialized.", GATE_NAME);

    let finished = tokio::select! {
        _ = shutdown_signal() => None,
        joined = &mut http_task => Some(joined),
    };
    let _ = shutdown_tx.send(true);
    let http_result = match finished {
        Some(joined) => joined,
        None => http_task.await,
    };

    watcher_task.abort();
    let _ = gpio_task.await;

    http_result.context("HTTP task failed")?
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config_path);
    init_log(config.as_ref().ok().and_then(|c| c.log_level.as_deref()));
    let config = config?;

    info!(
        "Starting {} {} at {}. Args: {:?}",
        GATE_NAME,
        GATE_VERSION,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        args
    );
    info!(
        "Device {} with {} programs configured",
        config.device.addr(),
        config.programs.len()
    );

    let translator = Arc::new(PatternTranslator::new(MappingTable::load(
        config.switch_mapping.as_ref(),
    )));
    let directory = ProgramDirectory::from_config(&config).context("Invalid program directory")?;

    let Comm { handle, worker } = comm::spawn(DeviceSession::from_config(&config.device));
    let controller = SwitchController::new(Arc::new(directory), handle);

    let result = match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&config, translator, controller.clone()).await,
        Command::Switch { id } => controller.switch_program(id).await.map_err(Into::into),
        Command::Control { action } => controller.control(action).await.map_err(Into::into),
        Command::Volume { percent } => controller
            .set_volume(percent)
            .await
            .map(|level| info!("Volume set to {}%", level))
            .map_err(Into::into),
        Command::CheckConnection => controller
            .connect()
            .await
            .map(|()| info!("Connection and login OK"))
            .map_err(Into::into),
    };

    controller.close().await;
    // Last handle gone, the worker stops.
    drop(controller);
    if let Err(err) = worker.await {
        error!("Device worker failed: {}", err);
    }

    if let Err(err) = &result {
        error!("{:#}", err);
    }
    result
}
