use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, info_span, warn};
use tracing_subscriber::EnvFilter;
use warden::configs::WardenConfig;
use warden::{Event, ProcessController};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(
        short,
        long,
        env = "WARDEN_CONFIG",
        value_name = "FILE",
        default_value = "/etc/warden/config.yml"
    )]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let config = WardenConfig::load(&args.config)?;

    if std::env::var("WARDEN_LOG").is_err() {
        std::env::set_var("WARDEN_LOG", &config.log_filter);
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("WARDEN_LOG"))
        .init();

    info!("{:#?}", config);

    let mut controllers = Vec::with_capacity(config.programs.len());
    for program in config.programs {
        let autostart = program.autostart;
        let controller = ProcessController::with_settings(program, config.settings.clone())?;
        let span = info_span!("program", name = %controller.program().name);
        controller.on_state_change(move |old, new| {
            span.in_scope(|| info!("{old} -> {new}"));
        });
        if autostart {
            controller.operate(Event::Start);
        }
        controllers.push(controller);
    }

    tokio::signal::ctrl_c()
        .await
        .wrap_err("Failed to listen for ctrl-c")?;
    info!("Shutting down");

    for controller in &controllers {
        controller.operate(Event::Stop);
    }
    let deadline = Instant::now() + config.settings.drain_delay * 5;
    while controllers.iter().any(ProcessController::is_running) {
        if Instant::now() > deadline {
            warn!("Some programs did not stop in time");
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    Ok(())
}
