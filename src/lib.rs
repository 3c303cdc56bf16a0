pub mod clock;
pub mod db;
pub mod duration;
pub mod lifecycle;
pub mod models;
pub mod settings;
pub mod store;
pub mod timer;

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use clock::SystemClock;
use db::Database;
use duration::format_duration;
use lifecycle::{LifecycleBridge, LifecycleEvent};
use settings::SettingsStore;
use timer::{Reconciliation, TimerController, TimerState, TimerStatus, UpdateCallback};

const DATA_DIR_ENV: &str = "STUDYFOCUS_DATA_DIR";

fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("studyfocus"))
        .ok_or_else(|| anyhow!("could not determine a data directory; set {DATA_DIR_ENV}"))
}

fn describe(state: &TimerState) -> String {
    match state.status {
        TimerStatus::Idle => "idle".to_string(),
        status => format!(
            "{} {} [{}] paused {} distractions {}",
            if status == TimerStatus::Paused { "paused" } else { "running" },
            format_duration(state.elapsed_ms),
            state.mode.as_deref().unwrap_or("-"),
            format_duration(state.total_paused_ms),
            state.distractions
        ),
    }
}

fn print_notice(reconciliation: &Reconciliation) {
    if reconciliation.notable {
        println!(
            "time reconciled: {} passed unobserved, focused time now {}",
            format_duration(reconciliation.gap_ms),
            format_duration(reconciliation.elapsed_after_ms)
        );
    }
}

async fn console(timer: TimerController) -> Result<()> {
    let on_update: UpdateCallback = Arc::new(|state: &TimerState| {
        log::debug!("timer update: {}", describe(state));
    });

    if timer.restore_session(Some(on_update.clone())).await? {
        println!("session restored: {}", describe(&timer.get_state()));
        if let Some(reconciliation) = timer.last_reconciliation() {
            print_notice(&reconciliation);
        }
    }

    let mut bridge = LifecycleBridge::spawn(timer.clone(), |_, reconciliation| {
        print_notice(&reconciliation)
    });
    let lifecycle = bridge.sender();

    println!("commands: start [mode] | pause | resume | stop | status | distract | hide | show | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };

        let outcome = match command {
            "start" => {
                let mode = words.next().unwrap_or("flow");
                timer
                    .start(mode, Some(on_update.clone()))
                    .await
                    .map(|id| format!("started session {id}"))
            }
            "pause" => timer.pause().await.map(|_| "paused".to_string()),
            "resume" => timer.resume().await.map(|_| "resumed".to_string()),
            "stop" => timer
                .stop()
                .await
                .map(|id| format!("stopped session {id}")),
            "distract" => timer
                .log_distraction()
                .await
                .map(|count| format!("distractions this session: {count}")),
            "status" => Ok(describe(&timer.get_state())),
            "hide" | "show" => {
                let event = if command == "hide" {
                    LifecycleEvent::Hidden
                } else {
                    LifecycleEvent::Visible
                };
                lifecycle
                    .send(event)
                    .map_err(|_| anyhow!("lifecycle bridge is gone"))?;
                continue;
            }
            "quit" | "exit" => break,
            other => Ok(format!("unknown command '{other}'")),
        };

        match outcome {
            Ok(message) => println!("{message}"),
            Err(err) => println!("error: {err}"),
        }
    }

    bridge.shutdown().await?;
    timer.destroy();
    Ok(())
}

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    log::info!("StudyFocus starting up...");

    let data_dir = data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let config = settings.timer_config()?;
    log::info!("Device {} using {}", config.device_id, settings.path().display());

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(async move {
        let database = Database::new(data_dir.join("studyfocus.sqlite3"))?;
        let timer = TimerController::new(Arc::new(database), Arc::new(SystemClock), config);
        console(timer).await
    })
}
