//! Revline headless playback host.
//!
//! Loads `settings.json`, builds the configured audio source, runs a
//! `PlaybackSession` and logs status changes and buffer reports until Ctrl-C
//! or the configured duration elapses.
//!
//! `--list-devices` prints the available output devices and exits.

mod settings;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use revline_core::{
    audio::device::list_output_devices, ControlValue, EngineSimulator, EngineSource,
    PlaybackSession, SineSource, SourceHandle, StubEngine,
};
use settings::{load_settings, save_settings, settings_path, AppSettings};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

fn build_source(settings: &AppSettings) -> anyhow::Result<SourceHandle> {
    if settings.source == "engine" {
        let mut engine = StubEngine::new(settings.sample_rate);
        if let Some(script) = &settings.engine_script {
            let asset_base = settings
                .asset_base
                .clone()
                .or_else(|| script.parent().map(Path::to_path_buf))
                .unwrap_or_default();
            engine
                .load_configuration(script, &asset_base)
                .with_context(|| format!("loading engine script {}", script.display()))?;
        }
        info!(throttle = settings.throttle, "using stub engine source");
        return Ok(SourceHandle::new(EngineSource::new(
            engine,
            ControlValue::new(settings.throttle),
        )));
    }

    info!(
        frequency_hz = settings.tone_frequency_hz,
        amplitude = settings.amplitude,
        "using sine source"
    );
    let tone = SineSource::fixed(settings.tone_frequency_hz, settings.amplitude, settings.sample_rate)?;
    Ok(SourceHandle::new(tone))
}

async fn wait_for_stop(settings: &AppSettings) {
    match settings.duration() {
        Some(duration) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received"),
                _ = tokio::time::sleep(duration) => info!(?duration, "configured duration elapsed"),
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for Ctrl-C: {e}");
            }
            info!("interrupt received");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "revline=info,revline_core=info".into()),
        )
        .init();

    if std::env::args().skip(1).any(|a| a == "--list-devices") {
        for device in list_output_devices() {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{}{marker}", device.name);
        }
        return Ok(());
    }

    let path = settings_path();
    let settings = load_settings(&path);
    info!(path = %path.display(), source = settings.source.as_str(), "Revline starting");
    if !path.exists() {
        match save_settings(&path, &settings) {
            Ok(()) => info!(path = %path.display(), "wrote default settings"),
            Err(e) => warn!(path = %path.display(), "could not write default settings: {e}"),
        }
    }

    let source = build_source(&settings)?;
    let session = Arc::new(PlaybackSession::new(settings.playback_config(), source));

    let mut status_rx = session.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => info!(status = ?event.status, detail = ?event.detail, "session status"),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut report_rx = session.subscribe_reports();
    tokio::spawn(async move {
        loop {
            match report_rx.recv().await {
                Ok(report) => info!(
                    lead_ms = report.lead_ms,
                    status = ?report.status,
                    underruns = report.underruns,
                    safety_resets = report.safety_resets,
                    rpm = report.rpm.map(|r| r.round() as i64),
                    "buffer"
                ),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    session.start().context("failed to start playback")?;

    wait_for_stop(&settings).await;

    // stop() waits for the producer thread to release the device.
    let stopping = Arc::clone(&session);
    tokio::task::spawn_blocking(move || stopping.stop()).await??;

    let snapshot = session.diagnostics_snapshot();
    info!(
        callbacks = snapshot.callbacks,
        underruns = snapshot.underruns,
        producer_cycles = snapshot.producer_cycles,
        safety_resets = snapshot.safety_resets,
        source_shortfalls = snapshot.source_shortfalls,
        "Revline stopped"
    );
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
