//! Offline soak of the lead controller: the real producer and callback code,
//! driven cycle by cycle with a simulated HAL instead of a clock and device.

use std::path::PathBuf;
use std::sync::{atomic::AtomicBool, Arc};

use revline_core::{
    audio::RenderCallback,
    buffering::{stereo_ring, CHANNELS},
    diagnostics::{classify, frames_to_ms, BufferDiagnostics, BufferStatus},
    playback::{producer::Producer, PlaybackConfig, UPDATE_HZ},
    source::{ControlValue, EngineSource, SineSource, SourceHandle, StubEngine},
};
use serde::Serialize;

#[derive(Debug)]
struct Args {
    cycles: u64,
    block_frames: usize,
    /// Consumer clock offset against the producer, parts per million.
    drift_ppm: f64,
    source: String,
    target_lead_ms: u32,
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    cycles: u64,
    block_frames: usize,
    drift_ppm: f64,
    source: String,
    target_lead_frames: usize,
    min_lead_frames: usize,
    max_lead_frames: usize,
    avg_lead_ms: f64,
    p50_lead_ms: f64,
    p95_lead_ms: f64,
    callbacks: u64,
    underruns: u64,
    safety_resets: u64,
    skipped_cycles: u64,
    source_shortfalls: u64,
    truncated_writes: u64,
    cycles_not_normal: u64,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("lead_soak failed: {e}");
        std::process::exit(1);
    }
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        cycles: 10_000,
        block_frames: 512,
        drift_ppm: 0.0,
        source: "sine".into(),
        target_lead_ms: 100,
        output: None,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |name: &str| it.next().ok_or_else(|| format!("missing value for {name}"));
        match arg.as_str() {
            "--cycles" => {
                args.cycles = value("--cycles")?
                    .parse()
                    .map_err(|_| "invalid value for --cycles".to_string())?;
            }
            "--block" => {
                args.block_frames = value("--block")?
                    .parse::<usize>()
                    .map_err(|_| "invalid value for --block".to_string())?
                    .clamp(16, 8_192);
            }
            "--drift-ppm" => {
                args.drift_ppm = value("--drift-ppm")?
                    .parse::<f64>()
                    .map_err(|_| "invalid value for --drift-ppm".to_string())?
                    .clamp(-10_000.0, 10_000.0);
            }
            "--source" => {
                let v = value("--source")?;
                if v != "sine" && v != "engine" {
                    return Err(format!("unknown source: {v} (expected sine or engine)"));
                }
                args.source = v;
            }
            "--target-ms" => {
                args.target_lead_ms = value("--target-ms")?
                    .parse()
                    .map_err(|_| "invalid value for --target-ms".to_string())?;
            }
            "--output" => {
                args.output = Some(PathBuf::from(value("--output")?));
            }
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p revline-core --bin lead_soak -- \\
  [--cycles <n>] [--block <frames>] [--drift-ppm <ppm>] [--source sine|engine] \\
  [--target-ms <ms>] [--output <file.json>]"
                );
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn run() -> Result<(), String> {
    let args = parse_args()?;

    let config = PlaybackConfig {
        target_lead_ms: args.target_lead_ms,
        max_lead_ms: args.target_lead_ms.saturating_mul(5),
        ..PlaybackConfig::default()
    };
    config.validate().map_err(|e| e.to_string())?;

    let source = match args.source.as_str() {
        "engine" => SourceHandle::new(EngineSource::new(
            StubEngine::new(config.sample_rate),
            ControlValue::new(0.2),
        )),
        _ => SourceHandle::new(
            SineSource::fixed(220.0, 0.5, config.sample_rate).map_err(|e| e.to_string())?,
        ),
    };

    let diagnostics = Arc::new(BufferDiagnostics::default());
    let (writer, reader) = stereo_ring(config.capacity_frames);
    let mut producer = Producer::new(&config, writer, source, Arc::clone(&diagnostics));
    let mut callback = RenderCallback::new(
        reader,
        Arc::new(AtomicBool::new(true)),
        Arc::clone(&diagnostics),
    );

    for _ in 0..config.warmup_cycles() {
        producer.warm_up_cycle();
    }
    producer.finish_warm_up();

    let observer = producer.observer();
    let target = config.target_lead_frames();
    let consumer_per_cycle =
        config.sample_rate as f64 / UPDATE_HZ as f64 * (1.0 + args.drift_ppm / 1_000_000.0);
    let mut owed = 0.0;
    let mut hal = vec![0.0f32; args.block_frames * CHANNELS];

    let mut leads_ms = Vec::with_capacity(args.cycles as usize);
    let mut min_lead = usize::MAX;
    let mut max_lead = 0;
    let mut not_normal = 0;

    for _ in 0..args.cycles {
        producer.cycle();

        owed += consumer_per_cycle;
        while owed >= args.block_frames as f64 {
            callback.render(&mut hal);
            owed -= args.block_frames as f64;
        }

        let lead = observer.available();
        min_lead = min_lead.min(lead);
        max_lead = max_lead.max(lead);
        leads_ms.push(frames_to_ms(lead, config.sample_rate) as f64);
        if classify(lead, target) != BufferStatus::Normal {
            not_normal += 1;
        }
    }

    let snap = diagnostics.snapshot();
    let summary = Summary {
        cycles: args.cycles,
        block_frames: args.block_frames,
        drift_ppm: args.drift_ppm,
        source: args.source,
        target_lead_frames: target,
        min_lead_frames: if leads_ms.is_empty() { 0 } else { min_lead },
        max_lead_frames: max_lead,
        avg_lead_ms: if leads_ms.is_empty() {
            0.0
        } else {
            leads_ms.iter().sum::<f64>() / leads_ms.len() as f64
        },
        p50_lead_ms: percentile(&leads_ms, 0.50),
        p95_lead_ms: percentile(&leads_ms, 0.95),
        callbacks: snap.callbacks,
        underruns: snap.underruns,
        safety_resets: snap.safety_resets,
        skipped_cycles: snap.skipped_cycles,
        source_shortfalls: snap.source_shortfalls,
        truncated_writes: snap.truncated_writes,
        cycles_not_normal: not_normal,
    };

    println!(
        "Done. cycles={} lead p50={:.1}ms p95={:.1}ms underruns={} safety_resets={}",
        summary.cycles,
        summary.p50_lead_ms,
        summary.p95_lead_ms,
        summary.underruns,
        summary.safety_resets
    );

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote soak report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}
