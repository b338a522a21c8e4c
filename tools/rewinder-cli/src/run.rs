//! Run command - drive a session headlessly
//!
//! Refresh callbacks are issued at a fixed rate on a [`ManualClock`], so a
//! run is reproducible: the same arguments always produce the same ticks,
//! frames and rewind history. Optional events inject a stall (no callbacks
//! for a while) and a pause with auto-rewind.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use rewinder_core::format::{self, SessionStat};
use rewinder_core::presentation::{SCREEN_HEIGHT, SCREEN_WIDTH};
use rewinder_core::store::{BlobStore, FileBlobStore, MemoryBlobStore, PersistentRamSync};
use rewinder_core::{
    Buttons, ManualClock, PlaybackState, ReferenceMachine, Session, SessionConfig,
    SoftwareFramebuffer, StepEngine, TimeSource, VirtualAudioSink,
};
use serde::Serialize;
use tracing::info;

type HeadlessSession = Session<ReferenceMachine, VirtualAudioSink, SoftwareFramebuffer>;

/// Arguments for the run command
#[derive(Args)]
pub struct RunArgs {
    /// Program file (defaults to the built-in demo program)
    pub program: Option<PathBuf>,

    /// Config file (defaults to the platform config file)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Wall-clock seconds to simulate
    #[arg(long, default_value = "10")]
    pub seconds: f64,

    /// Refresh callback rate in Hz
    #[arg(long, default_value = "60")]
    pub refresh_hz: f64,

    /// Hold START from this time on (forces persistent RAM writes)
    #[arg(long)]
    pub start_at: Option<f64>,

    /// Stop issuing callbacks at this time...
    #[arg(long, requires = "stall_for")]
    pub stall_at: Option<f64>,

    /// ...for this many seconds
    #[arg(long)]
    pub stall_for: Option<f64>,

    /// Pause and auto-rewind at this time...
    #[arg(long, requires = "rewind_for")]
    pub rewind_at: Option<f64>,

    /// ...for this many seconds, then resume
    #[arg(long)]
    pub rewind_for: Option<f64>,

    /// Blob store directory for persistent RAM (defaults to the platform data directory)
    #[arg(long, conflicts_with = "no_store")]
    pub store: Option<PathBuf>,

    /// Keep persistent RAM in memory only
    #[arg(long)]
    pub no_store: bool,

    /// Write the last presented frame as PNG
    #[arg(long)]
    pub png: Option<PathBuf>,

    /// Print statistics as JSON
    #[arg(long)]
    pub json: bool,
}

/// Counters gathered while driving the session
#[derive(Debug, Default, Serialize)]
struct RunSummary {
    callbacks: u64,
    frames: u64,
    audio_batches: u64,
    rewind_steps: u64,
    ram_flushes: u64,
}

#[derive(Serialize)]
struct Report<'a> {
    summary: &'a RunSummary,
    stats: &'a [SessionStat],
}

/// Execute the run command
pub fn execute(args: RunArgs) -> Result<()> {
    if !(args.refresh_hz > 0.0) || !(args.seconds >= 0.0) {
        anyhow::bail!("--refresh-hz must be > 0 and --seconds >= 0");
    }
    let config = crate::config_cmd::load(args.config.as_ref())?;

    let (program, name) = match &args.program {
        Some(path) => (
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?,
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "program".into()),
        ),
        None => (ReferenceMachine::demo_program(), "demo".to_string()),
    };

    if args.no_store {
        drive(&args, &config, &program, &name, &mut MemoryBlobStore::new())
    } else {
        let mut store = match &args.store {
            Some(dir) => FileBlobStore::new(dir),
            None => FileBlobStore::open_default().context("No data directory on this platform")?,
        };
        info!("Blob store at {}", store.root().display());
        drive(&args, &config, &program, &name, &mut store)
    }
}

fn drive<S: BlobStore>(
    args: &RunArgs,
    config: &SessionConfig,
    program: &[u8],
    name: &str,
    store: &mut S,
) -> Result<()> {
    let mut sync = PersistentRamSync::new(program, name, config.persist.flush_interval_ms);
    let saved = sync.load(store)?;

    let mut session: HeadlessSession = Session::create(
        program,
        saved.as_deref(),
        config,
        VirtualAudioSink::new(),
        SoftwareFramebuffer::default(),
    )
    .context("Failed to create session")?;

    let period = 1.0 / args.refresh_hz;
    let stall = args.stall_at.zip(args.stall_for);
    let rewind = args.rewind_at.zip(args.rewind_for);
    let mut rewind_started = false;

    let mut clock = ManualClock::new(0.0);
    let mut summary = RunSummary::default();

    while clock.now_sec() < args.seconds {
        let now = clock.now_sec();

        if let Some((at, duration)) = stall
            && now >= at
            && now < at + duration
        {
            clock.set(at + duration);
            info!("Stalled {:.3}s at {:.3}s", duration, at);
            continue;
        }

        if let Some((at, duration)) = rewind {
            if !rewind_started && now >= at {
                rewind_started = true;
                session.enter_auto_rewind(now);
                info!("Auto-rewind at {:.3}s from tick {}", now, session.ticks());
            }
            if session.state() == PlaybackState::Rewinding {
                if session.on_rewind_timer(now)? {
                    summary.rewind_steps += 1;
                }
                if now >= at + duration {
                    session.resume();
                }
            }
        }

        let buttons = match args.start_at {
            Some(at) if now >= at => Buttons::START,
            _ => Buttons::empty(),
        };
        session.set_buttons(buttons);
        session.audio_mut().sink_mut().set_now(now);
        if let Some(report) = session.on_animation_frame(now) {
            summary.callbacks += 1;
            summary.frames += report.frames as u64;
            summary.audio_batches += report.audio_batches as u64;
        }
        if sync.poll(now, &mut session, store)? {
            summary.ram_flushes += 1;
        }

        clock.advance(period);
    }

    let stats = collect_stats(&session);
    if let Some(path) = &args.png {
        write_png(path, session.presentation().pixels())?;
    }

    let frame = session.engine().frame_buffer().to_vec();
    let ram = session.shutdown();
    sync.flush(&ram, Some(&frame), store)?;
    summary.ram_flushes += 1;

    if args.json {
        let report = Report {
            summary: &summary,
            stats: &stats,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} callbacks, {} frames, {} audio batches, {} rewind steps, {} RAM flushes",
            summary.callbacks,
            summary.frames,
            summary.audio_batches,
            summary.rewind_steps,
            summary.ram_flushes
        );
        for stat in &stats {
            println!("{:>16}: {}", stat.name, stat.value);
        }
    }
    Ok(())
}

fn collect_stats(session: &HeadlessSession) -> Vec<SessionStat> {
    let tps = session.ticks_per_second();
    let audio = session.audio();
    let mut stats = vec![
        SessionStat::ticks("Time", session.ticks(), tps),
        SessionStat::number("Ticks", session.ticks()),
        SessionStat::number("Machine frames", session.engine().frame_count()),
        SessionStat::new("FPS", format!("{:.1}", session.fps())),
        SessionStat::number("Audio scheduled", audio.scheduled()),
        SessionStat::number("Audio resets", audio.resets()),
        SessionStat::new("Audio peak", format!("{:.3}", audio.sink().peak())),
    ];
    stats.extend(format::rewind_stats(&session.rewind_stats(), tps));
    stats
}

fn write_png(path: &Path, pixels: &[u8]) -> Result<()> {
    let image = image::RgbaImage::from_raw(SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32, pixels.to_vec())
        .context("Frame buffer does not match screen size")?;
    image
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(())
}
