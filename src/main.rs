use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use wallpaper_slideshow::config::Configuration;
use wallpaper_slideshow::log::ActivityLog;
use wallpaper_slideshow::queue;
use wallpaper_slideshow::scan;
use wallpaper_slideshow::sinks::{
    CommandWallpaperSink, LogWallpaperSink, TracingNotifier, WallpaperSink, pretty_file_name,
};
use wallpaper_slideshow::store::JsonFileStore;
use wallpaper_slideshow::tasks::slideshow::{self, Slideshow, SlideshowHandle, SlideshowParts};
use wallpaper_slideshow::timer::SystemClock;

#[derive(Debug, Parser)]
#[command(
    name = "wallpaper-slideshow",
    version,
    about = "rotate the desktop wallpaper through a directory of images"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Print the queue in playback order and exit
    #[arg(long = "dry-run")]
    dry_run: bool,
    /// Enable verbose activity logging regardless of the config file
    #[arg(long = "activity-log")]
    activity_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // init tracing (RUST_LOG controls level, default = info)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let Args {
        config,
        dry_run,
        activity_log,
    } = Args::parse();

    let cfg = Configuration::load(&config)?;
    tracing::info!("Loaded configuration from {}:\n{:#?}", config.display(), cfg);

    let mut rng = match cfg.shuffle_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    if dry_run {
        return run_dry_run(&cfg, &mut rng);
    }

    let store = JsonFileStore::open(&cfg.state_file)
        .with_context(|| format!("failed to open state file {}", cfg.state_file.display()))?;
    let sink: Box<dyn WallpaperSink> = if cfg.apply_command.trim().is_empty() {
        Box::new(LogWallpaperSink)
    } else {
        Box::new(CommandWallpaperSink::new(cfg.apply_command.clone())?)
    };
    let parts = SlideshowParts {
        store: Box::new(store),
        sink,
        notifier: Box::new(TracingNotifier),
        clock: Arc::new(SystemClock),
        rng,
        activity: ActivityLog::new(cfg.activity_log || activity_log),
    };
    let (engine, watch_rx) = Slideshow::new(cfg.slideshow_settings(), parts);

    let cancel = CancellationToken::new();
    let (handle, task) = slideshow::spawn(engine, watch_rx, cancel.clone());

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    spawn_signal_handlers(handle.clone(), cancel.clone());

    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("slideshow task error: {e:?}"),
        Err(e) => tracing::error!("join error: {e}"),
    }
    drop(handle);
    Ok(())
}

/// SIGTERM stops, SIGUSR1 skips ahead, SIGUSR2 toggles pause, SIGHUP saves the
/// timer ahead of a suspend.
#[cfg(unix)]
fn spawn_signal_handlers(handle: SlideshowHandle, cancel: CancellationToken) {
    let mut streams = Vec::new();
    for (kind, name) in [
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::user_defined1(), "SIGUSR1"),
        (SignalKind::user_defined2(), "SIGUSR2"),
        (SignalKind::hangup(), "SIGHUP"),
    ] {
        match signal(kind) {
            Ok(stream) => streams.push((kind, name, stream)),
            Err(err) => tracing::warn!("failed to register {name} handler: {err}"),
        }
    }

    for (kind, name, mut stream) in streams {
        let handle = handle.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = stream.recv() => {
                        if received.is_none() {
                            break;
                        }
                        tracing::info!("{name} received");
                        let forwarded = if kind == SignalKind::terminate() {
                            cancel.cancel();
                            break;
                        } else if kind == SignalKind::user_defined1() {
                            handle.next().await
                        } else if kind == SignalKind::user_defined2() {
                            handle.toggle_pause().await
                        } else {
                            handle.suspend_likely().await
                        };
                        if let Err(err) = forwarded {
                            tracing::warn!("failed to forward {name}: {err}");
                            break;
                        }
                    }
                }
            }
        });
    }
}

fn run_dry_run(cfg: &Configuration, rng: &mut StdRng) -> Result<()> {
    let directory = &cfg.slideshow_directory;
    scan::check_directory(directory)?;
    let mut entries = scan::scan_directory(directory)?;
    queue::sort(&mut entries, cfg.sort_type, rng);

    println!(
        "# queue dry run\n# directory: {}\n# sort: {}\n# slide duration: {}\n# wallpapers: {}\n",
        directory.display(),
        cfg.sort_type,
        humantime::format_duration(cfg.effective_slide_duration()),
        entries.len()
    );
    if entries.is_empty() {
        println!("(no images found under {})", directory.display());
        return Ok(());
    }
    for (idx, entry) in entries.iter().enumerate() {
        println!(
            "  {:>4}: {}  ({})",
            idx + 1,
            entry.name,
            pretty_file_name(Some(&entry.name))
        );
    }
    Ok(())
}
