use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::info;
use std::sync::Arc;
use std::time::Duration;

use playcore::media::{MediaFormat, MIME_AUDIO_AAC, MIME_VIDEO_AVC};
use playcore::sim::{
    AutoDecoderFactory, DriverNote, ImmediateRendererFactory, NullAudioSink, NullCaptionFactory,
    NullSurface, RecordingDriver, ScriptedSourceFactory, SourceScript,
};
use playcore::source::DequeueResult;
use playcore::media::AccessUnit;
use playcore::renderer::VideoSurface;
use playcore::{Player, PlayerComponents, PlayerError, Settings};

/// playcore demo - plays a synthetic A/V session through the controller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of synthetic video frames
    #[arg(long, default_value = "120")]
    frames: u32,

    /// Frame interval in milliseconds
    #[arg(long, default_value = "33")]
    frame_interval_ms: u32,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load().unwrap_or_default();
    let log_level = if args.debug {
        "debug"
    } else {
        &settings.general.log_level
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("starting playcore demo v{}", env!("CARGO_PKG_VERSION"));

    // Script a short A/V session.
    let frame_us = i64::from(args.frame_interval_ms) * 1000;
    let mut script = SourceScript {
        duration_us: Some(frame_us * i64::from(args.frames)),
        audio_format: Some(MediaFormat::audio(MIME_AUDIO_AAC, 44_100, 2)),
        video_format: Some(MediaFormat::video(MIME_VIDEO_AVC, 1280, 720)),
        ..Default::default()
    };
    for i in 0..args.frames {
        let time_us = frame_us * i64::from(i);
        script.push_units(
            false,
            [DequeueResult::Unit(AccessUnit::new(time_us, vec![0; 256]))],
        );
        script.push_units(
            true,
            [DequeueResult::Unit(AccessUnit::new(time_us, vec![0; 64]))],
        );
    }
    script.push_units(false, [DequeueResult::Error(PlayerError::EndOfStream)]);
    script.push_units(true, [DequeueResult::Error(PlayerError::EndOfStream)]);

    let components = PlayerComponents {
        sources: Box::new(ScriptedSourceFactory::new(script)),
        decoders: Box::new(AutoDecoderFactory::new()),
        renderers: Box::new(ImmediateRendererFactory::new(true)),
        captions: Box::new(NullCaptionFactory::new()),
    };

    let (driver, notes) = RecordingDriver::new();
    let driver_dyn: Arc<dyn playcore::Driver> = driver.clone();
    let driver_weak: std::sync::Weak<dyn playcore::Driver> = Arc::downgrade(&driver_dyn);
    let player = Player::new(components, driver_weak, settings);
    let handle = player.handle();

    let surface: Arc<dyn VideoSurface> = Arc::new(NullSurface::new());
    handle.set_audio_sink(Arc::new(NullAudioSink::new()));
    handle.set_video_surface(Some(surface));
    handle.set_data_source_fd(3, 0, 1 << 20);
    handle.prepare_async();
    handle.start();

    // Echo driver callbacks until playback completes.
    loop {
        let note = notes.recv_timeout(Duration::from_secs(5))?;
        match &note {
            DriverNote::Position(position_us) => {
                info!("position {} us", position_us);
            }
            DriverNote::Listener(message) => {
                info!("listener: {message:?}");
                if matches!(message, playcore::ListenerMessage::PlaybackComplete) {
                    break;
                }
            }
            other => info!("{other:?}"),
        }
    }

    info!("playback complete, shutting down");
    player.shutdown();

    Ok(())
}
