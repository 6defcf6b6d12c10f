//! Playback-path integration tests
//!
//! Drive a full controller over the scripted sim components and assert on
//! the driver callbacks and collaborator records.

mod common;

use common::{av_script, video_script, Rig};
use playcore::media::{AccessUnit, MediaFormat, CropRect, MIME_VIDEO_AVC};
use playcore::renderer::VideoSurface;
use playcore::sim::DriverNote;
use playcore::source::{DequeueResult, Discontinuity};
use playcore::{ListenerMessage, PlayerError};
use std::sync::Arc;
use std::time::Duration;

fn surface() -> Arc<dyn VideoSurface> {
    Arc::new(playcore::sim::NullSurface::new())
}

#[test]
fn prepare_reports_duration_before_completion() {
    let rig = Rig::new(av_script(0, 33_000), true);

    rig.handle.set_data_source_fd(3, 0, 1024);
    rig.wait_note(|n| matches!(n, DriverNote::SetDataSourceCompleted(Ok(()))));

    rig.handle.prepare_async();

    let first = rig.wait_note(|n| {
        matches!(
            n,
            DriverNote::Duration(_) | DriverNote::PrepareCompleted(_)
        )
    });
    assert_eq!(first, DriverNote::Duration(0));
    rig.wait_note(|n| matches!(n, DriverNote::PrepareCompleted(Ok(()))));
}

#[test]
fn plays_both_streams_to_completion() {
    let rig = Rig::new(av_script(5, 33_000), true);

    rig.handle.set_audio_sink(Arc::new(rig.sink.clone()));
    rig.handle.set_video_surface(Some(surface()));
    rig.handle.set_data_source_fd(3, 0, 1024);
    rig.handle.prepare_async();
    rig.wait_note(|n| matches!(n, DriverNote::PrepareCompleted(Ok(()))));

    rig.handle.start();

    rig.wait_note(|n| {
        matches!(
            n,
            DriverNote::Listener(ListenerMessage::PlaybackComplete)
        )
    });

    // Playback completion fires exactly once.
    rig.assert_no_note(Duration::from_millis(300), |n| {
        matches!(n, DriverNote::Listener(ListenerMessage::PlaybackComplete))
    });

    let created = rig.decoders.created();
    assert_eq!(created.iter().filter(|d| d.audio).count(), 1);
    assert_eq!(created.iter().filter(|d| !d.audio).count(), 1);

    let renderer = rig.renderers.last().expect("renderer created");
    assert_eq!(renderer.queued_times(false).len(), 5);
    assert_eq!(renderer.queued_times(true).len(), 5);

    // Source ran out of data with decoders active, so EOS flowed through
    // the decoders, not through the scan loop.
    let eos = renderer.eos();
    assert!(eos.contains(&(true, PlayerError::EndOfStream)));
    assert!(eos.contains(&(false, PlayerError::EndOfStream)));
}

#[test]
fn time_discontinuity_skips_until_resume_hint() {
    let mut script = video_script(&[6_000_000]);
    script.push_units(
        false,
        [DequeueResult::Discontinuity(Discontinuity::time_jump(Some(
            7_500_000,
        )))],
    );
    script.push_units(
        false,
        [
            DequeueResult::Unit(AccessUnit::new(7_000_000, vec![0; 256])),
            DequeueResult::Unit(AccessUnit::new(7_500_000, vec![0; 256])),
            DequeueResult::Unit(AccessUnit::new(7_600_000, vec![0; 256])),
            DequeueResult::Error(PlayerError::EndOfStream),
        ],
    );

    let rig = Rig::new(script, true);
    rig.handle.set_video_surface(Some(surface()));
    rig.handle.set_data_source_fd(3, 0, 1024);
    rig.handle.start();

    rig.wait_note(|n| matches!(n, DriverNote::Listener(ListenerMessage::PlaybackComplete)));

    // The 7.0s buffer is suppressed by the resume hint; the skip marker
    // clears on the first buffer at or past it.
    let renderer = rig.renderers.last().expect("renderer created");
    assert_eq!(
        renderer.queued_times(false),
        vec![6_000_000, 7_500_000, 7_600_000]
    );
    assert_eq!(renderer.time_discontinuities(), 1);

    let video = rig.decoders.last(false).expect("video decoder");
    assert_eq!(video.flushes(), 1);
    assert_eq!(video.resumes(), 1);
    assert_eq!(video.shutdowns(), 0);
}

#[test]
fn late_non_reference_frames_are_dropped() {
    let rig = Rig::new(video_script(&[]), false);
    rig.handle.set_video_surface(Some(surface()));
    rig.handle.set_data_source_fd(3, 0, 1024);
    rig.handle.start();

    let renderer = rig.wait_for(|| rig.renderers.last());

    // Report video running 250 ms late before any unit is available.
    renderer.notifier.position(0, 250_000);
    rig.wait_note(|n| matches!(n, DriverNote::Position(0)));

    {
        let script = rig.sources.script();
        let mut script = script.lock();
        script.push_units(
            false,
            [
                DequeueResult::Unit(AccessUnit::non_reference(1_000_000, vec![0; 256])),
                DequeueResult::Unit(AccessUnit::new(2_000_000, vec![0; 256])),
                DequeueResult::Error(PlayerError::EndOfStream),
            ],
        );
    }

    rig.wait_note(|n| matches!(n, DriverNote::Listener(ListenerMessage::PlaybackComplete)));

    // The non-reference frame never reached the decoder; the reference
    // frame did.
    let renderer = rig.renderers.last().expect("renderer created");
    assert_eq!(renderer.queued_times(false), vec![2_000_000]);

    renderer.notifier.position(2_000_000, 0);
    let stats = rig.wait_note(|n| matches!(n, DriverNote::FrameStats(_, _)));
    assert_eq!(stats, DriverNote::FrameStats(2, 1));
}

#[test]
fn video_size_uses_output_crop() {
    let mut script = video_script(&[]);
    {
        let format = script.video_format.as_mut().unwrap();
        format.width = Some(1920);
        format.height = Some(1088);
        format.crop = Some(CropRect {
            left: 0,
            top: 0,
            right: 1919,
            bottom: 1079,
        });
    }

    let rig = Rig::new(script, false);
    rig.handle.set_video_surface(Some(surface()));
    rig.handle.set_data_source_fd(3, 0, 1024);
    rig.handle.start();

    // The decoder reports its configure format as the output format, whose
    // crop wins over the coded size.
    let note = rig.wait_note(|n| {
        matches!(
            n,
            DriverNote::Listener(ListenerMessage::SetVideoSize { .. })
        )
    });
    assert_eq!(
        note,
        DriverNote::Listener(ListenerMessage::SetVideoSize {
            width: 1920,
            height: 1080
        })
    );
}

#[test]
fn video_size_honors_rotation() {
    let rig = Rig::new(video_script(&[]), false);
    rig.handle.set_data_source_fd(3, 0, 1024);
    rig.wait_note(|n| matches!(n, DriverNote::SetDataSourceCompleted(Ok(()))));

    let mut rotated = MediaFormat::video(MIME_VIDEO_AVC, 1280, 720);
    rotated.rotation_degrees = 90;
    rig.sources
        .notifier()
        .expect("source created")
        .video_size_changed(rotated);

    let note = rig.wait_note(|n| {
        matches!(
            n,
            DriverNote::Listener(ListenerMessage::SetVideoSize { .. })
        )
    });
    assert_eq!(
        note,
        DriverNote::Listener(ListenerMessage::SetVideoSize {
            width: 720,
            height: 1280
        })
    );
}
