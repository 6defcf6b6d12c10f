//! Control-path integration tests
//!
//! Deferred-action fencing, generation filtering, surface changes, offload
//! fallback and track selection, observed through the scripted sim
//! components.

mod common;

use common::{av_script, video_script, Rig};
use crossbeam::channel::bounded;
use playcore::audio::{AudioEncoding, AAC_PROFILE_HE};
use playcore::media::{
    AccessUnit, MediaFormat, OutputBuffer, TextBuffer, TrackInfo, TrackType, MIME_AUDIO_AAC,
    MIME_TEXT_3GPP,
};
use playcore::decoder::FillReply;
use playcore::renderer::VideoSurface;
use playcore::sim::{DriverNote, NullSurface, SourceScript};
use playcore::source::{DequeueResult, Discontinuity};
use playcore::ListenerMessage;
use std::sync::Arc;
use std::time::Duration;

fn surface() -> Arc<dyn VideoSurface> {
    Arc::new(NullSurface::new())
}

/// A seek injected while the video decoder is mid-flush must
/// stay queued until the flush settles, then run after the deferred flush.
#[test]
fn seek_is_deferred_while_flushing() {
    let mut script = av_script(1, 33_000);
    // Rebuild the video queue: one unit, then a time discontinuity that
    // starts a flush the test holds open.
    script.video_units.clear();
    script.push_units(
        false,
        [
            DequeueResult::Unit(AccessUnit::new(0, vec![0; 256])),
            DequeueResult::Discontinuity(Discontinuity::time_jump(None)),
        ],
    );

    let rig = Rig::new(script, false);
    rig.decoders.hold_flush(false, true);

    rig.handle.set_audio_sink(Arc::new(rig.sink.clone()));
    rig.handle.set_video_surface(Some(surface()));
    rig.handle.set_data_source_fd(3, 0, 1024);
    rig.handle.start();

    // Wait until the discontinuity has the video decoder mid-flush.
    let video = rig.wait_for(|| rig.decoders.last(false));
    rig.wait_for(|| (video.flushes() == 1).then_some(()));

    rig.handle.seek_to_async(5_000_000);

    // The seek must not run while the flush is held open.
    rig.assert_no_note(Duration::from_millis(200), |n| {
        matches!(n, DriverNote::SeekComplete)
    });
    assert!(rig.sources.script().lock().seeks.is_empty());

    video.release_flush();

    // Once both streams settle the deferred flush runs, then the seek;
    // position is reported before seek completion.
    let position = rig.wait_note(|n| matches!(n, DriverNote::Position(5_000_000)));
    assert_eq!(position, DriverNote::Position(5_000_000));
    rig.wait_note(|n| matches!(n, DriverNote::SeekComplete));

    assert_eq!(rig.sources.script().lock().seeks, vec![5_000_000]);
    // One flush from the discontinuity, one from the deferred seek flush.
    assert_eq!(video.flushes(), 2);
}

/// A surface change tears down the video decoder, swaps the
/// surface, seeks back to the current position and rescans.
#[test]
fn surface_change_rebuilds_video_pipeline() {
    let rig = Rig::new(video_script(&[0]), false);

    let w1 = surface();
    rig.handle.set_video_surface(Some(Arc::clone(&w1)));
    rig.handle.set_data_source_fd(3, 0, 1024);
    rig.handle.start();

    let first_video = rig.wait_for(|| rig.decoders.last(false));
    let renderer = rig.wait_for(|| rig.renderers.last());

    renderer.notifier.position(3_000_000, 0);
    rig.wait_note(|n| matches!(n, DriverNote::Position(3_000_000)));

    let w2 = surface();
    rig.handle.set_video_surface(Some(Arc::clone(&w2)));

    // Expected order: decoder shutdown, surface swap, seek to the current
    // position, rescan.
    rig.wait_note(|n| matches!(n, DriverNote::SetSurfaceComplete));
    rig.wait_note(|n| matches!(n, DriverNote::Position(3_000_000)));
    rig.wait_note(|n| matches!(n, DriverNote::SeekComplete));

    assert_eq!(first_video.shutdowns(), 1);
    assert_eq!(rig.sources.script().lock().seeks, vec![3_000_000]);

    // The rescan instantiates a fresh video decoder against the new
    // surface.
    let second_video = rig.wait_for(|| {
        rig.decoders
            .created()
            .iter()
            .filter(|d| !d.audio)
            .nth(1)
            .cloned()
    });
    let bound = second_video.surface.clone().expect("surface bound");
    assert!(Arc::ptr_eq(&bound, &w2));
    assert!(!Arc::ptr_eq(&bound, &w1));
}

/// Offload teardown falls back to a PCM audio pipeline at
/// the reported position.
#[test]
fn offload_teardown_falls_back_to_pcm() {
    let mut format = MediaFormat::audio(MIME_AUDIO_AAC, 44_100, 2);
    format.aac_profile = Some(AAC_PROFILE_HE);
    format.bit_rate = Some(128_000);
    format.duration_us = Some(60_000_000);
    let script = SourceScript {
        duration_us: Some(60_000_000),
        audio_format: Some(format),
        ..Default::default()
    };

    let rig = Rig::new(script, false);
    rig.sink.set_offload_supported(true);

    rig.handle.set_audio_sink(Arc::new(rig.sink.clone()));
    rig.handle.set_data_source_fd(3, 0, 1024);
    rig.handle.start();

    // The sink opens in offload mode before the decoder exists, and the
    // decoder comes up in passthrough mode.
    let audio = rig.wait_for(|| rig.decoders.last(true));
    assert!(audio.passthrough);

    let opens = rig.wait_for(|| {
        let opens = rig.sink.opens();
        (!opens.is_empty()).then_some(opens)
    });
    let offload = opens[0].offload.as_ref().expect("offload open");
    assert_eq!(offload.encoding, AudioEncoding::AacHeV1);
    assert_eq!(rig.sink.metadata().len(), 1);

    // The decoder's output-format notification re-runs the configurator
    // with an identical offload record, which must not reopen the sink.
    // The blocking track call doubles as a mailbox barrier so the
    // notification has been processed by the time we look.
    rig.wait_for(|| (audio.configured_formats().len() == 1).then_some(()));
    let _ = rig.handle.get_track_info().expect("controller alive");
    assert_eq!(rig.sink.opens().len(), 1);

    let renderer = rig.renderers.last().expect("renderer created");
    assert!(renderer.flags().offload_audio);

    renderer.notifier.audio_offload_tear_down(12_000_000);

    rig.wait_note(|n| matches!(n, DriverNote::Position(12_000_000)));
    rig.wait_note(|n| matches!(n, DriverNote::SeekComplete));
    assert_eq!(rig.sources.script().lock().seeks, vec![12_000_000]);

    // Audio pipeline is rebuilt without offload: new decoder in full
    // decode mode, sink reopened as PCM.
    let second_audio = rig.wait_for(|| {
        rig.decoders
            .created()
            .iter()
            .filter(|d| d.audio)
            .nth(1)
            .cloned()
    });
    assert!(!second_audio.passthrough);

    let opens = rig.wait_for(|| {
        let opens = rig.sink.opens();
        (opens.len() >= 2).then_some(opens)
    });
    let pcm = &opens[1];
    assert_eq!(pcm.encoding, AudioEncoding::Pcm16);
    assert!(pcm.offload.is_none());

    assert_eq!(renderer.flushes(), vec![true]);
    assert_eq!(renderer.offload_disables(), 1);
    assert!(rig.sink.closes() >= 1);
}

/// Property: notifications carrying a stale generation are dropped, and a
/// pending input request is released with a discontinuity reply.
#[test]
fn stale_decoder_generation_gets_discontinuity_reply() {
    let rig = Rig::new(video_script(&[0]), false);

    rig.handle.set_video_surface(Some(surface()));
    rig.handle.set_data_source_fd(3, 0, 1024);
    rig.handle.start();

    let first_video = rig.wait_for(|| rig.decoders.last(false));

    // Recreate the video decoder so the first one's generation goes stale.
    rig.handle.set_video_surface(Some(surface()));
    rig.wait_for(|| {
        (rig.decoders.created().iter().filter(|d| !d.audio).count() == 2).then_some(())
    });

    let (tx, rx) = bounded(1);
    first_video
        .notifier
        .request_input(Box::new(move |reply| {
            let _ = tx.send(reply);
        }));

    match rx.recv_timeout(common::WAIT).expect("reply released") {
        FillReply::Discontinuity => {}
        other => panic!("expected discontinuity reply, got {other:?}"),
    }

    // A stale drain notification just hands the buffer back.
    let (tx, rx) = bounded(1);
    first_video.notifier.output_ready(
        OutputBuffer {
            time_us: 0,
            data: vec![],
        },
        Box::new(move || {
            let _ = tx.send(());
        }),
    );
    rx.recv_timeout(common::WAIT).expect("drain reply released");
}

/// Property: no deferred action runs while a stream is mid-flush; reset
/// stays queued until the flush settles.
#[test]
fn reset_waits_for_flush_to_settle() {
    let mut script = video_script(&[0]);
    script.push_units(
        false,
        [DequeueResult::Discontinuity(Discontinuity::time_jump(None))],
    );

    let rig = Rig::new(script, false);
    rig.decoders.hold_flush(false, true);

    rig.handle.set_video_surface(Some(surface()));
    rig.handle.set_data_source_fd(3, 0, 1024);
    rig.handle.start();

    let video = rig.wait_for(|| rig.decoders.last(false));
    rig.wait_for(|| (video.flushes() == 1).then_some(()));

    rig.handle.reset_async();

    rig.assert_no_note(Duration::from_millis(200), |n| {
        matches!(n, DriverNote::ResetComplete)
    });
    assert_eq!(rig.sources.script().lock().stops, 0);

    video.release_flush();

    rig.wait_note(|n| matches!(n, DriverNote::ResetComplete));
    assert_eq!(rig.sources.script().lock().stops, 1);
    assert_eq!(video.shutdowns(), 1);
}

/// Secure sources get decoders at start, before any data moves, and the
/// controller hands its input buffers to the source for in-place
/// decryption.
#[test]
fn secure_start_preallocates_decoder_buffers() {
    let script = video_script(&[0]);

    let rig = Rig::new(script, false);
    rig.handle.set_video_surface(Some(surface()));
    rig.handle.set_data_source_fd(3, 0, 1024);
    rig.wait_note(|n| matches!(n, DriverNote::SetDataSourceCompleted(Ok(()))));

    rig.sources
        .notifier()
        .expect("source created")
        .flags_changed(playcore::source::SourceFlags::SECURE);
    rig.wait_note(|n| matches!(n, DriverNote::FlagsChanged(_)));

    rig.handle.start();

    let video = rig.wait_for(|| rig.decoders.last(false));
    assert!(video.configured_formats()[0].secure);

    let buffer_sets = rig.wait_for(|| {
        let sets = rig.sources.script().lock().secure_buffer_sets.clone();
        (!sets.is_empty()).then_some(sets)
    });
    assert!(!buffer_sets[0].0);
    assert!(buffer_sets[0].1 > 0);
}

/// Track tables merge in-band and caption tracks into one index space, and
/// deselecting a timed-text track invalidates pending deliveries.
#[test]
fn track_selection_spans_inband_and_caption_tracks() {
    let mut script = video_script(&[0]);
    script.tracks = vec![
        TrackInfo::new(TrackType::Audio, "und"),
        TrackInfo::new(TrackType::TimedText, "fra"),
    ];

    let rig = Rig::new(script, false);
    rig.handle.set_video_surface(Some(surface()));
    rig.handle.set_data_source_fd(3, 0, 1024);
    rig.handle.start();

    // Caption decoder exists once the video decoder is up; give it one
    // track.
    rig.wait_for(|| rig.decoders.last(false));
    rig.captions.state().lock().tracks = vec![TrackInfo::new(TrackType::Subtitle, "eng")];

    let tracks = rig.handle.get_track_info().expect("track info");
    assert_eq!(tracks.len(), 3);
    assert_eq!(tracks[0].track_type, TrackType::Audio);
    assert_eq!(tracks[1].track_type, TrackType::TimedText);
    assert_eq!(tracks[2].track_type, TrackType::Subtitle);

    // Indices past the in-band range address caption tracks.
    rig.handle.select_track(2, true).expect("select caption");
    assert!(rig.captions.state().lock().selected.is_some());

    rig.handle.select_track(0, true).expect("select audio");
    assert_eq!(
        rig.handle.get_selected_track(TrackType::Audio).unwrap(),
        Some(0)
    );

    assert!(rig.handle.select_track(7, true).is_err());

    // A timed-text payload scheduled for later delivery dies when its
    // track is deselected.
    rig.handle.select_track(1, true).expect("select timed text");
    let text = TextBuffer {
        track_index: 1,
        time_us: 250_000,
        duration_us: 1_000_000,
        mime: MIME_TEXT_3GPP.to_string(),
        data: b"late".to_vec(),
    };
    rig.sources.notifier().expect("source").timed_text_data(text);
    rig.handle.select_track(1, false).expect("deselect");

    rig.assert_no_note(Duration::from_millis(500), |n| {
        matches!(
            n,
            DriverNote::Listener(ListenerMessage::TimedText { buffer: Some(_) })
        )
    });

    // A payload that is already due goes straight out.
    let text = TextBuffer {
        track_index: 1,
        time_us: 0,
        duration_us: 1_000_000,
        mime: MIME_TEXT_3GPP.to_string(),
        data: b"now".to_vec(),
    };
    rig.sources.notifier().expect("source").timed_text_data(text);
    rig.wait_note(|n| {
        matches!(
            n,
            DriverNote::Listener(ListenerMessage::TimedText { buffer: Some(_) })
        )
    });
}
