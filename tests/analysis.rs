use std::path::Path;

use vizcast::audio::decode::decode_audio;
use vizcast::audio::{CacheKey, FeatureExtractor, FeatureStore};

fn write_tone(path: &Path, seconds: f32, sample_rate: u32, channels: u16, freq: f32) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for n in 0..(seconds * sample_rate as f32) as usize {
        let t = n as f32 / sample_rate as f32;
        let s = (2.0 * std::f32::consts::PI * freq * t).sin() * 0.5;
        for _ in 0..channels {
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
    }
    writer.finalize().unwrap();
}

#[test]
fn decodes_stereo_wav_to_mono() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stereo.wav");
    write_tone(&path, 1.0, 22_050, 2, 220.0);

    let audio = decode_audio(&path, None).unwrap();
    assert_eq!(audio.sample_rate, 22_050);
    assert_eq!(audio.samples.len(), 22_050);
    assert!((audio.duration() - 1.0).abs() < 1e-6);
    assert!(audio.samples.iter().all(|s| s.abs() <= 1.0));
}

#[test]
fn decoding_with_a_target_rate_resamples_to_the_exact_length() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    write_tone(&path, 2.0, 44_100, 1, 440.0);

    let audio = decode_audio(&path, Some(22_050)).unwrap();
    assert_eq!(audio.sample_rate, 22_050);
    assert_eq!(audio.samples.len(), 44_100);

    // Same signal level after resampling: 0.5 amplitude sine.
    let mid = &audio.samples[10_000..30_000];
    let rms = (mid.iter().map(|s| s * s).sum::<f32>() / mid.len() as f32).sqrt();
    assert!((rms - 0.5 / 2f32.sqrt()).abs() < 0.02, "rms {rms}");

    let native = decode_audio(&path, Some(44_100)).unwrap();
    assert_eq!(native.samples.len(), 88_200);
}

#[test]
fn timeline_is_frame_aligned_for_each_fps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    write_tone(&path, 2.0, 44_100, 1, 440.0);
    let extractor = FeatureExtractor::new(FeatureStore::new(dir.path().join("cache")));

    for (fps, frames) in [(30, 60), (24, 48), (60, 120)] {
        let timeline = extractor.analyze(&path, fps, false).unwrap();
        assert_eq!(timeline.frame_count(), frames, "fps {fps}");
        assert!(timeline.is_aligned());
        assert_eq!(timeline.tone_profile.cols(), frames);
        assert!(timeline.loudness.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(timeline.tempo > 0.0);
    }
}

#[test]
fn second_analysis_comes_from_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    write_tone(&path, 2.0, 44_100, 1, 440.0);
    let store = FeatureStore::new(dir.path().join("cache"));
    let extractor = FeatureExtractor::new(store.clone());

    let first = extractor.analyze(&path, 30, false).unwrap();
    let key = CacheKey::for_file(&path, 30).unwrap();
    assert!(store.path_for(&key).exists());

    let cached = store.load(&key).unwrap().unwrap();
    assert_eq!(cached, first);
    assert_eq!(extractor.analyze(&path, 30, false).unwrap(), first);

    // A different fps is a different artifact.
    extractor.analyze(&path, 24, false).unwrap();
    assert!(store.size_bytes() > 0);
    assert_eq!(store.clear(), 2);
}

#[test]
fn dominant_pitch_follows_the_tone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a440.wav");
    write_tone(&path, 2.0, 44_100, 1, 440.0);
    let extractor = FeatureExtractor::new(FeatureStore::new(dir.path().join("cache")));

    let timeline = extractor.analyze(&path, 30, true).unwrap();
    let mid = timeline.at(timeline.frame_count() / 2);
    // pitch class 9 is A
    assert_eq!(mid.dominant_pitch(), 9);
    assert!((0.0..=1.0).contains(&mid.progress));
}
