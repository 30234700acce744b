//! PCM fixtures through the feature frontend.

use myna_config::FeatureConfig;
use myna_core::SampleRate;
use myna_pipeline::FeaturePipeline;

#[test]
fn test_wav_fixture_through_frontend() {
    // Synthesize a 200ms 440Hz tone as an in-memory WAV fixture
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut buffer, spec).unwrap();
        for i in 0..3200 {
            let t = i as f32 / 16000.0;
            let sample = (2.0 * std::f32::consts::PI * 440.0 * t).sin();
            writer
                .write_sample((sample * i16::MAX as f32 * 0.5) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    buffer.set_position(0);

    let mut reader = hound::WavReader::new(buffer).unwrap();
    let rate = SampleRate::from_hz(reader.spec().sample_rate).unwrap();
    assert_eq!(rate, SampleRate::Hz16000);
    let samples: Vec<f32> = reader
        .samples::<i16>()
        .map(|s| s.unwrap() as f32 / 32768.0)
        .collect();

    let pipeline = FeaturePipeline::new(&FeatureConfig::default());
    pipeline.accept_waveform(&samples);
    pipeline.set_input_finished();

    // 3200 samples -> (3200 - 400) / 160 + 1 = 18 complete frames
    assert_eq!(pipeline.num_frames(), 18);
    let (frames, ok) = pipeline.read(18);
    assert!(ok);
    assert!(frames.iter().all(|f| f.len() == 80));
    assert!(frames.iter().flatten().all(|v| v.is_finite()));
}
