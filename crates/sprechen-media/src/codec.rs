//! PCM codec between sample buffers and the provider's wire representation.
//!
//! Outgoing audio is f32 microphone samples → little-endian i16 → base64.
//! Incoming audio is base64 → bytes → normalised f32, one vector per channel.
//! Nothing here resamples; buffers carry the rate they were decoded at.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use sprechen_core::protocol::OutboundFrame;

use crate::error::CodecError;

/// Mime type the realtime provider expects for raw PCM at `sample_rate`.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Convert f32 samples in `[-1, 1]` to little-endian 16-bit PCM bytes.
///
/// Out-of-range input saturates; NaN becomes silence.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| ((s * 32768.0) as i16).to_le_bytes())
        .collect()
}

/// Encode one captured frame for `sendRealtimeInput`.
pub fn encode_outgoing(samples: &[f32], sample_rate: u32) -> OutboundFrame {
    OutboundFrame {
        mime_type: pcm_mime_type(sample_rate),
        data: STANDARD.encode(float_to_pcm16(samples)),
    }
}

/// Strip the base64 envelope from an incoming audio payload.
pub fn decode_incoming(payload: &str) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.decode(payload)?)
}

/// Decoded audio tagged with the sample rate it must be played at.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    /// One vector per channel, all the same length.
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Number of sample frames.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Duration in seconds at the tagged sample rate.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Reinterpret little-endian 16-bit PCM as a playable buffer.
///
/// Interleaved samples are distributed across `channel_count` channels; a
/// trailing partial frame is dropped.
pub fn bytes_to_audio_buffer(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: usize,
) -> Result<AudioBuffer, CodecError> {
    if channel_count == 0 {
        return Err(CodecError::InvalidChannels);
    }
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }

    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();

    let frame_count = samples.len() / channel_count;
    let mut channels = vec![Vec::with_capacity(frame_count); channel_count];
    for frame in samples.chunks_exact(channel_count) {
        for (channel, &sample) in channels.iter_mut().zip(frame) {
            channel.push(sample as f32 / 32768.0);
        }
    }

    Ok(AudioBuffer {
        sample_rate,
        channels,
    })
}

/// Wrap raw little-endian 16-bit PCM bytes in a WAV container.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>, CodecError> {
    if channels == 0 {
        return Err(CodecError::InvalidChannels);
    }
    if pcm.len() % 2 != 0 {
        return Err(CodecError::OddLength(pcm.len()));
    }

    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len()));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for sample in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
    }
    writer.finalize()?;

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let samples = vec![0.0f32, 0.5, -0.5, 0.999, -1.0, 0.25];
        let frame = encode_outgoing(&samples, 16_000);
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
        let bytes = decode_incoming(&frame.data).unwrap();
        assert_eq!(bytes, float_to_pcm16(&samples));
    }

    #[test]
    fn test_envelope_roundtrip_empty() {
        let frame = encode_outgoing(&[], 16_000);
        assert!(frame.data.is_empty());
        assert!(decode_incoming(&frame.data).unwrap().is_empty());
    }

    #[test]
    fn test_envelope_roundtrip_full_frame() {
        let samples: Vec<f32> = (0..4096).map(|i| ((i as f32) * 0.01).sin()).collect();
        let frame = encode_outgoing(&samples, 16_000);
        let bytes = decode_incoming(&frame.data).unwrap();
        assert_eq!(bytes.len(), 4096 * 2);
        assert_eq!(bytes, float_to_pcm16(&samples));
    }

    #[test]
    fn test_float_to_pcm16_saturates() {
        let bytes = float_to_pcm16(&[1.0, -1.0, 2.0, f32::NAN]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![i16::MAX, i16::MIN, i16::MAX, 0]);
    }

    #[test]
    fn test_decode_incoming_rejects_garbage() {
        assert!(matches!(
            decode_incoming("not base64!!"),
            Err(CodecError::Base64(_))
        ));
    }

    #[test]
    fn test_bytes_to_audio_buffer_mono() {
        let bytes: Vec<u8> = [0i16, 16384, -16384, -32768]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let buffer = bytes_to_audio_buffer(&bytes, 24_000, 1).unwrap();
        assert_eq!(buffer.sample_rate, 24_000);
        assert_eq!(buffer.channel(0).unwrap(), &[0.0, 0.5, -0.5, -1.0]);
        assert_eq!(buffer.frames(), 4);
    }

    #[test]
    fn test_bytes_to_audio_buffer_stereo_deinterleaves() {
        let bytes: Vec<u8> = [100i16, -100, 200, -200, 300]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let buffer = bytes_to_audio_buffer(&bytes, 24_000, 2).unwrap();
        assert_eq!(buffer.channel_count(), 2);
        // Trailing partial frame dropped
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.channel(0).unwrap(), &[100.0 / 32768.0, 200.0 / 32768.0]);
        assert_eq!(buffer.channel(1).unwrap(), &[-100.0 / 32768.0, -200.0 / 32768.0]);
    }

    #[test]
    fn test_bytes_to_audio_buffer_is_deterministic() {
        let bytes: Vec<u8> = (0..2000u32).map(|i| (i * 7 % 251) as u8).collect();
        let a = bytes_to_audio_buffer(&bytes, 24_000, 1).unwrap();
        let b = bytes_to_audio_buffer(&bytes, 24_000, 1).unwrap();
        let a_bits: Vec<u32> = a.channels[0].iter().map(|s| s.to_bits()).collect();
        let b_bits: Vec<u32> = b.channels[0].iter().map(|s| s.to_bits()).collect();
        assert_eq!(a_bits, b_bits);
    }

    #[test]
    fn test_bytes_to_audio_buffer_errors() {
        assert!(matches!(
            bytes_to_audio_buffer(&[1, 2, 3], 24_000, 1),
            Err(CodecError::OddLength(3))
        ));
        assert!(matches!(
            bytes_to_audio_buffer(&[1, 2], 24_000, 0),
            Err(CodecError::InvalidChannels)
        ));
    }

    #[test]
    fn test_duration_at_tagged_rate() {
        let bytes = vec![0u8; 24_000 * 2];
        let buffer = bytes_to_audio_buffer(&bytes, 24_000, 1).unwrap();
        assert!((buffer.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pcm_to_wav_header() {
        let pcm = float_to_pcm16(&[0.0, 0.5, -0.5, 1.0]);
        let wav = pcm_to_wav(&pcm, 24_000, 1).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 24_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        let expected: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, expected);
    }

    #[test]
    fn test_pcm_to_wav_rejects_bad_input() {
        assert!(matches!(
            pcm_to_wav(&[0, 0, 0], 24_000, 1),
            Err(CodecError::OddLength(3))
        ));
        assert!(matches!(
            pcm_to_wav(&[0, 0], 24_000, 0),
            Err(CodecError::InvalidChannels)
        ));
    }
}
