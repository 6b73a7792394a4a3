//! # Audio Decoding and Validation
//!
//! Turns client payloads into the 16 kHz mono `i16` samples every recognition engine
//! consumes. Nothing here touches an engine: a payload that fails to decode is
//! reported as `MalformedInput` before any engine is attempted.
//!
//! ## Supported Inputs:
//! - **Streaming**: raw 16-bit little-endian PCM bytes (WebSocket binary frames)
//! - **Single-shot**: a RIFF/WAVE container holding 16-bit PCM, mono, 16 kHz

use crate::error::AppError;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Sample rate every engine expects.
pub const SAMPLE_RATE: u32 = 16000;

/// Decode raw PCM16LE bytes into samples.
///
/// ## Validation Checks:
/// 1. **Non-empty**: there must be at least one sample
/// 2. **Even length**: every sample is exactly two bytes
///
/// ## Rust Concepts:
/// - **Cursor**: reads from a byte slice as if it were a file
/// - **ReadBytesExt**: byteorder's extension trait adding `read_i16::<LittleEndian>()`
pub fn decode_pcm16le(data: &[u8]) -> Result<Vec<i16>, AppError> {
    if data.is_empty() {
        return Err(AppError::MalformedInput("audio payload is empty".to_string()));
    }

    if data.len() % 2 != 0 {
        return Err(AppError::MalformedInput(format!(
            "PCM16 payload has an odd number of bytes ({})",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }

    Ok(samples)
}

/// Decode a WAV file into samples, enforcing the 16-bit / mono / 16 kHz contract.
///
/// ## Returns:
/// - **Ok(Vec<i16>)**: interleaving is not a concern since only mono is accepted
/// - **Err(MalformedInput)**: not RIFF/WAVE, wrong format, or no samples at all
pub fn decode_wav(data: &[u8]) -> Result<Vec<i16>, AppError> {
    if data.is_empty() {
        return Err(AppError::MalformedInput("audio payload is empty".to_string()));
    }

    let mut cursor = Cursor::new(data);
    let (header, body) = wav::read(&mut cursor)
        .map_err(|e| AppError::MalformedInput(format!("not a readable WAV file: {}", e)))?;

    if header.channel_count != 1 {
        return Err(AppError::MalformedInput(format!(
            "expected mono audio, got {} channels",
            header.channel_count
        )));
    }

    if header.sampling_rate != SAMPLE_RATE {
        return Err(AppError::MalformedInput(format!(
            "expected {} Hz audio, got {} Hz",
            SAMPLE_RATE, header.sampling_rate
        )));
    }

    let samples = match body {
        wav::BitDepth::Sixteen(samples) => samples,
        _ => {
            return Err(AppError::MalformedInput(format!(
                "expected 16-bit PCM, got {} bits per sample",
                header.bits_per_sample
            )))
        }
    };

    if samples.is_empty() {
        return Err(AppError::MalformedInput("WAV file contains no samples".to_string()));
    }

    Ok(samples)
}

/// Scale `i16` samples to `f32` in [-1.0, 1.0), the range Whisper's feature extractor expects.
pub fn samples_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Encode samples as a minimal 16 kHz mono PCM16 WAV file.
#[cfg(test)]
pub fn encode_wav(samples: &[i16]) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, 1, SAMPLE_RATE, 16);
    wav::write(header, &wav::BitDepth::Sixteen(samples.to_vec()), &mut out)
        .expect("in-memory WAV write");
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pcm16le() {
        let samples = decode_pcm16le(&[0x01, 0x00, 0xff, 0xff, 0x00, 0x80]).unwrap();
        assert_eq!(samples, vec![1, -1, i16::MIN]);
    }

    #[test]
    fn test_decode_pcm16le_rejects_bad_lengths() {
        assert!(matches!(decode_pcm16le(&[]), Err(AppError::MalformedInput(_))));
        assert!(matches!(decode_pcm16le(&[0, 0, 0]), Err(AppError::MalformedInput(_))));
    }

    #[test]
    fn test_decode_wav_round_trip() {
        let samples: Vec<i16> = (0..1600).map(|i| (i * 7 % 300) as i16 - 150).collect();
        let decoded = decode_wav(&encode_wav(&samples)).unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_decode_wav_rejects_garbage() {
        let err = decode_wav(b"definitely not a wave file").unwrap_err();
        assert_eq!(err.kind(), "malformed_input");
    }

    #[test]
    fn test_decode_wav_rejects_wrong_rate() {
        let mut out = Cursor::new(Vec::new());
        let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, 1, 44100, 16);
        wav::write(header, &wav::BitDepth::Sixteen(vec![0; 441]), &mut out).unwrap();

        let err = decode_wav(&out.into_inner()).unwrap_err();
        assert!(err.detail().contains("44100"));
    }

    #[test]
    fn test_decode_wav_rejects_stereo() {
        let mut out = Cursor::new(Vec::new());
        let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, 2, SAMPLE_RATE, 16);
        wav::write(header, &wav::BitDepth::Sixteen(vec![0; 320]), &mut out).unwrap();

        assert!(decode_wav(&out.into_inner()).is_err());
    }

    #[test]
    fn test_samples_to_f32_range() {
        let scaled = samples_to_f32(&[i16::MIN, 0, i16::MAX]);
        assert_eq!(scaled[0], -1.0);
        assert_eq!(scaled[1], 0.0);
        assert!(scaled[2] < 1.0 && scaled[2] > 0.99);
    }
}
