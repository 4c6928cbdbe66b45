//! Compressed clip to canonical WAV conversion
//!
//! Uses symphonia for format-agnostic decoding and hound to write 16-bit
//! signed little-endian PCM. Sample rate and channel layout are kept.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("unsupported audio format: {0}")]
    Probe(#[source] SymphoniaError),

    #[error("no decodable audio track")]
    NoTrack,

    #[error("decode failed: {0}")]
    Decode(#[source] SymphoniaError),

    #[error("clip contains no audio")]
    Empty,

    #[error("wav encode failed: {0}")]
    Encode(#[from] hound::Error),
}

/// Re-encode `clip` as a 16-bit PCM WAV.
///
/// `extension` is a container hint such as `"webm"` or `"mp3"`. A clip that
/// is already 16-bit integer WAV is returned unchanged.
pub fn transcode_to_wav(clip: &[u8], extension: Option<&str>) -> Result<Vec<u8>, TranscodeError> {
    if is_canonical_wav(clip) {
        debug!(bytes = clip.len(), "clip already canonical wav");
        return Ok(clip.to_vec());
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(clip.to_vec())), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(TranscodeError::Probe)?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(TranscodeError::NoTrack)?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(TranscodeError::Decode)?;

    let mut samples: Vec<i16> = Vec::new();
    let mut layout: Option<(u16, u32)> = None;
    let mut sample_buf: Option<SampleBuffer<i16>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(TranscodeError::Decode(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(TranscodeError::Decode(e)),
        };

        let spec = *decoded.spec();
        let frames = decoded.capacity();
        layout.get_or_insert((spec.channels.count() as u16, spec.rate));

        let sbuf = sample_buf.get_or_insert_with(|| SampleBuffer::<i16>::new(frames as u64, spec));
        if sbuf.capacity() < frames {
            *sbuf = SampleBuffer::<i16>::new(frames as u64, spec);
        }
        sbuf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sbuf.samples());
    }

    let (channels, sample_rate) = layout.ok_or(TranscodeError::Empty)?;
    debug!(channels, sample_rate, samples = samples.len(), "clip decoded");
    encode_wav(&samples, channels, sample_rate)
}

fn encode_wav(samples: &[i16], channels: u16, sample_rate: u32) -> Result<Vec<u8>, TranscodeError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut out = Vec::with_capacity(44 + samples.len() * 2);
    let mut writer = hound::WavWriter::new(Cursor::new(&mut out), spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(out)
}

fn is_canonical_wav(clip: &[u8]) -> bool {
    match hound::WavReader::new(Cursor::new(clip)) {
        Ok(reader) => {
            let spec = reader.spec();
            spec.bits_per_sample == 16 && spec.sample_format == hound::SampleFormat::Int
        }
        Err(_) => false,
    }
}
