//! Artifact publishing: container wrapping, duration measurement, blob upload.
//!
//! Media is only published when its true length can be determined, so a
//! ledger row with a `media_url` always carries a measured duration.

use std::io::Cursor;
use std::sync::Arc;

use chrono::Utc;
use notecast_blob::BlobStore;
use notecast_providers::{PcmFormat, RenderedMedia};
use notecast_shared::{JobId, NotecastError, Result};
use tracing::{info, instrument, warn};

/// Media ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub extension: &'static str,
    pub duration_secs: f64,
}

/// Where published media ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMedia {
    pub object_name: String,
    pub url: String,
    pub mime_type: String,
    pub duration_seconds: u32,
    pub size_bytes: usize,
}

/// Result of a publish attempt. Failure is never fatal to the job.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published(PublishedMedia),
    Failed(String),
}

/// Uploads finished media to a [`BlobStore`].
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn BlobStore>,
}

impl Publisher {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    #[instrument(skip_all, fields(job_id = %job_id, mime = %media.mime_type, backend = self.store.backend_name()))]
    pub async fn publish(
        &self,
        notebook_id: &str,
        job_id: &JobId,
        media: RenderedMedia,
    ) -> PublishOutcome {
        let prepared = match prepare_media(media) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "media not publishable");
                return PublishOutcome::Failed(e.to_string());
            }
        };

        let name = object_name(notebook_id, job_id, prepared.extension);
        let size_bytes = prepared.bytes.len();
        // sub-second media still has a length
        let duration_seconds = prepared.duration_secs.round().max(1.0) as u32;

        match self
            .store
            .put(&name, prepared.bytes, &prepared.mime_type)
            .await
        {
            Ok(url) => {
                info!(object = %name, size_bytes, duration_seconds, "media published");
                PublishOutcome::Published(PublishedMedia {
                    object_name: name,
                    url,
                    mime_type: prepared.mime_type,
                    duration_seconds,
                    size_bytes,
                })
            }
            Err(e) => {
                warn!(object = %name, error = %e, "upload failed");
                PublishOutcome::Failed(e.to_string())
            }
        }
    }
}

/// `{notebook_id}/{job_id}-{unix_millis}.{ext}`
pub fn object_name(notebook_id: &str, job_id: &JobId, extension: &str) -> String {
    format!(
        "{notebook_id}/{job_id}-{}.{extension}",
        Utc::now().timestamp_millis()
    )
}

/// Wrap raw PCM in WAV and measure the media's duration.
///
/// Fails when the media is empty or its length cannot be determined.
pub fn prepare_media(media: RenderedMedia) -> Result<PreparedMedia> {
    if media.bytes.is_empty() {
        return Err(NotecastError::Media("media is empty".into()));
    }

    if let Some(format) = PcmFormat::from_mime(&media.mime_type) {
        let frames = media.bytes.len() / format.bytes_per_frame().max(1);
        if frames == 0 {
            return Err(NotecastError::Media(format!(
                "{} bytes of PCM is less than one frame",
                media.bytes.len()
            )));
        }
        let bytes = pcm_to_wav(&media.bytes, format)?;
        return Ok(PreparedMedia {
            bytes,
            mime_type: "audio/wav".into(),
            extension: "wav",
            duration_secs: frames as f64 / f64::from(format.sample_rate),
        });
    }

    let essence = media
        .mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let (extension, measured) = match essence.as_str() {
        "audio/wav" | "audio/x-wav" | "audio/wave" => ("wav", wav_duration_secs(&media.bytes)),
        "video/mp4" | "audio/mp4" | "video/quicktime" => ("mp4", mp4_duration_secs(&media.bytes)),
        "audio/mpeg" => ("mp3", None),
        "video/webm" | "audio/webm" => ("webm", None),
        "audio/ogg" => ("ogg", None),
        _ => ("bin", None),
    };

    let duration_secs = measured
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| {
            NotecastError::Media(format!(
                "cannot determine duration of {} media",
                media.mime_type
            ))
        })?;

    Ok(PreparedMedia {
        bytes: media.bytes,
        mime_type: essence,
        extension,
        duration_secs,
    })
}

// ---------------------------------------------------------------------------
// WAV
// ---------------------------------------------------------------------------

/// Encode little-endian signed PCM as a WAV file. Trailing partial frames are dropped.
fn pcm_to_wav(pcm: &[u8], format: PcmFormat) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };
    let media_err = |e: hound::Error| NotecastError::Media(format!("WAV encoding failed: {e}"));

    let whole = pcm.len() - pcm.len() % format.bytes_per_frame().max(1);
    let pcm = &pcm[..whole];

    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(media_err)?;
        match format.bits_per_sample {
            8 => {
                // L8 is offset binary; hound wants signed samples
                for &b in pcm {
                    writer
                        .write_sample((i16::from(b) - 128) as i8)
                        .map_err(media_err)?;
                }
            }
            16 => {
                for chunk in pcm.chunks_exact(2) {
                    writer
                        .write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))
                        .map_err(media_err)?;
                }
            }
            24 => {
                for chunk in pcm.chunks_exact(3) {
                    // sign-extend via the high byte
                    let sample = i32::from_le_bytes([0, chunk[0], chunk[1], chunk[2]]) >> 8;
                    writer.write_sample(sample).map_err(media_err)?;
                }
            }
            other => {
                return Err(NotecastError::Media(format!(
                    "unsupported PCM depth: {other} bits"
                )));
            }
        }
        writer.finalize().map_err(media_err)?;
    }
    Ok(cursor.into_inner())
}

/// Duration from a WAV header, if it parses.
fn wav_duration_secs(bytes: &[u8]) -> Option<f64> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
    let rate = reader.spec().sample_rate;
    (rate > 0).then(|| f64::from(reader.duration()) / f64::from(rate))
}

// ---------------------------------------------------------------------------
// MP4
// ---------------------------------------------------------------------------

/// Duration from the `moov/mvhd` box of an ISO-BMFF file.
fn mp4_duration_secs(bytes: &[u8]) -> Option<f64> {
    let moov = find_box(bytes, b"moov")?;
    let mvhd = find_box(moov, b"mvhd")?;

    let (timescale, duration) = match *mvhd.first()? {
        1 => (read_u32(mvhd, 20)?, read_u64(mvhd, 24)?),
        _ => {
            let duration = read_u32(mvhd, 16)?;
            if duration == u32::MAX {
                return None;
            }
            (read_u32(mvhd, 12)?, u64::from(duration))
        }
    };

    if timescale == 0 || duration == 0 || duration == u64::MAX {
        return None;
    }
    Some(duration as f64 / f64::from(timescale))
}

/// Payload of the first box of type `kind` among the siblings in `data`.
fn find_box<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    let mut offset = 0usize;
    while offset + 8 <= data.len() {
        let size32 = read_u32(data, offset)?;
        let box_type = &data[offset + 4..offset + 8];

        let (header, size) = match size32 {
            0 => (8, data.len() - offset),
            1 => (16, usize::try_from(read_u64(data, offset + 8)?).ok()?),
            n => (8, n as usize),
        };
        if size < header || offset.checked_add(size)? > data.len() {
            return None;
        }
        if box_type == kind {
            return Some(&data[offset + header..offset + size]);
        }
        offset += size;
    }
    None
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    let b = data.get(at..at.checked_add(4)?)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    let b = data.get(at..at.checked_add(8)?)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(b);
    Some(u64::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBlobStore, mp4_with_duration, pcm_silence};

    fn media(bytes: Vec<u8>, mime: &str) -> RenderedMedia {
        RenderedMedia {
            bytes,
            mime_type: mime.into(),
        }
    }

    #[test]
    fn ten_seconds_of_pcm_becomes_wav() {
        let pcm = pcm_silence(10);
        assert_eq!(pcm.len(), 480_000);
        let prepared =
            prepare_media(media(pcm, "audio/L16; rate=24000; channels=1")).unwrap();

        assert_eq!(prepared.mime_type, "audio/wav");
        assert_eq!(prepared.extension, "wav");
        assert!((prepared.duration_secs - 10.0).abs() < 1e-9);
        assert_eq!(&prepared.bytes[..4], b"RIFF");
        // re-measuring the container agrees with the sample count
        assert!((wav_duration_secs(&prepared.bytes).unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn pcm_depths_and_channels() {
        let stereo_24 = vec![0u8; 48_000 * 2 * 3];
        let prepared =
            prepare_media(media(stereo_24, "audio/L24; rate=48000; channels=2")).unwrap();
        assert!((prepared.duration_secs - 1.0).abs() < 1e-9);
        let reader = hound::WavReader::new(Cursor::new(&prepared.bytes)).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 24);
        assert_eq!(reader.spec().channels, 2);

        let mono_8 = vec![128u8; 8_000];
        let prepared = prepare_media(media(mono_8, "audio/L8; rate=8000")).unwrap();
        assert!((prepared.duration_secs - 1.0).abs() < 1e-9);
    }

    #[test]
    fn mp4_duration_from_mvhd() {
        let v0 = mp4_with_duration(0, 1000, 8_000);
        assert!((mp4_duration_secs(&v0).unwrap() - 8.0).abs() < 1e-9);

        let v1 = mp4_with_duration(1, 600, 3_600);
        assert!((mp4_duration_secs(&v1).unwrap() - 6.0).abs() < 1e-9);

        let prepared = prepare_media(media(v0, "video/mp4")).unwrap();
        assert_eq!(prepared.extension, "mp4");
        assert_eq!(prepared.duration_secs.round() as u32, 8);
    }

    #[test]
    fn truncated_mp4_is_unmeasurable() {
        let mut bytes = mp4_with_duration(0, 1000, 8_000);
        bytes.truncate(20);
        assert!(mp4_duration_secs(&bytes).is_none());
        let err = prepare_media(media(bytes, "video/mp4")).unwrap_err();
        assert!(err.to_string().contains("cannot determine duration"));
    }

    #[test]
    fn opaque_formats_are_unmeasurable() {
        for mime in ["audio/mpeg", "video/webm", "audio/ogg"] {
            let err = prepare_media(media(vec![1, 2, 3], mime)).unwrap_err();
            assert!(err.to_string().contains("cannot determine duration"), "{mime}");
        }
    }

    #[test]
    fn empty_media_is_rejected() {
        assert!(prepare_media(media(vec![], "video/mp4")).is_err());
    }

    #[test]
    fn partial_pcm_frame_is_rejected() {
        let err = prepare_media(media(vec![0u8; 1], "audio/L16; rate=24000; channels=1"))
            .unwrap_err();
        assert!(matches!(err, NotecastError::Media(_)));
        assert!(err.to_string().contains("less than one frame"));
    }

    #[test]
    fn object_name_layout() {
        let job_id = JobId::new();
        let name = object_name("nb-1", &job_id, "wav");
        let prefix = format!("nb-1/{job_id}-");
        assert!(name.starts_with(&prefix));
        let millis = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".wav"))
            .unwrap();
        assert!(millis.parse::<i64>().unwrap() > 1_600_000_000_000);
    }

    #[tokio::test]
    async fn publish_uploads_and_reports_url() {
        let store = Arc::new(FakeBlobStore::default());
        let publisher = Publisher::new(store.clone());
        let job_id = JobId::new();

        let outcome = publisher
            .publish(
                "nb-1",
                &job_id,
                media(pcm_silence(10), "audio/L16; rate=24000; channels=1"),
            )
            .await;

        let PublishOutcome::Published(published) = outcome else {
            panic!("expected Published");
        };
        assert_eq!(published.duration_seconds, 10);
        assert_eq!(published.mime_type, "audio/wav");
        assert!(published.url.starts_with("mem://nb-1/"));
        assert_eq!(store.object_names(), vec![published.object_name.clone()]);
    }

    #[tokio::test]
    async fn single_frame_publishes_as_one_second() {
        let publisher = Publisher::new(Arc::new(FakeBlobStore::default()));
        let outcome = publisher
            .publish(
                "nb-1",
                &JobId::new(),
                media(vec![0u8; 2], "audio/L16; rate=24000; channels=1"),
            )
            .await;
        let PublishOutcome::Published(published) = outcome else {
            panic!("expected Published");
        };
        assert_eq!(published.duration_seconds, 1);
    }

    #[tokio::test]
    async fn upload_failure_is_an_outcome() {
        let store = Arc::new(FakeBlobStore::failing());
        let publisher = Publisher::new(store);
        let outcome = publisher
            .publish("nb-1", &JobId::new(), media(mp4_with_duration(0, 1000, 5_000), "video/mp4"))
            .await;
        assert!(matches!(outcome, PublishOutcome::Failed(_)));
    }
}
