//! Content-addressed persistence of feature timelines.
//!
//! An artifact is a deflate-compressed zip archive holding `meta.json` plus
//! one little-endian `f32` entry per array, so every field is recoverable
//! bit-for-bit. A missing or unreadable artifact is always treated as a miss.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::features::{AnalysisStrategy, ContentMode, FeatureMatrix, FeatureTimeline};

const FORMAT_VERSION: u32 = 1;
const META_ENTRY: &str = "meta.json";
const ARTIFACT_SUFFIX: &str = ".features.zip";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("cache metadata: {0}")]
    Meta(#[from] serde_json::Error),
    #[error("cache entry '{name}' has {found} values, expected {expected}")]
    Shape {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("cache format version {0} is not supported")]
    Version(u32),
}

/// Name of a persisted timeline, derived from file size, modification time
/// and target fps.
///
/// Two different files with identical size and mtime collide; hashing the
/// content would fix that at the cost of reading the whole file.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_file(path: &Path, fps: u32) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        let mtime = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(Self::from_parts(meta.len(), mtime, fps))
    }

    pub fn from_parts(size: u64, mtime_nanos: u128, fps: u32) -> Self {
        let digest = Sha256::digest(format!("{size}_{mtime_nanos}_{fps}").as_bytes());
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    version: u32,
    duration: f64,
    sample_rate: u32,
    fps: u32,
    frames: usize,
    tempo: f32,
    key: Option<String>,
    mode: ContentMode,
    strategy: AnalysisStrategy,
    tone_rows: usize,
    timbre_rows: usize,
    tempogram_rows: usize,
}

/// Directory of cached timelines. No locking: concurrent writers race, the
/// last rename wins, and a torn read is reported as an error the caller
/// treats as a miss.
#[derive(Clone, Debug)]
pub struct FeatureStore {
    dir: PathBuf,
}

impl FeatureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<cache_dir>/vizcast/features`, or `.cache/audio_features` when the
    /// platform has no cache directory.
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .map(|d| d.join("vizcast").join("features"))
            .unwrap_or_else(|| PathBuf::from(".cache/audio_features"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}{}", key.as_str(), ARTIFACT_SUFFIX))
    }

    /// `Ok(None)` when no artifact exists for `key`.
    pub fn load(&self, key: &CacheKey) -> Result<Option<FeatureTimeline>, CacheError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(&path)?;
        read_timeline(BufReader::new(file)).map(Some)
    }

    /// Write the artifact to a temporary sibling and rename it into place.
    pub fn store(&self, key: &CacheKey, timeline: &FeatureTimeline) -> Result<PathBuf, CacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        let tmp = write_timeline(tmp, timeline)?;
        tmp.persist(&path).map_err(|e| CacheError::Io(e.error))?;
        log::info!("[cache] features saved: {}", path.display());
        Ok(path)
    }

    /// Remove the artifact for `key`. Returns whether one existed.
    pub fn invalidate(&self, key: &CacheKey) -> std::io::Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete every artifact, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut deleted = 0;
        for path in self.artifacts() {
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => log::warn!("could not delete cache file {}: {}", path.display(), e),
            }
        }
        log::info!("[cache] cleared {} artifacts", deleted);
        deleted
    }

    /// Total bytes used by artifacts.
    pub fn size_bytes(&self) -> u64 {
        self.artifacts()
            .iter()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }

    fn artifacts(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(ARTIFACT_SUFFIX))
            })
            .collect()
    }
}

fn write_timeline<W: Write + Seek>(out: W, t: &FeatureTimeline) -> Result<W, CacheError> {
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(out);

    let meta = Meta {
        version: FORMAT_VERSION,
        duration: t.duration,
        sample_rate: t.sample_rate,
        fps: t.fps,
        frames: t.frame_count(),
        tempo: t.tempo,
        key: t.key.clone(),
        mode: t.mode,
        strategy: t.strategy,
        tone_rows: t.tone_profile.rows(),
        timbre_rows: t.timbre.rows(),
        tempogram_rows: t.tempogram.rows(),
    };
    zip.start_file(META_ENTRY, options)?;
    zip.write_all(&serde_json::to_vec_pretty(&meta)?)?;

    let arrays: [(&str, &[f32]); 8] = [
        ("loudness", &t.loudness),
        ("onset_strength", &t.onset_strength),
        ("spectral_centroid", &t.spectral_centroid),
        ("spectral_rolloff", &t.spectral_rolloff),
        ("zero_crossing_rate", &t.zero_crossing_rate),
        ("tone_profile", t.tone_profile.as_slice()),
        ("timbre", t.timbre.as_slice()),
        ("tempogram", t.tempogram.as_slice()),
    ];
    for (name, values) in arrays {
        zip.start_file(format!("{name}.f32"), options)?;
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        zip.write_all(&bytes)?;
    }

    Ok(zip.finish()?)
}

fn read_timeline<R: Read + Seek>(input: R) -> Result<FeatureTimeline, CacheError> {
    let mut zip = ZipArchive::new(input)?;
    let meta: Meta = serde_json::from_slice(&read_entry(&mut zip, META_ENTRY)?)?;
    if meta.version != FORMAT_VERSION {
        return Err(CacheError::Version(meta.version));
    }
    let n = meta.frames;

    let mut series = |name: &'static str| -> Result<Vec<f32>, CacheError> {
        read_array(&mut zip, name, n)
    };
    let loudness = series("loudness")?;
    let onset_strength = series("onset_strength")?;
    let spectral_centroid = series("spectral_centroid")?;
    let spectral_rolloff = series("spectral_rolloff")?;
    let zero_crossing_rate = series("zero_crossing_rate")?;

    let mut matrix = |name: &'static str, rows: usize| -> Result<FeatureMatrix, CacheError> {
        let data = read_array(&mut zip, name, rows * n)?;
        FeatureMatrix::from_raw(rows, n, data).ok_or(CacheError::Shape {
            name,
            expected: rows * n,
            found: 0,
        })
    };
    let tone_profile = matrix("tone_profile", meta.tone_rows)?;
    let timbre = matrix("timbre", meta.timbre_rows)?;
    let tempogram = matrix("tempogram", meta.tempogram_rows)?;

    Ok(FeatureTimeline {
        duration: meta.duration,
        sample_rate: meta.sample_rate,
        fps: meta.fps,
        loudness,
        onset_strength,
        spectral_centroid,
        spectral_rolloff,
        zero_crossing_rate,
        tone_profile,
        timbre,
        tempogram,
        tempo: meta.tempo,
        key: meta.key,
        mode: meta.mode,
        strategy: meta.strategy,
    })
}

fn read_entry<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>, CacheError> {
    let mut entry = zip.by_name(name)?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

fn read_array<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    name: &'static str,
    expected: usize,
) -> Result<Vec<f32>, CacheError> {
    let bytes = read_entry(zip, &format!("{name}.f32"))?;
    if bytes.len() != expected * 4 {
        return Err(CacheError::Shape {
            name,
            expected,
            found: bytes.len() / 4,
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
