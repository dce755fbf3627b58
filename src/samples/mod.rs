//! Reference ("QA") sample storage.
//!
//! Each sample lives in its own directory under the samples root:
//!
//! ```text
//! sample_20260301_142233_Main_Board/
//!     front.jpg
//!     back.jpg
//!     metadata.json
//! ```
//!
//! The metadata file is the source of truth; a directory without it, or
//! with an image missing, is not a usable sample.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const METADATA_FILE: &str = "metadata.json";
const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("Invalid board name '{0}': must be non-empty and must not contain path separators")]
    InvalidName(String),

    #[error("Sample not found: {0}")]
    NotFound(String),

    #[error("Image not found: {0:?}")]
    MissingImage(PathBuf),

    #[error("Failed to read image {path:?}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("Invalid metadata in {path:?}: {source}")]
    Metadata {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SampleError + '_ {
    move |source| SampleError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Which face of the board an image shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardSide {
    #[default]
    Front,
    Back,
}

impl BoardSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoardSide::Front => "front",
            BoardSide::Back => "back",
        }
    }

    fn file_name(&self) -> &'static str {
        match self {
            BoardSide::Front => "front.jpg",
            BoardSide::Back => "back.jpg",
        }
    }
}

impl std::str::FromStr for BoardSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "front" => Ok(BoardSide::Front),
            "back" => Ok(BoardSide::Back),
            other => Err(format!("Unknown board side '{}'. Expected front or back", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePaths {
    pub front: PathBuf,
    pub back: PathBuf,
}

/// A stored reference sample.
///
/// On disk `image_paths` are relative to the sample directory; samples
/// returned by [`SampleStore`] carry absolute paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaSample {
    pub sample_id: String,
    pub board_name: String,
    pub created_date: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Local>>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub image_paths: ImagePaths,
    pub version: String,
}

impl QaSample {
    pub fn image_path(&self, side: BoardSide) -> &Path {
        match side {
            BoardSide::Front => &self.image_paths.front,
            BoardSide::Back => &self.image_paths.back,
        }
    }
}

/// Metadata fields that may change after creation. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct SampleUpdate {
    pub board_name: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Directory-backed sample store.
pub struct SampleStore {
    root: PathBuf,
}

impl SampleStore {
    /// Open the store at `root`, creating the directory if needed.
    pub fn new(root: &Path) -> Result<Self, SampleError> {
        std::fs::create_dir_all(root).map_err(io_err(root))?;
        debug!("Sample store at {:?}", root);
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a sample from two image files.
    ///
    /// JPEG inputs are copied as-is after checking they decode; other formats
    /// are converted to JPEG.
    pub fn create_sample(
        &self,
        board_name: &str,
        front: &Path,
        back: &Path,
        notes: &str,
        tags: &[String],
    ) -> Result<QaSample, SampleError> {
        for path in [front, back] {
            if !path.exists() {
                return Err(SampleError::MissingImage(path.to_path_buf()));
            }
        }
        self.create_with(Local::now(), board_name, notes, tags, |dir| {
            import_image(front, &dir.join(BoardSide::Front.file_name()))?;
            import_image(back, &dir.join(BoardSide::Back.file_name()))
        })
    }

    /// Create a sample from images already in memory (e.g. fresh captures).
    pub fn create_sample_from_images(
        &self,
        board_name: &str,
        front: &RgbImage,
        back: &RgbImage,
        notes: &str,
        tags: &[String],
    ) -> Result<QaSample, SampleError> {
        self.create_with(Local::now(), board_name, notes, tags, |dir| {
            write_jpeg(front, &dir.join(BoardSide::Front.file_name()))?;
            write_jpeg(back, &dir.join(BoardSide::Back.file_name()))
        })
    }

    fn create_with(
        &self,
        now: DateTime<Local>,
        board_name: &str,
        notes: &str,
        tags: &[String],
        write_images: impl FnOnce(&Path) -> Result<(), SampleError>,
    ) -> Result<QaSample, SampleError> {
        let slug = board_slug(board_name)?;
        let base_id = format!("sample_{}_{}", now.format("%Y%m%d_%H%M%S"), slug);

        let mut sample_id = base_id.clone();
        let mut suffix = 2;
        while self.root.join(&sample_id).exists() {
            sample_id = format!("{}_{}", base_id, suffix);
            suffix += 1;
        }
        let dir = self.root.join(&sample_id);
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        if let Err(e) = write_images(&dir) {
            let _ = std::fs::remove_dir_all(&dir);
            return Err(e);
        }

        let sample = QaSample {
            sample_id: sample_id.clone(),
            board_name: board_name.trim().to_string(),
            created_date: now,
            last_modified: None,
            notes: notes.to_string(),
            tags: tags.to_vec(),
            image_paths: ImagePaths {
                front: PathBuf::from(BoardSide::Front.file_name()),
                back: PathBuf::from(BoardSide::Back.file_name()),
            },
            version: FORMAT_VERSION.to_string(),
        };
        write_metadata(&sample, &dir)?;

        info!("Created QA sample: {}", sample_id);
        Ok(self.resolved(sample, &dir))
    }

    /// Load a sample. `None` if it does not exist or its images are missing.
    pub fn get_sample(&self, sample_id: &str) -> Result<Option<QaSample>, SampleError> {
        let Some(dir) = self.sample_dir(sample_id) else {
            return Ok(None);
        };
        let metadata_path = dir.join(METADATA_FILE);
        if !metadata_path.exists() {
            warn!("Metadata not found for sample: {}", sample_id);
            return Ok(None);
        }

        let sample = self.resolved(read_metadata(&metadata_path)?, &dir);
        for side in [BoardSide::Front, BoardSide::Back] {
            if !sample.image_path(side).exists() {
                warn!("{} image missing for sample: {}", side.as_str(), sample_id);
                return Ok(None);
            }
        }
        Ok(Some(sample))
    }

    /// Every sample with readable metadata, newest first.
    pub fn list_samples(&self) -> Result<Vec<QaSample>, SampleError> {
        let mut samples = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
        {
            let metadata_path = entry.path().join(METADATA_FILE);
            if !metadata_path.exists() {
                continue;
            }
            match read_metadata(&metadata_path) {
                Ok(sample) => samples.push(self.resolved(sample, entry.path())),
                Err(e) => warn!("Skipping sample {:?}: {}", entry.path(), e),
            }
        }

        samples.sort_by(|a, b| b.created_date.cmp(&a.created_date));
        Ok(samples)
    }

    /// Remove a sample directory. Returns `false` if there was nothing to remove.
    pub fn delete_sample(&self, sample_id: &str) -> Result<bool, SampleError> {
        let Some(dir) = self.sample_dir(sample_id) else {
            return Ok(false);
        };
        if !dir.exists() {
            warn!("QA sample not found: {}", sample_id);
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir).map_err(io_err(&dir))?;
        info!("Deleted QA sample: {}", sample_id);
        Ok(true)
    }

    /// Change name, notes or tags and stamp `last_modified`.
    pub fn update_sample(
        &self,
        sample_id: &str,
        update: SampleUpdate,
    ) -> Result<QaSample, SampleError> {
        let dir = self
            .sample_dir(sample_id)
            .filter(|d| d.join(METADATA_FILE).exists())
            .ok_or_else(|| SampleError::NotFound(sample_id.to_string()))?;

        let mut sample = read_metadata(&dir.join(METADATA_FILE))?;
        if let Some(name) = update.board_name {
            board_slug(&name)?;
            sample.board_name = name.trim().to_string();
        }
        if let Some(notes) = update.notes {
            sample.notes = notes;
        }
        if let Some(tags) = update.tags {
            sample.tags = tags;
        }
        sample.last_modified = Some(Local::now());

        write_metadata(&sample, &dir)?;
        info!("Updated QA sample: {}", sample_id);
        Ok(self.resolved(sample, &dir))
    }

    /// Absolute (front, back) image paths, if the sample is usable.
    pub fn sample_images(&self, sample_id: &str) -> Result<Option<(PathBuf, PathBuf)>, SampleError> {
        Ok(self
            .get_sample(sample_id)?
            .map(|s| (s.image_paths.front, s.image_paths.back)))
    }

    /// Decode one side of a sample.
    pub fn load_image(&self, sample_id: &str, side: BoardSide) -> Result<RgbImage, SampleError> {
        let sample = self
            .get_sample(sample_id)?
            .ok_or_else(|| SampleError::NotFound(sample_id.to_string()))?;
        let path = sample.image_path(side);
        image::open(path)
            .map(|img| img.to_rgb8())
            .map_err(|source| SampleError::Image {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Check the sample exists and both images decode.
    pub fn validate_sample(&self, sample_id: &str) -> bool {
        let sample = match self.get_sample(sample_id) {
            Ok(Some(s)) => s,
            Ok(None) => return false,
            Err(e) => {
                warn!("Failed to validate QA sample {}: {}", sample_id, e);
                return false;
            }
        };
        [BoardSide::Front, BoardSide::Back].iter().all(|side| {
            let path = sample.image_path(*side);
            match image::open(path) {
                Ok(_) => true,
                Err(e) => {
                    warn!("Unreadable {} image {:?}: {}", side.as_str(), path, e);
                    false
                }
            }
        })
    }

    /// Most recent sample whose board name matches (case-insensitive).
    pub fn find_by_board(&self, board_name: &str) -> Result<Option<QaSample>, SampleError> {
        let wanted = board_name.trim();
        Ok(self
            .list_samples()?
            .into_iter()
            .find(|s| s.board_name.eq_ignore_ascii_case(wanted)))
    }

    /// Directory for `sample_id`, or `None` if the id could escape the root.
    fn sample_dir(&self, sample_id: &str) -> Option<PathBuf> {
        let valid = !sample_id.is_empty()
            && sample_id != "."
            && sample_id != ".."
            && !sample_id.contains(['/', '\\']);
        valid.then(|| self.root.join(sample_id))
    }

    fn resolved(&self, mut sample: QaSample, dir: &Path) -> QaSample {
        sample.image_paths.front = dir.join(&sample.image_paths.front);
        sample.image_paths.back = dir.join(&sample.image_paths.back);
        sample
    }
}

/// Board name as used in sample ids: trimmed, spaces become underscores.
fn board_slug(board_name: &str) -> Result<String, SampleError> {
    let trimmed = board_name.trim();
    if trimmed.is_empty() || trimmed.contains(['/', '\\']) || trimmed.contains("..") {
        return Err(SampleError::InvalidName(board_name.to_string()));
    }
    Ok(trimmed.replace(' ', "_"))
}

fn read_metadata(path: &Path) -> Result<QaSample, SampleError> {
    let content = std::fs::read_to_string(path).map_err(io_err(path))?;
    serde_json::from_str(&content).map_err(|source| SampleError::Metadata {
        path: path.to_path_buf(),
        source,
    })
}

/// Write metadata with relative image paths, atomically.
fn write_metadata(sample: &QaSample, dir: &Path) -> Result<(), SampleError> {
    let mut on_disk = sample.clone();
    for path in [&mut on_disk.image_paths.front, &mut on_disk.image_paths.back] {
        if let Some(name) = path.file_name() {
            *path = PathBuf::from(name);
        }
    }
    let path = dir.join(METADATA_FILE);
    let json = serde_json::to_string_pretty(&on_disk).map_err(|source| SampleError::Metadata {
        path: path.clone(),
        source,
    })?;
    write_atomic(&path, json.as_bytes())
}

fn import_image(src: &Path, dest: &Path) -> Result<(), SampleError> {
    let is_jpeg = matches!(ImageFormat::from_path(src), Ok(ImageFormat::Jpeg));
    let img = image::open(src).map_err(|source| SampleError::Image {
        path: src.to_path_buf(),
        source,
    })?;

    if is_jpeg {
        let bytes = std::fs::read(src).map_err(io_err(src))?;
        write_atomic(dest, &bytes)
    } else {
        write_jpeg(&img.to_rgb8(), dest)
    }
}

fn write_jpeg(img: &RgbImage, dest: &Path) -> Result<(), SampleError> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Jpeg)
        .map_err(|source| SampleError::Image {
            path: dest.to_path_buf(),
            source,
        })?;
    write_atomic(dest, &buffer.into_inner())
}

/// Write via a temp file in the same directory, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SampleError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(parent).map_err(io_err(parent))?;
    temp.write_all(bytes).map_err(io_err(path))?;
    temp.flush().map_err(io_err(path))?;
    temp.persist(path).map_err(|e| SampleError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}
