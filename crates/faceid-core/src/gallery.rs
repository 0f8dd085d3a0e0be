//! Gallery enumeration and probe-vs-reference scoring.

use crate::model::{ModelError, SimilarityModel};
use crate::preprocess::{ImageSource, PreprocessError, Preprocessor};
use crate::types::{PairScore, PreprocessedImage};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot list gallery {dir}: {source}")]
    Io {
        dir: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no usable gallery entries in {dir} ({total} present)")]
    NoGalleryEntries { dir: String, total: usize },
    #[error("model error while scoring {reference}: {source}")]
    Model {
        reference: String,
        #[source]
        source: ModelError,
    },
}

/// One enrolled reference image, loaded lazily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryEntry {
    /// File name within the gallery directory.
    pub name: String,
    pub path: PathBuf,
}

/// A reference that could not be preprocessed.
#[derive(Debug)]
pub struct SkippedEntry {
    pub name: String,
    pub error: PreprocessError,
}

/// Output of one pass over the gallery.
#[derive(Debug)]
pub struct GalleryScan {
    pub scores: Vec<PairScore>,
    /// Entries present when the scan started.
    pub gallery_size: usize,
    pub skipped: Vec<SkippedEntry>,
}

/// Pairs a probe with every image under the reference directory.
#[derive(Debug, Clone)]
pub struct GalleryScanner {
    dir: PathBuf,
    preprocessor: Preprocessor,
}

impl GalleryScanner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            preprocessor: Preprocessor::new(),
        }
    }

    /// List the regular files in the gallery directory, sorted by name.
    ///
    /// Re-read on every call; membership may change between verifications.
    pub fn entries(&self) -> Result<Vec<GalleryEntry>, GalleryError> {
        let io_err = |source| GalleryError::Io {
            dir: self.dir.display().to_string(),
            source,
        };

        let mut entries = Vec::new();
        for dirent in std::fs::read_dir(&self.dir).map_err(io_err)? {
            let dirent = dirent.map_err(io_err)?;
            let path = dirent.path();
            if !path.is_file() {
                continue;
            }
            entries.push(GalleryEntry {
                name: dirent.file_name().to_string_lossy().into_owned(),
                path,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Score `probe` against every gallery entry.
    ///
    /// References that fail preprocessing are skipped and logged. A model
    /// failure aborts the scan. Fails with `NoGalleryEntries` when nothing
    /// could be scored.
    pub fn score_against_gallery(
        &self,
        probe: &PreprocessedImage,
        model: &mut dyn SimilarityModel,
    ) -> Result<GalleryScan, GalleryError> {
        let entries = self.entries()?;
        let total = entries.len();
        let mut scores = Vec::with_capacity(total);
        let mut skipped = Vec::new();

        for (i, entry) in entries.into_iter().enumerate() {
            tracing::debug!(entry = %entry.name, "processing {}/{} image", i + 1, total);

            let reference = match self.preprocessor.process(ImageSource::File(&entry.path)) {
                Ok(img) => img,
                Err(error) => {
                    tracing::warn!(
                        entry = %entry.name,
                        error = %error,
                        "skipping unreadable gallery image"
                    );
                    skipped.push(SkippedEntry {
                        name: entry.name,
                        error,
                    });
                    continue;
                }
            };

            let value = model
                .score(probe, &reference)
                .map_err(|source| GalleryError::Model {
                    reference: entry.name.clone(),
                    source,
                })?;
            tracing::trace!(
                entry = %entry.name,
                score = value,
                model = model.name(),
                "scored pair"
            );

            scores.push(PairScore {
                reference: entry.name,
                value,
            });
        }

        if scores.is_empty() {
            return Err(GalleryError::NoGalleryEntries {
                dir: self.dir.display().to_string(),
                total,
            });
        }

        Ok(GalleryScan {
            scores,
            gallery_size: total,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedScores;
    use crate::types::{ChannelOrder, RawImage};
    use image::{Rgb, RgbImage};
    use std::path::Path;

    fn probe() -> PreprocessedImage {
        let data = vec![120u8; 30 * 30 * 3];
        let raw = RawImage {
            data: &data,
            width: 30,
            height: 30,
            order: ChannelOrder::Rgb,
        };
        Preprocessor.process(ImageSource::Pixels(raw)).unwrap()
    }

    fn write_reference(dir: &Path, name: &str) {
        RgbImage::from_pixel(40, 40, Rgb([120, 120, 120]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_entries_sorted_and_files_only() {
        let dir = tempfile::tempdir().unwrap();
        write_reference(dir.path(), "b.png");
        write_reference(dir.path(), "a.png");
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let names: Vec<String> = GalleryScanner::new(dir.path())
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[test]
    fn test_entries_missing_dir() {
        let err = GalleryScanner::new("/nonexistent/faceid/gallery").entries().unwrap_err();
        assert!(matches!(err, GalleryError::Io { .. }));
    }

    #[test]
    fn test_scores_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["1.png", "2.png", "3.png"] {
            write_reference(dir.path(), name);
        }

        let mut model = ScriptedScores::new([0.9, 0.5, 0.1]);
        let scan = GalleryScanner::new(dir.path())
            .score_against_gallery(&probe(), &mut model)
            .unwrap();

        assert_eq!(scan.gallery_size, 3);
        assert!(scan.skipped.is_empty());
        let got: Vec<(&str, f32)> = scan
            .scores
            .iter()
            .map(|s| (s.reference.as_str(), s.value))
            .collect();
        assert_eq!(got, vec![("1.png", 0.9), ("2.png", 0.5), ("3.png", 0.1)]);
    }

    #[test]
    fn test_unreadable_entry_skipped_but_counted() {
        let dir = tempfile::tempdir().unwrap();
        write_reference(dir.path(), "good_1.png");
        write_reference(dir.path(), "good_2.png");
        std::fs::write(dir.path().join("corrupt.jpg"), b"\xff\xd8 truncated").unwrap();

        let mut model = ScriptedScores::new([0.8]);
        let scan = GalleryScanner::new(dir.path())
            .score_against_gallery(&probe(), &mut model)
            .unwrap();

        assert_eq!(scan.gallery_size, 3);
        assert_eq!(scan.scores.len(), 2);
        assert_eq!(scan.skipped.len(), 1);
        assert_eq!(scan.skipped[0].name, "corrupt.jpg");
    }

    #[test]
    fn test_empty_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = ScriptedScores::new([0.8]);
        let err = GalleryScanner::new(dir.path())
            .score_against_gallery(&probe(), &mut model)
            .unwrap_err();
        assert!(matches!(err, GalleryError::NoGalleryEntries { total: 0, .. }));
    }

    #[test]
    fn test_all_entries_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.jpg"), b"junk").unwrap();
        std::fs::write(dir.path().join("y.jpg"), b"junk").unwrap();

        let mut model = ScriptedScores::new([0.8]);
        let err = GalleryScanner::new(dir.path())
            .score_against_gallery(&probe(), &mut model)
            .unwrap_err();
        assert!(matches!(err, GalleryError::NoGalleryEntries { total: 2, .. }));
    }

    #[test]
    fn test_model_failure_aborts_scan() {
        let dir = tempfile::tempdir().unwrap();
        write_reference(dir.path(), "a.png");

        let mut model = ScriptedScores::new(Vec::<f32>::new());
        let err = GalleryScanner::new(dir.path())
            .score_against_gallery(&probe(), &mut model)
            .unwrap_err();
        assert!(matches!(err, GalleryError::Model { ref reference, .. } if reference == "a.png"));
    }

    #[test]
    fn test_membership_reread_per_scan() {
        let dir = tempfile::tempdir().unwrap();
        write_reference(dir.path(), "a.png");
        let scanner = GalleryScanner::new(dir.path());
        let mut model = ScriptedScores::new([0.9]);

        assert_eq!(scanner.score_against_gallery(&probe(), &mut model).unwrap().gallery_size, 1);
        write_reference(dir.path(), "b.png");
        assert_eq!(scanner.score_against_gallery(&probe(), &mut model).unwrap().gallery_size, 2);
    }
}
