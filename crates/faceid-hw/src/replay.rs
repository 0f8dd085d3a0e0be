//! Image-directory replay source, standing in for a camera on headless hosts.

use crate::camera::{CameraError, CaptureSource};
use crate::frame::Frame;
use faceid_core::ChannelOrder;
use std::path::{Path, PathBuf};

/// Cycles through the images in a directory, one per `read()`.
pub struct ImageReplay {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    sequence: u32,
}

impl ImageReplay {
    /// Collect the regular files under `dir`, sorted by name.
    pub fn open(dir: &Path) -> Result<Self, CameraError> {
        let read_dir = std::fs::read_dir(dir)
            .map_err(|e| CameraError::DeviceNotFound(format!("{}: {e}", dir.display())))?;

        let mut files: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        tracing::info!(dir = %dir.display(), files = files.len(), "opened replay source");

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            next: 0,
            sequence: 0,
        })
    }
}

impl CaptureSource for ImageReplay {
    fn read(&mut self) -> Result<Frame, CameraError> {
        if self.files.is_empty() {
            return Err(CameraError::EndOfStream);
        }
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();

        let img = image::open(path)
            .map_err(|e| CameraError::CaptureFailed(format!("{}: {e}", path.display())))?
            .to_rgb8();
        let (width, height) = img.dimensions();

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        Ok(Frame {
            data: img.into_raw(),
            width,
            height,
            order: ChannelOrder::Rgb,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    fn describe(&self) -> String {
        format!("replay:{}", self.dir.display())
    }
}
