use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::platform::{MediaKind, MediaRef, UserRef};

/// Gives up looking for a free filename after this many collisions.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Root of the uploaded media tree (`media/` by default).
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create media directory: {}", self.root.display()))
    }

    /// A sink that can only write into `{root}/{user}/{photos|videos}/`.
    pub fn sink(&self, user: &UserRef, kind: MediaKind) -> MediaSink {
        let dir = self
            .root
            .join(sanitize_segment(&user.identifier()))
            .join(kind.folder());
        MediaSink { dir, kind }
    }

    /// Zip every stored file, paths relative to the root. Blocking.
    pub fn archive(&self) -> Result<ArchiveOutcome> {
        if !self.root.is_dir() {
            return Ok(ArchiveOutcome::Missing);
        }

        let mut files = Vec::new();
        collect_files(&self.root, &mut files)
            .with_context(|| format!("Failed to list media directory: {}", self.root.display()))?;
        if files.is_empty() {
            return Ok(ArchiveOutcome::Empty);
        }
        files.sort();

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for path in &files {
            zip.start_file(self.entry_name(path), options)?;
            let content = std::fs::read(path)
                .with_context(|| format!("Failed to read media file: {}", path.display()))?;
            zip.write_all(&content)?;
        }
        let bytes = zip.finish()?.into_inner();

        info!("Archived {} media files ({} bytes)", files.len(), bytes.len());
        Ok(ArchiveOutcome::Ready(MediaArchive { bytes, files }))
    }

    /// Delete the files that went into `archive`, then any folders left
    /// empty. Files stored after the archive was built stay. Blocking.
    pub fn remove_archived(&self, archive: &MediaArchive) {
        let mut dirs = Vec::new();
        for path in &archive.files {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove archived file {}: {}", path.display(), e);
            }
            let mut parent = path.parent();
            while let Some(dir) = parent.filter(|d| *d != self.root && d.starts_with(&self.root)) {
                dirs.push(dir.to_path_buf());
                parent = dir.parent();
            }
        }

        // Deepest first; non-empty folders refuse removal.
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        dirs.dedup();
        for dir in dirs {
            let _ = std::fs::remove_dir(&dir);
        }
    }

    fn entry_name(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Result of archiving the media tree.
#[derive(Debug)]
pub enum ArchiveOutcome {
    /// The media directory does not exist.
    Missing,
    /// The directory exists but holds no files.
    Empty,
    Ready(MediaArchive),
}

#[derive(Debug)]
pub struct MediaArchive {
    /// Zip file content.
    pub bytes: Vec<u8>,
    pub files: Vec<PathBuf>,
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), out)?;
        } else if file_type.is_file() {
            out.push(entry.path());
        }
    }
    Ok(())
}

/// Write capability scoped to one user's folder for one media kind.
#[derive(Debug, Clone)]
pub struct MediaSink {
    dir: PathBuf,
    kind: MediaKind,
}

impl MediaSink {
    /// Stream `content` into a new timestamp-named file and return its path.
    pub async fn store<R>(&self, media: &MediaRef, mut content: R) -> Result<PathBuf>
    where
        R: AsyncRead + Unpin,
    {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create directory: {}", self.dir.display()))?;

        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S%3f").to_string();
        let (path, mut file) = self.create_unique(&stamp).await?;

        let copied = match tokio::io::copy(&mut content, &mut file).await {
            Ok(n) => file.flush().await.map(|_| n),
            Err(e) => Err(e),
        };
        let written = match copied {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove partial file {}: {}", path.display(), rm);
                }
                return Err(e)
                    .with_context(|| format!("Failed to write media file: {}", path.display()));
            }
        };

        info!(
            "Stored {} ({} bytes, file_id {}) at {}",
            self.kind.folder(),
            written,
            media.file_id,
            path.display()
        );
        Ok(path)
    }

    async fn create_unique(&self, stamp: &str) -> Result<(PathBuf, tokio::fs::File)> {
        let ext = self.kind.extension();
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{}.{}", stamp, ext)
            } else {
                format!("{}_{}.{}", stamp, attempt, ext)
            };
            let path = self.dir.join(name);

            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to create media file: {}", path.display()))
                }
            }
        }
        anyhow::bail!(
            "No free filename for {} in {}",
            stamp,
            self.dir.display()
        )
    }
}

/// Reduce a user identifier to a single safe path segment.
fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned.to_string()
    }
}
