use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::errors::{AppError, Result};
use crate::utils::sanitize_filename;

/// Why an entry could not be added.
#[derive(Debug)]
pub enum EntryError {
    /// The entry's own bytes were unusable. Nothing was written and the
    /// archive is still usable.
    Entry(AppError),
    /// The archive itself can no longer be written.
    Sink(AppError),
}

impl std::fmt::Display for EntryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryError::Entry(e) => write!(f, "entry failed: {}", e),
            EntryError::Sink(e) => write!(f, "archive failed: {}", e),
        }
    }
}

/// Opens the file an archive is written into before it is handed over.
#[derive(Clone)]
pub struct ArchiveSpool {
    open: Arc<dyn Fn() -> io::Result<File> + Send + Sync>,
}

impl ArchiveSpool {
    /// Anonymous temp file in the system temp directory.
    pub fn temp() -> Self {
        Self::custom(tempfile::tempfile)
    }

    /// Anonymous temp file inside `dir`.
    pub fn in_dir(dir: PathBuf) -> Self {
        Self::custom(move || tempfile::tempfile_in(&dir))
    }

    pub fn custom(open: impl Fn() -> io::Result<File> + Send + Sync + 'static) -> Self {
        Self { open: Arc::new(open) }
    }

    fn open(&self) -> io::Result<File> {
        (self.open)()
    }
}

impl Default for ArchiveSpool {
    fn default() -> Self {
        Self::temp()
    }
}

impl std::fmt::Debug for ArchiveSpool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ArchiveSpool")
    }
}

/// Zip writer over a spool file. Each entry arrives fully buffered and is
/// compressed straight into the spool.
pub struct ArchiveAssembler {
    writer: ZipWriter<File>,
    file_name: String,
    names: HashSet<String>,
    entries: usize,
    poisoned: bool,
}

impl ArchiveAssembler {
    pub fn begin(name: &str, spool: &ArchiveSpool) -> Result<Self> {
        let file = spool.open()?;
        let stem = sanitize_filename(name);
        let stem = if stem.is_empty() { "audio-download".to_string() } else { stem };
        Ok(Self {
            writer: ZipWriter::new(file),
            file_name: format!("{}.zip", stem),
            names: HashSet::new(),
            entries: 0,
            poisoned: false,
        })
    }

    /// Writes `data` as a new Deflate entry and returns its size. An empty
    /// body is refused before anything reaches the writer.
    pub fn add_entry(&mut self, name: &str, data: &[u8]) -> std::result::Result<u64, EntryError> {
        if self.poisoned {
            return Err(EntryError::Sink(AppError::Assembly(
                "archive is no longer writable".to_string(),
            )));
        }
        if data.is_empty() {
            log::warn!("⚠️ [ZIP] Dropping entry {}: empty body", name);
            return Err(EntryError::Entry(AppError::Assembly(format!(
                "{} has an empty body",
                name
            ))));
        }

        let entry_name = self.unique_name(name);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        if let Err(e) = self.writer.start_file(entry_name.as_str(), options) {
            self.poisoned = true;
            return Err(EntryError::Sink(e.into()));
        }
        if let Err(e) = self.writer.write_all(data) {
            self.poisoned = true;
            return Err(EntryError::Sink(e.into()));
        }

        self.names.insert(entry_name);
        self.entries += 1;
        Ok(data.len() as u64)
    }

    pub fn finalize(mut self) -> Result<Artifact> {
        if self.poisoned {
            return Err(AppError::Assembly("archive is no longer writable".to_string()));
        }

        let mut file = self.writer.finish()?;
        file.flush()?;
        let total_bytes = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;

        log::info!("📦 [ZIP] {} ready: {} entries, {} bytes", self.file_name, self.entries, total_bytes);
        Ok(Artifact {
            file_name: self.file_name,
            total_bytes,
            entries: self.entries,
            file,
        })
    }

    fn unique_name(&self, name: &str) -> String {
        if !self.names.contains(name) {
            return name.to_string();
        }
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{}", ext)),
            None => (name, String::new()),
        };
        (2..)
            .map(|n| format!("{}-{}{}", stem, n, ext))
            .find(|candidate| !self.names.contains(candidate))
            .unwrap_or_else(|| name.to_string())
    }
}

/// Async front for [`ArchiveAssembler`]. Zip work runs on the blocking pool.
pub struct ArchiveHandle {
    assembler: Option<ArchiveAssembler>,
}

impl ArchiveHandle {
    pub async fn begin(name: &str, spool: &ArchiveSpool) -> Result<Self> {
        let name = name.to_string();
        let spool = spool.clone();
        let assembler = tokio::task::spawn_blocking(move || ArchiveAssembler::begin(&name, &spool))
            .await
            .map_err(|e| AppError::Assembly(format!("archive task failed: {}", e)))??;
        Ok(Self {
            assembler: Some(assembler),
        })
    }

    pub async fn add_entry(&mut self, name: String, data: Vec<u8>) -> std::result::Result<u64, EntryError> {
        let mut assembler = self.assembler.take().ok_or_else(|| {
            EntryError::Sink(AppError::Assembly("archive is no longer writable".to_string()))
        })?;

        let (assembler, result) = tokio::task::spawn_blocking(move || {
            let result = assembler.add_entry(&name, &data);
            (assembler, result)
        })
        .await
        .map_err(|e| EntryError::Sink(AppError::Assembly(format!("archive task failed: {}", e))))?;

        self.assembler = Some(assembler);
        result
    }

    pub async fn finalize(mut self) -> Result<Artifact> {
        let assembler = self
            .assembler
            .take()
            .ok_or_else(|| AppError::Assembly("archive is no longer writable".to_string()))?;
        tokio::task::spawn_blocking(move || assembler.finalize())
            .await
            .map_err(|e| AppError::Assembly(format!("archive task failed: {}", e)))?
    }
}

/// A finished archive waiting for retrieval. Backed by an unlinked temp
/// file, so dropping it releases the storage.
#[derive(Debug)]
pub struct Artifact {
    pub file_name: String,
    pub total_bytes: u64,
    pub entries: usize,
    file: File,
}

impl Artifact {
    pub fn into_file(self) -> File {
        self.file
    }

    /// Async reader positioned at the start of the archive.
    pub fn into_reader(self) -> tokio::fs::File {
        tokio::fs::File::from_std(self.file)
    }

    /// Copies the archive to `path`, returning the bytes written.
    pub async fn persist(self, path: &Path) -> Result<u64> {
        let mut reader = self.into_reader();
        let mut output = tokio::fs::File::create(path).await?;
        let written = tokio::io::copy(&mut reader, &mut output).await?;
        tokio::io::AsyncWriteExt::flush(&mut output).await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn read_back(artifact: Artifact) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(artifact.into_file()).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (entry.name().to_string(), data)
            })
            .collect()
    }

    /// Spool whose file was opened read-only, so every write fails.
    fn read_only_spool(dir: &Path) -> ArchiveSpool {
        let path = dir.join("spool.zip");
        std::fs::write(&path, b"").unwrap();
        ArchiveSpool::custom(move || File::open(&path))
    }

    #[test]
    fn empty_entry_is_dropped_archive_survives() {
        let mut assembler = ArchiveAssembler::begin("My Book", &ArchiveSpool::default()).unwrap();
        assembler.add_entry("001_intro.mp3", b"intro").unwrap();
        assert!(matches!(
            assembler.add_entry("002_broken.mp3", b""),
            Err(EntryError::Entry(_))
        ));
        assembler.add_entry("003_end.mp3", b"end").unwrap();

        let artifact = assembler.finalize().unwrap();
        assert_eq!(artifact.entries, 2);
        assert!(artifact.total_bytes > 0);
        assert_eq!(artifact.file_name, "My Book.zip");

        let entries = read_back(artifact);
        assert_eq!(
            entries,
            vec![
                ("001_intro.mp3".to_string(), b"intro".to_vec()),
                ("003_end.mp3".to_string(), b"end".to_vec()),
            ]
        );
    }

    #[test]
    fn unwritable_spool_poisons_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let mut assembler = ArchiveAssembler::begin("book", &read_only_spool(dir.path())).unwrap();

        assert!(matches!(
            assembler.add_entry("001_a.mp3", b"abc"),
            Err(EntryError::Sink(_))
        ));
        assert!(matches!(
            assembler.add_entry("002_b.mp3", b"def"),
            Err(EntryError::Sink(_))
        ));
        assert!(assembler.finalize().is_err());
    }

    #[test]
    fn duplicate_names_get_suffixes() {
        let mut assembler = ArchiveAssembler::begin("dupes", &ArchiveSpool::default()).unwrap();
        assembler.add_entry("track.mp3", b"1").unwrap();
        assembler.add_entry("track.mp3", b"2").unwrap();
        assembler.add_entry("track.mp3", b"3").unwrap();

        let names: Vec<String> = read_back(assembler.finalize().unwrap())
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["track.mp3", "track-2.mp3", "track-3.mp3"]);
    }

    #[tokio::test]
    async fn handle_persists_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let spool = ArchiveSpool::in_dir(dir.path().to_path_buf());
        let mut handle = ArchiveHandle::begin("book", &spool).await.unwrap();
        handle
            .add_entry("001_a.mp3".to_string(), vec![7u8; 10_000])
            .await
            .unwrap();

        let artifact = handle.finalize().await.unwrap();
        let total = artifact.total_bytes;
        let path = dir.path().join(&artifact.file_name);
        let written = artifact.persist(&path).await.unwrap();

        assert_eq!(written, total);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), total);
    }
}
