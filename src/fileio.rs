//! File and stream pipeline (spec §4.5): paginated listing, streaming
//! download, chunked upload, and the file-action verbs (mkdir/remove/
//! rename/copy/move/format).
//!
//! Every verb here ends in exactly one [`Notification::FileActionResult`]
//! (or, for listing/download, the dedicated `FileList`/`DirectoryTree`/
//! `FileContentHeader` notifications) — callers never see a bare `Result`
//! cross the dispatcher boundary, matching how [`crate::worker`] reports
//! outcomes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::chunker::ChunkEmitter;
use crate::error::{CommandError, FsError};
use crate::notify::{DirTreePayload, FileListEntry, FileListPayload, Notification};
use crate::storage::{join, mkdir_recursive, StorageBackend};
use crate::transport::Transport;
use crate::types::PathType;

/// Entries per `FileList`/`DirectoryTree` message (spec §4.5).
pub const MAX_FILES_PER_MESSAGE: usize = 50;

/// How many entries a listing walk processes before yielding to the
/// executor (spec §4.5: "yield every 20 entries").
pub const LIST_YIELD_EVERY: usize = 20;

/// Below this free-space figure, listing/upload operations abort with
/// `FsError::LowMemory` rather than risk exhausting heap mid-operation
/// (spec §4.5).
pub const LOW_MEMORY_THRESHOLD_BYTES: u64 = 3 * 1024;

/// An upload slot not touched for this long is garbage-collected (spec
/// §4.5: "upload slots are GC'd after 60s of inactivity").
pub const UPLOAD_SLOT_TTL: Duration = Duration::from_secs(60);

/// Buffer size for the copy verb's read/write loop (spec §4.5: "buffered
/// copy, 512 bytes at a time").
const COPY_BUF_BYTES: usize = 512;

/// The four auto-created areas format wipes and recreates (spec §4.5);
/// `InternalFlash`/`RootSD` are never touched by format.
const CANONICAL_DIRS: [PathType; 4] = [PathType::Records, PathType::Signals, PathType::Presets, PathType::Temp];

/// Wire action byte carried in `FileActionResult`, one per verb this
/// module exposes — chosen to equal the inbound opcode that triggers it
/// (spec §6) so a capture of the wire traffic reads directly.
pub mod action {
    pub const MKDIR: u8 = 0x0A;
    pub const REMOVE: u8 = 0x0B;
    pub const RENAME: u8 = 0x0C;
    pub const UPLOAD: u8 = 0x0D;
    pub const COPY: u8 = 0x0E;
    pub const MOVE: u8 = 0x0F;
    pub const DOWNLOAD: u8 = 0x09;
    pub const FORMAT: u8 = 0x18;
    /// Sentinel `errorCode` for an in-progress format step, distinct from
    /// every real `FsError` code (spec §4.5).
    pub const FORMAT_IN_PROGRESS: u8 = 0xFF;
}

struct UploadSlot {
    path: String,
    last_touch: Instant,
}

/// The file/stream pipeline, built on a [`StorageBackend`]. Listing and
/// directory-tree results go out as ordinary notifications; download's
/// header-plus-data buffer bypasses the `Notification` enum and is
/// handed straight to the [`ChunkEmitter`] so the header rides in the
/// same wire chunk as the leading file bytes.
pub struct FileIo {
    storage: Arc<dyn StorageBackend>,
    notify_tx: mpsc::UnboundedSender<Notification>,
    emitter: Arc<ChunkEmitter>,
    transport: Arc<dyn Transport>,
    uploads: Mutex<HashMap<u8, UploadSlot>>,
}

impl FileIo {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        notify_tx: mpsc::UnboundedSender<Notification>,
        emitter: Arc<ChunkEmitter>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        FileIo { storage, notify_tx, emitter, transport, uploads: Mutex::new(HashMap::new()) }
    }

    fn notify(&self, n: Notification) {
        let _ = self.notify_tx.send(n);
    }

    fn result(&self, action: u8, status: u8, error_code: u8, path: String) {
        self.notify(Notification::FileActionResult { action, status, error_code, path });
    }

    /// Resolves a client-relative path against `path_type`'s base
    /// directory, auto-creating the base the first time it is addressed
    /// (spec §4.5: `Records`/`Signals`/`Presets`/`Temp` only).
    fn resolve(&self, path_type: PathType, rel: &str) -> String {
        let base = path_type.base_dir();
        if path_type.auto_create() && !base.is_empty() && !self.storage.is_dir(base) {
            let _ = mkdir_recursive(self.storage.as_ref(), base);
        }
        join(base, rel)
    }

    fn low_on_memory(&self) -> bool {
        self.storage.free_bytes() < LOW_MEMORY_THRESHOLD_BYTES
    }

    // -----------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------

    /// Lists one directory's direct children, paginated at
    /// [`MAX_FILES_PER_MESSAGE`] entries per notification (spec §4.5).
    pub async fn list_files(&self, path_type: PathType, rel_path: &str) {
        let full = self.resolve(path_type, rel_path);
        if self.low_on_memory() {
            self.result(0x05, 1, FsError::LowMemory.code(), full);
            return;
        }
        let entries = match self.storage.read_dir(&full) {
            Ok(e) => e,
            Err(_) => {
                self.result(0x05, 1, FsError::NotFound.code(), full);
                return;
            }
        };

        let total = entries.len();
        let mut idx = 0usize;
        let mut since_yield = 0usize;
        loop {
            let end = (idx + MAX_FILES_PER_MESSAGE).min(total);
            let more = end < total;
            let batch: Vec<FileListEntry> = entries[idx..end]
                .iter()
                .map(|e| FileListEntry { name: e.name.clone(), is_dir: e.is_dir, size: e.size, mtime: e.mtime })
                .collect();
            self.notify(Notification::FileList(FileListPayload {
                path: full.clone(),
                more_follows: more,
                total_files: if more { 0xFFFF } else { total as u16 },
                entries: batch,
            }));
            since_yield += end - idx;
            idx = end;
            if since_yield >= LIST_YIELD_EVERY {
                since_yield = 0;
                tokio::task::yield_now().await;
            }
            if !more {
                break;
            }
        }
    }

    fn collect_dirs<'a>(
        &'a self,
        path: String,
        out: &'a mut Vec<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + 'a>> {
        Box::pin(async move {
            let Ok(entries) = self.storage.read_dir(&path) else { return };
            for e in entries {
                if e.is_dir {
                    let child = join(&path, &e.name);
                    out.push(child.clone());
                    self.collect_dirs(child, out).await;
                    tokio::task::yield_now().await;
                }
            }
        })
    }

    /// Walks every directory under `path_type`'s base, depth-first,
    /// paginating the result the same way [`list_files`] does (spec
    /// §4.5 `GetDirectoryTree`).
    pub async fn get_directory_tree(&self, path_type: PathType) {
        let base = self.resolve(path_type, "");
        let mut dirs = Vec::new();
        self.collect_dirs(base, &mut dirs).await;

        let total = dirs.len();
        let mut idx = 0usize;
        loop {
            let end = (idx + MAX_FILES_PER_MESSAGE).min(total);
            let more = end < total;
            self.notify(Notification::DirectoryTree(DirTreePayload {
                path_type: path_type.to_wire(),
                more_follows: more,
                total_dirs: if more { 0xFFFF } else { total as u16 },
                paths: dirs[idx..end].to_vec(),
            }));
            idx = end;
            tokio::task::yield_now().await;
            if !more {
                break;
            }
        }
    }

    // -----------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------

    /// Streams a file's contents back to the client: the
    /// `FileContentHeader` fields and the leading file bytes ride in the
    /// same outbound message, so whichever wire chunk holds the header
    /// also holds as much data as fits (spec §4.5/§8 scenario 2).
    pub async fn download(&self, path_type: PathType, rel_path: &str) {
        let full = self.resolve(path_type, rel_path);
        let data = match self.storage.read(&full) {
            Ok(d) => d,
            Err(_) => {
                self.result(action::DOWNLOAD, 1, FsError::NotFound.code(), full);
                return;
            }
        };
        let mut buf = Notification::FileContentHeader { path: full.clone(), size: data.len() as u32 }.encode();
        buf.extend_from_slice(&data);
        self.emitter.emit(self.transport.as_ref(), &buf).await;
    }

    // -----------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------

    fn gc_uploads(&self) {
        let now = Instant::now();
        self.uploads.lock().unwrap().retain(|_, slot| now.duration_since(slot.last_touch) < UPLOAD_SLOT_TTL);
    }

    /// Opens (or truncates) the destination file and registers an upload
    /// slot keyed by `chunk_id`, creating any missing parent directories
    /// first (spec §4.5 upload).
    pub fn begin_upload(&self, chunk_id: u8, path_type: PathType, rel_path: &str) -> Result<(), FsError> {
        self.gc_uploads();
        if self.low_on_memory() {
            return Err(FsError::LowMemory);
        }
        let full = self.resolve(path_type, rel_path);
        if let Some(parent) = full.rfind('/').map(|i| &full[..i]) {
            if !parent.is_empty() {
                mkdir_recursive(self.storage.as_ref(), parent).map_err(|_| FsError::MkdirFailed)?;
            }
        }
        self.storage.write(&full, &[]).map_err(|_| FsError::OpenFailedWrite)?;
        self.uploads.lock().unwrap().insert(chunk_id, UploadSlot { path: full, last_touch: Instant::now() });
        Ok(())
    }

    /// Appends one upload chunk's payload. Returns the finished file's
    /// path once `done` closes out the slot.
    pub fn append_upload(&self, chunk_id: u8, data: &[u8], done: bool) -> Result<Option<String>, FsError> {
        self.gc_uploads();
        let path = {
            let mut uploads = self.uploads.lock().unwrap();
            let slot = uploads.get_mut(&chunk_id).ok_or(FsError::NotFound)?;
            slot.last_touch = Instant::now();
            slot.path.clone()
        };
        self.storage.append(&path, data).map_err(|_| FsError::OpenFailedWrite)?;
        if done {
            self.uploads.lock().unwrap().remove(&chunk_id);
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }

    /// Drives one upload chunk end-to-end (spec §8 scenario 5): opens the
    /// slot on the first chunk, appends on every chunk, and reports
    /// `FileActionResult` once the upload closes.
    pub fn handle_upload_chunk(&self, chunk_id: u8, path_type: PathType, rel_path: &str, data: &[u8], is_first: bool, done: bool) {
        if is_first {
            if let Err(e) = self.begin_upload(chunk_id, path_type, rel_path) {
                self.result(action::UPLOAD, 1, e.code(), rel_path.to_string());
                return;
            }
        }
        match self.append_upload(chunk_id, data, done) {
            Ok(Some(path)) => self.result(action::UPLOAD, 0, 0, path),
            Ok(None) => {}
            Err(e) => self.result(action::UPLOAD, 1, e.code(), rel_path.to_string()),
        }
    }

    // -----------------------------------------------------------------
    // File actions
    // -----------------------------------------------------------------

    pub fn mkdir(&self, path_type: PathType, rel_path: &str) {
        let full = self.resolve(path_type, rel_path);
        match mkdir_recursive(self.storage.as_ref(), &full) {
            Ok(()) => self.result(action::MKDIR, 0, 0, full),
            Err(_) => self.result(action::MKDIR, 1, FsError::MkdirFailed.code(), full),
        }
    }

    fn remove_recursive<'a>(&'a self, path: String) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + 'a>> {
        Box::pin(async move {
            if self.storage.is_dir(&path) {
                let entries = match self.storage.read_dir(&path) {
                    Ok(e) => e,
                    Err(_) => return true,
                };
                let mut any_failed = false;
                for e in entries {
                    let child = join(&path, &e.name);
                    any_failed |= self.remove_recursive(child).await;
                    tokio::task::yield_now().await;
                }
                if self.storage.remove_dir_all(&path).is_err() {
                    any_failed = true;
                }
                any_failed
            } else {
                self.storage.remove_file(&path).is_err()
            }
        })
    }

    /// Deletes a file, or a directory and every descendant depth-first,
    /// yielding between entries so a large subtree does not monopolize
    /// the executor (spec §4.5).
    pub async fn remove(&self, path_type: PathType, rel_path: &str) {
        let full = self.resolve(path_type, rel_path);
        if !self.storage.exists(&full) {
            self.result(action::REMOVE, 1, FsError::NotFound.code(), full);
            return;
        }
        let any_failed = self.remove_recursive(full.clone()).await;
        if any_failed {
            self.result(action::REMOVE, 4, FsError::RemoveFailed.code(), full);
        } else {
            self.result(action::REMOVE, 0, 0, full);
        }
    }

    pub fn rename(&self, path_type: PathType, from_rel: &str, to_rel: &str) {
        let from = self.resolve(path_type, from_rel);
        let to = self.resolve(path_type, to_rel);
        match self.storage.rename(&from, &to) {
            Ok(()) => self.result(action::RENAME, 0, 0, to),
            Err(_) => self.result(action::RENAME, 1, FsError::NotFound.code(), from),
        }
    }

    fn copy_buffered(&self, from: &str, to: &str) -> Result<(), FsError> {
        let data = self.storage.read(from).map_err(|_| FsError::NotFound)?;
        let mut chunks = data.chunks(COPY_BUF_BYTES);
        match chunks.next() {
            Some(first) => self.storage.write(to, first).map_err(|_| FsError::OpenFailedWrite)?,
            None => self.storage.write(to, &[]).map_err(|_| FsError::OpenFailedWrite)?,
        }
        for chunk in chunks {
            self.storage.append(to, chunk).map_err(|_| FsError::OpenFailedWrite)?;
        }
        Ok(())
    }

    /// Copies a file 512 bytes at a time (spec §4.5).
    pub fn copy(&self, path_type: PathType, from_rel: &str, to_rel: &str) {
        let from = self.resolve(path_type, from_rel);
        let to = self.resolve(path_type, to_rel);
        match self.copy_buffered(&from, &to) {
            Ok(()) => self.result(action::COPY, 0, 0, to),
            Err(e) => self.result(action::COPY, 1, e.code(), from),
        }
    }

    /// Moves a file. Every `PathType` this crate exposes resolves onto
    /// the same [`StorageBackend`], so move is always same-filesystem
    /// rename; there is no cross-filesystem copy-then-delete fallback to
    /// implement here.
    pub fn move_file(&self, path_type: PathType, from_rel: &str, to_rel: &str) {
        let from = self.resolve(path_type, from_rel);
        let to = self.resolve(path_type, to_rel);
        match self.storage.rename(&from, &to) {
            Ok(()) => self.result(action::MOVE, 0, 0, to),
            Err(_) => self.result(action::MOVE, 1, FsError::NotFound.code(), from),
        }
    }

    /// Wipes and recreates the four canonical directories behind the
    /// `"FS"` two-byte guard (spec §4.5/§6). Emits one in-progress
    /// `FileActionResult` (`errorCode = 0xFF`) per directory, then a
    /// terminal result: `status = 0` if every directory succeeded, `4`
    /// if any failed.
    pub async fn format(&self, guard: &str) -> Result<(), CommandError> {
        if guard != "FS" {
            return Err(CommandError::InvalidChoice);
        }
        let mut any_failed = false;
        for pt in CANONICAL_DIRS {
            let base = pt.base_dir();
            self.result(action::FORMAT, 0, action::FORMAT_IN_PROGRESS, base.to_string());
            if self.storage.exists(base) && self.storage.remove_dir_all(base).is_err() {
                any_failed = true;
            }
            if mkdir_recursive(self.storage.as_ref(), base).is_err() {
                any_failed = true;
            }
            tokio::task::yield_now().await;
        }
        self.result(action::FORMAT, if any_failed { 4 } else { 0 }, 0, "/".to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemBackend;
    use crate::transport::ChannelTransport;

    fn make_fileio() -> (FileIo, mpsc::UnboundedReceiver<Notification>, tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>) {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemBackend::new());
        let (ntx, nrx) = mpsc::unbounded_channel();
        let (transport, trx) = ChannelTransport::new();
        let fileio = FileIo::new(storage, ntx, Arc::new(ChunkEmitter::new()), Arc::new(transport));
        (fileio, nrx, trx)
    }

    #[tokio::test]
    async fn listing_paginates_past_max_files_per_message() {
        let (fileio, mut nrx, _trx) = make_fileio();
        for i in 0..(MAX_FILES_PER_MESSAGE + 5) {
            fileio.storage.write(&format!("/DATA/SIGNALS/f{i}.sub"), b"x").unwrap();
        }
        fileio.list_files(PathType::Signals, "").await;

        let mut seen = 0usize;
        let mut saw_sentinel = false;
        while let Ok(Notification::FileList(p)) = nrx.try_recv() {
            seen += p.entries.len();
            if p.more_follows {
                assert_eq!(p.total_files, 0xFFFF);
                saw_sentinel = true;
            }
        }
        assert_eq!(seen, MAX_FILES_PER_MESSAGE + 5);
        assert!(saw_sentinel);
    }

    #[tokio::test]
    async fn listing_missing_directory_reports_not_found() {
        let (fileio, mut nrx, _trx) = make_fileio();
        fileio.list_files(PathType::Signals, "nope").await;
        match nrx.recv().await.unwrap() {
            Notification::FileActionResult { error_code, .. } => assert_eq!(error_code, FsError::NotFound.code()),
            other => panic!("expected FileActionResult, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn download_fuses_header_and_data_into_one_message() {
        let (fileio, _nrx, mut trx) = make_fileio();
        fileio.storage.write("/DATA/SIGNALS/a.sub", b"hello world").unwrap();
        fileio.download(PathType::Signals, "a.sub").await;
        let chunk = trx.recv().await.unwrap();
        // magic, type, chunkId, chunkNum, totalChunks, dataLen(2) precede payload
        let payload = &chunk[7..chunk.len() - 1];
        assert_eq!(payload[0], 0xA0);
        assert!(payload.ends_with(b"hello world"));
    }

    #[tokio::test]
    async fn upload_chunks_append_and_finalize() {
        let (fileio, mut nrx, _trx) = make_fileio();
        fileio.handle_upload_chunk(3, PathType::Temp, "up.bin", b"abc", true, false);
        fileio.handle_upload_chunk(3, PathType::Temp, "up.bin", b"def", false, true);
        assert_eq!(fileio.storage.read("/DATA/TEMP/up.bin").unwrap(), b"abcdef");
        match nrx.recv().await.unwrap() {
            Notification::FileActionResult { status, path, .. } => {
                assert_eq!(status, 0);
                assert_eq!(path, "/DATA/TEMP/up.bin");
            }
            other => panic!("expected FileActionResult, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn remove_deletes_nested_directory() {
        let (fileio, mut nrx, _trx) = make_fileio();
        fileio.storage.write("/DATA/SIGNALS/nested/a.sub", b"x").ok();
        mkdir_recursive(fileio.storage.as_ref(), "/DATA/SIGNALS/nested").unwrap();
        fileio.storage.write("/DATA/SIGNALS/nested/a.sub", b"x").unwrap();
        fileio.remove(PathType::Signals, "nested").await;
        assert!(!fileio.storage.exists("/DATA/SIGNALS/nested"));
        match nrx.recv().await.unwrap() {
            Notification::FileActionResult { status, .. } => assert_eq!(status, 0),
            other => panic!("expected FileActionResult, got {other:?}"),
        }
    }

    #[test]
    fn copy_round_trips_content_larger_than_one_buffer() {
        let (fileio, _nrx, _trx) = make_fileio();
        let data = vec![0xABu8; COPY_BUF_BYTES * 3 + 7];
        fileio.storage.write("/DATA/SIGNALS/src.sub", &data).unwrap();
        fileio.copy(PathType::Signals, "src.sub", "dst.sub");
        assert_eq!(fileio.storage.read("/DATA/SIGNALS/dst.sub").unwrap(), data);
    }

    #[test]
    fn move_file_relocates_without_leaving_source() {
        let (fileio, _nrx, _trx) = make_fileio();
        fileio.storage.write("/DATA/SIGNALS/a.sub", b"x").unwrap();
        fileio.move_file(PathType::Signals, "a.sub", "b.sub");
        assert!(!fileio.storage.exists("/DATA/SIGNALS/a.sub"));
        assert!(fileio.storage.exists("/DATA/SIGNALS/b.sub"));
    }

    #[tokio::test]
    async fn format_rejects_wrong_guard() {
        let (fileio, _nrx, _trx) = make_fileio();
        assert_eq!(fileio.format("XX").await.unwrap_err(), CommandError::InvalidChoice);
    }

    #[tokio::test]
    async fn format_recreates_canonical_directories() {
        let (fileio, mut nrx, _trx) = make_fileio();
        fileio.storage.write("/DATA/SIGNALS/old.sub", b"x").unwrap();
        fileio.format("FS").await.unwrap();
        assert!(fileio.storage.is_dir("/DATA/SIGNALS"));
        assert!(!fileio.storage.exists("/DATA/SIGNALS/old.sub"));

        let mut saw_terminal = false;
        while let Ok(n) = nrx.try_recv() {
            if let Notification::FileActionResult { error_code, status, .. } = n {
                if error_code != action::FORMAT_IN_PROGRESS {
                    assert_eq!(status, 0);
                    saw_terminal = true;
                }
            }
        }
        assert!(saw_terminal);
    }
}
