//! Storage backend abstraction (spec §1: "SD/flash filesystem drivers
//! (only their file/directory contract is consumed)").
//!
//! The file/stream pipeline (§4.5) and the Worker's recording/transmit
//! paths (§4.2) only ever need a handful of primitive operations against
//! whatever filesystem backs `Records`/`Signals`/`Presets`/`Temp`,
//! internal flash, or the SD root. This trait is that contract;
//! [`StdFsBackend`] is a real deployment's implementation and
//! [`MemBackend`] is the in-memory test double every unit test in
//! `fileio`, `worker`, and `bruteforce` is built against.

use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u32,
    pub mtime: u32,
}

pub trait StorageBackend: Send + Sync {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
    fn write(&self, path: &str, data: &[u8]) -> io::Result<()>;
    fn append(&self, path: &str, data: &[u8]) -> io::Result<()>;
    fn remove_file(&self, path: &str) -> io::Result<()>;
    fn remove_dir_all(&self, path: &str) -> io::Result<()>;
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;
    /// Creates exactly one directory level; callers recursively walk
    /// `/`-separators themselves (spec §4.5: "the underlying filesystems'
    /// mkdir is non-recursive").
    fn mkdir_one(&self, path: &str) -> io::Result<()>;
    fn exists(&self, path: &str) -> bool;
    fn is_dir(&self, path: &str) -> bool;
    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntryInfo>>;
    fn stat(&self, path: &str) -> io::Result<DirEntryInfo>;
    /// Free bytes remaining, used for the §4.5 low-memory abort check.
    fn free_bytes(&self) -> u64;
}

/// Joins a base directory and relative path the way every `PathType`
/// base dir is combined with the client-supplied relative path.
pub fn join(base: &str, rel: &str) -> String {
    if base.is_empty() {
        return rel.to_string();
    }
    if rel.is_empty() || rel == "/" {
        return base.to_string();
    }
    let rel = rel.trim_start_matches('/');
    format!("{}/{}", base.trim_end_matches('/'), rel)
}

/// Recursively creates every missing parent directory level of `path`
/// (spec §4.5 mkdir): walks each `/` separator, creating one level at a
/// time.
pub fn mkdir_recursive(backend: &dyn StorageBackend, path: &str) -> io::Result<()> {
    let mut acc = String::new();
    for (i, segment) in path.trim_matches('/').split('/').enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i > 0 || !acc.is_empty() {
            acc.push('/');
        } else {
            acc.push('/');
        }
        acc.push_str(segment);
        if !backend.is_dir(&acc) {
            backend.mkdir_one(&acc)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------

#[derive(Clone)]
enum Node {
    File(Vec<u8>, u32),
    Dir,
}

/// A simple in-memory filesystem keyed by normalized absolute path
/// strings. Good enough to exercise every pipeline behavior in spec §4.5
/// without touching real disk.
pub struct MemBackend {
    nodes: Mutex<BTreeMap<String, Node>>,
    free: Mutex<u64>,
}

impl MemBackend {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        MemBackend { nodes: Mutex::new(nodes), free: Mutex::new(64 * 1024 * 1024) }
    }

    fn norm(path: &str) -> String {
        if path.is_empty() {
            return "/".to_string();
        }
        let mut p = path.replace("//", "/");
        if !p.starts_with('/') {
            p = format!("/{p}");
        }
        if p.len() > 1 {
            p = p.trim_end_matches('/').to_string();
        }
        p
    }

    fn parent(path: &str) -> String {
        match path.rfind('/') {
            Some(0) => "/".to_string(),
            Some(i) => path[..i].to_string(),
            None => "/".to_string(),
        }
    }

    /// Test hook: set the reported free-space figure (spec §4.5 low
    /// memory threshold is 3 KB).
    pub fn set_free_bytes(&self, bytes: u64) {
        *self.free.lock().unwrap() = bytes;
    }
}

impl Default for MemBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemBackend {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let path = Self::norm(path);
        match self.nodes.lock().unwrap().get(&path) {
            Some(Node::File(data, _)) => Ok(data.clone()),
            Some(Node::Dir) => Err(io::Error::new(io::ErrorKind::InvalidInput, "is a directory")),
            None => Err(io::Error::new(io::ErrorKind::NotFound, path)),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let path = Self::norm(path);
        let parent = Self::parent(&path);
        let mut nodes = self.nodes.lock().unwrap();
        if !matches!(nodes.get(&parent), Some(Node::Dir)) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "parent directory missing"));
        }
        nodes.insert(path, Node::File(data.to_vec(), 0));
        Ok(())
    }

    fn append(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let path = Self::norm(path);
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get_mut(&path) {
            Some(Node::File(existing, _)) => {
                existing.extend_from_slice(data);
                Ok(())
            }
            Some(Node::Dir) => Err(io::Error::new(io::ErrorKind::InvalidInput, "is a directory")),
            None => {
                let parent = Self::parent(&path);
                if !matches!(nodes.get(&parent), Some(Node::Dir)) {
                    return Err(io::Error::new(io::ErrorKind::NotFound, "parent directory missing"));
                }
                nodes.insert(path, Node::File(data.to_vec(), 0));
                Ok(())
            }
        }
    }

    fn remove_file(&self, path: &str) -> io::Result<()> {
        let path = Self::norm(path);
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.remove(&path) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, path)),
        }
    }

    fn remove_dir_all(&self, path: &str) -> io::Result<()> {
        let path = Self::norm(path);
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut nodes = self.nodes.lock().unwrap();
        if !nodes.contains_key(&path) {
            return Err(io::Error::new(io::ErrorKind::NotFound, path));
        }
        nodes.retain(|k, _| *k != path && !k.starts_with(&prefix));
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let from = Self::norm(from);
        let to = Self::norm(to);
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.remove(&from).ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, from.clone()))?;
        nodes.insert(to, node);
        Ok(())
    }

    fn mkdir_one(&self, path: &str) -> io::Result<()> {
        let path = Self::norm(path);
        let parent = Self::parent(&path);
        let mut nodes = self.nodes.lock().unwrap();
        if !matches!(nodes.get(&parent), Some(Node::Dir)) && parent != "/" {
            return Err(io::Error::new(io::ErrorKind::NotFound, "parent directory missing"));
        }
        nodes.entry(path).or_insert(Node::Dir);
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.nodes.lock().unwrap().contains_key(&Self::norm(path))
    }

    fn is_dir(&self, path: &str) -> bool {
        matches!(self.nodes.lock().unwrap().get(&Self::norm(path)), Some(Node::Dir))
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntryInfo>> {
        let path = Self::norm(path);
        let nodes = self.nodes.lock().unwrap();
        if !matches!(nodes.get(&path), Some(Node::Dir)) {
            return Err(io::Error::new(io::ErrorKind::NotFound, path));
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut out = Vec::new();
        for (k, v) in nodes.iter() {
            if let Some(rest) = k.strip_prefix(&prefix) {
                if rest.is_empty() || rest.contains('/') {
                    continue;
                }
                match v {
                    Node::File(data, mtime) => {
                        out.push(DirEntryInfo { name: rest.to_string(), is_dir: false, size: data.len() as u32, mtime: *mtime });
                    }
                    Node::Dir => out.push(DirEntryInfo { name: rest.to_string(), is_dir: true, size: 0, mtime: 0 }),
                }
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn stat(&self, path: &str) -> io::Result<DirEntryInfo> {
        let norm = Self::norm(path);
        let name = norm.rsplit('/').next().unwrap_or(&norm).to_string();
        match self.nodes.lock().unwrap().get(&norm) {
            Some(Node::File(data, mtime)) => Ok(DirEntryInfo { name, is_dir: false, size: data.len() as u32, mtime: *mtime }),
            Some(Node::Dir) => Ok(DirEntryInfo { name, is_dir: true, size: 0, mtime: 0 }),
            None => Err(io::Error::new(io::ErrorKind::NotFound, norm)),
        }
    }

    fn free_bytes(&self) -> u64 {
        *self.free.lock().unwrap()
    }
}

// ---------------------------------------------------------------------
// Real filesystem backend
// ---------------------------------------------------------------------

/// A deployment's real backend, rooted at some directory on disk (an SD
/// card mount point or an internal flash filesystem mount).
pub struct StdFsBackend {
    root: std::path::PathBuf,
}

impl StdFsBackend {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        StdFsBackend { root: root.into() }
    }

    fn resolve(&self, path: &str) -> std::path::PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn mtime_secs(meta: &std::fs::Metadata) -> u32 {
        meta.modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

impl StorageBackend for StdFsBackend {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.resolve(path))
    }

    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        std::fs::write(self.resolve(path), data)
    }

    fn append(&self, path: &str, data: &[u8]) -> io::Result<()> {
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().create(true).append(true).open(self.resolve(path))?;
        f.write_all(data)
    }

    fn remove_file(&self, path: &str) -> io::Result<()> {
        std::fs::remove_file(self.resolve(path))
    }

    fn remove_dir_all(&self, path: &str) -> io::Result<()> {
        let p = self.resolve(path);
        if p.is_dir() {
            std::fs::remove_dir_all(p)
        } else {
            std::fs::remove_file(p)
        }
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        std::fs::rename(self.resolve(from), self.resolve(to))
    }

    fn mkdir_one(&self, path: &str) -> io::Result<()> {
        match std::fs::create_dir(self.resolve(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn is_dir(&self, path: &str) -> bool {
        self.resolve(path).is_dir()
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntryInfo>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(self.resolve(path))? {
            let entry = entry?;
            let meta = entry.metadata()?;
            out.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: meta.len() as u32,
                mtime: Self::mtime_secs(&meta),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn stat(&self, path: &str) -> io::Result<DirEntryInfo> {
        let p = self.resolve(path);
        let meta = std::fs::metadata(&p)?;
        Ok(DirEntryInfo {
            name: p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            is_dir: meta.is_dir(),
            size: meta.len() as u32,
            mtime: Self::mtime_secs(&meta),
        })
    }

    fn free_bytes(&self) -> u64 {
        // Real deployments would query the mounted filesystem's statvfs;
        // not meaningfully testable in a hosted build, so report "plenty".
        u64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let be = MemBackend::new();
        be.write("/DATA/SIGNALS/a.sub", b"hello").unwrap();
        assert_eq!(be.read("/DATA/SIGNALS/a.sub").unwrap(), b"hello");
    }

    #[test]
    fn mkdir_recursive_creates_every_level() {
        let be = MemBackend::new();
        mkdir_recursive(&be, "/DATA/SIGNALS/nested/deep").unwrap();
        assert!(be.is_dir("/DATA/SIGNALS/nested/deep"));
        assert!(be.is_dir("/DATA/SIGNALS/nested"));
        assert!(be.is_dir("/DATA/SIGNALS"));
    }

    #[test]
    fn remove_dir_all_removes_descendants() {
        let be = MemBackend::new();
        mkdir_recursive(&be, "/DATA/SIGNALS").unwrap();
        be.write("/DATA/SIGNALS/a.sub", b"x").unwrap();
        be.remove_dir_all("/DATA/SIGNALS").unwrap();
        assert!(!be.exists("/DATA/SIGNALS/a.sub"));
        assert!(!be.exists("/DATA/SIGNALS"));
    }

    #[test]
    fn append_creates_file_if_missing() {
        let be = MemBackend::new();
        mkdir_recursive(&be, "/DATA/TEMP").unwrap();
        be.append("/DATA/TEMP/up.bin", b"abc").unwrap();
        be.append("/DATA/TEMP/up.bin", b"def").unwrap();
        assert_eq!(be.read("/DATA/TEMP/up.bin").unwrap(), b"abcdef");
    }

    #[test]
    fn read_dir_lists_direct_children_only() {
        let be = MemBackend::new();
        mkdir_recursive(&be, "/DATA/SIGNALS/nested").unwrap();
        be.write("/DATA/SIGNALS/a.sub", b"x").unwrap();
        let entries = be.read_dir("/DATA/SIGNALS").unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"a.sub"));
        assert!(names.contains(&"nested"));
        assert!(!names.iter().any(|n| n.contains('/')));
    }
}
