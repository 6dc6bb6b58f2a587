//! Source management for the assembler.
//!
//! The [`SourceManager`] holds every source the assembler has seen (files and in-memory text)
//! and a stack of the sources that are currently open. The top of the stack is the current source;
//! `.include` pushes a new source and reaching the end of an included source resumes its parent.
//!
//! Each source's lines are read once and cached, so that both assembler passes
//! (and any front-end displaying source lines) can re-read them cheaply.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An identifier for a source registered with a [`SourceManager`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct FileId(pub(crate) usize);

/// A location in source: a file and a zero-based line number.
///
/// When displayed, this is formatted with a one-based line number:
/// ```
/// # use m6502_ensemble::asm::{Assembler, AsmFlags};
/// # use m6502_ensemble::err::SourceLocation;
/// # let mut asm = Assembler::new(AsmFlags::default());
/// let file = asm.add_text("main.asm", "");
/// let loc = SourceLocation::new(file, "main.asm", 2);
/// assert_eq!(loc.to_string(), r#""main.asm", line #3"#);
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct SourceLocation {
    /// The file this location is in.
    pub file: FileId,
    /// The display name of the file.
    pub name: Arc<str>,
    /// The zero-based line number.
    pub line: usize,
}
impl SourceLocation {
    /// Creates a new source location.
    pub fn new(file: FileId, name: impl Into<Arc<str>>, line: usize) -> Self {
        Self { file, name: name.into(), line }
    }
}
impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}, line #{}", &*self.name, self.line + 1)
    }
}

#[derive(Debug)]
struct Source {
    name: Arc<str>,
    /// The resolved path, if this source is backed by a file.
    path: Option<PathBuf>,
    /// The cached lines, read on first open.
    lines: Option<Arc<[Arc<str>]>>,
}
impl Source {
    fn load(&mut self) -> io::Result<Arc<[Arc<str>]>> {
        if let Some(lines) = &self.lines {
            return Ok(Arc::clone(lines));
        }

        // In-memory sources are created with their lines, so this must be a file.
        let path = self.path.as_deref().ok_or(io::ErrorKind::NotFound)?;
        let text = std::fs::read_to_string(path)?;
        let lines: Arc<[Arc<str>]> = split_lines(&text);
        self.lines = Some(Arc::clone(&lines));
        Ok(lines)
    }
}

fn split_lines(text: &str) -> Arc<[Arc<str>]> {
    text.lines().map(Arc::from).collect()
}

#[derive(Debug)]
struct Frame {
    file: FileId,
    lines: Arc<[Arc<str>]>,
    next: usize,
}

/// The error raised when a source could not be opened.
#[derive(Debug)]
pub struct OpenErr {
    /// The path that was attempted.
    pub path: PathBuf,
    /// The reason opening failed.
    pub error: io::Error,
}

/// Registry and include stack of assembler sources.
///
/// See the [module-level documentation](self) for more details.
#[derive(Debug, Default)]
pub struct SourceManager {
    sources: Vec<Source>,
    stack: Vec<Frame>,
    /// Resolved paths of every file included during the current pass.
    included: HashSet<PathBuf>,
    include_dirs: Vec<PathBuf>,
}
impl SourceManager {
    /// Creates a new source manager, which searches the given directories for includes.
    pub fn new(include_dirs: Vec<PathBuf>) -> Self {
        Self { include_dirs, ..Default::default() }
    }

    /// Replaces the directories searched for includes.
    pub fn set_include_dirs(&mut self, include_dirs: Vec<PathBuf>) {
        self.include_dirs = include_dirs;
    }

    /// Registers in-memory source text under a display name.
    pub fn add_text(&mut self, name: &str, text: &str) -> FileId {
        self.push_source(Source { name: name.into(), path: None, lines: Some(split_lines(text)) })
    }

    /// Registers a source file.
    ///
    /// The file is not read until it is first assembled.
    /// Registering the same path twice returns the same [`FileId`].
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> FileId {
        let path = canonical(path.as_ref());
        if let Some(id) = self.find_path(&path) {
            return id;
        }

        let name = path.display().to_string();
        self.push_source(Source { name: name.into(), path: Some(path), lines: None })
    }

    fn push_source(&mut self, source: Source) -> FileId {
        self.sources.push(source);
        FileId(self.sources.len() - 1)
    }
    fn find_path(&self, path: &Path) -> Option<FileId> {
        self.sources.iter()
            .position(|s| s.path.as_deref() == Some(path))
            .map(FileId)
    }

    /// The display name of a source.
    pub fn name(&self, file: FileId) -> Option<&Arc<str>> {
        self.sources.get(file.0).map(|s| &s.name)
    }
    /// The resolved path of a source, if it is backed by a file.
    pub fn path(&self, file: FileId) -> Option<&Path> {
        self.sources.get(file.0)?.path.as_deref()
    }
    /// Reads a (zero-indexed) line of a source, if the source has been loaded.
    pub fn line(&self, file: FileId, line: usize) -> Option<&str> {
        self.sources.get(file.0)?.lines.as_ref()?
            .get(line)
            .map(|l| &**l)
    }
    /// The number of lines in a source, if it has been loaded.
    pub fn line_count(&self, file: FileId) -> Option<usize> {
        self.sources.get(file.0)?.lines.as_ref().map(|l| l.len())
    }
    /// Iterates over every registered source.
    pub fn files(&self) -> impl Iterator<Item=(FileId, &str)> + '_ {
        self.sources.iter()
            .enumerate()
            .map(|(i, s)| (FileId(i), &*s.name))
    }

    /// Starts reading from a root source, discarding any open sources.
    ///
    /// This also forgets which files were included,
    /// so that every pass sees the same includes.
    pub fn begin(&mut self, root: FileId) -> Result<(), OpenErr> {
        self.stack.clear();
        self.included.clear();
        self.open(root)
    }

    /// Discards all open sources.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.included.clear();
    }

    fn open(&mut self, file: FileId) -> Result<(), OpenErr> {
        let source = &mut self.sources[file.0];
        let lines = source.load().map_err(|error| OpenErr {
            path: source.path.clone().unwrap_or_else(|| PathBuf::from(&*source.name)),
            error,
        })?;
        if let Some(path) = &source.path {
            self.included.insert(path.clone());
        }

        tracing::debug!(file = &*self.sources[file.0].name, depth = self.stack.len(), "opened source");
        self.stack.push(Frame { file, lines, next: 0 });
        Ok(())
    }

    /// The source currently being read.
    pub fn current(&self) -> Option<FileId> {
        self.stack.last().map(|f| f.file)
    }

    /// Reads the next line, returning its location and text.
    ///
    /// Reaching the end of an included source resumes its parent.
    /// This returns `None` once the root source ends.
    pub fn next_line(&mut self) -> Option<(SourceLocation, Arc<str>)> {
        loop {
            let frame = self.stack.last_mut()?;

            if let Some(text) = frame.lines.get(frame.next) {
                let text = Arc::clone(text);
                let loc = SourceLocation::new(frame.file, Arc::clone(&self.sources[frame.file.0].name), frame.next);
                frame.next += 1;
                return Some((loc, text));
            }

            let done = self.stack.pop();
            if let Some(Frame { file, .. }) = done {
                tracing::debug!(file = &*self.sources[file.0].name, "closed source");
            }
        }
    }

    /// Resolves the path of an include.
    ///
    /// This is resolved (in order):
    /// 1. relative to the directory of the current file (if that file exists),
    /// 2. in each include directory (if that file exists),
    /// 3. as written.
    pub fn resolve_include(&self, name: &str) -> PathBuf {
        let current_dir = self.current()
            .and_then(|f| self.path(f))
            .and_then(Path::parent);

        current_dir.into_iter()
            .chain(self.include_dirs.iter().map(PathBuf::as_path))
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
            .unwrap_or_else(|| PathBuf::from(name))
    }

    /// Includes a file, making it the current source.
    ///
    /// If the resolved file was already included this pass, nothing happens and this returns `false`.
    pub fn include(&mut self, name: &str) -> Result<bool, OpenErr> {
        let path = canonical(&self.resolve_include(name));
        if self.included.contains(&path) {
            tracing::debug!(path = %path.display(), "skipping file that was already included");
            return Ok(false);
        }

        let id = match self.find_path(&path) {
            Some(id) => id,
            None => self.add_file(&path),
        };
        self.open(id)?;
        Ok(true)
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::PathBuf;

    use super::*;

    /// A scratch directory under the system temp dir, removed on drop.
    pub(crate) struct TempDir(pub PathBuf);
    impl TempDir {
        pub fn new(tag: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("m6502-ensemble-{tag}-{}", std::process::id()));
            let _ = std::fs::remove_dir_all(&dir);
            std::fs::create_dir_all(&dir).unwrap();
            TempDir(dir)
        }
        pub fn write(&self, name: &str, text: &str) -> PathBuf {
            let path = self.0.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, text).unwrap();
            path
        }
    }
    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn drain(sm: &mut SourceManager) -> Vec<(usize, String)> {
        std::iter::from_fn(|| sm.next_line())
            .map(|(loc, text)| (loc.line, text.to_string()))
            .collect()
    }

    #[test]
    fn test_text_lines() {
        let mut sm = SourceManager::default();
        let root = sm.add_text("a.asm", "one\r\ntwo\n\nfour");
        sm.begin(root).unwrap();

        assert_eq!(sm.current(), Some(root));
        assert_eq!(drain(&mut sm), [
            (0, "one".to_string()),
            (1, "two".to_string()),
            (2, "".to_string()),
            (3, "four".to_string()),
        ]);
        assert_eq!(sm.current(), None);

        // re-readable
        sm.begin(root).unwrap();
        assert_eq!(drain(&mut sm).len(), 4);
        assert_eq!(sm.line(root, 3), Some("four"));
        assert_eq!(sm.line_count(root), Some(4));
    }

    #[test]
    fn test_include_stack() {
        let dir = TempDir::new("src-stack");
        dir.write("inc.asm", "i0\ni1");

        let mut sm = SourceManager::default();
        let root = sm.add_file(dir.write("main.asm", "m0\nm1\nm2"));
        sm.begin(root).unwrap();

        assert_eq!(sm.next_line().unwrap().1.as_ref(), "m0");
        assert!(sm.include("inc.asm").unwrap());
        let (loc, text) = sm.next_line().unwrap();
        assert_eq!((loc.line, text.as_ref()), (0, "i0"));
        assert_ne!(loc.file, root);
        assert_eq!(sm.next_line().unwrap().1.as_ref(), "i1");
        // back in the parent
        let (loc, text) = sm.next_line().unwrap();
        assert_eq!((loc.file, loc.line, text.as_ref()), (root, 1, "m1"));

        // already included
        assert!(!sm.include("inc.asm").unwrap());
        assert_eq!(sm.next_line().unwrap().1.as_ref(), "m2");
        assert!(sm.next_line().is_none());
    }

    #[test]
    fn test_include_resolution() {
        let dir = TempDir::new("src-resolve");
        let lib = dir.0.join("lib");
        dir.write("lib/util.asm", "util");
        dir.write("src/local.asm", "local");
        dir.write("lib/local.asm", "lib-local");
        let root = dir.write("src/main.asm", "");

        let mut sm = SourceManager::new(vec![lib.clone()]);
        let root = sm.add_file(root);
        sm.begin(root).unwrap();

        // current file's directory first
        assert_eq!(canonical(&sm.resolve_include("local.asm")), canonical(&dir.0.join("src/local.asm")));
        // then include directories
        assert_eq!(canonical(&sm.resolve_include("util.asm")), canonical(&lib.join("util.asm")));
        // else unresolved
        assert_eq!(sm.resolve_include("missing.asm"), PathBuf::from("missing.asm"));

        let err = sm.include("missing.asm").unwrap_err();
        assert_eq!(err.path, PathBuf::from("missing.asm"));
        assert_eq!(err.error.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_missing_root() {
        let mut sm = SourceManager::default();
        let root = sm.add_file("/definitely/not/here.asm");
        assert!(sm.begin(root).is_err());
        assert_eq!(sm.add_file("/definitely/not/here.asm"), root);
    }
}
