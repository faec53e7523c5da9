// ── Tar archive utilities ──
//
// Build contexts and `copy_to` payloads are tarred on a blocking task and
// handed to the transport as a byte stream through a bounded channel, so a
// large context never sits in memory at once. Downloads are unpacked the
// same way in reverse.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use glob::{MatchOptions, Pattern};
use podkit_api::ByteStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::CoreError;

const IGNORE_FILES: [&str; 2] = [".containerignore", ".dockerignore"];
const CHUNK_SIZE: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 8;

// ── Ignore files ─────────────────────────────────────────────────────

/// Exclude patterns from `.containerignore`, else `.dockerignore`.
/// A context with neither yields no patterns.
pub fn read_ignore_file(dir: &Path) -> Result<Vec<String>, CoreError> {
    for name in IGNORE_FILES {
        let path = dir.join(name);
        match fs::read_to_string(&path) {
            Ok(text) => {
                debug!(path = %path.display(), "using ignore file");
                return Ok(parse_ignore(&text));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CoreError::archive(format!("{}: {e}", path.display()))),
        }
    }
    Ok(Vec::new())
}

fn parse_ignore(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

// ── Exclude patterns ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Rule {
    pattern: Pattern,
    negated: bool,
}

impl Rule {
    /// A path matches when it or one of its ancestors matches.
    fn matches(&self, path: &str) -> bool {
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::new()
        };
        path.match_indices('/')
            .map(|(at, _)| &path[..at])
            .chain(std::iter::once(path))
            .any(|candidate| self.pattern.matches_with(candidate, options))
    }
}

/// Ignore-file patterns relative to the context root.
///
/// Patterns are evaluated in order and the last match wins, so a `!`
/// pattern re-includes what an earlier one excluded.
#[derive(Debug, Clone, Default)]
pub struct ExcludePatterns {
    rules: Vec<Rule>,
}

impl ExcludePatterns {
    pub fn new(patterns: &[String]) -> Result<Self, CoreError> {
        let mut rules = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let raw = raw.trim();
            let (negated, body) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, raw),
            };
            let body = normalize_pattern(body);
            if body.is_empty() {
                continue;
            }
            let pattern = Pattern::new(&body).map_err(|e| {
                CoreError::invalid(format!("invalid ignore pattern {raw:?}: {e}"))
            })?;
            rules.push(Rule { pattern, negated });
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether any `!` pattern exists; excluded directories must then
    /// still be walked.
    pub fn has_exceptions(&self) -> bool {
        self.rules.iter().any(|rule| rule.negated)
    }

    pub fn is_excluded(&self, relative: &Path) -> bool {
        let path = slash_path(relative);
        if path.is_empty() {
            return false;
        }
        self.rules
            .iter()
            .fold(false, |excluded, rule| {
                if rule.matches(&path) { !rule.negated } else { excluded }
            })
    }
}

fn normalize_pattern(pattern: &str) -> String {
    let mut body = pattern.trim_start_matches("./").trim_start_matches('/');
    body = body.trim_end_matches('/');
    body.to_owned()
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ── Create ───────────────────────────────────────────────────────────

/// Stream a tar of the directory's contents, minus excluded paths.
///
/// Entries are named relative to `dir`. Symlinks are stored as links,
/// ownership is reset to root and modes are kept.
pub fn create_archive(dir: &Path, excludes: ExcludePatterns) -> Result<ByteStream, CoreError> {
    create_archive_with(dir, excludes, Vec::new())
}

/// Like [`create_archive`], then append each `(source, name)` file from
/// outside the directory under its archive name.
pub fn create_archive_with(
    dir: &Path,
    excludes: ExcludePatterns,
    extra: Vec<(PathBuf, PathBuf)>,
) -> Result<ByteStream, CoreError> {
    if !dir.is_dir() {
        return Err(CoreError::invalid(format!(
            "build context {} is not a directory",
            dir.display()
        )));
    }
    spawn_tar(dir.to_path_buf(), PathBuf::new(), excludes, extra)
}

/// Stream a tar holding one file or directory under its own base name,
/// the shape `put_archive` expects.
pub fn pack_path(path: &Path) -> Result<ByteStream, CoreError> {
    fs::symlink_metadata(path)
        .map_err(|e| CoreError::archive(format!("{}: {e}", path.display())))?;
    let name = path
        .file_name()
        .ok_or_else(|| CoreError::invalid(format!("cannot archive {}", path.display())))?;
    spawn_tar(
        path.to_path_buf(),
        PathBuf::from(name),
        ExcludePatterns::default(),
        Vec::new(),
    )
}

fn spawn_tar(
    source: PathBuf,
    name: PathBuf,
    excludes: ExcludePatterns,
    extra: Vec<(PathBuf, PathBuf)>,
) -> Result<ByteStream, CoreError> {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| CoreError::Internal(format!("archive needs a tokio runtime: {e}")))?;
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

    debug!(source = %source.display(), "streaming tar archive");
    handle.spawn_blocking(move || {
        let mut writer = ChannelWriter::new(tx.clone());
        let result = write_tar(&source, &name, &excludes, &extra, &mut writer)
            .and_then(|()| writer.flush());
        if let Err(e) = result {
            if e.kind() == io::ErrorKind::BrokenPipe {
                debug!("archive consumer went away");
            } else {
                warn!(source = %source.display(), error = %e, "tar archive failed");
                // The receiver may already be gone.
                let _ = tx.blocking_send(Err(e));
            }
        }
    });

    Ok(ReceiverStream::new(rx).boxed())
}

fn write_tar<W: Write>(
    source: &Path,
    name: &Path,
    excludes: &ExcludePatterns,
    extra: &[(PathBuf, PathBuf)],
    writer: W,
) -> io::Result<()> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    let min_depth = usize::from(name.as_os_str().is_empty());
    let mut walker = WalkDir::new(source)
        .min_depth(min_depth)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::other(e.to_string()))?;
        if excludes.is_excluded(relative) {
            if entry.file_type().is_dir() && !excludes.has_exceptions() {
                walker.skip_current_dir();
            }
            continue;
        }
        let archive_name = if relative.as_os_str().is_empty() {
            name.to_path_buf()
        } else {
            name.join(relative)
        };
        append_entry(&mut builder, entry.path(), &archive_name)?;
    }
    for (path, archive_name) in extra {
        append_entry(&mut builder, path, archive_name)?;
    }

    builder.into_inner()?.flush()
}

fn append_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    archive_name: &Path,
) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    let file_type = meta.file_type();

    let mut header = tar::Header::new_gnu();
    header.set_metadata_in_mode(&meta, tar::HeaderMode::Complete);
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root")?;
    header.set_groupname("root")?;

    if file_type.is_file() {
        builder.append_data(&mut header, archive_name, File::open(path)?)
    } else if file_type.is_dir() {
        builder.append_data(&mut header, archive_name, io::empty())
    } else if file_type.is_symlink() {
        let target = fs::read_link(path)?;
        builder.append_link(&mut header, archive_name, target)
    } else {
        debug!(path = %path.display(), "skipping special file");
        Ok(())
    }
}

/// `Write` half of the archive pipe. Chunks are sent once `CHUNK_SIZE`
/// bytes have accumulated; `blocking_send` applies back-pressure.
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: BytesMut,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self {
            tx,
            buf: BytesMut::with_capacity(CHUNK_SIZE),
        }
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK_SIZE {
            self.flush()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive reader dropped"))
    }
}

// ── Extract ──────────────────────────────────────────────────────────

/// Unpack a downloaded tar into `dest`, keeping permissions. Entries that
/// would land outside `dest` abort the extraction.
pub async fn extract_archive(stream: ByteStream, dest: &Path) -> Result<(), CoreError> {
    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| CoreError::archive(format!("{}: {e}", dest.display())))?;
    let reader = SyncIoBridge::new(StreamReader::new(stream));
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || unpack(reader, &dest))
        .await
        .map_err(|e| CoreError::Internal(format!("extract task failed: {e}")))?
}

fn unpack<R: io::Read>(reader: R, dest: &Path) -> Result<(), CoreError> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    for entry in archive.entries().map_err(CoreError::archive)? {
        let mut entry = entry.map_err(CoreError::archive)?;
        let path = entry.path().map_err(CoreError::archive)?.into_owned();
        if escapes(&path) {
            return Err(CoreError::archive(format!(
                "refusing archive entry outside destination: {}",
                path.display()
            )));
        }
        entry.unpack_in(dest).map_err(CoreError::archive)?;
    }
    Ok(())
}

fn escapes(path: &Path) -> bool {
    path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::os::unix::fs::{PermissionsExt, symlink};

    use futures_util::TryStreamExt;
    use pretty_assertions::assert_eq;

    use super::*;

    fn patterns(list: &[&str]) -> ExcludePatterns {
        let owned: Vec<String> = list.iter().map(|s| (*s).to_owned()).collect();
        ExcludePatterns::new(&owned).unwrap()
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .unwrap()
    }

    #[test]
    fn containerignore_wins_over_dockerignore() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".dockerignore"), "docker\n").unwrap();
        fs::write(
            dir.path().join(".containerignore"),
            "# comment\n\n  target  \n!target/keep\n",
        )
        .unwrap();
        assert_eq!(
            read_ignore_file(dir.path()).unwrap(),
            vec!["target".to_owned(), "!target/keep".to_owned()]
        );
    }

    #[test]
    fn missing_ignore_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_ignore_file(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn last_matching_pattern_wins() {
        let p = patterns(&["*.log", "!keep.log", "build/", "**/*.tmp"]);
        assert!(p.is_excluded(Path::new("debug.log")));
        assert!(!p.is_excluded(Path::new("keep.log")));
        assert!(!p.is_excluded(Path::new("src/debug.log")));
        assert!(p.is_excluded(Path::new("build")));
        assert!(p.is_excluded(Path::new("build/out/app")));
        assert!(p.is_excluded(Path::new("a/b/c.tmp")));
        assert!(!p.is_excluded(Path::new("src/main.rs")));
        assert!(p.has_exceptions());
    }

    #[test]
    fn negation_reincludes_inside_excluded_directory() {
        let p = patterns(&["docs", "!docs/README.md"]);
        assert!(p.is_excluded(Path::new("docs/guide.md")));
        assert!(!p.is_excluded(Path::new("docs/README.md")));
    }

    #[test]
    fn bad_pattern_is_invalid_argument() {
        let err = ExcludePatterns::new(&["[".to_owned()]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn archive_keeps_modes_and_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("Containerfile"), "FROM scratch\n").unwrap();
        fs::write(root.join("run.sh"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(root.join("run.sh"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(root.join("debug.log"), "noise").unwrap();
        fs::create_dir(root.join("conf")).unwrap();
        fs::write(root.join("conf/app.toml"), "x = 1").unwrap();
        symlink("conf/app.toml", root.join("app.toml")).unwrap();

        let stream = create_archive(root, patterns(&["*.log"])).unwrap();
        let bytes = collect(stream).await;

        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let header = entry.header();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            assert_eq!(header.uid().unwrap(), 0);
            assert_eq!(header.username().unwrap(), Some("root"));
            match name.as_str() {
                "run.sh" => assert_eq!(header.mode().unwrap() & 0o777, 0o755),
                "app.toml" => {
                    assert!(header.entry_type().is_symlink());
                    assert_eq!(
                        entry.link_name().unwrap().unwrap().to_str(),
                        Some("conf/app.toml")
                    );
                }
                _ => {}
            }
            seen.push(name);
        }
        seen.sort();
        assert_eq!(
            seen,
            vec!["Containerfile", "app.toml", "conf", "conf/app.toml", "run.sh"]
        );
    }

    #[tokio::test]
    async fn packed_file_extracts_with_its_mode() {
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("tool");
        fs::write(&file, "payload").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o750)).unwrap();

        let dest = tempfile::tempdir().unwrap();
        extract_archive(pack_path(&file).unwrap(), dest.path())
            .await
            .unwrap();

        let out = dest.path().join("tool");
        assert_eq!(fs::read_to_string(&out).unwrap(), "payload");
        assert_eq!(fs::metadata(&out).unwrap().permissions().mode() & 0o777, 0o750);
    }

    #[tokio::test]
    async fn escaping_entry_is_refused() {
        let mut header = tar::Header::new_gnu();
        let name = b"../evil";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(4);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();

        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, &b"evil"[..]).unwrap();
        let bytes = Bytes::from(builder.into_inner().unwrap());

        let stream: ByteStream = futures_util::stream::iter([Ok(bytes)]).boxed();
        let dest = tempfile::tempdir().unwrap();
        let err = extract_archive(stream, &dest.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Archive { .. }));
        assert!(!dest.path().join("evil").exists());
    }
}
