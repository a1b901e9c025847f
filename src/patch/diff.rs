//! Unified / git diff model.
//!
//! Parses the textual delta produced by `git diff` (or libgit2's patch
//! printer), keeps enough of the extended headers to render it back
//! unchanged, and can produce the reversal diff.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{PatchworkError, Result};

const DEV_NULL: &str = "/dev/null";
const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

fn hunk_header_pattern() -> Option<&'static Regex> {
    static HUNK_HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    HUNK_HEADER
        .get_or_init(|| Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@(.*)$").ok())
        .as_ref()
}

/// A parsed multi-file diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedDiff {
    pub files: Vec<FileDiff>,
}

impl UnifiedDiff {
    pub fn parse(text: &str) -> Result<Self> {
        DiffParser::default().parse(text)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Every path touched by the diff, old and new side, without `/dev/null`.
    pub fn touched_paths(&self) -> BTreeSet<String> {
        self.files.iter().flat_map(FileDiff::touched_paths).collect()
    }

    pub fn lines_added(&self) -> usize {
        self.files.iter().map(FileDiff::lines_added).sum()
    }

    pub fn lines_removed(&self) -> usize {
        self.files.iter().map(FileDiff::lines_removed).sum()
    }

    /// Diff that undoes this one. Binary file changes cannot be reversed.
    pub fn reverse(&self) -> Result<Self> {
        let files = self
            .files
            .iter()
            .map(FileDiff::reverse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { files })
    }
}

impl fmt::Display for UnifiedDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for file in &self.files {
            write!(f, "{file}")?;
        }
        Ok(())
    }
}

/// Extended header lines between `diff --git` and the hunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtendedHeader {
    OldMode(String),
    NewMode(String),
    NewFileMode(String),
    DeletedFileMode(String),
    Index {
        old: String,
        new: String,
        mode: Option<String>,
    },
    RenameFrom(String),
    RenameTo(String),
    CopyFrom(String),
    CopyTo(String),
    Other(String),
}

impl ExtendedHeader {
    fn parse(line: &str) -> Self {
        let value = |prefix: &str| line.strip_prefix(prefix).map(str::to_string);

        if let Some(v) = value("old mode ") {
            ExtendedHeader::OldMode(v)
        } else if let Some(v) = value("new mode ") {
            ExtendedHeader::NewMode(v)
        } else if let Some(v) = value("new file mode ") {
            ExtendedHeader::NewFileMode(v)
        } else if let Some(v) = value("deleted file mode ") {
            ExtendedHeader::DeletedFileMode(v)
        } else if let Some(v) = value("rename from ") {
            ExtendedHeader::RenameFrom(v)
        } else if let Some(v) = value("rename to ") {
            ExtendedHeader::RenameTo(v)
        } else if let Some(v) = value("copy from ") {
            ExtendedHeader::CopyFrom(v)
        } else if let Some(v) = value("copy to ") {
            ExtendedHeader::CopyTo(v)
        } else if let Some(rest) = line.strip_prefix("index ") {
            let (ids, mode) = match rest.split_once(' ') {
                Some((ids, mode)) => (ids, Some(mode.to_string())),
                None => (rest, None),
            };
            match ids.split_once("..") {
                Some((old, new)) => ExtendedHeader::Index {
                    old: old.to_string(),
                    new: new.to_string(),
                    mode,
                },
                None => ExtendedHeader::Other(line.to_string()),
            }
        } else {
            ExtendedHeader::Other(line.to_string())
        }
    }

    fn reverse(&self) -> Self {
        match self {
            ExtendedHeader::OldMode(m) => ExtendedHeader::NewMode(m.clone()),
            ExtendedHeader::NewMode(m) => ExtendedHeader::OldMode(m.clone()),
            ExtendedHeader::NewFileMode(m) => ExtendedHeader::DeletedFileMode(m.clone()),
            ExtendedHeader::DeletedFileMode(m) => ExtendedHeader::NewFileMode(m.clone()),
            ExtendedHeader::Index { old, new, mode } => ExtendedHeader::Index {
                old: new.clone(),
                new: old.clone(),
                mode: mode.clone(),
            },
            ExtendedHeader::RenameFrom(p) => ExtendedHeader::RenameTo(p.clone()),
            ExtendedHeader::RenameTo(p) => ExtendedHeader::RenameFrom(p.clone()),
            other => other.clone(),
        }
    }

    /// Position in git's header order, so reversed headers render canonically.
    fn rank(&self) -> u8 {
        match self {
            ExtendedHeader::OldMode(_) => 0,
            ExtendedHeader::NewMode(_) => 1,
            ExtendedHeader::DeletedFileMode(_) | ExtendedHeader::NewFileMode(_) => 2,
            ExtendedHeader::Other(_) => 3,
            ExtendedHeader::CopyFrom(_) | ExtendedHeader::RenameFrom(_) => 4,
            ExtendedHeader::CopyTo(_) | ExtendedHeader::RenameTo(_) => 5,
            ExtendedHeader::Index { .. } => 6,
        }
    }
}

impl fmt::Display for ExtendedHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtendedHeader::OldMode(m) => write!(f, "old mode {m}"),
            ExtendedHeader::NewMode(m) => write!(f, "new mode {m}"),
            ExtendedHeader::NewFileMode(m) => write!(f, "new file mode {m}"),
            ExtendedHeader::DeletedFileMode(m) => write!(f, "deleted file mode {m}"),
            ExtendedHeader::Index { old, new, mode } => match mode {
                Some(mode) => write!(f, "index {old}..{new} {mode}"),
                None => write!(f, "index {old}..{new}"),
            },
            ExtendedHeader::RenameFrom(p) => write!(f, "rename from {p}"),
            ExtendedHeader::RenameTo(p) => write!(f, "rename to {p}"),
            ExtendedHeader::CopyFrom(p) => write!(f, "copy from {p}"),
            ExtendedHeader::CopyTo(p) => write!(f, "copy to {p}"),
            ExtendedHeader::Other(line) => write!(f, "{line}"),
        }
    }
}

/// One file's section of a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    /// Paths from the `diff --git a/.. b/..` line.
    pub git_paths: Option<(String, String)>,
    pub headers: Vec<ExtendedHeader>,
    /// Path on the `---` side, `None` for `/dev/null`.
    pub old_path: Option<String>,
    /// Path on the `+++` side, `None` for `/dev/null`.
    pub new_path: Option<String>,
    /// Whether `---`/`+++` lines were present.
    pub has_file_markers: bool,
    pub binary: bool,
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    fn new() -> Self {
        Self {
            git_paths: None,
            headers: Vec::new(),
            old_path: None,
            new_path: None,
            has_file_markers: false,
            binary: false,
            hunks: Vec::new(),
        }
    }

    pub fn touched_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .old_path
            .iter()
            .chain(self.new_path.iter())
            .cloned()
            .collect();
        if !self.has_file_markers {
            if let Some((a, b)) = &self.git_paths {
                paths.push(a.clone());
                paths.push(b.clone());
            }
        }
        paths.retain(|p| p != DEV_NULL);
        paths
    }

    pub fn lines_added(&self) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| l.kind == LineKind::Add)
            .count()
    }

    pub fn lines_removed(&self) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| l.kind == LineKind::Remove)
            .count()
    }

    pub fn reverse(&self) -> Result<Self> {
        if self.binary {
            let path = self.touched_paths().into_iter().next().unwrap_or_default();
            return Err(PatchworkError::InvalidDiff(format!(
                "binary change to '{path}' cannot be reversed"
            )));
        }

        let mut headers: Vec<ExtendedHeader> =
            self.headers.iter().map(ExtendedHeader::reverse).collect();
        headers.sort_by_key(ExtendedHeader::rank);

        Ok(Self {
            git_paths: self
                .git_paths
                .as_ref()
                .map(|(a, b)| (b.clone(), a.clone())),
            headers,
            old_path: self.new_path.clone(),
            new_path: self.old_path.clone(),
            has_file_markers: self.has_file_markers,
            binary: false,
            hunks: self.hunks.iter().map(Hunk::reverse).collect(),
        })
    }
}

impl fmt::Display for FileDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((a, b)) = &self.git_paths {
            writeln!(f, "diff --git a/{a} b/{b}")?;
        }
        for header in &self.headers {
            writeln!(f, "{header}")?;
        }
        if self.has_file_markers {
            match &self.old_path {
                Some(p) => writeln!(f, "--- a/{p}")?,
                None => writeln!(f, "--- {DEV_NULL}")?,
            }
            match &self.new_path {
                Some(p) => writeln!(f, "+++ b/{p}")?,
                None => writeln!(f, "+++ {DEV_NULL}")?,
            }
        }
        for hunk in &self.hunks {
            write!(f, "{hunk}")?;
        }
        Ok(())
    }
}

/// A contiguous change block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    /// Text after the closing `@@`, usually the enclosing function.
    pub section: String,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Swap sides. Within every run of changed lines the removals are moved
    /// ahead of the additions, as git prints them.
    pub fn reverse(&self) -> Self {
        let mut lines = Vec::with_capacity(self.lines.len());
        let mut removes = Vec::new();
        let mut adds = Vec::new();

        for line in &self.lines {
            match line.kind {
                LineKind::Context => {
                    lines.append(&mut removes);
                    lines.append(&mut adds);
                    lines.push(line.clone());
                }
                LineKind::Add => removes.push(line.reverse()),
                LineKind::Remove => adds.push(line.reverse()),
            }
        }
        lines.append(&mut removes);
        lines.append(&mut adds);

        Self {
            old_start: self.new_start,
            old_count: self.new_count,
            new_start: self.old_start,
            new_count: self.old_count,
            section: self.section.clone(),
            lines,
        }
    }
}

fn fmt_range(start: u32, count: u32) -> String {
    if count == 1 {
        start.to_string()
    } else {
        format!("{start},{count}")
    }
}

impl fmt::Display for Hunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "@@ -{} +{} @@{}",
            fmt_range(self.old_start, self.old_count),
            fmt_range(self.new_start, self.new_count),
            self.section
        )?;
        for line in &self.lines {
            write!(f, "{line}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineKind {
    Context,
    Add,
    Remove,
}

/// A single hunk line. `missing_newline` carries the
/// `\ No newline at end of file` marker that follows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkLine {
    pub kind: LineKind,
    pub content: String,
    pub missing_newline: bool,
}

impl HunkLine {
    fn new(kind: LineKind, content: &str) -> Self {
        Self {
            kind,
            content: content.to_string(),
            missing_newline: false,
        }
    }

    fn reverse(&self) -> Self {
        let kind = match self.kind {
            LineKind::Context => LineKind::Context,
            LineKind::Add => LineKind::Remove,
            LineKind::Remove => LineKind::Add,
        };
        Self {
            kind,
            ..self.clone()
        }
    }
}

impl fmt::Display for HunkLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            LineKind::Context => ' ',
            LineKind::Add => '+',
            LineKind::Remove => '-',
        };
        writeln!(f, "{prefix}{}", self.content)?;
        if self.missing_newline {
            writeln!(f, "{NO_NEWLINE_MARKER}")?;
        }
        Ok(())
    }
}

/// Line-oriented diff parser.
#[derive(Debug, Default)]
pub struct DiffParser {
    files: Vec<FileDiff>,
    current: Option<FileDiff>,
    /// Old and new lines still expected by the open hunk.
    remaining: (u32, u32),
    in_binary: bool,
}

impl DiffParser {
    pub fn parse(mut self, text: &str) -> Result<UnifiedDiff> {
        let body = text.strip_suffix('\n').unwrap_or(text);
        if !body.is_empty() {
            for (number, line) in body.split('\n').enumerate() {
                self.line(line)
                    .map_err(|reason| PatchworkError::InvalidDiff(format!("line {}: {reason}", number + 1)))?;
            }
        }
        if self.remaining != (0, 0) {
            return Err(PatchworkError::InvalidDiff(
                "diff ends inside a hunk".to_string(),
            ));
        }
        self.finish_file();
        Ok(UnifiedDiff { files: self.files })
    }

    fn line(&mut self, line: &str) -> std::result::Result<(), String> {
        if self.remaining != (0, 0) {
            return self.hunk_line(line);
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            self.finish_file();
            let mut file = FileDiff::new();
            file.git_paths = Some(split_git_paths(rest)?);
            self.current = Some(file);
            return Ok(());
        }

        if self.in_binary {
            self.file_mut()?.headers.push(ExtendedHeader::Other(line.to_string()));
            return Ok(());
        }

        if line == NO_NEWLINE_MARKER {
            let last = self
                .current
                .as_mut()
                .and_then(|f| f.hunks.last_mut())
                .and_then(|h| h.lines.last_mut())
                .ok_or("newline marker outside a hunk")?;
            last.missing_newline = true;
            return Ok(());
        }

        if let Some(path) = line.strip_prefix("--- ") {
            let starts_new = self
                .current
                .as_ref()
                .map_or(true, |f| f.has_file_markers);
            if starts_new {
                self.finish_file();
                self.current = Some(FileDiff::new());
            }
            let file = self.file_mut()?;
            file.old_path = strip_side(path, "a/");
            file.has_file_markers = true;
            return Ok(());
        }

        if let Some(path) = line.strip_prefix("+++ ") {
            let file = self.file_mut()?;
            file.new_path = strip_side(path, "b/");
            return Ok(());
        }

        if line.starts_with("@@ ") {
            let hunk = parse_hunk_header(line)?;
            self.remaining = (hunk.old_count, hunk.new_count);
            self.file_mut()?.hunks.push(hunk);
            return Ok(());
        }

        match self.current.as_mut() {
            Some(file) if file.hunks.is_empty() && !line.is_empty() => {
                if line.starts_with("Binary files ") || line == "GIT binary patch" {
                    file.binary = true;
                    self.in_binary = true;
                }
                file.headers.push(ExtendedHeader::parse(line));
                Ok(())
            }
            // preamble before the first file and blank separators
            _ => Ok(()),
        }
    }

    fn hunk_line(&mut self, line: &str) -> std::result::Result<(), String> {
        let (kind, content) = match line.chars().next() {
            Some(' ') => (LineKind::Context, &line[1..]),
            Some('+') => (LineKind::Add, &line[1..]),
            Some('-') => (LineKind::Remove, &line[1..]),
            // some tools strip the space off empty context lines
            None => (LineKind::Context, ""),
            Some('\\') => {
                let hunk = self.hunk_mut()?;
                let last = hunk.lines.last_mut().ok_or("newline marker before any line")?;
                last.missing_newline = true;
                return Ok(());
            }
            Some(_) => return Err(format!("unexpected line inside hunk: '{line}'")),
        };

        let (old_left, new_left) = self.remaining;
        let (old_left, new_left) = match kind {
            LineKind::Context => (old_left.checked_sub(1), new_left.checked_sub(1)),
            LineKind::Add => (Some(old_left), new_left.checked_sub(1)),
            LineKind::Remove => (old_left.checked_sub(1), Some(new_left)),
        };
        match (old_left, new_left) {
            (Some(o), Some(n)) => self.remaining = (o, n),
            _ => return Err("hunk has more lines than its header declares".to_string()),
        }

        self.hunk_mut()?.lines.push(HunkLine::new(kind, content));
        Ok(())
    }

    fn file_mut(&mut self) -> std::result::Result<&mut FileDiff, String> {
        self.current.as_mut().ok_or_else(|| "line outside any file section".to_string())
    }

    fn hunk_mut(&mut self) -> std::result::Result<&mut Hunk, String> {
        self.file_mut()?
            .hunks
            .last_mut()
            .ok_or_else(|| "line outside any hunk".to_string())
    }

    fn finish_file(&mut self) {
        self.in_binary = false;
        if let Some(file) = self.current.take() {
            self.files.push(file);
        }
    }
}

fn unquote(path: &str) -> &str {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
}

/// Parse `a/<old> b/<new>`. Paths with spaces are resolved by assuming both
/// sides are equal, which holds for everything but renames.
fn split_git_paths(rest: &str) -> std::result::Result<(String, String), String> {
    let rest = rest.trim_end();
    if rest.len() > 5 && (rest.len() - 1) % 2 == 0 {
        let half = (rest.len() - 1) / 2;
        if rest.is_char_boundary(half) {
            let (a, b) = (&rest[..half], &rest[half + 1..]);
            if let (Some(a), Some(b)) = (a.strip_prefix("a/"), b.strip_prefix("b/")) {
                if a == b {
                    return Ok((a.to_string(), b.to_string()));
                }
            }
        }
    }
    let split = rest
        .rfind(" b/")
        .or_else(|| rest.rfind(" \"b/"))
        .ok_or_else(|| format!("malformed diff --git header: '{rest}'"))?;
    let a = unquote(&rest[..split]);
    let b = unquote(&rest[split + 1..]);
    match (a.strip_prefix("a/"), b.strip_prefix("b/")) {
        (Some(a), Some(b)) => Ok((a.to_string(), b.to_string())),
        _ => Err(format!("malformed diff --git header: '{rest}'")),
    }
}

/// Strip the `a/` or `b/` prefix and any trailing timestamp; `/dev/null` is `None`.
fn strip_side(raw: &str, prefix: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim_end();
    let raw = unquote(raw);
    if raw == DEV_NULL {
        return None;
    }
    Some(raw.strip_prefix(prefix).unwrap_or(raw).to_string())
}

fn parse_hunk_header(line: &str) -> std::result::Result<Hunk, String> {
    let pattern = hunk_header_pattern().ok_or("hunk header pattern unavailable")?;
    let caps = pattern
        .captures(line)
        .ok_or_else(|| format!("malformed hunk header: '{line}'"))?;

    let number = |idx: usize, default: u32| -> std::result::Result<u32, String> {
        match caps.get(idx) {
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|e| format!("bad number in hunk header '{line}': {e}")),
            None => Ok(default),
        }
    };

    Ok(Hunk {
        old_start: number(1, 0)?,
        old_count: number(2, 1)?,
        new_start: number(3, 0)?,
        new_count: number(4, 1)?,
        section: caps.get(5).map(|m| m.as_str().to_string()).unwrap_or_default(),
        lines: Vec::new(),
    })
}
