//! The `"dir"` migration source: one `.sql` file per migration.
//!
//! A file carries a forward block and optionally a backward block, each
//! introduced by a directive line:
//!
//! ```sql
//! -- +migrate forward
//! CREATE TABLE users (id INTEGER PRIMARY KEY);
//!
//! -- +migrate backward
//! DROP TABLE users;
//! ```
//!
//! Appending `notransaction` to a directive runs that block outside of a
//! transaction.
//!
//! [`DirSource::squash`](MigrationSource::squash) merges all migrations into
//! one file. Each block of it sits under a `-- +migrate squashed <name>`
//! line, and loading the file yields the original migrations again.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use oxide_shift_core::{
    Migration, MigrateError, MigrationSet, MigrationSource, MigrationSourceFactory, Params,
    Result, SqlExecStep,
};

/// Name under which [`DirSourceFactory`] is usually registered.
pub const SOURCE_NAME: &str = "dir";

/// Width of the zero-padded id of a created migration.
const ID_WIDTH: usize = 4;

/// A squashed file is written under this suffix, then renamed into place.
const SQUASH_TMP_SUFFIX: &str = ".squash.tmp";

const MIGRATION_TEMPLATE: &str = "\
-- +migrate forward

-- Append \"notransaction\" to the directive above to run this block
-- outside of a transaction.


-- +migrate backward

-- Delete this block if the migration can't be reversed.
";

/// Errors in the contents of a migration file.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The file has no directive line.
    #[error("couldn't find any +migrate directives")]
    NoDirectives,

    /// The file has more than two directive lines.
    #[error("too many (more than 2) +migrate directives")]
    TooManyDirectives,

    /// Two blocks for the same direction.
    #[error("duplicate \"+migrate {0}\" directive")]
    DuplicateDirection(&'static str),

    /// A directive names both directions.
    #[error("backward and forward are exclusive")]
    ConflictingDirections,

    /// A directive names neither direction.
    #[error("either forward or backward has to be specified for this +migrate directive")]
    MissingDirection,

    /// A directive repeats a flag.
    #[error("duplicate {0} flag")]
    DuplicateFlag(String),

    /// A directive has an unknown flag.
    #[error("invalid +migrate parameter: {0:?}")]
    InvalidFlag(String),

    /// Only a backward block.
    #[error("missing \"+migrate forward\" directive")]
    MissingForward,

    /// `create` or `squash` was called with a blank description.
    #[error("you have to provide a non-empty description")]
    EmptyDescription,

    /// `squash` found no migrations.
    #[error("there is nothing to squash")]
    NothingToSquash,
}

fn directive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*--\s*\+migrate\s+(.*)$").expect("valid regex"))
}

fn squashed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*--\s*\+migrate\s+squashed\s+(.*?)\s*$").expect("valid regex")
    })
}

/// Flags of one directive line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Directive {
    forward: bool,
    no_transaction: bool,
}

fn parse_directive(params: &str) -> std::result::Result<Directive, SourceError> {
    let (mut forward, mut backward, mut no_transaction) = (false, false, false);
    for flag in params.split_whitespace() {
        let seen = match flag {
            "forward" => &mut forward,
            "backward" => &mut backward,
            "notransaction" => &mut no_transaction,
            other => return Err(SourceError::InvalidFlag(other.to_string())),
        };
        if *seen {
            return Err(SourceError::DuplicateFlag(flag.to_string()));
        }
        *seen = true;
    }
    match (forward, backward) {
        (true, true) => Err(SourceError::ConflictingDirections),
        (false, false) => Err(SourceError::MissingDirection),
        _ => Ok(Directive {
            forward,
            no_transaction,
        }),
    }
}

/// Splits `lines` into an optional forward and backward block.
fn parse_blocks(
    lines: &[&str],
) -> std::result::Result<(Option<SqlExecStep>, Option<SqlExecStep>), SourceError> {
    let directives: Vec<(usize, &str)> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| {
            directive_regex()
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|params| (i, params.as_str()))
        })
        .collect();

    match directives.len() {
        0 => return Err(SourceError::NoDirectives),
        1 | 2 => {}
        _ => return Err(SourceError::TooManyDirectives),
    }

    let mut forward = None;
    let mut backward = None;
    for (i, &(line_idx, params)) in directives.iter().enumerate() {
        let directive = parse_directive(params)?;
        let end = directives.get(i + 1).map_or(lines.len(), |&(next, _)| next);

        let mut step = SqlExecStep::new(lines[line_idx + 1..end].join("\n"));
        if directive.no_transaction {
            step = step.no_transaction();
        }

        let (slot, direction) = if directive.forward {
            (&mut forward, "forward")
        } else {
            (&mut backward, "backward")
        };
        if slot.is_some() {
            return Err(SourceError::DuplicateDirection(direction));
        }
        *slot = Some(step);
    }
    Ok((forward, backward))
}

fn directive_line(forward: bool, no_transaction: bool) -> String {
    let mut line = String::from("-- +migrate ");
    line.push_str(if forward { "forward" } else { "backward" });
    if no_transaction {
        line.push_str(" notransaction");
    }
    line
}

/// Where a migration was loaded from, for error messages.
fn location(name: &str, file: &str) -> String {
    if name == file {
        file.to_string()
    } else {
        format!("{name} squashed into {file}")
    }
}

/// The blocks of one migration as found in a file.
#[derive(Debug, Clone)]
struct Entry {
    name: String,
    file: String,
    forward: Option<SqlExecStep>,
    backward: Option<SqlExecStep>,
}

impl Entry {
    fn merge(
        &mut self,
        forward: Option<SqlExecStep>,
        backward: Option<SqlExecStep>,
    ) -> std::result::Result<(), SourceError> {
        for (slot, step, direction) in [
            (&mut self.forward, forward, "forward"),
            (&mut self.backward, backward, "backward"),
        ] {
            if let Some(step) = step {
                if slot.is_some() {
                    return Err(SourceError::DuplicateDirection(direction));
                }
                *slot = Some(step);
            }
        }
        Ok(())
    }

    fn into_migration(self) -> Result<Migration> {
        let Some(forward) = self.forward else {
            return Err(MigrateError::MigrationFile {
                file: location(&self.name, &self.file),
                source: Box::new(SourceError::MissingForward),
            });
        };
        let migration = Migration::new(self.name, forward)?;
        Ok(match self.backward {
            Some(backward) => migration.with_backward(backward),
            None => migration,
        })
    }
}

/// Parses the file `file` into one entry, or one per squashed name.
fn parse_entries(file: &str, content: &str) -> Result<Vec<Entry>> {
    let lines: Vec<&str> = content.split('\n').collect();
    let sections: Vec<(usize, &str)> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| {
            squashed_regex()
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|name| (i, name.as_str()))
        })
        .collect();

    if sections.is_empty() {
        let (forward, backward) =
            parse_blocks(&lines).map_err(|e| MigrateError::MigrationFile {
                file: file.to_string(),
                source: Box::new(e),
            })?;
        return Ok(vec![Entry {
            name: file.to_string(),
            file: file.to_string(),
            forward,
            backward,
        }]);
    }

    let mut entries: Vec<Entry> = Vec::new();
    for (i, &(start, name)) in sections.iter().enumerate() {
        let is_last = i + 1 == sections.len();
        let end = sections.get(i + 1).map_or(lines.len(), |&(next, _)| next);

        let mut section = &lines[start + 1..end];
        if section.first().is_some_and(|line| line.trim().is_empty()) {
            section = &section[1..];
        }
        if !is_last && section.last().is_some_and(|line| line.trim().is_empty()) {
            section = &section[..section.len() - 1];
        }

        let wrap = |e: SourceError| MigrateError::MigrationFile {
            file: location(name, file),
            source: Box::new(e),
        };
        let (forward, backward) = parse_blocks(section).map_err(wrap)?;

        let index = match entries.iter().position(|e| e.name == name) {
            Some(index) => index,
            None => {
                entries.push(Entry {
                    name: name.to_string(),
                    file: file.to_string(),
                    forward: None,
                    backward: None,
                });
                entries.len() - 1
            }
        };
        entries[index].merge(forward, backward).map_err(wrap)?;
    }
    Ok(entries)
}

/// Parses the contents of the migration file `file`.
///
/// A plain file yields one migration named `file`. A squashed file yields
/// one migration per `-- +migrate squashed <name>` name.
pub fn parse_migrations(file: &str, content: &str) -> Result<Vec<Migration>> {
    parse_entries(file, content)?
        .into_iter()
        .map(Entry::into_migration)
        .collect()
}

/// Forward blocks in ascending order, then backward blocks in descending
/// order, each under its squashed name.
fn squashed_content(entries: &[Entry]) -> String {
    let forward = entries
        .iter()
        .filter_map(|e| e.forward.as_ref().map(|step| (e, true, step)));
    let backward = entries
        .iter()
        .rev()
        .filter_map(|e| e.backward.as_ref().map(|step| (e, false, step)));

    let mut lines = Vec::new();
    for (i, (entry, is_forward, step)) in forward.chain(backward).enumerate() {
        if i != 0 {
            lines.push(String::new());
        }
        lines.push(format!("-- +migrate squashed {}", entry.name));
        lines.push(String::new());
        lines.push(directive_line(is_forward, step.no_transaction));
        lines.push(step.query.clone());
    }
    lines.join("\n")
}

/// Migrations stored as files in one directory.
#[derive(Debug, Clone)]
pub struct DirSource {
    dir: PathBuf,
}

impl DirSource {
    /// Creates a source reading from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The migrations directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File names in the directory, skipping subdirectories, dotfiles and
    /// leftover squash temp files.
    fn file_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name.ends_with(SQUASH_TMP_SUFFIX) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn entries(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for name in self.file_names()? {
            let path = self.dir.join(&name);
            let content = fs::read_to_string(&path).map_err(|e| MigrateError::MigrationFile {
                file: path.display().to_string(),
                source: Box::new(e),
            })?;
            entries.extend(parse_entries(&name, &content)?);
        }
        Ok(entries)
    }

    fn file_name(&self, number: i64, description: &str) -> Result<String> {
        let description = description.split_whitespace().collect::<Vec<_>>().join("_");
        if description.is_empty() {
            return Err(self.error(SourceError::EmptyDescription));
        }
        Ok(format!("{number:0width$}_{description}.sql", width = ID_WIDTH))
    }

    fn error(&self, e: SourceError) -> MigrateError {
        MigrateError::MigrationFile {
            file: self.dir.display().to_string(),
            source: Box::new(e),
        }
    }
}

impl MigrationSource for DirSource {
    fn migrations(&self) -> Result<MigrationSet> {
        let migrations = self
            .entries()?
            .into_iter()
            .map(Entry::into_migration)
            .collect::<Result<Vec<_>>>()?;
        debug!(dir = %self.dir.display(), count = migrations.len(), "Loaded migrations");
        MigrationSet::new(migrations)
    }

    fn create(&self, description: &str) -> Result<String> {
        let migrations = self.migrations()?;
        let next = migrations.iter().map(Migration::number).max().unwrap_or(0) + 1;
        let name = self.file_name(next, description)?;

        let path = self.dir.join(&name);
        fs::write(&path, MIGRATION_TEMPLATE)?;
        info!(path = %path.display(), "Created migration");
        Ok(name)
    }

    fn squash(&self, description: &str) -> Result<String> {
        let mut entries = self.entries()?;
        let migrations = MigrationSet::new(
            entries
                .iter()
                .cloned()
                .map(Entry::into_migration)
                .collect::<Result<Vec<_>>>()?,
        )?;
        let Some(newest) = migrations.iter().last() else {
            return Err(self.error(SourceError::NothingToSquash));
        };
        let name = self.file_name(newest.number(), description)?;
        entries.sort_by_key(|e| migrations.index_for_canonical_name(&e.name));

        let path = self.dir.join(&name);
        let tmp_path = self.dir.join(format!("{name}{SQUASH_TMP_SUFFIX}"));
        fs::write(&tmp_path, squashed_content(&entries))?;

        let files: BTreeSet<&str> = entries.iter().map(|e| e.file.as_str()).collect();
        for file in files {
            fs::remove_file(self.dir.join(file))?;
        }
        fs::rename(&tmp_path, &path)?;

        info!(path = %path.display(), count = entries.len(), "Squashed migrations");
        Ok(name)
    }
}

/// Creates [`DirSource`]s from config parameters.
///
/// Accepted parameters: `path` (required). A relative path is resolved
/// against the directory of the config file.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirSourceFactory;

impl MigrationSourceFactory for DirSourceFactory {
    fn new_source(&self, base_dir: &Path, params: &Params) -> Result<Box<dyn MigrationSource>> {
        let invalid = |message: String| MigrateError::InvalidSourceParams {
            source_type: SOURCE_NAME.to_string(),
            message,
        };

        if let Some(unknown) = params.keys().find(|k| k.as_str() != "path") {
            return Err(invalid(format!("unrecognised parameter {unknown:?}")));
        }
        let path = params
            .get("path")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| invalid("missing path parameter".to_string()))?;

        let path = Path::new(path);
        let dir = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        };
        Ok(Box::new(DirSource::new(dir)))
    }
}
