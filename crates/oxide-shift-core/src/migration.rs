//! Migrations and their numeric ordering.
//!
//! A migration name has to start with a non-negative integer (e.g.
//! `"42_create_users.sql"`, `"0007"`, `"5.sql"`). That integer is the only
//! thing that decides the order in which migrations are applied, so
//! `"10_b"` comes after `"9_a"` even though it sorts before it as a string.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{MigrateError, Result};
use crate::step::Step;

/// Longest accepted migration name, in bytes.
pub const MAX_MIGRATION_NAME_LENGTH: usize = 255;

fn number_prefix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)").expect("static regex"))
}

/// Parsed form of a migration name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MigrationId {
    /// Number parsed from the leading digits of `name`.
    pub number: i64,
    /// The full name.
    pub name: String,
}

impl MigrationId {
    /// Parses the numeric prefix of `name`.
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.len() > MAX_MIGRATION_NAME_LENGTH {
            return Err(MigrateError::InvalidMigrationName {
                reason: format!("longer than the maximum={MAX_MIGRATION_NAME_LENGTH}"),
                name,
            });
        }
        let Some(digits) = number_prefix().captures(&name).map(|c| c[1].to_string()) else {
            return Err(MigrateError::InvalidMigrationName {
                name,
                reason: "can't parse numeric ID".to_string(),
            });
        };
        let number = digits
            .parse::<i64>()
            .map_err(|e| MigrateError::InvalidMigrationName {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { number, name })
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One migration: a forward step and an optional backward step.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Parsed name.
    pub id: MigrationId,
    /// Step that applies the migration.
    pub forward: Step,
    /// Step that reverts it. `None` means it can't be backward migrated.
    pub backward: Option<Step>,
}

impl Migration {
    /// Creates a migration with only a forward step.
    pub fn new(name: impl Into<String>, forward: impl Into<Step>) -> Result<Self> {
        Ok(Self {
            id: MigrationId::parse(name)?,
            forward: forward.into(),
            backward: None,
        })
    }

    /// Sets the backward step.
    #[must_use]
    pub fn with_backward(mut self, backward: impl Into<Step>) -> Self {
        self.backward = Some(backward.into());
        self
    }

    /// The migration's canonical name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// The migration's order key.
    #[must_use]
    pub fn number(&self) -> i64 {
        self.id.number
    }
}

/// An ordered set of migrations with unique numeric ids.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    items: Vec<Migration>,
    by_name: HashMap<String, usize>,
    by_number: HashMap<i64, usize>,
}

impl MigrationSet {
    /// Sorts `migrations` by number and indexes them.
    ///
    /// Fails if two migrations share a number.
    pub fn new(mut migrations: Vec<Migration>) -> Result<Self> {
        migrations.sort_by_key(Migration::number);

        let mut by_name = HashMap::with_capacity(migrations.len());
        let mut by_number = HashMap::with_capacity(migrations.len());
        for (index, migration) in migrations.iter().enumerate() {
            if let Some(&prev) = by_number.get(&migration.number()) {
                let first: &Migration = &migrations[prev];
                return Err(MigrateError::DuplicateMigrationNumber {
                    number: migration.number(),
                    first: first.name().to_string(),
                    second: migration.name().to_string(),
                });
            }
            by_number.insert(migration.number(), index);
            by_name.insert(migration.name().to_string(), index);
        }

        Ok(Self {
            items: migrations,
            by_name,
            by_number,
        })
    }

    /// Number of migrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Migration at `index` in ascending number order.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Migration> {
        self.items.get(index)
    }

    /// Canonical name of the migration at `index`.
    #[must_use]
    pub fn name(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(Migration::name)
    }

    /// Iterates in ascending number order.
    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.items.iter()
    }

    /// Index of the migration with exactly this canonical name.
    #[must_use]
    pub fn index_for_canonical_name(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Resolves a migration reference.
    ///
    /// Accepts the canonical name or the numeric id alone, with or without
    /// zero padding (`"7"` and `"0007"` both find `"0007_add_index.sql"`).
    #[must_use]
    pub fn index_for_name(&self, reference: &str) -> Option<usize> {
        if let Some(index) = self.index_for_canonical_name(reference) {
            return Some(index);
        }
        if reference.is_empty() || !reference.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let number = reference.parse::<i64>().ok()?;
        self.by_number.get(&number).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::SqlExecStep;

    fn migration(name: &str) -> Migration {
        Migration::new(name, SqlExecStep::new(format!("-- {name}"))).unwrap()
    }

    #[test]
    fn test_parse_id() {
        let id = MigrationId::parse("42_create_my_table.sql").unwrap();
        assert_eq!(id.number, 42);
        assert_eq!(id.name, "42_create_my_table.sql");

        assert_eq!(MigrationId::parse("0").unwrap().number, 0);
        assert_eq!(MigrationId::parse("0007").unwrap().number, 7);
        assert_eq!(MigrationId::parse("5.my.migration.sql").unwrap().number, 5);
        assert_eq!(MigrationId::parse("67-drop-table").unwrap().number, 67);
    }

    #[test]
    fn test_parse_id_rejects_bad_names() {
        assert!(matches!(
            MigrationId::parse("create_table.sql"),
            Err(MigrateError::InvalidMigrationName { .. })
        ));
        assert!(MigrationId::parse("").is_err());
        assert!(MigrationId::parse("99999999999999999999_overflow").is_err());
        assert!(MigrationId::parse("1".repeat(MAX_MIGRATION_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_set_orders_by_number() {
        let set = MigrationSet::new(vec![
            migration("10_c.sql"),
            migration("9_b.sql"),
            migration("1_a.sql"),
        ])
        .unwrap();

        let names: Vec<&str> = set.iter().map(Migration::name).collect();
        assert_eq!(names, vec!["1_a.sql", "9_b.sql", "10_c.sql"]);
    }

    #[test]
    fn test_set_rejects_duplicate_number() {
        let result = MigrationSet::new(vec![migration("1_a.sql"), migration("001_b.sql")]);
        assert!(matches!(
            result,
            Err(MigrateError::DuplicateMigrationNumber { number: 1, .. })
        ));
    }

    #[test]
    fn test_index_for_name() {
        let set = MigrationSet::new(vec![migration("0001_a.sql"), migration("0002_b.sql")]).unwrap();

        assert_eq!(set.index_for_name("0002_b.sql"), Some(1));
        assert_eq!(set.index_for_name("2"), Some(1));
        assert_eq!(set.index_for_name("0002"), Some(1));
        assert_eq!(set.index_for_name("000001"), Some(0));
        assert_eq!(set.index_for_name("3"), None);
        assert_eq!(set.index_for_name("0002_b"), None);
        assert_eq!(set.index_for_name(""), None);

        assert_eq!(set.index_for_canonical_name("2"), None);
    }
}
