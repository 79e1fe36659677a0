//! Migration Registry - validated, totally ordered migration units
//!
//! The registry is built once per invocation from a source and is read-only
//! afterwards. Every problem with the definitions themselves is reported
//! here, before the database is touched.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use super::definitions::{Migration, MigrationDefinition, SortKey};
use super::operations::SchemaOperation;
use super::source::MigrationSource;
use crate::error::{MigrateResult, MigrationError};

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d+(?:_\d+)*_[A-Za-z0-9][A-Za-z0-9_\-]*$").expect("valid migration name pattern")
    })
}

/// Ordered set of validated migrations
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    /// Load and validate every definition from `source`
    pub fn load(source: &dyn MigrationSource, strict_reversibility: bool) -> MigrateResult<Self> {
        Self::from_definitions(source.definitions()?, strict_reversibility)
    }

    /// Validate definitions and sort them by sort key
    pub fn from_definitions(
        definitions: Vec<MigrationDefinition>,
        strict_reversibility: bool,
    ) -> MigrateResult<Self> {
        let mut migrations = Vec::with_capacity(definitions.len());
        let mut seen: HashMap<SortKey, String> = HashMap::new();

        for definition in definitions {
            let migration = validate(definition, strict_reversibility)?;

            if let Some(existing) = seen.get(&migration.sort_key) {
                let (first, second) = if existing.as_str() <= migration.name.as_str() {
                    (existing.clone(), migration.name.clone())
                } else {
                    (migration.name.clone(), existing.clone())
                };
                return Err(MigrationError::DuplicateName { first, second });
            }
            seen.insert(migration.sort_key.clone(), migration.name.clone());
            migrations.push(migration);
        }

        migrations.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
        tracing::debug!(count = migrations.len(), "Loaded migration registry");

        Ok(Self { migrations })
    }

    /// Migrations in ascending sort-key order
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn get(&self, name: &str) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

fn validate(definition: MigrationDefinition, strict_reversibility: bool) -> MigrateResult<Migration> {
    let MigrationDefinition {
        name,
        forward,
        backward,
    } = definition;

    if !name_pattern().is_match(&name) {
        return Err(MigrationError::malformed(
            &name,
            "name must be a numeric sort key followed by a label, e.g. 0001_create_users",
        ));
    }

    let (sort_key, label) = SortKey::parse(&name)
        .ok_or_else(|| MigrationError::malformed(&name, "name has no numeric sort key"))?;

    let forward = forward.ok_or_else(|| MigrationError::malformed(&name, "no forward (up) operations defined"))?;
    let backward = backward.ok_or_else(|| MigrationError::malformed(&name, "no backward (down) operations defined"))?;

    if let Some(derived) = SchemaOperation::derive_backward(&forward) {
        if derived != backward {
            if strict_reversibility {
                return Err(MigrationError::malformed(
                    &name,
                    "backward operations do not undo the forward operations",
                ));
            }
            tracing::warn!(
                migration = %name,
                "Backward operations differ from the reverse derived from forward operations"
            );
        }
    }

    Ok(Migration {
        name,
        sort_key,
        label,
        forward,
        backward,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::operations::ColumnType;
    use crate::migrations::source::StaticSource;

    fn unit(name: &str) -> MigrationDefinition {
        MigrationDefinition::new(name)
            .with_forward(vec![SchemaOperation::Raw(format!("SELECT '{}'", name))])
            .with_backward(vec![])
    }

    #[test]
    fn test_sorted_by_numeric_key() {
        let registry = MigrationRegistry::from_definitions(
            vec![unit("10_c"), unit("2_b"), unit("1_a")],
            false,
        )
        .unwrap();
        let names: Vec<_> = registry.migrations().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["1_a", "2_b", "10_c"]);
        assert_eq!(registry.get("2_b").unwrap().label, "b");
    }

    #[test]
    fn test_duplicate_sort_key_names_both() {
        let err = MigrationRegistry::from_definitions(
            vec![unit("0002_add_users"), unit("0001_init"), unit("2_add_email")],
            false,
        )
        .unwrap_err();
        match err {
            MigrationError::DuplicateName { first, second } => {
                assert_eq!(first, "0002_add_users");
                assert_eq!(second, "2_add_email");
            }
            other => panic!("expected DuplicateName, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_backward_is_malformed() {
        let definition = MigrationDefinition::new("0001_init").with_forward(vec![]);
        let err = MigrationRegistry::from_definitions(vec![definition], false).unwrap_err();
        assert!(matches!(err, MigrationError::MalformedUnit { ref name, .. } if name == "0001_init"));
    }

    #[test]
    fn test_missing_forward_is_malformed() {
        let definition = MigrationDefinition::new("0001_init").with_backward(vec![]);
        assert!(matches!(
            MigrationRegistry::from_definitions(vec![definition], false),
            Err(MigrationError::MalformedUnit { .. })
        ));
    }

    #[test]
    fn test_bad_names_are_malformed() {
        for name in ["init", "0001", "0001_", "v1_init", "0001 init", "0001_in it"] {
            let err = MigrationRegistry::from_definitions(vec![unit(name)], false).unwrap_err();
            assert!(
                matches!(err, MigrationError::MalformedUnit { .. }),
                "{} should be malformed",
                name
            );
        }
    }

    #[test]
    fn test_empty_operation_sets_are_valid() {
        let definition = MigrationDefinition::new("0001_noop")
            .with_forward(vec![])
            .with_backward(vec![]);
        let registry = MigrationRegistry::from_definitions(vec![definition], false).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reversibility_mismatch() {
        let definition = || {
            MigrationDefinition::new("0001_users")
                .up(|s| {
                    s.create_table("users", |t| {
                        t.id("id");
                    });
                })
                .down(|s| {
                    s.drop_table("accounts");
                })
        };
        assert!(MigrationRegistry::from_definitions(vec![definition()], false).is_ok());
        assert!(matches!(
            MigrationRegistry::from_definitions(vec![definition()], true),
            Err(MigrationError::MalformedUnit { .. })
        ));
    }

    #[test]
    fn test_matching_reverse_passes_strict_check() {
        let definition = MigrationDefinition::new("0002_email")
            .up(|s| {
                s.add_column("users", "email", ColumnType::Text);
            })
            .down(|s| {
                s.drop_column("users", "email");
            });
        assert!(MigrationRegistry::from_definitions(vec![definition], true).is_ok());
    }

    #[test]
    fn test_load_from_source() {
        let source = StaticSource::new(vec![unit("0002_b"), unit("0001_a")]);
        let registry = MigrationRegistry::load(&source, false).unwrap();
        assert_eq!(registry.migrations()[0].name, "0001_a");
    }
}
