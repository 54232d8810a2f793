//! Order resolution - which migrations an operation touches, in what order

use std::collections::{BTreeSet, HashSet};

use crate::migration::Migration;
use crate::registry::Registry;

/// Optional restriction of the ids an operation considers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    All,
    Ids(BTreeSet<String>),
}

impl Selection {
    /// Select exactly the given ids
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selection::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, id: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Ids(ids) => ids.contains(id),
        }
    }
}

/// Migrations not yet applied, ascending by id. The post-apply unit is never
/// part of the result.
pub fn pending<'r>(
    registry: &'r Registry,
    applied: &HashSet<String>,
    selection: &Selection,
) -> Vec<&'r Migration> {
    registry
        .migrations()
        .iter()
        .filter(|m| !applied.contains(m.id()) && selection.contains(m.id()))
        .collect()
}

/// Applied migrations known to the registry, descending by id so the last
/// one applied (by id) is reverted first
pub fn to_rollback<'r>(
    registry: &'r Registry,
    applied: &HashSet<String>,
    selection: &Selection,
) -> Vec<&'r Migration> {
    registry
        .migrations()
        .iter()
        .rev()
        .filter(|m| applied.contains(m.id()) && selection.contains(m.id()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::from_migrations(vec![
            Migration::new("0002-add-bar", vec![]),
            Migration::new("post-apply", vec![]),
            Migration::new("0001-create-foo", vec![]),
            Migration::new("0003-add-baz", vec![]),
        ])
        .unwrap()
    }

    fn ids(migrations: Vec<&Migration>) -> Vec<&str> {
        migrations.into_iter().map(|m| m.id()).collect()
    }

    #[test]
    fn test_pending_is_ascending_and_excludes_applied() {
        let registry = registry();
        let applied: HashSet<String> = ["0002-add-bar".to_string()].into_iter().collect();

        assert_eq!(
            ids(pending(&registry, &applied, &Selection::All)),
            vec!["0001-create-foo", "0003-add-baz"]
        );
    }

    #[test]
    fn test_to_rollback_is_descending() {
        let registry = registry();
        let applied: HashSet<String> = ["0001-create-foo", "0003-add-baz"]
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(
            ids(to_rollback(&registry, &applied, &Selection::All)),
            vec!["0003-add-baz", "0001-create-foo"]
        );
    }

    #[test]
    fn test_selection_narrows_both_views() {
        let registry = registry();
        let applied: HashSet<String> = ["0001-create-foo".to_string()].into_iter().collect();
        let selection = Selection::ids(["0001-create-foo", "0003-add-baz"]);

        assert_eq!(ids(pending(&registry, &applied, &selection)), vec!["0003-add-baz"]);
        assert_eq!(ids(to_rollback(&registry, &applied, &selection)), vec!["0001-create-foo"]);
    }

    #[test]
    fn test_unknown_applied_ids_are_ignored() {
        let registry = registry();
        let applied: HashSet<String> = ["0000-removed".to_string(), "post-apply".to_string()]
            .into_iter()
            .collect();

        assert!(to_rollback(&registry, &applied, &Selection::All).is_empty());
        assert_eq!(pending(&registry, &applied, &Selection::All).len(), 3);
    }
}
