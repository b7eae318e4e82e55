//! Set reconciliation between desired and observed name lists.

use std::collections::BTreeSet;

/// Result of diffing a desired name set against an observed one.
///
/// `to_create` is desired-minus-observed, `to_delete` is
/// observed-minus-desired, both by exact name equality. There is no
/// partial-update case: entities are either present or absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub to_create: Vec<String>,
    pub to_delete: Vec<String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Compute the create/delete diff between two name lists.
///
/// Duplicates collapse; output order is lexicographic for determinism.
pub fn diff<S: AsRef<str>, T: AsRef<str>>(desired: &[S], observed: &[T]) -> Diff {
    let desired: BTreeSet<&str> = desired.iter().map(AsRef::as_ref).collect();
    let observed: BTreeSet<&str> = observed.iter().map(AsRef::as_ref).collect();

    Diff {
        to_create: desired.difference(&observed).map(|s| s.to_string()).collect(),
        to_delete: observed.difference(&desired).map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_create_and_delete_are_disjoint() {
        let desired = names(&["alice", "bob", "carol"]);
        let observed = names(&["carol", "dave", "erin"]);
        let d = diff(&desired, &observed);

        for name in &d.to_create {
            assert!(!d.to_delete.contains(name));
        }
        assert_eq!(d.to_create, names(&["alice", "bob"]));
        assert_eq!(d.to_delete, names(&["dave", "erin"]));
    }

    #[test]
    fn test_union_reconstructs_both_sets() {
        let desired = names(&["a", "b", "c"]);
        let observed = names(&["b", "c", "d"]);
        let d = diff(&desired, &observed);

        let intersection: Vec<String> = desired
            .iter()
            .filter(|n| observed.contains(n))
            .cloned()
            .collect();

        let mut reconstructed: Vec<String> = d
            .to_create
            .iter()
            .chain(d.to_delete.iter())
            .chain(intersection.iter())
            .cloned()
            .collect();
        reconstructed.sort();

        let mut all: Vec<String> = desired.iter().chain(observed.iter()).cloned().collect();
        all.sort();
        all.dedup();

        assert_eq!(reconstructed, all);
    }

    #[test]
    fn test_identical_sets_yield_empty_diff() {
        let desired = names(&["x", "y"]);
        let d = diff(&desired, &desired);
        assert!(d.is_empty());
    }

    #[test]
    fn test_applying_diff_is_idempotent() {
        let desired = names(&["alice", "bob"]);
        let observed = names(&["carol"]);

        let first = diff(&desired, &observed);
        assert!(!first.is_empty());

        // Simulate applying the diff: observed becomes exactly the desired set.
        let converged = desired.clone();
        let second = diff(&desired, &converged);
        assert!(second.is_empty());
    }

    #[test]
    fn test_duplicates_collapse() {
        let desired = names(&["a", "a", "b"]);
        let observed: Vec<String> = vec![];
        let d = diff(&desired, &observed);
        assert_eq!(d.to_create, names(&["a", "b"]));
    }
}
