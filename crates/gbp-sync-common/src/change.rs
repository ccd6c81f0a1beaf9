//! Tagged change variant decoded from `(before, after)` deltas.

/// A single change to one identity.
///
/// Change sources deliver `(before, after)` pairs where either side may be
/// absent. [`Change::from_delta`] decodes that once so downstream logic matches
/// on the variant instead of re-inspecting optionals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<T> {
    /// The identity did not exist before.
    Created(T),
    /// The identity existed before and still exists.
    Updated { before: T, after: T },
    /// The identity no longer exists.
    Removed(T),
}

impl<T> Change<T> {
    /// Decodes a delta. Returns `None` when both sides are absent.
    pub fn from_delta(before: Option<T>, after: Option<T>) -> Option<Self> {
        match (before, after) {
            (None, None) => None,
            (None, Some(after)) => Some(Change::Created(after)),
            (Some(before), Some(after)) => Some(Change::Updated { before, after }),
            (Some(before), None) => Some(Change::Removed(before)),
        }
    }

    /// Returns the state before the change, if any.
    pub fn before(&self) -> Option<&T> {
        match self {
            Change::Created(_) => None,
            Change::Updated { before, .. } => Some(before),
            Change::Removed(before) => Some(before),
        }
    }

    /// Returns the state after the change, if any.
    pub fn after(&self) -> Option<&T> {
        match self {
            Change::Created(after) => Some(after),
            Change::Updated { after, .. } => Some(after),
            Change::Removed(_) => None,
        }
    }

    /// Returns true for [`Change::Removed`].
    pub fn is_removal(&self) -> bool {
        matches!(self, Change::Removed(_))
    }

    /// Converts back into a `(before, after)` delta.
    pub fn into_delta(self) -> (Option<T>, Option<T>) {
        match self {
            Change::Created(after) => (None, Some(after)),
            Change::Updated { before, after } => (Some(before), Some(after)),
            Change::Removed(before) => (Some(before), None),
        }
    }

    /// Maps both sides of the change.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Change<U> {
        match self {
            Change::Created(after) => Change::Created(f(after)),
            Change::Updated { before, after } => Change::Updated {
                before: f(before),
                after: f(after),
            },
            Change::Removed(before) => Change::Removed(f(before)),
        }
    }

    /// Short lowercase label, used in log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Change::Created(_) => "created",
            Change::Updated { .. } => "updated",
            Change::Removed(_) => "removed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_delta() {
        assert_eq!(Change::<u8>::from_delta(None, None), None);
        assert_eq!(Change::from_delta(None, Some(1)), Some(Change::Created(1)));
        assert_eq!(
            Change::from_delta(Some(1), Some(2)),
            Some(Change::Updated { before: 1, after: 2 })
        );
        assert_eq!(Change::from_delta(Some(1), None), Some(Change::Removed(1)));
    }

    #[test]
    fn test_accessors() {
        let change = Change::Updated { before: "a", after: "b" };
        assert_eq!(change.before(), Some(&"a"));
        assert_eq!(change.after(), Some(&"b"));
        assert!(!change.is_removal());
        assert_eq!(change.label(), "updated");

        let removed = Change::Removed("a");
        assert_eq!(removed.after(), None);
        assert!(removed.is_removal());
    }

    #[test]
    fn test_into_delta_and_map() {
        let change = Change::from_delta(Some(2), Some(3)).unwrap();
        assert_eq!(change.clone().map(|v| v * 10).into_delta(), (Some(20), Some(30)));
        assert_eq!(Change::Created(1).into_delta(), (None, Some(1)));
    }
}
