//! Composable filter for searching and removing primitive events.

use uuid::Uuid;

/// Filter grammar shared by search, maximum-sequence-number and removal.
///
/// Every populated filter narrows the result; an empty filter does not
/// constrain. A sequence number bound of `0` means "unbounded on that side"
/// and a maximum row count of `0` means "no cap".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Specification {
    event_types: Vec<String>,
    ids: Vec<Uuid>,
    sequence_numbers: Vec<i64>,
    sequence_number_start: i64,
    sequence_number_end: i64,
    maximum_rows: usize,
}

impl Specification {
    /// Creates a specification that matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event type name. Names are trimmed and compared
    /// case-insensitively, as the event type registry resolves them.
    #[must_use]
    pub fn add_event_type(mut self, event_type: impl Into<String>) -> Self {
        let event_type = event_type.into();
        let event_type = event_type.trim();
        let key = event_type.to_lowercase();
        if !self
            .event_types
            .iter()
            .any(|existing| existing.to_lowercase() == key)
        {
            self.event_types.push(event_type.to_owned());
        }
        self
    }

    /// Adds several event type names.
    #[must_use]
    pub fn add_event_types<I, S>(self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        event_types
            .into_iter()
            .fold(self, Specification::add_event_type)
    }

    /// Adds an aggregate identity.
    #[must_use]
    pub fn add_id(mut self, id: Uuid) -> Self {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
        self
    }

    /// Adds several aggregate identities.
    #[must_use]
    pub fn add_ids(self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        ids.into_iter().fold(self, Specification::add_id)
    }

    /// Adds an explicit sequence number.
    #[must_use]
    pub fn add_sequence_number(mut self, sequence_number: i64) -> Self {
        if !self.sequence_numbers.contains(&sequence_number) {
            self.sequence_numbers.push(sequence_number);
        }
        self
    }

    /// Adds several explicit sequence numbers.
    #[must_use]
    pub fn add_sequence_numbers(self, sequence_numbers: impl IntoIterator<Item = i64>) -> Self {
        sequence_numbers
            .into_iter()
            .fold(self, Specification::add_sequence_number)
    }

    /// Sets the inclusive lower bound (`0` = unbounded).
    #[must_use]
    pub fn with_sequence_number_start(mut self, start: i64) -> Self {
        self.sequence_number_start = start.max(0);
        self
    }

    /// Sets the inclusive upper bound (`0` = unbounded).
    #[must_use]
    pub fn with_sequence_number_end(mut self, end: i64) -> Self {
        self.sequence_number_end = end.max(0);
        self
    }

    /// Caps the number of rows returned by a search (`0` = no cap).
    #[must_use]
    pub fn with_maximum_rows(mut self, maximum_rows: usize) -> Self {
        self.maximum_rows = maximum_rows;
        self
    }

    /// Event type names, in insertion order.
    #[must_use]
    pub fn event_types(&self) -> &[String] {
        &self.event_types
    }

    /// Aggregate identities, in insertion order.
    #[must_use]
    pub fn ids(&self) -> &[Uuid] {
        &self.ids
    }

    /// Explicit sequence numbers, in insertion order.
    #[must_use]
    pub fn sequence_numbers(&self) -> &[i64] {
        &self.sequence_numbers
    }

    /// Inclusive lower bound, `0` when unbounded.
    #[must_use]
    pub fn sequence_number_start(&self) -> i64 {
        self.sequence_number_start
    }

    /// Inclusive upper bound, `0` when unbounded.
    #[must_use]
    pub fn sequence_number_end(&self) -> i64 {
        self.sequence_number_end
    }

    /// Row cap, `0` when unlimited.
    #[must_use]
    pub fn maximum_rows(&self) -> usize {
        self.maximum_rows
    }

    #[must_use]
    pub fn has_event_types(&self) -> bool {
        !self.event_types.is_empty()
    }

    #[must_use]
    pub fn has_ids(&self) -> bool {
        !self.ids.is_empty()
    }

    #[must_use]
    pub fn has_sequence_numbers(&self) -> bool {
        !self.sequence_numbers.is_empty()
    }

    /// Returns `true` when the specification constrains sequence numbers,
    /// which excludes rows that have not been sequenced yet.
    #[must_use]
    pub fn constrains_sequence_numbers(&self) -> bool {
        self.sequence_number_start > 0 || self.sequence_number_end > 0 || self.has_sequence_numbers()
    }

    /// Returns `true` when no row filter is set. The row cap is not a filter.
    #[must_use]
    pub fn is_unfiltered(&self) -> bool {
        !self.has_event_types() && !self.has_ids() && !self.constrains_sequence_numbers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_specification_is_unfiltered() {
        let spec = Specification::new();

        assert!(spec.is_unfiltered());
        assert_eq!(spec.maximum_rows(), 0);
        assert_eq!(spec.sequence_number_start(), 0);
        assert_eq!(spec.sequence_number_end(), 0);
    }

    #[test]
    fn test_maximum_rows_alone_does_not_count_as_filter() {
        assert!(Specification::new().with_maximum_rows(10).is_unfiltered());
    }

    #[test]
    fn test_event_types_are_deduplicated_case_insensitively() {
        let spec = Specification::new()
            .add_event_type("OrderPlaced")
            .add_event_types(["orderplaced", "OrderShipped", "ORDERSHIPPED"]);

        assert_eq!(spec.event_types(), ["OrderPlaced", "OrderShipped"]);
        assert!(!spec.is_unfiltered());
    }

    #[test]
    fn test_event_types_are_trimmed_and_unicode_case_folded() {
        let spec = Specification::new()
            .add_event_type("OrderPlaced ")
            .add_event_types([" orderplaced", "ÄnderungErfasst", "änderungerfasst"]);

        assert_eq!(spec.event_types(), ["OrderPlaced", "ÄnderungErfasst"]);
    }

    #[test]
    fn test_ids_and_sequence_numbers_are_deduplicated_in_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let spec = Specification::new()
            .add_ids([a, b, a])
            .add_sequence_numbers([5, 3, 5, 9]);

        assert_eq!(spec.ids(), [a, b]);
        assert_eq!(spec.sequence_numbers(), [5, 3, 9]);
        assert!(spec.has_ids());
        assert!(spec.has_sequence_numbers());
    }

    #[test]
    fn test_negative_bounds_are_treated_as_unbounded() {
        let spec = Specification::new()
            .with_sequence_number_start(-4)
            .with_sequence_number_end(-1);

        assert_eq!(spec.sequence_number_start(), 0);
        assert_eq!(spec.sequence_number_end(), 0);
        assert!(!spec.constrains_sequence_numbers());
    }

    #[test]
    fn test_range_bound_constrains_sequence_numbers() {
        assert!(
            Specification::new()
                .with_sequence_number_start(7)
                .constrains_sequence_numbers()
        );
        assert!(
            Specification::new()
                .with_sequence_number_end(7)
                .constrains_sequence_numbers()
        );
    }
}
