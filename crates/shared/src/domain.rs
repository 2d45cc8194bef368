use std::fmt;

use serde::{Deserialize, Serialize};

/// Form field carrying one selected review id per pair.
pub const REVIEW_IDS_FIELD: &str = "review_ids";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Poll target returned by a successful submission.
///
/// Holds the absolute URL the controller queries for progress. Callers only
/// ever see it as an opaque token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationHandle(String);

impl OperationHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub progress: u8,
    pub done: bool,
}

impl ProgressReport {
    pub const MAX_PROGRESS: u8 = 100;

    pub fn new(progress: u8, done: bool) -> Self {
        Self {
            progress: progress.min(Self::MAX_PROGRESS),
            done,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationRequest {
    pub item_ids: Vec<ItemId>,
    pub extra_fields: Vec<(String, String)>,
}

impl OperationRequest {
    pub fn new(item_ids: impl IntoIterator<Item = ItemId>) -> Self {
        Self {
            item_ids: item_ids.into_iter().collect(),
            extra_fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_fields.push((name.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }

    /// Encodes the request as `application/x-www-form-urlencoded` pairs.
    pub fn form_pairs(&self) -> Vec<(String, String)> {
        self.item_ids
            .iter()
            .map(|id| (REVIEW_IDS_FIELD.to_string(), id.to_string()))
            .chain(self.extra_fields.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_clamped_to_one_hundred() {
        assert_eq!(ProgressReport::new(250, false).progress, 100);
        assert_eq!(ProgressReport::new(42, true), ProgressReport { progress: 42, done: true });
    }

    #[test]
    fn form_pairs_repeat_review_ids_before_extra_fields() {
        let request = OperationRequest::new([ItemId(3), ItemId(7)])
            .with_field("csrfmiddlewaretoken", "abc");
        assert_eq!(
            request.form_pairs(),
            vec![
                ("review_ids".to_string(), "3".to_string()),
                ("review_ids".to_string(), "7".to_string()),
                ("csrfmiddlewaretoken".to_string(), "abc".to_string()),
            ]
        );
    }

    #[test]
    fn handle_serializes_as_bare_string() {
        let handle = OperationHandle::new("http://localhost/poll/1");
        assert_eq!(
            serde_json::to_string(&handle).expect("serialize"),
            "\"http://localhost/poll/1\""
        );
    }
}
