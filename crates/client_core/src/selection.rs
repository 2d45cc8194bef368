//! Selection model behind the batch-action form.
//!
//! Checking a row selects its review and unchecking it deselects it; the
//! submit action is enabled only while something is selected.

use std::collections::HashMap;

use shared::domain::{ItemId, OperationRequest};

#[derive(Debug, Clone)]
pub struct SelectionSet<T> {
    items: HashMap<ItemId, T>,
}

impl<T> Default for SelectionSet<T> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
        }
    }
}

impl<T> SelectionSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ItemId, item: T) -> Option<T> {
        self.items.insert(id, item)
    }

    pub fn remove(&mut self, id: ItemId) -> Option<T> {
        self.items.remove(&id)
    }

    pub fn get(&self, id: ItemId) -> Option<&T> {
        self.items.get(&id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Selected ids in ascending order.
    pub fn ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.items.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionChange<T> {
    Selected(ItemId, T),
    Deselected(ItemId),
}

#[derive(Debug, Clone)]
pub struct BatchActionForm<T> {
    selection: SelectionSet<T>,
    extra_fields: Vec<(String, String)>,
}

impl<T> Default for BatchActionForm<T> {
    fn default() -> Self {
        Self {
            selection: SelectionSet::new(),
            extra_fields: Vec::new(),
        }
    }
}

impl<T> BatchActionForm<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field sent with every submission, such as a CSRF token.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_fields.push((name.into(), value.into()));
        self
    }

    pub fn selection(&self) -> &SelectionSet<T> {
        &self.selection
    }

    pub fn is_submit_enabled(&self) -> bool {
        !self.selection.is_empty()
    }

    /// Applies a UI selection event. Returns `true` when the submit action
    /// switched between enabled and disabled.
    pub fn apply(&mut self, change: SelectionChange<T>) -> bool {
        let was_enabled = self.is_submit_enabled();
        match change {
            SelectionChange::Selected(id, item) => {
                self.selection.insert(id, item);
            }
            SelectionChange::Deselected(id) => {
                self.selection.remove(id);
            }
        }
        was_enabled != self.is_submit_enabled()
    }

    /// Builds the submission payload, or `None` while nothing is selected.
    pub fn build_request(&self) -> Option<OperationRequest> {
        if !self.is_submit_enabled() {
            return None;
        }
        let request = self
            .extra_fields
            .iter()
            .fold(OperationRequest::new(self.selection.ids()), |request, (name, value)| {
                request.with_field(name.clone(), value.clone())
            });
        Some(request)
    }

    pub fn clear(&mut self) {
        self.selection.clear();
    }
}
