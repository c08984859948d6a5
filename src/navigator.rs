//! Tree navigation over the flat snapshot element list.
//!
//! Snapshot elements are stored depth-first, with the slices of an element
//! following the element's own descendants:
//!
//! ```text
//! Observation.component               (slicing)
//! Observation.component.code
//! Observation.component:systolic      (slice)
//! Observation.component:systolic.code
//! Observation.component:diastolic     (slice)
//! ```
//!
//! [`ElementNavigator`] turns that list into a tree without copying it.

use std::sync::Arc;

use crate::types::{ElementDefinition, StructureDefinition};

/// Cursor over the snapshot of a [`StructureDefinition`].
#[derive(Debug, Clone)]
pub struct ElementNavigator {
    definition: Arc<StructureDefinition>,
    position: usize,
    parents: Vec<usize>,
}

impl ElementNavigator {
    /// Navigator positioned at the root element. `None` when the snapshot is empty.
    pub fn new(definition: Arc<StructureDefinition>) -> Option<Self> {
        if definition.elements().is_empty() {
            return None;
        }
        Some(Self {
            definition,
            position: 0,
            parents: Vec::new(),
        })
    }

    pub fn definition(&self) -> &Arc<StructureDefinition> {
        &self.definition
    }

    /// The element under the cursor.
    pub fn current(&self) -> &ElementDefinition {
        &self.definition.elements()[self.position]
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_at_root(&self) -> bool {
        self.position == 0
    }

    fn elements(&self) -> &[ElementDefinition] {
        self.definition.elements()
    }

    /// Index one past the last descendant of `index`.
    fn descendants_end(&self, index: usize) -> usize {
        let elements = self.elements();
        let prefix = format!("{}.", elements[index].path);
        let mut end = index + 1;
        while end < elements.len() && elements[end].path.starts_with(&prefix) {
            end += 1;
        }
        end
    }

    fn child_indices(&self, index: usize) -> Vec<usize> {
        let elements = self.elements();
        let depth = elements[index].path.matches('.').count() + 1;
        (index + 1..self.descendants_end(index))
            .filter(|&i| {
                let element = &elements[i];
                element.slice_name.is_none() && element.path.matches('.').count() == depth
            })
            .collect()
    }

    fn slice_indices(&self, index: usize) -> Vec<usize> {
        let elements = self.elements();
        let base = &elements[index];
        if base.slice_name.is_some() {
            return Vec::new();
        }
        let mut slices = Vec::new();
        let mut i = self.descendants_end(index);
        while i < elements.len() && elements[i].path == base.path {
            if elements[i].slice_name.is_some() {
                slices.push(i);
            }
            i = self.descendants_end(i);
        }
        slices
    }

    fn at(&self, position: usize, parents: Vec<usize>) -> Self {
        Self {
            definition: Arc::clone(&self.definition),
            position,
            parents,
        }
    }

    fn child_parents(&self) -> Vec<usize> {
        let mut parents = self.parents.clone();
        parents.push(self.position);
        parents
    }

    /// Direct (non-slice) children of the current element.
    pub fn children(&self) -> Vec<ElementNavigator> {
        let parents = self.child_parents();
        self.child_indices(self.position)
            .into_iter()
            .map(|i| self.at(i, parents.clone()))
            .collect()
    }

    pub fn has_children(&self) -> bool {
        !self.child_indices(self.position).is_empty()
    }

    /// Slice entries declared for the current element.
    pub fn slices(&self) -> Vec<ElementNavigator> {
        self.slice_indices(self.position)
            .into_iter()
            .map(|i| self.at(i, self.parents.clone()))
            .collect()
    }

    /// Move to the named direct child.
    pub fn move_to_child(&mut self, name: &str) -> bool {
        let elements = self.elements();
        let found = self
            .child_indices(self.position)
            .into_iter()
            .find(|&i| elements[i].name() == name);
        match found {
            Some(i) => {
                self.parents.push(self.position);
                self.position = i;
                true
            }
            None => false,
        }
    }

    pub fn move_to_first_child(&mut self) -> bool {
        match self.child_indices(self.position).first() {
            Some(&i) => {
                self.parents.push(self.position);
                self.position = i;
                true
            }
            None => false,
        }
    }

    /// Move to the next direct child of the current parent.
    pub fn move_to_next_sibling(&mut self) -> bool {
        let Some(&parent) = self.parents.last() else {
            return false;
        };
        let next = self
            .child_indices(parent)
            .into_iter()
            .find(|&i| i > self.position);
        match next {
            Some(i) => {
                self.position = i;
                true
            }
            None => false,
        }
    }

    pub fn move_to_parent(&mut self) -> bool {
        match self.parents.pop() {
            Some(parent) => {
                self.position = parent;
                true
            }
            None => false,
        }
    }

    /// Jump to the element with the given id (falling back to a path match).
    ///
    /// The parent chain is rebuilt from the element ids, so navigation keeps
    /// working after the jump.
    pub fn jump_to_id(&mut self, id: &str) -> bool {
        let elements = self.elements();
        let target = elements
            .iter()
            .position(|e| e.element_id() == id)
            .or_else(|| {
                elements
                    .iter()
                    .position(|e| e.path == id && e.slice_name.is_none())
            });
        let Some(target) = target else {
            return false;
        };

        let mut parents = Vec::new();
        let mut cursor = 0;
        while cursor != target {
            parents.push(cursor);
            let next = self
                .child_indices(cursor)
                .into_iter()
                .chain(self.slice_indices(cursor))
                .filter(|&i| i <= target)
                .max();
            match next {
                // Slices are siblings of their base element, not children
                Some(i) if self.slice_indices(cursor).contains(&i) => {
                    parents.pop();
                    cursor = i;
                }
                Some(i) => cursor = i,
                None => break,
            }
        }
        self.position = target;
        self.parents = parents;
        true
    }
}
