//! Attributes and groups inherited by derived handlers.
//!
//! A [`Scope`] is immutable once built. Deriving copies the parent's state and
//! appends to the copy, so handlers sharing a parent never observe each
//! other's additions.

use crate::record::Attr;

/// An inherited attribute together with the group depth it was bound at.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct BoundAttr {
    pub(crate) depth: usize,
    pub(crate) attr: Attr,
}

/// Persistent attribute set and group path of one handler.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scope {
    attrs: Vec<BoundAttr>,
    groups: Vec<String>,
}

impl Scope {
    /// Return a copy of this scope with `attrs` appended at the current depth.
    pub(crate) fn with_attrs(&self, attrs: Vec<Attr>) -> Self {
        let depth = self.groups.len();
        let mut next = self.clone();
        next.attrs
            .extend(attrs.into_iter().map(|attr| BoundAttr { depth, attr }));
        next
    }

    /// Return a copy of this scope with `name` appended to the group path.
    pub(crate) fn with_group(&self, name: String) -> Self {
        let mut next = self.clone();
        next.groups.push(name);
        next
    }

    pub(crate) fn bound(&self) -> &[BoundAttr] {
        &self.attrs
    }

    /// Group path, outermost first.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Inherited attributes in the order they were added.
    pub fn attrs(&self) -> impl Iterator<Item = &Attr> {
        self.attrs.iter().map(|bound| &bound.attr)
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty() && self.groups.is_empty()
    }
}
