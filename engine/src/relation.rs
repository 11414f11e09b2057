//! Staged many-to-many association sets.
//!
//! A [`Relation`] links its owning entity to entities of one other kind. It
//! keeps the set confirmed at the last sync apart from the staged changes
//! that still have to be pushed.

use crate::EntityRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Where an association change comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssociationOrigin {
    /// Read from downloaded data; already authoritative, committed at once.
    Downloaded,
    /// Made locally; committed only after the remote service confirms it.
    LocalPending,
}

/// Direction of a staged association change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationOp {
    Add,
    Remove,
}

/// One staged change on a relation.
///
/// `first_side` is set on the end that initiated a two-sided change; the
/// reciprocal end waits for that side's push to be confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationChange {
    pub op: AssociationOp,
    pub other: EntityRef,
    pub first_side: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Staged {
    op: AssociationOp,
    first_side: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relation {
    committed: BTreeSet<EntityRef>,
    staged: BTreeMap<EntityRef, Staged>,
}

impl Relation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `other`.
    pub fn add(&mut self, other: EntityRef, origin: AssociationOrigin) {
        self.stage_add(other, origin, true);
    }

    /// Link `other` as the reciprocal end of a change `other` initiated.
    pub(crate) fn add_reciprocal(&mut self, other: EntityRef) {
        self.stage_add(other, AssociationOrigin::LocalPending, false);
    }

    /// Stage removal of `other`.
    pub fn remove(&mut self, other: EntityRef) {
        self.stage_remove(other, true);
    }

    /// Stage removal of `other` as the reciprocal end of its change.
    pub(crate) fn remove_reciprocal(&mut self, other: EntityRef) {
        self.stage_remove(other, false);
    }

    fn stage_add(&mut self, other: EntityRef, origin: AssociationOrigin, first_side: bool) {
        match origin {
            AssociationOrigin::Downloaded => {
                self.committed.insert(other);
                self.staged.remove(&other);
            }
            AssociationOrigin::LocalPending => {
                if self.committed.contains(&other) {
                    // Re-adding cancels a staged removal.
                    self.staged.remove(&other);
                } else {
                    self.staged.insert(
                        other,
                        Staged {
                            op: AssociationOp::Add,
                            first_side,
                        },
                    );
                }
            }
        }
    }

    fn stage_remove(&mut self, other: EntityRef, first_side: bool) {
        if self.committed.contains(&other) {
            self.staged.insert(
                other,
                Staged {
                    op: AssociationOp::Remove,
                    first_side,
                },
            );
        } else {
            self.staged.remove(&other);
        }
    }

    /// Stage removal of everything currently linked.
    pub fn clear(&mut self) {
        self.staged.clear();
        for other in &self.committed {
            self.staged.insert(
                *other,
                Staged {
                    op: AssociationOp::Remove,
                    first_side: true,
                },
            );
        }
    }

    /// Whether `other` is linked, staged changes included.
    pub fn contains(&self, other: &EntityRef) -> bool {
        match self.staged.get(other).map(|s| s.op) {
            Some(AssociationOp::Add) => true,
            Some(AssociationOp::Remove) => false,
            None => self.committed.contains(other),
        }
    }

    /// Currently linked entities, staged changes included.
    pub fn iter(&self) -> impl Iterator<Item = EntityRef> + '_ {
        let kept = self
            .committed
            .iter()
            .filter(|other| {
                self.staged.get(*other).map(|s| s.op) != Some(AssociationOp::Remove)
            });
        let added = self
            .staged
            .iter()
            .filter(|(_, staged)| staged.op == AssociationOp::Add)
            .map(|(other, _)| other);
        kept.chain(added).copied()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Entities linked as of the last confirmed sync.
    pub fn committed(&self) -> &BTreeSet<EntityRef> {
        &self.committed
    }

    pub fn has_changes(&self) -> bool {
        !self.staged.is_empty()
    }

    pub fn changes(&self) -> impl Iterator<Item = AssociationChange> + '_ {
        self.staged.iter().map(|(other, staged)| AssociationChange {
            op: staged.op,
            other: *other,
            first_side: staged.first_side,
        })
    }

    /// Commit every staged change.
    pub fn apply(&mut self) {
        self.apply_where(|_| true);
    }

    /// Commit the staged changes whose target satisfies `predicate`; the rest
    /// stay staged.
    pub fn apply_where(&mut self, mut predicate: impl FnMut(&EntityRef) -> bool) {
        let staged = std::mem::take(&mut self.staged);
        for (other, change) in staged {
            if !predicate(&other) {
                self.staged.insert(other, change);
                continue;
            }
            match change.op {
                AssociationOp::Add => {
                    self.committed.insert(other);
                }
                AssociationOp::Remove => {
                    self.committed.remove(&other);
                }
            }
        }
    }

    /// Drop every trace of `other`, committed or staged.
    pub(crate) fn forget(&mut self, other: &EntityRef) {
        self.committed.remove(other);
        self.staged.remove(other);
    }
}
