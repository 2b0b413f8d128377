//! Observed-remove set (OR-Set) CRDT.
//!
//! Every add carries a fresh globally-unique tag. A remove tombstones
//! exactly the tags it has observed, so an element removed on one node
//! and concurrently re-added on another survives the merge: the new tag
//! was never in any peer's removed set. This is the defining
//! observed-remove property; a last-write-wins delete would lose it.
//!
//! Tombstones are retained until the engine proves, causally, that no
//! future concurrent add can resurrect them (see `prune_tombstones`).
//!
//! # Examples
//!
//! ```
//! use meld_crdt::ORSet;
//! use meld_core::NodeId;
//!
//! let node = NodeId::new("node-a");
//! let mut set = ORSet::new();
//! set.add("foo".to_string(), &node);
//! assert!(set.contains(&"foo".to_string()));
//!
//! set.remove(&"foo".to_string());
//! assert!(!set.contains(&"foo".to_string()));
//! ```

use meld_core::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use uuid::Uuid;

/// Globally-unique tag minted per add. Carries the origin node for
/// attribution; uniqueness comes from the UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddTag {
    /// Node that performed the add.
    pub node: NodeId,
    /// Fresh UUID v4, unique across all nodes.
    pub id: Uuid,
}

impl AddTag {
    /// Mint a fresh tag for an add originating at `node`.
    pub fn new(node: &NodeId) -> Self {
        Self {
            node: node.clone(),
            id: Uuid::new_v4(),
        }
    }
}

/// A set supporting concurrent add and remove with add-wins semantics
/// for adds a remove never observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: Serialize",
    deserialize = "T: Deserialize<'de> + Eq + Hash"
))]
pub struct ORSet<T: Eq + Hash> {
    /// Element → tags under which it was added.
    #[serde(with = "crate::serde_pairs")]
    added: HashMap<T, HashSet<AddTag>>,
    /// Tombstones: tags whose adds have been observed and removed.
    removed: HashSet<AddTag>,
}

impl<T: Eq + Hash + Clone> ORSet<T> {
    /// Create a new empty OR-Set.
    pub fn new() -> Self {
        Self {
            added: HashMap::new(),
            removed: HashSet::new(),
        }
    }

    /// Add an element under a freshly minted tag. Returns the tag so the
    /// caller can log the effect for deterministic replay elsewhere.
    pub fn add(&mut self, element: T, node: &NodeId) -> AddTag {
        let tag = AddTag::new(node);
        self.apply_add(element, tag.clone());
        tag
    }

    /// Replay an add whose tag was minted at the origin. Idempotent.
    pub fn apply_add(&mut self, element: T, tag: AddTag) {
        self.added.entry(element).or_default().insert(tag);
    }

    /// Remove an element: tombstone every currently-visible tag for it.
    /// Returns the tombstoned tags (empty if the element was absent),
    /// again so the effect can be replayed exactly.
    pub fn remove(&mut self, element: &T) -> HashSet<AddTag> {
        let tags = self.visible_tags(element);
        for tag in &tags {
            self.removed.insert(tag.clone());
        }
        tags
    }

    /// Replay a remove: tombstone exactly the tags observed at the
    /// origin. Idempotent; tags for adds not yet seen locally still
    /// take effect once the add arrives.
    pub fn apply_remove(&mut self, tags: &HashSet<AddTag>) {
        for tag in tags {
            self.removed.insert(tag.clone());
        }
    }

    /// Tags for `element` that are not tombstoned.
    pub fn visible_tags(&self, element: &T) -> HashSet<AddTag> {
        self.added
            .get(element)
            .map(|tags| {
                tags.iter()
                    .filter(|t| !self.removed.contains(*t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True iff at least one tag for `element` is live.
    pub fn contains(&self, element: &T) -> bool {
        self.added
            .get(element)
            .is_some_and(|tags| tags.iter().any(|t| !self.removed.contains(t)))
    }

    /// All visible elements (unordered).
    pub fn elements(&self) -> Vec<&T> {
        self.added
            .iter()
            .filter(|(_, tags)| tags.iter().any(|t| !self.removed.contains(t)))
            .map(|(e, _)| e)
            .collect()
    }

    /// Number of visible elements.
    pub fn len(&self) -> usize {
        self.added
            .iter()
            .filter(|(_, tags)| tags.iter().any(|t| !self.removed.contains(t)))
            .count()
    }

    /// True if no element is visible.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of retained tombstones.
    pub fn tombstone_count(&self) -> usize {
        self.removed.len()
    }

    /// Merge with another OR-Set: union of tag maps, union of tombstones.
    pub fn merge(&mut self, other: &Self) {
        for (element, tags) in &other.added {
            let entry = self.added.entry(element.clone()).or_default();
            for tag in tags {
                entry.insert(tag.clone());
            }
        }
        for tag in &other.removed {
            self.removed.insert(tag.clone());
        }
    }

    /// Drop tombstones together with their tombstoned adds.
    ///
    /// Only safe once every known peer has incorporated the removals;
    /// the caller (the engine's compaction pass) is responsible for that
    /// causal gate. Returns the number of tombstones dropped.
    pub fn prune_tombstones(&mut self) -> usize {
        let removed = std::mem::take(&mut self.removed);
        for tags in self.added.values_mut() {
            tags.retain(|t| !removed.contains(t));
        }
        self.added.retain(|_, tags| !tags.is_empty());
        removed.len()
    }
}

impl<T: Eq + Hash + Clone> Default for ORSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone> PartialEq for ORSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.added == other.added && self.removed == other.removed
    }
}

impl<T: Eq + Hash + Clone> Eq for ORSet<T> {}
