use core::hash::Hash;
use hashbrown::HashMap;
use serde::Serialize;

/// Stable integer identity of a tracked node.
///
/// Identities correlate a real node with its mirror counterpart and with every
/// emitted [`LayoutEvent`](crate::layout::LayoutEvent) for the rest of the
/// recording session. `0` is reserved as [`NodeId::NONE`] ("no parent/sibling")
/// and is never assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
	/// The "no node" sentinel. Appears in position fields of emitted events,
	/// never as an assigned identity.
	pub const NONE: Self = Self(0);

	#[must_use]
	pub fn get(self) -> u32 {
		self.0
	}

	#[must_use]
	pub fn is_none(self) -> bool {
		self.0 == 0
	}
}

/// Side-table from real-node references to identities.
///
/// Identity used to live as an expando property on the foreign node; keeping it
/// in an explicit table owned by the session instance means a torn-down session
/// cannot leak identities into the next one.
#[derive(Debug)]
pub struct IdentityTable<N: Eq + Hash> {
	next: u32,
	ids: HashMap<N, NodeId>,
}

impl<N: Eq + Hash> Default for IdentityTable<N> {
	fn default() -> Self {
		Self::new()
	}
}

impl<N: Eq + Hash> IdentityTable<N> {
	#[must_use]
	pub fn new() -> Self {
		Self { next: 1, ids: HashMap::new() }
	}

	/// Returns the identity previously attached to `node`, if any.
	#[must_use]
	pub fn identity_of(&self, node: &N) -> Option<NodeId> {
		self.ids.get(node).copied()
	}

	/// Returns the existing identity or attaches the next one.
	///
	/// The counter only ever advances, so a cleared identity is never handed to
	/// a different node within the same session.
	pub fn assign(&mut self, node: N) -> NodeId {
		let next = &mut self.next;
		*self.ids.entry(node).or_insert_with(|| {
			let id = NodeId(*next);
			*next += 1;
			id
		})
	}

	/// Detaches the identity of a node that left tracking.
	///
	/// Must be called for every removed node (and recursively for its
	/// descendants), or a stale entry could collide with a later, unrelated
	/// node occupying the same slot on the host side.
	pub fn clear(&mut self, node: &N) -> Option<NodeId> {
		self.ids.remove(node)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.ids.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.ids.is_empty()
	}
}
