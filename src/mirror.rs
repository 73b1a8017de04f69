//! The shadow tree: an authoritative mirror of document structure.
//!
//! One [`MirrorNode`] exists per tracked real node, keyed by its identity and
//! linked to parent and siblings through intrusive `NodeId` links. Applying a
//! mutation batch classifies every touched node into per-batch marker sets
//! (fresh/moved/updated) plus an ordered holding list of detached subtrees,
//! from which exactly one [`MutationSummary`] is derived.
//!
//! The engine reads the *live* document for positions while applying a batch:
//! notifications say what changed, the document says where everything ended
//! up. That is what makes out-of-order, duplicated and split notifications
//! tolerable: a redundant record about an already-finalized subtree is
//! detected and skipped instead of applied twice.

use crate::classify::NodeClassifier;
use crate::dom::{Dom, MutationRecord};
use crate::identity::{IdentityTable, NodeId};
use crate::layout::ConsistencyReport;
use hashbrown::{HashMap, HashSet};
use tracing::{trace, trace_span, warn};

/// Mirror counterpart of one tracked real node.
#[derive(Debug)]
pub struct MirrorNode<N> {
	pub(crate) real: N,
	pub(crate) parent: NodeId,
	pub(crate) first_child: NodeId,
	pub(crate) last_child: NodeId,
	pub(crate) prev_sibling: NodeId,
	pub(crate) next_sibling: NodeId,
	/// Inherited at creation; ignored nodes are tracked but surface no
	/// content.
	pub(crate) ignored: bool,
	/// Set while a batch is in flight: the node's final position (and its
	/// whole subtree's) is already known from the live document, so later
	/// redundant notifications about it are skipped.
	pub(crate) finalized: bool,
}

/// The classified result of applying one mutation batch.
///
/// Lists are in document (pre-order) position, parents before children. A
/// node appears in `inserted` or `moved`, never both; `updated` additionally
/// lists nodes an attribute or character-data record explicitly targeted,
/// unless a move already re-emits their full state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MutationSummary {
	pub inserted: Vec<NodeId>,
	pub moved: Vec<NodeId>,
	pub updated: Vec<NodeId>,
	pub removed: Vec<NodeId>,
}

impl MutationSummary {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.inserted.is_empty() && self.moved.is_empty() && self.updated.is_empty() && self.removed.is_empty()
	}
}

pub struct ShadowTree<D: Dom> {
	nodes: HashMap<NodeId, MirrorNode<D::Node>>,
	identities: IdentityTable<D::Node>,
	root: NodeId,
	fresh: HashSet<NodeId>,
	moved: HashSet<NodeId>,
	updated: HashSet<NodeId>,
	/// Detached roots of the current batch, in detachment order. Only alive
	/// between `apply_batch` and `finish_batch`.
	holding: Vec<NodeId>,
	held: HashSet<NodeId>,
}

impl<D: Dom> Default for ShadowTree<D> {
	fn default() -> Self {
		Self::new()
	}
}

impl<D: Dom> ShadowTree<D> {
	#[must_use]
	pub fn new() -> Self {
		Self {
			nodes: HashMap::new(),
			identities: IdentityTable::new(),
			root: NodeId::NONE,
			fresh: HashSet::new(),
			moved: HashSet::new(),
			updated: HashSet::new(),
			holding: Vec::new(),
			held: HashSet::new(),
		}
	}

	#[must_use]
	pub fn root(&self) -> NodeId {
		self.root
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	#[must_use]
	pub fn identity_of(&self, node: &D::Node) -> Option<NodeId> {
		self.identities.identity_of(node).filter(|id| self.nodes.contains_key(id))
	}

	#[must_use]
	pub fn real_node(&self, id: NodeId) -> Option<&D::Node> {
		self.nodes.get(&id).map(|mirror| &mirror.real)
	}

	#[must_use]
	pub fn is_ignored(&self, id: NodeId) -> bool {
		self.nodes.get(&id).is_some_and(|mirror| mirror.ignored)
	}

	/// `(parent, previous sibling, next sibling)` of a mirror node.
	#[must_use]
	pub fn position(&self, id: NodeId) -> Option<(NodeId, NodeId, NodeId)> {
		self.nodes.get(&id).map(|mirror| (mirror.parent, mirror.prev_sibling, mirror.next_sibling))
	}

	// -- Primitives --

	/// Creates a mirror node under `parent`, anchored before `next` (appended
	/// when `next` is `NONE`). The ignore flag is inherited from the parent
	/// unless the node's own classification sets it.
	pub fn insert(&mut self, dom: &D, classifier: &NodeClassifier, node: &D::Node, parent: NodeId, next: NodeId) -> NodeId {
		let parent_ignored = self.nodes.get(&parent).is_some_and(|mirror| mirror.ignored);
		let ignored = classifier.should_ignore(dom, node, parent_ignored);
		let id = self.identities.assign(node.clone());
		self.nodes.insert(
			id,
			MirrorNode {
				real: node.clone(),
				parent: NodeId::NONE,
				first_child: NodeId::NONE,
				last_child: NodeId::NONE,
				prev_sibling: NodeId::NONE,
				next_sibling: NodeId::NONE,
				ignored,
				finalized: false,
			},
		);
		self.link(id, parent, next);
		id
	}

	/// Relinks an existing mirror node at a new position, pulling it back out
	/// of the holding list if a removal in the same batch put it there.
	pub fn move_to(&mut self, id: NodeId, parent: NodeId, next: NodeId) {
		if self.held.remove(&id) {
			self.holding.retain(|held| *held != id);
		}
		self.unlink(id);
		self.link(id, parent, next);
	}

	/// Marks a node updated for this batch.
	pub fn update(&mut self, id: NodeId) {
		if self.nodes.contains_key(&id) {
			self.updated.insert(id);
		}
	}

	/// Detaches a mirror node into the holding list, subtree links intact, so
	/// the summary scan can still tell "really removed" apart from "removed
	/// because an ancestor was finalized".
	pub fn remove(&mut self, id: NodeId) {
		if !self.nodes.contains_key(&id) {
			return;
		}
		self.unlink(id);
		self.holding.push(id);
		self.held.insert(id);
	}

	// -- Batch application --

	/// Applies one atomically delivered batch and derives its summary.
	///
	/// Events must be emitted from the summary *before* [`finish_batch`]
	/// destroys the held subtrees (their real nodes are still readable for
	/// removal snapshots until then).
	///
	/// [`finish_batch`]: Self::finish_batch
	pub fn apply_batch(&mut self, dom: &D, classifier: &NodeClassifier, records: &[MutationRecord<D::Node>]) -> MutationSummary {
		let span = trace_span!("apply_batch", records = records.len());
		let _enter = span.enter();

		for record in records {
			match record {
				MutationRecord::Attributes { target } | MutationRecord::CharacterData { target } => {
					if let Some(id) = self.identity_of(target) {
						self.update(id);
					} else {
						trace!("Dropping attribute/character-data record for an untracked node.");
					}
				}
				MutationRecord::ChildList { target, added, removed } => {
					// Right-to-left so that each node's live next sibling is
					// already mirrored when it anchors an insert-before.
					for node in added.iter().rev() {
						self.apply_insert(dom, classifier, node, false);
					}
					for node in removed {
						self.apply_remove(dom, node, target);
					}
				}
			}
		}

		self.summarize()
	}

	/// Inserts a genuinely new node (marking it fresh and finalized, then
	/// eagerly walking its live subtree), or re-links an already-known one as
	/// a move. Skips records that a finalized subtree makes redundant.
	fn apply_insert(&mut self, dom: &D, classifier: &NodeClassifier, node: &D::Node, forced: bool) {
		if let Some(id) = self.identity_of(node) {
			let Some(parent_node) = dom.parent(node) else {
				// Detached again within the batch; the paired removal record
				// files it into holding.
				return;
			};
			let Some(parent_id) = self.identity_of(&parent_node) else {
				trace!("Deferring insert below an untracked parent.");
				return;
			};
			if !forced && !self.should_process_child_list(Some(id), Some(parent_id)) {
				trace!(id = id.get(), "Skipping redundant insert record for a finalized subtree.");
				return;
			}
			let anchor = self.live_anchor(dom, node, parent_id);
			self.move_to(id, parent_id, anchor);
			if !self.fresh.contains(&id) {
				self.moved.insert(id);
			}
		} else {
			let Some(parent_node) = dom.parent(node) else {
				// Inserted and removed within the same batch: no mirror node
				// and no event, but the identity is still consumed so sibling
				// numbering stays contiguous around the gap.
				let _ = self.identities.assign(node.clone());
				return;
			};
			let Some(parent_id) = self.identity_of(&parent_node) else {
				// The parent's own insert record walks into this node later.
				trace!("Deferring insert below an untracked parent.");
				return;
			};
			let anchor = self.live_anchor(dom, node, parent_id);
			let id = self.insert(dom, classifier, node, parent_id, anchor);
			if let Some(mirror) = self.nodes.get_mut(&id) {
				mirror.finalized = true;
			}
			self.fresh.insert(id);

			// The subtree's final shape is already in the live document; walk
			// it now so later notifications about it are redundant.
			let mut child = dom.first_child(node);
			while let Some(current) = child {
				child = dom.next_sibling(&current);
				self.apply_insert(dom, classifier, &current, true);
			}
		}
	}

	/// Files a removed node into holding. For a never-tracked removed
	/// ancestor, recursively walks the detached subtree so previously tracked
	/// descendants still get their removal.
	fn apply_remove(&mut self, dom: &D, node: &D::Node, target: &D::Node) {
		if let Some(id) = self.identity_of(node) {
			if self.is_held(id) {
				return;
			}
			if !self.should_process_child_list(Some(id), self.identity_of(target)) {
				trace!(id = id.get(), "Skipping redundant removal record for a finalized subtree.");
				return;
			}
			if dom.is_connected(node) {
				// Still in the document: a paired insertion record accounts
				// for the new position.
				trace!(id = id.get(), "Removed node is still connected; treating as a move.");
				return;
			}
			self.remove(id);
		} else {
			self.file_detached_descendants(dom, node);
		}
	}

	fn file_detached_descendants(&mut self, dom: &D, node: &D::Node) {
		let mut child = dom.first_child(node);
		while let Some(current) = child {
			child = dom.next_sibling(&current);
			if let Some(id) = self.identity_of(&current) {
				if !self.is_held(id) && !dom.is_connected(&current) {
					self.remove(id);
				}
			} else {
				self.file_detached_descendants(dom, &current);
			}
		}
	}

	/// Redundancy check: a later, separate notification about a node (or below
	/// a parent) that is already finalized re-reports work the eager subtree
	/// walk has done.
	fn should_process_child_list(&self, node: Option<NodeId>, parent: Option<NodeId>) -> bool {
		let finalized = |id: Option<NodeId>| id.and_then(|id| self.nodes.get(&id)).is_some_and(|mirror| mirror.finalized);
		!(finalized(node) || finalized(parent))
	}

	/// First following live sibling that is already mirrored under the same
	/// parent; `NONE` appends.
	fn live_anchor(&self, dom: &D, node: &D::Node, parent: NodeId) -> NodeId {
		let mut sibling = dom.next_sibling(node);
		while let Some(current) = sibling {
			if let Some(id) = self.identity_of(&current) {
				if self.nodes.get(&id).is_some_and(|mirror| mirror.parent == parent) {
					return id;
				}
			}
			sibling = dom.next_sibling(&current);
		}
		NodeId::NONE
	}

	fn is_held(&self, id: NodeId) -> bool {
		let mut current = id;
		while !current.is_none() {
			if self.held.contains(&current) {
				return true;
			}
			current = self.nodes.get(&current).map_or(NodeId::NONE, |mirror| mirror.parent);
		}
		false
	}

	/// Scans the markers into disjoint summary lists.
	///
	/// Fresh nodes are collected top-down (pre-order), so insert events for a
	/// new subtree come out parent-before-child. Held subtrees are not
	/// reachable from the root, which is what cancels moves and updates inside
	/// a subtree that was detached later in the same batch.
	fn summarize(&mut self) -> MutationSummary {
		let mut summary = MutationSummary::default();
		for id in self.preorder() {
			if self.fresh.contains(&id) {
				summary.inserted.push(id);
			} else if self.moved.contains(&id) {
				summary.moved.push(id);
			}
			if self.updated.contains(&id) && !self.moved.contains(&id) {
				summary.updated.push(id);
			}
		}
		summary.removed.extend(self.holding.iter().copied());
		summary
	}

	/// Destroys held subtrees (clearing their identities recursively, so a
	/// later re-insertion yields fresh identities) and resets all per-batch
	/// markers.
	pub fn finish_batch(&mut self) {
		for root in core::mem::take(&mut self.holding) {
			self.destroy_subtree(root);
		}
		self.held.clear();
		for id in self.fresh.drain() {
			if let Some(mirror) = self.nodes.get_mut(&id) {
				mirror.finalized = false;
			}
		}
		self.moved.clear();
		self.updated.clear();
	}

	fn destroy_subtree(&mut self, root: NodeId) {
		let mut stack = vec![root];
		while let Some(id) = stack.pop() {
			let Some(mirror) = self.nodes.remove(&id) else {
				warn!(id = id.get(), "Holding list referenced a missing mirror node.");
				continue;
			};
			self.identities.clear(&mirror.real);
			let mut child = mirror.first_child;
			while !child.is_none() {
				stack.push(child);
				child = self.nodes.get(&child).map_or(NodeId::NONE, |c| c.next_sibling);
			}
		}
	}

	// -- Consistency diagnostics --

	/// Parallel pre-order identity walks of the real document and the mirror.
	/// O(tree size); diagnostics only.
	#[must_use]
	pub fn index_snapshot(&self, dom: &D) -> ConsistencyReport {
		let mut real = Vec::new();
		let mut stack = vec![Some(dom.document())];
		while let Some(slot) = stack.pop() {
			let Some(node) = slot else { continue };
			real.push(self.identity_of(&node).map_or(0, NodeId::get));
			stack.push(dom.next_sibling(&node));
			stack.push(dom.first_child(&node));
		}
		let mirror = self.preorder().into_iter().map(NodeId::get).collect();
		ConsistencyReport { dom: real, mirror }
	}

	#[must_use]
	pub fn is_consistent(&self, dom: &D) -> bool {
		self.index_snapshot(dom).is_consistent()
	}

	fn preorder(&self) -> Vec<NodeId> {
		let mut out = Vec::with_capacity(self.nodes.len());
		let mut stack = vec![self.root];
		while let Some(id) = stack.pop() {
			if id.is_none() {
				continue;
			}
			out.push(id);
			if let Some(mirror) = self.nodes.get(&id) {
				stack.push(mirror.next_sibling);
				stack.push(mirror.first_child);
			}
		}
		out
	}

	// -- Links --

	fn link(&mut self, id: NodeId, parent: NodeId, next: NodeId) {
		if parent.is_none() {
			self.root = id;
			return;
		}
		let prev = if next.is_none() {
			self.nodes.get(&parent).map_or(NodeId::NONE, |p| p.last_child)
		} else {
			self.nodes.get(&next).map_or(NodeId::NONE, |n| n.prev_sibling)
		};
		if let Some(mirror) = self.nodes.get_mut(&id) {
			mirror.parent = parent;
			mirror.prev_sibling = prev;
			mirror.next_sibling = next;
		}
		if prev.is_none() {
			if let Some(p) = self.nodes.get_mut(&parent) {
				p.first_child = id;
			}
		} else if let Some(p) = self.nodes.get_mut(&prev) {
			p.next_sibling = id;
		}
		if next.is_none() {
			if let Some(p) = self.nodes.get_mut(&parent) {
				p.last_child = id;
			}
		} else if let Some(n) = self.nodes.get_mut(&next) {
			n.prev_sibling = id;
		}
	}

	fn unlink(&mut self, id: NodeId) {
		let Some((parent, prev, next)) = self.position(id) else { return };
		if prev.is_none() {
			if let Some(p) = self.nodes.get_mut(&parent) {
				p.first_child = next;
			}
		} else if let Some(p) = self.nodes.get_mut(&prev) {
			p.next_sibling = next;
		}
		if next.is_none() {
			if let Some(p) = self.nodes.get_mut(&parent) {
				p.last_child = prev;
			}
		} else if let Some(n) = self.nodes.get_mut(&next) {
			n.prev_sibling = prev;
		}
		if let Some(mirror) = self.nodes.get_mut(&id) {
			mirror.parent = NodeId::NONE;
			mirror.prev_sibling = NodeId::NONE;
			mirror.next_sibling = NodeId::NONE;
		}
		if self.root == id {
			self.root = NodeId::NONE;
		}
	}
}
