//! Scripted in-memory document backend.
//!
//! `SimDom` is a headless host document for tests, benches and demo harnesses:
//! every mutator both changes the tree and appends the notification record a
//! real observer would deliver, and `take_records` hands the accumulated batch
//! over. Pathological deliveries (reordered, duplicated, split batches) are
//! built by rearranging taken records before feeding them to the reconciler.

use crate::dom::{Dom, DoctypeInfo, DomError, MutationRecord, NodeKind, RectF, StyleSample};
use crate::reconcile::Clock;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Handle to one simulated node. Cheap to copy; identity is the arena slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SimNode(usize);

#[derive(Debug)]
struct NodeData {
	kind: NodeKind,
	tag: String,
	attributes: Vec<(String, String)>,
	data: String,
	doctype: Option<DoctypeInfo>,
	parent: Option<SimNode>,
	children: Vec<SimNode>,
	rect: RectF,
	broken_geometry: bool,
	scroll: Option<(i32, i32)>,
	input: bool,
	style: Option<StyleSample>,
	unmask: bool,
	rules: Option<Vec<String>>,
	cross_origin: bool,
}

impl NodeData {
	fn new(kind: NodeKind, tag: &str) -> Self {
		Self {
			kind,
			tag: tag.to_owned(),
			attributes: Vec::new(),
			data: String::new(),
			doctype: None,
			parent: None,
			children: Vec::new(),
			rect: RectF { x: 0.0, y: 0.0, width: 0.0, height: 0.0 },
			broken_geometry: false,
			scroll: None,
			input: false,
			style: None,
			unmask: false,
			rules: None,
			cross_origin: false,
		}
	}
}

#[derive(Debug)]
struct Arena {
	nodes: Vec<NodeData>,
	records: Vec<MutationRecord<SimNode>>,
	viewport_scroll: (f64, f64),
}

/// A scripted document: `#document` → doctype + `HTML` → `HEAD`, `BODY`.
#[derive(Clone, Debug)]
pub struct SimDom {
	arena: Rc<RefCell<Arena>>,
}

const DOCUMENT: SimNode = SimNode(0);
const DOCTYPE: SimNode = SimNode(1);
const HTML: SimNode = SimNode(2);
const HEAD: SimNode = SimNode(3);
const BODY: SimNode = SimNode(4);

impl Default for SimDom {
	fn default() -> Self {
		Self::new()
	}
}

impl SimDom {
	#[must_use]
	pub fn new() -> Self {
		let dom = Self {
			arena: Rc::new(RefCell::new(Arena {
				nodes: Vec::new(),
				records: Vec::new(),
				viewport_scroll: (0.0, 0.0),
			})),
		};
		{
			let mut arena = dom.arena.borrow_mut();
			arena.nodes.push(NodeData::new(NodeKind::Document, "#document"));
			let mut doctype = NodeData::new(NodeKind::Doctype, "html");
			doctype.doctype = Some(DoctypeInfo {
				name: "html".to_owned(),
				public_id: String::new(),
				system_id: String::new(),
			});
			arena.nodes.push(doctype);
			arena.nodes.push(NodeData::new(NodeKind::Element, "HTML"));
			arena.nodes.push(NodeData::new(NodeKind::Element, "HEAD"));
			arena.nodes.push(NodeData::new(NodeKind::Element, "BODY"));
		}
		dom.append(DOCUMENT, DOCTYPE);
		dom.append(DOCUMENT, HTML);
		dom.append(HTML, HEAD);
		dom.append(HTML, BODY);
		dom.arena.borrow_mut().records.clear();
		dom
	}

	#[must_use]
	pub fn doctype(&self) -> SimNode {
		DOCTYPE
	}

	#[must_use]
	pub fn html(&self) -> SimNode {
		HTML
	}

	#[must_use]
	pub fn head(&self) -> SimNode {
		HEAD
	}

	#[must_use]
	pub fn body(&self) -> SimNode {
		BODY
	}

	// -- Node construction (detached, recordless) --

	pub fn create_element(&self, tag: &str) -> SimNode {
		self.push(NodeData::new(NodeKind::Element, &tag.to_ascii_uppercase()))
	}

	pub fn create_text(&self, data: &str) -> SimNode {
		let mut node = NodeData::new(NodeKind::Text, "#text");
		node.data = data.to_owned();
		self.push(node)
	}

	pub fn create_comment(&self, data: &str) -> SimNode {
		let mut node = NodeData::new(NodeKind::Comment, "#comment");
		node.data = data.to_owned();
		self.push(node)
	}

	fn push(&self, data: NodeData) -> SimNode {
		let mut arena = self.arena.borrow_mut();
		arena.nodes.push(data);
		SimNode(arena.nodes.len() - 1)
	}

	// -- Mutators (tree change + notification record) --

	pub fn append(&self, parent: SimNode, child: SimNode) {
		self.attach(parent, child, None);
	}

	/// Inserts `child` before `anchor` (which must be a child of `parent`).
	pub fn insert_before(&self, parent: SimNode, child: SimNode, anchor: SimNode) {
		self.attach(parent, child, Some(anchor));
	}

	fn attach(&self, parent: SimNode, child: SimNode, anchor: Option<SimNode>) {
		self.detach(child);
		let mut arena = self.arena.borrow_mut();
		let index = anchor
			.and_then(|anchor| arena.nodes[parent.0].children.iter().position(|c| *c == anchor))
			.unwrap_or(arena.nodes[parent.0].children.len());
		arena.nodes[parent.0].children.insert(index, child);
		arena.nodes[child.0].parent = Some(parent);
		if self.connected_locked(&arena, parent) {
			arena.records.push(MutationRecord::ChildList {
				target: parent,
				added: vec![child],
				removed: Vec::new(),
			});
		}
	}

	pub fn remove(&self, child: SimNode) {
		self.detach(child);
	}

	fn detach(&self, child: SimNode) {
		let mut arena = self.arena.borrow_mut();
		let Some(parent) = arena.nodes[child.0].parent else { return };
		arena.nodes[parent.0].children.retain(|c| *c != child);
		arena.nodes[child.0].parent = None;
		// Mutations inside detached subtrees are invisible to the observer.
		if self.connected_locked(&arena, parent) {
			arena.records.push(MutationRecord::ChildList {
				target: parent,
				added: Vec::new(),
				removed: vec![child],
			});
		}
	}

	pub fn set_attribute(&self, node: SimNode, name: &str, value: &str) {
		let mut arena = self.arena.borrow_mut();
		if let Some(attr) = arena.nodes[node.0].attributes.iter_mut().find(|(n, _)| n == name) {
			attr.1 = value.to_owned();
		} else {
			arena.nodes[node.0].attributes.push((name.to_owned(), value.to_owned()));
		}
		if self.connected_locked(&arena, node) {
			arena.records.push(MutationRecord::Attributes { target: node });
		}
	}

	pub fn set_data(&self, node: SimNode, data: &str) {
		let mut arena = self.arena.borrow_mut();
		arena.nodes[node.0].data = data.to_owned();
		if self.connected_locked(&arena, node) {
			arena.records.push(MutationRecord::CharacterData { target: node });
		}
	}

	/// Takes everything recorded since the last call, as one delivered batch.
	#[must_use]
	pub fn take_records(&self) -> Vec<MutationRecord<SimNode>> {
		core::mem::take(&mut self.arena.borrow_mut().records)
	}

	// -- Scenario knobs --

	pub fn set_rect(&self, node: SimNode, x: f64, y: f64, width: f64, height: f64) {
		self.arena.borrow_mut().nodes[node.0].rect = RectF { x, y, width, height };
	}

	/// Makes geometry queries on this node fail, as some engines do.
	pub fn break_geometry(&self, node: SimNode) {
		self.arena.borrow_mut().nodes[node.0].broken_geometry = true;
	}

	/// Marks the node a scroll container with the given offsets (no record;
	/// scroll is reported through a bound listener, not the observer).
	pub fn set_scroll(&self, node: SimNode, x: i32, y: i32) {
		self.arena.borrow_mut().nodes[node.0].scroll = Some((x, y));
	}

	pub fn set_input(&self, node: SimNode, input: bool) {
		self.arena.borrow_mut().nodes[node.0].input = input;
	}

	pub fn set_style(&self, node: SimNode, style: StyleSample) {
		self.arena.borrow_mut().nodes[node.0].style = Some(style);
	}

	pub fn set_unmask(&self, node: SimNode) {
		self.arena.borrow_mut().nodes[node.0].unmask = true;
	}

	/// Gives a style element structurally captured rules (no record; rule
	/// edits are reported through the host's stylesheet shim).
	pub fn set_rules(&self, node: SimNode, rules: &[&str]) {
		self.arena.borrow_mut().nodes[node.0].rules = Some(rules.iter().map(|rule| (*rule).to_owned()).collect());
	}

	/// Makes the node's stylesheet deny rule access.
	pub fn set_cross_origin(&self, node: SimNode) {
		self.arena.borrow_mut().nodes[node.0].cross_origin = true;
	}

	pub fn set_viewport_scroll(&self, x: f64, y: f64) {
		self.arena.borrow_mut().viewport_scroll = (x, y);
	}

	fn connected_locked(&self, arena: &Arena, node: SimNode) -> bool {
		let mut current = node;
		loop {
			if arena.nodes[current.0].kind == NodeKind::Document {
				return true;
			}
			match arena.nodes[current.0].parent {
				Some(parent) => current = parent,
				None => return false,
			}
		}
	}
}

impl Dom for SimDom {
	type Node = SimNode;

	fn document(&self) -> SimNode {
		DOCUMENT
	}

	fn kind(&self, node: &SimNode) -> NodeKind {
		self.arena.borrow().nodes[node.0].kind
	}

	fn tag_name(&self, node: &SimNode) -> String {
		self.arena.borrow().nodes[node.0].tag.clone()
	}

	fn parent(&self, node: &SimNode) -> Option<SimNode> {
		self.arena.borrow().nodes[node.0].parent
	}

	fn first_child(&self, node: &SimNode) -> Option<SimNode> {
		self.arena.borrow().nodes[node.0].children.first().copied()
	}

	fn next_sibling(&self, node: &SimNode) -> Option<SimNode> {
		let arena = self.arena.borrow();
		let parent = arena.nodes[node.0].parent?;
		let siblings = &arena.nodes[parent.0].children;
		let index = siblings.iter().position(|c| c == node)?;
		siblings.get(index + 1).copied()
	}

	fn previous_sibling(&self, node: &SimNode) -> Option<SimNode> {
		let arena = self.arena.borrow();
		let parent = arena.nodes[node.0].parent?;
		let siblings = &arena.nodes[parent.0].children;
		let index = siblings.iter().position(|c| c == node)?;
		index.checked_sub(1).and_then(|i| siblings.get(i)).copied()
	}

	fn attributes(&self, node: &SimNode) -> Vec<(String, String)> {
		self.arena.borrow().nodes[node.0].attributes.clone()
	}

	fn character_data(&self, node: &SimNode) -> String {
		self.arena.borrow().nodes[node.0].data.clone()
	}

	fn doctype_info(&self, node: &SimNode) -> Option<DoctypeInfo> {
		self.arena.borrow().nodes[node.0].doctype.clone()
	}

	fn bounding_rect(&self, node: &SimNode) -> Result<RectF, DomError> {
		let arena = self.arena.borrow();
		if arena.nodes[node.0].broken_geometry || !self.connected_locked(&arena, *node) {
			return Err(DomError::GeometryUnavailable);
		}
		Ok(arena.nodes[node.0].rect)
	}

	fn viewport_scroll(&self) -> (f64, f64) {
		self.arena.borrow().viewport_scroll
	}

	fn scroll_offsets(&self, node: &SimNode) -> Option<(i32, i32)> {
		self.arena.borrow().nodes[node.0].scroll
	}

	fn accepts_input(&self, node: &SimNode) -> bool {
		self.arena.borrow().nodes[node.0].input
	}

	fn computed_style(&self, node: &SimNode) -> Option<StyleSample> {
		self.arena.borrow().nodes[node.0].style.clone()
	}

	fn style_rules(&self, node: &SimNode) -> Result<Option<Vec<String>>, DomError> {
		let arena = self.arena.borrow();
		if arena.nodes[node.0].cross_origin {
			return Err(DomError::StyleAccessDenied);
		}
		Ok(arena.nodes[node.0].rules.clone())
	}

	fn has_unmask_marker(&self, node: &SimNode) -> bool {
		self.arena.borrow().nodes[node.0].unmask
	}
}

/// Manually driven session clock.
#[derive(Clone, Debug, Default)]
pub struct SimClock(Rc<Cell<u64>>);

impl SimClock {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn advance(&self, ms: u64) {
		self.0.set(self.0.get() + ms);
	}

	pub fn set(&self, ms: u64) {
		self.0.set(ms);
	}
}

impl Clock for SimClock {
	fn now(&self) -> u64 {
		self.0.get()
	}
}
