//! The host-document seam.
//!
//! The reconciliation engine never touches a concrete DOM API. Everything it
//! needs from the live document (structure queries, node kinds, attribute and
//! text access, geometry) goes through the [`Dom`] trait, and every change
//! notification arrives as a [`MutationRecord`]. The browser backend lives in
//! [`web`](crate::web); the scripted in-memory backend in [`sim`](crate::sim).

use core::fmt::Debug;
use core::hash::Hash;
use thiserror::Error;

/// Coarse node kind, matching the host's node-type partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
	Document,
	Doctype,
	Element,
	Text,
	Comment,
	/// Processing instructions, CDATA and anything else the recording does not
	/// distinguish further.
	Other,
}

impl NodeKind {
	/// Fixed integer encoding shared with downstream replay consumers.
	#[must_use]
	pub fn code(self) -> u8 {
		match self {
			Self::Document => 0,
			Self::Doctype => 1,
			Self::Element => 2,
			Self::Text => 3,
			Self::Comment => 4,
			Self::Other => 5,
		}
	}
}

/// Doctype identification, copied verbatim into the emitted state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DoctypeInfo {
	pub name: String,
	pub public_id: String,
	pub system_id: String,
}

/// Unrounded bounding rectangle in viewport coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RectF {
	pub x: f64,
	pub y: f64,
	pub width: f64,
	pub height: f64,
}

/// The computed-style subset the recording cares about.
///
/// Only values that differ from [`StyleSample::default_presentation`] end up
/// in the emitted state, to keep element payloads small.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyleSample {
	pub visibility: String,
	pub overflow: String,
	pub background: String,
	pub color: String,
}

impl StyleSample {
	/// The default presentation a delta-free element is assumed to have.
	#[must_use]
	pub fn default_presentation() -> Self {
		Self {
			visibility: "visible".to_owned(),
			overflow: "visible".to_owned(),
			background: "none".to_owned(),
			color: String::new(),
		}
	}
}

/// Failures at the host boundary.
#[derive(Debug, Error)]
pub enum DomError {
	/// Geometry queries on disconnected nodes fail intermittently in some
	/// engines. Swallowed by the classifier; the element is recorded without
	/// layout.
	#[error("geometry is unavailable for a disconnected or unrendered node")]
	GeometryUnavailable,
	/// The host denied access to stylesheet rules (cross-origin sheets).
	/// Tolerated; rules are omitted. Any other stylesheet failure propagates.
	#[error("the host denied access to stylesheet rules")]
	StyleAccessDenied,
	#[error("host document error: {0}")]
	Host(String),
}

/// One raw change notification out of an atomically delivered batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationRecord<N> {
	/// An attribute of `target` changed.
	Attributes { target: N },
	/// The character data of `target` changed.
	CharacterData { target: N },
	/// Children were added to and/or removed from `target`.
	ChildList { target: N, added: Vec<N>, removed: Vec<N> },
}

/// Read-only view of the live document.
///
/// Node handles are cheap clones that compare and hash by host identity, so
/// they can key the identity side-table. The engine always reads the *current*
/// state of the document: batches describe what changed, the document itself
/// is ground truth for where everything ended up.
pub trait Dom {
	type Node: Clone + Eq + Hash + Debug;

	/// The document root; discovery and consistency walks start here.
	fn document(&self) -> Self::Node;

	fn kind(&self, node: &Self::Node) -> NodeKind;

	/// Upper-case tag name for elements, the host's node name otherwise.
	fn tag_name(&self, node: &Self::Node) -> String;

	fn parent(&self, node: &Self::Node) -> Option<Self::Node>;
	fn first_child(&self, node: &Self::Node) -> Option<Self::Node>;
	fn next_sibling(&self, node: &Self::Node) -> Option<Self::Node>;
	fn previous_sibling(&self, node: &Self::Node) -> Option<Self::Node>;

	/// Attribute name/value pairs in host order. Empty for non-elements.
	fn attributes(&self, node: &Self::Node) -> Vec<(String, String)>;

	/// Text or comment content. Empty for other kinds.
	fn character_data(&self, node: &Self::Node) -> String;

	fn doctype_info(&self, node: &Self::Node) -> Option<DoctypeInfo>;

	/// Viewport-relative bounding rectangle.
	fn bounding_rect(&self, node: &Self::Node) -> Result<RectF, DomError>;

	/// Current viewport scroll offset, added to rectangles so positions are
	/// document-absolute.
	fn viewport_scroll(&self) -> (f64, f64);

	/// `Some` when the element is a scroll container, with its current
	/// offsets.
	fn scroll_offsets(&self, node: &Self::Node) -> Option<(i32, i32)>;

	/// True for elements that take user input (and therefore need an input
	/// observer bound).
	fn accepts_input(&self, node: &Self::Node) -> bool;

	fn computed_style(&self, node: &Self::Node) -> Option<StyleSample>;

	/// Flattened stylesheet rule text for a style element, `Ok(None)` for
	/// everything else.
	fn style_rules(&self, node: &Self::Node) -> Result<Option<Vec<String>>, DomError>;

	/// Explicit unmask marker on this node (checked along the ancestor chain
	/// by the classifier).
	fn has_unmask_marker(&self, node: &Self::Node) -> bool;

	/// Whether the node is reachable from the document root.
	fn is_connected(&self, node: &Self::Node) -> bool {
		let mut current = node.clone();
		loop {
			if self.kind(&current) == NodeKind::Document {
				return true;
			}
			match self.parent(&current) {
				Some(parent) => current = parent,
				None => return false,
			}
		}
	}
}
