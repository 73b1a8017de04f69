//! The emitted event contract.
//!
//! Downstream consumers (compact encoder, replay) depend on the integer
//! encodings of [`Source`] and [`Action`] byte-for-byte, so both are closed
//! enumerations with fixed discriminants and serialize as plain integers.

use crate::dom::NodeKind;
use crate::identity::NodeId;
use serde::{Serialize, Serializer};

/// Where a change was observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Source {
	/// Initial full-tree discovery walk.
	Discover = 0,
	/// A live mutation batch.
	Mutation = 1,
	Scroll = 2,
	Input = 3,
}

/// What happened to the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
	Insert = 0,
	Update = 1,
	Remove = 2,
	Move = 3,
}

impl Serialize for Source {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u8(*self as u8)
	}
}

impl Serialize for Action {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u8(*self as u8)
	}
}

fn serialize_kind<S: Serializer>(kind: &NodeKind, serializer: S) -> Result<S::Ok, S::Error> {
	serializer.serialize_u8(kind.code())
}

/// Rounded, document-absolute bounding rectangle.
///
/// Position uses `floor` (normalizing sub-pixel rounding differences across
/// engines), extent uses `round`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Rect {
	pub x: i32,
	pub y: i32,
	pub width: i32,
	pub height: i32,
}

/// Variant payload of one emitted change.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum LayoutState {
	Element {
		tag: String,
		attributes: Vec<(String, String)>,
		/// Absent when geometry was unavailable.
		rect: Option<Rect>,
		/// Present only for scroll containers.
		scroll: Option<(i32, i32)>,
		/// Computed-style deltas from the default presentation.
		style: Vec<(String, String)>,
		/// Flattened rule text for style elements with accessible sheets.
		rules: Option<Vec<String>>,
	},
	Text {
		content: String,
	},
	Doctype {
		name: String,
		public_id: String,
		system_id: String,
	},
	/// Ignored nodes surface only their kind (and tag for elements), never
	/// content.
	Ignored {
		#[serde(serialize_with = "serialize_kind")]
		kind: NodeKind,
		tag: Option<String>,
	},
}

/// One classified change with stable node identity and tree position.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LayoutEvent {
	pub id: NodeId,
	pub source: Source,
	pub action: Action,
	pub parent: NodeId,
	pub previous: NodeId,
	pub next: NodeId,
	/// Shared by every event derived from one mutation batch; absent for
	/// discovery, scroll and input events.
	pub mutation_sequence: Option<u32>,
	/// Milliseconds from the session clock. All discovery events share one
	/// timestamp.
	pub time: u64,
	pub state: LayoutState,
}

/// Parallel pre-order identity walks of the real document and the mirror.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
	/// Real-document identities in pre-order; `0` marks an untracked node.
	pub dom: Vec<u32>,
	/// Mirror identities in pre-order.
	pub mirror: Vec<u32>,
}

impl ConsistencyReport {
	#[must_use]
	pub fn is_consistent(&self) -> bool {
		self.dom == self.mirror
	}
}

/// Emitted once when the engine degrades after two consecutive mismatches.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiagnosticEvent {
	/// The first, tolerated mismatch.
	pub first: Option<ConsistencyReport>,
	/// The mismatch that triggered the degrade.
	pub second: ConsistencyReport,
	pub last_consistent: Option<ConsistencyReport>,
	pub last_event: Option<LayoutEvent>,
}

/// Downstream consumer of the event stream.
pub trait EventSink {
	fn layout(&mut self, event: LayoutEvent);

	fn diagnostic(&mut self, event: DiagnosticEvent) {
		let _ = event;
	}
}

/// Buffering sink for tests and simple hosts.
#[derive(Debug, Default)]
pub struct RecordedEvents {
	pub layouts: Vec<LayoutEvent>,
	pub diagnostics: Vec<DiagnosticEvent>,
}

impl EventSink for RecordedEvents {
	fn layout(&mut self, event: LayoutEvent) {
		self.layouts.push(event);
	}

	fn diagnostic(&mut self, event: DiagnosticEvent) {
		self.diagnostics.push(event);
	}
}
