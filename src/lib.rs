#![doc(html_root_url = "https://docs.rs/dom-mirror/0.1.0")]
#![warn(clippy::pedantic)]

//! An incremental DOM mirror for session recording.
//!
//! The crate keeps a shadow copy of a document, assigns each mirrored node a
//! stable identity, and turns observer deliveries into a minimal stream of
//! layout events (insert, update, move, remove) that a downstream consumer
//! can replay.
//!
//! The document is abstracted behind [`dom::Dom`]; [`web::WebDom`] binds the
//! real browser document and [`sim::SimDom`] provides an in-process document
//! for tests and doctests.

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod classify;
pub mod dom;
pub mod identity;
pub mod layout;
pub mod mirror;
pub mod reconcile;
pub mod sim;
pub mod web;

pub use classify::NodeClassifier;
pub use identity::NodeId;
pub use layout::{Action, DiagnosticEvent, EventSink, LayoutEvent, LayoutState, RecordedEvents, Source};
pub use mirror::ShadowTree;
pub use reconcile::{BindingKind, BindingRequest, Clock, Phase, Reconciler};

/// Capture policy and tuning for a mirror session.
#[derive(Clone, Debug)]
pub struct MirrorConfig {
	/// Emit text content verbatim instead of masking it.
	pub capture_text: bool,
	/// Keep image source attributes.
	pub capture_images: bool,
	/// Attribute names masked in addition to the classifier's built-in list.
	pub sensitive_attributes: Vec<String>,
	/// Run the consistency check after every reconciled batch.
	pub validate: bool,
	/// Per-step time budget for initial discovery, or `None` to walk the
	/// whole document in one step.
	pub discovery_budget_ms: Option<u64>,
	/// Minimum scroll distance, in pixels, before a scroll update is emitted.
	pub scroll_threshold_px: f64,
	/// Quiet period before accumulated stylesheet changes are flushed.
	pub style_debounce_ms: u64,
}

impl Default for MirrorConfig {
	fn default() -> Self {
		Self {
			capture_text: false,
			capture_images: false,
			sensitive_attributes: Vec::new(),
			validate: true,
			discovery_budget_ms: None,
			scroll_threshold_px: 16.0,
			style_debounce_ms: 50,
		}
	}
}
