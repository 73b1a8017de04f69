//! Per-node capture policy and state snapshots.
//!
//! The classifier decides what may be recorded about a node (ignore, mask,
//! variant) and produces the [`LayoutState`] snapshot for one change. It reads
//! the *current* document, so snapshots taken while deriving a batch summary
//! already reflect the batch's final state.

use crate::dom::{Dom, DomError, NodeKind, StyleSample};
use crate::layout::{LayoutState, Rect};
use crate::MirrorConfig;
use tracing::warn;

/// Attribute names masked by default, on top of the configured list.
const SENSITIVE_ATTRIBUTES: &[&str] = &["value", "placeholder", "alt", "title"];

/// Tags whose entire subtree is never captured.
const IGNORED_TAGS: &[&str] = &["SCRIPT", "NOSCRIPT", "META"];

#[derive(Debug)]
pub struct NodeClassifier {
	capture_text: bool,
	capture_images: bool,
	sensitive: Vec<String>,
}

impl NodeClassifier {
	#[must_use]
	pub fn new(config: &MirrorConfig) -> Self {
		Self {
			capture_text: config.capture_text,
			capture_images: config.capture_images,
			sensitive: config.sensitive_attributes.clone(),
		}
	}

	/// Whether a node is captured only as an opaque `Ignored` marker.
	///
	/// Ignoring is contagious: every descendant of an ignored node is ignored
	/// at creation. Text children of a style element are ignorable when the
	/// sheet's rules are captured structurally on the element itself.
	pub fn should_ignore<D: Dom>(&self, dom: &D, node: &D::Node, parent_ignored: bool) -> bool {
		if parent_ignored {
			return true;
		}
		match dom.kind(node) {
			NodeKind::Comment => true,
			NodeKind::Element => {
				let tag = dom.tag_name(node);
				IGNORED_TAGS.iter().any(|ignored| *ignored == tag)
			}
			NodeKind::Text => dom
				.parent(node)
				.filter(|parent| dom.kind(parent) == NodeKind::Element && dom.tag_name(parent) == "STYLE")
				.is_some_and(|parent| matches!(dom.style_rules(&parent), Ok(Some(_)))),
			_ => false,
		}
	}

	/// Produces the emitted snapshot for one node.
	///
	/// Geometry failures are swallowed (the element is recorded without
	/// layout); stylesheet permission denials are swallowed (rules omitted);
	/// any other stylesheet failure propagates.
	pub fn snapshot<D: Dom>(&self, dom: &D, node: &D::Node, ignored: bool) -> Result<LayoutState, DomError> {
		let kind = dom.kind(node);
		if ignored {
			return Ok(LayoutState::Ignored {
				kind,
				tag: (kind == NodeKind::Element).then(|| dom.tag_name(node)),
			});
		}
		match kind {
			NodeKind::Element => self.element_snapshot(dom, node),
			NodeKind::Text => Ok(LayoutState::Text { content: self.text_content(dom, node) }),
			NodeKind::Doctype => {
				let info = dom.doctype_info(node).unwrap_or_else(|| crate::dom::DoctypeInfo {
					name: dom.tag_name(node),
					public_id: String::new(),
					system_id: String::new(),
				});
				Ok(LayoutState::Doctype {
					name: info.name,
					public_id: info.public_id,
					system_id: info.system_id,
				})
			}
			_ => Ok(LayoutState::Ignored { kind, tag: None }),
		}
	}

	fn element_snapshot<D: Dom>(&self, dom: &D, node: &D::Node) -> Result<LayoutState, DomError> {
		let tag = dom.tag_name(node);
		let unmasked = self.is_unmasked(dom, node);

		let mut attributes = Vec::new();
		for (name, value) in dom.attributes(node) {
			if !self.capture_images && tag == "IMG" && name == "src" {
				continue;
			}
			let value = if self.is_sensitive(&name) && !unmasked { mask(&value) } else { value };
			attributes.push((name, value));
		}

		let rect = match dom.bounding_rect(node) {
			Ok(rect) => {
				let (sx, sy) = dom.viewport_scroll();
				#[allow(clippy::cast_possible_truncation)]
				let rect = Rect {
					x: (rect.x + sx).floor() as i32,
					y: (rect.y + sy).floor() as i32,
					width: rect.width.round() as i32,
					height: rect.height.round() as i32,
				};
				Some(rect)
			}
			Err(error) => {
				warn!("Recording <{}> without layout: {}", tag, error);
				None
			}
		};

		let rules = match dom.style_rules(node) {
			Ok(rules) => rules,
			Err(DomError::StyleAccessDenied) => {
				warn!("Stylesheet rules of <{}> are inaccessible. Omitting them.", tag);
				None
			}
			Err(error) => return Err(error),
		};

		Ok(LayoutState::Element {
			tag,
			attributes,
			rect,
			scroll: dom.scroll_offsets(node),
			style: style_deltas(dom.computed_style(node)),
			rules,
		})
	}

	fn text_content<D: Dom>(&self, dom: &D, node: &D::Node) -> String {
		let content = dom.character_data(node);
		// Style text is code, not user content.
		let style_child = dom
			.parent(node)
			.is_some_and(|parent| dom.kind(&parent) == NodeKind::Element && dom.tag_name(&parent) == "STYLE");
		if style_child || self.capture_text || self.is_unmasked(dom, node) {
			content
		} else {
			mask(&content)
		}
	}

	fn is_sensitive(&self, name: &str) -> bool {
		SENSITIVE_ATTRIBUTES.iter().any(|sensitive| *sensitive == name)
			|| self.sensitive.iter().any(|sensitive| sensitive == name)
	}

	/// An explicit unmask marker anywhere along the ancestor chain unmasks the
	/// node.
	fn is_unmasked<D: Dom>(&self, dom: &D, node: &D::Node) -> bool {
		let mut current = Some(node.clone());
		while let Some(n) = current {
			if dom.has_unmask_marker(&n) {
				return true;
			}
			current = dom.parent(&n);
		}
		false
	}
}

/// Replaces every non-whitespace character, preserving whitespace layout.
fn mask(value: &str) -> String {
	value.chars().map(|c| if c.is_whitespace() { c } else { '*' }).collect()
}

/// The subset of computed styles differing from the default presentation.
fn style_deltas(sample: Option<StyleSample>) -> Vec<(String, String)> {
	let Some(sample) = sample else { return Vec::new() };
	let defaults = StyleSample::default_presentation();
	let mut deltas = Vec::new();
	for (name, value, default) in [
		("visibility", &sample.visibility, &defaults.visibility),
		("overflow", &sample.overflow, &defaults.overflow),
		("background", &sample.background, &defaults.background),
		("color", &sample.color, &defaults.color),
	] {
		if value != default && !value.is_empty() {
			deltas.push((name.to_owned(), value.clone()));
		}
	}
	deltas
}
