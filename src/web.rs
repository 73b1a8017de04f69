//! Browser backend over `web-sys`.
//!
//! [`WebDom`] adapts the real document to the [`Dom`] seam, stamping each
//! wrapped node with a hash key so node handles can key the identity
//! side-table. [`MutationChannel`] owns the
//! [***MutationObserver***](https://developer.mozilla.org/en-US/docs/Web/API/MutationObserver)
//! and converts its deliveries into [`MutationRecord`] batches the host loop
//! drains into the reconciler.

use crate::dom::{Dom, DoctypeInfo, DomError, MutationRecord, NodeKind, RectF, StyleSample};
use crate::reconcile::Clock;
use core::hash::{Hash, Hasher};
use js_sys::{Array, Reflect};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::warn;
use wasm_bindgen::{closure::Closure, JsCast, JsValue};

/// Expando property carrying the wrap key. The key is *not* the node's
/// identity, it only makes handles hashable; identities live in the
/// side-table.
const KEY_PROPERTY: &str = "__domMirrorKey";

fn host_error(value: &JsValue) -> DomError {
	DomError::Host(format!("{value:?}"))
}

/// Hashable handle to a real browser node.
#[derive(Clone, Debug)]
pub struct WebNode {
	node: web_sys::Node,
	key: u64,
}

impl WebNode {
	#[must_use]
	pub fn raw(&self) -> &web_sys::Node {
		&self.node
	}
}

impl PartialEq for WebNode {
	fn eq(&self, other: &Self) -> bool {
		self.key == other.key
	}
}

impl Eq for WebNode {}

impl Hash for WebNode {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.key.hash(state);
	}
}

/// The live browser document.
#[derive(Clone, Debug)]
pub struct WebDom {
	window: web_sys::Window,
	document: web_sys::Document,
	next_key: Rc<Cell<u64>>,
}

impl WebDom {
	pub fn new() -> Result<Self, DomError> {
		let window = web_sys::window().ok_or_else(|| DomError::Host("no window".to_owned()))?;
		let document = window.document().ok_or_else(|| DomError::Host("no document".to_owned()))?;
		Ok(Self {
			window,
			document,
			next_key: Rc::new(Cell::new(1)),
		})
	}

	/// Wraps a raw node, reusing the stamped key or assigning the next one.
	#[must_use]
	pub fn wrap(&self, node: web_sys::Node) -> WebNode {
		let property = JsValue::from_str(KEY_PROPERTY);
		if let Ok(value) = Reflect::get(node.as_ref(), &property) {
			if let Some(key) = value.as_f64() {
				#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
				return WebNode { node, key: key as u64 };
			}
		}
		let key = self.next_key.get();
		self.next_key.set(key + 1);
		#[allow(clippy::cast_precision_loss)]
		if Reflect::set(node.as_ref(), &property, &JsValue::from_f64(key as f64)).is_err() {
			warn!("Could not stamp a node key; the node will not keep a stable handle.");
		}
		WebNode { node, key }
	}

	fn as_element(node: &WebNode) -> Option<&web_sys::Element> {
		node.node.dyn_ref::<web_sys::Element>()
	}
}

impl Dom for WebDom {
	type Node = WebNode;

	fn document(&self) -> WebNode {
		self.wrap(self.document.clone().unchecked_into::<web_sys::Node>())
	}

	fn kind(&self, node: &WebNode) -> NodeKind {
		match node.node.node_type() {
			web_sys::Node::ELEMENT_NODE => NodeKind::Element,
			web_sys::Node::TEXT_NODE => NodeKind::Text,
			web_sys::Node::COMMENT_NODE => NodeKind::Comment,
			web_sys::Node::DOCUMENT_NODE => NodeKind::Document,
			web_sys::Node::DOCUMENT_TYPE_NODE => NodeKind::Doctype,
			_ => NodeKind::Other,
		}
	}

	fn tag_name(&self, node: &WebNode) -> String {
		Self::as_element(node).map_or_else(|| node.node.node_name(), web_sys::Element::tag_name)
	}

	fn parent(&self, node: &WebNode) -> Option<WebNode> {
		node.node.parent_node().map(|parent| self.wrap(parent))
	}

	fn first_child(&self, node: &WebNode) -> Option<WebNode> {
		node.node.first_child().map(|child| self.wrap(child))
	}

	fn next_sibling(&self, node: &WebNode) -> Option<WebNode> {
		node.node.next_sibling().map(|sibling| self.wrap(sibling))
	}

	fn previous_sibling(&self, node: &WebNode) -> Option<WebNode> {
		node.node.previous_sibling().map(|sibling| self.wrap(sibling))
	}

	fn attributes(&self, node: &WebNode) -> Vec<(String, String)> {
		let Some(element) = Self::as_element(node) else { return Vec::new() };
		let map = element.attributes();
		let mut attributes = Vec::with_capacity(map.length() as usize);
		for i in 0..map.length() {
			if let Some(attr) = map.item(i) {
				attributes.push((attr.name(), attr.value()));
			}
		}
		attributes
	}

	fn character_data(&self, node: &WebNode) -> String {
		node.node.dyn_ref::<web_sys::CharacterData>().map(web_sys::CharacterData::data).unwrap_or_default()
	}

	fn doctype_info(&self, node: &WebNode) -> Option<DoctypeInfo> {
		let doctype = node.node.dyn_ref::<web_sys::DocumentType>()?;
		Some(DoctypeInfo {
			name: doctype.name(),
			public_id: doctype.public_id(),
			system_id: doctype.system_id(),
		})
	}

	fn bounding_rect(&self, node: &WebNode) -> Result<RectF, DomError> {
		let element = Self::as_element(node).ok_or(DomError::GeometryUnavailable)?;
		if !node.node.is_connected() {
			return Err(DomError::GeometryUnavailable);
		}
		let rect = element.get_bounding_client_rect();
		Ok(RectF {
			x: rect.x(),
			y: rect.y(),
			width: rect.width(),
			height: rect.height(),
		})
	}

	fn viewport_scroll(&self) -> (f64, f64) {
		(
			self.window.page_x_offset().unwrap_or(0.0),
			self.window.page_y_offset().unwrap_or(0.0),
		)
	}

	fn scroll_offsets(&self, node: &WebNode) -> Option<(i32, i32)> {
		let element = Self::as_element(node)?;
		let scrolls = element.scroll_height() > element.client_height() || element.scroll_width() > element.client_width();
		scrolls.then(|| (element.scroll_left(), element.scroll_top()))
	}

	fn accepts_input(&self, node: &WebNode) -> bool {
		if node.node.dyn_ref::<web_sys::HtmlInputElement>().is_some() {
			return true;
		}
		if let Some(element) = Self::as_element(node) {
			let tag = element.tag_name();
			if tag == "TEXTAREA" || tag == "SELECT" {
				return true;
			}
		}
		node.node
			.dyn_ref::<web_sys::HtmlElement>()
			.is_some_and(web_sys::HtmlElement::is_content_editable)
	}

	fn computed_style(&self, node: &WebNode) -> Option<StyleSample> {
		let element = Self::as_element(node)?;
		let style = self.window.get_computed_style(element).ok()??;
		let property = |name: &str| style.get_property_value(name).unwrap_or_default();
		Some(StyleSample {
			visibility: property("visibility"),
			overflow: property("overflow"),
			background: property("background"),
			color: property("color"),
		})
	}

	fn style_rules(&self, node: &WebNode) -> Result<Option<Vec<String>>, DomError> {
		let Some(style) = node.node.dyn_ref::<web_sys::HtmlStyleElement>() else {
			return Ok(None);
		};
		let Some(sheet) = style.sheet() else { return Ok(None) };
		let Ok(sheet) = sheet.dyn_into::<web_sys::CssStyleSheet>() else {
			return Ok(None);
		};
		let rules = match sheet.css_rules() {
			Ok(rules) => rules,
			Err(error) => {
				// Cross-origin sheets throw SecurityError; anything else is a
				// real failure.
				if error.dyn_ref::<web_sys::DomException>().is_some_and(|e| e.name() == "SecurityError") {
					return Err(DomError::StyleAccessDenied);
				}
				return Err(host_error(&error));
			}
		};
		let mut out = Vec::with_capacity(rules.length() as usize);
		for i in 0..rules.length() {
			if let Some(rule) = rules.item(i) {
				out.push(rule.css_text());
			}
		}
		Ok(Some(out))
	}

	fn has_unmask_marker(&self, node: &WebNode) -> bool {
		Self::as_element(node).is_some_and(|element| element.has_attribute("data-capture-unmask"))
	}

	fn is_connected(&self, node: &WebNode) -> bool {
		node.node.is_connected()
	}
}

/// Owns the observer and queues converted deliveries for the host loop.
///
/// The callback closure is kept alive by the channel; dropping the channel
/// disconnects the observer.
pub struct MutationChannel {
	observer: web_sys::MutationObserver,
	queue: Rc<RefCell<Vec<Vec<MutationRecord<WebNode>>>>>,
	_callback: Closure<dyn FnMut(Array, web_sys::MutationObserver)>,
}

impl MutationChannel {
	/// Starts observing the whole document subtree for child-list, attribute
	/// and character-data changes.
	pub fn observe(dom: &WebDom) -> Result<Self, DomError> {
		let queue: Rc<RefCell<Vec<Vec<MutationRecord<WebNode>>>>> = Rc::new(RefCell::new(Vec::new()));

		let converter = dom.clone();
		let delivery_queue = Rc::clone(&queue);
		let callback = Closure::wrap(Box::new(move |records: Array, _observer: web_sys::MutationObserver| {
			delivery_queue.borrow_mut().push(convert_records(&converter, &records));
		}) as Box<dyn FnMut(Array, web_sys::MutationObserver)>);

		let observer = web_sys::MutationObserver::new(callback.as_ref().unchecked_ref()).map_err(|error| host_error(&error))?;
		let mut init = web_sys::MutationObserverInit::new();
		init.child_list(true).attributes(true).character_data(true).subtree(true);
		observer
			.observe_with_options(dom.document().raw(), &init)
			.map_err(|error| host_error(&error))?;

		Ok(Self {
			observer,
			queue,
			_callback: callback,
		})
	}

	/// Batches delivered since the last drain, oldest first.
	#[must_use]
	pub fn drain(&self) -> Vec<Vec<MutationRecord<WebNode>>> {
		core::mem::take(&mut self.queue.borrow_mut())
	}

	pub fn disconnect(&self) {
		self.observer.disconnect();
	}
}

impl Drop for MutationChannel {
	fn drop(&mut self) {
		self.observer.disconnect();
	}
}

fn convert_records(dom: &WebDom, records: &Array) -> Vec<MutationRecord<WebNode>> {
	let mut batch = Vec::with_capacity(records.length() as usize);
	for value in records.iter() {
		let Ok(record) = value.dyn_into::<web_sys::MutationRecord>() else {
			warn!("Observer delivered a non-record value. Skipping it.");
			continue;
		};
		let Some(target) = record.target() else { continue };
		let target = dom.wrap(target);
		batch.push(match record.type_().as_str() {
			"attributes" => MutationRecord::Attributes { target },
			"characterData" => MutationRecord::CharacterData { target },
			_ => MutationRecord::ChildList {
				target,
				added: collect_nodes(dom, &record.added_nodes()),
				removed: collect_nodes(dom, &record.removed_nodes()),
			},
		});
	}
	batch
}

fn collect_nodes(dom: &WebDom, list: &web_sys::NodeList) -> Vec<WebNode> {
	let mut nodes = Vec::with_capacity(list.length() as usize);
	for i in 0..list.length() {
		if let Some(node) = list.item(i) {
			nodes.push(dom.wrap(node));
		}
	}
	nodes
}

/// Session clock backed by the performance timeline.
#[derive(Clone, Debug)]
pub struct PerformanceClock(web_sys::Performance);

impl PerformanceClock {
	pub fn new() -> Result<Self, DomError> {
		let window = web_sys::window().ok_or_else(|| DomError::Host("no window".to_owned()))?;
		let performance = window.performance().ok_or_else(|| DomError::Host("no performance timeline".to_owned()))?;
		Ok(Self(performance))
	}
}

impl Clock for PerformanceClock {
	fn now(&self) -> u64 {
		#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
		let now = self.0.now() as u64;
		now
	}
}
