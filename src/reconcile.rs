//! Drives the mirror: discovery, live batches, and the degrade machine.
//!
//! One [`Reconciler`] owns one recording session. It performs the initial
//! full-tree discovery walk (optionally time-sliced), turns every delivered
//! batch into classified events stamped with a monotonic sequence number, and
//! watches mirror-vs-document consistency: one mismatch is tolerated (a known
//! engine quirk can split a logical batch and deliver the dependent half
//! first), a second consecutive one degrades the session.

use crate::classify::NodeClassifier;
use crate::dom::{Dom, DomError, MutationRecord};
use crate::identity::NodeId;
use crate::layout::{Action, ConsistencyReport, DiagnosticEvent, EventSink, LayoutEvent, Source};
use crate::mirror::{MutationSummary, ShadowTree};
use crate::MirrorConfig;
use hashbrown::{HashMap, HashSet};
use tracing::{instrument, trace, trace_span, warn};

/// Session time source, in milliseconds.
///
/// Hosts inject their own: the browser backend reads the performance clock,
/// tests drive a manual one.
pub trait Clock {
	fn now(&self) -> u64;
}

/// Lifecycle of a recording session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
	Idle,
	Discovering,
	Steady,
	/// Two consecutive consistency violations: mutation processing has
	/// stopped. Recovery is re-activation, not in-place repair.
	Degraded,
	TornDown,
}

/// Observer kinds the host is asked to bind lazily.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
	Scroll,
	Input,
}

/// A request for the host to attach a listener to a real node.
///
/// Queued the first time a scroll container or input-capable element is
/// discovered or inserted; drained with
/// [`Reconciler::take_binding_requests`].
#[derive(Clone, Debug)]
pub struct BindingRequest<N> {
	pub node: N,
	pub kind: BindingKind,
}

pub struct Reconciler<D: Dom> {
	dom: D,
	clock: Box<dyn Clock>,
	config: MirrorConfig,
	classifier: NodeClassifier,
	shadow: ShadowTree<D>,
	phase: Phase,
	mutation_sequence: u32,
	discovery_stack: Vec<D::Node>,
	discovery_time: u64,
	/// Batches delivered while discovery is still walking; applied once the
	/// walk completes so the discovery timestamp stays atomic.
	queued: Vec<Vec<MutationRecord<D::Node>>>,
	strike: Option<ConsistencyReport>,
	last_consistent: Option<ConsistencyReport>,
	last_event: Option<LayoutEvent>,
	binding_requests: Vec<BindingRequest<D::Node>>,
	scroll_bound: HashSet<NodeId>,
	input_bound: HashSet<NodeId>,
	scroll_last: HashMap<NodeId, (f64, f64)>,
	style_pending: Vec<(D::Node, u64)>,
}

impl<D: Dom> Reconciler<D> {
	#[must_use]
	pub fn new(dom: D, config: MirrorConfig, clock: Box<dyn Clock>) -> Self {
		let classifier = NodeClassifier::new(&config);
		Self {
			dom,
			clock,
			config,
			classifier,
			shadow: ShadowTree::new(),
			phase: Phase::Idle,
			mutation_sequence: 0,
			discovery_stack: Vec::new(),
			discovery_time: 0,
			queued: Vec::new(),
			strike: None,
			last_consistent: None,
			last_event: None,
			binding_requests: Vec::new(),
			scroll_bound: HashSet::new(),
			input_bound: HashSet::new(),
			scroll_last: HashMap::new(),
			style_pending: Vec::new(),
		}
	}

	#[must_use]
	pub fn phase(&self) -> Phase {
		self.phase
	}

	#[must_use]
	pub fn mutation_sequence(&self) -> u32 {
		self.mutation_sequence
	}

	// -- Lifecycle --

	/// Starts discovery: a pre-order walk that mirrors every node and emits
	/// one insert event per node, all sharing one discovery timestamp.
	///
	/// Without a configured time budget the walk completes synchronously.
	/// With one, call [`discover_step`](Self::discover_step) until it returns
	/// `Ok(true)`.
	#[instrument(skip(self, sink))]
	pub fn activate(&mut self, sink: &mut dyn EventSink) -> Result<bool, DomError> {
		if self.phase != Phase::Idle {
			warn!(phase = ?self.phase, "activate() outside Idle is a no-op. Re-activation goes through reset().");
			return Ok(true);
		}
		self.discovery_time = self.clock.now();
		self.discovery_stack.push(self.dom.document());
		self.phase = Phase::Discovering;
		self.discover_step(sink)
	}

	/// Continues a time-sliced discovery walk. Returns `Ok(true)` once the
	/// walk is complete (and any batches queued meanwhile were applied).
	pub fn discover_step(&mut self, sink: &mut dyn EventSink) -> Result<bool, DomError> {
		if self.phase != Phase::Discovering {
			return Ok(true);
		}
		let span = trace_span!("discover", pending = self.discovery_stack.len());
		let _enter = span.enter();

		let start = self.clock.now();
		while let Some(node) = self.discovery_stack.pop() {
			self.discover_node(&node, sink)?;

			let mut children = Vec::new();
			let mut child = self.dom.first_child(&node);
			while let Some(current) = child {
				child = self.dom.next_sibling(&current);
				children.push(current);
			}
			// Reversed so the explicit stack pops them in document order;
			// already-visited nodes keep their identities across yields.
			for child in children.into_iter().rev() {
				self.discovery_stack.push(child);
			}

			if let Some(budget) = self.config.discovery_budget_ms {
				if self.clock.now().saturating_sub(start) >= budget && !self.discovery_stack.is_empty() {
					trace!(pending = self.discovery_stack.len(), "Discovery budget spent; yielding.");
					return Ok(false);
				}
			}
		}

		self.phase = Phase::Steady;
		for batch in core::mem::take(&mut self.queued) {
			self.apply_steady(&batch, sink)?;
		}
		Ok(true)
	}

	fn discover_node(&mut self, node: &D::Node, sink: &mut dyn EventSink) -> Result<(), DomError> {
		let parent = self
			.dom
			.parent(node)
			.and_then(|parent| self.shadow.identity_of(&parent))
			.unwrap_or(NodeId::NONE);
		let id = self.shadow.insert(&self.dom, &self.classifier, node, parent, NodeId::NONE);
		self.consider_bindings(node, id);
		self.emit(sink, Action::Insert, id, Source::Discover, None, self.discovery_time)
	}

	/// Applies one delivered mutation batch.
	///
	/// All events derived from it share one freshly incremented sequence
	/// number and come out in the fixed order insert, move, update, remove.
	/// Batches are queued during discovery and dropped after degrade or
	/// teardown.
	#[instrument(skip(self, records, sink), fields(records = records.len()))]
	pub fn apply_mutations(&mut self, records: Vec<MutationRecord<D::Node>>, sink: &mut dyn EventSink) -> Result<(), DomError> {
		match self.phase {
			Phase::Steady => self.apply_steady(&records, sink),
			Phase::Discovering => {
				self.queued.push(records);
				Ok(())
			}
			Phase::Idle | Phase::Degraded | Phase::TornDown => {
				trace!(phase = ?self.phase, "Dropping a mutation batch.");
				Ok(())
			}
		}
	}

	fn apply_steady(&mut self, records: &[MutationRecord<D::Node>], sink: &mut dyn EventSink) -> Result<(), DomError> {
		self.mutation_sequence += 1;
		let sequence = self.mutation_sequence;
		let span = trace_span!("mutation_batch", sequence, records = records.len());
		let _enter = span.enter();

		let summary = self.shadow.apply_batch(&self.dom, &self.classifier, records);
		let time = self.clock.now();

		// Per-batch markers and held subtrees must be cleared even when a
		// snapshot fails mid-emission: leftover state would stamp this batch's
		// remainder with the next sequence number and stale finalized flags
		// would skip later legitimate records.
		let result = self.emit_summary(&summary, sequence, time, sink);
		self.shadow.finish_batch();

		if self.config.validate {
			self.check_consistency(sink);
		}
		result
	}

	fn emit_summary(&mut self, summary: &MutationSummary, sequence: u32, time: u64, sink: &mut dyn EventSink) -> Result<(), DomError> {
		for &id in &summary.inserted {
			if let Some(real) = self.shadow.real_node(id).cloned() {
				self.consider_bindings(&real, id);
			}
			self.emit(sink, Action::Insert, id, Source::Mutation, Some(sequence), time)?;
		}
		for &id in &summary.moved {
			self.emit(sink, Action::Move, id, Source::Mutation, Some(sequence), time)?;
		}
		for &id in &summary.updated {
			self.emit(sink, Action::Update, id, Source::Mutation, Some(sequence), time)?;
		}
		for &id in &summary.removed {
			self.emit(sink, Action::Remove, id, Source::Mutation, Some(sequence), time)?;
			self.scroll_bound.remove(&id);
			self.input_bound.remove(&id);
			self.scroll_last.remove(&id);
		}
		Ok(())
	}

	/// One mismatch is retained and tolerated; a second consecutive one stops
	/// further mutation processing and emits a single diagnostic carrying both
	/// snapshots plus the last known-consistent one.
	fn check_consistency(&mut self, sink: &mut dyn EventSink) {
		let report = self.shadow.index_snapshot(&self.dom);
		if report.is_consistent() {
			self.last_consistent = Some(report);
			self.strike = None;
		} else if let Some(first) = self.strike.take() {
			warn!("Second consecutive mirror inconsistency; degrading the session.");
			self.phase = Phase::Degraded;
			sink.diagnostic(DiagnosticEvent {
				first: Some(first),
				second: report,
				last_consistent: self.last_consistent.clone(),
				last_event: self.last_event.clone(),
			});
		} else {
			warn!("Transient mirror inconsistency; tolerating one occurrence.");
			self.strike = Some(report);
		}
	}

	fn emit(&mut self, sink: &mut dyn EventSink, action: Action, id: NodeId, source: Source, mutation_sequence: Option<u32>, time: u64) -> Result<(), DomError> {
		let Some(real) = self.shadow.real_node(id).cloned() else {
			warn!(id = id.get(), "Cannot emit for a missing mirror node.");
			return Ok(());
		};
		let (parent, previous, next) = if action == Action::Remove {
			(NodeId::NONE, NodeId::NONE, NodeId::NONE)
		} else {
			self.shadow.position(id).unwrap_or((NodeId::NONE, NodeId::NONE, NodeId::NONE))
		};
		let state = self.classifier.snapshot(&self.dom, &real, self.shadow.is_ignored(id))?;
		let event = LayoutEvent {
			id,
			source,
			action,
			parent,
			previous,
			next,
			mutation_sequence,
			time,
			state,
		};
		sink.layout(event.clone());
		self.last_event = Some(event);
		Ok(())
	}

	// -- Lazy observers --

	fn consider_bindings(&mut self, node: &D::Node, id: NodeId) {
		if let Some((x, y)) = self.dom.scroll_offsets(node) {
			if self.scroll_bound.insert(id) {
				self.scroll_last.insert(id, (f64::from(x), f64::from(y)));
				self.binding_requests.push(BindingRequest { node: node.clone(), kind: BindingKind::Scroll });
			}
		}
		if self.dom.accepts_input(node) && self.input_bound.insert(id) {
			self.binding_requests.push(BindingRequest { node: node.clone(), kind: BindingKind::Input });
		}
	}

	/// Listener bind requests accumulated since the last call.
	pub fn take_binding_requests(&mut self) -> Vec<BindingRequest<D::Node>> {
		core::mem::take(&mut self.binding_requests)
	}

	/// Scroll notification from a host-bound listener. Suppressed while the
	/// offset stays within the configured distance of the last recorded one,
	/// to bound event volume.
	pub fn note_scroll(&mut self, node: &D::Node, sink: &mut dyn EventSink) -> Result<(), DomError> {
		if self.phase != Phase::Steady {
			return Ok(());
		}
		let Some(id) = self.shadow.identity_of(node) else { return Ok(()) };
		let Some((x, y)) = self.dom.scroll_offsets(node) else { return Ok(()) };
		let (x, y) = (f64::from(x), f64::from(y));
		let (last_x, last_y) = self.scroll_last.get(&id).copied().unwrap_or((0.0, 0.0));
		if ((x - last_x).powi(2) + (y - last_y).powi(2)).sqrt() < self.config.scroll_threshold_px {
			return Ok(());
		}
		self.scroll_last.insert(id, (x, y));
		let now = self.clock.now();
		self.emit(sink, Action::Update, id, Source::Scroll, None, now)
	}

	/// Input notification from a host-bound listener. The emitted snapshot
	/// masks the value through the regular attribute policy.
	pub fn note_input(&mut self, node: &D::Node, sink: &mut dyn EventSink) -> Result<(), DomError> {
		if self.phase != Phase::Steady {
			return Ok(());
		}
		let Some(id) = self.shadow.identity_of(node) else { return Ok(()) };
		let now = self.clock.now();
		self.emit(sink, Action::Update, id, Source::Input, None, now)
	}

	// -- Stylesheet shim --

	/// Host hook for programmatic stylesheet edits, which mutate no document
	/// node. Debounced; [`tick`](Self::tick) flushes due entries as a
	/// synthesized content-change batch for the owning style element.
	pub fn style_rules_changed(&mut self, node: &D::Node) {
		let deadline = self.clock.now() + self.config.style_debounce_ms;
		if let Some(entry) = self.style_pending.iter_mut().find(|(pending, _)| pending == node) {
			entry.1 = deadline;
		} else {
			self.style_pending.push((node.clone(), deadline));
		}
	}

	/// Flushes debounced stylesheet notifications whose interval has elapsed.
	pub fn tick(&mut self, sink: &mut dyn EventSink) -> Result<(), DomError> {
		let now = self.clock.now();
		let mut due = Vec::new();
		self.style_pending.retain(|(node, deadline)| {
			if *deadline <= now {
				due.push(node.clone());
				false
			} else {
				true
			}
		});
		if due.is_empty() {
			return Ok(());
		}
		let records = due.into_iter().map(|target| MutationRecord::CharacterData { target }).collect();
		self.apply_mutations(records, sink)
	}

	// -- Teardown --

	/// Returns to `Idle` with a fresh shadow tree and identity table. The next
	/// `activate` starts a clean session; nothing from this one can leak into
	/// it.
	#[instrument(skip(self))]
	pub fn reset(&mut self) {
		self.clear_session();
		self.phase = Phase::Idle;
	}

	/// Ends the session for good, dropping all pending work. Safe to call
	/// mid-discovery.
	#[instrument(skip(self))]
	pub fn teardown(&mut self) {
		self.clear_session();
		self.phase = Phase::TornDown;
	}

	fn clear_session(&mut self) {
		self.shadow = ShadowTree::new();
		self.mutation_sequence = 0;
		self.discovery_stack.clear();
		self.discovery_time = 0;
		self.queued.clear();
		self.strike = None;
		self.last_consistent = None;
		self.last_event = None;
		self.binding_requests.clear();
		self.scroll_bound.clear();
		self.input_bound.clear();
		self.scroll_last.clear();
		self.style_pending.clear();
	}
}
