use std::cell::Cell;
use std::rc::Rc;

use dom_mirror::dom::NodeKind;
use dom_mirror::sim::{SimClock, SimDom};
use dom_mirror::{Action, Clock, LayoutState, MirrorConfig, Phase, Reconciler, RecordedEvents, Source};

#[test]
fn full_walk_in_document_order() {
	init_tracing();
	let dom = SimDom::new();
	let clock = SimClock::new();
	clock.set(42);
	let mut reconciler = Reconciler::new(dom.clone(), MirrorConfig::default(), Box::new(clock));
	let mut events = RecordedEvents::default();

	assert!(reconciler.activate(&mut events).unwrap());
	assert_eq!(reconciler.phase(), Phase::Steady);

	assert_eq!(events.layouts.len(), 5);
	for event in &events.layouts {
		assert_eq!(event.action, Action::Insert);
		assert_eq!(event.source, Source::Discover);
		assert_eq!(event.mutation_sequence, None);
		assert_eq!(event.time, 42);
	}

	let ids: Vec<u32> = events.layouts.iter().map(|event| event.id.get()).collect();
	assert_eq!(ids, vec![1, 2, 3, 4, 5]);

	assert!(matches!(&events.layouts[0].state, LayoutState::Ignored { kind: NodeKind::Document, tag: None }));
	assert!(matches!(&events.layouts[1].state, LayoutState::Doctype { name, .. } if name == "html"));
	assert!(matches!(&events.layouts[2].state, LayoutState::Element { tag, .. } if tag == "HTML"));
	assert!(matches!(&events.layouts[3].state, LayoutState::Element { tag, .. } if tag == "HEAD"));
	assert!(matches!(&events.layouts[4].state, LayoutState::Element { tag, .. } if tag == "BODY"));

	// HEAD and BODY hang off HTML; BODY follows HEAD.
	assert_eq!(events.layouts[3].parent, events.layouts[2].id);
	assert_eq!(events.layouts[4].parent, events.layouts[2].id);
	assert_eq!(events.layouts[4].previous, events.layouts[3].id);
	assert!(events.layouts[4].next.is_none());
}

#[test]
fn budgeted_walk_resumes_with_stable_identities() {
	init_tracing();
	let dom = SimDom::new();
	let clock = SteppingClock::default();
	let config = MirrorConfig {
		discovery_budget_ms: Some(5),
		..MirrorConfig::default()
	};
	let mut reconciler = Reconciler::new(dom, config, Box::new(clock));
	let mut events = RecordedEvents::default();

	// Every clock read advances time, so the walk has to yield at least once.
	let mut done = reconciler.activate(&mut events).unwrap();
	assert!(!done);
	let mut steps = 1;
	while !done {
		done = reconciler.discover_step(&mut events).unwrap();
		steps += 1;
		assert!(steps < 100, "discovery never completed");
	}
	assert!(steps >= 2);
	assert_eq!(reconciler.phase(), Phase::Steady);

	let ids: Vec<u32> = events.layouts.iter().map(|event| event.id.get()).collect();
	assert_eq!(ids, vec![1, 2, 3, 4, 5]);
	let time = events.layouts[0].time;
	assert!(events.layouts.iter().all(|event| event.time == time));
}

#[test]
fn batches_delivered_during_discovery_apply_after_the_walk() {
	init_tracing();
	let dom = SimDom::new();
	let clock = SteppingClock::default();
	let config = MirrorConfig {
		discovery_budget_ms: Some(5),
		..MirrorConfig::default()
	};
	let mut reconciler = Reconciler::new(dom.clone(), config, Box::new(clock));
	let mut events = RecordedEvents::default();

	assert!(!reconciler.activate(&mut events).unwrap());

	// The document changes while the walk is still underway.
	dom.set_attribute(dom.body(), "class", "loading");
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();
	assert_eq!(reconciler.mutation_sequence(), 0);

	while !reconciler.discover_step(&mut events).unwrap() {}

	assert_eq!(reconciler.phase(), Phase::Steady);
	assert_eq!(reconciler.mutation_sequence(), 1);
	let last = events.layouts.last().unwrap();
	assert_eq!(last.action, Action::Update);
	assert_eq!(last.source, Source::Mutation);
	assert_eq!(last.mutation_sequence, Some(1));
	assert!(matches!(&last.state, LayoutState::Element { tag, attributes, .. }
		if tag == "BODY" && attributes.contains(&("class".to_owned(), "loading".to_owned()))));
}

#[test]
fn activate_outside_idle_is_a_noop() {
	init_tracing();
	let dom = SimDom::new();
	let mut reconciler = Reconciler::new(dom, MirrorConfig::default(), Box::new(SimClock::new()));
	let mut events = RecordedEvents::default();

	assert!(reconciler.activate(&mut events).unwrap());
	assert_eq!(events.layouts.len(), 5);
	assert!(reconciler.activate(&mut events).unwrap());
	assert_eq!(events.layouts.len(), 5);
}

/// Advances by 3ms on every read, making discovery budgets observable.
#[derive(Clone, Debug, Default)]
struct SteppingClock(Rc<Cell<u64>>);

impl Clock for SteppingClock {
	fn now(&self) -> u64 {
		let now = self.0.get();
		self.0.set(now + 3);
		now
	}
}

fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
