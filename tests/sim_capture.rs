use dom_mirror::dom::NodeKind;
use dom_mirror::sim::{SimClock, SimDom};
use dom_mirror::{Action, BindingKind, LayoutState, MirrorConfig, Phase, Reconciler, RecordedEvents, Source};

#[test]
fn text_and_sensitive_attributes_are_masked_by_default() {
	let (dom, _clock, mut reconciler, mut events) = steady_session(MirrorConfig::default());

	let input = dom.create_element("INPUT");
	dom.set_attribute(input, "type", "text");
	dom.set_attribute(input, "value", "hunter2");
	dom.append(dom.body(), input);
	let span = dom.create_element("SPAN");
	dom.append(span, dom.create_text("Card 1234"));
	dom.append(dom.body(), span);
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();

	let LayoutState::Element { attributes, .. } = &events.layouts[0].state else {
		panic!("expected an element state");
	};
	assert!(attributes.contains(&("type".to_owned(), "text".to_owned())));
	assert!(attributes.contains(&("value".to_owned(), "*******".to_owned())));
	assert!(matches!(&events.layouts[2].state, LayoutState::Text { content } if content == "**** ****"));
}

#[test]
fn unmask_marker_lifts_masking_for_the_subtree() {
	let (dom, _clock, mut reconciler, mut events) = steady_session(MirrorConfig::default());

	let div = dom.create_element("DIV");
	dom.set_unmask(div);
	dom.set_attribute(div, "title", "visible tooltip");
	dom.append(div, dom.create_text("hello"));
	dom.append(dom.body(), div);
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();

	assert!(matches!(&events.layouts[0].state, LayoutState::Element { attributes, .. }
		if attributes.contains(&("title".to_owned(), "visible tooltip".to_owned()))));
	assert!(matches!(&events.layouts[1].state, LayoutState::Text { content } if content == "hello"));
}

#[test]
fn capture_text_keeps_content_verbatim() {
	let config = MirrorConfig {
		capture_text: true,
		..MirrorConfig::default()
	};
	let (dom, _clock, mut reconciler, mut events) = steady_session(config);

	let span = dom.create_element("SPAN");
	dom.append(span, dom.create_text("hello"));
	dom.append(dom.body(), span);
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();

	assert!(matches!(&events.layouts[1].state, LayoutState::Text { content } if content == "hello"));
}

#[test]
fn image_sources_are_dropped_unless_captured() {
	let (dom, _clock, mut reconciler, mut events) = steady_session(MirrorConfig::default());

	let img = dom.create_element("IMG");
	dom.set_attribute(img, "src", "https://example.com/portrait.png");
	dom.set_attribute(img, "alt", "portrait");
	dom.append(dom.body(), img);
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();

	let LayoutState::Element { attributes, .. } = &events.layouts[0].state else {
		panic!("expected an element state");
	};
	assert!(!attributes.iter().any(|(name, _)| name == "src"));
	assert!(attributes.contains(&("alt".to_owned(), "********".to_owned())));

	let config = MirrorConfig {
		capture_images: true,
		..MirrorConfig::default()
	};
	let (dom, _clock, mut reconciler, mut events) = steady_session(config);
	let img = dom.create_element("IMG");
	dom.set_attribute(img, "src", "https://example.com/portrait.png");
	dom.append(dom.body(), img);
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();
	assert!(matches!(&events.layouts[0].state, LayoutState::Element { attributes, .. }
		if attributes.iter().any(|(name, _)| name == "src")));
}

#[test]
fn script_subtrees_are_tracked_but_opaque() {
	let (dom, _clock, mut reconciler, mut events) = steady_session(MirrorConfig::default());

	let script = dom.create_element("SCRIPT");
	dom.append(script, dom.create_text("var secret = 1;"));
	dom.append(dom.body(), script);
	dom.append(dom.body(), dom.create_comment("todo"));
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();

	assert_eq!(events.layouts.len(), 3);
	assert!(matches!(&events.layouts[0].state, LayoutState::Ignored { kind: NodeKind::Element, tag: Some(tag) } if tag == "SCRIPT"));
	assert!(matches!(&events.layouts[1].state, LayoutState::Ignored { kind: NodeKind::Text, tag: None }));
	assert!(matches!(&events.layouts[2].state, LayoutState::Ignored { kind: NodeKind::Comment, tag: None }));
	assert_eq!(reconciler.phase(), Phase::Steady);
}

#[test]
fn style_rules_are_captured_structurally() {
	let (dom, _clock, mut reconciler, mut events) = steady_session(MirrorConfig::default());

	let style = dom.create_element("STYLE");
	dom.set_rules(style, &["body { color: red; }"]);
	dom.append(style, dom.create_text("body { color: red; }"));
	dom.append(dom.head(), style);
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();

	assert!(matches!(&events.layouts[0].state, LayoutState::Element { rules: Some(rules), .. }
		if rules == &["body { color: red; }".to_owned()]));
	// The source text is redundant next to the structural rules.
	assert!(matches!(&events.layouts[1].state, LayoutState::Ignored { kind: NodeKind::Text, .. }));
}

#[test]
fn cross_origin_rules_are_omitted_not_fatal() {
	let (dom, _clock, mut reconciler, mut events) = steady_session(MirrorConfig::default());

	let style = dom.create_element("STYLE");
	dom.set_cross_origin(style);
	dom.append(dom.head(), style);
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();

	assert!(matches!(&events.layouts[0].state, LayoutState::Element { rules: None, .. }));
	assert_eq!(reconciler.phase(), Phase::Steady);
}

#[test]
fn rects_are_document_absolute_and_rounded() {
	let (dom, _clock, mut reconciler, mut events) = steady_session(MirrorConfig::default());

	dom.set_viewport_scroll(0.5, 0.0);
	let div = dom.create_element("DIV");
	dom.set_rect(div, 10.7, 20.2, 99.5, 10.4);
	let broken = dom.create_element("DIV");
	dom.break_geometry(broken);
	dom.append(dom.body(), div);
	dom.append(dom.body(), broken);
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();

	let LayoutState::Element { rect: Some(rect), .. } = &events.layouts[0].state else {
		panic!("expected a rect");
	};
	assert_eq!((rect.x, rect.y, rect.width, rect.height), (11, 20, 100, 10));
	assert!(matches!(&events.layouts[1].state, LayoutState::Element { rect: None, .. }));
}

#[test]
fn scroll_updates_respect_the_threshold() {
	let (dom, clock, mut reconciler, mut events) = steady_session(MirrorConfig::default());

	let div = dom.create_element("DIV");
	dom.set_scroll(div, 0, 0);
	dom.append(dom.body(), div);
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();
	let div_id = events.layouts[0].id;

	let requests = reconciler.take_binding_requests();
	assert_eq!(requests.len(), 1);
	assert_eq!(requests[0].kind, BindingKind::Scroll);
	assert!(reconciler.take_binding_requests().is_empty());

	// Below the 16px default threshold: suppressed.
	dom.set_scroll(div, 5, 5);
	reconciler.note_scroll(&div, &mut events).unwrap();
	assert_eq!(events.layouts.len(), 1);

	dom.set_scroll(div, 20, 0);
	clock.set(70);
	reconciler.note_scroll(&div, &mut events).unwrap();
	let event = events.layouts.last().unwrap();
	assert_eq!(event.id, div_id);
	assert_eq!(event.action, Action::Update);
	assert_eq!(event.source, Source::Scroll);
	assert_eq!(event.mutation_sequence, None);
	assert_eq!(event.time, 70);
	assert!(matches!(&event.state, LayoutState::Element { scroll: Some((20, 0)), .. }));
}

#[test]
fn input_notifications_reuse_the_masking_policy() {
	let (dom, _clock, mut reconciler, mut events) = steady_session(MirrorConfig::default());

	let input = dom.create_element("INPUT");
	dom.set_input(input, true);
	dom.append(dom.body(), input);
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();

	let requests = reconciler.take_binding_requests();
	assert_eq!(requests.len(), 1);
	assert_eq!(requests[0].kind, BindingKind::Input);

	dom.set_attribute(input, "value", "typed");
	let _ = dom.take_records();
	reconciler.note_input(&input, &mut events).unwrap();

	let event = events.layouts.last().unwrap();
	assert_eq!(event.action, Action::Update);
	assert_eq!(event.source, Source::Input);
	assert!(matches!(&event.state, LayoutState::Element { attributes, .. }
		if attributes.contains(&("value".to_owned(), "*****".to_owned()))));
}

#[test]
fn stylesheet_edits_are_debounced() {
	let (dom, clock, mut reconciler, mut events) = steady_session(MirrorConfig::default());

	let style = dom.create_element("STYLE");
	dom.set_rules(style, &["body { color: red; }"]);
	dom.append(dom.head(), style);
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();
	let style_id = events.layouts[0].id;
	events.layouts.clear();

	dom.set_rules(style, &["body { color: blue; }"]);
	reconciler.style_rules_changed(&style);
	reconciler.tick(&mut events).unwrap();
	assert!(events.layouts.is_empty());

	// A second edit inside the window restarts it.
	clock.advance(30);
	reconciler.style_rules_changed(&style);
	clock.advance(30);
	reconciler.tick(&mut events).unwrap();
	assert!(events.layouts.is_empty());

	clock.advance(20);
	reconciler.tick(&mut events).unwrap();
	assert_eq!(events.layouts.len(), 1);
	let event = &events.layouts[0];
	assert_eq!(event.id, style_id);
	assert_eq!(event.action, Action::Update);
	assert_eq!(event.source, Source::Mutation);
	assert!(event.mutation_sequence.is_some());
	assert!(matches!(&event.state, LayoutState::Element { rules: Some(rules), .. }
		if rules == &["body { color: blue; }".to_owned()]));

	// Flushed entries are gone.
	reconciler.tick(&mut events).unwrap();
	assert_eq!(events.layouts.len(), 1);
}

#[test]
fn reset_starts_a_clean_session() {
	let (dom, _clock, mut reconciler, mut events) = steady_session(MirrorConfig::default());

	dom.append(dom.body(), dom.create_element("DIV"));
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();

	reconciler.reset();
	assert_eq!(reconciler.phase(), Phase::Idle);
	assert_eq!(reconciler.mutation_sequence(), 0);

	let mut fresh = RecordedEvents::default();
	assert!(reconciler.activate(&mut fresh).unwrap());
	assert_eq!(fresh.layouts[0].id.get(), 1);
	assert_eq!(fresh.layouts.len(), 6);
}

#[test]
fn teardown_drops_all_pending_work() {
	let (dom, _clock, mut reconciler, mut events) = steady_session(MirrorConfig::default());

	reconciler.teardown();
	assert_eq!(reconciler.phase(), Phase::TornDown);

	dom.append(dom.body(), dom.create_element("DIV"));
	reconciler.apply_mutations(dom.take_records(), &mut events).unwrap();
	assert!(events.layouts.is_empty());

	let mut sink = RecordedEvents::default();
	assert!(reconciler.activate(&mut sink).unwrap());
	assert!(sink.layouts.is_empty());
}

fn steady_session(config: MirrorConfig) -> (SimDom, SimClock, Reconciler<SimDom>, RecordedEvents) {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let dom = SimDom::new();
	let clock = SimClock::new();
	let mut reconciler = Reconciler::new(dom.clone(), config, Box::new(clock.clone()));
	let mut events = RecordedEvents::default();
	assert!(reconciler.activate(&mut events).unwrap());
	events.layouts.clear();
	(dom, clock, reconciler, events)
}
