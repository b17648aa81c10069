use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use flowcore::geometry::{Bounds, Point, Rect, Size};
use flowcore::model::{
    Edge, EdgeLabel, EdgeUpdate, Node, NodeUpdate, Port, PortKind, PortSide, PositionOnEdge,
    RoutingMode,
};
use flowcore::pipeline::{Middleware, Next, PipelineContext};
use flowcore::{
    DomainEvent, DomainEventKind, FlowEngine, FlowError, FlowStateUpdate, LayoutResult,
};

fn sized_node(id: &str, x: f32, y: f32, width: f32, height: f32) -> Node {
    let mut node = Node::new(id, Point::new(x, y));
    node.size = Some(Size::new(width, height));
    node
}

/// Two measured nodes side by side with one auto edge between them.
fn two_node_engine() -> FlowEngine {
    let mut engine = FlowEngine::default();
    engine
        .init(
            vec![
                sized_node("1", 0.0, 0.0, 100.0, 50.0),
                sized_node("2", 300.0, 0.0, 100.0, 50.0),
            ],
            vec![Edge::new("e1", "1", "2")],
            None,
        )
        .expect("init failed");
    engine
}

#[test]
fn auto_edge_routes_between_facing_sides_after_init() {
    let engine = two_node_engine();
    let edge = engine.edge("e1").unwrap();
    assert_eq!(edge.points.first(), Some(&Point::new(100.0, 25.0)));
    assert_eq!(edge.points.last(), Some(&Point::new(300.0, 25.0)));
    assert_eq!(edge.source_position, Some(Point::new(100.0, 25.0)));
    assert_eq!(edge.target_position, Some(Point::new(300.0, 25.0)));
}

#[test]
fn unrotated_bounds_are_the_rect_expanded_by_protruding_ports() {
    let mut engine = FlowEngine::default();
    let mut node = sized_node("1", 10.0, 20.0, 100.0, 50.0);
    node.measured_ports = Some(vec![Port {
        id: "out".into(),
        node_id: "1".into(),
        side: PortSide::Right,
        position: Point::new(95.0, 20.0),
        size: Size::new(20.0, 10.0),
        kind: PortKind::Source,
    }]);
    engine.init(vec![node], vec![], None).unwrap();

    let bounds = engine.node("1").unwrap().measured_bounds.unwrap();
    assert_eq!(
        bounds,
        Bounds {
            min_x: 10.0,
            min_y: 20.0,
            max_x: 125.0,
            max_y: 70.0,
        }
    );
}

#[test]
fn full_turn_bounds_match_the_unrotated_rect() {
    let mut engine = FlowEngine::default();
    let mut node = sized_node("1", 0.0, 0.0, 80.0, 40.0);
    node.angle = 360.0;
    engine.init(vec![node], vec![], None).unwrap();
    let bounds = engine.node("1").unwrap().measured_bounds.unwrap();
    assert_eq!(bounds, Bounds::from_rect(Rect::new(0.0, 0.0, 80.0, 40.0)));
}

#[test]
fn group_bounds_cover_their_children() {
    let mut engine = FlowEngine::default();
    let mut group = sized_node("g", 0.0, 0.0, 10.0, 10.0);
    group.group = true;
    let mut child_a = sized_node("a", -40.0, 0.0, 30.0, 30.0);
    child_a.group_id = Some("g".into());
    let mut child_b = sized_node("b", 60.0, 50.0, 30.0, 30.0);
    child_b.group_id = Some("g".into());
    engine.init(vec![group, child_a, child_b], vec![], None).unwrap();

    let bounds = engine.node("g").unwrap().measured_bounds.unwrap();
    assert_eq!(bounds.min_x, -40.0);
    assert_eq!(bounds.max_x, 90.0);
    assert_eq!(bounds.max_y, 80.0);

    // Moving a child re-aggregates the group.
    engine.move_nodes(&["b"], Point::new(100.0, 0.0)).unwrap();
    let bounds = engine.node("g").unwrap().measured_bounds.unwrap();
    assert_eq!(bounds.max_x, 190.0);
}

#[test]
fn selection_changed_ignores_ordering() {
    let mut engine = two_node_engine();
    let fired = Rc::new(RefCell::new(0));
    let sink = fired.clone();
    engine.on_event(DomainEventKind::SelectionChanged, move |_| {
        *sink.borrow_mut() += 1;
    });

    engine.change_selection(&["1", "2"], &[]).unwrap();
    assert_eq!(*fired.borrow(), 1);
    // Same set, different order: no event.
    engine.change_selection(&["2", "1"], &[]).unwrap();
    assert_eq!(*fired.borrow(), 1);
    engine.change_selection(&["2"], &[]).unwrap();
    assert_eq!(*fired.borrow(), 2);
}

#[test]
fn selection_changed_carries_added_and_removed_ids() {
    let mut engine = two_node_engine();
    let last = Rc::new(RefCell::new(None));
    let sink = last.clone();
    engine.on_event(DomainEventKind::SelectionChanged, move |event| {
        if let DomainEvent::SelectionChanged(event) = event {
            *sink.borrow_mut() = Some(event.clone());
        }
    });

    engine.change_selection(&["1"], &["e1"]).unwrap();
    engine.change_selection(&["2"], &["e1"]).unwrap();
    let event = last.borrow().clone().unwrap();
    assert_eq!(event.added_nodes, vec!["2".to_string()]);
    assert_eq!(event.removed_nodes, vec!["1".to_string()]);
    assert!(event.added_edges.is_empty());
    assert_eq!(event.selected_edges, vec!["e1".to_string()]);
}

#[test]
fn edge_drawn_fires_only_for_edges_new_after_finish_linking() {
    let mut engine = two_node_engine();
    let drawn = Rc::new(RefCell::new(Vec::new()));
    let sink = drawn.clone();
    engine.on_event(DomainEventKind::EdgeDrawn, move |event| {
        if let DomainEvent::EdgeDrawn(event) = event {
            sink.borrow_mut()
                .push((event.edge.id.clone(), event.source.id.clone(), event.target.id.clone()));
        }
    });

    engine
        .start_linking("1", None, Point::new(150.0, 25.0))
        .unwrap();
    // The temporary edge renders but never persists.
    assert!(engine.state().edges.iter().any(|edge| edge.temporary));
    assert!(engine.persistable_state().edges.iter().all(|e| !e.temporary));

    engine.finish_linking("2", None).unwrap();
    assert_eq!(drawn.borrow().len(), 1);
    let (edge_id, source, target) = drawn.borrow()[0].clone();
    assert_eq!(source, "1");
    assert_eq!(target, "2");
    // Pre-existing e1 did not fire; only the newly drawn edge did.
    assert_ne!(edge_id, "e1");
    assert!(engine.state().edges.iter().all(|edge| !edge.temporary));
}

#[test]
fn temporary_edge_follows_the_pointer_and_stacks_on_top() {
    let mut engine = two_node_engine();
    engine
        .start_linking("1", None, Point::new(150.0, 80.0))
        .unwrap();
    let temp = engine
        .state()
        .edges
        .iter()
        .find(|edge| edge.temporary)
        .unwrap();
    assert_eq!(temp.z_order, Some(10_000));
    assert_eq!(temp.points.last(), Some(&Point::new(150.0, 80.0)));

    engine.update_linking(Point::new(180.0, 90.0), None).unwrap();
    let temp = engine
        .state()
        .edges
        .iter()
        .find(|edge| edge.temporary)
        .unwrap();
    assert_eq!(temp.points.last(), Some(&Point::new(180.0, 90.0)));

    engine.cancel_linking().unwrap();
    assert!(engine.state().edges.iter().all(|edge| !edge.temporary));
    assert!(matches!(
        engine.cancel_linking(),
        Err(FlowError::NoActiveLinking)
    ));
}

#[test]
fn diagram_init_fires_once_after_the_last_measurement() {
    let mut engine = FlowEngine::default();
    let fired = Rc::new(RefCell::new(0));
    let sink = fired.clone();
    engine.on_event(DomainEventKind::DiagramInit, move |_| {
        *sink.borrow_mut() += 1;
    });

    // Nodes arrive unmeasured; one edge carries an unmeasured label.
    let mut edge = Edge::new("e1", "1", "2");
    edge.measured_labels = vec![EdgeLabel::new("l1", PositionOnEdge::Fraction(0.5))];
    engine
        .init(
            vec![
                Node::new("1", Point::new(0.0, 0.0)),
                Node::new("2", Point::new(300.0, 0.0)),
            ],
            vec![edge],
            None,
        )
        .unwrap();
    assert_eq!(*fired.borrow(), 0);

    let mut measure = NodeUpdate::new("1");
    measure.size = Some(Size::new(100.0, 50.0));
    measure.measured_ports = Some(vec![]);
    engine.update_node(measure).unwrap();
    assert_eq!(*fired.borrow(), 0);

    let mut measure = NodeUpdate::new("2");
    measure.size = Some(Size::new(100.0, 50.0));
    measure.measured_ports = Some(vec![]);
    engine.update_node(measure).unwrap();
    // The label is still unmeasured.
    assert_eq!(*fired.borrow(), 0);

    let mut label = EdgeLabel::new("l1", PositionOnEdge::Fraction(0.5));
    label.size = Some(Size::new(40.0, 16.0));
    let mut patch = EdgeUpdate::new("e1");
    patch.measured_labels = Some(vec![label]);
    engine.update_edge(patch).unwrap();
    assert_eq!(*fired.borrow(), 1);

    // Further updates never re-fire.
    engine.move_nodes(&["1"], Point::new(5.0, 5.0)).unwrap();
    assert_eq!(*fired.borrow(), 1);
}

#[test]
fn diagram_init_fires_immediately_for_a_fully_measured_init() {
    let mut engine = FlowEngine::default();
    let fired = Rc::new(RefCell::new(0));
    let sink = fired.clone();
    engine.on_event(DomainEventKind::DiagramInit, move |_| {
        *sink.borrow_mut() += 1;
    });
    let mut node = sized_node("1", 0.0, 0.0, 10.0, 10.0);
    node.measured_ports = Some(vec![]);
    engine.init(vec![node], vec![], None).unwrap();
    assert_eq!(*fired.borrow(), 1);
}

#[test]
fn deleting_an_unmeasured_node_unblocks_diagram_init() {
    let mut engine = FlowEngine::default();
    let fired = Rc::new(RefCell::new(0));
    let sink = fired.clone();
    engine.on_event(DomainEventKind::DiagramInit, move |_| {
        *sink.borrow_mut() += 1;
    });
    let mut measured = sized_node("1", 0.0, 0.0, 10.0, 10.0);
    measured.measured_ports = Some(vec![]);
    engine
        .init(
            vec![measured, Node::new("never-rendered", Point::new(50.0, 0.0))],
            vec![],
            None,
        )
        .unwrap();
    assert_eq!(*fired.borrow(), 0);

    engine.change_selection(&["never-rendered"], &[]).unwrap();
    engine.delete_selection().unwrap();
    assert_eq!(*fired.borrow(), 1);
}

#[test]
fn viewport_changed_fires_on_zoom_with_previous_values() {
    let mut engine = two_node_engine();
    let last = Rc::new(RefCell::new(None));
    let sink = last.clone();
    engine.on_event(DomainEventKind::ViewportChanged, move |event| {
        if let DomainEvent::ViewportChanged(event) = event {
            *sink.borrow_mut() = Some((event.previous, event.viewport));
        }
    });
    engine.zoom(10.0, 20.0, 2.0).unwrap();
    let (previous, current) = last.borrow().unwrap();
    assert_eq!(previous.scale, 1.0);
    assert_eq!(current.scale, 2.0);
    assert_eq!(current.x, 10.0);

    // Same viewport again: no event.
    *last.borrow_mut() = None;
    engine.zoom(10.0, 20.0, 2.0).unwrap();
    assert!(last.borrow().is_none());
}

#[test]
fn manual_edges_keep_their_points_while_auto_edges_reroute() {
    let mut engine = FlowEngine::default();
    let mut manual = Edge::new("manual", "1", "2");
    manual.routing_mode = RoutingMode::Manual;
    manual.points = vec![Point::new(0.0, 0.0), Point::new(500.0, 500.0)];
    engine
        .init(
            vec![
                sized_node("1", 0.0, 0.0, 100.0, 50.0),
                sized_node("2", 300.0, 0.0, 100.0, 50.0),
            ],
            vec![Edge::new("auto", "1", "2"), manual],
            None,
        )
        .unwrap();

    let before_auto = engine.edge("auto").unwrap().points.clone();
    engine.move_nodes(&["2"], Point::new(0.0, 200.0)).unwrap();

    let auto = engine.edge("auto").unwrap();
    assert_ne!(auto.points, before_auto);

    let manual = engine.edge("manual").unwrap();
    assert_eq!(
        manual.points,
        vec![Point::new(0.0, 0.0), Point::new(500.0, 500.0)]
    );
    // Endpoint anchors still refresh in manual mode.
    assert_eq!(manual.source_position, Some(Point::new(100.0, 25.0)));
}

#[test]
fn label_positions_resolve_on_the_routed_path() {
    let mut engine = FlowEngine::default();
    let mut edge = Edge::new("e1", "1", "2");
    edge.measured_labels = vec![
        EdgeLabel::new("center", PositionOnEdge::Fraction(0.5)),
        EdgeLabel::new("near-end", PositionOnEdge::Pixels(-20.0)),
    ];
    engine
        .init(
            vec![
                sized_node("1", 0.0, 0.0, 100.0, 50.0),
                sized_node("2", 300.0, 0.0, 100.0, 50.0),
            ],
            vec![edge],
            None,
        )
        .unwrap();

    let edge = engine.edge("e1").unwrap();
    let center = edge.measured_labels[0].position.unwrap();
    assert_eq!(center, Point::new(200.0, 25.0));
    let near_end = edge.measured_labels[1].position.unwrap();
    assert_eq!(near_end, Point::new(280.0, 25.0));
}

#[test]
fn routing_skips_during_resize_and_settles_at_gesture_end() {
    let mut engine = two_node_engine();
    let before = engine.edge("e1").unwrap().points.clone();

    engine.start_resize("2").unwrap();
    engine
        .resize_node(Size::new(100.0, 150.0), None)
        .unwrap();
    // Mid-gesture: geometry changed but the edge is intentionally stale.
    assert_eq!(engine.edge("e1").unwrap().points, before);

    engine.end_resize().unwrap();
    let after = engine.edge("e1").unwrap().points.clone();
    assert_ne!(after, before);
    assert_eq!(after.last(), Some(&Point::new(300.0, 75.0)));
    assert!(matches!(engine.end_resize(), Err(FlowError::NoActiveResize)));
}

#[test]
fn unknown_routing_name_falls_back_to_the_default() {
    let mut engine = two_node_engine();
    let mut exotic = Edge::new("e2", "1", "2");
    exotic.routing = Some("definitely-not-registered".into());
    engine.add_edges(vec![exotic]).unwrap();

    let default_points = engine.edge("e1").unwrap().points.clone();
    let fallback_points = engine.edge("e2").unwrap().points.clone();
    assert_eq!(default_points, fallback_points);
}

#[test]
fn edges_wait_for_their_required_ports() {
    let mut engine = FlowEngine::default();
    let mut edge = Edge::new("e1", "1", "2");
    edge.source_port = Some("out".into());
    engine
        .init(
            vec![
                sized_node("1", 0.0, 0.0, 100.0, 50.0),
                sized_node("2", 300.0, 0.0, 100.0, 50.0),
            ],
            vec![edge],
            None,
        )
        .unwrap();
    // Port not measured yet: the edge is suppressed, not routed.
    assert!(engine.edge("e1").unwrap().points.is_empty());

    let mut measure = NodeUpdate::new("1");
    measure.measured_ports = Some(vec![Port {
        id: "out".into(),
        node_id: "1".into(),
        side: PortSide::Bottom,
        position: Point::new(40.0, 45.0),
        size: Size::new(20.0, 10.0),
        kind: PortKind::Source,
    }]);
    engine.update_node(measure).unwrap();

    let edge = engine.edge("e1").unwrap();
    assert_eq!(edge.points.first(), Some(&Point::new(50.0, 50.0)));
    assert_eq!(edge.source_position, Some(Point::new(50.0, 50.0)));
}

#[test]
fn deleting_nodes_cascades_to_their_edges() {
    let mut engine = two_node_engine();
    engine.change_selection(&["2"], &[]).unwrap();
    engine.delete_selection().unwrap();
    assert!(engine.node("2").is_none());
    assert!(engine.edge("e1").is_none());
    assert!(engine.node("1").is_some());
}

#[test]
fn z_order_boosts_selected_nodes_and_their_edges() {
    let mut engine = two_node_engine();
    assert_eq!(engine.node("1").unwrap().z_order, Some(0));
    assert_eq!(engine.node("2").unwrap().z_order, Some(1));
    assert_eq!(engine.edge("e1").unwrap().z_order, Some(1));

    engine.change_selection(&["1"], &[]).unwrap();
    assert_eq!(engine.node("1").unwrap().z_order, Some(1000));
    assert_eq!(engine.edge("e1").unwrap().z_order, Some(1000));
}

#[test]
fn group_children_stack_above_their_group() {
    let mut engine = FlowEngine::default();
    let mut child = sized_node("child", 10.0, 10.0, 20.0, 20.0);
    child.group_id = Some("g".into());
    let mut group = sized_node("g", 0.0, 0.0, 100.0, 100.0);
    group.group = true;
    // The child sits before the group in insertion order on purpose.
    engine.init(vec![child, group], vec![], None).unwrap();
    let child_z = engine.node("child").unwrap().z_order.unwrap();
    let group_z = engine.node("g").unwrap().z_order.unwrap();
    assert!(child_z > group_z);
}

#[test]
fn transactions_roll_back_to_savepoints() {
    let mut engine = two_node_engine();
    engine
        .transaction(|tx| {
            tx.move_nodes(&["1"], Point::new(10.0, 0.0))?;
            tx.savepoint("after-move");
            tx.add_nodes(vec![sized_node("3", 500.0, 0.0, 50.0, 50.0)])?;
            tx.move_nodes(&["2"], Point::new(-10.0, 0.0))?;
            tx.rollback_to("after-move")?;
            Ok(())
        })
        .unwrap();

    // The move before the savepoint survives; later steps are discarded.
    assert_eq!(engine.node("1").unwrap().position, Point::new(10.0, 0.0));
    assert!(engine.node("3").is_none());
    assert_eq!(engine.node("2").unwrap().position, Point::new(300.0, 0.0));
}

#[test]
fn failed_transactions_leave_no_partial_state() {
    let mut engine = two_node_engine();
    let fired = Rc::new(RefCell::new(0));
    let sink = fired.clone();
    engine.on_event(DomainEventKind::SelectionChanged, move |_| {
        *sink.borrow_mut() += 1;
    });

    let result = engine.transaction(|tx| {
        tx.change_selection(&["1"], &[])?;
        tx.add_nodes(vec![sized_node("3", 0.0, 0.0, 10.0, 10.0)])?;
        // Duplicate id: the step fails and the `?` aborts the transaction.
        tx.add_nodes(vec![sized_node("3", 0.0, 0.0, 10.0, 10.0)])?;
        Ok(())
    });
    assert!(matches!(result, Err(FlowError::DuplicateId { .. })));
    assert!(engine.node("3").is_none());
    assert!(!engine.node("1").unwrap().selected);
    // Events from the rolled-back transaction are dropped.
    assert_eq!(*fired.borrow(), 0);
}

#[test]
fn events_queue_until_the_transaction_commits() {
    let mut engine = two_node_engine();
    let fired = Rc::new(RefCell::new(0));
    let sink = fired.clone();
    engine.on_event(DomainEventKind::SelectionChanged, move |_| {
        *sink.borrow_mut() += 1;
    });
    engine
        .transaction(|tx| {
            tx.change_selection(&["1"], &[])?;
            assert_eq!(tx.state().selected_node_ids(), vec!["1"]);
            Ok(())
        })
        .unwrap();
    assert_eq!(*fired.borrow(), 1);
}

#[test]
fn custom_middlewares_run_after_builtins_and_win_conflicts() {
    struct PinNodeZ;
    impl Middleware for PinNodeZ {
        fn name(&self) -> &str {
            "pin-node-z"
        }
        fn execute(&self, ctx: &mut PipelineContext<'_>, next: Next<'_>) -> anyhow::Result<()> {
            let mut update = NodeUpdate::new("1");
            update.z_order = Some(-5);
            next.run(ctx, Some(FlowStateUpdate::update_nodes(vec![update])))
        }
    }

    let mut engine = FlowEngine::default();
    engine.register_middleware(Arc::new(PinNodeZ));
    engine
        .init(
            vec![sized_node("1", 0.0, 0.0, 10.0, 10.0)],
            vec![],
            None,
        )
        .unwrap();
    // The built-in z-index middleware assigned 0; the custom middleware
    // registered later wins.
    assert_eq!(engine.node("1").unwrap().z_order, Some(-5));
}

#[test]
fn a_failing_custom_middleware_aborts_the_whole_action() {
    struct Exploder;
    impl Middleware for Exploder {
        fn name(&self) -> &str {
            "exploder"
        }
        fn execute(&self, _ctx: &mut PipelineContext<'_>, _next: Next<'_>) -> anyhow::Result<()> {
            anyhow::bail!("middleware bug")
        }
    }

    let mut engine = two_node_engine();
    engine.register_middleware(Arc::new(Exploder));
    let before = engine.state().clone();
    let result = engine.move_nodes(&["1"], Point::new(50.0, 0.0));
    assert!(matches!(result, Err(FlowError::Middleware { .. })));
    assert_eq!(engine.state(), &before);
}

#[test]
fn spatial_queries_find_nodes_and_ports() {
    let mut engine = FlowEngine::default();
    let mut node = sized_node("1", 0.0, 0.0, 100.0, 50.0);
    node.measured_ports = Some(vec![Port {
        id: "out".into(),
        node_id: "1".into(),
        side: PortSide::Right,
        position: Point::new(100.0, 20.0),
        size: Size::new(10.0, 10.0),
        kind: PortKind::Both,
    }]);
    engine
        .init(
            vec![node, sized_node("2", 300.0, 0.0, 100.0, 50.0)],
            vec![],
            None,
        )
        .unwrap();

    let nearest = engine.nearest_node(Point::new(130.0, 25.0), 50.0).unwrap();
    assert_eq!(nearest.id, "1");
    assert!(engine.nearest_node(Point::new(200.0, 400.0), 10.0).is_none());

    let (node, port) = engine.nearest_port(Point::new(120.0, 25.0), 30.0).unwrap();
    assert_eq!(node.id, "1");
    assert_eq!(port.id, "out");

    let hits = engine.nodes_in_rect(Rect::new(250.0, -10.0, 100.0, 100.0));
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "2");
}

#[test]
fn layout_collaborator_moves_nodes_and_reroutes() {
    let mut engine = two_node_engine();
    engine.set_layout_function(|nodes, _edges| {
        Ok(LayoutResult {
            nodes: nodes
                .iter()
                .map(|node| {
                    let mut moved = node.clone();
                    moved.position = Point::new(node.position.x, node.position.y + 100.0);
                    moved
                })
                .collect(),
            edges: Vec::new(),
        })
    });
    engine.apply_layout().unwrap();
    assert_eq!(engine.node("1").unwrap().position, Point::new(0.0, 100.0));
    let edge = engine.edge("e1").unwrap();
    assert_eq!(edge.points.first(), Some(&Point::new(100.0, 125.0)));
}

#[test]
fn init_rejects_duplicate_ids_and_dangling_edges() {
    let mut engine = FlowEngine::default();
    let result = engine.init(
        vec![
            sized_node("1", 0.0, 0.0, 10.0, 10.0),
            sized_node("1", 0.0, 0.0, 10.0, 10.0),
        ],
        vec![],
        None,
    );
    assert!(matches!(result, Err(FlowError::DuplicateId { .. })));

    let result = engine.init(
        vec![sized_node("1", 0.0, 0.0, 10.0, 10.0)],
        vec![Edge::new("e1", "1", "ghost")],
        None,
    );
    assert!(matches!(result, Err(FlowError::DanglingEdge { .. })));
}
