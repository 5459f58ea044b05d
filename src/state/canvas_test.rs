use super::*;

fn record(id: &str, name: &str) -> AgentRecord {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "config": {"id": id, "name": name, "model": "gpt-4o", "prompt": "p", "port": 8101},
        "status": "running",
        "url": "http://localhost:8101",
    }))
    .unwrap()
}

fn edge(id: &str, source: &str, target: &str) -> Edge {
    Edge {
        id: id.into(),
        source: source.into(),
        source_handle: Some("right".into()),
        target: target.into(),
        target_handle: Some("left".into()),
    }
}

fn node(id: &str) -> AgentNode {
    AgentNode::from_record(&record(id, id), Position::default())
}

// =============================================================================
// ids
// =============================================================================

#[test]
fn temp_ids_are_placeholders_and_unique() {
    let a = temp_id();
    let b = temp_id();
    assert!(is_placeholder(&a));
    assert_ne!(a, b);
    assert!(!is_placeholder("3f2c0d4e"));
}

// =============================================================================
// AgentNode
// =============================================================================

#[test]
fn from_record_maps_server_fields() {
    let n = AgentNode::from_record(&record("a1", "Researcher"), Position::new(10.0, 20.0));
    assert_eq!(n.label, "Researcher");
    assert_eq!(n.model, "gpt-4o");
    assert_eq!(n.status, AgentStatus::Running);
    assert_eq!(n.address.as_deref(), Some("http://localhost:8101"));
    assert_eq!(n.port, Some(8101));
    assert_eq!(n.position, Position::new(10.0, 20.0));
    assert!(!n.selected);
}

#[test]
fn merge_record_keeps_ui_fields() {
    let mut n = AgentNode::from_record(&record("a1", "Old"), Position::new(5.0, 6.0));
    n.selected = true;

    let mut update = record("a1", "New");
    update.status = AgentStatus::Error;
    update.error_message = Some("crashed".into());
    n.merge_record(&update);

    assert_eq!(n.label, "New");
    assert_eq!(n.status, AgentStatus::Error);
    assert_eq!(n.error.as_deref(), Some("crashed"));
    assert_eq!(n.position, Position::new(5.0, 6.0));
    assert!(n.selected);
}

// =============================================================================
// Edge
// =============================================================================

#[test]
fn edge_record_conversion_round_trips_fields() {
    let e = edge("c1", "a", "b");
    let back = Edge::from_record(&e.to_record());
    assert_eq!(back, e);
    assert!(e.to_record().enabled);
}

#[test]
fn find_edge_matches_full_tuple_only() {
    let state = CanvasState { edges: vec![edge("c1", "a", "b")], ..Default::default() };
    assert!(state.find_edge(("a", Some("right"), "b", Some("left"))).is_some());
    assert!(state.find_edge(("a", Some("bottom"), "b", Some("left"))).is_none());
    assert!(state.find_edge(("b", Some("right"), "a", Some("left"))).is_none());
}

// =============================================================================
// CanvasState edits
// =============================================================================

#[test]
fn remove_and_restore_edge_preserves_order() {
    let mut state = CanvasState {
        edges: vec![edge("c1", "a", "b"), edge("c2", "b", "c"), edge("c3", "c", "d")],
        ..Default::default()
    };
    let before = state.clone();

    let (index, removed) = state.remove_edge("c2").unwrap();
    assert_eq!(index, 1);
    assert!(state.restore_edge(index, removed));
    assert_eq!(state, before);
}

#[test]
fn restore_edge_skips_duplicates() {
    let mut state = CanvasState { edges: vec![edge("c1", "a", "b")], ..Default::default() };
    assert!(!state.restore_edge(0, edge("c1", "a", "b")));
    assert!(!state.restore_edge(0, edge("c9", "a", "b")));
    assert_eq!(state.edges.len(), 1);
}

#[test]
fn remove_agent_cascades_only_touching_edges() {
    let mut state = CanvasState {
        agents: vec![node("a"), node("b"), node("c")],
        edges: vec![edge("ab", "a", "b"), edge("bc", "b", "c"), edge("ca", "c", "a")],
        ..Default::default()
    };
    let removed = state.remove_agent("a").unwrap();

    assert_eq!(removed.index, 0);
    let ids: Vec<_> = removed.edges.iter().map(|(_, e)| e.id.as_str()).collect();
    assert_eq!(ids, vec!["ab", "ca"]);
    assert_eq!(state.edges.len(), 1);
    assert_eq!(state.edges[0].id, "bc");
    assert!(state.agent("a").is_none());
}

#[test]
fn restore_agent_undoes_removal() {
    let mut state = CanvasState {
        agents: vec![node("a"), node("b"), node("c")],
        edges: vec![edge("ab", "a", "b"), edge("bc", "b", "c"), edge("ca", "c", "a")],
        ..Default::default()
    };
    let before = state.clone();
    let removed = state.remove_agent("a").unwrap();
    state.restore_agent(removed);
    assert_eq!(state, before);
}

#[test]
fn remove_missing_agent_is_none() {
    let mut state = CanvasState::default();
    assert!(state.remove_agent("ghost").is_none());
}

#[test]
fn select_marks_single_agent() {
    let mut state = CanvasState { agents: vec![node("a"), node("b")], ..Default::default() };
    state.select(Some("b"));
    assert_eq!(state.selected().map(|a| a.id.as_str()), Some("b"));
    state.select(Some("a"));
    assert!(!state.agent("b").unwrap().selected);
    state.select(None);
    assert!(state.selected().is_none());
}
