// Integration tests for the proxy layer over an in-process mock service.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;

use flowlink_api::wire::{CommandSpec, SpecsResponse, StructSpecs, Variant};
use flowlink_core::{
    ChildKind, CoreError, DatamodelEvent, DatamodelService, DispatchPayload, EventKind, Session,
    variant,
};

type Key = (String, String);

/// In-memory stand-in for the solver's datamodel service. Every call is
/// recorded so tests can assert on wire paths and call counts.
#[derive(Default)]
struct MockSolver {
    specs: Mutex<HashMap<Key, SpecsResponse>>,
    state: Mutex<HashMap<Key, Variant>>,
    attrs: Mutex<HashMap<(String, String, String), Variant>>,
    command_result: Mutex<Option<Variant>>,

    specs_calls: Mutex<Vec<String>>,
    state_calls: Mutex<Vec<String>>,
    set_calls: Mutex<Vec<(String, Variant)>>,
    delete_calls: Mutex<Vec<String>>,
    command_calls: Mutex<Vec<(String, String, Variant)>>,
}

impl MockSolver {
    fn with_specs(self, rules: &str, path: &str, specs: SpecsResponse) -> Self {
        self.specs
            .lock()
            .unwrap()
            .insert((rules.into(), path.into()), specs);
        self
    }

    fn with_state(self, rules: &str, path: &str, state: Variant) -> Self {
        self.state
            .lock()
            .unwrap()
            .insert((rules.into(), path.into()), state);
        self
    }

    fn with_attr(self, rules: &str, path: &str, attribute: &str, value: Variant) -> Self {
        self.attrs
            .lock()
            .unwrap()
            .insert((rules.into(), path.into(), attribute.into()), value);
        self
    }

    fn with_command_result(self, result: Variant) -> Self {
        *self.command_result.lock().unwrap() = Some(result);
        self
    }

    fn specs_calls_for(&self, path: &str) -> usize {
        self.specs_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| *p == path)
            .count()
    }

    fn state_calls_for(&self, path: &str) -> usize {
        self.state_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| *p == path)
            .count()
    }

    fn path_invalid(path: &str) -> flowlink_api::Error {
        flowlink_api::Error::Solver {
            message: format!("no node at '{path}'"),
            code: Some("se.path.invalid".into()),
            status: 404,
        }
    }
}

#[async_trait]
impl DatamodelService for MockSolver {
    async fn initialize_datamodel(&self, _rules: &str) -> Result<(), flowlink_api::Error> {
        Ok(())
    }

    async fn get_specs(&self, rules: &str, path: &str) -> Result<SpecsResponse, flowlink_api::Error> {
        self.specs_calls.lock().unwrap().push(path.to_owned());
        self.specs
            .lock()
            .unwrap()
            .get(&(rules.to_owned(), path.to_owned()))
            .cloned()
            .ok_or_else(|| Self::path_invalid(path))
    }

    async fn get_state(&self, rules: &str, path: &str) -> Result<Variant, flowlink_api::Error> {
        self.state_calls.lock().unwrap().push(path.to_owned());
        self.state
            .lock()
            .unwrap()
            .get(&(rules.to_owned(), path.to_owned()))
            .cloned()
            .ok_or_else(|| Self::path_invalid(path))
    }

    async fn set_state(
        &self,
        rules: &str,
        path: &str,
        state: Variant,
    ) -> Result<(), flowlink_api::Error> {
        self.set_calls
            .lock()
            .unwrap()
            .push((path.to_owned(), state.clone()));
        // Set-state on an absent named-object path creates it.
        self.state
            .lock()
            .unwrap()
            .insert((rules.to_owned(), path.to_owned()), state);
        Ok(())
    }

    async fn delete_object(&self, rules: &str, path: &str) -> Result<(), flowlink_api::Error> {
        self.delete_calls.lock().unwrap().push(path.to_owned());
        self.state
            .lock()
            .unwrap()
            .remove(&(rules.to_owned(), path.to_owned()));
        Ok(())
    }

    async fn execute_command(
        &self,
        _rules: &str,
        path: &str,
        command: &str,
        args: Variant,
    ) -> Result<Variant, flowlink_api::Error> {
        self.command_calls
            .lock()
            .unwrap()
            .push((path.to_owned(), command.to_owned(), args));
        Ok(self
            .command_result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_default())
    }

    async fn get_attribute_value(
        &self,
        rules: &str,
        path: &str,
        attribute: &str,
    ) -> Result<Variant, flowlink_api::Error> {
        self.attrs
            .lock()
            .unwrap()
            .get(&(rules.to_owned(), path.to_owned(), attribute.to_owned()))
            .cloned()
            .ok_or_else(|| Self::path_invalid(path))
    }
}

fn singleton(members: &[&str], creatable: &[&str], commands: &[&str]) -> SpecsResponse {
    SpecsResponse {
        singleton: Some(StructSpecs {
            members: members.iter().map(|m| (*m).to_owned()).collect(),
            creatable_types: creatable.iter().map(|t| (*t).to_owned()).collect(),
            commands: commands
                .iter()
                .map(|c| CommandSpec {
                    name: (*c).to_owned(),
                    help: Some(format!("{c} help")),
                })
                .collect(),
            help: Some("node help".into()),
        }),
        named_object: None,
    }
}

fn session_over(mock: MockSolver) -> (Session, Arc<MockSolver>) {
    let mock = Arc::new(mock);
    let session = Session::with_service(Arc::clone(&mock) as Arc<dyn DatamodelService>);
    (session, mock)
}

/// A session that caches state: events (delivered by hand below) are its
/// invalidation source.
fn event_driven_session_over(mock: MockSolver) -> (Session, Arc<MockSolver>) {
    let mock = Arc::new(mock);
    let config = flowlink_core::SessionConfig {
        events_enabled: true,
        ..flowlink_core::SessionConfig::default()
    };
    let session =
        Session::with_service_config(Arc::clone(&mock) as Arc<dyn DatamodelService>, config);
    (session, mock)
}

fn modified(rules: &str, tag: &str) -> DatamodelEvent {
    DatamodelEvent {
        rules: rules.into(),
        tag: tag.into(),
        kind: EventKind::Modified,
    }
}

// ── Child classification ─────────────────────────────────────────────

#[tokio::test]
async fn resolve_classifies_children_by_schema() {
    let (session, _) = session_over(MockSolver::default().with_specs(
        "solver",
        "",
        singleton(&["Foo", "Bar:baz"], &["baz"], &["Run"]),
    ));
    let root = session.root("solver");

    assert!(matches!(
        root.resolve("foo").await.unwrap(),
        ChildKind::Singleton(_)
    ));
    assert!(matches!(
        root.resolve("bar").await.unwrap(),
        ChildKind::Collection(_)
    ));
    assert!(matches!(
        root.resolve("run").await.unwrap(),
        ChildKind::Command(_)
    ));
    // Creatable types resolve even before any instance member exists.
    assert!(matches!(
        root.resolve("baz").await.unwrap(),
        ChildKind::Collection(_)
    ));

    match root.resolve("nonexistent").await {
        Err(CoreError::NotFound { name, .. }) => assert_eq!(name, "nonexistent"),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn resolution_error_names_the_wire_path() {
    let (session, _) = session_over(
        MockSolver::default()
            .with_specs("solver", "", singleton(&["Setup"], &[], &[]))
            .with_specs("solver", "/Setup", singleton(&["General"], &[], &[])),
    );

    let setup = session.root("solver").child("setup").await.unwrap();
    let err = setup.resolve("nonexistent").await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("nonexistent"), "{message}");
    assert!(message.contains("/Setup"), "{message}");
}

#[tokio::test]
async fn child_names_lists_the_full_surface() {
    let (session, _) = session_over(MockSolver::default().with_specs(
        "solver",
        "",
        singleton(&["General", "VelocityInlet:1"], &["VelocityInlet"], &["SolveSteady"]),
    ));

    let names = session.root("solver").child_names().await.unwrap();
    assert_eq!(names, vec!["general", "velocity_inlet", "solve_steady"]);
}

// ── Container display-name indirection ───────────────────────────────

#[tokio::test]
async fn container_exposes_display_names_not_raw_keys() {
    let (session, _) = session_over(
        MockSolver::default()
            .with_specs("solver", "", singleton(&["Setup"], &[], &[]))
            .with_specs("solver", "/Setup", singleton(&["Zone:1"], &["Zone"], &[]))
            .with_state("solver", "/Setup/Zone:1/_name_", Variant::from("MyZone")),
    );

    let setup = session.root("solver").child("setup").await.unwrap();
    let zones = setup.collection("zone").await.unwrap();

    assert_eq!(zones.names().await.unwrap(), vec!["MyZone"]);
    assert_eq!(zones.len().await.unwrap(), 1);

    let zone = zones.get("MyZone").await.unwrap();
    assert_eq!(zone.path().to_wire(), "/Setup/Zone:MyZone");

    // The raw structural key is not a valid public lookup key.
    match zones.get("1").await {
        Err(CoreError::NotFound { name, .. }) => assert_eq!(name, "1"),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn container_set_creates_and_delete_removes() {
    let (session, mock) = session_over(
        MockSolver::default()
            .with_specs("solver", "", singleton(&["Setup"], &[], &[]))
            .with_specs("solver", "/Setup", singleton(&["Zone:1"], &["Zone"], &[]))
            .with_state("solver", "/Setup/Zone:1/_name_", Variant::from("MyZone")),
    );

    let setup = session.root("solver").child("setup").await.unwrap();
    let zones = setup.collection("zone").await.unwrap();

    // Creation-on-assignment: one set-state call, no pre-create RPC.
    zones
        .set("NewZone", &json!({ "growth_rate": 1.2 }))
        .await
        .unwrap();
    {
        let set_calls = mock.set_calls.lock().unwrap();
        assert_eq!(set_calls.len(), 1);
        assert_eq!(set_calls[0].0, "/Setup/Zone:NewZone");
        // State keys cross the wire in server convention.
        let entries = &set_calls[0].1.map_value.as_ref().unwrap().entries;
        assert!(entries.contains_key("GrowthRate"));
    }

    zones.delete("MyZone").await.unwrap();
    assert_eq!(
        *mock.delete_calls.lock().unwrap(),
        vec!["/Setup/Zone:MyZone".to_owned()]
    );

    assert!(matches!(
        zones.delete("missing").await,
        Err(CoreError::NotFound { .. })
    ));
}

// ── Cache behavior ───────────────────────────────────────────────────

#[tokio::test]
async fn specs_are_cached_until_a_matching_event_arrives() {
    let (session, mock) = session_over(
        MockSolver::default()
            .with_specs("solver", "", singleton(&["A", "B"], &[], &[]))
            .with_specs("solver", "/A", singleton(&["Leaf"], &[], &[]))
            .with_specs("solver", "/B", singleton(&["Leaf"], &[], &[])),
    );
    let root = session.root("solver");

    let a = root.child("a").await.unwrap();
    let b = root.child("b").await.unwrap();

    a.child_names().await.unwrap();
    a.child_names().await.unwrap();
    b.child_names().await.unwrap();
    assert_eq!(mock.specs_calls_for("/A"), 1);
    assert_eq!(mock.specs_calls_for("/B"), 1);

    // A Modified event for /A forces a refetch there; /B is untouched.
    session.deliver_event(&modified("solver", "/A"));

    a.child_names().await.unwrap();
    b.child_names().await.unwrap();
    assert_eq!(mock.specs_calls_for("/A"), 2);
    assert_eq!(mock.specs_calls_for("/B"), 1);
}

#[tokio::test]
async fn set_state_invalidates_the_local_state_cache() {
    let (session, mock) = event_driven_session_over(
        MockSolver::default()
            .with_specs("solver", "", singleton(&["Setup"], &[], &[]))
            .with_state(
                "solver",
                "/Setup",
                variant::encode(&json!({ "X": 1 }), false),
            ),
    );

    let setup = session.root("solver").child("setup").await.unwrap();

    assert_eq!(setup.get_state().await.unwrap(), json!({ "x": 1 }));
    setup.get_state().await.unwrap();
    assert_eq!(mock.state_calls_for("/Setup"), 1);

    setup.set_state(&json!({ "x": 2 })).await.unwrap();

    // Read-your-writes without waiting for the Modified event.
    assert_eq!(setup.get_state().await.unwrap(), json!({ "x": 2 }));
    assert_eq!(mock.state_calls_for("/Setup"), 2);
}

#[tokio::test]
async fn state_reads_pass_through_without_an_event_stream() {
    // No stream means no invalidation source: out-of-band mutations
    // (solver iterations) must still show up on the next read.
    let (session, mock) = session_over(
        MockSolver::default()
            .with_specs("solver", "", singleton(&["Solution"], &[], &[]))
            .with_state(
                "solver",
                "/Solution",
                variant::encode(&json!({ "Iterations": 1 }), false),
            ),
    );

    let solution = session.root("solver").child("solution").await.unwrap();
    assert_eq!(solution.get_state().await.unwrap(), json!({ "iterations": 1 }));

    // The solver iterates on its own, with no event delivered.
    mock.state.lock().unwrap().insert(
        ("solver".into(), "/Solution".into()),
        variant::encode(&json!({ "Iterations": 2 }), false),
    );

    assert_eq!(solution.get_state().await.unwrap(), json!({ "iterations": 2 }));
    assert_eq!(mock.state_calls_for("/Solution"), 2);
}

#[tokio::test]
async fn state_is_cached_when_events_drive_invalidation() {
    let (session, mock) = event_driven_session_over(
        MockSolver::default()
            .with_specs("solver", "", singleton(&["Solution"], &[], &[]))
            .with_state(
                "solver",
                "/Solution",
                variant::encode(&json!({ "Iterations": 1 }), false),
            ),
    );

    let solution = session.root("solver").child("solution").await.unwrap();
    solution.get_state().await.unwrap();
    solution.get_state().await.unwrap();
    assert_eq!(mock.state_calls_for("/Solution"), 1);

    mock.state.lock().unwrap().insert(
        ("solver".into(), "/Solution".into()),
        variant::encode(&json!({ "Iterations": 2 }), false),
    );
    session.deliver_event(&modified("solver", "/Solution"));

    assert_eq!(solution.get_state().await.unwrap(), json!({ "iterations": 2 }));
    assert_eq!(mock.state_calls_for("/Solution"), 2);
}

// ── Event dispatch routing ───────────────────────────────────────────

#[tokio::test]
async fn callbacks_fire_only_for_their_tag_in_order() {
    let (session, _) = session_over(MockSolver::default());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_cb = Arc::clone(&seen);
    session.events().register("solver", "/T", move |payload| {
        if let DispatchPayload::Touched { owner, .. } = payload {
            seen_cb.lock().unwrap().push(owner.path().to_wire());
        }
    });

    session.deliver_event(&modified("solver", "/T"));
    session.deliver_event(&modified("solver", "/U"));
    session.deliver_event(&modified("solver", "/T"));

    assert_eq!(*seen.lock().unwrap(), vec!["/T".to_owned(), "/T".to_owned()]);
}

// ── Attributes and commands ──────────────────────────────────────────

#[tokio::test]
async fn attribute_values_are_never_key_converted() {
    let (session, _) = session_over(
        MockSolver::default()
            .with_specs("solver", "", singleton(&["Setup"], &[], &[]))
            .with_attr(
                "solver",
                "/Setup",
                "allowedValues",
                variant::encode(&json!({ "MinValue": 1, "MaxValue": 10 }), false),
            ),
    );

    let setup = session.root("solver").child("setup").await.unwrap();
    let value = setup.get_attribute_value("allowedValues").await.unwrap();

    // Keys come back verbatim; attributes are not schema-namespaced.
    assert_eq!(value, json!({ "MinValue": 1, "MaxValue": 10 }));
}

#[tokio::test]
async fn command_invocation_converts_args_and_result() {
    let (session, mock) = session_over(
        MockSolver::default()
            .with_specs("solver", "", singleton(&[], &[], &["SolveSteady"]))
            .with_command_result(variant::encode(&json!({ "IterationsDone": 50 }), false)),
    );

    let run = session.root("solver").command("solve_steady").await.unwrap();
    assert_eq!(run.name(), "SolveSteady");
    assert_eq!(run.help().await.unwrap().as_ref(), "SolveSteady help");

    let result = run.invoke(&json!({ "time_step": 10 })).await.unwrap();
    assert_eq!(result, json!({ "iterations_done": 50 }));

    let calls = mock.command_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "");
    assert_eq!(calls[0].1, "SolveSteady");
    let entries = &calls[0].2.map_value.as_ref().unwrap().entries;
    assert!(entries.contains_key("TimeStep"));
}

// ── End-to-end navigation ────────────────────────────────────────────

#[tokio::test]
async fn end_to_end_display_name_lookup_builds_the_final_wire_path() {
    // This namespace keeps snake_case schema identifiers; resolution must
    // honor the schema's own spelling on the wire.
    let (session, mock) = session_over(
        MockSolver::default()
            .with_specs("solver", "", singleton(&["setup"], &[], &[]))
            .with_specs(
                "solver",
                "/setup",
                singleton(&["boundary_conditions"], &[], &[]),
            )
            .with_specs(
                "solver",
                "/setup/boundary_conditions",
                singleton(&["velocity_inlet:1"], &["velocity_inlet"], &[]),
            )
            .with_state(
                "solver",
                "/setup/boundary_conditions/velocity_inlet:1/_name_",
                Variant::from("inlet-1"),
            )
            .with_state(
                "solver",
                "/setup/boundary_conditions/velocity_inlet:inlet-1",
                variant::encode(&json!({ "temperature": 300.0 }), false),
            ),
    );

    let inlet = session
        .root("solver")
        .child("setup")
        .await
        .unwrap()
        .child("boundary_conditions")
        .await
        .unwrap()
        .collection("velocity_inlet")
        .await
        .unwrap()
        .get("inlet-1")
        .await
        .unwrap();

    let state = inlet.get_state().await.unwrap();
    assert_eq!(state, json!({ "temperature": 300.0 }));
    assert_eq!(
        mock.state_calls.lock().unwrap().last().map(String::as_str),
        Some("/setup/boundary_conditions/velocity_inlet:inlet-1")
    );
}

// ── Help memoization ─────────────────────────────────────────────────

#[tokio::test]
async fn help_is_memoized_per_node_class() {
    let (session, mock) = session_over(
        MockSolver::default()
            .with_specs("solver", "", singleton(&["Setup"], &[], &[]))
            .with_specs("solver", "/Setup", singleton(&[], &[], &[])),
    );

    let setup = session.root("solver").child("setup").await.unwrap();
    assert_eq!(setup.help().await.unwrap().as_ref(), "node help");

    // Invalidate the specs cache; the memoized help must survive without
    // a refetch.
    session.cache().clear();
    assert_eq!(setup.help().await.unwrap().as_ref(), "node help");
    assert_eq!(mock.specs_calls_for("/Setup"), 1);
}
