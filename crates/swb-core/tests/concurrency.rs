//! Streaming, cancellation, timeout and concurrency behaviour

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use swb_core::{
    BackendError, DelegationResult, Phase, SpecId, SpecIdentity, StreamMethod, TaskId, Workbench,
    WorkbenchError, WorkbenchEvent,
};
use swb_test_utils::{
    agent_config, init_tracing, sample_template, test_config, Call, CallKind, EnhanceScript,
    FakeBackend,
};

fn new_workbench(backend: &Arc<FakeBackend>) -> Workbench {
    init_tracing();
    Workbench::new_spec(backend.clone(), test_config())
}

async fn completed_workbench(backend: &Arc<FakeBackend>) -> Workbench {
    let workbench = new_workbench(backend);
    workbench.set_content("Build a todo app");
    workbench.specify().await.unwrap();
    workbench.generate_plan().await.unwrap();
    workbench.generate_tasks().await.unwrap();
    workbench
}

// ---- Enhancement streaming ----

#[tokio::test]
async fn enhancement_appends_after_separator() {
    let backend = FakeBackend::shared();
    backend.set_enhance(
        StreamMethod::Post,
        Ok(EnhanceScript::chunks(&["## Over", "view\n", "Body text"])),
    );
    let workbench = new_workbench(&backend);
    workbench.set_content("Intro");

    let summary = workbench.enhance().await.unwrap();

    assert_eq!(summary.method, StreamMethod::Post);
    assert_eq!(summary.chunks, 3);
    assert_eq!(
        workbench.snapshot().spec.content,
        "Intro\n\n## Overview\nBody text"
    );
    assert!(!workbench.busy().enhancing);
}

#[tokio::test]
async fn enhancement_into_empty_content_has_no_separator() {
    let backend = FakeBackend::shared();
    backend.set_enhance(StreamMethod::Post, Ok(EnhanceScript::chunks(&["Generated"])));
    let workbench = new_workbench(&backend);

    workbench.enhance().await.unwrap();

    assert_eq!(workbench.snapshot().spec.content, "Generated");
    // Enhancing an unsaved spec persists it first.
    assert_eq!(
        backend.calls(),
        vec![
            Call::CreateSpec,
            Call::Enhance(SpecId::from("s1"), StreamMethod::Post)
        ]
    );
}

#[tokio::test]
async fn enhancement_falls_back_to_get() {
    let backend = FakeBackend::shared();
    backend.set_enhance(
        StreamMethod::Post,
        Err(BackendError::StreamUnavailable("no body".to_string())),
    );
    backend.set_enhance(StreamMethod::Get, Ok(EnhanceScript::chunks(&["via GET"])));
    let workbench = new_workbench(&backend);
    workbench.set_content("Intro");

    let summary = workbench.enhance().await.unwrap();

    assert_eq!(summary.method, StreamMethod::Get);
    let id = SpecId::from("s1");
    assert_eq!(
        backend.calls()[1..].to_vec(),
        vec![
            Call::Enhance(id.clone(), StreamMethod::Post),
            Call::Enhance(id, StreamMethod::Get),
        ]
    );
    assert_eq!(workbench.snapshot().spec.content, "Intro\n\nvia GET");
}

#[tokio::test]
async fn enhancement_fails_when_no_method_streams() {
    let backend = FakeBackend::shared();
    backend.set_enhance(
        StreamMethod::Post,
        Err(BackendError::StreamUnavailable("no body".to_string())),
    );
    let workbench = new_workbench(&backend);
    workbench.set_content("Intro");
    let mut events = workbench.subscribe();

    let err = workbench.enhance().await.unwrap_err();

    assert!(matches!(err, WorkbenchError::EnhancementFailure(_)));
    assert_eq!(workbench.snapshot().spec.content, "Intro");
    let failed = std::iter::from_fn(|| events.try_recv().ok())
        .any(|e| matches!(e, WorkbenchEvent::OperationFailed { operation: "enhance", .. }));
    assert!(failed);
}

#[tokio::test]
async fn broken_stream_keeps_partial_content() {
    let backend = FakeBackend::shared();
    backend.set_enhance(
        StreamMethod::Post,
        Ok(EnhanceScript::chunks(&["first ", "second"])
            .failing_with(BackendError::Transport("connection reset".to_string()))),
    );
    let workbench = new_workbench(&backend);
    workbench.set_content("Intro");

    let err = workbench.enhance().await.unwrap_err();

    assert!(matches!(err, WorkbenchError::EnhancementFailure(_)));
    assert_eq!(workbench.snapshot().spec.content, "Intro\n\nfirst second");
}

#[tokio::test(start_paused = true)]
async fn content_observations_grow_monotonically() {
    let backend = FakeBackend::shared();
    backend.set_enhance(
        StreamMethod::Post,
        Ok(EnhanceScript::chunks(&["a", "b", "c", "d"]).with_delay(Duration::from_millis(50))),
    );
    let workbench = new_workbench(&backend);
    workbench.set_content("Intro");
    let mut content = workbench.subscribe_content();

    let observer = async {
        let mut seen = vec![content.borrow_and_update().clone()];
        while content.changed().await.is_ok() {
            let value = content.borrow_and_update().clone();
            let done = value.ends_with('d');
            seen.push(value);
            if done {
                break;
            }
        }
        seen
    };
    let (result, seen) = tokio::join!(workbench.enhance(), observer);

    result.unwrap();
    assert_eq!(seen.first().map(String::as_str), Some("Intro"));
    assert_eq!(seen.last().map(String::as_str), Some("Intro\n\nabcd"));
    for pair in seen.windows(2) {
        assert!(pair[1].starts_with(&pair[0]), "{:?} -> {:?}", pair[0], pair[1]);
    }
}

#[tokio::test(start_paused = true)]
async fn edits_during_streaming_are_last_write_wins() {
    let backend = FakeBackend::shared();
    backend.set_enhance(
        StreamMethod::Post,
        Ok(EnhanceScript::chunks(&["one", "two"]).with_delay(Duration::from_millis(100))),
    );
    let workbench = new_workbench(&backend);
    workbench.set_content("Intro");

    let edit = async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        workbench.set_content("Rewritten");
    };
    let (result, ()) = tokio::join!(workbench.enhance(), edit);

    result.unwrap();
    assert_eq!(workbench.snapshot().spec.content, "Rewrittentwo");
}

#[tokio::test(start_paused = true)]
async fn stalled_stream_times_out() {
    let backend = FakeBackend::shared();
    backend.set_enhance(
        StreamMethod::Post,
        Ok(EnhanceScript::chunks(&["partial"]).hanging()),
    );
    let workbench = new_workbench(&backend);
    workbench.set_content("Intro");

    let err = workbench.enhance().await.unwrap_err();

    assert!(matches!(err, WorkbenchError::EnhancementFailure(_)));
    assert!(err.is_timeout());
    assert_eq!(workbench.snapshot().spec.content, "Intro\n\npartial");
    assert!(!workbench.busy().enhancing);
}

#[tokio::test(start_paused = true)]
async fn cancelling_a_stream_keeps_what_arrived() {
    let backend = FakeBackend::shared();
    backend.set_enhance(
        StreamMethod::Post,
        Ok(EnhanceScript::chunks(&["one", "two", "three"]).with_delay(Duration::from_secs(1))),
    );
    let workbench = new_workbench(&backend);
    workbench.set_content("Intro");

    let cancel = async {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        workbench.cancel_all();
    };
    let (result, ()) = tokio::join!(workbench.enhance(), cancel);

    let err = result.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(workbench.snapshot().spec.content, "Intro\n\none");

    // A fresh token is in place for later operations.
    backend.set_enhance(StreamMethod::Post, Ok(EnhanceScript::chunks(&["!"])));
    workbench.enhance().await.unwrap();
}

#[tokio::test]
async fn concurrent_enhancement_is_rejected() {
    let backend = FakeBackend::shared();
    backend.set_enhance(
        StreamMethod::Post,
        Ok(EnhanceScript::chunks(&["slow"]).with_delay(Duration::from_millis(50))),
    );
    let workbench = new_workbench(&backend);
    workbench.set_content("Intro");
    workbench.save().await.unwrap();

    let (first, second) = tokio::join!(workbench.enhance(), async {
        tokio::task::yield_now().await;
        workbench.enhance().await
    });

    assert!(first.is_ok());
    assert!(matches!(
        second.unwrap_err(),
        WorkbenchError::Busy {
            operation: "enhance"
        }
    ));
}

// ---- Persistence races ----

#[tokio::test(start_paused = true)]
async fn concurrent_saves_do_not_double_create() {
    let backend = FakeBackend::shared();
    backend.set_latency(CallKind::CreateSpec, Duration::from_millis(100));
    let workbench = new_workbench(&backend);
    workbench.set_content("draft");

    let (first, second) = tokio::join!(workbench.save(), workbench.save());

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(WorkbenchError::Busy { operation: "save" }))));
    assert_eq!(backend.count(CallKind::CreateSpec), 1);
    assert_eq!(
        workbench.identity(),
        SpecIdentity::Confirmed(SpecId::from("s1"))
    );
}

#[tokio::test(start_paused = true)]
async fn edits_during_save_survive_adoption() {
    let backend = FakeBackend::shared();
    backend.set_latency(CallKind::CreateSpec, Duration::from_millis(100));
    let workbench = new_workbench(&backend);
    workbench.set_title("Before");

    let edit = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(workbench.identity(), SpecIdentity::Pending);
        workbench.set_title("After");
    };
    let (saved, ()) = tokio::join!(workbench.save(), edit);

    saved.unwrap();
    let snapshot = workbench.snapshot();
    assert_eq!(snapshot.spec.title, "After");
    assert_eq!(snapshot.spec.id, Some(SpecId::from("s1")));
    assert_eq!(snapshot.spec.branch_name.as_deref(), Some("001-spec"));
}

#[tokio::test(start_paused = true)]
async fn cancelled_save_restores_identity() {
    let backend = FakeBackend::shared();
    backend.set_latency(CallKind::CreateSpec, Duration::from_secs(3));
    let workbench = new_workbench(&backend);

    let cancel = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        workbench.cancel_all();
    };
    let (saved, ()) = tokio::join!(workbench.save(), cancel);

    let err = saved.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(workbench.identity(), SpecIdentity::Absent);
    assert!(!workbench.busy().saving);
}

// ---- Phase operation interruption ----

#[tokio::test(start_paused = true)]
async fn cancelled_specify_leaves_phase() {
    let backend = FakeBackend::shared();
    backend.set_latency(CallKind::Specify, Duration::from_secs(30));
    let workbench = new_workbench(&backend);
    workbench.set_content("Build a todo app");

    let cancel = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(workbench.busy().specifying);
        workbench.cancel_all();
    };
    let (result, ()) = tokio::join!(workbench.specify(), cancel);

    let err = result.unwrap_err();
    assert!(err.is_cancelled());
    assert!(matches!(
        err,
        WorkbenchError::PhaseTransitionFailure {
            phase: Phase::Specification,
            ..
        }
    ));
    assert_eq!(workbench.phase(), Phase::Specification);
    assert!(!workbench.busy().any());
}

#[tokio::test(start_paused = true)]
async fn slow_plan_times_out() {
    let backend = FakeBackend::shared();
    let workbench = new_workbench(&backend);
    workbench.set_content("Build a todo app");
    workbench.specify().await.unwrap();
    backend.set_latency(CallKind::Plan, Duration::from_secs(60));

    let err = workbench.generate_plan().await.unwrap_err();

    assert!(err.is_timeout());
    assert!(err.is_retryable());
    assert_eq!(workbench.phase(), Phase::Plan);
    assert_eq!(workbench.snapshot().spec.plan, None);
    assert!(!workbench.busy().planning);
}

#[tokio::test]
async fn same_operation_twice_is_busy() {
    let backend = FakeBackend::shared();
    backend.set_latency(CallKind::Specify, Duration::from_millis(20));
    let workbench = new_workbench(&backend);
    workbench.set_content("Build a todo app");
    workbench.save().await.unwrap();

    let (first, second) = tokio::join!(workbench.specify(), workbench.specify());

    assert!(first.is_ok());
    assert!(matches!(
        second.unwrap_err(),
        WorkbenchError::Busy {
            operation: "specify"
        }
    ));
    assert_eq!(backend.count(CallKind::Specify), 1);
}

// ---- Delegation ----

#[tokio::test(start_paused = true)]
async fn delegation_results_follow_selection_order() {
    let backend = FakeBackend::shared();
    let workbench = completed_workbench(&backend).await;
    backend.set_assign_delay("T001", Duration::from_millis(20));
    backend.set_assign_delay("T002", Duration::from_millis(5));
    backend.set_assign_delay("T003", Duration::from_millis(30));
    workbench.select_all_tasks();

    let report = workbench.delegate(&agent_config()).await.unwrap();

    assert_eq!(
        backend.completion_order(),
        vec![TaskId::from("T002"), TaskId::from("T001"), TaskId::from("T003")]
    );
    let committed: Vec<(TaskId, usize)> = workbench
        .snapshot()
        .delegation_results
        .iter()
        .map(|r: &DelegationResult| (r.task_id.clone(), r.assignment_number))
        .collect();
    assert_eq!(
        committed,
        vec![
            (TaskId::from("T001"), 1),
            (TaskId::from("T002"), 2),
            (TaskId::from("T003"), 3),
        ]
    );
    assert!(report.is_complete());
}

#[tokio::test(start_paused = true)]
async fn delegation_requests_are_concurrent() {
    let backend = FakeBackend::shared();
    let workbench = completed_workbench(&backend).await;
    for task in ["T001", "T002", "T003"] {
        backend.set_assign_delay(task, Duration::from_secs(5));
    }
    workbench.select_all_tasks();

    let started = tokio::time::Instant::now();
    workbench.delegate(&agent_config()).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn slow_delegation_times_out_per_task() {
    let backend = FakeBackend::shared();
    let workbench = completed_workbench(&backend).await;
    backend.set_assign_delay("T001", Duration::from_secs(60));
    workbench.toggle_task(&TaskId::from("T001")).unwrap();

    let err = workbench.delegate(&agent_config()).await.unwrap_err();

    assert!(matches!(err, WorkbenchError::DelegationFailure { .. }));
    assert!(err.is_timeout());
    assert!(workbench.snapshot().delegation_results.is_empty());
}

#[tokio::test]
async fn delegation_event_reports_counts() {
    let backend = FakeBackend::shared();
    let workbench = completed_workbench(&backend).await;
    workbench.select_all_tasks();
    let mut events = workbench.subscribe();

    workbench.delegate(&agent_config()).await.unwrap();

    let completed = std::iter::from_fn(|| events.try_recv().ok()).find_map(|e| match e {
        WorkbenchEvent::DelegationCompleted { delegated, failed } => Some((delegated, failed)),
        _ => None,
    });
    assert_eq!(completed, Some((3, 0)));
}

// ---- Templates ----

async fn open_with_template_under(spec_latency: Duration, template_latency: Duration) -> Workbench {
    let backend = FakeBackend::shared();
    backend.add_template(sample_template());
    let id = backend.seed_spec(swb_test_utils::sample_spec());
    backend.set_latency(CallKind::GetSpec, spec_latency);
    backend.set_latency(CallKind::GetTemplate, template_latency);
    init_tracing();
    Workbench::open_with_template(backend, test_config(), Some(&id), "web-app")
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn template_merge_is_order_independent() {
    let spec_first = open_with_template_under(Duration::from_millis(10), Duration::from_millis(80)).await;
    let template_first =
        open_with_template_under(Duration::from_millis(80), Duration::from_millis(10)).await;

    let a = spec_first.snapshot();
    let b = template_first.snapshot();
    assert_eq!(a.spec.planning, b.spec.planning);
    assert_eq!(a.planning_draft, b.planning_draft);
    assert_eq!(
        a.planning_draft.tech_stack,
        "React, Node.js, PostgreSQL"
    );
    assert_eq!(a.spec.title, "Todo");
}

#[tokio::test]
async fn template_failure_leaves_spec_usable() {
    let backend = FakeBackend::shared();
    let id = backend.seed_spec(swb_test_utils::sample_spec());
    init_tracing();

    let workbench = Workbench::open_with_template(backend.clone(), test_config(), Some(&id), "missing")
        .await
        .unwrap();

    let snapshot = workbench.snapshot();
    assert_eq!(snapshot.template, None);
    assert_eq!(snapshot.spec.planning, None);
    assert_eq!(snapshot.identity, SpecIdentity::Confirmed(id));
}

#[tokio::test]
async fn template_never_overrides_user_planning() {
    let backend = FakeBackend::shared();
    backend.add_template(sample_template());
    let workbench = new_workbench(&backend);
    workbench.set_planning_field(swb_core::PlanningField::TechStack, "Go + Postgres");

    assert!(workbench.attach_template("web-app").await.unwrap());
    let snapshot = workbench.snapshot();
    assert_eq!(snapshot.planning_draft.tech_stack, "Go + Postgres");
    assert_eq!(snapshot.planning_draft.architecture, "Three-tier web application");

    // Second merge is a no-op and the catalog answers from cache.
    assert!(!workbench.attach_template("web-app").await.unwrap());
    assert!(!workbench.try_merge_template());
    assert_eq!(backend.count(CallKind::GetTemplate), 1);
}

#[tokio::test]
async fn missing_template_is_reported() {
    let backend = FakeBackend::shared();
    let workbench = new_workbench(&backend);

    let err = workbench.attach_template("nope").await.unwrap_err();
    assert!(matches!(
        err,
        WorkbenchError::TemplateFetchFailure(BackendError::NotFound(_))
    ));
}

// ---- Details panel ----

#[tokio::test(start_paused = true)]
async fn details_panel_collapses_once_fields_are_filled() {
    let backend = FakeBackend::shared();
    let workbench = new_workbench(&backend);
    workbench.set_title("Todo");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(workbench.panel().is_expanded());

    workbench.set_description("A todo app");
    let mut expanded = workbench.panel().subscribe();
    tokio::time::timeout(Duration::from_secs(3), expanded.wait_for(|e| !*e))
        .await
        .expect("panel should collapse")
        .unwrap();
}
