//! End-to-end scenarios across the directory, router, bus, context store and
//! orchestrator.

use concord_agents::{AgentMessage, MessageKind, MessagePriority};
use concord_context::{ContextEntry, ContextScope, WriteOptions};
use concord_core::{ConcordConfig, ConcordResult, ConflictStrategy, EntityId, Event};
use concord_events::HandlerError;
use concord_goals::{Goal, GoalStatus, Task, TaskUpdate};
use concord_test_utils::{assertions, fixtures, init_test_tracing};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[test]
fn three_task_goal_resolves_and_reports_progress() -> ConcordResult<()> {
    init_test_tracing();
    let stack = fixtures::coordination_stack();
    let orch = &stack.orchestrator;

    let g = orch.create_goal(Goal::new("G"))?;
    let ids = orch.decompose_goal(g, &["T1", "T2"])?;
    let (t1, t2) = (ids[0], ids[1]);
    let t3 = orch.create_task(Task::new(g, "T3").with_dependencies([t1, t2]))?;

    assert_eq!(orch.resolve_dependencies(t3)?, vec![t1, t2, t3]);
    assertions::assert_goal_error(&orch.add_dependency(t1, t3));

    for id in [t1, t2] {
        orch.update_task(id, TaskUpdate::new().with_status(GoalStatus::Completed))?;
    }
    let progress = orch.calculate_progress(g)?;
    assert_eq!(progress.total_tasks, 3);
    assert_eq!(progress.completed_tasks, 2);
    assert!((progress.percent_complete - 66.7).abs() < 0.05);
    assert_eq!(progress.completed_task_ids, vec![t1, t2]);
    assert_eq!(progress.goal_status, GoalStatus::InProgress);

    orch.update_task(t3, TaskUpdate::new().with_status(GoalStatus::Completed))?;
    assert_eq!(orch.calculate_progress(g)?.goal_status, GoalStatus::Completed);
    Ok(())
}

#[test]
fn delegation_round_trip_through_router_and_context() -> ConcordResult<()> {
    init_test_tracing();
    let stack = fixtures::coordination_stack();
    let planner = stack.join("planner", &["plan"])?;
    let worker = stack.join("worker", &["browse"])?;

    let g = stack.orchestrator.create_goal(Goal::new("Read the docs"))?;
    let ids = stack.orchestrator.decompose_goal(g, &["open page"])?;
    let task_id = ids[0];
    let assignee = stack.orchestrator.assign_by_capability(task_id, "browse")?;
    assert_eq!(assignee, worker.agent_id());

    // Planner delegates; worker drains its inbox, publishes a result and replies.
    let request = AgentMessage::to_agent(
        planner.agent_id(),
        worker.agent_id(),
        MessageKind::TaskDelegation,
        json!({ "task_id": task_id }),
    )
    .with_priority(MessagePriority::High);
    let request_id = request.message_id;
    stack.router.send(request)?;

    let inbox = stack.router.get_pending(worker.agent_id(), None)?;
    assert_eq!(inbox.len(), 1);
    let worker = worker.with_task(task_id);
    worker.set_task("result.title", json!("Getting started"))?;
    stack.orchestrator.update_task(
        task_id,
        TaskUpdate::new().with_status(GoalStatus::Completed),
    )?;
    stack.router.send(inbox[0].reply(worker.agent_id(), json!({ "ok": true })))?;

    let reply = stack
        .router
        .take_correlated(planner.agent_id(), request_id)?
        .map(|m| m.payload);
    assert_eq!(reply, Some(json!({ "ok": true })));

    let result = stack
        .context
        .require("result.title", ContextScope::Task(task_id))?;
    assert_eq!(result.agent_id, worker.agent_id());
    assert_eq!(stack.orchestrator.calculate_progress(g)?.percent_complete, 100.0);
    Ok(())
}

#[test]
fn shared_bus_carries_context_and_goal_events() -> ConcordResult<()> {
    let stack = fixtures::coordination_stack();
    let topics = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&topics);
    stack.bus.subscribe("**", move |topic: &str, _: &Event| -> Result<(), HandlerError> {
        if let Ok(mut topics) = sink.lock() {
            topics.push(topic.to_string());
        }
        Ok(())
    })?;

    let agent = stack.join("a", &[])?;
    agent.set_global("browser.url", json!("/"))?;
    let g = stack.orchestrator.create_goal(Goal::new("g"))?;
    stack.orchestrator.create_task(Task::new(g, "t"))?;

    let topics = topics.lock().map(|t| t.clone()).unwrap_or_default();
    assert_eq!(topics, vec!["browser.url", "goal.created", "task.created"]);
    Ok(())
}

#[test]
fn context_subscriber_drives_progress() -> ConcordResult<()> {
    let stack = fixtures::coordination_stack();
    let g = stack.orchestrator.create_goal(Goal::new("g"))?;
    let ids = stack.orchestrator.decompose_goal(g, &["a", "b"])?;

    // Writing "status.<task>" = "done" marks the task completed.
    let orch_stack = Arc::new(stack);
    let inner = Arc::clone(&orch_stack);
    orch_stack.context.subscribe("status.*", move |entry: &ContextEntry| {
        let Some(task_id) = entry
            .key
            .strip_prefix("status.")
            .and_then(|id| id.parse::<EntityId>().ok())
        else {
            return;
        };
        if entry.value == json!("done") {
            let _ = inner
                .orchestrator
                .update_task(task_id, TaskUpdate::new().with_status(GoalStatus::Completed));
        }
    })?;

    let worker = orch_stack.join("w", &[])?;
    worker.set_global(&format!("status.{}", ids[0]), json!("done"))?;
    worker.set_global(&format!("status.{}", ids[1]), json!("working"))?;

    let progress = orch_stack.orchestrator.calculate_progress(g)?;
    assert_eq!(progress.percent_complete, 50.0);
    assert_eq!(progress.goal_status, GoalStatus::InProgress);
    Ok(())
}

#[test]
fn version_checked_context_rejects_lost_update() -> ConcordResult<()> {
    let mut config = ConcordConfig::default();
    config.context.conflict_strategy = ConflictStrategy::VersionCheck;
    let stack = fixtures::coordination_stack_with(&config);
    let a = stack.join("a", &[])?;
    let b = stack.join("b", &[])?;

    let first = a.set_global("plan", json!(["step 1"]))?;
    let opts = WriteOptions::new().expect_version(first.version);
    stack
        .context
        .set_with("plan", json!(["step 1", "a"]), a.agent_id(), ContextScope::Global, opts.clone())?;
    let lost = stack
        .context
        .set_with("plan", json!(["step 1", "b"]), b.agent_id(), ContextScope::Global, opts);
    assertions::assert_context_error(&lost);
    assert_eq!(a.get_global("plan")?, Some(json!(["step 1", "a"])));
    Ok(())
}

#[test]
fn deregistered_agent_drops_out_of_assignment() -> ConcordResult<()> {
    let stack = fixtures::coordination_stack();
    let first = stack.join("first", &["code"])?;
    let second = stack.join("second", &["code"])?;
    stack.router.subscribe(first.agent_id(), &[MessageKind::Shutdown])?;
    stack.router.deregister(first.agent_id())?;
    assert_eq!(stack.router.pending_count(first.agent_id())?, 0);

    let g = stack.orchestrator.create_goal(Goal::new("g"))?;
    let t = stack.orchestrator.create_task(Task::new(g, "t"))?;
    assert_eq!(stack.orchestrator.assign_by_capability(t, "code")?, second.agent_id());
    assertions::assert_not_found(&stack.orchestrator.assign_task(t, first.agent_id()));
    assertions::assert_not_found(&stack.directory.deregister(first.agent_id()));
    assertions::assert_not_found(&stack.orchestrator.delete_goal(EntityId::nil()));
    Ok(())
}
