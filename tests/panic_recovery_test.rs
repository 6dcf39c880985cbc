//! Panic isolation: a panicking stage handler becomes a task failure and
//! the worker pool keeps serving.

mod common;

use common::{engine_builder, test_cred, wait_for_terminal, TestObject};
use serde_json::json;
use stagehand::{TaskRequest, TaskStore, TaskType, STAGE_COMPLETE, STAGE_FAILED};

#[tokio::test(flavor = "multi_thread")]
async fn handler_panic_becomes_a_stage_failure() {
    let (builder, _manager) = engine_builder();
    let engine = builder
        .register(TaskType::new("PanicTask").stage("on_init", |_task, _objects, _body| {
            Box::pin(async move { panic!("disk controller on fire") })
        }))
        .register(TaskType::new("NoopTask").stage("on_init", |task, _objects, _body| {
            Box::pin(async move {
                task.set_stage_complete(None).await?;
                Ok(())
            })
        }))
        .build()
        .unwrap();
    let store = engine.store();

    let guest = TestObject::new("g-1");
    let task = engine
        .new_task(&TaskRequest::new("PanicTask", test_cred()), &guest)
        .await
        .unwrap();
    engine.schedule_run(&task.id, json!({})).await.unwrap();
    assert_eq!(wait_for_terminal(&store, &task.id).await, STAGE_FAILED);

    let failed = store.get_task(&task.id).await.unwrap().unwrap();
    let reason = failed.params.failure_reason().unwrap();
    assert!(reason.contains("disk controller on fire"), "{reason}");

    // The pool survived the panic and serves the next task.
    let other = engine
        .new_task(
            &TaskRequest::new("NoopTask", test_cred()),
            &TestObject::new("g-2"),
        )
        .await
        .unwrap();
    engine.schedule_run(&other.id, json!({})).await.unwrap();
    assert_eq!(wait_for_terminal(&store, &other.id).await, STAGE_COMPLETE);
}

#[tokio::test(flavor = "multi_thread")]
async fn panic_in_the_failure_branch_cannot_loop() {
    let (builder, _manager) = engine_builder();
    let engine = builder
        .register(
            TaskType::new("DoublePanicTask")
                .stage("on_init", |_task, _objects, _body| {
                    Box::pin(async move { panic!("first explosion") })
                })
                .stage("on_init_failed", |_task, _objects, _body| {
                    Box::pin(async move { panic!("second explosion") })
                }),
        )
        .build()
        .unwrap();
    let store = engine.store();

    let guest = TestObject::new("g-1");
    let task = engine
        .new_task(&TaskRequest::new("DoublePanicTask", test_cred()), &guest)
        .await
        .unwrap();
    engine.schedule_run(&task.id, json!({})).await.unwrap();

    // Both panics recovered; the second one forces the terminal failure.
    assert_eq!(wait_for_terminal(&store, &task.id).await, STAGE_FAILED);
    let failed = store.get_task(&task.id).await.unwrap().unwrap();
    let reason = failed.params.failure_reason().unwrap();
    assert!(reason.contains("second explosion"), "{reason}");
}
