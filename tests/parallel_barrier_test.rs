//! Multi-object tasks and the parent/child completion barrier.

mod common;

use common::{engine_builder, test_cred, wait_for_stage, wait_for_terminal, TestObject};
use parking_lot::Mutex;
use serde_json::{json, Value};
use stagehand::{
    ArchivedTaskRecord, SubtaskStatus, TaskRequest, TaskStore, TaskType, MULTI_OBJECT_ID,
    STAGE_COMPLETE,
};
use std::sync::Arc;

fn child_task() -> TaskType {
    TaskType::new("ChildTask").stage("on_init", |task, _objects, _body| {
        Box::pin(async move {
            let mode = task
                .params()
                .get("mode")
                .and_then(Value::as_str)
                .unwrap_or("succ")
                .to_string();
            if mode == "fail" {
                task.set_stage_failed("child exploded").await?;
            } else {
                task.set_stage_complete(None).await?;
            }
            Ok(())
        })
    })
}

#[tokio::test]
async fn parallel_task_round_trips_member_objects_in_order() {
    let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_handler = seen.clone();

    let (builder, _manager) = engine_builder();
    let engine = builder
        .register(
            TaskType::new("BatchTask").stage("on_init", move |task, objects, _body| {
                let seen = seen_in_handler.clone();
                Box::pin(async move {
                    seen.lock()
                        .push(objects.iter().map(|o| o.id().to_string()).collect());
                    // The lifecycle API resolves the same member set.
                    let resolved = task.get_objects().await?;
                    seen.lock()
                        .push(resolved.iter().map(|o| o.id().to_string()).collect());
                    task.set_stage_complete(None).await?;
                    Ok(())
                })
            }),
        )
        .build()
        .unwrap();
    let store = engine.store();

    let targets = vec![
        TestObject::new("g-b"),
        TestObject::new("g-a"),
        TestObject::new("g-c"),
    ];
    let task = engine
        .new_parallel_task(&TaskRequest::new("BatchTask", test_cred()), &targets)
        .await
        .unwrap();
    assert_eq!(task.obj_id, MULTI_OBJECT_ID);

    // One task row, N member rows.
    let members = store.list_task_objects(&task.id).await.unwrap();
    assert_eq!(members.len(), 3);

    engine.schedule_run(&task.id, json!({})).await.unwrap();
    assert_eq!(wait_for_terminal(&store, &task.id).await, STAGE_COMPLETE);

    let expected = vec!["g-b".to_string(), "g-a".to_string(), "g-c".to_string()];
    let observed = seen.lock().clone();
    assert_eq!(observed, vec![expected.clone(), expected.clone()]);

    // The archive carries the full member set.
    let archived = ArchivedTaskRecord::list_recent(store.as_ref(), 10)
        .await
        .unwrap();
    assert_eq!(archived[0].obj_ids, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn parent_resumes_exactly_once_with_the_last_result() {
    let resumes: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let success_resumes = resumes.clone();
    let failure_resumes = resumes.clone();

    let (builder, _manager) = engine_builder();
    let engine = builder
        .register(child_task())
        .register(
            TaskType::new("FanOutTask")
                .stage("on_init", |task, _objects, _body| {
                    Box::pin(async move {
                        task.set_stage("await_children", None).await?;
                        let engine = task.engine();
                        for (i, mode) in ["succ", "succ", "fail"].iter().enumerate() {
                            let guest = TestObject::new(&format!("g-child-{i}"));
                            let request =
                                TaskRequest::new("ChildTask", task.user_cred())
                                    .with_parent(task.task_id())
                                    .with_param("mode", json!(mode));
                            engine.new_task(&request, &guest).await?;
                        }
                        Ok(())
                    })
                })
                .stage("await_children", move |task, _objects, body| {
                    let resumes = success_resumes.clone();
                    Box::pin(async move {
                        resumes.lock().push(("await_children".to_string(), body));
                        task.set_stage_complete(None).await?;
                        Ok(())
                    })
                })
                .stage("await_children_failed", move |task, _objects, body| {
                    let resumes = failure_resumes.clone();
                    Box::pin(async move {
                        resumes
                            .lock()
                            .push(("await_children_failed".to_string(), body));
                        task.set_stage_complete(None).await?;
                        Ok(())
                    })
                }),
        )
        .build()
        .unwrap();
    let store = engine.store();

    let guest = TestObject::new("g-parent");
    let parent = engine
        .new_task(&TaskRequest::new("FanOutTask", test_cred()), &guest)
        .await
        .unwrap();
    engine.schedule_run(&parent.id, json!({})).await.unwrap();
    wait_for_stage(&store, &parent.id, "await_children").await;

    // The handler spawns the children after the stage transition; wait
    // for all three rows.
    let mut subtasks = Vec::new();
    for _ in 0..200 {
        subtasks = store
            .list_subtasks(&parent.id, "await_children")
            .await
            .unwrap();
        if subtasks.len() == 3 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(subtasks.len(), 3);
    assert!(subtasks.iter().all(|s| s.status == SubtaskStatus::Init));

    // Finish the two succeeding children first, the failing one last, so
    // the resuming payload is deterministic.
    let mut failing_child = None;
    for sub in &subtasks {
        let child = store.get_task(&sub.subtask_id).await.unwrap().unwrap();
        let mode = child.params.data["mode"].as_str().unwrap().to_string();
        if mode == "fail" {
            failing_child = Some(sub.subtask_id.clone());
            continue;
        }
        engine.schedule_run(&sub.subtask_id, json!({})).await.unwrap();
        wait_for_terminal(&store, &sub.subtask_id).await;
    }

    // Two of three done: the parent must still be parked.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(resumes.lock().is_empty());
    assert_eq!(
        store.get_task(&parent.id).await.unwrap().unwrap().stage,
        "await_children"
    );

    let failing_child = failing_child.expect("one child runs in fail mode");
    engine.schedule_run(&failing_child, json!({})).await.unwrap();
    assert_eq!(wait_for_terminal(&store, &parent.id).await, STAGE_COMPLETE);

    // Exactly one resume, through the failure branch, carrying the
    // failing child's result.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let observed = resumes.lock().clone();
    assert_eq!(observed.len(), 1, "{observed:?}");
    let (branch, body) = &observed[0];
    assert_eq!(branch, "await_children_failed");
    assert!(body["__reason__"]
        .as_str()
        .unwrap()
        .contains("child exploded"));

    // Archive counters reflect the child outcomes.
    let archived = ArchivedTaskRecord::list_recent(store.as_ref(), 10)
        .await
        .unwrap();
    let parent_row = archived.iter().find(|a| a.id == parent.id).unwrap();
    assert_eq!(parent_row.succ_subtasks, 2);
    assert_eq!(parent_row.fail_subtasks, 1);
}
