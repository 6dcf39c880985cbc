//! Shared fixtures for integration tests: a scripted object manager, an
//! engine builder and polling helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use stagehand::{
    ObjectManager, ResourceObject, TaskEngine, TaskEngineBuilder, TaskStore, UserCred,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Test stand-in for a managed resource.
pub struct TestObject {
    pub id: String,
    pub name: String,
}

impl TestObject {
    pub fn new(id: &str) -> Arc<dyn ResourceObject> {
        Arc::new(Self {
            id: id.to_string(),
            name: format!("vm-{id}"),
        })
    }
}

impl ResourceObject for TestObject {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn keyword(&self) -> &'static str {
        "guest"
    }
}

/// Manager that materializes guests on demand; ids added to the failing
/// set make fetches error, simulating an unresolvable target.
#[derive(Default)]
pub struct TestObjectManager {
    failing: Mutex<HashSet<String>>,
}

impl TestObjectManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_fetches_of(&self, id: &str) {
        self.failing.lock().insert(id.to_string());
    }
}

#[async_trait]
impl ObjectManager for TestObjectManager {
    fn keyword(&self) -> &'static str {
        "guest"
    }

    async fn fetch(&self, id: &str) -> anyhow::Result<Arc<dyn ResourceObject>> {
        if self.failing.lock().contains(id) {
            anyhow::bail!("guest {id} is gone");
        }
        Ok(TestObject::new(id))
    }
}

/// Engine builder preloaded with the test object manager.
pub fn engine_builder() -> (TaskEngineBuilder, Arc<TestObjectManager>) {
    let manager = TestObjectManager::new();
    let builder = TaskEngine::builder().object_manager(manager.clone());
    (builder, manager)
}

pub fn test_cred() -> UserCred {
    UserCred {
        user: "tester".to_string(),
        project_id: "project-1".to_string(),
        domain_id: "domain-1".to_string(),
    }
}

/// Poll until the task reaches `stage` or the timeout trips.
pub async fn wait_for_stage(store: &Arc<dyn TaskStore>, task_id: &str, stage: &str) {
    for _ in 0..500 {
        let task = store
            .get_task(task_id)
            .await
            .expect("store read")
            .expect("task exists");
        if task.stage == stage {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached stage {stage}");
}

/// Poll until the task reaches `complete` or `failed`.
pub async fn wait_for_terminal(store: &Arc<dyn TaskStore>, task_id: &str) -> String {
    for _ in 0..500 {
        let task = store
            .get_task(task_id)
            .await
            .expect("store read")
            .expect("task exists");
        if task.is_terminal() {
            return task.stage;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached a terminal stage");
}
