//! # Object Manager Registry
//!
//! The engine never instantiates business objects itself; it resolves a
//! task's target through the manager registered for the object's type
//! keyword. Managers are collaborators owned by the hosting process and
//! registered at start-up alongside task types.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// A business object a task operates on.
pub trait ResourceObject: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    /// Type keyword used to locate the owning [`ObjectManager`].
    fn keyword(&self) -> &'static str;
}

/// Fetches business objects of one type keyword by id.
#[async_trait]
pub trait ObjectManager: Send + Sync {
    fn keyword(&self) -> &'static str;

    async fn fetch(&self, id: &str) -> anyhow::Result<Arc<dyn ResourceObject>>;

    /// Batch fetch preserving input order. The default fetches one by one;
    /// managers backed by a batch-capable source should override.
    async fn fetch_batch(&self, ids: &[String]) -> anyhow::Result<Vec<Arc<dyn ResourceObject>>> {
        let mut objs = Vec::with_capacity(ids.len());
        for id in ids {
            objs.push(self.fetch(id).await?);
        }
        Ok(objs)
    }
}

/// Keyword-keyed table of object managers.
#[derive(Default)]
pub struct ObjectRegistry {
    managers: DashMap<String, Arc<dyn ObjectManager>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager. Panics on a duplicate keyword; like task-type
    /// registration this is a programmer error.
    pub fn register(&self, manager: Arc<dyn ObjectManager>) {
        let keyword = manager.keyword().to_string();
        if self.managers.insert(keyword.clone(), manager).is_some() {
            panic!("object manager for keyword {keyword} registered twice");
        }
    }

    pub fn resolve(&self, keyword: &str) -> Option<Arc<dyn ObjectManager>> {
        self.managers.get(keyword).map(|m| m.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticObject {
        id: String,
    }

    impl ResourceObject for StaticObject {
        fn id(&self) -> &str {
            &self.id
        }
        fn name(&self) -> &str {
            "static"
        }
        fn keyword(&self) -> &'static str {
            "static"
        }
    }

    struct StaticManager;

    #[async_trait]
    impl ObjectManager for StaticManager {
        fn keyword(&self) -> &'static str {
            "static"
        }

        async fn fetch(&self, id: &str) -> anyhow::Result<Arc<dyn ResourceObject>> {
            Ok(Arc::new(StaticObject { id: id.to_string() }))
        }
    }

    #[tokio::test]
    async fn resolve_and_batch_fetch() {
        let registry = ObjectRegistry::new();
        registry.register(Arc::new(StaticManager));
        assert!(registry.resolve("missing").is_none());

        let manager = registry.resolve("static").unwrap();
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let objs = manager.fetch_batch(&ids).await.unwrap();
        let got: Vec<&str> = objs.iter().map(|o| o.id()).collect();
        assert_eq!(got, vec!["a", "b", "c"]);
    }
}
