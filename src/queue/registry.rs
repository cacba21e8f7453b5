//! Task type to handler mapping.
//!
//! Handlers are registered at startup, usually by the module that owns the
//! task type, and looked up by the engine for every claimed task. The most
//! recent registration for a type wins.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use super::task::Task;

/// Result of one handler invocation. Any error counts as a failed attempt.
pub type HandlerResult = anyhow::Result<()>;

/// Processes tasks of one type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> HandlerResult;
}

/// Adapts an async closure into a [`TaskHandler`].
struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, task: &Task) -> HandlerResult {
        (self.f)(task.clone()).await
    }
}

/// Registry of task handlers.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry shared by code that has no engine at hand.
    pub fn global() -> Arc<TaskRegistry> {
        static GLOBAL: OnceLock<Arc<TaskRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(TaskRegistry::new()))
            .clone()
    }

    /// Registers `handler` for `task_type`, replacing any previous handler.
    pub fn register(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        let replaced = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(task_type.clone(), handler)
            .is_some();

        if replaced {
            debug!(task_type = %task_type, "Replaced task handler");
        } else {
            info!(task_type = %task_type, "Registered task handler");
        }
    }

    /// Registers an async closure as the handler for `task_type`.
    pub fn register_fn<F, Fut>(&self, task_type: impl Into<String>, f: F)
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(task_type, Arc::new(FnHandler { f }));
    }

    /// The handler registered for `task_type`, if any.
    pub fn lookup(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(task_type)
            .cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.lookup(task_type).is_some()
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TaskHandler for Counting {
        async fn handle(&self, _task: &Task) -> HandlerResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = TaskRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register(
            "Count",
            Arc::new(Counting {
                calls: calls.clone(),
            }),
        );

        let handler = registry.lookup("Count").unwrap();
        handler.handle(&Task::new("Count")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.lookup("Missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_register_fn() {
        let registry = TaskRegistry::new();
        registry.register_fn("Fail", |task| async move {
            Err(anyhow::anyhow!("cannot handle {}", task.task_type()))
        });

        let err = registry
            .lookup("Fail")
            .unwrap()
            .handle(&Task::new("Fail"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot handle Fail"));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = TaskRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        registry.register("T", Arc::new(Counting { calls: first.clone() }));
        registry.register("T", Arc::new(Counting { calls: second.clone() }));

        registry
            .lookup("T")
            .unwrap()
            .handle(&Task::new("T"))
            .await
            .unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_task_types_sorted() {
        let registry = TaskRegistry::new();
        assert!(registry.is_empty());
        registry.register_fn("B", |_| async { Ok(()) });
        registry.register_fn("A", |_| async { Ok(()) });
        assert_eq!(registry.task_types(), vec!["A", "B"]);
        assert!(registry.contains("A"));
    }

    #[test]
    fn test_global_registry_is_shared() {
        let a = TaskRegistry::global();
        let b = TaskRegistry::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
