use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

const CANCEL_POLL: Duration = Duration::from_millis(10);

/// What a running handler can ask about its own execution.
///
/// The token is the owning worker's control token, so it fires when the
/// engine stops. Handlers doing long work should check it and return early;
/// a handler that ignores it keeps its blocking thread until it returns.
#[derive(Debug, Clone)]
pub struct CallContext {
    id: String,
    token: CancellationToken,
}

impl CallContext {
    pub fn new(id: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            id: id.into(),
            token,
        }
    }

    /// A context that is never cancelled.
    pub fn detached(id: impl Into<String>) -> Self {
        Self::new(id, CancellationToken::new())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Block for `duration`, waking early on cancellation. Returns `false`
    /// if the call was cancelled before the time was up.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.token.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }
}

/// A function a worker can run by name.
///
/// Handlers run on a blocking thread, so they may do synchronous work.
/// Returning `Err` reports an execution error to the submitter.
pub trait Handler: Send + Sync + 'static {
    fn call(
        &self,
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
        ctx: &CallContext,
    ) -> Result<Value, String>;
}

impl<F> Handler for F
where
    F: Fn(&[Value], &BTreeMap<String, Value>, &CallContext) -> Result<Value, String>
        + Send
        + Sync
        + 'static,
{
    fn call(
        &self,
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
        ctx: &CallContext,
    ) -> Result<Value, String> {
        self(args, kwargs, ctx)
    }
}

/// Name → handler mapping handed to each worker at construction.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one under the same name.
    pub fn register<H: Handler>(&mut self, name: impl Into<String>, handler: H) -> &mut Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Register a plain closure.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value], &BTreeMap<String, Value>, &CallContext) -> Result<Value, String>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, f)
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> CallContext {
        CallContext::detached("test")
    }

    struct Constant(Value);

    impl Handler for Constant {
        fn call(
            &self,
            _: &[Value],
            _: &BTreeMap<String, Value>,
            _: &CallContext,
        ) -> Result<Value, String> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn resolves_registered_handlers() {
        let mut registry = FunctionRegistry::new();
        registry
            .register("answer", Constant(json!(42)))
            .register_fn("first", |args, _, _| {
                args.first().cloned().ok_or_else(|| "no args".to_string())
            });

        assert_eq!(registry.names(), vec!["answer", "first"]);
        let answer = registry.resolve("answer").unwrap();
        assert_eq!(answer.call(&[], &BTreeMap::new(), &ctx()), Ok(json!(42)));

        let first = registry.resolve("first").unwrap();
        assert_eq!(first.call(&[json!("a")], &BTreeMap::new(), &ctx()), Ok(json!("a")));
        assert!(first.call(&[], &BTreeMap::new(), &ctx()).is_err());
    }

    #[test]
    fn unknown_name_resolves_to_none() {
        let registry = FunctionRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn later_registration_wins() {
        let mut registry = FunctionRegistry::new();
        registry.register("v", Constant(json!(1)));
        registry.register("v", Constant(json!(2)));
        assert_eq!(registry.len(), 1);
        let handler = registry.resolve("v").unwrap();
        assert_eq!(handler.call(&[], &BTreeMap::new(), &ctx()), Ok(json!(2)));
    }

    #[test]
    fn context_sleep_completes_when_not_cancelled() {
        let ctx = ctx();
        assert_eq!(ctx.id(), "test");
        assert!(ctx.sleep(Duration::from_millis(20)));
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn context_sleep_wakes_on_cancel() {
        let token = CancellationToken::new();
        let ctx = CallContext::new("slow", token.clone());
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            token.cancel();
        });

        let start = Instant::now();
        assert!(!ctx.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(ctx.is_cancelled());
        canceller.join().unwrap();
    }
}
