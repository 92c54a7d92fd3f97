use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Call, Outcome};
use crate::worker::registry::{CallContext, FunctionRegistry};

/// Runs calls against a worker's function registry.
///
/// Every failure mode of a call ends up in the returned [`Outcome`]:
/// - unknown function name
/// - the handler returning `Err`
/// - the handler panicking
///
/// None of them propagate into the worker's poll loop.
#[derive(Debug, Clone)]
pub struct CallExecutor {
    registry: FunctionRegistry,
    running: Arc<AtomicUsize>,
}

/// Decrements the running count when the handler's thread is done with it,
/// whether it returned, panicked, or never started.
struct RunningGuard(Arc<AtomicUsize>);

impl RunningGuard {
    fn enter(running: &Arc<AtomicUsize>) -> Self {
        running.fetch_add(1, Ordering::SeqCst);
        Self(running.clone())
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CallExecutor {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self {
            registry,
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handlers currently occupying a blocking thread. Stays non-zero after
    /// the owning worker task is aborted until those handlers return.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Execute a call on a blocking thread and capture the result.
    ///
    /// `token` is handed to the handler through its [`CallContext`].
    pub async fn execute(&self, id: &str, call: &Call, token: &CancellationToken) -> Outcome {
        tracing::info!(id, name = call.name(), "Executing call");

        let Some(handler) = self.registry.resolve(call.name()) else {
            tracing::warn!(id, name = call.name(), "No handler registered");
            return Outcome::error(format!("unknown function: {}", call.name()));
        };

        let args = call.positional().to_vec();
        let kwargs = call.keywords().clone();
        let ctx = CallContext::new(id, token.clone());
        let guard = RunningGuard::enter(&self.running);
        let result = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            handler.call(&args, &kwargs, &ctx)
        })
        .await;

        Self::process_output(id, result)
    }

    fn process_output(id: &str, result: Result<Result<Value, String>, JoinError>) -> Outcome {
        match result {
            Ok(Ok(value)) => {
                tracing::info!(id, "Call completed");
                Outcome::Value { value }
            }
            Ok(Err(message)) => {
                tracing::info!(id, error = %message, "Call returned an error");
                Outcome::Error { message }
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                tracing::error!(id, panic = %message, "Call panicked");
                Outcome::error(format!("panicked: {message}"))
            }
            Err(e) => {
                tracing::error!(id, error = %e, "Call was cancelled");
                Outcome::error(format!("cancelled: {e}"))
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn executor() -> CallExecutor {
        let mut registry = FunctionRegistry::new();
        registry
            .register_fn("add", |args, _, _| {
                let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
                Ok(json!(sum))
            })
            .register_fn("greet", |_, kwargs, _| {
                let name = kwargs
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("world");
                Ok(json!(format!("hello {name}")))
            })
            .register_fn("fail", |_, _, _| Err("bad input".to_string()))
            .register_fn("explode", |_, _, _| panic!("kaboom"))
            .register_fn("wait", |_, kwargs, ctx| {
                let ms = kwargs.get("ms").and_then(Value::as_u64).unwrap_or(0);
                if ctx.sleep(Duration::from_millis(ms)) {
                    Ok(json!("finished"))
                } else {
                    Err(format!("{} cancelled", ctx.id()))
                }
            });
        CallExecutor::new(registry)
    }

    async fn run(call: &Call) -> Outcome {
        executor()
            .execute(&call.id(), call, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn execute_positional_args() {
        let call = Call::new("add").args([2, 3]);
        let outcome = run(&call).await;
        assert_eq!(outcome, Outcome::value(5));
    }

    #[tokio::test]
    async fn execute_keyword_args() {
        let call = Call::new("greet").kwarg("name", "swarm");
        let outcome = run(&call).await;
        assert_eq!(outcome, Outcome::value("hello swarm"));
    }

    #[tokio::test]
    async fn handler_error_is_captured() {
        let call = Call::new("fail");
        let outcome = run(&call).await;
        assert_eq!(outcome, Outcome::error("bad input"));
    }

    #[tokio::test]
    async fn panic_is_captured() {
        let call = Call::new("explode");
        match run(&call).await {
            Outcome::Error { message } => assert!(message.contains("kaboom")),
            other => panic!("expected error outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_function_is_captured() {
        let call = Call::new("nope");
        match run(&call).await {
            Outcome::Error { message } => assert!(message.contains("unknown function")),
            other => panic!("expected error outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn executor_survives_a_panicking_call() {
        let executor = executor();
        let bad = Call::new("explode");
        let token = CancellationToken::new();
        let _ = executor.execute(&bad.id(), &bad, &token).await;
        let good = Call::new("add").args([1, 1]);
        assert_eq!(
            executor.execute(&good.id(), &good, &token).await,
            Outcome::value(2)
        );
    }

    #[tokio::test]
    async fn cancellation_reaches_the_handler() {
        let executor = executor();
        let token = CancellationToken::new();
        let call = Call::new("wait").kwarg("ms", 10_000);
        let id = call.id();

        let task = {
            let executor = executor.clone();
            let token = token.clone();
            tokio::spawn(async move { executor.execute(&id, &call, &token).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(executor.running(), 1);

        token.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        match outcome {
            Outcome::Error { message } => assert!(message.ends_with("cancelled")),
            other => panic!("expected error outcome, got {other:?}"),
        }
        assert_eq!(executor.running(), 0);
    }

    #[tokio::test]
    async fn running_count_drops_after_panic() {
        let executor = executor();
        let call = Call::new("explode");
        executor
            .execute(&call.id(), &call, &CancellationToken::new())
            .await;
        assert_eq!(executor.running(), 0);
    }
}
