use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::context::ActivityContext;
use crate::error::{ActivityError, ErrorClass};

/// The implementation of a node type.
///
/// Activities may be invoked more than once for the same node (retries, and
/// re-dispatch after an owner crash), so side effects should be idempotent.
#[async_trait]
pub trait Activity: Send + Sync {
  /// Run one attempt.
  async fn execute(
    &self,
    input: serde_json::Value,
    ctx: ActivityContext,
  ) -> Result<serde_json::Value, ActivityError>;

  /// Decide whether `error` may be retried. Override for service specific rules.
  fn classify(&self, error: &ActivityError) -> ErrorClass {
    error.class()
  }
}

/// An Activity backed by an async closure.
pub struct FnActivity<F, Fut> {
  f: F,
  _fut: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as an [`Activity`].
pub fn activity_fn<F, Fut>(f: F) -> FnActivity<F, Fut>
where
  F: Fn(serde_json::Value, ActivityContext) -> Fut + Send + Sync,
  Fut: Future<Output = Result<serde_json::Value, ActivityError>> + Send,
{
  FnActivity {
    f,
    _fut: PhantomData,
  }
}

#[async_trait]
impl<F, Fut> Activity for FnActivity<F, Fut>
where
  F: Fn(serde_json::Value, ActivityContext) -> Fut + Send + Sync,
  Fut: Future<Output = Result<serde_json::Value, ActivityError>> + Send,
{
  async fn execute(
    &self,
    input: serde_json::Value,
    ctx: ActivityContext,
  ) -> Result<serde_json::Value, ActivityError> {
    (self.f)(input, ctx).await
  }
}
