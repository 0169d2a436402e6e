//! Activities that ship with the engine.

use std::time::Duration;

use async_trait::async_trait;

use crate::activity::Activity;
use crate::context::ActivityContext;
use crate::error::ActivityError;

/// Returns its input unchanged. Used for trigger nodes and dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughActivity;

#[async_trait]
impl Activity for PassthroughActivity {
  async fn execute(
    &self,
    input: serde_json::Value,
    _ctx: ActivityContext,
  ) -> Result<serde_json::Value, ActivityError> {
    Ok(input)
  }
}

/// Waits `data.ms` milliseconds, then passes its input through.
///
/// Returns early with a transient error when the execution is cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayActivity;

#[async_trait]
impl Activity for DelayActivity {
  async fn execute(
    &self,
    input: serde_json::Value,
    ctx: ActivityContext,
  ) -> Result<serde_json::Value, ActivityError> {
    let ms = ctx
      .data
      .get("ms")
      .and_then(|v| v.as_u64())
      .ok_or_else(|| ActivityError::invalid_input("delay requires a numeric `ms`"))?;

    ctx.logger().debug(&format!("sleeping for {}ms", ms));

    tokio::select! {
      _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(input),
      _ = ctx.cancel.cancelled() => Err(ActivityError::transient("delay interrupted")),
    }
  }
}
