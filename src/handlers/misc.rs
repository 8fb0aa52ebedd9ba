use futures::future::{BoxFuture, FutureExt};
use serde_json::json;

use crate::api::{ApiContext, HandlerResult};
use crate::params::Input;

/// Liveness probe reporting the server's role and build version
pub fn ping(ctx: &ApiContext, _input: Input) -> BoxFuture<'_, HandlerResult> {
    async move {
        Ok(json!({
            "message": "pong",
            "role": ctx.state.server_role,
            "version": env!("CARGO_PKG_VERSION"),
        }))
    }
    .boxed()
}
