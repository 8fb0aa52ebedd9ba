// Composite operations built from other handlers. Sub-handlers share the
// caller's context, so everything lands in one transaction.
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value as JsonValue;

use super::accessors::create_accessor;
use crate::api::{ApiContext, HandlerResult};
use crate::auth::AccessorKind;
use crate::params::{Attribute, Input, NullableValue};

/// Register a host by address and certificate DN in one step
pub fn add_host_accessors(ctx: &ApiContext, input: Input) -> BoxFuture<'_, HandlerResult> {
    async move {
        let dn = input.get(Attribute::Dn);
        let hosts = [
            (input.get(Attribute::Accessor), AccessorKind::IpRole),
            (NullableValue::of(Attribute::Accessor, dn.as_str()), AccessorKind::DnRole),
        ];

        for (accessor, kind) in hosts {
            let sub = Input::new()
                .with(accessor)
                .with(NullableValue::of(Attribute::AccessorType, kind.as_str()))
                .with(input.get(Attribute::Write))
                .with(input.get(Attribute::Comments));
            create_accessor(ctx, sub).await?;
        }
        Ok(JsonValue::Null)
    }
    .boxed()
}
