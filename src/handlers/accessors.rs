// Accessor administration: list, create, update and drop the rows the
// authorization chain resolves callers against.
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Map, Value as JsonValue};
use sqlx::postgres::PgRow;
use std::net::IpAddr;

use crate::api::{ApiContext, HandlerResult};
use crate::auth::accessor::UnknownAccessorKind;
use crate::auth::AccessorKind;
use crate::error::ApiError;
use crate::params::{Attribute, Input, NullableValue};

const SELECT_ACCESSORS: &str = "SELECT name, type, write, active, username, comments, last_used \
     FROM accessors WHERE ($1::text IS NULL OR type = $1) ORDER BY name";

/// All accessors, optionally restricted to one `accessortype`
pub fn get_accessors(ctx: &ApiContext, input: Input) -> BoxFuture<'_, HandlerResult> {
    async move {
        let kind = input.get(Attribute::AccessorType);
        if let Some(name) = kind.as_str() {
            parse_kind(name)?;
        }

        let rows = ctx
            .tx
            .fetch_all(sqlx::query(SELECT_ACCESSORS).bind(kind))
            .await
            .map_err(|e| vec![e.into()])?;

        let accessors = rows
            .iter()
            .map(accessor_json)
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| vec![e.into()])?;
        Ok(JsonValue::Array(accessors))
    }
    .boxed()
}

fn accessor_json(row: &PgRow) -> Result<JsonValue, sqlx::Error> {
    let columns = [
        ("name", Attribute::Accessor),
        ("type", Attribute::AccessorType),
        ("write", Attribute::Write),
        ("active", Attribute::Status),
        ("username", Attribute::UserName),
        ("comments", Attribute::Comments),
        ("last_used", Attribute::LastUpdated),
    ];

    let mut out = Map::new();
    for (column, attribute) in columns {
        let value = NullableValue::from_row(row, column, attribute)?;
        let value = match attribute {
            Attribute::Comments => value.coalesce(""),
            _ => value.value().clone(),
        };
        out.insert(attribute.as_str().to_string(), json!(value));
    }
    Ok(JsonValue::Object(out))
}

/// Register a new accessor. Address accessors must name an IP address and
/// certificate accessors a slash-separated DN.
pub fn create_accessor(ctx: &ApiContext, input: Input) -> BoxFuture<'_, HandlerResult> {
    async move {
        let kind = parse_kind(input.get(Attribute::AccessorType).as_str().unwrap_or_default())?;
        let name = check_name(kind, input.get(Attribute::Accessor).as_str().unwrap_or_default())?;

        let write = input.get(Attribute::Write);
        if write.is_null() {
            return Err(vec![ApiError::invalid(Attribute::Write)]);
        }

        ctx.tx
            .execute(
                sqlx::query(
                    "INSERT INTO accessors (name, type, write, active, username, comments) \
                     VALUES ($1, $2, $3, true, $4, $5)",
                )
                .bind(name.clone())
                .bind(kind.as_str())
                .bind(write.with_default(false))
                .bind(input.get(Attribute::UserName))
                .bind(input.get(Attribute::Comments)),
            )
            .await
            .map_err(|e| vec![ApiError::from_transaction(e, Attribute::Accessor)])?;

        tracing::info!(accessor = %name, kind = %kind, "accessor created");
        invalidate_after_commit(ctx, name).await;
        Ok(JsonValue::Null)
    }
    .boxed()
}

/// Change `write`, `status` or `comments` of an accessor. Parameters left out keep
/// their stored value; `comments=null` clears the comments.
pub fn set_accessor_info(ctx: &ApiContext, input: Input) -> BoxFuture<'_, HandlerResult> {
    async move {
        let name = stored_name(input.get(Attribute::Accessor).as_str().unwrap_or_default());
        let write = input.get(Attribute::Write);
        let status = input.get(Attribute::Status);
        let comments = input.get(Attribute::Comments);

        let mut errors = Vec::new();
        for value in [&write, &status] {
            if value.is_null() {
                errors.push(ApiError::invalid(value.attribute()));
            }
        }
        if write.is_absent() && status.is_absent() && comments.is_absent() {
            errors.push(ApiError::requirement(
                "at least one of write, status or comments must be provided",
            ));
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let row = ctx
            .tx
            .fetch_optional(
                sqlx::query("SELECT accid, write, active, comments FROM accessors WHERE name = $1 FOR UPDATE")
                    .bind(name.clone()),
            )
            .await
            .map_err(|e| vec![e.into()])?
            .ok_or_else(|| vec![ApiError::not_found(Attribute::Accessor)])?;

        let current = |column: &str, attribute| {
            NullableValue::from_row(&row, column, attribute).map_err(|e| vec![ApiError::from(e)])
        };
        let accid: i64 = sqlx::Row::try_get(&row, "accid").map_err(|e| vec![e.into()])?;
        let current_write = current("write", Attribute::Write)?;
        let current_status = current("active", Attribute::Status)?;
        let current_comments = current("comments", Attribute::Comments)?;

        ctx.tx
            .execute(
                sqlx::query("UPDATE accessors SET write = $2, active = $3, comments = $4 WHERE accid = $1")
                    .bind(accid)
                    .bind(write.with_default(current_write.as_bool()))
                    .bind(status.with_default(current_status.as_bool()))
                    .bind(comments.with_default(current_comments.as_str())),
            )
            .await
            .map_err(|e| vec![e.into()])?;

        invalidate_after_commit(ctx, name).await;
        Ok(JsonValue::Null)
    }
    .boxed()
}

/// Delete an accessor by name
pub fn drop_accessor(ctx: &ApiContext, input: Input) -> BoxFuture<'_, HandlerResult> {
    async move {
        let name = stored_name(input.get(Attribute::Accessor).as_str().unwrap_or_default());

        let result = ctx
            .tx
            .execute(sqlx::query("DELETE FROM accessors WHERE name = $1").bind(name.clone()))
            .await
            .map_err(|e| vec![e.into()])?;
        if result.rows_affected() == 0 {
            return Err(vec![ApiError::not_found(Attribute::Accessor)]);
        }

        tracing::info!(accessor = %name, "accessor dropped");
        invalidate_after_commit(ctx, name).await;
        Ok(JsonValue::Null)
    }
    .boxed()
}

fn parse_kind(name: &str) -> Result<AccessorKind, Vec<ApiError>> {
    name.parse()
        .map_err(|e: UnknownAccessorKind| vec![ApiError::invalid_data(e.to_string())])
}

/// Name as stored, after checking it fits `kind`. Addresses are stored in canonical
/// form, the form callers are looked up by.
fn check_name(kind: AccessorKind, name: &str) -> Result<String, Vec<ApiError>> {
    let invalid = || vec![ApiError::invalid(Attribute::Accessor)];
    match kind {
        AccessorKind::IpRole | AccessorKind::IpWhitelist => {
            name.parse::<IpAddr>().map(|ip| ip.to_string()).map_err(|_| invalid())
        }
        AccessorKind::DnRole | AccessorKind::DnWhitelist if name.starts_with('/') && name.contains('=') => {
            Ok(name.to_string())
        }
        AccessorKind::JwtRole if !name.is_empty() => Ok(name.to_string()),
        _ => Err(invalid()),
    }
}

fn stored_name(name: &str) -> String {
    name.parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| name.to_string())
}

/// Drop cached entries for `name` once the change is committed
async fn invalidate_after_commit(ctx: &ApiContext, name: String) {
    let resolver = ctx.state.chain.resolver().clone();
    ctx.tx.on_commit(move || resolver.invalidate(&name)).await;
}
