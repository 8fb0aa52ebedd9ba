use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use super::context::{ApiContext, AppState};
use super::endpoint::Endpoint;
use super::response::{ApiResponse, Status};
use crate::auth::{AccessLevel, Credentials};
use crate::database::Transaction;
use crate::params::bind;
use crate::server::ConnectionInfo;

/// One inbound call as seen by the dispatcher
pub struct Call {
    pub headers: HeaderMap,
    pub raw_query: String,
    pub connection: Option<ConnectionInfo>,
    /// Transaction already associated with the call, joined instead of started
    pub transaction: Option<Transaction>,
}

/// Run `endpoint` for one call: authorize, open or join the transaction, bind input,
/// run the handler, then commit or roll back.
pub async fn dispatch(state: Arc<AppState>, endpoint: &Endpoint, call: Call) -> Response {
    let started = Instant::now();
    let client_ip = call.connection.as_ref().map(|c| c.remote.ip());
    let certificates = call
        .connection
        .as_ref()
        .map(|c| c.certificates.clone())
        .unwrap_or_default();

    let decision = state
        .chain
        .authorize(
            endpoint.role,
            Credentials {
                headers: &call.headers,
                certificates: &certificates,
                client_ip,
            },
        )
        .await;

    let log = AccessLog {
        action: endpoint.path(),
        query: call.raw_query.clone(),
        client_ip,
        level: decision.level,
        role: endpoint.role.as_str(),
        subject: decision.subject.clone(),
        started,
        reverse_dns: state.reverse_dns,
    };

    if decision.is_denied() {
        log.emit(Status::Failure, &decision.message).await;
        return ApiResponse::unauthorized().into_response();
    }
    debug!("{}", decision.message);

    let tx = call
        .transaction
        .unwrap_or_else(|| Transaction::new(state.db.pool().clone()));
    let ownership = match tx.start().await {
        Ok(ownership) => ownership,
        Err(e) => {
            error!("Unable to start transaction: {}", e);
            log.emit(Status::Failure, "error starting database transaction").await;
            return ApiResponse::internal("error starting database transaction").into_response();
        }
    };

    let binding = bind(&call.raw_query, &endpoint.model);
    if binding.input.wants_help() {
        release(&tx, ownership).await;
        log.emit(Status::Success, "help").await;
        return ApiResponse::success(endpoint.model.help()).into_response();
    }
    if !binding.is_ok() {
        release(&tx, ownership).await;
        for e in &binding.errors {
            log.error(e);
        }
        log.emit(Status::Failure, "invalid parameters").await;
        return ApiResponse::from_errors(&binding.errors).into_response();
    }

    let ctx = ApiContext {
        action: endpoint.name.to_string(),
        tx: tx.clone(),
        role: endpoint.role,
        decision,
        client_ip,
        state: state.clone(),
    };

    match (endpoint.handler)(&ctx, binding.input).await {
        Ok(output) => {
            if let Err(e) = tx.commit(ownership).await {
                error!("Unable to commit transaction: {}", e);
                log.emit(Status::Failure, "commit failed").await;
                return ApiResponse::from_errors(&[e.into()]).into_response();
            }
            log.emit(Status::Success, "success").await;
            ApiResponse::success(output).into_response()
        }
        Err(errors) => {
            release(&tx, ownership).await;
            for e in &errors {
                log.error(e);
            }
            log.emit(Status::Failure, "failure").await;
            ApiResponse::from_errors(&errors).into_response()
        }
    }
}

async fn release(tx: &Transaction, ownership: crate::database::Ownership) {
    if let Err(e) = tx.rollback(ownership).await {
        error!("Unable to roll back transaction: {}", e);
    }
}

/// Fields of the per-call access record
struct AccessLog {
    action: String,
    query: String,
    client_ip: Option<IpAddr>,
    level: AccessLevel,
    role: &'static str,
    subject: Option<String>,
    started: Instant,
    reverse_dns: bool,
}

impl AccessLog {
    fn error(&self, err: &crate::error::ApiError) {
        error!(
            target: "ferry::access",
            action = %self.action,
            query = %self.query,
            client_ip = %self.client_ip.map(|ip| ip.to_string()).unwrap_or_default(),
            "{}", err
        );
    }

    async fn emit(&self, status: Status, message: &str) {
        let hostname = match (self.reverse_dns, self.client_ip) {
            (true, Some(ip)) => hostname(ip).await,
            _ => "unknown".to_string(),
        };
        let status = match status {
            Status::Success => "success",
            Status::Failure => "failure",
        };
        info!(
            target: "ferry::access",
            action = %self.action,
            query = %self.query,
            duration_ms = self.started.elapsed().as_millis() as u64,
            client_ip = %self.client_ip.map(|ip| ip.to_string()).unwrap_or_default(),
            hostname = %hostname,
            auth_level = %self.level,
            auth_role = %self.role,
            subject = %self.subject.as_deref().unwrap_or(""),
            status = %status,
            "{}", message
        );
    }
}

async fn hostname(ip: IpAddr) -> String {
    tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip))
        .await
        .ok()
        .and_then(Result::ok)
        .unwrap_or_else(|| "unknown".to_string())
}
