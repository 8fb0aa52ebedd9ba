use axum::{
    extract::{RawQuery, State},
    http::HeaderMap,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
    Extension, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::context::AppState;
use super::dispatcher::{dispatch, Call};
use super::endpoint::Endpoint;
use super::response::ApiResponse;
use crate::database::Transaction;
use crate::server::ConnectionInfo;

/// Router exposing every endpoint at `/<name>` for any HTTP method
pub fn router(state: Arc<AppState>, endpoints: Vec<Endpoint>) -> Router {
    let mut router = Router::new();

    for endpoint in endpoints {
        let path = endpoint.path();
        let endpoint = Arc::new(endpoint);
        router = router.route(
            &path,
            any(
                move |State(state): State<Arc<AppState>>,
                      connection: Option<Extension<ConnectionInfo>>,
                      transaction: Option<Extension<Transaction>>,
                      RawQuery(query): RawQuery,
                      headers: HeaderMap| {
                    let endpoint = endpoint.clone();
                    async move {
                        let call = Call {
                            headers,
                            raw_query: query.unwrap_or_default(),
                            connection: connection.map(|Extension(c)| c),
                            transaction: transaction.map(|Extension(t)| t),
                        };
                        dispatch(state, &endpoint, call).await
                    }
                },
            ),
        );
    }

    router
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Response for unknown paths
async fn not_found() -> Response {
    ApiResponse::failure(vec!["unknown api".to_string()], StatusCode::NOT_FOUND).into_response()
}
