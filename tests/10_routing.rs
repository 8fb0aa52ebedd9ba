mod common;

use anyhow::Result;
use axum::http::StatusCode;

use common::{call, offline_app, READER, WRITER};

#[tokio::test]
async fn unknown_api_is_not_found() -> Result<()> {
    let app = offline_app()?;
    let reply = call(&app, "/noSuchThing", None).await?;

    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["status"], "failure");
    assert_eq!(reply.errors(), vec!["unknown api"]);
    Ok(())
}

#[tokio::test]
async fn anonymous_caller_is_rejected() -> Result<()> {
    let app = offline_app()?;
    let reply = call(&app, "/getAccessors", None).await?;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.errors(), vec!["client not authorized"]);
    assert!(reply.body["output"].is_null());
    Ok(())
}

#[tokio::test]
async fn invalid_token_is_rejected() -> Result<()> {
    let app = offline_app()?;
    let reply = call(&app, "/getAccessors", Some("bad")).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn unknown_subject_is_rejected() -> Result<()> {
    let app = offline_app()?;
    let reply = call(&app, "/getAccessors", Some("stranger")).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn read_accessor_cannot_write() -> Result<()> {
    let app = offline_app()?;
    let reply = call(&app, "/dropAccessor?accessor=someone", Some(READER)).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

// Authorization passes, then the unreachable database stops the call
#[tokio::test]
async fn unreachable_database_fails_the_call() -> Result<()> {
    let app = offline_app()?;

    let reply = call(&app, "/dropAccessor?accessor=someone", Some(WRITER)).await?;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.errors(), vec!["error starting database transaction"]);

    let reply = call(&app, "/ping", None).await?;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    Ok(())
}
