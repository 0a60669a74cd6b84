//! Request-context assembly for the HTTP boundary.
//!
//! The engine consumes a [`RequestContext`]: a session, an optional acting
//! user, and flat request parameters. At this boundary those come from the
//! `x-gantry-session` header (an opaque token naming a process-local
//! session), the `x-gantry-user` header (a user id resolved through the
//! store), and the request's query string.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex},
};

use axum::http::HeaderMap;

use gantry_core::{
  context::RequestContext,
  session::{MemorySession, Session},
  store::EntityStore,
};

use crate::error::ApiError;

pub const SESSION_HEADER: &str = "x-gantry-session";
pub const USER_HEADER: &str = "x-gantry-user";

/// Hands out the session behind a browser token. Sessions are
/// process-local and live for the process; a request without a token gets
/// a throwaway session, so listing state simply does not stick.
#[derive(Default)]
pub struct SessionManager {
  sessions: Mutex<HashMap<String, Arc<MemorySession>>>,
}

impl SessionManager {
  pub fn new() -> Self { Self::default() }

  pub fn session(&self, token: Option<&str>) -> Arc<dyn Session> {
    match token {
      Some(token) => self
        .sessions
        .lock()
        .unwrap()
        .entry(token.to_owned())
        .or_insert_with(|| Arc::new(MemorySession::new()))
        .clone(),
      None => Arc::new(MemorySession::new()),
    }
  }
}

/// Build the engine context for one request.
///
/// A present-but-unresolvable user header is a client error, never an
/// anonymous fallthrough.
pub async fn build_context<S: EntityStore>(
  store: &S,
  sessions: &SessionManager,
  headers: &HeaderMap,
  params: Vec<(String, String)>,
) -> Result<RequestContext, ApiError> {
  let token = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok());
  let mut ctx =
    RequestContext::new(sessions.session(token)).with_params(params);

  if let Some(raw) = headers.get(USER_HEADER) {
    let id: i64 = raw
      .to_str()
      .ok()
      .and_then(|s| s.parse().ok())
      .ok_or_else(|| {
        ApiError::BadRequest(format!("{USER_HEADER} must be a user id"))
      })?;
    let user = store.load_user(id).await.map_err(|e| match e {
      gantry_core::Error::NotFound { .. } => {
        ApiError::BadRequest(format!("no user with id {id}"))
      }
      other => other.into(),
    })?;
    ctx = ctx.with_user(user);
  }

  Ok(ctx)
}
