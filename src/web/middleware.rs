//! Shared-secret bearer authentication for the tracking endpoint
//!
//! Requests without `Authorization: Bearer <analytics_secret>` are answered with a
//! 401 before the body is read. With no secret configured every request is refused.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::{
    net::SocketAddr,
    sync::Arc,
    task::{Context, Poll},
};
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::warn;

use super::error::ApiError;
use crate::privacy::extract_client_ip;

/// Layer for bearer-token authentication
#[derive(Clone)]
pub struct BearerAuthLayer {
    expected: Option<Arc<str>>,
}

impl BearerAuthLayer {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            expected: secret.map(Arc::from),
        }
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthMiddleware {
            inner,
            expected: self.expected.clone(),
        }
    }
}

/// Middleware service for bearer-token authentication
#[derive(Clone)]
pub struct BearerAuthMiddleware<S> {
    inner: S,
    expected: Option<Arc<str>>,
}

impl<S> Service<Request<Body>> for BearerAuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        match check_bearer(self.expected.as_deref(), request.headers()) {
            Ok(()) => Box::pin(self.inner.call(request)),
            Err(reason) => {
                let fallback_ip = request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let ip = extract_client_ip(request.headers()).unwrap_or(fallback_ip);
                warn!("Rejected tracking request from {}: {}", ip, reason);

                Box::pin(async { Ok(ApiError::Unauthorized.into_response()) })
            }
        }
    }
}

fn check_bearer(expected: Option<&str>, headers: &HeaderMap) -> Result<(), &'static str> {
    let expected = expected.ok_or("no analytics secret configured")?;
    let value = headers
        .get(AUTHORIZATION)
        .ok_or("missing authorization header")?
        .to_str()
        .map_err(|_| "unreadable authorization header")?;
    let token = value.strip_prefix("Bearer ").ok_or("authorization scheme is not Bearer")?;

    if !bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
        return Err("wrong secret");
    }
    Ok(())
}
