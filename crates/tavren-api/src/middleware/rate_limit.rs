//! Request-level rate limiting
//!
//! Applies the per-key fixed-window limiter to every request. All
//! responses carry `X-RateLimit-Remaining` and `X-RateLimit-Reset`;
//! denials return the 429 envelope with `Retry-After`. Keys derive from
//! the authenticated user when present, else from the client address
//! (first `X-Forwarded-For` token wins).

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    web, Error, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    rc::Rc,
};
use tracing::warn;

use crate::middleware::error_handler::ErrorResponse;
use crate::state::AppState;
use tavren_core::rate_limit::request_key;

/// Default request allowance per key per minute
const DEFAULT_LIMIT: u64 = 60;
const DEFAULT_WINDOW_SECONDS: u64 = 60;

pub struct RateLimit;

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct RateLimitMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        Box::pin(async move {
            let state = req.app_data::<web::Data<AppState>>().cloned();

            let decision = match &state {
                Some(state) => {
                    let forwarded = req
                        .headers()
                        .get("X-Forwarded-For")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    let peer = req.connection_info().peer_addr().map(String::from);
                    let key = request_key(
                        None,
                        forwarded.as_deref(),
                        peer.as_deref(),
                        req.path(),
                    );
                    Some(
                        state
                            .limiter
                            .allow(&key, DEFAULT_LIMIT, DEFAULT_WINDOW_SECONDS)
                            .await,
                    )
                }
                None => None,
            };

            if let Some(decision) = &decision {
                if !decision.allowed {
                    warn!(path = %req.path(), "Request rate limit exceeded");
                    let body = ErrorResponse {
                        error: "Too Many Requests".to_string(),
                        message: format!(
                            "Rate limit exceeded. Try again in {} seconds.",
                            decision.ttl_remaining
                        ),
                        error_code: "RATE_LIMITED".to_string(),
                        status_code: 429,
                        request_id: None,
                        timestamp: chrono::Utc::now(),
                    };
                    let response = HttpResponse::TooManyRequests()
                        .insert_header(("Retry-After", decision.ttl_remaining.to_string()))
                        .insert_header(("X-RateLimit-Remaining", "0"))
                        .insert_header((
                            "X-RateLimit-Reset",
                            decision.ttl_remaining.to_string(),
                        ))
                        .json(body);
                    return Ok(req.into_response(response).map_into_right_body());
                }
            }

            let mut res = service.call(req).await?.map_into_left_body();

            if let Some(decision) = decision {
                let remaining = DEFAULT_LIMIT.saturating_sub(decision.current);
                res.headers_mut().insert(
                    HeaderName::from_static("x-ratelimit-remaining"),
                    HeaderValue::from_str(&remaining.to_string())
                        .expect("number is a valid header value"),
                );
                res.headers_mut().insert(
                    HeaderName::from_static("x-ratelimit-reset"),
                    HeaderValue::from_str(&decision.ttl_remaining.to_string())
                        .expect("number is a valid header value"),
                );
            }

            Ok(res)
        })
    }
}
