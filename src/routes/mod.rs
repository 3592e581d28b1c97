// HTTP routes over the staging service

mod auth;
mod http;

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::accessor::Accessor;
use crate::config::AppConfig;
use crate::staging::Service;

pub(crate) struct AppState<A> {
    pub(crate) service: Arc<Service<A>>,
}

impl<A> Clone for AppState<A> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

pub fn app<A: Accessor>(service: Arc<Service<A>>, config: &AppConfig) -> Router {
    let state = AppState { service };
    let auth = Arc::new(config.auth.clone());

    let protected = Router::new()
        .route(
            "/metric",
            post(http::post_metric::<A>).delete(http::delete_metric::<A>),
        ) // POST, DELETE /metric
        .route_layer(middleware::from_fn_with_state(auth, auth::basic_auth));

    Router::new()
        .route("/ping", get(|| async { "pong" })) // GET /ping
        .route("/version", get(http::version_handler)) // GET /version
        .route("/get-metrics-list", get(http::get_metrics_list::<A>)) // GET /get-metrics-list
        .route("/get-metric", post(http::get_metric::<A>)) // POST /get-metric
        .route("/get-metrics", post(http::get_metrics::<A>)) // POST /get-metrics
        .merge(protected)
        .layer(TimeoutLayer::new(config.server.request_timeout))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
