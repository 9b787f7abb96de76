//! HTTP surface over the view counters.

mod cookies;
mod error;
mod middleware;
mod views;

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware, routing::get};

pub use cookies::{CookieStorage, VisitorCookie};
pub use error::{ApiError, codes};
pub use views::MAX_SLUGS_PER_REQUEST;

use crate::application::store::KeyValueStore;
use crate::application::views::ContentTypes;
use crate::config::{FeaturedSettings, Settings};

use middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub content_types: Arc<ContentTypes>,
    pub store: Arc<dyn KeyValueStore>,
    pub visitor_cookie: VisitorCookie,
    pub featured: Arc<FeaturedSettings>,
}

impl HttpState {
    pub fn new(
        content_types: Arc<ContentTypes>,
        store: Arc<dyn KeyValueStore>,
        settings: &Settings,
    ) -> Self {
        Self {
            content_types,
            store,
            visitor_cookie: VisitorCookie::from(&settings.identity),
            featured: Arc::new(settings.featured.clone()),
        }
    }
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/api/{category}/views", get(views::list_view_counts))
        .route(
            "/api/{category}/views/{slug}",
            get(views::get_view_count).post(views::record_view),
        )
        .route("/api/{category}/featured", get(views::featured))
        .route("/_health/store", get(views::store_health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
