use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use pageviews_api_types::{
    FeaturedItem, FeaturedResponse, RecordViewResponse, ViewCount, ViewCountsResponse,
};
use serde::Deserialize;
use tracing::debug;

use crate::application::identity::StoredIdentity;
use crate::domain::keys::validate_slug;

use super::HttpState;
use super::cookies::CookieStorage;
use super::error::ApiError;

/// Upper bound on slugs per listing request.
pub const MAX_SLUGS_PER_REQUEST: usize = 500;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListingQuery {
    /// Comma-separated slugs.
    pub slugs: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeaturedQuery {
    /// Comma-separated slugs competing for the featured slots.
    pub slugs: Option<String>,
    /// Falls back to `featured.limit`.
    pub limit: Option<usize>,
}

pub async fn get_view_count(
    State(state): State<HttpState>,
    Path((category, slug)): Path<(String, String)>,
) -> Result<Json<ViewCount>, ApiError> {
    let views = state.content_types.get(&category)?;
    validate_slug(&slug)?;

    let count = views.get_count(&slug).await;
    Ok(Json(ViewCount { slug, views: count }))
}

pub async fn list_view_counts(
    State(state): State<HttpState>,
    Path(category): Path<String>,
    Query(query): Query<ListingQuery>,
) -> Result<Json<ViewCountsResponse>, ApiError> {
    let views = state.content_types.get(&category)?;
    let slugs = parse_slug_list(query.slugs.as_deref())?;

    let counts = views.get_counts(&slugs).await;
    Ok(Json(ViewCountsResponse {
        category,
        counts: counts
            .into_iter()
            .map(|(slug, views)| ViewCount { slug, views })
            .collect(),
    }))
}

pub async fn featured(
    State(state): State<HttpState>,
    Path(category): Path<String>,
    Query(query): Query<FeaturedQuery>,
) -> Result<Json<FeaturedResponse>, ApiError> {
    let views = state.content_types.get(&category)?;
    let slugs = parse_slug_list(query.slugs.as_deref())?;
    let limit = query
        .limit
        .unwrap_or(state.featured.limit)
        .min(MAX_SLUGS_PER_REQUEST);

    let items = views
        .featured(&slugs, &state.featured.pinned, limit)
        .await
        .into_iter()
        .map(|item| FeaturedItem {
            slug: item.slug,
            views: item.views,
            pinned: item.pinned,
        })
        .collect();

    Ok(Json(FeaturedResponse { category, items }))
}

/// Accept a view event. The count is written in the background; the
/// response only confirms the event was queued.
pub async fn record_view(
    State(state): State<HttpState>,
    Path((category, slug)): Path<(String, String)>,
    jar: CookieJar,
) -> Result<(StatusCode, CookieJar, Json<RecordViewResponse>), ApiError> {
    let views = state.content_types.get(&category)?;

    let identity = StoredIdentity::new(CookieStorage::from_jar(&jar, &state.visitor_cookie));
    // Dropping the handle detaches the task.
    let _pending = views.record_view(&slug, &identity)?;
    debug!(
        target: "pageviews::http::views",
        category = %category,
        slug = %slug,
        "Queued view"
    );

    let jar = identity.into_storage().apply(jar);
    Ok((
        StatusCode::ACCEPTED,
        jar,
        Json(RecordViewResponse {
            slug,
            recorded: true,
        }),
    ))
}

pub async fn store_health(State(state): State<HttpState>) -> Response {
    match state.store.ping().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => ApiError::store_unavailable(&err).into_response(),
    }
}

/// Split a comma-separated slug list. Blank entries are skipped; any
/// invalid slug fails the whole request.
fn parse_slug_list(raw: Option<&str>) -> Result<Vec<String>, ApiError> {
    let slugs: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|slug| !slug.is_empty())
        .map(str::to_string)
        .collect();

    if slugs.len() > MAX_SLUGS_PER_REQUEST {
        return Err(ApiError::bad_request(
            "Too many slugs",
            Some(format!(
                "at most {MAX_SLUGS_PER_REQUEST} slugs per request, got {}",
                slugs.len()
            )),
        ));
    }
    for slug in &slugs {
        validate_slug(slug)?;
    }
    Ok(slugs)
}
