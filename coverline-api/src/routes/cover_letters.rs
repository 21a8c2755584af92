//! Cover Letter REST API Routes
//!
//! Every handler goes through [`Pipeline::handle`](crate::middleware::Pipeline::handle).
//! Reads are served read-through from the multi-level cache; writes update
//! the store, refresh the letter's cache entry and drop the owner's cached
//! list pages.

use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, Uri},
    routing::get,
    Router,
};
use coverline_cache::{CacheKey, CacheRead};
use coverline_core::{ActivityKind, ConfigError, RouteClass, UserActivityEvent};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{ApiResponse, MiddlewareContext, NoBody, PipelineRequest, RouteSpec};
use crate::state::AppState;
use crate::store::{CoverLetter, CoverLetterPage, PageQuery, StoreFetcher};
use crate::validation::RequestSchema;

const LETTER_RESOURCE: &str = "cover_letter";
const LIST_RESOURCE: &str = "cover_letter_list";

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

// ============================================================================
// TYPES
// ============================================================================

/// Body of `POST /api/v1/cover-letters`. An `id` updates an existing letter.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveCoverLetterRequest {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub company: Option<String>,
}

/// Query string of the list route.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ListParams {
    fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

/// JSON Schema for [`SaveCoverLetterRequest`].
pub fn save_letter_schema() -> Result<RequestSchema, ConfigError> {
    RequestSchema::new(
        "save_cover_letter",
        &json!({
            "type": "object",
            "required": ["title", "body"],
            "additionalProperties": false,
            "properties": {
                "id": { "type": "string", "format": "uuid" },
                "title": { "type": "string", "minLength": 1, "maxLength": 200 },
                "body": { "type": "string", "minLength": 1, "maxLength": 20000 },
                "company": { "type": ["string", "null"], "maxLength": 200 }
            }
        }),
    )
}

// ============================================================================
// CACHE KEYS
// ============================================================================

pub fn letter_key(user_id: Uuid, id: Uuid) -> CacheKey {
    CacheKey::builder(LETTER_RESOURCE, user_id).segment(id).build()
}

pub fn list_key(query: &PageQuery) -> CacheKey {
    CacheKey::builder(LIST_RESOURCE, query.user_id)
        .page(query.page)
        .segment(format_args!("s{}", query.page_size))
        .build()
}

async fn invalidate_lists(state: &AppState, user_id: Uuid) {
    let removed = state
        .cache
        .invalidate_prefix(&CacheKey::prefix_for(LIST_RESOURCE, user_id))
        .await;
    tracing::debug!(%user_id, removed, "Invalidated cached list pages");
}

fn parse_query(uri: &Uri) -> ApiResult<ListParams> {
    Query::<ListParams>::try_from_uri(uri)
        .map(|Query(params)| params)
        .map_err(|e| ApiError::validation_error(e.body_text()))
}

// ============================================================================
// HANDLER BODIES
// ============================================================================

async fn list_letters(
    state: &AppState,
    ctx: MiddlewareContext,
    params: ApiResult<ListParams>,
) -> ApiResult<CoverLetterPage> {
    let params = params?;
    let user = ctx.require_user()?;
    let query = PageQuery {
        user_id: user.user_id,
        page: params.page(),
        page_size: params.page_size(),
    };

    let fetcher = StoreFetcher::new(state.store.as_ref(), &ctx);
    let read: CacheRead<CoverLetterPage> = state
        .cache
        .get_or_fetch(&list_key(&query), state.letter_ttl, &fetcher, &query)
        .await?
        .ok_or_else(|| ApiError::internal_error("Store returned no page"))?;
    ctx.observe_cache_read(&read);
    Ok(read.into_value())
}

async fn get_letter(state: &AppState, ctx: MiddlewareContext, id: &str) -> ApiResult<CoverLetter> {
    let id = Uuid::parse_str(id)?;
    let user = ctx.require_user()?;

    let fetcher = StoreFetcher::new(state.store.as_ref(), &ctx);
    let read: Option<CacheRead<CoverLetter>> = state
        .cache
        .get_or_fetch(&letter_key(user.user_id, id), state.letter_ttl, &fetcher, &(user.user_id, id))
        .await?;

    match read {
        Some(read) => {
            ctx.observe_cache_read(&read);
            Ok(read.into_value())
        }
        None => {
            ctx.metrics().record_cache_hit(false);
            Err(ApiError::entity_not_found("Cover letter", id))
        }
    }
}

async fn save_letter(
    state: &AppState,
    ctx: MiddlewareContext,
    req: SaveCoverLetterRequest,
) -> ApiResult<CoverLetter> {
    let user = ctx.require_user()?;
    let now = state.clock.now();

    let existing = match req.id {
        Some(id) => Some(
            ctx.time_db(state.store.get(user.user_id, id))
                .await?
                .ok_or_else(|| ApiError::entity_not_found("Cover letter", id))?,
        ),
        None => None,
    };
    let kind = if existing.is_some() {
        ActivityKind::CoverLetterUpdated
    } else {
        ActivityKind::CoverLetterSaved
    };

    let letter = CoverLetter {
        id: req.id.unwrap_or_else(Uuid::now_v7),
        user_id: user.user_id,
        title: req.title.trim().to_string(),
        body: req.body,
        company: req.company.filter(|c| !c.trim().is_empty()),
        created_at: existing.map(|l| l.created_at).unwrap_or(now),
        updated_at: now,
    };
    let saved = ctx.time_db(state.store.save(letter)).await?;

    state
        .cache
        .set(&letter_key(saved.user_id, saved.id), &saved, state.letter_ttl)
        .await?;
    invalidate_lists(state, saved.user_id).await;

    state.recorder().record_user_activity(
        UserActivityEvent::new(saved.user_id, kind, now)
            .with_metadata(json!({ "letter_id": saved.id })),
    );
    tracing::info!(letter_id = %saved.id, user_id = %saved.user_id, "Cover letter saved");
    Ok(saved)
}

async fn delete_letter(state: &AppState, ctx: MiddlewareContext, id: &str) -> ApiResult<()> {
    let id = Uuid::parse_str(id)?;
    let user = ctx.require_user()?;

    if !ctx.time_db(state.store.delete(user.user_id, id)).await? {
        return Err(ApiError::entity_not_found("Cover letter", id));
    }
    state.cache.delete(&letter_key(user.user_id, id)).await;
    invalidate_lists(state, user.user_id).await;

    state.recorder().record_user_activity(
        UserActivityEvent::new(user.user_id, ActivityKind::CoverLetterDeleted, state.clock.now())
            .with_metadata(json!({ "letter_id": id })),
    );
    Ok(())
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /api/v1/cover-letters - List the caller's letters
pub async fn list_cover_letters(
    State(state): State<AppState>,
    uri: Uri,
    request: PipelineRequest,
) -> ApiResponse<CoverLetterPage> {
    let route = RouteSpec::new("/api/v1/cover-letters", RouteClass::General);
    let params = parse_query(&uri);
    state
        .pipeline
        .handle(&route, request, |ctx, _: NoBody| list_letters(&state, ctx, params))
        .await
}

/// GET /api/v1/cover-letters/:id - Fetch one letter
pub async fn get_cover_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: PipelineRequest,
) -> ApiResponse<CoverLetter> {
    let route = RouteSpec::new("/api/v1/cover-letters/{id}", RouteClass::General);
    state
        .pipeline
        .handle(&route, request, |ctx, _: NoBody| get_letter(&state, ctx, &id))
        .await
}

/// POST /api/v1/cover-letters - Create or update a letter
pub async fn save_cover_letter(
    State(state): State<AppState>,
    request: PipelineRequest,
) -> ApiResponse<CoverLetter> {
    let route = RouteSpec::new("/api/v1/cover-letters", RouteClass::Save)
        .schema(state.save_schema.clone())
        .status(StatusCode::CREATED);
    state
        .pipeline
        .handle(&route, request, |ctx, body: SaveCoverLetterRequest| {
            save_letter(&state, ctx, body)
        })
        .await
}

/// DELETE /api/v1/cover-letters/:id - Delete a letter
pub async fn delete_cover_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: PipelineRequest,
) -> ApiResponse<()> {
    let route = RouteSpec::new("/api/v1/cover-letters/{id}", RouteClass::Save)
        .status(StatusCode::NO_CONTENT);
    state
        .pipeline
        .handle(&route, request, |ctx, _: NoBody| delete_letter(&state, ctx, &id))
        .await
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_cover_letters).post(save_cover_letter))
        .route("/:id", get(get_cover_letter).delete(delete_cover_letter))
}
