//! Cover letter storage seam.
//!
//! Routes talk to a [`CoverLetterStore`]; the cache reaches it only through
//! [`StoreFetcher`], which also charges store time to the request.

use async_trait::async_trait;
use coverline_cache::ResourceFetcher;
use coverline_core::{CoverlineResult, Timestamp};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

use crate::middleware::MiddlewareContext;

// ============================================================================
// TYPES
// ============================================================================

/// A saved cover letter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverLetter {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// One page of a user's letters, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverLetterPage {
    pub items: Vec<CoverLetter>,
    pub page: u32,
    pub page_size: u32,
    pub total: usize,
}

/// Page request for [`CoverLetterStore::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub user_id: Uuid,
    pub page: u32,
    pub page_size: u32,
}

// ============================================================================
// STORE TRAIT
// ============================================================================

#[async_trait]
pub trait CoverLetterStore: Send + Sync + Debug {
    /// A letter owned by `user_id`. Letters of other users are absent.
    async fn get(&self, user_id: Uuid, id: Uuid) -> CoverlineResult<Option<CoverLetter>>;

    async fn list(&self, query: PageQuery) -> CoverlineResult<CoverLetterPage>;

    /// Insert or replace by id.
    async fn save(&self, letter: CoverLetter) -> CoverlineResult<CoverLetter>;

    /// Returns true if the letter existed and belonged to `user_id`.
    async fn delete(&self, user_id: Uuid, id: Uuid) -> CoverlineResult<bool>;
}

/// Process-local store used by the server binary and tests.
#[derive(Debug, Default)]
pub struct InMemoryCoverLetterStore {
    letters: DashMap<Uuid, CoverLetter>,
}

impl InMemoryCoverLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.letters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.letters.is_empty()
    }
}

#[async_trait]
impl CoverLetterStore for InMemoryCoverLetterStore {
    async fn get(&self, user_id: Uuid, id: Uuid) -> CoverlineResult<Option<CoverLetter>> {
        Ok(self
            .letters
            .get(&id)
            .filter(|letter| letter.user_id == user_id)
            .map(|letter| letter.clone()))
    }

    async fn list(&self, query: PageQuery) -> CoverlineResult<CoverLetterPage> {
        let mut owned: Vec<CoverLetter> = self
            .letters
            .iter()
            .filter(|entry| entry.user_id == query.user_id)
            .map(|entry| entry.value().clone())
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));

        let total = owned.len();
        let page_size = query.page_size.max(1) as usize;
        let offset = (query.page.saturating_sub(1) as usize).saturating_mul(page_size);
        let items = owned.into_iter().skip(offset).take(page_size).collect();

        Ok(CoverLetterPage {
            items,
            page: query.page,
            page_size: query.page_size,
            total,
        })
    }

    async fn save(&self, letter: CoverLetter) -> CoverlineResult<CoverLetter> {
        self.letters.insert(letter.id, letter.clone());
        Ok(letter)
    }

    async fn delete(&self, user_id: Uuid, id: Uuid) -> CoverlineResult<bool> {
        Ok(self
            .letters
            .remove_if(&id, |_, letter| letter.user_id == user_id)
            .is_some())
    }
}

// ============================================================================
// CACHE FETCHER
// ============================================================================

/// Read-through adapter from the cache to the store.
pub struct StoreFetcher<'a> {
    store: &'a dyn CoverLetterStore,
    ctx: &'a MiddlewareContext,
}

impl<'a> StoreFetcher<'a> {
    pub fn new(store: &'a dyn CoverLetterStore, ctx: &'a MiddlewareContext) -> Self {
        Self { store, ctx }
    }
}

#[async_trait]
impl ResourceFetcher<CoverLetter> for StoreFetcher<'_> {
    /// `(user_id, letter_id)`
    type Id = (Uuid, Uuid);

    async fn fetch(&self, id: &Self::Id) -> CoverlineResult<Option<CoverLetter>> {
        let (user_id, letter_id) = *id;
        self.ctx.time_db(self.store.get(user_id, letter_id)).await
    }
}

#[async_trait]
impl ResourceFetcher<CoverLetterPage> for StoreFetcher<'_> {
    type Id = PageQuery;

    async fn fetch(&self, id: &Self::Id) -> CoverlineResult<Option<CoverLetterPage>> {
        self.ctx.time_db(self.store.list(*id)).await.map(Some)
    }
}
