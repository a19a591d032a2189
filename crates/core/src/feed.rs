//! Paginated listing feed.
//!
//! The controller owns the in-memory collection and the page cursor. Loads
//! are split into [`FeedController::begin_load`] and
//! [`FeedController::complete_load`] so an event loop can run the request on
//! a task and apply the result when it arrives; [`FeedController::load_next_page`]
//! does both in one call.

#![allow(missing_docs)]

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::{
    api::{ApiError, MarketplaceApi},
    models::{Listing, Page, PageQuery},
};

/// Feed failures are the client's errors unchanged.
pub type FeedError = ApiError;

/// A page request handed out by [`FeedController::begin_load`]. It must be
/// returned to [`FeedController::complete_load`] with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
    replace: bool,
    /// Request to send.
    pub query: PageQuery,
}

/// What [`FeedController::complete_load`] did with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Items were applied; `added` counts the ones not already present.
    Applied { added: usize },
    /// The controller was detached or reset after the ticket was issued.
    Discarded,
}

/// Feed state: collection, page cursor and in-flight guard.
#[derive(Debug)]
pub struct FeedController {
    items: Vec<Listing>,
    known_ids: HashSet<String>,
    page_size: u32,
    next_page: u32,
    has_more: bool,
    in_flight: bool,
    replace_next: bool,
    total: u64,
    generation: u64,
    visible_last: Option<String>,
}

impl FeedController {
    pub fn new(page_size: u32) -> Self {
        Self {
            items: Vec::new(),
            known_ids: HashSet::new(),
            page_size: page_size.max(1),
            next_page: 1,
            has_more: true,
            in_flight: false,
            replace_next: false,
            total: 0,
            generation: 0,
            visible_last: None,
        }
    }

    /// Listings in feed order.
    pub fn items(&self) -> &[Listing] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&Listing> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Page number the next load will request.
    pub fn next_page(&self) -> u32 {
        self.next_page
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight
    }

    /// Total listing count last reported by the service.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Claim the next page. Returns `None` while a load is outstanding or
    /// once the last page has been reached.
    pub fn begin_load(&mut self) -> Option<LoadTicket> {
        if self.in_flight {
            debug!(page = self.next_page, "Load already in flight");
            return None;
        }
        if !self.has_more && !self.replace_next {
            return None;
        }
        self.in_flight = true;
        let page_number = if self.replace_next { 1 } else { self.next_page };
        Some(LoadTicket {
            generation: self.generation,
            replace: self.replace_next,
            query: PageQuery {
                page_number,
                page_size: self.page_size,
            },
        })
    }

    /// Apply the response for `ticket`. Failures release the in-flight guard
    /// and leave collection and cursor untouched.
    pub fn complete_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<Page<Listing>, ApiError>,
    ) -> Result<LoadOutcome, ApiError> {
        if ticket.generation != self.generation {
            debug!(page = ticket.query.page_number, "Discarding stale page");
            return Ok(LoadOutcome::Discarded);
        }
        self.in_flight = false;

        let page = match result {
            Ok(page) => page,
            Err(err) => {
                warn!(page = ticket.query.page_number, ?err, "Feed page failed");
                if ticket.replace {
                    self.replace_next = false;
                }
                return Err(err);
            }
        };

        if ticket.replace {
            self.items.clear();
            self.known_ids.clear();
            self.visible_last = None;
            self.replace_next = false;
        }
        let mut added = 0;
        for listing in page.docs {
            if self.known_ids.insert(listing.id.clone()) {
                self.items.push(listing);
                added += 1;
            }
        }
        self.next_page = ticket.query.page_number + 1;
        self.has_more = page.has_next_page;
        self.total = page.total_docs;
        info!(
            page = ticket.query.page_number,
            added,
            has_more = self.has_more,
            "Feed page loaded"
        );
        Ok(LoadOutcome::Applied { added })
    }

    /// Fetch and apply the next page.
    pub async fn load_next_page(
        &mut self,
        api: &dyn MarketplaceApi,
    ) -> Result<Option<LoadOutcome>, ApiError> {
        let Some(ticket) = self.begin_load() else {
            return Ok(None);
        };
        let result = api.list_listings(ticket.query).await;
        self.complete_load(ticket, result).map(Some)
    }

    /// Report the index of the last item currently on screen. When that is
    /// the last item of the collection and it just became visible, the next
    /// page is claimed.
    pub fn advance_on_visible(&mut self, last_visible: Option<usize>) -> Option<LoadTicket> {
        let last = self.items.last()?;
        if last_visible != Some(self.items.len() - 1) {
            self.visible_last = None;
            return None;
        }
        if self.visible_last.as_deref() == Some(last.id.as_str()) {
            return None;
        }
        self.visible_last = Some(last.id.clone());
        self.begin_load()
    }

    /// Restart from page 1. The collection is replaced when the first page
    /// arrives; if it fails, the old collection and cursor stay. Returns
    /// `None` while another load is outstanding.
    pub fn refresh(&mut self) -> Option<LoadTicket> {
        if self.in_flight {
            return None;
        }
        self.replace_next = true;
        self.begin_load()
    }

    /// Fetch page 1 and replace the collection.
    pub async fn reload(
        &mut self,
        api: &dyn MarketplaceApi,
    ) -> Result<Option<LoadOutcome>, ApiError> {
        let Some(ticket) = self.refresh() else {
            return Ok(None);
        };
        let result = api.list_listings(ticket.query).await;
        self.complete_load(ticket, result).map(Some)
    }

    /// Drop all state; results of loads issued before this call are
    /// discarded when they arrive.
    pub fn detach(&mut self) {
        let generation = self.generation + 1;
        *self = Self::new(self.page_size);
        self.generation = generation;
    }

    /// Delete on the service, then drop the item locally.
    pub async fn remove(&mut self, api: &dyn MarketplaceApi, id: &str) -> Result<(), ApiError> {
        api.delete_listing(id).await?;
        self.apply_removed(id);
        Ok(())
    }

    /// Drop an item whose deletion the service already confirmed.
    pub fn apply_removed(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|listing| listing.id != id);
        let removed = self.items.len() != before;
        if removed {
            self.known_ids.remove(id);
            self.total = self.total.saturating_sub(1);
            info!(listing_id = id, "Listing removed from feed");
        }
        removed
    }

    /// Replace a listing in place after it was edited.
    pub fn apply_updated(&mut self, listing: Listing) {
        if let Some(slot) = self.items.iter_mut().find(|item| item.id == listing.id) {
            *slot = listing;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;

    fn ids(feed: &FeedController) -> Vec<String> {
        feed.items().iter().map(|item| item.id.clone()).collect()
    }

    #[tokio::test]
    async fn pages_concatenate_in_order() {
        let api = FakeApi::with_listings(7);
        let mut feed = FeedController::new(3);

        while feed.has_more() {
            feed.load_next_page(&api).await.unwrap();
        }
        assert_eq!(ids(&feed), vec!["l0", "l1", "l2", "l3", "l4", "l5", "l6"]);
        assert_eq!(feed.total(), 7);
        assert_eq!(feed.next_page(), 4);

        let calls = api.state.lock().list_calls.len();
        assert_eq!(feed.load_next_page(&api).await.unwrap(), None);
        assert_eq!(api.state.lock().list_calls.len(), calls);
    }

    #[tokio::test]
    async fn repeated_items_are_skipped() {
        let api = FakeApi::with_listings(4);
        let mut feed = FeedController::new(2);
        feed.load_next_page(&api).await.unwrap();

        // A new listing shifts page 2 so it repeats l1.
        api.state
            .lock()
            .listings
            .insert(0, crate::testing::listing("fresh", "owner"));
        let outcome = feed.load_next_page(&api).await.unwrap();
        assert_eq!(outcome, Some(LoadOutcome::Applied { added: 1 }));
        assert_eq!(ids(&feed), vec!["l0", "l1", "l2"]);
    }

    #[tokio::test]
    async fn failed_load_keeps_cursor_for_retry() {
        let api = FakeApi::with_listings(6);
        let mut feed = FeedController::new(3);
        feed.load_next_page(&api).await.unwrap();

        api.state.lock().fail_list = true;
        assert!(feed.load_next_page(&api).await.is_err());
        assert_eq!(ids(&feed).len(), 3);
        assert_eq!(feed.next_page(), 2);
        assert!(!feed.is_loading());

        api.state.lock().fail_list = false;
        feed.load_next_page(&api).await.unwrap();
        assert_eq!(ids(&feed).len(), 6);
        let pages: Vec<u32> = api
            .state
            .lock()
            .list_calls
            .iter()
            .map(|query| query.page_number)
            .collect();
        assert_eq!(pages, vec![1, 2, 2]);
    }

    #[tokio::test]
    async fn duplicate_visibility_triggers_fetch_once() {
        let api = FakeApi::with_listings(6);
        let mut feed = FeedController::new(3);
        feed.load_next_page(&api).await.unwrap();

        let ticket = feed.advance_on_visible(Some(2)).expect("first trigger loads");
        assert!(feed.advance_on_visible(Some(2)).is_none());
        // Scrolling away and back while the fetch is outstanding still waits.
        assert!(feed.advance_on_visible(Some(1)).is_none());
        assert!(feed.advance_on_visible(Some(2)).is_none());

        let result = api.list_listings(ticket.query).await;
        feed.complete_load(ticket, result).unwrap();
        assert_eq!(api.state.lock().list_calls.len(), 2);
        assert_eq!(feed.len(), 6);
    }

    #[tokio::test]
    async fn visibility_needs_a_transition() {
        let api = FakeApi::with_listings(6);
        let mut feed = FeedController::new(3);
        feed.load_next_page(&api).await.unwrap();

        api.state.lock().fail_list = true;
        let ticket = feed.advance_on_visible(Some(2)).unwrap();
        let result = api.list_listings(ticket.query).await;
        assert!(feed.complete_load(ticket, result).is_err());

        // Still on screen: no new transition, no automatic retry.
        assert!(feed.advance_on_visible(Some(2)).is_none());
        assert!(feed.advance_on_visible(Some(0)).is_none());
        assert!(feed.advance_on_visible(Some(2)).is_some());
    }

    #[tokio::test]
    async fn end_of_feed_suppresses_until_refresh() {
        let api = FakeApi::with_listings(2);
        let mut feed = FeedController::new(3);
        feed.load_next_page(&api).await.unwrap();
        assert!(!feed.has_more());
        assert!(feed.advance_on_visible(Some(1)).is_none());
        assert!(feed.begin_load().is_none());

        api.state.lock().listings.push(crate::testing::listing("l2", "owner"));
        let outcome = feed.reload(&api).await.unwrap();
        assert_eq!(outcome, Some(LoadOutcome::Applied { added: 3 }));
        assert_eq!(ids(&feed), vec!["l0", "l1", "l2"]);
        assert_eq!(feed.next_page(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_old_feed() {
        let api = FakeApi::with_listings(6);
        let mut feed = FeedController::new(3);
        feed.load_next_page(&api).await.unwrap();
        feed.load_next_page(&api).await.unwrap();

        api.state.lock().fail_list = true;
        assert!(feed.reload(&api).await.is_err());
        assert_eq!(ids(&feed).len(), 6);
        assert_eq!(feed.next_page(), 3);

        api.state.lock().fail_list = false;
        api.state.lock().listings.remove(0);
        feed.reload(&api).await.unwrap();
        assert_eq!(ids(&feed), vec!["l1", "l2", "l3"]);
        assert_eq!(feed.next_page(), 2);
        assert!(feed.has_more());
    }

    #[tokio::test]
    async fn detached_feed_discards_late_results() {
        let api = FakeApi::with_listings(3);
        let mut feed = FeedController::new(3);
        let ticket = feed.begin_load().unwrap();
        feed.detach();

        let result = api.list_listings(ticket.query).await;
        assert_eq!(
            feed.complete_load(ticket, result).unwrap(),
            LoadOutcome::Discarded
        );
        assert!(feed.is_empty());
        assert!(!feed.is_loading());
        assert!(feed.begin_load().is_some());
    }

    #[tokio::test]
    async fn delete_removes_only_after_confirmation() {
        let api = FakeApi::with_listings(3);
        let mut feed = FeedController::new(3);
        feed.load_next_page(&api).await.unwrap();

        api.state.lock().fail_delete.insert("l1".to_string());
        assert!(feed.remove(&api, "l1").await.is_err());
        assert_eq!(ids(&feed), vec!["l0", "l1", "l2"]);

        api.state.lock().fail_delete.clear();
        feed.remove(&api, "l1").await.unwrap();
        assert_eq!(ids(&feed), vec!["l0", "l2"]);
        assert_eq!(feed.total(), 2);
        assert_eq!(api.state.lock().delete_calls, vec!["l1", "l1"]);
    }
}
