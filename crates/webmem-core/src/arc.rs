//! Frequency & ARC engine (C5): visit tracking, derived scoring, count
//! suppression and eviction candidate selection.
//!
//! Grounded in the teacher's pattern of attaching derived-score computation
//! directly to the storage layer (`Storage::recompute_*` style methods)
//! rather than standing up a separate scoring service object — here as
//! plain functions over [`crate::page::Page`] plus thin orchestration on
//! [`crate::store::DocumentStore`] and [`crate::vector::VectorIndex`].

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::page::{Page, PageId};
use crate::store::DocumentStore;
use crate::vector::VectorIndex;

/// 5 visits/day saturates the frequency score.
const FREQUENCY_SATURATION_VISITS_PER_DAY: f64 = 5.0;

/// Recency half-life, in hours.
const RECENCY_HALF_LIFE_HOURS: f64 = 24.0;

const RECENCY_FLOOR: f64 = 0.01;

/// `visit_count` ceiling that triggers count suppression (halving).
pub const COUNT_SUPPRESSION_THRESHOLD: u64 = 1_000_000;

/// `access_frequency = min(visit_count / days_active / 5.0, 1.0)`.
pub fn access_frequency(visit_count: u64, first_visited: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let days_active = ((now - first_visited).num_seconds() as f64 / 86_400.0)
        .floor()
        .max(1.0);
    (visit_count as f64 / days_active / FREQUENCY_SATURATION_VISITS_PER_DAY).min(1.0)
}

/// `recency_score = max(0.5^(hours_since/24), 0.01)`.
pub fn recency_score(last_visited: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let hours_since = (now - last_visited).num_seconds() as f64 / 3600.0;
    0.5f64.powf(hours_since / RECENCY_HALF_LIFE_HOURS).max(RECENCY_FLOOR)
}

/// `arc_score = 0.6 * access_frequency + 0.4 * recency_score`.
pub fn arc_score(access_frequency: f64, recency_score: f64) -> f64 {
    0.6 * access_frequency + 0.4 * recency_score
}

/// Recompute and fill in the three derived score fields on `page` as of
/// `now`. Leaves every other field untouched.
pub fn apply_derived_scores(page: &mut Page, now: DateTime<Utc>) {
    let freq = access_frequency(page.visit_count, page.first_visited, now);
    let rec = recency_score(page.last_visited, now);
    page.access_frequency = freq;
    page.recency_score = rec;
    page.arc_score = arc_score(freq, rec);
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ArcError {
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

/// Result of [`track_visit`]: the page's counters after the visit, with
/// derived scores already recomputed.
#[derive(Debug, Clone)]
pub struct VisitOutcome {
    pub page: Page,
    pub was_new: bool,
}

/// Find-or-create the page row for `url`, increment its visit count, bump
/// `last_visited` (and `first_visited` if absent), then recompute derived
/// scores. Applies count suppression if the increment pushed any counter
/// past [`COUNT_SUPPRESSION_THRESHOLD`].
pub fn track_visit(store: &DocumentStore, url: &str, at: DateTime<Utc>) -> Result<VisitOutcome, ArcError> {
    let (mut page, was_new) = match store.get_by_url(url)? {
        Some(existing) => (existing, false),
        None => {
            let placeholder = Page::placeholder(url, at);
            let id = store.insert(&crate::store::PageUpsert {
                url: placeholder.url.clone(),
                title: placeholder.title.clone(),
                description: placeholder.description.clone(),
                keywords: placeholder.keywords.clone(),
                content: placeholder.content.clone(),
                favicon_url: placeholder.favicon_url.clone(),
                embedding: None,
                at,
            })?;
            let mut page = placeholder;
            page.id = id;
            (page, true)
        }
    };

    store.record_visit(page.id, at)?;
    page.visit_count += 1;
    page.last_visited = at;
    if was_new {
        page.first_visited = at;
    }

    if page.visit_count >= COUNT_SUPPRESSION_THRESHOLD {
        tracing::warn!(page_id = page.id, "visit_count saturated, suppressing counts store-wide");
        store.suppress_counts()?;
        page.visit_count /= 2;
    }

    apply_derived_scores(&mut page, at);
    Ok(VisitOutcome { page, was_new })
}

/// Whether a random eviction sweep should fire this visit, per
/// `eviction.random_trigger_probability` (default 1%).
pub fn should_randomly_trigger_eviction(probability: f64) -> bool {
    rand::thread_rng().gen::<f64>() < probability
}

/// A page selected for eviction, with the fields needed to justify the
/// choice to a caller (`eviction_preview`).
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub id: PageId,
    pub url: String,
    pub arc_score: f64,
    pub last_visited: DateTime<Utc>,
}

/// Select eviction candidates: lowest `arc_score` first, ties broken by
/// older `last_visited` then lower id; pages visited within
/// `protect_window` are excluded entirely. Returns at most `max_candidates`.
pub fn select_eviction_candidates(
    pages: &[Page],
    now: DateTime<Utc>,
    protect_window: chrono::Duration,
    max_candidates: usize,
) -> Vec<EvictionCandidate> {
    let mut scored: Vec<&Page> = pages
        .iter()
        .filter(|p| now - p.last_visited > protect_window)
        .collect();

    scored.sort_by(|a, b| {
        a.arc_score
            .partial_cmp(&b.arc_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.last_visited.cmp(&b.last_visited))
            .then_with(|| a.id.cmp(&b.id))
    });

    scored
        .into_iter()
        .take(max_candidates)
        .map(|p| EvictionCandidate {
            id: p.id,
            url: p.url.clone(),
            arc_score: p.arc_score,
            last_visited: p.last_visited,
        })
        .collect()
}

/// Outcome of an eviction run: ids actually removed from C1/C2.
#[derive(Debug, Clone, Default)]
pub struct EvictionReport {
    pub removed_ids: Vec<PageId>,
}

/// Run eviction: if the store's page count exceeds `capacity`, select the
/// worst-scoring pages (excluding those visited within `protect_window`)
/// until the store is back at `capacity - headroom`, deleting each from C1
/// and C2. Pages are re-scored against `now` before selection so the sweep
/// reflects current recency, not whatever was last persisted.
pub fn run_eviction(
    store: &DocumentStore,
    vectors: &mut VectorIndex,
    now: DateTime<Utc>,
    capacity: usize,
    headroom: usize,
    protect_window: chrono::Duration,
) -> Result<EvictionReport, ArcError> {
    let count = store.count()? as usize;
    if count <= capacity {
        return Ok(EvictionReport::default());
    }

    let target = capacity.saturating_sub(headroom);
    let overflow = count.saturating_sub(target);

    let mut pages = store.list(count as u32, 0)?;
    for p in &mut pages {
        apply_derived_scores(p, now);
    }

    let candidates = select_eviction_candidates(&pages, now, protect_window, overflow);

    let mut report = EvictionReport::default();
    for c in &candidates {
        store.delete(c.id)?;
        vectors.remove(c.id);
        report.removed_ids.push(c.id);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn page_at(id: PageId, visit_count: u64, first: DateTime<Utc>, last: DateTime<Utc>) -> Page {
        let mut p = Page::placeholder(&format!("https://e.test/{id}"), first);
        p.id = id;
        p.visit_count = visit_count;
        p.last_visited = last;
        p
    }

    #[test]
    fn access_frequency_saturates_at_five_per_day() {
        let now = Utc::now();
        let first = now - Duration::days(2);
        let f = access_frequency(100, first, now);
        assert!((f - 1.0).abs() < 1e-9);
    }

    #[test]
    fn access_frequency_scales_linearly_below_saturation() {
        let now = Utc::now();
        let first = now - Duration::days(4);
        // 2 visits over 4 days = 0.5 visits/day -> 0.5/5.0 = 0.1
        let f = access_frequency(2, first, now);
        assert!((f - 0.1).abs() < 1e-9);
    }

    #[test]
    fn recency_score_has_24h_half_life() {
        let now = Utc::now();
        let last = now - Duration::hours(24);
        let r = recency_score(last, now);
        assert!((r - 0.5).abs() < 1e-6);
    }

    #[test]
    fn recency_score_floors_at_point_zero_one() {
        let now = Utc::now();
        let last = now - Duration::days(365);
        let r = recency_score(last, now);
        assert!((r - RECENCY_FLOOR).abs() < 1e-9);
    }

    #[test]
    fn arc_score_is_weighted_combination() {
        let s = arc_score(1.0, 0.0);
        assert!((s - 0.6).abs() < 1e-9);
        let s = arc_score(0.0, 1.0);
        assert!((s - 0.4).abs() < 1e-9);
    }

    #[test]
    fn arc_score_always_in_unit_interval() {
        let now = Utc::now();
        for visits in [0u64, 1, 10, 1000] {
            let first = now - Duration::days(10);
            let f = access_frequency(visits, first, now);
            let r = recency_score(now, now);
            let s = arc_score(f, r);
            assert!((0.0..=1.0).contains(&s), "arc_score {s} out of range");
        }
    }

    #[test]
    fn track_visit_creates_page_on_first_visit() {
        let store = DocumentStore::open_in_memory().unwrap();
        let now = Utc::now();
        let outcome = track_visit(&store, "https://a.test/x", now).unwrap();
        assert!(outcome.was_new);
        assert_eq!(outcome.page.visit_count, 1);
        assert_eq!(outcome.page.first_visited, now);
    }

    #[test]
    fn track_visit_increments_existing_page() {
        let store = DocumentStore::open_in_memory().unwrap();
        let t0 = Utc::now();
        track_visit(&store, "https://a.test/x", t0).unwrap();
        let t1 = t0 + Duration::hours(1);
        let outcome = track_visit(&store, "https://a.test/x", t1).unwrap();
        assert!(!outcome.was_new);
        assert_eq!(outcome.page.visit_count, 2);
        assert_eq!(outcome.page.last_visited, t1);
    }

    #[test]
    fn eviction_candidates_exclude_recently_visited() {
        let now = Utc::now();
        let protected = page_at(1, 1, now - Duration::days(5), now - Duration::minutes(5));
        let evictable = page_at(2, 1, now - Duration::days(5), now - Duration::days(2));
        let mut pages = vec![protected, evictable];
        for p in &mut pages {
            apply_derived_scores(p, now);
        }
        let candidates = select_eviction_candidates(&pages, now, Duration::hours(1), 10);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, 2);
    }

    #[test]
    fn eviction_candidates_prefer_lower_arc_score() {
        let now = Utc::now();
        let mut low = page_at(1, 1, now - Duration::days(30), now - Duration::days(10));
        let mut high = page_at(2, 100, now - Duration::days(2), now - Duration::minutes(30));
        apply_derived_scores(&mut low, now);
        apply_derived_scores(&mut high, now);
        let candidates = select_eviction_candidates(&[low, high], now, Duration::hours(1), 1);
        assert_eq!(candidates[0].id, 1);
    }

    #[test]
    fn eviction_ties_break_on_older_last_visited_then_lower_id() {
        let now = Utc::now();
        let first = now - Duration::days(10);
        let last = now - Duration::days(2);
        let mut a = page_at(5, 1, first, last);
        let mut b = page_at(3, 1, first, last);
        apply_derived_scores(&mut a, now);
        apply_derived_scores(&mut b, now);
        let candidates = select_eviction_candidates(&[a, b], now, Duration::hours(1), 10);
        assert_eq!(candidates[0].id, 3);
        assert_eq!(candidates[1].id, 5);
    }

    #[test]
    fn run_eviction_is_noop_under_capacity() {
        let store = DocumentStore::open_in_memory().unwrap();
        let mut vectors = VectorIndex::new(4);
        track_visit(&store, "https://a.test/1", Utc::now()).unwrap();
        let report = run_eviction(&store, &mut vectors, Utc::now(), 10, 2, Duration::hours(1)).unwrap();
        assert!(report.removed_ids.is_empty());
    }
}
