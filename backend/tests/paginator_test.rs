mod support;

use backend::marketplace::SearchRequest;
use backend::marketplace::paginator::{Paginator, StopReason};
use backend::store::Store;
use backend::time::now_ms;

use support::{MockSearchClient, make_store, setup_pool, summary};

fn req(query: &str) -> SearchRequest {
    SearchRequest::new(query, None)
}

#[tokio::test]
async fn page_cap_short_circuits_deep_result_sets() {
    let pool = setup_pool().await;
    let store = make_store(&pool);
    let client = MockSearchClient::new();

    client.set_paged(
        "deep",
        vec![
            vec![summary("p0-a", "t", 1.0), summary("p0-b", "t", 2.0)],
            vec![summary("p1-a", "t", 3.0)],
            vec![summary("p2-a", "t", 4.0)],
        ],
    );

    let paginator = Paginator::new(client.clone(), store, 2);
    let out = paginator.paginate(&req("deep"), true).await.expect("paginate");

    assert_eq!(out.stopped_at, StopReason::PageCap);
    assert_eq!(out.pages_used, 2);
    assert_eq!(out.total_seen, 3);
    assert_eq!(out.new_listings.len(), 3);
}

#[tokio::test]
async fn new_only_stops_on_a_fully_known_page() {
    let pool = setup_pool().await;
    let store = make_store(&pool);
    let client = MockSearchClient::new();

    // The second page consists solely of listings we already track.
    for known in ["old-a", "old-b"] {
        store
            .upsert_listing(&summary(known, "t", 9.0).into_listing(now_ms()))
            .await
            .expect("seed known listing");
    }
    client.set_paged(
        "mixed",
        vec![
            vec![summary("new-a", "t", 1.0)],
            vec![summary("old-a", "t", 9.0), summary("old-b", "t", 9.0)],
            vec![summary("never-reached", "t", 5.0)],
        ],
    );

    let paginator = Paginator::new(client.clone(), store, 10);
    let out = paginator
        .paginate(&req("mixed"), true)
        .await
        .expect("paginate");

    assert_eq!(out.stopped_at, StopReason::KnownListing);
    assert_eq!(out.pages_used, 2);
    assert_eq!(out.total_seen, 3);
    let ids: Vec<_> = out
        .new_listings
        .iter()
        .map(|s| s.external_id.as_str())
        .collect();
    assert_eq!(ids, vec!["new-a"]);
}

#[tokio::test]
async fn exhausted_results_stop_naturally() {
    let pool = setup_pool().await;
    let store = make_store(&pool);
    let client = MockSearchClient::new();

    client.set_page("shallow", vec![summary("only", "t", 1.0)]);

    let paginator = Paginator::new(client, store, 10);
    let out = paginator
        .paginate(&req("shallow"), true)
        .await
        .expect("paginate");

    assert_eq!(out.stopped_at, StopReason::Exhausted);
    assert_eq!(out.pages_used, 1);
    assert_eq!(out.new_listings.len(), 1);
}

#[tokio::test]
async fn known_listings_are_kept_when_not_in_new_only_mode() {
    let pool = setup_pool().await;
    let store = make_store(&pool);
    let client = MockSearchClient::new();

    store
        .upsert_listing(&summary("old-a", "t", 9.0).into_listing(now_ms()))
        .await
        .expect("seed known listing");
    client.set_page("q", vec![summary("old-a", "t", 8.0), summary("new-a", "t", 1.0)]);

    let paginator = Paginator::new(client, store, 10);
    let out = paginator.paginate(&req("q"), false).await.expect("paginate");

    assert_eq!(out.new_listings.len(), 2, "nothing filtered without new_only");
    assert_eq!(out.stopped_at, StopReason::Exhausted);
}
