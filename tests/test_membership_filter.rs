mod common;

use flapjack_lookup::{
    HttpSource, LookupError, MembershipFilter, MembershipFilterBuilder, TermsFetch,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve(body: serde_json::Value, expected_calls: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(expected_calls)
        .mount(&server)
        .await;
    server
}

fn builder(server: &MockServer, field: &str) -> MembershipFilterBuilder {
    let source = HttpSource::new(&server.uri(), None, Duration::from_millis(300)).unwrap();
    MembershipFilterBuilder::new(Arc::new(TermsFetch::new(source.into(), field, None)))
}

#[tokio::test]
async fn test_filter_matches_fetched_ids() {
    common::init_tracing();
    let server = serve(json!([2, 4, 99]), 1).await;
    let index = common::users_index();
    let searcher = common::searcher(&index);

    let builder = builder(&server, "user_id");
    let filter = builder.build(&searcher).await.unwrap();
    assert_eq!(filter.len(), 3);
    assert_eq!(common::count(&searcher, filter.as_ref()), 2);

    // Built once: a second call neither refetches nor rebuilds.
    let again = builder.build(&searcher).await.unwrap();
    assert!(Arc::ptr_eq(&filter, &again));
    assert!(builder.is_built());
}

#[tokio::test]
async fn test_string_ids_coerce_to_numeric_field() {
    let server = serve(json!(["1", "3"]), 1).await;
    let index = common::users_index();
    let searcher = common::searcher(&index);

    let filter = builder(&server, "user_id").build(&searcher).await.unwrap();
    assert_eq!(common::count(&searcher, filter.as_ref()), 2);
}

#[tokio::test]
async fn test_text_field_membership() {
    let server = serve(json!(["b", "c", "zz"]), 1).await;
    let index = common::users_index();
    let searcher = common::searcher(&index);

    let filter = builder(&server, "sku").build(&searcher).await.unwrap();
    assert_eq!(common::count(&searcher, filter.to_query().as_ref()), 2);
}

#[tokio::test]
async fn test_unknown_field_never_fetches() {
    let server = serve(json!([1]), 0).await;
    let index = common::users_index();
    let searcher = common::searcher(&index);

    let builder = builder(&server, "no_such_field");
    let filter = builder.build(&searcher).await.unwrap();
    assert!(Arc::ptr_eq(&filter, &MembershipFilter::match_nothing()));
    assert!(!builder.fetch().is_fetched());
    assert!(!builder.is_built());
}

#[tokio::test]
async fn test_unpopulated_field_never_fetches() {
    // `group_id` is declared but no document has it.
    let server = serve(json!([1]), 0).await;
    let index = common::users_index();
    let searcher = common::searcher(&index);

    let filter = builder(&server, "group_id").build(&searcher).await.unwrap();
    assert!(filter.is_match_nothing());

    // The schema alone does resolve it, and then the fetch happens.
    let server = serve(json!([1]), 1).await;
    let filter = builder(&server, "group_id")
        .build(&index.schema())
        .await
        .unwrap();
    assert_eq!(filter.len(), 1);
    assert_eq!(common::count(&searcher, filter.as_ref()), 0);
}

#[tokio::test]
async fn test_empty_terms_give_canonical_match_nothing() {
    let server = serve(json!([]), 1).await;
    let index = common::users_index();
    let searcher = common::searcher(&index);

    let filter = builder(&server, "user_id").build(&searcher).await.unwrap();
    assert!(Arc::ptr_eq(&filter, &MembershipFilter::match_nothing()));
    assert_eq!(common::count(&searcher, filter.as_ref()), 0);
}

#[tokio::test]
async fn test_fetch_error_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    let index = common::users_index();
    let searcher = common::searcher(&index);

    let builder = builder(&server, "user_id");
    let err = builder.build(&searcher).await.unwrap_err();
    assert!(matches!(err, LookupError::Transport(_)));
    assert!(!builder.is_built());
}

#[tokio::test]
async fn test_builders_compare_by_fetch() {
    let server = serve(json!([1]), 0).await;
    assert_eq!(builder(&server, "user_id"), builder(&server, "user_id"));
    assert_ne!(builder(&server, "user_id"), builder(&server, "sku"));
}
