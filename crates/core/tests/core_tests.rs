//! Integration tests for the shared wire model.

use readylayer_core::{
    Category, ConnectionStatus, DeltaEvent, ErrorBody, Pagination, Scope, SnapshotPage,
    StreamEvent,
};

#[test]
fn test_category_serde() {
    let c = Category::Findings;
    let serialized = serde_json::to_string(&c).unwrap();
    assert_eq!(serialized, r#""findings""#);
    let deserialized: Category = serde_json::from_str(&serialized).unwrap();
    assert_eq!(deserialized, c);
}

#[test]
fn test_connection_status_serde() {
    let s = ConnectionStatus::Connected;
    let serialized = serde_json::to_string(&s).unwrap();
    assert_eq!(serialized, r#""connected""#);
    let deserialized: ConnectionStatus = serde_json::from_str(&serialized).unwrap();
    assert_eq!(deserialized, s);
}

#[test]
fn test_scope_query_params_match_http_contract() {
    // The wire uses the same names as the snapshot endpoint query string.
    let scope: Scope =
        serde_json::from_str(r#"{"organizationId":"org-1","repositoryId":"repo-a"}"#).unwrap();
    assert_eq!(scope, Scope::repo("org-1", "repo-a"));
    assert!(scope.is_valid());
    assert!(!Scope::org("").is_valid());
}

#[test]
fn test_delta_event_through_sse_parts() {
    let ev = StreamEvent::Delta(DeltaEvent {
        category: Category::Prs,
        timestamp_ms: 42,
        payload: serde_json::json!({"prId": "pr-1"}),
    });
    let (name, data) = ev.to_sse_parts();
    assert_eq!(name, "prs_delta");
    assert_eq!(StreamEvent::from_sse(&name, &data), Some(ev));
}

#[test]
fn test_snapshot_page_parses_server_response() {
    let body = r#"{
        "data": [{"id": "f-1", "severity": "high"}, {"id": "f-2", "severity": "low"}],
        "pagination": {"total": 2, "limit": 50, "offset": 0, "hasMore": false}
    }"#;
    let page: SnapshotPage = serde_json::from_str(body).unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(
        page.pagination,
        Pagination {
            total: 2,
            limit: 50,
            offset: 0,
            has_more: false
        }
    );
}

#[test]
fn test_error_body_parses_server_error() {
    let body: ErrorBody =
        serde_json::from_str(r#"{"error":{"code":"unauthenticated","message":"expired"}}"#)
            .unwrap();
    assert_eq!(body.error.code, "unauthenticated");
}
