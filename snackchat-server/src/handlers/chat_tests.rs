//! Chat handler responses, including store failures.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{body::Bytes, http::StatusCode};
    use axum_test::TestServer;
    use serde_json::{Value, json};
    use shared::{
        config::server::{Config, Profile},
        models::ChatMessage,
        realtime::LocalBus,
    };

    use crate::{
        app_state::AppState,
        routes::chat::create_router_chat,
        services::{MessageStore, RelayService, StoreError},
    };

    struct UnreachableStore;

    #[async_trait]
    impl MessageStore for UnreachableStore {
        async fn insert(&self, _message: &ChatMessage) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn recent(&self, _limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn delete_older_than(&self, _cutoff: i64) -> Result<u64, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
    }

    fn base_state() -> Arc<AppState> {
        Arc::new(AppState::from_config(
            Arc::new(Config::default_for_profile(Profile::Test)),
            None,
        ))
    }

    fn server(state: Arc<AppState>) -> TestServer {
        TestServer::new(create_router_chat().with_state(state)).unwrap()
    }

    fn broken_server() -> TestServer {
        let base = base_state();
        let relay = RelayService::new(
            Arc::new(UnreachableStore),
            Arc::new(LocalBus::new()),
            "presence-chat",
            "message",
        );
        server(Arc::new(AppState::new(
            base.config.clone(),
            Arc::new(relay),
            base.authenticator.clone(),
            base.push.clone(),
        )))
    }

    #[tokio::test]
    async fn empty_history_is_an_empty_array() {
        let response = server(base_state()).get("/chat").await;

        response.assert_status_ok();
        assert_eq!(response.json::<Value>(), json!([]));
    }

    #[tokio::test]
    async fn empty_content_counts_as_missing() {
        let response = server(base_state())
            .post("/chat")
            .json(&json!({ "id": "m-1", "content": "", "sender": "s", "nickname": "n" }))
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.json::<Value>()["details"],
            "missing required message fields: content"
        );
    }

    #[tokio::test]
    async fn mistyped_fields_get_the_json_error_body() {
        let response = server(base_state())
            .post("/chat")
            .json(&json!({
                "id": "m-1",
                "content": "hi",
                "sender": "s",
                "nickname": "n",
                "timestamp": "1700"
            }))
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert_eq!(body["error"], "Failed to send message");
        assert!(body["details"].as_str().unwrap().contains("timestamp"));
    }

    #[tokio::test]
    async fn malformed_or_untyped_bodies_get_the_json_error_body() {
        let server = server(base_state());

        let malformed = server
            .post("/chat")
            .bytes(Bytes::from_static(b"{\"id\": "))
            .content_type("application/json")
            .await;
        let untyped = server
            .post("/chat")
            .bytes(Bytes::from_static(b"{\"id\":\"m-1\"}"))
            .await;

        for response in [malformed, untyped] {
            response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
            let body: Value = response.json();
            assert_eq!(body["error"], "Failed to send message");
            assert!(body["details"].is_string());
        }
    }

    #[tokio::test]
    async fn store_failure_fails_the_send() {
        let response = broken_server()
            .post("/chat")
            .json(&json!({ "id": "m-1", "content": "hi", "sender": "s", "nickname": "n" }))
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert_eq!(body["error"], "Failed to send message");
        assert!(body["details"].as_str().unwrap().starts_with("failed to store message"));
    }

    #[tokio::test]
    async fn store_failure_fails_the_history_read() {
        let response = broken_server().get("/chat").await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.json::<Value>()["error"],
            "Failed to load chat history"
        );
    }

    #[tokio::test]
    async fn trim_failure_reports_only_the_summary() {
        let response = broken_server().delete("/chat").await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.json::<Value>(),
            json!({ "error": "Failed to delete old messages" })
        );
    }
}
