//! API Module Tests
//!
//! ## Test Scopes
//! - **Dispatcher**: Validation, record creation, publish failure compensation.
//! - **Router**: Status codes and bodies of every endpoint, driven with `oneshot`.
//! - **Pipeline**: Submit, process with an in-memory worker, then poll the result.

#[cfg(test)]
mod tests {
    use crate::api::dispatcher::Dispatcher;
    use crate::api::handlers::router;
    use crate::api::protocol::{API_RUNNING_MESSAGE, TASK_CREATED_MESSAGE};
    use crate::bootstrap::RetryPolicy;
    use crate::error::{DispatchError, ExtractorError, QueueError};
    use crate::executor::executor::{DeliveryOutcome, TaskExecutor};
    use crate::executor::queue::{Delivery, MemoryWorkQueue, WorkQueue};
    use crate::executor::types::{RawWorkItem, TaskStatus, WorkItem};
    use crate::extractor::normalize::format_tax_id;
    use crate::extractor::parser::parse_registry_page;
    use crate::extractor::types::ScrapedRecord;
    use crate::extractor::Extractor;
    use crate::storage::memory::MemoryTaskStore;
    use crate::storage::TaskStore;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const TAX_ID: &str = "00012377000160";

    const REGISTRY_PAGE: &str = r#"
        <div class="item"><span class="label_title">CNPJ:</span><span class="label_text">00.012.377/0001-60</span></div>
        <div class="item"><span class="label_title">Nome Empresarial:</span><span class="label_text">CEREALISTA SÃO JOÃO LTDA</span></div>
        <div class="col box">
            <div class="box_title">Atividade Econômica</div>
            <span class="label_title">Atividade Principal</span>
            <span class="label_title" style="font-weight: normal">4623-1/09 - Comércio atacadista de alimentos para animais</span>
        </div>
    "#;

    /// Answers every lookup from a canned registry page.
    struct CannedRegistry;

    #[async_trait]
    impl Extractor for CannedRegistry {
        async fn fetch(&self, tax_id: &str) -> Result<ScrapedRecord, ExtractorError> {
            let formatted = format_tax_id(tax_id)
                .ok_or_else(|| ExtractorError::InvalidInput(tax_id.to_string()))?;
            parse_registry_page(REGISTRY_PAGE, &formatted)
        }
    }

    /// A broker that refuses every publish.
    #[derive(Default)]
    struct DownQueue {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl WorkQueue for DownQueue {
        async fn publish(&self, _item: &WorkItem) -> Result<(), QueueError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::Unavailable("broker connection refused".into()))
        }

        async fn consume(&self) -> Result<Option<Delivery>, QueueError> {
            Ok(None)
        }

        async fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
            Ok(())
        }

        async fn reject(&self, _delivery: &Delivery) -> Result<(), QueueError> {
            Ok(())
        }

        async fn recover_in_flight(&self) -> Result<usize, QueueError> {
            Ok(0)
        }
    }

    struct Pipeline {
        store: Arc<MemoryTaskStore>,
        queue: Arc<MemoryWorkQueue>,
        dispatcher: Arc<Dispatcher>,
        app: Router,
    }

    fn pipeline() -> Pipeline {
        let store = Arc::new(MemoryTaskStore::new());
        let queue = Arc::new(MemoryWorkQueue::new());
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), queue.clone()));
        let app = router(dispatcher.clone());
        Pipeline {
            store,
            queue,
            dispatcher,
            app,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_scrape(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/scrape")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    // ============================================================
    // DISPATCHER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_enqueue_writes_pending_record_then_publishes() {
        // ARRANGE
        let p = pipeline();

        // ACT
        let task_id = p.dispatcher.enqueue_task(TAX_ID).await.unwrap();

        // ASSERT
        let record = p.store.get(&task_id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.tax_id, TAX_ID);

        let delivery = p.queue.consume().await.unwrap().unwrap();
        let item = RawWorkItem::decode(&delivery.body).unwrap();
        assert_eq!(item.task_id, task_id);
        assert_eq!(item.tax_id, TAX_ID);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_bad_tax_ids_before_storage() {
        let p = pipeline();

        for bad in ["", "123", "00.012.377/0001-60", "0001237700016X", "000123770001601"] {
            let err = p.dispatcher.enqueue_task(bad).await.unwrap_err();
            assert!(matches!(err, DispatchError::Validation(_)), "accepted {:?}", bad);
        }

        assert!(p.store.is_empty());
        assert_eq!(p.queue.ready_len().await, 0);
    }

    #[tokio::test]
    async fn test_publish_failure_marks_record_failed() {
        // ARRANGE: Every publish fails
        let store = Arc::new(MemoryTaskStore::new());
        let queue = Arc::new(DownQueue::default());
        let dispatcher = Dispatcher::new(store.clone(), queue.clone())
            .with_publish_policy(RetryPolicy::fixed(2, Duration::from_millis(1)));

        // ACT
        let err = dispatcher.enqueue_task(TAX_ID).await.unwrap_err();

        // ASSERT: Retried, surfaced, and no orphaned pending record
        assert!(matches!(err, DispatchError::Queue(_)));
        assert_eq!(queue.attempts.load(Ordering::SeqCst), 2);

        let records = store.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TaskStatus::Failed);
        assert!(records[0]
            .error
            .as_deref()
            .unwrap()
            .contains("could not enqueue task"));
    }

    #[tokio::test]
    async fn test_get_unknown_task_is_not_found() {
        let p = pipeline();

        let err = p
            .dispatcher
            .get_task("00000000-0000-0000-0000-000000000000")
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    // ============================================================
    // ROUTER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_root_reports_running() {
        let p = pipeline();

        let (status, body) = send(&p.app, get("/")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], API_RUNNING_MESSAGE);
    }

    #[tokio::test]
    async fn test_scrape_returns_accepted_with_task_id() {
        let p = pipeline();

        let (status, body) = send(&p.app, post_scrape(r#"{"tax_id":"00012377000160"}"#)).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["message"], TASK_CREATED_MESSAGE);
        let task_id = body["task_id"].as_str().unwrap();
        assert!(uuid::Uuid::parse_str(task_id).is_ok());
    }

    #[tokio::test]
    async fn test_scrape_accepts_legacy_cnpj_field() {
        let p = pipeline();

        let (status, _) = send(&p.app, post_scrape(r#"{"cnpj":"00012377000160"}"#)).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(p.queue.ready_len().await, 1);
    }

    #[tokio::test]
    async fn test_scrape_invalid_tax_id_is_unprocessable() {
        let p = pipeline();

        let (status, body) = send(&p.app, post_scrape(r#"{"tax_id":"123"}"#)).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].as_str().unwrap().contains("14 digits"));
        assert!(p.store.is_empty());
    }

    #[tokio::test]
    async fn test_scrape_publish_failure_is_service_unavailable() {
        let store = Arc::new(MemoryTaskStore::new());
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(DownQueue::default()))
            .with_publish_policy(RetryPolicy::fixed(1, Duration::ZERO));
        let app = router(Arc::new(dispatcher));

        let (status, body) = send(&app, post_scrape(r#"{"tax_id":"00012377000160"}"#)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["detail"].as_str().unwrap().contains("broker connection refused"));
    }

    #[tokio::test]
    async fn test_results_unknown_task_is_not_found() {
        let p = pipeline();

        let (status, body) = send(
            &p.app,
            get("/results/00000000-0000-0000-0000-000000000000"),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].is_string());
    }

    // ============================================================
    // PIPELINE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_submit_process_and_poll() {
        // ARRANGE: API and one in-memory worker sharing the same store and queue
        let p = pipeline();
        let worker = TaskExecutor::new(
            p.queue.clone(),
            p.store.clone(),
            Arc::new(CannedRegistry),
            Duration::from_millis(10),
        );

        // ACT 1: Submit
        let (status, body) = send(&p.app, post_scrape(r#"{"tax_id":"00012377000160"}"#)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let task_id = body["task_id"].as_str().unwrap().to_string();
        let results_uri = format!("/results/{}", task_id);

        // ASSERT 1: Pending until a worker picks it up
        let (status, body) = send(&p.app, get(&results_uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["tax_id"], TAX_ID);
        assert!(body.get("result").is_none());

        // ACT 2: Worker processes the queued item
        let delivery = p.queue.consume().await.unwrap().unwrap();
        assert_eq!(
            worker.process_delivery(&delivery).await,
            DeliveryOutcome::Completed
        );

        // ASSERT 2: Completed with the parsed record
        let (status, body) = send(&p.app, get(&results_uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["result"]["tax_id"], "00.012.377/0001-60");
        assert_eq!(body["result"]["nome_empresarial"], "CEREALISTA SAO JOAO LTDA");
        assert_eq!(
            body["result"]["economic_activity"]["primary"][0]["code"],
            "4623-1/09"
        );
        assert!(body.get("error").is_none());
    }
}
