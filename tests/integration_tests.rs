//! Integration tests for the casebreaker client against a mock server.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use casebreaker::chat::{ChatSession, LOAD_FAILED, SEND_FAILED};
    use casebreaker::{
        CaseBreaker, ClientConfig, DEVICE_ID_KEY, DeviceIdentity, DeviceStore, Difficulty,
        MemoryDeviceStore, MessageRole, PlainTextRenderer, StreamEvent, TurnStatus,
    };
    use futures::StreamExt;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn client_for(server: &MockServer) -> CaseBreaker {
        let config = ClientConfig::default()
            .with_base_url(server.uri())
            .with_retry_delay(Duration::from_millis(1));
        CaseBreaker::with_config(config).expect("client")
    }

    fn sse(events: &[serde_json::Value]) -> String {
        events
            .iter()
            .map(|event| format!("data: {event}\n\n"))
            .collect()
    }

    fn quiet_renderer() -> PlainTextRenderer<Vec<u8>> {
        PlainTextRenderer::with_writer(Vec::new(), false)
    }

    /// Fails with a 500 until `failures` attempts have been made.
    struct FlakyResponder {
        calls: Arc<AtomicUsize>,
        failures: usize,
        body: serde_json::Value,
    }

    impl Respond for FlakyResponder {
        fn respond(&self, _: &Request) -> ResponseTemplate {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                ResponseTemplate::new(500).set_body_json(json!({"detail": "database busy"}))
            } else {
                ResponseTemplate::new(200).set_body_json(self.body.clone())
            }
        }
    }

    async fn mount_session_state(server: &MockServer, completed: &[&str]) {
        Mock::given(method("GET"))
            .and(path("/api/v1/sessions/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 3,
                "case_study_id": 7,
                "device_id": "dev-1",
                "completed_checkpoints": completed,
            })))
            .mount(server)
            .await;
    }

    /// Read one HTTP request (headers plus a Content-Length body).
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending a request");
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .map(|v| v.trim().parse::<usize>().unwrap())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }

    #[tokio::test]
    async fn slow_reply_outlives_request_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\
transfer-encoding: chunked\r\n\r\n",
                )
                .await
                .unwrap();
            for i in 0..4 {
                let line = format!("data: {{\"type\":\"chunk\",\"data\":\"p{i} \"}}\n");
                let frame = format!("{:x}\r\n{line}\r\n", line.len());
                socket.write_all(frame.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(400)).await;
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
        });

        let client = CaseBreaker::with_config(
            ClientConfig::default()
                .with_base_url(format!("http://{addr}"))
                .with_timeout(Duration::from_secs(1))
                .with_max_attempts(1),
        )
        .unwrap();
        let events: Vec<_> = client
            .send_message(3, "Hello", None)
            .await
            .unwrap()
            .collect()
            .await;

        let chunks: Vec<_> = events
            .into_iter()
            .map(|event| event.expect("stream cut short"))
            .collect();
        assert_eq!(
            chunks,
            (0..4)
                .map(|i| StreamEvent::Chunk(format!("p{i} ")))
                .collect::<Vec<_>>()
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn reply_stream_that_never_opens_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = CaseBreaker::with_config(
            ClientConfig::default()
                .with_base_url(format!("http://{addr}"))
                .with_timeout(Duration::from_millis(200))
                .with_max_attempts(1),
        )
        .unwrap();
        let err = client.send_message(3, "Hello", None).await.unwrap_err();
        assert!(err.is_timeout(), "{err}");
        server.abort();
    }

    #[tokio::test]
    async fn start_session_posts_case_study_and_device() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/sessions"))
            .and(body_json(json!({"case_study_id": 7, "device_id": "dev-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 3,
                "case_study_id": 7,
                "device_id": "dev-1",
                "created_at": "2025-01-02T03:04:05Z",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryDeviceStore::new();
        store.set(DEVICE_ID_KEY, "dev-1").unwrap();
        let identity = DeviceIdentity::new(store);

        let session = client_for(&server)
            .start_session(7, &identity)
            .await
            .unwrap();
        assert_eq!(session.id, 3);
        assert_eq!(session.case_study_id, 7);
        assert!(session.created_at.is_some());
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_success() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicUsize::new(0));
        Mock::given(method("GET"))
            .and(path("/api/v1/sessions/3/messages"))
            .respond_with(FlakyResponder {
                calls: Arc::clone(&calls),
                failures: 2,
                body: json!([
                    {"role": "user", "content": "What was the ruling?", "checkpoint_id": "cp1"},
                    {"role": "assistant", "content": "It was unanimous."}
                ]),
            })
            .mount(&server)
            .await;

        let messages = client_for(&server).get_messages(3).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].checkpoint_id.as_deref(), Some("cp1"));
        assert_eq!(messages[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn retries_give_up_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/sessions/3"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"detail": [{"loc": ["id"]}]})),
            )
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server).get_session(3).await.unwrap_err();
        assert_eq!(err.status_code(), Some(422));
        assert!(err.to_string().contains(r#"[{"loc":["id"]}]"#), "{err}");
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/sessions/99"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"detail": "Session not found"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).get_session(99).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Session not found"), "{err}");
    }

    #[tokio::test]
    async fn error_without_detail_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/case-studies/7"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client_for(&server).get_case_study(7).await.unwrap_err();
        assert_eq!(err.status_code(), Some(503));
        assert!(err.to_string().contains("HTTP error! status: 503"), "{err}");
    }

    #[tokio::test]
    async fn list_sessions_filters_by_device() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/sessions"))
            .and(query_param("device_id", "dev 1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1, "case_study_id": 7, "device_id": "dev 1"},
                {"id": 2, "case_study_id": 8, "device_id": "dev 1"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let sessions = client_for(&server).list_sessions("dev 1").await.unwrap();
        assert_eq!(
            sessions.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn complete_checkpoint_accepts_empty_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/sessions/3/checkpoints/cp1/complete"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .complete_checkpoint(3, "cp1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn case_study_is_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/case-studies/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 7,
                "title": "Marbury v. Madison",
                "difficulty": 2,
                "estimated_time": 30,
                "learning_objectives": null,
                "context_materials": {"background": "1803"},
                "checkpoints": [{"id": "cp1", "title": "Facts"}]
            })))
            .mount(&server)
            .await;

        let case_study = client_for(&server).get_case_study(7).await.unwrap();
        assert_eq!(case_study.difficulty, Difficulty::Intermediate);
        assert_eq!(case_study.estimated_time, "30 min");
        assert!(case_study.learning_objectives.is_empty());
        assert_eq!(case_study.context_materials.background, "1803");
        assert_eq!(case_study.first_checkpoint().unwrap().id, "cp1");
    }

    #[tokio::test]
    async fn streamed_turn_through_chat_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/sessions/3/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/sessions/3/messages"))
            .and(body_json(json!({
                "role": "user",
                "content": "What was the ruling?",
                "checkpoint_id": "cp1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[
                    json!({"type": "status", "data": {"state": "thinking", "message": "analyzing"}}),
                    json!({"type": "chunk", "data": "The "}),
                    json!({"type": "chunk", "data": "ruling "}),
                    json!({"type": "chunk", "data": "favored..."}),
                    json!({"type": "status", "data": "complete"}),
                ]),
                "text/event-stream",
            ))
            .expect(1)
            .mount(&server)
            .await;
        mount_session_state(&server, &["cp1"]).await;

        let session = ChatSession::new(client_for(&server), 3)
            .with_greeting("Welcome!")
            .with_checkpoint(Some("cp1".to_string()));
        session.mount().await.unwrap();

        let mut renderer = quiet_renderer();
        session
            .send_message("What was the ruling?", &mut renderer)
            .await
            .unwrap();

        let state = session.state();
        let contents: Vec<_> = state
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            contents,
            vec![
                (MessageRole::Assistant, "Welcome!"),
                (MessageRole::User, "What was the ruling?"),
                (MessageRole::Assistant, "The ruling favored..."),
            ]
        );
        assert!(!state.loading);
        assert_eq!(state.error, None);
        assert_eq!(state.status, TurnStatus::Complete);
        assert!(session.progress().is_complete("cp1"));

        let out = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(out.contains("Tutor: The ruling favored..."), "{out}");
    }

    #[tokio::test]
    async fn error_event_is_surfaced_in_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/sessions/3/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[
                    json!({"type": "chunk", "data": "Partial"}),
                    json!({"type": "error", "data": "model unavailable"}),
                ]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;
        mount_session_state(&server, &[]).await;

        let session = ChatSession::new(client_for(&server), 3);
        session
            .send_message("Hello", &mut quiet_renderer())
            .await
            .unwrap();

        let state = session.state();
        assert_eq!(state.error.as_deref(), Some("model unavailable"));
        assert!(!state.loading);
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].content, "Partial");
    }

    #[tokio::test]
    async fn failed_send_keeps_user_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/sessions/3/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "boom"})))
            .expect(3)
            .mount(&server)
            .await;
        mount_session_state(&server, &[]).await;

        let session = ChatSession::new(client_for(&server), 3);
        let err = session
            .send_message("Hello", &mut quiet_renderer())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(500));

        let state = session.state();
        assert_eq!(state.error.as_deref(), Some(SEND_FAILED));
        assert!(!state.loading);
        assert_eq!(state.messages.len(), 1);
        assert!(state.messages[0].is_user());
    }

    #[tokio::test]
    async fn failed_history_load_sets_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/sessions/3/messages"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "gone"})))
            .mount(&server)
            .await;

        let session = ChatSession::new(client_for(&server), 3).with_greeting("Welcome!");
        assert!(session.mount().await.is_err());
        let state = session.state();
        assert_eq!(state.error.as_deref(), Some(LOAD_FAILED));
        assert!(state.messages.is_empty());
    }
}
