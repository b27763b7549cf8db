//! Shared integration-test harness: an in-process app with a scripted
//! analyzer, driven through the axum router via `tower::ServiceExt`.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

use attune::analyzer::{Analyzer, GapAnalysis};
use attune::api::{AppState, USER_HEADER, router};
use attune::config::AttuneConfig;
use attune::error::AnalyzerError;
use attune::notify::{EventEnvelope, NotificationPort};

/// Analyzer returning a fixed gap score.
pub struct FixedAnalyzer(pub f64);

#[async_trait]
impl Analyzer for FixedAnalyzer {
    async fn analyze(&self, _: &str, _: &str) -> Result<GapAnalysis, AnalyzerError> {
        Ok(GapAnalysis {
            gap_score: self.0,
            gap_summary: format!("fixed gap {}", self.0),
            suggested_share_focus: Some("the missing detail".to_string()),
        })
    }
}

/// Analyzer walking through a scripted score sequence, repeating the last
/// entry once exhausted.
pub struct ScriptedAnalyzer {
    scores: Vec<f64>,
    calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    pub fn new(scores: Vec<f64>) -> Self {
        assert!(!scores.is_empty());
        Self {
            scores,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(&self, _: &str, _: &str) -> Result<GapAnalysis, AnalyzerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let score = self.scores[call.min(self.scores.len() - 1)];
        Ok(GapAnalysis {
            gap_score: score,
            gap_summary: format!("scripted gap {score}"),
            suggested_share_focus: None,
        })
    }
}

/// In-process application with one pre-created session.
pub struct Harness {
    pub state: AppState,
    pub router: Router,
    pub session_id: Uuid,
    pub a: Uuid,
    pub b: Uuid,
}

impl Harness {
    /// Builds a harness around the given analyzer and default config.
    pub fn new(analyzer: Arc<dyn Analyzer>) -> Self {
        Self::with_config(analyzer, &AttuneConfig::default())
    }

    /// Builds a harness with an explicit config.
    pub fn with_config(analyzer: Arc<dyn Analyzer>, config: &AttuneConfig) -> Self {
        let state = AppState::new(analyzer, config, None, CancellationToken::new());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let session = state.store.create_session(a, b);
        let session_id = session.id;
        Self {
            router: router(state.clone()),
            state,
            session_id,
            a,
            b,
        }
    }

    /// Sends a POST with a JSON body as `user`.
    pub async fn post(&self, path: &str, user: Uuid, body: Value) -> (StatusCode, Value) {
        let request = Request::post(path)
            .header(header::CONTENT_TYPE, "application/json")
            .header(USER_HEADER, user.to_string())
            .body(Body::from(body.to_string()))
            .expect("request build");
        self.send(request).await
    }

    /// Sends a body-less POST as `user`.
    pub async fn post_empty(&self, path: &str, user: Uuid) -> (StatusCode, Value) {
        let request = Request::post(path)
            .header(USER_HEADER, user.to_string())
            .body(Body::empty())
            .expect("request build");
        self.send(request).await
    }

    /// Sends a GET as `user`.
    pub async fn get(&self, path: &str, user: Uuid) -> (StatusCode, Value) {
        let request = Request::get(path)
            .header(USER_HEADER, user.to_string())
            .body(Body::empty())
            .expect("request build");
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router call");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body collect");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Records feelings statements for both participants.
    pub async fn submit_feelings(&self) {
        for (user, text) in [(self.a, "I feel unheard"), (self.b, "I feel rushed")] {
            let path = format!("/sessions/{}/feelings", self.session_id);
            let (status, _) = self
                .post(&path, user, serde_json::json!({ "content": text }))
                .await;
            assert_eq!(status, StatusCode::NO_CONTENT);
        }
    }

    /// Drafts and consents an attempt for `user`.
    pub async fn draft_and_consent(&self, user: Uuid, content: &str) {
        let draft = format!("/sessions/{}/empathy/draft", self.session_id);
        let (status, _) = self
            .post(&draft, user, serde_json::json!({ "content": content }))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let consent = format!("/sessions/{}/empathy/consent", self.session_id);
        let (status, body) = self.post_empty(&consent, user).await;
        assert_eq!(status, StatusCode::OK, "consent failed: {body}");
    }

    /// Polls the notifier until an event matching `pred` appears.
    ///
    /// Panics after two seconds without a match; reconciliations run on
    /// spawned tasks so results are only eventually visible.
    pub async fn wait_for_event(&self, pred: impl Fn(&EventEnvelope) -> bool) -> EventEnvelope {
        for _ in 0..200 {
            if let Some(envelope) = self
                .state
                .notifier
                .recent(self.session_id)
                .into_iter()
                .find(&pred)
            {
                return envelope;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "event did not arrive; recent: {:?}",
            self.state.notifier.recent(self.session_id)
        );
    }
}
