//! Gap analyzer port.
//!
//! The analyzer scores how far a guesser's empathy attempt sits from the
//! subject's actual statement. Two implementations: [`HttpAnalyzer`] POSTs
//! both texts to an external model endpoint; [`LexicalAnalyzer`] is the
//! offline fallback using normalized string distance. Either may fail —
//! the reconciler recovers by defaulting to a conservative offer, so no
//! error here ever reaches an API caller.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AnalyzerError;

/// Maximum analyzer response body size (64 KiB) — a gap summary should
/// never come close.
const MAX_RESPONSE_SIZE: usize = 64 * 1024;

/// The analyzer's verdict on one guesser/subject pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapAnalysis {
    /// Gap magnitude in `[0, 1]`; 0 is a perfect match.
    pub gap_score: f64,
    /// Human-readable summary of what the guesser missed.
    pub gap_summary: String,
    /// What the subject might clarify, if the analyzer has a suggestion.
    #[serde(default)]
    pub suggested_share_focus: Option<String>,
}

/// Scores the gap between a guesser's attempt and the subject's statement.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyzes one pair of texts.
    async fn analyze(
        &self,
        guesser_text: &str,
        subject_text: &str,
    ) -> Result<GapAnalysis, AnalyzerError>;
}

// ============================================================================
// HTTP analyzer
// ============================================================================

/// Request body sent to the external analyzer endpoint.
#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    guesser_text: &'a str,
    subject_text: &'a str,
}

/// External analyzer reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpAnalyzer {
    /// Creates an analyzer for the given endpoint.
    ///
    /// The client follows no redirects — the endpoint is operator
    /// configuration, not a browsing surface.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built (should never happen).
    #[must_use]
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            endpoint,
            timeout,
        }
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(
        &self,
        guesser_text: &str,
        subject_text: &str,
    ) -> Result<GapAnalysis, AnalyzerError> {
        debug!(endpoint = %self.endpoint, "calling gap analyzer");

        let body = AnalyzeRequest {
            guesser_text,
            subject_text,
        };

        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(&self.endpoint).json(&body).send(),
        )
        .await
        .map_err(|_| AnalyzerError::Timeout)?
        .map_err(|e| AnalyzerError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalyzerError::HttpStatus(status.as_u16()));
        }

        let bytes = tokio::time::timeout(self.timeout, response.bytes())
            .await
            .map_err(|_| AnalyzerError::Timeout)?
            .map_err(|e| AnalyzerError::Network(e.to_string()))?;

        if bytes.len() > MAX_RESPONSE_SIZE {
            return Err(AnalyzerError::InvalidResponse(format!(
                "response body exceeds {MAX_RESPONSE_SIZE} byte limit"
            )));
        }

        let analysis: GapAnalysis = serde_json::from_slice(&bytes)
            .map_err(|e| AnalyzerError::InvalidResponse(e.to_string()))?;

        validate_score(analysis.gap_score)?;
        Ok(analysis)
    }
}

// ============================================================================
// Lexical analyzer
// ============================================================================

/// Offline analyzer scoring the gap as normalized edit distance.
///
/// Crude by design: it exists so development and tests run without an
/// external model, and so a deployment can degrade rather than stop when
/// no endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalAnalyzer;

#[async_trait]
impl Analyzer for LexicalAnalyzer {
    async fn analyze(
        &self,
        guesser_text: &str,
        subject_text: &str,
    ) -> Result<GapAnalysis, AnalyzerError> {
        let guesser = guesser_text.trim().to_lowercase();
        let subject = subject_text.trim().to_lowercase();

        let similarity = strsim::normalized_levenshtein(&guesser, &subject);
        let gap_score = (1.0 - similarity).clamp(0.0, 1.0);

        Ok(GapAnalysis {
            gap_score,
            gap_summary: format!(
                "lexical similarity {:.0}% between attempt and statement",
                similarity * 100.0
            ),
            suggested_share_focus: None,
        })
    }
}

fn validate_score(score: f64) -> Result<(), AnalyzerError> {
    if score.is_finite() && (0.0..=1.0).contains(&score) {
        Ok(())
    } else {
        Err(AnalyzerError::ScoreOutOfRange(score))
    }
}
