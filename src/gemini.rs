//! Gemini HTTP 전송 계층
//!
//! 임베딩/생성 API가 공유하는 요청 루프입니다.
//! - 호출 간 최소 딜레이 + 분당 요청 수 제한
//! - 429/5xx 및 네트워크 오류 시 지수 백오프 재시도
//! - 재시도 소진 시 `TransientService`, 그 외 실패는 `Service`
//!
//! source: https://ai.google.dev/gemini-api/docs

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{RagError, Result};

/// Gemini API 베이스 URL
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

// ============================================================================
// Rate Limiter
// ============================================================================

/// Rate Limiter with minimum delay between requests
#[derive(Debug)]
struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: usize,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    fn new(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self {
            requests: Vec::new(),
            max_requests: rpm as usize,
            window: Duration::from_secs(60),
            min_delay: Duration::from_millis(60_000 / rpm as u64),
            last_request: None,
        }
    }

    /// 요청 가능해질 때까지 대기
    async fn acquire(&mut self) {
        // 1. 최소 딜레이 (버스트 방지)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        // 2. 윈도우 밖의 요청 제거 후 한도 확인
        let now = Instant::now();
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        if self.requests.len() >= self.max_requests {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        // 3. 현재 요청 기록
        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

// ============================================================================
// Client
// ============================================================================

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

/// Gemini 공용 HTTP 클라이언트
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    http: reqwest::Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    max_retries: u32,
    /// 로그/에러에 쓰는 서비스 이름
    service: &'static str,
}

impl GeminiClient {
    pub fn new(
        service: &'static str,
        api_key: String,
        timeout: Duration,
        requests_per_minute: u32,
        max_retries: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            http,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(requests_per_minute))),
            max_retries,
            service,
        })
    }

    /// `{GEMINI_BASE_URL}/models/{model}:{method}` 로 POST
    pub async fn call<B, R>(&self, model: &str, method: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/models/{}:{}", GEMINI_BASE_URL, model, method);
        let mut last_error: Option<RagError> = None;

        for attempt in 0..=self.max_retries {
            {
                let mut limiter = self.rate_limiter.lock().await;
                limiter.acquire().await;
            }

            // API 키는 URL이 아닌 헤더로 전송
            let response = match self
                .http
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(RagError::transient(
                        self.service,
                        format!("request failed: {}", e),
                    ));
                    self.backoff(attempt, "request failed").await;
                    continue;
                }
            };

            let status = response.status();
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    last_error = Some(RagError::transient(
                        self.service,
                        format!("failed to read response body: {}", e),
                    ));
                    self.backoff(attempt, "body read failed").await;
                    continue;
                }
            };

            if status.is_success() {
                return serde_json::from_str(&body).map_err(|e| {
                    RagError::service(self.service, format!("unexpected response: {}", e))
                });
            }

            if is_transient_status(status.as_u16()) {
                last_error = Some(RagError::transient(
                    self.service,
                    format!("HTTP {}", status.as_u16()),
                ));
                self.backoff(attempt, &format!("HTTP {}", status.as_u16())).await;
                continue;
            }

            // 다른 에러 - 즉시 실패
            if let Ok(error) = serde_json::from_str::<GeminiError>(&body) {
                return Err(RagError::service(
                    self.service,
                    format!("{} ({})", error.error.message, error.error.status),
                ));
            }
            return Err(RagError::service(
                self.service,
                format!("HTTP {}: {}", status, body),
            ));
        }

        Err(last_error.unwrap_or_else(|| {
            RagError::transient(
                self.service,
                format!("failed after {} retries", self.max_retries),
            )
        }))
    }

    async fn backoff(&self, attempt: u32, reason: &str) {
        if attempt >= self.max_retries {
            return;
        }
        let backoff = backoff_delay(attempt);
        tracing::warn!(
            "{} {}, retrying in {:?} (attempt {}/{})",
            self.service,
            reason,
            backoff,
            attempt + 1,
            self.max_retries
        );
        tokio::time::sleep(backoff).await;
    }
}

/// `attempt`번째 실패 뒤 대기 시간 (2s, 4s, 8s, ...)
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt)))
}

/// 요청 한 번이 재시도를 모두 소진하는 데 걸리는 최대 시간
///
/// 시도마다 `per_attempt` 타임아웃 + 시도 사이의 백오프 합계.
/// 바깥 타임아웃을 이보다 짧게 잡으면 재시도가 실행되지 않습니다.
pub fn retry_deadline(per_attempt: Duration, max_retries: u32) -> Duration {
    let attempts = per_attempt.saturating_mul(max_retries.saturating_add(1));
    (0..max_retries).fold(attempts, |total, attempt| {
        total.saturating_add(backoff_delay(attempt))
    })
}

/// 재시도 대상 HTTP 상태
fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

// ============================================================================
// Tests
// ============================================================================
