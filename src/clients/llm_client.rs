//! LLM 网关客户端 - 基础设施层
//!
//! 唯一持有 HTTP 客户端的模块，只暴露"调用一次模型"的能力。
//!
//! ## 技术栈
//! - 使用 `reqwest` 直接调用 chat-completion 风格的网关
//! - 需要拿到原始 HTTP 状态码和 Retry-After 响应头，供重试策略分类使用
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ApiError, AppError, AppResult, LlmError};
use crate::models::{RawResponse, TokenUsage};

/// 模型调用能力
///
/// 派发流程只依赖这个 trait，测试时可以换成模拟网关。
#[async_trait]
pub trait ModelCaller: Send + Sync {
    /// 调用一次模型，返回原始响应
    ///
    /// 错误分类约定：429 → RateLimited（带 Retry-After 提示），
    /// 5xx → ServerError，网络失败 → RequestFailed；这三类可重试。
    async fn chat(
        &self,
        model: &str,
        system_message: &str,
        user_message: &str,
    ) -> AppResult<RawResponse>;
}

// ========== 请求/响应结构 ==========

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<UsagePayload>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
    #[serde(default)]
    completion_tokens_details: Option<CompletionDetails>,
}

#[derive(Debug, Deserialize)]
struct CompletionDetails {
    #[serde(default)]
    reasoning_tokens: Option<u64>,
}

/// 网关错误响应体（尽力解析，拿不到就算了）
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

// ========== 客户端 ==========

/// LLM 网关客户端
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    reasoning_effort: Option<String>,
}

impl LlmClient {
    /// 创建新的网关客户端
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.llm_timeout_secs))
            .build()
            .map_err(|e| AppError::Other(format!("HTTP客户端初始化失败: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.llm_api_base_url.trim_end_matches('/').to_string(),
            api_key: config.llm_api_key.clone(),
            reasoning_effort: config.llm_reasoning_effort.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ModelCaller for LlmClient {
    async fn chat(
        &self,
        model: &str,
        system_message: &str,
        user_message: &str,
    ) -> AppResult<RawResponse> {
        debug!("调用 LLM API，模型: {}", model);
        debug!("用户消息长度: {} 字符", user_message.len());

        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_message.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_message.to_string(),
                },
            ],
            temperature: 0.0,
            reasoning_effort: self.reasoning_effort.clone(),
        };

        let endpoint = self.endpoint();
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!("LLM API 请求失败 (模型: {}): {}", model, e);
                AppError::api_request_failed(&endpoint, e)
            })?;

        let status = response.status();

        // 频率限制：保留上游的 Retry-After 提示给重试策略
        if status.as_u16() == 429 {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            warn!(
                "LLM API 频率限制 (模型: {}), Retry-After: {:?}",
                model, retry_after
            );
            return Err(AppError::rate_limited(model, retry_after));
        }

        if status.is_server_error() {
            warn!("LLM API 服务器错误 (模型: {}): HTTP {}", model, status);
            return Err(AppError::server_error(model, status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::api_request_failed(&endpoint, e))?;

        if !status.is_success() {
            return Err(AppError::Api(ApiError::BadResponse {
                model: model.to_string(),
                status: status.as_u16(),
                message: extract_error_message(&body),
            }));
        }

        let payload: ChatResponse = serde_json::from_str(&body)?;

        let content = payload
            .choices
            .first()
            .ok_or_else(|| {
                AppError::Llm(LlmError::EmptyResponse {
                    model: model.to_string(),
                })
            })?
            .message
            .content
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                AppError::Llm(LlmError::EmptyContent {
                    model: model.to_string(),
                })
            })?;

        debug!("LLM API 调用成功 (模型: {})", model);

        Ok(RawResponse {
            content: content.trim().to_string(),
            model: payload.model.unwrap_or_else(|| model.to_string()),
            usage: payload.usage.map(TokenUsage::from),
            received_at: Utc::now(),
        })
    }
}

impl From<UsagePayload> for TokenUsage {
    fn from(u: UsagePayload) -> Self {
        TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            reasoning_tokens: u
                .completion_tokens_details
                .and_then(|d| d.reasoning_tokens),
            total_tokens: u.total_tokens,
        }
    }
}

/// 解析 Retry-After 响应头（只支持秒数形式）
fn parse_retry_after(header: Option<&str>) -> Option<u64> {
    header.and_then(|s| s.trim().parse::<u64>().ok())
}

/// 从错误响应体中提取 message 字段
fn extract_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|env| env.error)
        .and_then(|e| e.message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("30")), Some(30));
        assert_eq!(parse_retry_after(Some(" 5 ")), Some(5));
        // HTTP 日期形式不支持，按无提示处理
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2026 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn test_extract_error_message() {
        let body = r#"{"error": {"message": "model not found", "type": "invalid_request_error"}}"#;
        assert_eq!(
            extract_error_message(body),
            Some("model not found".to_string())
        );
        assert_eq!(extract_error_message("not json"), None);
    }

    #[test]
    fn test_usage_mapping() {
        let payload: ChatResponse = serde_json::from_str(
            r#"{
                "choices": [{"message": {"content": "ok"}}],
                "usage": {
                    "prompt_tokens": 120,
                    "completion_tokens": 40,
                    "total_tokens": 160,
                    "completion_tokens_details": {"reasoning_tokens": 16}
                }
            }"#,
        )
        .unwrap();

        let usage = TokenUsage::from(payload.usage.unwrap());
        assert_eq!(usage.input_tokens, 120);
        assert_eq!(usage.output_tokens, 40);
        assert_eq!(usage.reasoning_tokens, Some(16));
        assert_eq!(usage.total_tokens, 160);
    }

    #[test]
    fn test_usage_absent_is_none() {
        let payload: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": "ok"}}]}"#).unwrap();
        assert!(payload.usage.is_none());
    }
}
