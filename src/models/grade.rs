//! 评分结果数据模型
//!
//! 定义解析器的规范输出（GradeRecord / ValidationError）
//! 以及网关返回的原始响应（RawResponse / TokenUsage）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// 整体解析失败时使用的哨兵题目ID
///
/// 整段响应都无法恢复出结构时，解析器会产出一条使用该ID的
/// ValidationError，让失败在按任务的错误列表中可见，
/// 同时不污染真实题目的统计。
pub const PARSE_ERROR_QUESTION_ID: &str = "__parse_error__";

/// Token 用量计数（可选透传）
///
/// 仅用于成本观测，随 GradeRecord 一起记录，不参与任何评分逻辑。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    pub total_tokens: u64,
}

/// 模型调用返回的原始响应
///
/// 由派发引擎独占持有，交给解析器后不再修改。
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// 模型返回的自由文本（预期内嵌 JSON）
    pub content: String,
    /// 实际响应的模型名
    pub model: String,
    /// Token 用量（网关提供时）
    pub usage: Option<TokenUsage>,
    /// 接收时间
    pub received_at: DateTime<Utc>,
}

/// 规范化的单题评分记录
///
/// `marks_awarded` 为 `None` 表示"无法评分"（如字迹不清），
/// 与 `Some(0.0)`（确实得 0 分）是两个不同的业务结果，
/// 任何环节都不允许把两者混为一谈。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRecord {
    pub question_id: String,
    /// 得分；非空时必为有限数，最多保留 2 位小数，不做上限裁剪
    pub marks_awarded: Option<f64>,
    /// 评分说明；解析时缺省为空字符串
    pub rubric_notes: Option<String>,
}

/// 解析失败记录
///
/// 与同一任务的成功记录共存——部分成功是预期结果
/// （一些题目解析成功，另一些失败）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub question_id: String,
    pub message: String,
    /// 原始文本片段（截断保留，用于排查）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_fragment: Option<String>,
}

impl ValidationError {
    /// 创建整体解析失败的哨兵错误
    pub fn parse_failure(message: impl Into<String>, raw_fragment: impl Into<String>) -> Self {
        Self {
            question_id: PARSE_ERROR_QUESTION_ID.to_string(),
            message: message.into(),
            raw_fragment: Some(raw_fragment.into()),
        }
    }
}

/// 解析器输出：成功记录 + 失败记录
///
/// 解析器永不返回 Err——任何畸形输入都转化为 errors 列表。
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub records: Vec<GradeRecord>,
    pub errors: Vec<ValidationError>,
}

/// (模型, 尝试) 维度的键
///
/// 统计和错误列表都按这个维度分组。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelTryKey {
    pub model_name: String,
    pub try_index: u32,
}

impl ModelTryKey {
    pub fn new(model_name: impl Into<String>, try_index: u32) -> Self {
        Self {
            model_name: model_name.into(),
            try_index,
        }
    }
}

impl Display for ModelTryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.model_name, self.try_index)
    }
}
