//! 评分任务处理流程 - 流程层
//!
//! 核心职责：定义"一个评分任务"的完整处理流程
//!
//! 流程顺序：
//! 1. 构建提示词（模型对先走规则提取阶段）
//! 2. 带重试地调用模型（每次网络尝试单独占用并发名额）
//! 3. 解析响应为规范记录
//! 4. 幂等写入结果存储
//!
//! 失败语义：任务级失败只记录、不上抛——单个任务失败
//! 不影响其他任务，也不改变会话状态。

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::clients::ModelCaller;
use crate::error::{AppError, AppResult, LlmError};
use crate::models::{
    GradingTarget, GradingUnit, ModelTryKey, RawResponse, SessionConfig, TokenUsage,
    ValidationError, PARSE_ERROR_QUESTION_ID,
};
use crate::services::{PromptBuilder, ResponseParser, ResultStore, RetryPolicy};
use crate::utils::truncate_text;
use crate::workflow::unit_ctx::UnitCtx;

/// 评分任务处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// 响应已解析入库（可能包含部分题目的解析失败）
    Success {
        record_count: usize,
        error_count: usize,
    },
    /// 模型调用失败（重试耗尽或不可重试错误）
    Failed { reason: String },
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Success { .. })
    }
}

/// 评分任务处理流程
///
/// - 编排单个评分任务的完整流程
/// - 不持有 HTTP 客户端，只依赖 ModelCaller trait
/// - 并发名额按"一次网络尝试"粒度获取，退避等待不占名额
pub struct UnitFlow {
    caller: Arc<dyn ModelCaller>,
    store: Arc<ResultStore>,
    parser: ResponseParser,
    retry: RetryPolicy,
    limiter: Arc<Semaphore>,
}

impl UnitFlow {
    /// 创建新的评分任务流程
    pub fn new(
        caller: Arc<dyn ModelCaller>,
        store: Arc<ResultStore>,
        retry: RetryPolicy,
        limiter: Arc<Semaphore>,
    ) -> Self {
        Self {
            caller,
            store,
            parser: ResponseParser::new(),
            retry,
            limiter,
        }
    }

    pub async fn run(
        &self,
        session: &SessionConfig,
        unit: &GradingUnit,
        ctx: &UnitCtx,
    ) -> Result<UnitOutcome> {
        let key = ModelTryKey::new(unit.target.label(), unit.try_index);
        let builder = PromptBuilder::new(session.templates());
        let mut total_usage: Option<TokenUsage> = None;

        // ========== 阶段 1: 获取模型响应 ==========
        let response = match &unit.target {
            GradingTarget::Single(model) => {
                let (system, user) = builder.grading_messages(&session.questions, None);
                match self.call_with_retry(ctx, model, &system, &user).await {
                    Ok(response) => response,
                    Err(e) => return Ok(self.record_failure(session, &key, ctx, e.to_string())),
                }
            }
            GradingTarget::Pair {
                rubric_model,
                assessment_model,
            } => {
                // 第一阶段：提取评分规则
                info!("{} 🔍 规则提取阶段，模型: {}", ctx, rubric_model);
                let (system, user) = builder.rubric_messages(&session.questions);
                let rubric = match self.call_with_retry(ctx, rubric_model, &system, &user).await {
                    Ok(response) => {
                        merge_usage(&mut total_usage, response.usage.as_ref());
                        response.content
                    }
                    // 第一阶段失败直接放弃，不进入评分阶段
                    Err(e) => {
                        let err = AppError::Llm(LlmError::RubricStageFailed {
                            rubric_model: rubric_model.clone(),
                            reason: e.to_string(),
                        });
                        return Ok(self.record_failure(session, &key, ctx, err.to_string()));
                    }
                };

                // 第二阶段：按规则评分
                info!("{} 📝 评分阶段，模型: {}", ctx, assessment_model);
                let (system, user) = builder.grading_messages(&session.questions, Some(&rubric));
                match self
                    .call_with_retry(ctx, assessment_model, &system, &user)
                    .await
                {
                    Ok(response) => response,
                    Err(e) => return Ok(self.record_failure(session, &key, ctx, e.to_string())),
                }
            }
        };

        merge_usage(&mut total_usage, response.usage.as_ref());

        // ========== 阶段 2: 解析并入库 ==========
        let outcome = self.parser.parse(&response.content);
        let record_count = outcome.records.len();
        let error_count = outcome.errors.len();

        self.store
            .upsert_records(&session.session_id, &key, &outcome.records);
        self.store
            .set_unit_errors(&session.session_id, &key, outcome.errors);
        if let Some(usage) = total_usage {
            self.store.record_usage(&session.session_id, &key, usage);
        }

        if error_count > 0 {
            warn!(
                "{} ⚠️ 解析完成: {} 条记录, {} 条失败",
                ctx, record_count, error_count
            );
        } else {
            info!("{} ✓ 解析完成: {} 条记录", ctx, record_count);
        }

        Ok(UnitOutcome::Success {
            record_count,
            error_count,
        })
    }

    /// 带重试地调用一次模型
    ///
    /// 并发名额在每次网络尝试前获取、响应返回后立即释放，
    /// 退避等待期间其他任务可以使用该名额。
    async fn call_with_retry(
        &self,
        ctx: &UnitCtx,
        model: &str,
        system_message: &str,
        user_message: &str,
    ) -> AppResult<RawResponse> {
        let mut attempt: u32 = 1;
        loop {
            let permit = self
                .limiter
                .acquire()
                .await
                .map_err(|_| AppError::Other("并发信号量已关闭".to_string()))?;
            let result = self.caller.chat(model, system_message, user_message).await;
            drop(permit);

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts() => {
                    let delay = self.retry.delay_for(attempt, e.retry_after_hint());
                    warn!(
                        "{} ⚠️ 第 {}/{} 次尝试失败: {}，{} 毫秒后重试",
                        ctx,
                        attempt,
                        self.retry.max_attempts(),
                        truncate_text(&e.to_string(), 200),
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 记录任务级失败并返回 Failed 结果
    ///
    /// 失败以哨兵记录写入该任务的错误列表，报告里可见失败原因。
    fn record_failure(
        &self,
        session: &SessionConfig,
        key: &ModelTryKey,
        ctx: &UnitCtx,
        reason: String,
    ) -> UnitOutcome {
        warn!("{} ❌ 任务失败: {}", ctx, reason);
        self.store.set_unit_errors(
            &session.session_id,
            key,
            vec![ValidationError {
                question_id: PARSE_ERROR_QUESTION_ID.to_string(),
                message: reason.clone(),
                raw_fragment: None,
            }],
        );
        UnitOutcome::Failed { reason }
    }
}

/// 累加模型对两个阶段的 Token 用量
fn merge_usage(total: &mut Option<TokenUsage>, usage: Option<&TokenUsage>) {
    let Some(usage) = usage else { return };
    match total {
        Some(t) => {
            t.input_tokens += usage.input_tokens;
            t.output_tokens += usage.output_tokens;
            t.total_tokens += usage.total_tokens;
            t.reasoning_tokens = match (t.reasoning_tokens, usage.reasoning_tokens) {
                (Some(a), Some(b)) => Some(a + b),
                (a, b) => a.or(b),
            };
        }
        None => *total = Some(usage.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_usage_accumulates() {
        let mut total = None;
        merge_usage(
            &mut total,
            Some(&TokenUsage {
                input_tokens: 100,
                output_tokens: 20,
                reasoning_tokens: Some(5),
                total_tokens: 120,
            }),
        );
        merge_usage(
            &mut total,
            Some(&TokenUsage {
                input_tokens: 50,
                output_tokens: 10,
                reasoning_tokens: None,
                total_tokens: 60,
            }),
        );

        let total = total.unwrap();
        assert_eq!(total.input_tokens, 150);
        assert_eq!(total.total_tokens, 180);
        assert_eq!(total.reasoning_tokens, Some(5));
    }

    #[test]
    fn test_merge_usage_ignores_absent() {
        let mut total = None;
        merge_usage(&mut total, None);
        assert!(total.is_none());
    }
}
