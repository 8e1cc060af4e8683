//! 单个会话处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块负责处理单个评分会话，是会话级别的编排器。
//!
//! ## 核心功能
//!
//! 1. **派发前校验**：校验失败立即置 Failed，不派发任何任务
//! 2. **任务展开**：评分请求 → 独立的 (模型, 尝试) 评分任务
//! 3. **并发派发**：所有任务一次性 spawn，由信号量限制
//!    同时在途的网络请求数（退避等待不占名额）
//! 4. **状态推进**：Created → Grading → Graded | Failed
//! 5. **统计产出**：全部任务完成后计算差异报告并写入 JSON 文件

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::clients::ModelCaller;
use crate::config::Config;
use crate::error::AppError;
use crate::models::{SessionConfig, SessionStatus};
use crate::services::{DiscrepancyEngine, ResultStore, RetryPolicy, StatsView};
use crate::utils::logging::{log_session_complete, log_session_start};
use crate::workflow::{UnitCtx, UnitFlow};

/// 单个会话的处理结果
#[derive(Debug, Default)]
pub struct SessionOutcome {
    pub units_total: usize,
    pub units_success: usize,
    pub units_failed: usize,
    pub report_path: Option<PathBuf>,
}

/// 处理单个评分会话
///
/// # 参数
/// - `config`: 程序配置
/// - `session`: 会话配置（已通过加载时校验）
/// - `session_index`: 会话编号（从 1 开始，用于日志）
/// - `total_sessions`: 会话总数（用于日志）
/// - `caller`: 模型调用能力
/// - `store`: 结果存储
pub async fn process_session(
    config: &Config,
    session: SessionConfig,
    session_index: usize,
    total_sessions: usize,
    caller: Arc<dyn ModelCaller>,
    store: Arc<ResultStore>,
) -> Result<SessionOutcome> {
    store.set_session_status(&session.session_id, SessionStatus::Created);

    // 派发前再校验一次：批次级致命错误在这里拦截
    if let Err(e) = session.validate() {
        store.set_session_status(&session.session_id, SessionStatus::Failed);
        return Err(e).with_context(|| format!("会话 {} 配置非法", session.session_id));
    }

    let units = session.expand_units();
    log_session_start(session_index, total_sessions, &session.session_id, units.len());

    store.set_session_status(&session.session_id, SessionStatus::Grading);

    // 并发控制：名额由 UnitFlow 按"一次网络尝试"粒度获取，
    // 这里只负责创建共享的信号量并一次性 spawn 所有任务
    let limiter = Arc::new(Semaphore::new(config.max_concurrent_units));
    let retry = RetryPolicy::from_config(config);
    let session = Arc::new(session);

    let mut handles = Vec::new();
    for (idx, unit) in units.into_iter().enumerate() {
        let unit_index = idx + 1;
        let ctx = UnitCtx::new(
            session.session_id.clone(),
            unit_index,
            unit.target.label(),
            unit.try_index,
        );

        let flow = UnitFlow::new(caller.clone(), store.clone(), retry.clone(), limiter.clone());
        let session_clone = session.clone();

        let handle = tokio::spawn(async move {
            match flow.run(&session_clone, &unit, &ctx).await {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    error!("{} ❌ 处理过程中发生错误: {}", ctx, e);
                    Err(e)
                }
            }
        });
        handles.push((unit_index, handle));
    }

    let mut outcome = SessionOutcome {
        units_total: handles.len(),
        ..Default::default()
    };

    for (unit_index, handle) in handles {
        match handle.await {
            Ok(Ok(unit_outcome)) if unit_outcome.is_success() => outcome.units_success += 1,
            Ok(_) => outcome.units_failed += 1,
            Err(e) => {
                error!(
                    "[会话 {} 任务#{}] 任务执行失败: {}",
                    session.session_id, unit_index, e
                );
                outcome.units_failed += 1;
            }
        }
    }

    log_session_complete(&session.session_id, outcome.units_success, outcome.units_total);

    // 单个任务失败不算致命：只要派发流程本身走完，会话就进入 Graded
    store.set_session_status(&session.session_id, SessionStatus::Graded);

    // ========== 统计与报告 ==========
    let engine = DiscrepancyEngine::new(&session);
    let view = engine.stats_view(
        &session,
        SessionStatus::Graded,
        &store.records_by_model_try(&session.session_id),
        &store.errors_by_model_try(&session.session_id),
        &store.usage_by_model_try(&session.session_id),
    );

    let report_path = write_report(config, &view).await?;
    info!(
        "📊 会话 {} 统计报告已写入: {}",
        session.session_id,
        report_path.display()
    );
    outcome.report_path = Some(report_path);

    Ok(outcome)
}

/// 将统计视图写入 JSON 报告文件
async fn write_report(config: &Config, view: &StatsView) -> Result<PathBuf> {
    let folder = PathBuf::from(&config.report_folder);
    tokio::fs::create_dir_all(&folder)
        .await
        .map_err(|e| AppError::file_write_failed(folder.display().to_string(), e))?;

    let path = folder.join(format!("{}.json", view.session_id));
    let json = serde_json::to_string_pretty(view).context("统计视图序列化失败")?;
    tokio::fs::write(&path, json)
        .await
        .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

    Ok(path)
}
