//! 批量会话处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量会话的处理和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：创建 LLM 网关客户端和结果存储
//! 2. **批量加载**：扫描并加载所有待评分的会话（`Vec<SessionConfig>`）
//! 3. **逐会话处理**：委托 session_processor 处理单个会话
//! 4. **全局统计**：汇总所有会话的评分任务结果
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个会话的细节
//! - **资源所有者**：唯一持有 ModelCaller 和 ResultStore 的模块
//! - **故障隔离**：单个会话的致命错误不影响其他会话

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::clients::{LlmClient, ModelCaller};
use crate::config::Config;
use crate::models::{load_all_session_files, SessionConfig, SessionStatus};
use crate::orchestrator::session_processor;
use crate::services::ResultStore;
use crate::utils::logging::{log_sessions_loaded, log_startup, print_final_stats};

/// 应用主结构
pub struct App {
    config: Config,
    store: Arc<ResultStore>,
    caller: Arc<dyn ModelCaller>,
}

impl App {
    /// 初始化应用
    pub fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);

        if config.llm_api_key.is_empty() {
            warn!("⚠️ LLM_API_KEY 未设置，网关调用将会失败");
        }

        let caller = Arc::new(LlmClient::new(&config)?);
        Ok(Self::with_caller(config, caller))
    }

    /// 使用指定的模型调用能力创建应用（测试时注入模拟网关）
    pub fn with_caller(config: Config, caller: Arc<dyn ModelCaller>) -> Self {
        Self {
            config,
            store: Arc::new(ResultStore::new()),
            caller,
        }
    }

    /// 结果存储的共享句柄
    pub fn store(&self) -> Arc<ResultStore> {
        self.store.clone()
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        let sessions = self.load_sessions().await?;

        if sessions.is_empty() {
            warn!("⚠️ 没有找到待评分的会话TOML文件，程序结束");
            return Ok(());
        }

        let total_sessions = sessions.len();
        log_sessions_loaded(total_sessions, self.config.max_concurrent_units);

        let mut stats = ProcessingStats::default();

        for (idx, session) in sessions.into_iter().enumerate() {
            let session_id = session.session_id.clone();
            match session_processor::process_session(
                &self.config,
                session,
                idx + 1,
                total_sessions,
                self.caller.clone(),
                self.store.clone(),
            )
            .await
            {
                Ok(outcome) => {
                    stats.units_total += outcome.units_total;
                    stats.units_success += outcome.units_success;
                    stats.units_failed += outcome.units_failed;
                }
                Err(e) => {
                    // 会话级致命错误：记录并继续处理其他会话
                    error!("❌ 会话 {} 处理失败: {:#}", session_id, e);
                    self.store
                        .set_session_status(&session_id, SessionStatus::Failed);
                    stats.sessions_failed += 1;
                }
            }
        }

        print_final_stats(stats.units_success, stats.units_failed, stats.units_total);
        if stats.sessions_failed > 0 {
            warn!("⚠️ 有 {} 个会话因致命错误未完成评分", stats.sessions_failed);
        }

        Ok(())
    }

    /// 加载会话
    async fn load_sessions(&self) -> Result<Vec<SessionConfig>> {
        info!("\n📁 正在扫描待评分的会话...");
        load_all_session_files(&self.config.session_folder).await
    }
}

/// 处理统计
#[derive(Debug, Default)]
struct ProcessingStats {
    units_total: usize,
    units_success: usize,
    units_failed: usize,
    sessions_failed: usize,
}
