/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化全局日志订阅器
///
/// 默认级别 info；verbose 模式下降到 debug。
/// RUST_LOG 环境变量可以覆盖这里的默认值。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `config`: 程序配置
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 多模型评分比对模式");
    info!("📊 最大并发任务数: {}", config.max_concurrent_units);
    info!("🔁 单任务最大尝试次数: {}", config.max_attempts);
    info!("📁 会话目录: {}", config.session_folder);
    info!("{}", "=".repeat(60));
}

/// 记录会话加载信息
///
/// # 参数
/// - `total`: 会话总数
/// - `max_concurrent`: 最大并发任务数
pub fn log_sessions_loaded(total: usize, max_concurrent: usize) {
    info!("✓ 找到 {} 个待评分的会话", total);
    info!("📋 评分任务将以最多 {} 个并发执行\n", max_concurrent);
}

/// 记录单个会话开始信息
///
/// # 参数
/// - `index`: 会话编号（从 1 开始）
/// - `total`: 会话总数
/// - `session_id`: 会话ID
/// - `units`: 评分任务数量
pub fn log_session_start(index: usize, total: usize, session_id: &str, units: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {}/{} 个会话: {}", index, total, session_id);
    info!("📄 共展开 {} 个评分任务", units);
    info!("{}", "=".repeat(60));
}

/// 记录单个会话完成信息
///
/// # 参数
/// - `session_id`: 会话ID
/// - `success`: 成功任务数
/// - `total`: 任务总数
pub fn log_session_complete(session_id: &str, success: usize, total: usize) {
    info!("\n{}", "─".repeat(60));
    info!("✓ 会话 {} 完成: 成功 {}/{}", session_id, success, total);
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `success`: 成功任务数
/// - `failed`: 失败任务数
/// - `total`: 任务总数
pub fn print_final_stats(success: usize, failed: usize, total: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", success, total);
    info!("❌ 失败: {}", failed);
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
