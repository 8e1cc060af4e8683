/// 程序配置文件
///
/// 配置对象在启动时加载一次，随后显式传递给各层，
/// 不使用全局单例（避免并发批次之间互相影响）。
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时执行的评分任务数量（信号量上限）
    pub max_concurrent_units: usize,
    /// 单个评分任务的最大尝试次数（含首次请求）
    pub max_attempts: u32,
    /// 指数退避基础延迟（毫秒）
    pub backoff_base_ms: u64,
    /// 指数退避延迟上限（毫秒）
    pub backoff_max_ms: u64,
    /// 会话 TOML 文件存放目录
    pub session_folder: String,
    /// 统计报告输出目录
    pub report_folder: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- LLM 网关配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    /// 请求超时（秒）
    pub llm_timeout_secs: u64,
    /// 推理强度透传（low / medium / high，可选）
    pub llm_reasoning_effort: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_units: 4,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            session_folder: "sessions".to_string(),
            report_folder: "reports".to_string(),
            verbose_logging: false,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_timeout_secs: 120,
            llm_reasoning_effort: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrent_units: env_parsed(
                "MAX_CONCURRENT_UNITS",
                default.max_concurrent_units,
                "usize",
            ),
            max_attempts: env_parsed("MAX_ATTEMPTS", default.max_attempts, "u32"),
            backoff_base_ms: env_parsed("BACKOFF_BASE_MS", default.backoff_base_ms, "u64"),
            backoff_max_ms: env_parsed("BACKOFF_MAX_MS", default.backoff_max_ms, "u64"),
            session_folder: std::env::var("SESSION_FOLDER").unwrap_or(default.session_folder),
            report_folder: std::env::var("REPORT_FOLDER").unwrap_or(default.report_folder),
            verbose_logging: env_parsed("VERBOSE_LOGGING", default.verbose_logging, "bool"),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_timeout_secs: env_parsed("LLM_TIMEOUT_SECS", default.llm_timeout_secs, "u64"),
            llm_reasoning_effort: std::env::var("LLM_REASONING_EFFORT").ok(),
        }
    }
}

/// 解析环境变量；值非法时告警并回退到默认值（启动不因此失败）
fn env_parsed<T: std::str::FromStr>(var_name: &str, default: T, expected_type: &str) -> T {
    match std::env::var(var_name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                let err = crate::error::ConfigError::EnvVarParseFailed {
                    var_name: var_name.to_string(),
                    value: raw,
                    expected_type: expected_type.to_string(),
                };
                tracing::warn!("⚠️ {}，使用默认值", err);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_failure_falls_back_to_default() {
        std::env::set_var("MAX_ATTEMPTS", "不是数字");
        let config = Config::from_env();
        std::env::remove_var("MAX_ATTEMPTS");

        assert_eq!(config.max_attempts, Config::default().max_attempts);
    }

    #[test]
    fn test_env_override_applies() {
        std::env::set_var("BACKOFF_BASE_MS", "250");
        let config = Config::from_env();
        std::env::remove_var("BACKOFF_BASE_MS");

        assert_eq!(config.backoff_base_ms, 250);
    }
}
