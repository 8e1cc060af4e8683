use std::fmt;

/// 应用程序错误类型
#[derive(Debug)]
pub enum AppError {
    /// 网关调用错误（HTTP 层）
    Api(ApiError),
    /// LLM 内容层错误
    Llm(LlmError),
    /// 文件操作错误
    File(FileError),
    /// 会话配置校验错误
    Session(SessionError),
    /// 配置错误
    Config(ConfigError),
    /// 其他错误（用于包装第三方库错误）
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Api(e) => write!(f, "API错误: {}", e),
            AppError::Llm(e) => write!(f, "LLM错误: {}", e),
            AppError::File(e) => write!(f, "文件错误: {}", e),
            AppError::Session(e) => write!(f, "会话配置错误: {}", e),
            AppError::Config(e) => write!(f, "配置错误: {}", e),
            AppError::Other(msg) => write!(f, "错误: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Api(e) => Some(e),
            AppError::Llm(e) => Some(e),
            AppError::File(e) => Some(e),
            AppError::Session(e) => Some(e),
            AppError::Config(e) => Some(e),
            AppError::Other(_) => None,
        }
    }
}

/// 网关调用错误
#[derive(Debug)]
pub enum ApiError {
    /// 网络请求失败（连接、超时等，可重试）
    RequestFailed {
        endpoint: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 请求频率限制（HTTP 429，可重试）
    RateLimited {
        model: String,
        /// 上游 Retry-After 提示（秒）
        retry_after: Option<u64>,
    },
    /// 上游服务器错误（HTTP 5xx，可重试）
    ServerError { model: String, status: u16 },
    /// API 返回错误响应（4xx 等，不可重试）
    BadResponse {
        model: String,
        status: u16,
        message: Option<String>,
    },
    /// JSON 解析失败
    JsonParseFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::RequestFailed { endpoint, source } => {
                write!(f, "API请求失败 ({}): {}", endpoint, source)
            }
            ApiError::RateLimited { model, retry_after } => {
                write!(
                    f,
                    "API请求频率限制 (模型: {}), 建议等待: {:?}秒",
                    model, retry_after
                )
            }
            ApiError::ServerError { model, status } => {
                write!(f, "上游服务器错误 (模型: {}): HTTP {}", model, status)
            }
            ApiError::BadResponse {
                model,
                status,
                message,
            } => {
                write!(
                    f,
                    "API返回错误响应 (模型: {}): status={}, message={:?}",
                    model, status, message
                )
            }
            ApiError::JsonParseFailed { source } => {
                write!(f, "JSON解析失败: {}", source)
            }
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::RequestFailed { source, .. } | ApiError::JsonParseFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// LLM 内容层错误
#[derive(Debug)]
pub enum LlmError {
    /// 返回结果为空（没有 choices）
    EmptyResponse { model: String },
    /// 返回内容为空
    EmptyContent { model: String },
    /// 评分规则提取阶段失败（模型对的第一阶段）
    RubricStageFailed {
        rubric_model: String,
        reason: String,
    },
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::EmptyResponse { model } => {
                write!(f, "LLM返回结果为空 (模型: {})", model)
            }
            LlmError::EmptyContent { model } => {
                write!(f, "LLM返回内容为空 (模型: {})", model)
            }
            LlmError::RubricStageFailed {
                rubric_model,
                reason,
            } => {
                write!(
                    f,
                    "评分规则提取阶段失败 (模型: {}): {}",
                    rubric_model, reason
                )
            }
        }
    }
}

impl std::error::Error for LlmError {}

/// 文件操作错误
#[derive(Debug)]
pub enum FileError {
    /// 目录不存在
    DirectoryNotFound {
        path: String,
    },
    /// 读取文件失败
    ReadFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 写入文件失败
    WriteFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// TOML 解析失败
    TomlParseFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::DirectoryNotFound { path } => write!(f, "目录不存在: {}", path),
            FileError::ReadFailed { path, source } => {
                write!(f, "读取文件失败 ({}): {}", path, source)
            }
            FileError::WriteFailed { path, source } => {
                write!(f, "写入文件失败 ({}): {}", path, source)
            }
            FileError::TomlParseFailed { path, source } => {
                write!(f, "TOML解析失败 ({}): {}", path, source)
            }
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FileError::ReadFailed { source, .. }
            | FileError::WriteFailed { source, .. }
            | FileError::TomlParseFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 会话配置校验错误
///
/// 在派发任何评分任务之前同步暴露给调用方（快速失败），
/// 携带字段级别的描述信息。
#[derive(Debug)]
pub enum SessionError {
    /// 人工分数引用了未知题目
    UnknownQuestion {
        session_id: String,
        question_id: String,
    },
    /// 人工分数超出 [0, max_marks] 范围
    MarkOutOfRange {
        session_id: String,
        question_id: String,
        mark: f64,
        max_marks: f64,
    },
    /// 题目ID重复
    DuplicateQuestion {
        session_id: String,
        question_id: String,
    },
    /// 模型列表为空
    EmptyModelList { session_id: String },
    /// 尝试次数非法（必须 >= 1）
    InvalidTries {
        session_id: String,
        model: String,
        tries: usize,
    },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::UnknownQuestion {
                session_id,
                question_id,
            } => {
                write!(
                    f,
                    "会话 {} 的人工分数引用了未知题目: {}",
                    session_id, question_id
                )
            }
            SessionError::MarkOutOfRange {
                session_id,
                question_id,
                mark,
                max_marks,
            } => {
                write!(
                    f,
                    "会话 {} 题目 {} 的人工分数 {} 超出范围 [0, {}]",
                    session_id, question_id, mark, max_marks
                )
            }
            SessionError::DuplicateQuestion {
                session_id,
                question_id,
            } => {
                write!(f, "会话 {} 存在重复题目ID: {}", session_id, question_id)
            }
            SessionError::EmptyModelList { session_id } => {
                write!(f, "会话 {} 的模型列表不能为空", session_id)
            }
            SessionError::InvalidTries {
                session_id,
                model,
                tries,
            } => {
                write!(
                    f,
                    "会话 {} 模型 {} 的尝试次数 {} 非法（必须 >= 1）",
                    session_id, model, tries
                )
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 环境变量解析失败
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EnvVarParseFailed {
                var_name,
                value,
                expected_type,
            } => {
                write!(
                    f,
                    "环境变量 {} 解析失败: 值 '{}' 无法转换为 {}",
                    var_name, value, expected_type
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ========== 从常见错误类型转换 ==========
// 注意：不需要手动实现 From<AppError> for anyhow::Error，
// 因为 anyhow 已经为所有实现了 std::error::Error 的类型提供了自动实现

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Api(ApiError::JsonParseFailed {
            source: Box::new(err),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建API请求失败错误
    pub fn api_request_failed(
        endpoint: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Api(ApiError::RequestFailed {
            endpoint: endpoint.into(),
            source: Box::new(source),
        })
    }

    /// 创建频率限制错误
    pub fn rate_limited(model: impl Into<String>, retry_after: Option<u64>) -> Self {
        AppError::Api(ApiError::RateLimited {
            model: model.into(),
            retry_after,
        })
    }

    /// 创建上游服务器错误
    pub fn server_error(model: impl Into<String>, status: u16) -> Self {
        AppError::Api(ApiError::ServerError {
            model: model.into(),
            status,
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    // ========== 重试策略使用的分类方法 ==========

    /// 该错误是否为瞬时错误（可以重试）
    ///
    /// 瞬时错误：频率限制（429）、上游服务器错误（5xx）、网络请求失败。
    /// 其余错误重试没有意义。
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Api(ApiError::RateLimited { .. })
                | AppError::Api(ApiError::ServerError { .. })
                | AppError::Api(ApiError::RequestFailed { .. })
        )
    }

    /// 上游提供的 Retry-After 提示（秒）
    pub fn retry_after_hint(&self) -> Option<u64> {
        match self {
            AppError::Api(ApiError::RateLimited { retry_after, .. }) => *retry_after,
            _ => None,
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
