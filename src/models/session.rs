//! 评分会话数据模型
//!
//! 一个会话对应一份学生答卷：题目定义（含满分）、人工参考分数、
//! 待评分的模型列表（或模型对）以及提示词模板。
//! 会话从 TOML 文件加载，加载时立即做字段级校验（快速失败）。

use crate::error::{AppError, AppResult, SessionError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;

/// 单个题目的定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSpec {
    pub question_id: String,
    /// 满分
    pub max_marks: f64,
    /// 题干/答案文本（可选，进入提示词）
    #[serde(default)]
    pub text: Option<String>,
    /// 答卷图片 URL 列表（可选，进入提示词）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_urls: Option<Vec<String>>,
}

/// 单模型评分目标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    /// 该模型的尝试次数；缺省时使用会话的 default_tries
    #[serde(default)]
    pub tries: Option<usize>,
}

/// 模型对：第一阶段模型提取评分规则，第二阶段模型据此评分
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPairSpec {
    pub rubric_model: String,
    pub assessment_model: String,
}

/// 提示词模板
///
/// 模板外部存储（随会话 TOML 提供），支持 `{questions}` 和
/// `{rubric}` 占位符。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplates {
    #[serde(default = "default_grading_system")]
    pub grading_system: String,
    #[serde(default = "default_grading_user")]
    pub grading_user: String,
    #[serde(default = "default_rubric_system")]
    pub rubric_system: String,
    #[serde(default = "default_rubric_user")]
    pub rubric_user: String,
}

fn default_grading_system() -> String {
    "你是一个专业的阅卷助手。你需要根据题目和评分标准为学生作答评分。\
     对每道题返回 JSON 格式的评分结果，包含 question_id、marks_awarded、rubric_notes 三个字段。\
     无法评分的题目（如字迹不清）将 marks_awarded 置为 null，不要猜测分数。"
        .to_string()
}

fn default_grading_user() -> String {
    r#"请为以下题目评分。

题目列表（含满分）：
{questions}

评分标准：
{rubric}

只返回 JSON，格式：{"results": [{"question_id": "...", "marks_awarded": 0, "rubric_notes": "..."}]}，不要返回任何其他内容。"#
        .to_string()
}

fn default_rubric_system() -> String {
    "你是一个专业的评分标准提取助手。你需要根据题目内容推导出一份逐题的评分标准。".to_string()
}

fn default_rubric_user() -> String {
    r#"请为以下题目列表提取逐题评分标准，说明每道题的得分点和扣分点。

题目列表（含满分）：
{questions}

以纯文本返回评分标准。"#
        .to_string()
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            grading_system: default_grading_system(),
            grading_user: default_grading_user(),
            rubric_system: default_rubric_system(),
            rubric_user: default_rubric_user(),
        }
    }
}

/// 会话状态
///
/// 状态机：Created → Grading → Graded | Failed。
/// 单个任务的失败不会导致 Failed——只有批次级致命错误
/// （如配置完全不可用）才会。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Grading,
    Graded,
    Failed,
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Created => "created",
            SessionStatus::Grading => "grading",
            SessionStatus::Graded => "graded",
            SessionStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// 评分会话配置（TOML 根对象）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_id: String,
    pub questions: Vec<QuestionSpec>,
    /// 人工参考分数：题目ID -> 分数，整套提供、整套覆盖
    pub human_marks: BTreeMap<String, f64>,
    /// 单模型评分目标
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    /// 模型对评分目标
    #[serde(default)]
    pub model_pairs: Vec<ModelPairSpec>,
    /// 未显式指定 tries 时的默认尝试次数
    #[serde(default)]
    pub default_tries: Option<usize>,
    #[serde(default)]
    pub prompt: Option<PromptTemplates>,
    /// 来源文件路径（加载时填充，不序列化）
    #[serde(skip_serializing, skip_deserializing)]
    pub file_path: Option<String>,
}

impl SessionConfig {
    /// 题目ID -> 满分 的映射
    pub fn max_marks_by_qid(&self) -> HashMap<String, f64> {
        self.questions
            .iter()
            .map(|q| (q.question_id.clone(), q.max_marks))
            .collect()
    }

    /// 人工分数的 HashMap 视图（统计引擎使用）
    pub fn human_marks_by_qid(&self) -> HashMap<String, f64> {
        self.human_marks
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// 提示词模板（缺省时使用内置模板）
    pub fn templates(&self) -> PromptTemplates {
        self.prompt.clone().unwrap_or_default()
    }

    /// 配置时校验（快速失败）
    ///
    /// 在派发任何评分任务之前执行：
    /// 1. 题目ID不重复
    /// 2. 人工分数只引用已知题目
    /// 3. 人工分数落在 [0, max_marks] 区间
    /// 4. 至少有一个评分目标（模型或模型对）
    /// 5. 尝试次数 >= 1
    pub fn validate(&self) -> AppResult<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for q in &self.questions {
            if !seen.insert(q.question_id.as_str()) {
                return Err(AppError::Session(SessionError::DuplicateQuestion {
                    session_id: self.session_id.clone(),
                    question_id: q.question_id.clone(),
                }));
            }
        }

        let max_marks = self.max_marks_by_qid();
        for (qid, mark) in &self.human_marks {
            let Some(max) = max_marks.get(qid) else {
                return Err(AppError::Session(SessionError::UnknownQuestion {
                    session_id: self.session_id.clone(),
                    question_id: qid.clone(),
                }));
            };
            if !mark.is_finite() || *mark < 0.0 || *mark > *max {
                return Err(AppError::Session(SessionError::MarkOutOfRange {
                    session_id: self.session_id.clone(),
                    question_id: qid.clone(),
                    mark: *mark,
                    max_marks: *max,
                }));
            }
        }

        if self.models.is_empty() && self.model_pairs.is_empty() {
            return Err(AppError::Session(SessionError::EmptyModelList {
                session_id: self.session_id.clone(),
            }));
        }

        for m in &self.models {
            let tries = m.tries.or(self.default_tries).unwrap_or(1);
            if tries == 0 {
                return Err(AppError::Session(SessionError::InvalidTries {
                    session_id: self.session_id.clone(),
                    model: m.name.clone(),
                    tries,
                }));
            }
        }

        // 模型对没有独立的 tries 字段，生效值来自 default_tries
        for pair in &self.model_pairs {
            let tries = self.default_tries.unwrap_or(1);
            if tries == 0 {
                return Err(AppError::Session(SessionError::InvalidTries {
                    session_id: self.session_id.clone(),
                    model: format!("{}+{}", pair.rubric_model, pair.assessment_model),
                    tries,
                }));
            }
        }

        Ok(())
    }

    /// 将评分请求展开为独立的评分任务
    ///
    /// 单模型：N 个模型 × 各自的尝试次数；
    /// 模型对：每对 × default_tries（缺省 1）。
    /// try_index 从 1 开始。
    pub fn expand_units(&self) -> Vec<GradingUnit> {
        let mut units = Vec::new();

        for m in &self.models {
            let tries = m.tries.or(self.default_tries).unwrap_or(1);
            for try_index in 1..=tries {
                units.push(GradingUnit {
                    session_id: self.session_id.clone(),
                    target: GradingTarget::Single(m.name.clone()),
                    try_index: try_index as u32,
                });
            }
        }

        for pair in &self.model_pairs {
            let tries = self.default_tries.unwrap_or(1);
            for try_index in 1..=tries {
                units.push(GradingUnit {
                    session_id: self.session_id.clone(),
                    target: GradingTarget::Pair {
                        rubric_model: pair.rubric_model.clone(),
                        assessment_model: pair.assessment_model.clone(),
                    },
                    try_index: try_index as u32,
                });
            }
        }

        units
    }
}

/// 评分目标：单模型，或"规则提取 → 评分"模型对
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradingTarget {
    Single(String),
    Pair {
        rubric_model: String,
        assessment_model: String,
    },
}

impl GradingTarget {
    /// 结果存储使用的模型名标签
    ///
    /// 模型对用 "规则模型+评分模型" 组合标签，保证与同名单模型的
    /// 结果互不覆盖。
    pub fn label(&self) -> String {
        match self {
            GradingTarget::Single(name) => name.clone(),
            GradingTarget::Pair {
                rubric_model,
                assessment_model,
            } => format!("{}+{}", rubric_model, assessment_model),
        }
    }
}

/// 一个评分任务：(会话, 目标, 第几次尝试)
///
/// 由派发引擎展开评分请求时创建，仅在派发期间存在，不直接持久化。
#[derive(Debug, Clone)]
pub struct GradingUnit {
    pub session_id: String,
    pub target: GradingTarget,
    pub try_index: u32,
}
