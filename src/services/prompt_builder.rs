//! 提示词构建服务 - 业务能力层
//!
//! 把会话中的题目定义渲染进提示词模板。
//! 模板随会话 TOML 提供（缺省用内置模板），支持两个占位符：
//! - `{questions}`：题目列表（JSON 格式，含满分和可选的题干/图片）
//! - `{rubric}`：评分标准文本（仅评分阶段）

use serde_json::json;

use crate::models::{PromptTemplates, QuestionSpec};

/// 评分标准缺省占位文本（单模型评分没有规则提取阶段）
const NO_RUBRIC_PLACEHOLDER: &str = "无（请根据题目内容与满分自行把握评分尺度）";

/// 提示词构建器
pub struct PromptBuilder {
    templates: PromptTemplates,
}

impl PromptBuilder {
    pub fn new(templates: PromptTemplates) -> Self {
        Self { templates }
    }

    /// 构建评分阶段的消息对
    ///
    /// # 参数
    /// - `questions`: 题目列表
    /// - `rubric`: 评分标准（模型对第二阶段传入第一阶段的输出）
    ///
    /// # 返回
    /// (system 消息, user 消息)
    pub fn grading_messages(
        &self,
        questions: &[QuestionSpec],
        rubric: Option<&str>,
    ) -> (String, String) {
        let user = self
            .templates
            .grading_user
            .replace("{questions}", &render_questions(questions))
            .replace("{rubric}", rubric.unwrap_or(NO_RUBRIC_PLACEHOLDER));
        (self.templates.grading_system.clone(), user)
    }

    /// 构建规则提取阶段的消息对（模型对第一阶段）
    pub fn rubric_messages(&self, questions: &[QuestionSpec]) -> (String, String) {
        let user = self
            .templates
            .rubric_user
            .replace("{questions}", &render_questions(questions));
        (self.templates.rubric_system.clone(), user)
    }
}

/// 将题目列表渲染为 JSON 文本
///
/// 只输出模型需要的字段；题干和图片缺省时不出现在输出里，
/// 避免提示词里出现一堆 null。
fn render_questions(questions: &[QuestionSpec]) -> String {
    let items: Vec<serde_json::Value> = questions
        .iter()
        .map(|q| {
            let mut item = json!({
                "question_id": q.question_id,
                "max_marks": q.max_marks,
            });
            if let Some(text) = &q.text {
                item["text"] = json!(text);
            }
            if let Some(urls) = &q.image_urls {
                if !urls.is_empty() {
                    item["image_urls"] = json!(urls);
                }
            }
            item
        })
        .collect();

    serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn questions() -> Vec<QuestionSpec> {
        vec![
            QuestionSpec {
                question_id: "Q1".to_string(),
                max_marks: 10.0,
                text: Some("解方程 x^2 = 4".to_string()),
                image_urls: None,
            },
            QuestionSpec {
                question_id: "Q2".to_string(),
                max_marks: 5.0,
                text: None,
                image_urls: Some(vec!["https://img.example/q2.png".to_string()]),
            },
        ]
    }

    #[test]
    fn test_grading_messages_fill_placeholders() {
        let builder = PromptBuilder::new(PromptTemplates::default());
        let (system, user) = builder.grading_messages(&questions(), Some("Q1 满分答案需验根"));

        assert!(system.contains("阅卷助手"));
        assert!(user.contains("\"question_id\": \"Q1\""));
        assert!(user.contains("https://img.example/q2.png"));
        assert!(user.contains("Q1 满分答案需验根"));
        assert!(!user.contains("{questions}"));
        assert!(!user.contains("{rubric}"));
    }

    #[test]
    fn test_grading_messages_without_rubric_use_placeholder() {
        let builder = PromptBuilder::new(PromptTemplates::default());
        let (_, user) = builder.grading_messages(&questions(), None);
        assert!(user.contains(NO_RUBRIC_PLACEHOLDER));
    }

    #[test]
    fn test_rubric_messages_only_need_questions() {
        let builder = PromptBuilder::new(PromptTemplates::default());
        let (system, user) = builder.rubric_messages(&questions());

        assert!(system.contains("评分标准"));
        assert!(user.contains("\"max_marks\": 10.0"));
        assert!(!user.contains("{questions}"));
    }

    #[test]
    fn test_render_questions_omits_absent_fields() {
        let rendered = render_questions(&questions());
        // Q2 没有题干，不应出现 null 字段
        assert!(!rendered.contains("null"));
    }
}
