//! 响应解析服务 - 业务能力层
//!
//! 把模型返回的任意松散文本解析为规范化的评分记录列表。
//!
//! ## 设计说明
//!
//! 不同模型会用不同的顶层结构包裹答案（`{result: [...]}`、
//! `{results: {...}}`、`{answers: [...]}`、`{grades: {...}}`），
//! 同一个概念也会用不同的字段名。解析器对这些差异全部容忍：
//!
//! - 剥掉 markdown 代码围栏和前后的闲散文字，定位第一个内嵌的 JSON 结构
//! - 顶层键按优先级识别；学生列表结构会被拍平成逐题条目
//! - 字段别名按显式的有序规则表解析（新增别名只需加表项，可单独测试）
//! - "只有分数"的结构（题目ID直接映射到裸数值）同样接受
//!
//! 解析器永不返回 Err：任何畸形输入都产出 0 条记录 + 1 条
//! ValidationError（原始文本截断保留，便于排查）。

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

use crate::models::{GradeRecord, ParseOutcome, ValidationError};
use crate::utils::truncate_text;

/// 题目ID字段的别名，按优先级排列（先命中先用）
const QUESTION_ID_ALIASES: &[&str] = &[
    "question_id",
    "qid",
    "questionID",
    "question",
    "question_number",
];

/// 分数字段的别名，按优先级排列
const MARK_ALIASES: &[&str] = &["marks_awarded", "mark", "score"];

/// 评分说明字段的别名，按优先级排列
const NOTES_ALIASES: &[&str] = &["rubric_notes", "feedback", "notes"];

/// 顶层包裹键，按优先级排列
const ROOT_KEYS: &[&str] = &["result", "results", "answers", "grades"];

/// 错误记录中保留的原始片段长度上限（字符）
const RAW_FRAGMENT_MAX_CHARS: usize = 300;

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```[a-zA-Z]*").expect("围栏正则必定合法"))
}

/// 响应解析器
///
/// 职责：
/// - 只做"文本 → 评分记录"这一件事
/// - 不做分数上限裁剪（上限语义属于评分阶段，不属于解析）
/// - 不出现模型名 / 尝试序号，这些由调用方补充
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    /// 解析模型返回的原始文本
    ///
    /// # 返回
    /// 成功条目进 `records`，失败条目进 `errors`；两者共存是预期情况
    /// （部分题目解析成功、部分失败）。整段文本无法恢复出结构时，
    /// 返回 0 条记录和 1 条使用哨兵题目ID的错误。
    pub fn parse(&self, raw_text: &str) -> ParseOutcome {
        let trimmed = raw_text.trim();
        if trimmed.is_empty() {
            return ParseOutcome {
                records: Vec::new(),
                errors: vec![ValidationError::parse_failure("响应为空", "")],
            };
        }

        let Some(root) = extract_embedded_json(trimmed) else {
            return ParseOutcome {
                records: Vec::new(),
                errors: vec![ValidationError::parse_failure(
                    "未找到可解析的JSON结构",
                    truncate_text(trimmed, RAW_FRAGMENT_MAX_CHARS),
                )],
            };
        };

        let entries = gather_answer_entries(&root);
        if entries.is_empty() {
            return ParseOutcome {
                records: Vec::new(),
                errors: vec![ValidationError::parse_failure(
                    "JSON结构中没有任何答案条目",
                    truncate_text(trimmed, RAW_FRAGMENT_MAX_CHARS),
                )],
            };
        }

        let mut outcome = ParseOutcome::default();
        for (index, entry) in entries.iter().enumerate() {
            match parse_entry(entry) {
                Ok(record) => outcome.records.push(record),
                Err(message) => outcome.errors.push(ValidationError::parse_failure(
                    format!("条目 #{} 解析失败: {}", index + 1, message),
                    truncate_text(&entry.value.to_string(), RAW_FRAGMENT_MAX_CHARS),
                )),
            }
        }

        debug!(
            "解析完成: {} 条记录, {} 条错误",
            outcome.records.len(),
            outcome.errors.len()
        );
        outcome
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// 一条待解析的答案条目
///
/// `key_qid` 是映射结构（`{"Q1": {...}}`）中键携带的题目ID，
/// 条目内部的显式别名优先于它。
struct AnswerEntry {
    key_qid: Option<String>,
    value: Value,
}

// ========== JSON 定位 ==========

/// 在自由文本中定位第一个完整的 JSON 对象/数组
///
/// 先剥掉 markdown 代码围栏标记，然后从每个 `{` / `[` 起点做
/// 字符串感知的括号配平扫描；解析失败就尝试下一个起点。
fn extract_embedded_json(text: &str) -> Option<Value> {
    let cleaned = fence_regex().replace_all(text, "");

    let bytes = cleaned.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let Some(opener_offset) = cleaned[start..].find(['{', '[']) else {
            return None;
        };
        let opener = start + opener_offset;

        if let Some(candidate) = balanced_slice(&cleaned, opener) {
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
        start = opener + 1;
    }
    None
}

/// 从 `start` 处的开括号起做配平扫描，返回配平的切片
///
/// 扫描时跳过字符串字面量内部的括号和转义引号。
fn balanced_slice(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

// ========== 结构拍平 ==========

/// 把任意顶层结构收集为逐题条目列表
fn gather_answer_entries(root: &Value) -> Vec<AnswerEntry> {
    match root {
        Value::Array(items) => flatten_entry_list(items),
        Value::Object(map) => {
            // 顶层包裹键按优先级识别
            for key in ROOT_KEYS {
                if let Some(inner) = map.get(*key) {
                    return match inner {
                        Value::Array(items) => flatten_entry_list(items),
                        Value::Object(qid_map) => entries_from_map(qid_map),
                        _ => Vec::new(),
                    };
                }
            }

            // 没有包裹键：对象本身可能就是一条答案条目
            if resolve_question_id(map).is_some() {
                return vec![AnswerEntry {
                    key_qid: None,
                    value: root.clone(),
                }];
            }

            // 兜底：当作 题目ID -> 条目/裸分数 的映射
            entries_from_map(map)
        }
        _ => Vec::new(),
    }
}

/// 拍平条目数组；学生包裹元素（内部再套一层答案列表）会被展开
///
/// 学生身份不是核心需要的信息，展开后直接丢弃。
fn flatten_entry_list(items: &[Value]) -> Vec<AnswerEntry> {
    let mut entries = Vec::new();
    for item in items {
        if let Value::Object(map) = item {
            let wraps_student = ROOT_KEYS.iter().any(|k| map.contains_key(*k));
            if wraps_student && resolve_question_id(map).is_none() {
                entries.extend(gather_answer_entries(item));
                continue;
            }
        }
        entries.push(AnswerEntry {
            key_qid: None,
            value: item.clone(),
        });
    }
    entries
}

/// 把 `题目ID -> 条目或裸分数` 的映射收集为条目列表
fn entries_from_map(map: &serde_json::Map<String, Value>) -> Vec<AnswerEntry> {
    map.iter()
        .map(|(qid, value)| AnswerEntry {
            key_qid: Some(qid.clone()),
            value: value.clone(),
        })
        .collect()
}

// ========== 单条目解析 ==========

/// 解析单条答案条目
///
/// 失败（缺少题目ID）返回描述信息；分数缺失/非数值不算失败，
/// 记为 `marks_awarded: None`（"无法评分"是合法业务结果）。
fn parse_entry(entry: &AnswerEntry) -> Result<GradeRecord, String> {
    match &entry.value {
        Value::Object(map) => {
            let question_id = resolve_question_id(map)
                .or_else(|| entry.key_qid.clone())
                .ok_or_else(|| "缺少题目ID".to_string())?;

            Ok(GradeRecord {
                question_id,
                marks_awarded: resolve_mark(map),
                rubric_notes: Some(resolve_notes(map)),
            })
        }
        // "只有分数"结构：键是题目ID，值是裸数值/字符串
        bare => {
            let question_id = entry
                .key_qid
                .clone()
                .ok_or_else(|| "缺少题目ID".to_string())?;

            Ok(GradeRecord {
                question_id,
                marks_awarded: numeric_value(bare).map(round2),
                rubric_notes: Some(String::new()),
            })
        }
    }
}

/// 按别名优先级解析题目ID（第一个非空值命中即停）
fn resolve_question_id(map: &serde_json::Map<String, Value>) -> Option<String> {
    for alias in QUESTION_ID_ALIASES {
        if let Some(value) = map.get(*alias) {
            let qid = match value {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            if !qid.is_empty() {
                return Some(qid);
            }
        }
    }
    None
}

/// 按别名优先级解析分数
///
/// 所有别名都试过仍拿不到数值 → `None`，这不是解析错误，
/// 而是"无法评分"，与 0 分严格区分。
fn resolve_mark(map: &serde_json::Map<String, Value>) -> Option<f64> {
    for alias in MARK_ALIASES {
        if let Some(value) = map.get(*alias) {
            if let Some(mark) = numeric_value(value) {
                return Some(round2(mark));
            }
        }
    }
    None
}

/// 按别名优先级解析评分说明，缺省为空字符串
fn resolve_notes(map: &serde_json::Map<String, Value>) -> String {
    for alias in NOTES_ALIASES {
        if let Some(Value::String(s)) = map.get(*alias) {
            return s.clone();
        }
    }
    String::new()
}

/// 从 JSON 值中提取有限数值（接受数字和数字字符串）
fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// 四舍五入到 2 位小数
#[inline]
fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PARSE_ERROR_QUESTION_ID;

    fn parse(text: &str) -> ParseOutcome {
        ResponseParser::new().parse(text)
    }

    // ========== 别名等价 ==========

    #[test]
    fn test_mark_alias_equivalence() {
        // 只有别名不同的输入必须产出完全相同的记录
        let variants = [
            r#"{"results": [{"question_id": "Q1", "marks_awarded": 7.5, "rubric_notes": "好"}]}"#,
            r#"{"results": [{"question_id": "Q1", "mark": 7.5, "rubric_notes": "好"}]}"#,
            r#"{"results": [{"question_id": "Q1", "score": 7.5, "rubric_notes": "好"}]}"#,
        ];
        let outcomes: Vec<_> = variants.iter().map(|v| parse(v)).collect();
        for outcome in &outcomes {
            assert_eq!(outcome.records, outcomes[0].records);
            assert!(outcome.errors.is_empty());
        }
        assert_eq!(outcomes[0].records[0].marks_awarded, Some(7.5));
    }

    #[test]
    fn test_question_id_alias_equivalence() {
        let variants = [
            r#"{"answers": [{"question_id": "Q2", "score": 3}]}"#,
            r#"{"answers": [{"qid": "Q2", "score": 3}]}"#,
            r#"{"answers": [{"questionID": "Q2", "score": 3}]}"#,
            r#"{"answers": [{"question": "Q2", "score": 3}]}"#,
            r#"{"answers": [{"question_number": "Q2", "score": 3}]}"#,
        ];
        for v in variants {
            let outcome = parse(v);
            assert_eq!(outcome.records.len(), 1, "输入: {}", v);
            assert_eq!(outcome.records[0].question_id, "Q2");
        }
    }

    #[test]
    fn test_notes_alias_and_default() {
        let with_feedback = parse(r#"{"results": [{"qid": "Q1", "mark": 5, "feedback": "步骤完整"}]}"#);
        assert_eq!(
            with_feedback.records[0].rubric_notes.as_deref(),
            Some("步骤完整")
        );

        let without_notes = parse(r#"{"results": [{"qid": "Q1", "mark": 5}]}"#);
        assert_eq!(without_notes.records[0].rubric_notes.as_deref(), Some(""));
    }

    #[test]
    fn test_alias_priority_order() {
        // question_id 优先于 qid；marks_awarded 优先于 score
        let outcome = parse(
            r#"{"results": [{"question_id": "Q1", "qid": "WRONG", "marks_awarded": 4, "score": 9}]}"#,
        );
        assert_eq!(outcome.records[0].question_id, "Q1");
        assert_eq!(outcome.records[0].marks_awarded, Some(4.0));
    }

    // ========== null 与 0 严格区分 ==========

    #[test]
    fn test_null_mark_is_not_zero() {
        let null_mark = parse(r#"{"results": [{"qid": "Q1", "mark": null}]}"#);
        assert_eq!(null_mark.records[0].marks_awarded, None);
        assert!(null_mark.errors.is_empty(), "null 分数不是解析错误");

        let zero_mark = parse(r#"{"results": [{"qid": "Q1", "mark": 0}]}"#);
        assert_eq!(zero_mark.records[0].marks_awarded, Some(0.0));
    }

    #[test]
    fn test_non_numeric_mark_becomes_none() {
        let outcome = parse(r#"{"results": [{"qid": "Q1", "mark": "illegible"}]}"#);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].marks_awarded, None);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_numeric_string_mark_accepted() {
        let outcome = parse(r#"{"results": [{"qid": "Q1", "mark": "8.5"}]}"#);
        assert_eq!(outcome.records[0].marks_awarded, Some(8.5));
    }

    // ========== 健壮性：永不 panic，畸形输入 → 1 条哨兵错误 ==========

    #[test]
    fn test_malformed_inputs_yield_single_sentinel_error() {
        let malformed = [
            "",
            "   ",
            "这不是JSON",
            r#"{"results": [{"qid": "Q1""#, // 截断的 JSON
            "{}",
            "[]",
            "42",
        ];
        for input in malformed {
            let outcome = parse(input);
            assert!(outcome.records.is_empty(), "输入: {:?}", input);
            assert_eq!(outcome.errors.len(), 1, "输入: {:?}", input);
            assert_eq!(outcome.errors[0].question_id, PARSE_ERROR_QUESTION_ID);
        }
    }

    #[test]
    fn test_raw_text_preserved_truncated() {
        let junk = format!("垃圾前缀 {}", "x".repeat(1000));
        let outcome = parse(&junk);
        let fragment = outcome.errors[0].raw_fragment.as_deref().unwrap();
        assert!(fragment.chars().count() <= RAW_FRAGMENT_MAX_CHARS + 3);
        assert!(fragment.starts_with("垃圾前缀"));
    }

    // ========== 结构容忍 ==========

    #[test]
    fn test_scenario_prose_wrapped_results_map() {
        // 场景：前后有闲散文字的 results 映射
        let outcome = parse(r#"Here you go: {"results":{"Q1":8.5,"Q2":7.0}}"#);
        assert!(outcome.errors.is_empty());
        let mut records = outcome.records;
        records.sort_by(|a, b| a.question_id.cmp(&b.question_id));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].question_id, "Q1");
        assert_eq!(records[0].marks_awarded, Some(8.5));
        assert_eq!(records[0].rubric_notes.as_deref(), Some(""));
        assert_eq!(records[1].question_id, "Q2");
        assert_eq!(records[1].marks_awarded, Some(7.0));
    }

    #[test]
    fn test_markdown_fenced_json() {
        let outcome = parse(
            "评分结果如下：\n```json\n{\"result\": [{\"qid\": \"Q1\", \"mark\": 6}]}\n```\n希望有帮助！",
        );
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].marks_awarded, Some(6.0));
    }

    #[test]
    fn test_top_level_array() {
        let outcome = parse(r#"[{"qid": "Q1", "mark": 2}, {"qid": "Q2", "mark": 3}]"#);
        assert_eq!(outcome.records.len(), 2);
    }

    #[test]
    fn test_student_list_flattened() {
        // 学生列表结构被拍平；学生身份被丢弃
        let outcome = parse(
            r#"{"result": [
                {"student": "A", "answers": [{"qid": "Q1", "mark": 5}]},
                {"student": "B", "answers": [{"qid": "Q1", "mark": 7}, {"qid": "Q2", "mark": 1}]}
            ]}"#,
        );
        assert_eq!(outcome.records.len(), 3);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_grades_map_with_entry_objects() {
        let outcome = parse(
            r#"{"grades": {"Q1": {"mark": 4, "notes": "部分正确"}, "Q2": 9}}"#,
        );
        let mut records = outcome.records;
        records.sort_by(|a, b| a.question_id.cmp(&b.question_id));
        assert_eq!(records[0].marks_awarded, Some(4.0));
        assert_eq!(records[0].rubric_notes.as_deref(), Some("部分正确"));
        // 裸数值形式：值本身就是分数
        assert_eq!(records[1].marks_awarded, Some(9.0));
        assert_eq!(records[1].rubric_notes.as_deref(), Some(""));
    }

    #[test]
    fn test_entry_without_question_id_is_partial_failure() {
        // 缺少题目ID的条目记为错误，其余条目照常解析
        let outcome = parse(
            r#"{"results": [{"mark": 5}, {"qid": "Q2", "mark": 3}]}"#,
        );
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].question_id, "Q2");
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].message.contains("缺少题目ID"));
    }

    #[test]
    fn test_root_key_priority() {
        // result 优先于 grades
        let outcome = parse(
            r#"{"grades": {"Q9": 1}, "result": [{"qid": "Q1", "mark": 5}]}"#,
        );
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].question_id, "Q1");
    }

    // ========== 数值处理 ==========

    #[test]
    fn test_marks_rounded_to_two_decimals() {
        let outcome = parse(r#"{"results": [{"qid": "Q1", "mark": 7.12345}]}"#);
        assert_eq!(outcome.records[0].marks_awarded, Some(7.12));
    }

    #[test]
    fn test_over_max_mark_not_clamped() {
        // 解析器不做上限裁剪，超出满分的分数原样透出
        let outcome = parse(r#"{"results": [{"qid": "Q1", "mark": 999}]}"#);
        assert_eq!(outcome.records[0].marks_awarded, Some(999.0));
    }

    #[test]
    fn test_numeric_question_number() {
        let outcome = parse(r#"{"results": [{"question_number": 3, "mark": 1}]}"#);
        assert_eq!(outcome.records[0].question_id, "3");
    }

    #[test]
    fn test_nested_braces_inside_strings() {
        // 字符串里的大括号不干扰配平扫描
        let outcome = parse(r#"说明 {"results": [{"qid": "Q1", "mark": 2, "notes": "见 {第3步}"}]} 完"#);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].rubric_notes.as_deref(), Some("见 {第3步}"));
    }
}
