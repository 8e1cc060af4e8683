//! 评分差异统计引擎 - 业务能力层
//!
//! 对比 AI 评分与人工参考分数，输出三种差异口径：
//! - **lt100**：是否满分的判断不一致（一方给了满分，另一方没给）
//! - **zpf**：零分/部分分/满分 三态标签不一致
//! - **range**：得分率档位（[0,25] / (25,75) / [75,100]）不一致
//!
//! 参与统计的记录必须同时满足：AI 给出了分数（非 None）、
//! 题目有人工参考分数、题目有满分定义。其余记录一律跳过，
//! "无法评分"（None）永远不会被当成 0 分参与对比。

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    GradeRecord, ModelTryKey, SessionConfig, SessionStatus, TokenUsage, ValidationError,
};

/// 零分/部分分/满分 三态标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ZpfTag {
    Zero,
    Partial,
    Full,
}

/// 得分率档位
///
/// 满分为 0 的题目没有得分率概念，不参与 range 口径。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RangeBucket {
    #[serde(rename = "0_25")]
    Low,
    #[serde(rename = "25_74_9")]
    Mid,
    #[serde(rename = "75_100")]
    High,
}

/// 单个口径的差异结果
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MetricReport {
    pub count: usize,
    /// 不一致的题目ID（排序后，保证输出确定性）
    pub question_ids: Vec<String>,
}

/// 带双方标签的单题差异
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TagMismatch<T> {
    pub question_id: String,
    pub human: T,
    pub ai: T,
}

/// 带标签的口径差异结果（zpf / range 记录双方的标签）
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaggedMetricReport<T> {
    pub count: usize,
    pub mismatches: Vec<TagMismatch<T>>,
}

impl<T> Default for TaggedMetricReport<T> {
    fn default() -> Self {
        Self {
            count: 0,
            mismatches: Vec::new(),
        }
    }
}

/// 一个 (模型, 尝试) 的完整差异报告
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DiscrepancyReport {
    pub lt100: MetricReport,
    pub zpf: TaggedMetricReport<ZpfTag>,
    pub range: TaggedMetricReport<RangeBucket>,
}

/// 一个 (模型, 尝试) 的统计块
#[derive(Debug, Clone, Serialize)]
pub struct UnitStats {
    pub model_name: String,
    pub try_index: u32,
    /// AI 给分总和（仅计非 None 的记录）
    pub marks_awarded_total: f64,
    /// 给出分数的题目数
    pub graded_questions: usize,
    /// 标记为"无法评分"的题目数
    pub ungraded_questions: usize,
    pub discrepancies: DiscrepancyReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<ValidationError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

/// 同一模型多次尝试的差异平均值（保留 2 位小数）
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelAverages {
    pub tries: usize,
    pub lt100_avg: f64,
    pub zpf_avg: f64,
    pub range_avg: f64,
}

/// 会话统计视图（JSON 报告的根对象）
#[derive(Debug, Clone, Serialize)]
pub struct StatsView {
    pub session_id: String,
    pub status: SessionStatus,
    pub generated_at: DateTime<Utc>,
    /// 人工参考分数（题目ID -> 分数）
    pub human_marks_by_qid: BTreeMap<String, f64>,
    /// 全卷满分总和
    pub total_max_marks: f64,
    /// 按 "模型#尝试" 键分组的统计块
    pub units: BTreeMap<String, UnitStats>,
    /// 按模型聚合的多次尝试平均差异
    pub averages_by_model: BTreeMap<String, ModelAverages>,
}

/// 差异统计引擎
///
/// 持有一个会话的人工分数和满分映射，对任意记录组计算报告。
pub struct DiscrepancyEngine {
    human_marks: HashMap<String, f64>,
    max_marks: HashMap<String, f64>,
}

impl DiscrepancyEngine {
    pub fn new(session: &SessionConfig) -> Self {
        Self {
            human_marks: session.human_marks_by_qid(),
            max_marks: session.max_marks_by_qid(),
        }
    }

    /// 计算一组记录相对人工分数的差异报告
    pub fn report_for(&self, records: &[GradeRecord]) -> DiscrepancyReport {
        let mut lt100 = Vec::new();
        let mut zpf = Vec::new();
        let mut range = Vec::new();

        for record in records {
            let Some(ai_mark) = record.marks_awarded else {
                continue;
            };
            let (Some(&human_mark), Some(&max)) = (
                self.human_marks.get(&record.question_id),
                self.max_marks.get(&record.question_id),
            ) else {
                // 未知题目ID（模型编造的）或没有人工分数：跳过
                continue;
            };

            if (human_mark < max) != (ai_mark < max) {
                lt100.push(record.question_id.clone());
            }

            let human_tag = zpf_tag(human_mark, max);
            let ai_tag = zpf_tag(ai_mark, max);
            if human_tag != ai_tag {
                zpf.push(TagMismatch {
                    question_id: record.question_id.clone(),
                    human: human_tag,
                    ai: ai_tag,
                });
            }

            if let (Some(human_bucket), Some(ai_bucket)) =
                (range_bucket(human_mark, max), range_bucket(ai_mark, max))
            {
                if human_bucket != ai_bucket {
                    range.push(TagMismatch {
                        question_id: record.question_id.clone(),
                        human: human_bucket,
                        ai: ai_bucket,
                    });
                }
            }
        }

        DiscrepancyReport {
            lt100: metric(lt100),
            zpf: tagged_metric(zpf),
            range: tagged_metric(range),
        }
    }

    /// 汇总整个会话的统计视图
    pub fn stats_view(
        &self,
        session: &SessionConfig,
        status: SessionStatus,
        records_by_model_try: &BTreeMap<ModelTryKey, Vec<GradeRecord>>,
        errors_by_model_try: &BTreeMap<ModelTryKey, Vec<ValidationError>>,
        usage_by_model_try: &BTreeMap<ModelTryKey, TokenUsage>,
    ) -> StatsView {
        let mut units = BTreeMap::new();
        // 模型名 -> 各次尝试的 (lt100, zpf, range) 计数
        let mut per_model: BTreeMap<String, Vec<(usize, usize, usize)>> = BTreeMap::new();

        // 只有失败记录、没有任何结果行的任务也要在报告里可见
        let mut keys: Vec<&ModelTryKey> = records_by_model_try
            .keys()
            .chain(errors_by_model_try.keys())
            .collect();
        keys.sort();
        keys.dedup();

        for key in keys {
            static EMPTY: Vec<GradeRecord> = Vec::new();
            let records = records_by_model_try.get(key).unwrap_or(&EMPTY);
            let report = self.report_for(records);

            per_model.entry(key.model_name.clone()).or_default().push((
                report.lt100.count,
                report.zpf.count,
                report.range.count,
            ));

            let graded = records.iter().filter(|r| r.marks_awarded.is_some()).count();
            units.insert(
                key.to_string(),
                UnitStats {
                    model_name: key.model_name.clone(),
                    try_index: key.try_index,
                    marks_awarded_total: round2(
                        records.iter().filter_map(|r| r.marks_awarded).sum(),
                    ),
                    graded_questions: graded,
                    ungraded_questions: records.len() - graded,
                    discrepancies: report,
                    validation_errors: errors_by_model_try.get(key).cloned().unwrap_or_default(),
                    token_usage: usage_by_model_try.get(key).cloned(),
                },
            );
        }

        let averages_by_model = per_model
            .into_iter()
            .map(|(model, counts)| {
                let n = counts.len() as f64;
                let (lt100, zpf, range) = counts.iter().fold((0, 0, 0), |acc, c| {
                    (acc.0 + c.0, acc.1 + c.1, acc.2 + c.2)
                });
                (
                    model,
                    ModelAverages {
                        tries: counts.len(),
                        lt100_avg: round2(lt100 as f64 / n),
                        zpf_avg: round2(zpf as f64 / n),
                        range_avg: round2(range as f64 / n),
                    },
                )
            })
            .collect();

        StatsView {
            session_id: session.session_id.clone(),
            status,
            generated_at: Utc::now(),
            human_marks_by_qid: session.human_marks.clone(),
            total_max_marks: round2(session.questions.iter().map(|q| q.max_marks).sum()),
            units,
            averages_by_model,
        }
    }
}

fn metric(mut question_ids: Vec<String>) -> MetricReport {
    question_ids.sort();
    MetricReport {
        count: question_ids.len(),
        question_ids,
    }
}

fn tagged_metric<T>(mut mismatches: Vec<TagMismatch<T>>) -> TaggedMetricReport<T> {
    mismatches.sort_by(|a, b| a.question_id.cmp(&b.question_id));
    TaggedMetricReport {
        count: mismatches.len(),
        mismatches,
    }
}

/// 三态标签：0 → Zero，满分 → Full，其余 → Partial
///
/// 满分为 0 的题目上 0 分同时满足两个条件，按 Zero 处理，
/// 两侧口径一致即可。
fn zpf_tag(mark: f64, max: f64) -> ZpfTag {
    if mark == 0.0 {
        ZpfTag::Zero
    } else if mark == max {
        ZpfTag::Full
    } else {
        ZpfTag::Partial
    }
}

/// 得分率档位；满分为 0 时无定义
///
/// 负分归入最低档，超满分归入最高档（上游不做裁剪，
/// 档位计算自己兜底）。
fn range_bucket(mark: f64, max: f64) -> Option<RangeBucket> {
    if max == 0.0 {
        return None;
    }
    let pct = mark / max * 100.0;
    Some(if pct <= 25.0 {
        RangeBucket::Low
    } else if pct < 75.0 {
        RangeBucket::Mid
    } else {
        RangeBucket::High
    })
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionSpec;

    fn session(questions: &[(&str, f64)], human: &[(&str, f64)]) -> SessionConfig {
        SessionConfig {
            session_id: "s1".to_string(),
            questions: questions
                .iter()
                .map(|(qid, max)| QuestionSpec {
                    question_id: qid.to_string(),
                    max_marks: *max,
                    text: None,
                    image_urls: None,
                })
                .collect(),
            human_marks: human
                .iter()
                .map(|(qid, mark)| (qid.to_string(), *mark))
                .collect(),
            models: vec![],
            model_pairs: vec![],
            default_tries: None,
            prompt: None,
            file_path: None,
        }
    }

    fn record(qid: &str, mark: Option<f64>) -> GradeRecord {
        GradeRecord {
            question_id: qid.to_string(),
            marks_awarded: mark,
            rubric_notes: None,
        }
    }

    #[test]
    fn test_full_marks_disagreement() {
        // 人工 9/10，AI 10/10：是否满分不一致 + 三态标签不一致，
        // 但两边都在 75-100 档，range 不计
        let engine = DiscrepancyEngine::new(&session(&[("Q1", 10.0)], &[("Q1", 9.0)]));
        let report = engine.report_for(&[record("Q1", Some(10.0))]);

        assert_eq!(report.lt100.count, 1);
        assert_eq!(report.zpf.count, 1);
        assert_eq!(report.range.count, 0);
        assert_eq!(report.lt100.question_ids, vec!["Q1"]);
        // 双方标签都被记录
        assert_eq!(report.zpf.mismatches[0].human, ZpfTag::Partial);
        assert_eq!(report.zpf.mismatches[0].ai, ZpfTag::Full);
    }

    #[test]
    fn test_null_mark_never_counts_as_zero() {
        // 人工 0 分 + AI 无法评分：不参与任何口径
        let engine = DiscrepancyEngine::new(&session(&[("Q1", 10.0)], &[("Q1", 0.0)]));
        let report = engine.report_for(&[record("Q1", None)]);

        assert_eq!(report, DiscrepancyReport::default());
    }

    #[test]
    fn test_zero_vs_partial() {
        let engine = DiscrepancyEngine::new(&session(&[("Q1", 10.0)], &[("Q1", 0.0)]));
        let report = engine.report_for(&[record("Q1", Some(3.0))]);

        // 0 分 vs 部分分：三态和档位都不一致；都不是满分，lt100 一致
        assert_eq!(report.lt100.count, 0);
        assert_eq!(report.zpf.count, 1);
        assert_eq!(report.range.count, 1);
        assert_eq!(report.range.mismatches[0].human, RangeBucket::Low);
        assert_eq!(report.range.mismatches[0].ai, RangeBucket::Mid);
    }

    #[test]
    fn test_zero_max_marks_excluded_from_range() {
        // 满分为 0 的题目没有得分率，range 口径跳过且不崩溃
        let engine = DiscrepancyEngine::new(&session(&[("Q1", 0.0)], &[("Q1", 0.0)]));
        let report = engine.report_for(&[record("Q1", Some(0.0))]);

        assert_eq!(report.range.count, 0);
        assert_eq!(report.zpf.count, 0);
        assert_eq!(report.lt100.count, 0);
    }

    #[test]
    fn test_unknown_question_id_skipped() {
        let engine = DiscrepancyEngine::new(&session(&[("Q1", 10.0)], &[("Q1", 5.0)]));
        // 模型编造的题目ID和解析失败哨兵都不应进入统计
        let report = engine.report_for(&[
            record("Q99", Some(10.0)),
            record("__parse_error__", Some(1.0)),
        ]);

        assert_eq!(report, DiscrepancyReport::default());
    }

    #[test]
    fn test_question_without_human_mark_skipped() {
        let engine = DiscrepancyEngine::new(&session(&[("Q1", 10.0), ("Q2", 5.0)], &[("Q1", 5.0)]));
        let report = engine.report_for(&[record("Q2", Some(5.0))]);

        assert_eq!(report, DiscrepancyReport::default());
    }

    #[test]
    fn test_range_bucket_boundaries() {
        // 25% 含在低档，75% 起算高档
        assert_eq!(range_bucket(2.5, 10.0), Some(RangeBucket::Low));
        assert_eq!(range_bucket(2.6, 10.0), Some(RangeBucket::Mid));
        assert_eq!(range_bucket(7.4, 10.0), Some(RangeBucket::Mid));
        assert_eq!(range_bucket(7.5, 10.0), Some(RangeBucket::High));
        // 负分和超满分各归两端
        assert_eq!(range_bucket(-1.0, 10.0), Some(RangeBucket::Low));
        assert_eq!(range_bucket(11.0, 10.0), Some(RangeBucket::High));
        assert_eq!(range_bucket(0.0, 0.0), None);
    }

    #[test]
    fn test_range_bucket_serialized_labels() {
        // 报告里的档位标识符是对外契约
        assert_eq!(serde_json::to_value(RangeBucket::Low).unwrap(), "0_25");
        assert_eq!(serde_json::to_value(RangeBucket::Mid).unwrap(), "25_74_9");
        assert_eq!(serde_json::to_value(RangeBucket::High).unwrap(), "75_100");
    }

    #[test]
    fn test_metrics_are_symmetric() {
        // 差异是对称关系：交换人工分数和 AI 分数，计数不变
        let human = [("Q1", 9.0), ("Q2", 0.0), ("Q3", 2.0)];
        let ai = [("Q1", 10.0), ("Q2", 3.0), ("Q3", 0.0)];
        let questions = [("Q1", 10.0), ("Q2", 10.0), ("Q3", 10.0)];

        let forward = DiscrepancyEngine::new(&session(&questions, &human)).report_for(
            &ai.iter()
                .map(|(q, m)| record(q, Some(*m)))
                .collect::<Vec<_>>(),
        );
        let backward = DiscrepancyEngine::new(&session(&questions, &ai)).report_for(
            &human
                .iter()
                .map(|(q, m)| record(q, Some(*m)))
                .collect::<Vec<_>>(),
        );

        assert_eq!(forward.lt100.count, backward.lt100.count);
        assert_eq!(forward.zpf.count, backward.zpf.count);
        assert_eq!(forward.range.count, backward.range.count);
    }

    #[test]
    fn test_stats_view_totals_and_averages() {
        let sess = session(&[("Q1", 10.0), ("Q2", 5.0)], &[("Q1", 9.0), ("Q2", 5.0)]);
        let engine = DiscrepancyEngine::new(&sess);

        let mut records = BTreeMap::new();
        records.insert(
            ModelTryKey::new("gpt-4o", 1),
            vec![record("Q1", Some(10.0)), record("Q2", Some(5.0))],
        );
        records.insert(
            ModelTryKey::new("gpt-4o", 2),
            vec![record("Q1", Some(9.0)), record("Q2", None)],
        );

        let view = engine.stats_view(
            &sess,
            SessionStatus::Graded,
            &records,
            &BTreeMap::new(),
            &BTreeMap::new(),
        );

        assert_eq!(view.total_max_marks, 15.0);
        assert_eq!(view.units["gpt-4o#1"].marks_awarded_total, 15.0);
        assert_eq!(view.units["gpt-4o#2"].marks_awarded_total, 9.0);
        assert_eq!(view.units["gpt-4o#2"].graded_questions, 1);
        assert_eq!(view.units["gpt-4o#2"].ungraded_questions, 1);

        // 第一次尝试 lt100=1（Q1 满分判断不一致），第二次 0，平均 0.5
        let avg = &view.averages_by_model["gpt-4o"];
        assert_eq!(avg.tries, 2);
        assert_eq!(avg.lt100_avg, 0.5);
        assert_eq!(avg.zpf_avg, 0.5);
        assert_eq!(avg.range_avg, 0.0);
    }

    #[test]
    fn test_stats_view_includes_failed_only_units() {
        let sess = session(&[("Q1", 10.0)], &[("Q1", 9.0)]);
        let engine = DiscrepancyEngine::new(&sess);

        let mut errors = BTreeMap::new();
        errors.insert(
            ModelTryKey::new("gemini-2.5-pro", 1),
            vec![ValidationError::parse_failure("响应无法解析", "垃圾输出")],
        );

        let view = engine.stats_view(
            &sess,
            SessionStatus::Graded,
            &BTreeMap::new(),
            &errors,
            &BTreeMap::new(),
        );

        // 没有结果行的失败任务也要出现在报告里，失败原因可见
        let unit = &view.units["gemini-2.5-pro#1"];
        assert_eq!(unit.graded_questions, 0);
        assert_eq!(unit.validation_errors.len(), 1);
    }
}
