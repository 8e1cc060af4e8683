//! 结果存储 - 业务能力层
//!
//! 进程内的评分结果存储，供派发流程写入、统计引擎读取。
//! 结果行以 (会话, 题目, 模型标签, 尝试序号) 为唯一键做幂等
//! upsert：重复执行同一个评分任务只会覆盖旧行，不会产生重复数据。
//!
//! 解析失败列表、Token 用量和会话状态按各自维度单独存放，
//! 不混进结果行。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{GradeRecord, ModelTryKey, SessionStatus, TokenUsage, ValidationError};

/// 结果行的唯一键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub session_id: String,
    pub question_id: String,
    pub model_name: String,
    pub try_index: u32,
}

/// 一条已落库的评分结果
#[derive(Debug, Clone, Serialize)]
pub struct StoredGrade {
    pub question_id: String,
    pub marks_awarded: Option<f64>,
    pub rubric_notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// 进程内结果存储
///
/// 所有方法都是同步短临界区；跨 await 点不持锁。
#[derive(Default)]
pub struct ResultStore {
    records: Mutex<HashMap<RecordKey, StoredGrade>>,
    unit_errors: Mutex<HashMap<(String, ModelTryKey), Vec<ValidationError>>>,
    unit_usage: Mutex<HashMap<(String, ModelTryKey), TokenUsage>>,
    statuses: Mutex<HashMap<String, SessionStatus>>,
}

/// 锁中毒时取回内部数据继续使用（存储没有跨行不变量需要保护）
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 幂等写入一批评分记录
    ///
    /// 同一 (会话, 题目, 模型, 尝试) 的旧行会被整体覆盖，
    /// 包括 `marks_awarded` 从有值变回 None 的情况。
    pub fn upsert_records(&self, session_id: &str, key: &ModelTryKey, records: &[GradeRecord]) {
        let now = Utc::now();
        let mut guard = lock(&self.records);
        for record in records {
            let record_key = RecordKey {
                session_id: session_id.to_string(),
                question_id: record.question_id.clone(),
                model_name: key.model_name.clone(),
                try_index: key.try_index,
            };
            guard.insert(
                record_key,
                StoredGrade {
                    question_id: record.question_id.clone(),
                    marks_awarded: record.marks_awarded,
                    rubric_notes: record.rubric_notes.clone(),
                    updated_at: now,
                },
            );
        }
    }

    /// 整体替换一个评分任务的解析失败列表
    ///
    /// 任务重跑时旧列表被覆盖，空列表会清掉上次的失败记录。
    pub fn set_unit_errors(
        &self,
        session_id: &str,
        key: &ModelTryKey,
        errors: Vec<ValidationError>,
    ) {
        lock(&self.unit_errors).insert((session_id.to_string(), key.clone()), errors);
    }

    /// 记录一个评分任务的 Token 用量（网关提供时）
    pub fn record_usage(&self, session_id: &str, key: &ModelTryKey, usage: TokenUsage) {
        lock(&self.unit_usage).insert((session_id.to_string(), key.clone()), usage);
    }

    /// 设置会话状态
    pub fn set_session_status(&self, session_id: &str, status: SessionStatus) {
        lock(&self.statuses).insert(session_id.to_string(), status);
    }

    /// 查询会话状态
    pub fn session_status(&self, session_id: &str) -> Option<SessionStatus> {
        lock(&self.statuses).get(session_id).copied()
    }

    /// 按 (模型, 尝试) 分组读取一个会话的全部评分记录
    ///
    /// 组内按题目ID排序，保证统计输出确定性。
    pub fn records_by_model_try(&self, session_id: &str) -> BTreeMap<ModelTryKey, Vec<GradeRecord>> {
        let guard = lock(&self.records);
        let mut grouped: BTreeMap<ModelTryKey, Vec<GradeRecord>> = BTreeMap::new();
        for (key, stored) in guard.iter() {
            if key.session_id != session_id {
                continue;
            }
            grouped
                .entry(ModelTryKey::new(key.model_name.clone(), key.try_index))
                .or_default()
                .push(GradeRecord {
                    question_id: stored.question_id.clone(),
                    marks_awarded: stored.marks_awarded,
                    rubric_notes: stored.rubric_notes.clone(),
                });
        }
        for records in grouped.values_mut() {
            records.sort_by(|a, b| a.question_id.cmp(&b.question_id));
        }
        grouped
    }

    /// 按 (模型, 尝试) 分组读取一个会话的解析失败列表
    pub fn errors_by_model_try(
        &self,
        session_id: &str,
    ) -> BTreeMap<ModelTryKey, Vec<ValidationError>> {
        lock(&self.unit_errors)
            .iter()
            .filter(|((sid, _), _)| sid == session_id)
            .map(|((_, key), errors)| (key.clone(), errors.clone()))
            .collect()
    }

    /// 按 (模型, 尝试) 分组读取一个会话的 Token 用量
    pub fn usage_by_model_try(&self, session_id: &str) -> BTreeMap<ModelTryKey, TokenUsage> {
        lock(&self.unit_usage)
            .iter()
            .filter(|((sid, _), _)| sid == session_id)
            .map(|((_, key), usage)| (key.clone(), usage.clone()))
            .collect()
    }

    /// 一个会话的结果行总数
    pub fn record_count(&self, session_id: &str) -> usize {
        lock(&self.records)
            .keys()
            .filter(|k| k.session_id == session_id)
            .count()
    }
}
