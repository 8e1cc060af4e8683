use crate::error::{AppError, FileError};
use crate::models::session::SessionConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 从 TOML 文件加载数据并转换为 SessionConfig 对象
///
/// 加载后立即做配置时校验（人工分数范围、未知题目ID等），
/// 校验失败在这里同步返回，不会进入评分派发阶段。
pub async fn load_session_config(toml_file_path: &Path) -> Result<SessionConfig> {
    let content = fs::read_to_string(toml_file_path).await.map_err(|e| {
        AppError::File(FileError::ReadFailed {
            path: toml_file_path.display().to_string(),
            source: Box::new(e),
        })
    })?;

    let mut session: SessionConfig = toml::from_str(&content).map_err(|e| {
        AppError::File(FileError::TomlParseFailed {
            path: toml_file_path.display().to_string(),
            source: Box::new(e),
        })
    })?;

    // 设置文件路径
    session.file_path = Some(toml_file_path.to_string_lossy().to_string());

    // 配置时校验（快速失败，字段级错误描述）
    session
        .validate()
        .with_context(|| format!("会话配置校验失败: {}", toml_file_path.display()))?;

    Ok(session)
}

/// 从文件夹中加载所有 TOML 文件并转换为 SessionConfig 对象列表
///
/// 单个文件加载/校验失败只记录警告，不影响其他会话。
pub async fn load_all_session_files(folder_path: &str) -> Result<Vec<SessionConfig>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        return Err(AppError::File(FileError::DirectoryNotFound {
            path: folder_path.to_string(),
        })
        .into());
    }

    let mut sessions = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            tracing::info!(
                "正在加载: {}",
                path.file_name().unwrap_or_default().to_string_lossy()
            );

            match load_session_config(&path).await {
                Ok(session) => {
                    tracing::info!(
                        "成功加载会话 {}：{} 道题目",
                        session.session_id,
                        session.questions.len()
                    );
                    sessions.push(session);
                }
                Err(e) => {
                    tracing::warn!("加载文件失败 {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(sessions)
}
