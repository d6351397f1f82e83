//! Таксономия ошибок ядра администрирования.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Файл не найден или недоступен для чтения: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Нет прав на запись в {}. Выполните от root: {remediation}", .path.display())]
    PermissionDenied { path: PathBuf, remediation: String },
    #[error("Проверка не пройдена, изменения не применены: {0}")]
    InvalidResult(String),
    #[error("Внешний сервис вернул ошибку: {0}")]
    UpstreamFailure(String),
    #[error("Не настроено: {0}")]
    NotConfigured(String),
    #[error("Ошибка ввода-вывода ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AdminError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Команда исправления прав, которую видит оператор.
    pub fn remediation_for(path: &std::path::Path, owner: &str, mode: &str) -> String {
        format!(
            "chown {owner}:{owner} {path} && chmod {mode} {path}",
            owner = owner,
            mode = mode,
            path = path.display()
        )
    }
}

pub type AdminResult<T> = Result<T, AdminError>;
