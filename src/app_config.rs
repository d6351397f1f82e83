//! Файл конфигурации управляемого бота (`config.php`).
//!
//! Изменения собираются в [`MutationBatch`] и применяются целиком:
//! правка в памяти, запись во временный соседний файл, проверка штатным
//! линтером (`php -l`), резервная копия и атомарная замена через rename.
//! Если линтер отклонил результат, рабочий файл не меняется ни на байт.

use crate::command::CommandRunner;
use crate::error::{AdminError, AdminResult};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(\$([A-Za-z_][A-Za-z0-9_]*)\s*=\s*)(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)")(\s*;)"#,
    )
    .expect("assignment pattern is valid")
});

/// Известные ключи конфигурации управляемого бота.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigKey {
    BotToken,
    AdminId,
    Domain,
    BotUsername,
    DbName,
    DbUser,
    DbPassword,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 7] = [
        ConfigKey::BotToken,
        ConfigKey::AdminId,
        ConfigKey::Domain,
        ConfigKey::BotUsername,
        ConfigKey::DbName,
        ConfigKey::DbUser,
        ConfigKey::DbPassword,
    ];

    /// Имя переменной в файле (без `$`).
    pub fn var_name(self) -> &'static str {
        match self {
            ConfigKey::BotToken => "APIKEY",
            ConfigKey::AdminId => "adminnumber",
            ConfigKey::Domain => "domainhosts",
            ConfigKey::BotUsername => "usernamebot",
            ConfigKey::DbName => "dbname",
            ConfigKey::DbUser => "usernamedb",
            ConfigKey::DbPassword => "passworddb",
        }
    }

    /// Значение-заглушка «ещё не настроено».
    pub fn placeholder(self) -> &'static str {
        match self {
            ConfigKey::BotToken => "{API_KEY}",
            ConfigKey::AdminId => "{admin_number}",
            ConfigKey::Domain => "{domain_name}",
            ConfigKey::BotUsername => "{username_bot}",
            ConfigKey::DbName => "{database_name}",
            ConfigKey::DbUser => "{username_db}",
            ConfigKey::DbPassword => "{password_db}",
        }
    }

    /// Значение задано и не является заглушкой.
    pub fn is_configured(self, value: &str) -> bool {
        let trimmed = value.trim();
        !trimmed.is_empty() && trimmed != self.placeholder()
    }
}

/// Упорядоченный набор изменений без повторов по ключу.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    entries: Vec<(ConfigKey, String)>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Повторный `set` того же ключа заменяет значение, сохраняя позицию.
    pub fn set(&mut self, key: ConfigKey, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn get(&self, key: ConfigKey) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConfigKey, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: Vec<ConfigKey>,
    /// Ключи, присваивание которых не найдено в файле.
    pub skipped: Vec<ConfigKey>,
    /// Ключи, которые после записи читаются с другим значением.
    pub mismatched: Vec<ConfigKey>,
    /// `None`, если содержимое не изменилось и запись не понадобилась.
    pub backup: Option<PathBuf>,
}

impl ApplyReport {
    pub fn written(&self) -> bool {
        self.backup.is_some()
    }
}

/// Сколько резервных копий `config.php.bak.*` хранится рядом с файлом.
pub const BACKUPS_KEPT: usize = 5;

pub struct ConfigStore {
    path: PathBuf,
    runtime_user: String,
    lint_binary: String,
    runner: Arc<dyn CommandRunner>,
    writable: fn(&Path) -> bool,
}

impl ConfigStore {
    pub fn new(
        path: impl Into<PathBuf>,
        runtime_user: impl Into<String>,
        lint_binary: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            path: path.into(),
            runtime_user: runtime_user.into(),
            lint_binary: lint_binary.into(),
            runner,
            writable: is_writable,
        }
    }

    /// Подменяет проверку записи: под root любой файл доступен на запись.
    #[cfg(test)]
    fn with_writable_check(mut self, check: fn(&Path) -> bool) -> Self {
        self.writable = check;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Текущее сохранённое значение ключа.
    pub fn get(&self, key: ConfigKey) -> AdminResult<Option<String>> {
        let content = self.read()?;
        Ok(find_value(&content, key))
    }

    /// Все известные ключи, присутствующие в файле.
    pub fn values(&self) -> AdminResult<BTreeMap<ConfigKey, String>> {
        let content = self.read()?;
        Ok(ConfigKey::ALL
            .into_iter()
            .filter_map(|key| find_value(&content, key).map(|value| (key, value)))
            .collect())
    }

    pub fn apply(&self, batch: &MutationBatch) -> AdminResult<ApplyReport> {
        if batch.is_empty() {
            return Ok(ApplyReport::default());
        }
        if !self.path.is_file() {
            return Err(AdminError::NotFound(self.path.clone()));
        }
        self.ensure_writable()?;

        let original = self.read()?;
        let (content, applied, skipped) = mutate(&original, batch);
        for key in &skipped {
            tracing::warn!(
                key = key.var_name(),
                path = %self.path.display(),
                "Assignment not found in config, key skipped"
            );
        }

        if content == original {
            tracing::info!(
                path = %self.path.display(),
                applied = applied.len(),
                "Config already up to date, nothing to write"
            );
            return Ok(ApplyReport {
                applied,
                skipped,
                mismatched: Vec::new(),
                backup: None,
            });
        }

        let candidate = self.write_candidate(&content)?;
        let candidate_path = candidate.path().to_string_lossy().into_owned();
        let lint = self
            .runner
            .run(&self.lint_binary, &["-l", candidate_path.as_str()]);
        if !lint.success() {
            let diagnostic = lint.tail(10);
            if let Err(error) = candidate.close() {
                tracing::warn!(error = %error, "Failed to remove rejected config candidate");
            }
            tracing::error!(
                path = %self.path.display(),
                diagnostic = %diagnostic,
                "Updated config failed syntax check, original preserved"
            );
            return Err(AdminError::InvalidResult(diagnostic));
        }

        let backup = self.backup()?;
        candidate
            .persist(&self.path)
            .map_err(|e| AdminError::io(&self.path, e.error))?;
        tracing::info!(
            path = %self.path.display(),
            backup = %backup.display(),
            applied = ?applied.iter().map(|k| k.var_name()).collect::<Vec<_>>(),
            "Config updated"
        );

        let mismatched = self.verify(batch, &applied)?;
        Ok(ApplyReport {
            applied,
            skipped,
            mismatched,
            backup: Some(backup),
        })
    }

    fn read(&self) -> AdminResult<String> {
        fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                AdminError::NotFound(self.path.clone())
            }
            _ => AdminError::io(&self.path, e),
        })
    }

    fn ensure_writable(&self) -> AdminResult<()> {
        if (self.writable)(&self.path) {
            return Ok(());
        }
        tracing::warn!(path = %self.path.display(), "Config not writable, trying to fix permissions");
        self.make_group_writable();
        if (self.writable)(&self.path) {
            return Ok(());
        }

        let owner = format!("{0}:{0}", self.runtime_user);
        let path = self.path.to_string_lossy().into_owned();
        let chown = self.runner.run("chown", &[owner.as_str(), path.as_str()]);
        if !chown.success() {
            tracing::warn!(stderr = %chown.stderr, "chown of config failed");
        }
        self.make_group_writable();
        if (self.writable)(&self.path) {
            return Ok(());
        }

        Err(AdminError::PermissionDenied {
            path: self.path.clone(),
            remediation: AdminError::remediation_for(&self.path, &self.runtime_user, "664"),
        })
    }

    fn make_group_writable(&self) {
        if let Err(error) = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o664)) {
            tracing::warn!(path = %self.path.display(), error = %error, "chmod of config failed");
        }
    }

    fn write_candidate(&self, content: &str) -> AdminResult<tempfile::NamedTempFile> {
        let dir = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());

        let mut candidate = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => AdminError::PermissionDenied {
                    path: dir.to_path_buf(),
                    remediation: AdminError::remediation_for(dir, &self.runtime_user, "775"),
                },
                _ => AdminError::io(dir, e),
            })?;
        candidate
            .write_all(content.as_bytes())
            .and_then(|_| candidate.as_file().sync_all())
            .map_err(|e| AdminError::io(candidate.path(), e))?;

        // Права и владелец как у оригинала: файл читает веб-сервер.
        if let Ok(meta) = fs::metadata(&self.path) {
            if let Err(error) = fs::set_permissions(candidate.path(), meta.permissions()) {
                tracing::debug!(error = %error, "Could not copy config mode to candidate");
            }
            if let Err(error) =
                std::os::unix::fs::chown(candidate.path(), Some(meta.uid()), Some(meta.gid()))
            {
                tracing::debug!(error = %error, "Could not copy config ownership to candidate");
            }
        }
        Ok(candidate)
    }

    fn backup(&self) -> AdminResult<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let base = format!("{}.bak.{}", self.path.display(), stamp);
        let mut backup = PathBuf::from(&base);
        let mut n = 1;
        while backup.exists() {
            backup = PathBuf::from(format!("{}-{}", base, n));
            n += 1;
        }
        fs::copy(&self.path, &backup).map_err(|e| AdminError::io(&backup, e))?;
        self.prune_backups();
        Ok(backup)
    }

    /// Удаляет старые резервные копии, оставляя последние [`BACKUPS_KEPT`].
    fn prune_backups(&self) {
        let (Some(dir), Some(name)) = (self.path.parent(), self.path.file_name()) else {
            return;
        };
        let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
        let prefix = format!("{}.bak.", name.to_string_lossy());
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(path = %dir.display(), error = %error, "Cannot list config backups");
                return;
            }
        };
        let mut backups: Vec<(std::time::SystemTime, String, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .map(|entry| {
                let modified = entry
                    .metadata()
                    .and_then(|meta| meta.modified())
                    .unwrap_or(std::time::UNIX_EPOCH);
                (modified, entry.file_name().to_string_lossy().into_owned(), entry.path())
            })
            .collect();
        if backups.len() <= BACKUPS_KEPT {
            return;
        }
        backups.sort();
        let excess = backups.len() - BACKUPS_KEPT;
        for (_, _, path) in backups.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Old config backup removed"),
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "Failed to remove old config backup")
                }
            }
        }
    }

    fn verify(&self, batch: &MutationBatch, applied: &[ConfigKey]) -> AdminResult<Vec<ConfigKey>> {
        let content = self.read()?;
        let mut mismatched = Vec::new();
        for key in applied {
            let expected = batch.get(*key);
            let actual = find_main_value(&content, *key);
            if actual.as_deref() != expected {
                tracing::warn!(
                    key = key.var_name(),
                    expected = ?expected,
                    actual = ?actual,
                    "Config verification mismatch after update"
                );
                mismatched.push(*key);
            }
        }
        Ok(mismatched)
    }
}

fn is_writable(path: &Path) -> bool {
    fs::OpenOptions::new().write(true).open(path).is_ok()
}

/// Применяет набор к тексту: (новый текст, применённые ключи, пропущенные ключи).
fn mutate(original: &str, batch: &MutationBatch) -> (String, Vec<ConfigKey>, Vec<ConfigKey>) {
    let mut content = original.to_string();
    let mut applied = Vec::new();
    let mut skipped = Vec::new();

    for (key, value) in batch.iter() {
        let mut found = false;
        let escaped = escape_single_quoted(value);
        let replaced = ASSIGNMENT.replace_all(&content, |caps: &Captures| {
            if &caps[2] == key.var_name() {
                found = true;
                format!("{}'{}'{}", &caps[1], escaped, &caps[5])
            } else {
                caps[0].to_string()
            }
        });
        let replaced = replaced.into_owned();
        if found {
            applied.push(key);
            content = replaced;
        } else {
            skipped.push(key);
        }
    }
    (content, applied, skipped)
}

fn escape_single_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn unescape(raw: &str, quote: char) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next) if next == '\\' || next == quote || (quote == '"' && next == '$') => {
                out.push(next)
            }
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}

struct Assignment {
    depth: usize,
    value: String,
}

fn assignments(content: &str, key: ConfigKey) -> Vec<Assignment> {
    ASSIGNMENT
        .captures_iter(content)
        .filter(|caps| &caps[2] == key.var_name())
        .filter_map(|caps| {
            let start = caps.get(0)?.start();
            let value = match (caps.get(3), caps.get(4)) {
                (Some(single), _) => unescape(single.as_str(), '\''),
                (None, Some(double)) => unescape(double.as_str(), '"'),
                (None, None) => return None,
            };
            Some(Assignment {
                depth: brace_depth_at(content, start),
                value,
            })
        })
        .collect()
}

/// Значение из основной части файла: последнее присваивание вне блоков `{}`.
fn find_main_value(content: &str, key: ConfigKey) -> Option<String> {
    assignments(content, key)
        .into_iter()
        .filter(|a| a.depth == 0)
        .last()
        .map(|a| a.value)
}

fn find_value(content: &str, key: ConfigKey) -> Option<String> {
    find_main_value(content, key).or_else(|| assignments(content, key).pop().map(|a| a.value))
}

/// Глубина вложенности фигурных скобок, без учёта строк и комментариев.
fn brace_depth_at(content: &str, offset: usize) -> usize {
    let bytes = content.as_bytes();
    let end = offset.min(bytes.len());
    let mut depth = 0usize;
    let mut i = 0;
    while i < end {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'#' => i = skip_line(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_line(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }
    depth
}

fn skip_line(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|b| *b == b'\n')
        .map(|p| from + p)
        .unwrap_or(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::fake::{FakeRunner, fail, ok};

    const SAMPLE: &str = r#"<?php
$dbname = '{database_name}';
$usernamedb = '{username_db}';
$passworddb = '{password_db}';

if ($dbname === '{database_name}' || $usernamedb === '{username_db}') {
    die("ERROR: Database credentials not configured.");
}

$APIKEY = '{API_KEY}';
$adminnumber = '{admin_number}';
$domainhosts = '{domain_name}';
$usernamebot = '{username_bot}';

// Check if bot token is configured
if ($APIKEY === '{API_KEY}') {
    die("ERROR: Telegram bot API key not configured.");
}

$legacy_panel = true;
?>
"#;

    /// Линтер, который отвергает файл с маркером SYNTAX_ERROR.
    fn php_lint() -> Arc<FakeRunner> {
        Arc::new(FakeRunner::new(|program, args| {
            if program != "php" {
                return ok("");
            }
            let content = fs::read_to_string(args[1]).unwrap_or_default();
            if content.contains("SYNTAX_ERROR") {
                fail(255, "PHP Parse error: syntax error, unexpected end of file in candidate on line 3\nErrors parsing candidate")
            } else {
                ok("No syntax errors detected")
            }
        }))
    }

    fn store_with(content: &str, runner: Arc<FakeRunner>) -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.php");
        fs::write(&path, content).unwrap();
        let store = ConfigStore::new(&path, "www-data", "php", runner);
        (dir, store)
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn placeholder_token_is_replaced_and_linted() {
        let runner = php_lint();
        let (_dir, store) = store_with(SAMPLE, runner.clone());

        let mut batch = MutationBatch::new();
        batch.set(ConfigKey::BotToken, "123:ABC");
        let report = store.apply(&batch).unwrap();

        assert_eq!(report.applied, vec![ConfigKey::BotToken]);
        assert!(report.skipped.is_empty());
        assert!(report.mismatched.is_empty());
        assert!(report.written());

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("$APIKEY = '123:ABC';"));
        assert!(content.contains("if ($APIKEY === '{API_KEY}') {"));
        assert_eq!(
            content,
            SAMPLE.replace("$APIKEY = '{API_KEY}';", "$APIKEY = '123:ABC';")
        );
        assert_eq!(store.get(ConfigKey::BotToken).unwrap().as_deref(), Some("123:ABC"));
        assert_eq!(runner.calls_to("php").len(), 1);
    }

    #[test]
    fn applying_same_batch_twice_is_idempotent() {
        let (_dir, store) = store_with(SAMPLE, php_lint());
        let mut batch = MutationBatch::new();
        batch
            .set(ConfigKey::Domain, "bot.example.com")
            .set(ConfigKey::AdminId, "5522");

        store.apply(&batch).unwrap();
        let first = fs::read(store.path()).unwrap();
        let second_report = store.apply(&batch).unwrap();
        let second = fs::read(store.path()).unwrap();

        assert_eq!(first, second);
        assert!(!second_report.written());
        assert_eq!(
            second_report.applied,
            vec![ConfigKey::Domain, ConfigKey::AdminId]
        );
    }

    #[test]
    fn every_occurrence_of_a_key_is_rewritten() {
        let content = "<?php\n$domainhosts = '{domain_name}';\nif (!$ok) {\n    $domainhosts = \"old.example.com\";\n}\n";
        let (_dir, store) = store_with(content, php_lint());
        let mut batch = MutationBatch::new();
        batch.set(ConfigKey::Domain, "new.example.com");
        store.apply(&batch).unwrap();

        let updated = fs::read_to_string(store.path()).unwrap();
        assert_eq!(updated.matches("$domainhosts = 'new.example.com';").count(), 2);
        assert!(!updated.contains("old.example.com"));
    }

    #[test]
    fn missing_key_is_skipped_but_others_apply() {
        let content = "<?php\n$APIKEY = '{API_KEY}';\n";
        let (_dir, store) = store_with(content, php_lint());
        let mut batch = MutationBatch::new();
        batch
            .set(ConfigKey::DbName, "shop")
            .set(ConfigKey::BotToken, "77:XYZ");
        let report = store.apply(&batch).unwrap();

        assert_eq!(report.applied, vec![ConfigKey::BotToken]);
        assert_eq!(report.skipped, vec![ConfigKey::DbName]);
        assert_eq!(store.get(ConfigKey::BotToken).unwrap().as_deref(), Some("77:XYZ"));
        assert_eq!(store.get(ConfigKey::DbName).unwrap(), None);
    }

    #[test]
    fn failed_lint_leaves_original_untouched() {
        let (dir, store) = store_with(SAMPLE, php_lint());
        let before = fs::read(store.path()).unwrap();

        let mut batch = MutationBatch::new();
        batch.set(ConfigKey::BotUsername, "SYNTAX_ERROR");
        let err = store.apply(&batch).unwrap_err();

        match err {
            AdminError::InvalidResult(diagnostic) => {
                assert!(diagnostic.contains("PHP Parse error"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fs::read(store.path()).unwrap(), before);
        assert_eq!(dir_entries(dir.path()), vec!["config.php".to_string()]);
    }

    #[test]
    fn successful_apply_keeps_a_backup_of_previous_content() {
        let (dir, store) = store_with(SAMPLE, php_lint());
        let mut batch = MutationBatch::new();
        batch.set(ConfigKey::DbPassword, "s3cr3t");
        let report = store.apply(&batch).unwrap();

        let backup = report.backup.unwrap();
        assert_eq!(fs::read_to_string(&backup).unwrap(), SAMPLE);
        let entries = dir_entries(dir.path());
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|n| n.starts_with("config.php.bak.")));
        assert!(!entries.iter().any(|n| n.ends_with(".tmp")));
    }

    #[test]
    fn quotes_and_backslashes_survive_round_trip() {
        let (_dir, store) = store_with(SAMPLE, php_lint());
        let value = r"pa'ss\word";
        let mut batch = MutationBatch::new();
        batch.set(ConfigKey::DbPassword, value);
        store.apply(&batch).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains(r"$passworddb = 'pa\'ss\\word';"));
        assert_eq!(store.get(ConfigKey::DbPassword).unwrap().as_deref(), Some(value));
    }

    #[test]
    fn dollar_signs_in_values_are_literal() {
        let (_dir, store) = store_with(SAMPLE, php_lint());
        let mut batch = MutationBatch::new();
        batch.set(ConfigKey::DbPassword, "$1abc${2}");
        store.apply(&batch).unwrap();
        assert_eq!(
            store.get(ConfigKey::DbPassword).unwrap().as_deref(),
            Some("$1abc${2}")
        );
    }

    #[test]
    fn missing_file_fails_before_any_command() {
        let runner = php_lint();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.php");
        let store = ConfigStore::new(path, "www-data", "php", runner.clone());
        let mut batch = MutationBatch::new();
        batch.set(ConfigKey::BotToken, "1:A");

        assert!(matches!(store.apply(&batch), Err(AdminError::NotFound(_))));
        assert!(matches!(store.get(ConfigKey::BotToken), Err(AdminError::NotFound(_))));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn read_only_file_is_healed_before_write() {
        let (_dir, store) = store_with(SAMPLE, php_lint());
        fs::set_permissions(store.path(), fs::Permissions::from_mode(0o444)).unwrap();

        let mut batch = MutationBatch::new();
        batch.set(ConfigKey::AdminId, "100");
        store.apply(&batch).unwrap();

        assert_eq!(store.get(ConfigKey::AdminId).unwrap().as_deref(), Some("100"));
    }

    #[test]
    fn unwritable_config_tries_chown_then_reports_remediation() {
        let runner = php_lint();
        let (_dir, store) = store_with(SAMPLE, runner.clone());
        let store = store.with_writable_check(|_| false);
        let path = store.path().display().to_string();

        let mut batch = MutationBatch::new();
        batch.set(ConfigKey::AdminId, "100");
        let err = store.apply(&batch).unwrap_err();

        let AdminError::PermissionDenied { remediation, .. } = &err else {
            panic!("expected PermissionDenied, got {err:?}");
        };
        assert_eq!(
            remediation,
            &format!("chown www-data:www-data {path} && chmod 664 {path}")
        );
        assert!(err.to_string().contains(remediation.as_str()));
        assert_eq!(
            runner.calls_to("chown"),
            vec![vec!["chown".to_string(), "www-data:www-data".to_string(), path.clone()]]
        );
        assert!(runner.calls_to("php").is_empty());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), SAMPLE);
    }

    #[test]
    fn only_recent_backups_are_kept() {
        let (dir, store) = store_with(SAMPLE, php_lint());
        let writes = BACKUPS_KEPT + 3;
        for n in 0..writes {
            let mut batch = MutationBatch::new();
            batch.set(ConfigKey::AdminId, format!("{}", 1000 + n));
            store.apply(&batch).unwrap();
        }
        let before_last_write = format!("$adminnumber = '{}';", 1000 + writes - 2);

        let backups: Vec<String> = dir_entries(dir.path())
            .into_iter()
            .filter(|n| n.starts_with("config.php.bak."))
            .collect();
        assert_eq!(backups.len(), BACKUPS_KEPT);
        assert!(backups
            .iter()
            .any(|n| fs::read_to_string(dir.path().join(n)).unwrap().contains(&before_last_write)));
    }

    #[test]
    fn batch_deduplicates_by_key_keeping_order() {
        let mut batch = MutationBatch::new();
        batch
            .set(ConfigKey::Domain, "a.example.com")
            .set(ConfigKey::BotToken, "1:A")
            .set(ConfigKey::Domain, "b.example.com");
        let entries: Vec<_> = batch.iter().collect();
        assert_eq!(
            entries,
            vec![
                (ConfigKey::Domain, "b.example.com"),
                (ConfigKey::BotToken, "1:A")
            ]
        );
        assert_eq!(batch.get(ConfigKey::Domain), Some("b.example.com"));
    }

    #[test]
    fn main_section_value_wins_over_nested_fallback() {
        let content = "<?php\nif (getenv('X')) {\n    $domainhosts = 'fallback.example.com';\n}\n$domainhosts = 'main.example.com';\n";
        assert_eq!(
            find_main_value(content, ConfigKey::Domain).as_deref(),
            Some("main.example.com")
        );
        let nested_only = "<?php\nif (true) { $domainhosts = 'only.example.com'; }\n";
        assert_eq!(find_main_value(nested_only, ConfigKey::Domain), None);
        assert_eq!(
            find_value(nested_only, ConfigKey::Domain).as_deref(),
            Some("only.example.com")
        );
    }

    #[test]
    fn braces_inside_strings_and_comments_do_not_nest() {
        let content = "<?php\n// {\n$x = '{';\n/* { */\n$APIKEY = 'k';\n";
        let offset = content.find("$APIKEY").unwrap();
        assert_eq!(brace_depth_at(content, offset), 0);
    }

    #[test]
    fn similar_variable_names_are_not_touched() {
        let content = "<?php\n$APIKEY2 = 'keep';\n$APIKEY = '{API_KEY}';\n";
        let (_dir, store) = store_with(content, php_lint());
        let mut batch = MutationBatch::new();
        batch.set(ConfigKey::BotToken, "9:Z");
        store.apply(&batch).unwrap();
        let updated = fs::read_to_string(store.path()).unwrap();
        assert!(updated.contains("$APIKEY2 = 'keep';"));
        assert!(updated.contains("$APIKEY = '9:Z';"));
    }

    #[test]
    fn placeholder_detection() {
        assert!(!ConfigKey::BotToken.is_configured("{API_KEY}"));
        assert!(!ConfigKey::Domain.is_configured("  "));
        assert!(ConfigKey::Domain.is_configured("bot.example.com"));
    }
}
