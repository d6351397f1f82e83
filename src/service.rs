//! Управление процессом бота через supervisorctl и его лог-файлом.

use crate::command::{CommandOutput, CommandRunner, tail_lines};
use crate::db::{Actor, Db};
use crate::error::{AdminError, AdminResult};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Сколько байт с конца лога читаем при выводе хвоста.
const LOG_TAIL_WINDOW: u64 = 1024 * 1024;

const SUPERVISOR_STATES: [&str; 8] = [
    "RUNNING", "STARTING", "BACKOFF", "STOPPING", "STOPPED", "EXITED", "FATAL", "UNKNOWN",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "start" => Some(ServiceAction::Start),
            "stop" => Some(ServiceAction::Stop),
            "restart" => Some(ServiceAction::Restart),
            _ => None,
        }
    }

    fn audit_action(self) -> &'static str {
        match self {
            ServiceAction::Start => "bot_start",
            ServiceAction::Stop => "bot_stop",
            ServiceAction::Restart => "bot_restart",
        }
    }

    fn audit_description(self) -> &'static str {
        match self {
            ServiceAction::Start => "Started bot process",
            ServiceAction::Stop => "Stopped bot process",
            ServiceAction::Restart => "Restarted bot process",
        }
    }
}

#[derive(Debug)]
pub struct ServiceResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl From<CommandOutput> for ServiceResult {
    fn from(output: CommandOutput) -> Self {
        Self {
            success: output.success(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessStatus {
    /// Ключевое слово состояния supervisor (RUNNING, STOPPED, ...).
    pub state: String,
    pub running: bool,
    pub pid: Option<u32>,
    pub cpu_percent: Option<f32>,
    pub mem_percent: Option<f32>,
    pub uptime: Option<Duration>,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTail {
    pub path: PathBuf,
    pub lines: Vec<String>,
}

pub struct ProcessController {
    supervisor: String,
    service_name: String,
    log_path: PathBuf,
    fallback_log_path: PathBuf,
    runner: Arc<dyn CommandRunner>,
    audit: Arc<Db>,
}

impl ProcessController {
    pub fn new(
        supervisor: impl Into<String>,
        service_name: impl Into<String>,
        log_path: impl Into<PathBuf>,
        fallback_log_path: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        audit: Arc<Db>,
    ) -> Self {
        Self {
            supervisor: supervisor.into(),
            service_name: service_name.into(),
            log_path: log_path.into(),
            fallback_log_path: fallback_log_path.into(),
            runner,
            audit,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn run_supervisor(&self, action: &str) -> ServiceResult {
        tracing::info!(
            action = action,
            service = %self.service_name,
            "Running supervisor command"
        );
        let result = ServiceResult::from(
            self.runner
                .run(&self.supervisor, &[action, self.service_name.as_str()]),
        );
        if result.success {
            tracing::info!(
                action = action,
                service = %self.service_name,
                "Supervisor command finished successfully"
            );
        } else {
            tracing::warn!(
                action = action,
                service = %self.service_name,
                stderr = %result.stderr,
                "Supervisor returned non-zero status"
            );
        }
        result
    }

    pub async fn control(&self, actor: &Actor, action: ServiceAction) -> ServiceResult {
        let result = self.run_supervisor(action.as_str());
        let description = if result.success {
            action.audit_description().to_string()
        } else {
            format!(
                "Failed to {} bot process: {}",
                action.as_str(),
                tail_lines(&raw_output(&result), 5)
            )
        };
        self.audit
            .record(actor, action.audit_action(), &description)
            .await;
        result
    }

    pub async fn restart(&self, actor: &Actor) -> ServiceResult {
        self.control(actor, ServiceAction::Restart).await
    }

    pub fn status(&self) -> ProcessStatus {
        let result = self.run_supervisor("status");
        let raw = raw_output(&result);
        let first_line = raw.lines().next().unwrap_or("");
        let (state, pid) = parse_status_line(first_line);
        let running = state == "RUNNING";

        let mut status = ProcessStatus {
            state,
            running,
            pid: if running { pid } else { None },
            cpu_percent: None,
            mem_percent: None,
            uptime: None,
            raw,
        };

        if let Some(pid) = status.pid {
            let pid_arg = pid.to_string();
            let ps = self.runner.run(
                "ps",
                &["-p", pid_arg.as_str(), "-o", "%mem,%cpu,etimes", "--no-headers"],
            );
            if ps.success()
                && let Some((mem, cpu, uptime)) = parse_ps_line(&ps.stdout)
            {
                status.mem_percent = Some(mem);
                status.cpu_percent = Some(cpu);
                status.uptime = Some(uptime);
            } else {
                tracing::warn!(pid = pid, stderr = %ps.stderr, "Failed to read process metrics");
            }
        }
        status
    }

    /// Основной лог, а если его нет, запасной.
    fn resolve_log_path(&self) -> AdminResult<&Path> {
        if self.log_path.is_file() {
            Ok(&self.log_path)
        } else if self.fallback_log_path.is_file() {
            Ok(&self.fallback_log_path)
        } else {
            Err(AdminError::NotFound(self.log_path.clone()))
        }
    }

    pub fn tail_logs(&self, lines: usize) -> AdminResult<LogTail> {
        let path = self.resolve_log_path()?;
        let mut file = fs::File::open(path).map_err(|e| AdminError::io(path, e))?;
        let len = file.metadata().map_err(|e| AdminError::io(path, e))?.len();
        if len > LOG_TAIL_WINDOW {
            file.seek(SeekFrom::Start(len - LOG_TAIL_WINDOW))
                .map_err(|e| AdminError::io(path, e))?;
        }
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| AdminError::io(path, e))?;
        let text = String::from_utf8_lossy(&bytes);

        let all: Vec<&str> = text.lines().collect();
        let start = all.len().saturating_sub(lines);
        Ok(LogTail {
            path: path.to_path_buf(),
            lines: all[start..].iter().map(|l| l.to_string()).collect(),
        })
    }

    pub async fn clear_logs(&self, actor: &Actor) -> AdminResult<PathBuf> {
        let path = self.resolve_log_path()?.to_path_buf();
        fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => AdminError::PermissionDenied {
                    path: path.clone(),
                    remediation: AdminError::remediation_for(&path, "root", "664"),
                },
                _ => AdminError::io(&path, e),
            })?;
        tracing::info!(path = %path.display(), "Bot log cleared");
        self.audit
            .record(actor, "logs_cleared", "Cleared bot logs")
            .await;
        Ok(path)
    }

    pub fn format_result(&self, action: &str, r: &ServiceResult) -> String {
        let status = if r.success { "OK" } else { "Ошибка" };
        let mut out = format!("{} {}: {}\n", action, self.service_name, status);
        if !r.stdout.is_empty() {
            out.push_str(&r.stdout);
            out.push('\n');
        }
        if !r.stderr.is_empty() {
            out.push_str(&r.stderr);
        }
        out.trim().to_string()
    }
}

fn raw_output(result: &ServiceResult) -> String {
    CommandOutput {
        code: None,
        stdout: result.stdout.clone(),
        stderr: result.stderr.clone(),
    }
    .combined()
}

/// `vpnbot  RUNNING   pid 4821, uptime 0:12:03` -> ("RUNNING", Some(4821)).
pub fn parse_status_line(line: &str) -> (String, Option<u32>) {
    let tokens: Vec<&str> = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();
    let state = tokens
        .iter()
        .find(|t| SUPERVISOR_STATES.contains(t))
        .map(|t| t.to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string());
    let pid = tokens
        .windows(2)
        .find(|pair| pair[0] == "pid")
        .and_then(|pair| pair[1].parse::<u32>().ok());
    (state, pid)
}

/// Строка `ps -o %mem,%cpu,etimes`: (mem%, cpu%, время работы).
fn parse_ps_line(output: &str) -> Option<(f32, f32, Duration)> {
    let mut parts = output.lines().next()?.split_whitespace();
    let mem = parts.next()?.parse::<f32>().ok()?;
    let cpu = parts.next()?.parse::<f32>().ok()?;
    let secs = parts.next()?.parse::<u64>().ok()?;
    Some((mem, cpu, Duration::from_secs(secs)))
}

pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    if days > 0 {
        format!("{}д {:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}
