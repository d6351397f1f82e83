//! Запуск внешних утилит (supervisorctl, nginx, certbot, php) через узкий интерфейс.

use std::process::Command;

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None`, если процесс не удалось запустить или он убит сигналом.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout и stderr одним текстом, как при `2>&1`.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (true, true) => String::new(),
        }
    }

    /// Последние `lines` строк объединённого вывода.
    pub fn tail(&self, lines: usize) -> String {
        tail_lines(&self.combined(), lines)
    }
}

pub fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> CommandOutput;
}

#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> CommandOutput {
        tracing::info!(program = program, args = ?args, "Running external command");
        match Command::new(program).args(args).output() {
            Ok(o) => {
                let result = CommandOutput {
                    code: o.status.code(),
                    stdout: String::from_utf8_lossy(&o.stdout).trim().to_string(),
                    stderr: String::from_utf8_lossy(&o.stderr).trim().to_string(),
                };
                if !result.success() {
                    tracing::warn!(
                        program = program,
                        code = ?result.code,
                        stderr = %result.stderr,
                        "External command returned non-zero status"
                    );
                }
                result
            }
            Err(e) => {
                tracing::error!(program = program, error = %e, "Failed to execute command");
                CommandOutput {
                    code: None,
                    stdout: String::new(),
                    stderr: format!("Ошибка запуска {}: {}", program, e),
                }
            }
        }
    }
}

#[cfg(test)]
pub mod fake {
    use super::{CommandOutput, CommandRunner};
    use std::sync::Mutex;

    type Script = Box<dyn Fn(&str, &[&str]) -> CommandOutput + Send + Sync>;

    /// Подменяет внешние утилиты в тестах и запоминает вызовы.
    pub struct FakeRunner {
        script: Script,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeRunner {
        pub fn new(
            script: impl Fn(&str, &[&str]) -> CommandOutput + Send + Sync + 'static,
        ) -> Self {
            Self {
                script: Box::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn always_ok() -> Self {
            Self::new(|_, _| ok(""))
        }

        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
            self.calls()
                .into_iter()
                .filter(|call| call.first().is_some_and(|p| p == program))
                .collect()
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, program: &str, args: &[&str]) -> CommandOutput {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().map(|a| a.to_string()));
            self.calls.lock().unwrap().push(call);
            (self.script)(program, args)
        }
    }

    pub fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn fail(code: i32, output: &str) -> CommandOutput {
        CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: output.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_output_joins_both_streams() {
        let out = CommandOutput {
            code: Some(1),
            stdout: "line one".to_string(),
            stderr: "line two".to_string(),
        };
        assert_eq!(out.combined(), "line one\nline two");
        assert!(!out.success());
    }

    #[test]
    fn tail_keeps_last_lines() {
        let text = "a\nb\nc\nd\ne";
        assert_eq!(tail_lines(text, 2), "d\ne");
        assert_eq!(tail_lines(text, 10), text);
        assert_eq!(tail_lines("", 3), "");
    }

    #[test]
    fn missing_program_is_reported_as_failure() {
        let out = SystemCommandRunner.run("definitely-not-a-real-binary-vpnbot", &[]);
        assert!(!out.success());
        assert!(out.code.is_none());
        assert!(out.stderr.contains("definitely-not-a-real-binary-vpnbot"));
    }
}
