//! Backend tool execution.
//!
//! Disk drivers never spawn processes directly: they describe a [`ToolCommand`]
//! and hand it to a [`CommandRunner`]. Production uses [`SystemRunner`]; tests
//! substitute a scripted runner and assert on the recorded command lines.

use std::process::{Command, Stdio};

use localvol_shared::errors::{LocalvolError, LocalvolResult};

/// A single invocation of an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    run_as_root: bool,
    check_exit_code: bool,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            run_as_root: false,
            check_exit_code: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run through the configured root helper.
    pub fn as_root(mut self) -> Self {
        self.run_as_root = true;
        self
    }

    /// Treat a non-zero exit code as success (output is still returned).
    pub fn ignore_exit_code(mut self) -> Self {
        self.check_exit_code = false;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn runs_as_root(&self) -> bool {
        self.run_as_root
    }

    pub fn checks_exit_code(&self) -> bool {
        self.check_exit_code
    }

    /// Program and arguments joined by spaces, for logs and assertions.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Executes tool commands, blocking the caller until the tool exits.
pub trait CommandRunner: Send + Sync {
    fn execute(&self, command: &ToolCommand) -> LocalvolResult<ToolOutput>;
}

/// Runs tools as child processes of this one.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    root_helper: Option<String>,
}

impl SystemRunner {
    /// `root_helper` is prefixed to commands marked [`ToolCommand::as_root`],
    /// e.g. `sudo`. `None` runs them directly.
    pub fn new(root_helper: Option<String>) -> Self {
        Self { root_helper }
    }

    fn build(&self, command: &ToolCommand) -> Command {
        let mut cmd = match (&self.root_helper, command.run_as_root) {
            (Some(helper), true) => {
                let mut cmd = Command::new(helper);
                cmd.arg(&command.program);
                cmd
            }
            _ => Command::new(&command.program),
        };
        cmd.args(&command.args);
        cmd.stdin(Stdio::null());
        cmd
    }
}

impl CommandRunner for SystemRunner {
    fn execute(&self, command: &ToolCommand) -> LocalvolResult<ToolOutput> {
        tracing::debug!(command = %command.command_line(), as_root = command.run_as_root, "Running tool");

        let output = self.build(command).output().map_err(|e| {
            let err_msg = format!("failed to spawn: {}", e);
            tracing::error!(command = %command.command_line(), "{}", err_msg);
            LocalvolError::BackendToolFailure {
                tool: command.program.clone(),
                exit_code: None,
                stderr: err_msg,
            }
        })?;

        let result = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };

        if command.check_exit_code && !output.status.success() {
            tracing::warn!(
                command = %command.command_line(),
                exit_code = ?result.exit_code,
                stderr = %result.stderr.trim(),
                "Tool exited with failure"
            );
            return Err(LocalvolError::BackendToolFailure {
                tool: command.program.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }

        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner for driver tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Debug, Clone)]
    enum Reply {
        Ok(String),
        Fail(i32),
    }

    struct Rule {
        prefix: String,
        replies: VecDeque<Reply>,
    }

    /// Records every command and answers from the longest matching prefix rule.
    ///
    /// A rule's replies are consumed in order; its last reply repeats.
    /// Commands with no matching rule succeed with empty output.
    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        rules: Mutex<Vec<Rule>>,
        calls: Mutex<Vec<ToolCommand>>,
    }

    impl ScriptedRunner {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        fn push(&self, prefix: &str, reply: Reply) {
            let mut rules = self.rules.lock();
            if let Some(rule) = rules.iter_mut().find(|r| r.prefix == prefix) {
                rule.replies.push_back(reply);
            } else {
                rules.push(Rule {
                    prefix: prefix.to_string(),
                    replies: VecDeque::from([reply]),
                });
            }
        }

        pub(crate) fn on_ok(&self, prefix: &str, stdout: &str) -> &Self {
            self.push(prefix, Reply::Ok(stdout.to_string()));
            self
        }

        pub(crate) fn on_fail(&self, prefix: &str, exit_code: i32) -> &Self {
            self.push(prefix, Reply::Fail(exit_code));
            self
        }

        /// Answer `qemu-img info` for `path` with the given virtual size.
        pub(crate) fn with_virtual_size(&self, path: &str, bytes: u64) -> &Self {
            self.on_ok(
                &format!("qemu-img info --output=json {}", path),
                &format!(r#"{{"virtual-size": {}, "format": "raw"}}"#, bytes),
            )
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().iter().map(|c| c.command_line()).collect()
        }

        pub(crate) fn commands(&self) -> Vec<ToolCommand> {
            self.calls.lock().clone()
        }

        pub(crate) fn count(&self, prefix: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn execute(&self, command: &ToolCommand) -> LocalvolResult<ToolOutput> {
            self.calls.lock().push(command.clone());
            let line = command.command_line();

            let reply = {
                let mut rules = self.rules.lock();
                rules
                    .iter_mut()
                    .filter(|r| line.starts_with(&r.prefix))
                    .max_by_key(|r| r.prefix.len())
                    .and_then(|rule| {
                        if rule.replies.len() > 1 {
                            rule.replies.pop_front()
                        } else {
                            rule.replies.front().cloned()
                        }
                    })
            };

            match reply {
                None => Ok(ToolOutput {
                    exit_code: Some(0),
                    ..Default::default()
                }),
                Some(Reply::Ok(stdout)) => Ok(ToolOutput {
                    stdout,
                    stderr: String::new(),
                    exit_code: Some(0),
                }),
                Some(Reply::Fail(code)) if !command.checks_exit_code() => Ok(ToolOutput {
                    stdout: String::new(),
                    stderr: "scripted failure".into(),
                    exit_code: Some(code),
                }),
                Some(Reply::Fail(code)) => Err(LocalvolError::BackendToolFailure {
                    tool: command.program().to_string(),
                    exit_code: Some(code),
                    stderr: "scripted failure".into(),
                }),
            }
        }
    }
}
