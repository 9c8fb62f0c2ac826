// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::command_executor::{command_line, CommandExecutor, CommandOutput};
use crate::result::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

struct MockRule {
    pattern: String,
    output: CommandOutput,
    remaining: Option<u32>,
    /// File rewritten when the rule answers, standing in for the command's effect on the host.
    writes: Option<(PathBuf, String)>,
}

/// Answers commands from scripted rules matched by command line substring, first rule wins.
/// Unmatched commands succeed with empty output. Every command line is recorded.
#[derive(Default)]
pub struct MockCommandExecutor {
    rules: Mutex<Vec<MockRule>>,
    calls: Mutex<Vec<String>>,
}

impl MockCommandExecutor {
    pub fn new() -> Self {
        MockCommandExecutor::default()
    }

    fn add_rule(&self, pattern: &str, output: CommandOutput, remaining: Option<u32>) {
        self.rules.lock().unwrap().push(MockRule {
            pattern: pattern.to_string(),
            output,
            remaining,
            writes: None,
        });
    }

    pub fn on(&self, pattern: &str, exit_code: i32, stdout: &str) {
        self.add_rule(
            pattern,
            CommandOutput::new(exit_code, stdout.to_string(), String::new()),
            None,
        );
    }

    pub fn on_times(&self, pattern: &str, exit_code: i32, stdout: &str, times: u32) {
        self.add_rule(
            pattern,
            CommandOutput::new(exit_code, stdout.to_string(), String::new()),
            Some(times),
        );
    }

    pub fn on_failure(&self, pattern: &str, exit_code: i32, stderr: &str) {
        self.add_rule(
            pattern,
            CommandOutput::new(exit_code, String::new(), stderr.to_string()),
            None,
        );
    }

    pub fn on_failure_times(&self, pattern: &str, exit_code: i32, stderr: &str, times: u32) {
        self.add_rule(
            pattern,
            CommandOutput::new(exit_code, String::new(), stderr.to_string()),
            Some(times),
        );
    }

    /// Succeeds and replaces `path` with `content`, e.g. `umount` rewriting `/proc/mounts`.
    pub fn on_writes_file(&self, pattern: &str, path: &Path, content: &str) {
        self.rules.lock().unwrap().push(MockRule {
            pattern: pattern.to_string(),
            output: CommandOutput::new(0, String::new(), String::new()),
            remaining: None,
            writes: Some((path.to_path_buf(), content.to_string())),
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }

    pub fn has_call(&self, pattern: &str) -> bool {
        self.count(pattern) > 0
    }

    /// Index of the first recorded command line containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.contains(pattern))
    }
}

impl CommandExecutor for MockCommandExecutor {
    fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        self.calls.lock().unwrap().push(line.clone());

        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if !line.contains(&rule.pattern) || rule.remaining == Some(0) {
                continue;
            }
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            if let Some((path, content)) = &rule.writes {
                fs::write(path, content)?;
            }
            return Ok(rule.output.clone());
        }
        Ok(CommandOutput::new(0, String::new(), String::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::MockCommandExecutor;
    use crate::command_executor::CommandExecutor;

    #[test]
    fn mock_rules_test() {
        let executor = MockCommandExecutor::new();
        executor.on_failure_times("umount /oldroot", 32, "target is busy", 1);
        executor.on("lsblk", 0, "NAME=\"sda\"");

        assert_eq!(32, executor.execute("umount", &["/oldroot"]).unwrap().exit_code());
        assert!(executor.execute("umount", &["/oldroot"]).unwrap().is_success());
        assert_eq!(
            "NAME=\"sda\"",
            executor.execute("lsblk", &["-P"]).unwrap().stdout()
        );
        assert_eq!(2, executor.count("umount /oldroot"));
        assert_eq!(Some(2), executor.position("lsblk"));
        assert!(!executor.has_call("cryptsetup"));
    }
}
