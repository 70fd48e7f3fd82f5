//! Verifier backed by an external command (e.g. `cosign verify --key ...`).
//!
//! The reference replaces every `{image}` placeholder in the argv, or is
//! appended as the last argument when there is none. Exit 0 verifies; the
//! configured "unverified" exit code marks the image vulnerable; any other
//! exit, a spawn failure, or a timeout is a verification error.

#![allow(missing_docs)]

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::config::ScannerConfig;
use crate::core::errors::{EraserError, Result};
use crate::verify::Verifier;

const PLACEHOLDER: &str = "{image}";

#[derive(Debug, Clone)]
pub struct CommandVerifier {
    argv: Vec<String>,
    timeout: Duration,
    unverified_exit_code: i32,
}

impl CommandVerifier {
    pub fn new(argv: Vec<String>, timeout: Duration, unverified_exit_code: i32) -> Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(EraserError::InvalidConfig {
                details: "scanner.verifier_command must name a program".to_string(),
            });
        }
        Ok(Self {
            argv,
            timeout,
            unverified_exit_code,
        })
    }

    pub fn from_config(config: &ScannerConfig) -> Result<Self> {
        Self::new(
            config.verifier_command.clone(),
            Duration::from_secs(config.verify_timeout_secs),
            config.unverified_exit_code,
        )
    }

    /// Full argv for one reference.
    #[must_use]
    pub fn command_line(&self, reference: &str) -> Vec<String> {
        let mut argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| arg.replace(PLACEHOLDER, reference))
            .collect();
        if !self.argv.iter().any(|arg| arg.contains(PLACEHOLDER)) {
            argv.push(reference.to_string());
        }
        argv
    }
}

#[async_trait]
impl Verifier for CommandVerifier {
    async fn verify(&self, reference: &str) -> Result<bool> {
        let argv = self.command_line(reference);
        let fail = |details: String| EraserError::Verification {
            image: reference.to_string(),
            details,
        };

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| fail(format!("timed out after {}ms", self.timeout.as_millis())))?
            .map_err(|e| fail(format!("cannot run {}: {e}", argv[0])))?;

        match output.status.code() {
            Some(0) => Ok(true),
            Some(code) if code == self.unverified_exit_code => Ok(false),
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
                let status = code.map_or_else(|| "killed by signal".to_string(), |c| format!("exit {c}"));
                Err(fail(if last_line.is_empty() {
                    status
                } else {
                    format!("{status}: {}", last_line.trim())
                }))
            }
        }
    }
}
