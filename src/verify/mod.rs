//! Verification capability used by the scanner.
//!
//! `Ok(true)` means the image verified, `Ok(false)` means it is vulnerable
//! (or unsigned), and `Err` means the capability itself failed.

pub mod command;

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::errors::{EraserError, Result};

pub use command::CommandVerifier;

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, reference: &str) -> Result<bool>;
}

/// Scripted answer for one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticAnswer {
    Verified,
    Vulnerable,
    Error(String),
}

/// Verifier answering from a fixed table; records every reference it is asked about.
#[derive(Debug)]
pub struct StaticVerifier {
    answers: HashMap<String, StaticAnswer>,
    default: StaticAnswer,
    asked: Mutex<Vec<String>>,
}

impl StaticVerifier {
    /// Every reference not in the table gets `default`.
    pub fn new(default: StaticAnswer) -> Self {
        Self {
            answers: HashMap::new(),
            default,
            asked: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with(mut self, reference: &str, answer: StaticAnswer) -> Self {
        self.answers.insert(reference.to_string(), answer);
        self
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().clone()
    }
}

#[async_trait]
impl Verifier for StaticVerifier {
    async fn verify(&self, reference: &str) -> Result<bool> {
        self.asked.lock().push(reference.to_string());
        match self.answers.get(reference).unwrap_or(&self.default) {
            StaticAnswer::Verified => Ok(true),
            StaticAnswer::Vulnerable => Ok(false),
            StaticAnswer::Error(details) => Err(EraserError::Verification {
                image: reference.to_string(),
                details: details.clone(),
            }),
        }
    }
}
