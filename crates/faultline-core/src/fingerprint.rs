//! Error fingerprinting.
//!
//! A fingerprint is the SHA-256 of the error kind, the normalised message,
//! the category and, optionally, the call site that raised the error.

use crate::normalize::normalize_message;
use crate::Category;
use sha2::{Digest, Sha256};

const DELIMITER: &[u8] = b"\x00";
const UNKNOWN_KIND: &str = "Unknown";

#[derive(Debug, Clone)]
pub struct FingerprintConfig {
    /// Mix the call-site signature into the hash when one is available.
    pub include_call_site: bool,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            include_call_site: true,
        }
    }
}

/// Structural signature of where an error was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub module: Option<String>,
    pub function: String,
}

impl CallSite {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            module: None,
            function: function.into(),
        }
    }

    pub fn in_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn signature(&self) -> String {
        match self.module.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            Some(module) => format!("{module}::{}", self.function.trim()),
            None => self.function.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    config: FingerprintConfig,
}

impl Fingerprinter {
    pub fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }

    pub fn compute(
        &self,
        error_kind: &str,
        message: &str,
        category: Category,
        call_site: Option<&CallSite>,
    ) -> String {
        let kind = error_kind.trim();
        let kind = if kind.is_empty() { UNKNOWN_KIND } else { kind };

        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update(DELIMITER);
        hasher.update(normalize_message(message).as_bytes());
        hasher.update(DELIMITER);
        hasher.update(category.as_str().as_bytes());
        hasher.update(DELIMITER);
        if self.config.include_call_site {
            if let Some(site) = call_site {
                hasher.update(site.signature().as_bytes());
            }
        }

        hex_digest(&hasher.finalize())
    }
}

fn hex_digest(digest: &[u8]) -> String {
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
