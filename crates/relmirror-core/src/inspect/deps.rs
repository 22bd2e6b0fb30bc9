//! Shared-library dependency extraction
//!
//! Runs a static-linkage inspection tool (`objdump -p` by default) against one
//! executable and collects the `NEEDED` entries of its dynamic section.

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Trait for dependency extractor implementations
///
/// Extraction never fails: a missing tool, a non-ELF input or a tool error all
/// mean "no dependencies found".
#[async_trait]
pub trait DependencyExtractor: Send + Sync {
    /// Shared-library names the binary at `path` links against, in tool order
    async fn extract(&self, path: &Path, cancel: CancellationToken) -> Vec<String>;
}

/// Extractor that shells out to `<tool> -p -- <path>`
#[derive(Debug, Clone)]
pub struct ObjdumpExtractor {
    tool: String,
    timeout: Duration,
}

impl ObjdumpExtractor {
    pub fn new(tool: impl Into<String>, timeout: Duration) -> Self {
        Self {
            tool: tool.into(),
            timeout,
        }
    }

    pub fn from_config(config: &crate::config::SyncConfig) -> Self {
        Self::new(config.inspector_tool.clone(), config.tool_timeout())
    }
}

impl Default for ObjdumpExtractor {
    fn default() -> Self {
        Self::from_config(&crate::config::SyncConfig::default())
    }
}

#[async_trait]
impl DependencyExtractor for ObjdumpExtractor {
    async fn extract(&self, path: &Path, cancel: CancellationToken) -> Vec<String> {
        let child = Command::new(&self.tool)
            .arg("-p")
            .arg("--")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::debug!("Cannot launch {}: {}", self.tool, e);
                return Vec::new();
            }
        };

        // dropping the output future kills the child
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Dependency inspection of {} cancelled", path.display());
                return Vec::new();
            }
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => result,
        };

        match output {
            Ok(Ok(output)) if output.status.success() => {
                parse_needed(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                tracing::debug!(
                    "{} exited with {} for {}",
                    self.tool,
                    output.status,
                    path.display()
                );
                Vec::new()
            }
            Ok(Err(e)) => {
                tracing::debug!("{} failed for {}: {}", self.tool, path.display(), e);
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    "{} timed out after {:?} for {}",
                    self.tool,
                    self.timeout,
                    path.display()
                );
                Vec::new()
            }
        }
    }
}

fn needed_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^\s*NEEDED\s+(.+)$").expect("valid NEEDED pattern"))
}

/// Collect the `NEEDED` library names from program-header output
///
/// Names are trimmed and returned in line order; duplicates are kept.
pub fn parse_needed(output: &str) -> Vec<String> {
    needed_pattern()
        .captures_iter(output)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const OBJDUMP_SAMPLE: &str = "
tool:     file format elf64-x86-64

Program Header:
    PHDR off    0x0000000000000040 vaddr 0x0000000000000040 paddr 0x0000000000000040 align 2**3

Dynamic Section:
  NEEDED               libssl.so.3
  NEEDED               libcrypto.so.3
  NEEDED               libc.so.6
  SONAME               tool.so.1
  INIT                 0x0000000000002000
";

    #[test]
    fn test_parse_needed_ignores_other_tags() {
        let input = "  NEEDED libc.so.6\n  SONAME foo.so.1\n";
        assert_eq!(parse_needed(input), vec!["libc.so.6".to_string()]);
    }

    #[test]
    fn test_parse_needed_empty_input() {
        assert!(parse_needed("").is_empty());
    }

    #[test]
    fn test_parse_needed_keeps_order_and_duplicates() {
        let mut input = OBJDUMP_SAMPLE.to_string();
        input.push_str("  NEEDED               libc.so.6\n");

        assert_eq!(
            parse_needed(&input),
            vec!["libssl.so.3", "libcrypto.so.3", "libc.so.6", "libc.so.6"]
        );
    }

    #[test]
    fn test_parse_needed_handles_crlf() {
        let input = "  NEEDED   libz.so.1\r\n  NEEDED   libm.so.6\r\n";
        assert_eq!(parse_needed(input), vec!["libz.so.1", "libm.so.6"]);
    }

    #[tokio::test]
    async fn test_missing_tool_yields_empty() {
        let extractor = ObjdumpExtractor::new(
            "relmirror-no-such-inspector",
            Duration::from_secs(5),
        );
        let deps = extractor
            .extract(Path::new("/bin/sh"), CancellationToken::new())
            .await;
        assert!(deps.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_extraction_yields_empty() {
        let extractor = ObjdumpExtractor::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let deps = extractor.extract(Path::new("/bin/sh"), cancel).await;
        assert!(deps.is_empty());
    }
}
