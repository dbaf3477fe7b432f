use crate::error::VigilResult;

/// Raw text returned by one `zpool` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Prefer stderr for diagnostics, fall back to stdout.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Read-only view over the `zpool` CLI.
///
/// Implementations return the unparsed invocation output so the collector can
/// be exercised against canned text without a ZFS installation.
pub trait ZpoolTool {
    /// Whether a `zpool` binary exists at all on this host.
    fn available(&self) -> bool;

    /// `zpool list -Hp -o name,size,alloc,free,frag,cap,dedup,health,altroot,guid`.
    fn list(&self) -> VigilResult<ToolOutput>;

    /// `zpool status` for a single pool; `resolve_paths` selects the `-LP` variant.
    fn status(&self, pool: &str, resolve_paths: bool) -> VigilResult<ToolOutput>;

    /// `zpool history` for a single pool.
    fn history(&self, pool: &str) -> VigilResult<ToolOutput>;
}
