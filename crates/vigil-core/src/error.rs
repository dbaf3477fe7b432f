use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias for core operations.
pub type VigilResult<T> = Result<T, VigilError>;

#[derive(Error, Debug)]
pub enum VigilError {
    #[error("[VG1000] io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[VG1001] toml config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("[VG1002] yaml config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[VG1100] configuration error: {0}")]
    InvalidConfig(String),

    #[error("[VG2000] provider error: {0}")]
    Provider(String),

    #[error("[VG2001] {} timed out after {:?}", .binary.display(), .timeout)]
    Timeout { binary: PathBuf, timeout: Duration },

    #[error("[VG2002] tool `{0}` is not installed")]
    ToolUnavailable(String),

    #[error("[VG3000] collection cancelled")]
    Cancelled,
}

impl VigilError {
    pub fn code(&self) -> &'static str {
        match self {
            VigilError::Io(_) => "VG1000",
            VigilError::Toml(_) => "VG1001",
            VigilError::Yaml(_) => "VG1002",
            VigilError::InvalidConfig(_) => "VG1100",
            VigilError::Provider(_) => "VG2000",
            VigilError::Timeout { .. } => "VG2001",
            VigilError::ToolUnavailable(_) => "VG2002",
            VigilError::Cancelled => "VG3000",
        }
    }

    /// True when the error means the whole cycle must stop rather than degrade.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, VigilError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_display_prefix() {
        let errors = [
            VigilError::InvalidConfig("x".into()),
            VigilError::Provider("y".into()),
            VigilError::ToolUnavailable("zpool".into()),
            VigilError::Cancelled,
            VigilError::Timeout {
                binary: PathBuf::from("/sbin/zpool"),
                timeout: Duration::from_secs(1),
            },
        ];
        for err in errors {
            let rendered = err.to_string();
            assert!(
                rendered.starts_with(&format!("[{}]", err.code())),
                "{rendered}"
            );
        }
    }
}
