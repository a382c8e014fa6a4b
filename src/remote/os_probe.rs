use serde::{Deserialize, Serialize};

use super::RemoteExecutor;

/// Probe command; harmless on every platform and answers with the kernel name on POSIX.
pub const PROBE_COMMAND: &str = "uname -s";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    /// Linux and Darwin: open files can be renamed in place.
    Linux,
    /// Running binaries are locked and must be stopped before replacement.
    Windows,
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsFamily::Linux => write!(f, "linux"),
            OsFamily::Windows => write!(f, "windows"),
        }
    }
}

/// Anything that does not look like Linux or Darwin is treated as Windows.
pub fn classify(output: &str) -> OsFamily {
    let output = output.to_lowercase();
    if output.contains("linux") || output.contains("darwin") {
        OsFamily::Linux
    } else {
        OsFamily::Windows
    }
}

/// Never fails: a broken probe degrades to the conservative Windows handling.
pub async fn detect(executor: &dyn RemoteExecutor) -> OsFamily {
    match executor.run(PROBE_COMMAND).await {
        Ok(output) => {
            let family = classify(&output.stdout);
            tracing::debug!(probe = %output.stdout.trim(), %family, "Classified remote OS");
            family
        }
        Err(err) => {
            tracing::warn!("OS probe failed, assuming windows: {}", err);
            OsFamily::Windows
        }
    }
}
