use std::time::Duration;

use super::planner::ArtifactStrategy;
use crate::models::StepKey;
use crate::remote::{OsFamily, ShellDialect};

/// Swap procedure for one attempt, fixed once the remote OS is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStrategy {
    /// Zip the expanded directory, then unzip the new archive over it.
    Archive(OsFamily),
    /// Move the live file to the backup name, move the staged file into place.
    /// Windows hosts additionally stop the process and wait for handles to close.
    Binary(OsFamily),
}

impl SwapStrategy {
    pub fn select(artifact: ArtifactStrategy, os: OsFamily) -> Self {
        match artifact {
            ArtifactStrategy::ArchiveExpand => SwapStrategy::Archive(os),
            ArtifactStrategy::BinarySwap => SwapStrategy::Binary(os),
        }
    }

    pub fn os(&self) -> OsFamily {
        match self {
            SwapStrategy::Archive(os) | SwapStrategy::Binary(os) => *os,
        }
    }

    pub fn dialect(&self) -> ShellDialect {
        ShellDialect::from(self.os())
    }

    /// Windows refuses to rename a locked file, so the process goes down first.
    pub fn requires_stop(&self) -> bool {
        matches!(self, SwapStrategy::Binary(OsFamily::Windows))
    }

    /// Pause between the stop command and the first move.
    pub fn settle_delay(&self, configured: Duration) -> Duration {
        if self.requires_stop() {
            configured
        } else {
            Duration::ZERO
        }
    }
}

/// Ledger rows created up front for a full deploy of the given artifact kind.
pub fn deploy_steps(artifact: ArtifactStrategy) -> Vec<StepKey> {
    let mut steps = vec![
        StepKey::LocalUploaded,
        StepKey::Connect,
        StepKey::DetectOs,
        StepKey::Prepare,
        StepKey::Transfer,
    ];
    if artifact == ArtifactStrategy::BinarySwap {
        steps.push(StepKey::Stop);
    }
    steps.extend([
        StepKey::Backup,
        StepKey::Swap,
        StepKey::Restart,
        StepKey::Cleanup,
    ]);
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_windows_binary_swaps_stop_first() {
        assert!(SwapStrategy::select(ArtifactStrategy::BinarySwap, OsFamily::Windows).requires_stop());
        assert!(!SwapStrategy::select(ArtifactStrategy::BinarySwap, OsFamily::Linux).requires_stop());
        assert!(!SwapStrategy::select(ArtifactStrategy::ArchiveExpand, OsFamily::Windows).requires_stop());
    }

    #[test]
    fn settle_delay_applies_to_windows_binaries_only() {
        let configured = Duration::from_secs(2);
        assert_eq!(
            SwapStrategy::Binary(OsFamily::Windows).settle_delay(configured),
            configured
        );
        assert_eq!(
            SwapStrategy::Binary(OsFamily::Linux).settle_delay(configured),
            Duration::ZERO
        );
    }

    #[test]
    fn archive_deploys_have_no_stop_step() {
        let steps = deploy_steps(ArtifactStrategy::ArchiveExpand);
        assert!(!steps.contains(&StepKey::Stop));
        assert_eq!(steps.first(), Some(&StepKey::LocalUploaded));
        assert_eq!(steps.last(), Some(&StepKey::Cleanup));

        let steps = deploy_steps(ArtifactStrategy::BinarySwap);
        let stop = steps.iter().position(|k| *k == StepKey::Stop).unwrap();
        let backup = steps.iter().position(|k| *k == StepKey::Backup).unwrap();
        assert!(stop < backup);
    }
}
