use serde::{Deserialize, Serialize};

/// Where an index build is in its life cycle.
///
/// ```text
/// Start → Scanning → Fingerprinting → ReuseExisting ─┐
///                                   ↘ Rebuilding → Persisting → Done
/// ```
///
/// `Failed` can follow any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildPhase {
    Start,
    /// Walking the corpus and reading files
    Scanning,
    /// Hashing the snapshot and comparing with the persisted index
    Fingerprinting,
    /// Loading the persisted index without embedding anything
    ReuseExisting,
    /// Chunking and embedding the corpus into a fresh store
    Rebuilding,
    /// Publishing the fresh store as a new generation
    Persisting,
    Done,
    Failed,
}

impl BuildPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildPhase::Done | BuildPhase::Failed)
    }
}

impl Default for BuildPhase {
    fn default() -> Self {
        Self::Start
    }
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildPhase::Start => write!(f, "start"),
            BuildPhase::Scanning => write!(f, "scanning"),
            BuildPhase::Fingerprinting => write!(f, "fingerprinting"),
            BuildPhase::ReuseExisting => write!(f, "reuse-existing"),
            BuildPhase::Rebuilding => write!(f, "rebuilding"),
            BuildPhase::Persisting => write!(f, "persisting"),
            BuildPhase::Done => write!(f, "done"),
            BuildPhase::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for BuildPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "start" => Ok(BuildPhase::Start),
            "scanning" | "scan" => Ok(BuildPhase::Scanning),
            "fingerprinting" | "fingerprint" => Ok(BuildPhase::Fingerprinting),
            "reuse-existing" | "reuse_existing" | "reuse" => Ok(BuildPhase::ReuseExisting),
            "rebuilding" | "rebuild" => Ok(BuildPhase::Rebuilding),
            "persisting" | "persist" => Ok(BuildPhase::Persisting),
            "done" => Ok(BuildPhase::Done),
            "failed" => Ok(BuildPhase::Failed),
            _ => Err(format!("Invalid build phase: '{s}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_phase_display_round_trips() {
        for phase in [
            BuildPhase::Start,
            BuildPhase::Scanning,
            BuildPhase::Fingerprinting,
            BuildPhase::ReuseExisting,
            BuildPhase::Rebuilding,
            BuildPhase::Persisting,
            BuildPhase::Done,
            BuildPhase::Failed,
        ] {
            assert_eq!(phase.to_string().parse::<BuildPhase>().unwrap(), phase);
        }
    }

    #[test]
    fn test_build_phase_aliases() {
        assert_eq!("reuse".parse::<BuildPhase>().unwrap(), BuildPhase::ReuseExisting);
        assert_eq!("REBUILD".parse::<BuildPhase>().unwrap(), BuildPhase::Rebuilding);
        assert!("bogus".parse::<BuildPhase>().is_err());
    }

    #[test]
    fn test_terminal_phases() {
        assert!(BuildPhase::Done.is_terminal());
        assert!(BuildPhase::Failed.is_terminal());
        assert!(!BuildPhase::Persisting.is_terminal());
        assert_eq!(BuildPhase::default(), BuildPhase::Start);
    }

    #[test]
    fn test_build_phase_serialization() {
        let json = serde_json::to_string(&BuildPhase::ReuseExisting).unwrap();
        assert_eq!(json, "\"reuse-existing\"");
    }
}
