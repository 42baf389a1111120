use std::fmt;
use std::str::FromStr;

/// Processing mode of a step. The only behavioral difference between modes is
/// when the consumed unit gets committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    #[default]
    Simple,
    Composite,
    Component,
}

/// Phase boundary at which the consumed unit is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPoint {
    BeforeExecute,
    AfterExecute,
}

impl ProcessingMode {
    pub const ALL: [ProcessingMode; 3] = [
        ProcessingMode::Simple,
        ProcessingMode::Composite,
        ProcessingMode::Component,
    ];

    pub fn commit_point(&self) -> CommitPoint {
        match self {
            ProcessingMode::Component => CommitPoint::BeforeExecute,
            ProcessingMode::Simple | ProcessingMode::Composite => CommitPoint::AfterExecute,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Simple => "simple",
            ProcessingMode::Composite => "composite",
            ProcessingMode::Component => "component",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(ProcessingMode::as_str).collect();
                format!("Step type can only be one of {}, got {s:?}", names.join(", "))
            })
    }
}
