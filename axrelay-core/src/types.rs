use std::{fmt, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd,
            Ord, Hash,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Configured name of an appliance; stable across runs and stored in
    /// the ledger.
    ApplianceId
);
string_id!(
    /// Hex digest of a file's content, produced by a
    /// [`crate::hashing::ContentHasher`].
    ContentHash
);
string_id!(
    /// Logical queue a file was dropped into, encoded as a directory name.
    Profile
);
string_id!(
    /// Identifier the appliance assigned to an accepted submission.
    AnalysisId
);

/// Result of an analysis as persisted in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultState {
    Pending,
    Malicious,
    Benign,
    Unknown,
}

impl ResultState {
    pub const ALL: [ResultState; 4] = [
        ResultState::Pending,
        ResultState::Malicious,
        ResultState::Benign,
        ResultState::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultState::Pending => "pending",
            ResultState::Malicious => "malicious",
            ResultState::Benign => "benign",
            ResultState::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResultState::Pending)
    }
}

impl fmt::Display for ResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown result state '{0}'")]
pub struct UnknownResultState(pub String);

impl FromStr for ResultState {
    type Err = UnknownResultState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ResultState::Pending),
            "malicious" => Ok(ResultState::Malicious),
            "benign" => Ok(ResultState::Benign),
            "unknown" => Ok(ResultState::Unknown),
            _ => Err(UnknownResultState(s.to_string())),
        }
    }
}

/// Identity of a submission attempt: the most recent record for a key is the
/// one the throttle guard consults.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubmissionKey {
    pub hash: ContentHash,
    pub profile: Profile,
    pub appliance: ApplianceId,
}

impl SubmissionKey {
    pub fn new(
        hash: ContentHash,
        profile: Profile,
        appliance: ApplianceId,
    ) -> Self {
        Self {
            hash,
            profile,
            appliance,
        }
    }
}

impl fmt::Display for SubmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.profile, self.hash, self.appliance)
    }
}

/// Persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub id: i64,
    pub hash: ContentHash,
    pub path: PathBuf,
    pub profile: Profile,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub appliance: ApplianceId,
    pub analysis_id: AnalysisId,
    pub state: ResultState,
    pub threat_names: Vec<String>,
    pub detail_url: Option<String>,
}

impl SubmissionRecord {
    pub fn key(&self) -> SubmissionKey {
        SubmissionKey::new(
            self.hash.clone(),
            self.profile.clone(),
            self.appliance.clone(),
        )
    }

    pub fn is_pending(&self) -> bool {
        self.state == ResultState::Pending
    }
}

/// Insert payload for a freshly accepted submission.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub key: SubmissionKey,
    pub path: PathBuf,
    pub analysis_id: AnalysisId,
    pub submitted_at: DateTime<Utc>,
}

/// Terminal update applied to a pending record once its verdict is known.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub state: ResultState,
    pub completed_at: DateTime<Utc>,
    pub threat_names: Vec<String>,
    pub detail_url: Option<String>,
    pub path: PathBuf,
}
