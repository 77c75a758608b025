//! Verdict documents returned by the results endpoint.
//!
//! Appliances are not consistent about field spelling, and a container that
//! holds one entry is sometimes a bare object instead of an array, so the
//! model is deliberately tolerant on input.

use serde::{Deserialize, Deserializer, Serialize};

use crate::{hashing::HashAlgorithm, types::ResultState};

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(
        match Option::<OneOrMany<T>>::deserialize(deserializer)? {
            None => Vec::new(),
            Some(OneOrMany::Many(items)) => items,
            Some(OneOrMany::One(item)) => vec![item],
        },
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VerdictDocument {
    #[serde(default, alias = "alerts", deserialize_with = "one_or_many")]
    pub alert: Vec<Alert>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Alert {
    #[serde(
        default,
        rename = "alert-url",
        alias = "alertUrl",
        alias = "alert_url"
    )]
    pub alert_url: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub explanation: Option<Explanation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Explanation {
    #[serde(
        default,
        rename = "malware-detected",
        alias = "malwareDetected",
        alias = "malware_detected"
    )]
    pub malware_detected: Option<MalwareDetected>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MalwareDetected {
    #[serde(default, deserialize_with = "one_or_many")]
    pub malware: Vec<ThreatEntry>,
}

/// One detected sample inside an alert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ThreatEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "md5Sum")]
    pub md5sum: Option<String>,
    #[serde(default, alias = "sha256sum", alias = "sha256Sum")]
    pub sha256: Option<String>,
}

impl ThreatEntry {
    /// Digest the appliance reported for this sample in the given family.
    pub fn reported_digest(&self, algorithm: HashAlgorithm) -> Option<&str> {
        let digest = match algorithm {
            HashAlgorithm::Md5 => self.md5sum.as_deref(),
            HashAlgorithm::Sha256 => self.sha256.as_deref(),
        };
        digest.map(str::trim).filter(|d| !d.is_empty())
    }
}

impl Alert {
    pub fn threat_entries(&self) -> &[ThreatEntry] {
        self.explanation
            .as_ref()
            .and_then(|e| e.malware_detected.as_ref())
            .map(|m| m.malware.as_slice())
            .unwrap_or_default()
    }
}

/// Severity codes that map onto terminal result states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityCodes {
    pub major: String,
    pub minor: String,
}

impl Default for SeverityCodes {
    fn default() -> Self {
        Self {
            major: "majr".to_string(),
            minor: "minr".to_string(),
        }
    }
}

impl SeverityCodes {
    /// Maps a severity code to a result state; codes compare
    /// case-insensitively and anything unrecognised is `Unknown`.
    pub fn classify(&self, severity: Option<&str>) -> ResultState {
        match severity.map(str::trim) {
            Some(code) if code.eq_ignore_ascii_case(&self.major) => {
                ResultState::Malicious
            }
            Some(code) if code.eq_ignore_ascii_case(&self.minor) => {
                ResultState::Benign
            }
            _ => ResultState::Unknown,
        }
    }

    fn rank(&self, severity: Option<&str>) -> u8 {
        match self.classify(severity) {
            ResultState::Malicious => 2,
            ResultState::Benign => 1,
            _ => 0,
        }
    }
}

impl VerdictDocument {
    /// The alert whose severity decides the verdict: the most severe one,
    /// ties broken by document order.
    pub fn governing_alert(&self, codes: &SeverityCodes) -> Option<&Alert> {
        let mut best: Option<(&Alert, u8)> = None;
        for alert in &self.alert {
            let rank = codes.rank(alert.severity.as_deref());
            if best.is_none_or(|(_, current)| rank > current) {
                best = Some((alert, rank));
            }
        }
        best.map(|(alert, _)| alert)
    }

    pub fn threat_entries(&self) -> impl Iterator<Item = &ThreatEntry> {
        self.alert.iter().flat_map(Alert::threat_entries)
    }

    /// Threat names across all alerts, de-duplicated in first-seen order.
    pub fn threat_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.threat_entries().filter_map(|e| e.name.as_deref()) {
            let name = name.trim();
            if !name.is_empty() && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }
}
