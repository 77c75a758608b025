use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::types::AnalysisId;

/// Protocol version an endpoint is served under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiVersion {
    #[serde(rename = "v1.1.0")]
    V1_1_0,
    #[serde(rename = "v2.0.0")]
    V2_0_0,
}

impl ApiVersion {
    /// URL path segment for this version.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ApiVersion::V1_1_0 => "v1.1.0",
            ApiVersion::V2_0_0 => "v2.0.0",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

impl FromStr for ApiVersion {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('v') {
            "1.1.0" | "1.1" => Ok(ApiVersion::V1_1_0),
            "2.0.0" | "2.0" | "2" => Ok(ApiVersion::V2_0_0),
            other => Err(EndpointError::UnknownVersion(other.to_string())),
        }
    }
}

/// Remote operations, each bound to one protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Login,
    Logout,
    Submit,
    Status,
    Results,
    Config,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Login,
        Operation::Logout,
        Operation::Submit,
        Operation::Status,
        Operation::Results,
        Operation::Config,
    ];

    pub fn default_version(&self) -> ApiVersion {
        match self {
            Operation::Login | Operation::Results | Operation::Config => {
                ApiVersion::V2_0_0
            }
            Operation::Logout | Operation::Submit | Operation::Status => {
                ApiVersion::V1_1_0
            }
        }
    }
}

impl FromStr for Operation {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "login" => Ok(Operation::Login),
            "logout" => Ok(Operation::Logout),
            "submit" => Ok(Operation::Submit),
            "status" => Ok(Operation::Status),
            "results" => Ok(Operation::Results),
            "config" => Ok(Operation::Config),
            other => Err(EndpointError::UnknownOperation(other.to_string())),
        }
    }
}

/// A concrete call, carrying whatever the path needs.
#[derive(Debug, Clone, Copy)]
pub enum Endpoint<'a> {
    Login,
    Logout,
    Submit,
    Status(&'a AnalysisId),
    Results(&'a AnalysisId),
    Config,
}

impl Endpoint<'_> {
    pub fn operation(&self) -> Operation {
        match self {
            Endpoint::Login => Operation::Login,
            Endpoint::Logout => Operation::Logout,
            Endpoint::Submit => Operation::Submit,
            Endpoint::Status(_) => Operation::Status,
            Endpoint::Results(_) => Operation::Results,
            Endpoint::Config => Operation::Config,
        }
    }

    fn segments(&self) -> Vec<&str> {
        match self {
            Endpoint::Login => vec!["auth", "login"],
            Endpoint::Logout => vec!["auth", "logout"],
            Endpoint::Submit => vec!["submissions"],
            Endpoint::Status(id) => vec!["submissions", "status", id.as_str()],
            Endpoint::Results(id) => {
                vec!["submissions", "results", id.as_str()]
            }
            Endpoint::Config => vec!["config"],
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("invalid appliance address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("unknown API version '{0}'")]
    UnknownVersion(String),

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
}

/// Builds `{scheme}://{address}:{port}/wsapis/{version}/{path}` URLs.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    scheme: String,
    port: u16,
    versions: HashMap<Operation, ApiVersion>,
}

impl Default for EndpointResolver {
    fn default() -> Self {
        Self::new("https", 443)
    }
}

impl EndpointResolver {
    pub fn new(scheme: impl Into<String>, port: u16) -> Self {
        let versions = Operation::ALL
            .iter()
            .map(|op| (*op, op.default_version()))
            .collect();
        Self {
            scheme: scheme.into(),
            port,
            versions,
        }
    }

    pub fn with_version(
        mut self,
        operation: Operation,
        version: ApiVersion,
    ) -> Self {
        self.versions.insert(operation, version);
        self
    }

    pub fn version_for(&self, operation: Operation) -> ApiVersion {
        self.versions
            .get(&operation)
            .copied()
            .unwrap_or_else(|| operation.default_version())
    }

    /// Resolves an endpoint on one appliance. An explicit port in `address`
    /// wins over the configured one.
    pub fn resolve(
        &self,
        address: &str,
        endpoint: Endpoint<'_>,
    ) -> Result<Url, EndpointError> {
        let invalid = |reason: String| EndpointError::InvalidAddress {
            address: address.to_string(),
            reason,
        };

        let base = format!("{}://{}/", self.scheme, address.trim());
        let mut url =
            Url::parse(&base).map_err(|e| invalid(e.to_string()))?;
        if url.port().is_none() {
            url.set_port(Some(self.port)).map_err(|_| {
                invalid("address cannot carry a port".to_string())
            })?;
        }

        let version = self.version_for(endpoint.operation());
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                invalid("address cannot be a base URL".to_string())
            })?;
            segments.clear().push("wsapis").push(version.path_segment());
            segments.extend(endpoint.segments());
        }

        if let Endpoint::Results(_) = endpoint {
            url.query_pairs_mut().append_pair("info_level", "normal");
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_versions_follow_the_operation_table() {
        let resolver = EndpointResolver::new("https", 443);
        let id = AnalysisId::from("1234");

        let cases = [
            (Endpoint::Login, "https://ax1.local/wsapis/v2.0.0/auth/login"),
            (Endpoint::Logout, "https://ax1.local/wsapis/v1.1.0/auth/logout"),
            (Endpoint::Submit, "https://ax1.local/wsapis/v1.1.0/submissions"),
            (
                Endpoint::Status(&id),
                "https://ax1.local/wsapis/v1.1.0/submissions/status/1234",
            ),
            (
                Endpoint::Results(&id),
                concat!(
                    "https://ax1.local/wsapis/v2.0.0/submissions/results/1234",
                    "?info_level=normal"
                ),
            ),
            (Endpoint::Config, "https://ax1.local/wsapis/v2.0.0/config"),
        ];
        for (endpoint, expected) in cases {
            assert_eq!(
                resolver.resolve("ax1.local", endpoint).unwrap().as_str(),
                expected
            );
        }
    }

    #[test]
    fn configured_port_applies_unless_address_has_one() {
        let resolver = EndpointResolver::new("https", 8443);
        assert_eq!(
            resolver.resolve("10.0.0.5", Endpoint::Login).unwrap().as_str(),
            "https://10.0.0.5:8443/wsapis/v2.0.0/auth/login"
        );
        assert_eq!(
            resolver
                .resolve("10.0.0.5:9000", Endpoint::Login)
                .unwrap()
                .as_str(),
            "https://10.0.0.5:9000/wsapis/v2.0.0/auth/login"
        );
    }

    #[test]
    fn overrides_rebind_a_single_operation() {
        let resolver = EndpointResolver::new("http", 80)
            .with_version(Operation::Submit, ApiVersion::V2_0_0);
        assert_eq!(resolver.version_for(Operation::Submit), ApiVersion::V2_0_0);
        assert_eq!(resolver.version_for(Operation::Status), ApiVersion::V1_1_0);
        assert_eq!(
            resolver.resolve("ax", Endpoint::Submit).unwrap().as_str(),
            "http://ax/wsapis/v2.0.0/submissions"
        );
    }

    #[test]
    fn version_and_operation_names_parse() {
        assert_eq!("v1.1.0".parse::<ApiVersion>(), Ok(ApiVersion::V1_1_0));
        assert_eq!("2.0.0".parse::<ApiVersion>(), Ok(ApiVersion::V2_0_0));
        assert!("v3".parse::<ApiVersion>().is_err());
        assert_eq!("Results".parse::<Operation>(), Ok(Operation::Results));
    }

    #[test]
    fn unusable_address_is_rejected() {
        let resolver = EndpointResolver::default();
        assert!(matches!(
            resolver.resolve("bad host", Endpoint::Login),
            Err(EndpointError::InvalidAddress { .. })
        ));
    }
}
