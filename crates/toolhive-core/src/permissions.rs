//! Declarative permission profiles for workloads
//!
//! A profile describes the filesystem mounts and outbound network access
//! granted to a workload. Profiles are serde types so they can be loaded
//! from JSON documents shipped alongside a server registry entry.

use serde::{Deserialize, Serialize};

use crate::error::SpecError;

/// A single mount declaration.
///
/// Accepted forms:
/// - `"/path"` - mounted at the same path inside the container
/// - `"/host/path:/container/path"` - explicit source and target
/// - `"scheme://resource"` or `"scheme://resource:/target"` - resource URI,
///   reserved for future use (the compiler skips these with a warning)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MountDeclaration(pub String);

impl MountDeclaration {
    /// Split the declaration into `(source, target)`.
    pub fn parse(&self) -> Result<(String, String), SpecError> {
        let raw = self.0.trim();
        if raw.is_empty() {
            return Err(SpecError::InvalidMount {
                decl: self.0.clone(),
                reason: "empty declaration".to_string(),
            });
        }

        // Resource URIs keep their scheme in the source; only a trailing
        // `:/target` after the scheme part is treated as a separator.
        if let Some(scheme_end) = raw.find("://") {
            let rest = &raw[scheme_end + 3..];
            return match rest.rfind(':') {
                Some(sep) => {
                    let target = &rest[sep + 1..];
                    if target.is_empty() {
                        return Err(SpecError::InvalidMount {
                            decl: self.0.clone(),
                            reason: "empty target path".to_string(),
                        });
                    }
                    Ok((
                        raw[..scheme_end + 3 + sep].to_string(),
                        target.to_string(),
                    ))
                }
                None => Ok((raw.to_string(), raw.to_string())),
            };
        }

        match raw.matches(':').count() {
            0 => Ok((raw.to_string(), raw.to_string())),
            1 => {
                let (source, target) = raw.split_once(':').unwrap_or((raw, raw));
                if source.is_empty() || target.is_empty() {
                    return Err(SpecError::InvalidMount {
                        decl: self.0.clone(),
                        reason: "empty source or target path".to_string(),
                    });
                }
                Ok((source.to_string(), target.to_string()))
            }
            _ => Err(SpecError::InvalidMount {
                decl: self.0.clone(),
                reason: "too many ':' separators".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for MountDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MountDeclaration {
    fn from(s: &str) -> Self {
        MountDeclaration(s.to_string())
    }
}

/// Outbound network access granted to a workload, enforced by the egress
/// proxy. When `insecure_allow_all` is set the allow-lists are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundNetworkPermissions {
    #[serde(default)]
    pub insecure_allow_all: bool,
    #[serde(default)]
    pub allow_transport: Vec<String>,
    #[serde(default)]
    pub allow_host: Vec<String>,
    #[serde(default)]
    pub allow_port: Vec<u16>,
}

/// Network permissions for a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPermissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound: Option<OutboundNetworkPermissions>,
}

/// A declarative permission profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Paths mounted read-only into the container
    #[serde(default)]
    pub read: Vec<MountDeclaration>,
    /// Paths mounted read-write into the container.
    /// A path present in both lists is mounted read-write.
    #[serde(default)]
    pub write: Vec<MountDeclaration>,
    /// Network access, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkPermissions>,
}

impl Profile {
    /// The `none` built-in profile: no mounts, no network access.
    pub fn builtin_none() -> Self {
        Profile::default()
    }

    /// The `network` built-in profile: no mounts, unrestricted outbound.
    pub fn builtin_network() -> Self {
        Profile {
            network: Some(NetworkPermissions {
                outbound: Some(OutboundNetworkPermissions {
                    insecure_allow_all: true,
                    ..Default::default()
                }),
            }),
            ..Default::default()
        }
    }

    /// Whether the profile grants any outbound network access.
    pub fn has_outbound_access(&self) -> bool {
        match self.network.as_ref().and_then(|n| n.outbound.as_ref()) {
            Some(o) => {
                o.insecure_allow_all
                    || !o.allow_transport.is_empty()
                    || !o.allow_host.is_empty()
                    || !o.allow_port.is_empty()
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_single_path() {
        let (src, tgt) = MountDeclaration::from("/data").parse().unwrap();
        assert_eq!(src, "/data");
        assert_eq!(tgt, "/data");
    }

    #[test]
    fn test_mount_source_target() {
        let (src, tgt) = MountDeclaration::from("/host/dir:/container/dir")
            .parse()
            .unwrap();
        assert_eq!(src, "/host/dir");
        assert_eq!(tgt, "/container/dir");
    }

    #[test]
    fn test_mount_resource_uri() {
        let (src, tgt) = MountDeclaration::from("volume://cache:/var/cache")
            .parse()
            .unwrap();
        assert_eq!(src, "volume://cache");
        assert_eq!(tgt, "/var/cache");
    }

    #[test]
    fn test_mount_invalid() {
        assert!(MountDeclaration::from("").parse().is_err());
        assert!(MountDeclaration::from("a:b:c").parse().is_err());
        assert!(MountDeclaration::from("/src:").parse().is_err());
    }

    #[test]
    fn test_profile_deserialization() {
        let profile: Profile = serde_json::from_str(
            r#"{
                "read": ["/etc/ca-certificates"],
                "write": ["/tmp/work:/work"],
                "network": {
                    "outbound": {
                        "insecure_allow_all": false,
                        "allow_host": ["api.example.com"],
                        "allow_port": [443]
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(profile.read.len(), 1);
        assert_eq!(profile.write.len(), 1);
        let outbound = profile.network.unwrap().outbound.unwrap();
        assert_eq!(outbound.allow_host, vec!["api.example.com"]);
        assert_eq!(outbound.allow_port, vec![443]);
        assert!(!outbound.insecure_allow_all);
    }

    #[test]
    fn test_builtin_profiles() {
        assert!(!Profile::builtin_none().has_outbound_access());
        assert!(Profile::builtin_network().has_outbound_access());
    }

    #[test]
    fn test_outbound_access_from_allow_lists() {
        let profile = Profile {
            network: Some(NetworkPermissions {
                outbound: Some(OutboundNetworkPermissions {
                    allow_port: vec![443],
                    ..Default::default()
                }),
            }),
            ..Default::default()
        };
        assert!(profile.has_outbound_access());
    }
}
