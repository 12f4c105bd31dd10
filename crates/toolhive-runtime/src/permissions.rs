//! Permission compiler
//!
//! Translates a declarative [`Profile`] plus the workload's transport type
//! into the engine-level primitives the container is created with: bind
//! mounts, network mode, and the capability drop-list.

use std::path::Path;

use toolhive_core::permissions::{MountDeclaration, Profile};
use toolhive_core::TransportType;

use crate::error::Result;
use crate::runtime::Mount;

/// Engine-level permission primitives compiled from a profile
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PermissionConfig {
    pub mounts: Vec<Mount>,
    pub network_mode: String,
    pub cap_drop: Vec<String>,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
}

/// Compile a permission profile into engine primitives.
///
/// The baseline is fully locked down: no mounts, network mode `none`, all
/// capabilities dropped. Mounts open up the filesystem; the network mode
/// becomes `bridge` when the transport needs network access or the profile
/// grants any outbound permission.
pub fn compile_profile(profile: &Profile, transport: TransportType) -> Result<PermissionConfig> {
    let mut config = PermissionConfig {
        mounts: Vec::new(),
        network_mode: "none".to_string(),
        cap_drop: vec!["ALL".to_string()],
        cap_add: Vec::new(),
        security_opt: Vec::new(),
    };

    add_mounts(&mut config, &profile.read, true);
    add_mounts(&mut config, &profile.write, false);

    if transport.needs_network() || profile.has_outbound_access() {
        config.network_mode = "bridge".to_string();
    }

    Ok(config)
}

// Read-only mounts are added first; a write declaration for an existing
// target upgrades it to read-write instead of adding a duplicate.
fn add_mounts(config: &mut PermissionConfig, declarations: &[MountDeclaration], read_only: bool) {
    for decl in declarations {
        let (source, target) = match decl.parse() {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(declaration = %decl, error = %err, "skipping invalid mount declaration");
                continue;
            }
        };

        // Resource URI mounts reserved for future use
        if source.contains("://") {
            tracing::warn!(source = %source, "resource URI mounts not yet supported, skipping");
            continue;
        }

        let source = match absolute_source(&source) {
            Some(path) => path,
            None => continue,
        };

        if !read_only {
            if let Some(existing) = config.mounts.iter_mut().find(|m| m.target == target) {
                existing.read_only = false;
                continue;
            }
        }

        config.mounts.push(Mount {
            source,
            target,
            read_only,
        });
    }
}

fn absolute_source(source: &str) -> Option<String> {
    if Path::new(source).is_absolute() {
        return Some(source.to_string());
    }
    match std::env::current_dir() {
        Ok(cwd) => {
            let absolute = cwd.join(source);
            tracing::debug!(source = %source, resolved = %absolute.display(), "resolved relative mount source");
            Some(absolute.to_string_lossy().into_owned())
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to resolve working directory, skipping mount");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolhive_core::permissions::{NetworkPermissions, OutboundNetworkPermissions};

    #[test]
    fn test_locked_down_defaults() {
        let config =
            compile_profile(&Profile::builtin_none(), TransportType::Stdio).unwrap();
        assert!(config.mounts.is_empty());
        assert_eq!(config.network_mode, "none");
        assert_eq!(config.cap_drop, vec!["ALL".to_string()]);
        assert!(config.cap_add.is_empty());
    }

    #[test]
    fn test_sse_transport_gets_bridge_network() {
        let config = compile_profile(&Profile::builtin_none(), TransportType::Sse).unwrap();
        assert_eq!(config.network_mode, "bridge");
    }

    #[test]
    fn test_outbound_access_gets_bridge_network() {
        let profile = Profile {
            network: Some(NetworkPermissions {
                outbound: Some(OutboundNetworkPermissions {
                    allow_host: vec!["api.example.com".to_string()],
                    ..Default::default()
                }),
            }),
            ..Default::default()
        };
        let config = compile_profile(&profile, TransportType::Stdio).unwrap();
        assert_eq!(config.network_mode, "bridge");
    }

    #[test]
    fn test_write_upgrades_read_mount() {
        let profile = Profile {
            read: vec!["/data".into()],
            write: vec!["/data".into()],
            ..Default::default()
        };
        let config = compile_profile(&profile, TransportType::Stdio).unwrap();
        assert_eq!(config.mounts.len(), 1);
        assert_eq!(config.mounts[0].target, "/data");
        assert!(!config.mounts[0].read_only);
    }

    #[test]
    fn test_resource_uri_mounts_are_skipped() {
        let profile = Profile {
            read: vec!["volume://cache:/var/cache".into()],
            ..Default::default()
        };
        let config = compile_profile(&profile, TransportType::Stdio).unwrap();
        assert!(config.mounts.is_empty());
    }

    #[test]
    fn test_relative_source_is_resolved() {
        let profile = Profile {
            read: vec!["data/files:/data".into()],
            ..Default::default()
        };
        let config = compile_profile(&profile, TransportType::Stdio).unwrap();
        assert_eq!(config.mounts.len(), 1);
        assert!(Path::new(&config.mounts[0].source).is_absolute());
        assert!(config.mounts[0].source.ends_with("data/files"));
        assert_eq!(config.mounts[0].target, "/data");
    }

    #[test]
    fn test_separate_read_and_write_targets() {
        let profile = Profile {
            read: vec!["/etc/certs".into()],
            write: vec!["/tmp/scratch".into()],
            ..Default::default()
        };
        let config = compile_profile(&profile, TransportType::Stdio).unwrap();
        assert_eq!(config.mounts.len(), 2);
        assert!(config.mounts[0].read_only);
        assert!(!config.mounts[1].read_only);
    }
}
