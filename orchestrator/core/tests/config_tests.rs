// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Config manifest file round trips and explicit-path loading.

use std::time::Duration;
use vigil_core::domain::agent::AgentRole;
use vigil_core::domain::node_config::{ChannelKind, NodeConfigManifest, NotificationChannelConfig};

#[test]
fn test_manifest_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vigil-config.yaml");

    let mut manifest = NodeConfigManifest::default();
    manifest.metadata.name = "prod-eu".into();
    manifest.spec.coordinator.role_timeouts.prediction = Duration::from_secs(90);
    manifest.spec.notifications.push(NotificationChannelConfig {
        name: "ops-log".into(),
        kind: ChannelKind::Log,
        url: None,
        dedup_window: Duration::from_secs(120),
        dedup_capacity: 64,
    });
    manifest.to_yaml_file(&path).unwrap();

    let loaded = NodeConfigManifest::from_yaml_file(&path).unwrap();
    assert_eq!(loaded.metadata.name, "prod-eu");
    assert_eq!(
        loaded.spec.coordinator.role_timeouts.for_role(AgentRole::Prediction),
        Duration::from_secs(90)
    );
    assert_eq!(loaded.spec.notifications, manifest.spec.notifications);
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_explicit_path_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.yaml");
    assert!(NodeConfigManifest::load_or_default(Some(missing)).is_err());
}

#[test]
fn test_invalid_yaml_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.yaml");
    std::fs::write(&path, "apiVersion: vigil/v1\nkind: [unterminated\n").unwrap();
    assert!(NodeConfigManifest::from_yaml_file(&path).is_err());
}
