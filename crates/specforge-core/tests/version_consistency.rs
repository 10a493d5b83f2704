//! Ensures all workspace crates use `version.workspace = true` and that
//! the workspace version is consistent across all Cargo.toml files.

use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("crate lives two levels below the workspace root")
        .to_path_buf()
}

fn manifest(dir: &Path) -> toml::Value {
    let content = std::fs::read_to_string(dir.join("Cargo.toml")).unwrap();
    content.parse().unwrap()
}

/// `"workspace"` for inherited versions, the literal otherwise.
fn crate_version(dir: &Path) -> String {
    let doc = manifest(dir);
    let version = &doc["package"]["version"];
    if version.get("workspace").and_then(|v| v.as_bool()) == Some(true) {
        return "workspace".to_string();
    }
    version
        .as_str()
        .unwrap_or_else(|| panic!("no version in {}", dir.join("Cargo.toml").display()))
        .to_string()
}

#[test]
fn all_members_inherit_workspace_version() {
    let root = workspace_root();
    let doc = manifest(&root);
    let members = doc["workspace"]["members"].as_array().unwrap();
    assert!(!members.is_empty());

    for member in members {
        let member = member.as_str().unwrap();
        assert_eq!(
            crate_version(&root.join(member)),
            "workspace",
            "{member} should use version.workspace = true"
        );
    }
}

#[test]
fn workspace_version_matches_cargo_pkg() {
    let doc = manifest(&workspace_root());
    let ws_version = doc["workspace"]["package"]["version"].as_str().unwrap();
    assert_eq!(ws_version, env!("CARGO_PKG_VERSION"));
    assert_eq!(specforge_core::VERSION, ws_version);
}
