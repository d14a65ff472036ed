//! Every toolkit path resolves inside the project root, whatever the caller
//! asks for, and every refusal lands in the audit log.

mod common;

use common::{audited, project};
use scaffold_guard::audit::AuditEventType;
use scaffold_guard::setup::{ToolCall, ToolError};
use scaffold_guard::{AuditLogger, BoundaryEnforcer, ViolationType};
use serde_json::json;

#[tokio::test]
async fn traversal_attempts_are_refused_and_audited() {
    let p = project(&["styling=tailwind", "auth"], json!({}));
    let attempts = [
        "../outside.txt",
        "a/../../outside.txt",
        "/etc/passwd",
        "./../../../../tmp/x",
    ];
    for path in attempts {
        let err = p.tools.files.write(path, "x").await.unwrap_err();
        let violation = err.as_boundary_violation().unwrap();
        assert_eq!(violation.violation_type, ViolationType::PathTraversal, "{path}");
    }

    let entries = audited(&p.audit, AuditEventType::BoundaryViolation).await;
    assert_eq!(entries.len(), attempts.len());
    assert_eq!(entries[0].field("attemptedPath"), Some(&json!("../outside.txt")));
    for entry in &entries {
        assert_eq!(entry.field("project"), Some(&json!("demo")));
        assert_eq!(entry.field("options"), Some(&json!(["styling=tailwind", "auth"])));
    }
    assert!(p.oplog.operations().is_empty());
}

#[tokio::test]
async fn sibling_with_shared_prefix_is_outside() {
    let parent = tempfile::tempdir().unwrap();
    std::fs::create_dir(parent.path().join("proj")).unwrap();
    std::fs::create_dir(parent.path().join("proj2")).unwrap();
    let enforcer = BoundaryEnforcer::new(parent.path().join("proj"), AuditLogger::in_memory()).unwrap();

    let sibling = enforcer.root().parent().unwrap().join("proj2/file.txt");
    assert!(enforcer.validate_path(&sibling, "write").is_err());
    assert!(!enforcer.is_within_boundaries(&sibling));
    assert!(enforcer.is_within_boundaries("nested/../file.txt"));
}

#[cfg(unix)]
#[tokio::test]
async fn symlink_out_of_the_project_is_refused() {
    let outside = tempfile::tempdir().unwrap();
    let p = project(&[], json!({}));
    std::os::unix::fs::symlink(outside.path(), p.dir.path().join("escape")).unwrap();

    let err = p.tools.files.write("escape/owned.txt", "x").await.unwrap_err();
    assert_eq!(
        err.as_boundary_violation().unwrap().violation_type,
        ViolationType::SymlinkEscape
    );
    assert!(!outside.path().join("owned.txt").exists());
}

#[tokio::test]
async fn null_bytes_and_non_string_paths_are_refused() {
    let p = project(&[], json!({}));
    let err = p.tools.files.read("notes\0.txt").await.unwrap_err();
    assert_eq!(
        err.as_boundary_violation().unwrap().violation_type,
        ViolationType::NullByte
    );

    let call = ToolCall::new("files", "write", vec![json!({"path": "x"}), json!("data")]);
    match p.tools.dispatch(&call).await {
        Err(ToolError::Boundary(violation)) => {
            assert_eq!(violation.violation_type, ViolationType::InvalidType)
        }
        other => panic!("expected a boundary violation, got {other:?}"),
    }
}

#[tokio::test]
async fn two_path_operations_check_both_sides() {
    let p = project(&[], json!({}));
    p.tools.files.write("inside.txt", "data").await.unwrap();

    assert!(p.tools.files.copy("inside.txt", "../copied.txt").await.is_err());
    assert!(p.tools.files.move_path("../../etc/hosts", "hosts").await.is_err());
    assert!(p.tools.files.exists("inside.txt").await.unwrap());
    assert!(!p.dir.path().parent().unwrap().join("copied.txt").exists());
}

#[tokio::test]
async fn every_namespace_is_rooted_at_the_project() {
    let p = project(&[], json!({}));
    assert!(p.tools.text.append_lines("../x", &["a".to_string()]).await.is_err());
    assert!(p.tools.json.set("../pkg.json", "name", json!("x")).await.is_err());
    assert!(
        p.tools
            .placeholders
            .replace_in_file("../README.md", &serde_json::Map::new())
            .await
            .is_err()
    );
    assert!(
        p.tools
            .templates
            .render_file("../t.txt", &serde_json::Map::new())
            .await
            .is_err()
    );

    let entries = audited(&p.audit, AuditEventType::BoundaryViolation).await;
    assert_eq!(entries.len(), 4);
}
