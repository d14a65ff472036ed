//! End-to-end scaffold flow with a replayed setup script.

mod common;

use common::{ACCEPTED_SCRIPT, audited};
use scaffold_guard::audit::AuditEventType;
use scaffold_guard::config::GuardConfig;
use scaffold_guard::scaffold::Scaffolder;
use scaffold_guard::setup::{
    MemoryOperationLog, ReplayEnd, ReplayScriptHost, SandboxError, SetupRuntime, ToolCall,
};
use scaffold_guard::{AuditLogger, GateError};
use serde_json::{Map, Value, json};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// `<cwd>/templates/web` with a manifest, a setup script and some content.
fn workspace(script: &str) -> TempDir {
    let cwd = tempfile::tempdir().unwrap();
    let template = cwd.path().join("templates/web");
    write(
        &template,
        "template.json",
        &json!({
            "name": "web-starter",
            "dimensions": {
                "styling": {"type": "single", "values": ["css", "tailwind"], "default": "css"},
                "features": {"type": "multi", "values": ["auth", "docs"]}
            },
            "placeholders": {
                "PROJECT_TITLE": {"required": true},
                "LICENSE": {"default": "MIT"}
            },
            "constants": {"nodeVersion": "22"}
        })
        .to_string(),
    );
    write(&template, "_setup.mjs", script);
    write(&template, "README.md", "# ⦃PROJECT_TITLE⦄\n\nLicense: ⦃LICENSE⦄\n");
    write(&template, "src/index.js", "console.log('hi');\n");
    write(&template, ".git/HEAD", "ref: refs/heads/main\n");
    cwd
}

fn request(project: &str) -> Map<String, Value> {
    json!({
        "projectDirectory": project,
        "template": "templates/web",
        "options": "styling=tailwind,auth",
        "placeholders": {"PROJECT_TITLE": "Demo"},
    })
    .as_object()
    .cloned()
    .unwrap()
}

fn scaffolder(audit: Arc<AuditLogger>, calls: Vec<ToolCall>) -> (Scaffolder, Arc<MemoryOperationLog>) {
    let config = GuardConfig::default();
    let oplog = Arc::new(MemoryOperationLog::new());
    let runtime = SetupRuntime::new(&config.sandbox_config(), audit.clone())
        .with_host(Arc::new(ReplayScriptHost::new(calls, ReplayEnd::Done)));
    let scaffolder = Scaffolder::new(&config, audit)
        .with_runtime(runtime)
        .with_operation_log(oplog.clone());
    (scaffolder, oplog)
}

#[tokio::test]
async fn template_is_copied_and_setup_runs_inside_the_project() {
    let cwd = workspace(ACCEPTED_SCRIPT);
    let (scaffolder, oplog) = scaffolder(
        AuditLogger::in_memory(),
        vec![
            ToolCall::new("placeholders", "applyInputs", vec![]),
            ToolCall::new(
                "json",
                "merge",
                vec![json!("package.json"), json!({"engines": {"node": "22"}})],
            ),
        ],
    );

    let report = scaffolder.scaffold(&request("my-app"), cwd.path()).await.unwrap();
    let project = cwd.path().join("my-app");

    assert_eq!(report.template_name, "web-starter");
    assert_eq!(report.files_copied, 2);
    assert!(report.warning().is_none());
    assert_eq!(
        std::fs::read_to_string(project.join("README.md")).unwrap(),
        "# Demo\n\nLicense: MIT\n"
    );
    assert!(project.join("src/index.js").exists());
    assert!(project.join("package.json").exists());
    assert!(!project.join("template.json").exists());
    assert!(!project.join("_setup.mjs").exists());
    assert!(!project.join(".git").exists());

    let record = &oplog.operations()[0];
    assert_eq!(record.project, "my-app");
    assert_eq!(record.options, vec!["styling=tailwind", "auth"]);
}

#[tokio::test]
async fn rejected_script_leaves_nothing_behind() {
    let cwd = workspace("import { execSync } from 'node:child_process';\nexport default () => execSync('id');\n");
    let audit = AuditLogger::in_memory();
    let (scaffolder, _) = scaffolder(audit.clone(), vec![]);

    let err = scaffolder.scaffold(&request("my-app"), cwd.path()).await.unwrap_err();
    let sandbox = err.downcast_ref::<SandboxError>().unwrap();
    assert!(sandbox.is_rejected());
    assert!(!cwd.path().join("my-app").exists());
    assert_eq!(audited(&audit, AuditEventType::SandboxViolation).await.len(), 1);
}

#[tokio::test]
async fn invalid_request_stops_at_the_gate() {
    let cwd = workspace(ACCEPTED_SCRIPT);
    let (scaffolder, _) = scaffolder(AuditLogger::in_memory(), vec![]);

    let mut raw = request("../elsewhere");
    raw.insert("debug".into(), json!(true));
    let err = scaffolder.scaffold(&raw, cwd.path()).await.unwrap_err();
    let gate = err.downcast_ref::<GateError>().unwrap();
    assert_eq!(gate.issues().len(), 2);
    assert!(!cwd.path().parent().unwrap().join("elsewhere").exists());
}

#[tokio::test]
async fn undeclared_option_and_missing_placeholder_are_refused() {
    let cwd = workspace(ACCEPTED_SCRIPT);
    let (scaffolder, _) = scaffolder(AuditLogger::in_memory(), vec![]);

    let mut raw = request("my-app");
    raw.insert("options".into(), json!("styling=sass"));
    assert!(scaffolder.scaffold(&raw, cwd.path()).await.is_err());

    let mut raw = request("my-app");
    raw.remove("placeholders");
    let err = scaffolder.scaffold(&raw, cwd.path()).await.unwrap_err();
    assert!(err.to_string().contains("PROJECT_TITLE"));
    assert!(!cwd.path().join("my-app").exists());
}

#[tokio::test]
async fn existing_project_with_content_is_refused() {
    let cwd = workspace(ACCEPTED_SCRIPT);
    write(cwd.path(), "my-app/keep.txt", "mine");
    let (scaffolder, _) = scaffolder(AuditLogger::in_memory(), vec![]);

    let err = scaffolder.scaffold(&request("my-app"), cwd.path()).await.unwrap_err();
    assert!(err.to_string().contains("not empty"));
    assert_eq!(
        std::fs::read_to_string(cwd.path().join("my-app/keep.txt")).unwrap(),
        "mine"
    );
}

#[tokio::test]
async fn escape_attempt_fails_the_run_but_keeps_the_project() {
    let cwd = workspace(ACCEPTED_SCRIPT);
    let audit = AuditLogger::in_memory();
    let (scaffolder, _) = scaffolder(
        audit.clone(),
        vec![ToolCall::new("files", "write", vec![json!("../../pwned.txt"), json!("x")])],
    );

    let err = scaffolder.scaffold(&request("my-app"), cwd.path()).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SandboxError>(),
        Some(SandboxError::BoundaryEscape { .. })
    ));
    assert!(cwd.path().join("my-app/README.md").exists());
    assert!(!cwd.path().join("pwned.txt").exists());
    assert_eq!(audited(&audit, AuditEventType::BoundaryViolation).await.len(), 1);
}

#[tokio::test]
async fn template_without_script_or_manifest_copies_as_is() {
    let cwd = tempfile::tempdir().unwrap();
    write(cwd.path(), "plain/index.html", "<h1>⦃PROJECT_TITLE⦄</h1>\n");
    let (scaffolder, _) = scaffolder(AuditLogger::in_memory(), vec![]);

    let raw = json!({"projectDirectory": "site", "template": "plain"});
    let report = scaffolder
        .scaffold(raw.as_object().unwrap(), cwd.path())
        .await
        .unwrap();
    assert!(report.setup.is_none());
    assert_eq!(report.template_name, "plain");
    assert_eq!(
        std::fs::read_to_string(cwd.path().join("site/index.html")).unwrap(),
        "<h1>⦃PROJECT_TITLE⦄</h1>\n"
    );
}
