//! End-to-end flows over real files: load a catalog from disk, rewrite a
//! source tree, and write the result back atomically.

use std::fs;

use tempfile::TempDir;
use treewrite::edit::atomic_write;
use treewrite::search::{find_iter, rewrite_string, SearchError, Searcher};
use treewrite::{RuleCatalog, CATALOG_ITERATIONS};

fn setup_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();

    fs::write(
        dir.path().join("rules.json"),
        r#"{
            "rules": [
                {
                    "name": "unwrap-identity",
                    "mode": "expr",
                    "pattern": "identity($x)",
                    "template": "$x",
                    "message": "identity() is a no-op",
                    "category": "cleanup.identity"
                },
                {
                    "name": "rename-log",
                    "mode": "regex",
                    "pattern": "\\blog_info\\b",
                    "template": "info"
                }
            ]
        }"#,
    )
    .unwrap();

    fs::write(
        dir.path().join("app.py"),
        "\
x = identity(identity(3))
log_info('ready')
",
    )
    .unwrap();

    fs::write(dir.path().join("broken.py"), "def def def\n").unwrap();

    dir
}

#[test]
fn test_catalog_rewrites_file_on_disk() {
    let dir = setup_workspace();
    let catalog = RuleCatalog::load_from_path(dir.path().join("rules.json")).unwrap();
    let searcher = catalog.searcher().unwrap();

    let path = dir.path().join("app.py");
    let text = fs::read_to_string(&path).unwrap();
    let rewritten = rewrite_string(
        &searcher,
        &text,
        &path.display().to_string(),
        CATALOG_ITERATIONS,
    )
    .unwrap();
    assert_eq!(rewritten, "x = 3\ninfo('ready')\n");

    atomic_write(&path, rewritten.as_bytes()).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "x = 3\ninfo('ready')\n");
}

#[test]
fn test_unparseable_file_is_skipped() {
    let dir = setup_workspace();
    let catalog = RuleCatalog::load_from_path(dir.path().join("rules.json")).unwrap();
    let searcher = catalog.rule_searcher("unwrap-identity").unwrap();

    let text = fs::read_to_string(dir.path().join("broken.py")).unwrap();
    let err = find_iter(&searcher, &text, "broken.py", 1).unwrap_err();
    assert!(matches!(err, SearchError::SkipFile { path, .. } if path == "broken.py"));
}

#[test]
fn test_regex_rule_still_runs_on_unparseable_text() {
    let dir = setup_workspace();
    let catalog = RuleCatalog::load_from_path(dir.path().join("rules.json")).unwrap();
    let searcher = catalog.rule_searcher("rename-log").unwrap();

    let out = rewrite_string(&searcher, "log_info(; nonsense\n", "weird.py", 1).unwrap();
    assert_eq!(out, "info(; nonsense\n");
}

#[test]
fn test_search_only_rule_reports_metadata() {
    let dir = setup_workspace();
    let catalog = RuleCatalog::load_from_path(dir.path().join("rules.json")).unwrap();
    let searcher = catalog.rule_searcher("unwrap-identity").unwrap();

    let text = "y = identity(1)\n";
    let parsed = searcher.parse(text, "t.py").unwrap();
    let subs = searcher.find_parsed(&parsed);
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].message.as_deref(), Some("identity() is a no-op"));
    assert_eq!(subs[0].category.as_deref(), Some("cleanup.identity"));
    assert!(subs[0].significant);
}

#[test]
fn test_atomic_write_replaces_existing_content() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.py");
    fs::write(&path, "before\n").unwrap();
    atomic_write(&path, b"after\n").unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "after\n");
}

#[test]
fn test_pragma_suppression_survives_catalog_run() {
    let dir = setup_workspace();
    let catalog = RuleCatalog::load_from_path(dir.path().join("rules.json")).unwrap();
    let searcher = catalog.rule_searcher("unwrap-identity").unwrap();

    let text = "\
a = identity(1)  # treewrite: disable=cleanup.identity
b = identity(2)
";
    let out = rewrite_string(&searcher, text, "t.py", 1).unwrap();
    assert_eq!(
        out,
        "a = identity(1)  # treewrite: disable=cleanup.identity\nb = 2\n"
    );
}
