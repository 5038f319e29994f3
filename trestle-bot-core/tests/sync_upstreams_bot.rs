//! Runs the upstream sync through the bot against local git repositories.

use git2::{IndexAddOption, Repository, Signature};
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

use trestle_bot_core::bot::{RunOptions, TrestleBot};
use trestle_bot_core::contract::{GitProvider, MockGitProvider, Task};
use trestle_bot_core::git::Identity;
use trestle_bot_core::model::{self, ModelKind};
use trestle_bot_core::tasks::SyncUpstreamsTask;

fn commit_all(dir: &Path, message: &str) -> String {
    let repo = Repository::open(dir).unwrap();
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"], IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Test User", "test@example.com").unwrap();
    let parent = repo.head().ok().map(|h| h.peel_to_commit().unwrap());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
        .to_string()
}

/// An upstream content repository holding one catalog, pinned by commit.
fn upstream(catalog_title: &str) -> (TempDir, String) {
    let dir = tempdir().unwrap();
    Repository::init(dir.path()).unwrap();
    let catalog = model::new_model(ModelKind::Catalog, catalog_title);
    model::write_model(&ModelKind::Catalog.model_path(dir.path(), "nist"), &catalog).unwrap();
    let sha = commit_all(dir.path(), "add catalog");
    let source = format!("{}@{sha}", dir.path().display());
    (dir, source)
}

/// A trestle workspace with a bare `origin` to push to.
fn workspace() -> (TempDir, TempDir) {
    let remote = tempdir().unwrap();
    Repository::init_bare(remote.path()).unwrap();

    let dir = tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    fs::create_dir(dir.path().join(".trestle")).unwrap();
    fs::write(dir.path().join(".trestle/config.ini"), "[task]\n").unwrap();
    commit_all(dir.path(), "initial");
    repo.remote("origin", &remote.path().to_string_lossy())
        .unwrap();
    (dir, remote)
}

fn bot(dir: &Path) -> TrestleBot {
    TrestleBot::new(dir, "main", Identity::new("bot", "bot@example.com"))
        .with_target_branch(Some("develop".into()))
}

fn sync_task(dir: &Path, sources: Vec<String>) -> Vec<Box<dyn Task>> {
    vec![Box::new(
        SyncUpstreamsTask::new(dir, sources, None, true).unwrap(),
    )]
}

fn catalog_title(dir: &Path) -> String {
    let catalog = model::load_model(ModelKind::Catalog, &dir.join("catalogs/nist")).unwrap();
    catalog["catalog"]["metadata"]["title"]
        .as_str()
        .unwrap()
        .to_string()
}

#[test]
fn synced_content_is_pushed_and_proposed_once() {
    let (_upstream, source) = upstream("NIST SP 800-53");
    let (ws, remote) = workspace();

    let mut provider = MockGitProvider::new();
    provider
        .expect_parse_repository()
        .times(1)
        .returning(|_| Ok(("org".to_string(), "content".to_string())));
    provider
        .expect_create_pull_request()
        .withf(|ns, repo, head, base, _, _| {
            ns == "org" && repo == "content" && head == "main" && base == "develop"
        })
        .times(1)
        .returning(|_, _, _, _, _, _| Ok(7));

    let results = bot(ws.path())
        .run(
            &sync_task(ws.path(), vec![source.clone()]),
            Some(&provider as &dyn GitProvider),
            &RunOptions::default(),
        )
        .unwrap();

    assert_eq!(results.changes, vec!["catalogs/nist/catalog.json"]);
    assert_eq!(results.pr_number, 7);
    assert_eq!(catalog_title(ws.path()), "NIST SP 800-53");
    let pushed = Repository::open_bare(remote.path())
        .unwrap()
        .refname_to_id("refs/heads/main")
        .unwrap();
    assert_eq!(pushed.to_string(), results.commit_sha);

    // Same pinned source again: nothing to commit, push or propose.
    let mut idle = MockGitProvider::new();
    idle.expect_parse_repository().never();
    idle.expect_create_pull_request().never();
    let results = bot(ws.path())
        .run(
            &sync_task(ws.path(), vec![source]),
            Some(&idle as &dyn GitProvider),
            &RunOptions::default(),
        )
        .unwrap();
    assert!(results.changes.is_empty());
    assert!(results.commit_sha.is_empty());
}

#[test]
fn later_source_wins_for_the_same_model() {
    let (_first, first) = upstream("First");
    let (_second, second) = upstream("Second");
    let (ws, _remote) = workspace();

    let options = RunOptions {
        dry_run: true,
        ..RunOptions::default()
    };
    let results = TrestleBot::new(ws.path(), "main", Identity::new("bot", "bot@example.com"))
        .run(&sync_task(ws.path(), vec![first, second]), None, &options)
        .unwrap();

    assert_eq!(results.changes, vec!["catalogs/nist/catalog.json"]);
    assert_eq!(catalog_title(ws.path()), "Second");
    let leftovers: Vec<_> = fs::read_dir(ws.path())
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| ![".git", ".trestle", "catalogs"].contains(&name.as_str()))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn resync_overwrites_local_model_with_upstream_change() {
    let (upstream_dir, first) = upstream("Revision 1");
    let (ws, _remote) = workspace();

    let task = SyncUpstreamsTask::new(ws.path(), vec![first], None, true).unwrap();
    task.execute().unwrap();
    assert_eq!(catalog_title(ws.path()), "Revision 1");

    let revised = model::new_model(ModelKind::Catalog, "Revision 2");
    model::write_model(
        &ModelKind::Catalog.model_path(upstream_dir.path(), "nist"),
        &revised,
    )
    .unwrap();
    let sha = commit_all(upstream_dir.path(), "revise catalog");
    let second = format!("{}@{sha}", upstream_dir.path().display());

    let task = SyncUpstreamsTask::new(ws.path(), vec![second], None, true).unwrap();
    task.execute().unwrap();

    let local = model::load_model(ModelKind::Catalog, &ws.path().join("catalogs/nist")).unwrap();
    assert_eq!(local, revised);
}
