//! Integration tests against real `git` repositories (and `git-lfs` where
//! installed; those tests skip themselves on machines without it).

use std::path::PathBuf;

use tempfile::TempDir;

use git_drs::store::ObjectStore;
use git_drs::types::{Hashes, IndexdRecord};
use git_drs::{did, lfs};

const SHA: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

async fn git_in(dir: &str, args: &[&str]) {
    let output = tokio::process::Command::new("git")
        .args(["-C", dir])
        .args(args)
        .output()
        .await
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

async fn create_test_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    let p = dir.path().to_str().unwrap().to_string();

    git_in(&p, &["init", "-b", "main"]).await;
    git_in(&p, &["config", "user.email", "test@test.com"]).await;
    git_in(&p, &["config", "user.name", "Test"]).await;

    tokio::fs::write(
        dir.path().join(".gitattributes"),
        "*.bin filter=lfs diff=lfs merge=lfs -text\n",
    )
    .await
    .unwrap();
    tokio::fs::write(dir.path().join("README.md"), "# Test Repo\n")
        .await
        .unwrap();

    git_in(&p, &["add", "."]).await;
    git_in(&p, &["commit", "-m", "initial commit"]).await;

    dir
}

async fn have_git_lfs() -> bool {
    tokio::process::Command::new("git")
        .args(["lfs", "version"])
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

// ── Identifier scenarios ──────────────────────────────────────────────────

#[test]
fn did_reproducibility_across_case_and_project() {
    let lower = did::derive("gdc-tcga", SHA).unwrap();
    let upper = did::derive("gdc-tcga", &SHA.to_uppercase()).unwrap();
    assert_eq!(lower, upper);
    assert_eq!(lower.to_string().len(), 36);
    assert_ne!(lower, did::derive("gdc-target", SHA).unwrap());
}

#[test]
fn path_normalization_variants_collapse() {
    for variant in [
        "data/x.bam",
        "/data/x.bam",
        "//data//x.bam",
        "/data/x.bam/",
        "data\\x.bam",
    ] {
        assert_eq!(did::normalize_path(variant), "/data/x.bam", "{variant}");
    }
}

// ── Repo discovery + store ────────────────────────────────────────────────

#[tokio::test]
async fn repo_root_and_git_dir_resolve() {
    let repo = create_test_repo().await;
    let root = lfs::repo_root(repo.path()).await.unwrap();
    let git_dir = lfs::git_dir(repo.path()).await.unwrap();
    assert_eq!(root.canonicalize().unwrap(), repo.path().canonicalize().unwrap());
    assert!(git_dir.ends_with(".git"));
}

#[tokio::test]
async fn repo_root_outside_git_carries_directive() {
    let dir = TempDir::new().unwrap();
    let err = lfs::repo_root(dir.path()).await.unwrap_err();
    assert!(err.to_string().contains("git drs init"));
}

#[tokio::test]
async fn store_lives_under_the_git_dir() {
    let repo = create_test_repo().await;
    let git_dir = lfs::git_dir(repo.path()).await.unwrap();
    let store = ObjectStore::open(&git_dir).unwrap();

    let record = IndexdRecord {
        did: did::derive("gdc-tcga", SHA).unwrap().to_string(),
        file_name: Some("data/x.bin".into()),
        urls: vec![format!("s3://bucket/{SHA}")],
        size: 11,
        authz: vec!["/programs/gdc/projects/tcga".into()],
        hashes: Hashes {
            sha256: Some(SHA.into()),
            ..Default::default()
        },
        ..Default::default()
    };
    store.write(SHA, &record).unwrap();

    assert!(git_dir.join("drs/objects/e3/b0").join(SHA).is_file());
    assert_eq!(store.read(SHA).unwrap(), record);

    let pending = store.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].oid, SHA);
}

// ── LFS tracking guard (fails before any network I/O) ─────────────────────

#[tokio::test]
async fn guard_rejects_repo_without_gitattributes() {
    let dir = TempDir::new().unwrap();
    let err = lfs::require_lfs_tracking(dir.path(), "data/x.bam")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("git lfs track"));
}

#[tokio::test]
async fn guard_rejects_untracked_extension() {
    let repo = create_test_repo().await;
    let err = lfs::require_lfs_tracking(repo.path(), "data/x.bam")
        .await
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("git lfs track"));
    assert!(text.contains("*.bam"));
}

#[tokio::test]
async fn guard_accepts_tracked_extension() {
    let repo = create_test_repo().await;
    lfs::require_lfs_tracking(repo.path(), "data/x.bin")
        .await
        .unwrap();
}

// ── Working-tree blob heuristics ──────────────────────────────────────────

#[tokio::test]
async fn blob_present_for_large_content() {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(dir.path().join("big.bin"), vec![0u8; 4096])
        .await
        .unwrap();
    assert!(lfs::blob_present(dir.path(), "big.bin").await);
}

#[tokio::test]
async fn blob_absent_for_pointer_files() {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(dir.path().join("x.bin"), lfs::format_pointer(SHA, 4096))
        .await
        .unwrap();
    assert!(!lfs::blob_present(dir.path(), "x.bin").await);
}

#[tokio::test]
async fn blob_absent_for_missing_files() {
    let dir = TempDir::new().unwrap();
    assert!(!lfs::blob_present(dir.path(), "nothing.bin").await);
}

#[tokio::test]
async fn small_non_pointer_content_counts_as_present() {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(dir.path().join("small.bin"), b"tiny payload")
        .await
        .unwrap();
    assert!(lfs::blob_present(dir.path(), "small.bin").await);
}

// ── Pointer staging ───────────────────────────────────────────────────────

#[tokio::test]
async fn stage_pointer_writes_and_adds() {
    let repo = create_test_repo().await;
    lfs::stage_pointer(repo.path(), "data/new.bin", SHA, 4096)
        .await
        .unwrap();

    let text = tokio::fs::read_to_string(repo.path().join("data/new.bin"))
        .await
        .unwrap();
    assert_eq!(lfs::parse_pointer(&text), Some((SHA.to_string(), 4096)));

    let output = tokio::process::Command::new("git")
        .args(["-C", repo.path().to_str().unwrap()])
        .args(["diff", "--cached", "--name-only"])
        .output()
        .await
        .unwrap();
    let staged = String::from_utf8_lossy(&output.stdout);
    assert!(staged.lines().any(|l| l == "data/new.bin"), "{staged}");
}

// ── End-to-end with git-lfs (skipped when not installed) ──────────────────

async fn create_lfs_repo_with_remote() -> (TempDir, TempDir, PathBuf) {
    let repo = create_test_repo().await;
    let p = repo.path().to_str().unwrap().to_string();
    git_in(&p, &["lfs", "install", "--local"]).await;

    let payload = repo.path().join("data").join("payload.bin");
    tokio::fs::create_dir_all(payload.parent().unwrap())
        .await
        .unwrap();
    tokio::fs::write(&payload, vec![42u8; 5000]).await.unwrap();
    git_in(&p, &["add", "data/payload.bin"]).await;
    git_in(&p, &["commit", "-m", "add payload"]).await;

    let remote = TempDir::new().unwrap();
    let r = remote.path().to_str().unwrap().to_string();
    git_in(&r, &["init", "--bare"]).await;
    git_in(&p, &["remote", "add", "origin", &r]).await;

    (repo, remote, payload)
}

#[tokio::test]
async fn pushlist_contains_committed_lfs_file() {
    if !have_git_lfs().await {
        eprintln!("skipping: git-lfs not installed");
        return;
    }
    let (repo, _remote, _payload) = create_lfs_repo_with_remote().await;
    let git_dir = lfs::git_dir(repo.path()).await.unwrap();
    let store = ObjectStore::open(&git_dir).unwrap();

    let files = lfs::files_for_push(
        repo.path(),
        "origin",
        None,
        &["main".to_string()],
        &store,
    )
    .await
    .unwrap();

    assert_eq!(files.len(), 1, "{files:?}");
    let info = files.values().next().unwrap();
    assert_eq!(info.name, "data/payload.bin");
    assert_eq!(info.oid.len(), 64);
    assert_eq!(info.size, 5000);
    assert!(info.downloaded);
}

#[tokio::test]
async fn check_lfs_file_reports_tracked_files() {
    if !have_git_lfs().await {
        eprintln!("skipping: git-lfs not installed");
        return;
    }
    let (repo, _remote, _payload) = create_lfs_repo_with_remote().await;

    let info = lfs::check_lfs_file(repo.path(), "data/payload.bin")
        .await
        .unwrap()
        .expect("payload should be LFS-tracked");
    assert_eq!(info.name, "data/payload.bin");
    assert_eq!(info.oid.len(), 64);
    assert_eq!(info.size, 5000);

    let none = lfs::check_lfs_file(repo.path(), "README.md").await.unwrap();
    assert!(none.is_none());
}
