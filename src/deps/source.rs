//! Application source acquisition: git clone first, zip archive once as fallback.

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{Result, SetupError};
use crate::runner::{run_with_spinner, CommandRunner, CommandSpec};
use crate::workspace::InstallationWorkspace;

const STAGING_DIR: &str = ".source-staging";

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;

    async fn download_archive(&self, url: &str, dest: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrigin {
    AlreadyPresent,
    Cloned,
    Archive,
}

/// Fetch the application source into the workspace root.
///
/// Skipped when the entry marker is already present. A failed clone falls
/// back to the archive exactly once; both failing is fatal.
pub async fn acquire_source(
    fetcher: &dyn SourceFetcher,
    repo_url: &str,
    archive_url: &str,
    workspace: &InstallationWorkspace,
) -> Result<SourceOrigin> {
    if workspace.has_entry_marker() {
        tracing::info!("Application source already present, skipping download");
        return Ok(SourceOrigin::AlreadyPresent);
    }

    let staging = workspace.root.join(STAGING_DIR);
    reset_dir(&staging)?;

    let clone_error = if repo_url.trim().is_empty() {
        "no repository configured".to_string()
    } else {
        match fetcher.clone_repo(repo_url, &staging).await {
            Ok(()) => {
                merge_into(&staging, &workspace.root)?;
                return Ok(SourceOrigin::Cloned);
            }
            Err(e) => e.to_string(),
        }
    };

    tracing::warn!("Clone failed ({}), falling back to archive download", clone_error);
    reset_dir(&staging)?;

    match fetcher.download_archive(archive_url, &staging).await {
        Ok(()) => {
            merge_into(&staging, &workspace.root)?;
            Ok(SourceOrigin::Archive)
        }
        Err(archive_error) => {
            let _ = std::fs::remove_dir_all(&staging);
            Err(SetupError::fatal_with_hint(
                format!(
                    "Could not fetch the application source (clone: {}; archive: {})",
                    clone_error, archive_error
                ),
                format!(
                    "Check network access, or unpack {} into {} and re-run",
                    archive_url,
                    workspace.root.display()
                ),
            ))
        }
    }
}

fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Move staged entries into `root`, keeping anything already there.
fn merge_into(staging: &Path, root: &Path) -> Result<()> {
    for entry in std::fs::read_dir(staging)? {
        let entry = entry?;
        let target = root.join(entry.file_name());
        if target.exists() {
            tracing::debug!("Keeping existing {}", target.display());
            continue;
        }
        std::fs::rename(entry.path(), &target)?;
    }
    std::fs::remove_dir_all(staging)?;
    Ok(())
}

/// Fetches over the network: `git` for clones, `reqwest` for archives.
pub struct NetworkFetcher<'a> {
    runner: &'a dyn CommandRunner,
    client: reqwest::Client,
}

impl<'a> NetworkFetcher<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("blur360-setup/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { runner, client })
    }
}

#[async_trait]
impl<'a> SourceFetcher for NetworkFetcher<'a> {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        if !self.runner.has_program("git") {
            return Err(SetupError::step("git clone", "git is not installed"));
        }

        let spec = CommandSpec::new("git")
            .args(["clone", "--depth", "1", url])
            .arg(dest.to_string_lossy());
        run_with_spinner(self.runner, &spec, "Cloning repository...")
            .await?
            .require_success("git clone")?;
        Ok(())
    }

    async fn download_archive(&self, url: &str, dest: &Path) -> Result<()> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("  {spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message("Downloading source archive...");
        spinner.enable_steady_tick(Duration::from_millis(100));

        let result = fetch_bytes(&self.client, url).await;
        spinner.finish_and_clear();
        let data = result?;

        let written = extract_archive(&data, dest)?;
        tracing::info!("Extracted {} files from {}", written, url);
        Ok(())
    }
}

async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(SetupError::step(
            "archive download",
            format!("HTTP {} from {}", response.status(), url),
        ));
    }
    Ok(response.bytes().await?.to_vec())
}

/// Extract a zip into `dest`, dropping a single shared top-level directory
/// (the `repo-branch/` folder GitHub wraps archives in).
pub fn extract_archive(data: &[u8], dest: &Path) -> Result<usize> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;

    let mut names: Vec<Option<PathBuf>> = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        names.push(archive.by_index(i)?.enclosed_name());
    }
    let prefix = common_root(names.iter().flatten());

    std::fs::create_dir_all(dest)?;
    let mut written = 0;

    for (i, name) in names.into_iter().enumerate() {
        // Entries with unsafe paths are skipped.
        let Some(name) = name else { continue };
        let relative = match &prefix {
            Some(p) => match name.strip_prefix(p) {
                Ok(rest) => rest.to_path_buf(),
                Err(_) => name,
            },
            None => name,
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let mut file = archive.by_index(i)?;
        let outpath = dest.join(&relative);

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        std::fs::File::create(&outpath)?.write_all(&buffer)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).ok();
            }
        }
        written += 1;
    }

    if written == 0 {
        return Err(SetupError::step("archive extract", "archive contains no files"));
    }
    Ok(written)
}

fn common_root<'a>(mut names: impl Iterator<Item = &'a PathBuf>) -> Option<PathBuf> {
    let first = names.next()?;
    let root = PathBuf::from(first.components().next()?.as_os_str());
    let mut nested = first.components().count() > 1;

    for name in names {
        if !name.starts_with(&root) {
            return None;
        }
        nested |= name.components().count() > 1;
    }

    nested.then_some(root)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::runner::testing::RecordingRunner;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            for (name, content) in entries {
                zip.start_file(*name, options).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    struct FakeFetcher {
        clone_ok: bool,
        archive_ok: bool,
        clones: AtomicUsize,
        archives: AtomicUsize,
    }

    impl FakeFetcher {
        fn new(clone_ok: bool, archive_ok: bool) -> Self {
            Self {
                clone_ok,
                archive_ok,
                clones: AtomicUsize::new(0),
                archives: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceFetcher for FakeFetcher {
        async fn clone_repo(&self, _url: &str, dest: &Path) -> Result<()> {
            self.clones.fetch_add(1, Ordering::SeqCst);
            if self.clone_ok {
                std::fs::write(dest.join("blur360_webapp.py"), "print('cloned')").unwrap();
                Ok(())
            } else {
                Err(SetupError::step("git clone", "exit status 128"))
            }
        }

        async fn download_archive(&self, _url: &str, dest: &Path) -> Result<()> {
            self.archives.fetch_add(1, Ordering::SeqCst);
            if self.archive_ok {
                std::fs::write(dest.join("blur360_webapp.py"), "print('archive')").unwrap();
                Ok(())
            } else {
                Err(SetupError::step("archive download", "HTTP 404"))
            }
        }
    }

    #[tokio::test]
    async fn test_clone_success_skips_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = InstallationWorkspace::open(tmp.path());
        let fetcher = FakeFetcher::new(true, true);

        let origin = acquire_source(&fetcher, "repo", "zip", &ws).await.unwrap();
        assert_eq!(origin, SourceOrigin::Cloned);
        assert_eq!(fetcher.archives.load(Ordering::SeqCst), 0);
        assert!(ws.has_entry_marker());
        assert!(!tmp.path().join(STAGING_DIR).exists());
    }

    #[tokio::test]
    async fn test_clone_failure_falls_back_once() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = InstallationWorkspace::open(tmp.path());
        let fetcher = FakeFetcher::new(false, true);

        let origin = acquire_source(&fetcher, "repo", "zip", &ws).await.unwrap();
        assert_eq!(origin, SourceOrigin::Archive);
        assert_eq!(fetcher.clones.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.archives.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_both_failing_is_fatal_after_one_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = InstallationWorkspace::open(tmp.path());
        let fetcher = FakeFetcher::new(false, false);

        let err = acquire_source(&fetcher, "repo", "zip", &ws).await.unwrap_err();
        assert!(matches!(err, SetupError::FatalPrecondition { .. }));
        assert_eq!(fetcher.clones.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.archives.load(Ordering::SeqCst), 1);
        assert!(!tmp.path().join(STAGING_DIR).exists());
    }

    #[tokio::test]
    async fn test_existing_source_is_not_refetched() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("blur360_webapp.py"), "").unwrap();
        let ws = InstallationWorkspace::open(tmp.path());
        let fetcher = FakeFetcher::new(true, true);

        let origin = acquire_source(&fetcher, "repo", "zip", &ws).await.unwrap();
        assert_eq!(origin, SourceOrigin::AlreadyPresent);
        assert_eq!(fetcher.clones.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_merge_keeps_existing_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.ini"), "[server]\nport = 9000\n").unwrap();
        let ws = InstallationWorkspace::open(tmp.path());

        struct WithConfig;
        #[async_trait]
        impl SourceFetcher for WithConfig {
            async fn clone_repo(&self, _url: &str, dest: &Path) -> Result<()> {
                std::fs::write(dest.join("blur360_webapp.py"), "").unwrap();
                std::fs::write(dest.join("config.ini"), "upstream").unwrap();
                Ok(())
            }
            async fn download_archive(&self, _url: &str, _dest: &Path) -> Result<()> {
                unreachable!()
            }
        }

        acquire_source(&WithConfig, "repo", "zip", &ws).await.unwrap();
        let kept = std::fs::read_to_string(tmp.path().join("config.ini")).unwrap();
        assert!(kept.contains("9000"));
    }

    #[test]
    fn test_extract_strips_github_root() {
        let tmp = tempfile::tempdir().unwrap();
        let data = build_zip(&[
            ("blur360-main/blur360_webapp.py", "app"),
            ("blur360-main/requirements.txt", "flask\n"),
            ("blur360-main/templates/index.html", "<html>"),
        ]);
        let written = extract_archive(&data, tmp.path()).unwrap();
        assert_eq!(written, 3);
        assert!(tmp.path().join("blur360_webapp.py").is_file());
        assert!(tmp.path().join("templates/index.html").is_file());
    }

    #[test]
    fn test_extract_flat_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let data = build_zip(&[("blur360_webapp.py", "app"), ("README.md", "readme")]);
        extract_archive(&data, tmp.path()).unwrap();
        assert!(tmp.path().join("blur360_webapp.py").is_file());
        assert!(tmp.path().join("README.md").is_file());
    }

    #[test]
    fn test_extract_rejects_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(extract_archive(b"not a zip", tmp.path()).is_err());
    }

    #[tokio::test]
    async fn test_network_fetcher_downloads_archive() {
        let server = MockServer::start().await;
        let data = build_zip(&[("blur360-main/blur360_webapp.py", "app")]);
        Mock::given(method("GET"))
            .and(path("/main.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data))
            .mount(&server)
            .await;

        let runner = RecordingRunner::new();
        let fetcher = NetworkFetcher::new(&runner).unwrap();
        let tmp = tempfile::tempdir().unwrap();
        fetcher
            .download_archive(&format!("{}/main.zip", server.uri()), tmp.path())
            .await
            .unwrap();
        assert!(tmp.path().join("blur360_webapp.py").is_file());
    }

    #[tokio::test]
    async fn test_network_fetcher_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let runner = RecordingRunner::new();
        let fetcher = NetworkFetcher::new(&runner).unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let err = fetcher
            .download_archive(&format!("{}/main.zip", server.uri()), tmp.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_clone_without_git_fails_fast() {
        let runner = RecordingRunner::new();
        let fetcher = NetworkFetcher::new(&runner).unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let err = fetcher.clone_repo("https://x", tmp.path()).await.unwrap_err();
        assert!(err.to_string().contains("git is not installed"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_clone_runs_shallow_git_clone() {
        let runner = RecordingRunner::new().with_program("git");
        let fetcher = NetworkFetcher::new(&runner).unwrap();
        let tmp = tempfile::tempdir().unwrap();
        fetcher.clone_repo("https://x/repo.git", tmp.path()).await.unwrap();
        assert!(runner.calls()[0].starts_with("git clone --depth 1 https://x/repo.git"));
    }
}
