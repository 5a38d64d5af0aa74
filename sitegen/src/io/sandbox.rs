//! Sandbox filesystem boundary.
//!
//! [`SandboxFs`] is the narrow contract the interpreter needs from the runtime
//! that hosts the generated project. [`LocalSandbox`] backs it with a plain
//! directory, and [`SandboxRegistry`] hands out one shared instance to every
//! consumer that asks for it.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, instrument, warn};

use crate::core::mount::{MountTree, flatten};
use crate::core::path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MkdirOptions {
    pub recursive: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RmOptions {
    pub recursive: bool,
    /// Treat a missing path as success.
    pub force: bool,
}

/// The sandbox became reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerReady {
    pub port: u16,
    pub url: String,
}

/// Filesystem and process contract of the sandbox runtime.
///
/// Paths are canonical virtual paths (`/src/app.js`).
pub trait SandboxFs: Send + Sync {
    fn mount(&self, tree: &MountTree) -> impl Future<Output = Result<()>> + Send;

    fn write_file(&self, path: &str, contents: &str) -> impl Future<Output = Result<()>> + Send;

    fn mkdir(&self, path: &str, opts: MkdirOptions) -> impl Future<Output = Result<()>> + Send;

    fn rm(&self, path: &str, opts: RmOptions) -> impl Future<Output = Result<()>> + Send;

    fn rename(&self, from: &str, to: &str) -> impl Future<Output = Result<()>> + Send;

    /// Run a shell command in the project root and return its exit code.
    fn exec(&self, command: &str) -> impl Future<Output = Result<i32>> + Send;
}

/// Sandbox backed by a local directory.
#[derive(Debug)]
pub struct LocalSandbox {
    root: PathBuf,
    ready: watch::Sender<Option<ServerReady>>,
}

impl LocalSandbox {
    /// Open (creating if needed) a sandbox rooted at `root`.
    pub async fn open(root: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("create sandbox root {}", root.display()))?;
        let (ready, _) = watch::channel(None);
        info!(root = %root.display(), "opened local sandbox");
        Ok(Self {
            root: root.to_path_buf(),
            ready,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a virtual path onto the sandbox directory.
    ///
    /// Paths with `.`/`..` segments or no segments at all are rejected so
    /// nothing can escape the root.
    pub fn resolve(&self, virtual_path: &str) -> Result<PathBuf> {
        let segments = path::segments(virtual_path)
            .ok_or_else(|| anyhow!("invalid sandbox path {virtual_path:?}"))?;
        Ok(segments
            .iter()
            .fold(self.root.clone(), |acc, segment| acc.join(segment)))
    }

    /// Publish the dev server address to every subscriber.
    pub fn notify_server_ready(&self, port: u16, url: &str) {
        info!(port, url, "sandbox server ready");
        self.ready.send_replace(Some(ServerReady {
            port,
            url: url.to_string(),
        }));
    }

    /// Subscribe to server-ready notifications. Holds `None` until the first one.
    pub fn server_ready(&self) -> watch::Receiver<Option<ServerReady>> {
        self.ready.subscribe()
    }
}

impl SandboxFs for LocalSandbox {
    #[instrument(skip_all, fields(root = %self.root.display()))]
    async fn mount(&self, tree: &MountTree) -> Result<()> {
        let (dirs, files) = flatten(tree);
        for dir in &dirs {
            self.mkdir(dir, MkdirOptions { recursive: true }).await?;
        }
        for (file_path, contents) in &files {
            self.write_file(file_path, contents).await?;
        }
        info!(dirs = dirs.len(), files = files.len(), "mounted tree");
        Ok(())
    }

    async fn write_file(&self, virtual_path: &str, contents: &str) -> Result<()> {
        let target = self.resolve(virtual_path)?;
        tokio::fs::write(&target, contents)
            .await
            .with_context(|| format!("write {}", target.display()))?;
        debug!(path = virtual_path, bytes = contents.len(), "wrote file");
        Ok(())
    }

    async fn mkdir(&self, virtual_path: &str, opts: MkdirOptions) -> Result<()> {
        let target = self.resolve(virtual_path)?;
        let result = if opts.recursive {
            tokio::fs::create_dir_all(&target).await
        } else {
            tokio::fs::create_dir(&target).await
        };
        result.with_context(|| format!("create directory {}", target.display()))?;
        debug!(path = virtual_path, recursive = opts.recursive, "created directory");
        Ok(())
    }

    async fn rm(&self, virtual_path: &str, opts: RmOptions) -> Result<()> {
        let target = self.resolve(virtual_path)?;
        let metadata = match tokio::fs::symlink_metadata(&target).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound && opts.force => {
                debug!(path = virtual_path, "rm target absent");
                return Ok(());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("stat {}", target.display()));
            }
        };
        let result = if !metadata.is_dir() {
            tokio::fs::remove_file(&target).await
        } else if opts.recursive {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_dir(&target).await
        };
        result.with_context(|| format!("remove {}", target.display()))?;
        debug!(path = virtual_path, "removed");
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from)?;
        let dest = self.resolve(to)?;
        tokio::fs::rename(&source, &dest)
            .await
            .with_context(|| format!("rename {} to {}", source.display(), dest.display()))?;
        debug!(from, to, "renamed");
        Ok(())
    }

    #[instrument(skip_all, fields(command = %command))]
    async fn exec(&self, command: &str) -> Result<i32> {
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .status()
            .await
            .with_context(|| format!("run {command:?}"))?;
        let code = status.code().unwrap_or(-1);
        if code != 0 {
            warn!(code, "sandbox command failed");
        }
        Ok(code)
    }
}

struct Slot<S> {
    instance: Option<Arc<S>>,
    holders: usize,
}

/// Shared handle to the single live sandbox.
///
/// The first `acquire_or_create` builds the instance; later calls share it.
/// The instance is dropped when the last holder calls `release`.
pub struct SandboxRegistry<S> {
    slot: Mutex<Slot<S>>,
}

impl<S> Default for SandboxRegistry<S> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot {
                instance: None,
                holders: 0,
            }),
        }
    }
}

impl<S> SandboxRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live instance, building it with `factory` if there is none.
    ///
    /// Concurrent callers wait for the first build, so at most one instance
    /// exists at a time.
    pub async fn acquire_or_create<F, Fut>(&self, factory: F) -> Result<Arc<S>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        let mut slot = self.slot.lock().await;
        let instance = match &slot.instance {
            Some(instance) => Arc::clone(instance),
            None => {
                let created = Arc::new(factory().await.context("create sandbox")?);
                slot.instance = Some(Arc::clone(&created));
                debug!("created sandbox instance");
                created
            }
        };
        slot.holders += 1;
        Ok(instance)
    }

    /// Give back one holder's claim. Returns true when the instance was dropped.
    pub async fn release(&self) -> bool {
        let mut slot = self.slot.lock().await;
        slot.holders = slot.holders.saturating_sub(1);
        if slot.holders == 0 && slot.instance.take().is_some() {
            debug!("released sandbox instance");
            return true;
        }
        false
    }

    pub async fn current(&self) -> Option<Arc<S>> {
        self.slot.lock().await.instance.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mount::project;
    use crate::test_support::{file, folder};
    use crate::tree::FileTree;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn mount_writes_tree_to_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = LocalSandbox::open(temp.path()).await.expect("open");
        let tree = FileTree {
            items: vec![
                file("/index.html", "<html></html>"),
                folder("/src", vec![folder("/src/lib", vec![file("/src/lib/a.js", "a")])]),
            ],
        };

        sandbox.mount(&project(&tree)).await.expect("mount");

        let index = std::fs::read_to_string(temp.path().join("index.html")).expect("index");
        let nested = std::fs::read_to_string(temp.path().join("src/lib/a.js")).expect("nested");
        assert_eq!(index, "<html></html>");
        assert_eq!(nested, "a");
    }

    #[tokio::test]
    async fn resolve_rejects_escaping_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = LocalSandbox::open(temp.path()).await.expect("open");

        assert!(sandbox.resolve("/../etc/passwd").is_err());
        assert!(sandbox.resolve("/").is_err());
        assert!(sandbox.write_file("/a/../../x", "x").await.is_err());
        assert_eq!(
            sandbox.resolve("src//app.js").expect("resolve"),
            temp.path().join("src").join("app.js")
        );
    }

    #[tokio::test]
    async fn rm_force_ignores_missing_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = LocalSandbox::open(temp.path()).await.expect("open");
        let force = RmOptions {
            recursive: true,
            force: true,
        };

        sandbox.rm("/missing", force).await.expect("forced rm");
        assert!(sandbox.rm("/missing", RmOptions::default()).await.is_err());

        sandbox
            .mkdir("/a/b", MkdirOptions { recursive: true })
            .await
            .expect("mkdir");
        sandbox.write_file("/a/b/c.txt", "c").await.expect("write");
        sandbox.rm("/a", force).await.expect("recursive rm");
        assert!(!temp.path().join("a").exists());
    }

    #[tokio::test]
    async fn exec_reports_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = LocalSandbox::open(temp.path()).await.expect("open");

        assert_eq!(sandbox.exec("touch built").await.expect("exec"), 0);
        assert!(temp.path().join("built").exists());
        assert_eq!(sandbox.exec("exit 7").await.expect("exec"), 7);
    }

    #[tokio::test]
    async fn server_ready_reaches_subscribers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = LocalSandbox::open(temp.path()).await.expect("open");
        let mut ready = sandbox.server_ready();
        assert!(ready.borrow().is_none());

        sandbox.notify_server_ready(3000, "http://127.0.0.1:3000");

        ready.changed().await.expect("changed");
        let event = ready.borrow().clone().expect("ready");
        assert_eq!(event.port, 3000);
        assert_eq!(event.url, "http://127.0.0.1:3000");
    }

    #[tokio::test]
    async fn registry_shares_one_instance_until_released() {
        let registry: SandboxRegistry<String> = SandboxRegistry::new();
        let counter = AtomicUsize::new(0);
        let builds = &counter;
        let factory = move || async move {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok("sandbox".to_string())
        };

        let first = registry.acquire_or_create(factory).await.expect("first");
        let second = registry.acquire_or_create(factory).await.expect("second");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        assert!(!registry.release().await);
        assert!(registry.release().await);
        assert!(registry.current().await.is_none());

        registry.acquire_or_create(factory).await.expect("third");
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_factory_leaves_registry_empty() {
        let registry: SandboxRegistry<String> = SandboxRegistry::new();
        let err = registry
            .acquire_or_create(|| async { Err(anyhow!("boot failed")) })
            .await
            .expect_err("factory error");
        assert!(format!("{err:#}").contains("boot failed"));
        assert!(registry.current().await.is_none());
    }
}
