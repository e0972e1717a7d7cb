use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ProcessorConfig;
use crate::error::{CouponError, Result};
use crate::ingest::FileProcessor;
use crate::store::CouponStore;

/// Watches the `add/` and `remove/` subdirectories under the configured data
/// root and feeds every `.gz` file to the processor: first the files already
/// present at startup, then create/rename events as they arrive.
pub struct DirectoryWatcher {
    processor: FileProcessor,
    data_directory: PathBuf,
}

impl DirectoryWatcher {
    pub fn new(store: Arc<dyn CouponStore>, config: ProcessorConfig) -> Self {
        let data_directory = config.data_directory.clone();
        Self {
            processor: FileProcessor::new(store, config),
            data_directory,
        }
    }

    /// Run until cancellation. Notification-subsystem errors are logged and
    /// watching continues; file-level failures never escape the loop.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let add_dir = self.prepare_dir("add")?;
        let remove_dir = self.prepare_dir("remove")?;
        info!(
            "Watching directories: {}, {}",
            add_dir.display(),
            remove_dir.display()
        );

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |result| {
                let _ = event_tx.send(result);
            },
            notify::Config::default(),
        )
        .map_err(|e| CouponError::Watch(format!("failed to create watcher: {e}")))?;

        watcher
            .watch(&add_dir, RecursiveMode::NonRecursive)
            .map_err(|e| CouponError::Watch(format!("failed to watch add dir: {e}")))?;
        watcher
            .watch(&remove_dir, RecursiveMode::NonRecursive)
            .map_err(|e| CouponError::Watch(format!("failed to watch remove dir: {e}")))?;

        // Files that landed before the service started are drained first;
        // anything arriving meanwhile queues behind them in the channel.
        self.process_existing_files(&add_dir, true, &cancel).await;
        self.process_existing_files(&remove_dir, false, &cancel).await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                received = event_rx.recv() => match received {
                    Some(Ok(event)) => {
                        self.handle_event(event, &add_dir, &remove_dir, &cancel).await;
                    }
                    Some(Err(e)) => error!("watcher error: {}", e),
                    None => return Ok(()),
                },
            }
        }
    }

    fn prepare_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.data_directory.join(name);
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o755);
        }
        builder
            .create(&dir)
            .map_err(|e| CouponError::Watch(format!("failed to create {name} dir: {e}")))?;
        // Notify reports canonical paths, so the comparison roots must be
        // canonical too.
        dir.canonicalize()
            .map_err(|e| CouponError::Watch(format!("failed to resolve {name} dir: {e}")))
    }

    async fn process_existing_files(&self, dir: &Path, is_add: bool, cancel: &CancellationToken) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!("failed to list files in {}: {}", dir.display(), e);
                return;
            }
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_gz(path))
            .collect();
        files.sort();
        info!(
            "Found {} existing file(s) in {}",
            files.len(),
            dir.display()
        );
        for path in files {
            if cancel.is_cancelled() {
                return;
            }
            self.processor.process_file(&path, is_add, cancel).await;
        }
    }

    async fn handle_event(
        &self,
        event: Event,
        add_dir: &Path,
        remove_dir: &Path,
        cancel: &CancellationToken,
    ) {
        let relevant = matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
        );
        if !relevant {
            return;
        }
        for path in &event.paths {
            if !is_gz(path) {
                continue;
            }
            let Some(parent) = path.parent() else {
                continue;
            };
            if parent == add_dir {
                self.processor.process_file(path, true, cancel).await;
            } else if parent == remove_dir {
                self.processor.process_file(path, false, cancel).await;
            } else {
                debug!("ignoring event outside watched dirs: {}", path.display());
            }
        }
    }
}

fn is_gz(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("gz")
}
