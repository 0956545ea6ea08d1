use std::sync::{atomic::AtomicBool, Arc};

use tokio::runtime::Runtime;
use tracing::instrument;

/// Process-wide context: the tokio runtime every service runs on
/// and a kill switch shared by `main`, signal handlers and tests
#[derive(Clone)]
pub struct AppContext {
    pub rt: Arc<Runtime>,
    killed: Arc<AtomicBool>,
    kill_sender: tokio::sync::broadcast::Sender<()>,
    // just to make sure we don't send in the case of "no receivers" accidentally
    _kill_receiver: Arc<tokio::sync::broadcast::Receiver<()>>,
}

impl AppContext {
    pub fn new() -> std::io::Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("ingester")
            .build()?;

        Ok(Self::new_with_runtime(Arc::new(rt)))
    }

    pub fn new_with_runtime(rt: Arc<Runtime>) -> Self {
        let (kill_sender, kill_receiver) = tokio::sync::broadcast::channel(1);

        Self {
            rt,
            kill_sender,
            _kill_receiver: Arc::new(kill_receiver),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    #[instrument(level = "debug", skip(self), fields(subsys = "AppContext"))]
    pub fn get_kill_receiver(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.kill_sender.subscribe()
    }

    /// Resolves once `kill()` has been called, including if it was called before this
    pub async fn wait_for_kill(&self) {
        let mut receiver = self.get_kill_receiver();
        if self.killed() {
            return;
        }
        // a lagged or closed channel still means the switch was thrown
        let _ = receiver.recv().await;
    }

    /// This is typically only called from main or tests - it will stop the system gracefully
    #[instrument(skip(self), fields(subsys = "AppContext"))]
    pub fn kill(&self) {
        if !self.killed.swap(true, std::sync::atomic::Ordering::SeqCst) {
            let _ = self.kill_sender.send(());
        }
    }

    pub fn killed(&self) -> bool {
        self.killed.load(std::sync::atomic::Ordering::SeqCst)
    }
}
