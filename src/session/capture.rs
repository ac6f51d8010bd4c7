use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::pcm;
use crate::audio::Microphone;
use crate::transport::LiveConnection;

/// Streams microphone blocks to an open session on its own task
pub struct CapturePipeline {
    active: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    /// Start the microphone and begin streaming to `connection`
    pub async fn start(
        mut microphone: Box<dyn Microphone>,
        connection: Arc<dyn LiveConnection>,
        sample_rate: u32,
    ) -> Result<Self> {
        let mut blocks = microphone
            .start()
            .await
            .context("Failed to start microphone")?;

        info!("Capture started on {}", microphone.name());

        let active = Arc::new(AtomicBool::new(true));
        let frames_sent = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task_active = Arc::clone(&active);
        let task_frames = Arc::clone(&frames_sent);

        let task = tokio::spawn(async move {
            loop {
                let block = tokio::select! {
                    _ = &mut shutdown_rx => break,
                    block = blocks.recv() => match block {
                        Some(block) => block,
                        None => {
                            info!("Microphone stream ended");
                            break;
                        }
                    },
                };

                if !task_active.load(Ordering::SeqCst) {
                    break;
                }

                if block.sample_rate != sample_rate {
                    warn!(
                        "Capture block at {}Hz, expected {}Hz. Dropping block.",
                        block.sample_rate, sample_rate
                    );
                    continue;
                }

                let blob = pcm::encode_blob(&block.samples, block.sample_rate);
                if let Err(e) = connection.send_audio(blob) {
                    debug!("Session no longer accepts audio: {}", e);
                    break;
                }

                let sent = task_frames.fetch_add(1, Ordering::SeqCst) + 1;
                if sent % 100 == 0 {
                    debug!("Streamed {} capture blocks", sent);
                }
            }

            task_active.store(false, Ordering::SeqCst);

            if let Err(e) = microphone.stop().await {
                error!("Failed to stop microphone: {}", e);
            }
        });

        Ok(Self {
            active,
            frames_sent,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Stop streaming and release the microphone. Returns once the task has exited.
    pub async fn stop(mut self) {
        self.active.store(false, Ordering::SeqCst);

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Capture task panicked: {}", e);
            }
        }

        info!(
            "Capture stopped after {} blocks",
            self.frames_sent.load(Ordering::SeqCst)
        );
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
