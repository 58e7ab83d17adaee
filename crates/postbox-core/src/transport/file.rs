use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use ulid::Ulid;

use super::{Transport, TransportError};
use crate::domain::Message;
use crate::ports::{Clock, SystemClock};

/// Writes every message as `<ulid>.eml` under a directory.
///
/// The directory is created on first use. Files are written to a hidden
/// temporary name and renamed into place, so a reader never sees a partial
/// message.
#[derive(Clone)]
pub struct FileTransport {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Transport for FileTransport {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        fs::create_dir_all(&self.path).await?;

        let name = Ulid::new().to_string();
        let tmp = self.path.join(format!(".tmp_{name}.eml"));
        let target = self.path.join(format!("{name}.eml"));

        fs::write(&tmp, message.render(self.clock.now())?).await?;
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::debug!(
            message_id = %message.id(),
            file = %target.display(),
            "message written"
        );
        Ok(())
    }
}
