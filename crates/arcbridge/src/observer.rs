use std::path::{Path, PathBuf};

use crate::progress::ProgressEvent;

/// Host answer to events that may stop the operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Flow {
    #[default]
    Continue,
    Cancel,
}

/// Host answer to an existing extraction target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OverwriteDecision {
    #[default]
    Overwrite,
    /// Write to this path instead.
    Rename(PathBuf),
    /// Decode the item without persisting it.
    Skip,
    Cancel,
}

#[derive(Clone, Copy, Debug)]
pub struct ItemStarted<'a> {
    pub index: u32,
    pub path: &'a Path,
    /// Items handled so far, this one included.
    pub done: u32,
    pub total: u32,
}

impl ItemStarted<'_> {
    /// Completion fraction as a whole percentage.
    pub fn percent_done(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (u64::from(self.done.min(self.total)) * 100 / u64::from(self.total)) as u8
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ItemFinished<'a> {
    pub index: u32,
    pub path: Option<&'a Path>,
    pub bytes: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct OverwriteConflict<'a> {
    pub index: u32,
    pub path: &'a Path,
}

/// Host-facing events of one extract or update operation.
///
/// Every method has a no-op default, so observers implement only what
/// they need. Methods are called from inside engine callbacks and must not
/// call back into the same operation.
pub trait TransferObserver: Send + Sync {
    fn on_open(&self, _total_bytes: u64) {}

    fn on_item_started(&self, _item: &ItemStarted<'_>) -> Flow {
        Flow::Continue
    }

    fn on_item_finished(&self, _item: &ItemFinished<'_>) {}

    fn on_progress(&self, _event: &ProgressEvent) {}

    fn on_overwrite(&self, _conflict: &OverwriteConflict<'_>) -> OverwriteDecision {
        OverwriteDecision::Overwrite
    }

    fn on_finished(&self) {}
}
