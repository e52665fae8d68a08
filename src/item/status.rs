use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress state of an item and of the form it carries.
///
/// Items start in [`ItemStatus::InfoError`] and only leave it through a
/// valid form submission.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ItemStatus {
    /// Configuration is invalid or a run failed
    #[default]
    InfoError,
    /// Configuration is complete; the item can be processed
    ReadyToProcess,
    /// A follow-up form must be supplied before the item can proceed
    NeedsInfo,
    /// A run is in flight
    Processing,
    /// The last run completed successfully
    Processed,
}

impl ItemStatus {
    /// Rank used when several statuses are folded into one.
    ///
    /// `ReadyToProcess` and `Processed` share the lowest rank.
    pub fn precedence(&self) -> u8 {
        match self {
            ItemStatus::InfoError => 3,
            ItemStatus::NeedsInfo => 2,
            ItemStatus::Processing => 1,
            ItemStatus::ReadyToProcess | ItemStatus::Processed => 0,
        }
    }

    /// Fold a set of sub-statuses into one aggregate status.
    ///
    /// `InfoError > NeedsInfo > Processing > Processed`; a set made only of
    /// `ReadyToProcess`/`Processed` values (or an empty set) folds to
    /// `Processed`.
    pub fn aggregate<I>(statuses: I) -> ItemStatus
    where
        I: IntoIterator<Item = ItemStatus>,
    {
        let top = statuses
            .into_iter()
            .max_by_key(ItemStatus::precedence)
            .unwrap_or(ItemStatus::Processed);

        match top {
            ItemStatus::ReadyToProcess => ItemStatus::Processed,
            other => other,
        }
    }

    /// A run is in flight or waiting on the caller
    pub fn is_active(&self) -> bool {
        matches!(self, ItemStatus::Processing | ItemStatus::NeedsInfo)
    }

    /// `process` may start a new run from this state
    pub fn can_process(&self) -> bool {
        matches!(self, ItemStatus::ReadyToProcess | ItemStatus::Processed)
    }

    /// A status worth persisting after a form update
    pub fn is_good(&self) -> bool {
        self.can_process()
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ItemStatus::InfoError => "InfoError",
            ItemStatus::ReadyToProcess => "ReadyToProcess",
            ItemStatus::NeedsInfo => "NeedsInfo",
            ItemStatus::Processing => "Processing",
            ItemStatus::Processed => "Processed",
        };
        f.write_str(label)
    }
}
