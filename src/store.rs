pub(crate) mod files;
pub(crate) mod history;
pub(crate) mod identity;
pub(crate) mod output;
pub(crate) mod ratings;
pub(crate) mod snapshots;
