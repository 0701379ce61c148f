//! CLI subcommands.
//!
//! Each command takes its parsed arguments and returns pretty JSON for stdout.

pub mod close;
pub mod delete;
pub mod show;

pub use close::{CloseParams, close_impl};
pub use delete::{DeleteParams, delete_impl};
pub use show::{ShowParams, show_impl};

use clap::Args;
use tabdata_core::{Profile, RecordKey, RecordKind};

/// Arguments naming one tab.
#[derive(Debug, Clone, Args)]
pub struct OwnerArgs {
    /// Tab id.
    #[arg(long)]
    pub owner: i32,

    /// Profile the tab belongs to.
    #[arg(long, default_value = "Default")]
    pub profile: String,

    /// The tab belongs to an incognito profile; use encrypted records.
    #[arg(long)]
    pub incognito: bool,
}

impl OwnerArgs {
    pub fn profile(&self) -> Profile {
        if self.incognito { Profile::off_the_record(&self.profile) } else { Profile::new(&self.profile) }
    }

    pub fn key(&self, kind: RecordKind) -> RecordKey {
        RecordKey::new(self.owner, kind.type_id(self.incognito))
    }
}

pub fn parse_kind(s: &str) -> Result<RecordKind, String> {
    s.parse().map_err(|e: tabdata_core::Error| e.to_string())
}
