//! `close` command: run owner-close handling for a tab.

use clap::Args;
use serde::Serialize;
use std::sync::Arc;
use tabdata_core::{CacheCoordinator, RecordKind, Tab};

use super::OwnerArgs;
use crate::error::CliError;

#[derive(Debug, Clone, Args)]
pub struct CloseParams {
    #[command(flatten)]
    pub owner: OwnerArgs,
}

#[derive(Debug, Serialize)]
pub struct CloseOutput {
    pub owner: i32,
    /// Keys whose durable copies were deleted.
    pub deleted: Vec<String>,
}

pub async fn close_impl(coordinator: &CacheCoordinator, params: CloseParams) -> Result<String, CliError> {
    let tab: Arc<Tab> = Tab::new(params.owner.owner, params.owner.profile());
    coordinator.on_owner_closed(&tab).await;

    let deleted = RecordKind::ALL
        .into_iter()
        .filter(|kind| kind.is_ephemeral())
        .map(|kind| params.owner.key(kind).to_string())
        .collect();
    let output = CloseOutput { owner: params.owner.owner, deleted };
    Ok(serde_json::to_string_pretty(&output)?)
}
