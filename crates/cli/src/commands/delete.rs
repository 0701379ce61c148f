//! `delete` command: remove one stored record.

use clap::Args;
use serde::Serialize;
use tabdata_core::{BackendRegistry, RecordKind};

use super::{OwnerArgs, parse_kind};
use crate::error::CliError;

#[derive(Debug, Clone, Args)]
pub struct DeleteParams {
    #[command(flatten)]
    pub owner: OwnerArgs,

    /// Record kind: critical, shopping, store-hours or mock.
    #[arg(long, value_parser = parse_kind)]
    pub kind: RecordKind,
}

#[derive(Debug, Serialize)]
pub struct DeleteOutput {
    pub key: String,
    pub backend: &'static str,
}

pub async fn delete_impl(registry: &BackendRegistry, params: DeleteParams) -> Result<String, CliError> {
    let key = params.owner.key(params.kind);
    let backend = registry.backend_for(params.kind, params.owner.incognito, &params.owner.profile());
    backend.delete(key).await;
    tracing::info!(key = %key, backend = backend.tag(), "Deleted record");

    let output = DeleteOutput { key: key.to_string(), backend: backend.tag() };
    Ok(serde_json::to_string_pretty(&output)?)
}
