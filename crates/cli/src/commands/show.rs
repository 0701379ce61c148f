//! `show` command: print a stored record as JSON.

use clap::Args;
use serde::Serialize;
use tabdata_core::{BackendRegistry, RecordKind};

use super::{OwnerArgs, parse_kind};
use crate::error::CliError;

#[derive(Debug, Clone, Args)]
pub struct ShowParams {
    #[command(flatten)]
    pub owner: OwnerArgs,

    /// Record kind: critical, shopping, store-hours or mock.
    #[arg(long, value_parser = parse_kind)]
    pub kind: RecordKind,
}

#[derive(Debug, Serialize)]
pub struct ShowOutput {
    pub key: String,
    pub backend: &'static str,
    pub record: serde_json::Value,
}

pub async fn show_impl(registry: &BackendRegistry, params: ShowParams) -> Result<String, CliError> {
    if params.owner.incognito {
        // Encrypted records from another process are unreadable without the shared key.
        registry.config().require_cipher_key()?;
    }
    let key = params.owner.key(params.kind);
    let backend = registry.backend_for(params.kind, params.owner.incognito, &params.owner.profile());

    let bytes = backend
        .restore(key)
        .await
        .ok_or_else(|| CliError::NotFound(key.to_string()))?;
    let output = ShowOutput { key: key.to_string(), backend: backend.tag(), record: params.kind.describe(&bytes)? };

    Ok(serde_json::to_string_pretty(&output)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tabdata_core::kinds::ShoppingData;
    use tabdata_core::{AppConfig, CacheCoordinator, Profile, Tab};

    fn params(owner: i32, kind: RecordKind) -> ShowParams {
        ShowParams { owner: OwnerArgs { owner, profile: "Default".into(), incognito: false }, kind }
    }

    #[tokio::test]
    async fn test_show_missing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BackendRegistry::new(AppConfig::with_storage_dir(dir.path())).unwrap();

        let result = show_impl(&registry, params(1, RecordKind::Critical)).await;
        assert!(matches!(result, Err(CliError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_show_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(BackendRegistry::new(AppConfig::with_storage_dir(dir.path())).unwrap());
        let coordinator = CacheCoordinator::new(Arc::clone(&registry));
        let tab = Tab::new(4, Profile::new("Default"));
        coordinator
            .from(&tab, || async { Some(ShoppingData { price_micros: 1_999_999, ..Default::default() }) })
            .await
            .unwrap();

        let json = show_impl(&registry, params(4, RecordKind::Shopping)).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["key"], "4/SPTD");
        assert_eq!(value["backend"], "KVPTDS");
        assert_eq!(value["record"]["price_micros"], 1_999_999);
    }

    #[tokio::test]
    async fn test_show_incognito_requires_key() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BackendRegistry::new(AppConfig::with_storage_dir(dir.path())).unwrap();
        let mut params = params(1, RecordKind::Critical);
        params.owner.incognito = true;

        let result = show_impl(&registry, params).await;
        assert!(matches!(result, Err(CliError::Config(_))));
    }
}
