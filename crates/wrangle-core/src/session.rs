//! Shared service handles.
//!
//! A [`Session`] bundles the catalog, the query service, object storage and
//! configuration. It is cheap to clone and every writer or executor built from
//! it shares the same clients.

use crate::athena::{AthenaClient, QueryExecutor, QueryService};
use crate::catalog::{Catalog, CatalogSynchronizer, GlueCatalogClient, MemoryCatalog};
use crate::config::{AwsConfig, CatalogBackend, Config};
use crate::dataset::DatasetWriter;
use crate::storage::ObjectStorage;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Load SDK configuration for the configured region and credentials.
pub(crate) async fn load_sdk_config(aws: &AwsConfig) -> aws_config::SdkConfig {
    let region = aws_config::Region::new(aws.region.clone());
    let loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    match (&aws.access_key_id, &aws.secret_access_key) {
        (Some(access_key), Some(secret_key)) => {
            debug!("Using explicit AWS credentials");
            let credentials = aws_credential_types::Credentials::new(
                access_key,
                secret_key,
                aws.session_token.clone(),
                None,
                "wrangle-explicit-credentials",
            );
            loader.credentials_provider(credentials).load().await
        }
        _ => {
            debug!("Using default AWS credential chain");
            loader.load().await
        }
    }
}

/// Catalog, query service, storage and configuration for one caller.
#[derive(Clone)]
pub struct Session {
    catalog: Arc<dyn Catalog>,
    queries: Option<Arc<dyn QueryService>>,
    storage: Arc<ObjectStorage>,
    config: Arc<Config>,
}

impl Session {
    /// Assemble a session from explicit parts.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        queries: Option<Arc<dyn QueryService>>,
        storage: Arc<ObjectStorage>,
        config: Config,
    ) -> Self {
        Self {
            catalog,
            queries,
            storage,
            config: Arc::new(config),
        }
    }

    /// Build AWS-backed clients from configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let catalog: Arc<dyn Catalog> = match config.catalog.backend {
            CatalogBackend::Glue => {
                Arc::new(GlueCatalogClient::new(&config.aws, &config.catalog).await?)
            }
            CatalogBackend::Memory => Arc::new(MemoryCatalog::new()),
        };
        let queries: Arc<dyn QueryService> = Arc::new(AthenaClient::new(&config.aws).await);
        let storage = Arc::new(ObjectStorage::new(&config.aws, &config.storage));

        info!(
            region = %config.aws.region,
            catalog = ?config.catalog.backend,
            storage = ?config.storage.backend,
            workgroup = %config.athena.workgroup,
            "Session initialized"
        );

        Ok(Self::new(catalog, Some(queries), storage, config.clone()))
    }

    /// In-process catalog and storage with no query service.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryCatalog::new()),
            None,
            Arc::new(ObjectStorage::in_memory()),
            Config::default(),
        )
    }

    /// Replace the catalog.
    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Attach a query service.
    pub fn with_query_service(mut self, queries: Arc<dyn QueryService>) -> Self {
        self.queries = Some(queries);
        self
    }

    /// Replace the storage.
    pub fn with_storage(mut self, storage: Arc<ObjectStorage>) -> Self {
        self.storage = storage;
        self
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn storage(&self) -> &Arc<ObjectStorage> {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The query service, or a configuration error when none is attached.
    pub fn queries(&self) -> Result<Arc<dyn QueryService>> {
        self.queries
            .clone()
            .ok_or_else(|| Error::Config("No query service configured for this session".into()))
    }

    /// Catalog operations over this session's catalog.
    pub fn synchronizer(&self) -> CatalogSynchronizer {
        CatalogSynchronizer::new(self.catalog.clone())
    }

    /// Dataset writer sharing this session.
    pub fn writer(&self) -> DatasetWriter {
        DatasetWriter::new(self.clone())
    }

    /// Query executor sharing this session.
    pub fn executor(&self) -> QueryExecutor {
        QueryExecutor::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_session() {
        let session = Session::in_memory();
        assert!(matches!(session.queries(), Err(Error::Config(_))));
        assert_eq!(session.config().athena.workgroup, "primary");
    }

    #[tokio::test]
    async fn test_clones_share_catalog() {
        let session = Session::in_memory();
        let other = session.clone();
        session
            .catalog()
            .create_database("db", None, false)
            .await
            .unwrap();
        let names: Vec<String> = other
            .catalog()
            .databases()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["db".to_string()]);
    }
}
