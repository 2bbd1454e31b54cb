//! Implements the structs that hold the state of the REST server and the fetch worker.

use std::sync::{Arc, Mutex};

use axum::extract::FromRef;
use rusqlite::Connection;

use crate::{
    Error, config::AggregatorConfig, db::initialize, fetch::FetchQueue,
    provider::ProviderGateway,
};

/// The state of the REST server.
#[derive(Clone)]
pub struct AppState {
    /// The database connection
    pub db_connection: Arc<Mutex<Connection>>,

    /// The aggregator the consents and sessions live at.
    pub provider: Arc<dyn ProviderGateway>,

    /// Settings for talking to the aggregator and shaping ingested data.
    pub config: Arc<AggregatorConfig>,

    /// Where `DATA_READY` webhooks hand sessions over to the fetch worker.
    pub fetch_queue: FetchQueue,
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database by adding the tables for the domain models.
    /// `provider` should already be wrapped in a
    /// [RetryingProvider](crate::provider::RetryingProvider) if retries are wanted.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn new(
        db_connection: Connection,
        provider: Arc<dyn ProviderGateway>,
        config: AggregatorConfig,
        fetch_queue: FetchQueue,
    ) -> Result<Self, Error> {
        initialize(&db_connection)?;

        Ok(Self {
            db_connection: Arc::new(Mutex::new(db_connection)),
            provider,
            config: Arc::new(config),
            fetch_queue,
        })
    }

    /// The part of the state that the ingestion pipeline needs, e.g. for the fetch worker.
    pub fn pipeline(&self) -> PipelineState {
        PipelineState::from_ref(self)
    }
}

/// The state needed to drive consents, sessions and ingestion.
#[derive(Clone)]
pub struct PipelineState {
    pub db_connection: Arc<Mutex<Connection>>,
    pub provider: Arc<dyn ProviderGateway>,
    pub config: Arc<AggregatorConfig>,
}

impl FromRef<AppState> for PipelineState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            provider: state.provider.clone(),
            config: state.config.clone(),
        }
    }
}
