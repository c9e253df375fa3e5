pub mod types;
pub mod responses;
pub mod contracts;
pub mod endpoints;
pub mod error;
pub mod auth;
pub mod context;
pub mod dynamo;
pub mod users;
pub mod products;
pub mod inventory;
pub mod forms;
pub mod reports;

use aws_sdk_dynamodb::Client as DynamoClient;
use dynamo::Tables;
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub dynamo_client: DynamoClient,
    pub tables: Tables,
    pub jwt_secret: Vec<u8>,
}

impl AppState {
    pub fn new(dynamo_client: DynamoClient, tables: Tables, jwt_secret: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            dynamo_client,
            tables,
            jwt_secret,
        })
    }

    /// Clients from the loaded AWS config, tables and secret from the environment
    pub fn from_env(config: &aws_config::SdkConfig) -> Result<Arc<Self>, std::env::VarError> {
        let jwt_secret = std::env::var("JWT_SECRET")?;
        Ok(Self::new(
            DynamoClient::new(config),
            Tables::from_env(),
            jwt_secret.into_bytes(),
        ))
    }
}
