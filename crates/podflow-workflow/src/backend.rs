//! Backend seam for connection CRUD.

use crate::request::{RequestError, SocketRequester};
use async_trait::async_trait;
use podflow_core::events::{
    CONNECTION_CREATE, CONNECTION_CREATED, CONNECTION_DELETE, CONNECTION_DELETED, CONNECTION_LIST,
    CONNECTION_LIST_RESULT, CONNECTION_UPDATE, CONNECTION_UPDATED,
};
use podflow_core::payloads::{
    ConnectionListPayload, ConnectionPayload, CreateConnectionRequest, DeleteConnectionRequest,
    ListConnectionsRequest, UpdateConnectionRequest,
};
use podflow_core::Connection;
use serde_json::Value;

#[async_trait]
pub trait ConnectionBackend: Send + Sync {
    async fn create(&self, request: CreateConnectionRequest) -> Result<Connection, RequestError>;
    async fn update_trigger_mode(
        &self,
        request: UpdateConnectionRequest,
    ) -> Result<Connection, RequestError>;
    async fn delete(&self, request: DeleteConnectionRequest) -> Result<(), RequestError>;
    async fn list(&self, request: ListConnectionsRequest) -> Result<Vec<Connection>, RequestError>;
}

/// [`ConnectionBackend`] speaking the `connection:*` socket events.
#[derive(Clone)]
pub struct SocketConnectionBackend {
    requester: SocketRequester,
}

impl SocketConnectionBackend {
    pub fn new(requester: SocketRequester) -> Self {
        Self { requester }
    }

    pub fn requester(&self) -> &SocketRequester {
        &self.requester
    }
}

#[async_trait]
impl ConnectionBackend for SocketConnectionBackend {
    async fn create(&self, request: CreateConnectionRequest) -> Result<Connection, RequestError> {
        let payload: ConnectionPayload = self
            .requester
            .request_as(CONNECTION_CREATE, CONNECTION_CREATED, &request)
            .await?;
        Ok(payload.connection)
    }

    async fn update_trigger_mode(
        &self,
        request: UpdateConnectionRequest,
    ) -> Result<Connection, RequestError> {
        let payload: ConnectionPayload = self
            .requester
            .request_as(CONNECTION_UPDATE, CONNECTION_UPDATED, &request)
            .await?;
        Ok(payload.connection)
    }

    async fn delete(&self, request: DeleteConnectionRequest) -> Result<(), RequestError> {
        let _: Value = self
            .requester
            .request_as(CONNECTION_DELETE, CONNECTION_DELETED, &request)
            .await?;
        Ok(())
    }

    async fn list(&self, request: ListConnectionsRequest) -> Result<Vec<Connection>, RequestError> {
        let payload: ConnectionListPayload = self
            .requester
            .request_as(CONNECTION_LIST, CONNECTION_LIST_RESULT, &request)
            .await?;
        Ok(payload.connections)
    }
}
