//! WebSocket dispatcher for the name server
//!
//! Decodes incoming requests, invokes the registry engine, and returns the
//! outcome as a JSON response. One request/response per call; no call
//! depends on prior connection state.

use crate::{
    error::{Error, Result},
    models::*,
    probe::LivenessProbe,
    registry::Registry,
};
use async_net::{TcpListener, TcpStream};
use async_tungstenite::{WebSocketStream, accept_async};
use futures::StreamExt;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tungstenite::Message;

/// WebSocket name server
pub struct WsServer {
    registry: Arc<Registry>,
    prober: Arc<dyn LivenessProbe>,
    /// The name server's own provider descriptor, returned by `Info`
    info: ServiceProviderInfo,
    /// The TCP listener
    pub listener: TcpListener,
}

impl WsServer {
    /// Bind a name server to the given address
    pub async fn bind(
        addr: impl AsRef<str>,
        registry: Registry,
        prober: Arc<dyn LivenessProbe>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr.as_ref()).await?;
        let local = listener.local_addr()?;
        info!("Name server listening on {}", local);

        let info = ServiceProviderInfo::new(
            local.ip().to_string(),
            local.port(),
            EnvironmentInfo::current(),
        );

        Ok(Self {
            registry: Arc::new(registry),
            prober,
            info,
            listener,
        })
    }

    /// Accept a new connection
    pub async fn accept(&self) -> Result<ConnectionHandler> {
        let (tcp_stream, addr) = self.listener.accept().await?;
        let ws = accept_async(tcp_stream).await?;

        debug!("New connection from {}", addr);

        Ok(ConnectionHandler {
            ws,
            addr,
            registry: self.registry.clone(),
            prober: self.prober.clone(),
            info: self.info.clone(),
        })
    }

    /// Get the registry reference
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The name server's own provider descriptor
    pub fn info(&self) -> &ServiceProviderInfo {
        &self.info
    }
}

/// Handler for one client connection
pub struct ConnectionHandler {
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    registry: Arc<Registry>,
    prober: Arc<dyn LivenessProbe>,
    info: ServiceProviderInfo,
}

#[derive(Deserialize)]
struct UnregisterParams {
    service: ServiceInfo,
    provider: ServiceProviderInfo,
}

#[derive(Deserialize)]
struct ProviderParams {
    provider: ServiceProviderInfo,
}

#[derive(Deserialize)]
struct ServiceParams {
    service: ServiceInfo,
}

#[derive(Deserialize)]
struct IdParams {
    id: i64,
}

#[derive(Deserialize)]
struct NameParams {
    name: String,
}

impl ConnectionHandler {
    /// Handle the connection
    pub async fn handle(mut self) -> Result<()> {
        debug!("Handling connection from {}", self.addr);

        while let Some(msg) = self.ws.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Err(e) = self.process_text_message(&text).await {
                        error!("Error processing message: {}", e);
                        self.send_error_response("", &e).await?;
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("Client {} closing connection", self.addr);
                    break;
                }
                Ok(Message::Ping(data)) => {
                    self.ws.send(Message::Pong(data)).await?;
                }
                Ok(_) => {
                    // Ignore other message types
                }
                Err(e) => {
                    error!("WebSocket error from {}: {}", self.addr, e);
                    break;
                }
            }
        }

        debug!("Connection from {} closed", self.addr);
        Ok(())
    }

    /// Process a text message
    async fn process_text_message(&mut self, text: &str) -> Result<()> {
        let msg: WsMessage = serde_json::from_str(text)?;

        match msg {
            WsMessage::Request { id, action, params } => {
                self.handle_request(&id, action, params).await?;
            }
            _ => {
                warn!("Unexpected message type from client {}", self.addr);
            }
        }

        Ok(())
    }

    /// Handle a request
    async fn handle_request(
        &mut self,
        id: &str,
        action: Action,
        params: serde_json::Value,
    ) -> Result<()> {
        debug!("Request {}: {:?}", id, action);

        let response = match action {
            Action::Ping => Ok(serde_json::Value::Bool(true)),
            Action::Info => Ok(serde_json::to_value(&self.info)?),
            Action::Register => self.handle_register(params).await,
            Action::Unregister => self.handle_unregister(params).await,
            Action::UnregisterAll => self.handle_unregister_all(params).await,
            Action::CheckProviderStatus => self.handle_check_provider_status(params).await,
            Action::GetServiceInfoById => self.handle_get_service_info_by_id(params).await,
            Action::GetServiceInfoByName => self.handle_get_service_info_by_name(params).await,
            Action::GetProvider => self.handle_get_provider(params).await,
            Action::GetProviders => self.handle_get_providers(params).await,
            Action::GetAllProviders => self.handle_get_all_providers().await,
        };

        match response {
            Ok(data) => self.send_response(id, data).await?,
            Err(e) => self.send_error_response(id, &e).await?,
        }

        Ok(())
    }

    async fn handle_register(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        let support: ServiceSupportInfo = serde_json::from_value(params)?;
        self.registry.register(support).await?;
        Ok(serde_json::Value::Bool(true))
    }

    async fn handle_unregister(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        let params: UnregisterParams = serde_json::from_value(params)?;
        let removed = self
            .registry
            .unregister(&params.service, &params.provider)
            .await?;
        Ok(serde_json::Value::Bool(removed))
    }

    async fn handle_unregister_all(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        let params: ProviderParams = serde_json::from_value(params)?;
        let removed = self.registry.unregister_all(&params.provider).await?;
        Ok(serde_json::Value::Bool(removed))
    }

    async fn handle_check_provider_status(
        &self,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let params: ProviderParams = serde_json::from_value(params)?;
        let evicted = self
            .registry
            .check_provider_status(self.prober.as_ref(), &params.provider)
            .await?;
        Ok(serde_json::Value::Bool(evicted))
    }

    async fn handle_get_service_info_by_id(
        &self,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let params: IdParams = serde_json::from_value(params)?;
        let service = self.registry.get_service_info_by_id(params.id).await;
        Ok(serde_json::to_value(service)?)
    }

    async fn handle_get_service_info_by_name(
        &self,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let params: NameParams = serde_json::from_value(params)?;
        let service = self.registry.get_service_info_by_name(&params.name).await;
        Ok(serde_json::to_value(service)?)
    }

    async fn handle_get_provider(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        let params: ServiceParams = serde_json::from_value(params)?;
        let provider = self.registry.get_provider(&params.service).await;
        Ok(serde_json::to_value(provider)?)
    }

    async fn handle_get_providers(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        let params: ServiceParams = serde_json::from_value(params)?;
        let providers = self.registry.get_providers(&params.service).await;
        Ok(serde_json::to_value(providers)?)
    }

    async fn handle_get_all_providers(&self) -> Result<serde_json::Value> {
        let providers = self.registry.get_all_providers().await;
        Ok(serde_json::to_value(providers)?)
    }

    /// Send a response
    async fn send_response(&mut self, id: &str, data: serde_json::Value) -> Result<()> {
        let msg = WsMessage::Response {
            id: id.to_string(),
            data: Some(data),
            error: None,
        };

        self.send_message(&msg).await
    }

    /// Send an error response
    async fn send_error_response(&mut self, id: &str, error: &Error) -> Result<()> {
        let msg = WsMessage::Response {
            id: id.to_string(),
            data: None,
            error: Some(ErrorInfo {
                code: error.code().to_string(),
                message: error.to_string(),
            }),
        };

        self.send_message(&msg).await
    }

    /// Send a message
    async fn send_message(&mut self, msg: &WsMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.ws.send(Message::Text(json.into())).await?;
        Ok(())
    }
}
