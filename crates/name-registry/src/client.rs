//! WebSocket client for the name server
//!
//! Used by providers to advertise themselves and by clients to discover
//! providers. One request is in flight per call; responses are correlated
//! by request id.

use crate::{
    error::{Error, Result},
    models::*,
};
use async_net::TcpStream;
use async_tungstenite::{WebSocketStream, client_async};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use tracing::{debug, info};
use tungstenite::Message;
use uuid::Uuid;

/// Name server client
pub struct NsClient {
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
}

impl NsClient {
    /// Connect to a name server
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let url = format!("ws://{}", addr);
        let stream = TcpStream::connect(addr).await?;
        let (ws, _) = client_async(&url, stream).await?;

        info!("Connected to name server at {}", addr);

        Ok(Self { ws, addr })
    }

    /// Ping the name server itself
    pub async fn ping(&mut self) -> Result<bool> {
        self.call(Action::Ping, serde_json::Value::Null).await
    }

    /// Fetch the name server's own provider descriptor
    pub async fn info(&mut self) -> Result<ServiceProviderInfo> {
        self.call(Action::Info, serde_json::Value::Null).await
    }

    /// Register an advertisement
    pub async fn register(&mut self, support: &ServiceSupportInfo) -> Result<bool> {
        self.call(Action::Register, serde_json::to_value(support)?)
            .await
    }

    /// Remove one (service, provider) advertisement
    pub async fn unregister(
        &mut self,
        service: &ServiceInfo,
        provider: &ServiceProviderInfo,
    ) -> Result<bool> {
        let params = serde_json::json!({ "service": service, "provider": provider });
        self.call(Action::Unregister, params).await
    }

    /// Remove every advertisement of a provider
    pub async fn unregister_all(&mut self, provider: &ServiceProviderInfo) -> Result<bool> {
        let params = serde_json::json!({ "provider": provider });
        self.call(Action::UnregisterAll, params).await
    }

    /// Ask the name server to probe a provider, evicting it if unreachable
    pub async fn check_provider_status(
        &mut self,
        provider: &ServiceProviderInfo,
    ) -> Result<bool> {
        let params = serde_json::json!({ "provider": provider });
        self.call(Action::CheckProviderStatus, params).await
    }

    /// Look up a service by id
    pub async fn get_service_info_by_id(&mut self, id: i64) -> Result<Option<ServiceInfo>> {
        self.call(Action::GetServiceInfoById, serde_json::json!({ "id": id }))
            .await
    }

    /// Look up a service by name
    pub async fn get_service_info_by_name(&mut self, name: &str) -> Result<Option<ServiceInfo>> {
        self.call(Action::GetServiceInfoByName, serde_json::json!({ "name": name }))
            .await
    }

    /// Earliest-registered provider for a service
    pub async fn get_provider(
        &mut self,
        service: &ServiceInfo,
    ) -> Result<Option<ServiceSupportInfo>> {
        self.call(Action::GetProvider, serde_json::json!({ "service": service }))
            .await
    }

    /// All providers for a service, in registration order
    pub async fn get_providers(
        &mut self,
        service: &ServiceInfo,
    ) -> Result<Vec<ServiceSupportInfo>> {
        self.call(Action::GetProviders, serde_json::json!({ "service": service }))
            .await
    }

    /// Every advertisement, in registration order
    pub async fn get_all_providers(&mut self) -> Result<Vec<ServiceSupportInfo>> {
        self.call(Action::GetAllProviders, serde_json::Value::Null)
            .await
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.ws.send(Message::Close(None)).await?;
        Ok(())
    }

    /// Issue one request and wait for its response
    async fn call<T: DeserializeOwned>(
        &mut self,
        action: Action,
        params: serde_json::Value,
    ) -> Result<T> {
        let id = Uuid::new_v4().to_string();
        let request = WsMessage::Request {
            id: id.clone(),
            action,
            params,
        };

        let json = serde_json::to_string(&request)?;
        self.ws.send(Message::Text(json.into())).await?;

        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let msg: WsMessage = serde_json::from_str(&text)?;
                    match msg {
                        WsMessage::Response {
                            id: response_id,
                            data,
                            error,
                        } if response_id == id => {
                            if let Some(err) = error {
                                return Err(Error::from_wire(&err.code, err.message));
                            }
                            let data = data.unwrap_or(serde_json::Value::Null);
                            return Ok(serde_json::from_value(data)?);
                        }
                        other => {
                            debug!("Ignoring unrelated message from {}: {:?}", self.addr, other);
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    self.ws.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(Error::Protocol(
                        "connection closed before response".to_string(),
                    ));
                }
                Some(Ok(_)) => {
                    // Ignore other message types
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}
