//! Request/reply channels between replicas and the coordinator
//!
//! Replicas pull layouts through a [`LayoutSource`]; the coordinator pushes
//! writes and notifications through a [`ReplicaTransport`]. The HTTP
//! implementations speak the JSON routes in [`crate::routes`]; in-process
//! implementations live next to the types they wrap.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use pirlog_core::wire::{GetLayoutArgs, GetLayoutReply, NotifyArgs, NotifyReply, WriteArgs, WriteReply};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, ServerError};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a replica fetches layouts from
pub trait LayoutSource: Send + Sync {
    fn get_layout<'a>(
        &'a self,
        addr: &'a str,
        args: GetLayoutArgs,
    ) -> BoxFuture<'a, Result<GetLayoutReply>>;
}

/// The coordinator's handle on one replica
pub trait ReplicaTransport: Send + Sync {
    /// Human-readable target for logs
    fn target(&self) -> &str;

    fn write(&self, args: WriteArgs) -> BoxFuture<'_, Result<WriteReply>>;

    fn notify(&self, args: NotifyArgs) -> BoxFuture<'_, Result<NotifyReply>>;
}

fn http_client() -> Result<Client> {
    Ok(Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

async fn post_json<A, R>(http: &Client, url: String, args: &A) -> Result<R>
where
    A: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let resp = http.post(&url).json(args).send().await?;
    if !resp.status().is_success() {
        return Err(ServerError::Remote {
            addr: url,
            reason: format!("HTTP {}", resp.status()),
        });
    }
    Ok(resp.json().await?)
}

/// Fetch layouts over HTTP from `POST {addr}/layout`
pub struct HttpLayoutSource {
    http: Client,
}

impl HttpLayoutSource {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: http_client()?,
        })
    }
}

impl LayoutSource for HttpLayoutSource {
    fn get_layout<'a>(
        &'a self,
        addr: &'a str,
        args: GetLayoutArgs,
    ) -> BoxFuture<'a, Result<GetLayoutReply>> {
        async move {
            let url = format!("{}/layout", addr.trim_end_matches('/'));
            post_json(&self.http, url, &args).await
        }
        .boxed()
    }
}

/// A replica reached over HTTP
pub struct HttpReplica {
    base_url: String,
    http: Client,
}

impl HttpReplica {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: http_client()?,
        })
    }
}

impl ReplicaTransport for HttpReplica {
    fn target(&self) -> &str {
        &self.base_url
    }

    fn write(&self, args: WriteArgs) -> BoxFuture<'_, Result<WriteReply>> {
        async move { post_json(&self.http, format!("{}/write", self.base_url), &args).await }
            .boxed()
    }

    fn notify(&self, args: NotifyArgs) -> BoxFuture<'_, Result<NotifyReply>> {
        async move { post_json(&self.http, format!("{}/notify", self.base_url), &args).await }
            .boxed()
    }
}
