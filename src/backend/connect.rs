//! Inference backend discovery and channel construction.
//!
//! The bridge (and any reconciler resolving provider/model) discovers the
//! first ready Instance, reads its credentials from referenced secrets,
//! and dials `<name>.<namespace>.svc.cluster.local:<port>` with HTTP/2
//! keepalive.

use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use std::time::Duration;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};

use crate::api::Instance;
use crate::error::Result;

const KEEPALIVE_PING: Duration = Duration::from_secs(10);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(3);
const CA_SECRET_KEY: &str = "ca.crt";
const DEFAULT_TOKEN_KEY: &str = "token";

/// Everything needed to dial one inference server.
#[derive(Debug, Clone)]
pub struct ConnectionOpts {
    /// `host:port` of the in-cluster service.
    pub address: String,
    /// CA bundle for TLS, when the instance serves TLS.
    pub tls_ca_pem: Option<Vec<u8>>,
    /// Bearer token attached to every RPC.
    pub token: Option<String>,
}

impl ConnectionOpts {
    fn scheme(&self) -> &'static str {
        if self.tls_ca_pem.is_some() {
            "https"
        } else {
            "http"
        }
    }
}

/// Find the first Instance marked ready, across all namespaces.
pub async fn first_ready_instance(client: Client) -> Result<Option<Instance>> {
    let instances: Api<Instance> = Api::all(client);
    let list = instances.list(&ListParams::default()).await?;
    Ok(list.items.into_iter().find(Instance::is_ready))
}

/// Build connection options for a discovered instance, reading TLS and
/// token material from its referenced secrets.
pub async fn connection_opts(client: Client, instance: &Instance) -> Result<ConnectionOpts> {
    let name = instance.name_any();
    let namespace = instance.namespace().unwrap_or_else(|| "default".into());
    let address = format!(
        "{}.{}.svc.cluster.local:{}",
        name,
        namespace,
        instance.port()
    );

    let secrets: Api<Secret> = Api::namespaced(client, &namespace);

    let tls_ca_pem = match instance.spec.tls.as_ref() {
        Some(tls) if tls.enabled => match tls.secret_name.as_deref() {
            Some(secret_name) => read_secret_key(&secrets, secret_name, CA_SECRET_KEY).await?,
            None => None,
        },
        _ => None,
    };

    let token = match instance.spec.auth.as_ref() {
        Some(auth) => match auth.secret_name.as_deref() {
            Some(secret_name) => {
                let key = auth.secret_key.as_deref().unwrap_or(DEFAULT_TOKEN_KEY);
                read_secret_key(&secrets, secret_name, key)
                    .await?
                    .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            }
            None => None,
        },
        None => None,
    };

    Ok(ConnectionOpts {
        address,
        tls_ca_pem,
        token,
    })
}

async fn read_secret_key(
    secrets: &Api<Secret>,
    name: &str,
    key: &str,
) -> Result<Option<Vec<u8>>> {
    let secret = match secrets.get_opt(name).await? {
        Some(s) => s,
        None => return Ok(None),
    };
    Ok(secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|bytes| bytes.0.clone()))
}

/// Dial the backend with keepalive and optional TLS.
pub async fn connect(opts: &ConnectionOpts) -> Result<Channel> {
    let uri = format!("{}://{}", opts.scheme(), opts.address);
    let mut endpoint = Endpoint::from_shared(uri)?
        .http2_keep_alive_interval(KEEPALIVE_PING)
        .keep_alive_timeout(KEEPALIVE_TIMEOUT)
        .keep_alive_while_idle(true);

    if let Some(ca) = &opts.tls_ca_pem {
        let host = opts
            .address
            .split(':')
            .next()
            .unwrap_or(&opts.address)
            .to_string();
        let tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(ca.clone()))
            .domain_name(host);
        endpoint = endpoint.tls_config(tls)?;
    }

    Ok(endpoint.connect().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{InstanceSpec, InstanceStatus};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scheme_follows_tls() {
        let mut opts = ConnectionOpts {
            address: "chatcli.default.svc.cluster.local:50051".into(),
            tls_ca_pem: None,
            token: None,
        };
        assert_eq!(opts.scheme(), "http");
        opts.tls_ca_pem = Some(b"pem".to_vec());
        assert_eq!(opts.scheme(), "https");
    }

    #[test]
    fn test_ready_filter() {
        let mut ready = Instance::new("a", InstanceSpec::default());
        ready.status = Some(InstanceStatus { ready: true });
        let unready = Instance::new("b", InstanceSpec::default());
        assert!(ready.is_ready());
        assert!(!unready.is_ready());
    }
}
