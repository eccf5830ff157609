use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use russh_keys::key::KeyPair;
use russh_keys::PublicKeyBase64;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// The proxy's two signing keys: one to authenticate itself to clients (the host key),
/// one to authenticate itself to freshly provisioned workers (the client key).
pub struct KeyMaterial {
    pub host_key: KeyPair,
    pub client_key: KeyPair,
}

impl KeyMaterial {
    /// Loads the host key from `host_key_path` if given and present, otherwise generates a
    /// fresh one. The client key is always freshly generated for the life of the process.
    pub fn load_or_generate(host_key_path: Option<&Path>) -> Result<Self> {
        let host_key = match host_key_path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading host key from disk");
                russh_keys::load_secret_key(path, None).context("failed to load host key")?
            }
            _ => {
                info!("generating fresh host key");
                KeyPair::generate_rsa(2048, russh_keys::key::SignatureHash::SHA2_256)
                    .context("failed to generate host key")?
            }
        };

        info!("generating fresh client key for worker authentication");
        let client_key = KeyPair::generate_rsa(2048, russh_keys::key::SignatureHash::SHA2_256)
            .context("failed to generate client key")?;

        Ok(KeyMaterial {
            host_key,
            client_key,
        })
    }

    /// Renders the client public key in single-line `authorized_keys` form. We only ever
    /// generate RSA keys, so the key type is fixed rather than derived at runtime.
    pub fn client_authorized_keys_line(&self) -> String {
        format!("ssh-rsa {}", self.client_key.public_key_base64())
    }

    /// Publishes the client public key into the namespaced secret workers mount as their
    /// `~/.ssh/authorized_keys`, overwriting any previous value on every proxy start.
    pub async fn publish_authorized_keys(
        &self,
        client: Client,
        namespace: &str,
        secret_name: &str,
    ) -> Result<()> {
        let secrets: Api<Secret> = Api::namespaced(client, namespace);
        let line = self.client_authorized_keys_line();

        let mut data = BTreeMap::new();
        data.insert("authorized_keys".to_string(), ByteString(line.into_bytes()));

        let secret: Secret = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": secret_name,
                "namespace": namespace,
                "labels": { "app": "nix-remote-build-proxy" },
            },
            "type": "Opaque",
        }))?;

        let mut secret = secret;
        secret.data = Some(data);

        let patch = Patch::Apply(&secret);
        let pp = PatchParams::apply("nix-remote-build-proxy").force();
        secrets
            .patch(secret_name, &pp, &patch)
            .await
            .context("failed to publish authorized_keys secret")?;

        info!(secret = secret_name, namespace, "published authorized_keys secret");
        Ok(())
    }
}
