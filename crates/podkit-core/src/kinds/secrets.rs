// ── Secrets ──

use podkit_api::{Request, quote};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::created_id;
use crate::entity::{Attrs, Entity};
use crate::error::{CoreError, ResultExt};
use crate::manager::{Manager, RemoveOptions, ResourceKind};

#[derive(Debug, Clone, Copy)]
pub struct Secrets;

pub type Secret = Entity<Secrets>;
pub type SecretsManager = Manager<Secrets>;

impl ResourceKind for Secrets {
    const NAME: &'static str = "secret";
    const COLLECTION: &'static str = "secrets";
    const ID_KEYS: &'static [&'static str] = &["ID"];

    /// There is no dedicated exists endpoint; inspect answers 404 just the same.
    fn exists_request(key: &str) -> Request {
        Self::inspect_request(key)
    }

    fn remove_request(key: &str, _options: &RemoveOptions) -> Request {
        Request::delete(format!("/secrets/{}", quote(key)))
    }

    fn name_of(attrs: &Attrs) -> Option<&str> {
        attrs.pointer("/Spec/Name").and_then(Value::as_str)
    }
}

impl Manager<Secrets> {
    /// Store a secret. The value is sent as the raw request body.
    pub async fn create(
        &self,
        name: &str,
        data: &SecretString,
        driver: Option<&str>,
    ) -> Result<Secret, CoreError> {
        if name.is_empty() {
            return Err(CoreError::invalid("secret needs a name"));
        }
        let request = Request::post("/secrets/create")
            .query("name", name)
            .query_opt("driver", driver)
            .bytes(
                data.expose_secret().as_bytes().to_vec(),
                "application/octet-stream",
            );
        let created: Value = self
            .api()
            .send_json(request)
            .await
            .context("create", Secrets::NAME, Some(name))?;
        self.get(&created_id(&created)?).await
    }
}
