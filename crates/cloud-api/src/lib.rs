//! Client for the team backend that stores field data.
//!
//! Every entity kind is exposed under `/entities/{kind}`, scoped by a team id:
//! `GET ?scope=` lists, `POST` upserts one record, `DELETE ?localId=` removes one.

use std::time::Duration;

use async_trait::async_trait;
use sb_sync::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub use reqwest::StatusCode;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthToken {
	pub token_type: String,
	pub access_token: String,
}

impl AuthToken {
	pub fn bearer(access_token: impl Into<String>) -> Self {
		Self {
			token_type: "Bearer".to_string(),
			access_token: access_token.into(),
		}
	}
}

pub struct RequestConfig {
	pub client: reqwest::Client,
	pub api_url: String,
	pub auth_token: Option<AuthToken>,
}

impl RequestConfig {
	/// Builds a client whose every request gives up after `timeout`.
	pub fn new(
		api_url: impl Into<String>,
		timeout: Duration,
		auth_token: Option<AuthToken>,
	) -> Result<Self, Error> {
		let api_url = api_url.into();
		if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
			return Err(Error::InvalidUrl(api_url));
		}

		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(Error::Client)?;

		Ok(Self {
			client,
			api_url: api_url.trim_end_matches('/').to_string(),
			auth_token,
		})
	}

	fn entities_url(&self, kind: EntityKind) -> String {
		format!("{}/entities/{kind}", self.api_url)
	}
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("request to {url} failed: {source}")]
	Request {
		url: String,
		#[source]
		source: reqwest::Error,
	},
	#[error("{url} answered {status}")]
	Status { url: String, status: StatusCode },
	#[error("unexpected response body from {url}: {source}")]
	Decode {
		url: String,
		#[source]
		source: serde_json::Error,
	},
	#[error("invalid api url '{0}'")]
	InvalidUrl(String),
	#[error("failed to build http client: {0}")]
	Client(#[source] reqwest::Error),
}

/// What the backend answers an upsert with.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertAck {
	#[serde(default)]
	pub id: Option<i64>,
}

/// The remote store as the sync engine sees it.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
	/// Every record of `kind` visible to `scope`, as raw JSON so that one bad
	/// record can be skipped without losing the rest.
	async fn list(&self, kind: EntityKind, scope: &str) -> Result<Vec<Value>, Error>;

	async fn upsert(&self, kind: EntityKind, scope: &str, record: &Value) -> Result<UpsertAck, Error>;

	async fn delete(&self, kind: EntityKind, local_id: &str) -> Result<(), Error>;
}

/// Adds the `scope` field the backend expects on every upserted record.
pub fn with_scope(record: &Value, scope: &str) -> Value {
	let mut body = record.clone();
	if let Value::Object(map) = &mut body {
		map.insert("scope".to_string(), Value::String(scope.to_string()));
	}
	body
}

trait WithAuth {
	fn with_auth(self, token: Option<&AuthToken>) -> Self;
}

impl WithAuth for reqwest::RequestBuilder {
	fn with_auth(self, token: Option<&AuthToken>) -> Self {
		match token {
			Some(token) => self.header(
				"authorization",
				format!("{} {}", token.token_type, token.access_token),
			),
			None => self,
		}
	}
}

/// Reads the whole response body. A connection dropped mid-body is a request error.
async fn read_body(url: &str, res: reqwest::Response) -> Result<Vec<u8>, Error> {
	res.bytes()
		.await
		.map(|body| body.to_vec())
		.map_err(|source| Error::Request {
			url: url.to_string(),
			source,
		})
}

/// Decodes an upsert answer. Some deployments answer 204 without a body, there is
/// simply no id then. Anything else has to be a valid ack.
fn decode_ack(url: &str, body: &[u8]) -> Result<UpsertAck, Error> {
	if body.iter().all(u8::is_ascii_whitespace) {
		return Ok(UpsertAck::default());
	}

	serde_json::from_slice(body).map_err(|source| Error::Decode {
		url: url.to_string(),
		source,
	})
}

async fn send(url: &str, req: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
	let res = req.send().await.map_err(|source| Error::Request {
		url: url.to_string(),
		source,
	})?;

	let status = res.status();
	if status.is_success() {
		Ok(res)
	} else {
		Err(Error::Status {
			url: url.to_string(),
			status,
		})
	}
}

pub mod entities {
	use super::*;

	pub use list::exec as list;
	pub mod list {
		use super::*;

		pub type Response = Vec<Value>;

		pub async fn exec(
			config: &RequestConfig,
			kind: EntityKind,
			scope: &str,
		) -> Result<Response, Error> {
			let url = config.entities_url(kind);

			let res = send(
				&url,
				config
					.client
					.get(&url)
					.query(&[("scope", scope)])
					.with_auth(config.auth_token.as_ref()),
			)
			.await?;

			let body = read_body(&url, res).await?;

			serde_json::from_slice(&body).map_err(|source| Error::Decode { url, source })
		}
	}

	pub use upsert::exec as upsert;
	pub mod upsert {
		use super::*;

		pub type Response = UpsertAck;

		pub async fn exec(
			config: &RequestConfig,
			kind: EntityKind,
			scope: &str,
			record: &Value,
		) -> Result<Response, Error> {
			let url = config.entities_url(kind);

			let res = send(
				&url,
				config
					.client
					.post(&url)
					.json(&with_scope(record, scope))
					.with_auth(config.auth_token.as_ref()),
			)
			.await?;

			let body = read_body(&url, res).await?;

			decode_ack(&url, &body)
		}
	}

	pub use delete::exec as delete;
	pub mod delete {
		use super::*;

		pub async fn exec(config: &RequestConfig, kind: EntityKind, local_id: &str) -> Result<(), Error> {
			let url = config.entities_url(kind);

			send(
				&url,
				config
					.client
					.delete(&url)
					.query(&[("localId", local_id)])
					.with_auth(config.auth_token.as_ref()),
			)
			.await
			.map(|_| ())
		}
	}
}

/// [`RemoteGateway`] over HTTP.
pub struct HttpGateway {
	config: RequestConfig,
}

impl HttpGateway {
	pub const fn new(config: RequestConfig) -> Self {
		Self { config }
	}
}

#[async_trait]
impl RemoteGateway for HttpGateway {
	async fn list(&self, kind: EntityKind, scope: &str) -> Result<Vec<Value>, Error> {
		debug!(%kind, %scope, "Listing remote entities;");
		entities::list(&self.config, kind, scope).await
	}

	async fn upsert(&self, kind: EntityKind, scope: &str, record: &Value) -> Result<UpsertAck, Error> {
		entities::upsert(&self.config, kind, scope, record).await
	}

	async fn delete(&self, kind: EntityKind, local_id: &str) -> Result<(), Error> {
		debug!(%kind, %local_id, "Deleting remote entity;");
		entities::delete(&self.config, kind, local_id).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn scope_is_added_to_objects() {
		let body = with_scope(&json!({ "localId": "a", "pairLocalId": "p1" }), "team-7");

		assert_eq!(
			body,
			json!({ "localId": "a", "pairLocalId": "p1", "scope": "team-7" })
		);
	}

	#[test]
	fn urls_are_built_per_kind() {
		let config = RequestConfig::new("https://field.example/api/", Duration::from_secs(5), None)
			.expect("valid config");

		assert_eq!(
			config.entities_url(EntityKind::ShotPairPoints),
			"https://field.example/api/entities/shot_pair_points"
		);
	}

	#[test]
	fn rejects_non_http_urls() {
		assert!(matches!(
			RequestConfig::new("ftp://nope", Duration::from_secs(1), None),
			Err(Error::InvalidUrl(_))
		));
	}

	#[test]
	fn ack_without_id() {
		let ack: UpsertAck = serde_json::from_value(json!({})).expect("deserializes");
		assert_eq!(ack, UpsertAck { id: None });
	}

	#[test]
	fn empty_upsert_answer_has_no_id() {
		let url = "https://field.example/api/entities/finds";

		assert_eq!(decode_ack(url, b"").expect("empty body"), UpsertAck::default());
		assert_eq!(decode_ack(url, b" \n").expect("blank body"), UpsertAck::default());
		assert_eq!(
			decode_ack(url, br#"{"id":5}"#).expect("valid ack"),
			UpsertAck { id: Some(5) }
		);
	}

	#[test]
	fn garbled_upsert_answer_is_a_decode_error() {
		let url = "https://field.example/api/entities/finds";

		for body in [r#"{"id":"abc"}"#, "<html>502</html>", "{"] {
			assert!(matches!(
				decode_ack(url, body.as_bytes()),
				Err(Error::Decode { .. })
			));
		}
	}

	#[tokio::test]
	async fn unreachable_backend_is_a_request_error() {
		// nothing listens on port 9 (discard) on loopback in test environments
		let config = RequestConfig::new("http://127.0.0.1:9", Duration::from_millis(500), None)
			.expect("valid config");

		let err = HttpGateway::new(config)
			.list(EntityKind::Tracks, "team")
			.await
			.expect_err("no backend is running");

		assert!(matches!(err, Error::Request { .. }));
	}
}
