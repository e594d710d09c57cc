use std::net::IpAddr;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::errors::SessionError;

/// Role requested for every participant joining through this client.
const GUEST_ROLE: &str = "guest";

#[derive(Debug, Serialize)]
struct TokenRequestBody<'a> {
    room_id: &'a str,
    user_name: &'a str,
    role: &'a str,
    env: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

/// Short-lived session token returned by the token service.
#[derive(Debug, Clone)]
pub struct Token(SecretString);

impl Token {
    pub fn secret(&self) -> &SecretString {
        &self.0
    }
}

impl From<String> for Token {
    fn from(token: String) -> Self {
        Self(SecretString::from(token))
    }
}

/// Exchanges a room/user identity for a session token.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
}

impl TokenClient {
    pub fn new(timeout: Duration) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Config(format!("http client: {e}")))?;
        Ok(Self { http })
    }

    /// Request a token for `user_name` in `room_id`.
    ///
    /// `endpoint` is the media engine endpoint; its first host label is sent
    /// as `env`. Nothing goes on the wire unless both URLs validate.
    pub async fn fetch_token(
        &self,
        endpoint: &str,
        auth_service_url: &str,
        room_id: &str,
        user_name: &str,
    ) -> Result<Token, SessionError> {
        let env = Self::derive_env(endpoint)?;
        let token_url = Self::parse_auth_service_url(auth_service_url)?;
        if room_id.trim().is_empty() {
            return Err(SessionError::Config("room id is empty".into()));
        }
        if user_name.trim().is_empty() {
            return Err(SessionError::Config("user name is empty".into()));
        }

        let body = TokenRequestBody {
            room_id,
            user_name,
            role: GUEST_ROLE,
            env: &env,
        };

        tracing::info!("requesting token for room {room_id} (env={env}) from {token_url}");

        let resp = self
            .http
            .post(token_url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SessionError::Network(format!(
                "token service returned status {status}"
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SessionError::Network(e.to_string()))?;
        let data: TokenResponse = serde_json::from_slice(&bytes)
            .map_err(|e| SessionError::Protocol(format!("invalid token response: {e}")))?;

        match data.token {
            Some(token) if !token.is_empty() => {
                tracing::debug!("token received for room {room_id}");
                Ok(Token::from(token))
            }
            _ => Err(SessionError::Protocol(
                "token response has no `token` field".into(),
            )),
        }
    }

    /// Derive the token environment from the endpoint's subdomain.
    ///
    /// `wss://prod-in.confab.live` yields `prod-in`. Hosts with fewer than
    /// three labels and IP addresses have no subdomain.
    pub fn derive_env(endpoint: &str) -> Result<String, SessionError> {
        let url = Url::parse(endpoint.trim())
            .map_err(|e| SessionError::Config(format!("invalid endpoint '{endpoint}': {e}")))?;
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => {
                return Err(SessionError::Config(format!(
                    "endpoint '{endpoint}' has an IP host, no subdomain"
                )));
            }
            None => {
                return Err(SessionError::Config(format!(
                    "endpoint '{endpoint}' has no host"
                )));
            }
        };
        // Opaque hosts of non-special schemes are never decoded as IPs.
        if host.parse::<IpAddr>().is_ok() {
            return Err(SessionError::Config(format!(
                "endpoint '{endpoint}' has an IP host, no subdomain"
            )));
        }

        let labels: Vec<&str> = host.split('.').collect();
        match labels.as_slice() {
            [sub, _, _, ..] if labels.iter().all(|l| !l.is_empty()) => Ok(sub.to_string()),
            _ => Err(SessionError::Config(format!(
                "cannot derive subdomain from host '{host}'"
            ))),
        }
    }

    fn parse_auth_service_url(auth_service_url: &str) -> Result<Url, SessionError> {
        let url = Url::parse(auth_service_url.trim()).map_err(|e| {
            SessionError::Config(format!("invalid token URL '{auth_service_url}': {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
            return Err(SessionError::Config(format!(
                "token URL must be http(s) with a host, got '{auth_service_url}'"
            )));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ENDPOINT: &str = "wss://prod-in.confab.live";

    fn client() -> TokenClient {
        TokenClient::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn derive_env_from_subdomain() {
        assert_eq!(TokenClient::derive_env(ENDPOINT).unwrap(), "prod-in");
        assert_eq!(
            TokenClient::derive_env("https://qa.eu.confab.live/path").unwrap(),
            "qa"
        );
    }

    #[test]
    fn derive_env_rejects_hosts_without_subdomain() {
        for endpoint in [
            "wss://confab.live",
            "wss://localhost",
            "wss://10.0.0.1",
            "wss://[::1]",
            "not a url",
            "",
        ] {
            assert!(
                matches!(TokenClient::derive_env(endpoint), Err(SessionError::Config(_))),
                "{endpoint} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn malformed_urls_fail_without_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let token_url = format!("{}/token", server.uri());

        let cases = [
            ("::bad::", token_url.as_str()),
            ("wss://confab.live", token_url.as_str()),
            (ENDPOINT, "not a url"),
            (ENDPOINT, "ftp://auth.confab.live/token"),
            (ENDPOINT, "mailto:someone@confab.live"),
        ];
        for (endpoint, auth_url) in cases {
            let err = client()
                .fetch_token(endpoint, auth_url, "room-1", "alice")
                .await
                .unwrap_err();
            assert!(matches!(err, SessionError::Config(_)), "{endpoint} {auth_url}: {err}");
        }
    }

    #[tokio::test]
    async fn empty_room_or_user_is_config_error() {
        let server = MockServer::start().await;
        let token_url = format!("{}/token", server.uri());

        let err = client()
            .fetch_token(ENDPOINT, &token_url, " ", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));

        let err = client()
            .fetch_token(ENDPOINT, &token_url, "room-1", "")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[tokio::test]
    async fn posts_json_body_and_parses_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("content-type", "application/json"))
            .and(header("accept", "application/json"))
            .and(body_json(serde_json::json!({
                "room_id": "room-1",
                "user_name": "alice",
                "role": "guest",
                "env": "prod-in",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "tok-123"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let token = client()
            .fetch_token(ENDPOINT, &format!("{}/token", server.uri()), "room-1", "alice")
            .await
            .unwrap();
        assert_eq!(token.secret().expose_secret(), "tok-123");
    }

    #[tokio::test]
    async fn missing_token_field_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"msg": "ok"})),
            )
            .mount(&server)
            .await;

        let err = client()
            .fetch_token(ENDPOINT, &format!("{}/token", server.uri()), "room-1", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
    }

    #[tokio::test]
    async fn non_json_body_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hello</html>"))
            .mount(&server)
            .await;

        let err = client()
            .fetch_token(ENDPOINT, &format!("{}/token", server.uri()), "room-1", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
    }

    #[tokio::test]
    async fn non_success_status_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client()
            .fetch_token(ENDPOINT, &format!("{}/token", server.uri()), "room-1", "alice")
            .await
            .unwrap_err();
        match err {
            SessionError::Network(msg) => assert!(msg.contains("503"), "{msg}"),
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_service_is_network_error() {
        // Bind then drop a listener so its port refuses connections.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = client()
            .fetch_token(ENDPOINT, &format!("http://127.0.0.1:{port}/token"), "room-1", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Network(_)));
    }
}
