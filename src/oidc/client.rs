//! OIDC client implementation using the openidconnect crate.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use openidconnect::core::{
    CoreAuthenticationFlow, CoreClient, CoreIdToken, CoreProviderMetadata, CoreTokenResponse,
};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointMaybeSet, EndpointNotSet,
    EndpointSet, IssuerUrl, Nonce, OAuth2TokenResponse, RedirectUrl, RefreshToken, Scope,
};
use std::str::FromStr;
use std::time::Duration;

use super::{Claims, OidcProvider, ProviderError, TokenSet};
use crate::settings::OidcSettings;

type DiscoveredClient = CoreClient<
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointMaybeSet,
    EndpointMaybeSet,
>;

/// OIDC client for a single discovered provider.
pub struct OidcClient {
    client: DiscoveredClient,
    http: reqwest::Client,
    scopes: Vec<String>,
}

impl OidcClient {
    /// Discover the provider named by `settings.issuer_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The issuer or redirect URL is invalid
    /// - The client id is not configured
    /// - Discovery fails or times out
    pub async fn discover(settings: &OidcSettings) -> Result<Self, ProviderError> {
        let issuer_url = IssuerUrl::new(settings.issuer_url.clone())
            .map_err(|e| ProviderError::Configuration(format!("invalid issuer URL: {e}")))?;

        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| {
                ProviderError::Configuration(format!("failed to create HTTP client: {e}"))
            })?;

        let metadata = CoreProviderMetadata::discover_async(issuer_url, &http)
            .await
            .map_err(|e| ProviderError::Discovery(e.to_string()))?;
        log::info!(
            "Discovered OIDC provider {} (authorization endpoint {})",
            metadata.issuer().as_str(),
            metadata.authorization_endpoint().as_str()
        );

        Self::from_metadata(metadata, settings, http)
    }

    /// Build a client from already fetched provider metadata.
    fn from_metadata(
        metadata: CoreProviderMetadata,
        settings: &OidcSettings,
        http: reqwest::Client,
    ) -> Result<Self, ProviderError> {
        let redirect_url = RedirectUrl::new(settings.redirect_url.clone())
            .map_err(|e| ProviderError::Configuration(format!("invalid redirect URL: {e}")))?;
        let client_id = settings
            .get_client_id()
            .ok_or_else(|| ProviderError::Configuration("client id is not set".to_string()))?;

        let client = CoreClient::from_provider_metadata(
            metadata,
            ClientId::new(client_id),
            settings.get_client_secret().map(ClientSecret::new),
        )
        .set_redirect_uri(redirect_url);

        Ok(Self {
            client,
            http,
            scopes: settings.effective_scopes(),
        })
    }

    fn token_set(response: &CoreTokenResponse) -> Result<TokenSet, ProviderError> {
        // The raw id_token is only reachable through the serialized response
        let json = serde_json::to_value(response)
            .map_err(|e| ProviderError::Exchange(format!("unreadable token response: {e}")))?;
        let id_token = json
            .get("id_token")
            .and_then(|v| v.as_str())
            .map(ToString::to_string);
        Ok(TokenSet {
            id_token,
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
        })
    }

    /// Decode the payload segment of an already verified JWT.
    fn payload_claims(raw: &str) -> Result<Claims, ProviderError> {
        let payload = raw
            .split('.')
            .nth(1)
            .ok_or_else(|| ProviderError::Verification("invalid JWT format".to_string()))?;
        let bytes = general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| ProviderError::Verification(format!("undecodable JWT payload: {e}")))?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::Verification(format!("unparseable JWT payload: {e}")))?;
        Ok(Claims::from_value(value)?)
    }
}

#[async_trait]
impl OidcProvider for OidcClient {
    fn authorization_url(
        &self,
        state: &str,
        extra_params: &[(&str, &str)],
    ) -> Result<String, ProviderError> {
        // The nonce doubles as the state so the callback can check both at once
        let csrf = state.to_string();
        let nonce = state.to_string();
        let mut request = self.client.authorize_url(
            CoreAuthenticationFlow::AuthorizationCode,
            move || CsrfToken::new(csrf),
            move || Nonce::new(nonce),
        );
        // openid is always requested by the flow itself
        for scope in self.scopes.iter().filter(|s| s.as_str() != "openid") {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        for (name, value) in extra_params {
            request = request.add_extra_param((*name).to_string(), (*value).to_string());
        }
        let (url, _, _) = request.url();
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderError> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| ProviderError::Configuration(format!("token endpoint: {e}")))?
            .request_async(&self.http)
            .await
            .map_err(|e| ProviderError::Exchange(e.to_string()))?;
        Self::token_set(&response)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
        let token = RefreshToken::new(refresh_token.to_string());
        let response = self
            .client
            .exchange_refresh_token(&token)
            .map_err(|e| ProviderError::Configuration(format!("token endpoint: {e}")))?
            .request_async(&self.http)
            .await
            .map_err(|e| ProviderError::Exchange(e.to_string()))?;
        Self::token_set(&response)
    }

    fn verify_id_token(&self, raw: &str, nonce: Option<&str>) -> Result<Claims, ProviderError> {
        let id_token = CoreIdToken::from_str(raw)
            .map_err(|e| ProviderError::Verification(format!("malformed ID token: {e}")))?;
        let verifier = self.client.id_token_verifier();
        let verified = match nonce {
            Some(expected) => id_token
                .claims(&verifier, &Nonce::new(expected.to_string()))
                .map(|_| ()),
            None => id_token
                .claims(&verifier, |_: Option<&Nonce>| Ok::<(), String>(()))
                .map(|_| ()),
        };
        verified.map_err(|e| ProviderError::Verification(e.to_string()))?;
        Self::payload_claims(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_claims() {
        let payload = general_purpose::URL_SAFE_NO_PAD
            .encode(json!({"sub": "42", "email": "a@example.com", "groups": "ops"}).to_string());
        let raw = format!("eyJhbGciOiJSUzI1NiJ9.{payload}.c2ln");
        let claims = OidcClient::payload_claims(&raw).unwrap();
        assert_eq!(claims.subject.as_deref(), Some("42"));
        assert_eq!(claims.groups("groups").unwrap(), Some(vec!["ops".to_string()]));
    }

    fn client(settings: &OidcSettings) -> OidcClient {
        let metadata: CoreProviderMetadata = serde_json::from_value(json!({
            "issuer": "https://idp.example.com",
            "authorization_endpoint": "https://idp.example.com/auth",
            "token_endpoint": "https://idp.example.com/token",
            "jwks_uri": "https://idp.example.com/keys",
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"]
        }))
        .unwrap();
        OidcClient::from_metadata(metadata, settings, reqwest::Client::new()).unwrap()
    }

    fn settings() -> OidcSettings {
        OidcSettings {
            issuer_url: "https://idp.example.com".to_string(),
            redirect_url: "http://localhost:8080/callback".to_string(),
            client_id: Some("oidc-gateway".to_string()),
            offline_access: true,
            ..OidcSettings::default()
        }
    }

    #[test]
    fn test_authorization_url_binds_state_and_nonce() {
        let client = client(&settings());
        let url = client
            .authorization_url("state-123", &[("connector_id", "github")])
            .unwrap();
        let url = url::Url::parse(&url).unwrap();
        let param = |name: &str| {
            url.query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
        };

        assert_eq!(url.path(), "/auth");
        assert_eq!(param("state").as_deref(), Some("state-123"));
        assert_eq!(param("nonce").as_deref(), Some("state-123"));
        assert_eq!(param("response_type").as_deref(), Some("code"));
        assert_eq!(param("client_id").as_deref(), Some("oidc-gateway"));
        assert_eq!(param("connector_id").as_deref(), Some("github"));
        assert_eq!(
            param("redirect_uri").as_deref(),
            Some("http://localhost:8080/callback")
        );

        let scopes = param("scope").unwrap();
        let scopes: Vec<&str> = scopes.split(' ').collect();
        assert_eq!(scopes.iter().filter(|s| **s == "openid").count(), 1);
        assert!(scopes.contains(&"email"));
        assert!(scopes.contains(&"offline_access"));
    }

    #[test]
    fn test_missing_client_id_is_a_configuration_error() {
        let metadata: CoreProviderMetadata = serde_json::from_value(json!({
            "issuer": "https://idp.example.com",
            "authorization_endpoint": "https://idp.example.com/auth",
            "jwks_uri": "https://idp.example.com/keys",
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"]
        }))
        .unwrap();
        let settings = OidcSettings {
            client_id: None,
            ..settings()
        };
        let result = OidcClient::from_metadata(metadata, &settings, reqwest::Client::new());
        assert!(matches!(result, Err(ProviderError::Configuration(_))));
    }

    #[test]
    fn test_payload_claims_rejects_garbage() {
        assert!(OidcClient::payload_claims("not-a-jwt").is_err());
        assert!(OidcClient::payload_claims("a.!!!.c").is_err());
    }
}
