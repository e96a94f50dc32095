use anyhow::Result;
use hyper::{header, http::HeaderMap, Body, Request};
use kube::api::PostParams;
use tracing::debug;

use crate::k8s::{Api, Client, TokenReview, TokenReviewSpec};

/// The authenticated caller, as resolved from trusted headers or a token
/// review.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Identity {
    pub(crate) username: String,
    pub(crate) groups: Vec<String>,
}

/// Authenticates API requests.
///
/// When a trusted fronting proxy forwards the identity in the configured
/// headers, that identity is used as-is. Otherwise a bearer token is
/// validated by delegating to the cluster's TokenReview API.
#[derive(Clone)]
pub(crate) struct Authenticator {
    client: Client,
    username_header: Option<String>,
    groups_header: Option<String>,
}

// === impl Authenticator ===

impl Authenticator {
    pub(crate) fn new(
        client: Client,
        username_header: Option<String>,
        groups_header: Option<String>,
    ) -> Self {
        Self {
            client,
            username_header,
            groups_header,
        }
    }

    /// Resolves the request's identity, or `None` if it cannot be
    /// authenticated. Errors indicate the token review itself failed.
    pub(crate) async fn authenticate(&self, req: &Request<Body>) -> Result<Option<Identity>> {
        if let Some(identity) = identity_from_headers(
            self.username_header.as_deref(),
            self.groups_header.as_deref(),
            req.headers(),
        ) {
            return Ok(Some(identity));
        }

        let Some(token) = bearer_token(req.headers()) else {
            return Ok(None);
        };
        self.review_token(token).await
    }

    async fn review_token(&self, token: &str) -> Result<Option<Identity>> {
        let review = TokenReview {
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let api = Api::<TokenReview>::all(self.client.clone());
        let review = api.create(&PostParams::default(), &review).await?;

        let Some(status) = review.status else {
            return Ok(None);
        };
        if !status.authenticated.unwrap_or(false) {
            debug!("token review rejected the request");
            return Ok(None);
        }
        let Some(user) = status.user else {
            return Ok(None);
        };
        Ok(Some(Identity {
            username: user.username.unwrap_or_default(),
            groups: user.groups.unwrap_or_default(),
        }))
    }
}

/// Extracts the proxy-forwarded identity, if header authentication is
/// configured and the username header is set.
fn identity_from_headers(
    username_header: Option<&str>,
    groups_header: Option<&str>,
    headers: &HeaderMap,
) -> Option<Identity> {
    let username = headers
        .get(username_header?)?
        .to_str()
        .ok()
        .filter(|v| !v.is_empty())?
        .to_string();

    let groups = groups_header
        .map(|header| {
            headers
                .get_all(header)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(Identity { username, groups })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
