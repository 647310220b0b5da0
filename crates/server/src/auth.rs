use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use crate::http::ApiError;

/// Bearer token -> organizations it may read. Session issuance itself lives
/// with the identity provider; this layer only checks the resulting token.
#[derive(Clone, Default)]
pub struct AuthRegistry {
    grants: Arc<HashMap<String, HashSet<String>>>,
}

impl AuthRegistry {
    pub fn new(grants: HashMap<String, HashSet<String>>) -> Self {
        Self {
            grants: Arc::new(grants),
        }
    }

    /// Parse `token:org1,org2` grant specs (the `--token` CLI flag).
    pub fn parse_grants(specs: &[String]) -> anyhow::Result<Self> {
        let mut grants: HashMap<String, HashSet<String>> = HashMap::new();
        for spec in specs {
            let (token, orgs) = spec
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("bad grant spec {spec:?}, want token:org1,org2"))?;
            if token.is_empty() {
                anyhow::bail!("bad grant spec {spec:?}: empty token");
            }
            let entry = grants.entry(token.to_string()).or_default();
            for org in orgs.split(',').filter(|o| !o.is_empty()) {
                entry.insert(org.to_string());
            }
        }
        Ok(Self::new(grants))
    }

    /// 401 for a missing/unknown token, 403 for a known token without the
    /// organization.
    pub fn authorize(&self, headers: &HeaderMap, organization_id: &str) -> Result<(), ApiError> {
        let token = bearer_token(headers).ok_or_else(ApiError::unauthenticated)?;
        let orgs = self
            .grants
            .get(token)
            .ok_or_else(ApiError::unauthenticated)?;
        if !orgs.contains(organization_id) {
            return Err(ApiError::forbidden(organization_id));
        }
        Ok(())
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
