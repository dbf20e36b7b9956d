use axum::http::HeaderMap;
use uuid::Uuid;

/// Per-request context, built once at the edge and passed by reference
/// to every component that logs, audits or attributes work.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub ip_address: Option<String>,
    pub user_agent: String,
    /// Customer the request acts on behalf of, once known.
    pub customer_id: Option<i32>,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let ip_address = header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .or_else(|| header("x-real-ip"));

        Self {
            request_id: header("x-request-id").unwrap_or_else(|| Uuid::new_v4().to_string()),
            ip_address,
            user_agent: header("user-agent").unwrap_or_default(),
            customer_id: None,
        }
    }

    /// Context for work not triggered by a client (scheduler ticks, CLI).
    pub fn system(actor: &str) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            ip_address: None,
            user_agent: actor.to_string(),
            customer_id: None,
        }
    }

    pub fn for_customer(&self, customer_id: i32) -> Self {
        Self {
            customer_id: Some(customer_id),
            ..self.clone()
        }
    }
}
