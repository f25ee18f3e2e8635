//! REST client for the detection backend.

use std::time::Duration;

use anyhow::{Context, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ApiClient {
    base_url: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
            agent,
        }
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        match &self.api_key {
            Some(key) => request.set("Authorization", &format!("Bearer {}", key)),
            None => request,
        }
    }

    /// `POST /detections` with an already serialized event body.
    pub fn post_detection(&self, body: &str) -> Result<()> {
        let url = format!("{}/detections", self.base_url);
        self.authorize(self.agent.post(&url))
            .set("Content-Type", "application/json")
            .send_string(body)
            .with_context(|| format!("POST {}", url))?;
        Ok(())
    }

    /// `GET /cameras/{id}`: the backend's registration record for this camera.
    pub fn camera_config(&self, camera_id: &str) -> Result<serde_json::Value> {
        let url = format!("{}/cameras/{}", self.base_url, camera_id);
        let response = self
            .authorize(self.agent.get(&url))
            .call()
            .with_context(|| format!("GET {}", url))?;
        response
            .into_json::<serde_json::Value>()
            .with_context(|| format!("decode camera record from {}", url))
    }
}
