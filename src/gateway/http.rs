use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client as HttpClient, RequestBuilder, Response};

use super::{CreatedSchedule, NewSchedule, ScheduleGateway, ScheduleUpdate};
use crate::config::BackendConfig;
use crate::models::{BackendSchedule, Section, ServerId};

const CSRF_HEADER: &str = "X-CSRFToken";

pub struct HttpGateway {
    http_client: HttpClient,
    base_url: String,
    csrf_token: Option<String>,
    session_cookie: Option<String>,
}

impl HttpGateway {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            csrf_token: config.csrf_token.clone(),
            session_cookie: config.session_cookie.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Same-origin credentials go on every request.
    fn with_credentials(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(header::ACCEPT, "application/json");
        match self.session_cookie {
            Some(ref cookie) => request.header(header::COOKIE, cookie),
            None => request,
        }
    }

    /// Mutating requests additionally carry the CSRF token.
    fn mutating(&self, request: RequestBuilder) -> RequestBuilder {
        let request = self.with_credentials(request);
        match self.csrf_token {
            Some(ref token) => request.header(CSRF_HEADER, token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("{what} request failed"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{what} returned {status}"));
        }
        Ok(response)
    }
}

#[async_trait]
impl ScheduleGateway for HttpGateway {
    fn backend_name(&self) -> &str {
        "http"
    }

    async fn list_schedules(&self) -> Result<Vec<BackendSchedule>> {
        let request = self.with_credentials(self.http_client.get(self.url("schedules/")));
        let response = self.send(request, "GET /schedules/").await?;
        response
            .json()
            .await
            .context("Failed to parse schedule list")
    }

    async fn create_schedule(&self, name: &str, sections: &[Section]) -> Result<ServerId> {
        let body = NewSchedule { name, sections };
        let request = self.mutating(self.http_client.post(self.url("schedules/")).json(&body));
        let response = self.send(request, "POST /schedules/").await?;
        let created: CreatedSchedule = response
            .json()
            .await
            .context("Failed to parse created schedule")?;
        created
            .id
            .ok_or_else(|| anyhow!("Backend created schedule {name:?} without an id"))
    }

    async fn update_schedule(&self, update: &ScheduleUpdate) -> Result<()> {
        let path = format!("schedules/{}/", update.id);
        let request = self.mutating(self.http_client.put(self.url(&path)).json(update));
        self.send(request, &format!("PUT /{path}")).await?;
        Ok(())
    }

    async fn delete_schedule(&self, id: ServerId) -> Result<()> {
        let path = format!("schedules/{id}/");
        let request = self.mutating(self.http_client.delete(self.url(&path)));
        self.send(request, &format!("DELETE /{path}")).await?;
        Ok(())
    }
}
