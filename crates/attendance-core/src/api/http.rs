//! HTTP client for the attendance endpoints
//!
//! Routes, relative to the configured base URL:
//!
//! - `POST events/join/{id}` - attach
//! - `POST events/leave/{id}` - detach
//! - `GET events` - listing
//!
//! Requests carry the session's bearer token when one is configured.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use tracing::{debug, warn};
use url::Url;

use super::{AttendanceApi, AttendanceReceipt};
use crate::activity::{Activity, ActivityId};
use crate::error::{AttendanceError, AttendanceResult};

#[derive(Debug, Clone)]
pub struct HttpAttendanceApi {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpAttendanceApi {
    pub fn new(base_url: &str, timeout: Duration) -> AttendanceResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| AttendanceError::invalid_configuration("api_base_url", e.to_string()))?;
        // keep the last path segment when joining relative routes
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AttendanceError::internal_error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, route: &str) -> AttendanceResult<Url> {
        self.base_url
            .join(route)
            .map_err(|e| AttendanceError::internal_error(format!("Invalid route {}: {}", route, e)))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post_receipt(
        &self,
        action: &str,
        activity_id: &ActivityId,
    ) -> AttendanceResult<AttendanceReceipt> {
        let url = self.endpoint(&format!("events/{}/{}", action, activity_id))?;
        debug!(%url, "Sending {} request", action);

        let response = self
            .authorized(self.client.post(url))
            .send()
            .await
            .map_err(|e| AttendanceError::request_failed(activity_id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(activity_id = %activity_id, %status, "Endpoint rejected {} request", action);
            return Err(AttendanceError::request_failed(
                activity_id,
                format!("{} {}", status, body.trim()),
            ));
        }

        response
            .json::<AttendanceReceipt>()
            .await
            .map_err(|e| AttendanceError::request_failed(activity_id, format!("Invalid receipt: {}", e)))
    }
}

#[async_trait]
impl AttendanceApi for HttpAttendanceApi {
    async fn attach(&self, activity_id: &ActivityId) -> AttendanceResult<AttendanceReceipt> {
        self.post_receipt("join", activity_id).await
    }

    async fn detach(&self, activity_id: &ActivityId) -> AttendanceResult<AttendanceReceipt> {
        self.post_receipt("leave", activity_id).await
    }

    async fn list_activities(&self) -> AttendanceResult<Vec<Activity>> {
        let url = self.endpoint("events")?;
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| AttendanceError::network_error(e.to_string()))?
            .error_for_status()
            .map_err(|e| AttendanceError::network_error(e.to_string()))?;

        let activities: Vec<Activity> = response
            .json()
            .await
            .map_err(|e| AttendanceError::protocol_error(format!("Invalid activity listing: {}", e)))?;
        debug!(count = activities.len(), "Fetched activity listing");
        Ok(activities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn api_for(server: &MockServer) -> HttpAttendanceApi {
        HttpAttendanceApi::new(&format!("{}/api", server.uri()), Duration::from_secs(5))
            .unwrap()
            .with_token("secret")
    }

    #[tokio::test]
    async fn attach_posts_to_join_route_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/events/join/evt-1"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "attendees": 6 })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = api_for(&server).await.attach(&ActivityId::from("evt-1")).await.unwrap();
        assert_eq!(receipt.attendee_count, 6);
    }

    #[tokio::test]
    async fn detach_posts_to_leave_route() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/events/leave/evt-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "attendeeCount": 5 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let receipt = api_for(&server).await.detach(&ActivityId::from("evt-1")).await.unwrap();
        assert_eq!(receipt.attendee_count, 5);
    }

    #[tokio::test]
    async fn server_errors_become_request_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = api_for(&server).await.attach(&ActivityId::from("evt-1")).await.unwrap_err();
        match err {
            AttendanceError::RequestFailed { activity_id, reason } => {
                assert_eq!(activity_id.as_str(), "evt-1");
                assert!(reason.contains("500"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn lists_activities_from_listing_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "_id": "a", "title": "Jam", "date": "2026-10-18T19:00:00Z", "attendees": 3,
                  "category": "Music", "createdBy": { "_id": "u1" } },
                { "_id": "b", "title": "Run", "date": "2026-10-19" }
            ])))
            .mount(&server)
            .await;

        let activities = api_for(&server).await.list_activities().await.unwrap();
        assert_eq!(activities.len(), 2);
        assert_eq!(activities[0].attendee_count, 3);
        assert_eq!(activities[0].owner_id(), Some("u1"));
        assert_eq!(activities[1].category(), "Uncategorized");
    }

    #[tokio::test]
    async fn null_date_excludes_only_that_activity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "_id": "a", "title": "Jam", "date": "2026-10-18T19:00:00Z", "description": null },
                { "_id": "b", "title": "Unscheduled", "date": null }
            ])))
            .mount(&server)
            .await;

        let activities = api_for(&server).await.list_activities().await.unwrap();
        assert_eq!(activities.len(), 2);

        let now: chrono::DateTime<chrono::Utc> = "2026-10-18T12:00:00Z".parse().unwrap();
        let buckets = crate::classifier::classify_in(&activities, &now);
        assert_eq!(buckets.ids(crate::classifier::TemporalBucket::Active), vec![&ActivityId::from("a")]);
        assert_eq!(buckets.invalid.len(), 1);
        assert_eq!(buckets.invalid[0].activity_id, ActivityId::from("b"));
    }

    #[test]
    fn rejects_unparsable_base_url() {
        assert!(matches!(
            HttpAttendanceApi::new("not a url", Duration::from_secs(1)),
            Err(AttendanceError::InvalidConfiguration { .. })
        ));
    }
}
