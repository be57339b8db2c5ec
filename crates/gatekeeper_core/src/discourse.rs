//! Client for the Discourse REST surface the workflows use.

use std::cell::Cell;
use std::thread::sleep;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::json;

use crate::error::{GatekeeperError, Result};

/// Everything the planner, executor and migration need from Discourse.
///
/// `create_topic`, `update_topic` and `delete_topic` are the mutating calls;
/// dry runs must never reach them.
pub trait DiscourseApi {
    fn host(&self) -> &str;
    /// Expand a server-relative topic link to an absolute URL.
    fn absolute_url(&self, url: &str) -> String;
    /// The raw markdown of the first post of a topic.
    fn retrieve_topic(&self, url: &str) -> Result<String>;
    /// Create a topic and return its URL.
    fn create_topic(&self, title: &str, content: &str) -> Result<String>;
    fn update_topic(&self, url: &str, content: &str) -> Result<()>;
    fn delete_topic(&self, url: &str) -> Result<()>;
    fn check_topic_read_permission(&self, url: &str) -> Result<bool>;
    fn check_topic_write_permission(&self, url: &str) -> Result<bool>;
}

const TOPIC_TAGS: &[&str] = &["docs"];
const READ_INTERVAL: Duration = Duration::from_millis(300);
const WRITE_INTERVAL: Duration = Duration::from_millis(1_000);
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
/// Total backoff budget for one request; rate-limit handling never blocks a
/// single call for longer than this.
const RETRY_BUDGET: Duration = Duration::from_secs(600);

pub struct DiscourseClient {
    http: Client,
    host: String,
    base_url: String,
    api_username: String,
    api_key: String,
    category_id: u64,
    last_request_at: Cell<Option<Instant>>,
}

#[derive(Debug, Deserialize)]
struct TopicResponse {
    post_stream: PostStream,
}

#[derive(Debug, Deserialize)]
struct PostStream {
    posts: Vec<PostInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct PostInfo {
    id: u64,
    post_number: u64,
    #[serde(default)]
    can_edit: bool,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    topic_id: u64,
    topic_slug: String,
}

impl DiscourseClient {
    pub fn new(host: &str, api_username: &str, api_key: &str, category_id: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|error| {
                GatekeeperError::Discourse(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            http,
            host: host.to_string(),
            base_url: format!("https://{host}"),
            api_username: api_username.to_string(),
            api_key: api_key.to_string(),
            category_id,
            last_request_at: Cell::new(None),
        })
    }

    fn request(
        &self,
        build: impl Fn() -> reqwest::blocking::RequestBuilder,
        is_write: bool,
    ) -> Result<Response> {
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            self.apply_rate_limit(is_write);
            let response = build()
                .header("Api-Key", &self.api_key)
                .header("Api-Username", &self.api_username)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if is_retryable_status(status)
                        && started.elapsed() < RETRY_BUDGET
                    {
                        self.wait_before_retry(attempt, started);
                        attempt += 1;
                        continue;
                    }
                    return Ok(response);
                }
                Err(error) => {
                    if started.elapsed() < RETRY_BUDGET && attempt < 3 {
                        self.wait_before_retry(attempt, started);
                        attempt += 1;
                        continue;
                    }
                    return Err(GatekeeperError::Discourse(format!(
                        "failed to call Discourse: {error}"
                    )));
                }
            }
        }
    }

    fn apply_rate_limit(&self, is_write: bool) {
        let interval = if is_write { WRITE_INTERVAL } else { READ_INTERVAL };
        if let Some(last) = self.last_request_at.get() {
            let elapsed = last.elapsed();
            if elapsed < interval {
                sleep(interval - elapsed);
            }
        }
        self.last_request_at.set(Some(Instant::now()));
    }

    fn wait_before_retry(&self, attempt: u32, started: Instant) {
        let delay = RETRY_BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt));
        let remaining = RETRY_BUDGET.saturating_sub(started.elapsed());
        sleep(delay.min(remaining));
    }

    fn first_post(&self, url: &str) -> Result<PostInfo> {
        let topic_id = topic_id_from_url(url)?;
        let endpoint = format!("{}/t/{topic_id}.json", self.base_url);
        let response = self.request(|| self.http.get(&endpoint), false)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GatekeeperError::Discourse(format!(
                "topic not found, url: {url}"
            )));
        }
        if !status.is_success() {
            return Err(GatekeeperError::Discourse(format!(
                "failed to retrieve topic, url: {url}, status: {status}"
            )));
        }
        let topic: TopicResponse = response.json().map_err(|error| {
            GatekeeperError::Discourse(format!("failed to decode topic response: {error}"))
        })?;
        topic
            .post_stream
            .posts
            .into_iter()
            .find(|post| post.post_number == 1)
            .ok_or_else(|| {
                GatekeeperError::Discourse(format!("topic has no first post, url: {url}"))
            })
    }
}

impl DiscourseApi for DiscourseClient {
    fn host(&self) -> &str {
        &self.host
    }

    fn absolute_url(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{url}", self.base_url)
        } else {
            url.to_string()
        }
    }

    fn retrieve_topic(&self, url: &str) -> Result<String> {
        let topic_id = topic_id_from_url(url)?;
        let endpoint = format!("{}/raw/{topic_id}/1", self.base_url);
        let response = self.request(|| self.http.get(&endpoint), false)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GatekeeperError::Discourse(format!(
                "topic not found, url: {url}"
            )));
        }
        if !status.is_success() {
            return Err(GatekeeperError::Discourse(format!(
                "failed to retrieve topic, url: {url}, status: {status}"
            )));
        }
        response.text().map_err(|error| {
            GatekeeperError::Discourse(format!("failed to read topic content: {error}"))
        })
    }

    fn create_topic(&self, title: &str, content: &str) -> Result<String> {
        let endpoint = format!("{}/posts.json", self.base_url);
        let payload = json!({
            "title": title,
            "raw": content,
            "category": self.category_id,
            "tags": TOPIC_TAGS,
        });
        let response = self.request(|| self.http.post(&endpoint).json(&payload), true)?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatekeeperError::Discourse(format!(
                "failed to create topic, title: {title}, status: {status}"
            )));
        }
        let created: CreatedPost = response.json().map_err(|error| {
            GatekeeperError::Discourse(format!("failed to decode create response: {error}"))
        })?;
        Ok(format!(
            "{}/t/{}/{}",
            self.base_url, created.topic_slug, created.topic_id
        ))
    }

    fn update_topic(&self, url: &str, content: &str) -> Result<()> {
        let post = self.first_post(url)?;
        let endpoint = format!("{}/posts/{}.json", self.base_url, post.id);
        let payload = json!({
            "post": {
                "raw": content,
                "edit_reason": "Documentation update from repository",
            }
        });
        let response = self.request(|| self.http.put(&endpoint).json(&payload), true)?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatekeeperError::Discourse(format!(
                "failed to update topic, url: {url}, status: {status}"
            )));
        }
        Ok(())
    }

    fn delete_topic(&self, url: &str) -> Result<()> {
        let topic_id = topic_id_from_url(url)?;
        let endpoint = format!("{}/t/{topic_id}.json", self.base_url);
        let response = self.request(|| self.http.delete(&endpoint), true)?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(GatekeeperError::Discourse(format!(
                "failed to delete topic, url: {url}, status: {status}"
            )));
        }
        Ok(())
    }

    fn check_topic_read_permission(&self, url: &str) -> Result<bool> {
        match self.retrieve_topic(url) {
            Ok(_) => Ok(true),
            Err(GatekeeperError::Discourse(message)) if message.contains("status: 403") => {
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    fn check_topic_write_permission(&self, url: &str) -> Result<bool> {
        Ok(self.first_post(url)?.can_edit)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Extract the numeric topic id from a topic URL.
///
/// Accepts absolute and server-relative forms of `/t/<slug>/<id>` and
/// `/t/<id>`, with an optional trailing post number.
pub fn topic_id_from_url(url: &str) -> Result<u64> {
    let path = match url.find("://") {
        Some(scheme_end) => {
            let after_scheme = &url[scheme_end + 3..];
            match after_scheme.find('/') {
                Some(path_start) => &after_scheme[path_start..],
                None => "",
            }
        }
        None => url,
    };
    let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();
    if segments.first() != Some(&"t") {
        return Err(GatekeeperError::Discourse(format!(
            "not a topic URL: {url}"
        )));
    }
    segments
        .iter()
        .skip(1)
        .filter_map(|segment| segment.parse::<u64>().ok())
        .next()
        .ok_or_else(|| GatekeeperError::Discourse(format!("no topic id in URL: {url}")))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;

    use super::DiscourseApi;
    use crate::error::{GatekeeperError, Result};

    /// In-memory Discourse for planner, executor and workflow tests.
    ///
    /// Mutating calls panic when `mutations_forbidden` is set so dry-run
    /// tests prove no write is ever attempted.
    pub(crate) struct MockDiscourse {
        pub host: String,
        pub topics: RefCell<BTreeMap<String, String>>,
        pub created: RefCell<Vec<(String, String)>>,
        pub updated: RefCell<Vec<(String, String)>>,
        pub deleted: RefCell<Vec<String>>,
        pub next_topic_id: Cell<u64>,
        pub fail_writes: bool,
        pub mutations_forbidden: bool,
        pub writable: bool,
    }

    impl MockDiscourse {
        pub fn new() -> Self {
            Self {
                host: "discourse.example.com".to_string(),
                topics: RefCell::new(BTreeMap::new()),
                created: RefCell::new(Vec::new()),
                updated: RefCell::new(Vec::new()),
                deleted: RefCell::new(Vec::new()),
                next_topic_id: Cell::new(100),
                fail_writes: false,
                mutations_forbidden: false,
                writable: true,
            }
        }

        pub fn with_topic(self, url: &str, content: &str) -> Self {
            self.topics
                .borrow_mut()
                .insert(url.to_string(), content.to_string());
            self
        }

        fn check_mutation(&self, call: &str) -> Result<()> {
            assert!(
                !self.mutations_forbidden,
                "mutating call {call} during a dry run"
            );
            if self.fail_writes {
                return Err(GatekeeperError::Discourse(format!("{call} failed")));
            }
            Ok(())
        }
    }

    impl DiscourseApi for MockDiscourse {
        fn host(&self) -> &str {
            &self.host
        }

        fn absolute_url(&self, url: &str) -> String {
            if url.starts_with('/') {
                format!("https://{}{url}", self.host)
            } else {
                url.to_string()
            }
        }

        fn retrieve_topic(&self, url: &str) -> Result<String> {
            let topics = self.topics.borrow();
            topics
                .get(&self.absolute_url(url))
                .or_else(|| topics.get(url))
                .cloned()
                .ok_or_else(|| GatekeeperError::Discourse(format!("topic not found, url: {url}")))
        }

        fn create_topic(&self, title: &str, content: &str) -> Result<String> {
            self.check_mutation("create_topic")?;
            let id = self.next_topic_id.get();
            self.next_topic_id.set(id + 1);
            let url = format!("https://{}/t/topic-{id}/{id}", self.host);
            self.topics
                .borrow_mut()
                .insert(url.clone(), content.to_string());
            self.created
                .borrow_mut()
                .push((title.to_string(), content.to_string()));
            Ok(url)
        }

        fn update_topic(&self, url: &str, content: &str) -> Result<()> {
            self.check_mutation("update_topic")?;
            self.topics
                .borrow_mut()
                .insert(self.absolute_url(url), content.to_string());
            self.updated
                .borrow_mut()
                .push((url.to_string(), content.to_string()));
            Ok(())
        }

        fn delete_topic(&self, url: &str) -> Result<()> {
            self.check_mutation("delete_topic")?;
            self.topics.borrow_mut().remove(&self.absolute_url(url));
            self.deleted.borrow_mut().push(url.to_string());
            Ok(())
        }

        fn check_topic_read_permission(&self, url: &str) -> Result<bool> {
            Ok(self.topics.borrow().contains_key(&self.absolute_url(url)))
        }

        fn check_topic_write_permission(&self, _url: &str) -> Result<bool> {
            Ok(self.writable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_id_parses_slug_and_id_forms() {
        assert_eq!(
            topic_id_from_url("https://discourse.example.com/t/getting-started/42").unwrap(),
            42
        );
        assert_eq!(topic_id_from_url("/t/getting-started/42").unwrap(), 42);
        assert_eq!(topic_id_from_url("/t/42").unwrap(), 42);
        assert_eq!(topic_id_from_url("/t/getting-started/42/3").unwrap(), 42);
    }

    #[test]
    fn topic_id_rejects_non_topic_urls() {
        assert!(topic_id_from_url("https://discourse.example.com/c/docs/5").is_err());
        assert!(topic_id_from_url("/t/only-a-slug").is_err());
    }

    #[test]
    fn absolute_url_expands_relative_links_only() {
        let client = DiscourseClient::new("discourse.example.com", "bot", "key", 5).unwrap();
        assert_eq!(
            client.absolute_url("/t/guide/7"),
            "https://discourse.example.com/t/guide/7"
        );
        assert_eq!(
            client.absolute_url("https://example.com/spec"),
            "https://example.com/spec"
        );
    }
}
