use crate::config::Config;
use crate::deck;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

const API_KEY_HEADER: &str = "X-API-key";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerateRequest {
    pub plain_text: String,
    pub theme: Option<String>,
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submitted {
    pub task_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ResultLink {
    #[serde(default)]
    pub url: Option<String>,
}

/// One observation of a task, as returned by `GET /task_status/{id}`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TaskStatus {
    pub task_status: String,
    #[serde(default)]
    pub task_result: Option<ResultLink>,
    #[serde(default)]
    pub task_info: Option<ResultLink>,
}

impl TaskStatus {
    /// Download URL of the finished presentation, empty when not reported.
    pub fn result_url(&self) -> &str {
        link_url(&self.task_result)
    }

    pub fn info_url(&self) -> &str {
        link_url(&self.task_info)
    }
}

fn link_url(link: &Option<ResultLink>) -> &str {
    link.as_ref()
        .and_then(|l| l.url.as_deref())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    User,
    Themes,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct UserInfo {
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl fmt::Display for UserInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.user_name {
            writeln!(f, "User: {name}")?;
        }
        if let Some(email) = &self.email {
            writeln!(f, "Email: {email}")?;
        }
        for (key, value) in &self.extra {
            match value {
                serde_json::Value::String(s) => writeln!(f, "{key}: {s}")?,
                other => writeln!(f, "{key}: {other}")?,
            }
        }
        Ok(())
    }
}

/// The themes endpoint has answered both with bare names and with objects;
/// accept either.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Theme {
    Name(String),
    Detailed {
        name: String,
        #[serde(flatten)]
        extra: serde_json::Map<String, serde_json::Value>,
    },
}

impl Theme {
    pub fn name(&self) -> &str {
        match self {
            Theme::Name(name) => name,
            Theme::Detailed { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    User(UserInfo),
    Themes(Vec<Theme>),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Replacement {
    pub shape_name: String,
    pub content: String,
}

/// Operations the poll loop and the shell depend on.
#[async_trait]
pub trait SlideApi: Send + Sync {
    async fn submit(&self, request: &GenerateRequest) -> Result<Submitted>;
    async fn fetch_status(&self, task_id: &str) -> Result<TaskStatus>;
    async fn fetch_metadata(&self, kind: MetadataKind) -> Result<Metadata>;

    /// Uploads `file` with shape replacements and returns the URL of the
    /// edited presentation.
    async fn edit(&self, file: &Path, replacements: &[Replacement]) -> Result<String>;

    /// Fetches a finished presentation's bytes from wherever the service
    /// hosts it.
    async fn fetch_file(&self, url: &str) -> Result<Vec<u8>>;
}

/// Saves the presentation at `url` to `dest`, or to a fresh
/// `presentation_<hex>.pptx` in the working directory.
pub async fn download<A>(api: &A, url: &str, dest: Option<PathBuf>) -> Result<PathBuf>
where
    A: SlideApi + ?Sized,
{
    let dest = dest.unwrap_or_else(|| {
        PathBuf::from(format!("presentation_{}.pptx", uuid::Uuid::new_v4().simple()))
    });
    tracing::debug!(url, dest = %dest.display(), "downloading");
    let bytes = api.fetch_file(url).await?;
    tokio::fs::write(&dest, &bytes)
        .await
        .map_err(|e| Error::storage(&dest, e))?;
    Ok(dest)
}

pub struct SlideSpeakClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl SlideSpeakClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(config.request_timeout).build()?,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Api(format!("invalid endpoint {path:?}: {e}")))
    }

    /// The task id is pushed as a single path segment, so `?`, `#` and `/`
    /// are percent-encoded instead of reshaping the URL.
    fn task_status_url(&self, task_id: &str) -> Result<Url> {
        let mut url = self.endpoint("task_status/")?;
        url.path_segments_mut()
            .map_err(|_| Error::Api(format!("base URL {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .push(task_id);
        Ok(url)
    }

    fn headers(&self, json_body: bool) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("{API_KEY_HEADER} header: {e}")))?,
        );
        if json_body {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        Ok(headers)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, label: &str) -> Result<T> {
        tracing::debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .headers(self.headers(false)?)
            .send()
            .await?;
        decode(label, response).await
    }
}

#[async_trait]
impl SlideApi for SlideSpeakClient {
    async fn submit(&self, request: &GenerateRequest) -> Result<Submitted> {
        let url = self.endpoint("presentation/generate")?;
        tracing::debug!(%url, length = request.length, theme = ?request.theme, "POST");
        let response = self
            .client
            .post(url)
            .headers(self.headers(true)?)
            .json(request)
            .send()
            .await?;
        let body: serde_json::Value = decode("presentation/generate", response).await?;
        parse_submitted(&body)
    }

    async fn fetch_status(&self, task_id: &str) -> Result<TaskStatus> {
        let url = self.task_status_url(task_id)?;
        let body: serde_json::Value = self.get_json(url, "task_status").await?;
        parse_task_status(body)
    }

    async fn fetch_metadata(&self, kind: MetadataKind) -> Result<Metadata> {
        match kind {
            MetadataKind::User => {
                let url = self.endpoint("me")?;
                Ok(Metadata::User(self.get_json(url, "me").await?))
            }
            MetadataKind::Themes => {
                let url = self.endpoint("presentation/themes")?;
                Ok(Metadata::Themes(self.get_json(url, "presentation/themes").await?))
            }
        }
    }

    async fn edit(&self, file: &Path, replacements: &[Replacement]) -> Result<String> {
        deck::ensure_pptx(file)?;
        let bytes = tokio::fs::read(file)
            .await
            .map_err(|e| Error::storage(file, e))?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "presentation.pptx".to_string());
        let edits = json!({ "replacements": replacements }).to_string();
        let form = Form::new()
            .part("pptx_file", Part::bytes(bytes).file_name(file_name))
            .text("config", edits);

        let url = self.endpoint("presentation/edit")?;
        tracing::debug!(%url, replacements = replacements.len(), "POST");
        let response = self
            .client
            .post(url)
            .headers(self.headers(false)?)
            .multipart(form)
            .send()
            .await?;

        let body: serde_json::Value = decode("presentation/edit", response).await?;
        body.get("url")
            .and_then(|u| u.as_str())
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Api("edit response does not contain a url".into()))
    }

    async fn fetch_file(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api(format!("failed to download file: {status}")));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(Error::Api(format!("{path} returned {status}: {text}")));
    }
    serde_json::from_str(&text)
        .map_err(|e| Error::Api(format!("{path} returned an unexpected body: {e}")))
}

pub fn parse_submitted(body: &serde_json::Value) -> Result<Submitted> {
    body.get("task_id")
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .map(|id| Submitted {
            task_id: id.to_string(),
        })
        .ok_or_else(|| Error::Api(format!("generation response has no task_id: {body}")))
}

pub fn parse_task_status(body: serde_json::Value) -> Result<TaskStatus> {
    if body.get("task_status").and_then(|s| s.as_str()).is_none() {
        return Err(Error::Api(format!("status response has no task_status: {body}")));
    }
    serde_json::from_value(body).map_err(|e| Error::Api(format!("malformed status response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_request_serializes_missing_theme_as_null() {
        let request = GenerateRequest {
            plain_text: "The French Revolution...".into(),
            theme: None,
            length: 10,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "plain_text": "The French Revolution...", "theme": null, "length": 10 })
        );
    }

    #[test]
    fn submitted_requires_a_task_id() {
        let ok = parse_submitted(&json!({ "task_id": "abc123", "queued": true })).unwrap();
        assert_eq!(ok.task_id, "abc123");

        for body in [json!({}), json!({ "task_id": "" }), json!({ "task_id": 42 })] {
            assert!(matches!(parse_submitted(&body), Err(Error::Api(_))));
        }
    }

    #[test]
    fn success_status_exposes_both_urls() {
        let status = parse_task_status(json!({
            "task_id": "abc123",
            "task_status": "SUCCESS",
            "task_result": { "url": "https://x/y.pptx" },
            "task_info": { "url": "https://x/y.json" }
        }))
        .unwrap();
        assert_eq!(status.task_status, "SUCCESS");
        assert_eq!(status.result_url(), "https://x/y.pptx");
        assert_eq!(status.info_url(), "https://x/y.json");
    }

    #[test]
    fn pending_status_may_carry_null_result() {
        let status = parse_task_status(json!({
            "task_status": "PENDING",
            "task_result": null,
            "task_info": null
        }))
        .unwrap();
        assert_eq!(status.result_url(), "");
        assert_eq!(status.info_url(), "");
    }

    #[test]
    fn status_without_task_status_is_an_api_error() {
        let err = parse_task_status(json!({ "detail": "Not Found" })).unwrap_err();
        assert!(matches!(err, Error::Api(ref msg) if msg.contains("task_status")));
    }

    #[test]
    fn themes_accept_names_and_objects() {
        let themes: Vec<Theme> = serde_json::from_value(json!([
            "default",
            { "name": "gradient", "preview": "https://x/gradient.png" }
        ]))
        .unwrap();
        let names: Vec<&str> = themes.iter().map(Theme::name).collect();
        assert_eq!(names, ["default", "gradient"]);
    }

    #[test]
    fn user_info_keeps_unknown_fields() {
        let user: UserInfo = serde_json::from_value(json!({
            "user_name": "ada",
            "plan": "pro"
        }))
        .unwrap();
        assert_eq!(user.user_name.as_deref(), Some("ada"));
        let rendered = user.to_string();
        assert!(rendered.contains("User: ada"));
        assert!(rendered.contains("plan: pro"));
    }

    #[test]
    fn edit_config_shape() {
        let replacements = vec![Replacement {
            shape_name: "Title 1".into(),
            content: "New title".into(),
        }];
        assert_eq!(
            json!({ "replacements": replacements }),
            json!({ "replacements": [{ "shape_name": "Title 1", "content": "New title" }] })
        );
    }

    #[test]
    fn api_key_header_is_attached() {
        let config = Config::from_lookup(|key| {
            (key == crate::config::API_KEY_VAR).then(|| "secret".to_string())
        })
        .unwrap();
        let client = SlideSpeakClient::new(&config).unwrap();
        let headers = client.headers(true).unwrap();
        assert_eq!(headers.get(API_KEY_HEADER).unwrap(), "secret");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert!(client.headers(false).unwrap().get(CONTENT_TYPE).is_none());
    }

    mod wire {
        use super::*;
        use crate::config::{API_KEY_VAR, BASE_URL_VAR};
        use tempfile::TempDir;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::{TcpListener, TcpStream};
        use tokio::task::JoinHandle;

        /// A one-connection HTTP server that records the raw request.
        struct Stub {
            origin: String,
            request: JoinHandle<String>,
        }

        impl Stub {
            async fn serve(status: &'static str, content_type: &'static str, body: &[u8]) -> Self {
                let body = body.to_vec();
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();
                let request = tokio::spawn(async move {
                    let (mut socket, _) = listener.accept().await.unwrap();
                    let raw = read_request(&mut socket).await;
                    let head = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    socket.write_all(head.as_bytes()).await.unwrap();
                    socket.write_all(&body).await.unwrap();
                    socket.shutdown().await.ok();
                    String::from_utf8_lossy(&raw).into_owned()
                });
                Self {
                    origin: format!("http://{addr}"),
                    request,
                }
            }

            async fn json(status: &'static str, body: serde_json::Value) -> Self {
                Self::serve(status, "application/json", body.to_string().as_bytes()).await
            }

            fn client(&self) -> SlideSpeakClient {
                client_for(&format!("{}/api/v1", self.origin))
            }

            async fn received(self) -> String {
                self.request.await.unwrap()
            }
        }

        async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
            let mut raw = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&chunk[..n]);
                if request_complete(&raw) {
                    break;
                }
            }
            raw
        }

        fn request_complete(raw: &[u8]) -> bool {
            let Some(end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
                return false;
            };
            let head = String::from_utf8_lossy(&raw[..end]).to_lowercase();
            let body_len = raw.len() - end - 4;
            let content_length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok());
            match content_length {
                Some(len) => body_len >= len,
                None if head.contains("transfer-encoding: chunked") => raw.ends_with(b"0\r\n\r\n"),
                None => true,
            }
        }

        fn client_for(base_url: &str) -> SlideSpeakClient {
            let base_url = base_url.to_string();
            let config = Config::from_lookup(move |key| match key {
                API_KEY_VAR => Some("secret".to_string()),
                BASE_URL_VAR => Some(base_url.clone()),
                _ => None,
            })
            .unwrap();
            SlideSpeakClient::new(&config).unwrap()
        }

        #[tokio::test]
        async fn submit_posts_json_with_the_api_key() {
            let stub = Stub::json("200 OK", json!({ "task_id": "abc123" })).await;
            let submitted = stub
                .client()
                .submit(&GenerateRequest {
                    plain_text: "The French Revolution...".into(),
                    theme: None,
                    length: 10,
                })
                .await
                .unwrap();
            assert_eq!(submitted.task_id, "abc123");

            let request = stub.received().await;
            let lowered = request.to_lowercase();
            assert!(request.starts_with("POST /api/v1/presentation/generate HTTP/1.1"));
            assert!(lowered.contains("x-api-key: secret"));
            assert!(lowered.contains("content-type: application/json"));
            assert!(request.contains(r#""plain_text":"The French Revolution...""#));
            assert!(request.contains(r#""theme":null"#));
            assert!(request.contains(r#""length":10"#));
        }

        #[tokio::test]
        async fn submit_without_task_id_is_an_api_error() {
            let stub = Stub::json("200 OK", json!({ "detail": "queued" })).await;
            let err = stub
                .client()
                .submit(&GenerateRequest {
                    plain_text: "prompt".into(),
                    theme: Some("default".into()),
                    length: 5,
                })
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Api(ref msg) if msg.contains("task_id")));
        }

        #[tokio::test]
        async fn status_is_fetched_by_task_id() {
            let stub = Stub::json(
                "200 OK",
                json!({ "task_status": "SUCCESS", "task_result": { "url": "https://x/y.pptx" } }),
            )
            .await;
            let status = stub.client().fetch_status("abc123").await.unwrap();
            assert_eq!(status.task_status, "SUCCESS");
            assert_eq!(status.result_url(), "https://x/y.pptx");

            let request = stub.received().await;
            assert!(request.starts_with("GET /api/v1/task_status/abc123 HTTP/1.1"));
            assert!(request.to_lowercase().contains("x-api-key: secret"));
        }

        #[tokio::test]
        async fn reserved_characters_in_task_ids_stay_in_the_path() {
            let stub = Stub::json("200 OK", json!({ "task_status": "PENDING" })).await;
            stub.client().fetch_status("weird?id#x").await.unwrap();

            let request = stub.received().await;
            assert!(
                request.starts_with("GET /api/v1/task_status/weird%3Fid%23x HTTP/1.1"),
                "{request}"
            );
        }

        #[test]
        fn task_status_url_escapes_slashes() {
            let client = client_for("https://api.slidespeak.co/api/v1");
            assert_eq!(
                client.task_status_url("a/b?c").unwrap().as_str(),
                "https://api.slidespeak.co/api/v1/task_status/a%2Fb%3Fc"
            );
        }

        #[tokio::test]
        async fn non_success_status_is_an_api_error() {
            let stub = Stub::json("404 Not Found", json!({ "detail": "Not Found" })).await;
            let err = stub.client().fetch_status("missing").await.unwrap_err();
            assert!(matches!(err, Error::Api(ref msg) if msg.contains("404")), "{err}");
        }

        #[tokio::test]
        async fn themes_and_user_hit_their_endpoints() {
            let stub = Stub::json("200 OK", json!(["default", { "name": "gradient" }])).await;
            let themes = stub.client().fetch_metadata(MetadataKind::Themes).await.unwrap();
            assert!(matches!(themes, Metadata::Themes(ref t) if t.len() == 2));
            assert!(stub
                .received()
                .await
                .starts_with("GET /api/v1/presentation/themes HTTP/1.1"));

            let stub = Stub::json("200 OK", json!({ "user_name": "ada" })).await;
            let user = stub.client().fetch_metadata(MetadataKind::User).await.unwrap();
            assert!(matches!(user, Metadata::User(ref u) if u.user_name.as_deref() == Some("ada")));
            assert!(stub.received().await.starts_with("GET /api/v1/me HTTP/1.1"));
        }

        #[tokio::test]
        async fn edit_uploads_the_deck_and_replacements() {
            let dir = TempDir::new().unwrap();
            let deck = dir.path().join("deck.pptx");
            std::fs::write(&deck, b"deck-bytes").unwrap();

            let stub = Stub::json("200 OK", json!({ "url": "https://x/edited.pptx" })).await;
            let url = stub
                .client()
                .edit(
                    &deck,
                    &[Replacement {
                        shape_name: "Title 1".into(),
                        content: "New title".into(),
                    }],
                )
                .await
                .unwrap();
            assert_eq!(url, "https://x/edited.pptx");

            let request = stub.received().await;
            let lowered = request.to_lowercase();
            assert!(request.starts_with("POST /api/v1/presentation/edit HTTP/1.1"));
            assert!(lowered.contains("x-api-key: secret"));
            assert!(lowered.contains("content-type: multipart/form-data"));
            assert!(request.contains(r#"name="pptx_file"; filename="deck.pptx""#));
            assert!(request.contains("deck-bytes"));
            assert!(request.contains(r#"name="config""#));
            assert!(request.contains(r#""shape_name":"Title 1""#));
        }

        #[tokio::test]
        async fn edit_response_without_url_is_an_api_error() {
            let dir = TempDir::new().unwrap();
            let deck = dir.path().join("deck.pptx");
            std::fs::write(&deck, b"deck-bytes").unwrap();

            let stub = Stub::json("200 OK", json!({})).await;
            let err = stub.client().edit(&deck, &[]).await.unwrap_err();
            assert!(matches!(err, Error::Api(ref msg) if msg.contains("url")));
        }

        #[tokio::test]
        async fn edit_rejects_other_file_types_before_uploading() {
            let dir = TempDir::new().unwrap();
            let notes = dir.path().join("notes.txt");
            std::fs::write(&notes, b"text").unwrap();

            let client = client_for("http://127.0.0.1:9/api/v1");
            let err = client.edit(&notes, &[]).await.unwrap_err();
            assert!(
                matches!(err, Error::Presentation(ref msg) if msg.contains("Only .pptx files are supported"))
            );
        }

        #[tokio::test]
        async fn download_writes_the_file() {
            let dir = TempDir::new().unwrap();
            let dest = dir.path().join("out.pptx");
            let stub = Stub::serve("200 OK", "application/octet-stream", b"PK\x03\x04deck").await;
            let url = format!("{}/files/deck.pptx", stub.origin);
            let client = stub.client();

            let saved = download(&client, &url, Some(dest.clone())).await.unwrap();
            assert_eq!(saved, dest);
            assert_eq!(std::fs::read(&dest).unwrap(), b"PK\x03\x04deck");
            assert!(stub.received().await.starts_with("GET /files/deck.pptx HTTP/1.1"));
        }

        #[tokio::test]
        async fn failed_download_writes_nothing() {
            let dir = TempDir::new().unwrap();
            let dest = dir.path().join("out.pptx");
            let stub = Stub::serve("404 Not Found", "text/plain", b"gone").await;
            let url = format!("{}/files/deck.pptx", stub.origin);

            let err = download(&stub.client(), &url, Some(dest.clone()))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Api(ref msg) if msg.contains("404")));
            assert!(!dest.exists());
        }

        #[tokio::test]
        async fn connection_failure_is_a_network_error() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);

            let client = client_for(&format!("http://{addr}/api/v1"));
            let err = client.fetch_status("abc123").await.unwrap_err();
            assert!(matches!(err, Error::Network(_)), "{err}");
            assert!(err.to_string().starts_with("network error:"));
        }
    }
}
