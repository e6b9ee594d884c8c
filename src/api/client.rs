// Blocking HTTP client for the platform's REST API.
// It is intentionally small and synchronous: the uploader processes one
// file at a time, so a blocking `reqwest` client with its connection pool
// is all the transport the run needs.

use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Proxy;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use serde_json::json;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use super::{
    AssessmentId, ClientId, ClientSummary, NetworkSummary, NewAssessment, PlatformApi,
    RemoteState, UploadId, UploadTarget,
};
use crate::config::{ProxySettings, RunConfiguration};
use crate::error::{Result, UploadError};

const API_KEY_HEADER: &str = "x-api-key";
const PAGE_SIZE: u64 = 150;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const AGENT: &str = concat!("upload-to-platform/", env!("CARGO_PKG_VERSION"));

/// Platform client holding a reqwest blocking client (and its connection
/// pool) plus the base URL of the platform. The API key travels in the
/// client's default headers so no request can go out without it.
#[derive(Clone)]
pub struct PlatformClient {
    client: Client,
    base_url: String,
}

/// Paged listing as returned by the platform:
/// `{"_embedded": {"clients": [...]}, "page": {"number": 0, "totalPages": 1}}`.
#[derive(Deserialize)]
struct Listing<T> {
    #[serde(rename = "_embedded", default = "Embedded::empty")]
    embedded: Embedded<T>,
    #[serde(default)]
    page: PageInfo,
}

#[derive(Deserialize)]
struct Embedded<T> {
    #[serde(
        alias = "clients",
        alias = "networks",
        alias = "uploads",
        alias = "files",
        default = "Vec::new"
    )]
    items: Vec<T>,
}

impl<T> Embedded<T> {
    fn empty() -> Self {
        Embedded { items: Vec::new() }
    }
}

#[derive(Deserialize, Default)]
struct PageInfo {
    #[serde(rename = "totalPages", default)]
    total_pages: u64,
}

#[derive(Deserialize)]
struct Created<I> {
    id: I,
}

#[derive(Deserialize)]
struct UploadSummary {
    id: UploadId,
    name: String,
}

#[derive(Debug, Deserialize)]
struct UploadDetail {
    state: String,
}

impl PlatformClient {
    /// Build a client from the run configuration: API key header, user
    /// agent, timeout and (optionally) the proxy.
    pub fn from_config(config: &RunConfiguration) -> Result<Self> {
        Self::new(&config.platform, &config.api_key, &config.proxy)
    }

    pub fn new(base_url: &str, api_key: &str, proxy: &ProxySettings) -> Result<Self> {
        let mut builder = Client::builder()
            .default_headers(auth_headers(api_key)?)
            .timeout(REQUEST_TIMEOUT);

        if let Some(proxy) = build_proxy(proxy)? {
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| UploadError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(PlatformClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Send a request and keep only successful responses; everything else
    /// is classified into an error kind.
    fn send(&self, request: RequestBuilder) -> Result<Response> {
        let res = request.send().map_err(map_send_error)?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().unwrap_or_default();
        Err(classify_status(status.as_u16(), body))
    }

    fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        decode(self.send(request)?)
    }
}

/// Header map carried by every request.
fn auth_headers(api_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut key = HeaderValue::from_str(api_key)
        .map_err(|e| UploadError::Configuration(format!("API key is not a valid header value: {}", e)))?;
    key.set_sensitive(true);
    headers.insert(API_KEY_HEADER, key);
    headers.insert(USER_AGENT, HeaderValue::from_static(AGENT));
    Ok(headers)
}

fn build_proxy(settings: &ProxySettings) -> Result<Option<Proxy>> {
    if !settings.enabled {
        return Ok(None);
    }
    let (Some(host), Some(port)) = (settings.host.as_deref(), settings.port) else {
        return Err(UploadError::Configuration(
            "proxy is enabled but host or port is missing".into(),
        ));
    };
    let url = if host.contains("://") {
        format!("{}:{}", host, port)
    } else {
        format!("http://{}:{}", host, port)
    };
    let mut proxy = Proxy::all(&url)
        .map_err(|e| UploadError::Configuration(format!("invalid proxy '{}': {}", url, e)))?;
    if settings.authentication {
        proxy = proxy.basic_auth(
            settings.user.as_deref().unwrap_or_default(),
            settings.password.as_deref().unwrap_or_default(),
        );
    }
    Ok(Some(proxy))
}

/// Map a non-success HTTP status to an error kind.
pub(crate) fn classify_status(status: u16, body: String) -> UploadError {
    match status {
        401 | 403 => UploadError::Auth { status, body },
        429 | 500..=599 => UploadError::Transient(format!("HTTP {}: {}", status, body)),
        _ => UploadError::Request { status, body },
    }
}

fn map_send_error(e: reqwest::Error) -> UploadError {
    if e.is_builder() {
        UploadError::Configuration(format!("invalid request: {}", e))
    } else {
        UploadError::Transient(e.to_string())
    }
}

fn decode<T: DeserializeOwned>(res: Response) -> Result<T> {
    let text = res
        .text()
        .map_err(|e| UploadError::Transient(format!("failed reading response body: {}", e)))?;
    parse_body(&text)
}

pub(crate) fn parse_body<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| {
        let snippet: String = text.chars().take(200).collect();
        UploadError::Protocol(format!("{} in body: {}", e, snippet))
    })
}

/// Walk every page of a listing endpoint.
fn collect_pages<T>(mut fetch: impl FnMut(u64) -> Result<Listing<T>>) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut page = 0;
    loop {
        let listing = fetch(page)?;
        items.extend(listing.embedded.items);
        page += 1;
        if page >= listing.page.total_pages {
            break;
        }
    }
    Ok(items)
}

impl PlatformApi for PlatformClient {
    fn authenticate_and_list_clients(&self) -> Result<Vec<ClientSummary>> {
        let url = self.url("/client");
        collect_pages(|page| {
            self.get_json(
                self.client
                    .get(&url)
                    .query(&[("size", PAGE_SIZE), ("page", page)]),
            )
        })
    }

    fn list_networks(&self, client_id: ClientId) -> Result<Vec<NetworkSummary>> {
        let url = self.url(&format!("/client/{}/network/search", client_id));
        collect_pages(|page| {
            let body = json!({
                "filters": [
                    { "field": "name", "exclusive": false, "operator": "LIKE", "value": "" }
                ],
                "projection": "basic",
                "sort": [ { "field": "id", "direction": "ASC" } ],
                "page": page,
                "size": PAGE_SIZE
            });
            self.get_json(self.client.post(&url).json(&body))
        })
    }

    fn create_assessment(&self, client_id: ClientId, assessment: &NewAssessment) -> Result<AssessmentId> {
        let url = self.url(&format!("/client/{}/assessment", client_id));
        let created: Created<AssessmentId> = self.get_json(self.client.post(&url).json(assessment))?;
        Ok(created.id)
    }

    fn create_upload(&self, target: &UploadTarget, upload_name: &str) -> Result<UploadId> {
        let url = self.url(&format!("/client/{}/upload", target.client_id));
        let body = json!({
            "assessmentId": target.assessment_id,
            "networkId": target.network_id,
            "name": upload_name
        });
        let created: Created<UploadId> = self.get_json(self.client.post(&url).json(&body))?;
        tracing::debug!(upload_id = %created.id, upload_name, "created upload");
        Ok(created.id)
    }

    fn find_upload(&self, target: &UploadTarget, upload_name: &str) -> Result<Option<UploadId>> {
        let url = self.url(&format!("/client/{}/upload", target.client_id));
        let assessment = target.assessment_id.to_string();
        let uploads: Vec<UploadSummary> = collect_pages(|page| {
            let page = page.to_string();
            let size = PAGE_SIZE.to_string();
            self.get_json(self.client.get(&url).query(&[
                ("assessmentId", assessment.as_str()),
                ("size", size.as_str()),
                ("page", page.as_str()),
            ]))
        })?;
        Ok(uploads
            .into_iter()
            .find(|upload| upload.name == upload_name)
            .map(|upload| upload.id))
    }

    fn attach_file(&self, client_id: ClientId, upload_id: UploadId, path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|e| UploadError::io(path, e))?;
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("scan_file")
            .to_string();

        let part = multipart::Part::reader(file).file_name(file_name);
        let form = multipart::Form::new().part("scanFile", part);
        let url = self.url(&format!("/client/{}/upload/{}/file", client_id, upload_id));
        self.send(self.client.post(&url).multipart(form))?;
        tracing::debug!(%upload_id, path = %path.display(), "attached scan file");
        Ok(())
    }

    fn attached_files(&self, client_id: ClientId, upload_id: UploadId) -> Result<usize> {
        let url = self.url(&format!("/client/{}/upload/{}/file", client_id, upload_id));
        let files: Vec<IgnoredAny> = collect_pages(|page| {
            self.get_json(
                self.client
                    .get(&url)
                    .query(&[("size", PAGE_SIZE), ("page", page)]),
            )
        })?;
        Ok(files.len())
    }

    fn start_processing(&self, client_id: ClientId, upload_id: UploadId, auto_urba: bool) -> Result<()> {
        let url = self.url(&format!("/client/{}/upload/{}/start", client_id, upload_id));
        self.send(self.client.post(&url).json(&json!({ "autoUrba": auto_urba })))?;
        tracing::debug!(%upload_id, auto_urba, "processing started");
        Ok(())
    }

    fn get_file_status(&self, client_id: ClientId, upload_id: UploadId) -> Result<RemoteState> {
        let url = self.url(&format!("/client/{}/upload/{}", client_id, upload_id));
        let detail: UploadDetail = self.get_json(self.client.get(&url))?;
        Ok(RemoteState::from_platform(&detail.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(classify_status(401, String::new()), UploadError::Auth { status: 401, .. }));
        assert!(matches!(classify_status(403, String::new()), UploadError::Auth { .. }));
        assert!(classify_status(503, "busy".into()).is_transient());
        assert!(classify_status(429, String::new()).is_transient());
        assert!(matches!(
            classify_status(404, "gone".into()),
            UploadError::Request { status: 404, .. }
        ));
    }

    #[test]
    fn malformed_body_is_protocol_error() {
        let err = parse_body::<UploadDetail>("<html>oops</html>").unwrap_err();
        assert!(matches!(err, UploadError::Protocol(_)));
    }

    #[test]
    fn listing_without_embedded_is_empty() {
        let listing: Listing<ClientSummary> =
            parse_body(r#"{"page": {"number": 0, "totalPages": 0, "totalElements": 0}}"#).unwrap();
        assert!(listing.embedded.items.is_empty());
    }

    #[test]
    fn listing_reads_named_collections() {
        let listing: Listing<ClientSummary> = parse_body(
            r#"{"_embedded": {"clients": [{"id": 1, "name": "Acme"}]}, "page": {"totalPages": 1}}"#,
        )
        .unwrap();
        assert_eq!(listing.embedded.items[0].name, "Acme");
    }

    #[test]
    fn pages_are_walked_until_total() {
        let mut seen = Vec::new();
        let items = collect_pages(|page| {
            seen.push(page);
            parse_body::<Listing<ClientSummary>>(&format!(
                r#"{{"_embedded": {{"clients": [{{"id": {}, "name": "c"}}]}}, "page": {{"totalPages": 3}}}}"#,
                page + 1
            ))
        })
        .unwrap();
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn proxy_requires_host_and_port() {
        let settings = ProxySettings {
            enabled: true,
            host: Some("proxy.local".into()),
            port: None,
            ..ProxySettings::default()
        };
        assert!(matches!(build_proxy(&settings), Err(UploadError::Configuration(_))));

        let disabled = ProxySettings::default();
        assert!(build_proxy(&disabled).unwrap().is_none());
    }

    #[test]
    fn api_key_must_be_header_safe() {
        assert!(auth_headers("abc123").is_ok());
        assert!(matches!(auth_headers("bad\nkey"), Err(UploadError::Configuration(_))));
    }

    mod http {
        use super::*;
        use crate::api::{AssessmentId, NetworkId};
        use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
        use wiremock::{Mock, MockServer, Request, ResponseTemplate};

        const KEY: &str = "test-key";

        /// A wiremock server on its own thread, queried from the blocking client.
        struct Platform {
            server: MockServer,
            runtime: tokio::runtime::Runtime,
        }

        impl Platform {
            fn start() -> Self {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                let server = runtime.block_on(MockServer::start());
                Platform { server, runtime }
            }

            fn mount(&self, mock: Mock) {
                self.runtime.block_on(mock.mount(&self.server));
            }

            fn client(&self) -> PlatformClient {
                PlatformClient::new(&self.server.uri(), KEY, &ProxySettings::default()).unwrap()
            }

            fn requests(&self) -> Vec<Request> {
                self.runtime
                    .block_on(self.server.received_requests())
                    .unwrap_or_default()
            }
        }

        fn target() -> UploadTarget {
            UploadTarget {
                client_id: ClientId(1),
                network_id: NetworkId(10),
                assessment_id: AssessmentId(100),
            }
        }

        #[test]
        fn client_listing_sends_key_and_walks_every_page() {
            let platform = Platform::start();
            platform.mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1/client"))
                    .and(query_param("page", "0"))
                    .and(header("x-api-key", KEY))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "_embedded": { "clients": [ { "id": 1, "name": "Acme" } ] },
                        "page": { "number": 0, "totalPages": 2 }
                    }))),
            );
            platform.mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1/client"))
                    .and(query_param("page", "1"))
                    .and(header("x-api-key", KEY))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "_embedded": { "clients": [ { "id": 2, "name": "Globex" } ] },
                        "page": { "number": 1, "totalPages": 2 }
                    }))),
            );

            let clients = platform.client().authenticate_and_list_clients().unwrap();

            let names: Vec<&str> = clients.iter().map(|c| c.name.as_str()).collect();
            assert_eq!(names, vec!["Acme", "Globex"]);
            let requests = platform.requests();
            assert_eq!(requests.len(), 2);
            for request in &requests {
                let agent = request.headers.get("user-agent").unwrap().to_str().unwrap();
                assert!(agent.starts_with("upload-to-platform/"));
            }
        }

        #[test]
        fn rejected_key_is_an_auth_error() {
            let platform = Platform::start();
            platform.mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1/client"))
                    .respond_with(ResponseTemplate::new(401).set_body_string("invalid key")),
            );

            let err = platform.client().authenticate_and_list_clients().unwrap_err();

            assert!(err.is_fatal());
            match err {
                UploadError::Auth { status, body } => {
                    assert_eq!(status, 401);
                    assert_eq!(body, "invalid key");
                }
                other => panic!("expected auth error, got {:?}", other),
            }
        }

        #[test]
        fn server_errors_are_transient_and_client_errors_are_not() {
            let platform = Platform::start();
            platform.mount(
                Mock::given(method("POST"))
                    .and(path("/api/v1/client/1/assessment"))
                    .respond_with(ResponseTemplate::new(503)),
            );
            platform.mount(
                Mock::given(method("POST"))
                    .and(path("/api/v1/client/2/assessment"))
                    .respond_with(ResponseTemplate::new(422).set_body_string("bad date")),
            );
            let assessment = NewAssessment {
                name: "assmnt".into(),
                start_date: "2024-01-02".into(),
                notes: String::new(),
            };
            let client = platform.client();

            assert!(client.create_assessment(ClientId(1), &assessment).unwrap_err().is_transient());
            assert!(matches!(
                client.create_assessment(ClientId(2), &assessment),
                Err(UploadError::Request { status: 422, .. })
            ));
        }

        #[test]
        fn upload_steps_hit_their_endpoints() {
            let dir = tempfile::tempdir().unwrap();
            let scan = dir.path().join("scan.xml");
            std::fs::write(&scan, b"<report/>").unwrap();

            let platform = Platform::start();
            platform.mount(
                Mock::given(method("POST"))
                    .and(path("/api/v1/client/1/upload"))
                    .and(body_json(json!({
                        "assessmentId": 100,
                        "networkId": 10,
                        "name": "upload-x-scan.xml"
                    })))
                    .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 555 }))),
            );
            platform.mount(
                Mock::given(method("POST"))
                    .and(path("/api/v1/client/1/upload/555/file"))
                    .and(body_string_contains("name=\"scanFile\""))
                    .respond_with(ResponseTemplate::new(201)),
            );
            platform.mount(
                Mock::given(method("POST"))
                    .and(path("/api/v1/client/1/upload/555/start"))
                    .and(body_json(json!({ "autoUrba": true })))
                    .respond_with(ResponseTemplate::new(200)),
            );
            let client = platform.client();

            let upload_id = client.create_upload(&target(), "upload-x-scan.xml").unwrap();
            client.attach_file(ClientId(1), upload_id, &scan).unwrap();
            client.start_processing(ClientId(1), upload_id, true).unwrap();

            assert_eq!(upload_id, UploadId(555));
            let requests = platform.requests();
            assert_eq!(requests.len(), 3);
            let attach = &requests[1];
            let content_type = attach.headers.get("content-type").unwrap().to_str().unwrap();
            assert!(content_type.starts_with("multipart/form-data"));
            let body = String::from_utf8_lossy(&attach.body);
            assert!(body.contains("filename=\"scan.xml\""));
            assert!(body.contains("<report/>"));
        }

        #[test]
        fn unreadable_file_is_io_and_nothing_is_sent() {
            let dir = tempfile::tempdir().unwrap();
            let platform = Platform::start();

            let err = platform
                .client()
                .attach_file(ClientId(1), UploadId(555), &dir.path().join("gone.xml"))
                .unwrap_err();

            assert!(matches!(err, UploadError::Io { .. }));
            assert!(platform.requests().is_empty());
        }

        #[test]
        fn attached_files_are_counted() {
            let platform = Platform::start();
            platform.mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1/client/1/upload/555/file"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "_embedded": { "files": [ { "id": 1, "filename": "scan.xml" } ] },
                        "page": { "totalPages": 1 }
                    }))),
            );
            platform.mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1/client/1/upload/556/file"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "page": { "totalPages": 0 }
                    }))),
            );
            let client = platform.client();

            assert_eq!(client.attached_files(ClientId(1), UploadId(555)).unwrap(), 1);
            assert_eq!(client.attached_files(ClientId(1), UploadId(556)).unwrap(), 0);
        }

        #[test]
        fn find_upload_matches_by_name_within_the_assessment() {
            let platform = Platform::start();
            platform.mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1/client/1/upload"))
                    .and(query_param("assessmentId", "100"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "_embedded": { "uploads": [
                            { "id": 7, "name": "upload-x-other.xml" },
                            { "id": 8, "name": "upload-x-scan.xml" }
                        ] },
                        "page": { "totalPages": 1 }
                    }))),
            );
            let client = platform.client();

            assert_eq!(
                client.find_upload(&target(), "upload-x-scan.xml").unwrap(),
                Some(UploadId(8))
            );
            assert_eq!(client.find_upload(&target(), "upload-x-missing.xml").unwrap(), None);
        }

        #[test]
        fn status_is_read_from_the_upload() {
            let platform = Platform::start();
            platform.mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1/client/1/upload/555"))
                    .respond_with(
                        ResponseTemplate::new(200).set_body_json(json!({ "id": 555, "state": "UPLOADING" })),
                    ),
            );
            platform.mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1/client/1/upload/556"))
                    .respond_with(
                        ResponseTemplate::new(200).set_body_json(json!({ "id": 556, "state": "COMPLETE" })),
                    ),
            );
            let client = platform.client();

            assert_eq!(
                client.get_file_status(ClientId(1), UploadId(555)).unwrap(),
                RemoteState::Uploading
            );
            assert_eq!(
                client.get_file_status(ClientId(1), UploadId(556)).unwrap(),
                RemoteState::Complete
            );
        }
    }
}
