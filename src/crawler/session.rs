//! Page sessions
//!
//! A page session is the capability a worker drives to reach a record: load a
//! URL, wait for elements, read them, fill inputs and click controls. Each
//! worker owns exactly one session for its whole lifetime.
//!
//! [`HttpPageSession`] implements the capability over plain HTTP:
//! - `reqwest` with a per-session cookie jar, so a CAPTCHA answer stays bound
//!   to the session that submitted it
//! - `scraper` for CSS selection over the loaded document
//! - link following and HTML form submission on `click`

use crate::config::BrowserConfig;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, Response};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors raised by a page session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Navigation to {locator} failed: {message}")]
    Navigation { locator: String, message: String },

    #[error("No element matches '{selector}'")]
    NotFound { selector: String },

    #[error("Timed out waiting for {what}")]
    Timeout { what: String },

    #[error("Invalid CSS selector '{0}'")]
    InvalidSelector(String),

    #[error("No page is loaded")]
    NoPage,

    #[error("Unsupported interaction: {0}")]
    Unsupported(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Snapshot of a matched element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    tag: String,
    text: String,
    attributes: HashMap<String, String>,
}

impl Node {
    pub fn new(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            text: text.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    fn from_element(element: ElementRef<'_>) -> Self {
        let text = element
            .text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            tag: element.value().name().to_string(),
            text,
            attributes: element
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Whitespace-normalised text content
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// The page automation capability consumed by workers
#[async_trait]
pub trait PageSession: Send {
    /// Loads a page, failing on network error, HTTP error status or timeout
    async fn goto(&mut self, locator: &Url, timeout: Duration) -> Result<(), SessionError>;

    /// Returns the first element matching `selector`
    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Node, SessionError>;

    /// Text of a previously matched element
    fn read(&self, node: &Node) -> String {
        node.text().to_string()
    }

    /// Sets the value of a form input
    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), SessionError>;

    /// Clicks a link or form control, loading whatever page results
    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<(), SessionError>;

    /// Raw bytes of an image element (CAPTCHA input for OCR)
    async fn capture(&mut self, node: &Node, timeout: Duration) -> Result<Vec<u8>, SessionError>;

    /// Releases the session
    async fn close(&mut self);
}

/// Creates one page session per worker
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PageSession>, SessionError>;
}

/// Opens [`HttpPageSession`]s sharing one configuration
pub struct HttpSessionFactory {
    user_agent: String,
}

impl HttpSessionFactory {
    pub fn new(config: &BrowserConfig) -> Self {
        if !config.headless {
            tracing::warn!("Visible mode requested, but HTTP page sessions are always headless");
        }
        Self {
            user_agent: config.user_agent.clone(),
        }
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open(&self) -> Result<Box<dyn PageSession>, SessionError> {
        let client = build_session_client(&self.user_agent)?;
        Ok(Box::new(HttpPageSession::new(client)))
    }
}

/// Builds the HTTP client backing one session
///
/// Every session gets its own cookie jar.
pub fn build_session_client(user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .cookie_store(true)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

struct LoadedPage {
    url: Url,
    html: String,
}

enum ClickAction {
    Follow(Url),
    Submit {
        post: bool,
        action: Url,
        fields: Vec<(String, String)>,
    },
}

/// Page session over HTTP and static HTML
pub struct HttpPageSession {
    client: Client,
    page: Option<LoadedPage>,
    /// Values set by `fill`, keyed by input name, sent with the next form submission
    filled: HashMap<String, String>,
}

impl HttpPageSession {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            page: None,
            filled: HashMap::new(),
        }
    }

    /// URL of the loaded page, after redirects
    pub fn current_url(&self) -> Option<&Url> {
        self.page.as_ref().map(|p| &p.url)
    }

    fn page(&self) -> Result<&LoadedPage, SessionError> {
        self.page.as_ref().ok_or(SessionError::NoPage)
    }

    async fn load(&mut self, response: Response) -> Result<(), SessionError> {
        let status = response.status();
        let url = response.url().clone();
        if !status.is_success() {
            return Err(SessionError::Navigation {
                locator: url.to_string(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        let html = response.text().await?;
        tracing::trace!("Loaded {} ({} bytes)", url, html.len());
        self.page = Some(LoadedPage { url, html });
        self.filled.clear();
        Ok(())
    }
}

#[async_trait]
impl PageSession for HttpPageSession {
    async fn goto(&mut self, locator: &Url, timeout: Duration) -> Result<(), SessionError> {
        let response = self
            .client
            .get(locator.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(locator, e))?;
        self.load(response).await
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<Node, SessionError> {
        // A static document never changes, so the first look is final
        let page = self.page()?;
        first_match(&page.html, selector)?.ok_or_else(|| SessionError::NotFound {
            selector: selector.to_string(),
        })
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), SessionError> {
        let page = self.page()?;
        let node = first_match(&page.html, selector)?.ok_or_else(|| SessionError::NotFound {
            selector: selector.to_string(),
        })?;
        let name = node.attribute("name").ok_or_else(|| {
            SessionError::Unsupported(format!("'{}' has no name attribute", selector))
        })?;
        self.filled.insert(name.to_string(), text.to_string());
        Ok(())
    }

    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<(), SessionError> {
        let action = {
            let page = self.page()?;
            plan_click(&page.html, &page.url, selector, &self.filled)?
        };

        let (target, request) = match action {
            ClickAction::Follow(url) => (url.clone(), self.client.get(url)),
            ClickAction::Submit {
                post: true,
                action,
                fields,
            } => (action.clone(), self.client.post(action).form(&fields)),
            ClickAction::Submit {
                post: false,
                mut action,
                fields,
            } => {
                action.query_pairs_mut().clear().extend_pairs(&fields);
                (action.clone(), self.client.get(action))
            }
        };

        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(&target, e))?;
        self.load(response).await
    }

    async fn capture(&mut self, node: &Node, timeout: Duration) -> Result<Vec<u8>, SessionError> {
        let src = node.attribute("src").ok_or_else(|| {
            SessionError::Unsupported(format!("cannot capture a <{}> without src", node.tag()))
        })?;
        let url = self
            .page()?
            .url
            .join(src)
            .map_err(|e| SessionError::Navigation {
                locator: src.to_string(),
                message: e.to_string(),
            })?;

        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(&url, e))?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn close(&mut self) {
        self.page = None;
        self.filled.clear();
    }
}

fn request_error(target: &Url, error: reqwest::Error) -> SessionError {
    if error.is_timeout() {
        SessionError::Timeout {
            what: target.to_string(),
        }
    } else {
        SessionError::Navigation {
            locator: target.to_string(),
            message: error.to_string(),
        }
    }
}

fn compile(selector: &str) -> Result<Selector, SessionError> {
    Selector::parse(selector).map_err(|_| SessionError::InvalidSelector(selector.to_string()))
}

fn first_match(html: &str, selector: &str) -> Result<Option<Node>, SessionError> {
    let selector = compile(selector)?;
    let document = Html::parse_document(html);
    let node = document.select(&selector).next().map(Node::from_element);
    Ok(node)
}

/// Works out what clicking the first element matching `selector` does
fn plan_click(
    html: &str,
    base: &Url,
    selector: &str,
    filled: &HashMap<String, String>,
) -> Result<ClickAction, SessionError> {
    let compiled = compile(selector)?;
    let document = Html::parse_document(html);
    let element = document
        .select(&compiled)
        .next()
        .ok_or_else(|| SessionError::NotFound {
            selector: selector.to_string(),
        })?;

    if element.value().name() == "a" {
        if let Some(href) = element.value().attr("href") {
            return Ok(ClickAction::Follow(resolve(base, href)?));
        }
    }

    let form = element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "form")
        .ok_or_else(|| {
            SessionError::Unsupported(format!(
                "'{}' is neither a link nor inside a form",
                selector
            ))
        })?;

    let action = match form.value().attr("action").map(str::trim) {
        Some(action) if !action.is_empty() => resolve(base, action)?,
        _ => base.clone(),
    };
    let post = form
        .value()
        .attr("method")
        .is_some_and(|m| m.eq_ignore_ascii_case("post"));

    let mut fields = form_fields(form, filled)?;
    if let Some(name) = element.value().attr("name") {
        let value = element.value().attr("value").unwrap_or_default();
        fields.push((name.to_string(), value.to_string()));
    }

    Ok(ClickAction::Submit {
        post,
        action,
        fields,
    })
}

/// Successful controls of a form, with filled values taking precedence
fn form_fields(
    form: ElementRef<'_>,
    filled: &HashMap<String, String>,
) -> Result<Vec<(String, String)>, SessionError> {
    let controls = compile("input[name], textarea[name], select[name]")?;
    let options = compile("option")?;
    let mut fields = Vec::new();

    for control in form.select(&controls) {
        let value = control.value();
        let name = value.attr("name").unwrap_or_default();

        let default = match value.name() {
            "textarea" => control.text().collect::<String>(),
            "select" => {
                let choices: Vec<ElementRef<'_>> = control.select(&options).collect();
                let chosen = choices
                    .iter()
                    .find(|o| o.value().attr("selected").is_some())
                    .or_else(|| choices.first());
                match chosen {
                    Some(option) => option
                        .value()
                        .attr("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| option.text().collect::<String>().trim().to_string()),
                    None => continue,
                }
            }
            _ => {
                let kind = value.attr("type").unwrap_or("text").to_ascii_lowercase();
                match kind.as_str() {
                    "submit" | "button" | "image" | "reset" | "file" => continue,
                    "checkbox" | "radio" => {
                        if value.attr("checked").is_none() {
                            continue;
                        }
                        value.attr("value").unwrap_or("on").to_string()
                    }
                    _ => value.attr("value").unwrap_or_default().to_string(),
                }
            }
        };

        let submitted = filled.get(name).cloned().unwrap_or(default);
        fields.push((name.to_string(), submitted));
    }

    Ok(fields)
}

fn resolve(base: &Url, href: &str) -> Result<Url, SessionError> {
    base.join(href).map_err(|e| SessionError::Navigation {
        locator: href.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const WAIT: Duration = Duration::from_secs(5);

    fn session() -> HttpPageSession {
        HttpPageSession::new(build_session_client("TestHarvester/1.0").unwrap())
    }

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_string(format!("<html><body>{}</body></html>", body))
            .insert_header("content-type", "text/html")
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[tokio::test]
    async fn test_goto_and_read() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/view/401"))
            .respond_with(html(
                r#"<div class="form-card"><h4 id="name">  Skyline
                   Towers </h4><input id="reg" name="reg" value="P5190"></div>"#,
            ))
            .mount(&server)
            .await;

        let mut session = session();
        session.goto(&url(&server, "/view/401"), WAIT).await.unwrap();

        let name = session.wait_for_selector("#name", WAIT).await.unwrap();
        assert_eq!(session.read(&name), "Skyline Towers");

        let reg = session.wait_for_selector("input#reg", WAIT).await.unwrap();
        assert_eq!(reg.tag(), "input");
        assert_eq!(reg.attribute("value"), Some("P5190"));
    }

    #[tokio::test]
    async fn test_missing_selector() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html("<p>nothing here</p>"))
            .mount(&server)
            .await;

        let mut session = session();
        session.goto(&url(&server, "/"), WAIT).await.unwrap();

        assert!(matches!(
            session.wait_for_selector("div.form-card", WAIT).await,
            Err(SessionError::NotFound { .. })
        ));
        assert!(matches!(
            session.wait_for_selector("div[[", WAIT).await,
            Err(SessionError::InvalidSelector(_))
        ));
    }

    #[tokio::test]
    async fn test_http_error_is_navigation_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut session = session();
        let result = session.goto(&url(&server, "/view/1"), WAIT).await;
        assert!(matches!(result, Err(SessionError::Navigation { .. })));
    }

    #[tokio::test]
    async fn test_slow_page_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html("<p>late</p>").set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let mut session = session();
        let result = session
            .goto(&url(&server, "/"), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(SessionError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_wait_without_page() {
        let mut session = session();
        assert!(matches!(
            session.wait_for_selector("p", WAIT).await,
            Err(SessionError::NoPage)
        ));
    }

    #[tokio::test]
    async fn test_fill_and_submit_post_form() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/view/7"))
            .respond_with(html(
                r#"<form method="post" action="/verify">
                     <input type="hidden" name="token" value="t-1">
                     <input type="text" name="captcha">
                     <input type="checkbox" name="remember" value="yes">
                     <button class="next" name="go" value="1">Submit</button>
                   </form>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_string_contains("token=t-1"))
            .and(body_string_contains("captcha=AB12CD"))
            .and(body_string_contains("go=1"))
            .respond_with(html(r#"<div class="form-card">record</div>"#))
            .mount(&server)
            .await;

        let mut session = session();
        session.goto(&url(&server, "/view/7"), WAIT).await.unwrap();
        session.fill("input[name='captcha']", "AB12CD").await.unwrap();
        session.click("button.next", WAIT).await.unwrap();

        let card = session.wait_for_selector("div.form-card", WAIT).await.unwrap();
        assert_eq!(card.text(), "record");
        assert_eq!(session.current_url().unwrap().path(), "/verify");
    }

    #[tokio::test]
    async fn test_submit_get_form_and_follow_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "P51900001234"))
            .respond_with(html(r#"<a class="view" href="/view/9">View Details</a>"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/view/9"))
            .respond_with(html("<h4>Project 9</h4>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html(
                r#"<form action="/search"><input name="q"><input type="submit" id="s"></form>"#,
            ))
            .mount(&server)
            .await;

        let mut session = session();
        session.goto(&url(&server, "/"), WAIT).await.unwrap();
        session.fill("input[name='q']", "P51900001234").await.unwrap();
        session.click("#s", WAIT).await.unwrap();
        session.click("a.view", WAIT).await.unwrap();

        let heading = session.wait_for_selector("h4", WAIT).await.unwrap();
        assert_eq!(heading.text(), "Project 9");
    }

    #[tokio::test]
    async fn test_click_outside_form_is_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html(r#"<button id="lonely">x</button>"#))
            .mount(&server)
            .await;

        let mut session = session();
        session.goto(&url(&server, "/"), WAIT).await.unwrap();
        assert!(matches!(
            session.click("#lonely", WAIT).await,
            Err(SessionError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_capture_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/captcha.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/view/3"))
            .respond_with(html(r#"<img id="captcha" src="/captcha.png">"#))
            .mount(&server)
            .await;

        let mut session = session();
        session.goto(&url(&server, "/view/3"), WAIT).await.unwrap();
        let image = session.wait_for_selector("img#captcha", WAIT).await.unwrap();
        let bytes = session.capture(&image, WAIT).await.unwrap();
        assert_eq!(bytes, vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn test_form_fields_select_and_textarea() {
        let html = r#"<form>
            <select name="district"><option value="a">A</option><option value="b" selected>B</option></select>
            <textarea name="note">hello</textarea>
            <input type="radio" name="kind" value="x">
            <input type="radio" name="kind" value="y" checked>
            <button id="go">Go</button>
        </form>"#;
        let base = Url::parse("https://registry.example.gov/form").unwrap();
        let mut filled = HashMap::new();
        filled.insert("note".to_string(), "overridden".to_string());

        match plan_click(html, &base, "#go", &filled).unwrap() {
            ClickAction::Submit {
                post,
                action,
                fields,
            } => {
                assert!(!post);
                assert_eq!(action, base);
                assert_eq!(
                    fields,
                    vec![
                        ("district".to_string(), "b".to_string()),
                        ("note".to_string(), "overridden".to_string()),
                        ("kind".to_string(), "y".to_string()),
                    ]
                );
            }
            ClickAction::Follow(_) => panic!("expected a form submission"),
        }
    }
}
