//! Model files run against a mock HTTP server

use serde_json::Value;
use std::path::Path;
use sumi_tide::config::parse_model;
use sumi_tide::crawler::crawl;
use sumi_tide::output::SqliteSink;
use sumi_tide::PhaseState;
use tempfile::TempDir;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING: &str = r#"<html><body><ul>
<li class="book"><a href="/book/1">Dune</a><span class="price">9.99</span></li>
<li class="book"><a href="/book/2">Emma</a><span class="price">25.00</span></li>
<li class="book"><a href="/book/1">Dune</a><span class="price">9.99</span></li>
</ul></body></html>"#;

/// Listing phase forwarding book links to a detail phase; `BASE` and
/// `SINK` are filled in per test
const BOOKS_MODEL: &str = r#"
name = "books"

[engine]
workers = 2
parse-timeout-ms = 20
progress-interval-secs = 0

[[sink]]
SINK

[[phase]]
name = "listing"
seeds = ["BASE/list"]

[[phase.schema]]
name = "book"
selector = "li.book"

[[phase.schema.field]]
name = "title"
selector = "a"
required = true

[[phase.schema.field]]
name = "price"
selector = ".price"
transforms = ["number"]

[[phase.schema.field]]
name = "link"
selector = "a"
attr = "href"

[phase.schema.field.emit]
copy = ["title"]
active = false

[[phase]]
name = "details"

[[phase.schema]]
name = "detail"

[[phase.schema.field]]
name = "isbn"
selector = ".isbn"
"#;

fn books_model(base: &str, sink: &str) -> String {
    BOOKS_MODEL.replace("BASE", base).replace("SINK", sink)
}

fn sink_entry(kind: &str, path: &Path) -> String {
    format!(
        "name = \"out\"\nkind = \"{}\"\npath = \"{}\"",
        kind,
        path.display()
    )
}

async fn mount_page(server: &MockServer, route: &str, body: &str, calls: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(calls)
        .mount(server)
        .await;
}

async fn book_site() -> MockServer {
    let server = MockServer::start().await;
    mount_page(&server, "/list", LISTING, 1).await;
    mount_page(&server, "/book/1", r#"<p class="isbn">111</p>"#, 1).await;
    mount_page(&server, "/book/2", r#"<p class="isbn">222</p>"#, 1).await;
    server
}

#[tokio::test]
async fn test_crawl_to_jsonl() {
    let server = book_site().await;
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("books.jsonl");

    let model = parse_model(&books_model(&server.uri(), &sink_entry("jsonl", &out)), "books").unwrap();
    let report = crawl(model).await.unwrap();

    assert_eq!(report.phases.len(), 2);
    assert!(report.phases.iter().all(|p| p.state == PhaseState::Complete));
    assert_eq!(report.phases[0].forwarded, 2);
    assert_eq!(report.phases[1].fed, 2);
    assert_eq!(report.total_records(), 5);
    assert_eq!(report.sinks[0].records, 5);

    let lines: Vec<Value> = std::fs::read_to_string(&out)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 5);

    let books: Vec<&Value> = lines.iter().filter(|l| l["schema"] == "book").collect();
    assert_eq!(books.len(), 3);
    assert_eq!(books[0]["fields"]["title"], "Dune");
    assert_eq!(books[0]["fields"]["price"].as_f64(), Some(9.99));

    let mut details: Vec<(String, String)> = lines
        .iter()
        .filter(|l| l["schema"] == "detail")
        .map(|l| {
            (
                l["fields"]["isbn"].as_str().unwrap().to_string(),
                l["fields"]["title"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    details.sort();
    assert_eq!(
        details,
        vec![
            ("111".to_string(), "Dune".to_string()),
            ("222".to_string(), "Emma".to_string())
        ]
    );
}

#[tokio::test]
async fn test_crawl_to_sqlite() {
    let server = book_site().await;
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("books.db");

    let model = parse_model(&books_model(&server.uri(), &sink_entry("sqlite", &db)), "books").unwrap();
    let report = crawl(model).await.unwrap();
    assert_eq!(report.total_records(), 5);

    let sink = SqliteSink::open("out", &db).unwrap();
    assert_eq!(sink.count(Some("book")).unwrap(), 3);
    assert_eq!(sink.count(Some("detail")).unwrap(), 2);
    assert_eq!(sink.count(None).unwrap(), 5);
}

#[tokio::test]
async fn test_http_errors_are_dropped() {
    let server = MockServer::start().await;
    mount_page(&server, "/ok", "<p>fine</p>", 1).await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let toml = format!(
        r#"
[engine]
parse-timeout-ms = 20
progress-interval-secs = 0

[[sink]]
name = "log"
kind = "log"

[[phase]]
name = "only"
seeds = ["{base}/ok", "{base}/gone"]

[[phase.schema]]
name = "page"

[[phase.schema.field]]
name = "text"
selector = "p"
"#,
        base = server.uri()
    );

    let report = crawl(parse_model(&toml, "errors").unwrap()).await.unwrap();
    let phase = &report.phases[0];
    assert_eq!(phase.state, PhaseState::Complete);
    assert_eq!(phase.fed, 2);
    assert_eq!(phase.parsed, 1);
    assert_eq!(phase.dropped, 1);
    assert_eq!(phase.requeued, 0);
}

#[tokio::test]
async fn test_request_template_reaches_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(query_param("q", "rust"))
        .and(header("x-token", "abc"))
        .and(body_string("page=1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>hit</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let toml = format!(
        r#"
[engine]
parse-timeout-ms = 20
progress-interval-secs = 0

[[sink]]
name = "log"
kind = "log"

[[phase]]
name = "search"
seeds = ["{base}/search"]

[phase.request]
method = "POST"
params = {{ q = "rust" }}
headers = {{ x-token = "abc" }}
body = "page=1"

[[phase.schema]]
name = "hit"

[[phase.schema.field]]
name = "text"
selector = "p"
"#,
        base = server.uri()
    );

    let report = crawl(parse_model(&toml, "search").unwrap()).await.unwrap();
    assert_eq!(report.phases[0].parsed, 1);
    assert_eq!(report.total_records(), 1);
}

#[tokio::test]
async fn test_generated_pages() {
    let server = MockServer::start().await;
    for n in 1..=3 {
        mount_page(&server, &format!("/page/{}", n), &format!("<p>{}</p>", n), 1).await;
    }

    let toml = format!(
        r#"
[engine]
workers = 3
parse-timeout-ms = 20
progress-interval-secs = 0

[[sink]]
name = "log"
kind = "log"

[[phase]]
name = "pages"

[[phase.generate]]
template = "{base}/page/{{}}"
start = 1
end = 3

[[phase.schema]]
name = "page"

[[phase.schema.field]]
name = "n"
selector = "p"
transforms = ["integer"]
"#,
        base = server.uri()
    );

    let report = crawl(parse_model(&toml, "pages").unwrap()).await.unwrap();
    assert_eq!(report.phases[0].fed, 3);
    assert_eq!(report.phases[0].parsed, 3);
    assert_eq!(report.total_records(), 3);
}
