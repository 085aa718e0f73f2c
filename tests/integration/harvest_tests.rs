use registry_harvester::config::{
    BrowserConfig, CaptchaConfig, Config, ExtractConfig, FieldSpec, OutputConfig, RunConfig,
    TimeoutConfig, WorkerConfig,
};
use registry_harvester::crawler::{harvest, Coordinator, IdSource, PhaseEnd};
use registry_harvester::state::IdKind;
use registry_harvester::HarvestError;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock registry
fn create_test_config(base_url: &str, dir: &Path, start: u64, end: u64) -> Config {
    Config {
        run: RunConfig {
            id_kind: IdKind::Integer,
            start_id: Some(start),
            end_id: Some(end),
            ids: vec![],
            locator_template: format!("{}/view/{{id}}", base_url),
        },
        workers: WorkerConfig {
            normal: 2,
            retry: 1,
            retry_backoff_ms: 50,
            retry_phase_timeout_secs: 1,
            preload_failures: true,
        },
        timeouts: TimeoutConfig {
            navigation_ms: 5_000,
            captcha_ms: 10_000,
            page_ready_ms: 5_000,
            selector_ms: 5_000,
            extraction_ms: 5_000,
            settle_ms: 0,
            session_ms: 5_000,
        },
        browser: BrowserConfig::default(),
        captcha: CaptchaConfig::default(),
        output: OutputConfig {
            success_path: dir.join("records.csv").display().to_string(),
            failure_path: dir.join("failed.csv").display().to_string(),
            id_column: "project_id".to_string(),
        },
        extract: ExtractConfig {
            ready_selector: Some("div.form-card".to_string()),
            timestamp_field: None,
            fields: vec![
                FieldSpec {
                    name: "project_name".to_string(),
                    selector: "#name".to_string(),
                    attribute: None,
                },
                FieldSpec {
                    name: "registration_no".to_string(),
                    selector: "input#reg".to_string(),
                    attribute: Some("value".to_string()),
                },
            ],
        },
    }
}

fn record_page(id: u64) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(format!(
            r#"<html><body><div class="form-card">
               <h4 id="name">Project {id}</h4>
               <input id="reg" value="P519000{id}" readonly>
               </div></body></html>"#,
            id = id
        ))
        .insert_header("content-type", "text/html")
}

fn captcha_page(id: u64) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(format!(
            r#"<html><body>
               <img id="captcha" src="/captcha/{id}.png">
               <form method="post" action="/view/{id}/verify">
                 <input type="hidden" name="token" value="t{id}">
                 <input type="text" name="captcha">
                 <button id="go" type="submit">Submit</button>
               </form></body></html>"#,
            id = id
        ))
        .insert_header("content-type", "text/html")
}

fn read_rows(path: &Path) -> Vec<String> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    let mut lines: Vec<String> = content.lines().skip(1).map(str::to_string).collect();
    lines.sort();
    lines
}

async fn requests_to(server: &MockServer, target: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == target)
        .count()
}

#[tokio::test]
async fn test_harvest_range_with_unreachable_record() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    for id in [401, 403] {
        Mock::given(method("GET"))
            .and(path(format!("/view/{}", id)))
            .respond_with(record_page(id))
            .mount(&mock_server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/view/402"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), dir.path(), 401, 403);
    let report = harvest(config, IdSource::Configured).await.unwrap();

    assert_eq!(report.seeded, 3);
    assert_eq!(report.initial_phase, PhaseEnd::Drained);
    assert_eq!(report.retry_phase, PhaseEnd::TimedOut);
    assert_eq!(report.ledger.succeeded, 2);
    assert_eq!(report.ledger.failed, 1);

    let records = std::fs::read_to_string(dir.path().join("records.csv")).unwrap();
    assert_eq!(
        records.lines().next(),
        Some("project_id,project_name,registration_no")
    );
    assert_eq!(
        read_rows(&dir.path().join("records.csv")),
        vec![
            "401,Project 401,P519000401".to_string(),
            "403,Project 403,P519000403".to_string(),
        ]
    );
    assert_eq!(
        read_rows(&dir.path().join("failed.csv")),
        vec![format!("402,{}/view/402", mock_server.uri())]
    );

    // The normal attempt plus at least one retry
    assert!(requests_to(&mock_server, "/view/402").await >= 2);
}

#[tokio::test]
async fn test_second_run_skips_attempted_ids() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    for id in 1..=4 {
        Mock::given(method("GET"))
            .and(path(format!("/view/{}", id)))
            .respond_with(record_page(id))
            .mount(&mock_server)
            .await;
    }

    let config = create_test_config(&mock_server.uri(), dir.path(), 1, 3);
    let report = harvest(config, IdSource::Configured).await.unwrap();
    assert_eq!(report.ledger.succeeded, 3);
    assert_eq!(report.retry_phase, PhaseEnd::Drained);

    // Widen the range by one: only the new id is fetched
    let config = create_test_config(&mock_server.uri(), dir.path(), 1, 4);
    let report = harvest(config, IdSource::Configured).await.unwrap();

    assert_eq!(report.seeded, 1);
    assert_eq!(report.already_attempted, 3);
    assert_eq!(report.ledger.succeeded, 4);
    for id in 1..=3 {
        assert_eq!(requests_to(&mock_server, &format!("/view/{}", id)).await, 1);
    }
    assert_eq!(read_rows(&dir.path().join("records.csv")).len(), 4);
}

#[tokio::test]
async fn test_recovered_failure_leaves_failure_store() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    std::fs::write(
        dir.path().join("failed.csv"),
        format!("project_id,locator\n7,{}/view/7\n", mock_server.uri()),
    )
    .unwrap();
    Mock::given(method("GET"))
        .and(path("/view/7"))
        .respond_with(record_page(7))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), dir.path(), 1, 1);
    let report = harvest(config, IdSource::FailuresOnly).await.unwrap();

    assert_eq!(report.seeded, 0);
    assert_eq!(report.preloaded, 1);
    assert_eq!(report.retry_phase, PhaseEnd::Drained);
    assert_eq!(
        read_rows(&dir.path().join("records.csv")),
        vec!["7,Project 7,P5190007".to_string()]
    );
    assert!(read_rows(&dir.path().join("failed.csv")).is_empty());
}

#[tokio::test]
async fn test_ids_file_with_string_keys() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/view/P-9"))
        .respond_with(record_page(9))
        .mount(&mock_server)
        .await;

    let ids_path = dir.path().join("ids.csv");
    std::fs::write(&ids_path, "Sr,RERA No.\n1,P-9\n2, \n3,P-9\n").unwrap();

    let mut config = create_test_config(&mock_server.uri(), dir.path(), 1, 1);
    config.run.id_kind = IdKind::Key;
    config.run.start_id = None;
    config.run.end_id = None;

    let source = IdSource::IdsFile {
        path: ids_path,
        column: "RERA No.".to_string(),
        start_row: 2,
    };
    let report = harvest(config, source).await.unwrap();

    assert_eq!(report.seeded, 1);
    assert_eq!(
        read_rows(&dir.path().join("records.csv")),
        vec!["P-9,Project 9,P5190009".to_string()]
    );
}

#[tokio::test]
async fn test_mismatched_store_header_is_refused() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("records.csv"), "project_id,name,district\n1,a,b\n").unwrap();

    let config = create_test_config(&mock_server.uri(), dir.path(), 1, 2);
    let result = Coordinator::new(config).await;

    assert!(matches!(result, Err(HarvestError::Ledger(_))));
}

#[cfg(unix)]
#[tokio::test]
async fn test_captcha_gated_records() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    for id in [11u64, 12] {
        Mock::given(method("GET"))
            .and(path(format!("/view/{}", id)))
            .respond_with(captcha_page(id))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/view/{}/verify", id)))
            .and(body_string_contains(format!("token=t{}", id).as_str()))
            .and(body_string_contains("captcha=AB12CD"))
            .respond_with(record_page(id))
            .mount(&mock_server)
            .await;
    }

    // Record 11's image reads correctly; record 12's never does
    Mock::given(method("GET"))
        .and(path("/captcha/11.png"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ab12cd\n"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/captcha/12.png"))
        .respond_with(ResponseTemplate::new(200).set_body_string("zz99zz\n"))
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(&mock_server.uri(), dir.path(), 11, 12);
    config.captcha = CaptchaConfig {
        enabled: true,
        image_selector: "img#captcha".to_string(),
        input_selector: "input[name='captcha']".to_string(),
        submit_selector: "#go".to_string(),
        refresh_selector: None,
        max_attempts: 2,
        // `cat` stands in for an OCR engine: the "image" is its own answer
        ocr_command: vec!["cat".to_string()],
        expected_length: Some(6),
    };

    let report = harvest(config, IdSource::Configured).await.unwrap();

    assert_eq!(report.ledger.succeeded, 1);
    assert_eq!(report.ledger.failed, 1);
    assert_eq!(
        read_rows(&dir.path().join("records.csv")),
        vec!["11,Project 11,P51900011".to_string()]
    );
    assert_eq!(
        read_rows(&dir.path().join("failed.csv")),
        vec![format!("12,{}/view/12", mock_server.uri())]
    );
}
