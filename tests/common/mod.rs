//! Common test utilities and helpers for coursync tests
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_EMAIL: &str = "student@example.com";
pub const TEST_PASSWORD: &str = "correct horse";

/// Scratch directories for config and downloads
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("coursync");
        let output_dir = temp_dir.path().join("lectures");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");

        Self {
            temp_dir,
            config_dir,
            output_dir,
        }
    }

    pub fn create_test_config(&self, content: &str) -> PathBuf {
        let config_path = self.config_dir.join("config.yml");
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }

    /// Config pointing at `base_url`, with no pauses and downloads into `output_dir`
    pub fn create_platform_config(&self, base_url: &str, ttl: &str) -> PathBuf {
        let content = format!(
            r#"
platform:
  base_url: "{}"
session:
  ttl: "{}"
  pause: "0s"
sync:
  output_directory: "{}"
  max_parallel: 2
"#,
            base_url,
            ttl,
            self.output_dir.display()
        );
        self.create_test_config(&content)
    }
}

/// A wiremock stand-in for the course platform
pub struct MockPlatform {
    pub server: MockServer,
}

impl MockPlatform {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    /// Home link of a course hosted on the mock, ends with `/`
    pub fn home_link(&self, course: &str) -> String {
        format!("{}/{}/", self.server.uri(), course)
    }

    pub async fn mount_sign_in(&self, full_name: &str, user_id: u64) {
        Mock::given(method("GET"))
            .and(path("/account/signin"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>sign in</html>"))
            .mount(&self.server)
            .await;

        Mock::given(method("POST"))
            .and(path("/maestro/api/user/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"full_name": full_name, "Id": user_id})),
            )
            .mount(&self.server)
            .await;
    }

    pub async fn mount_topics(&self, user_id: u64, topics: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/maestro/api/topic/list_my"))
            .and(query_param("user_id", user_id.to_string().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(topics))
            .mount(&self.server)
            .await;
    }

    /// Course authorization plus a lecture index linking `lecture_ids`
    pub async fn mount_course(&self, course: &str, lecture_ids: &[u32]) {
        let home_link = self.home_link(course);

        Mock::given(method("GET"))
            .and(path(format!("/{}/auth/auth_redirector", course)))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&self.server)
            .await;

        let links: String = lecture_ids
            .iter()
            .map(|id| {
                format!(
                    "<li><a href=\"{}lecture/download.mp4?lecture_id={}\">Lecture {}</a></li>\n",
                    home_link, id, id
                )
            })
            .collect();
        Mock::given(method("GET"))
            .and(path(format!("/{}/lecture/index", course)))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(format!("<ul>\n{}</ul>", links)),
            )
            .mount(&self.server)
            .await;
    }

    /// A video response naming `filename` in its Content-Disposition header
    pub async fn mount_video(&self, course: &str, lecture_id: u32, filename: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/{}/lecture/download.mp4", course)))
            .and(query_param("lecture_id", lecture_id.to_string().as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "Content-Disposition",
                        format!("attachment; filename=\"{}\"", filename).as_str(),
                    )
                    .set_body_string(body),
            )
            .mount(&self.server)
            .await;
    }
}

pub fn course_json(name: &str, active: bool, home_link: &str) -> serde_json::Value {
    serde_json::json!({"name": name, "active": active, "home_link": home_link})
}

pub fn read_file(path: &Path) -> String {
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
}

/// Assertion helpers for test validation
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
