use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;

fn rag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("course-rag");
    path
}

const COURSE_MCP: &str = "Course Title: MCP: Build Rich-Context AI Apps with Anthropic
Course Link: https://www.deeplearning.ai/short-courses/mcp-build-rich-context-ai-apps-with-anthropic/
Course Instructor: Elie Schoppik

Lesson 0: Introduction
Lesson Link: https://learn.deeplearning.ai/courses/mcp/lesson/0
The Model Context Protocol standardizes how applications provide context to language models.

Lesson 1: Why MCP
Lesson Link: https://learn.deeplearning.ai/courses/mcp/lesson/1
Without a shared protocol every integration is bespoke. MCP servers expose tools, resources and prompts.
";

const COURSE_CACHING: &str = "Course Title: Introduction to Prompt Caching
Course Link: https://example.com/caching
Course Instructor: Jane Doe

Lesson 0: Basics
Prompt caching stores a prefix of the request so repeated calls are cheaper.
";

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn setup_test_env(port: u16) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(&docs_dir).unwrap();
    fs::write(docs_dir.join("course1_script.txt"), COURSE_MCP).unwrap();
    fs::write(docs_dir.join("course2_script.txt"), COURSE_CACHING).unwrap();
    fs::write(docs_dir.join("README.md"), "not a course").unwrap();

    let frontend_dir = root.join("frontend");
    fs::create_dir_all(&frontend_dir).unwrap();
    fs::write(
        frontend_dir.join("index.html"),
        "<html><body>Course Materials Assistant</body></html>",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/rag.sqlite"

[chunking]
chunk_size = 400
chunk_overlap = 50

[ingest]
docs_path = "{root}/docs"

[server]
bind = "127.0.0.1:{port}"
frontend_dir = "{root}/frontend"
"#,
        root = root.display(),
        port = port
    );

    let config_path = config_dir.join("rag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn command(config_path: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(rag_binary());
    cmd.arg("--config")
        .arg(config_path)
        .args(args)
        // Keep a developer's .env and key out of the tests.
        .current_dir(config_path.parent().unwrap())
        .env_remove("ANTHROPIC_API_KEY")
        .env("RUST_LOG", "warn");
    cmd
}

fn run_rag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = command(config_path, args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run course-rag binary: {}", e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn docs_dir(config_path: &Path) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("docs")
        .display()
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env(free_port());

    let (stdout, stderr, success) = run_rag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/rag.sqlite").exists());

    // Idempotent
    let (_, _, success) = run_rag(&config_path, &["init"]);
    assert!(success, "second init failed");
}

#[test]
fn test_ingest_and_list_courses() {
    let (_tmp, config_path) = setup_test_env(free_port());
    let docs = docs_dir(&config_path);

    let (stdout, stderr, success) = run_rag(&config_path, &["ingest", &docs]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Added 2 courses"), "stdout={}", stdout);

    // Existing titles are skipped on a second run.
    let (stdout, _, success) = run_rag(&config_path, &["ingest", &docs]);
    assert!(success);
    assert!(stdout.contains("Added 0 courses with 0 chunks"), "stdout={}", stdout);

    // --clear reloads everything.
    let (stdout, _, success) = run_rag(&config_path, &["ingest", &docs, "--clear"]);
    assert!(success);
    assert!(stdout.contains("Added 2 courses"), "stdout={}", stdout);

    let (stdout, _, success) = run_rag(&config_path, &["courses"]);
    assert!(success);
    assert!(stdout.contains("2 courses"));
    assert!(stdout.contains("MCP: Build Rich-Context AI Apps with Anthropic"));
    assert!(stdout.contains("Introduction to Prompt Caching"));
}

#[test]
fn test_ingest_missing_folder_adds_nothing() {
    let (_tmp, config_path) = setup_test_env(free_port());
    let (stdout, _, success) = run_rag(&config_path, &["ingest", "/no/such/folder"]);
    assert!(success);
    assert!(stdout.contains("Added 0 courses with 0 chunks"));
}

#[test]
fn test_search_with_filters() {
    let (_tmp, config_path) = setup_test_env(free_port());
    run_rag(&config_path, &["ingest", &docs_dir(&config_path)]);

    let (stdout, stderr, success) = run_rag(&config_path, &["search", "protocol tools"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("[MCP: Build Rich-Context AI Apps with Anthropic - Lesson"));

    let (stdout, _, success) = run_rag(
        &config_path,
        &["search", "prefix", "--course", "caching", "--lesson", "0"],
    );
    assert!(success);
    assert!(stdout.contains("[Introduction to Prompt Caching - Lesson 0]"));
    assert!(!stdout.contains("MCP"));

    let (stdout, _, success) =
        run_rag(&config_path, &["search", "protocol", "--course", "Nonexistent Thing"]);
    assert!(success);
    assert!(stdout.contains("No course found matching 'Nonexistent Thing'"));

    let (stdout, _, success) = run_rag(&config_path, &["search", "zebra"]);
    assert!(success);
    assert!(stdout.contains("No relevant content found."));
}

#[test]
fn test_outline() {
    let (_tmp, config_path) = setup_test_env(free_port());
    run_rag(&config_path, &["ingest", &docs_dir(&config_path)]);

    let (stdout, _, success) = run_rag(&config_path, &["outline", "MCP"]);
    assert!(success);
    assert!(stdout.contains("Course: MCP: Build Rich-Context AI Apps with Anthropic"));
    assert!(stdout.contains("Instructor: Elie Schoppik"));
    assert!(stdout.contains("Lessons (2 total):"));
    assert!(stdout.contains("Lesson 1: Why MCP"));
}

#[test]
fn test_clear_removes_courses() {
    let (_tmp, config_path) = setup_test_env(free_port());
    run_rag(&config_path, &["ingest", &docs_dir(&config_path)]);

    let (_, _, success) = run_rag(&config_path, &["clear"]);
    assert!(success);
    let (stdout, _, _) = run_rag(&config_path, &["courses"]);
    assert!(stdout.contains("0 courses"));
}

#[test]
fn test_ask_without_api_key_fails() {
    let (_tmp, config_path) = setup_test_env(free_port());
    let (_, stderr, success) = run_rag(&config_path, &["ask", "What is MCP?"]);
    assert!(!success);
    assert!(stderr.contains("ANTHROPIC_API_KEY"), "stderr={}", stderr);
}

// ─── Server ─────────────────────────────────────────────────────────

struct ServerGuard(Child);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn start_server(config_path: &Path) -> ServerGuard {
    let child = command(config_path, &["serve"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start server");
    ServerGuard(child)
}

fn wait_for_server(base: &str) {
    let client = reqwest::blocking::Client::new();
    for _ in 0..100 {
        std::thread::sleep(Duration::from_millis(100));
        if let Ok(resp) = client.get(format!("{}/health", base)).send() {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 10 seconds");
}

#[test]
fn test_server_endpoints() {
    let port = free_port();
    let (_tmp, config_path) = setup_test_env(port);
    let _server = start_server(&config_path);
    let base = format!("http://127.0.0.1:{}", port);
    wait_for_server(&base);

    let client = reqwest::blocking::Client::new();

    // Health
    let body: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());

    // Courses loaded from docs_path at startup
    let body: serde_json::Value = client
        .get(format!("{}/api/courses", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(body["total_courses"], 2);
    assert_eq!(body["course_titles"].as_array().unwrap().len(), 2);

    // Query without an API key
    let resp = client
        .post(format!("{}/api/query", base))
        .json(&serde_json::json!({"query": "What is MCP?"}))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 503);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "missing_api_key");

    // Missing field
    let resp = client
        .post(format!("{}/api/query", base))
        .json(&serde_json::json!({"session_id": "abc"}))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 422);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "invalid_request");

    // Session clear
    let body: serde_json::Value = client
        .post(format!("{}/api/session/clear", base))
        .json(&serde_json::json!({"session_id": "session_1"}))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Session session_1 cleared successfully");

    // Frontend, uncached
    let resp = client.get(format!("{}/", base)).send().unwrap();
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers()["cache-control"],
        "no-cache, no-store, must-revalidate"
    );
    assert!(resp.text().unwrap().contains("Course Materials Assistant"));
}
