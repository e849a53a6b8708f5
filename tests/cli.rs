use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_kc"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Cell Biology\n\nThe mitochondria is the powerhouse of the cell.\n\nIt produces energy as ATP.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.txt"),
        "Photosynthesis converts light into chemical energy.\n\nChlorophyll absorbs light.",
    )
    .unwrap();
    fs::write(files_dir.join("gamma.docx"), minimal_docx_with_text("enzyme kinetics notes"))
        .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/kc.sqlite"

[storage]
root = "{root}/data/documents"

[chunking]
window_tokens = 40
overlap_tokens = 5

[embedding]
provider = "hash"
dims = 64

[extraction]
legacy_converter = "kc-test-missing-converter"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("kc.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kc(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kc_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kc binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// Minimal valid PDF containing the text "glucose metabolism".
/// Body first, then an xref with correct byte offsets so pdf-extract can parse it.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 50 >> stream\nBT /F1 12 Tf 100 700 Td (glucose metabolism) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_kc(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully"));
    assert!(tmp.path().join("data/kc.sqlite").exists());

    // Idempotent
    let (_, stderr, success) = run_kc(&config, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_kc(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_ingest_and_search() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("files/alpha.md");

    let (stdout, stderr, success) =
        run_kc(&config, &["ingest", file.to_str().unwrap(), "--owner", "1"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("Ingested alpha.md as document 1"));

    let (stdout, _, success) = run_kc(
        &config,
        &["search", "mitochondria powerhouse", "--user", "1", "--all"],
    );
    assert!(success);
    assert!(stdout.contains("[doc 1 #0]"), "unexpected output: {}", stdout);
    assert!(stdout.contains("powerhouse"));

    // Not activated yet, so the default scope is empty.
    let (stdout, _, success) = run_kc(&config, &["search", "mitochondria", "--user", "1"]);
    assert!(success);
    assert!(stdout.contains("No results."));

    let (_, _, success) = run_kc(&config, &["activate", "1", "--user", "1"]);
    assert!(success);
    let (stdout, _, _) = run_kc(&config, &["search", "mitochondria", "--user", "1"]);
    assert!(stdout.contains("[doc 1 #0]"));

    // Another user cannot see a private document.
    let (stdout, _, _) = run_kc(&config, &["search", "mitochondria", "--user", "2", "--all"]);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_json_output() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("files/beta.txt");
    run_kc(&config, &["ingest", file.to_str().unwrap(), "--owner", "3", "--public"]);

    let (stdout, stderr, success) = run_kc(
        &config,
        &["search", "chlorophyll", "--user", "8", "--all", "--json"],
    );
    assert!(success, "search failed: {}", stderr);
    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["document_id"], 1);
    assert_eq!(hits[0]["ordinal"], 0);
    assert!(hits[0]["passage"].as_str().unwrap().contains("Chlorophyll"));
}

#[test]
fn test_ingest_dir_reports_failures() {
    let (tmp, config) = setup_test_env();
    fs::write(tmp.path().join("files/legacy.doc"), b"\xD0\xCF\x11\xE0").unwrap();
    fs::write(tmp.path().join("files/report.pdf"), minimal_pdf_with_phrase()).unwrap();

    let dir = tmp.path().join("files");
    let (stdout, stderr, success) =
        run_kc(&config, &["ingest-dir", dir.to_str().unwrap(), "--owner", "1"]);
    assert!(success, "ingest-dir failed: {}", stderr);
    assert!(stdout.contains("Ingested 4 file(s), 1 failed."), "{}", stdout);
    assert!(stdout.contains("legacy.doc"));
    assert!(stdout.contains("text extraction unavailable"));

    let (stdout, _, _) = run_kc(&config, &["search", "enzyme kinetics", "--user", "1", "--all"]);
    assert!(stdout.contains("enzyme kinetics notes"), "{}", stdout);

    let (stdout, _, _) = run_kc(&config, &["search", "glucose", "--user", "1", "--all"]);
    assert!(stdout.contains("glucose"), "{}", stdout);
}

#[test]
fn test_legacy_ingest_without_converter_fails_cleanly() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("files/old.doc");
    fs::write(&file, b"\xD0\xCF\x11\xE0").unwrap();

    let (_, stderr, success) = run_kc(&config, &["ingest", file.to_str().unwrap(), "--owner", "1"]);
    assert!(!success);
    assert!(stderr.contains("contact an administrator"), "{}", stderr);

    let (stdout, _, success) = run_kc(&config, &["list", "--user", "1"]);
    assert!(success);
    assert!(stdout.contains("No documents."));
}

#[test]
fn test_list_get_and_delete() {
    let (tmp, config) = setup_test_env();
    let alpha = tmp.path().join("files/alpha.md");
    let beta = tmp.path().join("files/beta.txt");
    run_kc(&config, &["ingest", alpha.to_str().unwrap(), "--owner", "1"]);
    run_kc(&config, &["ingest", beta.to_str().unwrap(), "--owner", "1", "--public"]);

    let (stdout, _, success) = run_kc(&config, &["list", "--user", "1", "--scope", "public"]);
    assert!(success);
    assert!(stdout.contains("beta.txt"));
    assert!(!stdout.contains("alpha.md"));

    let (stdout, _, success) = run_kc(&config, &["get", "1", "--user", "1"]);
    assert!(success);
    assert!(stdout.contains("Document 1: alpha.md"));
    assert!(stdout.contains("powerhouse"));

    let (_, _, success) = run_kc(&config, &["get", "1", "--user", "2"]);
    assert!(!success);

    // Public documents need --admin.
    let (_, stderr, success) = run_kc(&config, &["delete", "2", "--user", "1"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
    let (stdout, _, success) = run_kc(&config, &["delete", "2", "--user", "1", "--admin"]);
    assert!(success);
    assert!(stdout.contains("Deleted document 2."));
    assert!(!tmp.path().join("data/documents/public/2").exists());

    let (_, _, success) = run_kc(&config, &["delete", "1", "--user", "1"]);
    assert!(success);
    assert!(!tmp.path().join("data/documents/1/1").exists());
}

#[test]
fn test_reindex() {
    let (tmp, config) = setup_test_env();
    let alpha = tmp.path().join("files/alpha.md");
    run_kc(&config, &["ingest", alpha.to_str().unwrap(), "--owner", "1"]);

    let (stdout, stderr, success) = run_kc(&config, &["reindex", "1"]);
    assert!(success, "reindex failed: {}", stderr);
    assert!(stdout.contains("Reindexed document 1: 1 -> 1 chunks (0 changed)."), "{}", stdout);

    let (_, _, success) = run_kc(&config, &["reindex", "42"]);
    assert!(!success);
}

#[test]
fn test_completions_need_no_config() {
    let output = Command::new(kc_binary())
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("kc"));
}
