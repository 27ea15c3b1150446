use std::fs;
use std::path::Path;

use adp_schema::{AdpDocument, Backend};
use adpkg::oci::{Index, INDEX_FILE, TITLE_ANNOTATION};
use adpkg::{
    build_package, layer, open_package, read_package_document, BlobStore, BuildOptions,
    FsBlobStore, PackageBuilder, PackageError, PackageReader, ReaderOptions,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const HELLO: &str = r#"adp_version: "0.1.0"
id: "agent.hello"
name: "Hello Agent"
runtime:
  execution:
    - backend: "python"
      id: "python-backend"
      entrypoint: "agent.main:app"
flow: {}
evaluation: {}
"#;

const GRAPH_AGENT: &str = r#"adp_version: "0.2.0"
id: "agent.graph"
runtime:
  execution:
    - backend: "python"
      id: "py"
      entrypoint: "agent.main:app"
  models:
    - id: "primary"
      provider: "openai"
      model: "gpt-4o-mini"
      api_key_env: "OPENAI_API_KEY"
      temperature: 0.2
      max_tokens: 5000000000
flow:
  id: "graph.flow"
  graph:
    nodes:
      - id: "input"
        kind: "input"
      - id: "llm"
        kind: "llm"
        model_ref: "primary"
      - id: "output"
        kind: "output"
    edges:
      - from: "input"
        to: "llm"
      - from: "llm"
        to: "output"
    start_nodes: ["input"]
    end_nodes: ["output"]
evaluation:
  suites:
    - id: "smoke"
      metrics:
        - id: "latency"
          type: "deterministic"
          function: "p95_latency"
          threshold: 1.5
"#;

fn write_source(root: &Path, document: &str) {
    fs::create_dir_all(root.join("adp")).expect("create adp dir");
    fs::write(root.join("adp/agent.yaml"), document).expect("write agent.yaml");
    fs::create_dir_all(root.join("src/agent")).expect("create src dir");
    fs::write(root.join("src/agent/main.py"), "app = object()\n").expect("write main.py");
    fs::write(root.join("README.md"), "# Hello\n").expect("write readme");
}

fn hello_source() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    write_source(dir.path(), HELLO);
    dir
}

fn read_index(pkg: &Path) -> Index {
    let text = fs::read_to_string(pkg.join(INDEX_FILE)).expect("read index.json");
    serde_json::from_str(&text).expect("parse index.json")
}

/// Replace the package's layer blob in place with `bytes`.
fn replace_layer(pkg: &Path, bytes: Vec<u8>) {
    let reader = PackageReader::new(pkg);
    let (_, manifest) = reader.manifest().expect("manifest");
    fs::write(
        FsBlobStore::new(pkg).blob_path(&manifest.layers[0].digest),
        bytes,
    )
    .expect("overwrite layer");
}

/// Replace the package's layer blob in place with an empty tar.
fn corrupt_layer(pkg: &Path) {
    let reader = PackageReader::new(pkg);
    let (_, manifest) = reader.manifest().expect("manifest");
    let layer = &manifest.layers[0];
    let empty = layer::build_archive(&[]).expect("empty tar");
    fs::write(FsBlobStore::new(pkg).blob_path(&layer.digest), empty).expect("overwrite layer");
}

// ---------------------------------------------------------------------------
// Build / open round trip
// ---------------------------------------------------------------------------

#[test]
fn hello_agent_end_to_end() {
    let src = hello_source();
    let out = tempfile::tempdir().expect("tempdir");

    let built = build_package(src.path(), out.path()).expect("build");
    assert_eq!(built.document.id, "agent.hello");

    let index = read_index(out.path());
    assert_eq!(index.manifests.len(), 1);
    assert_eq!(index.manifests[0].digest, built.manifest.digest);
    assert_eq!(index.manifests[0].annotations[TITLE_ANNOTATION], "agent.hello");
    assert!(out.path().join("oci-layout").is_file());

    let unpacked = open_package(out.path()).expect("open");
    let doc = unpacked.document();
    assert_eq!(doc.id, "agent.hello");
    assert_eq!(doc.runtime.execution.len(), 1);
    assert_eq!(doc.runtime.execution[0].backend, Backend::Python);
    assert_eq!(doc.name(), Some("Hello Agent"));
}

#[test]
fn round_trip_preserves_document() -> anyhow::Result<()> {
    let src = hello_source();
    let out = tempfile::tempdir()?;
    build_package(src.path(), out.path())?;

    let expected = AdpDocument::from_yaml_str(HELLO)?;
    let unpacked = open_package(out.path())?;
    assert_eq!(unpacked.document(), &expected);
    assert_eq!(read_package_document(out.path())?, expected);
    Ok(())
}

#[test]
fn unpacked_tree_matches_source_files() {
    let src = hello_source();
    let out = tempfile::tempdir().expect("tempdir");
    build_package(src.path(), out.path()).expect("build");

    let unpacked = open_package(out.path()).expect("open");
    let root = unpacked.root();
    assert_eq!(
        fs::read_to_string(root.join("src/agent/main.py")).expect("main.py"),
        "app = object()\n"
    );
    assert_eq!(
        fs::read_to_string(root.join("adp/agent.yaml")).expect("agent.yaml"),
        HELLO
    );
}

#[test]
fn graph_agent_round_trip() -> anyhow::Result<()> {
    let src = tempfile::tempdir()?;
    write_source(src.path(), GRAPH_AGENT);
    let out = tempfile::tempdir()?;

    let built = build_package(src.path(), out.path())?;
    let unpacked = open_package(out.path())?;
    let doc = unpacked.document();
    assert_eq!(doc, &built.document);
    assert_eq!(doc, &AdpDocument::from_yaml_str(GRAPH_AGENT)?);
    assert_eq!(doc.model("primary").and_then(|m| m.max_tokens), Some(5_000_000_000));

    let graph = doc.flow.graph.as_ref().expect("graph");
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.node("llm").and_then(|n| n.model_ref.as_deref()), Some("primary"));
    assert_eq!(doc.evaluation.suites[0].metrics[0].id, "latency");

    let config = PackageReader::new(out.path()).config()?;
    assert_eq!(config.adp_version, "0.2.0");
    assert_eq!(read_package_document(out.path())?, *doc);
    Ok(())
}

#[cfg(unix)]
#[test]
fn symlinked_document_round_trips() {
    let linked = tempfile::tempdir().expect("tempdir");
    fs::write(linked.path().join("agent.yaml"), HELLO).expect("write shared document");

    let src = tempfile::tempdir().expect("tempdir");
    write_source(src.path(), HELLO);
    fs::remove_file(src.path().join("adp/agent.yaml")).expect("remove document");
    std::os::unix::fs::symlink(
        linked.path().join("agent.yaml"),
        src.path().join("adp/agent.yaml"),
    )
    .expect("link document");
    let out = tempfile::tempdir().expect("tempdir");

    let built = build_package(src.path(), out.path()).expect("build");
    let unpacked = open_package(out.path()).expect("open");
    assert_eq!(unpacked.document().id, built.document.id);
    assert_eq!(
        fs::read_to_string(unpacked.root().join("adp/agent.yaml")).expect("agent.yaml"),
        HELLO
    );
}

#[cfg(unix)]
#[test]
fn symlinked_source_dir_is_packaged() {
    let shared = tempfile::tempdir().expect("tempdir");
    fs::write(shared.path().join("tools.py"), "TOOLS = []\n").expect("write tools.py");

    let src = hello_source();
    std::os::unix::fs::symlink(shared.path(), src.path().join("src/shared")).expect("link dir");
    let out = tempfile::tempdir().expect("tempdir");
    build_package(src.path(), out.path()).expect("build");

    let unpacked = open_package(out.path()).expect("open");
    assert_eq!(
        fs::read_to_string(unpacked.root().join("src/shared/tools.py")).expect("tools.py"),
        "TOOLS = []\n"
    );
}

#[test]
fn config_blob_names_agent() {
    let src = hello_source();
    let out = tempfile::tempdir().expect("tempdir");
    build_package(src.path(), out.path()).expect("build");

    let config = PackageReader::new(out.path()).config().expect("config");
    assert_eq!(config.agent_id, "agent.hello");
    assert_eq!(config.adp_version, "0.1.0");
}

#[test]
fn extraction_dir_lifetime_follows_owner() {
    let src = hello_source();
    let out = tempfile::tempdir().expect("tempdir");
    build_package(src.path(), out.path()).expect("build");

    let dropped = {
        let unpacked = open_package(out.path()).expect("open");
        unpacked.root().to_path_buf()
    };
    assert!(!dropped.exists());

    let (doc, dir) = open_package(out.path()).expect("open").into_parts();
    assert_eq!(doc.id, "agent.hello");
    assert!(dir.path().join("adp/agent.yaml").is_file());
}

// ---------------------------------------------------------------------------
// Failures leave nothing behind
// ---------------------------------------------------------------------------

#[test]
fn missing_document_is_io_error_and_writes_nothing() {
    let src = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(src.path().join("src")).expect("create src");
    let out = tempfile::tempdir().expect("tempdir");
    let pkg = out.path().join("pkg");

    let err = build_package(src.path(), &pkg).expect_err("must fail");
    match &err {
        PackageError::Io { path, .. } => assert!(path.ends_with("adp/agent.yaml"), "{err}"),
        other => panic!("expected Io, got {other:?}"),
    }
    assert!(!pkg.exists());
}

#[test]
fn invalid_document_fails_validation_and_writes_no_blobs() {
    let src = tempfile::tempdir().expect("tempdir");
    write_source(src.path(), &HELLO.replace("\"agent.hello\"", "\"\""));
    let out = tempfile::tempdir().expect("tempdir");

    let err = build_package(src.path(), out.path()).expect_err("must fail");
    assert!(err.to_string().contains("validation failed"), "{err}");
    match &err {
        PackageError::Validation { errors } => {
            assert!(errors.iter().any(|e| e.starts_with("/id ")), "{errors:?}")
        }
        other => panic!("expected Validation, got {other:?}"),
    }
    assert!(!out.path().join("blobs").exists());
    assert!(!out.path().join(INDEX_FILE).exists());
}

// ---------------------------------------------------------------------------
// Malformed packages
// ---------------------------------------------------------------------------

#[test]
fn layer_without_document_is_format_error() {
    let src = hello_source();
    let out = tempfile::tempdir().expect("tempdir");
    build_package(src.path(), out.path()).expect("build");
    corrupt_layer(out.path());

    let err = open_package(out.path()).expect_err("must fail");
    assert!(err.is_format_error(), "{err}");
    assert!(err.to_string().contains("agent.yaml"), "{err}");

    let err = read_package_document(out.path()).expect_err("must fail");
    assert!(matches!(err, PackageError::MissingDocument { .. }), "{err}");
}

#[test]
fn verifying_reader_detects_replaced_layer() {
    let src = hello_source();
    let out = tempfile::tempdir().expect("tempdir");
    build_package(src.path(), out.path()).expect("build");
    assert!(PackageReader::new(out.path()).verify().is_ok());

    corrupt_layer(out.path());
    let reader = PackageReader::with_options(
        out.path(),
        ReaderOptions {
            verify_digests: true,
        },
    );
    let err = reader.open().expect_err("must fail");
    assert!(matches!(err, PackageError::DigestMismatch { .. }), "{err}");
    assert!(reader.verify().is_err());
}

#[test]
fn missing_index_is_format_error() {
    let src = hello_source();
    let out = tempfile::tempdir().expect("tempdir");
    build_package(src.path(), out.path()).expect("build");
    fs::remove_file(out.path().join(INDEX_FILE)).expect("remove index");

    let err = open_package(out.path()).expect_err("must fail");
    assert!(err.is_format_error(), "{err}");
    assert!(err.to_string().contains("index.json"), "{err}");
}

#[test]
fn unparseable_document_in_layer_is_format_error() {
    let src = hello_source();
    let out = tempfile::tempdir().expect("tempdir");
    build_package(src.path(), out.path()).expect("build");

    let bogus = layer::build_archive(&[layer::LayerEntry {
        name: "adp/agent.yaml".to_string(),
        data: b"runtime: [not, a, mapping]\n".to_vec(),
        executable: false,
    }])
    .expect("tar");
    replace_layer(out.path(), bogus);

    let err = open_package(out.path()).expect_err("must fail");
    assert!(err.is_format_error(), "{err}");
    assert!(err.to_string().contains("agent.yaml"), "{err}");
}

#[test]
fn layer_with_repeated_document_is_format_error() {
    let src = hello_source();
    let out = tempfile::tempdir().expect("tempdir");
    build_package(src.path(), out.path()).expect("build");

    let other = HELLO.replace("agent.hello", "agent.other");
    let mut builder = tar::Builder::new(Vec::new());
    for text in [HELLO, other.as_str()] {
        let mut header = tar::Header::new_gnu();
        header.set_size(text.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "adp/agent.yaml", text.as_bytes())
            .expect("append");
    }
    replace_layer(out.path(), builder.into_inner().expect("tar"));

    let err = open_package(out.path()).expect_err("must fail");
    assert!(err.is_format_error(), "{err}");
    let err = read_package_document(out.path()).expect_err("must fail");
    assert!(err.is_format_error(), "{err}");
    assert!(err.to_string().contains("duplicate"), "{err}");
}

#[test]
fn uppercase_index_digest_is_format_error() {
    let src = hello_source();
    let out = tempfile::tempdir().expect("tempdir");
    let built = build_package(src.path(), out.path()).expect("build");

    let index_path = out.path().join(INDEX_FILE);
    let text = fs::read_to_string(&index_path).expect("read index.json");
    let hex = built.manifest.digest.to_hex();
    fs::write(&index_path, text.replace(&hex, &hex.to_uppercase())).expect("rewrite index");

    let err = open_package(out.path()).expect_err("must fail");
    assert!(err.is_format_error(), "{err}");
    assert!(err.to_string().contains("index.json"), "{err}");
}

// ---------------------------------------------------------------------------
// Layer contents and determinism
// ---------------------------------------------------------------------------

#[test]
fn out_dir_inside_source_is_not_packaged() {
    let src = hello_source();
    let pkg = src.path().join("oci");

    build_package(src.path(), &pkg).expect("build");
    let layer_bytes = PackageReader::new(&pkg).layer_bytes().expect("layer");
    let names = layer::list_entries(&layer_bytes).expect("entries");
    assert!(names.iter().all(|n| !n.starts_with("oci/")), "{names:?}");
    assert!(names.contains(&"adp/agent.yaml".to_string()));

    let unpacked = open_package(&pkg).expect("open");
    assert!(!unpacked.root().join("oci").exists());
}

#[test]
fn configured_exclusions_are_left_out() {
    let src = hello_source();
    fs::create_dir_all(src.path().join(".git")).expect("create .git");
    fs::write(src.path().join(".git/HEAD"), "ref: refs/heads/main\n").expect("write HEAD");
    let out = tempfile::tempdir().expect("tempdir");

    let builder = PackageBuilder::with_options(BuildOptions {
        exclude: vec![".git".into()],
        ..BuildOptions::default()
    });
    builder.build(src.path(), out.path()).expect("build");

    let layer_bytes = PackageReader::new(out.path()).layer_bytes().expect("layer");
    let names = layer::list_entries(&layer_bytes).expect("entries");
    assert!(!names.iter().any(|n| n.starts_with(".git")), "{names:?}");
}

#[test]
fn identical_sources_produce_identical_digests() {
    let a = hello_source();
    let b = hello_source();
    let out_a = tempfile::tempdir().expect("tempdir");
    let out_b = tempfile::tempdir().expect("tempdir");

    let first = build_package(a.path(), out_a.path()).expect("build a");
    let second = build_package(b.path(), out_b.path()).expect("build b");
    assert_eq!(first.layer.digest, second.layer.digest);
    assert_eq!(first.manifest.digest, second.manifest.digest);
}

#[test]
fn rebuild_into_same_dir_reuses_blobs() {
    let src = hello_source();
    let out = tempfile::tempdir().expect("tempdir");

    build_package(src.path(), out.path()).expect("first build");
    build_package(src.path(), out.path()).expect("second build");

    let blobs = PackageReader::new(out.path()).list_blobs().expect("list");
    assert_eq!(blobs.len(), 3);
    let store = FsBlobStore::new(out.path());
    for digest in &blobs {
        assert!(store.exists(digest).expect("exists"));
    }
}
