use rxiv_mirror::load_config::{load_config, load_registry_token, load_store_credentials};
use rxiv_mirror_core::config::{MatchPolicy, OutputPolicy};
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

#[test]
fn loads_full_config_with_two_pipelines() {
    let file = config_file(
        r#"
work_dir: ./tmp/mirror
store:
  region: us-east-1
  requester_pays: true
registry:
  repo_name: xml-dump-monthly
  private: true
extraction:
  document_pattern: '\.xml$'
  strict_match: true
  clear_output: true
pipelines:
  - bucket: biorxiv-src-monthly
    prefix: Current_Content/September_2024/
    output_name: biorxiv-xml-dump
  - bucket: medrxiv-src-monthly
    prefix: Current_Content/September_2024/
    output_name: medrxiv-xml-dump
"#,
    );

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.work_dir, PathBuf::from("./tmp/mirror"));
    assert_eq!(config.pipelines.len(), 2);
    assert!(config.registry.private);
    assert_eq!(config.extraction.match_policy(), MatchPolicy::Strict);
    assert_eq!(config.extraction.output_policy(), OutputPolicy::Clear);
    assert_eq!(
        config.pipelines[1].remote_archive_path(),
        "Current_Content/September_2024/medrxiv-xml-dump.zip"
    );
    assert_eq!(
        config.output_folder(&config.pipelines[0]),
        PathBuf::from("./tmp/mirror/Current_Content/September_2024/biorxiv-xml-dump")
    );
}

#[test]
fn omitted_sections_fall_back_to_defaults() {
    let file = config_file("pipelines:\n  - bucket: b\n    output_name: dump\n");

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.work_dir, PathBuf::from("."));
    assert_eq!(config.store.region, "us-east-1");
    assert!(config.store.requester_pays);
    assert_eq!(config.registry.repo_name, "xml-dump-monthly");
    assert!(!config.registry.private);
    assert_eq!(config.registry.revision, "main");
    assert_eq!(config.extraction.bundle_suffix, ".meca");
    assert_eq!(config.extraction.document_dir, "content");
    assert_eq!(config.extraction.match_policy(), MatchPolicy::FirstMatch);
    assert_eq!(config.extraction.output_policy(), OutputPolicy::Accumulate);
    assert_eq!(config.pipelines[0].prefix, None);
}

#[test]
fn malformed_yaml_is_an_error() {
    let file = config_file("pipelines: [this is: not valid");
    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"));
}

#[test]
fn duplicate_output_folders_are_rejected() {
    let file = config_file(
        "pipelines:\n  - bucket: a\n    output_name: dump\n  - bucket: b\n    output_name: dump\n",
    );
    let err = load_config(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("dump"));
}

#[test]
#[serial]
fn store_credentials_come_from_environment() {
    env::set_var("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE");
    env::set_var("AWS_SECRET_ACCESS_KEY", "wJalrXUtnFEMI");

    let credentials = load_store_credentials().expect("credentials");
    assert_eq!(credentials.access_key_id, "AKIDEXAMPLE");
    assert_eq!(credentials.secret_access_key, "wJalrXUtnFEMI");
    assert!(!format!("{credentials:?}").contains("wJalrXUtnFEMI"));

    env::remove_var("AWS_ACCESS_KEY_ID");
    env::remove_var("AWS_SECRET_ACCESS_KEY");
}

#[test]
#[serial]
fn missing_secret_names_the_variable() {
    env::remove_var("AWS_ACCESS_KEY_ID");
    env::set_var("AWS_SECRET_ACCESS_KEY", "x");
    let err = load_store_credentials().unwrap_err();
    assert_eq!(err.to_string(), "AWS_ACCESS_KEY_ID missing in environment");
    env::remove_var("AWS_SECRET_ACCESS_KEY");

    env::set_var("HF_API_KEY", "");
    let err = load_registry_token().unwrap_err();
    assert_eq!(err.to_string(), "HF_API_KEY is set but empty");
    env::remove_var("HF_API_KEY");
}

#[test]
#[serial]
fn registry_token_is_read() {
    env::set_var("HF_API_KEY", "hf_abc");
    assert_eq!(load_registry_token().unwrap(), "hf_abc");
    env::remove_var("HF_API_KEY");
}
