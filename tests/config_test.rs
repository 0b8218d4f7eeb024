// 設定ファイル・ジョブファイル解析テスト

use std::io::Write;
use std::path::Path;

use deck_shrink::config::job::{ConversionJob, JobFile};
use deck_shrink::config::load_settings_for_job;
use deck_shrink::config::merged::MergedConfig;
use deck_shrink::config::settings::Settings;
use deck_shrink::pipeline::job_runner::ConverterConfig;

// ============================================================
// 1. Settings 構造体のデシリアライズ
// ============================================================

#[test]
fn test_settings_full_yaml() {
    let yaml = r#"
convert_dir: "/srv/converted"
dpi: 100
quality: 75
min_image_bytes: 10240
export_timeout_secs: 60
pdfa: true
pdfa_timeout_secs: 30
max_upload_bytes: 1048576
allowed_extensions: ["key", "KEY"]
"#;
    let settings = Settings::from_yaml(yaml).expect("should parse full YAML");
    assert_eq!(settings.convert_dir, Path::new("/srv/converted"));
    assert_eq!(settings.dpi, 100);
    assert_eq!(settings.quality, 75);
    assert_eq!(settings.min_image_bytes, 10240);
    assert_eq!(settings.export_timeout_secs, 60);
    assert!(settings.pdfa);
    assert_eq!(settings.pdfa_timeout_secs, 30);
    assert_eq!(settings.max_upload_bytes, 1_048_576);
    assert_eq!(settings.allowed_extensions, vec!["key", "KEY"]);
}

#[test]
fn test_settings_empty_yaml() {
    // 空YAML（"{}" はserde_ymlで空のマッピングを意味する）
    let settings = Settings::from_yaml("{}").expect("should use defaults for empty YAML");
    assert_eq!(settings.dpi, 150);
    assert_eq!(settings.quality, 60);
    assert_eq!(settings.min_image_bytes, 5 * 1024);
    assert_eq!(settings.export_timeout_secs, 120);
    assert!(!settings.pdfa);
    assert_eq!(settings.max_upload_bytes, 300 * 1024 * 1024);
    assert_eq!(settings.allowed_extensions, vec!["key"]);
    assert_eq!(settings.convert_dir, Path::new("converted"));
}

#[test]
fn test_settings_rejects_out_of_range_values() {
    assert!(Settings::from_yaml("quality: 101").is_err());
    assert!(Settings::from_yaml("dpi: 0").is_err());
    assert!(Settings::from_yaml("export_timeout_secs: 0").is_err());
}

// ============================================================
// 2. ジョブファイル
// ============================================================

#[test]
fn test_job_file_all_sections() {
    let yaml = r#"
conversions:
  - source: "talk.key"
  - source: "/abs/demo.key"
    dpi: 96
    quality: 40
    pdfa: true
merges:
  - files: ["a.pdf", "b.pdf"]
deletes: ["old.pdf"]
"#;
    let job_file = JobFile::from_yaml(yaml).expect("should parse");
    assert_eq!(job_file.conversions.len(), 2);
    assert_eq!(job_file.conversions[0].source, "talk.key");
    assert!(job_file.conversions[0].dpi.is_none());
    assert_eq!(job_file.conversions[1].dpi, Some(96));
    assert_eq!(job_file.conversions[1].pdfa, Some(true));
    assert_eq!(job_file.merges[0].files, vec!["a.pdf", "b.pdf"]);
    assert_eq!(job_file.deletes, vec!["old.pdf"]);
    assert!(!job_file.is_empty());
}

#[test]
fn test_job_file_empty_merge_selection_rejected() {
    let yaml = "merges:\n  - files: []\n";
    let err = JobFile::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("No files selected for merging"), "{err}");
}

#[test]
fn test_job_missing_source_rejected() {
    let yaml = "conversions:\n  - dpi: 100\n";
    assert!(JobFile::from_yaml(yaml).is_err());
}

#[test]
fn test_empty_job_file() {
    let job_file = JobFile::from_yaml("{}").expect("should parse");
    assert!(job_file.is_empty());
}

// ============================================================
// 3. 設定のマージ
// ============================================================

fn conversion(dpi: Option<u32>, quality: Option<u8>, pdfa: Option<bool>) -> ConversionJob {
    ConversionJob {
        source: "talk.key".to_string(),
        dpi,
        quality,
        min_image_bytes: None,
        pdfa,
    }
}

#[test]
fn test_merged_job_overrides_settings() {
    let settings = Settings::default();
    let merged = MergedConfig::new(&settings, &conversion(Some(72), Some(30), Some(true))).unwrap();
    assert_eq!(merged.params.target_dpi, 72);
    assert_eq!(merged.params.quality, 30);
    assert!(merged.pdfa);
}

#[test]
fn test_merged_falls_back_to_settings() {
    let settings = Settings::from_yaml("dpi: 200\nquality: 50\nmin_image_bytes: 1").unwrap();
    let merged = MergedConfig::new(&settings, &conversion(None, None, None)).unwrap();
    assert_eq!(merged.params.target_dpi, 200);
    assert_eq!(merged.params.quality, 50);
    assert_eq!(merged.params.min_image_bytes, 1);
    assert!(!merged.pdfa);

    let converter = ConverterConfig::from(&merged);
    assert_eq!(converter.params, merged.params);
    assert_eq!(converter.convert_dir, settings.convert_dir);
}

#[test]
fn test_merged_rejects_out_of_range_overrides() {
    let settings = Settings::default();

    let err = MergedConfig::new(&settings, &conversion(Some(0), None, None)).unwrap_err();
    assert!(err.to_string().contains("dpi must be positive"), "{err}");

    let err = MergedConfig::new(&settings, &conversion(None, Some(150), None)).unwrap_err();
    assert!(err.to_string().contains("quality must be 0-100"), "{err}");
}

// ============================================================
// 4. settings.yaml自動検出
// ============================================================

#[test]
fn test_auto_detect_settings_yaml_exists() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let settings_path = dir.path().join("settings.yaml");
    let job_path = dir.path().join("jobs.yaml");

    let mut f = std::fs::File::create(&settings_path).expect("create settings.yaml");
    f.write_all(b"dpi: 96\nconvert_dir: out\n").expect("write settings");
    std::fs::File::create(&job_path).expect("create jobs.yaml");

    let settings = load_settings_for_job(&job_path).expect("should load settings");
    assert_eq!(settings.dpi, 96);
    // 相対パスはジョブファイルのディレクトリ基準
    assert_eq!(settings.convert_dir, dir.path().join("out"));
}

#[test]
fn test_auto_detect_settings_yaml_missing() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let job_path = dir.path().join("jobs.yaml");
    std::fs::File::create(&job_path).expect("create jobs.yaml");

    let settings = load_settings_for_job(&job_path).expect("should return defaults");
    assert_eq!(settings.dpi, 150, "should use default when settings.yaml absent");
    assert_eq!(settings.convert_dir, dir.path().join("converted"));
}
