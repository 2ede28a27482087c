use std::io::Write;

use tolog::settings::{Output, Settings};

fn write_config(name: &str, body: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("tolog-settings-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("tolog.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(body.as_bytes()).unwrap();
    path
}

#[test]
fn defaults() {
    let settings = Settings::default();
    assert_eq!(settings.base, "file:///");
    assert_eq!(settings.output, Output::TologPlus);
    assert!(!settings.tolog_plus);
    assert!(settings.optimizers.is_none(), "default passes");
    assert_eq!(settings.bind, "127.0.0.1:8080");
    assert!(settings.base_iri().is_ok());
}

#[test]
fn from_toml_file() {
    let path = write_config(
        "full",
        r#"
base = "http://example.org/queries/"
tolog_plus = true
optimizers = ["remove-duplicates", " ", "filters-last"]
output = "xml"
hints = true
"#,
    );
    let settings = Settings::from_file(&path).expect("loads");
    assert_eq!(settings.base_iri().unwrap().as_str(), "http://example.org/queries/");
    assert_eq!(settings.output, Output::Xml);
    assert_eq!(settings.bind, "127.0.0.1:8080", "missing keys keep their default");

    let options = settings.parse_options();
    assert!(options.tolog_plus);
    assert_eq!(options.optimizers, Some(vec!["remove-duplicates".to_string(), "filters-last".to_string()]));
    assert_eq!(options.optimizer().unwrap().names(), vec!["remove-duplicates", "filters-last"]);

    assert!(settings.hints);
}

#[test]
fn empty_optimizer_list_disables_optimization() {
    let path = write_config("none", "optimizers = []\noutput = \"tolog\"\n");
    let settings = Settings::from_file(&path).unwrap();
    assert!(settings.parse_options().optimizer().unwrap().is_empty());
    assert_eq!(settings.output, Output::Tolog);
}

#[test]
fn unknown_pass_surfaces_when_used() {
    let path = write_config("bad-pass", "optimizers = [\"nope\"]\n");
    let settings = Settings::from_file(&path).unwrap();
    let err = settings.parse_options().optimizer().err().expect("unknown pass");
    assert!(err.to_string().contains("nope"));
}

#[test]
fn invalid_values_are_config_errors() {
    let path = write_config("bad-output", "output = \"pdf\"\n");
    let err = Settings::from_file(&path).unwrap_err();
    assert!(matches!(err, tolog::error::TologError::Config(_)), "{err}");
}
