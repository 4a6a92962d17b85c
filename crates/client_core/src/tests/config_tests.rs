use std::{collections::HashMap, io::Write};

use super::*;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect::<HashMap<_, _>>();
    move |key: &str| vars.get(key).cloned()
}

fn write_config(contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("sneak-config-{}.toml", uuid::Uuid::new_v4()));
    let mut file = fs::File::create(&path).expect("create config");
    file.write_all(contents.as_bytes()).expect("write config");
    path
}

#[test]
fn defaults_without_file_or_env() {
    let missing = std::env::temp_dir().join("sneak-does-not-exist.toml");
    assert!(matches!(
        load_settings_with(Some(&missing), env(&[])),
        Err(ConfigError::Read { .. })
    ));

    let settings = Settings::default();
    assert_eq!(settings.default_channel, "test");
    assert_eq!(settings.history_limit, 50);
    assert_eq!(settings.store_table, "messages");
}

#[test]
fn file_values_then_env_overrides() {
    let path = write_config(
        r#"
app_id = "from-file"
display_name = "file-user"
history_limit = 20
store_url = "https://file.example.co"
"#,
    );

    let settings = load_settings_with(
        Some(&path),
        env(&[
            ("VITE_AGORA_APP_ID", "legacy-app"),
            ("SNEAK__APP_ID", "sneak-app"),
            ("VITE_SUPABASE_KEY", "anon"),
            ("SNEAK__HISTORY_LIMIT", "75"),
        ]),
    )
    .expect("settings");
    let _ = fs::remove_file(&path);

    assert_eq!(settings.app_id, "sneak-app");
    assert_eq!(settings.display_name, "file-user");
    assert_eq!(settings.history_limit, 75);
    assert_eq!(settings.store_url.as_deref(), Some("https://file.example.co"));
    assert_eq!(settings.store_key.as_deref(), Some("anon"));
}

#[test]
fn blank_env_values_are_ignored() {
    let path = write_config("app_id = \"kept\"\n");
    let settings =
        load_settings_with(Some(&path), env(&[("SNEAK__APP_ID", "  ")])).expect("settings");
    let _ = fs::remove_file(&path);

    assert_eq!(settings.app_id, "kept");
}

#[test]
fn malformed_numbers_are_rejected() {
    let path = write_config("");
    let result = load_settings_with(Some(&path), env(&[("SNEAK__HISTORY_LIMIT", "lots")]));
    let _ = fs::remove_file(&path);

    assert!(matches!(
        result,
        Err(ConfigError::InvalidValue {
            key: "SNEAK__HISTORY_LIMIT",
            ..
        })
    ));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let path = write_config("history_limit = \"many\"");
    let result = load_settings_with(Some(&path), env(&[]));
    let _ = fs::remove_file(&path);

    assert!(matches!(result, Err(ConfigError::Parse { .. })));
}

#[test]
fn hosted_store_needs_both_url_and_key() {
    let mut settings = Settings {
        store_url: Some("https://project.example.co".to_string()),
        store_key: Some("anon".to_string()),
        store_table: "chat".to_string(),
        database_url: Some("sqlite::memory:".to_string()),
        ..Settings::default()
    };
    match settings.store_backend().expect("backend") {
        StoreBackend::Hosted(config) => {
            assert_eq!(config.api_key, "anon");
            assert_eq!(config.table, "chat");
        }
        other => panic!("unexpected backend: {other:?}"),
    }

    settings.store_key = None;
    assert!(matches!(
        settings.store_backend().expect("backend"),
        StoreBackend::Sqlite(url) if url == "sqlite::memory:"
    ));

    settings.database_url = Some("   ".to_string());
    assert!(matches!(
        settings.store_backend().expect("backend"),
        StoreBackend::Disabled
    ));
}

#[test]
fn invalid_store_url_is_reported() {
    let settings = Settings {
        store_url: Some("not a url".to_string()),
        store_key: Some("anon".to_string()),
        ..Settings::default()
    };

    assert!(matches!(
        settings.store_backend(),
        Err(ConfigError::InvalidValue {
            key: "store_url",
            ..
        })
    ));
}

#[tokio::test]
async fn disabled_backend_opens_no_store() {
    assert!(StoreBackend::Disabled.open().await.expect("open").is_none());
    assert!(StoreBackend::Sqlite("sqlite::memory:".to_string())
        .open()
        .await
        .expect("open")
        .is_some());
}
