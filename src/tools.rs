//! Operator helpers behind the `find-db` and `prepare-deploy` subcommands.

use std::fmt::Write as _;
use std::path::Path;

use parabot_core::error::ParabotError;
use parabot_remote::drive::{exact_name_query, name_contains_query, DriveStore};
use parabot_remote::store::RemoteFile;

/// `.env` keys carried over into the deploy file, in output order.
pub const DEPLOY_ENV_KEYS: &[&str] = &[
    "DISCORD_TOKEN",
    "CLIENT_ID",
    "DRIVE_FILE_ID",
    "PARABOT_TIMEZONE",
    "PARABOT_DATA_DIR",
];

/// Entries `prepare-deploy` makes sure are git-ignored.
pub const SECRET_IGNORES: &[&str] = &[
    ".env",
    ".env.deploy",
    "credentials.json",
    "token.json",
    "*.sqlite",
];

#[derive(Debug, Clone)]
pub struct FoundFile {
    pub file: RemoteFile,
    pub folder: String,
}

/// Database-like files in the remote store, newest first. With `name`, only
/// names containing it.
pub async fn find_database_files(
    store: &DriveStore,
    name: Option<&str>,
) -> Result<Vec<FoundFile>, ParabotError> {
    let query = match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(term) => name_contains_query(term),
        None => name_contains_query(".sqlite"),
    };
    let files = store.search(&query, Some("modifiedTime desc")).await?;
    let mut found = Vec::with_capacity(files.len());
    for file in files {
        let folder = store.folder_path(file.parents.first().map(String::as_str)).await;
        found.push(FoundFile { file, folder });
    }
    Ok(found)
}

/// Whether an exact-name lookup would find `file_name`, as the bot does at startup.
pub async fn exact_matches(store: &DriveStore, file_name: &str) -> Result<usize, ParabotError> {
    Ok(store.search(&exact_name_query(file_name), None).await?.len())
}

pub fn render_found_files(found: &[FoundFile]) -> String {
    let mut out = String::new();
    if found.is_empty() {
        out.push_str("No database files found in Google Drive.\n");
        out.push_str("Check that the file exists and that this account can see it.\n");
        return out;
    }
    let _ = writeln!(out, "Found {} file(s):\n", found.len());
    for entry in found {
        let file = &entry.file;
        let _ = writeln!(out, "{}", file.name);
        let _ = writeln!(out, "   ID: {}", file.id);
        let _ = writeln!(out, "   Folder: {}", entry.folder);
        if let Some(link) = &file.web_view_link {
            let _ = writeln!(out, "   Link: {link}");
        }
        if let Some(modified) = &file.modified_time {
            let _ = writeln!(out, "   Modified: {modified}");
        }
        out.push('\n');
    }
    let _ = writeln!(out, "To pin a file, add to .env:");
    let _ = writeln!(out, "   DRIVE_FILE_ID={}", found[0].file.id);
    out
}

/// `KEY=VALUE` pairs from a dotenv-style file; comments and blank lines skipped.
pub fn parse_env_lines(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim().trim_start_matches("export ").trim();
            if key.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Collapse a JSON document to one line so it fits in a single env variable.
fn compact_json(label: &str, raw: &str) -> Result<String, ParabotError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| ParabotError::Config(format!("{label} is not valid JSON: {e}")))?;
    Ok(value.to_string())
}

/// Body of the deploy env file.
pub fn render_deploy_env(
    env_content: &str,
    credentials_raw: &str,
    token_raw: &str,
) -> Result<String, ParabotError> {
    let credentials = compact_json("credentials.json", credentials_raw)?;
    let token = compact_json("token.json", token_raw)?;
    let env = parse_env_lines(env_content);

    let mut out = String::from(
        "# Environment for hosts that only accept variables.\n\
         # Paste these into the service's settings. Never commit this file.\n\n",
    );
    for key in DEPLOY_ENV_KEYS {
        if let Some((_, value)) = env.iter().find(|(k, _)| k == key) {
            let _ = writeln!(out, "{key}={value}");
        }
    }
    let _ = writeln!(out, "\n# Google OAuth client secret");
    let _ = writeln!(out, "CREDENTIALS_JSON={credentials}");
    let _ = writeln!(out, "\n# Google OAuth token");
    let _ = writeln!(out, "TOKEN_JSON={token}");
    Ok(out)
}

/// Append missing secret patterns; returns the ones added.
pub fn ensure_gitignore(path: &Path) -> Result<Vec<&'static str>, ParabotError> {
    let mut content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let present: Vec<&str> = content.lines().map(str::trim).collect();
    let missing: Vec<&'static str> = SECRET_IGNORES
        .iter()
        .copied()
        .filter(|item| !present.contains(item))
        .collect();
    if missing.is_empty() {
        return Ok(missing);
    }
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for item in &missing {
        content.push_str(item);
        content.push('\n');
    }
    std::fs::write(path, content)?;
    Ok(missing)
}

pub struct DeployInputs<'a> {
    pub credentials_path: &'a Path,
    pub token_path: &'a Path,
    pub env_path: &'a Path,
    pub output_path: &'a Path,
    pub gitignore_path: &'a Path,
}

/// Write the deploy env file and update `.gitignore`.
pub fn prepare_deploy(inputs: &DeployInputs<'_>) -> Result<Vec<&'static str>, ParabotError> {
    let read = |path: &Path, hint: &str| {
        std::fs::read_to_string(path).map_err(|e| {
            ParabotError::Config(format!("{} not readable ({e}). {hint}", path.display()))
        })
    };
    let credentials = read(
        inputs.credentials_path,
        "Download the OAuth client secret from Google Cloud Console.",
    )?;
    let token = read(inputs.token_path, "Run the authorization flow first.")?;
    let env = read(inputs.env_path, "Create it with DISCORD_TOKEN and CLIENT_ID.")?;

    let rendered = render_deploy_env(&env, &credentials, &token)?;
    std::fs::write(inputs.output_path, rendered)?;
    ensure_gitignore(inputs.gitignore_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("parabot_tools_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parse_env_lines() {
        let parsed = parse_env_lines(
            "# comment\nDISCORD_TOKEN=abc=def\n\nexport CLIENT_ID = \"123\"\nBROKEN\n=novalue\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("DISCORD_TOKEN".to_string(), "abc=def".to_string()),
                ("CLIENT_ID".to_string(), "123".to_string()),
            ]
        );
    }

    #[test]
    fn test_render_deploy_env_compacts_json_and_filters_keys() {
        let env = "DISCORD_TOKEN=tok\nCLIENT_ID=1\nUNRELATED=x\n";
        let creds = "{\n  \"installed\": {\n    \"client_id\": \"cid\"\n  }\n}";
        let token = "{ \"access_token\": \"a\", \"refresh_token\": \"r\" }";
        let out = render_deploy_env(env, creds, token).unwrap();

        assert!(out.contains("DISCORD_TOKEN=tok\n"));
        assert!(out.contains("CLIENT_ID=1\n"));
        assert!(!out.contains("UNRELATED"));
        assert!(out.contains(r#"CREDENTIALS_JSON={"installed":{"client_id":"cid"}}"#));
        let token_line = out.lines().find(|l| l.starts_with("TOKEN_JSON=")).unwrap();
        assert!(!token_line.contains(' '));
    }

    #[test]
    fn test_render_deploy_env_rejects_bad_json() {
        let err = render_deploy_env("", "{not json", "{}").unwrap_err();
        assert!(err.to_string().contains("credentials.json"));
    }

    #[test]
    fn test_ensure_gitignore_adds_only_missing() {
        let dir = temp_dir();
        let path = dir.join(".gitignore");
        std::fs::write(&path, "target\n.env").unwrap();

        let added = ensure_gitignore(&path).unwrap();
        assert!(!added.contains(&".env"));
        assert!(added.contains(&"token.json"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("target\n.env\n"));
        assert_eq!(content.matches("token.json").count(), 1);

        assert!(ensure_gitignore(&path).unwrap().is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_prepare_deploy_end_to_end() {
        let dir = temp_dir();
        std::fs::write(dir.join("credentials.json"), r#"{"web":{"client_id":"c"}}"#).unwrap();
        std::fs::write(dir.join("token.json"), r#"{"access_token":"a"}"#).unwrap();
        std::fs::write(dir.join(".env"), "DISCORD_TOKEN=t\nDRIVE_FILE_ID=1ABC\n").unwrap();
        let inputs = DeployInputs {
            credentials_path: &dir.join("credentials.json"),
            token_path: &dir.join("token.json"),
            env_path: &dir.join(".env"),
            output_path: &dir.join(".env.deploy"),
            gitignore_path: &dir.join(".gitignore"),
        };
        let added = prepare_deploy(&inputs).unwrap();
        assert_eq!(added.len(), SECRET_IGNORES.len());

        let rendered = std::fs::read_to_string(dir.join(".env.deploy")).unwrap();
        assert!(rendered.contains("DRIVE_FILE_ID=1ABC"));
        assert!(rendered.contains(r#"TOKEN_JSON={"access_token":"a"}"#));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_prepare_deploy_missing_token_is_reported() {
        let dir = temp_dir();
        std::fs::write(dir.join("credentials.json"), "{}").unwrap();
        let inputs = DeployInputs {
            credentials_path: &dir.join("credentials.json"),
            token_path: &dir.join("token.json"),
            env_path: &dir.join(".env"),
            output_path: &dir.join(".env.deploy"),
            gitignore_path: &dir.join(".gitignore"),
        };
        let err = prepare_deploy(&inputs).unwrap_err();
        assert!(err.to_string().contains("authorization flow"));
        assert!(!dir.join(".env.deploy").exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_render_found_files() {
        let found = vec![FoundFile {
            file: RemoteFile {
                id: "1ABC".into(),
                name: "parabot.sqlite".into(),
                web_view_link: Some("https://drive.google.com/file/d/1ABC/view".into()),
                ..Default::default()
            },
            folder: "Drive root".into(),
        }];
        let out = render_found_files(&found);
        assert!(out.contains("Found 1 file(s)"));
        assert!(out.contains("   Folder: Drive root"));
        assert!(out.ends_with("   DRIVE_FILE_ID=1ABC\n"));
        assert!(render_found_files(&[]).contains("No database files"));
    }
}
