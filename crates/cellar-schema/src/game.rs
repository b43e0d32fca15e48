//! Records exchanged with the surrounding launcher.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// App id exported to the runtime when the caller does not supply one.
pub const DEFAULT_APP_ID: &str = "0";

const COMMAND_PLACEHOLDER: &str = "%command%";

/// What the launcher knows about a game when it asks for an environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameInfo {
    pub slug: String,
    pub title: String,
    /// Runtime pinned by the user for this game, if any.
    #[serde(default)]
    pub runtime_path: Option<PathBuf>,
    /// Unmanaged prefix chosen by the user; never restructured.
    #[serde(default)]
    pub environment_path: Option<PathBuf>,
    pub install_dir: PathBuf,
    /// Steam-style launch option line, e.g. `DXVK_HUD=1 %command% -windowed`.
    #[serde(default)]
    pub launch_options: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchOptions {
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub enable_logging: bool,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub use_gamemode: bool,
    /// `WINEDLLOVERRIDES` fragment, e.g. `dxgi=n,b;d3d11=n`.
    #[serde(default)]
    pub dll_overrides: Option<String>,
    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,
}

/// A parsed launch option line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchLine {
    pub env: Vec<(String, String)>,
    pub args: Vec<String>,
}

/// Parse a Steam-style launch option line.
///
/// `KEY=VALUE` tokens before `%command%` become environment variables and
/// tokens after it become extra arguments. Without a placeholder, leading
/// `KEY=VALUE` tokens are still environment and the rest are arguments.
pub fn parse_launch_line(line: &str) -> LaunchLine {
    let tokens = split_tokens(line);
    let mut parsed = LaunchLine::default();

    if let Some(pos) = tokens.iter().position(|t| t == COMMAND_PLACEHOLDER) {
        for token in &tokens[..pos] {
            if let Some(pair) = env_assignment(token) {
                parsed.env.push(pair);
            }
        }
        parsed.args.extend(tokens[pos + 1..].iter().cloned());
        return parsed;
    }

    let mut in_env = true;
    for token in tokens {
        if in_env {
            if let Some(pair) = env_assignment(&token) {
                parsed.env.push(pair);
                continue;
            }
            in_env = false;
        }
        parsed.args.push(token);
    }
    parsed
}

fn env_assignment(token: &str) -> Option<(String, String)> {
    let (key, value) = token.split_once('=')?;
    let valid_key = !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    valid_key.then(|| (key.to_owned(), value.to_owned()))
}

/// Whitespace split honoring single and double quotes.
fn split_tokens(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut has_token = false;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                has_token = true;
            }
            None if c.is_whitespace() => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            None => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_before_placeholder_args_after() {
        let parsed = parse_launch_line("DXVK_HUD=1 PROTON_NO_ESYNC=1 %command% -windowed -w 1280");
        assert_eq!(
            parsed.env,
            vec![
                ("DXVK_HUD".to_owned(), "1".to_owned()),
                ("PROTON_NO_ESYNC".to_owned(), "1".to_owned()),
            ]
        );
        assert_eq!(parsed.args, vec!["-windowed", "-w", "1280"]);
    }

    #[test]
    fn no_placeholder_treats_rest_as_args() {
        let parsed = parse_launch_line("MANGOHUD=1 -novid -console");
        assert_eq!(parsed.env.len(), 1);
        assert_eq!(parsed.args, vec!["-novid", "-console"]);
    }

    #[test]
    fn quoted_values_keep_spaces() {
        let parsed = parse_launch_line(r#"WINEDLLOVERRIDES="dinput8=n,b" %command% "+map de dust""#);
        assert_eq!(
            parsed.env,
            vec![("WINEDLLOVERRIDES".to_owned(), "dinput8=n,b".to_owned())]
        );
        assert_eq!(parsed.args, vec!["+map de dust"]);
    }

    #[test]
    fn empty_line_is_empty() {
        assert_eq!(parse_launch_line("   "), LaunchLine::default());
    }

    #[test]
    fn arg_with_equals_after_placeholder_stays_arg() {
        let parsed = parse_launch_line("%command% -lang=en");
        assert!(parsed.env.is_empty());
        assert_eq!(parsed.args, vec!["-lang=en"]);
    }

    #[test]
    fn game_info_defaults_optional_fields() {
        let json = r#"{"slug":"portal","title":"Portal","install_dir":"/games/portal"}"#;
        let game: GameInfo = serde_json::from_str(json).unwrap();
        assert!(game.runtime_path.is_none());
        assert!(game.launch_options.is_empty());
    }
}
