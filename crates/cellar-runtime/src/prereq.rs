use std::fmt;
use std::path::PathBuf;

/// Host tool that installs prerequisite components into a prefix.
pub const PREREQUISITE_TOOL: &str = "winetricks";
/// Host tool that wraps a game process to request performance mode.
pub const GAMEMODE_TOOL: &str = "gamemoderun";

/// A missing host tool with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

/// Look `name` up on `path_var`, or on the process `PATH` when `None`.
pub fn find_in_path(name: &str, path_var: Option<&str>) -> Option<PathBuf> {
    match path_var {
        Some(paths) => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
            which::which_in(name, Some(paths), cwd).ok()
        }
        None => which::which(name).ok(),
    }
}

/// Check the optional host tools. None of them block provisioning; missing
/// ones only mean the corresponding step is skipped.
pub fn check_host_tools(path_var: Option<&str>) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if find_in_path(PREREQUISITE_TOOL, path_var).is_none() {
        missing.push(MissingPrereq {
            name: PREREQUISITE_TOOL,
            purpose: "installing C++ runtimes and fonts into new prefixes",
            install_hint: "zypper install winetricks | apt install winetricks | dnf install winetricks | pacman -S winetricks",
        });
    }

    if find_in_path(GAMEMODE_TOOL, path_var).is_none() {
        missing.push(MissingPrereq {
            name: GAMEMODE_TOOL,
            purpose: "the gamemode launch option",
            install_hint: "zypper install gamemode | apt install gamemode | dnf install gamemode | pacman -S gamemode",
        });
    }

    missing
}

/// Format a list of missing tools into a user-friendly message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing optional tools:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nCellar still provisions prefixes; the steps above are skipped.");
    msg
}
