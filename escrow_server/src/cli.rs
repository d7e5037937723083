use std::{env, env::VarError};

/// The server is configured from the environment. Any argument at all (`--help`, `-h`, ...) prints the help text and
/// the current non-secret settings. Returns true if it did, in which case the caller should exit.
pub fn handle_command_line_args() -> bool {
    let wants_help = env::args().len() > 1;
    if wants_help {
        display_readme();
        display_envs();
    }
    wants_help
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 19] = [
        "RUST_LOG",
        "MEG_HOST",
        "MEG_PORT",
        "MEG_DATABASE_URL",
        "MEG_AUTO_RELEASE_INTERVAL",
        "MEG_AUTO_RELEASE_HOURS",
        "MEG_DEFAULT_FEE_PERCENT",
        "MEG_FEE_TIER_BRONZE",
        "MEG_FEE_TIER_SILVER",
        "MEG_FEE_TIER_GOLD",
        "MEG_FEE_TIER_PLATINUM",
        "MEG_DEFAULT_CURRENCY",
        "MEG_PROVIDER_TIMEOUT",
        "MEG_NOTIFICATION_URL",
        "MEG_REFERENCE_API_URL",
        "MEG_REFERENCE_CALLBACK_URL",
        "MEG_CHECKOUT_API_URL",
        "MEG_CHECKOUT_SUCCESS_URL",
        "MEG_CHECKOUT_CANCEL_URL",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
