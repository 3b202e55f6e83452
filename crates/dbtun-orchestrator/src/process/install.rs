//! Install instructions for missing client executables

use std::path::Path;

/// Platform-specific instructions for installing `program`
pub fn install_instructions(program: &str) -> String {
    let name = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string());

    if name != "psql" {
        return format!(
            "Install '{}' and make sure it is on your PATH, or set [client] program in the config file.",
            name
        );
    }

    #[cfg(target_os = "macos")]
    {
        r#"The PostgreSQL client is not installed. Install it with:

    brew install libpq && brew link --force libpq

Or set [client] program in the config file to a psql binary."#
            .to_string()
    }

    #[cfg(target_os = "linux")]
    {
        r#"The PostgreSQL client is not installed. Install it with your package manager:

    sudo apt-get install postgresql-client      # Debian/Ubuntu
    sudo dnf install postgresql                 # Fedora/RHEL

Or set [client] program in the config file to a psql binary."#
            .to_string()
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        r#"The PostgreSQL client is not installed. Visit https://www.postgresql.org/download/ for installation instructions."#.to_string()
    }
}
