//! First-boot script for compute egress instances
//!
//! The script installs the OpenVPN client, writes the caller's profile
//! verbatim through a quoted heredoc and enables the client unit.

use thiserror::Error;

/// Heredoc terminator wrapping the profile text
const PROFILE_TERMINATOR: &str = "EGRESS_VPN_PROFILE";

/// Where the OpenVPN client unit expects its config
pub const CLIENT_CONFIG_PATH: &str = "/etc/openvpn/client/client.conf";

/// systemd unit started at boot
pub const CLIENT_SERVICE: &str = "openvpn-client@client.service";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootScriptError {
    #[error("VPN profile is empty")]
    EmptyProfile,

    #[error("VPN profile line {line} collides with the heredoc terminator")]
    ContainsTerminator { line: usize },

    #[error("VPN profile contains a NUL byte")]
    ContainsNul,
}

/// Reject profiles that cannot be embedded safely.
pub fn validate_profile(profile: &str) -> Result<(), BootScriptError> {
    if profile.trim().is_empty() {
        return Err(BootScriptError::EmptyProfile);
    }
    if profile.contains('\0') {
        return Err(BootScriptError::ContainsNul);
    }
    if let Some(line) = profile
        .lines()
        .position(|l| l.trim_end_matches('\r') == PROFILE_TERMINATOR)
    {
        return Err(BootScriptError::ContainsTerminator { line: line + 1 });
    }
    Ok(())
}

/// Render the boot script for `profile`.
///
/// The heredoc reproduces the profile byte for byte. A profile without a
/// final newline gets one, since the terminator needs its own line.
pub fn render_boot_script(profile: &str) -> Result<String, BootScriptError> {
    validate_profile(profile)?;
    let line_end = if profile.ends_with('\n') { "" } else { "\n" };

    Ok(format!(
        r#"#!/bin/bash
set -euo pipefail

exec > >(tee /var/log/regional-egress-bootstrap.log) 2>&1

echo "Installing OpenVPN client..."
dnf update -y
dnf install -y openvpn
mkdir -p /etc/openvpn/client

cat > {config} <<'{term}'
{profile}{line_end}{term}
chmod 600 {config}

echo "Starting {service}..."
systemctl enable --now {service}
"#,
        config = CLIENT_CONFIG_PATH,
        term = PROFILE_TERMINATOR,
        service = CLIENT_SERVICE,
    ))
}
