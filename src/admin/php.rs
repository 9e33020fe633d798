//! Renders the admin front-end's `config.user.inc.php`.

use std::fmt::Write;

use crate::service::Service;

/// Directory inside the admin container for saved exports.
pub const SAVE_DIR: &str = "/var/www/html/save";
/// Directory inside the admin container for server-side uploads.
pub const UPLOAD_DIR: &str = "/var/www/html/upload";

/// How the front-end authenticates against a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Stored user and password.
    Saved,
    /// Ask in the browser.
    Prompt,
}

impl AuthMode {
    fn as_php(&self) -> &'static str {
        match self {
            AuthMode::Saved => "config",
            AuthMode::Prompt => "cookie",
        }
    }
}

/// One back-end in the admin server list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminServer {
    /// Display name (the service name).
    pub label: String,
    /// Container name for internal services, host for external ones.
    pub host: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl AdminServer {
    pub fn from_service(service: &Service) -> Self {
        let host = match service.host() {
            Some(host) => host.to_string(),
            None => service.container_name(),
        };
        let (user, password) = service.admin_credentials();
        Self {
            label: service.name().to_string(),
            host,
            user: user.map(str::to_string),
            password: password.map(str::to_string),
        }
    }

    pub fn auth_mode(&self) -> AuthMode {
        match (&self.user, &self.password) {
            (Some(_), Some(_)) => AuthMode::Saved,
            _ => AuthMode::Prompt,
        }
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Render the full config file for `servers`.
pub fn render_config(servers: &[AdminServer]) -> String {
    let mut out = String::new();
    out.push_str("<?php\n");
    out.push_str("// Generated by mariadb-services; rewritten on every resync.\n");
    let _ = writeln!(out, "$cfg['SaveDir'] = {};", quote(SAVE_DIR));
    let _ = writeln!(out, "$cfg['UploadDir'] = {};", quote(UPLOAD_DIR));
    out.push_str("$i = 0;\n");

    for server in servers {
        out.push('\n');
        out.push_str("$i++;\n");
        let mut set = |key: &str, value: &str| {
            let _ = writeln!(out, "$cfg['Servers'][$i]['{}'] = {};", key, quote(value));
        };
        set("verbose", &server.label);
        set("host", &server.host);
        set("auth_type", server.auth_mode().as_php());
        if let Some(user) = &server.user {
            set("user", user);
        }
        if server.auth_mode() == AuthMode::Saved
            && let Some(password) = &server.password
        {
            set("password", password);
        }
    }
    out
}
