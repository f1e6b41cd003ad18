//! systemd unit rendering

use std::fmt::Write;

use crate::models::job::JobId;

/// Unit file name for a job. Stable, so a rerun overwrites the same unit.
pub fn unit_name(job_id: &JobId) -> String {
    format!("autodeploy-{}.service", job_id)
}

pub const SYSTEMD_DIR: &str = "/etc/systemd/system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub name: String,
    pub user: String,
    pub working_directory: String,
    pub exec_start: String,
    pub port: u16,
}

impl ServiceUnit {
    pub fn new(
        job_id: &JobId,
        user: impl Into<String>,
        working_directory: impl Into<String>,
        exec_start: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            name: unit_name(job_id),
            user: user.into(),
            working_directory: working_directory.into(),
            exec_start: exec_start.into(),
            port,
        }
    }

    /// Staging path in the user's home, writable without sudo
    pub fn staging_path(&self) -> String {
        format!("/home/{}/{}", self.user, self.name)
    }

    pub fn install_path(&self) -> String {
        format!("{}/{}", SYSTEMD_DIR, self.name)
    }

    pub fn render(&self) -> String {
        // A newline in any value would start a new directive
        let clean = |s: &str| s.replace(['\r', '\n'], " ");

        let mut out = String::new();
        let _ = writeln!(out, "[Unit]");
        let _ = writeln!(out, "Description=autodeploy application ({})", self.name);
        let _ = writeln!(out, "After=network.target");
        let _ = writeln!(out);
        let _ = writeln!(out, "[Service]");
        let _ = writeln!(out, "User={}", clean(&self.user));
        let _ = writeln!(out, "WorkingDirectory={}", clean(&self.working_directory));
        let _ = writeln!(out, "ExecStart={}", clean(&self.exec_start));
        let _ = writeln!(out, "Restart=always");
        let _ = writeln!(out, "Environment=PORT={}", self.port);
        let _ = writeln!(out, "Environment=HOST=0.0.0.0");
        let _ = writeln!(out);
        let _ = writeln!(out, "[Install]");
        let _ = writeln!(out, "WantedBy=multi-user.target");
        out
    }
}
