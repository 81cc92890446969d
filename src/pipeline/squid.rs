//! Optional caching proxy.
//!
//! `setup_squid` starts a private squid instance for the build and points
//! `http_proxy` at it; `cleanup_squid` stops it again. The setup step
//! registers the cleanup as teardown, so the proxy is stopped even when a
//! later step fails.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as Process, Stdio};

use log::{debug, info, warn};

use super::Command;
use crate::context::RunContext;
use crate::defaults::ENV_HTTP_PROXY;
use crate::error::{Error, Result};

/// Location of the squid executable.
pub const SQUID_BINARY: &str = "/usr/sbin/squid";

const DEFAULT_HTTP_PORT: u16 = 3128;
const CACHE_SIZE_MB: u32 = 5000;
/// Expiry of `.deb` redirects from the Debian snapshot service, in minutes.
const DEBIAN_SNAPSHOT_DEB_EXPIRE: u32 = 60 * 24 * 3;

const BASE_CONFIG: &str = "\
acl SSL_ports port 443
acl Safe_ports port 80\t\t# http
acl Safe_ports port 21\t\t# ftp
acl Safe_ports port 443\t\t# https
acl Safe_ports port 70\t\t# gopher
acl Safe_ports port 210\t\t# wais
acl Safe_ports port 1025-65535\t# unregistered ports
acl Safe_ports port 280\t\t# http-mgmt
acl Safe_ports port 488\t\t# gss-http
acl Safe_ports port 591\t\t# filemaker
acl Safe_ports port 777\t\t# multiling http
acl CONNECT method CONNECT
http_access deny !Safe_ports
http_access deny CONNECT !SSL_ports
http_access deny manager
http_access allow localhost
http_access deny all
maximum_object_size 1024 MB
shutdown_lifetime 0 seconds
pid_filename none
";

const DEBIAN_SNAPSHOT_CONFIG: &str = "
acl DEBIAN-SNAPSHOT dstdomain snapshot.debian.org
delay_pools 1
delay_class 1 1
delay_access 1 allow DEBIAN-SNAPSHOT
delay_access 1 deny all
";

/// Squid configuration for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquidConfig {
    pub cache_dir: PathBuf,
    pub log_dir: PathBuf,
    pub http_port: u16,
    /// Upstream proxy host and port.
    pub upstream: Option<(String, u16)>,
    pub debian_snapshot: bool,
    /// Rate limit for the Debian snapshot service, in bytes per second.
    /// Zero disables the limit.
    pub debian_snapshot_rate: u64,
}

impl SquidConfig {
    pub fn new(
        cache_dir: PathBuf,
        log_dir: PathBuf,
        http_proxy: Option<&str>,
        debian_snapshot: bool,
        debian_snapshot_rate_kb: u64,
    ) -> Self {
        let upstream = http_proxy.and_then(|proxy| {
            let url = url::Url::parse(proxy).ok()?;
            Some((url.host_str()?.to_string(), url.port_or_known_default()?))
        });

        let mut http_port = DEFAULT_HTTP_PORT;
        if let Some((host, port)) = &upstream {
            if host == "localhost" && *port == http_port {
                debug!("Squid upstream proxy is the same as the internal proxy, incrementing port");
                http_port += 1;
            }
        }

        SquidConfig {
            cache_dir,
            log_dir,
            http_port,
            upstream,
            debian_snapshot,
            debian_snapshot_rate: debian_snapshot_rate_kb * 1024,
        }
    }

    /// Render the configuration file.
    pub fn render(&self) -> String {
        let mut out = String::from(BASE_CONFIG);
        out.push_str(&format!("http_port {}\n", self.http_port));
        out.push_str(&format!(
            "cache_dir ufs {} {} 16 256\n",
            self.cache_dir.display(),
            CACHE_SIZE_MB
        ));
        out.push_str(&format!("cache_log stdio:{}/cache.log\n", self.log_dir.display()));
        out.push_str(&format!("access_log stdio:{}/access.log\n", self.log_dir.display()));
        if let Some((host, port)) = &self.upstream {
            out.push_str(&format!("cache_peer {} parent {} 7 no-query default\n", host, port));
        }
        if self.debian_snapshot {
            let limit = self.debian_snapshot_rate;
            if limit > 0 {
                out.push_str(DEBIAN_SNAPSHOT_CONFIG);
                out.push_str(&format!("delay_parameters 1 {}/{}\n", limit, limit));
            }
            let exp = DEBIAN_SNAPSHOT_DEB_EXPIRE;
            out.push_str(&format!(
                "refresh_pattern snapshot.debian.org\\/.*\\.deb$ {} 100% {} ignore-reload ignore-no-store override-expire\n",
                exp, exp
            ));
        }
        out
    }
}

/// A running squid process.
#[derive(Debug)]
pub struct SquidInstance {
    pub child: Child,
    pub config_file: PathBuf,
    pub port: u16,
}

/// Start squid and route `http_proxy` through it.
#[derive(Debug, Clone)]
pub struct SetupSquid {
    pub binary: PathBuf,
    pub snapshot_rate_kb: u64,
}

impl Default for SetupSquid {
    fn default() -> Self {
        SetupSquid {
            binary: PathBuf::from(SQUID_BINARY),
            snapshot_rate_kb: 0,
        }
    }
}

fn tool_error(binary: &Path, message: String) -> Error {
    Error::ExternalTool {
        tool: binary.display().to_string(),
        message,
    }
}

impl Command for SetupSquid {
    fn name(&self) -> &str {
        "setup_squid"
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        if !self.binary.is_file() {
            return Err(tool_error(
                &self.binary,
                "squid setup requested but the executable was not found".to_string(),
            ));
        }
        if ctx.squid.is_some() {
            debug!("squid is already running");
            return Ok(());
        }

        let base = ctx.build_dir().join("squid-cache");
        let config = SquidConfig::new(
            base.join("cache"),
            base.join("logs"),
            ctx.environ.get(ENV_HTTP_PROXY).map(String::as_str),
            ctx.config.spec.build_system.as_deref() == Some("isar"),
            self.snapshot_rate_kb,
        );

        let mut file = tempfile::Builder::new().prefix("squid.").tempfile()?;
        file.write_all(config.render().as_bytes())?;
        let (_, config_file) = file.keep().map_err(|e| e.error)?;

        fs::create_dir_all(&config.cache_dir)?;
        fs::create_dir_all(&config.log_dir)?;

        let status = Process::new(&self.binary)
            .arg("--foreground")
            .arg("-z")
            .arg("-f")
            .arg(&config_file)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| tool_error(&self.binary, e.to_string()))?;
        if !status.success() {
            let _ = fs::remove_file(&config_file);
            return Err(tool_error(
                &self.binary,
                format!("cache initialisation failed with {}", status),
            ));
        }

        let child = Process::new(&self.binary)
            .arg("-f")
            .arg(&config_file)
            .arg("-N")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| tool_error(&self.binary, e.to_string()))?;

        ctx.squid = Some(SquidInstance {
            child,
            config_file,
            port: config.http_port,
        });
        ctx.environ.insert(
            ENV_HTTP_PROXY.to_string(),
            format!("http://localhost:{}", config.http_port),
        );
        ctx.register_teardown(Box::new(CleanupSquid));
        info!("Providing internal squid proxy on port {}", config.http_port);
        Ok(())
    }
}

/// Stop the squid started by [`SetupSquid`]. Does nothing if none runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupSquid;

#[cfg(unix)]
fn terminate(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()).map_err(|e| Error::Io(std::io::Error::other(e)))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM)
        .map_err(|e| Error::Io(std::io::Error::from_raw_os_error(e as i32)))
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> Result<()> {
    Ok(child.kill()?)
}

impl Command for CleanupSquid {
    fn name(&self) -> &str {
        "cleanup_squid"
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        let Some(mut instance) = ctx.squid.take() else {
            return Ok(());
        };
        info!("Terminating squid");
        if let Err(e) = terminate(&mut instance.child) {
            warn!("Could not signal squid: {}", e);
        }
        instance.child.wait()?;
        match fs::remove_file(&instance.config_file) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
