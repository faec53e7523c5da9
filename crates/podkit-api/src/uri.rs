// ── Connection URIs ──
//
// Parses a single connection URI into a typed descriptor. Resolution is
// purely syntactic: no socket is opened and no host name is looked up.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use url::{Host, Url};

use crate::error::Error;

/// Port used for `ssh://` URIs that do not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Transport family selected by a connection URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Unix,
    Ssh,
    Tcp,
}

impl Scheme {
    /// Map a URI scheme to a transport family and a TLS flag.
    fn classify(scheme: &str) -> Option<(Self, bool)> {
        match scheme {
            "unix" | "http+unix" => Some((Self::Unix, false)),
            "ssh" | "http+ssh" => Some((Self::Ssh, false)),
            "tcp" | "http+tcp" => Some((Self::Tcp, false)),
            "https+tcp" => Some((Self::Tcp, true)),
            _ => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unix => "unix",
            Self::Ssh => "ssh",
            Self::Tcp => "tcp",
        })
    }
}

/// Remote endpoint reached through an SSH-forwarded socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub login: Option<String>,
    pub host: String,
    pub port: u16,
    pub remote_path: PathBuf,
    pub identity_file: Option<PathBuf>,
}

impl SshTarget {
    /// `[login@]host` argument for the ssh command line.
    pub fn destination(&self) -> String {
        match &self.login {
            Some(login) => format!("{login}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

/// A resolved connection endpoint. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionDescriptor {
    /// Local unix-domain socket.
    Unix { path: PathBuf },
    /// Remote unix socket reached over an SSH tunnel.
    Ssh(SshTarget),
    /// Plain HTTP (or HTTPS) over host:port.
    Tcp { host: String, port: u16, tls: bool },
}

impl ConnectionDescriptor {
    /// Parse a connection URI.
    ///
    /// Accepted forms:
    /// - `unix:///abs/path`, `http+unix:///abs/path` (or `http+unix://%2Fabs%2Fpath`)
    /// - `ssh://[login@]host[:port]/abs/path`, `http+ssh://…`
    /// - `tcp://host:port`, `http+tcp://host:port`, `https+tcp://host:port`
    pub fn parse(uri: &str) -> Result<Self, Error> {
        let url = Url::parse(uri)
            .map_err(|e| Error::configuration(format!("invalid connection URI '{uri}': {e}")))?;

        let Some((scheme, tls)) = Scheme::classify(url.scheme()) else {
            return Err(Error::configuration(format!(
                "unsupported scheme '{}' in connection URI '{uri}'",
                url.scheme()
            )));
        };

        match scheme {
            Scheme::Unix => parse_unix(uri, &url),
            Scheme::Ssh => parse_ssh(uri, &url),
            Scheme::Tcp => parse_tcp(uri, &url, tls),
        }
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            Self::Unix { .. } => Scheme::Unix,
            Self::Ssh(_) => Scheme::Ssh,
            Self::Tcp { .. } => Scheme::Tcp,
        }
    }

    /// Attach an SSH identity file. No effect on non-SSH descriptors.
    pub fn with_identity(self, identity: impl Into<PathBuf>) -> Self {
        match self {
            Self::Ssh(target) => Self::Ssh(SshTarget {
                identity_file: Some(identity.into()),
                ..target
            }),
            other => other,
        }
    }

    /// Socket path for unix descriptors, remote socket path for SSH.
    pub fn socket_path(&self) -> Option<&Path> {
        match self {
            Self::Unix { path } => Some(path),
            Self::Ssh(target) => Some(&target.remote_path),
            Self::Tcp { .. } => None,
        }
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(f, "unix://{}", path.display()),
            Self::Ssh(target) => write!(
                f,
                "ssh://{}:{}{}",
                target.destination(),
                target.port,
                target.remote_path.display()
            ),
            Self::Tcp { host, port, tls } => {
                let scheme = if *tls { "https+tcp" } else { "tcp" };
                if host.contains(':') {
                    write!(f, "{scheme}://[{host}]:{port}")
                } else {
                    write!(f, "{scheme}://{host}:{port}")
                }
            }
        }
    }
}

// ── Per-scheme parsing ──────────────────────────────────────────────

fn parse_unix(uri: &str, url: &Url) -> Result<ConnectionDescriptor, Error> {
    // `http+unix://%2Frun%2Fpodman.sock` carries the path in the authority.
    let raw = match url.host_str() {
        Some(host) if !host.is_empty() => format!("{host}{}", url.path()),
        _ => url.path().to_owned(),
    };
    let path = absolute_path(uri, &raw, "socket path")?;
    Ok(ConnectionDescriptor::Unix { path })
}

fn parse_ssh(uri: &str, url: &Url) -> Result<ConnectionDescriptor, Error> {
    let host = host_of(url)
        .ok_or_else(|| Error::configuration(format!("missing host in SSH URI '{uri}'")))?;
    let port = url.port().unwrap_or(DEFAULT_SSH_PORT);
    if port == 0 {
        return Err(Error::configuration(format!("invalid port 0 in URI '{uri}'")));
    }

    let login = match url.username() {
        "" => None,
        name => Some(decode(uri, name)?),
    };

    let remote_path = absolute_path(uri, url.path(), "remote socket path")?;

    Ok(ConnectionDescriptor::Ssh(SshTarget {
        login,
        host,
        port,
        remote_path,
        identity_file: None,
    }))
}

fn parse_tcp(uri: &str, url: &Url, tls: bool) -> Result<ConnectionDescriptor, Error> {
    let host = host_of(url)
        .ok_or_else(|| Error::configuration(format!("missing host in TCP URI '{uri}'")))?;
    let port = match url.port() {
        Some(0) => {
            return Err(Error::configuration(format!("invalid port 0 in URI '{uri}'")));
        }
        Some(port) => port,
        None => {
            return Err(Error::configuration(format!("missing port in TCP URI '{uri}'")));
        }
    };
    if !matches!(url.path(), "" | "/") {
        return Err(Error::configuration(format!(
            "unexpected path '{}' in TCP URI '{uri}'",
            url.path()
        )));
    }
    Ok(ConnectionDescriptor::Tcp { host, port, tls })
}

// ── Helpers ─────────────────────────────────────────────────────────

fn host_of(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(domain) if domain.is_empty() => None,
        Host::Domain(domain) => Some(domain.to_owned()),
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}

fn decode(uri: &str, raw: &str) -> Result<String, Error> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| Error::configuration(format!("invalid encoding in URI '{uri}': {e}")))
}

fn absolute_path(uri: &str, raw: &str, what: &str) -> Result<PathBuf, Error> {
    let decoded = decode(uri, raw)?;
    if decoded.is_empty() || decoded == "/" {
        return Err(Error::configuration(format!("missing {what} in URI '{uri}'")));
    }
    let path = PathBuf::from(decoded);
    if !path.is_absolute() {
        return Err(Error::configuration(format!(
            "{what} '{}' in URI '{uri}' is not absolute",
            path.display()
        )));
    }
    Ok(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn unix_socket_uri() {
        let descriptor = ConnectionDescriptor::parse("unix:///run/podman/podman.sock").unwrap();
        assert_eq!(
            descriptor,
            ConnectionDescriptor::Unix {
                path: PathBuf::from("/run/podman/podman.sock")
            }
        );
        assert_eq!(descriptor.scheme(), Scheme::Unix);
    }

    #[test]
    fn http_unix_with_encoded_authority() {
        let descriptor =
            ConnectionDescriptor::parse("http+unix://%2Frun%2Fuser%2F1000%2Fpodman.sock").unwrap();
        assert_eq!(
            descriptor.socket_path(),
            Some(Path::new("/run/user/1000/podman.sock"))
        );

        let plain = ConnectionDescriptor::parse("http+unix:///tmp/podman.sock").unwrap();
        assert_eq!(plain.socket_path(), Some(Path::new("/tmp/podman.sock")));
    }

    #[test]
    fn ssh_uri_with_all_components() {
        let descriptor =
            ConnectionDescriptor::parse("ssh://core@podman.example.com:2222/run/podman/podman.sock")
                .unwrap();
        assert_eq!(
            descriptor,
            ConnectionDescriptor::Ssh(SshTarget {
                login: Some("core".into()),
                host: "podman.example.com".into(),
                port: 2222,
                remote_path: PathBuf::from("/run/podman/podman.sock"),
                identity_file: None,
            })
        );
    }

    #[test]
    fn ssh_uri_defaults_port_and_login() {
        let descriptor =
            ConnectionDescriptor::parse("http+ssh://builder/run/user/1000/podman/podman.sock")
                .unwrap()
                .with_identity("/home/me/.ssh/id_ed25519");
        let ConnectionDescriptor::Ssh(target) = descriptor else {
            panic!("expected ssh descriptor");
        };
        assert_eq!(target.login, None);
        assert_eq!(target.host, "builder");
        assert_eq!(target.port, DEFAULT_SSH_PORT);
        assert_eq!(target.destination(), "builder");
        assert_eq!(
            target.identity_file.as_deref(),
            Some(Path::new("/home/me/.ssh/id_ed25519"))
        );
    }

    #[test]
    fn tcp_uris() {
        assert_eq!(
            ConnectionDescriptor::parse("tcp://localhost:8080").unwrap(),
            ConnectionDescriptor::Tcp {
                host: "localhost".into(),
                port: 8080,
                tls: false
            }
        );
        assert_eq!(
            ConnectionDescriptor::parse("http+tcp://10.0.0.5:8888").unwrap(),
            ConnectionDescriptor::Tcp {
                host: "10.0.0.5".into(),
                port: 8888,
                tls: false
            }
        );
        assert_eq!(
            ConnectionDescriptor::parse("https+tcp://podman.internal:443").unwrap(),
            ConnectionDescriptor::Tcp {
                host: "podman.internal".into(),
                port: 443,
                tls: true
            }
        );
    }

    #[test]
    fn identity_is_ignored_for_local_sockets() {
        let descriptor = ConnectionDescriptor::parse("unix:///run/podman/podman.sock")
            .unwrap()
            .with_identity("/tmp/key");
        assert_eq!(descriptor.scheme(), Scheme::Unix);
    }

    #[test]
    fn display_round_trips() {
        for uri in [
            "unix:///run/podman/podman.sock",
            "ssh://core@host:2222/run/podman/podman.sock",
            "tcp://localhost:8080",
        ] {
            let descriptor = ConnectionDescriptor::parse(uri).unwrap();
            assert_eq!(descriptor.to_string(), uri);
            assert_eq!(
                ConnectionDescriptor::parse(&descriptor.to_string()).unwrap(),
                descriptor
            );
        }
    }

    #[test]
    fn grammar_violations_are_configuration_errors() {
        for uri in [
            "ftp://host/socket",
            "npipe:////./pipe/podman",
            "unix://",
            "unix://relative/podman.sock",
            "unix:relative.sock",
            "ssh://host",
            "ssh://host/",
            "ssh:///run/podman/podman.sock",
            "tcp://localhost",
            "tcp://localhost:0",
            "tcp://localhost:8080/v5.0.0",
            "not a uri",
        ] {
            let err = ConnectionDescriptor::parse(uri).unwrap_err();
            assert!(
                matches!(err, Error::Configuration { .. }),
                "{uri} produced {err:?}"
            );
        }
    }
}
