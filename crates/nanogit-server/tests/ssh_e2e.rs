//! End-to-end: a real russh client against a server bound to an ephemeral
//! port, with stub `git-*` scripts standing in for git.

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::keys::{Algorithm, PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, ChannelMsg};
use tokio_util::sync::CancellationToken;

use nanogit_server::{ssh_server_builder, AclStore, AllowAll};
use nanogit_ssh::{authorized_key_text, GitSshServer};

const TIMEOUT: Duration = Duration::from_secs(20);

struct TestServer {
    addr: SocketAddr,
    root: tempfile::TempDir,
    reader: PrivateKey,
    writer: PrivateKey,
    shutdown: CancellationToken,
}

impl TestServer {
    fn marker(&self, name: &str) -> PathBuf {
        self.root.path().join(format!("{name}.ran"))
    }

    fn repo_dir(&self) -> PathBuf {
        self.root.path().join("repos").join("acme").join("widgets")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn random_key() -> PrivateKey {
    PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap()
}

fn key_text(key: &PrivateKey) -> String {
    authorized_key_text(key.public_key()).unwrap()
}

/// Each stub records that it ran, echoes its repo argument and
/// `GIT_PROTOCOL`, echoes one line of stdin, and writes to stderr.
fn write_stub(bin: &Path, name: &str, marker: &Path) {
    let script = format!(
        "#!/bin/sh\n\
         touch '{marker}'\n\
         echo \"{name} $1 proto=$GIT_PROTOCOL\"\n\
         read line\n\
         echo \"got $line\"\n\
         echo 'stub stderr' >&2\n\
         exit 0\n",
        marker = marker.display(),
    );
    let path = bin.join(name);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

async fn start_server() -> TestServer {
    let root = tempfile::tempdir().unwrap();
    let bin = root.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    std::fs::create_dir_all(root.path().join("repos/acme/widgets")).unwrap();
    for name in ["git-upload-pack", "git-upload-archive", "git-receive-pack"] {
        write_stub(&bin, name, &root.path().join(format!("{name}.ran")));
    }

    let reader = random_key();
    let writer = random_key();
    let yaml = format!(
        r#"
server:
  data_root: repos
  git_exec_path: bin
orgs:
  - id: acme
    teams:
      - {{ name: readers, read: true, write: false }}
      - {{ name: writers, read: true, write: true }}
users:
  - name: rita
    ssh_keys: [{{ type: ssh-ed25519, val: "{reader}" }}]
    orgs: [{{ id: acme, teams: [readers] }}]
  - name: walt
    ssh_keys: [{{ type: ssh-ed25519, val: "{writer}" }}]
    orgs: [{{ id: acme, teams: [writers] }}]
"#,
        reader = key_text(&reader),
        writer = key_text(&writer),
    );
    let config_path = root.path().join("config.yml");
    std::fs::write(&config_path, yaml).unwrap();

    let acl = Arc::new(AclStore::open(&config_path).unwrap());
    let config = ssh_server_builder(&acl, Arc::new(AllowAll))
        .host("127.0.0.1")
        .port(0)
        .host_key(random_key())
        .build()
        .unwrap();

    let server = GitSshServer::new(config).bind().await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.serve(shutdown.clone()));

    TestServer {
        addr,
        root,
        reader,
        writer,
        shutdown,
    }
}

struct TrustingClient;

impl client::Handler for TrustingClient {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Connect and try `key`; returns the handle and whether auth succeeded.
async fn connect(addr: SocketAddr, key: &PrivateKey) -> (Handle<TrustingClient>, bool) {
    let config = Arc::new(client::Config::default());
    let mut session = client::connect(config, addr, TrustingClient).await.unwrap();
    let auth = session
        .authenticate_publickey("git", PrivateKeyWithHashAlg::new(Arc::new(key.clone()), None))
        .await
        .unwrap();
    (session, auth.success())
}

#[derive(Debug, Default)]
struct Outcome {
    success: bool,
    failure: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
}

async fn collect(channel: &mut Channel<client::Msg>) -> Outcome {
    let mut out = Outcome::default();
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Success => out.success = true,
            ChannelMsg::Failure => out.failure = true,
            ChannelMsg::Data { data } => out.stdout.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, ext: 1 } => out.stderr.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status } => out.exit_status = Some(exit_status),
            ChannelMsg::Close => break,
            _ => {}
        }
    }
    out
}

#[tokio::test]
async fn unknown_key_is_rejected_before_any_channel() {
    let server = start_server().await;

    tokio::time::timeout(TIMEOUT, async {
        let (_session, authenticated) = connect(server.addr, &random_key()).await;
        assert!(!authenticated);
    })
    .await
    .unwrap();

    for name in ["git-upload-pack", "git-upload-archive", "git-receive-pack"] {
        assert!(!server.marker(name).exists(), "{name} must not run");
    }
}

#[tokio::test]
async fn read_only_user_cannot_push() {
    let server = start_server().await;

    let out = tokio::time::timeout(TIMEOUT, async {
        let (session, authenticated) = connect(server.addr, &server.reader).await;
        assert!(authenticated);
        let mut channel = session.channel_open_session().await.unwrap();
        channel.exec(true, "git-receive-pack 'acme/widgets'").await.unwrap();
        collect(&mut channel).await
    })
    .await
    .unwrap();

    assert!(out.failure);
    assert!(!out.success);
    assert!(out.stdout.is_empty());
    assert!(out.stderr.is_empty());
    assert_eq!(out.exit_status, Some(1));
    assert!(!server.marker("git-receive-pack").exists());
}

#[tokio::test]
async fn writer_fetches_through_upload_pack() {
    let server = start_server().await;

    let out = tokio::time::timeout(TIMEOUT, async {
        let (session, authenticated) = connect(server.addr, &server.writer).await;
        assert!(authenticated);
        let mut channel = session.channel_open_session().await.unwrap();
        channel.set_env(false, "GIT_PROTOCOL", "version=2").await.unwrap();
        channel.exec(true, "git-upload-pack '/acme/widgets'").await.unwrap();
        channel.data(&b"0000\n"[..]).await.unwrap();
        channel.eof().await.unwrap();
        collect(&mut channel).await
    })
    .await
    .unwrap();

    assert!(out.success, "{out:?}");
    assert!(!out.failure);
    let stdout = String::from_utf8(out.stdout).unwrap();
    let expected = format!(
        "git-upload-pack {} proto=version=2\ngot 0000\n",
        server.repo_dir().display()
    );
    assert_eq!(stdout, expected);
    assert_eq!(out.stderr, b"stub stderr\n");
    assert_eq!(out.exit_status, Some(0));
    assert!(server.marker("git-upload-pack").exists());
}

#[tokio::test]
async fn denied_push_after_env_is_still_a_failure() {
    let server = start_server().await;

    tokio::time::timeout(TIMEOUT, async {
        let (session, authenticated) = connect(server.addr, &server.reader).await;
        assert!(authenticated);
        // Same request sequence git sends over OpenSSH, repeated so a late
        // env reply would be caught stealing the exec's reply.
        for _ in 0..5 {
            let mut channel = session.channel_open_session().await.unwrap();
            channel.set_env(false, "GIT_PROTOCOL", "version=2").await.unwrap();
            channel.exec(true, "git-receive-pack 'acme/widgets'").await.unwrap();
            let out = collect(&mut channel).await;
            assert!(out.failure, "{out:?}");
            assert!(!out.success, "{out:?}");
            assert_eq!(out.exit_status, Some(1));
        }
    })
    .await
    .unwrap();

    assert!(!server.marker("git-receive-pack").exists());
}

#[tokio::test]
async fn unknown_command_completes_without_running_anything() {
    let server = start_server().await;

    let out = tokio::time::timeout(TIMEOUT, async {
        let (session, _) = connect(server.addr, &server.writer).await;
        let mut channel = session.channel_open_session().await.unwrap();
        channel.exec(true, "git-cat-file 'acme/widgets'").await.unwrap();
        collect(&mut channel).await
    })
    .await
    .unwrap();

    assert!(out.success, "{out:?}");
    assert!(!out.failure);
    assert_eq!(out.exit_status, Some(0));
    assert!(out.stdout.is_empty());
    for name in ["git-upload-pack", "git-upload-archive", "git-receive-pack"] {
        assert!(!server.marker(name).exists(), "{name} must not run");
    }
}

#[tokio::test]
async fn dot_segments_do_not_resolve_to_the_data_root() {
    let server = start_server().await;

    for path in ["acme/..", "acme/.", "../acme"] {
        let out = tokio::time::timeout(TIMEOUT, async {
            let (session, _) = connect(server.addr, &server.reader).await;
            let mut channel = session.channel_open_session().await.unwrap();
            channel
                .exec(true, format!("git-upload-pack '{path}'"))
                .await
                .unwrap();
            collect(&mut channel).await
        })
        .await
        .unwrap();

        assert!(out.failure, "{path}: {out:?}");
        assert!(out.stdout.is_empty(), "{path}");
        assert_eq!(out.exit_status, Some(1), "{path}");
    }
    assert!(!server.marker("git-upload-pack").exists());
}

#[tokio::test]
async fn direct_tcpip_is_refused_but_sessions_still_work() {
    let server = start_server().await;

    let out = tokio::time::timeout(TIMEOUT, async {
        let (session, authenticated) = connect(server.addr, &server.writer).await;
        assert!(authenticated);
        let forwarded = session
            .channel_open_direct_tcpip("127.0.0.1", 22, "127.0.0.1", 40000)
            .await;
        assert!(forwarded.is_err(), "direct-tcpip channel must be refused");

        let mut channel = session.channel_open_session().await.unwrap();
        channel.exec(true, "git-upload-pack 'acme/widgets'").await.unwrap();
        channel.data(&b"0000\n"[..]).await.unwrap();
        channel.eof().await.unwrap();
        collect(&mut channel).await
    })
    .await
    .unwrap();

    assert!(out.success, "{out:?}");
    assert_eq!(out.exit_status, Some(0));
    assert!(server.marker("git-upload-pack").exists());
}

#[tokio::test]
async fn missing_repository_fails_the_request() {
    let server = start_server().await;

    let out = tokio::time::timeout(TIMEOUT, async {
        let (session, _) = connect(server.addr, &server.writer).await;
        let mut channel = session.channel_open_session().await.unwrap();
        channel.exec(true, "git-upload-pack 'acme/gadgets'").await.unwrap();
        collect(&mut channel).await
    })
    .await
    .unwrap();

    assert!(out.failure);
    assert_eq!(out.exit_status, Some(1));
    assert!(!server.marker("git-upload-pack").exists());
}
