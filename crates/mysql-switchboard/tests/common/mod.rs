//! Shared helpers for integration tests: a scripted MySQL backend and a
//! proxy started on an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use mysql_switchboard::backend::{BackendOptions, UpstreamConnection};
use mysql_switchboard::config::{load_config_from_str, Config};
use mysql_switchboard::protocol::mysql::*;
use mysql_switchboard::server::QueryResponse;
use mysql_switchboard::{Catalog, CredentialSet, Listener, TlsMode};

/// What a [`FakeBackend`] has seen.
#[derive(Default)]
pub struct BackendLog {
    pub connections: AtomicUsize,
    pub events: Mutex<Vec<String>>,
}

impl BackendLog {
    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// A MySQL server that accepts one user and answers a few queries:
/// - `select 1` returns a single row
/// - queries mentioning `missing` fail with ER_NO_SUCH_TABLE
/// - anything else returns OK
pub struct FakeBackend {
    pub addr: SocketAddr,
    pub log: Arc<BackendLog>,
    task: JoinHandle<()>,
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FakeBackend {
    pub async fn start(user: &'static str, password: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(BackendLog::default());
        let task_log = Arc::clone(&log);
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                task_log.connections.fetch_add(1, Ordering::SeqCst);
                let log = Arc::clone(&task_log);
                tokio::spawn(async move {
                    let _ = serve_backend(socket, user, password, &log).await;
                });
            }
        });
        Self { addr, log, task }
    }
}

async fn serve_backend(
    mut socket: TcpStream,
    user: &str,
    password: &str,
    log: &BackendLog,
) -> mysql_switchboard::Result<()> {
    let scramble = generate_scramble();
    let greeting = HandshakeV10::with_scramble(9, &scramble, DEFAULT_SERVER_CAPABILITIES);
    write_packet(&mut socket, 0, &build_handshake_v10(&greeting)).await?;

    let (header, payload) = read_packet(&mut socket).await?;
    let response = parse_handshake_response41(&payload)?;
    if response.username != user
        || !verify_native_password(&response.auth_response, &scramble, password)
    {
        log.record(format!("denied {}", response.username));
        let err = ErrPacket::access_denied(&response.username, "127.0.0.1", true);
        write_packet(
            &mut socket,
            header.next_sequence(),
            &build_err_packet(&err, CLIENT_PROTOCOL_41),
        )
        .await?;
        return Ok(());
    }
    log.record(format!(
        "login {} db={}",
        response.username,
        response.database.unwrap_or_default()
    ));
    let ok = build_ok_packet(&OkPacket::default(), CLIENT_PROTOCOL_41);
    write_packet(&mut socket, header.next_sequence(), &ok).await?;

    loop {
        let (_, payload) = read_packet(&mut socket).await?;
        let Some((&command, body)) = payload.split_first() else {
            continue;
        };
        let text = String::from_utf8_lossy(body).to_string();
        let reply = match command {
            COM_QUIT => {
                log.record("quit".to_string());
                return Ok(());
            }
            COM_INIT_DB => {
                log.record(format!("init_db {}", text));
                vec![ok.clone()]
            }
            COM_QUERY if text.contains("missing") => {
                log.record(format!("query {}", text));
                let err = ErrPacket::with_state(1146, "42S02", "Table 'app.missing' doesn't exist");
                vec![build_err_packet(&err, CLIENT_PROTOCOL_41)]
            }
            COM_QUERY if text.eq_ignore_ascii_case("select 1") => {
                log.record(format!("query {}", text));
                let mut rs = ResultSet::new(vec![ColumnDefinition::new("1", MYSQL_TYPE_LONGLONG)]);
                rs.push_row(vec![Some("1".to_string())]);
                rs.to_packets()
            }
            COM_QUERY => {
                log.record(format!("query {}", text));
                vec![ok.clone()]
            }
            other => {
                log.record(format!("command {}", other));
                vec![ok.clone()]
            }
        };
        write_packets(&mut socket, 1, &reply).await?;
    }
}

/// A running proxy; dropping it does not stop the listener, call
/// [`Proxy::shutdown`].
pub struct Proxy {
    pub addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl Proxy {
    /// Start a proxy from a YAML document; the listen port is replaced by
    /// an ephemeral one.
    pub async fn start(yaml: &str) -> Self {
        let mut config = load_config_from_str(yaml).unwrap();
        config.listen.address = "127.0.0.1".to_string();
        config.listen.port = 0;
        Self::start_with(config).await
    }

    pub async fn start_with(config: Config) -> Self {
        let catalog = Arc::new(Catalog::new(config.servers.clone()));
        let credentials = Arc::new(CredentialSet::build(
            &catalog,
            &config.fallback.username,
            &config.fallback.password,
        ));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let listener = Listener::bind(&config, catalog, credentials, shutdown_rx)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = listener.run().await;
        });
        Self {
            addr,
            shutdown_tx,
            task,
        }
    }

    /// Log in through the proxy the way a MySQL client would.
    pub async fn connect(
        &self,
        user: &str,
        password: &str,
        database: Option<&str>,
    ) -> mysql_switchboard::Result<UpstreamConnection> {
        let options = BackendOptions {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            user: user.to_string(),
            password: password.to_string(),
            database: database.map(str::to_string),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Some(Duration::from_secs(5)),
            write_timeout: None,
            tls: TlsMode::Disabled,
            collation_id: UTF8MB4_GENERAL_CI,
            set_names: None,
        };
        UpstreamConnection::connect(&options).await
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

/// YAML for a proxy with the given backends and the default fallback pair.
pub fn proxy_yaml(servers: &[(&str, SocketAddr, &str, &str, &str)]) -> String {
    let mut yaml = String::from(
        "listen:\n  port: 4000\nfallback:\n  username: root\n  password: \"123456\"\nservers:\n",
    );
    if servers.is_empty() {
        yaml.push_str("  []\n");
    }
    for (name, addr, user, password, database) in servers {
        yaml.push_str(&format!(
            "  - name: {}\n    host: {}\n    port: {}\n    user: {}\n    password: \"{}\"\n    database: \"{}\"\n    timeout: 2s\n",
            name,
            addr.ip(),
            addr.port(),
            user,
            password,
            database
        ));
    }
    yaml
}

/// Rows of a relayed text result set.
pub fn text_rows(response: QueryResponse) -> Vec<Vec<Option<String>>> {
    let QueryResponse::Relayed(packets) = response else {
        panic!("expected relayed packets, got {:?}", response);
    };
    let (columns, _) = read_length_encoded_int(&packets[0]).unwrap();
    let columns = columns as usize;
    packets[columns + 2..]
        .iter()
        .take_while(|packet| !is_eof_packet(packet))
        .map(|row| parse_text_row(row, columns).unwrap())
        .collect()
}
