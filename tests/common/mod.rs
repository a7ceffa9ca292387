use std::process::{Child, Command};
use std::time::{Duration, Instant};

pub const TEST_SECRET: &str = "integration-secret-integration-secret";

pub fn get_free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("failed to bind to address")
        .local_addr()
        .unwrap()
        .port()
}

/// Guard that kills and waits on a child process when dropped.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        drop(self.0.kill());
        drop(self.0.wait());
    }
}

/// Config for a gateway on `port` with an in-memory database.
///
/// The Kakao endpoints point at a closed local port, so any test that reached them
/// would fail with `token_exchange_failed`.
pub fn gateway_config(port: u16) -> String {
    format!(
        r#"
        environment = "test"

        [server]
        port = {port}
        bind = "127.0.0.1"

        [db]
        path = ":memory:"

        [session]
        secret = "{TEST_SECRET}"

        [kakao]
        client_id = "integration-client"
        client_secret = "integration-client-secret"
        redirect_uri = "http://127.0.0.1:{port}/api/auth/callback/kakao"
        token_url = "http://127.0.0.1:9/oauth/token"
        user_info_url = "http://127.0.0.1:9/v2/user/me"
        timeout_secs = 1
        "#
    )
}

/// Spawn the gateway from a given config string.
/// Writes the config to a temp file and spawns the built binary.
pub fn spawn_gateway_with_config(port: u16, config_toml: &str) -> Child {
    let tmp = std::env::temp_dir().join(format!("souvenir_test_config_{port}.toml"));
    std::fs::write(&tmp, config_toml).expect("failed to write config");

    Command::new(env!("CARGO_BIN_EXE_souvenir"))
        .args(["--config", tmp.to_str().unwrap()])
        // keep the environment from overriding the file
        .env_remove("SESSION_SECRET")
        .env_remove("KAKAO_CLIENT_ID")
        .env_remove("KAKAO_CLIENT_SECRET")
        .env_remove("KAKAO_REDIRECT_URI")
        .env_remove("SOUVENIR_ENV")
        .spawn()
        .expect("failed to start gateway")
}

/// Block until a TCP listener is accepting on `127.0.0.1:port` or timeout.
pub async fn wait_for_listening(port: u16, timeout_secs: u64) {
    let start = Instant::now();
    while std::net::TcpStream::connect(("127.0.0.1", port)).is_err() {
        assert!(
            start.elapsed() <= Duration::from_secs(timeout_secs),
            "server did not start within timeout"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// A client that surfaces redirects instead of following them.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
