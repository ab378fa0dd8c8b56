//! Skips wiremock-based tests where localhost sockets cannot be bound.
//!
//! Set `MEDIAFETCH_REQUIRE_SOCKET_TESTS=1` (CI) to turn a skip into a failure.

use std::net::TcpListener;
use std::panic::Location;

use wiremock::MockServer;

const REQUIRE_SOCKET_TESTS_ENV: &str = "MEDIAFETCH_REQUIRE_SOCKET_TESTS";

fn socket_tests_required() -> bool {
    std::env::var(REQUIRE_SOCKET_TESTS_ENV)
        .is_ok_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

#[track_caller]
fn localhost_unavailable() -> bool {
    if TcpListener::bind("127.0.0.1:0").is_ok() {
        return false;
    }

    let location = Location::caller();
    let message = format!(
        "[socket-bound-test] cannot bind a localhost socket at {}:{}",
        location.file(),
        location.line()
    );
    assert!(
        !socket_tests_required(),
        "{message}; unset {REQUIRE_SOCKET_TESTS_ENV} to allow skipping"
    );
    eprintln!("{message}; skipping. Set {REQUIRE_SOCKET_TESTS_ENV}=1 to fail instead.");
    true
}

/// Starts a mock server, or returns `None` when the sandbox forbids sockets.
#[track_caller]
pub(crate) fn start_mock_server_or_skip() -> impl std::future::Future<Output = Option<MockServer>> {
    let skip = localhost_unavailable();
    async move {
        if skip {
            None
        } else {
            Some(MockServer::start().await)
        }
    }
}
