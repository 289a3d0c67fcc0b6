//! Domain-specific assertions for sluice harnesses.
//!
//! The macros wrap `pretty_assertions` and add context on *which* pipeline
//! guarantee failed. The async helpers poll shared state that the loops
//! update on their own tasks.

use std::future::Future;
use std::time::Duration;

use sluice::sluice_core::LogStore;

/// Default bound for anything that happens on a background task.
pub const SETTLE: Duration = Duration::from_secs(2);

/// Assert a store read returned exactly these lines, oldest first.
///
/// ```rust
/// assert_lines!(store.read("foo", 3, None).await, ["msg2", "msg3", "msg4"]);
/// ```
#[macro_export]
macro_rules! assert_lines {
    ($result:expr, [$($line:expr),* $(,)?]) => {{
        let actual: Vec<String> = match $result {
            Ok(lines) => lines,
            Err(e) => panic!("assert_lines! failed: read returned an error: {e}"),
        };
        let expected: Vec<String> = vec![$($line.to_string()),*];
        pretty_assertions::assert_eq!(
            actual, expected,
            "assert_lines! failed: wrong lines or order"
        );
    }};
}

/// Assert a store call failed with `NotFound`.
#[macro_export]
macro_rules! assert_not_found {
    ($result:expr) => {{
        match $result {
            Err(e) if e.is_not_found() => {}
            Err(e) => panic!("assert_not_found! failed: expected NotFound, got error {e}"),
            Ok(v) => panic!("assert_not_found! failed: expected NotFound, got {v:?}"),
        }
    }};
}

/// Assert a classified line is a control-plane line filed under `$app`.
#[macro_export]
macro_rules! assert_control_plane {
    ($line:expr, $app:expr) => {{
        let line: &sluice::sluice_core::ClassifiedLine = &$line;
        assert_eq!(
            line.origin,
            sluice::sluice_core::LineOrigin::ControlPlane,
            "assert_control_plane! failed: {line:?}"
        );
        pretty_assertions::assert_eq!(line.target_key, $app);
        assert!(line.process_hint.is_none(), "control-plane lines carry no process hint");
    }};
}

/// Assert a classified line is an application line filed under `$app`.
#[macro_export]
macro_rules! assert_application {
    ($line:expr, $app:expr) => {{
        let line: &sluice::sluice_core::ClassifiedLine = &$line;
        assert_eq!(
            line.origin,
            sluice::sluice_core::LineOrigin::Application,
            "assert_application! failed: {line:?}"
        );
        pretty_assertions::assert_eq!(line.target_key, $app);
    }};
}

/// Poll `check` until it returns `true` or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until `app` holds at least `n` lines and return everything stored.
pub async fn wait_for_lines(store: &dyn LogStore, app: &str, n: usize) -> Vec<String> {
    let ready = eventually(SETTLE, || async move {
        store
            .read(app, usize::MAX, None)
            .await
            .map(|lines| lines.len() >= n)
            .unwrap_or(false)
    })
    .await;
    assert!(ready, "timed out waiting for {n} lines for '{app}'");
    store.read(app, usize::MAX, None).await.unwrap()
}
