//! Static payload corpora used across harnesses.
//!
//! Raw wire payloads, exactly as a log shipper would publish them, so the
//! harnesses exercise decoding and not only the builders.

/// Structured shape: `docker` is an object.
pub const STRUCTURED_JSON: &str = r#"{
    "log": "listening on :8080\n",
    "stream": "stdout",
    "kubernetes": {
        "namespace_name": "foo",
        "pod_id": "5b1b4a5e-ffd7-11e7-a1b1-42010a800002",
        "pod_name": "foo-v2-web-2ggow",
        "container_name": "foo-web",
        "labels": {"app": "foo", "type": "web", "version": "v2", "heritage": "deis"},
        "host": "node-1"
    },
    "docker": {"container_id": "5d4b8ee0d0d2"},
    "@timestamp": "2018-01-22T20:21:00.123456789-02:00"
}"#;

/// Legacy shape: `docker` is the bare container id.
pub const LEGACY_JSON: &str = r#"{
    "log": "worker started",
    "stream": "stderr",
    "kubernetes": {
        "namespace_name": "foo",
        "pod_name": "foo-v3-worker-x7k2p",
        "container_name": "foo-worker",
        "labels": {"app": "foo", "type": "worker", "version": "v3"}
    },
    "docker": "5d4b8ee0d0d2",
    "@timestamp": "2018-01-22T20:21:01Z"
}"#;

/// A control-plane line filed under `scheduler`.
pub const CONTROLLER_JSON: &str = r#"{
    "log": "ERROR [scheduler]: pod failed",
    "stream": "stdout",
    "kubernetes": {
        "namespace_name": "deis",
        "pod_name": "deis-controller-3844356438-6hkbf",
        "container_name": "deis-controller",
        "labels": {"app": "deis-controller"}
    },
    "docker": {"container_id": "abc"},
    "@timestamp": "2018-01-22T20:21:02.5+00:00"
}"#;

/// Payloads neither shape accepts.
pub const UNDECODABLE: &[&str] = &[
    "",
    "not json at all",
    "{\"log\": ",
    "[1, 2, 3]",
    "{\"log\": 42}",
    "{\"kubernetes\": \"nope\"}",
];

/// `msg0`, `msg1`, …
pub fn numbered_lines(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("msg{i}")).collect()
}
