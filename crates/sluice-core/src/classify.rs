//! Classifier — decides whether an [`Envelope`] is a control-plane line or an
//! application line and renders it into the canonical one-line form.
//!
//! # Rules
//!
//! A line is control-plane iff its container name contains the configured
//! controller identifier **and** its text matches `LEVEL [component]: message`.
//! Everything else is an application line.
//!
//! | Origin        | `target_key`                  | rendered                                       |
//! |---------------|-------------------------------|------------------------------------------------|
//! | control-plane | bracketed component (group 3) | `<ts> deis[controller]: <LEVEL> <message>`     |
//! | application   | `app` label (or `""`)         | `<ts> <app>[<type>.<version>[.<suffix>]]: <line>` |
//!
//! The pod-name suffix comes from a greedy four-segment pattern. Pod names
//! with extra hyphens segment differently than a reader might expect; that
//! is known and kept as-is.

use chrono::{DateTime, FixedOffset};
use regex::Regex;

use crate::types::{ClassifiedLine, Envelope, LineOrigin};

/// Container identifier of the platform controller.
pub const DEFAULT_CONTROLLER_CONTAINER: &str = "deis-controller";

const CONTROLLER_PATTERN: &str = r"^(INFO|WARN|DEBUG|ERROR)\s+(\[(\S+)\])+:(.*)";
const POD_PATTERN: &str = r"(\w.*)-(\w.*)-(\w.*)-(\w.*)";

/// Fixed-width, nanosecond precision, numeric offset. Consumers sort on it.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9f%:z";

/// Render a timestamp in the canonical line format.
pub fn format_timestamp(ts: &DateTime<FixedOffset>) -> String {
    ts.format(TIME_FORMAT).to_string()
}

/// Whether a container name belongs to process `filter`: an exact match, or
/// a `-<filter>` suffix (`foo-cmd` matches `cmd`, `foo-webhook` does not
/// match `web`).
pub fn process_matches(container_name: &str, filter: &str) -> bool {
    if container_name == filter {
        return true;
    }
    container_name
        .strip_suffix(filter)
        .is_some_and(|head| head.ends_with('-'))
}

/// Pure classifier; holds only its compiled patterns.
#[derive(Debug, Clone)]
pub struct Classifier {
    controller_container: String,
    controller_re: Regex,
    pod_re: Regex,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROLLER_CONTAINER)
    }
}

impl Classifier {
    pub fn new(controller_container: impl Into<String>) -> Self {
        Self {
            controller_container: controller_container.into(),
            controller_re: Regex::new(CONTROLLER_PATTERN).expect("controller pattern is valid"),
            pod_re: Regex::new(POD_PATTERN).expect("pod pattern is valid"),
        }
    }

    pub fn controller_container(&self) -> &str {
        &self.controller_container
    }

    pub fn classify(&self, envelope: &Envelope) -> ClassifiedLine {
        let ts = format_timestamp(&envelope.timestamp);

        if envelope
            .origin
            .container_name
            .contains(self.controller_container.as_str())
        {
            if let Some(caps) = self.controller_re.captures(&envelope.log) {
                let level = caps.get(1).map_or("", |m| m.as_str());
                let component = caps.get(3).map_or("", |m| m.as_str());
                let message = caps.get(4).map_or("", |m| m.as_str()).trim_matches(' ');
                return ClassifiedLine {
                    target_key: component.to_string(),
                    rendered: format!("{ts} deis[controller]: {level} {message}"),
                    process_hint: None,
                    origin: LineOrigin::ControlPlane,
                };
            }
        }

        let origin = &envelope.origin;
        let app = origin.label("app");
        let mut tag = format!("{}.{}", origin.label("type"), origin.label("version"));
        if let Some(suffix) = self
            .pod_re
            .captures(&origin.pod_name)
            .and_then(|caps| caps.get(4))
        {
            tag.push('.');
            tag.push_str(suffix.as_str());
        }

        ClassifiedLine {
            target_key: app.to_string(),
            rendered: format!("{ts} {app}[{tag}]: {}", envelope.log),
            process_hint: Some(origin.container_name.clone()),
            origin: LineOrigin::Application,
        }
    }
}
