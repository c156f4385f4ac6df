//! Alert-routing values stored on devices.
//!
//! A device's alert route is a comma-delimited list of `host:port`
//! destinations. Synthetic-monitoring devices always carry the local relay
//! first, followed by the forwarding target.

use std::fmt;
use std::str::FromStr;

/// Device name used for synthetic-monitoring agents.
pub const SENTINEL_DEVICE: &str = "ksynth";

/// Local relay that always leads the route list.
pub const LOOPBACK_ROUTE: &str = "127.0.0.1:9456";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InvalidTarget {
    #[error("target host is empty")]
    Empty,
    #[error("target host `{0}` contains a delimiter or whitespace")]
    Malformed(String),
}

/// Forwarding destination appended to sentinel device routes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertTarget(String);

impl AlertTarget {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AlertTarget {
    type Err = InvalidTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(InvalidTarget::Empty);
        }
        if trimmed.contains(',') || trimmed.contains(char::is_whitespace) {
            return Err(InvalidTarget::Malformed(trimmed.to_string()));
        }
        Ok(AlertTarget(trimmed.to_string()))
    }
}

impl fmt::Display for AlertTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How an out-of-date route gets rewritten.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RouteMode {
    /// Replace the whole value with `<loopback>,<target>`. Any other
    /// destination on the device is dropped.
    #[default]
    Overwrite,
    /// Keep existing destinations and append the target.
    Merge,
}

impl FromStr for RouteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(RouteMode::Overwrite),
            "merge" => Ok(RouteMode::Merge),
            other => Err(format!(
                "unknown route mode `{other}`, expected `overwrite` or `merge`"
            )),
        }
    }
}

impl fmt::Display for RouteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMode::Overwrite => f.write_str("overwrite"),
            RouteMode::Merge => f.write_str("merge"),
        }
    }
}

/// A route needs rewriting unless the target already appears in it. This is
/// a substring test, matching `strpos(route, target) > 0` on the database side.
#[cfg(test)]
pub(crate) fn needs_update(route: Option<&str>, target: &AlertTarget) -> bool {
    !route.unwrap_or_default().contains(target.as_str())
}

pub fn overwrite_route(target: &AlertTarget) -> String {
    format!("{LOOPBACK_ROUTE},{target}")
}

/// Loopback first, prior destinations in their original order, target last.
/// Empty entries and duplicates are dropped.
pub fn merge_route(route: Option<&str>, target: &AlertTarget) -> String {
    let mut merged: Vec<&str> = vec![LOOPBACK_ROUTE];
    let existing = route
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty());

    for entry in existing.chain(std::iter::once(target.as_str())) {
        if !merged.contains(&entry) {
            merged.push(entry);
        }
    }
    merged.join(",")
}

#[cfg(test)]
pub(crate) fn rewrite_route(mode: RouteMode, route: Option<&str>, target: &AlertTarget) -> String {
    match mode {
        RouteMode::Overwrite => overwrite_route(target),
        RouteMode::Merge => merge_route(route, target),
    }
}
