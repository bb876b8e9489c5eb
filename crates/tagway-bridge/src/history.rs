// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! History window resolution and queries.
//!
//! An explicit `From`/`To` window takes precedence over `LastSeconds`.
//! A missing side of an explicit window is the evaluation time.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::debug;

use tagway_core::message::{history_address, HistoryReply, HistoryRequest};
use tagway_core::MessageBus;

use crate::model::{HistoryArgs, NodeValue};

/// A resolved query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    /// Window start.
    pub from: DateTime<Utc>,
    /// Window end.
    pub to: DateTime<Utc>,
}

impl HistoryWindow {
    /// Resolves the window of `args` evaluated at `now`.
    pub fn resolve(args: &HistoryArgs, now: DateTime<Utc>) -> Self {
        if args.from.is_some() || args.to.is_some() {
            return Self {
                from: args.from.unwrap_or(now),
                to: args.to.unwrap_or(now),
            };
        }
        match args.last_seconds {
            Some(seconds) => {
                let span = i64::try_from(seconds)
                    .ok()
                    .and_then(ChronoDuration::try_seconds)
                    .unwrap_or(ChronoDuration::MAX);
                Self {
                    from: now.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC),
                    to: now,
                }
            }
            None => Self { from: now, to: now },
        }
    }

    /// Builds the bus request for one node.
    pub fn request(&self, system: &str, node_id: &str) -> HistoryRequest {
        HistoryRequest {
            system: system.to_string(),
            node_id: node_id.to_string(),
            t1: self.from.timestamp_millis(),
            t2: self.to.timestamp_millis(),
        }
    }
}

/// Where history requests go.
#[derive(Debug, Clone)]
pub(crate) struct HistoryClient {
    pub(crate) history_root: String,
    pub(crate) default_log: String,
}

impl HistoryClient {
    /// Queries one node. `None` if the logger fails or does not answer.
    pub(crate) async fn query(
        &self,
        bus: &MessageBus,
        system: &str,
        node_id: &str,
        args: &HistoryArgs,
    ) -> Option<Vec<NodeValue>> {
        let window = HistoryWindow::resolve(args, Utc::now());
        let log = args.log.as_deref().unwrap_or(&self.default_log);
        let address = history_address(&self.history_root, log);

        let reply: HistoryReply = match bus.request_json(&address, &window.request(system, node_id)).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(address = %address, node_id, error = %e, "History query failed");
                return None;
            }
        };

        Some(
            reply
                .rows()
                .iter()
                .map(|row| NodeValue::from_history_row(node_id, row))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tagway_core::message::HistoryRow;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_last_seconds_window() {
        let now = at(12);
        let window = HistoryWindow::resolve(&HistoryArgs::last_seconds(60), now);
        assert_eq!(window.to, now);
        assert_eq!(now - window.from, ChronoDuration::seconds(60));
    }

    #[test]
    fn test_explicit_window_wins() {
        let args = HistoryArgs {
            last_seconds: Some(60),
            ..HistoryArgs::between(at(1), at(2))
        };
        let window = HistoryWindow::resolve(&args, at(12));
        assert_eq!(window, HistoryWindow { from: at(1), to: at(2) });
    }

    #[test]
    fn test_partial_and_empty_windows() {
        let now = at(12);
        let args = HistoryArgs {
            from: Some(at(3)),
            ..HistoryArgs::default()
        };
        assert_eq!(HistoryWindow::resolve(&args, now), HistoryWindow { from: at(3), to: now });
        assert_eq!(
            HistoryWindow::resolve(&HistoryArgs::default(), now),
            HistoryWindow { from: now, to: now }
        );
    }

    #[test]
    fn test_huge_last_seconds_does_not_overflow() {
        let window = HistoryWindow::resolve(&HistoryArgs::last_seconds(u64::MAX), at(12));
        assert!(window.from < window.to);
    }

    #[test]
    fn test_request_shape() {
        let window = HistoryWindow { from: at(1), to: at(2) };
        let wire = serde_json::to_value(window.request("plant", "n1")).unwrap();
        assert_eq!(wire["System"], "plant");
        assert_eq!(wire["T2"].as_i64().unwrap() - wire["T1"].as_i64().unwrap(), 3_600_000);
    }

    #[tokio::test]
    async fn test_query_routes_to_log() {
        let bus = MessageBus::new();
        let mut handler = bus.register("History/fast/QueryHistory");
        tokio::spawn(async move {
            while let Some(request) = handler.recv().await {
                let req: HistoryRequest = request.decode().unwrap();
                let rows = vec![HistoryRow(json!("2024-05-01T12:00:00Z"), json!(7), json!(0), json!(req.system))];
                request.reply_json(&HistoryReply::from_rows(rows));
            }
        });

        let client = HistoryClient {
            history_root: "History".into(),
            default_log: "default".into(),
        };
        let args = HistoryArgs::last_seconds(10).with_log("fast");
        let values = client.query(&bus, "plant", "n1", &args).await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value.as_deref(), Some("7"));
        assert_eq!(values[0].system.as_deref(), Some("plant"));

        // default log has no handler
        assert!(client
            .query(&bus, "plant", "n1", &HistoryArgs::default())
            .await
            .is_none());
    }
}
