// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Operation handlers.
//!
//! Arguments use the schema's PascalCase names. `Type` and `System` are
//! optional everywhere and fall back to the bridge defaults.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::debug;

use tagway_core::topic::SystemType;

use crate::bridge::Bridge;
use crate::error::{ApiError, ApiResult};
use crate::model::{HistoryArgs, Target};

/// Interval of SSE keep-alive comments.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

// =============================================================================
// Arguments
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeArgs {
    #[serde(flatten)]
    target: Target,
    node_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodesArgs {
    #[serde(flatten)]
    target: Target,
    node_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BrowseArgs {
    #[serde(flatten)]
    target: Target,
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    filter: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HistoryQuery {
    #[serde(flatten)]
    target: Target,
    node_id: String,
    #[serde(flatten)]
    args: HistoryArgs,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WriteArgs {
    #[serde(flatten)]
    target: Target,
    node_id: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WriteManyArgs {
    #[serde(flatten)]
    target: Target,
    node_ids: Vec<String>,
    values: Vec<String>,
}

/// Query string of subscription requests. `NodeIds` is comma-separated.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscriptionParams {
    /// Backend family.
    #[serde(rename = "Type", default)]
    pub system_type: Option<SystemType>,
    /// System name.
    #[serde(default)]
    pub system: Option<String>,
    /// Node of `NodeValue`.
    #[serde(default)]
    pub node_id: Option<String>,
    /// Nodes of `NodeValues`.
    #[serde(default)]
    pub node_ids: Option<String>,
}

impl SubscriptionParams {
    fn target(&self) -> Target {
        Target {
            system_type: self.system_type,
            system: self.system.clone(),
        }
    }
}

fn parse<T: DeserializeOwned>(operation: &str, body: serde_json::Value) -> ApiResult<T> {
    serde_json::from_value(body).map_err(|e| ApiError::bad_request(format!("{operation}: {e}")))
}

fn reply<T: Serialize>(value: T) -> ApiResult<Json<serde_json::Value>> {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| ApiError::internal(e.to_string()))
}

// =============================================================================
// Handlers
// =============================================================================

/// `GET /schema`
pub async fn schema(State(bridge): State<Bridge>) -> String {
    bridge.schema().sdl().to_string()
}

/// `POST /query/{operation}`
pub async fn query(
    State(bridge): State<Bridge>,
    Path(operation): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<serde_json::Value>> {
    debug!(operation = %operation, "Query");
    match operation.as_str() {
        "ServerInfo" => {
            let target: Target = parse(&operation, body)?;
            reply(bridge.server_info(&target).await)
        }
        "NodeValue" => {
            let args: NodeArgs = parse(&operation, body)?;
            reply(bridge.node_value(&args.target, &args.node_id).await)
        }
        "NodeValues" => {
            let args: NodesArgs = parse(&operation, body)?;
            reply(bridge.node_values(&args.target, &args.node_ids).await)
        }
        "BrowseNode" => {
            let args: BrowseArgs = parse(&operation, body)?;
            reply(
                bridge
                    .browse_node(&args.target, args.node_id.as_deref(), args.filter.as_deref())
                    .await,
            )
        }
        "FindNodes" => {
            let args: BrowseArgs = parse(&operation, body)?;
            reply(
                bridge
                    .find_nodes(&args.target, args.node_id.as_deref(), args.filter.as_deref())
                    .await,
            )
        }
        "History" => {
            let query: HistoryQuery = parse(&operation, body)?;
            reply(bridge.history(&query.target, &query.node_id, &query.args).await)
        }
        _ => Err(ApiError::not_found(operation)),
    }
}

/// `POST /mutation/{operation}`
pub async fn mutation(
    State(bridge): State<Bridge>,
    Path(operation): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<serde_json::Value>> {
    debug!(operation = %operation, "Mutation");
    match operation.as_str() {
        "NodeValue" => {
            let args: WriteArgs = parse(&operation, body)?;
            reply(bridge.set_node_value(&args.target, &args.node_id, &args.value).await)
        }
        "NodeValues" => {
            let args: WriteManyArgs = parse(&operation, body)?;
            reply(
                bridge
                    .set_node_values(&args.target, &args.node_ids, &args.values)
                    .await,
            )
        }
        _ => Err(ApiError::not_found(operation)),
    }
}

/// `GET /subscription/{operation}`
///
/// Streams values as `NodeValue` events. Closing the connection drops the
/// stream, which unsubscribes.
pub async fn subscription(
    State(bridge): State<Bridge>,
    Path(operation): Path<String>,
    Query(params): Query<SubscriptionParams>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let node_ids: Vec<String> = match operation.as_str() {
        "NodeValue" => vec![params
            .node_id
            .clone()
            .ok_or_else(|| ApiError::bad_request("NodeValue: missing NodeId"))?],
        "NodeValues" => params
            .node_ids
            .as_deref()
            .map(|ids| {
                ids.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .filter(|ids: &Vec<String>| !ids.is_empty())
            .ok_or_else(|| ApiError::bad_request("NodeValues: missing NodeIds"))?,
        _ => return Err(ApiError::not_found(operation)),
    };

    let stream = bridge
        .subscribe_node_values(&params.target(), &node_ids)
        .await;
    debug!(client_id = %stream.client_id(), nodes = node_ids.len(), "Subscription opened");

    let events = stream.map(|value| {
        let data = serde_json::to_string(&value).unwrap_or_default();
        Ok(Event::default().event("NodeValue").data(data))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}
