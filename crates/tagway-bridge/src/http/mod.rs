// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! HTTP surface of the bridge.
//!
//! | Route                          | Operation                                        |
//! |--------------------------------|--------------------------------------------------|
//! | `GET /schema`                  | SDL text                                         |
//! | `POST /query/{op}`             | `ServerInfo`, `NodeValue(s)`, `BrowseNode`, `FindNodes`, `History` |
//! | `POST /mutation/{op}`          | `NodeValue(s)`                                   |
//! | `GET /subscription/{op}`       | `NodeValue(s)` as Server-Sent Events             |

mod handlers;
mod server;

pub use handlers::SubscriptionParams;
pub use server::HttpServer;
