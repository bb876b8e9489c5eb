// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Broker client layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         MqttDriver                              │
//! │                   (ProtocolDriver impl)                         │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       MqttTransport                             │
//! │                (Abstract broker session)                        │
//! └─────────────────────────────────────────────────────────────────┘
//!            │                                     │
//!            ▼                                     ▼
//! ┌─────────────────────┐             ┌─────────────────────┐
//! │  NetworkTransport   │             │   MemoryTransport   │
//! │     (rumqttc)       │             │  (in-process broker)│
//! └─────────────────────┘             └─────────────────────┘
//! ```

mod memory;
mod network;
mod transport;

pub use memory::{MemoryBroker, MemoryTransport, PublishedMessage};
pub use network::NetworkTransport;
pub use transport::{
    ConnectOptions, MqttTransport, QoS, TransportEvent, DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE,
};
