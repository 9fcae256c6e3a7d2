// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Chain-facing endpoint adapters: HTTP and WebSocket servers that turn
//! inbound traffic into dispatches against a [`rcr_runtime::Runtime`].
//!
//! Each transport owns its own [`router::RouterTable`] so routes can be
//! added and soft-removed while the server is already running.

mod exchange;
mod http;
mod router;
mod websocket;

pub use exchange::{ws_frame_to_msg, InboundRequest};
pub use http::{dispatch_and_respond, error_to_response, HttpEndpoint, HttpEndpointConfig};
pub use router::{match_path, Router, RouterTable};
pub use websocket::{WebSocketEndpoint, WebSocketEndpointConfig};
