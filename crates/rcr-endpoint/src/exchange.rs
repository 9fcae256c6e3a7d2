// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversion between transport-level requests/frames and [`Msg`]s, and
//! back from a dispatch outcome to a transport-level response.
//!
//! A text transport's body is tagged `JSON` if it parses, else `TEXT`; a
//! binary transport's body is always tagged `BINARY`.

use rcr_core::{DataType, Metadata, Msg};
use std::collections::HashMap;

/// An inbound HTTP request, reduced to what building a [`Msg`] needs.
pub struct InboundRequest {
    /// Header names lowercased, values as received.
    pub headers: HashMap<String, String>,
    /// Path-pattern captures, e.g. `:id` from `/devices/:id`.
    pub path_params: HashMap<String, String>,
    /// Query-string parameters.
    pub query_params: HashMap<String, String>,
    /// Raw request body.
    pub body: Vec<u8>,
}

impl InboundRequest {
    /// Build a [`Msg`] from this request. `Content-Type` (if present and
    /// containing `json`) forces `dataType=JSON`; otherwise the body is
    /// tagged `JSON` if it parses, else `TEXT`.
    #[must_use]
    pub fn into_msg(self, msg_type: &str) -> Msg {
        let content_type = self.headers.get("content-type").cloned();
        let data_type = match content_type.as_deref() {
            Some(ct) if ct.contains("json") => DataType::Json,
            _ if serde_json::from_slice::<serde_json::Value>(&self.body).is_ok() => DataType::Json,
            _ => DataType::Text,
        };
        let mut metadata = Metadata::new();
        for (k, v) in self.path_params {
            metadata.put_value(k, v);
        }
        for (k, v) in self.query_params {
            metadata.put_value(k, v);
        }
        for (k, v) in self.headers {
            metadata.put_value(format!("header.{k}"), v);
        }
        Msg::new(0, msg_type, data_type, metadata, self.body)
    }
}

/// Build a [`Msg`] from one WebSocket frame. Binary frames are tagged
/// `BINARY`; text frames follow the JSON-else-TEXT rule. The resulting
/// metadata carries a `messageType` key: `1` for text and `2` for binary.
#[must_use]
pub fn ws_frame_to_msg(from: &str, is_binary: bool, payload: Vec<u8>, query_params: &HashMap<String, String>) -> Msg {
    let data_type = if is_binary {
        DataType::Binary
    } else if serde_json::from_slice::<serde_json::Value>(&payload).is_ok() {
        DataType::Json
    } else {
        DataType::Text
    };
    let mut metadata = Metadata::new();
    metadata.put_value("messageType", if is_binary { "2" } else { "1" });
    for (k, v) in query_params {
        metadata.put_value(k.clone(), v.clone());
    }
    Msg::new(0, from, data_type, metadata, payload)
}
