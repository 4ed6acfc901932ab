//! Dispatch wire schema.
//!
//! Every cast sent to a compute host is a JSON object of the form
//! `{"method": "<name>", "args": {...}}`. Hosts deserialize the same types.

use serde::{Deserialize, Serialize};

/// One-way command addressed to the host owning an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum ComputeMessage {
    CreateLocalVolume {
        instance_id: i64,
        device: String,
        volume_id: i64,
        snapshot_id: Option<String>,
        size: u64,
    },
    DeleteLocalVolume {
        volume_id: i64,
    },
    ResizeLocalVolume {
        volume_id: i64,
        new_size: u64,
    },
    SnapshotLocalVolume {
        volume_name: String,
        instance_id: i64,
        image_id: String,
        force_snapshot: bool,
    },
}

impl ComputeMessage {
    /// Method name as it appears on the wire.
    pub fn method(&self) -> &'static str {
        match self {
            ComputeMessage::CreateLocalVolume { .. } => "create_local_volume",
            ComputeMessage::DeleteLocalVolume { .. } => "delete_local_volume",
            ComputeMessage::ResizeLocalVolume { .. } => "resize_local_volume",
            ComputeMessage::SnapshotLocalVolume { .. } => "snapshot_local_volume",
        }
    }
}

/// A message bound for a specific host queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastEnvelope {
    /// Queue name, `<compute_topic>.<host>`.
    pub queue: String,
    pub message: ComputeMessage,
}

/// Queue name for the compute service on `host`.
pub fn host_queue(topic: &str, host: &str) -> String {
    format!("{}.{}", topic, host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_message_wire_format() {
        let msg = ComputeMessage::CreateLocalVolume {
            instance_id: 7,
            device: "/dev/vdb".to_string(),
            volume_id: 3,
            snapshot_id: None,
            size: 1024,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "method": "create_local_volume",
                "args": {
                    "instance_id": 7,
                    "device": "/dev/vdb",
                    "volume_id": 3,
                    "snapshot_id": null,
                    "size": 1024
                }
            })
        );
        assert_eq!(msg.method(), "create_local_volume");
    }

    #[test]
    fn test_snapshot_message_parses_from_host_side() {
        let raw = r#"{"method":"snapshot_local_volume","args":{"volume_name":"local-volume-00000001","instance_id":1,"image_id":"img","force_snapshot":true}}"#;
        let msg: ComputeMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.method(), "snapshot_local_volume");
        assert!(matches!(
            msg,
            ComputeMessage::SnapshotLocalVolume {
                force_snapshot: true,
                ..
            }
        ));
    }

    #[test]
    fn test_host_queue() {
        assert_eq!(host_queue("compute", "node-1"), "compute.node-1");
    }
}
