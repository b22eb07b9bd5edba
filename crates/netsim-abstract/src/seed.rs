use crate::model::{NetworkNode, NetworkUser, NodeKind, TrafficType};

/// The fixed topology every simulation starts from.
pub fn seed_nodes() -> Vec<NetworkNode> {
    vec![
        NetworkNode::new("user-a", NodeKind::User),
        NetworkNode::new("router-1", NodeKind::Router),
        NetworkNode::new("router-2", NodeKind::Router),
        NetworkNode::new("server-x", NodeKind::Server),
    ]
}

/// Users present on a fresh start, after a reset, or when storage is unreadable.
pub fn seed_users() -> Vec<NetworkUser> {
    vec![
        NetworkUser::new("user-1", "User A (Video)", TrafficType::VideoStream, 25.0),
        NetworkUser::new("user-2", "User B (Download)", TrafficType::FileDownload, 30.0),
    ]
}
