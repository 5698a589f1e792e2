use trellis::NetworkId;

/// Host-visible happenings, drained once per tick for the log/dashboard.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        client_id: NetworkId,
    },
    ClientIdentified {
        client_id: NetworkId,
        name: String,
    },
    ClientDisconnected {
        client_id: NetworkId,
    },
    Chat {
        client_id: NetworkId,
        name: String,
        text: String,
    },
}
