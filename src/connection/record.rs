use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The single source of truth for a session (§3). Lifecycle: *issued*
/// (`open ∧ ¬connected`) → *active* (`connected ∧ alive`) → *silent*
/// (`connected ∧ ¬alive`) → *closed* (`¬open`, terminal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: Uuid,
    pub client_id: String,

    /// Set at successful WS upgrade; never changes after.
    pub server_id: Option<String>,

    /// Cleared on cleanup.
    pub token_id: Option<Uuid>,

    pub client_address: String,

    /// Set at token issuance; never changes after.
    pub report_url: String,

    /// Set at issuance, cleared at upgrade.
    pub timeout: Option<DateTime<Utc>>,

    /// `None` means "not connected" (the spec's `false` sentinel); `Some`
    /// holds the instant the upgrade completed.
    pub connected: Option<DateTime<Utc>>,

    pub disconnected: Option<DateTime<Utc>>,

    pub alive: bool,
    pub open: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl ConnectionRecord {
    /// A freshly-issued record: token minted, not yet upgraded (§4.1 step 5).
    pub fn issued(
        id: Uuid,
        client_id: String,
        client_address: String,
        report_url: String,
        token_id: Uuid,
        timeout: DateTime<Utc>,
    ) -> Self {
        ConnectionRecord {
            id,
            client_id,
            server_id: None,
            token_id: Some(token_id),
            client_address,
            report_url,
            timeout: Some(timeout),
            connected: None,
            disconnected: None,
            alive: false,
            open: true,
            last_heartbeat: None,
        }
    }

    /// True while the record is in the *issued* state and its timeout has
    /// passed — an abandoned issuance eligible for replacement (§3, §4.1
    /// step 3).
    pub fn is_abandoned(&self, now: DateTime<Utc>) -> bool {
        self.connected.is_none()
            && self
                .timeout
                .map(|timeout| timeout < now)
                .unwrap_or(false)
    }

    /// I1: this record still counts as "open" for the purposes of rejecting
    /// a duplicate issuance — either actively connected, or issued and not
    /// yet timed out.
    pub fn blocks_new_issuance(&self, now: DateTime<Utc>) -> bool {
        self.open && (self.connected.is_some() || !self.is_abandoned(now))
    }

    /// Apply the WS-upgrade promotion (§4.2 step 3): I2 requires `alive` and
    /// `serverId` move together with `connected`.
    pub fn promote(&mut self, server_id: String, client_address: String, now: DateTime<Utc>) {
        self.alive = true;
        self.connected = Some(now);
        self.server_id = Some(server_id);
        self.client_address = client_address;
        self.timeout = None;
    }

    /// Apply cleanup bookkeeping (§4.6 step 3). `tokenId` is cleared here
    /// (§3 field table); the caller is responsible for deleting the
    /// corresponding token record from the store (I5).
    pub fn close(&mut self, disconnected_by_server: bool, now: DateTime<Utc>) {
        self.alive = false;
        self.open = false;
        self.token_id = None;
        if disconnected_by_server {
            self.disconnected = Some(now);
        }
    }
}
