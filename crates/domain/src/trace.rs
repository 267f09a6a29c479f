use serde::Serialize;

/// Structured trace events emitted across all Mintage crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    MinterCall {
        server: String,
        prefix: String,
        ok: bool,
        duration_ms: u64,
    },
    RegistrarSubmit {
        doi: String,
        batch_id: String,
        ok: bool,
        duration_ms: u64,
    },
    RegistrarPoll {
        batch_id: String,
        outcome: String,
        duration_ms: u64,
    },
    QueueTransition {
        seq: u64,
        identifier: String,
        from: String,
        to: String,
    },
    AgentResolved {
        pid: String,
        name: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "mintage_event");
    }
}
