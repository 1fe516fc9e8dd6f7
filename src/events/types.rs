/// Event definitions for the engine journal
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use sha2::{Digest, Sha256};

use crate::types::{ExitReason, OptionType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub idempotency_key: String,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // Session lifecycle
    SessionStarted,
    RecoveryResumed,
    RecoveryDeclined,
    DayRollover,
    ShutdownInitiated,
    ShutdownCompleted,

    // Strategy transitions
    DirectionLocked,
    StrikeSwitched,
    EntrySignal,
    TickSkipped,

    // Positions
    PositionOpened,
    TrailingArmed,
    StopTriggered,
    PositionClosed,
    EodExit,

    // Health
    Heartbeat,
    InvariantBreached,
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::SessionStarted => "SESSION_STARTED",
            EventType::RecoveryResumed => "RECOVERY_RESUMED",
            EventType::RecoveryDeclined => "RECOVERY_DECLINED",
            EventType::DayRollover => "DAY_ROLLOVER",
            EventType::ShutdownInitiated => "SHUTDOWN_INITIATED",
            EventType::ShutdownCompleted => "SHUTDOWN_COMPLETED",
            EventType::DirectionLocked => "DIRECTION_LOCKED",
            EventType::StrikeSwitched => "STRIKE_SWITCHED",
            EventType::EntrySignal => "ENTRY_SIGNAL",
            EventType::TickSkipped => "TICK_SKIPPED",
            EventType::PositionOpened => "POSITION_OPENED",
            EventType::TrailingArmed => "TRAILING_ARMED",
            EventType::StopTriggered => "STOP_TRIGGERED",
            EventType::PositionClosed => "POSITION_CLOSED",
            EventType::EodExit => "EOD_EXIT",
            EventType::Heartbeat => "HEARTBEAT",
            EventType::InvariantBreached => "INVARIANT_BREACHED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    SessionStarted {
        session_id: String,
        mode: String,
        initial_capital: f64,
    },
    RecoveryResumed {
        date: NaiveDate,
        open_positions: usize,
        forced: bool,
    },
    RecoveryDeclined {
        date: NaiveDate,
    },
    DayRollover {
        from: Option<NaiveDate>,
        to: NaiveDate,
        forced_exits: usize,
    },
    ShutdownInitiated {
        reason: String,
    },
    ShutdownCompleted {
        duration_sec: u64,
    },
    DirectionLocked {
        date: NaiveDate,
        direction: OptionType,
        call_distance: f64,
        put_distance: f64,
    },
    StrikeSwitched {
        from: Option<i32>,
        to: i32,
        spot: f64,
    },
    EntrySignal {
        strike: i32,
        option_type: OptionType,
        close: f64,
        vwap: f64,
        previous_oi: i64,
        current_oi: i64,
    },
    TickSkipped {
        at: DateTime<Utc>,
        reason: String,
    },
    PositionOpened {
        order_id: String,
        symbol: String,
        size: i32,
        entry_price: f64,
    },
    TrailingArmed {
        order_id: String,
        ltp: f64,
        entry_price: f64,
    },
    StopTriggered {
        order_id: String,
        reason: ExitReason,
        threshold: f64,
        observed: f64,
    },
    PositionClosed {
        order_id: String,
        exit_price: f64,
        reason: ExitReason,
        pnl: f64,
    },
    EodExit {
        closed: usize,
    },
    Heartbeat {
        at: DateTime<Utc>,
        open_positions: usize,
        cash: f64,
    },
    InvariantBreached {
        detail: String,
    },
}

impl Event {
    /// Build an event stamped `at` with a content-derived idempotency key,
    /// so re-emitting the same transition at the same instant deduplicates.
    pub fn at(event_type: EventType, at: DateTime<Utc>, payload: EventPayload) -> Self {
        let payload_json = serde_json::to_string(&payload).unwrap_or_default();
        let idempotency_key = idempotency_key(&[
            event_type.as_str(),
            &at.timestamp_millis().to_string(),
            &payload_json,
        ]);

        Event {
            event_type,
            timestamp: at,
            idempotency_key,
            payload,
        }
    }

    pub fn new(event_type: EventType, payload: EventPayload) -> Self {
        Self::at(event_type, Utc::now(), payload)
    }
}

fn idempotency_key(components: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for component in components {
        hasher.update(component.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
