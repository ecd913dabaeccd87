//! Clock and identifier boundaries (§6). Injected into every component that
//! needs wall-clock time or fresh identifiers so tests can supply
//! deterministic substitutes without mocking libraries.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Returns the current UTC instant. Production code uses [`SystemClock`];
/// tests use a `Cell<DateTime<Utc>>`-backed fake (see `forgerun-testkit`).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Returns fresh opaque run identifiers.
pub trait IdGen: Send + Sync {
    fn new_run_id(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRunIdGen;

impl IdGen for UuidRunIdGen {
    fn new_run_id(&self) -> String {
        format!("run_{}", Uuid::new_v4().simple())
    }
}
