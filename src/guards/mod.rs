//! Concurrency & Budget Guards (§4.5): the process-wide single-writer
//! mutex, per-service circuit breakers, and the budget ledger.

pub mod breaker;
pub mod budget;
pub mod mutex;

pub use breaker::{BreakerState, CircuitBreakerRegistry};
pub use budget::{BudgetLedger, CostLedgerEntry};
pub use mutex::{GlobalWriterLock, WriterGuard};
