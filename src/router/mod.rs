//! Worker Router: a pure decision function over a [`JobTicket`] that
//! selects a worker kind before anything is invoked (§4.4).

use crate::ticket::{JobTicket, JobType, Quality, WorkerPreference};

/// Which worker kind a ticket should run on, plus whether failure may fall
/// back to another kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    /// Routes through the Command Transport to the desktop application.
    LocalInteractive,
    /// Routes to a remote batch PDF service.
    ServerlessBatch,
    /// Fans out across multiple external tool servers on a declared workflow.
    MultiServer,
}

/// The router's decision, including the reason a test or log line can cite
/// without re-deriving the rule (§4.4 "first match wins").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingDecision {
    pub worker: WorkerKind,
    pub rule: RoutingRule,
    /// `true` when the local-interactive/multi-server global mutex must
    /// guard this invocation (§4.5); serverless calls do not take it.
    pub requires_global_lock: bool,
    /// `true` when a failure must surface directly with no attempt to
    /// retry on a different worker kind (the TFU/world-class failsafe).
    pub no_fallback: bool,
}

/// Which numbered rule in §4.4 produced the decision, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingRule {
    WorldClass,
    TfuOrMultiServer,
    LocalInteractivePreferredOrHighQualityReport,
    ServerlessDefault,
    ServerlessUnconfiguredFallback,
}

/// Decide the worker kind for `ticket` using the first-match-wins decision
/// rule (§4.4). `serverless_configured` reflects whether a serverless
/// endpoint is reachable at all, since rule #4 falls back to local
/// interactive when it is not.
pub fn route(ticket: &JobTicket, serverless_configured: bool) -> RoutingDecision {
    if ticket.world_class {
        return RoutingDecision {
            worker: WorkerKind::LocalInteractive,
            rule: RoutingRule::WorldClass,
            requires_global_lock: true,
            no_fallback: true,
        };
    }

    if ticket.mcp_mode || ticket.is_tfu() || ticket.multi_server_workflow.is_some() {
        return RoutingDecision {
            worker: WorkerKind::MultiServer,
            rule: RoutingRule::TfuOrMultiServer,
            requires_global_lock: true,
            no_fallback: ticket.is_tfu(),
        };
    }

    if ticket.worker_preference == WorkerPreference::LocalInteractive
        || (ticket.quality == Quality::High && is_report_class(ticket))
    {
        return RoutingDecision {
            worker: WorkerKind::LocalInteractive,
            rule: RoutingRule::LocalInteractivePreferredOrHighQualityReport,
            requires_global_lock: true,
            no_fallback: false,
        };
    }

    if serverless_configured {
        RoutingDecision {
            worker: WorkerKind::ServerlessBatch,
            rule: RoutingRule::ServerlessDefault,
            requires_global_lock: false,
            no_fallback: false,
        }
    } else {
        RoutingDecision {
            worker: WorkerKind::LocalInteractive,
            rule: RoutingRule::ServerlessUnconfiguredFallback,
            requires_global_lock: true,
            no_fallback: false,
        }
    }
}

/// Partnership and report document types count toward rule #3's
/// "partnership/report class" test (§4.4).
fn is_report_class(ticket: &JobTicket) -> bool {
    matches!(
        ticket.job_type,
        JobType::PartnershipDocument | JobType::ProgramReport | JobType::AnnualReport
    )
}
