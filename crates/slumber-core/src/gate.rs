// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Admission check for a deactivation set.

use tracing::{debug, warn};

use crate::error::{IdleError, Rejection};
use crate::ident::{NodeId, NodeSet};
use crate::lock::WakeupSignal;
use crate::registry::{NodeRegistry, RefAdjust, MARKED_IDLE};
use crate::state::Attachment;

/// Claims every node of `set` for idling.
///
/// Each node must be registered and attached, must move its reference count
/// from 0 to [`MARKED_IDLE`] (an existing mark is accepted), and no wake
/// request may be queued. The first failure undoes the marks placed by this
/// call and is reported as [`IdleError::AdmissionRejected`].
///
/// Returns the nodes this call marked.
pub(crate) fn admit(
    registry: &NodeRegistry,
    wakeup: &WakeupSignal,
    set: &NodeSet,
) -> Result<Vec<NodeId>, IdleError> {
    let mut marked = Vec::with_capacity(set.len());
    for node in set {
        if let Err(reason) = admit_one(registry, wakeup, node, &mut marked) {
            for &claimed in &marked {
                if let Err(err) = registry.adjust_ref(claimed, RefAdjust::ClearMark) {
                    warn!(node = %claimed, error = %err, "could not clear idle mark");
                }
            }
            debug!(%node, %reason, "admission rejected");
            return Err(IdleError::AdmissionRejected { node, reason });
        }
    }
    Ok(marked)
}

fn admit_one(
    registry: &NodeRegistry,
    wakeup: &WakeupSignal,
    node: NodeId,
    marked: &mut Vec<NodeId>,
) -> Result<(), Rejection> {
    let record = registry.record(node).map_err(|_| Rejection::Unregistered)?;
    if record.fields().attachment != Attachment::Attached {
        return Err(Rejection::NotAttached);
    }
    let outcome = record.adjust_ref(RefAdjust::MarkIdle);
    if outcome.applied {
        marked.push(node);
    } else if outcome.prior != MARKED_IDLE {
        return Err(Rejection::Referenced(outcome.prior));
    }
    if wakeup.is_pending() {
        return Err(Rejection::WakeupPending);
    }
    Ok(())
}
