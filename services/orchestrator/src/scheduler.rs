//! Controller ordering.
//!
//! Placement and action controllers run separately, each in ascending
//! priority. Equal priorities keep the order the group's intents list them.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use tracing::{debug, warn};

use crate::metadata::{MetadataError, MetadataStore};
use crate::model::{Controller, ControllerType, IntentList};

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("controller {0} is not registered")]
    ControllerNotFound(String),

    #[error("fetching controller {name}: {source}")]
    Metadata {
        name: String,
        #[source]
        source: MetadataError,
    },
}

/// Controllers to invoke, in invocation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrioritizedControllers {
    pub placement: Vec<Controller>,
    pub action: Vec<Controller>,
}

struct Queued {
    priority: u32,
    seq: usize,
    controller: Controller,
}

impl Queued {
    fn key(&self) -> (u32, usize) {
        (self.priority, self.seq)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Min-heap on `(priority, insertion order)`.
#[derive(Default)]
struct ControllerQueue {
    heap: BinaryHeap<Reverse<Queued>>,
    next_seq: usize,
}

impl ControllerQueue {
    fn push(&mut self, controller: Controller) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Queued {
            priority: controller.spec.priority,
            seq,
            controller,
        }));
    }

    fn into_ordered(mut self) -> Vec<Controller> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(Reverse(queued)) = self.heap.pop() {
            out.push(queued.controller);
        }
        out
    }
}

/// Fetch and order the controllers named by a group's intents.
///
/// A controller referenced twice is scheduled once.
pub async fn prioritize(
    store: &dyn MetadataStore,
    intents: &IntentList,
) -> SchedulerResult<PrioritizedControllers> {
    let mut placement = ControllerQueue::default();
    let mut action = ControllerQueue::default();
    let mut seen = HashSet::new();

    for name in intents.controller_names() {
        if !seen.insert(name) {
            continue;
        }
        let controller = store.get_controller(name).await.map_err(|source| {
            if source.is_not_found() {
                SchedulerError::ControllerNotFound(name.to_string())
            } else {
                SchedulerError::Metadata {
                    name: name.to_string(),
                    source,
                }
            }
        })?;
        match controller.spec.controller_type {
            ControllerType::Placement => placement.push(controller),
            ControllerType::Action => action.push(controller),
            ControllerType::Unknown => {
                warn!(controller = name, "Skipping controller of unknown type");
            }
        }
    }

    let ordered = PrioritizedControllers {
        placement: placement.into_ordered(),
        action: action.into_ordered(),
    };
    debug!(
        placement = ordered.placement.len(),
        action = ordered.action.len(),
        "Prioritized controllers"
    );
    Ok(ordered)
}
